//! `name <op> value` filters over anything that can look up a value by name.

use crate::value::Value;
use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeZone};
use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;

const FILTER_PATTERN: &str = r"^([-a-zA-Z0-9_ ]*[-a-zA-Z0-9_]+) *([<>=!]+) *(.+)$";

/// Filters named `started` compare against creation time instead of a stored value.
pub const STARTED_KEY: &str = "started";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FilterError {
    #[error(
        "Failed to parse filter: \"{0}\".\n\nFilters must be in the format \"<name> <operator> <value>\",\nwhere <operator> can be\n  \"=\" (equal),\n  \"!=\" (not equal),\n  \"<\" (less than),\n  \"<=\" (less than or equal),\n  \">\" (greater than), or\n  \">=\" (greater than or equal)"
    )]
    Syntax(String),
    #[error("Failed to parse created time: {0}")]
    Time(String),
}

/// Something whose named attributes can be filtered and sorted on.
pub trait ValueGetter {
    /// `None` means the attribute does not exist at all, as opposed to `Some(Value::None)`.
    fn get_value(&self, name: &str) -> Option<Value>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operator {
    Equal,
    NotEqual,
    GreaterThan,
    GreaterOrEqual,
    LessThan,
    LessOrEqual,
}

impl Operator {
    fn parse(s: &str) -> Option<Operator> {
        match s {
            "=" => Some(Operator::Equal),
            "!=" => Some(Operator::NotEqual),
            "<" => Some(Operator::LessThan),
            "<=" => Some(Operator::LessOrEqual),
            ">" => Some(Operator::GreaterThan),
            ">=" => Some(Operator::GreaterOrEqual),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Filter {
    pub name: String,
    pub operator: Operator,
    pub value: Value,
}

impl Filter {
    pub fn parse(input: &str) -> Result<Filter, FilterError> {
        let syntax_err = || FilterError::Syntax(input.to_string());
        let trimmed = input.trim();
        let caps = filter_regex()
            .and_then(|re| re.captures(trimmed))
            .ok_or_else(syntax_err)?;
        let name = caps[1].to_string();
        let operator = Operator::parse(&caps[2]).ok_or_else(syntax_err)?;
        let raw = &caps[3];

        let value = if name == STARTED_KEY {
            let t = parse_local_time(raw).map_err(FilterError::Time)?;
            Value::Float(t.timestamp() as f64)
        } else {
            Value::parse_from_string(raw)
        };
        Ok(Filter {
            name,
            operator,
            value,
        })
    }

    pub fn matches(&self, obj: &dyn ValueGetter) -> bool {
        // A stored null behaves exactly like a missing value.
        let value = match obj.get_value(&self.name).filter(|v| !v.is_none()) {
            Some(v) => v,
            None => return self.value.is_none() && self.operator == Operator::Equal,
        };
        if self.value.is_none() {
            return self.operator != Operator::Equal;
        }
        match self.operator {
            Operator::Equal => value.equal(&self.value),
            Operator::NotEqual => value.not_equal(&self.value),
            Operator::LessThan => value.less_than(&self.value),
            Operator::LessOrEqual => value.less_or_equal(&self.value),
            Operator::GreaterThan => value.greater_than(&self.value),
            Operator::GreaterOrEqual => value.greater_or_equal(&self.value),
        }
    }
}

/// A conjunction of filters.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Filters {
    filters: Vec<Filter>,
}

impl Filters {
    pub fn make<S: AsRef<str>>(inputs: &[S]) -> Result<Filters, FilterError> {
        let filters = inputs
            .iter()
            .map(|s| Filter::parse(s.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Filters { filters })
    }

    /// Puts a filter first, replacing every existing filter on the same name.
    pub fn set_exclusive(&mut self, name: &str, operator: Operator, value: Value) {
        self.filters.retain(|f| f.name != name);
        self.filters.insert(
            0,
            Filter {
                name: name.to_string(),
                operator,
                value,
            },
        );
    }

    pub fn matches(&self, obj: &dyn ValueGetter) -> bool {
        self.filters.iter().all(|f| f.matches(obj))
    }

    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }
}

fn filter_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(FILTER_PATTERN).ok()).as_ref()
}

const DATETIME_FORMATS: [&str; 5] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%m/%d/%Y %H:%M:%S",
];
const DATE_FORMATS: [&str; 4] = ["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%Y%m%d"];

/// Parses a loosely formatted date, interpreting zone-less input in the local time zone.
pub fn parse_local_time(s: &str) -> Result<DateTime<Local>, String> {
    let s = s.trim();
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Ok(t.with_timezone(&Local));
    }
    let naive = DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
        .ok_or_else(|| format!("Could not find format for \"{}\"", s))?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .ok_or_else(|| format!("\"{}\" does not exist in the local time zone", s))
}
