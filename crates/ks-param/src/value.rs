use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

pub type ValueMap = BTreeMap<String, Value>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Type {
    Int,
    Float,
    String,
    Bool,
    Object,
    None,
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Type::Int => "int",
            Type::Float => "float",
            Type::String => "string",
            Type::Bool => "bool",
            Type::Object => "object",
            Type::None => "none",
        };
        f.write_str(name)
    }
}

/// A parameter or metric value.
///
/// Anything that is not a scalar (lists, maps) is kept as an opaque JSON object. Comparisons
/// never fail: values of incompatible types are simply unequal and unordered, except that
/// ints and floats compare numerically.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    String(String),
    Bool(bool),
    Object(serde_json::Value),
    None,
}

impl Value {
    pub fn value_type(&self) -> Type {
        match self {
            Value::Int(_) => Type::Int,
            Value::Float(_) => Type::Float,
            Value::String(_) => Type::String,
            Value::Bool(_) => Type::Bool,
            Value::Object(_) => Type::Object,
            Value::None => Type::None,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    /// Decodes a stored JSON value. Integral numbers become ints, fractional ones floats, and
    /// the strings `"null"`/`"None"` become none.
    pub fn from_json(json: serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::None,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else if let Some(f) = n.as_f64() {
                    Value::Float(f)
                } else {
                    Value::Object(serde_json::Value::Number(n))
                }
            }
            serde_json::Value::String(s) if s == "null" || s == "None" => Value::None,
            serde_json::Value::String(s) => Value::String(s),
            other => Value::Object(other),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Value::from(*f),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Object(o) => o.clone(),
            Value::None => serde_json::Value::Null,
        }
    }

    /// Parses a value typed by a human on the command line, where strings are unquoted.
    pub fn parse_from_string(s: &str) -> Value {
        if s == "null" || s == "None" {
            return Value::None;
        }
        if let Ok(i) = serde_json::from_str::<i64>(s) {
            return Value::Int(i);
        }
        if let Ok(f) = serde_json::from_str::<f64>(s) {
            return Value::Float(f);
        }
        match s.to_lowercase().as_str() {
            "false" => return Value::Bool(false),
            "true" => return Value::Bool(true),
            _ => {}
        }
        if let Ok(json) = serde_json::from_str::<serde_json::Value>(s) {
            return Value::Object(json);
        }
        Value::String(s.to_string())
    }

    /// Truncated rendering for narrow table cells.
    ///
    /// Floats keep `precision` significant digits, or `max_length` when they are larger than
    /// `10^precision`. Strings and objects are cut to `max_length` with a trailing `...`.
    pub fn short_string(&self, max_length: usize, precision: usize) -> String {
        match self {
            Value::Float(f) => {
                let mut precision = precision;
                if *f > 10f64.powi(precision as i32)
                    && *f < 10f64.powi(max_length as i32)
                    && max_length > precision
                {
                    precision = max_length;
                }
                format_float_g(*f, precision)
            }
            Value::String(s) => truncate(s, max_length),
            Value::Object(_) => truncate(&self.to_string(), max_length),
            _ => self.to_string(),
        }
    }

    pub fn equal(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::None, _) | (_, Value::None) => false,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(a), Value::Float(b)) => (*a as f64) == *b,
            (Value::Float(a), Value::Int(b)) => *a == (*b as f64),
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a == b,
            _ => false,
        }
    }

    pub fn not_equal(&self, other: &Value) -> bool {
        !self.equal(other)
    }

    pub fn greater_than(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Float(a), Value::Int(b)) => *a > *b as f64,
            (Value::Int(a), Value::Float(b)) => (*a as f64) > *b,
            (Value::Int(a), Value::Int(b)) => a > b,
            (Value::Float(a), Value::Float(b)) => a > b,
            (Value::String(a), Value::String(b)) => a > b,
            (Value::Bool(a), Value::Bool(b)) => *a && !*b,
            _ => false,
        }
    }

    pub fn less_than(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Float(a), Value::Int(b)) => *a < *b as f64,
            (Value::Int(a), Value::Float(b)) => (*a as f64) < *b,
            (Value::Int(a), Value::Int(b)) => a < b,
            (Value::Float(a), Value::Float(b)) => a < b,
            (Value::String(a), Value::String(b)) => a < b,
            (Value::Bool(a), Value::Bool(b)) => !*a && *b,
            _ => false,
        }
    }

    pub fn greater_or_equal(&self, other: &Value) -> bool {
        self.greater_than(other) || self.equal(other)
    }

    pub fn less_or_equal(&self, other: &Value) -> bool {
        self.less_than(other) || self.equal(other)
    }
}

/// JSON rendering, except that strings are shown raw.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => f.write_str(s),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => f.write_str(&format_float_json(*x)),
            Value::Bool(b) => write!(f, "{}", b),
            Value::None => f.write_str("null"),
            Value::Object(o) => match serde_json::to_string(o) {
                Ok(s) => f.write_str(&s),
                Err(_) => Err(fmt::Error),
            },
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::Float(f) => serializer.serialize_f64(*f),
            Value::String(s) => serializer.serialize_str(s),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Object(o) => o.serialize(serializer),
            Value::None => serializer.serialize_unit(),
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let json = serde_json::Value::deserialize(deserializer)?;
        Ok(Value::from_json(json))
    }
}

/// Cuts `s` to `max_length` characters, ending in `...`, when it is longer.
pub fn truncate(s: &str, max_length: usize) -> String {
    if s.chars().count() > max_length && max_length > 3 {
        let mut out: String = s.chars().take(max_length - 3).collect();
        out.push_str("...");
        return out;
    }
    s.to_string()
}

/// Shortest decimal form, switching to exponent notation outside [1e-6, 1e21).
fn format_float_json(f: f64) -> String {
    let abs = f.abs();
    if abs != 0.0 && (abs < 1e-6 || abs >= 1e21) {
        let s = format!("{:e}", f);
        return match s.split_once('e') {
            Some((mantissa, exp)) if !exp.starts_with('-') => format!("{}e+{}", mantissa, exp),
            _ => s,
        };
    }
    format!("{}", f)
}

/// `%g`-style formatting with `precision` significant digits and trailing zeros removed.
pub fn format_float_g(f: f64, precision: usize) -> String {
    if f.is_nan() || f.is_infinite() {
        return format!("{}", f);
    }
    let precision = precision.max(1);
    let neg = f.is_sign_negative() && f != 0.0;
    let (mut digits, dp) = significant_digits(f.abs(), precision);
    while digits.len() > 1 && digits.ends_with('0') {
        digits.pop();
    }
    if digits == "0" {
        return if neg { "-0".into() } else { "0".into() };
    }
    let nd = digits.len() as i32;
    let exp = dp - 1;
    let mut eprec = precision as i32;
    if eprec > nd && nd >= dp {
        eprec = nd;
    }

    let mut out = String::new();
    if neg {
        out.push('-');
    }
    if exp < -4 || exp >= eprec {
        out.push_str(&digits[..1]);
        if digits.len() > 1 {
            out.push('.');
            out.push_str(&digits[1..]);
        }
        out.push('e');
        out.push(if exp < 0 { '-' } else { '+' });
        out.push_str(&format!("{:02}", exp.abs()));
        return out;
    }

    if dp <= 0 {
        out.push_str("0.");
        for _ in 0..(-dp) {
            out.push('0');
        }
        out.push_str(&digits);
    } else if dp >= nd {
        out.push_str(&digits);
        for _ in 0..(dp - nd) {
            out.push('0');
        }
    } else {
        out.push_str(&digits[..dp as usize]);
        out.push('.');
        out.push_str(&digits[dp as usize..]);
    }
    out
}

/// Rounds `abs` to `precision` significant digits, returning the digit string and the
/// position of the decimal point relative to its start.
fn significant_digits(abs: f64, precision: usize) -> (String, i32) {
    if abs == 0.0 {
        return ("0".into(), 1);
    }
    let formatted = format!("{:.*e}", precision - 1, abs);
    let (mantissa, exp) = formatted.split_once('e').unwrap_or((formatted.as_str(), "0"));
    let exp: i32 = exp.parse().unwrap_or(0);
    let digits: String = mantissa.chars().filter(|c| c.is_ascii_digit()).collect();
    (digits, exp + 1)
}
