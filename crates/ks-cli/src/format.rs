use chrono::{DateTime, Local, Utc};
use std::io::{self, Write};

const DAY: i64 = 24 * 60 * 60;

/// (length of the unit in seconds, text for about one unit, plural unit name)
const PERIODS: [(i64, &str, &str); 6] = [
    (1, "about a second", "seconds"),
    (60, "about a minute", "minutes"),
    (60 * 60, "about an hour", "hours"),
    (DAY, "one day", "days"),
    (30 * DAY, "one month", "months"),
    (365 * DAY, "one year", "years"),
];

/// Relative time like "2 minutes ago". Each unit is used until the next one is reached, and
/// the count is rounded to the nearest whole unit.
pub fn format_time(t: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let elapsed = (now - t).num_milliseconds().max(0) as f64 / 1000.0;
    for (i, (unit, one, many)) in PERIODS.iter().enumerate() {
        let is_last = i + 1 == PERIODS.len();
        if is_last || elapsed < PERIODS[i + 1].0 as f64 {
            let count = (elapsed / *unit as f64).round() as i64;
            return if count <= 1 {
                format!("{} ago", one)
            } else {
                format!("{} {} ago", count, many)
            };
        }
    }
    String::new()
}

/// Absolute time in the local timezone, e.g. "Tue, 1 Jul 2003 10:52:37 +0200".
pub fn format_timestamp(t: DateTime<Utc>) -> String {
    t.with_timezone(&Local).to_rfc2822()
}

/// Tab-aligned writer with two spaces between columns and columns at least `min_width` wide.
pub fn table_writer<W: Write>(out: W, min_width: usize) -> tabwriter::TabWriter<W> {
    tabwriter::TabWriter::new(out)
        .minwidth(min_width)
        .padding(2)
}

/// Writes one row whose cells may span several lines, followed by a blank spacer line.
///
/// `["a", "b\nc"]` becomes `a\tb`, `\tc` and `\t`.
pub fn write_row<W: Write>(w: &mut W, columns: &[String]) -> io::Result<()> {
    let num_lines = columns
        .iter()
        .map(|c| c.split('\n').count())
        .max()
        .unwrap_or(1)
        + 1;
    let mut lines = vec![vec![""; columns.len()]; num_lines];
    for (col, cell) in columns.iter().enumerate() {
        for (row, text) in cell.split('\n').enumerate() {
            lines[row][col] = text;
        }
    }
    for line in lines {
        writeln!(w, "{}", line.join("\t"))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn relative_times() {
        let now = Utc::now();
        let ago = |secs: i64| format_time(now - Duration::seconds(secs), now);
        assert_eq!(ago(0), "about a second ago");
        assert_eq!(ago(1), "about a second ago");
        assert_eq!(ago(5), "5 seconds ago");
        assert_eq!(ago(60), "about a minute ago");
        assert_eq!(ago(120), "2 minutes ago");
        assert_eq!(ago(3600), "about an hour ago");
        assert_eq!(ago(5 * 3600), "5 hours ago");
        assert_eq!(ago(DAY), "one day ago");
        assert_eq!(ago(3 * DAY), "3 days ago");
        assert_eq!(ago(60 * DAY), "2 months ago");
        assert_eq!(ago(365 * DAY), "one year ago");
        assert_eq!(ago(3 * 365 * DAY), "3 years ago");
        assert_eq!(format_time(now + Duration::seconds(10), now), "about a second ago");
    }

    #[test]
    fn multi_line_rows_are_padded_with_tabs() {
        let mut out = Vec::new();
        write_row(&mut out, &["foo".to_string(), "foo\nbar".to_string()]).expect("write");
        assert_eq!(String::from_utf8(out).expect("utf8"), "foo\tfoo\n\tbar\n\t\n");
    }
}
