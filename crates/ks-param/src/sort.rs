use crate::filter::ValueGetter;
use crate::value::Value;
use std::cmp::Ordering;

/// Orders rows by one named value. A trailing `-desc` or `-asc` picks the direction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sorter {
    pub key: String,
    pub descending: bool,
}

impl Sorter {
    pub fn new(sort: &str) -> Sorter {
        if let Some(key) = sort.strip_suffix("-desc") {
            Sorter {
                key: key.to_string(),
                descending: true,
            }
        } else {
            Sorter {
                key: sort.strip_suffix("-asc").unwrap_or(sort).to_string(),
                descending: false,
            }
        }
    }

    /// Values that cannot be ordered against each other compare equal, so a stable sort keeps
    /// their existing order.
    pub fn compare(&self, x: &dyn ValueGetter, y: &dyn ValueGetter) -> Ordering {
        let x = x.get_value(&self.key).unwrap_or(Value::None);
        let y = y.get_value(&self.key).unwrap_or(Value::None);
        let ord = if x.less_than(&y) {
            Ordering::Less
        } else if y.less_than(&x) {
            Ordering::Greater
        } else {
            Ordering::Equal
        };
        if self.descending {
            ord.reverse()
        } else {
            ord
        }
    }

    /// Stable insertion sort by [`Sorter::compare`]. Unlike `slice::sort_by` it tolerates
    /// mixed value types, where the comparison is not a total order.
    pub fn sort<T: ValueGetter>(&self, items: &mut [T]) {
        for i in 1..items.len() {
            let mut j = i;
            while j > 0 && self.compare(&items[j], &items[j - 1]) == Ordering::Less {
                items.swap(j, j - 1);
                j -= 1;
            }
        }
    }
}
