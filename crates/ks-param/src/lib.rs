//! Dynamically typed parameter and metric values, plus the filters and sort keys built on them.

pub mod filter;
pub mod sort;
pub mod value;

pub use filter::{Filter, FilterError, Filters, Operator, ValueGetter};
pub use sort::Sorter;
pub use value::{truncate, Type, Value, ValueMap};
