use serde::{Deserialize, Deserializer};

/// Reads `null` as the type's default. Records written by older clients use `null` for
/// empty strings, maps and lists.
pub(crate) fn null_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
