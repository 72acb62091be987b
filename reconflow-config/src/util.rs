use std::str::FromStr;

use crate::loader::ConfigLoadError;

/// Treats unset and blank values alike.
pub(crate) fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

pub(crate) fn parse_var<T>(
    var: &'static str,
    raw: Option<&str>,
) -> Result<Option<T>, ConfigLoadError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let Some(raw) = raw else {
        return Ok(None);
    };
    raw.trim()
        .parse::<T>()
        .map(Some)
        .map_err(|err| ConfigLoadError::Env {
            var,
            message: format!("`{raw}`: {err}"),
        })
}
