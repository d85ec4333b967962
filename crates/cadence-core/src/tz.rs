//! IANA timezone lookup shared by config validation and schedule evaluation.

use chrono_tz::Tz;

use crate::error::{CadenceError, Result};

/// Resolve an IANA identifier such as `"Asia/Manila"` to a [`Tz`].
pub fn parse_timezone(name: &str) -> Result<Tz> {
    name.parse::<Tz>().map_err(|_| CadenceError::InvalidTimezone {
        name: name.to_string(),
    })
}

/// Resolve an optional zone, falling back to UTC when absent.
pub fn timezone_or_utc(name: Option<&str>) -> Result<Tz> {
    match name {
        Some(n) => parse_timezone(n),
        None => Ok(Tz::UTC),
    }
}
