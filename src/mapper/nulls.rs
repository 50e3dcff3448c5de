//! Zero-value to NULL helpers.
//!
//! Each helper returns `None` for the type's zero value, which binds as a
//! typed SQL NULL.

/// `None` for the empty string.
pub fn null_string(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// `None` for zero. Postgres has no unsigned integers, so the value is stored
/// as its two's-complement `i64`.
pub fn null_u64(value: u64) -> Option<i64> {
    if value == 0 { None } else { Some(value as i64) }
}

pub fn null_i64(value: i64) -> Option<i64> {
    if value == 0 { None } else { Some(value) }
}

/// `None` for `0.0` and `-0.0`.
pub fn null_f64(value: f64) -> Option<f64> {
    if value == 0.0 { None } else { Some(value) }
}
