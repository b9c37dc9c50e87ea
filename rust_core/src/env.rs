//! Environment variable parsing shared by the config structs

use anyhow::{anyhow, Result};
use std::env;
use std::str::FromStr;

/// Parse environment variable as `T` with default fallback.
///
/// Unset falls back to `default`; set but malformed is an error.
pub fn parse_var<T: FromStr>(var_name: &str, default: T) -> Result<T> {
    match env::var(var_name) {
        Ok(val) => val.trim().parse().map_err(|_| {
            anyhow!(
                "{} must be a valid {} (got {:?})",
                var_name,
                std::any::type_name::<T>(),
                val
            )
        }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unset_uses_default() {
        let value: u64 = parse_var("TICKERFEED_TEST_UNSET_VAR", 42).unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn test_malformed_value_is_rejected() {
        env::set_var("TICKERFEED_TEST_BAD_U32", "five");
        let err = parse_var::<u32>("TICKERFEED_TEST_BAD_U32", 5).unwrap_err();
        assert!(err.to_string().contains("TICKERFEED_TEST_BAD_U32 must be a valid u32"));
        env::remove_var("TICKERFEED_TEST_BAD_U32");
    }

    #[test]
    fn test_value_is_trimmed() {
        env::set_var("TICKERFEED_TEST_PADDED_F64", " 0.25 ");
        assert_eq!(parse_var("TICKERFEED_TEST_PADDED_F64", 0.0).unwrap(), 0.25);
        env::remove_var("TICKERFEED_TEST_PADDED_F64");
    }
}
