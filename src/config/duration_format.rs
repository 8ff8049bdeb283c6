//! Duration parsing for token validity windows.
//!
//! Supports two formats:
//! - `humantime`: `30m`, `1h 30m`, `2d`
//! - ISO 8601: `PT30M`, `PT1H30M`, `P2D`
//!
//! Used for the `X-Proxy-Token-Exp` response header and for the optional
//! `token_ttl` field of a service descriptor in the registry seed file.

use serde::{Deserialize, Deserializer};
use std::time::Duration;

/// Parse a duration string.
///
/// Tries humantime first, then ISO 8601.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    // Try humantime first (30m, 1h 30m, etc.)
    if let Ok(d) = humantime::parse_duration(s) {
        return Ok(d);
    }

    // Fall back to ISO 8601 (PT30M, PT1H30M, etc.)
    if let Ok(d) = iso8601_duration::Duration::parse(s) {
        if let Some(std_duration) = d.to_std() {
            return Ok(std_duration);
        }
    }

    Err(format!(
        "invalid duration '{}': expected humantime (30m) or ISO 8601 (PT30M)",
        s
    ))
}

/// Deserialize an optional duration from a string.
pub fn deserialize_option<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    let opt: Option<String> = Option::deserialize(deserializer)?;
    match opt {
        Some(s) => parse_duration(&s)
            .map(Some)
            .map_err(serde::de::Error::custom),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_humantime_seconds() {
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("60s").unwrap(), Duration::from_secs(60));
    }

    #[test]
    fn test_parse_humantime_minutes() {
        assert_eq!(parse_duration("30m").unwrap(), Duration::from_secs(1800));
    }

    #[test]
    fn test_parse_humantime_compound() {
        assert_eq!(parse_duration("1h 30m").unwrap(), Duration::from_secs(5400));
    }

    #[test]
    fn test_parse_iso8601() {
        assert_eq!(parse_duration("PT30M").unwrap(), Duration::from_secs(1800));
        assert_eq!(
            parse_duration("PT1H30M").unwrap(),
            Duration::from_secs(5400)
        );
    }

    #[test]
    fn test_parse_invalid() {
        assert!(parse_duration("invalid").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn test_deserialize_option_some() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct TestStruct {
            #[serde(default, deserialize_with = "deserialize_option")]
            ttl: Option<Duration>,
        }

        let yaml = "ttl: 5m\n";
        let parsed: TestStruct = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(parsed.ttl, Some(Duration::from_secs(300)));
    }

    #[test]
    fn test_deserialize_option_none() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct TestStruct {
            #[serde(default, deserialize_with = "deserialize_option")]
            ttl: Option<Duration>,
        }

        let yaml = "{}\n";
        let parsed: TestStruct = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(parsed.ttl, None);
    }
}
