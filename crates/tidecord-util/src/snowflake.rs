use std::fmt;
use std::str::FromStr;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Platform epoch: 2015-01-01T00:00:00Z
const PLATFORM_EPOCH: u64 = 1_420_070_400_000;

/// A platform-issued Snowflake ID.
/// Format: 42 bits timestamp | 5 bits worker | 5 bits process | 12 bits increment
///
/// The gateway sends ids as JSON strings; numbers are accepted too.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Snowflake(pub u64);

impl Snowflake {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub const fn get(self) -> u64 {
        self.0
    }

    /// Extract the Unix timestamp (ms) from a snowflake.
    pub fn timestamp_millis(self) -> u64 {
        (self.0 >> 22) + PLATFORM_EPOCH
    }
}

impl fmt::Display for Snowflake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Snowflake {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid snowflake: {0:?}")]
pub struct ParseSnowflakeError(String);

impl FromStr for Snowflake {
    type Err = ParseSnowflakeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u64>()
            .map(Self)
            .map_err(|_| ParseSnowflakeError(s.to_string()))
    }
}

impl Serialize for Snowflake {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

struct SnowflakeVisitor;

impl Visitor<'_> for SnowflakeVisitor {
    type Value = Snowflake;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a snowflake as a string or integer")
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Snowflake, E> {
        Ok(Snowflake(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Snowflake, E> {
        u64::try_from(v)
            .map(Snowflake)
            .map_err(|_| E::custom("negative snowflake"))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Snowflake, E> {
        v.parse().map_err(E::custom)
    }
}

impl<'de> Deserialize<'de> for Snowflake {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(SnowflakeVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_strings_and_numbers() {
        let from_str: Snowflake = serde_json::from_str("\"175928847299117063\"").unwrap();
        let from_num: Snowflake = serde_json::from_str("175928847299117063").unwrap();
        assert_eq!(from_str, from_num);
        assert_eq!(
            serde_json::to_string(&from_str).unwrap(),
            "\"175928847299117063\""
        );
    }

    #[test]
    fn extracts_timestamp() {
        // 2016-04-30T11:18:25.796Z
        assert_eq!(Snowflake(175928847299117063).timestamp_millis(), 1_462_015_105_796);
    }

    #[test]
    fn rejects_garbage() {
        assert!("abc".parse::<Snowflake>().is_err());
        assert!(serde_json::from_str::<Snowflake>("-1").is_err());
    }
}
