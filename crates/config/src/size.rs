//! Byte size values
//!
//! Accepts plain integers (`32768`) or strings with an optional `k`/`m`/`g`
//! suffix (`"64k"`, `"1m"`), case-insensitive.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer};

/// A size in bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ByteSize(pub usize);

impl ByteSize {
    /// Size in bytes
    #[inline]
    pub const fn as_usize(self) -> usize {
        self.0
    }
}

impl FromStr for ByteSize {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("empty size".into());
        }

        let (digits, scale) = match s.as_bytes()[s.len() - 1].to_ascii_lowercase() {
            b'k' => (&s[..s.len() - 1], 1024usize),
            b'm' => (&s[..s.len() - 1], 1024 * 1024),
            b'g' => (&s[..s.len() - 1], 1024 * 1024 * 1024),
            _ => (s, 1),
        };

        let value: usize = digits
            .parse()
            .map_err(|_| format!("invalid size '{s}'"))?;

        value
            .checked_mul(scale)
            .map(ByteSize)
            .ok_or_else(|| format!("size '{s}' overflows"))
    }
}

impl fmt::Display for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<'de> Deserialize<'de> for ByteSize {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Int(u64),
            Str(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Int(n) => usize::try_from(n)
                .map(ByteSize)
                .map_err(serde::de::Error::custom),
            Raw::Str(s) => s.parse().map_err(serde::de::Error::custom),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_suffixes() {
        assert_eq!("4096".parse::<ByteSize>().unwrap(), ByteSize(4096));
        assert_eq!("64k".parse::<ByteSize>().unwrap(), ByteSize(64 * 1024));
        assert_eq!("1M".parse::<ByteSize>().unwrap(), ByteSize(1024 * 1024));
        assert_eq!(" 2g ".parse::<ByteSize>().unwrap(), ByteSize(2 * 1024 * 1024 * 1024));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("".parse::<ByteSize>().is_err());
        assert!("k".parse::<ByteSize>().is_err());
        assert!("12x".parse::<ByteSize>().is_err());
        assert!("-1k".parse::<ByteSize>().is_err());
    }

    #[test]
    fn test_deserialize_int_or_string() {
        #[derive(Deserialize)]
        struct Wrap {
            size: ByteSize,
        }

        let w: Wrap = toml::from_str("size = 65536").unwrap();
        assert_eq!(w.size, ByteSize(65536));

        let w: Wrap = toml::from_str("size = \"32k\"").unwrap();
        assert_eq!(w.size, ByteSize(32768));
    }
}
