use std::{fmt, str::FromStr};

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

// Base32 alphabet of on-chain account/action/table names
const NAME_CHARS: &[u8; 32] = b".12345abcdefghijklmnopqrstuvwxyz";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NameError {
    #[error("name is longer than 13 characters: {0}")]
    TooLong(String),
    #[error("invalid character '{1}' in name: {0}")]
    InvalidChar(String, char),
    #[error("13th character of '{0}' must be in [.1-5a-j]")]
    InvalidThirteenth(String),
}

/// A 64-bit packed on-chain name (account, action or table identifier).
///
/// Names are up to 12 characters of `[.1-5a-z]` plus an optional 13th
/// character restricted to `[.1-5a-j]`, packed 5 bits per character
/// (4 bits for the 13th).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Name(u64);

impl Name {
    pub const fn from_raw(value: u64) -> Self {
        Self(value)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    fn char_to_symbol(c: u8) -> Option<u64> {
        match c {
            b'a'..=b'z' => Some((c - b'a') as u64 + 6),
            b'1'..=b'5' => Some((c - b'1') as u64 + 1),
            b'.' => Some(0),
            _ => None,
        }
    }
}

impl FromStr for Name {
    type Err = NameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = s.as_bytes();
        if bytes.len() > 13 {
            return Err(NameError::TooLong(s.to_string()));
        }

        let mut value: u64 = 0;
        for (i, &c) in bytes.iter().enumerate() {
            let symbol = Name::char_to_symbol(c)
                .ok_or_else(|| NameError::InvalidChar(s.to_string(), c as char))?;
            if i < 12 {
                value |= (symbol & 0x1f) << (64 - 5 * (i + 1));
            } else {
                // 13th character only has 4 bits of room
                if symbol > 0x0f {
                    return Err(NameError::InvalidThirteenth(s.to_string()));
                }
                value |= symbol & 0x0f;
            }
        }

        Ok(Self(value))
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut chars = [b'.'; 13];
        let mut tmp = self.0;
        for i in 0..13 {
            let (mask, shift) = if i == 0 { (0x0f, 4) } else { (0x1f, 5) };
            chars[12 - i] = NAME_CHARS[(tmp & mask) as usize];
            tmp >>= shift;
        }

        let s = std::str::from_utf8(&chars).expect("name charset is ascii");
        f.write_str(s.trim_end_matches('.'))
    }
}

impl Serialize for Name {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Name {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Name::from_str(&s).map_err(de::Error::custom)
    }
}

impl From<Name> for String {
    fn from(name: Name) -> Self {
        name.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_roundtrip() {
        for s in [
            "eosio",
            "eosio.token",
            "atomicassets",
            "atomicmarket",
            "alice",
            "bob",
            "a",
            "",
            "1",
            "zzzzzzzzzzzz",
        ] {
            let name = Name::from_str(s).unwrap();
            assert_eq!(name.to_string(), s, "roundtrip of '{}'", s);
        }
    }

    #[test]
    fn test_known_values() {
        // Reference values from the chain's own packing
        assert_eq!(Name::from_str("eosio").unwrap().as_u64(), 6138663577826885632);
        assert_eq!(
            Name::from_str("eosio.token").unwrap().as_u64(),
            6138663591592764928
        );
        assert_eq!(Name::from_str("").unwrap().as_u64(), 0);
    }

    #[test]
    fn test_invalid_names() {
        assert!(Name::from_str("UPPER").is_err());
        assert!(Name::from_str("has-dash").is_err());
        assert!(Name::from_str("waytoolongname").is_err());
        assert!(Name::from_str("aaaaaaaaaaaaz").is_err());
    }

    #[test]
    fn test_thirteenth_char() {
        let name = Name::from_str("aaaaaaaaaaaaj").unwrap();
        assert_eq!(name.to_string(), "aaaaaaaaaaaaj");
    }
}
