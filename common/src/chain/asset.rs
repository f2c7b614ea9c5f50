use std::{fmt, str::FromStr};

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AssetError {
    #[error("invalid symbol code: {0}")]
    InvalidSymbolCode(String),
    #[error("invalid symbol: {0}")]
    InvalidSymbol(String),
    #[error("invalid asset quantity: {0}")]
    InvalidQuantity(String),
    #[error("amount overflow in quantity: {0}")]
    Overflow(String),
}

/// Uppercase token ticker, up to 7 characters of `[A-Z]`, packed one byte
/// per character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SymbolCode(u64);

impl SymbolCode {
    pub const fn from_raw(value: u64) -> Self {
        Self(value)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl FromStr for SymbolCode {
    type Err = AssetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = s.as_bytes();
        if bytes.is_empty() || bytes.len() > 7 {
            return Err(AssetError::InvalidSymbolCode(s.to_string()));
        }

        let mut value: u64 = 0;
        for (i, &c) in bytes.iter().enumerate() {
            if !c.is_ascii_uppercase() {
                return Err(AssetError::InvalidSymbolCode(s.to_string()));
            }
            value |= (c as u64) << (8 * i);
        }

        Ok(Self(value))
    }
}

impl fmt::Display for SymbolCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tmp = self.0;
        while tmp > 0 {
            f.write_str(
                std::str::from_utf8(&[(tmp & 0xff) as u8]).map_err(|_| fmt::Error)?,
            )?;
            tmp >>= 8;
        }
        Ok(())
    }
}

/// A token symbol: decimal precision plus ticker, packed into a u64 with the
/// precision in the low byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Symbol {
    pub precision: u8,
    pub code: SymbolCode,
}

impl Symbol {
    pub const fn from_raw(value: u64) -> Self {
        Self {
            precision: (value & 0xff) as u8,
            code: SymbolCode::from_raw(value >> 8),
        }
    }

    pub const fn as_u64(&self) -> u64 {
        (self.code.as_u64() << 8) | self.precision as u64
    }
}

// Symbols are written "4,WAX" in ABI payloads
impl FromStr for Symbol {
    type Err = AssetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (precision, code) = s
            .split_once(',')
            .ok_or_else(|| AssetError::InvalidSymbol(s.to_string()))?;
        let precision: u8 = precision
            .parse()
            .map_err(|_| AssetError::InvalidSymbol(s.to_string()))?;

        Ok(Self {
            precision,
            code: code.parse()?,
        })
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.precision, self.code)
    }
}

impl Serialize for Symbol {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Symbol {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Symbol::from_str(&s).map_err(de::Error::custom)
    }
}

/// A token quantity: signed amount scaled by the symbol precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Asset {
    pub amount: i64,
    pub symbol: Symbol,
}

impl FromStr for Asset {
    type Err = AssetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (quantity, code) = s
            .trim()
            .split_once(' ')
            .ok_or_else(|| AssetError::InvalidQuantity(s.to_string()))?;

        let (integral, fractional) = match quantity.split_once('.') {
            Some((i, f)) => (i, f),
            None => (quantity, ""),
        };

        let negative = integral.starts_with('-');
        let mut amount: i64 = integral
            .parse()
            .map_err(|_| AssetError::InvalidQuantity(s.to_string()))?;

        for c in fractional.chars() {
            let digit = c
                .to_digit(10)
                .ok_or_else(|| AssetError::InvalidQuantity(s.to_string()))?;
            amount = amount
                .checked_mul(10)
                .and_then(|a| {
                    if negative {
                        a.checked_sub(digit as i64)
                    } else {
                        a.checked_add(digit as i64)
                    }
                })
                .ok_or_else(|| AssetError::Overflow(s.to_string()))?;
        }

        Ok(Self {
            amount,
            symbol: Symbol {
                precision: fractional.len() as u8,
                code: code.parse()?,
            },
        })
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let precision = self.symbol.precision as u32;
        if precision == 0 {
            return write!(f, "{} {}", self.amount, self.symbol.code);
        }

        let scale = 10i64.pow(precision);
        let sign = if self.amount < 0 { "-" } else { "" };
        let abs = self.amount.unsigned_abs();
        let scale = scale as u64;
        write!(
            f,
            "{}{}.{:0width$} {}",
            sign,
            abs / scale,
            abs % scale,
            self.symbol.code,
            width = precision as usize
        )
    }
}

impl Serialize for Asset {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Asset {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Asset::from_str(&s).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_roundtrip() {
        let symbol = Symbol::from_str("4,WAX").unwrap();
        assert_eq!(symbol.precision, 4);
        assert_eq!(symbol.code.to_string(), "WAX");
        assert_eq!(Symbol::from_raw(symbol.as_u64()), symbol);
        assert_eq!(symbol.to_string(), "4,WAX");
    }

    #[test]
    fn test_asset_parse() {
        let asset = Asset::from_str("1.0000 WAX").unwrap();
        assert_eq!(asset.amount, 10000);
        assert_eq!(asset.symbol.precision, 4);
        assert_eq!(asset.to_string(), "1.0000 WAX");

        let asset = Asset::from_str("-0.5000 WAX").unwrap();
        assert_eq!(asset.amount, -5000);
        assert_eq!(asset.to_string(), "-0.5000 WAX");

        let asset = Asset::from_str("42 BOID").unwrap();
        assert_eq!(asset.amount, 42);
        assert_eq!(asset.symbol.precision, 0);
        assert_eq!(asset.to_string(), "42 BOID");
    }

    #[test]
    fn test_asset_invalid() {
        assert!(Asset::from_str("1.0000").is_err());
        assert!(Asset::from_str("abc WAX").is_err());
        assert!(Asset::from_str("1.0 wax").is_err());
    }
}
