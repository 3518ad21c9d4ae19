//! Payment currencies and the per-record currency → address map.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Serialize, Serializer};

use crate::transaction::RecordError;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Currency {
    Nothing = 0,
    Bitcoin = 1,
    Litecoin = 2,
}

impl Currency {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Nothing => "",
            Self::Bitcoin => "BTC",
            Self::Litecoin => "LTC",
        }
    }

    pub fn from_u64(value: u64) -> Result<Self, RecordError> {
        match value {
            0 => Ok(Self::Nothing),
            1 => Ok(Self::Bitcoin),
            2 => Ok(Self::Litecoin),
            other => Err(RecordError::InvalidCurrency(other)),
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Currency {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Payment destinations keyed by currency; serializes to a JSON object
/// with the currency codes as keys.
pub type Map = BTreeMap<Currency, String>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn currency_codes() {
        assert_eq!(Currency::from_u64(1), Ok(Currency::Bitcoin));
        assert_eq!(Currency::from_u64(2), Ok(Currency::Litecoin));
        assert_eq!(Currency::from_u64(9), Err(RecordError::InvalidCurrency(9)));
    }

    #[test]
    fn map_serializes_by_code() {
        let mut map = Map::new();
        map.insert(Currency::Bitcoin, "1abc".to_string());
        map.insert(Currency::Litecoin, "ltc1".to_string());
        let json = serde_json::to_string(&map).expect("serialize map");
        assert_eq!(json, r#"{"BTC":"1abc","LTC":"ltc1"}"#);
    }
}
