//! Packed owner keys and signatures.

use std::fmt;

use crate::transaction::RecordError;

/// Packed form: one flag byte then the 32 key bytes.
pub const PACKED_ACCOUNT_SIZE: usize = 33;

const KEY_TYPE_MASK: u8 = 0x0f;
const KEY_TYPE_ED25519: u8 = 0x01;
const TEST_NETWORK_BIT: u8 = 0x80;

/// An owner or registrant public key.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Account {
    pub test: bool,
    pub key: [u8; 32],
}

impl Account {
    pub fn to_bytes(&self) -> [u8; PACKED_ACCOUNT_SIZE] {
        let mut out = [0u8; PACKED_ACCOUNT_SIZE];
        out[0] = KEY_TYPE_ED25519 | if self.test { TEST_NETWORK_BIT } else { 0 };
        out[1..].copy_from_slice(&self.key);
        out
    }

    /// The test bit in the flag byte must match the local chain.
    pub fn from_bytes(bytes: &[u8], testnet: bool) -> Result<Self, RecordError> {
        if bytes.len() != PACKED_ACCOUNT_SIZE {
            return Err(RecordError::InvalidKeyLength(bytes.len()));
        }
        let flags = bytes[0];
        if flags & KEY_TYPE_MASK != KEY_TYPE_ED25519 {
            return Err(RecordError::InvalidKeyType(flags));
        }
        let test = flags & TEST_NETWORK_BIT != 0;
        if test != testnet {
            return Err(RecordError::WrongChain);
        }
        let mut key = [0u8; 32];
        key.copy_from_slice(&bytes[1..]);
        Ok(Self { test, key })
    }
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.to_bytes()))
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Signature(pub Vec<u8>);

impl Signature {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(&self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_round_trip() {
        let account = Account {
            test: true,
            key: [0x42; 32],
        };
        let packed = account.to_bytes();
        assert_eq!(packed[0], 0x81);
        assert_eq!(Account::from_bytes(&packed, true), Ok(account));
    }

    #[test]
    fn account_chain_mismatch() {
        let account = Account {
            test: false,
            key: [7; 32],
        };
        assert_eq!(
            Account::from_bytes(&account.to_bytes(), true),
            Err(RecordError::WrongChain)
        );
    }

    #[test]
    fn account_bad_key_type() {
        let mut packed = [0u8; PACKED_ACCOUNT_SIZE];
        packed[0] = 0x03;
        assert_eq!(
            Account::from_bytes(&packed, false),
            Err(RecordError::InvalidKeyType(0x03))
        );
    }

    #[test]
    fn signature_hex() {
        let signature = Signature(vec![0xde, 0xad]);
        assert_eq!(signature.to_string(), "dead");
    }
}
