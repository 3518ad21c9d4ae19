use sha3::{Digest as Sha3Digest, Sha3_256, Sha3_512};
use updaterd_chain::Digest;

/// 64-byte asset identifier (hash of the asset fingerprint).
pub type AssetId = [u8; 64];

pub fn digest(data: &[u8]) -> Digest {
    let output = Sha3_256::digest(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&output);
    out
}

pub fn asset_id(fingerprint: &str) -> AssetId {
    let output = Sha3_512::digest(fingerprint.as_bytes());
    let mut out = [0u8; 64];
    out.copy_from_slice(&output);
    out
}

pub fn digest_to_hex(digest: &Digest) -> String {
    hex::encode(digest)
}

pub fn asset_id_to_hex(id: &AssetId) -> String {
    hex::encode(id)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DigestError {
    InvalidLength,
    InvalidHex,
}

impl std::fmt::Display for DigestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DigestError::InvalidLength => write!(f, "digest text has wrong length"),
            DigestError::InvalidHex => write!(f, "digest text is not hex"),
        }
    }
}

impl std::error::Error for DigestError {}

pub fn digest_from_hex(text: &str) -> Result<Digest, DigestError> {
    let text = text.trim();
    if text.len() != 64 {
        return Err(DigestError::InvalidLength);
    }
    let bytes = hex::decode(text).map_err(|_| DigestError::InvalidHex)?;
    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_sha3_256() {
        // NIST SHA3-256 test vector for the empty message
        assert_eq!(
            digest_to_hex(&digest(b"")),
            "a7ffc6f8bf1ed76651c14756a061d662f580ff4de43b49fa82d80a4b80f8434a"
        );
    }

    #[test]
    fn hex_round_trip() {
        let d = digest(b"some block");
        let text = digest_to_hex(&d);
        assert_eq!(digest_from_hex(&text), Ok(d));
    }

    #[test]
    fn hex_rejects_bad_input() {
        assert_eq!(digest_from_hex("abcd"), Err(DigestError::InvalidLength));
        let bad = "zz".repeat(32);
        assert_eq!(digest_from_hex(&bad), Err(DigestError::InvalidHex));
    }

    #[test]
    fn asset_ids_are_64_bytes() {
        let id = asset_id("fingerprint");
        assert_eq!(asset_id_to_hex(&id).len(), 128);
        assert_ne!(asset_id("a"), asset_id("b"));
    }
}
