//! Packed block header layout.

use updaterd_chain::Digest;

use crate::digest::digest;
use crate::encoding::{Decoder, Encoder};
use crate::transaction::RecordError;

/// Fixed little-endian layout: version, transaction count, block number,
/// previous digest, merkle root, timestamp, difficulty, nonce.
pub const HEADER_SIZE: usize = 100;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BlockHeader {
    pub version: u16,
    pub transaction_count: u16,
    pub number: u64,
    pub previous_block: Digest,
    pub merkle_root: Digest,
    /// Seconds since the Unix epoch as produced upstream.
    pub timestamp: u64,
    pub difficulty: u64,
    pub nonce: u64,
}

impl BlockHeader {
    pub fn pack(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        encoder.write_u16_le(self.version);
        encoder.write_u16_le(self.transaction_count);
        encoder.write_u64_le(self.number);
        encoder.write_digest(&self.previous_block);
        encoder.write_digest(&self.merkle_root);
        encoder.write_u64_le(self.timestamp);
        encoder.write_u64_le(self.difficulty);
        encoder.write_u64_le(self.nonce);
        encoder.into_inner()
    }

    pub fn unpack(bytes: &[u8]) -> Result<Self, RecordError> {
        let mut decoder = Decoder::new(bytes);
        let version = decoder.read_u16_le()?;
        let transaction_count = decoder.read_u16_le()?;
        let number = decoder.read_u64_le()?;
        let previous_block = decoder.read_digest()?;
        let merkle_root = decoder.read_digest()?;
        let timestamp = decoder.read_u64_le()?;
        let difficulty = decoder.read_u64_le()?;
        let nonce = decoder.read_u64_le()?;
        Ok(Self {
            version,
            transaction_count,
            number,
            previous_block,
            merkle_root,
            timestamp,
            difficulty,
            nonce,
        })
    }
}

/// Split a packed block into its header, the digest identifying the block,
/// and the transaction byte stream. The header must carry the expected
/// block number.
pub fn extract_header(
    packed: &[u8],
    expected_number: u64,
) -> Result<(BlockHeader, Digest, &[u8]), RecordError> {
    if packed.len() < HEADER_SIZE {
        return Err(RecordError::Decode(
            crate::encoding::DecodeError::UnexpectedEof,
        ));
    }
    let header_bytes = &packed[..HEADER_SIZE];
    let header = BlockHeader::unpack(header_bytes)?;
    if header.number != expected_number {
        return Err(RecordError::BlockNumberOutOfSequence {
            expected: expected_number,
            actual: header.number,
        });
    }
    Ok((header, digest(header_bytes), &packed[HEADER_SIZE..]))
}

/// Txid of the per-block foundation record, derived from the block itself
/// because the record it stands for has no canonical packed form of its
/// own in legacy blocks.
pub fn foundation_txid(header: &BlockHeader, block_digest: &Digest) -> Digest {
    let mut buffer = [0u8; 40];
    buffer[..8].copy_from_slice(&header.number.to_le_bytes());
    buffer[8..].copy_from_slice(block_digest);
    digest(&buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> BlockHeader {
        BlockHeader {
            version: 2,
            transaction_count: 3,
            number: 1234,
            previous_block: [0x11; 32],
            merkle_root: [0x22; 32],
            timestamp: 1_500_000_000,
            difficulty: 0x0000_ffff_0000_0001,
            nonce: 424_242,
        }
    }

    #[test]
    fn header_layout_is_byte_exact() {
        let header = sample_header();
        let packed = header.pack();
        assert_eq!(packed.len(), HEADER_SIZE);

        let mut expected = Vec::new();
        expected.extend_from_slice(&2u16.to_le_bytes());
        expected.extend_from_slice(&3u16.to_le_bytes());
        expected.extend_from_slice(&1234u64.to_le_bytes());
        expected.extend_from_slice(&[0x11; 32]);
        expected.extend_from_slice(&[0x22; 32]);
        expected.extend_from_slice(&1_500_000_000u64.to_le_bytes());
        expected.extend_from_slice(&0x0000_ffff_0000_0001u64.to_le_bytes());
        expected.extend_from_slice(&424_242u64.to_le_bytes());
        assert_eq!(packed, expected);

        assert_eq!(BlockHeader::unpack(&packed), Ok(header));
    }

    #[test]
    fn extract_splits_header_and_body() {
        let header = sample_header();
        let mut packed = header.pack();
        packed.extend_from_slice(b"transaction bytes");

        let (extracted, block_digest, body) =
            extract_header(&packed, 1234).expect("extract header");
        assert_eq!(extracted, header);
        assert_eq!(block_digest, digest(&packed[..HEADER_SIZE]));
        assert_eq!(body, b"transaction bytes");
    }

    #[test]
    fn extract_rejects_out_of_sequence_number() {
        let packed = sample_header().pack();
        assert_eq!(
            extract_header(&packed, 1235),
            Err(RecordError::BlockNumberOutOfSequence {
                expected: 1235,
                actual: 1234,
            })
        );
    }

    #[test]
    fn extract_rejects_short_input() {
        assert!(extract_header(&[0u8; HEADER_SIZE - 1], 0).is_err());
    }

    #[test]
    fn foundation_txid_is_deterministic() {
        let header = sample_header();
        let block_digest = digest(&header.pack());
        let a = foundation_txid(&header, &block_digest);
        let b = foundation_txid(&header, &block_digest);
        assert_eq!(a, b);

        let mut other = header.clone();
        other.number += 1;
        assert_ne!(a, foundation_txid(&other, &block_digest));
    }
}
