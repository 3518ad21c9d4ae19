//! Canonical byte codecs for blocks and ledger records.

pub mod account;
pub mod blockrecord;
pub mod currency;
pub mod digest;
pub mod encoding;
pub mod merkle;
pub mod payid;
pub mod transaction;

pub use account::{Account, Signature, PACKED_ACCOUNT_SIZE};
pub use blockrecord::{extract_header, foundation_txid, BlockHeader, HEADER_SIZE};
pub use currency::Currency;
pub use digest::{asset_id, asset_id_to_hex, digest, digest_from_hex, digest_to_hex, AssetId};
pub use encoding::{DecodeError, Decoder, Encoder};
pub use merkle::{full_merkle_tree, merkle_root};
pub use payid::{pay_id, pay_id_to_hex, PayId};
pub use transaction::{
    AssetData, BitmarkIssue, BitmarkShare, BitmarkTransferCountersigned,
    BitmarkTransferUnratified, BlockFoundation, BlockOwnerTransfer, OldBaseData, Payment,
    RecordError, ShareGrant, ShareSwap, TransactionRecord,
};
