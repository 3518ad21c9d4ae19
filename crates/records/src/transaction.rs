//! The tagged transaction-record sum type and its canonical byte codecs.
//!
//! Every record packs to `tag ‖ fields`; the SHA3-256 of that canonical
//! form is the record's txid and the merkle leaf.

use std::fmt;

use updaterd_chain::Digest;

use crate::account::{Account, Signature};
use crate::currency::{self, Currency};
use crate::digest::AssetId;
use crate::encoding::{DecodeError, Decoder, Encoder};

pub const OLD_BASE_DATA_TAG: u64 = 1;
pub const ASSET_DATA_TAG: u64 = 2;
pub const BITMARK_ISSUE_TAG: u64 = 3;
pub const BITMARK_TRANSFER_UNRATIFIED_TAG: u64 = 4;
pub const BITMARK_TRANSFER_COUNTERSIGNED_TAG: u64 = 5;
pub const BLOCK_FOUNDATION_TAG: u64 = 6;
pub const BLOCK_OWNER_TRANSFER_TAG: u64 = 7;
pub const BITMARK_SHARE_TAG: u64 = 8;
pub const SHARE_GRANT_TAG: u64 = 9;
pub const SHARE_SWAP_TAG: u64 = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    Decode(DecodeError),
    UnsupportedTag(u64),
    WrongChain,
    InvalidCurrency(u64),
    InvalidKeyType(u8),
    InvalidKeyLength(usize),
    InvalidDigestLength(usize),
    BlockNumberOutOfSequence { expected: u64, actual: u64 },
}

impl From<DecodeError> for RecordError {
    fn from(error: DecodeError) -> Self {
        RecordError::Decode(error)
    }
}

impl fmt::Display for RecordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordError::Decode(error) => write!(f, "{error}"),
            RecordError::UnsupportedTag(tag) => write!(f, "unsupported record tag: {tag}"),
            RecordError::WrongChain => write!(f, "key network does not match chain"),
            RecordError::InvalidCurrency(value) => write!(f, "invalid currency: {value}"),
            RecordError::InvalidKeyType(flags) => write!(f, "invalid key type: {flags:#04x}"),
            RecordError::InvalidKeyLength(len) => write!(f, "invalid key length: {len}"),
            RecordError::InvalidDigestLength(len) => write!(f, "invalid digest length: {len}"),
            RecordError::BlockNumberOutOfSequence { expected, actual } => write!(
                f,
                "block number out of sequence: expected: {expected}  actual: {actual}"
            ),
        }
    }
}

impl std::error::Error for RecordError {}

/// Optional escrow payment attached to a transfer.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Payment {
    pub currency: Currency,
    pub address: String,
    pub amount: u64,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OldBaseData {
    pub currency: Currency,
    pub payment_address: String,
    pub owner: Account,
    pub nonce: u64,
    pub signature: Signature,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AssetData {
    pub name: String,
    pub fingerprint: String,
    /// NUL-separated alternating key/value pairs.
    pub metadata: String,
    pub registrant: Account,
    pub signature: Signature,
}

impl AssetData {
    pub fn asset_id(&self) -> AssetId {
        crate::digest::asset_id(&self.fingerprint)
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BitmarkIssue {
    pub asset_id: AssetId,
    pub owner: Account,
    pub nonce: u64,
    pub signature: Signature,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BitmarkTransferUnratified {
    pub link: Digest,
    pub escrow: Option<Payment>,
    pub owner: Account,
    pub signature: Signature,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BitmarkTransferCountersigned {
    pub link: Digest,
    pub escrow: Option<Payment>,
    pub owner: Account,
    pub signature: Signature,
    pub countersignature: Signature,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BlockFoundation {
    pub version: u64,
    pub payments: currency::Map,
    pub owner: Account,
    pub nonce: u64,
    pub signature: Signature,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BlockOwnerTransfer {
    pub link: Digest,
    pub version: u64,
    pub payments: currency::Map,
    pub owner: Account,
    pub signature: Signature,
    pub countersignature: Signature,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BitmarkShare {
    pub link: Digest,
    pub quantity: u64,
    pub signature: Signature,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ShareGrant {
    pub share_id: Digest,
    pub quantity: u64,
    pub owner: Account,
    pub recipient: Account,
    pub before_block: u64,
    pub signature: Signature,
    pub countersignature: Signature,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ShareSwap {
    pub share_id_one: Digest,
    pub quantity_one: u64,
    pub owner_one: Account,
    pub share_id_two: Digest,
    pub quantity_two: u64,
    pub owner_two: Account,
    pub before_block: u64,
    pub signature: Signature,
    pub countersignature: Signature,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TransactionRecord {
    OldBaseData(OldBaseData),
    AssetData(AssetData),
    BitmarkIssue(BitmarkIssue),
    BitmarkTransferUnratified(BitmarkTransferUnratified),
    BitmarkTransferCountersigned(BitmarkTransferCountersigned),
    BlockFoundation(BlockFoundation),
    BlockOwnerTransfer(BlockOwnerTransfer),
    BitmarkShare(BitmarkShare),
    ShareGrant(ShareGrant),
    ShareSwap(ShareSwap),
}

impl TransactionRecord {
    pub fn tag(&self) -> u64 {
        match self {
            Self::OldBaseData(_) => OLD_BASE_DATA_TAG,
            Self::AssetData(_) => ASSET_DATA_TAG,
            Self::BitmarkIssue(_) => BITMARK_ISSUE_TAG,
            Self::BitmarkTransferUnratified(_) => BITMARK_TRANSFER_UNRATIFIED_TAG,
            Self::BitmarkTransferCountersigned(_) => BITMARK_TRANSFER_COUNTERSIGNED_TAG,
            Self::BlockFoundation(_) => BLOCK_FOUNDATION_TAG,
            Self::BlockOwnerTransfer(_) => BLOCK_OWNER_TRANSFER_TAG,
            Self::BitmarkShare(_) => BITMARK_SHARE_TAG,
            Self::ShareGrant(_) => SHARE_GRANT_TAG,
            Self::ShareSwap(_) => SHARE_SWAP_TAG,
        }
    }

    /// Canonical packed form, tag included.
    pub fn pack(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        encoder.write_uvarint(self.tag());
        match self {
            Self::OldBaseData(base) => {
                encoder.write_uvarint(base.currency as u64);
                encoder.write_var_str(&base.payment_address);
                encoder.write_var_bytes(&base.owner.to_bytes());
                encoder.write_uvarint(base.nonce);
                encoder.write_var_bytes(base.signature.as_bytes());
            }
            Self::AssetData(asset) => {
                encoder.write_var_str(&asset.name);
                encoder.write_var_str(&asset.fingerprint);
                encoder.write_var_str(&asset.metadata);
                encoder.write_var_bytes(&asset.registrant.to_bytes());
                encoder.write_var_bytes(asset.signature.as_bytes());
            }
            Self::BitmarkIssue(issue) => {
                encoder.write_var_bytes(&issue.asset_id);
                encoder.write_var_bytes(&issue.owner.to_bytes());
                encoder.write_uvarint(issue.nonce);
                encoder.write_var_bytes(issue.signature.as_bytes());
            }
            Self::BitmarkTransferUnratified(transfer) => {
                encoder.write_var_bytes(&transfer.link);
                write_escrow(&mut encoder, &transfer.escrow);
                encoder.write_var_bytes(&transfer.owner.to_bytes());
                encoder.write_var_bytes(transfer.signature.as_bytes());
            }
            Self::BitmarkTransferCountersigned(transfer) => {
                encoder.write_var_bytes(&transfer.link);
                write_escrow(&mut encoder, &transfer.escrow);
                encoder.write_var_bytes(&transfer.owner.to_bytes());
                encoder.write_var_bytes(transfer.signature.as_bytes());
                encoder.write_var_bytes(transfer.countersignature.as_bytes());
            }
            Self::BlockFoundation(foundation) => {
                encoder.write_uvarint(foundation.version);
                write_currency_map(&mut encoder, &foundation.payments);
                encoder.write_var_bytes(&foundation.owner.to_bytes());
                encoder.write_uvarint(foundation.nonce);
                encoder.write_var_bytes(foundation.signature.as_bytes());
            }
            Self::BlockOwnerTransfer(transfer) => {
                encoder.write_var_bytes(&transfer.link);
                encoder.write_uvarint(transfer.version);
                write_currency_map(&mut encoder, &transfer.payments);
                encoder.write_var_bytes(&transfer.owner.to_bytes());
                encoder.write_var_bytes(transfer.signature.as_bytes());
                encoder.write_var_bytes(transfer.countersignature.as_bytes());
            }
            Self::BitmarkShare(share) => {
                encoder.write_var_bytes(&share.link);
                encoder.write_uvarint(share.quantity);
                encoder.write_var_bytes(share.signature.as_bytes());
            }
            Self::ShareGrant(grant) => {
                encoder.write_var_bytes(&grant.share_id);
                encoder.write_uvarint(grant.quantity);
                encoder.write_var_bytes(&grant.owner.to_bytes());
                encoder.write_var_bytes(&grant.recipient.to_bytes());
                encoder.write_uvarint(grant.before_block);
                encoder.write_var_bytes(grant.signature.as_bytes());
                encoder.write_var_bytes(grant.countersignature.as_bytes());
            }
            Self::ShareSwap(swap) => {
                encoder.write_var_bytes(&swap.share_id_one);
                encoder.write_uvarint(swap.quantity_one);
                encoder.write_var_bytes(&swap.owner_one.to_bytes());
                encoder.write_var_bytes(&swap.share_id_two);
                encoder.write_uvarint(swap.quantity_two);
                encoder.write_var_bytes(&swap.owner_two.to_bytes());
                encoder.write_uvarint(swap.before_block);
                encoder.write_var_bytes(swap.signature.as_bytes());
                encoder.write_var_bytes(swap.countersignature.as_bytes());
            }
        }
        encoder.into_inner()
    }

    /// Decode the first record from `data`, returning it together with the
    /// number of bytes consumed; the remainder belongs to the next record.
    pub fn unpack(data: &[u8], testnet: bool) -> Result<(Self, usize), RecordError> {
        let mut decoder = Decoder::new(data);
        let tag = decoder.read_uvarint()?;
        let record = match tag {
            OLD_BASE_DATA_TAG => {
                let currency = Currency::from_u64(decoder.read_uvarint()?)?;
                let payment_address = decoder.read_var_str()?;
                let owner = read_account(&mut decoder, testnet)?;
                let nonce = decoder.read_uvarint()?;
                let signature = read_signature(&mut decoder)?;
                Self::OldBaseData(OldBaseData {
                    currency,
                    payment_address,
                    owner,
                    nonce,
                    signature,
                })
            }
            ASSET_DATA_TAG => {
                let name = decoder.read_var_str()?;
                let fingerprint = decoder.read_var_str()?;
                let metadata = decoder.read_var_str()?;
                let registrant = read_account(&mut decoder, testnet)?;
                let signature = read_signature(&mut decoder)?;
                Self::AssetData(AssetData {
                    name,
                    fingerprint,
                    metadata,
                    registrant,
                    signature,
                })
            }
            BITMARK_ISSUE_TAG => {
                let asset_id = read_asset_id(&mut decoder)?;
                let owner = read_account(&mut decoder, testnet)?;
                let nonce = decoder.read_uvarint()?;
                let signature = read_signature(&mut decoder)?;
                Self::BitmarkIssue(BitmarkIssue {
                    asset_id,
                    owner,
                    nonce,
                    signature,
                })
            }
            BITMARK_TRANSFER_UNRATIFIED_TAG => {
                let link = read_link(&mut decoder)?;
                let escrow = read_escrow(&mut decoder)?;
                let owner = read_account(&mut decoder, testnet)?;
                let signature = read_signature(&mut decoder)?;
                Self::BitmarkTransferUnratified(BitmarkTransferUnratified {
                    link,
                    escrow,
                    owner,
                    signature,
                })
            }
            BITMARK_TRANSFER_COUNTERSIGNED_TAG => {
                let link = read_link(&mut decoder)?;
                let escrow = read_escrow(&mut decoder)?;
                let owner = read_account(&mut decoder, testnet)?;
                let signature = read_signature(&mut decoder)?;
                let countersignature = read_signature(&mut decoder)?;
                Self::BitmarkTransferCountersigned(BitmarkTransferCountersigned {
                    link,
                    escrow,
                    owner,
                    signature,
                    countersignature,
                })
            }
            BLOCK_FOUNDATION_TAG => {
                let version = decoder.read_uvarint()?;
                let payments = read_currency_map(&mut decoder)?;
                let owner = read_account(&mut decoder, testnet)?;
                let nonce = decoder.read_uvarint()?;
                let signature = read_signature(&mut decoder)?;
                Self::BlockFoundation(BlockFoundation {
                    version,
                    payments,
                    owner,
                    nonce,
                    signature,
                })
            }
            BLOCK_OWNER_TRANSFER_TAG => {
                let link = read_link(&mut decoder)?;
                let version = decoder.read_uvarint()?;
                let payments = read_currency_map(&mut decoder)?;
                let owner = read_account(&mut decoder, testnet)?;
                let signature = read_signature(&mut decoder)?;
                let countersignature = read_signature(&mut decoder)?;
                Self::BlockOwnerTransfer(BlockOwnerTransfer {
                    link,
                    version,
                    payments,
                    owner,
                    signature,
                    countersignature,
                })
            }
            BITMARK_SHARE_TAG => {
                let link = read_link(&mut decoder)?;
                let quantity = decoder.read_uvarint()?;
                let signature = read_signature(&mut decoder)?;
                Self::BitmarkShare(BitmarkShare {
                    link,
                    quantity,
                    signature,
                })
            }
            SHARE_GRANT_TAG => {
                let share_id = read_link(&mut decoder)?;
                let quantity = decoder.read_uvarint()?;
                let owner = read_account(&mut decoder, testnet)?;
                let recipient = read_account(&mut decoder, testnet)?;
                let before_block = decoder.read_uvarint()?;
                let signature = read_signature(&mut decoder)?;
                let countersignature = read_signature(&mut decoder)?;
                Self::ShareGrant(ShareGrant {
                    share_id,
                    quantity,
                    owner,
                    recipient,
                    before_block,
                    signature,
                    countersignature,
                })
            }
            SHARE_SWAP_TAG => {
                let share_id_one = read_link(&mut decoder)?;
                let quantity_one = decoder.read_uvarint()?;
                let owner_one = read_account(&mut decoder, testnet)?;
                let share_id_two = read_link(&mut decoder)?;
                let quantity_two = decoder.read_uvarint()?;
                let owner_two = read_account(&mut decoder, testnet)?;
                let before_block = decoder.read_uvarint()?;
                let signature = read_signature(&mut decoder)?;
                let countersignature = read_signature(&mut decoder)?;
                Self::ShareSwap(ShareSwap {
                    share_id_one,
                    quantity_one,
                    owner_one,
                    share_id_two,
                    quantity_two,
                    owner_two,
                    before_block,
                    signature,
                    countersignature,
                })
            }
            other => return Err(RecordError::UnsupportedTag(other)),
        };
        Ok((record, decoder.position()))
    }
}

fn write_escrow(encoder: &mut Encoder, escrow: &Option<Payment>) {
    match escrow {
        None => encoder.write_u8(0),
        Some(payment) => {
            encoder.write_u8(1);
            encoder.write_uvarint(payment.currency as u64);
            encoder.write_var_str(&payment.address);
            encoder.write_uvarint(payment.amount);
        }
    }
}

fn read_escrow(decoder: &mut Decoder<'_>) -> Result<Option<Payment>, RecordError> {
    match decoder.read_u8()? {
        0 => Ok(None),
        1 => {
            let currency = Currency::from_u64(decoder.read_uvarint()?)?;
            let address = decoder.read_var_str()?;
            let amount = decoder.read_uvarint()?;
            Ok(Some(Payment {
                currency,
                address,
                amount,
            }))
        }
        _ => Err(RecordError::Decode(DecodeError::InvalidData(
            "invalid escrow marker",
        ))),
    }
}

fn write_currency_map(encoder: &mut Encoder, payments: &currency::Map) {
    encoder.write_uvarint(payments.len() as u64);
    for (currency, address) in payments {
        encoder.write_uvarint(*currency as u64);
        encoder.write_var_str(address);
    }
}

fn read_currency_map(decoder: &mut Decoder<'_>) -> Result<currency::Map, RecordError> {
    let count = decoder.read_uvarint()?;
    let mut payments = currency::Map::new();
    for _ in 0..count {
        let currency = Currency::from_u64(decoder.read_uvarint()?)?;
        let address = decoder.read_var_str()?;
        payments.insert(currency, address);
    }
    Ok(payments)
}

fn read_account(decoder: &mut Decoder<'_>, testnet: bool) -> Result<Account, RecordError> {
    let bytes = decoder.read_var_bytes()?;
    Account::from_bytes(&bytes, testnet)
}

fn read_signature(decoder: &mut Decoder<'_>) -> Result<Signature, RecordError> {
    Ok(Signature(decoder.read_var_bytes()?))
}

fn read_link(decoder: &mut Decoder<'_>) -> Result<Digest, RecordError> {
    let bytes = decoder.read_var_bytes()?;
    if bytes.len() != 32 {
        return Err(RecordError::InvalidDigestLength(bytes.len()));
    }
    Ok(bytes.try_into().expect("length checked"))
}

fn read_asset_id(decoder: &mut Decoder<'_>) -> Result<AssetId, RecordError> {
    let bytes = decoder.read_var_bytes()?;
    if bytes.len() != 64 {
        return Err(RecordError::InvalidDigestLength(bytes.len()));
    }
    Ok(bytes.try_into().expect("length checked"))
}
