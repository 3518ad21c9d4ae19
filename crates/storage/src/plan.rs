//! Pure decomposition of packed payloads into ordered stored-procedure
//! calls. Nothing here touches the database; execution happens in one SQL
//! transaction once a plan exists.

use std::collections::BTreeMap;

use serde_json::json;
use updaterd_chain::Digest;
use updaterd_log::{log_critical, log_warn};
use updaterd_records::currency;
use updaterd_records::{
    digest, digest_to_hex, foundation_txid, merkle_root, pay_id, pay_id_to_hex, BlockFoundation,
    BlockHeader, TransactionRecord,
};

use crate::{StoreError, LOG_TARGET};

/// Blocks deleted below the local tip when a live block fails the
/// previous-digest check; deeper forks are the connector's problem.
pub const BLOCK_REVERT_LIMIT: u64 = 5;

/// Largest timestamp the TIMESTAMPTZ columns can take.
pub const MAX_TIMESTAMP: u64 = 9_224_318_015_999;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Status {
    Pending,
    Verified,
    Confirmed,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Verified => "verified",
            Self::Confirmed => "confirmed",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One stored-procedure invocation with its full parameter set, in the
/// order the parameters are bound.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProcedureCall {
    InsertBlock {
        number: u64,
        hash: String,
        created_on: u64,
    },
    InsertAsset {
        id: String,
        name: String,
        fingerprint: String,
        metadata: String,
        registrant: String,
        signature: String,
        status: Status,
        number: u64,
        offset: u64,
    },
    InsertTransaction {
        txid: String,
        owner: String,
        signature: String,
        countersignature: String,
        asset_id: Option<String>,
        previous_txid: Option<String>,
        status: Status,
        payments: Option<String>,
        pay_id: String,
        number: u64,
        offset: u64,
    },
    InsertShare {
        txid: String,
        quantity: u64,
        signature: String,
        previous_txid: String,
        pay_id: String,
        status: Status,
        number: u64,
        offset: u64,
    },
    InsertGrant {
        txid: String,
        share_id: String,
        quantity: u64,
        owner: String,
        recipient: String,
        signature: String,
        countersignature: String,
        pay_id: String,
        shares: String,
        status: Status,
        number: u64,
        offset: u64,
    },
    InsertSwap {
        txid: String,
        share_id_one: String,
        quantity_one: u64,
        owner_one: String,
        share_id_two: String,
        quantity_two: u64,
        owner_two: String,
        signature: String,
        countersignature: String,
        pay_id: String,
        shares: String,
        status: Status,
        number: u64,
        offset: u64,
    },
    UpdateEditions {
        number: u64,
    },
}

/// Everything needed to commit one block and announce it afterwards.
#[derive(Clone, Debug)]
pub struct BlockPlan {
    pub number: u64,
    /// Clamped seconds since the epoch, as written to `insert_block`.
    pub created_on: u64,
    pub calls: Vec<ProcedureCall>,
    pub assets: Vec<String>,
    pub issues: Vec<String>,
    pub transfers: Vec<String>,
}

pub fn plan_block(
    header: &BlockHeader,
    block_digest: &Digest,
    body: &[u8],
    testnet: bool,
) -> Result<BlockPlan, StoreError> {
    let count = header.transaction_count as usize;
    let mut records = Vec::with_capacity(count);
    let mut txids = Vec::with_capacity(count);

    let mut data = body;
    for _ in 0..count {
        let (record, used) = TransactionRecord::unpack(data, testnet)?;
        txids.push(digest(&data[..used]));
        records.push(record);
        data = &data[used..];
    }

    if merkle_root(&txids) != Some(header.merkle_root) {
        return Err(StoreError::MerkleRootMismatch);
    }

    let number = header.number;
    let created_on = if header.timestamp > MAX_TIMESTAMP {
        log_warn!(
            LOG_TARGET,
            "block: {}  timestamp: {} clamped to: {}",
            number,
            header.timestamp,
            MAX_TIMESTAMP
        );
        MAX_TIMESTAMP
    } else {
        header.timestamp
    };

    let status = if number == 0 {
        Status::Pending
    } else {
        Status::Confirmed
    };

    let mut calls = Vec::with_capacity(records.len() + 2);
    let mut assets = Vec::new();
    let mut issues = Vec::new();
    let mut transfers = Vec::new();

    calls.push(ProcedureCall::InsertBlock {
        number,
        hash: digest_to_hex(block_digest),
        created_on,
    });

    let foundation_id = digest_to_hex(&foundation_txid(header, block_digest));

    // legacy blocks open with a run of OldBaseData records standing in for
    // the foundation; collapse the run into one synthesized record
    if let Some(foundation) = synthesize_foundation(&records) {
        calls.push(foundation_call(&foundation_id, &foundation, status, number));
    }

    for (index, record) in records.iter().enumerate() {
        let offset = index as u64;
        let txid = digest_to_hex(&txids[index]);
        match record {
            TransactionRecord::OldBaseData(_) => {
                // consumed by the synthesized foundation
            }

            TransactionRecord::AssetData(asset) => {
                let id = updaterd_records::asset_id_to_hex(&asset.asset_id());
                calls.push(ProcedureCall::InsertAsset {
                    id: id.clone(),
                    name: asset.name.clone(),
                    fingerprint: asset.fingerprint.clone(),
                    metadata: metadata_json(&asset.metadata),
                    registrant: asset.registrant.to_string(),
                    signature: asset.signature.to_string(),
                    status,
                    number,
                    offset,
                });
                assets.push(id);
            }

            TransactionRecord::BitmarkIssue(issue) => {
                calls.push(ProcedureCall::InsertTransaction {
                    txid: txid.clone(),
                    owner: issue.owner.to_string(),
                    signature: issue.signature.to_string(),
                    countersignature: String::new(),
                    asset_id: Some(updaterd_records::asset_id_to_hex(&issue.asset_id)),
                    previous_txid: None,
                    status,
                    payments: None,
                    pay_id: String::new(),
                    number,
                    offset,
                });
                issues.push(txid);
            }

            TransactionRecord::BitmarkTransferUnratified(transfer) => {
                calls.push(transfer_call(
                    &txid,
                    &transfer.owner.to_string(),
                    &transfer.signature.to_string(),
                    "",
                    &transfer.link,
                    None,
                    status,
                    "",
                    number,
                    offset,
                ));
                transfers.push(txid);
            }

            TransactionRecord::BitmarkTransferCountersigned(transfer) => {
                calls.push(transfer_call(
                    &txid,
                    &transfer.owner.to_string(),
                    &transfer.signature.to_string(),
                    &transfer.countersignature.to_string(),
                    &transfer.link,
                    None,
                    status,
                    "",
                    number,
                    offset,
                ));
                transfers.push(txid);
            }

            TransactionRecord::BlockOwnerTransfer(transfer) => {
                calls.push(transfer_call(
                    &txid,
                    &transfer.owner.to_string(),
                    &transfer.signature.to_string(),
                    &transfer.countersignature.to_string(),
                    &transfer.link,
                    Some(&transfer.payments),
                    status,
                    "",
                    number,
                    offset,
                ));
                transfers.push(txid);
            }

            TransactionRecord::BitmarkShare(share) => {
                calls.push(ProcedureCall::InsertShare {
                    txid,
                    quantity: share.quantity,
                    signature: share.signature.to_string(),
                    previous_txid: digest_to_hex(&share.link),
                    pay_id: String::new(),
                    status,
                    number,
                    offset,
                });
            }

            TransactionRecord::ShareGrant(grant) => {
                calls.push(grant_call(&txid, grant, status, "", number, offset));
            }

            TransactionRecord::ShareSwap(swap) => {
                calls.push(swap_call(&txid, swap, status, "", number, offset));
            }

            TransactionRecord::BlockFoundation(foundation) => {
                calls.push(foundation_call(&foundation_id, foundation, status, number));
                issues.push(foundation_id.clone());
            }
        }
    }

    calls.push(ProcedureCall::UpdateEditions { number });

    Ok(BlockPlan {
        number,
        created_on,
        calls,
        assets,
        issues,
        transfers,
    })
}

/// Loose broadcast decomposition: the calls plus the txids to announce as
/// pending once committed.
#[derive(Clone, Debug)]
pub struct TransactionsPlan {
    pub pay_id: String,
    pub calls: Vec<ProcedureCall>,
    pub pending: Vec<String>,
}

pub fn plan_transactions(packed: &[u8], testnet: bool) -> Result<TransactionsPlan, StoreError> {
    let pay_id = pay_id_to_hex(&pay_id(packed));
    let status = Status::Pending;
    let number = 0u64;
    let offset = 0u64;

    let mut calls = Vec::new();
    let mut pending = Vec::new();

    let mut data = packed;
    while !data.is_empty() {
        let (record, used) = TransactionRecord::unpack(data, testnet)?;
        let txid = digest_to_hex(&digest(&data[..used]));
        match &record {
            TransactionRecord::OldBaseData(_) | TransactionRecord::BlockFoundation(_) => {}

            TransactionRecord::AssetData(asset) => {
                calls.push(ProcedureCall::InsertAsset {
                    id: updaterd_records::asset_id_to_hex(&asset.asset_id()),
                    name: asset.name.clone(),
                    fingerprint: asset.fingerprint.clone(),
                    metadata: metadata_json(&asset.metadata),
                    registrant: asset.registrant.to_string(),
                    signature: asset.signature.to_string(),
                    status,
                    number,
                    offset,
                });
            }

            TransactionRecord::BitmarkIssue(issue) => {
                calls.push(ProcedureCall::InsertTransaction {
                    txid: txid.clone(),
                    owner: issue.owner.to_string(),
                    signature: issue.signature.to_string(),
                    countersignature: String::new(),
                    asset_id: Some(updaterd_records::asset_id_to_hex(&issue.asset_id)),
                    previous_txid: None,
                    status,
                    payments: None,
                    pay_id: String::new(),
                    number,
                    offset,
                });
                pending.push(txid);
            }

            TransactionRecord::BitmarkTransferUnratified(transfer) => {
                calls.push(transfer_call(
                    &txid,
                    &transfer.owner.to_string(),
                    &transfer.signature.to_string(),
                    "",
                    &transfer.link,
                    None,
                    status,
                    &pay_id,
                    number,
                    offset,
                ));
                pending.push(txid);
            }

            TransactionRecord::BitmarkTransferCountersigned(transfer) => {
                calls.push(transfer_call(
                    &txid,
                    &transfer.owner.to_string(),
                    &transfer.signature.to_string(),
                    &transfer.countersignature.to_string(),
                    &transfer.link,
                    None,
                    status,
                    &pay_id,
                    number,
                    offset,
                ));
                pending.push(txid);
            }

            TransactionRecord::BlockOwnerTransfer(transfer) => {
                calls.push(transfer_call(
                    &txid,
                    &transfer.owner.to_string(),
                    &transfer.signature.to_string(),
                    &transfer.countersignature.to_string(),
                    &transfer.link,
                    Some(&transfer.payments),
                    status,
                    &pay_id,
                    number,
                    offset,
                ));
                pending.push(txid);
            }

            TransactionRecord::BitmarkShare(share) => {
                calls.push(ProcedureCall::InsertShare {
                    txid,
                    quantity: share.quantity,
                    signature: share.signature.to_string(),
                    previous_txid: digest_to_hex(&share.link),
                    pay_id: pay_id.clone(),
                    status,
                    number,
                    offset,
                });
            }

            TransactionRecord::ShareGrant(grant) => {
                calls.push(grant_call(&txid, grant, status, &pay_id, number, offset));
            }

            TransactionRecord::ShareSwap(swap) => {
                calls.push(swap_call(&txid, swap, status, &pay_id, number, offset));
            }
        }
        data = &data[used..];
    }

    Ok(TransactionsPlan {
        pay_id,
        calls,
        pending,
    })
}

fn synthesize_foundation(records: &[TransactionRecord]) -> Option<BlockFoundation> {
    let mut foundation: Option<BlockFoundation> = None;
    for record in records {
        match record {
            TransactionRecord::OldBaseData(base) => {
                let entry = foundation.get_or_insert_with(|| BlockFoundation {
                    version: 0,
                    payments: currency::Map::new(),
                    owner: base.owner,
                    nonce: base.nonce,
                    signature: base.signature.clone(),
                });
                entry
                    .payments
                    .insert(base.currency, base.payment_address.clone());
            }
            _ => break,
        }
    }
    foundation
}

fn foundation_call(
    txid: &str,
    foundation: &BlockFoundation,
    status: Status,
    number: u64,
) -> ProcedureCall {
    ProcedureCall::InsertTransaction {
        txid: txid.to_string(),
        owner: foundation.owner.to_string(),
        signature: foundation.signature.to_string(),
        countersignature: String::new(),
        asset_id: None,
        previous_txid: None,
        status,
        payments: Some(payments_json(&foundation.payments)),
        pay_id: String::new(),
        number,
        offset: 0,
    }
}

#[allow(clippy::too_many_arguments)]
fn transfer_call(
    txid: &str,
    owner: &str,
    signature: &str,
    countersignature: &str,
    link: &Digest,
    payments: Option<&currency::Map>,
    status: Status,
    pay_id: &str,
    number: u64,
    offset: u64,
) -> ProcedureCall {
    let payments = payments.map(|map| {
        let text = payments_json(map);
        if text == "null" || text == "{}" {
            log_critical!(LOG_TARGET, "currencies has unexpected value: {:?}", text);
            panic!("currencies has unexpected value: {text:?}");
        }
        text
    });
    ProcedureCall::InsertTransaction {
        txid: txid.to_string(),
        owner: owner.to_string(),
        signature: signature.to_string(),
        countersignature: countersignature.to_string(),
        asset_id: None,
        previous_txid: Some(digest_to_hex(link)),
        status,
        payments,
        pay_id: pay_id.to_string(),
        number,
        offset,
    }
}

fn grant_call(
    txid: &str,
    grant: &updaterd_records::ShareGrant,
    status: Status,
    pay_id: &str,
    number: u64,
    offset: u64,
) -> ProcedureCall {
    let share_id = digest_to_hex(&grant.share_id);
    let shares = json!({
        "share_id": share_id,
        "from": grant.owner.to_string(),
        "to": grant.recipient.to_string(),
        "quantity": grant.quantity,
    })
    .to_string();
    ProcedureCall::InsertGrant {
        txid: txid.to_string(),
        share_id,
        quantity: grant.quantity,
        owner: grant.owner.to_string(),
        recipient: grant.recipient.to_string(),
        signature: grant.signature.to_string(),
        countersignature: grant.countersignature.to_string(),
        pay_id: pay_id.to_string(),
        shares,
        status,
        number,
        offset,
    }
}

fn swap_call(
    txid: &str,
    swap: &updaterd_records::ShareSwap,
    status: Status,
    pay_id: &str,
    number: u64,
    offset: u64,
) -> ProcedureCall {
    let share_id_one = digest_to_hex(&swap.share_id_one);
    let share_id_two = digest_to_hex(&swap.share_id_two);
    let shares = json!({
        "share_id_one": share_id_one,
        "quantity_one": swap.quantity_one,
        "owner_one": swap.owner_one.to_string(),
        "share_id_two": share_id_two,
        "quantity_two": swap.quantity_two,
        "owner_two": swap.owner_two.to_string(),
    })
    .to_string();
    ProcedureCall::InsertSwap {
        txid: txid.to_string(),
        share_id_one,
        quantity_one: swap.quantity_one,
        owner_one: swap.owner_one.to_string(),
        share_id_two,
        quantity_two: swap.quantity_two,
        owner_two: swap.owner_two.to_string(),
        signature: swap.signature.to_string(),
        countersignature: swap.countersignature.to_string(),
        pay_id: pay_id.to_string(),
        shares,
        status,
        number,
        offset,
    }
}

/// NUL-separated alternating keys and values become a JSON object; an odd
/// trailing key is dropped.
fn metadata_json(metadata: &str) -> String {
    let mut map = BTreeMap::new();
    if !metadata.is_empty() {
        let mut parts: Vec<&str> = metadata.split('\u{0000}').collect();
        if parts.len() % 2 == 1 {
            parts.pop();
        }
        for chunk in parts.chunks_exact(2) {
            map.insert(chunk[0], chunk[1]);
        }
    }
    serde_json::to_string(&map).unwrap_or_else(|_| "{}".to_string())
}

fn payments_json(payments: &currency::Map) -> String {
    serde_json::to_string(payments).unwrap_or_else(|_| "{}".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_strings() {
        assert_eq!(Status::Pending.as_str(), "pending");
        assert_eq!(Status::Verified.as_str(), "verified");
        assert_eq!(Status::Confirmed.as_str(), "confirmed");
    }

    #[test]
    fn metadata_splits_pairs() {
        assert_eq!(
            metadata_json("description\u{0000}A thing\u{0000}source\u{0000}somewhere"),
            r#"{"description":"A thing","source":"somewhere"}"#
        );
    }

    #[test]
    fn metadata_drops_odd_trailing_key() {
        assert_eq!(metadata_json("only-a-key"), "{}");
        assert_eq!(
            metadata_json("k\u{0000}v\u{0000}dangling"),
            r#"{"k":"v"}"#
        );
    }

    #[test]
    fn metadata_empty() {
        assert_eq!(metadata_json(""), "{}");
    }
}
