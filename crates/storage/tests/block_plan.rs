use updaterd_records::currency::Map;
use updaterd_records::{
    digest, digest_to_hex, foundation_txid, merkle_root, pay_id, pay_id_to_hex, Account,
    AssetData, BitmarkIssue, BitmarkShare, BitmarkTransferUnratified, BlockFoundation,
    BlockHeader, Currency, OldBaseData, Signature, TransactionRecord,
};
use updaterd_storage::plan::{plan_block, plan_transactions, MAX_TIMESTAMP};
use updaterd_storage::{ProcedureCall, Status};

const TESTNET: bool = true;

fn account(seed: u8) -> Account {
    Account {
        test: TESTNET,
        key: [seed; 32],
    }
}

fn signature(seed: u8) -> Signature {
    Signature(vec![seed; 64])
}

fn old_base(seed: u8, currency: Currency, address: &str) -> TransactionRecord {
    TransactionRecord::OldBaseData(OldBaseData {
        currency,
        payment_address: address.to_string(),
        owner: account(seed),
        nonce: seed as u64,
        signature: signature(seed),
    })
}

fn asset(name: &str) -> TransactionRecord {
    TransactionRecord::AssetData(AssetData {
        name: name.to_string(),
        fingerprint: format!("01{name}"),
        metadata: "k\u{0000}v".to_string(),
        registrant: account(0x20),
        signature: signature(0x21),
    })
}

fn issue(seed: u8) -> TransactionRecord {
    TransactionRecord::BitmarkIssue(BitmarkIssue {
        asset_id: [seed; 64],
        owner: account(seed),
        nonce: 1,
        signature: signature(seed),
    })
}

fn transfer(seed: u8) -> TransactionRecord {
    TransactionRecord::BitmarkTransferUnratified(BitmarkTransferUnratified {
        link: [seed; 32],
        escrow: None,
        owner: account(seed),
        signature: signature(seed),
    })
}

/// Pack records into a block body and a consistent header.
fn build_block(number: u64, timestamp: u64, records: &[TransactionRecord]) -> (BlockHeader, [u8; 32], Vec<u8>) {
    let mut body = Vec::new();
    let mut txids = Vec::new();
    for record in records {
        let packed = record.pack();
        txids.push(digest(&packed));
        body.extend_from_slice(&packed);
    }
    let header = BlockHeader {
        version: 2,
        transaction_count: records.len() as u16,
        number,
        previous_block: [0xaa; 32],
        merkle_root: merkle_root(&txids).expect("at least one record"),
        timestamp,
        difficulty: 1,
        nonce: 9,
    };
    let block_digest = digest(&header.pack());
    (header, block_digest, body)
}

fn txid_of(record: &TransactionRecord) -> String {
    digest_to_hex(&digest(&record.pack()))
}

#[test]
fn block_plan_emits_calls_in_record_order() {
    let records = [asset("coffee"), issue(3), transfer(4)];
    let (header, block_digest, body) = build_block(7, 1_600_000_000, &records);

    let plan = plan_block(&header, &block_digest, &body, TESTNET).expect("plan");

    assert_eq!(plan.number, 7);
    assert_eq!(plan.created_on, 1_600_000_000);
    assert_eq!(plan.calls.len(), 5);

    match &plan.calls[0] {
        ProcedureCall::InsertBlock {
            number,
            hash,
            created_on,
        } => {
            assert_eq!(*number, 7);
            assert_eq!(*hash, digest_to_hex(&block_digest));
            assert_eq!(*created_on, 1_600_000_000);
        }
        other => panic!("expected insert_block, got {other:?}"),
    }

    match &plan.calls[1] {
        ProcedureCall::InsertAsset {
            metadata,
            status,
            number,
            offset,
            ..
        } => {
            assert_eq!(metadata, r#"{"k":"v"}"#);
            assert_eq!(*status, Status::Confirmed);
            assert_eq!(*number, 7);
            assert_eq!(*offset, 0);
        }
        other => panic!("expected insert_asset, got {other:?}"),
    }

    match &plan.calls[2] {
        ProcedureCall::InsertTransaction {
            txid,
            asset_id,
            previous_txid,
            pay_id,
            offset,
            ..
        } => {
            assert_eq!(*txid, txid_of(&records[1]));
            assert!(asset_id.is_some());
            assert!(previous_txid.is_none());
            assert_eq!(pay_id, "");
            assert_eq!(*offset, 1);
        }
        other => panic!("expected issue insert, got {other:?}"),
    }

    match &plan.calls[3] {
        ProcedureCall::InsertTransaction {
            txid,
            asset_id,
            previous_txid,
            offset,
            ..
        } => {
            assert_eq!(*txid, txid_of(&records[2]));
            assert!(asset_id.is_none());
            assert_eq!(*previous_txid, Some(digest_to_hex(&[4u8; 32])));
            assert_eq!(*offset, 2);
        }
        other => panic!("expected transfer insert, got {other:?}"),
    }

    assert_eq!(plan.calls[4], ProcedureCall::UpdateEditions { number: 7 });

    assert_eq!(plan.assets.len(), 1);
    assert_eq!(plan.issues, vec![txid_of(&records[1])]);
    assert_eq!(plan.transfers, vec![txid_of(&records[2])]);
}

#[test]
fn leading_old_base_records_collapse_into_a_foundation() {
    let records = [
        old_base(1, Currency::Bitcoin, "1first"),
        old_base(2, Currency::Litecoin, "ltc-second"),
        issue(3),
    ];
    let (header, block_digest, body) = build_block(2, 1_600_000_000, &records);

    let plan = plan_block(&header, &block_digest, &body, TESTNET).expect("plan");

    // insert_block, synthesized foundation, issue, update_editions
    assert_eq!(plan.calls.len(), 4);

    let expected_txid = digest_to_hex(&foundation_txid(&header, &block_digest));
    match &plan.calls[1] {
        ProcedureCall::InsertTransaction {
            txid,
            owner,
            payments,
            offset,
            ..
        } => {
            assert_eq!(*txid, expected_txid);
            // owner comes from the first record of the run
            assert_eq!(*owner, account(1).to_string());
            let payments = payments.as_deref().expect("foundation payments");
            assert!(payments.contains("1first"));
            assert!(payments.contains("ltc-second"));
            assert_eq!(*offset, 0);
        }
        other => panic!("expected foundation insert, got {other:?}"),
    }

    // the synthesized record is not announced as an issue
    assert_eq!(plan.issues, vec![txid_of(&records[2])]);
}

#[test]
fn old_base_run_ends_at_first_other_record() {
    let records = [
        old_base(1, Currency::Bitcoin, "1only"),
        issue(2),
        old_base(3, Currency::Litecoin, "ltc-late"),
    ];
    let (header, block_digest, body) = build_block(2, 1_600_000_000, &records);

    let plan = plan_block(&header, &block_digest, &body, TESTNET).expect("plan");

    let foundations: Vec<_> = plan
        .calls
        .iter()
        .filter_map(|call| match call {
            ProcedureCall::InsertTransaction {
                payments: Some(payments),
                ..
            } => Some(payments.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(foundations.len(), 1);
    assert!(foundations[0].contains("1only"));
    assert!(!foundations[0].contains("ltc-late"));
}

#[test]
fn explicit_foundation_uses_block_derived_txid() {
    let mut payments = Map::new();
    payments.insert(Currency::Bitcoin, "1fdn".to_string());
    let records = [
        TransactionRecord::BlockFoundation(BlockFoundation {
            version: 1,
            payments,
            owner: account(5),
            nonce: 5,
            signature: signature(5),
        }),
        issue(6),
    ];
    let (header, block_digest, body) = build_block(3, 1_600_000_000, &records);

    let plan = plan_block(&header, &block_digest, &body, TESTNET).expect("plan");
    let expected_txid = digest_to_hex(&foundation_txid(&header, &block_digest));

    match &plan.calls[1] {
        ProcedureCall::InsertTransaction { txid, offset, .. } => {
            assert_eq!(*txid, expected_txid);
            assert_eq!(*offset, 0);
        }
        other => panic!("expected foundation insert, got {other:?}"),
    }
    // an explicit foundation is announced
    assert_eq!(plan.issues[0], expected_txid);
}

#[test]
fn merkle_mismatch_is_rejected() {
    let records = [issue(1)];
    let (mut header, block_digest, body) = build_block(4, 1_600_000_000, &records);
    header.merkle_root = [0xff; 32];

    assert!(plan_block(&header, &block_digest, &body, TESTNET).is_err());
}

#[test]
fn genesis_records_stay_pending() {
    let records = [issue(1)];
    let (header, block_digest, body) = build_block(0, 1_600_000_000, &records);

    let plan = plan_block(&header, &block_digest, &body, TESTNET).expect("plan");
    match &plan.calls[1] {
        ProcedureCall::InsertTransaction { status, .. } => {
            assert_eq!(*status, Status::Pending);
        }
        other => panic!("expected issue insert, got {other:?}"),
    }
}

#[test]
fn oversized_timestamps_are_clamped() {
    let records = [issue(1)];
    let (header, block_digest, body) = build_block(5, MAX_TIMESTAMP + 12_345, &records);

    let plan = plan_block(&header, &block_digest, &body, TESTNET).expect("plan");
    assert_eq!(plan.created_on, MAX_TIMESTAMP);
}

#[test]
fn loose_transactions_plan() {
    let records = [
        asset("loose"),
        issue(2),
        transfer(3),
        TransactionRecord::BitmarkShare(BitmarkShare {
            link: [9; 32],
            quantity: 10,
            signature: signature(9),
        }),
        old_base(4, Currency::Bitcoin, "1skip"),
    ];
    let mut payload = Vec::new();
    for record in &records {
        payload.extend_from_slice(&record.pack());
    }

    let plan = plan_transactions(&payload, TESTNET).expect("plan");
    assert_eq!(plan.pay_id, pay_id_to_hex(&pay_id(&payload)));

    // old base data contributes nothing
    assert_eq!(plan.calls.len(), 4);

    // only issues and transfers become pending notifications
    assert_eq!(plan.pending, vec![txid_of(&records[1]), txid_of(&records[2])]);

    // loose issues carry no pay id, transfers and shares do
    match &plan.calls[1] {
        ProcedureCall::InsertTransaction { pay_id, .. } => assert_eq!(pay_id, ""),
        other => panic!("expected issue insert, got {other:?}"),
    }
    match &plan.calls[2] {
        ProcedureCall::InsertTransaction { pay_id, status, .. } => {
            assert_eq!(*pay_id, plan.pay_id);
            assert_eq!(*status, Status::Pending);
        }
        other => panic!("expected transfer insert, got {other:?}"),
    }
    match &plan.calls[3] {
        ProcedureCall::InsertShare { pay_id, .. } => assert_eq!(*pay_id, plan.pay_id),
        other => panic!("expected share insert, got {other:?}"),
    }
}

#[test]
fn malformed_stream_is_rejected() {
    assert!(plan_transactions(&[0xff, 0xff], TESTNET).is_err());
}
