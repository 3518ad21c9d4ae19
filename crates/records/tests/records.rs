use updaterd_records::{
    digest, Account, AssetData, BitmarkIssue, BitmarkShare, BitmarkTransferCountersigned,
    BitmarkTransferUnratified, BlockFoundation, BlockOwnerTransfer, Currency, OldBaseData,
    Payment, RecordError, ShareGrant, ShareSwap, Signature, TransactionRecord,
};

fn account(seed: u8, test: bool) -> Account {
    Account {
        test,
        key: [seed; 32],
    }
}

fn signature(seed: u8) -> Signature {
    Signature(vec![seed; 64])
}

fn round_trip(record: TransactionRecord, testnet: bool) {
    let packed = record.pack();
    let (unpacked, consumed) = TransactionRecord::unpack(&packed, testnet).expect("unpack");
    assert_eq!(consumed, packed.len());
    assert_eq!(unpacked, record);
}

#[test]
fn old_base_data_round_trip() {
    round_trip(
        TransactionRecord::OldBaseData(OldBaseData {
            currency: Currency::Bitcoin,
            payment_address: "1BitcoinEaterAddressDontSendf59kuE".to_string(),
            owner: account(1, true),
            nonce: 0x1234,
            signature: signature(9),
        }),
        true,
    );
}

#[test]
fn asset_data_round_trip() {
    round_trip(
        TransactionRecord::AssetData(AssetData {
            name: "Item's Name".to_string(),
            fingerprint: "0123456789abcdef".to_string(),
            metadata: "description\u{0000}Just the description".to_string(),
            registrant: account(2, false),
            signature: signature(3),
        }),
        false,
    );
}

#[test]
fn issue_round_trip() {
    round_trip(
        TransactionRecord::BitmarkIssue(BitmarkIssue {
            asset_id: [0xab; 64],
            owner: account(4, true),
            nonce: 99,
            signature: signature(5),
        }),
        true,
    );
}

#[test]
fn transfer_round_trips() {
    round_trip(
        TransactionRecord::BitmarkTransferUnratified(BitmarkTransferUnratified {
            link: [0x31; 32],
            escrow: None,
            owner: account(6, true),
            signature: signature(7),
        }),
        true,
    );
    round_trip(
        TransactionRecord::BitmarkTransferUnratified(BitmarkTransferUnratified {
            link: [0x32; 32],
            escrow: Some(Payment {
                currency: Currency::Litecoin,
                address: "mvchalice".to_string(),
                amount: 250_000,
            }),
            owner: account(6, true),
            signature: signature(7),
        }),
        true,
    );
    round_trip(
        TransactionRecord::BitmarkTransferCountersigned(BitmarkTransferCountersigned {
            link: [0x33; 32],
            escrow: None,
            owner: account(8, false),
            signature: signature(9),
            countersignature: signature(10),
        }),
        false,
    );
}

#[test]
fn foundation_round_trip() {
    let mut payments = updaterd_records::currency::Map::new();
    payments.insert(Currency::Bitcoin, "1abc".to_string());
    payments.insert(Currency::Litecoin, "ltc1xyz".to_string());
    round_trip(
        TransactionRecord::BlockFoundation(BlockFoundation {
            version: 1,
            payments,
            owner: account(11, true),
            nonce: 0x10_0001,
            signature: signature(12),
        }),
        true,
    );
}

#[test]
fn block_owner_transfer_round_trip() {
    let mut payments = updaterd_records::currency::Map::new();
    payments.insert(Currency::Bitcoin, "1owner".to_string());
    round_trip(
        TransactionRecord::BlockOwnerTransfer(BlockOwnerTransfer {
            link: [0x44; 32],
            version: 1,
            payments,
            owner: account(13, true),
            signature: signature(14),
            countersignature: signature(15),
        }),
        true,
    );
}

#[test]
fn share_records_round_trip() {
    round_trip(
        TransactionRecord::BitmarkShare(BitmarkShare {
            link: [0x55; 32],
            quantity: 1_000_000,
            signature: signature(16),
        }),
        true,
    );
    round_trip(
        TransactionRecord::ShareGrant(ShareGrant {
            share_id: [0x66; 32],
            quantity: 50,
            owner: account(17, true),
            recipient: account(18, true),
            before_block: 20_000,
            signature: signature(19),
            countersignature: signature(20),
        }),
        true,
    );
    round_trip(
        TransactionRecord::ShareSwap(ShareSwap {
            share_id_one: [0x77; 32],
            quantity_one: 1,
            owner_one: account(21, true),
            share_id_two: [0x78; 32],
            quantity_two: 2,
            owner_two: account(22, true),
            before_block: 30_000,
            signature: signature(23),
            countersignature: signature(24),
        }),
        true,
    );
}

#[test]
fn unsupported_tag_is_rejected() {
    assert_eq!(
        TransactionRecord::unpack(&[0x2a], true),
        Err(RecordError::UnsupportedTag(42))
    );
}

#[test]
fn chain_mismatch_is_rejected() {
    let record = TransactionRecord::BitmarkIssue(BitmarkIssue {
        asset_id: [1; 64],
        owner: account(1, false),
        nonce: 0,
        signature: signature(2),
    });
    let packed = record.pack();
    assert_eq!(
        TransactionRecord::unpack(&packed, true),
        Err(RecordError::WrongChain)
    );
}

#[test]
fn consecutive_records_unpack_in_sequence() {
    let first = TransactionRecord::AssetData(AssetData {
        name: "first".to_string(),
        fingerprint: "01".to_string(),
        metadata: String::new(),
        registrant: account(1, true),
        signature: signature(2),
    });
    let second = TransactionRecord::BitmarkIssue(BitmarkIssue {
        asset_id: [9; 64],
        owner: account(3, true),
        nonce: 7,
        signature: signature(4),
    });

    let mut stream = first.pack();
    let first_len = stream.len();
    stream.extend_from_slice(&second.pack());

    let (got_first, n) = TransactionRecord::unpack(&stream, true).expect("first record");
    assert_eq!(got_first, first);
    assert_eq!(n, first_len);

    let (got_second, n) = TransactionRecord::unpack(&stream[first_len..], true).expect("second");
    assert_eq!(got_second, second);
    assert_eq!(first_len + n, stream.len());
}

#[test]
fn txid_is_digest_of_canonical_bytes() {
    let record = TransactionRecord::BitmarkShare(BitmarkShare {
        link: [0x12; 32],
        quantity: 5,
        signature: signature(6),
    });
    let packed = record.pack();
    let (unpacked, n) = TransactionRecord::unpack(&packed, true).expect("unpack");
    assert_eq!(digest(&packed[..n]), digest(&unpacked.pack()));
}
