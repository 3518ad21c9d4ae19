//! Execution of planned procedure calls against PostgreSQL.

use std::sync::MutexGuard;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use postgres::error::SqlState;
use updaterd_chain::{Digest, GENESIS_BLOCK_NUMBER};
use updaterd_log::{log_critical, log_debug, log_error};
use updaterd_records::{digest_from_hex, extract_header};

use crate::plan::{plan_block, plan_transactions, ProcedureCall, BLOCK_REVERT_LIMIT};
use crate::{Store, StoreError, LOG_TARGET};

const NOTIFY_BLOCK_SQL: &str = "SELECT notify_new_block($1);";
const NOTIFY_ASSETS_SQL: &str = "SELECT notify_new_assets($1);";
const NOTIFY_ISSUES_SQL: &str = "SELECT notify_new_issues($1);";
const NOTIFY_TRANSFERS_SQL: &str = "SELECT notify_new_transfers($1);";
const NOTIFY_PENDING_TX_SQL: &str = "SELECT notify_pending_transaction($1);";

// insert_block(number INT8, hash TEXT, created_on TIMESTAMPTZ)
const INSERT_BLOCK_SQL: &str = "SELECT blockchain.insert_block($1, $2, $3);";

// insert_asset(id, name, fingerprint, metadata, registrant, signature,
//              status, block_number, block_offset)
const INSERT_ASSET_SQL: &str =
    "SELECT blockchain.insert_asset($1, $2, $3, $4::jsonb, $5, $6, $7::blockchain.status_type, $8, $9);";

// insert_transaction(txid, owner, signature, countersignature, asset_id,
//                    previous_txid, status, payments, pay_id,
//                    block_number, block_offset)
const INSERT_TRANSACTION_SQL: &str =
    "SELECT blockchain.insert_transaction($1, $2, $3, $4, $5, $6, $7::blockchain.status_type, $8::jsonb, $9, $10, $11);";

// insert_share_transaction(txid, quantity, signature, previous_txid,
//                          pay_id, status, block_number, block_offset)
const INSERT_SHARE_SQL: &str =
    "SELECT blockchain.insert_share_transaction($1, $2, $3, $4, $5, $6::blockchain.status_type, $7, $8);";

// insert_grant_transaction(txid, share_id, quantity, owner, recipient,
//                          signature, countersignature, pay_id, shares,
//                          status, block_number, block_offset)
const INSERT_GRANT_SQL: &str =
    "SELECT blockchain.insert_grant_transaction($1, $2, $3, $4, $5, $6, $7, $8, $9::jsonb, $10::blockchain.status_type, $11, $12);";

// insert_swap_transaction(txid, share_one, quantity_one, owner_one,
//                         share_two, quantity_two, owner_two, signature,
//                         countersignature, pay_id, shares, status,
//                         block_number, block_offset)
const INSERT_SWAP_SQL: &str =
    "SELECT blockchain.insert_swap_transaction($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11::jsonb, $12::blockchain.status_type, $13, $14);";

const UPDATE_EDITIONS_SQL: &str = "SELECT blockchain.update_editions($1);";
const GET_BLOCK_HEIGHT_SQL: &str = "SELECT blockchain.get_block_height();";
const GET_BLOCK_DIGEST_SQL: &str = "SELECT blockchain.get_block_digest($1);";
const DELETE_DOWN_TO_BLOCK_SQL: &str = "SELECT blockchain.delete_down_to_block($1);";
const DELETE_EXPIRED_RECORDS_SQL: &str = "SELECT blockchain.expire_records();";

/// Blocks older than this are stored silently, without notifications.
const NOTIFY_WINDOW_SECONDS: i64 = 72 * 60 * 60;

const NOTIFY_ISSUE_BATCH: usize = 20;

impl Store {
    fn client(&self) -> MutexGuard<'_, postgres::Client> {
        match self.client.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Decompose a packed block and commit it atomically.
    ///
    /// A previous-digest mismatch reverts the last `BLOCK_REVERT_LIMIT`
    /// blocks and reports the mismatch so the caller can resynchronise.
    pub fn store_block(&self, packed: &[u8]) -> Result<(), StoreError> {
        let height = match self.block_height() {
            Ok(height) => height,
            Err(error) => {
                log_critical!(LOG_TARGET, "get_block_height failed: error: {error}");
                panic!("get_block_height failed: error: {error}");
            }
        };

        let (header, block_digest, body) = extract_header(packed, height + 1)?;

        let previous = self.digest_for_block(header.number - 1)?;
        if previous != header.previous_block {
            log_debug!(
                LOG_TARGET,
                "previous block digests differ: local: {}  remote: {}",
                updaterd_records::digest_to_hex(&previous),
                updaterd_records::digest_to_hex(&header.previous_block)
            );
            if let Err(error) =
                self.delete_down_to_block(height.saturating_sub(BLOCK_REVERT_LIMIT))
            {
                log_critical!(LOG_TARGET, "fail to revert block: error: {error}");
            }
            return Err(StoreError::PreviousBlockDigestMismatch);
        }

        let plan = plan_block(&header, &block_digest, body, self.chain.is_testing())?;

        {
            let mut client = self.client();
            let mut db = client.transaction()?;
            for call in &plan.calls {
                execute_call(&mut db, call)?;
            }
            db.commit()?;
        }
        log_debug!(LOG_TARGET, "stored block: {}", plan.number);

        // old blocks arrive in bulk during catch-up; announcing them all
        // would only flood the listeners
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64;
        if now - (plan.created_on as i64) < NOTIFY_WINDOW_SECONDS {
            if !plan.assets.is_empty() {
                self.notify(NOTIFY_ASSETS_SQL, &plan.assets.join(","));
            }
            for batch in plan.issues.chunks(NOTIFY_ISSUE_BATCH) {
                self.notify(NOTIFY_ISSUES_SQL, &batch.join(","));
            }
            if !plan.transfers.is_empty() {
                self.notify(NOTIFY_TRANSFERS_SQL, &plan.transfers.join(","));
            }
            self.notify(NOTIFY_BLOCK_SQL, &plan.number.to_string());
        }

        Ok(())
    }

    /// Store a loose-transaction broadcast as pending records.
    pub fn store_transactions(&self, packed: &[u8]) -> Result<(), StoreError> {
        let plan = plan_transactions(packed, self.chain.is_testing())?;

        {
            let mut client = self.client();
            let mut db = client.transaction()?;
            for call in &plan.calls {
                execute_call(&mut db, call)?;
            }
            db.commit()?;
        }

        for txid in &plan.pending {
            self.notify(NOTIFY_PENDING_TX_SQL, txid);
        }

        Ok(())
    }

    /// Local tip; never below the genesis block number.
    pub fn block_height(&self) -> Result<u64, StoreError> {
        let row = self.client().query_one(GET_BLOCK_HEIGHT_SQL, &[])?;
        let number: i64 = row.get(0);
        let number = if number < 0 { 0 } else { number as u64 };
        if number <= GENESIS_BLOCK_NUMBER {
            return Ok(GENESIS_BLOCK_NUMBER);
        }
        Ok(number)
    }

    pub fn digest_for_block(&self, number: u64) -> Result<Digest, StoreError> {
        if number <= GENESIS_BLOCK_NUMBER {
            return Ok(self.chain.genesis_digest());
        }
        let row = self
            .client()
            .query_opt(GET_BLOCK_DIGEST_SQL, &[&(number as i64)])?;
        let text: Option<String> = match row {
            Some(row) => row.get(0),
            None => None,
        };
        match text {
            Some(text) => Ok(digest_from_hex(&text)?),
            None => Err(StoreError::BlockNotFound),
        }
    }

    /// Delete all blocks from `number` upward; atomicity is the stored
    /// procedure's responsibility.
    pub fn delete_down_to_block(&self, number: u64) -> Result<(), StoreError> {
        self.client()
            .execute(DELETE_DOWN_TO_BLOCK_SQL, &[&(number as i64)])?;
        Ok(())
    }

    pub fn delete_expired_records(&self) -> Result<(), StoreError> {
        self.client().execute(DELETE_EXPIRED_RECORDS_SQL, &[])?;
        Ok(())
    }

    // best effort: a failed notification never invalidates a committed block
    fn notify(&self, statement: &str, argument: &str) {
        if let Err(error) = self.client().execute(statement, &[&argument]) {
            log_error!(
                LOG_TARGET,
                "notify: {statement:?}  argument: {argument:?}  error: {error}"
            );
        } else {
            log_debug!(LOG_TARGET, "notify: {statement:?}  argument: {argument:?}");
        }
    }
}

fn execute_call(
    db: &mut postgres::Transaction<'_>,
    call: &ProcedureCall,
) -> Result<(), StoreError> {
    match call {
        ProcedureCall::InsertBlock {
            number,
            hash,
            created_on,
        } => {
            let created_on = UNIX_EPOCH + Duration::from_secs(*created_on);
            db.execute(INSERT_BLOCK_SQL, &[&(*number as i64), hash, &created_on])
                .map_err(|error| {
                    log_error!(
                        LOG_TARGET,
                        "insert_block: number: {number}, hash: {hash:?}  error: {error}"
                    );
                    error
                })?;
        }

        ProcedureCall::InsertAsset {
            id,
            name,
            fingerprint,
            metadata,
            registrant,
            signature,
            status,
            number,
            offset,
        } => {
            db.execute(
                INSERT_ASSET_SQL,
                &[
                    id,
                    name,
                    fingerprint,
                    metadata,
                    registrant,
                    signature,
                    &status.as_str(),
                    &(*number as i64),
                    &(*offset as i64),
                ],
            )
            .map_err(|error| {
                log_error!(
                    LOG_TARGET,
                    "insert_asset: id: {id:?}, name: {name:?}, block: {number}  error: {error}"
                );
                error
            })?;
        }

        ProcedureCall::InsertTransaction {
            txid,
            owner,
            signature,
            countersignature,
            asset_id,
            previous_txid,
            status,
            payments,
            pay_id,
            number,
            offset,
        } => {
            let result = db.execute(
                INSERT_TRANSACTION_SQL,
                &[
                    txid,
                    owner,
                    signature,
                    countersignature,
                    asset_id,
                    previous_txid,
                    &status.as_str(),
                    payments,
                    pay_id,
                    &(*number as i64),
                    &(*offset as i64),
                ],
            );
            if let Err(error) = result {
                log_error!(
                    LOG_TARGET,
                    "insert_transaction: id: {txid:?}, owner: {owner:?}, \
                     previous: {previous_txid:?}, block: {number}  error: {error}"
                );
                if previous_txid.is_some() && error.code() == Some(&SqlState::NOT_NULL_VIOLATION) {
                    // the linked record is missing from the database; only
                    // an operator reset can fix that
                    log_critical!(
                        LOG_TARGET,
                        "database is corrupt: block: {number} insert transaction: {txid:?}  \
                         previous transaction: {previous_txid:?} does not exist"
                    );
                    panic!(
                        "database is corrupt: block: {number} insert transaction: {txid:?}  \
                         previous transaction: {previous_txid:?} does not exist"
                    );
                }
                return Err(error.into());
            }
        }

        ProcedureCall::InsertShare {
            txid,
            quantity,
            signature,
            previous_txid,
            pay_id,
            status,
            number,
            offset,
        } => {
            db.execute(
                INSERT_SHARE_SQL,
                &[
                    txid,
                    &(*quantity as i64),
                    signature,
                    previous_txid,
                    pay_id,
                    &status.as_str(),
                    &(*number as i64),
                    &(*offset as i64),
                ],
            )
            .map_err(|error| {
                log_error!(
                    LOG_TARGET,
                    "insert_share_transaction: id: {txid:?}, previous: {previous_txid:?}, \
                     block: {number}  error: {error}"
                );
                error
            })?;
        }

        ProcedureCall::InsertGrant {
            txid,
            share_id,
            quantity,
            owner,
            recipient,
            signature,
            countersignature,
            pay_id,
            shares,
            status,
            number,
            offset,
        } => {
            db.execute(
                INSERT_GRANT_SQL,
                &[
                    txid,
                    share_id,
                    &(*quantity as i64),
                    owner,
                    recipient,
                    signature,
                    countersignature,
                    pay_id,
                    shares,
                    &status.as_str(),
                    &(*number as i64),
                    &(*offset as i64),
                ],
            )
            .map_err(|error| {
                log_error!(
                    LOG_TARGET,
                    "insert_grant_transaction: id: {txid:?}, share: {share_id:?}, \
                     block: {number}  error: {error}"
                );
                error
            })?;
        }

        ProcedureCall::InsertSwap {
            txid,
            share_id_one,
            quantity_one,
            owner_one,
            share_id_two,
            quantity_two,
            owner_two,
            signature,
            countersignature,
            pay_id,
            shares,
            status,
            number,
            offset,
        } => {
            db.execute(
                INSERT_SWAP_SQL,
                &[
                    txid,
                    share_id_one,
                    &(*quantity_one as i64),
                    owner_one,
                    share_id_two,
                    &(*quantity_two as i64),
                    owner_two,
                    signature,
                    countersignature,
                    pay_id,
                    shares,
                    &status.as_str(),
                    &(*number as i64),
                    &(*offset as i64),
                ],
            )
            .map_err(|error| {
                log_error!(
                    LOG_TARGET,
                    "insert_swap_transaction: id: {txid:?}, block: {number}  error: {error}"
                );
                error
            })?;
        }

        ProcedureCall::UpdateEditions { number } => {
            db.execute(UPDATE_EDITIONS_SQL, &[&(*number as i64)])
                .map_err(|error| {
                    log_error!(LOG_TARGET, "update_editions: block: {number}  error: {error}");
                    error
                })?;
        }
    }
    Ok(())
}
