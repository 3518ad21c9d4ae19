//! Periodic purge of pending records that never confirmed.

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{after, select, Receiver};
use updaterd_log::{log_error, log_info};
use updaterd_storage::Store;

use crate::background::Runner;

const LOG_TARGET: &str = "expiry";

// pause to limit expiry load
const EXPIRY_INTERVAL: Duration = Duration::from_secs(60 * 60);

pub struct Expiry {
    store: Arc<Store>,
}

impl Expiry {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }
}

impl Runner for Expiry {
    fn name(&self) -> &'static str {
        "expiry"
    }

    fn run(&mut self, shutdown: Receiver<()>) {
        log_info!(LOG_TARGET, "starting…");

        loop {
            select! {
                recv(shutdown) -> _ => break,
                recv(after(EXPIRY_INTERVAL)) -> _ => {
                    log_info!(LOG_TARGET, "removing any expired records");
                    if let Err(error) = self.store.delete_expired_records() {
                        log_error!(LOG_TARGET, "delete error: {error}");
                    }
                }
            }
        }
    }
}
