//! Pull-mode catch-up state machine.
//!
//! Advances the local tip to the best peer's tip, walking digests
//! backwards to find fork points and refetching from there. Steady state
//! is `Sampling`, where peers are only polled for missed broadcasts.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{after, select, Receiver};
use serde::Deserialize;
use updaterd_chain::{Digest, Mode, Phase, GENESIS_BLOCK_NUMBER};
use updaterd_log::{log_critical, log_debug, log_error, log_info, log_warn};
use updaterd_storage::Store;

use crate::background::Runner;
use crate::client::{open_pool, Client, ClientError, Connection, KeyBytes, SocketKind};

const LOG_TARGET: &str = "connector";

// pause to limit bandwidth
const CYCLE_INTERVAL: Duration = Duration::from_secs(10);
// time out for request/reply exchanges
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
// cycles spent 1 block behind before a resynchronisation
const SAMPLING_LIMIT: u32 = 10;
// blocks fetched and stored in one cycle
const FETCH_BLOCKS_PER_CYCLE: u64 = 500;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum State {
    Connecting,
    HighestBlock,
    ForkDetect,
    FetchBlocks,
    Rebuild,
    Sampling,
}

impl State {
    fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "Connecting",
            Self::HighestBlock => "HighestBlock",
            Self::ForkDetect => "ForkDetect",
            Self::FetchBlocks => "FetchBlocks",
            Self::Rebuild => "Rebuild",
            Self::Sampling => "Sampling",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// reply to an "I" request
#[derive(Debug, Deserialize)]
struct ServerInfo {
    #[allow(dead_code)]
    version: String,
    chain: String,
    #[allow(dead_code)]
    normal: bool,
    #[allow(dead_code)]
    height: u64,
}

pub struct Connector {
    clients: Vec<Client>,
    state: State,

    the_client: Option<usize>,
    start_block_number: u64,
    highest_block_number: u64,
    samples: u32,

    store: Arc<Store>,
    mode: Arc<Mode>,
    resync: Arc<AtomicBool>,
}

impl Connector {
    pub fn new(
        context: &zmq::Context,
        private_key: KeyBytes,
        public_key: KeyBytes,
        connections: &[Connection],
        store: Arc<Store>,
        mode: Arc<Mode>,
        resync: Arc<AtomicBool>,
    ) -> Result<Self, ClientError> {
        log_info!(LOG_TARGET, "initialising…");
        let clients = open_pool(
            context,
            SocketKind::Request,
            private_key,
            public_key,
            Some(REQUEST_TIMEOUT),
            connections,
        )?;
        Ok(Self {
            clients,
            state: State::Connecting,
            the_client: None,
            start_block_number: 0,
            highest_block_number: 0,
            samples: 0,
            store,
            mode,
            resync,
        })
    }

    fn process(&mut self) {
        // a live block with a broken chain link pushes catch-up back here
        if self.resync.swap(false, Ordering::AcqRel) && self.state != State::Connecting {
            log_warn!(LOG_TARGET, "resynchronisation requested");
            self.state = State::HighestBlock;
        }

        log_info!(LOG_TARGET, "current state: {}", self.state);

        match self.state {
            State::Connecting => {
                self.mode.set(Phase::Resynchronise);
                if let Err(error) = check_nodes(&mut self.clients, self.mode.chain_name()) {
                    log_critical!(LOG_TARGET, "connection to node failed: error: {error}");
                    panic!("connection to node failed: error: {error}");
                }
                self.state = State::HighestBlock;
            }

            State::HighestBlock => {
                let (highest, client) = highest_block(&mut self.clients);
                self.highest_block_number = highest;
                self.the_client = client;
                if highest > 0 && client.is_some() {
                    self.state = State::ForkDetect;
                } else if client.is_none() {
                    log_critical!(
                        LOG_TARGET,
                        "no alive connections in pool, stay in state HighestBlock"
                    );
                }
                log_info!(LOG_TARGET, "highest block number: {highest}");
            }

            State::ForkDetect => self.fork_detect(),

            State::FetchBlocks => self.fetch_blocks(),

            State::Rebuild => {
                // return to normal operations
                self.state = State::Sampling;
                self.samples = 0;
                self.mode.set(Phase::Normal);
            }

            State::Sampling => self.sample(),
        }

        log_debug!(LOG_TARGET, "next state: {}", self.state);
    }

    // walk digests downward until local and remote agree, then discard
    // everything above the agreement point
    fn fork_detect(&mut self) {
        let h = self.local_height();

        log_info!(LOG_TARGET, "local block number: {h}");
        log_info!(
            LOG_TARGET,
            "highest block number: {}",
            self.highest_block_number
        );

        if self.highest_block_number <= h {
            self.state = State::Rebuild;
            return;
        }

        let Some(index) = self.the_client else {
            self.state = State::HighestBlock;
            return;
        };

        self.start_block_number = GENESIS_BLOCK_NUMBER + 1;
        self.state = State::FetchBlocks; // assume success

        let mut n = h;
        while n > GENESIS_BLOCK_NUMBER {
            log_info!(LOG_TARGET, "examine block number: {n}");
            let local = match self.store.digest_for_block(n) {
                Ok(digest) => digest,
                Err(error) => {
                    log_error!(LOG_TARGET, "block number: {n}  local digest error: {error}");
                    self.state = State::HighestBlock; // retry
                    break;
                }
            };
            match block_digest(&mut self.clients[index], n) {
                Err(error) => {
                    log_error!(LOG_TARGET, "block number: {n}  fetch digest error: {error}");
                    self.state = State::HighestBlock; // retry
                    break;
                }
                Ok(remote) if remote == local => {
                    self.start_block_number = n + 1;
                    log_info!(
                        LOG_TARGET,
                        "fork from block number: {}  digest: {}",
                        self.start_block_number,
                        updaterd_records::digest_to_hex(&remote)
                    );

                    // remove old blocks
                    if let Err(error) = self.store.delete_down_to_block(self.start_block_number) {
                        log_error!(
                            LOG_TARGET,
                            "delete down to block number: {}  error: {error}",
                            self.start_block_number
                        );
                        self.state = State::HighestBlock; // retry
                    }
                    break;
                }
                Ok(remote) => {
                    log_info!(
                        LOG_TARGET,
                        "mismatched digests local: {}  remote: {}",
                        updaterd_records::digest_to_hex(&local),
                        updaterd_records::digest_to_hex(&remote)
                    );
                }
            }
            n -= 1;
        }
    }

    // bounded batch per cycle so other work gets a turn
    fn fetch_blocks(&mut self) {
        log_info!(
            LOG_TARGET,
            "start   block number: {}",
            self.start_block_number
        );
        log_info!(
            LOG_TARGET,
            "highest block number: {}",
            self.highest_block_number
        );

        let Some(index) = self.the_client else {
            self.state = State::HighestBlock;
            return;
        };

        for _ in 0..FETCH_BLOCKS_PER_CYCLE {
            if self.start_block_number > self.highest_block_number {
                self.state = State::HighestBlock; // just in case the tip has advanced
                break;
            }

            log_info!(LOG_TARGET, "fetch block number: {}", self.start_block_number);
            let packed = match block_data(&mut self.clients[index], self.start_block_number) {
                Ok(packed) => packed,
                Err(error) => {
                    log_error!(
                        LOG_TARGET,
                        "fetch block number: {}  error: {error}",
                        self.start_block_number
                    );
                    self.state = State::HighestBlock; // retry
                    break;
                }
            };
            log_debug!(LOG_TARGET, "store block number: {}", self.start_block_number);
            if let Err(error) = self.store.store_block(&packed) {
                log_error!(
                    LOG_TARGET,
                    "store block number: {}  error: {error}",
                    self.start_block_number
                );
                self.state = State::HighestBlock; // retry
                break;
            }

            self.start_block_number += 1;
        }
    }

    // steady state: poll peers for a tip the broadcasts missed
    fn sample(&mut self) {
        let (highest, client) = highest_block(&mut self.clients);
        self.highest_block_number = highest;
        self.the_client = client;
        if client.is_none() {
            self.state = State::HighestBlock;
            log_critical!(
                LOG_TARGET,
                "no alive connections in pool, move state back to HighestBlock"
            );
            return;
        }

        let height = self.local_height();
        log_info!(LOG_TARGET, "height: remote: {highest}  local: {height}");

        if highest > height {
            if highest - height >= 2 {
                self.state = State::ForkDetect;
            } else {
                self.samples += 1;
                if self.samples > SAMPLING_LIMIT {
                    self.state = State::ForkDetect;
                }
            }
        }
    }

    fn local_height(&self) -> u64 {
        match self.store.block_height() {
            Ok(height) => height,
            Err(error) => {
                log_critical!(LOG_TARGET, "get_block_height failed: error: {error}");
                panic!("get_block_height failed: error: {error}");
            }
        }
    }
}

impl Runner for Connector {
    fn name(&self) -> &'static str {
        "connector"
    }

    fn run(&mut self, shutdown: Receiver<()>) {
        log_info!(LOG_TARGET, "starting…");

        loop {
            log_debug!(LOG_TARGET, "waiting…");
            select! {
                recv(shutdown) -> _ => break,
                recv(after(CYCLE_INTERVAL)) -> _ => self.process(),
            }
        }

        for client in &mut self.clients {
            client.disconnect();
        }
    }
}

// check all nodes are on the same chain as this program
fn check_nodes(clients: &mut [Client], chain_name: &str) -> Result<(), ClientError> {
    let mut usable = 0usize;

    for client in clients.iter_mut() {
        if !client.is_connected() {
            continue;
        }

        if let Err(error) = client.send("I", &[]) {
            log_error!(
                LOG_TARGET,
                "check nodes: send error: {error}, node: {}",
                client.basic_info()
            );
            let _ = client.reconnect();
            continue;
        }
        let data = match client.receive() {
            Ok(data) => data,
            Err(error) => {
                log_error!(
                    LOG_TARGET,
                    "check nodes: receive error: {error}, node: {}",
                    client.basic_info()
                );
                let _ = client.reconnect();
                continue;
            }
        };

        if data.len() != 2 {
            log_error!(LOG_TARGET, "check nodes: received: {}  expected: 2", data.len());
            continue;
        }
        match data[0].as_slice() {
            b"E" => {
                log_error!(
                    LOG_TARGET,
                    "check nodes: rpc error response: {:?}",
                    String::from_utf8_lossy(&data[1])
                );
            }
            b"I" => {
                let info: ServerInfo = match serde_json::from_slice(&data[1]) {
                    Ok(info) => info,
                    Err(_) => {
                        log_error!(
                            LOG_TARGET,
                            "check nodes: fail to parse server info: {}",
                            String::from_utf8_lossy(&data[1])
                        );
                        continue;
                    }
                };
                if info.chain != chain_name {
                    log_error!(
                        LOG_TARGET,
                        "check nodes: expected chain: {chain_name:?} but received: {:?}",
                        info.chain
                    );
                    continue;
                }
                usable += 1;
            }
            _ => {
                log_error!(
                    LOG_TARGET,
                    "check nodes: invalid peer response: {:?}",
                    String::from_utf8_lossy(&data[1])
                );
            }
        }
    }

    if usable == 0 {
        return Err(ClientError::NoConnectionsAvailable);
    }
    Ok(())
}

// determine the client with the highest block
fn highest_block(clients: &mut [Client]) -> (u64, Option<usize>) {
    let mut highest = 0u64;
    let mut chosen = None;

    for (index, client) in clients.iter_mut().enumerate() {
        if !client.is_connected() {
            continue;
        }

        if let Err(error) = client.send("N", &[]) {
            log_error!(LOG_TARGET, "highest block: send error: {error}");
            let _ = client.reconnect();
            continue;
        }
        let data = match client.receive() {
            Ok(data) => data,
            Err(error) => {
                log_error!(LOG_TARGET, "highest block: receive error: {error}");
                let _ = client.reconnect();
                continue;
            }
        };

        if data.len() != 2 {
            log_error!(
                LOG_TARGET,
                "highest block: received: {}  expected: 2",
                data.len()
            );
            continue;
        }
        match data[0].as_slice() {
            b"E" => {
                log_error!(
                    LOG_TARGET,
                    "highest block: rpc error response: {:?}",
                    String::from_utf8_lossy(&data[1])
                );
            }
            b"N" => {
                // exactly 8 big-endian bytes, anything else is ignored
                if let Ok(bytes) = <[u8; 8]>::try_from(data[1].as_slice()) {
                    let number = u64::from_be_bytes(bytes);
                    if number > highest {
                        highest = number;
                        chosen = Some(index);
                    }
                }
            }
            _ => {}
        }
    }

    (highest, chosen)
}

// fetch one block digest
fn block_digest(client: &mut Client, block_number: u64) -> Result<Digest, ClientError> {
    let parameter = block_number.to_be_bytes();
    if let Err(error) = client.send("H", &[&parameter]) {
        let _ = client.reconnect();
        return Err(error);
    }
    let data = match client.receive() {
        Ok(data) => data,
        Err(error) => {
            let _ = client.reconnect();
            return Err(error);
        }
    };

    if data.len() != 2 {
        return Err(ClientError::InvalidPeerResponse);
    }
    match data[0].as_slice() {
        b"E" => Err(ClientError::Remote(
            String::from_utf8_lossy(&data[1]).into_owned(),
        )),
        b"H" => {
            let digest: Digest = data[1]
                .as_slice()
                .try_into()
                .map_err(|_| ClientError::InvalidPeerResponse)?;
            Ok(digest)
        }
        _ => Err(ClientError::InvalidPeerResponse),
    }
}

// fetch one packed block
pub(crate) fn block_data(client: &mut Client, block_number: u64) -> Result<Vec<u8>, ClientError> {
    let parameter = block_number.to_be_bytes();
    if let Err(error) = client.send("B", &[&parameter]) {
        let _ = client.reconnect();
        return Err(error);
    }
    let mut data = match client.receive() {
        Ok(data) => data,
        Err(error) => {
            let _ = client.reconnect();
            return Err(error);
        }
    };

    if data.len() != 2 {
        return Err(ClientError::InvalidPeerResponse);
    }
    match data[0].as_slice() {
        b"E" => Err(ClientError::Remote(
            String::from_utf8_lossy(&data[1]).into_owned(),
        )),
        b"B" => Ok(data.swap_remove(1)),
        _ => Err(ClientError::InvalidPeerResponse),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_names() {
        assert_eq!(State::Connecting.to_string(), "Connecting");
        assert_eq!(State::HighestBlock.to_string(), "HighestBlock");
        assert_eq!(State::ForkDetect.to_string(), "ForkDetect");
        assert_eq!(State::FetchBlocks.to_string(), "FetchBlocks");
        assert_eq!(State::Rebuild.to_string(), "Rebuild");
        assert_eq!(State::Sampling.to_string(), "Sampling");
    }

    #[test]
    fn server_info_parses() {
        let info: ServerInfo = serde_json::from_slice(
            br#"{"version":"8.1","chain":"testing","normal":true,"height":1024}"#,
        )
        .expect("parse server info");
        assert_eq!(info.chain, "testing");
        assert_eq!(info.height, 1024);
        assert!(info.normal);
    }
}
