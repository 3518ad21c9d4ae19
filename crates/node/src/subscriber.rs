//! Push-mode receiver for live broadcasts.
//!
//! An inner thread owns the subscribe sockets and polls them together
//! with the pull half of an inproc signal pair; the outer runner thread
//! waits for shutdown and wakes the poller through the push half. Sockets
//! are only closed by the thread that owns them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use updaterd_chain::{Mode, Phase};
use updaterd_log::{log_debug, log_error, log_info, log_warn};
use updaterd_storage::Store;

use crate::background::Runner;
use crate::client::{open_pool, Client, ClientError, Connection, KeyBytes, SocketKind};

const LOG_TARGET: &str = "subscriber";

const SIGNAL_ENDPOINT: &str = "inproc://updaterd-subscriber-signal";

// must match the broadcaster's heartbeat pacing
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(60);
const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(2 * HEARTBEAT_INTERVAL.as_secs());

pub struct Subscriber {
    clients: Option<Vec<Client>>,
    push: Option<zmq::Socket>,
    pull: Option<zmq::Socket>,
    store: Arc<Store>,
    mode: Arc<Mode>,
    resync: Arc<AtomicBool>,
}

impl Subscriber {
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

        // signalling pair: push stays with the runner, pull joins the poller
        let push = context.socket(zmq::PAIR)?;
        push.set_linger(0)?;
        push.bind(SIGNAL_ENDPOINT)?;
        let pull = context.socket(zmq::PAIR)?;
        pull.set_linger(0)?;
        pull.connect(SIGNAL_ENDPOINT)?;

        let clients = open_pool(
            context,
            SocketKind::Subscribe,
            private_key,
            public_key,
            None,
            connections,
        )?;

        Ok(Self {
            clients: Some(clients),
            push: Some(push),
            pull: Some(pull),
            store,
            mode,
            resync,
        })
    }
}

impl Runner for Subscriber {
    fn name(&self) -> &'static str {
        "subscriber"
    }

    fn run(&mut self, shutdown: Receiver<()>) {
        log_info!(LOG_TARGET, "starting…");

        let (Some(clients), Some(pull)) = (self.clients.take(), self.pull.take()) else {
            log_error!(LOG_TARGET, "subscriber started twice");
            return;
        };

        let store = self.store.clone();
        let mode = self.mode.clone();
        let resync = self.resync.clone();
        let poller = thread::Builder::new()
            .name("subscriber-poll".to_string())
            .spawn(move || poll_loop(clients, pull, store, mode, resync));
        let poller = match poller {
            Ok(handle) => handle,
            Err(error) => {
                log_error!(LOG_TARGET, "poll thread spawn failed: {error}");
                return;
            }
        };

        // block until the supervisor closes the shutdown channel
        let _ = shutdown.recv();

        if let Some(push) = &self.push {
            if let Err(error) = push.send("stop", 0) {
                log_error!(LOG_TARGET, "push stop error: {error}");
            }
        }
        let _ = poller.join();
        self.push = None;
    }
}

fn poll_loop(
    mut clients: Vec<Client>,
    pull: zmq::Socket,
    store: Arc<Store>,
    mode: Arc<Mode>,
    resync: Arc<AtomicBool>,
) {
    let mut expiries: Vec<Instant> = clients
        .iter()
        .map(|_| Instant::now() + HEARTBEAT_TIMEOUT)
        .collect();
    let mut check_at = Instant::now() + HEARTBEAT_TIMEOUT;

    loop {
        log_debug!(LOG_TARGET, "waiting…");

        let connected: Vec<usize> = clients
            .iter()
            .enumerate()
            .filter_map(|(index, client)| client.poll_socket().map(|_| index))
            .collect();

        let (stop_ready, ready) = {
            let mut items: Vec<zmq::PollItem<'_>> = Vec::with_capacity(connected.len() + 1);
            items.push(pull.as_poll_item(zmq::POLLIN));
            for &index in &connected {
                if let Some(socket) = clients[index].poll_socket() {
                    items.push(socket.as_poll_item(zmq::POLLIN));
                }
            }

            match zmq::poll(&mut items, HEARTBEAT_TIMEOUT.as_millis() as i64) {
                Ok(0) => log_info!(
                    LOG_TARGET,
                    "timeout exceeded at {}s",
                    HEARTBEAT_TIMEOUT.as_secs()
                ),
                Ok(_) => {}
                Err(error) => log_error!(LOG_TARGET, "poll error: {error}"),
            }

            let stop_ready = items[0].is_readable();
            let ready: Vec<bool> = items[1..].iter().map(|item| item.is_readable()).collect();
            (stop_ready, ready)
        };

        if stop_ready {
            let _ = pull.recv_multipart(0);
            break;
        }

        let now = Instant::now();
        let expires_at = now + HEARTBEAT_TIMEOUT;

        // heartbeats keep expiries fresh; a silent socket gets reconnected
        if now >= check_at {
            check_at = expires_at;
            for index in 0..clients.len() {
                if now >= expiries[index] {
                    log_info!(
                        LOG_TARGET,
                        "client {} expired",
                        clients[index].basic_info()
                    );
                    if clients[index].is_connected() {
                        match clients[index].reconnect() {
                            Ok(()) => log_info!(
                                LOG_TARGET,
                                "client {} reconnected, extend expiry time",
                                clients[index].basic_info()
                            ),
                            Err(error) => log_error!(
                                LOG_TARGET,
                                "client {} reconnect with error: {error}",
                                clients[index].basic_info()
                            ),
                        }
                    } else {
                        log_debug!(
                            LOG_TARGET,
                            "client {} not connected, extend expiry time",
                            clients[index].basic_info()
                        );
                    }
                    expiries[index] = expires_at;
                } else if expiries[index] < check_at {
                    check_at = expiries[index];
                }
            }
        }

        for (slot, &index) in connected.iter().enumerate() {
            if !ready.get(slot).copied().unwrap_or(false) {
                continue;
            }
            match clients[index].receive() {
                Err(error) => log_error!(LOG_TARGET, "receive error: {error}"),
                Ok(frames) => {
                    if frames.is_empty() {
                        log_error!(LOG_TARGET, "empty broadcast");
                    } else {
                        let chain = String::from_utf8_lossy(&frames[0]);
                        if chain != mode.chain_name() {
                            log_error!(
                                LOG_TARGET,
                                "invalid chain: actual: {chain:?}  expect: {}",
                                mode.chain_name()
                            );
                        } else {
                            process(&frames[1..], &store, &mode, &resync);
                        }
                    }
                    expiries[index] = expires_at;
                }
            }
        }
    }

    // this thread owns these sockets, so it closes them
    for client in &mut clients {
        client.disconnect();
    }
    drop(pull);
    log_info!(LOG_TARGET, "poll loop finished");
}

// dispatch one broadcast by category
fn process(frames: &[Vec<u8>], store: &Store, mode: &Mode, resync: &AtomicBool) {
    if frames.len() < 2 {
        log_error!(LOG_TARGET, "invalid broadcast: {} frames", frames.len() + 1);
        return;
    }

    let category = String::from_utf8_lossy(&frames[0]);
    let payload = &frames[1];

    match category.as_ref() {
        "block" => {
            log_info!(LOG_TARGET, "received block: {}", hex::encode(payload));
            if mode.is(Phase::Normal) {
                if let Err(error) = store.store_block(payload) {
                    if error.is_previous_digest_mismatch() {
                        // catch-up must restart from the peers' view
                        mode.set(Phase::Resynchronise);
                        resync.store(true, Ordering::Release);
                    }
                    log_error!(LOG_TARGET, "failed to store block: error: {error}");
                }
            } else {
                log_warn!(LOG_TARGET, "failed block: error: not available during synchronise");
            }
        }

        "assets" | "issues" | "transfer" => {
            log_info!(LOG_TARGET, "received {category}: {}", hex::encode(payload));
            if let Err(error) = store.store_transactions(payload) {
                log_error!(LOG_TARGET, "failed {category}: error: {error}");
            }
        }

        "heart" => {
            log_debug!(LOG_TARGET, "received heart: {}", hex::encode(payload));
        }

        other => {
            log_error!(LOG_TARGET, "unknown broadcast category: {other:?}");
        }
    }
}
