//! Ordered start and stop of the long-running loops.

use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver, Sender};
use updaterd_log::{log_critical, log_debug, log_info};

const LOG_TARGET: &str = "background";

/// A long-running loop. `run` must return promptly once the shutdown
/// channel closes.
pub trait Runner: Send {
    fn name(&self) -> &'static str;
    fn run(&mut self, shutdown: Receiver<()>);
}

/// Holds the shutdown sender and the spawned threads; dropping the sender
/// is the broadcast stop signal.
pub struct Background {
    stop: Sender<()>,
    handles: Vec<JoinHandle<()>>,
}

impl Background {
    pub fn start(runners: Vec<Box<dyn Runner>>) -> Self {
        let (stop, shutdown) = unbounded::<()>();

        let mut handles = Vec::with_capacity(runners.len());
        for mut runner in runners {
            let name = runner.name();
            log_debug!(LOG_TARGET, "starting {name}…");
            let shutdown = shutdown.clone();
            let handle = thread::Builder::new()
                .name(name.to_string())
                .spawn(move || runner.run(shutdown));
            match handle {
                Ok(handle) => handles.push(handle),
                Err(error) => {
                    log_critical!(LOG_TARGET, "spawn {name} failed: {error}");
                    panic!("spawn {name} failed: {error}");
                }
            }
        }

        Self { stop, handles }
    }

    /// Signal every runner and wait for all of them to finish.
    pub fn stop(self) {
        log_info!(LOG_TARGET, "stopping…");
        drop(self.stop);
        for handle in self.handles {
            let _ = handle.join();
        }
        log_info!(LOG_TARGET, "stopped");
    }
}
