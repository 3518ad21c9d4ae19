//! updaterd — mirrors a ledger network's confirmed state into PostgreSQL.

mod background;
mod client;
mod commands;
mod config;
mod connector;
mod expiry;
mod subscriber;

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::process::{self, ExitCode};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use fs2::FileExt;
use updaterd_chain::{Mode, Phase};
use updaterd_log::{log_critical, log_info, log_warn, Level, LogConfig};
use updaterd_storage::Store;

use crate::background::{Background, Runner};
use crate::connector::Connector;
use crate::expiry::Expiry;
use crate::subscriber::Subscriber;

const LOG_TARGET: &str = "main";
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Default)]
struct Options {
    config_file: Option<String>,
    show_help: bool,
    show_version: bool,
    verbose: bool,
    quiet: bool,
    variables: HashMap<String, String>,
    arguments: Vec<String>,
}

fn parse_options(args: Vec<String>) -> Result<Options, String> {
    let mut options = Options::default();
    let mut args = args.into_iter();

    loop {
        let Some(arg) = args.next() else {
            break;
        };
        match arg.as_str() {
            "--help" | "-h" => options.show_help = true,
            "--version" | "-V" => options.show_version = true,
            "--verbose" | "-v" => options.verbose = true,
            "--quiet" | "-q" => options.quiet = true,
            "--config-file" | "-c" => {
                let value = args.next().ok_or("option --config-file needs a value")?;
                options.config_file = Some(value);
            }
            "--set" | "-s" => {
                let value = args.next().ok_or("option --set needs a value")?;
                add_variable(&mut options, &value)?;
            }
            other if other.starts_with("--config-file=") => {
                options.config_file = Some(other["--config-file=".len()..].to_string());
            }
            other if other.starts_with("--set=") => {
                let value = other["--set=".len()..].to_string();
                add_variable(&mut options, &value)?;
            }
            other if other.starts_with('-') => {
                return Err(format!("unknown option: {other}"));
            }
            _ => {
                // first positional argument starts a setup command
                options.arguments.push(arg);
                options.arguments.extend(args.by_ref());
                break;
            }
        }
    }

    Ok(options)
}

fn add_variable(options: &mut Options, value: &str) -> Result<(), String> {
    match value.split_once('=') {
        Some((name, value)) if !name.is_empty() => {
            options.variables.insert(name.to_string(), value.to_string());
            Ok(())
        }
        _ => Err(format!("option --set needs NAME=VALUE, got: {value:?}")),
    }
}

fn usage(program: &str) {
    println!(
        "usage: {program} [--help] [--verbose] [--quiet] [--set NAME=VALUE] \
         --config-file=FILE [[command|help] arguments...]"
    );
    println!("{}", commands::usage());
}

// holds the exclusive lock for the life of the process
struct PidFile {
    file: fs::File,
    path: PathBuf,
}

impl PidFile {
    fn create(path: &Path) -> Result<Self, String> {
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|error| {
                if error.kind() == ErrorKind::AlreadyExists {
                    "another instance is already running".to_string()
                } else {
                    format!("pid file: {path:?} creation failed, error: {error}")
                }
            })?;
        file.try_lock_exclusive()
            .map_err(|error| format!("pid file: {path:?} lock failed, error: {error}"))?;
        writeln!(file, "{}", process::id())
            .map_err(|error| format!("pid file: {path:?} write failed, error: {error}"))?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
        let _ = fs::remove_file(&self.path);
    }
}

fn main() -> ExitCode {
    let mut args: Vec<String> = std::env::args().collect();
    let program = if args.is_empty() {
        "updaterd".to_string()
    } else {
        args.remove(0)
    };

    let options = match parse_options(args) {
        Ok(options) => options,
        Err(error) => {
            eprintln!("{program}: {error}");
            return ExitCode::from(2);
        }
    };

    if options.show_help {
        usage(&program);
        return ExitCode::SUCCESS;
    }
    if options.show_version {
        println!("{program}: version: {VERSION}");
        return ExitCode::SUCCESS;
    }

    let Some(config_file) = &options.config_file else {
        eprintln!("{program}: a --config-file option is required");
        return ExitCode::from(2);
    };

    let configuration = match config::load(Path::new(config_file), &options.variables) {
        Ok(configuration) => configuration,
        Err(error) => {
            eprintln!("{program}: failed to read configuration from: {config_file:?}  error: {error}");
            return ExitCode::FAILURE;
        }
    };

    let mut log_config = LogConfig {
        default_level: Level::Critical,
        levels: configuration.logging.levels.clone(),
        format: configuration.logging.format,
        timestamps: true,
    };
    if let Some(level) = log_config.levels.remove(updaterd_log::DEFAULT_TAG) {
        log_config.default_level = level;
    }
    if options.verbose && log_config.default_level < Level::Debug {
        log_config.default_level = Level::Debug;
    }
    updaterd_log::init(log_config);

    log_info!(LOG_TARGET, "starting…");
    log_info!(LOG_TARGET, "version: {VERSION}");
    log_info!(LOG_TARGET, "chain: {}", configuration.chain);

    // optional PID file, for running without a process supervisor
    let _pid_file = match &configuration.pidfile {
        Some(path) => match PidFile::create(path) {
            Ok(pid_file) => Some(pid_file),
            Err(error) => {
                eprintln!("{program}: {error}");
                return ExitCode::FAILURE;
            }
        },
        None => None,
    };

    // setup commands run inside the lock and exit
    if !options.arguments.is_empty() {
        let command = options.arguments[0].clone();
        return match commands::run(&command, &options.arguments[1..], &configuration) {
            Ok(()) => ExitCode::SUCCESS,
            Err(error) => {
                eprintln!("{program}: {command}: {error}");
                ExitCode::FAILURE
            }
        };
    }

    // initial system mode, before any background task starts
    let mode = Arc::new(Mode::new(configuration.chain));
    log_info!(LOG_TARGET, "test mode: {}", mode.is_testing());

    log_info!(LOG_TARGET, "initialise storage");
    let store = match Store::connect(&configuration.database, configuration.chain) {
        Ok(store) => Arc::new(store),
        Err(error) => {
            log_critical!(LOG_TARGET, "storage initialise error: {error}");
            eprintln!("{program}: storage initialise error: {error}");
            return ExitCode::FAILURE;
        }
    };

    let private_key = match client::read_key_file(&configuration.peering.private_key) {
        Ok(key) => key,
        Err(error) => {
            log_critical!(LOG_TARGET, "{error}");
            eprintln!("{program}: {error}");
            return ExitCode::FAILURE;
        }
    };
    let public_key = match client::read_key_file(&configuration.peering.public_key) {
        Ok(key) => key,
        Err(error) => {
            log_critical!(LOG_TARGET, "{error}");
            eprintln!("{program}: {error}");
            return ExitCode::FAILURE;
        }
    };

    let context = zmq::Context::new();
    let resync = Arc::new(AtomicBool::new(false));

    let request_connections: Vec<_> = configuration
        .peering
        .nodes
        .iter()
        .map(config::Node::request_connection)
        .collect();
    let connector = match Connector::new(
        &context,
        private_key,
        public_key,
        &request_connections,
        store.clone(),
        mode.clone(),
        resync.clone(),
    ) {
        Ok(connector) => connector,
        Err(error) => {
            log_critical!(LOG_TARGET, "peer initialise error: {error}");
            eprintln!("{program}: peer initialise error: {error}");
            return ExitCode::FAILURE;
        }
    };

    let subscribe_connections: Vec<_> = configuration
        .peering
        .nodes
        .iter()
        .map(config::Node::subscribe_connection)
        .collect();
    let subscriber = match Subscriber::new(
        &context,
        private_key,
        public_key,
        &subscribe_connections,
        store.clone(),
        mode.clone(),
        resync,
    ) {
        Ok(subscriber) => subscriber,
        Err(error) => {
            log_critical!(LOG_TARGET, "peer initialise error: {error}");
            eprintln!("{program}: peer initialise error: {error}");
            return ExitCode::FAILURE;
        }
    };

    let runners: Vec<Box<dyn Runner>> = vec![
        Box::new(connector),
        Box::new(subscriber),
        Box::new(Expiry::new(store.clone())),
    ];
    let background = Background::start(runners);

    let (signal_tx, signal_rx) = crossbeam_channel::bounded::<()>(1);
    if let Err(error) = ctrlc::set_handler(move || {
        let _ = signal_tx.try_send(());
    }) {
        log_warn!(LOG_TARGET, "failed to install signal handler: {error}");
    }

    if !options.quiet {
        println!("waiting for SIGINT or SIGTERM…");
    }
    let _ = signal_rx.recv();
    log_info!(LOG_TARGET, "received shutdown signal");
    if !options.quiet {
        println!("shutting down…");
    }

    mode.set(Phase::Stopped);
    background.stop();
    log_info!(LOG_TARGET, "shutting down…");

    ExitCode::SUCCESS
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn options_parse() {
        let options = parse_options(args(&[
            "--verbose",
            "--config-file=/etc/updaterd.conf",
            "--set",
            "password=secret",
        ]))
        .expect("parse");
        assert!(options.verbose);
        assert_eq!(options.config_file.as_deref(), Some("/etc/updaterd.conf"));
        assert_eq!(options.variables.get("password").map(String::as_str), Some("secret"));
        assert!(options.arguments.is_empty());
    }

    #[test]
    fn separate_value_config_file() {
        let options =
            parse_options(args(&["-c", "updaterd.conf", "-q"])).expect("parse");
        assert_eq!(options.config_file.as_deref(), Some("updaterd.conf"));
        assert!(options.quiet);
    }

    #[test]
    fn positional_arguments_stop_option_parsing() {
        let options = parse_options(args(&[
            "--config-file=conf",
            "block-times",
            "out.csv",
            "--verbose",
        ]))
        .expect("parse");
        assert_eq!(
            options.arguments,
            args(&["block-times", "out.csv", "--verbose"])
        );
        assert!(!options.verbose);
    }

    #[test]
    fn bad_options_are_rejected()  {
        assert!(parse_options(args(&["--unknown"])).is_err());
        assert!(parse_options(args(&["--set", "novalue"])).is_err());
        assert!(parse_options(args(&["--config-file"])).is_err());
    }
}
