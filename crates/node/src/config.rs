//! Configuration document loading and validation.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Component, Path, PathBuf};

use serde::Deserialize;
use updaterd_chain::Chain;
use updaterd_log::{Format, Level};

use crate::client::Connection;

const DEFAULT_PUBLIC_KEY_FILE: &str = "updaterd.public";
const DEFAULT_PRIVATE_KEY_FILE: &str = "updaterd.private";

const DEFAULT_LOG_DIRECTORY: &str = "log";
const DEFAULT_LOG_FILE: &str = "updaterd.log";
const DEFAULT_LOG_SIZE: u64 = 1024 * 1024;
const DEFAULT_LOG_COUNT: u32 = 10;

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Invalid(String),
}

impl From<std::io::Error> for ConfigError {
    fn from(error: std::io::Error) -> Self {
        ConfigError::Io(error)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(error: toml::de::Error) -> Self {
        ConfigError::Parse(error)
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(error) => write!(f, "{error}"),
            ConfigError::Parse(error) => write!(f, "{error}"),
            ConfigError::Invalid(message) => write!(f, "{message}"),
        }
    }
}

impl std::error::Error for ConfigError {}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(message.into())
}

// raw document shape; strings only, validated below
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfiguration {
    #[serde(default)]
    data_directory: String,
    #[serde(default)]
    pidfile: String,
    #[serde(default = "default_chain")]
    chain: String,
    peering: RawPeering,
    #[serde(default)]
    database: updaterd_storage::Configuration,
    #[serde(default)]
    logging: RawLogging,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawPeering {
    #[serde(default = "default_public_key_file")]
    public_key: String,
    #[serde(default = "default_private_key_file")]
    private_key: String,
    #[serde(default)]
    node: Vec<RawNode>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawNode {
    public_key: String,
    subscribe: String,
    connect: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawLogging {
    #[serde(default = "default_log_directory")]
    directory: String,
    #[serde(default = "default_log_file")]
    file: String,
    #[serde(default = "default_log_size")]
    size: u64,
    #[serde(default = "default_log_count")]
    count: u32,
    #[serde(default = "default_log_format")]
    format: String,
    #[serde(default)]
    levels: HashMap<String, String>,
}

impl Default for RawLogging {
    fn default() -> Self {
        Self {
            directory: default_log_directory(),
            file: default_log_file(),
            size: default_log_size(),
            count: default_log_count(),
            format: default_log_format(),
            levels: HashMap::new(),
        }
    }
}

fn default_chain() -> String {
    Chain::Bitmark.as_str().to_string()
}

fn default_public_key_file() -> String {
    DEFAULT_PUBLIC_KEY_FILE.to_string()
}

fn default_private_key_file() -> String {
    DEFAULT_PRIVATE_KEY_FILE.to_string()
}

fn default_log_directory() -> String {
    DEFAULT_LOG_DIRECTORY.to_string()
}

fn default_log_file() -> String {
    DEFAULT_LOG_FILE.to_string()
}

fn default_log_size() -> u64 {
    DEFAULT_LOG_SIZE
}

fn default_log_count() -> u32 {
    DEFAULT_LOG_COUNT
}

fn default_log_format() -> String {
    "text".to_string()
}

/// One upstream peer with both of its endpoints.
#[derive(Clone, Debug)]
pub struct Node {
    pub public_key: String,
    pub subscribe: String,
    pub connect: String,
}

impl Node {
    pub fn request_connection(&self) -> Connection {
        Connection {
            public_key: self.public_key.clone(),
            address: self.connect.clone(),
        }
    }

    pub fn subscribe_connection(&self) -> Connection {
        Connection {
            public_key: self.public_key.clone(),
            address: self.subscribe.clone(),
        }
    }
}

#[derive(Debug)]
pub struct Peering {
    pub public_key: PathBuf,
    pub private_key: PathBuf,
    pub nodes: Vec<Node>,
}

#[derive(Debug)]
pub struct Logging {
    pub directory: PathBuf,
    pub file: String,
    pub size: u64,
    pub count: u32,
    pub format: Format,
    pub levels: HashMap<String, Level>,
}

#[derive(Debug)]
pub struct Configuration {
    pub data_directory: PathBuf,
    pub pidfile: Option<PathBuf>,
    pub chain: Chain,
    pub peering: Peering,
    pub database: updaterd_storage::Configuration,
    pub logging: Logging,
}

pub fn load(path: &Path, variables: &HashMap<String, String>) -> Result<Configuration, ConfigError> {
    let path = path
        .canonicalize()
        .map_err(|error| invalid(format!("configuration file: {path:?}  error: {error}")))?;
    let text = fs::read_to_string(&path)?;
    let text = substitute(&text, variables);
    let raw: RawConfiguration = toml::from_str(&text)?;

    // directory holding the configuration file, for "."
    let config_directory = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("/"));

    validate(raw, &config_directory)
}

/// Replace every `${NAME}` with its `--set NAME=VALUE` value.
pub fn substitute(text: &str, variables: &HashMap<String, String>) -> String {
    let mut out = text.to_string();
    for (name, value) in variables {
        out = out.replace(&format!("${{{name}}}"), value);
    }
    out
}

fn validate(raw: RawConfiguration, config_directory: &Path) -> Result<Configuration, ConfigError> {
    let chain_name = raw.chain.to_lowercase();
    let chain = Chain::parse(&chain_name)
        .ok_or_else(|| invalid(format!("chain: {:?} is not supported", raw.chain)))?;

    let data_directory = match raw.data_directory.as_str() {
        "" | "~" => {
            return Err(invalid(format!(
                "path: {:?} is not a valid directory",
                raw.data_directory
            )))
        }
        "." => config_directory.to_path_buf(),
        other => PathBuf::from(other),
    };
    let metadata = fs::metadata(&data_directory)
        .map_err(|error| invalid(format!("path: {data_directory:?}  error: {error}")))?;
    if !metadata.is_dir() {
        return Err(invalid(format!("path: {data_directory:?} is not a directory")));
    }

    if raw.peering.node.is_empty() {
        return Err(invalid("at least one peering.node is required"));
    }
    let nodes = raw
        .peering
        .node
        .iter()
        .map(|node| Node {
            public_key: node.public_key.clone(),
            subscribe: node.subscribe.clone(),
            connect: node.connect.clone(),
        })
        .collect();

    let peering = Peering {
        public_key: ensure_absolute(&data_directory, &raw.peering.public_key),
        private_key: ensure_absolute(&data_directory, &raw.peering.private_key),
        nodes,
    };

    let pidfile = match raw.pidfile.as_str() {
        "" => None,
        other => Some(ensure_absolute(&data_directory, other)),
    };

    // the log file must be a plain name, the directory carries the path
    if Path::new(&raw.logging.file)
        .components()
        .any(|component| !matches!(component, Component::Normal(_)))
        || raw.logging.file.contains(std::path::MAIN_SEPARATOR)
    {
        return Err(invalid(format!(
            "file: {:?} is not a plain name",
            raw.logging.file
        )));
    }

    let format = Format::parse(&raw.logging.format)
        .ok_or_else(|| invalid(format!("log format: {:?} is invalid", raw.logging.format)))?;

    let mut levels = HashMap::new();
    for (target, level) in &raw.logging.levels {
        let level = Level::parse(level)
            .ok_or_else(|| invalid(format!("log level: {level:?} for {target:?} is invalid")))?;
        levels.insert(target.clone(), level);
    }

    let logging = Logging {
        directory: ensure_absolute(&data_directory, &raw.logging.directory),
        file: raw.logging.file,
        size: raw.logging.size,
        count: raw.logging.count,
        format,
        levels,
    };

    Ok(Configuration {
        data_directory,
        pidfile,
        chain,
        peering,
        database: raw.database,
        logging,
    })
}

fn ensure_absolute(base: &Path, path: &str) -> PathBuf {
    let path = Path::new(path);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_document(data_directory: &str) -> String {
        format!(
            r#"
data_directory = "{data_directory}"
chain = "Testing"

[peering]
public_key = "updaterd.public"
private_key = "updaterd.private"

[[peering.node]]
public_key = "{key}"
subscribe = "127.0.0.1:2135"
connect = "127.0.0.1:2136"

[database]
database = "updaterd"
user = "mirror"

[logging]
file = "updaterd.log"
[logging.levels]
"*" = "critical"
connector = "info"
"#,
            key = "ab".repeat(32),
        )
    }

    fn parse(document: &str) -> Result<Configuration, ConfigError> {
        let raw: RawConfiguration = toml::from_str(document).expect("well-formed document");
        validate(raw, Path::new("/tmp"))
    }

    #[test]
    fn sample_configuration_parses() {
        let configuration = parse(&sample_document("/tmp")).expect("valid configuration");
        assert_eq!(configuration.chain, Chain::Testing);
        assert_eq!(configuration.peering.nodes.len(), 1);
        assert_eq!(
            configuration.peering.public_key,
            PathBuf::from("/tmp/updaterd.public")
        );
        assert_eq!(configuration.logging.levels.get("connector"), Some(&Level::Info));
        assert!(configuration.pidfile.is_none());
    }

    #[test]
    fn dot_data_directory_resolves_to_config_directory() {
        let configuration = parse(&sample_document(".")).expect("valid configuration");
        assert_eq!(configuration.data_directory, PathBuf::from("/tmp"));
    }

    #[test]
    fn empty_and_home_data_directories_are_rejected() {
        assert!(parse(&sample_document("")).is_err());
        assert!(parse(&sample_document("~")).is_err());
    }

    #[test]
    fn unknown_chain_is_rejected() {
        let document = sample_document("/tmp").replace("Testing", "mainnet");
        assert!(parse(&document).is_err());
    }

    #[test]
    fn missing_nodes_are_rejected() {
        let document = r#"
data_directory = "/tmp"
chain = "local"
[peering]
"#;
        assert!(parse(document).is_err());
    }

    #[test]
    fn log_file_must_be_plain() {
        let document = sample_document("/tmp").replace("updaterd.log", "../updaterd.log");
        assert!(parse(&document).is_err());
    }

    #[test]
    fn bad_log_level_is_rejected() {
        let document = sample_document("/tmp").replace("\"critical\"", "\"loud\"");
        assert!(parse(&document).is_err());
    }

    #[test]
    fn set_variables_substitute() {
        let mut variables = HashMap::new();
        variables.insert("password".to_string(), "secret".to_string());
        let text = substitute("password = \"${password}\"", &variables);
        assert_eq!(text, "password = \"secret\"");
    }
}
