//! Transactional ingest of blocks and loose transactions into PostgreSQL.
//!
//! All writes go through stored procedures; a block is decomposed into an
//! ordered batch of procedure calls first (see [`plan`]) and the batch is
//! then executed inside a single SQL transaction.

use std::fmt;
use std::sync::Mutex;

use serde::Deserialize;
use updaterd_chain::Chain;
use updaterd_records::digest::DigestError;
use updaterd_records::RecordError;

pub mod plan;
mod store;

pub use plan::{BlockPlan, ProcedureCall, Status, TransactionsPlan};

pub(crate) const LOG_TARGET: &str = "storage";

/// Database server connection options.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Configuration {
    #[serde(default)]
    pub database: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub port: String,
    #[serde(default)]
    pub sslmode: String,
    #[serde(default)]
    pub fallback: String,
    #[serde(default)]
    pub timeout: String,
    #[serde(default)]
    pub sslcert: String,
    #[serde(default)]
    pub sslkey: String,
    #[serde(default)]
    pub sslrootcert: String,
}

impl Configuration {
    pub fn connection_string(&self) -> String {
        quote("dbname", &self.database)
            + &quote("host", &self.host)
            + &quote("port", &self.port)
            + &quote("user", &self.user)
            + &quote("password", &self.password)
            + &quote("sslmode", &self.sslmode)
            + &quote("fallback_application_name", &self.fallback)
            + &quote("connect_timeout", &self.timeout)
            + &quote("sslcert", &self.sslcert)
            + &quote("sslkey", &self.sslkey)
            + &quote("sslrootcert", &self.sslrootcert)
    }
}

// produce " name='value'", empty values vanish
fn quote(name: &str, value: &str) -> String {
    if name.is_empty() || value.is_empty() {
        return String::new();
    }
    let escaped = value.replace('\'', "\\'");
    format!(" {name}='{escaped}'")
}

#[derive(Debug)]
pub enum StoreError {
    PreviousBlockDigestMismatch,
    MerkleRootMismatch,
    BlockNotFound,
    Record(RecordError),
    Digest(DigestError),
    Sql(postgres::Error),
}

impl StoreError {
    pub fn is_previous_digest_mismatch(&self) -> bool {
        matches!(self, StoreError::PreviousBlockDigestMismatch)
    }
}

impl From<RecordError> for StoreError {
    fn from(error: RecordError) -> Self {
        StoreError::Record(error)
    }
}

impl From<DigestError> for StoreError {
    fn from(error: DigestError) -> Self {
        StoreError::Digest(error)
    }
}

impl From<postgres::Error> for StoreError {
    fn from(error: postgres::Error) -> Self {
        StoreError::Sql(error)
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::PreviousBlockDigestMismatch => {
                write!(f, "previous block digest does not match")
            }
            StoreError::MerkleRootMismatch => write!(f, "merkle root does not match"),
            StoreError::BlockNotFound => write!(f, "block not found"),
            StoreError::Record(error) => write!(f, "{error}"),
            StoreError::Digest(error) => write!(f, "{error}"),
            StoreError::Sql(error) => write!(f, "{error}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Owns the single database handle; every component shares one `Store`.
pub struct Store {
    chain: Chain,
    client: Mutex<postgres::Client>,
}

impl Store {
    pub fn connect(configuration: &Configuration, chain: Chain) -> Result<Self, StoreError> {
        let client =
            postgres::Client::connect(&configuration.connection_string(), postgres::NoTls)?;
        Ok(Self {
            chain,
            client: Mutex::new(client),
        })
    }

    pub fn chain(&self) -> Chain {
        self.chain
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_empty_values_vanish() {
        assert_eq!(quote("host", ""), "");
        assert_eq!(quote("", "value"), "");
    }

    #[test]
    fn quote_escapes_single_quotes() {
        assert_eq!(quote("password", "it's"), " password='it\\'s'");
    }

    #[test]
    fn connection_string_skips_unset_options() {
        let configuration = Configuration {
            database: "updaterd".to_string(),
            user: "mirror".to_string(),
            host: "db.internal".to_string(),
            ..Configuration::default()
        };
        assert_eq!(
            configuration.connection_string(),
            " dbname='updaterd' host='db.internal' user='mirror'"
        );
    }
}
