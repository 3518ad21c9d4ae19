//! Chain identities, genesis constants, and the process mode flag.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// 32-byte block identifier.
pub type Digest = [u8; 32];

/// Block number of the genesis record; real blocks start one above.
pub const GENESIS_BLOCK_NUMBER: u64 = 0;

const LIVE_GENESIS_DIGEST: Digest = [
    0x89, 0x0a, 0xd1, 0x66, 0xe5, 0x1b, 0x8b, 0x4f, 0xbf, 0xa4, 0x1e, 0x5d, 0x8d, 0x05, 0x39,
    0x7c, 0x2e, 0x10, 0xcd, 0x2b, 0x02, 0x2a, 0x17, 0xfc, 0x52, 0x9f, 0x0b, 0x9f, 0x2e, 0x13,
    0x11, 0x34,
];

const TEST_GENESIS_DIGEST: Digest = [
    0x75, 0x26, 0x27, 0x41, 0x1a, 0x27, 0xda, 0x4f, 0x5a, 0xd3, 0xde, 0x42, 0x6f, 0x1a, 0x6c,
    0x8b, 0x4c, 0x67, 0x92, 0x9d, 0x21, 0x6d, 0xc9, 0x44, 0x2e, 0x8f, 0x23, 0x0e, 0xe5, 0xb8,
    0x4b, 0xdd,
];

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Chain {
    Bitmark,
    Testing,
    Local,
}

impl Chain {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "bitmark" => Some(Self::Bitmark),
            "testing" => Some(Self::Testing),
            "local" => Some(Self::Local),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bitmark => "bitmark",
            Self::Testing => "testing",
            Self::Local => "local",
        }
    }

    /// Test chains expect the test bit in packed account keys.
    pub fn is_testing(self) -> bool {
        !matches!(self, Self::Bitmark)
    }

    pub fn genesis_digest(self) -> Digest {
        match self {
            Self::Bitmark => LIVE_GENESIS_DIGEST,
            Self::Testing | Self::Local => TEST_GENESIS_DIGEST,
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Phase {
    Stopped = 0,
    Resynchronise = 1,
    Normal = 2,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stopped => "Stopped",
            Self::Resynchronise => "Resynchronise",
            Self::Normal => "Normal",
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            2 => Self::Normal,
            1 => Self::Resynchronise,
            _ => Self::Stopped,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Process-wide operating phase.
///
/// The connector flips to `Normal` once the local tip has caught up with
/// the best peer; the subscriber only persists live blocks in `Normal`.
#[derive(Debug)]
pub struct Mode {
    chain: Chain,
    phase: AtomicU8,
}

impl Mode {
    /// Boot phase is `Resynchronise`: live block broadcasts are dropped
    /// until the first catch-up completes.
    pub fn new(chain: Chain) -> Self {
        Self {
            chain,
            phase: AtomicU8::new(Phase::Resynchronise as u8),
        }
    }

    pub fn phase(&self) -> Phase {
        Phase::from_u8(self.phase.load(Ordering::Acquire))
    }

    pub fn set(&self, phase: Phase) {
        self.phase.store(phase as u8, Ordering::Release);
    }

    pub fn is(&self, phase: Phase) -> bool {
        self.phase() == phase
    }

    pub fn chain(&self) -> Chain {
        self.chain
    }

    pub fn chain_name(&self) -> &'static str {
        self.chain.as_str()
    }

    pub fn is_testing(&self) -> bool {
        self.chain.is_testing()
    }
}
