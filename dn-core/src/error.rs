use thiserror::Error;

/// Sentinel faults reported by the storage collaborator.
///
/// The classifier switches on these tags; the display text is what ends up
/// in an error reply body, so variants that wrap engine detail keep it out of
/// the message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageFault {
    #[error("parameter mismatch")]
    ParamMismatch,

    #[error("extent not found")]
    ExtentNotFound,

    #[error("extent has been deleted")]
    ExtentDeleted,

    #[error("no space left on device")]
    NoSpace,

    #[error("disk error")]
    Disk { detail: String },

    #[error("try again")]
    TryAgain,

    #[error("not leader")]
    NotLeader,

    #[error("storage error: {0}")]
    Other(String),
}

#[derive(Error, Debug)]
pub enum DnError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid magic byte {0:#x}")]
    InvalidMagic(u8),

    #[error("ArgLenMismatchErr: declared {declared} bytes, {available} present")]
    ArgLenMismatch { declared: u32, available: usize },

    #[error("BadNodesErr: remaining followers {0}")]
    BadNodes(i8),

    #[error("unknown opcode {0:#x}")]
    UnknownOpcode(u8),

    #[error("Payload too large: {0} bytes exceeds maximum")]
    PayloadTooLarge(usize),

    #[error("CRC mismatch: expected {expected:#x}, got {actual:#x}")]
    CrcMismatch { expected: u32, actual: u32 },

    #[error(transparent)]
    Storage(#[from] StorageFault),

    #[error("ConnIsNullErr: no connection to follower {0}")]
    ConnIsNull(String),

    #[error("Connection pool exhausted")]
    PoolExhausted,

    #[error("Connection pool is draining")]
    PoolDraining,

    #[error("Follower {addr} replied with result code {code:#x}")]
    FollowerReply {
        addr: String,
        code: u8,
        message: String,
    },

    #[error("Follower {addr} answered request {actual}, expected {expected}")]
    ReqIdMismatch {
        addr: String,
        expected: i64,
        actual: i64,
    },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl DnError {
    /// An I/O fault of kind `TimedOut`, used when a read deadline expires.
    pub fn timed_out(what: &str) -> Self {
        Self::Io(std::io::Error::new(std::io::ErrorKind::TimedOut, what.to_owned()))
    }

    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Io(e) if e.kind() == std::io::ErrorKind::TimedOut)
    }

    /// True when the peer closed the stream before a full header arrived.
    #[must_use]
    pub fn is_eof(&self) -> bool {
        matches!(self, Self::Io(e) if e.kind() == std::io::ErrorKind::UnexpectedEof)
    }
}

pub type Result<T> = std::result::Result<T, DnError>;
