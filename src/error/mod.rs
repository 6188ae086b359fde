//! Error handling for the node
//!
//! `BlockchainError` covers every fallible operation in the crate.
//! `ValidationError` is the consensus taxonomy: each variant rejects the
//! block (or transaction) under evaluation as a whole.

use std::fmt;

/// Result type alias for node operations
pub type Result<T> = std::result::Result<T, BlockchainError>;

/// Reasons a block or transaction fails consensus validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Block number is not parent number + 1 (or 0 for the first block)
    InvalidBlockNumber { expected: u64, found: u64 },
    /// Block does not link to the hash of the current tip
    InvalidParent,
    /// Block hash does not carry enough leading zero bits
    InvalidProofOfWork { required: u32, found: u32 },
    /// Sender cannot cover the transferred amount
    InsufficientBalance { required: u64, available: u64 },
    /// Transaction nonce is not exactly the sender's next nonce
    InvalidNonce { expected: u64, found: u64 },
    /// Signature does not verify against the sender address
    InvalidSignature,
}

/// Stable discriminant for callers that only care about the class of failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValidationErrorKind {
    InvalidBlockNumber,
    InvalidParent,
    InvalidProofOfWork,
    InsufficientBalance,
    InvalidNonce,
    InvalidSignature,
}

impl ValidationError {
    pub fn kind(&self) -> ValidationErrorKind {
        match self {
            ValidationError::InvalidBlockNumber { .. } => ValidationErrorKind::InvalidBlockNumber,
            ValidationError::InvalidParent => ValidationErrorKind::InvalidParent,
            ValidationError::InvalidProofOfWork { .. } => ValidationErrorKind::InvalidProofOfWork,
            ValidationError::InsufficientBalance { .. } => {
                ValidationErrorKind::InsufficientBalance
            }
            ValidationError::InvalidNonce { .. } => ValidationErrorKind::InvalidNonce,
            ValidationError::InvalidSignature => ValidationErrorKind::InvalidSignature,
        }
    }

    /// Errors that can only come from a forged or corrupted block.
    ///
    /// A stale block (wrong number or parent) is expected during forks; the
    /// rest mean somebody produced a block that no honest miner would.
    pub fn is_malicious(&self) -> bool {
        !matches!(
            self,
            ValidationError::InvalidBlockNumber { .. } | ValidationError::InvalidParent
        )
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::InvalidBlockNumber { expected, found } => {
                write!(f, "Invalid block number: expected {expected}, found {found}")
            }
            ValidationError::InvalidParent => write!(f, "Invalid parent hash"),
            ValidationError::InvalidProofOfWork { required, found } => write!(
                f,
                "Invalid proof of work: required {required} leading zero bits, found {found}"
            ),
            ValidationError::InsufficientBalance {
                required,
                available,
            } => write!(
                f,
                "Insufficient balance: required {required}, available {available}"
            ),
            ValidationError::InvalidNonce { expected, found } => {
                write!(f, "Invalid nonce: expected {expected}, found {found}")
            }
            ValidationError::InvalidSignature => write!(f, "Invalid signature"),
        }
    }
}

impl std::error::Error for ValidationError {}

/// Comprehensive error types for node operations
#[derive(Debug, Clone)]
pub enum BlockchainError {
    /// Database-related errors
    Database(String),
    /// Cryptographic operation errors
    Crypto(String),
    /// Network communication errors
    Network(String),
    /// Local socket failed to hand a datagram to the OS
    Delivery(String),
    /// Serialization/deserialization errors
    Serialization(String),
    /// Configuration errors
    Config(String),
    /// File I/O errors
    Io(String),
    /// Wallet operation errors
    Wallet(String),
    /// Invalid address format
    InvalidAddress(String),
    /// Consensus validation errors
    Validation(ValidationError),
    /// Mining errors
    Mining(String),
}

impl fmt::Display for BlockchainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockchainError::Database(msg) => write!(f, "Database error: {msg}"),
            BlockchainError::Crypto(msg) => write!(f, "Cryptographic error: {msg}"),
            BlockchainError::Network(msg) => write!(f, "Network error: {msg}"),
            BlockchainError::Delivery(msg) => write!(f, "Delivery error: {msg}"),
            BlockchainError::Serialization(msg) => write!(f, "Serialization error: {msg}"),
            BlockchainError::Config(msg) => write!(f, "Configuration error: {msg}"),
            BlockchainError::Io(msg) => write!(f, "I/O error: {msg}"),
            BlockchainError::Wallet(msg) => write!(f, "Wallet error: {msg}"),
            BlockchainError::InvalidAddress(addr) => write!(f, "Invalid address: {addr}"),
            BlockchainError::Validation(err) => write!(f, "Validation error: {err}"),
            BlockchainError::Mining(msg) => write!(f, "Mining error: {msg}"),
        }
    }
}

impl std::error::Error for BlockchainError {}

impl From<ValidationError> for BlockchainError {
    fn from(err: ValidationError) -> Self {
        BlockchainError::Validation(err)
    }
}

impl From<std::io::Error> for BlockchainError {
    fn from(err: std::io::Error) -> Self {
        BlockchainError::Io(err.to_string())
    }
}

impl From<sled::Error> for BlockchainError {
    fn from(err: sled::Error) -> Self {
        BlockchainError::Database(err.to_string())
    }
}

impl From<bincode::error::EncodeError> for BlockchainError {
    fn from(err: bincode::error::EncodeError) -> Self {
        BlockchainError::Serialization(err.to_string())
    }
}

impl From<bincode::error::DecodeError> for BlockchainError {
    fn from(err: bincode::error::DecodeError) -> Self {
        BlockchainError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for BlockchainError {
    fn from(err: serde_json::Error) -> Self {
        BlockchainError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for BlockchainError {
    fn from(err: toml::de::Error) -> Self {
        BlockchainError::Config(err.to_string())
    }
}
