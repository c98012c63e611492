//! Unified error handling for the crawl-lease crate
//!
//! Every fallible operation in the library returns [`Result`], whose error
//! type is the single [`Error`] enum below. The variants map onto how callers
//! are expected to react:
//!
//! - [`Error::ClaimLost`] and [`Error::VersionConflict`] are expected races,
//!   recovered locally with a bounded re-read and retry.
//! - [`Error::StoreUnavailable`] means the catalog or frontier store could not
//!   be reached. Callers must stop treating a claimed domain as owned.
//! - [`Error::CheckpointCorrupt`] falls back to a fresh crawl from the root.
//! - [`Error::InvalidTransition`] is a contract violation and is never retried.
//!
//! # Usage
//!
//! ```rust,ignore
//! use crawl_lease::error::{Error, ErrorCategory};
//!
//! fn handle(err: Error) {
//!     if err.is_recoverable() {
//!         tracing::warn!(category = %err.category(), "retrying: {err}");
//!     } else {
//!         tracing::error!("fatal: {err}");
//!     }
//! }
//! ```

use std::fmt;
use std::io;
use thiserror::Error;
use uuid::Uuid;

use crate::models::DomainStatus;

/// Which shared store an operation was talking to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreKind {
    /// Transactional domain catalog (PostgreSQL)
    Catalog,
    /// Low-latency frontier checkpoint store (Redis)
    Frontier,
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Catalog => write!(f, "catalog"),
            Self::Frontier => write!(f, "frontier"),
        }
    }
}

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Lost leases and optimistic-concurrency conflicts
    Concurrency,
    /// Store connectivity and query failures
    Storage,
    /// Malformed frontier checkpoints
    Checkpoint,
    /// Programming-contract violations
    Contract,
    /// Bad operator or seed input
    Input,
    /// Configuration and validation errors
    Config,
    /// Everything else
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Concurrency => "concurrency",
            Self::Storage => "storage",
            Self::Checkpoint => "checkpoint",
            Self::Contract => "contract",
            Self::Input => "input",
            Self::Config => "config",
            Self::Internal => "internal",
        };
        f.write_str(name)
    }
}

/// Unified error type for the crawl-lease crate
#[derive(Error, Debug)]
pub enum Error {
    /// Requested status change is not in the lifecycle table
    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition { from: DomainStatus, to: DomainStatus },

    /// The lease on a domain is no longer held by this worker
    #[error("claim on domain {domain_id} is no longer held by {worker_id}")]
    ClaimLost { domain_id: Uuid, worker_id: String },

    /// Optimistic version check failed
    #[error("version conflict on domain {domain_id}: expected {expected}, found {actual}")]
    VersionConflict {
        domain_id: Uuid,
        expected: i64,
        actual: i64,
    },

    /// A shared store could not be reached or rejected the request
    #[error("{store} store unavailable: {reason}")]
    StoreUnavailable { store: StoreKind, reason: String },

    /// Frontier checkpoint entries could not be decoded
    #[error("checkpoint {checkpoint_id} is corrupt: {reason}")]
    CheckpointCorrupt {
        checkpoint_id: String,
        reason: String,
    },

    /// No domain with the given name or id
    #[error("domain not found: {0}")]
    DomainNotFound(String),

    /// Raw domain input could not be canonicalized
    #[error("invalid domain {input:?}: {reason}")]
    InvalidDomain { input: String, reason: String },

    /// A destructive operator action was requested without confirmation
    #[error("confirmation required: {0}")]
    ConfirmationRequired(String),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{context}")]
    Other {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl Error {
    /// Check if this error is recoverable (the caller may retry or degrade)
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::ClaimLost { .. }
            | Self::VersionConflict { .. }
            | Self::StoreUnavailable { .. }
            | Self::CheckpointCorrupt { .. } => true,
            Self::Io(_) => true,
            Self::InvalidTransition { .. }
            | Self::DomainNotFound(_)
            | Self::InvalidDomain { .. }
            | Self::ConfirmationRequired(_)
            | Self::Config(_)
            | Self::Json(_)
            | Self::Other { .. } => false,
        }
    }

    /// Get the error category for handling strategies
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::ClaimLost { .. } | Self::VersionConflict { .. } => ErrorCategory::Concurrency,
            Self::StoreUnavailable { .. } | Self::Io(_) => ErrorCategory::Storage,
            Self::CheckpointCorrupt { .. } => ErrorCategory::Checkpoint,
            Self::InvalidTransition { .. } => ErrorCategory::Contract,
            Self::DomainNotFound(_) | Self::InvalidDomain { .. } | Self::ConfirmationRequired(_) => {
                ErrorCategory::Input
            }
            Self::Config(_) => ErrorCategory::Config,
            Self::Json(_) | Self::Other { .. } => ErrorCategory::Internal,
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a catalog store error
    pub fn catalog_unavailable(reason: impl fmt::Display) -> Self {
        Self::StoreUnavailable {
            store: StoreKind::Catalog,
            reason: reason.to_string(),
        }
    }

    /// Create a frontier store error
    pub fn frontier_unavailable(reason: impl fmt::Display) -> Self {
        Self::StoreUnavailable {
            store: StoreKind::Frontier,
            reason: reason.to_string(),
        }
    }

    /// Create an invalid domain error
    pub fn invalid_domain(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidDomain {
            input: input.into(),
            reason: reason.into(),
        }
    }

    /// Create a generic error with context
    pub fn other(context: impl Into<String>) -> Self {
        Self::Other {
            context: context.into(),
            source: None,
        }
    }

    /// Create a generic error with context and source
    pub fn with_source(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Other {
            context: context.into(),
            source: Some(Box::new(source)),
        }
    }
}

impl From<tokio_postgres::Error> for Error {
    fn from(err: tokio_postgres::Error) -> Self {
        Self::catalog_unavailable(err)
    }
}

impl From<deadpool_postgres::PoolError> for Error {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        Self::catalog_unavailable(err)
    }
}

impl From<redis::RedisError> for Error {
    fn from(err: redis::RedisError) -> Self {
        Self::frontier_unavailable(err)
    }
}

impl From<deadpool_redis::PoolError> for Error {
    fn from(err: deadpool_redis::PoolError) -> Self {
        Self::frontier_unavailable(err)
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other {
            context: err.to_string(),
            source: None,
        }
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;
