//! Core error model.
//!
//! Operations fail with one of four API kinds the gateway maps onto its
//! transport's error codes, or with a fatal `Storage` error that aborts the
//! apply loop (the replica then restores a snapshot and replays). API errors
//! carry a short message plus a context map; no stack traces. The context map
//! is a `BTreeMap` so error rendering is deterministic across replicas.

use std::collections::BTreeMap;

use rook_store::StoreError;
use snafu::Snafu;

/// Classification of a [`CoreError`], mirroring the transport error codes the
/// gateway maps onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    InvalidArgument,
    ResourceExhausted,
    /// Fatal storage or encoding failure; not returned to API callers.
    Storage,
}

/// Error returned by core operations.
#[derive(Debug, Snafu)]
pub enum CoreError {
    #[snafu(display("{message}"))]
    NotFound { message: String, context: BTreeMap<String, String> },

    #[snafu(display("{message}"))]
    AlreadyExists { message: String, context: BTreeMap<String, String> },

    #[snafu(display("{message}"))]
    InvalidArgument { message: String, context: BTreeMap<String, String> },

    #[snafu(display("{message}"))]
    ResourceExhausted { message: String, context: BTreeMap<String, String> },

    /// A storage fault outside the expected `NotFound` paths. The apply loop
    /// treats this as a programming error and aborts.
    #[snafu(display("storage failure: {source}"))]
    Storage { source: StoreError },
}

impl CoreError {
    pub fn not_found(message: &str, context: &[(&str, &str)]) -> CoreError {
        CoreError::NotFound { message: message.to_string(), context: to_map(context) }
    }

    pub fn already_exists(message: &str, context: &[(&str, &str)]) -> CoreError {
        CoreError::AlreadyExists { message: message.to_string(), context: to_map(context) }
    }

    pub fn invalid_argument(message: &str, context: &[(&str, &str)]) -> CoreError {
        CoreError::InvalidArgument { message: message.to_string(), context: to_map(context) }
    }

    pub fn resource_exhausted(message: &str, context: &[(&str, &str)]) -> CoreError {
        CoreError::ResourceExhausted { message: message.to_string(), context: to_map(context) }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::NotFound { .. } => ErrorKind::NotFound,
            CoreError::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            CoreError::InvalidArgument { .. } => ErrorKind::InvalidArgument,
            CoreError::ResourceExhausted { .. } => ErrorKind::ResourceExhausted,
            CoreError::Storage { .. } => ErrorKind::Storage,
        }
    }

    /// Context entries attached to an API error; empty for storage failures.
    pub fn context(&self) -> &BTreeMap<String, String> {
        static EMPTY: std::sync::OnceLock<BTreeMap<String, String>> = std::sync::OnceLock::new();
        match self {
            CoreError::NotFound { context, .. }
            | CoreError::AlreadyExists { context, .. }
            | CoreError::InvalidArgument { context, .. }
            | CoreError::ResourceExhausted { context, .. } => context,
            CoreError::Storage { .. } => EMPTY.get_or_init(BTreeMap::new),
        }
    }
}

impl From<StoreError> for CoreError {
    fn from(source: StoreError) -> CoreError {
        CoreError::Storage { source }
    }
}

fn to_map(context: &[(&str, &str)]) -> BTreeMap<String, String> {
    context.iter().map(|(key, value)| (key.to_string(), value.to_string())).collect()
}
