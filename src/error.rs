//! Error types for the edgequake-vqa library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * **Fatal** ([`VqaError`]): the run cannot produce an answer (a locator
//!   could not be downloaded, an image could not be decoded, the model call
//!   failed). Any of these short-circuits the remaining stages of the run.
//!
//! * **Non-fatal** ([`CleanupWarning`]): a temporary artifact could not be
//!   removed. It is logged and collected in [`crate::agent::RunReport`], but
//!   never aborts anything and never reaches the caller as an `Err`.

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors raised inside an image-question run.
#[derive(Debug, Error)]
pub enum VqaError {
    // ── Pipeline errors ───────────────────────────────────────────────────
    /// Transport failure or non-success status while fetching a locator.
    #[error("Failed to retrieve '{locator}': {reason}")]
    Retrieval { locator: String, reason: String },

    /// Image metadata or pixels could not be read.
    #[error("Cannot decode image '{path}': {detail}")]
    Decode { path: PathBuf, detail: String },

    /// The model call failed or returned nothing usable.
    #[error("Inference failed: {message}")]
    Inference { message: String },

    // ── Input errors ──────────────────────────────────────────────────────
    /// The invocation context is unusable (e.g. no image locators).
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error (scratch I/O, task join failure).
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Stable, serialisable classification of a [`VqaError`].
///
/// Used in the *failed* event and in log records so hosts can branch on the
/// failure category without parsing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Retrieval,
    Decode,
    Inference,
    InvalidInput,
    Config,
    Internal,
}

impl VqaError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            VqaError::Retrieval { .. } => ErrorKind::Retrieval,
            VqaError::Decode { .. } => ErrorKind::Decode,
            VqaError::Inference { .. } => ErrorKind::Inference,
            VqaError::InvalidInput(_) => ErrorKind::InvalidInput,
            VqaError::InvalidConfig(_) | VqaError::ProviderNotConfigured { .. } => {
                ErrorKind::Config
            }
            VqaError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub(crate) fn retrieval(locator: &str, reason: impl fmt::Display) -> Self {
        VqaError::Retrieval {
            locator: locator.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Retrieval => "retrieval",
            ErrorKind::Decode => "decode",
            ErrorKind::Inference => "inference",
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::Config => "config",
            ErrorKind::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// A temporary artifact that could not be removed during cleanup.
///
/// Collected in [`crate::agent::RunReport::cleanup_warnings`]; cleanup
/// continues with the remaining artifacts.
#[derive(Debug, Clone, Error, Serialize)]
#[error("Could not remove temporary artifact '{path}': {reason}")]
pub struct CleanupWarning {
    pub path: PathBuf,
    pub reason: String,
}
