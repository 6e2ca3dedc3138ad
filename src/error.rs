//! Error types for the OSD agent
//!
//! Provides structured error types for store access, cluster admin
//! operations, OSD provisioning, process supervision and removal.

use thiserror::Error;

/// Unified error type for the agent
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Store Errors
    // =========================================================================
    #[error("Key not found: {key}")]
    KeyNotFound { key: String },

    #[error("Store operation failed on {key}: {reason}")]
    Store { key: String, reason: String },

    // =========================================================================
    // Cluster Admin Errors
    // =========================================================================
    #[error("Cluster connection failed: {0}")]
    Connection(String),

    #[error("OSD registration failed: {0}")]
    Registration(String),

    #[error("Failed to mark out osd {osd_id}: {reason}")]
    MarkOut { osd_id: u32, reason: String },

    #[error("Failed to purge osd {osd_id} from the crush map: {reason}")]
    Purge { osd_id: u32, reason: String },

    #[error("Command failed: {command} - {reason}")]
    Command { command: String, reason: String },

    // =========================================================================
    // Provisioning Errors
    // =========================================================================
    #[error("Failed to format device {device}: {reason}")]
    Format { device: String, reason: String },

    #[error("Failed to initialize OSD at {path}: {reason}")]
    Initialization { path: String, reason: String },

    #[error("Failed to read OSD information from {path}: {reason}")]
    OsdInfo { path: String, reason: String },

    // =========================================================================
    // Process Errors
    // =========================================================================
    #[error("Failed to run osd {osd_id}: {reason}")]
    Launch { osd_id: u32, reason: String },

    #[error("Failed to stop process {name}: {reason}")]
    ProcessStop { name: String, reason: String },

    // =========================================================================
    // Parse/IO Errors
    // =========================================================================
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse classification used to decide how far a failure propagates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Store unreachable or misbehaving; aborts the current pass or step
    StoreAccess,
    /// Cluster unreachable; aborts the current pass
    ClusterAccess,
    /// Registration, formatting, initialization or directory creation
    SlotProvisioning,
    /// Launching the daemon; the slot can be retried on the resume path
    Launch,
    /// Mark-out, stop, purge or applied-record deletion
    Removal,
    /// Anything else
    Internal,
}

impl Error {
    /// Classify this error
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::KeyNotFound { .. } | Error::Store { .. } => ErrorClass::StoreAccess,
            Error::Connection(_) => ErrorClass::ClusterAccess,
            Error::Registration(_)
            | Error::Format { .. }
            | Error::Initialization { .. }
            | Error::OsdInfo { .. }
            | Error::Io(_) => ErrorClass::SlotProvisioning,
            Error::Launch { .. } => ErrorClass::Launch,
            Error::MarkOut { .. } | Error::Purge { .. } | Error::ProcessStop { .. } => {
                ErrorClass::Removal
            }
            Error::Command { .. }
            | Error::Internal(_)
            | Error::Configuration(_)
            | Error::JsonParse(_) => ErrorClass::Internal,
        }
    }

    /// Check if this error means the key simply does not exist
    pub fn is_key_not_found(&self) -> bool {
        matches!(self, Error::KeyNotFound { .. })
    }

    /// Check if this error only affects a single slot or OSD id
    pub fn is_slot_local(&self) -> bool {
        matches!(
            self.class(),
            ErrorClass::SlotProvisioning | ErrorClass::Launch | ErrorClass::Removal
        )
    }

    /// Shorthand for a store failure on `key`
    pub fn store(key: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Error::Store {
            key: key.into(),
            reason: reason.to_string(),
        }
    }
}

/// Result type alias for the agent
pub type Result<T> = std::result::Result<T, Error>;
