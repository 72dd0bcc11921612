// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error taxonomy for the position persistence core.

use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by position stores, the buffer manager, and checkpoints.
///
/// Background loops log and swallow these; synchronous calls return the
/// first error encountered. Nothing here is allowed to panic on I/O
/// failure.
#[derive(Debug, Error)]
pub enum PositionError {
    /// State file exists but cannot be read or parsed. Recoverable via
    /// checkpoint restore.
    #[error("corrupt state file {path}: {reason}")]
    CorruptState { path: PathBuf, reason: String },

    /// I/O failure while persisting a state file. The caller logs it and
    /// retries on the next flush cycle.
    #[error("failed to persist {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The in-memory cap was hit and the emergency flush did not free the
    /// update; the mutation was dropped.
    #[error("position memory cap reached ({limit}), update dropped")]
    MemoryCapReached { limit: usize },

    /// Mutating call after stop()
    #[error("position tracker is shut down")]
    Shutdown,

    /// No checkpoint could be restored
    #[error("checkpoint restore failed: {0}")]
    CheckpointCorrupt(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("metrics registration error: {0}")]
    Metrics(#[from] prometheus::Error),
}
