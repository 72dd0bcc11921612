// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Position records persisted by the agent.
//!
//! Field names are load-bearing: the on-disk JSON schema must stay
//! interchange-compatible with state files written by already-deployed
//! agents, so renames here are breaking changes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Lifecycle status of a tailed file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Active,
    Stopped,
    Removed,
    Deleted,
}

impl FileStatus {
    /// Statuses eligible for TTL cleanup
    pub fn is_terminal(&self) -> bool {
        matches!(self, FileStatus::Removed | FileStatus::Deleted)
    }
}

impl std::fmt::Display for FileStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileStatus::Active => write!(f, "active"),
            FileStatus::Stopped => write!(f, "stopped"),
            FileStatus::Removed => write!(f, "removed"),
            FileStatus::Deleted => write!(f, "deleted"),
        }
    }
}

/// Lifecycle status of a tailed container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    Active,
    Stopped,
    Restarted,
    Removed,
}

impl std::fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContainerStatus::Active => write!(f, "active"),
            ContainerStatus::Stopped => write!(f, "stopped"),
            ContainerStatus::Restarted => write!(f, "restarted"),
            ContainerStatus::Removed => write!(f, "removed"),
        }
    }
}

/// Resume bookmark for a rotating log file.
///
/// Identity is the absolute path. The `(inode, device)` pair is what the
/// reader last observed from stat; a change of pair means the path now
/// points at a different file (rotation).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilePosition {
    pub file_path: PathBuf,
    /// Bytes consumed from the current stream
    pub offset: u64,
    /// File size at last observation
    pub size: u64,
    pub last_modified: DateTime<Utc>,
    pub last_read: DateTime<Utc>,
    pub inode: u64,
    pub device: u64,
    #[serde(default)]
    pub log_count: u64,
    #[serde(default)]
    pub bytes_read: u64,
    pub status: FileStatus,
}

/// Resume bookmark for a container stdout/stderr stream.
///
/// Containers have no byte offsets; resumption is by timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerPosition {
    pub container_id: String,
    /// UTC instant from which reading should resume
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,
    pub last_read: DateTime<Utc>,
    /// Timestamp of the newest log line observed
    #[serde(default)]
    pub last_log_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub log_count: u64,
    #[serde(default)]
    pub bytes_read: u64,
    pub status: ContainerStatus,
    #[serde(default)]
    pub restart_count: u32,
}

#[cfg(test)]
#[path = "position_tests.rs"]
mod tests;
