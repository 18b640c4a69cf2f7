// src/types/mod.rs - Shared value types and the error hierarchy

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that end a mass-ban run.
///
/// None of these are retried. By the time one reaches the caller the chat
/// connection has already been released.
#[derive(Debug, Error)]
pub enum MassBanError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("could not connect to #{channel}: {source}")]
    Connection {
        channel: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("endpoint {url} responded with status: {status}")]
    RemoteFetch { url: String, status: u16 },

    #[error("could not reach {url}: {source}")]
    RemoteUnreachable {
        url: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("could not read progress file {}: {source}", path.display())]
    LocalRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("progress file {} does not exist", path.display())]
    MissingProgressFile { path: PathBuf },

    #[error("command '{command}' was not accepted (possibly rate limited): {source}")]
    CommandSend {
        command: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("could not record '{name}' in {}: {source}", path.display())]
    ProgressWrite {
        name: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type MassBanResult<T> = std::result::Result<T, MassBanError>;

/// True for names Twitch could have issued as a login: ASCII letters,
/// digits and underscores only
pub fn is_valid_login(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

/// A moderation command issued once per name in a work set
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModerationAction {
    Ban { reason: String },
    Unban,
}

impl ModerationAction {
    /// Format the chat command for `name`
    pub fn command_for(&self, name: &str) -> String {
        match self {
            ModerationAction::Ban { reason } if reason.is_empty() => format!("/ban {}", name),
            ModerationAction::Ban { reason } => format!("/ban {} {}", name, reason),
            ModerationAction::Unban => format!("/unban {}", name),
        }
    }

    pub fn verb(&self) -> &'static str {
        match self {
            ModerationAction::Ban { .. } => "ban",
            ModerationAction::Unban => "unban",
        }
    }

    pub fn past_tense(&self) -> &'static str {
        match self {
            ModerationAction::Ban { .. } => "banned",
            ModerationAction::Unban => "unbanned",
        }
    }
}

/// The two reconcile-and-execute cycles a session can run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassKind {
    MassBan,
    MassUnban,
}

impl PassKind {
    /// Human readable name of the remote list this pass consumes
    pub fn list_name(&self) -> &'static str {
        match self {
            PassKind::MassBan => "ban list",
            PassKind::MassUnban => "false positives list",
        }
    }

    pub fn progress_label(&self) -> &'static str {
        match self {
            PassKind::MassBan => "Banning",
            PassKind::MassUnban => "Unbanning",
        }
    }
}

impl fmt::Display for PassKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PassKind::MassBan => write!(f, "mass-ban"),
            PassKind::MassUnban => write!(f, "mass-unban"),
        }
    }
}

/// Names still requiring action after reconciliation.
///
/// Empty entries never appear and every name appears once, in the order it
/// was first seen in the remote list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkSet {
    names: Vec<String>,
}

impl WorkSet {
    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn iter(&self) -> std::slice::Iter<'_, String> {
        self.names.iter()
    }

    pub fn into_names(self) -> Vec<String> {
        self.names
    }
}

impl From<Vec<String>> for WorkSet {
    /// Builds a work set, dropping empty entries and later duplicates
    fn from(candidates: Vec<String>) -> Self {
        let mut seen = std::collections::HashSet::new();
        let names = candidates
            .into_iter()
            .filter(|name| !name.is_empty())
            .filter(|name| seen.insert(name.clone()))
            .collect();
        Self { names }
    }
}

impl<'a> IntoIterator for &'a WorkSet {
    type Item = &'a String;
    type IntoIter = std::slice::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.names.iter()
    }
}

/// Lifecycle of a mass-ban session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unconfigured,
    Validated,
    Connected,
    BanPassDone,
    UnbanPassDone,
    Disconnected,
}

/// Commands accepted per pass during one run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionReport {
    pub banned: usize,
    pub unbanned: usize,
}
