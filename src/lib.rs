//! # Mass ban / unban for Twitch channels
//!
//! Downloads a remote list of known bad actors, diffs it against a local
//! progress file and issues one moderation command per new name, pausing
//! between commands to stay under the chat rate limit. A second pass lifts
//! bans for names on a false-positives list.
//!
//! Progress files are append-only and written before the next command is
//! sent, so an interrupted run resumes where it stopped and a repeated run
//! sends nothing new.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use massban::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let base_dir = MassBanConfig::base_dir_from_env()?;
//!     let config = MassBanConfig::resolve(base_dir, std::env::args().skip(1)).await?;
//!
//!     let twitch = TwitchConnection::new(TwitchConfig::new(&config.credentials, &config.settings));
//!     let mut session = MassBanSession::new(config, Box::new(twitch), Arc::new(HttpListSource::new()));
//!
//!     let report = session.run().await?;
//!     println!("{} banned, {} unbanned", report.banned, report.unbanned);
//!     Ok(())
//! }
//! ```

pub mod types;
pub mod config;
pub mod platforms;
pub mod bot;

// Re-export commonly used items
pub mod prelude {
    pub use crate::bot::MassBanSession;
    pub use crate::bot::executor::ThrottledExecutor;
    pub use crate::bot::progress::ProgressFile;
    pub use crate::bot::reconciler::{compute_work_set, HttpListSource, ListReconciler, ListSource, RemoteList};
    pub use crate::config::{Credentials, MassBanConfig, RunFlags, Settings};
    pub use crate::platforms::{
        ChatConnection,
        twitch::{TwitchConnection, TwitchConfig},
    };
    pub use crate::types::{
        MassBanError, MassBanResult, ModerationAction, PassKind, SessionReport, SessionState, WorkSet,
        is_valid_login,
    };
    pub use anyhow::Result;
}

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
