// src/bot/mod.rs - Mass ban/unban session controller

use log::{error, info, warn};
use std::sync::Arc;
use tokio::time::Duration;

use crate::config::MassBanConfig;
use crate::platforms::twitch::normalize_channel;
use crate::platforms::ChatConnection;
use crate::types::{MassBanError, MassBanResult, PassKind, SessionReport, SessionState};

pub mod executor;
pub mod progress;
pub mod reconciler;

use executor::ThrottledExecutor;
use progress::ProgressFile;
use reconciler::{ListReconciler, ListSource};

/// Drives one run: validate, connect, ban pass, unban pass, disconnect.
///
/// Once connected, the connection is released in exactly one place,
/// whatever the passes return.
pub struct MassBanSession {
    config: MassBanConfig,
    connection: Box<dyn ChatConnection>,
    reconciler: ListReconciler,
    executor: ThrottledExecutor,
    state: SessionState,
}

impl MassBanSession {
    pub fn new(config: MassBanConfig, connection: Box<dyn ChatConnection>, list_source: Arc<dyn ListSource>) -> Self {
        let reconciler = ListReconciler::new(list_source, config.settings.separator.clone());
        let executor = ThrottledExecutor::new(Duration::from_millis(config.settings.command_delay_ms));

        Self {
            config,
            connection,
            reconciler,
            executor,
            state: SessionState::Unconfigured,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &MassBanConfig {
        &self.config
    }

    /// Check everything that can be checked without touching the network
    pub fn validate(&mut self) -> MassBanResult<()> {
        let env_path = self.config.env_path();
        if !env_path.is_file() {
            return Err(MassBanError::Configuration(format!(
                "no {} file found in {}",
                self.config.settings.env_file.display(),
                self.config.base_dir.display()
            )));
        }

        if !self.config.credentials.is_complete() {
            return Err(MassBanError::Configuration(format!(
                "invalid credentials in {}: OAUTH_TOKEN, USERNAME and CHANNEL must all be set",
                env_path.display()
            )));
        }

        self.config.settings.validate(&self.config.flags)?;

        self.state = SessionState::Validated;
        Ok(())
    }

    /// Run every enabled pass and report how many commands were accepted
    pub async fn run(&mut self) -> MassBanResult<SessionReport> {
        self.validate()?;

        let channel = normalize_channel(&self.config.credentials.channel);
        info!("Connecting to {}...", self.connection.platform_name());
        info!("Connecting to #{} with user {}", channel, self.config.credentials.username);

        if let Err(e) = self.connection.connect().await {
            // Connect may fail half way; make sure nothing is left open
            if let Err(cleanup) = self.connection.disconnect().await {
                warn!("Cleanup after failed connect also failed: {}", cleanup);
            }
            error!("Could not connect to #{}: {:#}", channel, e);
            return Err(MassBanError::Connection {
                channel,
                source: e.into(),
            });
        }

        self.state = SessionState::Connected;
        info!("Connected!");

        let outcome = self.run_passes(&channel).await;
        self.release().await;

        match &outcome {
            Ok(report) => info!("Run complete: {} banned, {} unbanned", report.banned, report.unbanned),
            Err(e) => error!("Run aborted: {}", e),
        }
        outcome
    }

    async fn run_passes(&mut self, channel: &str) -> MassBanResult<SessionReport> {
        let mut report = SessionReport::default();

        if self.config.flags.mass_ban {
            report.banned = self.run_pass(PassKind::MassBan, channel).await?;
            self.state = SessionState::BanPassDone;
        }

        if self.config.flags.mass_unban {
            report.unbanned = self.run_pass(PassKind::MassUnban, channel).await?;
            self.state = SessionState::UnbanPassDone;
        }

        Ok(report)
    }

    async fn run_pass(&self, kind: PassKind, channel: &str) -> MassBanResult<usize> {
        let plan = self.config.pass_plan(kind)?;

        let progress = ProgressFile::new(&plan.progress_path, self.config.settings.separator.clone());
        if !progress.exists() {
            return Err(MassBanError::MissingProgressFile {
                path: plan.progress_path,
            });
        }

        info!("Acquiring {}...", kind.list_name());
        let work = self
            .reconciler
            .reconcile(&plan.list_url, progress.path(), &plan.remote_separator)
            .await?;
        info!("{} acquired!", kind.list_name());

        info!("{} {} users...", kind.progress_label(), work.len());
        self.executor
            .execute(self.connection.as_ref(), channel, &work, &plan.action, &progress)
            .await
    }

    async fn release(&mut self) {
        if let Err(e) = self.connection.disconnect().await {
            warn!("Error while disconnecting: {}", e);
        }
        self.state = SessionState::Disconnected;
        info!("Disconnected");
    }
}
