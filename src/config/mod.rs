// src/config/mod.rs - Settings file, credentials and run flags

use anyhow::{Context, Result};
use log::{debug, info, warn};
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use tokio::fs;
use url::Url;

use crate::types::{MassBanError, MassBanResult, ModerationAction, PassKind};

/// Name of the optional settings file inside the base directory
pub const SETTINGS_FILE: &str = "massban.toml";

/// Environment variable pointing at the base directory
pub const HOME_VAR: &str = "MASSBAN_HOME";

/// Tunables read from `massban.toml`. Every key is optional.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Key-value file holding OAUTH_TOKEN, USERNAME and CHANNEL
    pub env_file: PathBuf,

    /// Separator used by progress files and the ban list
    pub separator: String,
    pub false_positives_separator: String,

    /// Pause before every moderation command
    pub command_delay_ms: u64,
    pub response_timeout_ms: u64,
    pub connect_timeout_ms: u64,

    /// Value a run flag takes when its argument is absent
    pub default_flag: bool,

    pub banned_users_list: PathBuf,
    pub unbanned_users_list: PathBuf,

    pub ban_list_url: Option<String>,
    pub false_positives_url: Option<String>,

    pub ban_reason: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            env_file: PathBuf::from(".env"),
            separator: "\r\n".to_string(),
            false_positives_separator: "\n".to_string(),
            command_delay_ms: 500,
            response_timeout_ms: 3000,
            connect_timeout_ms: 10_000,
            default_flag: true,
            banned_users_list: PathBuf::from("banned-users.txt"),
            unbanned_users_list: PathBuf::from("unbanned-users.txt"),
            ban_list_url: None,
            false_positives_url: None,
            ban_reason: "Known bot".to_string(),
        }
    }
}

impl Settings {
    /// Load settings from `path`, falling back to defaults when it is absent
    pub async fn load<P: AsRef<Path>>(path: P) -> MassBanResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!("No settings file at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).await.map_err(|e| {
            MassBanError::Configuration(format!("failed to read settings file {}: {}", path.display(), e))
        })?;
        let settings: Settings = toml::from_str(&content).map_err(|e| {
            MassBanError::Configuration(format!("failed to parse settings file {}: {}", path.display(), e))
        })?;

        info!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    /// Let the environment override the remote list locations
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = env::var("BAN_LIST_URL") {
            self.ban_list_url = Some(url);
        }
        if let Ok(url) = env::var("FALSE_POSITIVES_LIST_URL") {
            self.false_positives_url = Some(url);
        }
    }

    /// Check the settings needed for the passes that `flags` enable
    pub fn validate(&self, flags: &RunFlags) -> MassBanResult<()> {
        if self.separator.is_empty() || self.false_positives_separator.is_empty() {
            return Err(MassBanError::Configuration("list separators must not be empty".to_string()));
        }

        if flags.mass_ban {
            validate_url("ban_list_url", self.ban_list_url.as_deref())?;
        }
        if flags.mass_unban {
            validate_url("false_positives_url", self.false_positives_url.as_deref())?;
        }

        Ok(())
    }
}

fn validate_url(key: &str, value: Option<&str>) -> MassBanResult<()> {
    let value = value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| MassBanError::Configuration(format!("{} is not set", key)))?;

    Url::parse(value)
        .map(|_| ())
        .map_err(|e| MassBanError::Configuration(format!("{} '{}' is not a valid URL: {}", key, value, e)))
}

/// Channel, bot account and token used to log in
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub channel: String,
    pub username: String,
    pub oauth_token: String,
}

impl Credentials {
    /// Read credentials from the process environment.
    ///
    /// Missing variables become empty strings; completeness is checked by
    /// the session before it connects.
    pub fn from_env() -> Self {
        Self {
            channel: env::var("CHANNEL").unwrap_or_default(),
            username: env::var("USERNAME").unwrap_or_default(),
            oauth_token: env::var("OAUTH_TOKEN").unwrap_or_default(),
        }
    }

    pub fn is_complete(&self) -> bool {
        !self.channel.trim().is_empty()
            && !self.username.trim().is_empty()
            && !self.oauth_token.trim().is_empty()
    }
}

// Keep the token out of logs
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("channel", &self.channel)
            .field("username", &self.username)
            .field("oauth_token", &"<redacted>")
            .finish()
    }
}

/// Which passes a run performs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunFlags {
    pub mass_ban: bool,
    pub mass_unban: bool,
}

impl RunFlags {
    /// Positional argument index of the mass-ban flag
    pub const MASS_BAN_ARG: usize = 0;
    /// Positional argument index of the mass-unban flag
    pub const MASS_UNBAN_ARG: usize = 1;

    /// Parse flags from program arguments (program name already stripped)
    pub fn from_args<I, S>(args: I, default_flag: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let args: Vec<S> = args.into_iter().collect();
        let flag = |index: usize| is_flag_true(args.get(index).map(|a| a.as_ref()), default_flag);

        Self {
            mass_ban: flag(Self::MASS_BAN_ARG),
            mass_unban: flag(Self::MASS_UNBAN_ARG),
        }
    }
}

/// `true` (any case) enables, anything else disables, absence takes the default
pub fn is_flag_true(arg: Option<&str>, default_flag: bool) -> bool {
    match arg {
        None => default_flag,
        Some(value) => value.eq_ignore_ascii_case("true"),
    }
}

/// Everything one pass needs to know about its inputs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassPlan {
    pub kind: PassKind,
    pub action: ModerationAction,
    pub list_url: String,
    pub remote_separator: String,
    pub progress_path: PathBuf,
}

/// Explicit configuration value handed to the session at construction
#[derive(Debug, Clone)]
pub struct MassBanConfig {
    pub base_dir: PathBuf,
    pub settings: Settings,
    pub credentials: Credentials,
    pub flags: RunFlags,
}

impl MassBanConfig {
    pub fn new(base_dir: PathBuf, settings: Settings, credentials: Credentials, flags: RunFlags) -> Self {
        Self {
            base_dir,
            settings,
            credentials,
            flags,
        }
    }

    /// Resolve configuration from the base directory, its `.env` file, the
    /// environment and the program arguments
    pub async fn resolve<I, S>(base_dir: PathBuf, args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut settings = Settings::load(base_dir.join(SETTINGS_FILE)).await?;

        let env_path = base_dir.join(&settings.env_file);
        match dotenv::from_path(&env_path) {
            Ok(()) => debug!("Loaded environment from {}", env_path.display()),
            Err(e) => warn!("Could not load {}: {}", env_path.display(), e),
        }

        settings.apply_env_overrides();
        let flags = RunFlags::from_args(args, settings.default_flag);
        let credentials = Credentials::from_env();

        Ok(Self::new(base_dir, settings, credentials, flags))
    }

    /// Base directory from `MASSBAN_HOME`, else the working directory
    pub fn base_dir_from_env() -> Result<PathBuf> {
        match env::var_os(HOME_VAR) {
            Some(dir) => Ok(PathBuf::from(dir)),
            None => env::current_dir().context("Failed to determine the current directory"),
        }
    }

    pub fn env_path(&self) -> PathBuf {
        self.base_dir.join(&self.settings.env_file)
    }

    pub fn progress_path(&self, kind: PassKind) -> PathBuf {
        match kind {
            PassKind::MassBan => self.base_dir.join(&self.settings.banned_users_list),
            PassKind::MassUnban => self.base_dir.join(&self.settings.unbanned_users_list),
        }
    }

    /// Build the plan for `kind`; fails when its list URL is not configured
    pub fn pass_plan(&self, kind: PassKind) -> MassBanResult<PassPlan> {
        let (url, remote_separator, action) = match kind {
            PassKind::MassBan => (
                self.settings.ban_list_url.as_ref(),
                &self.settings.separator,
                ModerationAction::Ban {
                    reason: self.settings.ban_reason.clone(),
                },
            ),
            PassKind::MassUnban => (
                self.settings.false_positives_url.as_ref(),
                &self.settings.false_positives_separator,
                ModerationAction::Unban,
            ),
        };

        let list_url = url
            .cloned()
            .ok_or_else(|| MassBanError::Configuration(format!("no list URL configured for the {} pass", kind)))?;

        Ok(PassPlan {
            kind,
            action,
            list_url,
            remote_separator: remote_separator.clone(),
            progress_path: self.progress_path(kind),
        })
    }
}
