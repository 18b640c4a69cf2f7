// src/bot/executor.rs - Sequential, rate-limited moderation commands

use log::{debug, error, info, warn};
use tokio::time::{sleep, Duration};

use crate::bot::progress::ProgressFile;
use crate::platforms::ChatConnection;
use crate::types::{is_valid_login, MassBanError, MassBanResult, ModerationAction, WorkSet};

/// Sends one command per name with a fixed pause before each.
///
/// Commands are never in flight concurrently. The first refused command
/// aborts the pass; nothing after it is attempted. Names that are not
/// valid logins are skipped and never recorded.
#[derive(Debug, Clone)]
pub struct ThrottledExecutor {
    delay: Duration,
}

impl ThrottledExecutor {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Action every name in `work` and return how many were accepted
    pub async fn execute(
        &self,
        connection: &dyn ChatConnection,
        channel: &str,
        work: &WorkSet,
        action: &ModerationAction,
        progress: &ProgressFile,
    ) -> MassBanResult<usize> {
        let mut completed = 0;

        for name in work {
            if !is_valid_login(name) {
                warn!("Skipping {:?}: not a valid login", name);
                continue;
            }

            sleep(self.delay).await;

            let command = action.command_for(name);
            if let Err(e) = connection.say(channel, &command).await {
                error!("'{}' failed after {} of {} users: {:#}", command, completed, work.len(), e);
                return Err(MassBanError::CommandSend {
                    command,
                    source: e.into(),
                });
            }

            progress.append(name)?;
            completed += 1;
            debug!("{} {} ({}/{})", action.verb(), name, completed, work.len());
        }

        info!("Finished: {} users {}", completed, action.past_tense());
        Ok(completed)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tempfile::tempdir;
    use tokio::time::Instant;

    /// Chat connection double that records every message it is asked to send
    #[derive(Default, Clone)]
    pub(crate) struct RecordingConnection {
        pub(crate) sent: Arc<Mutex<Vec<(String, String, Instant)>>>,
        pub(crate) connects: Arc<AtomicUsize>,
        pub(crate) disconnects: Arc<AtomicUsize>,
        pub(crate) fail_on: Option<String>,
        pub(crate) refuse_connect: bool,
    }

    impl RecordingConnection {
        pub(crate) fn failing_on(message: &str) -> Self {
            Self {
                fail_on: Some(message.to_string()),
                ..Self::default()
            }
        }

        pub(crate) fn messages(&self) -> Vec<String> {
            self.sent.lock().unwrap().iter().map(|(_, message, _)| message.clone()).collect()
        }

        pub(crate) fn disconnect_count(&self) -> usize {
            self.disconnects.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ChatConnection for RecordingConnection {
        async fn connect(&mut self) -> Result<()> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            if self.refuse_connect {
                return Err(anyhow!("You got rate limited!"));
            }
            Ok(())
        }

        async fn say(&self, channel: &str, message: &str) -> Result<()> {
            self.sent
                .lock()
                .unwrap()
                .push((channel.to_string(), message.to_string(), Instant::now()));
            if self.fail_on.as_deref() == Some(message) {
                return Err(anyhow!("msg_ratelimit"));
            }
            Ok(())
        }

        async fn disconnect(&mut self) -> Result<()> {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn platform_name(&self) -> &str {
            "test"
        }

        async fn is_connected(&self) -> bool {
            self.connects.load(Ordering::SeqCst) > self.disconnects.load(Ordering::SeqCst)
        }
    }

    fn work(names: &[&str]) -> WorkSet {
        WorkSet::from(names.iter().map(|n| n.to_string()).collect::<Vec<_>>())
    }

    #[tokio::test]
    async fn test_execute_bans_and_records_progress() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("banned-users.txt");
        std::fs::write(&path, "").unwrap();
        let progress = ProgressFile::new(&path, "\r\n");

        let connection = RecordingConnection::default();
        let executor = ThrottledExecutor::new(Duration::from_millis(1));
        let action = ModerationAction::Ban {
            reason: "Known bot".to_string(),
        };

        let done = executor
            .execute(&connection, "somechannel", &work(&["alice", "BOT1"]), &action, &progress)
            .await
            .unwrap();

        assert_eq!(done, 2);
        assert_eq!(connection.messages(), ["/ban alice Known bot", "/ban BOT1 Known bot"]);
        assert!(connection.sent.lock().unwrap().iter().all(|(channel, _, _)| channel == "somechannel"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "alice\r\nBOT1\r\n");
    }

    #[tokio::test]
    async fn test_execute_waits_between_commands() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("unbanned-users.txt");
        std::fs::write(&path, "").unwrap();
        let progress = ProgressFile::new(&path, "\r\n");

        let connection = RecordingConnection::default();
        let delay = Duration::from_millis(25);
        let executor = ThrottledExecutor::new(delay);

        let started = Instant::now();
        executor
            .execute(&connection, "somechannel", &work(&["a", "b", "c"]), &ModerationAction::Unban, &progress)
            .await
            .unwrap();

        let sent = connection.sent.lock().unwrap();
        assert_eq!(sent.len(), 3);
        // The pause also comes before the very first command
        assert!(sent[0].2.duration_since(started) >= delay);
        for pair in sent.windows(2) {
            assert!(pair[1].2.duration_since(pair[0].2) >= delay);
        }
    }

    #[test_log::test(tokio::test)]
    async fn test_first_failure_aborts_the_pass() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("banned-users.txt");
        std::fs::write(&path, "").unwrap();
        let progress = ProgressFile::new(&path, "\r\n");

        let connection = RecordingConnection::failing_on("/ban b Known bot");
        let executor = ThrottledExecutor::new(Duration::from_millis(1));
        let action = ModerationAction::Ban {
            reason: "Known bot".to_string(),
        };

        let err = executor
            .execute(&connection, "somechannel", &work(&["a", "b", "c"]), &action, &progress)
            .await
            .unwrap_err();

        assert!(matches!(err, MassBanError::CommandSend { ref command, .. } if command == "/ban b Known bot"));
        assert_eq!(connection.messages(), ["/ban a Known bot", "/ban b Known bot"]);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "a\r\n");
    }

    #[tokio::test]
    async fn test_invalid_logins_never_reach_chat() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("banned-users.txt");
        std::fs::write(&path, "").unwrap();
        let progress = ProgressFile::new(&path, "\r\n");

        let connection = RecordingConnection::default();
        let executor = ThrottledExecutor::new(Duration::from_millis(1));
        let action = ModerationAction::Ban {
            reason: "Known bot".to_string(),
        };

        // The entry smuggles a second IRC line past the \r\n separator
        let work = crate::bot::reconciler::compute_work_set(
            "alice\nPRIVMSG #somechannel :/mod attacker\r\nbob\r\ncarol dave",
            "\r\n",
            "",
            "\r\n",
        );
        assert_eq!(work.len(), 3);

        let done = executor
            .execute(&connection, "somechannel", &work, &action, &progress)
            .await
            .unwrap();

        assert_eq!(done, 1);
        assert_eq!(connection.messages(), ["/ban bob Known bot"]);
        assert!(connection.messages().iter().all(|m| !m.contains(['\r', '\n'])));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "bob\r\n");
    }

    #[tokio::test]
    async fn test_empty_work_set_sends_nothing() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("banned-users.txt");
        std::fs::write(&path, "bob").unwrap();
        let progress = ProgressFile::new(&path, "\r\n");

        let connection = RecordingConnection::default();
        let executor = ThrottledExecutor::new(Duration::from_millis(1));

        let done = executor
            .execute(&connection, "somechannel", &WorkSet::default(), &ModerationAction::Unban, &progress)
            .await
            .unwrap();

        assert_eq!(done, 0);
        assert!(connection.messages().is_empty());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "bob");
    }

    #[tokio::test]
    async fn test_progress_write_failure_stops_the_pass() {
        let temp_dir = tempdir().unwrap();
        let progress = ProgressFile::new(temp_dir.path().join("gone.txt"), "\r\n");

        let connection = RecordingConnection::default();
        let executor = ThrottledExecutor::new(Duration::from_millis(1));

        let err = executor
            .execute(&connection, "somechannel", &work(&["a", "b"]), &ModerationAction::Unban, &progress)
            .await
            .unwrap_err();

        assert!(matches!(err, MassBanError::ProgressWrite { .. }));
        assert_eq!(connection.messages(), ["/unban a"]);
    }
}
