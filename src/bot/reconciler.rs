// src/bot/reconciler.rs - Remote list vs. local progress diff

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, info};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tokio::fs;

use crate::types::{MassBanError, MassBanResult, WorkSet};

/// Raw response of a list download
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteList {
    pub status: u16,
    pub body: String,
}

impl RemoteList {
    /// Only 200 and 201 count as a usable list
    pub fn is_ok(&self) -> bool {
        matches!(self.status, 200 | 201)
    }
}

/// Somewhere remote lists can be downloaded from
#[async_trait]
pub trait ListSource: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<RemoteList>;
}

/// Downloads lists over HTTP(S)
#[derive(Debug, Clone, Default)]
pub struct HttpListSource {
    http_client: reqwest::Client,
}

impl HttpListSource {
    pub fn new() -> Self {
        Self {
            http_client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ListSource for HttpListSource {
    async fn fetch(&self, url: &str) -> Result<RemoteList> {
        debug!("GET {}", url);

        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Failed to request {}", url))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .with_context(|| format!("Failed to read response body from {}", url))?;

        Ok(RemoteList { status, body })
    }
}

/// Elements of the remote list missing from the progress list.
///
/// Both inputs are split on their own separator. The result keeps remote
/// order, drops empty entries and keeps only the first of any duplicates.
pub fn compute_work_set(remote: &str, remote_separator: &str, progress: &str, progress_separator: &str) -> WorkSet {
    let done: HashSet<&str> = progress.split(progress_separator).collect();

    let pending: Vec<String> = remote
        .split(remote_separator)
        .filter(|name| !done.contains(name))
        .map(str::to_string)
        .collect();

    WorkSet::from(pending)
}

/// Fetches a remote list and diffs it against a progress file
pub struct ListReconciler {
    source: Arc<dyn ListSource>,
    stored_separator: String,
}

impl ListReconciler {
    /// `stored_separator` is the separator progress files are written with
    pub fn new(source: Arc<dyn ListSource>, stored_separator: impl Into<String>) -> Self {
        Self {
            source,
            stored_separator: stored_separator.into(),
        }
    }

    /// Compute the work set for one pass. Has no side effects.
    pub async fn reconcile(&self, url: &str, progress_path: &Path, remote_separator: &str) -> MassBanResult<WorkSet> {
        let remote = self
            .source
            .fetch(url)
            .await
            .map_err(|e| MassBanError::RemoteUnreachable {
                url: url.to_string(),
                source: e.into(),
            })?;

        if !remote.is_ok() {
            return Err(MassBanError::RemoteFetch {
                url: url.to_string(),
                status: remote.status,
            });
        }

        let progress = fs::read_to_string(progress_path)
            .await
            .map_err(|source| MassBanError::LocalRead {
                path: progress_path.to_path_buf(),
                source,
            })?;

        let work = compute_work_set(&remote.body, remote_separator, &progress, &self.stored_separator);
        info!(
            "Reconciled {}: {} pending against {}",
            url,
            work.len(),
            progress_path.display()
        );
        Ok(work)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    /// In-memory list source keyed by URL
    #[derive(Default)]
    pub(crate) struct StaticListSource {
        lists: HashMap<String, RemoteList>,
        pub(crate) fetches: AtomicUsize,
    }

    impl StaticListSource {
        pub(crate) fn with_list(mut self, url: &str, status: u16, body: &str) -> Self {
            self.lists.insert(
                url.to_string(),
                RemoteList {
                    status,
                    body: body.to_string(),
                },
            );
            self
        }

        pub(crate) fn fetch_count(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ListSource for StaticListSource {
        async fn fetch(&self, url: &str) -> Result<RemoteList> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            self.lists
                .get(url)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("connection refused: {}", url))
        }
    }

    #[test]
    fn test_work_set_example() {
        let work = compute_work_set("alice\r\nbob\r\nBOT1", "\r\n", "bob", "\r\n");
        assert_eq!(work.names(), ["alice", "BOT1"]);
        assert_eq!(work.len(), 2);
    }

    #[test]
    fn test_work_set_drops_empties_and_duplicates() {
        let work = compute_work_set("\r\ncarol\r\nalice\r\n\r\ncarol\r\ndave\r\n", "\r\n", "dave\r\n", "\r\n");
        assert_eq!(work.names(), ["carol", "alice"]);
    }

    #[test]
    fn test_work_set_with_mixed_separators() {
        let work = compute_work_set("alice\nbob\ncarol\n", "\n", "bob\r\nzed\r\n", "\r\n");
        assert_eq!(work.names(), ["alice", "carol"]);

        let nothing_new = compute_work_set("alice\nbob", "\n", "alice\r\nbob\r\n", "\r\n");
        assert!(nothing_new.is_empty());
    }

    #[test]
    fn test_work_set_is_case_sensitive() {
        let work = compute_work_set("Alice\r\nalice", "\r\n", "alice", "\r\n");
        assert_eq!(work.names(), ["Alice"]);
    }

    #[tokio::test]
    async fn test_reconcile_against_progress_file() {
        let temp_dir = tempdir().unwrap();
        let progress = temp_dir.path().join("banned-users.txt");
        fs::write(&progress, "bob").await.unwrap();

        let source = StaticListSource::default().with_list("https://lists.example/bots.txt", 200, "alice\r\nbob\r\nBOT1");
        let reconciler = ListReconciler::new(Arc::new(source), "\r\n");

        let work = reconciler
            .reconcile("https://lists.example/bots.txt", &progress, "\r\n")
            .await
            .unwrap();
        assert_eq!(work.names(), ["alice", "BOT1"]);

        // Reconciling never touches the progress file
        assert_eq!(fs::read_to_string(&progress).await.unwrap(), "bob");
    }

    #[tokio::test]
    async fn test_reconcile_accepts_created_status() {
        let temp_dir = tempdir().unwrap();
        let progress = temp_dir.path().join("banned-users.txt");
        fs::write(&progress, "").await.unwrap();

        let source = StaticListSource::default().with_list("https://lists.example/bots.txt", 201, "alice");
        let reconciler = ListReconciler::new(Arc::new(source), "\r\n");

        let work = reconciler
            .reconcile("https://lists.example/bots.txt", &progress, "\r\n")
            .await
            .unwrap();
        assert_eq!(work.len(), 1);
    }

    #[tokio::test]
    async fn test_reconcile_rejects_bad_status() {
        let temp_dir = tempdir().unwrap();
        let progress = temp_dir.path().join("banned-users.txt");
        fs::write(&progress, "").await.unwrap();

        let source = StaticListSource::default()
            .with_list("https://lists.example/bots.txt", 500, "oops")
            .with_list("https://lists.example/moved.txt", 204, "");
        let reconciler = ListReconciler::new(Arc::new(source), "\r\n");

        let err = reconciler
            .reconcile("https://lists.example/bots.txt", &progress, "\r\n")
            .await
            .unwrap_err();
        assert!(matches!(err, MassBanError::RemoteFetch { status: 500, .. }));

        let err = reconciler
            .reconcile("https://lists.example/moved.txt", &progress, "\r\n")
            .await
            .unwrap_err();
        assert!(matches!(err, MassBanError::RemoteFetch { status: 204, .. }));
    }

    #[tokio::test]
    async fn test_reconcile_reports_unreachable_and_unreadable() {
        let temp_dir = tempdir().unwrap();
        let progress = temp_dir.path().join("banned-users.txt");

        let source = StaticListSource::default().with_list("https://lists.example/bots.txt", 200, "alice");
        let reconciler = ListReconciler::new(Arc::new(source), "\r\n");

        let err = reconciler
            .reconcile("https://lists.example/other.txt", &progress, "\r\n")
            .await
            .unwrap_err();
        assert!(matches!(err, MassBanError::RemoteUnreachable { .. }));

        let err = reconciler
            .reconcile("https://lists.example/bots.txt", &progress, "\r\n")
            .await
            .unwrap_err();
        assert!(matches!(err, MassBanError::LocalRead { .. }));
    }
}
