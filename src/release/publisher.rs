//! Publisher
//!
//! Uploads a set of artifacts with bounded retries. Publishing is
//! idempotent per artifact key: anything already on the index is skipped
//! and a duplicate response counts as confirmed, so a failed run can simply
//! be repeated.

use super::{Artifact, IndexError, PackageIndex, PublishError};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Bearer token for the index; never printed
#[derive(Clone)]
pub struct Credential(String);

impl Credential {
    /// Wraps a token
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Reads the token from an environment variable
    pub fn from_env(var: &str) -> Result<Self, PublishError> {
        match std::env::var(var) {
            Ok(token) if !token.trim().is_empty() => Ok(Self(token.trim().to_string())),
            _ => Err(PublishError::MissingCredential {
                var: var.to_string(),
            }),
        }
    }

    pub(crate) fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// Retry schedule for transient index errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per artifact, including the first
    pub max_attempts: u32,
    /// Delay before the second attempt; doubled for every further one
    pub initial_backoff: Duration,
}

impl RetryPolicy {
    /// Delay before the given attempt (1-based); zero for the first
    #[must_use]
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let factor = 2u32.saturating_pow(attempt - 2);
        self.initial_backoff.saturating_mul(factor)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
        }
    }
}

/// What a successful publish did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Artifacts uploaded (or acknowledged as duplicates) by this run
    pub confirmed: Vec<String>,
    /// Artifacts that were already on the index
    pub already_present: Vec<String>,
}

/// Uploads artifacts to a [`PackageIndex`]
#[derive(Clone)]
pub struct Publisher {
    index: Arc<dyn PackageIndex>,
    policy: RetryPolicy,
}

impl fmt::Debug for Publisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Publisher")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl Publisher {
    /// Creates a publisher
    pub fn new(index: Arc<dyn PackageIndex>, policy: RetryPolicy) -> Self {
        Self { index, policy }
    }

    /// Publishes every artifact, in order
    ///
    /// Stops at the first artifact that cannot be confirmed; the error
    /// names it and every artifact after it.
    #[tracing::instrument(skip_all, fields(artifacts = artifacts.len()))]
    pub async fn publish(
        &self,
        artifacts: &[Artifact],
        credential: &Credential,
    ) -> Result<PublishReport, PublishError> {
        let mut report = PublishReport::default();

        for (i, artifact) in artifacts.iter().enumerate() {
            let name = artifact.file_name();
            let incomplete = |reason: String| PublishError::Incomplete {
                failed: name.clone(),
                reason,
                pending: artifacts[i..].iter().map(Artifact::file_name).collect(),
            };

            match self.with_retries(|| self.index.contains(artifact)).await {
                Ok(true) => {
                    tracing::info!(artifact = %name, "Already published, skipping");
                    report.already_present.push(name);
                    continue;
                }
                Ok(false) => {}
                Err(e) => return Err(incomplete(e.to_string())),
            }

            match self.with_retries(|| self.index.upload(artifact, credential)).await {
                Ok(()) => {
                    tracing::info!(artifact = %name, sha256 = %artifact.sha256, "Published");
                    report.confirmed.push(name);
                }
                Err(IndexError::Duplicate) => {
                    tracing::info!(
                        artifact = %name,
                        "Index reports duplicate, treating as published"
                    );
                    report.confirmed.push(name);
                }
                Err(e) => {
                    tracing::error!(artifact = %name, error = %e, "Publishing failed");
                    return Err(incomplete(e.to_string()));
                }
            }
        }

        Ok(report)
    }

    async fn with_retries<T, F, Fut>(&self, mut operation: F) -> Result<T, IndexError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, IndexError>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match operation().await {
                Err(IndexError::Transient(reason)) if attempt < max_attempts => {
                    attempt += 1;
                    let delay = self.policy.delay_before(attempt);
                    tracing::warn!(
                        attempt,
                        delay_ms = delay.as_millis(),
                        %reason,
                        "Transient index error, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                result => return result,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::release::{ArtifactKey, DirectoryIndex};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use std::collections::VecDeque;
    use tempfile::TempDir;

    fn artifacts(dir: &TempDir) -> Vec<Artifact> {
        ["ubuntu", "windows"]
            .iter()
            .map(|os| {
                let key = ArtifactKey::binary("demo", "1.0", format!("{os}_tag"), "cp38");
                let path = dir.path().join(key.file_name());
                std::fs::write(&path, os).unwrap();
                Artifact::from_file(key, &path).unwrap()
            })
            .collect()
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
        }
    }

    /// Answers uploads from a script, then succeeds
    #[derive(Default)]
    struct FlakyIndex {
        script: Mutex<VecDeque<IndexError>>,
        uploads: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl PackageIndex for FlakyIndex {
        async fn contains(&self, _artifact: &Artifact) -> Result<bool, IndexError> {
            Ok(false)
        }

        async fn upload(
            &self,
            artifact: &Artifact,
            _credential: &Credential,
        ) -> Result<(), IndexError> {
            self.uploads.lock().push(artifact.file_name());
            match self.script.lock().pop_front() {
                Some(err) => Err(err),
                None => Ok(()),
            }
        }
    }

    #[test]
    fn test_credential_is_never_printed() {
        let credential = Credential::new("pypi-AgEIcHlwaS5vcmc");
        assert_eq!(format!("{credential:?}"), "Credential(***)");
        assert!(!format!("{:?}", Some(credential)).contains("pypi-"));
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy {
            max_attempts: 4,
            initial_backoff: Duration::from_millis(100),
        };
        assert_eq!(policy.delay_before(1), Duration::ZERO);
        assert_eq!(policy.delay_before(2), Duration::from_millis(100));
        assert_eq!(policy.delay_before(4), Duration::from_millis(400));
    }

    #[tokio::test]
    async fn test_publish_twice_is_idempotent() {
        let work = TempDir::new().unwrap();
        let artifacts = artifacts(&work);
        let index = Arc::new(DirectoryIndex::new(work.path().join("index")));
        let publisher = Publisher::new(index.clone(), policy());
        let credential = Credential::new("token");

        let first = publisher.publish(&artifacts, &credential).await.unwrap();
        assert_eq!(first.confirmed.len(), 2);
        assert!(first.already_present.is_empty());

        let second = publisher.publish(&artifacts, &credential).await.unwrap();
        assert!(second.confirmed.is_empty());
        assert_eq!(second.already_present, first.confirmed);

        let published = std::fs::read_dir(index.dir()).unwrap().count();
        assert_eq!(published, 2);
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let work = TempDir::new().unwrap();
        let index = Arc::new(FlakyIndex::default());
        index.script.lock().extend([
            IndexError::Transient("502".to_string()),
            IndexError::Transient("timeout".to_string()),
        ]);

        let report = Publisher::new(index.clone(), policy())
            .publish(&artifacts(&work)[..1], &Credential::new("t"))
            .await
            .unwrap();
        assert_eq!(report.confirmed.len(), 1);
        assert_eq!(index.uploads.lock().len(), 3);
    }

    #[tokio::test]
    async fn test_failure_lists_unconfirmed_artifacts() {
        let work = TempDir::new().unwrap();
        let artifacts = artifacts(&work);
        let index = Arc::new(FlakyIndex::default());
        index
            .script
            .lock()
            .push_back(IndexError::Permanent("403 Forbidden".to_string()));

        let err = Publisher::new(index.clone(), policy())
            .publish(&artifacts, &Credential::new("t"))
            .await
            .unwrap_err();
        match err {
            PublishError::Incomplete { failed, pending, .. } => {
                assert_eq!(failed, artifacts[0].file_name());
                assert_eq!(pending.len(), 2);
            }
            other => panic!("expected incomplete publish, got {other:?}"),
        }
        // Permanent errors are not retried.
        assert_eq!(index.uploads.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let work = TempDir::new().unwrap();
        let index = Arc::new(FlakyIndex::default());
        index
            .script
            .lock()
            .extend((0..5).map(|_| IndexError::Transient("503".to_string())));

        let result = Publisher::new(index.clone(), policy())
            .publish(&artifacts(&work)[..1], &Credential::new("t"))
            .await;
        assert!(matches!(result, Err(PublishError::Incomplete { .. })));
        assert_eq!(index.uploads.lock().len(), 3);
    }

    #[tokio::test]
    async fn test_duplicate_response_counts_as_confirmed() {
        let work = TempDir::new().unwrap();
        let index = Arc::new(FlakyIndex::default());
        index.script.lock().push_back(IndexError::Duplicate);

        let report = Publisher::new(index, policy())
            .publish(&artifacts(&work)[..1], &Credential::new("t"))
            .await
            .unwrap();
        assert_eq!(report.confirmed.len(), 1);
    }
}
