//! Package index clients.
//!
//! [`HttpIndex`] talks to an upload endpoint with a bearer credential;
//! [`DirectoryIndex`] publishes into a local directory and backs dry
//! releases and tests.

use super::{Artifact, Credential, PublishError};
use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;

const CHECKSUM_HEADER: &str = "X-Checksum-Sha256";

/// Outcome classes of index operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IndexError {
    /// Worth retrying: network trouble, throttling, server errors
    #[error("transient index error: {0}")]
    Transient(String),

    /// Retrying cannot help
    #[error("index rejected the request: {0}")]
    Permanent(String),

    /// The index already holds this artifact
    #[error("artifact already exists on the index")]
    Duplicate,
}

/// A destination for release artifacts
#[async_trait]
pub trait PackageIndex: Send + Sync {
    /// Returns true if the artifact is already published
    ///
    /// A file with the same name but a different digest is a permanent
    /// error: the key is taken.
    async fn contains(&self, artifact: &Artifact) -> Result<bool, IndexError>;

    /// Uploads one artifact
    async fn upload(&self, artifact: &Artifact, credential: &Credential) -> Result<(), IndexError>;
}

/// Index reached over HTTP
#[derive(Debug, Clone)]
pub struct HttpIndex {
    client: reqwest::Client,
    base: url::Url,
}

impl HttpIndex {
    /// Creates a client for an upload endpoint
    pub fn new(base: &str) -> Result<Self, PublishError> {
        let with_slash = if base.ends_with('/') {
            base.to_string()
        } else {
            format!("{base}/")
        };
        let base = url::Url::parse(&with_slash)
            .map_err(|e| PublishError::InvalidIndex(format!("{base}: {e}")))?;
        let client = reqwest::Client::builder()
            .user_agent(concat!("relayline/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PublishError::InvalidIndex(e.to_string()))?;
        Ok(Self { client, base })
    }

    fn url_for(&self, artifact: &Artifact) -> Result<url::Url, IndexError> {
        self.base
            .join(&artifact.file_name())
            .map_err(|e| IndexError::Permanent(e.to_string()))
    }
}

fn classify(status: reqwest::StatusCode, body: &str) -> IndexError {
    let message = format!("{status}: {}", body.trim());
    if status == reqwest::StatusCode::CONFLICT {
        IndexError::Duplicate
    } else if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        IndexError::Transient(message)
    } else {
        IndexError::Permanent(message)
    }
}

fn network(err: &reqwest::Error) -> IndexError {
    IndexError::Transient(err.to_string())
}

#[async_trait]
impl PackageIndex for HttpIndex {
    async fn contains(&self, artifact: &Artifact) -> Result<bool, IndexError> {
        let url = self.url_for(artifact)?;
        let response = self.client.head(url).send().await.map_err(|e| network(&e))?;
        let status = response.status();

        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(false);
        }
        if !status.is_success() {
            return Err(classify(status, ""));
        }

        match response
            .headers()
            .get(CHECKSUM_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            Some(digest) if !digest.eq_ignore_ascii_case(&artifact.sha256) => {
                Err(IndexError::Permanent(format!(
                    "{} exists with a different digest",
                    artifact.file_name()
                )))
            }
            _ => Ok(true),
        }
    }

    async fn upload(&self, artifact: &Artifact, credential: &Credential) -> Result<(), IndexError> {
        let url = self.url_for(artifact)?;
        let body = tokio::fs::read(&artifact.path)
            .await
            .map_err(|e| IndexError::Permanent(format!("{}: {e}", artifact.path.display())))?;

        let response = self
            .client
            .put(url)
            .bearer_auth(credential.expose())
            .header(CHECKSUM_HEADER, &artifact.sha256)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(body)
            .send()
            .await
            .map_err(|e| network(&e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(classify(status, &body))
    }
}

/// Index backed by a local directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryIndex {
    dir: PathBuf,
}

impl DirectoryIndex {
    /// Publishes into `dir`, created on first upload
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The index directory
    #[must_use]
    pub fn dir(&self) -> &std::path::Path {
        &self.dir
    }
}

#[async_trait]
impl PackageIndex for DirectoryIndex {
    async fn contains(&self, artifact: &Artifact) -> Result<bool, IndexError> {
        let path = self.dir.join(artifact.file_name());
        if !path.is_file() {
            return Ok(false);
        }
        let existing = Artifact::from_file(artifact.key.clone(), &path)
            .map_err(|e| IndexError::Transient(e.to_string()))?;
        if existing.sha256 == artifact.sha256 {
            Ok(true)
        } else {
            Err(IndexError::Permanent(format!(
                "{} exists with a different digest",
                artifact.file_name()
            )))
        }
    }

    async fn upload(
        &self,
        artifact: &Artifact,
        _credential: &Credential,
    ) -> Result<(), IndexError> {
        if self.contains(artifact).await? {
            return Err(IndexError::Duplicate);
        }

        let io = |e: std::io::Error| IndexError::Transient(e.to_string());
        tokio::fs::create_dir_all(&self.dir).await.map_err(io)?;

        // Copy then rename so a partially written file is never visible.
        let target = self.dir.join(artifact.file_name());
        let staging = self.dir.join(format!(".{}.partial", artifact.file_name()));
        tokio::fs::copy(&artifact.path, &staging).await.map_err(io)?;
        tokio::fs::rename(&staging, &target).await.map_err(io)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::release::ArtifactKey;
    use tempfile::TempDir;

    fn artifact(dir: &TempDir, contents: &str) -> Artifact {
        let path = dir.path().join("demo_pkg-1.0.tar.gz");
        std::fs::write(&path, contents).unwrap();
        Artifact::from_file(ArtifactKey::source("demo-pkg", "1.0"), &path).unwrap()
    }

    #[tokio::test]
    async fn test_directory_index_upload_and_duplicate() {
        let work = TempDir::new().unwrap();
        let index = DirectoryIndex::new(work.path().join("index"));
        let artifact = artifact(&work, "sdist");
        let credential = Credential::new("token");

        assert!(!index.contains(&artifact).await.unwrap());
        index.upload(&artifact, &credential).await.unwrap();
        assert!(index.contains(&artifact).await.unwrap());
        assert_eq!(
            index.upload(&artifact, &credential).await,
            Err(IndexError::Duplicate)
        );
    }

    #[tokio::test]
    async fn test_directory_index_digest_conflict() {
        let work = TempDir::new().unwrap();
        let index = DirectoryIndex::new(work.path().join("index"));
        index
            .upload(&artifact(&work, "first"), &Credential::new("t"))
            .await
            .unwrap();

        let changed = artifact(&work, "second");
        assert!(matches!(
            index.contains(&changed).await,
            Err(IndexError::Permanent(_))
        ));
    }

    #[tokio::test]
    async fn test_http_index_upload_sends_credential_and_digest() {
        let work = TempDir::new().unwrap();
        let artifact = artifact(&work, "sdist");
        let mut server = mockito::Server::new_async().await;

        let head = server
            .mock("HEAD", "/simple/demo_pkg-1.0.tar.gz")
            .with_status(404)
            .create_async()
            .await;
        let put = server
            .mock("PUT", "/simple/demo_pkg-1.0.tar.gz")
            .match_header("authorization", "Bearer s3cret")
            .match_header("x-checksum-sha256", artifact.sha256.as_str())
            .match_body("sdist")
            .with_status(201)
            .create_async()
            .await;

        let index = HttpIndex::new(&format!("{}/simple", server.url())).unwrap();
        assert!(!index.contains(&artifact).await.unwrap());
        index
            .upload(&artifact, &Credential::new("s3cret"))
            .await
            .unwrap();

        head.assert_async().await;
        put.assert_async().await;
    }

    #[tokio::test]
    async fn test_http_index_classifies_statuses() {
        let work = TempDir::new().unwrap();
        let artifact = artifact(&work, "sdist");
        let mut server = mockito::Server::new_async().await;
        let index = HttpIndex::new(&server.url()).unwrap();
        let credential = Credential::new("t");

        for (status, expected) in [
            (409, IndexError::Duplicate),
            (503, IndexError::Transient(String::new())),
            (429, IndexError::Transient(String::new())),
            (403, IndexError::Permanent(String::new())),
        ] {
            let mock = server
                .mock("PUT", "/demo_pkg-1.0.tar.gz")
                .with_status(status)
                .create_async()
                .await;
            let err = index.upload(&artifact, &credential).await.unwrap_err();
            assert_eq!(
                std::mem::discriminant(&err),
                std::mem::discriminant(&expected),
                "status {status}"
            );
            mock.remove_async().await;
        }
    }

    #[tokio::test]
    async fn test_http_index_detects_digest_conflict() {
        let work = TempDir::new().unwrap();
        let artifact = artifact(&work, "sdist");
        let mut server = mockito::Server::new_async().await;
        let _head = server
            .mock("HEAD", "/demo_pkg-1.0.tar.gz")
            .with_status(200)
            .with_header("x-checksum-sha256", "00ff")
            .create_async()
            .await;

        let index = HttpIndex::new(&server.url()).unwrap();
        assert!(matches!(
            index.contains(&artifact).await,
            Err(IndexError::Permanent(_))
        ));
    }
}
