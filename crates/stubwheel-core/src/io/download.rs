//! HTTP retrieval with bounded retry and streaming digest verification.
//!
//! Transport failures (connect, timeout, request send) are retried with
//! exponential backoff. An HTTP error status is returned immediately.

use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::StreamExt;
use reqwest::{Client, Response, StatusCode};
use sha2::Digest;
use stubwheel_schema::{HashAlgorithm, HashHint};
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use url::Url;

/// Write buffer for downloads.
pub const CHUNK_SIZE: usize = 16 * 1024;

/// Errors from index and artifact retrieval.
#[derive(Error, Debug)]
pub enum DownloadError {
    /// The request could not be completed. Retried before surfacing.
    #[error("request to {url} failed: {source}")]
    Transport {
        /// Requested URL.
        url: String,
        /// Underlying error.
        #[source]
        source: reqwest::Error,
    },

    /// The server answered with an error status.
    #[error("{url} returned HTTP {status}")]
    Status {
        /// Requested URL.
        url: String,
        /// Status received.
        status: StatusCode,
    },

    /// The downloaded bytes do not match the advertised digest.
    #[error(
        "Downloaded {filename} does not match its {algorithm} digest: expected {expected}, got {actual}"
    )]
    Integrity {
        /// Artifact filename.
        filename: String,
        /// Digest algorithm.
        algorithm: HashAlgorithm,
        /// Advertised digest.
        expected: String,
        /// Digest of the bytes received.
        actual: String,
    },

    /// Writing the artifact failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DownloadError {
    fn transport(url: &Url, source: reqwest::Error) -> Self {
        Self::Transport {
            url: url.to_string(),
            source,
        }
    }
}

/// How many times to try a request and how long to wait in between.
///
/// The wait after failed attempt `i` (1-based) is `unit * base^i`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub attempts: u32,
    /// Exponential growth factor.
    pub base: f64,
    /// Delay scale.
    pub unit: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 4,
            base: 1.2,
            unit: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Retry `attempts` times without sleeping.
    pub fn immediate(attempts: u32) -> Self {
        Self {
            attempts,
            base: 1.0,
            unit: Duration::ZERO,
        }
    }

    /// Delay after failed attempt `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        self.unit.mul_f64(self.base.powi(exponent))
    }
}

fn is_transient(e: &reqwest::Error) -> bool {
    e.is_connect() || e.is_timeout() || e.is_request()
}

/// GET `url`, retrying transport failures according to `policy`.
///
/// # Errors
///
/// - [`DownloadError::Status`] as soon as the server answers with an error status.
/// - [`DownloadError::Transport`] once all attempts have failed.
pub async fn get_with_retry(
    client: &Client,
    url: &Url,
    policy: &RetryPolicy,
) -> Result<Response, DownloadError> {
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;
    loop {
        match client.get(url.clone()).send().await {
            Ok(response) => {
                let status = response.status();
                if !status.is_success() {
                    return Err(DownloadError::Status {
                        url: url.to_string(),
                        status,
                    });
                }
                return Ok(response);
            }
            Err(e) if attempt < attempts && is_transient(&e) => {
                let delay = policy.delay(attempt);
                tracing::warn!(
                    "Request to {url} failed (attempt {attempt}/{attempts}): {e}; retrying in {delay:?}"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(DownloadError::transport(url, e)),
        }
    }
}

/// GET `url` as text.
///
/// # Errors
///
/// As [`get_with_retry`], plus [`DownloadError::Transport`] if the body
/// cannot be read.
pub async fn fetch_text(
    client: &Client,
    url: &Url,
    policy: &RetryPolicy,
) -> Result<String, DownloadError> {
    let response = get_with_retry(client, url, policy).await?;
    response
        .text()
        .await
        .map_err(|e| DownloadError::transport(url, e))
}

/// Incremental digest over any supported algorithm.
enum StreamHasher {
    Md5(md5::Md5),
    Sha1(sha1::Sha1),
    Sha224(sha2::Sha224),
    Sha256(sha2::Sha256),
    Sha384(sha2::Sha384),
    Sha512(sha2::Sha512),
    Sha3_224(sha3::Sha3_224),
    Sha3_256(sha3::Sha3_256),
    Sha3_384(sha3::Sha3_384),
    Sha3_512(sha3::Sha3_512),
}

impl StreamHasher {
    fn new(algorithm: HashAlgorithm) -> Self {
        match algorithm {
            HashAlgorithm::Md5 => Self::Md5(md5::Md5::new()),
            HashAlgorithm::Sha1 => Self::Sha1(sha1::Sha1::new()),
            HashAlgorithm::Sha224 => Self::Sha224(sha2::Sha224::new()),
            HashAlgorithm::Sha256 => Self::Sha256(sha2::Sha256::new()),
            HashAlgorithm::Sha384 => Self::Sha384(sha2::Sha384::new()),
            HashAlgorithm::Sha512 => Self::Sha512(sha2::Sha512::new()),
            HashAlgorithm::Sha3_224 => Self::Sha3_224(sha3::Sha3_224::new()),
            HashAlgorithm::Sha3_256 => Self::Sha3_256(sha3::Sha3_256::new()),
            HashAlgorithm::Sha3_384 => Self::Sha3_384(sha3::Sha3_384::new()),
            HashAlgorithm::Sha3_512 => Self::Sha3_512(sha3::Sha3_512::new()),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            Self::Md5(h) => h.update(data),
            Self::Sha1(h) => h.update(data),
            Self::Sha224(h) => h.update(data),
            Self::Sha256(h) => h.update(data),
            Self::Sha384(h) => h.update(data),
            Self::Sha512(h) => h.update(data),
            Self::Sha3_224(h) => h.update(data),
            Self::Sha3_256(h) => h.update(data),
            Self::Sha3_384(h) => h.update(data),
            Self::Sha3_512(h) => h.update(data),
        }
    }

    fn finalize_hex(self) -> String {
        match self {
            Self::Md5(h) => hex::encode(h.finalize()),
            Self::Sha1(h) => hex::encode(h.finalize()),
            Self::Sha224(h) => hex::encode(h.finalize()),
            Self::Sha256(h) => hex::encode(h.finalize()),
            Self::Sha384(h) => hex::encode(h.finalize()),
            Self::Sha512(h) => hex::encode(h.finalize()),
            Self::Sha3_224(h) => hex::encode(h.finalize()),
            Self::Sha3_256(h) => hex::encode(h.finalize()),
            Self::Sha3_384(h) => hex::encode(h.finalize()),
            Self::Sha3_512(h) => hex::encode(h.finalize()),
        }
    }
}

/// Download `url` to `dest_dir/filename`, verifying against `hint` if given.
///
/// Bytes are hashed as they are written. On a digest mismatch the file is
/// removed.
///
/// # Errors
///
/// - [`DownloadError::Integrity`] if the digest does not match.
/// - Transport, status and I/O errors as they occur.
pub async fn download_verified(
    client: &Client,
    url: &Url,
    dest_dir: &Path,
    filename: &str,
    hint: Option<&HashHint>,
    policy: &RetryPolicy,
) -> Result<PathBuf, DownloadError> {
    let mut hasher = hint.map(|h| StreamHasher::new(h.algorithm));

    let response = get_with_retry(client, url, policy).await?;

    tokio::fs::create_dir_all(dest_dir).await?;
    let dest = dest_dir.join(filename);
    let mut file = BufWriter::with_capacity(CHUNK_SIZE, File::create(&dest).await?);
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                drop(file);
                tokio::fs::remove_file(&dest).await.ok();
                return Err(DownloadError::transport(url, e));
            }
        };
        file.write_all(&chunk).await?;
        if let Some(hasher) = hasher.as_mut() {
            hasher.update(&chunk);
        }
    }
    file.flush().await?;
    drop(file);

    if let (Some(hint), Some(hasher)) = (hint, hasher) {
        let actual = hasher.finalize_hex();
        if !hint.matches(&actual) {
            tokio::fs::remove_file(&dest).await.ok();
            return Err(DownloadError::Integrity {
                filename: filename.to_string(),
                algorithm: hint.algorithm,
                expected: hint.digest.clone(),
                actual,
            });
        }
        tracing::debug!("Verified {filename} ({}={actual})", hint.algorithm);
    }

    Ok(dest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Server;

    const BODY: &[u8] = b"wheel bytes";
    const WRONG_DIGEST: &str = "deadbeef";

    fn sha256_hex(data: &[u8]) -> String {
        hex::encode(sha2::Sha256::digest(data))
    }

    fn url(server: &Server, path: &str) -> Url {
        Url::parse(&format!("{}{path}", server.url())).unwrap()
    }

    #[test]
    fn default_backoff_grows_exponentially() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.attempts, 4);
        assert!((policy.delay(1).as_secs_f64() - 1.2).abs() < 1e-6);
        assert!((policy.delay(2).as_secs_f64() - 1.44).abs() < 1e-6);
        assert!((policy.delay(3).as_secs_f64() - 1.728).abs() < 1e-6);
        assert_eq!(RetryPolicy::immediate(3).delay(2), Duration::ZERO);
    }

    #[test]
    fn md5_and_sha3_digests_match_known_vectors() {
        let cases = [
            (HashAlgorithm::Md5, "900150983cd24fb0d6963f7d28e17f72"),
            (
                HashAlgorithm::Sha3_256,
                "3a985da74fe225b2045c172d6bd390bd855f086e3e9d525b46bfe24511431532",
            ),
            (
                HashAlgorithm::Sha1,
                "a9993e364706816aba3e25717850c26c9cd0d89d",
            ),
        ];
        for (algorithm, expected) in cases {
            let mut hasher = StreamHasher::new(algorithm);
            hasher.update(b"a");
            hasher.update(b"bc");
            assert_eq!(hasher.finalize_hex(), expected, "{algorithm}");
        }
    }

    #[test]
    fn stream_hasher_matches_one_shot_digest() {
        let mut hasher = StreamHasher::new(HashAlgorithm::Sha256);
        hasher.update(b"wheel ");
        hasher.update(b"bytes");
        assert_eq!(hasher.finalize_hex(), sha256_hex(BODY));
    }

    #[tokio::test]
    async fn download_with_matching_digest() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/demo-1.0-py3-none-any.whl")
            .with_status(200)
            .with_body(BODY)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let hint = HashHint::new(HashAlgorithm::Sha256, &sha256_hex(BODY).to_uppercase());
        let path = download_verified(
            &Client::new(),
            &url(&server, "/demo-1.0-py3-none-any.whl"),
            dir.path(),
            "demo-1.0-py3-none-any.whl",
            Some(&hint),
            &RetryPolicy::immediate(1),
        )
        .await
        .unwrap();

        mock.assert_async().await;
        assert_eq!(std::fs::read(path).unwrap(), BODY);
    }

    #[tokio::test]
    async fn digest_mismatch_removes_file() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/demo.whl")
            .with_status(200)
            .with_body(BODY)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let hint = HashHint::new(HashAlgorithm::Sha256, WRONG_DIGEST);
        let err = download_verified(
            &Client::new(),
            &url(&server, "/demo.whl"),
            dir.path(),
            "demo.whl",
            Some(&hint),
            &RetryPolicy::immediate(1),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, DownloadError::Integrity { .. }));
        assert!(!dir.path().join("demo.whl").exists());
    }

    #[tokio::test]
    async fn download_without_hint_is_unverified() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/demo.whl")
            .with_status(200)
            .with_body(BODY)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let path = download_verified(
            &Client::new(),
            &url(&server, "/demo.whl"),
            &dir.path().join("nested"),
            "demo.whl",
            None,
            &RetryPolicy::immediate(1),
        )
        .await
        .unwrap();
        assert_eq!(std::fs::read(path).unwrap(), BODY);
    }

    #[tokio::test]
    async fn http_errors_are_not_retried() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/simple/demo/")
            .with_status(404)
            .expect(1)
            .create_async()
            .await;

        let err = fetch_text(
            &Client::new(),
            &url(&server, "/simple/demo/"),
            &RetryPolicy::immediate(4),
        )
        .await
        .unwrap_err();

        mock.assert_async().await;
        assert!(matches!(
            err,
            DownloadError::Status { status, .. } if status == StatusCode::NOT_FOUND
        ));
    }

    #[tokio::test]
    async fn connection_failures_exhaust_retries() {
        // Bind and drop a listener to get a port nothing is serving on.
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let url = Url::parse(&format!("http://127.0.0.1:{port}/simple/demo/")).unwrap();

        let err = fetch_text(&Client::new(), &url, &RetryPolicy::immediate(3))
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::Transport { .. }));
    }

    async fn download_with_hint(
        server: &mut Server,
        dir: &Path,
        hint: &HashHint,
    ) -> Result<PathBuf, DownloadError> {
        let _mock = server
            .mock("GET", "/demo.whl")
            .with_status(200)
            .with_body(BODY)
            .create_async()
            .await;
        download_verified(
            &Client::new(),
            &url(server, "/demo.whl"),
            dir,
            "demo.whl",
            Some(hint),
            &RetryPolicy::immediate(1),
        )
        .await
    }

    #[tokio::test]
    async fn md5_hint_is_verified() {
        let mut server = Server::new_async().await;
        let dir = tempfile::tempdir().unwrap();
        let good = HashHint::new(HashAlgorithm::Md5, &hex::encode(md5::Md5::digest(BODY)));
        assert!(download_with_hint(&mut server, dir.path(), &good).await.is_ok());

        let bad = HashHint::new(HashAlgorithm::Md5, "0f0f");
        let err = download_with_hint(&mut server, dir.path(), &bad).await.unwrap_err();
        assert!(matches!(
            err,
            DownloadError::Integrity { algorithm: HashAlgorithm::Md5, .. }
        ));
    }

    #[tokio::test]
    async fn sha3_mismatch_is_an_integrity_error() {
        let mut server = Server::new_async().await;
        let dir = tempfile::tempdir().unwrap();
        let hint = HashHint::new(HashAlgorithm::Sha3_256, "00ff");
        let err = download_with_hint(&mut server, dir.path(), &hint).await.unwrap_err();
        assert!(matches!(
            err,
            DownloadError::Integrity { algorithm: HashAlgorithm::Sha3_256, .. }
        ));
    }
}
