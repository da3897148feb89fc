//! Cancellable HTTP helpers used by providers
//!
//! Every network call races the job's cancellation token, bodies are
//! streamed to a `.part` file next to the destination, and the partial file
//! is removed on any failure so an aborted or corrupt transfer never looks
//! like an installed artifact.

use crate::error::{HearthError, Result};
use crate::jobs::JobHandle;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use sha1::Digest;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// Published digest of an artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Checksum {
    None,
    Sha1(String),
    Sha256(String),
}

/// One file to fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchItem {
    pub url: String,
    pub dest: PathBuf,
    pub checksum: Checksum,
}

impl FetchItem {
    pub fn new(url: impl Into<String>, dest: impl Into<PathBuf>, checksum: Checksum) -> Self {
        Self {
            url: url.into(),
            dest: dest.into(),
            checksum,
        }
    }
}

enum Hasher {
    None,
    Sha1(sha1::Sha1),
    Sha256(sha2::Sha256),
}

impl Hasher {
    fn for_checksum(checksum: &Checksum) -> Self {
        match checksum {
            Checksum::None => Hasher::None,
            Checksum::Sha1(_) => Hasher::Sha1(sha1::Sha1::new()),
            Checksum::Sha256(_) => Hasher::Sha256(sha2::Sha256::new()),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            Hasher::None => {}
            Hasher::Sha1(h) => h.update(data),
            Hasher::Sha256(h) => h.update(data),
        }
    }

    fn finalize_hex(self) -> Option<String> {
        match self {
            Hasher::None => None,
            Hasher::Sha1(h) => Some(format!("{:x}", h.finalize())),
            Hasher::Sha256(h) => Some(format!("{:x}", h.finalize())),
        }
    }
}

/// `<dest>.part`
pub fn part_path(dest: &Path) -> PathBuf {
    let mut name = OsString::from(dest.as_os_str());
    name.push(".part");
    PathBuf::from(name)
}

async fn remove_partial(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "Removed partial download"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove partial download"),
    }
}

async fn send_get(client: &reqwest::Client, url: &str, job: &JobHandle) -> Result<reqwest::Response> {
    let response = job
        .cancellable(async { client.get(url).send().await.map_err(HearthError::from) })
        .await?;

    if !response.status().is_success() {
        return Err(HearthError::Upstream(format!(
            "GET {} failed: HTTP {}",
            url,
            response.status()
        )));
    }
    Ok(response)
}

/// Fetch and deserialize a JSON document
pub async fn get_json<T: DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
    job: &JobHandle,
) -> Result<T> {
    let response = send_get(client, url, job).await?;
    job.cancellable(async {
        response
            .json::<T>()
            .await
            .map_err(|e| HearthError::Upstream(format!("Invalid response from {}: {}", url, e)))
    })
    .await
}

/// Stream one file to disk, verifying its checksum.
///
/// With `report_progress` the job's byte counters and progress follow this
/// transfer. Returns the number of bytes written.
pub async fn download_file(
    client: &reqwest::Client,
    item: &FetchItem,
    job: &JobHandle,
    report_progress: bool,
) -> Result<u64> {
    let partial = part_path(&item.dest);
    match stream_to_partial(client, item, &partial, job, report_progress).await {
        Ok(size) => {
            tokio::fs::rename(&partial, &item.dest).await?;
            debug!(url = %item.url, dest = %item.dest.display(), size, "Download complete");
            Ok(size)
        }
        Err(e) => {
            remove_partial(&partial).await;
            Err(e)
        }
    }
}

async fn stream_to_partial(
    client: &reqwest::Client,
    item: &FetchItem,
    partial: &Path,
    job: &JobHandle,
    report_progress: bool,
) -> Result<u64> {
    if let Some(parent) = item.dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let response = send_get(client, &item.url, job).await?;
    let total = response.content_length();
    let mut stream = Box::pin(response.bytes_stream());
    let mut file = tokio::fs::File::create(partial).await?;
    let mut hasher = Hasher::for_checksum(&item.checksum);
    let mut transferred: u64 = 0;

    if report_progress {
        job.set_bytes(0, total);
    }

    loop {
        let chunk = job
            .cancellable(async { stream.next().await.transpose().map_err(HearthError::from) })
            .await?;
        let Some(bytes) = chunk else { break };

        hasher.update(&bytes);
        file.write_all(&bytes).await?;
        transferred += bytes.len() as u64;

        if report_progress {
            job.set_bytes(transferred, total);
            if let Some(total) = total.filter(|t| *t > 0) {
                // 100 is reserved for job completion
                job.set_progress(((transferred * 100 / total) as u8).min(99));
            }
        }
    }
    file.flush().await?;
    drop(file);

    let expected = match &item.checksum {
        Checksum::None => None,
        Checksum::Sha1(hex) | Checksum::Sha256(hex) => Some(hex.to_ascii_lowercase()),
    };
    if let (Some(expected), Some(actual)) = (expected, hasher.finalize_hex()) {
        if expected != actual {
            job.log(format!("Checksum mismatch for {}", item.url));
            return Err(HearthError::ChecksumMismatch { expected, actual });
        }
    }

    Ok(transferred)
}

/// Fetch many files in concurrent batches of at most `width`.
///
/// Cancellation is checked before every batch; on failure the partial files
/// of the batch in flight are removed.
pub async fn download_all(
    client: &reqwest::Client,
    items: &[FetchItem],
    width: usize,
    job: &JobHandle,
) -> Result<u64> {
    let width = width.max(1);
    let total = items.len();
    let mut done = 0usize;
    let mut bytes = 0u64;

    for batch in items.chunks(width) {
        job.checkpoint()?;

        let results = futures::future::try_join_all(
            batch.iter().map(|item| download_file(client, item, job, false)),
        )
        .await;

        match results {
            Ok(sizes) => {
                bytes += sizes.iter().sum::<u64>();
                done += batch.len();
                job.set_bytes(bytes, None);
                job.set_progress(((done * 100 / total.max(1)) as u8).min(99));
                job.log(format!("Fetched {}/{} files", done, total));
            }
            Err(e) => {
                for item in batch {
                    remove_partial(&part_path(&item.dest)).await;
                }
                return Err(e);
            }
        }
    }

    Ok(bytes)
}

/// Lowercase hex SHA-256 of a byte slice
pub fn sha256_hex(data: &[u8]) -> String {
    format!("{:x}", sha2::Sha256::digest(data))
}

/// Lowercase hex SHA-1 of a byte slice
pub fn sha1_hex(data: &[u8]) -> String {
    format!("{:x}", sha1::Sha1::digest(data))
}

#[cfg(test)]
pub(crate) mod test_server {
    //! Minimal HTTP/1.1 server for exercising the fetch helpers

    use std::collections::HashMap;
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve `routes` (path → body) on an ephemeral port; returns the base URL
    pub async fn serve(routes: HashMap<String, Vec<u8>>) -> String {
        serve_with(|_| routes).await
    }

    /// Like [`serve`], but the routes may embed the server's own base URL
    pub async fn serve_with(
        routes: impl FnOnce(&str) -> HashMap<String, Vec<u8>>,
    ) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let routes = Arc::new(routes(&base));

        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let routes = routes.clone();
                tokio::spawn(async move {
                    let mut buf = Vec::new();
                    let mut chunk = [0u8; 1024];
                    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                        match socket.read(&mut chunk).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => buf.extend_from_slice(&chunk[..n]),
                        }
                    }
                    let request = String::from_utf8_lossy(&buf);
                    let path = request
                        .lines()
                        .next()
                        .and_then(|l| l.split_whitespace().nth(1))
                        .unwrap_or("/")
                        .to_string();

                    let response = match routes.get(&path) {
                        Some(body) => {
                            let mut r = format!(
                                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                                body.len()
                            )
                            .into_bytes();
                            r.extend_from_slice(body);
                            r
                        }
                        None => b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                            .to_vec(),
                    };
                    let _ = socket.write_all(&response).await;
                    let _ = socket.shutdown().await;
                });
            }
        });

        base
    }
}
