//! File Downloader with Resume Support
//!
//! - Version feed page fetch
//! - Installer download into `<dest>.part`, renamed on completion
//! - Resume of a leftover `.part` file using HTTP Range headers
//! - Periodic progress logging

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;

use crate::error::DownloadError;

const USER_AGENT: &str = concat!("gpuprov/", env!("CARGO_PKG_VERSION"));
const PROGRESS_INTERVAL: Duration = Duration::from_secs(5);

/// Network access used by version resolution and installer download
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch a page as text
    async fn fetch_text(&self, url: &str) -> Result<String, DownloadError>;

    /// Download `url` to `dest`, returning the final file size
    async fn download(&self, url: &str, dest: &Path) -> Result<u64, DownloadError>;
}

/// reqwest-backed fetcher
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, DownloadError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(3600))
            .connect_timeout(Duration::from_secs(30))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| DownloadError::Network(e.to_string()))?;
        Ok(Self { client })
    }
}

/// `<dest>.part`
pub fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".part");
    dest.with_file_name(name)
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch_text(&self, url: &str) -> Result<String, DownloadError> {
        tracing::debug!(url, "Fetching page");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| DownloadError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::InvalidResponse(format!(
                "HTTP {}: {}",
                status,
                status.canonical_reason().unwrap_or("Unknown")
            )));
        }
        response
            .text()
            .await
            .map_err(|e| DownloadError::Network(e.to_string()))
    }

    async fn download(&self, url: &str, dest: &Path) -> Result<u64, DownloadError> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| DownloadError::Io(e.to_string()))?;
        }

        let part = partial_path(dest);
        let resume_bytes = tokio::fs::metadata(&part).await.map(|m| m.len()).unwrap_or(0);
        tracing::info!(url, dest = %dest.display(), resume_from = resume_bytes, "Starting download");

        let mut request = self.client.get(url);
        if resume_bytes > 0 {
            request = request.header("Range", format!("bytes={}-", resume_bytes));
        }

        let response = request
            .send()
            .await
            .map_err(|e| DownloadError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::InvalidResponse(format!(
                "HTTP {}: {}",
                status,
                status.canonical_reason().unwrap_or("Unknown")
            )));
        }

        // Servers that ignore Range answer 200 with the whole body
        let resumed = resume_bytes > 0 && status.as_u16() == 206;
        let content_length = response.content_length().unwrap_or(0);
        let total_bytes = if resumed { resume_bytes + content_length } else { content_length };

        let mut file = if resumed {
            OpenOptions::new()
                .append(true)
                .open(&part)
                .await
                .map_err(|e| DownloadError::Io(e.to_string()))?
        } else {
            File::create(&part)
                .await
                .map_err(|e| DownloadError::Io(e.to_string()))?
        };

        let mut downloaded_bytes = if resumed { resume_bytes } else { 0 };
        let start_time = Instant::now();
        let mut last_progress_time = Instant::now();
        let mut stream = response.bytes_stream();

        while let Some(chunk_result) = stream.next().await {
            let chunk = chunk_result.map_err(|e| DownloadError::Network(e.to_string()))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| DownloadError::Io(e.to_string()))?;
            downloaded_bytes += chunk.len() as u64;

            if last_progress_time.elapsed() >= PROGRESS_INTERVAL {
                last_progress_time = Instant::now();
                let percent = if total_bytes > 0 {
                    (downloaded_bytes as f64 / total_bytes as f64) * 100.0
                } else {
                    0.0
                };
                tracing::info!(downloaded_bytes, total_bytes, "Download {:.0}%", percent);
            }
        }

        file.flush()
            .await
            .map_err(|e| DownloadError::Io(e.to_string()))?;
        drop(file);

        if total_bytes > 0 && downloaded_bytes != total_bytes {
            return Err(DownloadError::InvalidResponse(format!(
                "truncated body: got {} of {} bytes",
                downloaded_bytes, total_bytes
            )));
        }

        tokio::fs::rename(&part, dest)
            .await
            .map_err(|e| DownloadError::Io(e.to_string()))?;

        tracing::info!(
            "Download complete: {} bytes in {:.1}s",
            downloaded_bytes,
            start_time.elapsed().as_secs_f64()
        );
        Ok(downloaded_bytes)
    }
}

#[cfg(test)]
pub mod testing {
    //! In-memory fetcher for version and phase tests.

    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct FakeFetcher {
        page: Option<String>,
        fail_download: bool,
        requests: Mutex<Vec<String>>,
    }

    impl FakeFetcher {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_page(mut self, page: &str) -> Self {
            self.page = Some(page.to_string());
            self
        }

        pub fn failing_download(mut self) -> Self {
            self.fail_download = true;
            self
        }

        pub fn requests(&self) -> Vec<String> {
            self.requests.lock().map(|r| r.clone()).unwrap_or_default()
        }

        fn record(&self, url: &str) {
            if let Ok(mut r) = self.requests.lock() {
                r.push(url.to_string());
            }
        }
    }

    #[async_trait]
    impl Fetcher for FakeFetcher {
        async fn fetch_text(&self, url: &str) -> Result<String, DownloadError> {
            self.record(url);
            self.page
                .clone()
                .ok_or_else(|| DownloadError::Network("connection refused".into()))
        }

        async fn download(&self, url: &str, dest: &Path) -> Result<u64, DownloadError> {
            self.record(url);
            if self.fail_download {
                return Err(DownloadError::InvalidResponse("HTTP 404 Not Found: Not Found".into()));
            }
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent).map_err(|e| DownloadError::Io(e.to_string()))?;
            }
            let body = b"#!/bin/sh\nexit 0\n";
            std::fs::write(dest, body).map_err(|e| DownloadError::Io(e.to_string()))?;
            Ok(body.len() as u64)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_path_appends_suffix() {
        let dest = Path::new("/var/tmp/gpuprov/NVIDIA-Linux-x86_64-535.129.03.run");
        assert_eq!(
            partial_path(dest),
            PathBuf::from("/var/tmp/gpuprov/NVIDIA-Linux-x86_64-535.129.03.run.part")
        );
    }

    #[test]
    fn test_http_fetcher_builds() {
        assert!(HttpFetcher::new().is_ok());
    }
}
