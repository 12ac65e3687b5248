//! HTTP-backed asset store for model downloads
//!
//! Downloads stream into a `.partial` staging file and are renamed into
//! place only once complete, so an interrupted download can never be
//! mistaken for a present asset. Interrupted staging files are resumed with
//! HTTP Range requests on the next attempt.

use crate::engines::AssetStore;
use crate::{PatterError, Result};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{header, StatusCode};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

pub struct HttpAssetStore {
    client: reqwest::Client,
}

impl HttpAssetStore {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    fn staging_path(path: &Path) -> PathBuf {
        let mut os = path.as_os_str().to_owned();
        os.push(".partial");
        PathBuf::from(os)
    }
}

impl Default for HttpAssetStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AssetStore for HttpAssetStore {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    async fn download(
        &self,
        url: &str,
        path: &Path,
        on_progress: &mut (dyn FnMut(u64, Option<u64>) + Send),
    ) -> Result<()> {
        if path.exists() {
            debug!(path = %path.display(), "asset already present, skipping download");
            return Ok(());
        }

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let staging = Self::staging_path(path);
        let mut resume_from = match tokio::fs::metadata(&staging).await {
            Ok(meta) => meta.len(),
            Err(_) => 0,
        };
        if resume_from > 0 {
            info!(
                path = %path.display(),
                resume_from, "resuming interrupted download"
            );
        }

        let mut request = self.client.get(url);
        if resume_from > 0 {
            request = request.header(header::RANGE, format!("bytes={}-", resume_from));
        }

        let mut response = request
            .send()
            .await
            .map_err(|e| PatterError::Provisioning(format!("request failed: {}", e)))?;

        // A 200 in answer to a Range request means the server is sending the
        // whole file; appending it to the staging file would corrupt it.
        if resume_from > 0 && response.status() == StatusCode::OK {
            warn!(url, "server ignored range request, restarting download");
            let _ = tokio::fs::remove_file(&staging).await;
            resume_from = 0;
            response = self
                .client
                .get(url)
                .send()
                .await
                .map_err(|e| PatterError::Provisioning(format!("request failed: {}", e)))?;
        }

        if !response.status().is_success() && response.status() != StatusCode::PARTIAL_CONTENT {
            return Err(PatterError::Provisioning(format!(
                "download failed: HTTP {}",
                response.status()
            )));
        }

        let total = response.content_length().map(|len| len + resume_from);
        let mut written = resume_from;

        let mut file = if resume_from > 0 {
            tokio::fs::OpenOptions::new()
                .append(true)
                .open(&staging)
                .await?
        } else {
            tokio::fs::File::create(&staging).await?
        };

        on_progress(written, total);

        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            // The staging file is kept on failure so the next attempt can
            // resume from where this one stopped.
            let chunk = chunk
                .map_err(|e| PatterError::Provisioning(format!("download interrupted: {}", e)))?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
            on_progress(written, total);
        }

        file.flush().await?;
        drop(file);
        tokio::fs::rename(&staging, path).await?;

        info!(path = %path.display(), bytes = written, "download complete");
        Ok(())
    }

    fn delete(&self, path: &Path) -> Result<()> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
