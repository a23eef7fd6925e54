//! Remote log retrieval
//!
//! The log server publishes a newline-delimited index of its log files.
//! Retrieval lists that index, downloads whatever is not yet in the local
//! scan directory, and leaves ingestion to pick the files up. Failures here
//! are never fatal to ingestion; callers log and proceed with local files.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::config::RetrievalConfig;
use crate::error::{Error, Result};

/// A source of raw log files, listed and fetched by relative name.
#[async_trait]
pub trait RemoteSource {
    async fn list_remote_files(&self) -> Result<Vec<String>>;
    async fn download(&self, name: &str) -> Result<PathBuf>;
}

/// HTTP-backed source: `GET {base_url}/{index_path}` lists files,
/// `GET {base_url}/{name}` fetches one.
pub struct HttpSource {
    client: reqwest::Client,
    base_url: String,
    index_path: String,
    directory: PathBuf,
}

impl HttpSource {
    pub fn new(config: &RetrievalConfig, directory: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            index_path: config.index_path.clone(),
            directory: PathBuf::from(directory),
        }
    }
}

#[async_trait]
impl RemoteSource for HttpSource {
    async fn list_remote_files(&self) -> Result<Vec<String>> {
        let url = format!("{}/{}", self.base_url, self.index_path);
        let body = self
            .client
            .get(&url)
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            .map_err(|e| Error::RemoteTransfer(e.to_string()))?
            .text()
            .await
            .map_err(|e| Error::RemoteTransfer(e.to_string()))?;

        Ok(body
            .lines()
            .map(str::trim)
            .filter(|name| name.ends_with(".log"))
            .map(str::to_string)
            .collect())
    }

    async fn download(&self, name: &str) -> Result<PathBuf> {
        let url = format!("{}/{}", self.base_url, name);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            .map_err(|e| Error::RemoteTransfer(e.to_string()))?;

        let target = self.directory.join(name);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = tokio::fs::File::create(&target).await?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| Error::RemoteTransfer(e.to_string()))?;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        info!("Downloaded {}", target.display());
        Ok(target)
    }
}

/// Fetch every remote file not yet present locally. Returns the number of
/// files downloaded.
pub async fn retrieve_new_files(source: &dyn RemoteSource, directory: &str) -> Result<u64> {
    let remote = source.list_remote_files().await?;
    let root = Path::new(directory);

    let mut downloaded = 0;
    for name in remote {
        if root.join(&name).exists() {
            debug!("Skipping {}, already local", name);
            continue;
        }
        source.download(&name).await?;
        downloaded += 1;
    }

    info!("Downloading new files complete ({} fetched)", downloaded);
    Ok(downloaded)
}
