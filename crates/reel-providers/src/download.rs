//! Streaming downloads into the staging area.

use futures_util::StreamExt;
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::adapter::StagingPaths;
use crate::error::{parse_retry_after, ProviderError, ProviderResult};

/// Stream `url` into the partial file, then rename it into place.
///
/// The partial file is removed on any failure.
pub async fn download_to_staging(
    client: &reqwest::Client,
    url: &str,
    paths: &StagingPaths,
) -> ProviderResult<u64> {
    let result = stream_to(client, url, &paths.partial).await;
    finish(result, paths).await
}

/// Write an in-memory payload (inline video bytes, decoded base64) the same way.
pub async fn write_to_staging(bytes: &[u8], paths: &StagingPaths) -> ProviderResult<u64> {
    let result = async {
        tokio::fs::write(&paths.partial, bytes).await?;
        Ok(bytes.len() as u64)
    }
    .await;
    finish(result, paths).await
}

async fn finish(result: ProviderResult<u64>, paths: &StagingPaths) -> ProviderResult<u64> {
    match result {
        Ok(0) => {
            let _ = tokio::fs::remove_file(&paths.partial).await;
            Err(ProviderError::transient("provider returned an empty video"))
        }
        Ok(bytes) => {
            if let Err(e) = tokio::fs::rename(&paths.partial, &paths.video).await {
                let _ = tokio::fs::remove_file(&paths.partial).await;
                return Err(e.into());
            }
            info!(path = %paths.video.display(), bytes, "Generated clip downloaded");
            Ok(bytes)
        }
        Err(e) => {
            let _ = tokio::fs::remove_file(&paths.partial).await;
            Err(e)
        }
    }
}

async fn stream_to(client: &reqwest::Client, url: &str, dest: &Path) -> ProviderResult<u64> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    debug!(url, "Downloading generated clip");
    let response = client.get(url).send().await?;

    let status = response.status();
    if !status.is_success() {
        let retry_after = parse_retry_after(response.headers());
        let body = response.text().await.unwrap_or_default();
        return Err(ProviderError::from_http_status(status.as_u16(), &body, retry_after));
    }

    let mut file = tokio::fs::File::create(dest).await?;
    let mut stream = response.bytes_stream();
    let mut written = 0u64;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;

    Ok(written)
}
