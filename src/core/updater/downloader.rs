use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use hotswap_services::FsBundleRuntime;
use hotswap_services::http::build_client;
use hotswap_types::{DownloadRequest, TransportEvent};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

/// Moves a bundle from its URL onto the device.
#[async_trait]
pub trait BundleTransport: Send + Sync {
    /// Run one download.
    ///
    /// `Err` means the transfer could not be started at all. Otherwise the
    /// outcome is reported on `events`, ending with exactly one
    /// `Succeeded` or `Failed`.
    ///
    /// Implementations must stop promptly once `cancel` fires. With a stall
    /// timeout configured, a transport still running one stall period after
    /// its outcome is dropped; without one it is awaited to completion.
    async fn download(
        &self,
        request: DownloadRequest,
        events: UnboundedSender<TransportEvent>,
        cancel: CancellationToken,
    ) -> Result<()>;
}

/// HTTP transport that streams into the bundle runtime's staging area
pub struct UpdateDownloader {
    client: reqwest::Client,
    runtime: Arc<FsBundleRuntime>,
}

impl UpdateDownloader {
    pub fn new(runtime: Arc<FsBundleRuntime>, proxy_url: Option<&str>) -> Result<Self> {
        // No total timeout, bundles can be large. Stalls are handled upstream.
        let client = build_client(None, proxy_url)?;
        Ok(Self { client, runtime })
    }

    /// Get the download directory
    pub fn download_dir(&self) -> &Path {
        self.runtime.root()
    }

    async fn transfer(
        &self,
        url: reqwest::Url,
        staged: &Path,
        events: &UnboundedSender<TransportEvent>,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        let mut response = tokio::select! {
            biased;
            _ = cancel.cancelled() => bail!("Download cancelled"),
            response = self.client.get(url).send() => {
                response.context("Failed to request bundle")?
            }
        };

        let status = response.status();
        if !status.is_success() {
            bail!("Bundle server responded with {}", status);
        }

        let total = response.content_length();
        let mut file = tokio::fs::File::create(staged)
            .await
            .with_context(|| format!("Failed to create {:?}", staged))?;
        let mut received = 0u64;
        let _ = events.send(TransportEvent::progress(0, total));

        loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => bail!("Download cancelled"),
                chunk = response.chunk() => chunk.context("Failed to read bundle body")?,
            };
            let Some(chunk) = chunk else {
                break;
            };

            file.write_all(&chunk)
                .await
                .with_context(|| format!("Failed to write {:?}", staged))?;
            received += chunk.len() as u64;
            let _ = events.send(TransportEvent::progress(received, total));
        }

        file.flush().await?;
        file.sync_all().await?;

        if let Some(total) = total {
            if received != total {
                bail!("Bundle truncated: received {} of {} bytes", received, total);
            }
        }
        Ok(received)
    }
}

#[async_trait]
impl BundleTransport for UpdateDownloader {
    async fn download(
        &self,
        request: DownloadRequest,
        events: UnboundedSender<TransportEvent>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let url = reqwest::Url::parse(&request.bundle_url)
            .with_context(|| format!("Invalid bundle URL: {}", request.bundle_url))?;
        let staged = self.runtime.prepare_staging(&request.cache_key).await?;

        log::info!(
            "[UpdateDownloader] Downloading {} -> {}",
            request.bundle_url,
            staged.display()
        );

        let received = match self.transfer(url, &staged, &events, &cancel).await {
            Ok(received) => received,
            Err(e) => {
                log::warn!("[UpdateDownloader] Transfer failed: {:#}", e);
                self.runtime.discard_staged(&request.cache_key).await;
                let _ = events.send(TransportEvent::failed(format!("{:#}", e)));
                return Ok(());
            }
        };

        log::info!("[UpdateDownloader] Received {} bytes", received);

        if request.install_after_download {
            if let Err(e) = self
                .runtime
                .install(&request.cache_key, &request.bundle_url)
                .await
            {
                log::error!("[UpdateDownloader] Install failed: {:#}", e);
                self.runtime.discard_staged(&request.cache_key).await;
                let _ = events.send(TransportEvent::failed(format!("Install failed: {:#}", e)));
                return Ok(());
            }
        }

        let _ = events.send(TransportEvent::Succeeded);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hotswap_services::BundleRuntime;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    /// Serve one canned HTTP response and return the URL to fetch it from.
    async fn serve_once(status_line: &'static str, body: &'static [u8]) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            let head = format!(
                "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                status_line,
                body.len()
            );
            socket.write_all(head.as_bytes()).await.unwrap();
            socket.write_all(body).await.unwrap();
            socket.shutdown().await.ok();
        });

        format!("http://{}/bundles/b1.zip", addr)
    }

    fn request(url: &str, install: bool) -> DownloadRequest {
        DownloadRequest {
            bundle_url: url.to_string(),
            cache_key: "1700000000000".to_string(),
            install_after_download: install,
        }
    }

    async fn collect(mut rx: mpsc::UnboundedReceiver<TransportEvent>) -> Vec<TransportEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_invalid_url_fails_to_start() {
        let temp_dir = tempfile::tempdir().unwrap();
        let runtime = Arc::new(FsBundleRuntime::new(temp_dir.path()));
        let downloader = UpdateDownloader::new(runtime, None).unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();

        let result = downloader
            .download(request("not a url", true), tx, CancellationToken::new())
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_download_installs_bundle() {
        let temp_dir = tempfile::tempdir().unwrap();
        let runtime = Arc::new(FsBundleRuntime::new(temp_dir.path()));
        let downloader = UpdateDownloader::new(runtime.clone(), None).unwrap();
        let url = serve_once("200 OK", b"bundle-bytes").await;
        let (tx, rx) = mpsc::unbounded_channel();

        downloader
            .download(request(&url, true), tx, CancellationToken::new())
            .await
            .unwrap();
        let events = collect(rx).await;

        assert_eq!(events.last(), Some(&TransportEvent::Succeeded));
        assert!(events.contains(&TransportEvent::progress(12, Some(12))));
        assert_eq!(
            runtime.current_bundle_id().await.unwrap().as_deref(),
            Some("1700000000000")
        );
        let installed = runtime.bundle_path("1700000000000").unwrap();
        assert_eq!(std::fs::read(installed).unwrap(), b"bundle-bytes");
    }

    #[tokio::test]
    async fn test_http_error_reports_failure() {
        let temp_dir = tempfile::tempdir().unwrap();
        let runtime = Arc::new(FsBundleRuntime::new(temp_dir.path()));
        let downloader = UpdateDownloader::new(runtime.clone(), None).unwrap();
        let url = serve_once("404 Not Found", b"missing").await;
        let (tx, rx) = mpsc::unbounded_channel();

        downloader
            .download(request(&url, true), tx, CancellationToken::new())
            .await
            .unwrap();
        let events = collect(rx).await;

        assert!(matches!(events.last(), Some(TransportEvent::Failed { .. })));
        assert_eq!(runtime.current_bundle_id().await.unwrap(), None);
        assert!(!runtime.staging_path("1700000000000").unwrap().exists());
    }

    #[tokio::test]
    async fn test_cancelled_before_start_reports_failure() {
        let temp_dir = tempfile::tempdir().unwrap();
        let runtime = Arc::new(FsBundleRuntime::new(temp_dir.path()));
        let downloader = UpdateDownloader::new(runtime, None).unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        cancel.cancel();

        downloader
            .download(request("http://127.0.0.1:9/b1.zip", true), tx, cancel)
            .await
            .unwrap();
        let events = collect(rx).await;

        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            TransportEvent::Failed { message } if message.contains("cancelled")
        ));
    }
}
