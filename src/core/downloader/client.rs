use std::path::{Path, PathBuf};
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::LOCATION;
use reqwest::{Client, StatusCode, Url};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};

use super::progress::{emit, ProgressEvent, ProgressFn, ProgressTracker};
use crate::core::archive::integrity;
use crate::core::error::{LauncherError, LauncherResult};
use crate::core::http::build_http_client;

const MAX_REDIRECTS: usize = 5;
const DEFAULT_ATTEMPTS: u32 = 3;
const DEFAULT_BACKOFF: Duration = Duration::from_secs(2);
const DEFAULT_STALL_TIMEOUT: Duration = Duration::from_secs(30);
const PROGRESS_INTERVAL: Duration = Duration::from_millis(200);

/// A single file to download with optional SHA-256 for validation.
#[derive(Debug, Clone)]
pub struct DownloadTask {
    pub url: String,
    pub dest: PathBuf,
    pub sha256: Option<String>,
}

impl DownloadTask {
    pub fn new(url: impl Into<String>, dest: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            dest: dest.into(),
            sha256: None,
        }
    }

    pub fn with_sha256(mut self, sha256: impl Into<String>) -> Self {
        self.sha256 = Some(sha256.into());
        self
    }
}

/// Resilient single-file downloader.
///
/// Redirects are walked manually, stalls abort the transfer, transient
/// failures are retried with linear backoff and a failed attempt never
/// leaves a partial file behind.
#[derive(Debug, Clone)]
pub struct Downloader {
    client: Client,
    attempts: u32,
    backoff: Duration,
    stall_timeout: Duration,
}

impl Downloader {
    pub fn new() -> LauncherResult<Self> {
        Ok(Self::with_client(build_http_client()?))
    }

    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            attempts: DEFAULT_ATTEMPTS,
            backoff: DEFAULT_BACKOFF,
            stall_timeout: DEFAULT_STALL_TIMEOUT,
        }
    }

    pub fn with_retry(mut self, attempts: u32, backoff: Duration) -> Self {
        self.attempts = attempts.max(1);
        self.backoff = backoff;
        self
    }

    pub fn with_stall_timeout(mut self, stall_timeout: Duration) -> Self {
        self.stall_timeout = stall_timeout;
        self
    }

    pub fn http_client(&self) -> &Client {
        &self.client
    }

    /// Convenience wrapper for a download without checksum.
    pub async fn download_file(
        &self,
        url: &str,
        dest: &Path,
        on_progress: Option<&ProgressFn<'_>>,
    ) -> LauncherResult<u64> {
        self.download(&DownloadTask::new(url, dest), on_progress)
            .await
    }

    /// Download `task.url` to `task.dest`, verifying SHA-256 when supplied.
    ///
    /// Returns the number of bytes written.
    #[instrument(skip(self, on_progress), fields(url = %task.url))]
    pub async fn download(
        &self,
        task: &DownloadTask,
        on_progress: Option<&ProgressFn<'_>>,
    ) -> LauncherResult<u64> {
        if let Some(parent) = task.dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| LauncherError::io(parent, e))?;
        }

        let mut attempt = 0;
        let written = loop {
            attempt += 1;
            match self.download_once(&task.url, &task.dest, on_progress).await {
                Ok(written) => break written,
                Err(err) if err.is_retryable() && attempt < self.attempts => {
                    let delay = self.backoff * attempt;
                    warn!(
                        "Download attempt {}/{} failed: {}. Retrying in {:?}",
                        attempt, self.attempts, err, delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        };

        if let Some(expected) = task.sha256.as_deref() {
            integrity::verify_sha256(&task.dest, expected).await?;
        }

        info!("Downloaded {} bytes -> {:?}", written, task.dest);
        Ok(written)
    }

    async fn download_once(
        &self,
        url: &str,
        dest: &Path,
        on_progress: Option<&ProgressFn<'_>>,
    ) -> LauncherResult<u64> {
        let temp = temp_path(dest);
        let _ = tokio::fs::remove_file(&temp).await;

        match self.stream_to_file(url, &temp, dest, on_progress).await {
            Ok(written) => {
                tokio::fs::rename(&temp, dest)
                    .await
                    .map_err(|e| LauncherError::io(dest, e))?;
                Ok(written)
            }
            Err(err) => {
                let _ = tokio::fs::remove_file(&temp).await;
                Err(err)
            }
        }
    }

    async fn stream_to_file(
        &self,
        url: &str,
        temp: &Path,
        dest: &Path,
        on_progress: Option<&ProgressFn<'_>>,
    ) -> LauncherResult<u64> {
        let response = self.send_following_redirects(url).await?;
        if response.status() != StatusCode::OK {
            return Err(LauncherError::DownloadFailed {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        let total = response.content_length();
        let label = dest
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let mut tracker = ProgressTracker::new(label, PROGRESS_INTERVAL);

        // Scope the handle so it is closed before the rename.
        let done = {
            let mut file = tokio::fs::File::create(temp)
                .await
                .map_err(|e| LauncherError::io(temp, e))?;
            let mut stream = response.bytes_stream();
            let mut done = 0_u64;

            loop {
                let next = tokio::time::timeout(self.stall_timeout, stream.next()).await;
                let chunk = match next {
                    Err(_) => {
                        return Err(LauncherError::Stalled {
                            url: url.to_string(),
                            seconds: self.stall_timeout.as_secs(),
                        })
                    }
                    Ok(None) => break,
                    Ok(Some(chunk)) => chunk?,
                };

                file.write_all(&chunk)
                    .await
                    .map_err(|e| LauncherError::io(temp, e))?;
                done += chunk.len() as u64;

                if let Some(event) = tracker.update(done, total) {
                    emit(on_progress, event);
                }
            }

            file.flush().await.map_err(|e| LauncherError::io(temp, e))?;
            done
        };

        if let Some(expected) = total {
            if done != expected {
                return Err(LauncherError::io(
                    temp,
                    std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        format!("received {done} of {expected} bytes"),
                    ),
                ));
            }
        }

        emit(on_progress, tracker.finish(done, total));
        Ok(done)
    }

    async fn send_following_redirects(&self, url: &str) -> LauncherResult<reqwest::Response> {
        let mut current = Url::parse(url).map_err(|e| LauncherError::InvalidUrl(format!("{url}: {e}")))?;

        for _ in 0..=MAX_REDIRECTS {
            let send = self.client.get(current.clone()).send();
            let response = tokio::time::timeout(self.stall_timeout, send)
                .await
                .map_err(|_| LauncherError::Stalled {
                    url: current.to_string(),
                    seconds: self.stall_timeout.as_secs(),
                })??;

            if !is_redirect(response.status()) {
                return Ok(response);
            }

            let location = response
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| LauncherError::DownloadFailed {
                    url: current.to_string(),
                    status: response.status().as_u16(),
                })?;
            let next = current
                .join(location)
                .map_err(|e| LauncherError::InvalidUrl(format!("{location}: {e}")))?;
            debug!("Redirect {} -> {}", current, next);
            current = next;
        }

        Err(LauncherError::TooManyRedirects {
            url: url.to_string(),
        })
    }
}

fn is_redirect(status: StatusCode) -> bool {
    matches!(status.as_u16(), 301 | 302 | 303 | 307 | 308)
}

fn temp_path(dest: &Path) -> PathBuf {
    let mut name = dest
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    dest.with_file_name(name)
}

/// Emit a plain status message through an optional callback.
pub fn report(on_progress: Option<&ProgressFn<'_>>, message: &str, percent: Option<f64>) {
    emit(on_progress, ProgressEvent::message(message, percent));
}

#[cfg(test)]
pub(crate) mod test_server {
    use std::collections::HashMap;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Canned HTTP/1.1 response for the in-process stub server.
    #[derive(Clone, Default)]
    pub struct Route {
        pub status: u16,
        pub headers: Vec<(String, String)>,
        pub body: Vec<u8>,
        /// Send only this many body bytes, then hang.
        pub stall_after: Option<usize>,
        /// Omit Content-Length and close the connection after the body.
        pub no_length: bool,
    }

    impl Route {
        pub fn ok(body: &[u8]) -> Self {
            Self {
                status: 200,
                body: body.to_vec(),
                ..Self::default()
            }
        }

        pub fn redirect(location: &str) -> Self {
            Self {
                status: 302,
                headers: vec![("Location".into(), location.into())],
                ..Self::default()
            }
        }

        pub fn status(status: u16) -> Self {
            Self {
                status,
                body: b"error".to_vec(),
                ..Self::default()
            }
        }
    }

    pub struct TestServer {
        pub addr: SocketAddr,
        pub hits: Arc<AtomicUsize>,
    }

    impl TestServer {
        pub fn url(&self, path: &str) -> String {
            format!("http://{}{}", self.addr, path)
        }

        pub fn hits(&self) -> usize {
            self.hits.load(Ordering::SeqCst)
        }
    }

    pub async fn serve(routes: HashMap<&'static str, Route>) -> TestServer {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let routes = Arc::new(
            routes
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect::<HashMap<_, _>>(),
        );

        let counter = hits.clone();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let routes = routes.clone();
                let counter = counter.clone();
                tokio::spawn(async move {
                    let mut buf = Vec::new();
                    let mut chunk = [0_u8; 1024];
                    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                        match socket.read(&mut chunk).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => buf.extend_from_slice(&chunk[..n]),
                        }
                    }
                    counter.fetch_add(1, Ordering::SeqCst);

                    let request = String::from_utf8_lossy(&buf);
                    let path = request
                        .lines()
                        .next()
                        .and_then(|line| line.split_whitespace().nth(1))
                        .unwrap_or("/")
                        .to_string();
                    let route = routes.get(&path).cloned().unwrap_or(Route::status(404));

                    let mut head = format!("HTTP/1.1 {} Status\r\nConnection: close\r\n", route.status);
                    if !route.no_length {
                        head.push_str(&format!("Content-Length: {}\r\n", route.body.len()));
                    }
                    for (name, value) in &route.headers {
                        head.push_str(&format!("{name}: {value}\r\n"));
                    }
                    head.push_str("\r\n");
                    let _ = socket.write_all(head.as_bytes()).await;

                    match route.stall_after {
                        Some(n) => {
                            let _ = socket.write_all(&route.body[..n]).await;
                            let _ = socket.flush().await;
                            tokio::time::sleep(Duration::from_secs(10)).await;
                        }
                        None => {
                            let _ = socket.write_all(&route.body).await;
                            let _ = socket.flush().await;
                        }
                    }
                    let _ = socket.shutdown().await;
                });
            }
        });

        TestServer { addr, hits }
    }

    /// Client without proxy discovery so loopback requests stay local.
    pub fn client() -> reqwest::Client {
        reqwest::Client::builder()
            .no_proxy()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap()
    }
}
