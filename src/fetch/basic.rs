//! Plain HTTP GET streamed to disk

use async_trait::async_trait;
use reqwest::header::LOCATION;
use reqwest::redirect::Policy;
use reqwest::{Client, Response};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, warn};
use url::Url;

use super::{FetchError, FetchStrategy, collect_headers};
use crate::config::RelayConfig;
use crate::jobs::{CookieMap, FetchMode, Job, JobMetadata, RedirectHop};

/// Reasons a target never produced a final response
#[derive(Debug, Error)]
enum ConnectError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("no response within {0:?}")]
    Timeout(Duration),
    #[error("more than {0} redirects")]
    TooManyRedirects(usize),
    #[error("unusable redirect location: {0}")]
    BadLocation(String),
}

#[derive(Debug, Error)]
enum BodyError {
    #[error("body read failed: {0}")]
    Read(#[from] reqwest::Error),
    #[error("body write failed: {0}")]
    Write(#[from] std::io::Error),
}

pub struct BasicFetcher {
    connect_timeout: Duration,
    request_timeout: Duration,
    max_redirects: usize,
    verify_tls: bool,
    chunk_size: usize,
}

impl BasicFetcher {
    pub fn new(config: &RelayConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout(),
            request_timeout: config.request_timeout(),
            max_redirects: config.max_redirects,
            verify_tls: config.verify_tls,
            chunk_size: config.chunk_size.as_usize(),
        }
    }

    /// One client per job, so cookies picked up along a redirect chain never
    /// leak into another job. `request_timeout` bounds each hop's response
    /// head in [`Self::follow`]; the body stream itself has no deadline.
    fn build_client(&self, user_agent: &str) -> Result<Client, FetchError> {
        Client::builder()
            .connect_timeout(self.connect_timeout)
            .user_agent(user_agent)
            .redirect(Policy::none())
            .cookie_store(true)
            .danger_accept_invalid_certs(!self.verify_tls)
            .build()
            .map_err(|e| FetchError::Client(e.to_string()))
    }

    /// Follows redirects by hand so each hop lands in the metadata.
    async fn follow(
        &self,
        client: &Client,
        url: &str,
        metadata: &mut JobMetadata,
    ) -> Result<Response, ConnectError> {
        let mut current =
            Url::parse(url).map_err(|e| ConnectError::BadLocation(e.to_string()))?;

        loop {
            let request = client.get(current.clone()).send();
            let response = tokio::time::timeout(self.request_timeout, request)
                .await
                .map_err(|_| ConnectError::Timeout(self.request_timeout))??;
            collect_cookies(&response, &mut metadata.cookies);

            let status = response.status();
            let location = response
                .headers()
                .get(LOCATION)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string);

            let Some(location) = location.filter(|_| status.is_redirection()) else {
                return Ok(response);
            };

            if metadata.redirects.len() >= self.max_redirects {
                return Err(ConnectError::TooManyRedirects(self.max_redirects));
            }

            metadata.redirects.push(RedirectHop {
                headers: collect_headers(response.headers()),
                response_code: status.as_u16(),
            });

            current = current
                .join(&location)
                .map_err(|_| ConnectError::BadLocation(location))?;
            debug!(status = status.as_u16(), next = %current, "Following redirect");
        }
    }

    /// Streams the body to `path`. Bytes received before a failure are
    /// flushed to disk before the error is returned.
    async fn write_body(&self, mut response: Response, path: &Path) -> Result<u64, BodyError> {
        let file = tokio::fs::File::create(path).await?;
        let mut writer = BufWriter::with_capacity(self.chunk_size, file);
        let mut written = 0u64;

        let copied = async {
            while let Some(chunk) = response.chunk().await? {
                writer.write_all(&chunk).await?;
                written += chunk.len() as u64;
            }
            Ok::<(), BodyError>(())
        }
        .await;
        let flushed = writer.flush().await;

        copied?;
        flushed?;
        Ok(written)
    }
}

#[async_trait]
impl FetchStrategy for BasicFetcher {
    fn mode(&self) -> FetchMode {
        FetchMode::Basic
    }

    async fn fetch(&self, job: &Job) -> Result<JobMetadata, FetchError> {
        let client = self.build_client(&job.user_agent)?;
        let mut metadata = JobMetadata::for_job(job);

        let response = match self.follow(&client, &job.actual_url, &mut metadata).await {
            Ok(response) => response,
            Err(err) => {
                warn!(job_id = %job.id, url = %job.actual_url, error = %err, "Connection failed");
                metadata.record_connection_failure();
                return Ok(metadata);
            }
        };

        let status = response.status();
        let headers = collect_headers(response.headers());
        let cookies = std::mem::take(&mut metadata.cookies);
        metadata.record_connected(status.as_u16(), headers, cookies);
        metadata.record_fetch(!(status.is_client_error() || status.is_server_error()));

        // The body is kept whatever the status: error pages are evidence too.
        match self.write_body(response, &job.payload_path()).await {
            Ok(bytes) => {
                debug!(job_id = %job.id, bytes, "Body written");
                metadata.record_object_write(true);
            }
            Err(err) => {
                warn!(job_id = %job.id, error = %err, "Failed to store body");
                metadata.record_object_write(false);
            }
        }

        Ok(metadata)
    }
}

fn collect_cookies(response: &Response, cookies: &mut CookieMap) {
    for cookie in response.cookies() {
        cookies.insert(cookie.name().to_string(), cookie.value().to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::JobId;
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn job_in(dir: &TempDir, url: &str) -> Job {
        let id = JobId::generate();
        Job {
            id,
            mode: FetchMode::Basic,
            requested_url: url.to_string(),
            actual_url: url.to_string(),
            user_agent: "TestAgent/1.0".to_string(),
            dir: dir.path().to_path_buf(),
        }
    }

    fn fetcher() -> BasicFetcher {
        fetcher_with_timeout(5)
    }

    fn fetcher_with_timeout(request_timeout_secs: u64) -> BasicFetcher {
        let config = RelayConfig {
            connect_timeout_secs: 2,
            request_timeout_secs,
            ..RelayConfig::default()
        };
        BasicFetcher::new(&config)
    }

    /// Serves one connection by writing `parts` after their delays, then
    /// closing the socket.
    async fn scripted_target(parts: Vec<(Duration, &'static [u8])>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 1024];
            let _ = socket.read(&mut request).await;
            for (delay, bytes) in parts {
                tokio::time::sleep(delay).await;
                if socket.write_all(bytes).await.is_err() {
                    return;
                }
            }
        });
        format!("http://{address}/slow")
    }

    const HEAD: &[u8] =
        b"HTTP/1.1 200 OK\r\ncontent-length: 10\r\nx-test: yes\r\nset-cookie: s=1\r\n\r\n";

    #[tokio::test]
    async fn test_success_writes_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/page"))
            .and(header("user-agent", "TestAgent/1.0"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("x-test", "yes")
                    .insert_header("set-cookie", "session=abc; Path=/")
                    .set_body_string("hello relay"),
            )
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let job = job_in(&dir, &format!("{}/page", server.uri()));
        let metadata = fetcher().fetch(&job).await.unwrap();

        assert_eq!(metadata.connection_success, Some(true));
        assert_eq!(metadata.fetch_success, Some(true));
        assert_eq!(metadata.fetch_object_success, Some(true));
        assert_eq!(metadata.response_code, Some(200));
        assert_eq!(metadata.server_headers["x-test"], "yes");
        assert_eq!(metadata.cookies["session"], "abc");
        assert_eq!(
            std::fs::read_to_string(job.payload_path()).unwrap(),
            "hello relay"
        );
    }

    #[tokio::test]
    async fn test_error_status_still_stores_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404).set_body_string("missing"))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let job = job_in(&dir, &format!("{}/nope", server.uri()));
        let metadata = fetcher().fetch(&job).await.unwrap();

        assert_eq!(metadata.connection_success, Some(true));
        assert_eq!(metadata.fetch_success, Some(false));
        assert_eq!(metadata.fetch_object_success, Some(true));
        assert_eq!(metadata.response_code, Some(404));
        assert_eq!(std::fs::read_to_string(job.payload_path()).unwrap(), "missing");
    }

    #[tokio::test]
    async fn test_redirects_are_recorded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/old"))
            .respond_with(ResponseTemplate::new(301).insert_header("location", "/new"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/new"))
            .respond_with(ResponseTemplate::new(200).set_body_string("moved"))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let job = job_in(&dir, &format!("{}/old", server.uri()));
        let metadata = fetcher().fetch(&job).await.unwrap();

        assert_eq!(metadata.redirects.len(), 1);
        assert_eq!(metadata.redirects[0].response_code, 301);
        assert_eq!(metadata.redirects[0].headers["location"], "/new");
        assert_eq!(metadata.response_code, Some(200));
        assert_eq!(std::fs::read_to_string(job.payload_path()).unwrap(), "moved");
    }

    #[tokio::test]
    async fn test_redirect_loop_is_a_connection_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/loop"))
            .respond_with(ResponseTemplate::new(302).insert_header("location", "/loop"))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let job = job_in(&dir, &format!("{}/loop", server.uri()));
        let metadata = fetcher().fetch(&job).await.unwrap();

        assert_eq!(metadata.connection_success, Some(false));
        assert_eq!(metadata.fetch_success, None);
        assert!(!job.payload_path().exists());
    }

    #[tokio::test]
    async fn test_unreachable_target() {
        let dir = TempDir::new().unwrap();
        let job = job_in(&dir, "http://127.0.0.1:1/");
        let metadata = fetcher().fetch(&job).await.unwrap();

        assert_eq!(metadata.connection_success, Some(false));
        assert_eq!(metadata.fetch_success, None);
        assert_eq!(metadata.fetch_object_success, None);
        assert!(!job.payload_path().exists());
    }

    #[tokio::test]
    async fn test_slow_body_outlives_request_timeout() {
        let url = scripted_target(vec![
            (Duration::ZERO, HEAD),
            (Duration::ZERO, &b"hello"[..]),
            (Duration::from_millis(1500), &b"world"[..]),
        ])
        .await;

        let dir = TempDir::new().unwrap();
        let job = job_in(&dir, &url);
        let metadata = fetcher_with_timeout(1).fetch(&job).await.unwrap();

        assert_eq!(metadata.fetch_object_success, Some(true));
        assert_eq!(
            std::fs::read_to_string(job.payload_path()).unwrap(),
            "helloworld"
        );
    }

    #[tokio::test]
    async fn test_truncated_body_keeps_received_bytes() {
        let url = scripted_target(vec![
            (Duration::ZERO, HEAD),
            (Duration::ZERO, &b"hello"[..]),
        ])
        .await;

        let dir = TempDir::new().unwrap();
        let job = job_in(&dir, &url);
        let metadata = fetcher().fetch(&job).await.unwrap();

        assert_eq!(metadata.connection_success, Some(true));
        assert_eq!(metadata.fetch_success, Some(true));
        assert_eq!(metadata.fetch_object_success, Some(false));
        assert_eq!(metadata.response_code, Some(200));
        assert_eq!(metadata.server_headers["x-test"], "yes");
        assert_eq!(metadata.cookies["s"], "1");
        assert_eq!(std::fs::read_to_string(job.payload_path()).unwrap(), "hello");
    }

    #[tokio::test]
    async fn test_unwritable_payload_keeps_metadata() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("x-test", "yes")
                    .set_body_string("hello"),
            )
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let job = job_in(&dir, &format!("{}/page", server.uri()));
        std::fs::create_dir(job.payload_path()).unwrap();
        let metadata = fetcher().fetch(&job).await.unwrap();

        assert_eq!(metadata.connection_success, Some(true));
        assert_eq!(metadata.fetch_success, Some(true));
        assert_eq!(metadata.fetch_object_success, Some(false));
        assert_eq!(metadata.response_code, Some(200));
        assert_eq!(metadata.server_headers["x-test"], "yes");
    }

    #[tokio::test]
    async fn test_missing_response_head_times_out() {
        let url = scripted_target(vec![(Duration::from_secs(5), HEAD)]).await;

        let dir = TempDir::new().unwrap();
        let job = job_in(&dir, &url);
        let metadata = fetcher_with_timeout(1).fetch(&job).await.unwrap();

        assert_eq!(metadata.connection_success, Some(false));
        assert!(!job.payload_path().exists());
    }
}
