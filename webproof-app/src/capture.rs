//! Transcript source reading exchanges an external capturing proxy spools to
//! disk as `<name>.request` / `<name>.response` pairs.
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};
use webproof_actors::{CaptureRequest, CapturedExchange, TranscriptSource};
use webproof_config::{CaptureConfig, UrlMatcher};
use webproof_transcript::graphql::operation_name;
use webproof_transcript::query::request_target_url;
use webproof_transcript::Transcript;

const REQUEST_EXT: &str = "request";
const RESPONSE_EXT: &str = "response";

pub struct SpoolCapture {
    dir: PathBuf,
    poll: Duration,
}

impl SpoolCapture {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            poll: Duration::from_millis(200),
        }
    }

    pub fn from_config(config: &CaptureConfig) -> Self {
        Self::new(&config.spool_dir).with_poll(config.poll_interval())
    }

    pub fn with_poll(mut self, poll: Duration) -> Self {
        self.poll = poll;
        self
    }

    /// First complete pair, in file-name order, whose target URL matches.
    async fn scan(
        &self,
        matcher: &UrlMatcher,
        operation: Option<&str>,
    ) -> Result<Option<CapturedExchange>> {
        let mut requests = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("read {}", self.dir.display())),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == REQUEST_EXT) {
                requests.push(path);
            }
        }
        requests.sort();

        for request_path in requests {
            let response_path = request_path.with_extension(RESPONSE_EXT);
            if !tokio::fs::try_exists(&response_path).await? {
                continue;
            }
            let request = Transcript::new(read(&request_path).await?);
            let Ok(url) = request_target_url(&request) else {
                debug!(file = %request_path.display(), "capture.unreadable_request");
                continue;
            };
            if !matcher.is_match(&url) {
                continue;
            }
            if let Some(expected) = operation {
                if operation_name(&request).ok().as_deref() != Some(expected.as_bytes()) {
                    continue;
                }
            }
            let response = Transcript::new(read(&response_path).await?);
            return Ok(Some(CapturedExchange {
                url,
                request,
                response,
            }));
        }
        Ok(None)
    }
}

#[async_trait]
impl TranscriptSource for SpoolCapture {
    async fn capture(&self, request: &CaptureRequest) -> Result<CapturedExchange> {
        let matcher = request
            .url
            .matcher()
            .with_context(|| format!("url pattern `{}`", request.url))?;
        info!(step = request.step, pattern = %request.url, dir = %self.dir.display(), "capture.waiting");
        loop {
            if let Some(exchange) = self
                .scan(&matcher, request.graphql_operation.as_deref())
                .await?
            {
                info!(step = request.step, url = %exchange.url, "capture.found");
                return Ok(exchange);
            }
            tokio::time::sleep(self.poll).await;
        }
    }
}

async fn read(path: &Path) -> Result<Vec<u8>> {
    tokio::fs::read(path)
        .await
        .with_context(|| format!("read {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use webproof_config::UrlPattern;

    fn spool(dir: &Path, name: &str, request: &str, response: &str) {
        std::fs::write(dir.join(format!("{name}.request")), request).unwrap();
        std::fs::write(dir.join(format!("{name}.response")), response).unwrap();
    }

    fn capture_request(pattern: &str, operation: Option<&str>) -> CaptureRequest {
        CaptureRequest {
            step: 0,
            url: UrlPattern::Glob {
                pattern: pattern.into(),
            },
            graphql_operation: operation.map(str::to_owned),
        }
    }

    #[tokio::test]
    async fn picks_the_first_complete_matching_pair() {
        let dir = tempfile::tempdir().unwrap();
        spool(
            dir.path(),
            "001",
            "GET /other HTTP/1.1\r\nHost: a.test\r\n\r\n",
            "HTTP/1.1 200 OK\r\n\r\n{}",
        );
        std::fs::write(
            dir.path().join("002.request"),
            "GET /api/me HTTP/1.1\r\nHost: a.test\r\n\r\n",
        )
        .unwrap();
        spool(
            dir.path(),
            "003",
            "GET /api/me?x=1 HTTP/1.1\r\nHost: a.test\r\n\r\n",
            "HTTP/1.1 200 OK\r\n\r\n{\"me\":\"ana\"}",
        );

        let exchange = SpoolCapture::new(dir.path())
            .capture(&capture_request("https://a.test/api/*", None))
            .await
            .unwrap();
        assert_eq!(exchange.url, "https://a.test/api/me?x=1");
        assert!(exchange.response.as_bytes().ends_with(b"{\"me\":\"ana\"}"));
    }

    #[tokio::test]
    async fn graphql_captures_are_told_apart_by_operation() {
        let dir = tempfile::tempdir().unwrap();
        let gql = |op: &str| {
            format!(
                "POST /graphql HTTP/1.1\r\nHost: a.test\r\n\r\n{{\"operationName\":\"{op}\",\"query\":\"q\"}}"
            )
        };
        spool(dir.path(), "a", &gql("Feed"), "HTTP/1.1 200 OK\r\n\r\n{\"feed\":\"x\"}");
        spool(dir.path(), "b", &gql("Viewer"), "HTTP/1.1 200 OK\r\n\r\n{\"viewer\":\"y\"}");

        let exchange = SpoolCapture::new(dir.path())
            .capture(&capture_request("https://a.test/graphql", Some("Viewer")))
            .await
            .unwrap();
        assert!(exchange.response.as_bytes().ends_with(b"{\"viewer\":\"y\"}"));
    }

    #[tokio::test]
    async fn waits_for_the_response_half_to_land() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("001.request"),
            "GET /api/me HTTP/1.1\r\nHost: a.test\r\n\r\n",
        )
        .unwrap();
        let config = CaptureConfig {
            spool_dir: dir.path().to_path_buf(),
            poll_ms: 10,
        };
        let capture = SpoolCapture::from_config(&config);
        assert_eq!(capture.poll, Duration::from_millis(10));

        let late = dir.path().join("001.response");
        let writer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            tokio::fs::write(late, "HTTP/1.1 200 OK\r\n\r\n{}").await.unwrap();
        });
        let exchange = tokio::time::timeout(
            Duration::from_secs(5),
            capture.capture(&capture_request("https://a.test/api/*", None)),
        )
        .await
        .unwrap()
        .unwrap();
        writer.await.unwrap();
        assert_eq!(exchange.url, "https://a.test/api/me");
    }
}
