//! WebDriver has no push navigation events, so the session URL is sampled
//! and every change is broadcast.
use fantoccini::Client;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Consecutive failed samples after which the session is considered gone.
const MAX_FAILED_SAMPLES: usize = 5;

/// Remembers the last URL seen and reports only changes.
#[derive(Debug, Default)]
pub struct UrlWatch {
    last: Option<String>,
}

impl UrlWatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// `Some(url)` when `url` differs from the previous sample.
    pub fn observe(&mut self, url: &str) -> Option<String> {
        if self.last.as_deref() == Some(url) {
            return None;
        }
        self.last = Some(url.to_string());
        self.last.clone()
    }
}

pub fn spawn_url_watch(
    client: Client,
    every: Duration,
    tx: broadcast::Sender<String>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut watch = UrlWatch::new();
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut failures = 0;
        loop {
            ticker.tick().await;
            match client.current_url().await {
                Ok(url) => {
                    failures = 0;
                    if let Some(changed) = watch.observe(url.as_str()) {
                        debug!(url = %changed, "browser.navigated");
                        // Nobody listening is fine; the next subscriber asks for the current URL.
                        let _ = tx.send(changed);
                    }
                }
                Err(e) => {
                    failures += 1;
                    warn!(error = %e, failures, "browser.url_sample_failed");
                    if failures >= MAX_FAILED_SAMPLES {
                        break;
                    }
                }
            }
        }
        debug!("browser.url_watch.stopped");
    })
}
