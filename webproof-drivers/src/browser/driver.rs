use crate::browser::watch::spawn_url_watch;
use anyhow::{Context, Result};
use async_trait::async_trait;
use fantoccini::{Client, ClientBuilder};
use serde_json::{json, Map, Value};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::info;
use webdriver::capabilities::Capabilities;
use webproof_actors::BrowserContext;
use webproof_config::BrowserConfig;

const NAVIGATION_BUFFER: usize = 32;

#[cfg(feature = "chromium")]
const BROWSER_OPTIONS: &str = "goog:chromeOptions";
#[cfg(not(feature = "chromium"))]
const BROWSER_OPTIONS: &str = "moz:firefoxOptions";

/// Browser options for a WebDriver session.
pub fn capabilities(headless: bool) -> Capabilities {
    let mut args = vec![json!("--no-first-run")];
    if headless {
        args.push(json!("--headless"));
        args.push(json!("--disable-gpu"));
    }
    let mut options = Map::new();
    options.insert("args".to_string(), Value::Array(args));

    let mut caps = Capabilities::new();
    caps.insert(BROWSER_OPTIONS.to_string(), Value::Object(options));
    caps
}

/// A WebDriver session the engine drives through [`BrowserContext`].
pub struct WebDriverBrowser {
    client: Client,
    navigations: broadcast::Sender<String>,
    watch: JoinHandle<()>,
}

impl WebDriverBrowser {
    /// Connect to the WebDriver service at `config.webdriver_url` and start
    /// watching the session URL.
    pub async fn connect(config: &BrowserConfig) -> Result<Self> {
        let client = ClientBuilder::native()
            .capabilities(capabilities(config.headless))
            .connect(&config.webdriver_url)
            .await
            .with_context(|| format!("connect to WebDriver at {}", config.webdriver_url))?;
        info!(webdriver = %config.webdriver_url, headless = config.headless, "browser.connected");

        let (navigations, _) = broadcast::channel(NAVIGATION_BUFFER);
        let watch = spawn_url_watch(
            client.clone(),
            Duration::from_millis(config.navigation_poll_ms.max(1)),
            navigations.clone(),
        );
        Ok(Self {
            client,
            navigations,
            watch,
        })
    }

    /// Stop watching and end the browser session.
    pub async fn close(self) -> Result<()> {
        self.watch.abort();
        self.client.close().await?;
        Ok(())
    }
}

#[async_trait]
impl BrowserContext for WebDriverBrowser {
    async fn open(&self, url: &str) -> Result<()> {
        info!(url, "browser.open");
        self.client
            .goto(url)
            .await
            .with_context(|| format!("open {url}"))
    }

    async fn current_url(&self) -> Result<String> {
        let url = self.client.current_url().await?;
        Ok(url.to_string())
    }

    fn navigations(&self) -> broadcast::Receiver<String> {
        self.navigations.subscribe()
    }
}
