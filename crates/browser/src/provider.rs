//! Headless Chromium as a [`RenderProvider`].

use std::path::PathBuf;
use std::sync::Arc;

use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::fetcher::{BrowserFetcher, BrowserFetcherOptions};
use futures::StreamExt;
use renderq_engine::{EventSink, RenderContext, RenderError, RenderProvider};
use tokio::task::JoinHandle;

use crate::context::CdpContext;
use crate::error::BrowserError;

/// How to find and start the browser.
#[derive(Debug, Clone)]
pub struct BrowserOptions {
    /// Use this binary instead of downloading one.
    pub executable: Option<PathBuf>,
    /// Where a downloaded browser is cached between runs.
    pub cache_dir: PathBuf,
    pub headless: bool,
}

impl Default for BrowserOptions {
    fn default() -> Self {
        Self {
            executable: None,
            cache_dir: std::env::temp_dir().join("renderq-chromium"),
            headless: true,
        }
    }
}

/// Hands out one fresh page per task from a single shared browser.
pub struct CdpProvider {
    browser: Arc<Browser>,
    handler: JoinHandle<()>,
}

impl CdpProvider {
    /// Start the browser, downloading it first if no executable is set.
    pub async fn launch(options: BrowserOptions) -> Result<Self, BrowserError> {
        let executable = match options.executable {
            Some(path) => path,
            None => fetch(&options.cache_dir).await?,
        };

        let mut builder = BrowserConfig::builder()
            .chrome_executable(executable)
            .arg("--disable-gpu")
            .arg("--no-sandbox");
        if !options.headless {
            builder = builder.with_head();
        }
        let config = builder.build().map_err(BrowserError::Config)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| BrowserError::Launch(e.to_string()))?;
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::debug!(error = %e, "Browser handler error");
                }
            }
            tracing::warn!("Browser connection closed");
        });

        tracing::info!(headless = options.headless, "Browser launched");
        Ok(Self {
            browser: Arc::new(browser),
            handler,
        })
    }

    /// Whether the connection to the browser is still up.
    pub fn is_alive(&self) -> bool {
        !self.handler.is_finished()
    }
}

impl RenderProvider for CdpProvider {
    fn create(&self, sink: EventSink) -> Result<Box<dyn RenderContext>, RenderError> {
        if !self.is_alive() {
            return Err(RenderError::Create("browser connection is closed".into()));
        }
        Ok(Box::new(CdpContext::spawn(Arc::clone(&self.browser), sink)))
    }
}

impl Drop for CdpProvider {
    fn drop(&mut self) {
        self.handler.abort();
    }
}

async fn fetch(cache_dir: &std::path::Path) -> Result<PathBuf, BrowserError> {
    tokio::fs::create_dir_all(cache_dir).await?;

    let options = BrowserFetcherOptions::builder()
        .with_path(cache_dir)
        .build()
        .map_err(|e| BrowserError::Fetch(e.to_string()))?;
    let installation = BrowserFetcher::new(options)
        .fetch()
        .await
        .map_err(|e| BrowserError::Fetch(e.to_string()))?;

    tracing::info!(path = %installation.executable_path.display(), "Browser available");
    Ok(installation.executable_path)
}
