//! Chromiumoxide-based browser runtime.
//!
//! Launches a local Chrome (or attaches to a running one over CDP) and opens
//! pages that can be handed to [`ChromiumDomProvider`](crate::dom::ChromiumDomProvider).

use std::path::PathBuf;

use chromiumoxide::{
    browser::{Browser, BrowserConfig},
    handler::viewport::Viewport,
    page::Page,
};
use futures_util::StreamExt;
use thiserror::Error;
use tokio::{sync::Mutex, task::JoinHandle};

use crate::config::StagehandConfig;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("browser runtime has not been launched")]
    NotInitialized,
    #[error("invalid browser configuration: {0}")]
    Config(String),
    #[error("chromiumoxide error: {0}")]
    Cdp(String),
}

fn map_chromiumoxide_error<E: std::fmt::Display>(err: E) -> RuntimeError {
    RuntimeError::Cdp(err.to_string())
}

/// Options used when launching a local browser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchOptions {
    pub headless: bool,
    pub chrome_executable: Option<PathBuf>,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub args: Vec<String>,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            headless: true,
            chrome_executable: None,
            viewport_width: 1288,
            viewport_height: 711,
            args: Vec::new(),
        }
    }
}

impl LaunchOptions {
    pub fn from_config(config: &StagehandConfig) -> Self {
        Self {
            headless: config.headless,
            chrome_executable: config.chrome_executable.clone().map(PathBuf::from),
            ..Self::default()
        }
    }
}

struct RuntimeState {
    browser: Browser,
    handler: JoinHandle<()>,
}

/// Owns one chromiumoxide browser and its event-loop task.
#[derive(Default)]
pub struct ChromiumoxideRuntime {
    state: Mutex<Option<RuntimeState>>,
}

impl ChromiumoxideRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Launch a local browser. A no-op when one is already running.
    pub async fn launch(&self, options: &LaunchOptions) -> Result<(), RuntimeError> {
        let mut guard = self.state.lock().await;
        if guard.is_some() {
            return Ok(());
        }

        let (browser, handler) = Browser::launch(build_config(options)?)
            .await
            .map_err(map_chromiumoxide_error)?;
        *guard = Some(RuntimeState {
            browser,
            handler: spawn_handler(handler),
        });
        Ok(())
    }

    /// Attach to an already running browser through its CDP websocket URL.
    pub async fn attach(&self, url: &str) -> Result<(), RuntimeError> {
        let (browser, handler) = Browser::connect(url)
            .await
            .map_err(map_chromiumoxide_error)?;
        let previous = self.state.lock().await.replace(RuntimeState {
            browser,
            handler: spawn_handler(handler),
        });
        if let Some(state) = previous {
            close_state(state).await;
        }
        Ok(())
    }

    pub async fn new_page(&self, url: &str) -> Result<Page, RuntimeError> {
        let guard = self.state.lock().await;
        let state = guard.as_ref().ok_or(RuntimeError::NotInitialized)?;
        state
            .browser
            .new_page(url)
            .await
            .map_err(map_chromiumoxide_error)
    }

    pub async fn is_running(&self) -> bool {
        self.state.lock().await.is_some()
    }

    /// Close the browser and stop its event loop.
    pub async fn shutdown(&self) -> Result<(), RuntimeError> {
        let state = self.state.lock().await.take();
        if let Some(state) = state {
            close_state(state).await;
        }
        Ok(())
    }
}

fn build_config(options: &LaunchOptions) -> Result<BrowserConfig, RuntimeError> {
    let viewport = Viewport {
        width: options.viewport_width,
        height: options.viewport_height,
        device_scale_factor: None,
        emulating_mobile: false,
        is_landscape: options.viewport_width >= options.viewport_height,
        has_touch: false,
    };

    let mut builder = BrowserConfig::builder()
        .viewport(viewport)
        .args(options.args.clone());

    if let Some(path) = &options.chrome_executable {
        builder = builder.chrome_executable(path);
    }

    let builder = if options.headless {
        builder
    } else {
        builder.with_head()
    };

    builder.build().map_err(RuntimeError::Config)
}

fn spawn_handler(mut handler: chromiumoxide::handler::Handler) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(result) = handler.next().await {
            if let Err(err) = result {
                log::warn!(target: "stagehand", "chromiumoxide handler error: {err}");
            }
        }
    })
}

async fn close_state(mut state: RuntimeState) {
    if let Err(err) = state.browser.close().await {
        log::warn!(target: "stagehand", "failed to close browser: {err}");
    }
    state.handler.abort();
}
