//! Fetch strategies
//!
//! A strategy turns one [`Job`] into files inside the job directory plus a
//! filled-in [`JobMetadata`]. Outcomes of talking to the target (refused
//! connection, 404, broken body) are recorded in the metadata and never
//! surface as errors; [`FetchError`] is reserved for failures of the relay
//! itself.

mod basic;
#[cfg(feature = "chromium")]
mod chromium;
mod render;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::sync::Arc;
use thiserror::Error;

use crate::config::RelayConfig;
use crate::jobs::{FetchMode, HeadersMap, Job, JobMetadata};

pub use basic::BasicFetcher;
#[cfg(feature = "chromium")]
pub use chromium::ChromiumEngine;
pub use render::{
    RenderEngine, RenderError, RenderSession, RenderedFetcher, RenderedPage, UnavailableEngine,
};

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP client setup failed: {0}")]
    Client(String),

    #[error("job directory I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait FetchStrategy: Send + Sync {
    /// Mode this strategy is registered under
    fn mode(&self) -> FetchMode;

    /// Fetch `job.actual_url` into `job.dir` and describe what happened.
    async fn fetch(&self, job: &Job) -> Result<JobMetadata, FetchError>;
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("strategy not found: {0}")]
    NotFound(FetchMode),
}

/// Maps each fetch mode to the strategy that serves it
#[derive(Clone, Default)]
pub struct StrategyRegistry {
    strategies: BTreeMap<FetchMode, Arc<dyn FetchStrategy>>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a strategy under its own mode, replacing any previous one.
    pub fn register(&mut self, strategy: Arc<dyn FetchStrategy>) {
        self.strategies.insert(strategy.mode(), strategy);
    }

    pub fn get(&self, mode: FetchMode) -> Result<Arc<dyn FetchStrategy>, RegistryError> {
        self.strategies
            .get(&mode)
            .cloned()
            .ok_or(RegistryError::NotFound(mode))
    }

    pub fn has_strategy(&self, mode: FetchMode) -> bool {
        self.strategies.contains_key(&mode)
    }

    /// Both built-in strategies, rendering through the given engine.
    pub fn with_engine(config: &RelayConfig, engine: Arc<dyn RenderEngine>) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(BasicFetcher::new(config)));
        registry.register(Arc::new(RenderedFetcher::new(engine, config.render_timeout())));
        registry
    }

    /// Built-in strategies with the compiled-in render engine.
    pub fn from_config(config: &RelayConfig) -> Self {
        Self::with_engine(config, default_engine(config))
    }
}

#[cfg(feature = "chromium")]
fn default_engine(config: &RelayConfig) -> Arc<dyn RenderEngine> {
    Arc::new(ChromiumEngine::new(config))
}

#[cfg(not(feature = "chromium"))]
fn default_engine(_config: &RelayConfig) -> Arc<dyn RenderEngine> {
    Arc::new(UnavailableEngine)
}

/// Flattens response headers, joining repeated names with ", ".
pub(crate) fn collect_headers(headers: &HeaderMap) -> HeadersMap {
    let mut collected = HeadersMap::new();
    for (name, value) in headers {
        let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
        match collected.entry(name.as_str().to_string()) {
            Entry::Occupied(mut entry) => {
                let existing = entry.get_mut();
                existing.push_str(", ");
                existing.push_str(&value);
            }
            Entry::Vacant(entry) => {
                entry.insert(value);
            }
        }
    }
    collected
}
