use std::sync::Arc;

use crate::config::Config;
use crate::fetch::StrategyRegistry;
use crate::jobs::JobManager;
use crate::observability::Metrics;
use crate::results::ResultStore;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub jobs: Arc<JobManager>,
    pub results: Arc<ResultStore>,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    pub fn new(config: Config, strategies: StrategyRegistry) -> Self {
        let jobs = JobManager::new(&config.relay, strategies);
        let results = ResultStore::new(&config.relay);
        Self {
            config: Arc::new(config),
            jobs: Arc::new(jobs),
            results: Arc::new(results),
            metrics: Arc::new(Metrics::new()),
        }
    }

    /// State with the built-in strategies.
    pub fn from_config(config: Config) -> Self {
        let strategies = StrategyRegistry::from_config(&config.relay);
        Self::new(config, strategies)
    }
}
