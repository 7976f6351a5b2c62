use std::sync::Arc;

use crate::config::AppConfig;
use crate::middleware::rate_limit::RateLimiter;
use crate::stats::services::StatsService;
use crate::users::{
    repo::{UserDirectory, UserStore},
    services::{AccountedStore, UserOpCounters},
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub users: Arc<dyn UserStore>,
    pub user_ops: Arc<UserOpCounters>,
    pub stats: Arc<StatsService>,
    pub rate_limiter: Option<Arc<RateLimiter>>,
}

impl AppState {
    pub fn init() -> anyhow::Result<Self> {
        let config = AppConfig::from_env()?;
        let directory = if config.seed_demo_users {
            UserDirectory::with_demo_users()
        } else {
            UserDirectory::new()
        };
        Ok(Self::from_parts(config, directory))
    }

    pub fn from_parts(config: AppConfig, directory: UserDirectory) -> Self {
        let user_ops = Arc::new(UserOpCounters::default());
        let users = Arc::new(AccountedStore::new(directory, Arc::clone(&user_ops))) as Arc<dyn UserStore>;
        let rate_limiter = config
            .rate_limit
            .window()
            .map(|(requests, period)| Arc::new(RateLimiter::new(requests, period)));
        Self {
            config: Arc::new(config),
            users,
            user_ops,
            stats: Arc::new(StatsService::new()),
            rate_limiter,
        }
    }

    /// Empty directory, no rate limiting.
    #[cfg(test)]
    pub fn fake() -> Self {
        let mut config = AppConfig::default();
        config.rate_limit.enabled = false;
        config.seed_demo_users = false;
        Self::from_parts(config, UserDirectory::new())
    }
}
