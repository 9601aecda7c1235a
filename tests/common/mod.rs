//! Common test utilities for indexer-sync integration tests

#[allow(dead_code)]
pub mod fixtures;

#[allow(unused_imports)]
pub use fixtures::*;

use indexer_sync::{
    Config, Database, FeedParser, FetchOrchestrator, OffsetPaging, Provider, ProviderConfig,
    RequestChain, RequestGenerator, ReqwestExecutor, SearchCriteria,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Page size used by every test provider
pub const PAGE_SIZE: usize = 3;

/// Newznab-style generator paging over `{base}/api`
pub struct NewznabGenerator {
    api: Url,
}

impl RequestGenerator for NewznabGenerator {
    fn recent_requests(&self) -> RequestChain {
        let mut url = self.api.clone();
        url.query_pairs_mut().append_pair("t", "search");
        let mut chain = RequestChain::new();
        chain.add(OffsetPaging::new(url, PAGE_SIZE, 10).into_sequence());
        chain
    }

    fn search_requests(&self, criteria: &SearchCriteria) -> RequestChain {
        let mut url = self.api.clone();
        url.query_pairs_mut()
            .append_pair("t", "search")
            .append_pair("q", criteria.query.as_deref().unwrap_or_default());
        let mut chain = RequestChain::new();
        chain.add(OffsetPaging::new(url, PAGE_SIZE, 10).into_sequence());
        chain
    }
}

/// Provider pointed at a mock server
pub fn provider(id: &str, base: &str) -> Provider {
    let api = Url::parse(&format!("{base}/api")).unwrap();
    let mut config = ProviderConfig::new(id, api.as_str());
    config.page_size = PAGE_SIZE;
    Provider::new(config, Arc::new(NewznabGenerator { api }), Arc::new(FeedParser))
}

/// Config without request spacing so tests run quickly
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.rate_limit.floor = Duration::ZERO;
    config.http.request_timeout = Duration::from_secs(5);
    config.sync.run_timeout = Duration::from_secs(10);
    config
}

/// Orchestrator backed by a real HTTP client and a SQLite database at `path`
pub async fn open_orchestrator(path: &Path) -> (FetchOrchestrator, Arc<Database>) {
    let config = test_config();
    let db = Arc::new(Database::new(path).await.unwrap());
    let executor = Arc::new(ReqwestExecutor::new(&config.http).unwrap());
    (FetchOrchestrator::new(&config, executor, db.clone()), db)
}
