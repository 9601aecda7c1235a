//! A configured provider: settings plus its request/parse capabilities

use crate::config::ProviderConfig;
use crate::fetcher::ResponseParser;
use crate::request::RequestGenerator;
use crate::types::ProviderId;
use std::sync::Arc;
use std::time::Duration;

/// A provider instance the orchestrator can run against
///
/// The orchestrator never branches on provider identity; everything
/// provider-specific lives behind the generator and parser.
#[derive(Clone)]
pub struct Provider {
    /// Provider settings
    pub config: ProviderConfig,
    /// Builds request chains
    pub generator: Arc<dyn RequestGenerator>,
    /// Turns response bodies into releases
    pub parser: Arc<dyn ResponseParser>,
}

impl Provider {
    /// Bundle a config with its capabilities
    pub fn new(
        config: ProviderConfig,
        generator: Arc<dyn RequestGenerator>,
        parser: Arc<dyn ResponseParser>,
    ) -> Self {
        Self {
            config,
            generator,
            parser,
        }
    }

    /// Provider identity
    pub fn id(&self) -> &ProviderId {
        &self.config.id
    }

    /// Display name
    pub fn name(&self) -> &str {
        self.config.display_name()
    }

    /// Configured page size (0 = no fixed page size)
    pub fn page_size(&self) -> usize {
        self.config.page_size
    }

    /// Configured request spacing, before the global floor is applied
    pub fn rate_limit(&self) -> Option<Duration> {
        self.config.rate_limit
    }
}

impl std::fmt::Debug for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provider")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
