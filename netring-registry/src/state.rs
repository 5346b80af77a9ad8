//! Shared registry state

use std::sync::Arc;

use netring_core::config::RegistryConfig;
use netring_core::Store;
use parking_lot::RwLock;

use crate::expected::ExpectedTopology;
use crate::membership::MembershipStore;
use crate::topology::TopologyGraph;

#[derive(Clone)]
pub struct AppState {
    pub membership: Arc<MembershipStore>,
    pub topology: Arc<RwLock<TopologyGraph>>,
    /// Loaded descriptor; `None` disables missing-member analysis.
    pub expected: Option<Arc<ExpectedTopology>>,
}

impl AppState {
    /// Assemble registry state from config, loading the expected-topology
    /// descriptor when detection is enabled.
    pub fn build(store: Arc<dyn Store>, config: &RegistryConfig) -> anyhow::Result<Self> {
        let expected = if config.expected_members.enable_missing_detection {
            match &config.expected_members.config_file {
                Some(path) => {
                    let descriptor =
                        ExpectedTopology::from_file(std::path::Path::new(path))?;
                    tracing::info!(
                        locations = descriptor.locations.len(),
                        file = %path,
                        "expected-topology descriptor loaded"
                    );
                    Some(Arc::new(descriptor))
                }
                None => {
                    tracing::warn!(
                        "missing-member detection enabled but no descriptor file configured"
                    );
                    None
                }
            }
        } else {
            None
        };

        Ok(Self {
            membership: Arc::new(MembershipStore::new(store, config.member_ttl)),
            topology: Arc::new(RwLock::new(TopologyGraph::new())),
            expected,
        })
    }

    /// State wired straight to a store, for tests and embedded use.
    #[must_use]
    pub fn with_store(store: Arc<dyn Store>, member_ttl: u64) -> Self {
        Self {
            membership: Arc::new(MembershipStore::new(store, member_ttl)),
            topology: Arc::new(RwLock::new(TopologyGraph::new())),
            expected: None,
        }
    }

    #[must_use]
    pub fn with_expected(mut self, expected: ExpectedTopology) -> Self {
        self.expected = Some(Arc::new(expected));
        self
    }
}
