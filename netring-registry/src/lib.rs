pub mod cleanup;
pub mod expected;
pub mod handlers;
pub mod keys;
pub mod membership;
pub mod state;
pub mod topology;

pub use expected::{ExpectedTopology, MissingAnalysis};
pub use membership::MembershipStore;
pub use state::AppState;
pub use topology::TopologyGraph;
