pub mod agent;
pub mod bandwidth;
pub mod checks;
pub mod http;
pub mod metrics;
pub mod supervisor;
pub mod traceroute;

pub use agent::MemberAgent;
pub use supervisor::{IterationFactory, Supervisor, TaskHealth};
