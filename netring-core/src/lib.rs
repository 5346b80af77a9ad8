pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod net;
pub mod protocol;
pub mod store;

pub use config::{MemberConfig, RegistryConfig};
pub use error::{Error, Result};
pub use store::{MemoryStore, RedisStore, Store};
