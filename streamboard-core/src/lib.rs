pub mod config;
pub mod ids;
pub mod logging;

pub use config::{load_config, Config, LoggingConfig, RedisConfig, RelayConfig, ServerConfig};
pub use ids::SessionId;
