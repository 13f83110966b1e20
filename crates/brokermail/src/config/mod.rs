pub mod loader;
pub mod schema;

pub use loader::{load_config, load_config_from_str};
pub use schema::{
    AuthType, CircuitBreakerSettings, ClassifierConfig, MailboxAuth, MailboxConfig, QueueSettings,
    RetrySettings, SyncConfig, SyncSettings,
};
