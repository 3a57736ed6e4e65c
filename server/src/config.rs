//! Server configuration (spec.md's ambient stack), loaded the way the
//! teacher's `api/src/config.rs` loads `GdlkConfig`.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Host:port for the HTTP server to bind to.
    pub server_host: String,
    /// Size in bytes of each request's interpreter stack segment.
    pub stack_bytes: u32,
    /// Maximum evaluation steps before a request's program is aborted as
    /// runaway (spec.md §4.8 `TooManyCycles`).
    pub cycle_limit: u64,
}

impl Settings {
    pub fn load() -> Result<Self, ConfigError> {
        let mut s = Config::new();
        s.set_default("server_host", "127.0.0.1:8080")?;
        s.set_default("stack_bytes", 1i64 << 20)?;
        s.set_default("cycle_limit", 10_000_000i64)?;

        // Non-sensitive defaults, checked into the repo.
        s.merge(File::with_name("config/default").required(false))?;
        // Optional untracked local overrides.
        s.merge(File::with_name("config/dev").required(false))?;
        // Anything prefixed COREVM__ overrides both, e.g. COREVM__SERVER_HOST.
        s.merge(Environment::new().prefix("corevm").separator("__"))?;

        s.try_into()
    }
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            server_host: "127.0.0.1:8080".into(),
            stack_bytes: 1 << 20,
            cycle_limit: 10_000_000,
        }
    }
}
