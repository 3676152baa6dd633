use tokio::time::{Duration, Instant};

/// Process-wide facts, built once at startup and passed to whoever reports them.
#[derive(Debug, Clone)]
pub struct AppContext {
    started_at: Instant,
    version: &'static str,
}

impl AppContext {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            version: env!("CARGO_PKG_VERSION"),
        }
    }

    pub fn version(&self) -> &'static str {
        self.version
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }
}

impl Default for AppContext {
    fn default() -> Self {
        Self::new()
    }
}
