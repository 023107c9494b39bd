//! Application state for the API server.

use parley_memory::{ContextEngine, MemoryConfig};

/// Shared application state for the API server.
pub struct AppState {
    /// The engine behind every route
    pub engine: ContextEngine,

    /// Server start time (for health checks)
    pub start_time: std::time::Instant,
}

impl AppState {
    /// Build the engine from configuration. No backend is contacted yet.
    pub fn new(config: MemoryConfig) -> parley_common::Result<Self> {
        Ok(Self::with_engine(ContextEngine::from_config(config)?))
    }

    pub fn with_engine(engine: ContextEngine) -> Self {
        Self {
            engine,
            start_time: std::time::Instant::now(),
        }
    }

    /// Get the uptime in seconds.
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
