//! Structured logging bootstrap.
//!
//! The teacher wires a full OpenTelemetry exporter pipeline behind this
//! type; this bridge keeps the same call shape (`Telemetry::new()...
//! .register()` in `main`) but reports to stdout via `tracing-subscriber`
//! only — there is no metrics backend in scope here.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

pub struct Telemetry {
    name: &'static str,
    version: &'static str,
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::new()
    }
}

impl Telemetry {
    pub fn new() -> Self {
        Telemetry {
            name: "",
            version: "",
        }
    }

    pub fn with_name(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    pub fn with_version(mut self, version: &'static str) -> Self {
        self.version = version;
        self
    }

    /// Installs the global subscriber. `RUST_LOG` controls verbosity;
    /// defaults to `info`.
    pub fn register(self) -> Self {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
        tracing::info!(service = self.name, version = self.version, "telemetry initialized");
        self
    }
}
