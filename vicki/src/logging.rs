// Tracing setup and the script-facing console

use crate::config::LoggingConfig;
use tracing_subscriber::EnvFilter;

/// Install the global subscriber. `RUST_LOG` wins over the configured filter.
/// Calling this more than once is harmless; later calls are ignored.
pub fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .unwrap_or_else(|_| EnvFilter::new("vicki=info"));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(config.ansi)
        .with_target(true)
        .finish();

    if tracing::subscriber::set_global_default(subscriber).is_ok() {
        // vicki-script logs through the `log` facade
        let _ = tracing_log::LogTracer::init();
    }
}

/// Log sink handed to scripts. Everything lands on the `vicki::script` target
/// tagged with the script's display name and id.
#[derive(Debug, Clone)]
pub struct Console {
    script_id: String,
    name: String,
}

impl Console {
    pub fn new(script_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            script_id: script_id.into(),
            name: name.into(),
        }
    }

    pub fn log(&self, message: impl AsRef<str>) {
        tracing::info!(target: "vicki::script", script = %self.script_id, name = %self.name, "{}", message.as_ref());
    }

    pub fn debug(&self, message: impl AsRef<str>) {
        tracing::debug!(target: "vicki::script", script = %self.script_id, name = %self.name, "{}", message.as_ref());
    }

    pub fn warn(&self, message: impl AsRef<str>) {
        tracing::warn!(target: "vicki::script", script = %self.script_id, name = %self.name, "{}", message.as_ref());
    }

    pub fn error(&self, message: impl AsRef<str>) {
        tracing::error!(target: "vicki::script", script = %self.script_id, name = %self.name, "{}", message.as_ref());
    }
}
