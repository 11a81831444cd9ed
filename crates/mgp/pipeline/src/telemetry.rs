//! Tracing subscriber setup.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::TelemetryConfig;
use crate::error::{PipelineError, PipelineResult};

/// Install the global subscriber. `RUST_LOG` wins over the configured level.
///
/// Fails if a global subscriber is already installed.
pub fn init_tracing(config: &TelemetryConfig) -> PipelineResult<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let subscriber = tracing_subscriber::registry().with(env_filter);

    let result = if config.json {
        subscriber
            .with(fmt::layer().json().with_target(config.with_target))
            .try_init()
    } else {
        subscriber
            .with(fmt::layer().with_target(config.with_target))
            .try_init()
    };
    result.map_err(|e| PipelineError::Config(format!("tracing:{e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_install_is_refused() {
        let config = TelemetryConfig::default();
        let _ = init_tracing(&config);
        let err = init_tracing(&config).unwrap_err();
        assert!(err.to_string().starts_with("pipeline_config_invalid:tracing:"));
    }
}
