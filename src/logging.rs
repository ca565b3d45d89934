use tracing_subscriber::EnvFilter;

use crate::config::AppConfig;

/// Configuration for setting up the tracing subscriber
#[derive(Debug, Clone)]
pub struct LoggerConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl From<&AppConfig> for LoggerConfig {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            level: cfg.log_level.clone(),
            json: cfg.log_json,
        }
    }
}

/// Installs the global tracing subscriber. `RUST_LOG` wins over the
/// configured level; calling this more than once is a no-op.
pub fn init_tracing(config: &LoggerConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    if config.json {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .try_init();
    } else {
        let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logger_config_follows_app_config() {
        let mut app = AppConfig::new("sqlite::memory:".into(), "test".into());
        app.log_level = "debug".into();
        app.log_json = true;

        let logger = LoggerConfig::from(&app);
        assert_eq!(logger.level, "debug");
        assert!(logger.json);
    }
}
