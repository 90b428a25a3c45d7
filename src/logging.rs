//! Logging and tracing configuration
//!
//! JSON output in production, human-readable output in development.
//! Access tokens never reach the logs; identifiers that must appear are
//! passed through [`mask_secret`].

use crate::config::{LogFormat, LoggingConfig};
use std::env;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

impl Environment {
    pub fn from_env() -> Self {
        match env::var("ENVIRONMENT")
            .or_else(|_| env::var("ENV"))
            .unwrap_or_else(|_| "development".to_string())
            .to_lowercase()
            .as_str()
        {
            "prod" | "production" => Self::Production,
            "staging" | "stage" => Self::Staging,
            _ => Self::Development,
        }
    }

    pub fn default_log_level(&self) -> Level {
        match self {
            Self::Development => Level::DEBUG,
            Self::Staging | Self::Production => Level::INFO,
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

/// Installs the global subscriber. `RUST_LOG` overrides the configured level.
/// Returns an error if a subscriber is already installed.
pub fn init_tracing(config: &LoggingConfig) -> Result<(), String> {
    let environment = Environment::from_env();
    let use_json = match config.format {
        Some(LogFormat::Json) => true,
        Some(LogFormat::Plain) => false,
        None => environment.is_production(),
    };

    let level = config
        .level
        .clone()
        .unwrap_or_else(|| environment.default_log_level().to_string())
        .to_lowercase();
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| {
            EnvFilter::try_new(format!(
                "{}={},tower_http=debug,axum=info,sqlx=warn,hyper=warn,reqwest=warn",
                env!("CARGO_PKG_NAME").replace('-', "_"),
                level
            ))
        })
        .map_err(|e| format!("invalid log filter: {}", e))?;

    let result = if use_json {
        let json_layer = fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_span_list(false)
            .with_target(true)
            .with_level(true)
            .with_filter(env_filter);
        tracing_subscriber::registry().with(json_layer).try_init()
    } else {
        let pretty_layer = fmt::layer()
            .pretty()
            .with_target(true)
            .with_level(true)
            .with_file(true)
            .with_line_number(true)
            .with_span_events(FmtSpan::CLOSE)
            .with_filter(env_filter);
        tracing_subscriber::registry().with(pretty_layer).try_init()
    };
    result.map_err(|e| e.to_string())?;

    tracing::info!(
        environment = ?environment,
        format = if use_json { "json" } else { "pretty" },
        "Tracing initialized"
    );
    Ok(())
}

/// Keeps the first and last four characters of an identifier.
pub fn mask_secret(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 8 {
        return "****".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}...{}", head, tail)
}
