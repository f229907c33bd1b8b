//! Environment configuration shared by every Kite process (spec §6).

use std::env;

use tracing_subscriber::EnvFilter;

/// `KITE_LOG_LEVEL` values map to `tracing` levels (spec §6). Kontrol/syslog
/// style names are accepted alongside the levels `tracing` natively knows.
fn level_to_filter_directive(level: &str) -> &'static str {
    match level.to_ascii_uppercase().as_str() {
        "DEBUG" => "debug",
        "INFO" => "info",
        "NOTICE" => "info",
        "WARNING" => "warn",
        "ERROR" => "error",
        "CRITICAL" | "FATAL" => "error",
        _ => "info",
    }
}

/// Settings every Kite process reads from its environment (spec §6).
#[derive(Debug, Clone)]
pub struct KiteConfig {
    pub log_level: String,
    pub kontrol_url: Option<String>,
}

impl KiteConfig {
    pub fn from_env() -> Self {
        KiteConfig {
            log_level: env::var("KITE_LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string()),
            kontrol_url: env::var("KITE_KONTROL_URL").ok(),
        }
    }

    /// Build the `tracing_subscriber` env filter for this config, honoring
    /// a `RUST_LOG` override when present.
    pub fn env_filter(&self) -> EnvFilter {
        if env::var("RUST_LOG").is_ok() {
            return EnvFilter::from_default_env();
        }
        EnvFilter::new(level_to_filter_directive(&self.log_level))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_kontrol_levels_to_tracing_directives() {
        assert_eq!(level_to_filter_directive("WARNING"), "warn");
        assert_eq!(level_to_filter_directive("CRITICAL"), "error");
        assert_eq!(level_to_filter_directive("bogus"), "info");
    }
}
