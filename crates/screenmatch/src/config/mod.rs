use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};

use chrono::Duration;

use crate::matching::ScreeningTypeId;

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub matching: MatchingConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            matching: MatchingConfig::load()?,
        })
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// Matching-engine knobs: claim window, scheduler cadence, run-lease TTL,
/// and the fixed per-patient screening costs in minor currency units.
#[derive(Debug, Clone)]
pub struct MatchingConfig {
    pub claim_ttl: Duration,
    pub cycle_interval: Duration,
    pub lease_ttl: Duration,
    pub default_screening_cost: u32,
    pub screening_costs: BTreeMap<String, u32>,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            claim_ttl: Duration::hours(72),
            cycle_interval: Duration::minutes(15),
            lease_ttl: Duration::minutes(5),
            default_screening_cost: 200,
            screening_costs: BTreeMap::new(),
        }
    }
}

impl MatchingConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let claim_ttl = match env::var("MATCH_CLAIM_TTL_HOURS") {
            Ok(raw) => Duration::hours(parse_positive(&raw, "MATCH_CLAIM_TTL_HOURS")?),
            Err(_) => defaults.claim_ttl,
        };
        let cycle_interval = match env::var("MATCH_CYCLE_MINUTES") {
            Ok(raw) => Duration::minutes(parse_positive(&raw, "MATCH_CYCLE_MINUTES")?),
            Err(_) => defaults.cycle_interval,
        };
        let lease_ttl = match env::var("MATCH_LEASE_TTL_SECS") {
            Ok(raw) => Duration::seconds(parse_positive(&raw, "MATCH_LEASE_TTL_SECS")?),
            Err(_) => defaults.lease_ttl,
        };
        let default_screening_cost = match env::var("MATCH_DEFAULT_COST") {
            Ok(raw) => raw
                .trim()
                .parse::<u32>()
                .ok()
                .filter(|cost| *cost > 0)
                .ok_or(ConfigError::InvalidCost)?,
            Err(_) => defaults.default_screening_cost,
        };

        Ok(Self {
            claim_ttl,
            cycle_interval,
            lease_ttl,
            default_screening_cost,
            screening_costs: defaults.screening_costs,
        })
    }

    /// The fixed per-patient cost for a screening type.
    pub fn cost_for(&self, screening_type: &ScreeningTypeId) -> u32 {
        self.screening_costs
            .get(&screening_type.0)
            .copied()
            .unwrap_or(self.default_screening_cost)
    }

    pub fn with_cost(mut self, screening_type: &ScreeningTypeId, cost: u32) -> Self {
        self.screening_costs.insert(screening_type.0.clone(), cost);
        self
    }
}

fn parse_positive(raw: &str, var: &'static str) -> Result<i64, ConfigError> {
    raw.trim()
        .parse::<i64>()
        .ok()
        .filter(|value| *value > 0)
        .ok_or(ConfigError::InvalidDuration { var })
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidDuration { var: &'static str },
    InvalidCost,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidDuration { var } => {
                write!(f, "{var} must be a positive integer")
            }
            ConfigError::InvalidCost => {
                write!(f, "MATCH_DEFAULT_COST must be a positive integer")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidHost { source } => Some(source),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::{Mutex, OnceLock};

    fn env_guard() -> &'static Mutex<()> {
        static GUARD: OnceLock<Mutex<()>> = OnceLock::new();
        GUARD.get_or_init(|| Mutex::new(()))
    }

    fn reset_env() {
        env::remove_var("APP_ENV");
        env::remove_var("APP_HOST");
        env::remove_var("APP_PORT");
        env::remove_var("APP_LOG_LEVEL");
        env::remove_var("MATCH_CLAIM_TTL_HOURS");
        env::remove_var("MATCH_CYCLE_MINUTES");
        env::remove_var("MATCH_LEASE_TTL_SECS");
        env::remove_var("MATCH_DEFAULT_COST");
    }

    #[test]
    fn load_uses_defaults_when_env_missing() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        let config = AppConfig::load().expect("config loads with defaults");
        assert_eq!(config.environment, AppEnvironment::Development);
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.matching.claim_ttl, Duration::hours(72));
        assert_eq!(config.matching.cycle_interval, Duration::minutes(15));
        assert_eq!(config.matching.default_screening_cost, 200);
    }

    #[test]
    fn matching_overrides_are_read_from_env() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("MATCH_CLAIM_TTL_HOURS", "48");
        env::set_var("MATCH_DEFAULT_COST", "350");
        let config = MatchingConfig::load().expect("config loads");
        assert_eq!(config.claim_ttl, Duration::hours(48));
        assert_eq!(config.default_screening_cost, 350);
        reset_env();
    }

    #[test]
    fn zero_claim_ttl_is_rejected() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("MATCH_CLAIM_TTL_HOURS", "0");
        let result = MatchingConfig::load();
        assert!(matches!(
            result,
            Err(ConfigError::InvalidDuration {
                var: "MATCH_CLAIM_TTL_HOURS"
            })
        ));
        reset_env();
    }

    #[test]
    fn per_type_cost_overrides_default() {
        let config = MatchingConfig::default().with_cost(&ScreeningTypeId("mammogram".into()), 450);
        assert_eq!(config.cost_for(&ScreeningTypeId("mammogram".into())), 450);
        assert_eq!(config.cost_for(&ScreeningTypeId("colonoscopy".into())), 200);
    }
}
