//! Environment-driven configuration
//!
//! Values come from the process environment, optionally seeded from a
//! `.env` file by the binaries (`dotenv::dotenv().ok()`).

use crate::error::AssistantError;
use crate::Result;
use std::env;
use uuid::Uuid;

/// Demo organisation that stands in for an authenticated session.
pub const DEFAULT_TENANT_ID: Uuid = Uuid::from_u128(0xa1b2c3d4_0000_0000_0000_000000000001);

pub const DEFAULT_MODEL: &str = "anthropic/claude-sonnet-4";
pub const DEFAULT_OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const DEFAULT_MAX_STEPS: u32 = 5;
pub const DEFAULT_PORT: u16 = 8080;

#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
}

impl ModelConfig {
    /// A missing key is not fatal here; the provider rejects the first call.
    pub fn from_env() -> Self {
        Self {
            api_key: env::var("OPENROUTER_API_KEY").unwrap_or_default(),
            base_url: env::var("OPENROUTER_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_OPENROUTER_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            model: env::var("LLM_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string()),
        }
    }
}

/// Which data-service backend the gateway talks to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayConfig {
    /// Supabase / PostgREST over HTTPS with a service-role key.
    Rest { url: String, service_key: String },
    /// Direct Postgres connection calling the same stored functions.
    Postgres { database_url: String },
    /// Bundled demo data set, opt-in via `DEMO_DATA=1`.
    Demo,
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Resolve the backend from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let (Some(url), Some(service_key)) = (
            non_empty("SUPABASE_URL"),
            non_empty("SUPABASE_SERVICE_ROLE_KEY"),
        ) {
            return Ok(GatewayConfig::Rest {
                url: url.trim_end_matches('/').to_string(),
                service_key,
            });
        }

        if let Some(database_url) = non_empty("DATABASE_URL").or_else(|| non_empty("POSTGRES_URL")) {
            return Ok(GatewayConfig::Postgres { database_url });
        }

        if matches!(non_empty("DEMO_DATA").as_deref(), Some("1") | Some("true")) {
            return Ok(GatewayConfig::Demo);
        }

        Err(AssistantError::ConfigError(
            "Missing SUPABASE_URL or SUPABASE_SERVICE_ROLE_KEY".to_string(),
        ))
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        let port = match env::var("PORT").or_else(|_| env::var("API_PORT")) {
            Ok(raw) => raw.parse().map_err(|e| {
                AssistantError::ConfigError(format!("Invalid PORT '{}': {}", raw, e))
            })?,
            Err(_) => DEFAULT_PORT,
        };

        Ok(Self { port })
    }
}

/// Full application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub model: ModelConfig,
    pub gateway: GatewayConfig,
    pub server: ServerConfig,
    pub tenant_id: Uuid,
    pub max_steps: u32,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let tenant_id = match env::var("TENANT_ID") {
            Ok(raw) => Uuid::parse_str(raw.trim()).map_err(|e| {
                AssistantError::ConfigError(format!("Invalid TENANT_ID '{}': {}", raw, e))
            })?,
            Err(_) => DEFAULT_TENANT_ID,
        };

        let max_steps = match env::var("MAX_STEPS") {
            Ok(raw) => raw
                .parse::<u32>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| {
                    AssistantError::ConfigError(format!("Invalid MAX_STEPS '{}'", raw))
                })?,
            Err(_) => DEFAULT_MAX_STEPS,
        };

        Ok(Self {
            model: ModelConfig::from_env(),
            gateway: GatewayConfig::from_env()?,
            server: ServerConfig::from_env()?,
            tenant_id,
            max_steps,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_tenant_id() {
        assert_eq!(
            DEFAULT_TENANT_ID.to_string(),
            "a1b2c3d4-0000-0000-0000-000000000001"
        );
    }

    #[test]
    fn test_rest_gateway_preferred() {
        let config = GatewayConfig::from_lookup(lookup(&[
            ("SUPABASE_URL", "https://demo.supabase.co/"),
            ("SUPABASE_SERVICE_ROLE_KEY", "service-key"),
            ("DATABASE_URL", "postgres://localhost/finance"),
        ]))
        .unwrap();

        assert_eq!(
            config,
            GatewayConfig::Rest {
                url: "https://demo.supabase.co".into(),
                service_key: "service-key".into(),
            }
        );
    }

    #[test]
    fn test_url_without_key_is_not_rest() {
        let config = GatewayConfig::from_lookup(lookup(&[
            ("SUPABASE_URL", "https://demo.supabase.co"),
            ("DATABASE_URL", "postgres://localhost/finance"),
        ]))
        .unwrap();

        assert!(matches!(config, GatewayConfig::Postgres { .. }));
    }

    #[test]
    fn test_demo_gateway_is_opt_in() {
        let config = GatewayConfig::from_lookup(lookup(&[("DEMO_DATA", "1")])).unwrap();
        assert_eq!(config, GatewayConfig::Demo);
    }

    #[test]
    fn test_missing_credentials_is_fatal() {
        let err = GatewayConfig::from_lookup(lookup(&[("SUPABASE_URL", "  ")])).unwrap_err();
        assert!(matches!(err, AssistantError::ConfigError(_)));
        assert!(err.to_string().contains("SUPABASE_SERVICE_ROLE_KEY"));
    }
}
