use anyhow::Context;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
}

/// Deployment mode. Development turns on checkout preview and exposes
/// provider error bodies in responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" | "local" => Self::Development,
            _ => Self::Production,
        }
    }

    pub fn is_development(self) -> bool {
        self == Self::Development
    }
}

/// LemonSqueezy credentials and plan ids. Secrets are optional at start-up and
/// checked when a request needs them.
#[derive(Debug, Clone, Deserialize)]
pub struct LemonSqueezyConfig {
    pub api_url: String,
    pub api_key: Option<String>,
    pub store_id: Option<String>,
    pub webhook_secret: Option<String>,
    pub monthly_variant_id: Option<String>,
    pub yearly_variant_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MailgunConfig {
    pub api_url: String,
    pub api_key: Option<String>,
    pub domain: Option<String>,
}

impl MailgunConfig {
    pub fn is_configured(&self) -> bool {
        self.api_key.is_some() && self.domain.is_some()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub environment: Environment,
    pub app_url: String,
    pub verification_ttl_hours: i64,
    pub jwt: JwtConfig,
    pub lemonsqueezy: LemonSqueezyConfig,
    pub mailgun: MailgunConfig,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL is not set")?;
        let jwt = JwtConfig {
            secret: std::env::var("JWT_SECRET").context("JWT_SECRET is not set")?,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "spilll".into()),
            audience: std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| "spilll-users".into()),
            ttl_minutes: std::env::var("JWT_TTL_MINUTES")
                .ok()
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(60 * 24 * 7),
        };
        let lemonsqueezy = LemonSqueezyConfig {
            api_url: std::env::var("LEMONSQUEEZY_API_URL")
                .unwrap_or_else(|_| "https://api.lemonsqueezy.com/v1".into()),
            api_key: optional_var("LEMONSQUEEZY_API_KEY"),
            store_id: optional_var("LEMONSQUEEZY_STORE_ID"),
            webhook_secret: optional_var("LEMONSQUEEZY_WEBHOOK_SECRET"),
            monthly_variant_id: optional_var("LEMONSQUEEZY_MONTHLY_VARIANT_ID"),
            yearly_variant_id: optional_var("LEMONSQUEEZY_YEARLY_VARIANT_ID"),
        };
        let mailgun = MailgunConfig {
            api_url: std::env::var("MAILGUN_API_URL")
                .unwrap_or_else(|_| "https://api.mailgun.net".into()),
            api_key: optional_var("MAILGUN_API_KEY"),
            domain: optional_var("MAILGUN_DOMAIN"),
        };

        Ok(Self {
            database_url,
            environment: Environment::parse(
                &std::env::var("APP_ENV").unwrap_or_else(|_| "production".into()),
            ),
            app_url: std::env::var("APP_URL")
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or_else(|_| "http://localhost:3000".into()),
            verification_ttl_hours: std::env::var("VERIFICATION_TTL_HOURS")
                .ok()
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(24),
            jwt,
            lemonsqueezy,
            mailgun,
        })
    }
}

/// Empty values count as unset so a blank line in `.env` doesn't pass as a secret.
fn optional_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
