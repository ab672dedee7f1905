use std::{env, fmt::Display, str::FromStr};

use crate::state::PushConfig;

pub const DEFAULT_DATABASE_URL: &str = "sqlite://./data/salonbook.db";
const DEV_JWT_SECRET: &str = "salonbook-dev-secret-change-me";

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub jwt_secret: String,
    pub jwt_ttl_minutes: i64,
    pub admin: AdminSeed,
    pub seed_services: bool,
    pub push: PushConfig,
    pub google_api_base: String,
    pub google_userinfo_url: String,
    pub google_token_url: String,
    /// OAuth client used to refresh calendar tokens. Refresh is off when the id is empty.
    pub google_client_id: String,
    pub google_client_secret: String,
    pub facebook_graph_base: String,
    pub reminder_hour: u32,
}

#[derive(Clone, Debug)]
pub struct AdminSeed {
    pub email: String,
    pub password: String,
    pub name: String,
}

impl Config {
    pub fn from_env() -> Self {
        let jwt_secret = env::var("JWT_SECRET").unwrap_or_else(|_| {
            log::warn!("JWT_SECRET not set. Using a development secret. Set JWT_SECRET in production.");
            DEV_JWT_SECRET.to_string()
        });

        let reminder_hour = parse_or("REMINDER_HOUR", 10u32);
        let reminder_hour = if reminder_hour > 23 {
            log::warn!("REMINDER_HOUR {reminder_hour} out of range, using 10");
            10
        } else {
            reminder_hour
        };

        Self {
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string()),
            port: parse_or("PORT", 8080),
            jwt_secret,
            jwt_ttl_minutes: parse_or("JWT_TTL_MINUTES", 60),
            admin: AdminSeed {
                email: env::var("ADMIN_EMAIL").unwrap_or_else(|_| "admin@salonbook.local".to_string()),
                password: env::var("ADMIN_PASSWORD").unwrap_or_else(|_| "admin".to_string()),
                name: env::var("ADMIN_NAME").unwrap_or_else(|_| "Salon Admin".to_string()),
            },
            seed_services: env::var("SEED_SERVICES")
                .map(|value| value == "true")
                .unwrap_or(false),
            push: PushConfig {
                public_key: env::var("VAPID_PUBLIC_KEY").unwrap_or_default(),
                private_key: env::var("VAPID_PRIVATE_KEY").unwrap_or_default(),
                subject: env::var("VAPID_SUBJECT")
                    .unwrap_or_else(|_| "mailto:bookings@salonbook.local".to_string()),
            },
            google_api_base: env::var("GOOGLE_API_BASE")
                .unwrap_or_else(|_| "https://www.googleapis.com".to_string()),
            google_userinfo_url: env::var("GOOGLE_USERINFO_URL")
                .unwrap_or_else(|_| "https://www.googleapis.com/oauth2/v3/userinfo".to_string()),
            google_token_url: env::var("GOOGLE_TOKEN_URL")
                .unwrap_or_else(|_| "https://oauth2.googleapis.com/token".to_string()),
            google_client_id: env::var("GOOGLE_CLIENT_ID").unwrap_or_default(),
            google_client_secret: env::var("GOOGLE_CLIENT_SECRET").unwrap_or_default(),
            facebook_graph_base: env::var("FACEBOOK_GRAPH_BASE")
                .unwrap_or_else(|_| "https://graph.facebook.com".to_string()),
            reminder_hour,
        }
    }

    /// Settings for tests and local tooling: in-memory database, fixed secret.
    pub fn for_tests() -> Self {
        Self {
            database_url: "sqlite::memory:".to_string(),
            port: 0,
            jwt_secret: "test-secret".to_string(),
            jwt_ttl_minutes: 60,
            admin: AdminSeed {
                email: "admin@salonbook.local".to_string(),
                password: "admin-password".to_string(),
                name: "Salon Admin".to_string(),
            },
            seed_services: false,
            push: PushConfig {
                public_key: String::new(),
                private_key: String::new(),
                subject: String::new(),
            },
            google_api_base: "http://127.0.0.1:9".to_string(),
            google_userinfo_url: "http://127.0.0.1:9/userinfo".to_string(),
            google_token_url: "http://127.0.0.1:9/token".to_string(),
            google_client_id: String::new(),
            google_client_secret: String::new(),
            facebook_graph_base: "http://127.0.0.1:9".to_string(),
            reminder_hour: 10,
        }
    }
}

fn parse_or<T>(key: &str, default: T) -> T
where
    T: FromStr + Display,
    T::Err: Display,
{
    match env::var(key) {
        Ok(raw) => parse_value(key, &raw, default),
        Err(_) => default,
    }
}

fn parse_value<T>(key: &str, raw: &str, default: T) -> T
where
    T: FromStr + Display,
    T::Err: Display,
{
    raw.trim().parse().unwrap_or_else(|err| {
        log::warn!("Invalid {key} value {raw:?}: {err}. Using {default}");
        default
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_value_falls_back_on_garbage() {
        assert_eq!(parse_value("PORT", "not-a-port", 8080u16), 8080);
        assert_eq!(parse_value("PORT", " 9000 ", 8080u16), 9000);
        assert_eq!(parse_value("JWT_TTL_MINUTES", "-5", 60i64), -5);
    }

    #[test]
    fn test_config_uses_memory_database() {
        let config = Config::for_tests();
        assert_eq!(config.database_url, "sqlite::memory:");
        assert!(!config.push.enabled());
    }
}
