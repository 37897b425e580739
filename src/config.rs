use std::time::Duration;

/// Where gateway and HTTP credentials are checked.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthMode {
    /// Opaque tokens issued at login and stored hashed in the database.
    Token,
    /// HS256 JWTs signed with a shared secret.
    Jwt { secret: String },
    /// JWTs from an external identity provider, verified against its key set.
    Jwks { url: String },
}

impl AuthMode {
    pub fn name(&self) -> &'static str {
        match self {
            AuthMode::Token => "token",
            AuthMode::Jwt { .. } => "jwt",
            AuthMode::Jwks { .. } => "jwks",
        }
    }
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Sessions silent for longer than this are closed.
    pub heartbeat_timeout: Duration,
    /// Capacity of each connection's outbound queue.
    pub outbound_queue: usize,
    pub max_connections_per_user: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout: Duration::from_secs(45),
            outbound_queue: 256,
            max_connections_per_user: 5,
        }
    }
}

pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub auth: AuthMode,
    pub gateway: GatewayConfig,
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

impl Config {
    pub fn from_env() -> Self {
        let auth = match std::env::var("THICKET_AUTH")
            .unwrap_or_else(|_| "token".to_string())
            .to_lowercase()
            .as_str()
        {
            "jwt" => AuthMode::Jwt {
                secret: std::env::var("JWT_SECRET")
                    .expect("JWT_SECRET is required when THICKET_AUTH=jwt"),
            },
            "jwks" => AuthMode::Jwks {
                url: std::env::var("JWKS_URL")
                    .expect("JWKS_URL is required when THICKET_AUTH=jwks"),
            },
            _ => AuthMode::Token,
        };

        let defaults = GatewayConfig::default();
        let gateway = GatewayConfig {
            heartbeat_timeout: env_parse::<u64>("THICKET_HEARTBEAT_TIMEOUT_SECS")
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.heartbeat_timeout),
            outbound_queue: env_parse::<usize>("THICKET_OUTBOUND_QUEUE")
                .filter(|n| *n > 0)
                .unwrap_or(defaults.outbound_queue),
            max_connections_per_user: env_parse::<usize>("THICKET_MAX_CONNECTIONS_PER_USER")
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_connections_per_user),
        };

        Self {
            port: env_parse("PORT").unwrap_or(39100),
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:thicket.db?mode=rwc".to_string()),
            auth,
            gateway,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        for var in [
            "PORT",
            "DATABASE_URL",
            "THICKET_AUTH",
            "JWT_SECRET",
            "JWKS_URL",
            "THICKET_HEARTBEAT_TIMEOUT_SECS",
            "THICKET_OUTBOUND_QUEUE",
            "THICKET_MAX_CONNECTIONS_PER_USER",
        ] {
            std::env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_default_config() {
        clear_env();
        let config = Config::from_env();
        assert_eq!(config.port, 39100);
        assert_eq!(config.database_url, "sqlite:thicket.db?mode=rwc");
        assert_eq!(config.auth, AuthMode::Token);
        assert_eq!(config.gateway.heartbeat_timeout, Duration::from_secs(45));
        assert_eq!(config.gateway.outbound_queue, 256);
        assert_eq!(config.gateway.max_connections_per_user, 5);
    }

    #[test]
    #[serial]
    fn test_port_from_env() {
        clear_env();
        std::env::set_var("PORT", "8080");
        assert_eq!(Config::from_env().port, 8080);
    }

    #[test]
    #[serial]
    fn test_invalid_values_fall_back_to_defaults() {
        clear_env();
        std::env::set_var("PORT", "not_a_number");
        std::env::set_var("THICKET_OUTBOUND_QUEUE", "0");
        std::env::set_var("THICKET_HEARTBEAT_TIMEOUT_SECS", "-3");
        let config = Config::from_env();
        assert_eq!(config.port, 39100);
        assert_eq!(config.gateway.outbound_queue, 256);
        assert_eq!(config.gateway.heartbeat_timeout, Duration::from_secs(45));
    }

    #[test]
    #[serial]
    fn test_gateway_overrides() {
        clear_env();
        std::env::set_var("THICKET_HEARTBEAT_TIMEOUT_SECS", "10");
        std::env::set_var("THICKET_OUTBOUND_QUEUE", "32");
        std::env::set_var("THICKET_MAX_CONNECTIONS_PER_USER", "2");
        let config = Config::from_env();
        assert_eq!(config.gateway.heartbeat_timeout, Duration::from_secs(10));
        assert_eq!(config.gateway.outbound_queue, 32);
        assert_eq!(config.gateway.max_connections_per_user, 2);
    }

    #[test]
    #[serial]
    fn test_jwt_mode() {
        clear_env();
        std::env::set_var("THICKET_AUTH", "JWT");
        std::env::set_var("JWT_SECRET", "s3cret");
        let config = Config::from_env();
        assert_eq!(
            config.auth,
            AuthMode::Jwt {
                secret: "s3cret".to_string()
            }
        );
        assert_eq!(config.auth.name(), "jwt");
    }

    #[test]
    #[serial]
    fn test_jwks_mode() {
        clear_env();
        std::env::set_var("THICKET_AUTH", "jwks");
        std::env::set_var("JWKS_URL", "https://id.example.com/.well-known/jwks.json");
        let config = Config::from_env();
        assert_eq!(
            config.auth,
            AuthMode::Jwks {
                url: "https://id.example.com/.well-known/jwks.json".to_string()
            }
        );
    }

    #[test]
    #[serial]
    #[should_panic(expected = "JWT_SECRET is required")]
    fn test_jwt_mode_missing_secret_panics() {
        clear_env();
        std::env::set_var("THICKET_AUTH", "jwt");
        Config::from_env();
    }

    #[test]
    #[serial]
    #[should_panic(expected = "JWKS_URL is required")]
    fn test_jwks_mode_missing_url_panics() {
        clear_env();
        std::env::set_var("THICKET_AUTH", "jwks");
        Config::from_env();
    }
}
