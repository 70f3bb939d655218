use std::env;

/// Runtime configuration for the access-control service
#[derive(Debug, Clone)]
pub struct AccessConfig {
    /// Session lifetime in hours (default: 8)
    pub session_lifetime_hours: i64,

    /// Extend the session when validated within this many minutes of
    /// expiry (default: 30)
    pub session_extension_window_mins: i64,

    /// Extension applied when inside the window, in hours (default: 2)
    pub session_extension_hours: i64,

    /// Minimum seconds between persisted activity touches. Expiry
    /// extension writes are never throttled. (default: 60)
    pub session_touch_interval_secs: i64,

    /// Attempts for the share counter check-and-increment before the
    /// request fails closed (default: 3)
    pub share_increment_retries: u32,

    /// Maximum share-link expiry in hours (default: 8760, one year)
    pub max_share_expiry_hours: i64,

    /// Allowed CORS Origins (comma separated)
    pub allowed_origins: Vec<String>,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            session_lifetime_hours: 8,
            session_extension_window_mins: 30,
            session_extension_hours: 2,
            session_touch_interval_secs: 60,
            share_increment_retries: 3,
            max_share_expiry_hours: 8760,
            allowed_origins: vec![
                "http://localhost:3000".to_string(),
                "http://localhost:5173".to_string(),
                "http://127.0.0.1:3000".to_string(),
            ],
        }
    }
}

impl AccessConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            session_lifetime_hours: env::var("SESSION_LIFETIME_HOURS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.session_lifetime_hours),

            session_extension_window_mins: env::var("SESSION_EXTENSION_WINDOW_MINS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.session_extension_window_mins),

            session_extension_hours: env::var("SESSION_EXTENSION_HOURS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.session_extension_hours),

            session_touch_interval_secs: env::var("SESSION_TOUCH_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.session_touch_interval_secs),

            share_increment_retries: env::var("SHARE_INCREMENT_RETRIES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.share_increment_retries),

            max_share_expiry_hours: env::var("MAX_SHARE_EXPIRY_HOURS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_share_expiry_hours),

            allowed_origins: env::var("ALLOWED_ORIGINS")
                .ok()
                .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or(default.allowed_origins),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AccessConfig::default();
        assert_eq!(config.session_lifetime_hours, 8);
        assert_eq!(config.session_extension_window_mins, 30);
        assert_eq!(config.session_extension_hours, 2);
        assert_eq!(config.share_increment_retries, 3);
    }

    #[test]
    fn test_from_env_cors_fallback() {
        unsafe { env::remove_var("ALLOWED_ORIGINS") };
        let config = AccessConfig::from_env();
        let default_config = AccessConfig::default();
        assert_eq!(config.allowed_origins, default_config.allowed_origins);
        assert!(!config.allowed_origins.contains(&"*".to_string()));
    }
}
