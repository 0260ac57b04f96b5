use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub app_env: String,
    pub port: u16,
    pub log_level: String,
    pub jwt_secret: String,
    pub redis_url: String,
    pub realtime_transport: String,
    pub realtime_channel_prefix: String,
    pub presence_probe_interval_ms: u64,
    pub presence_owner_ttl_ms: u64,
    pub chat_window_hours: i64,
    pub chat_message_budget: u32,
    pub connection_daily_limit_free: usize,
    pub connection_daily_limit_premium: usize,
    pub quota_utc_offset_minutes: i32,
    pub reveal_window_secs: i64,
    pub archive_window_days: i64,
    pub expiry_sweep_enabled: bool,
    pub expiry_sweep_interval_ms: u64,
    pub directory_seed_path: String,
    pub data_backend: String,
    pub surreal_endpoint: String,
    pub surreal_ns: String,
    pub surreal_db: String,
    pub surreal_user: String,
    pub surreal_pass: String,
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        dotenvy::dotenv().ok();
        let cfg = config::Config::builder()
            .set_default("app_env", "development")?
            .set_default("port", 3000)?
            .set_default("log_level", "info")?
            .set_default("jwt_secret", "dev-secret")?
            .set_default("redis_url", "redis://127.0.0.1:6379")?
            .set_default("realtime_transport", "local")?
            .set_default("realtime_channel_prefix", "rapport:presence")?
            .set_default("presence_probe_interval_ms", 30_000)?
            .set_default("presence_owner_ttl_ms", 90_000)?
            .set_default("chat_window_hours", 48)?
            .set_default("chat_message_budget", 10)?
            .set_default("connection_daily_limit_free", 5)?
            .set_default("connection_daily_limit_premium", 20)?
            .set_default("quota_utc_offset_minutes", 0)?
            .set_default("reveal_window_secs", 300)?
            .set_default("archive_window_days", 7)?
            .set_default("expiry_sweep_enabled", false)?
            .set_default("expiry_sweep_interval_ms", 60_000)?
            .set_default("directory_seed_path", "")?
            .set_default("data_backend", "memory")?
            .set_default("surreal_endpoint", "ws://127.0.0.1:8000")?
            .set_default("surreal_ns", "rapport")?
            .set_default("surreal_db", "ledgers")?
            .set_default("surreal_user", "root")?
            .set_default("surreal_pass", "root")?
            .add_source(config::Environment::default().separator("__"))
            .build()?;
        let config: Self = cfg.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects settings that would break ledger invariants: the reveal window
    /// must close before the archive window and chats need a non-zero budget.
    pub fn validate(&self) -> Result<(), config::ConfigError> {
        let exchange = self.exchange_policy();
        if exchange.reveal_window_ms <= 0
            || exchange.reveal_window_ms >= exchange.archive_window_ms
        {
            return Err(config::ConfigError::Message(format!(
                "reveal_window_secs ({}) must be positive and shorter than archive_window_days ({})",
                self.reveal_window_secs, self.archive_window_days
            )));
        }
        if self.chat_message_budget == 0 {
            return Err(config::ConfigError::Message(
                "chat_message_budget must be at least 1".to_string(),
            ));
        }
        if self.chat_window_hours <= 0 {
            return Err(config::ConfigError::Message(
                "chat_window_hours must be positive".to_string(),
            ));
        }
        if !self.uses_surreal() && !self.data_backend.eq_ignore_ascii_case("memory") {
            return Err(config::ConfigError::Message(format!(
                "unknown data_backend '{}' (expected memory or surrealdb)",
                self.data_backend
            )));
        }
        Ok(())
    }

    pub fn is_production(&self) -> bool {
        self.app_env.eq_ignore_ascii_case("production")
    }

    pub fn uses_surreal(&self) -> bool {
        self.data_backend.eq_ignore_ascii_case("surrealdb")
            || self.data_backend.eq_ignore_ascii_case("surreal")
    }

    pub fn uses_redis_presence(&self) -> bool {
        self.realtime_transport.eq_ignore_ascii_case("redis")
    }

    pub fn connection_policy(&self) -> rapport_domain::connections::ConnectionPolicy {
        rapport_domain::connections::ConnectionPolicy {
            chat_window_ms: self.chat_window_hours * rapport_domain::util::MS_PER_HOUR,
            message_budget: self.chat_message_budget,
            daily_limit_free: self.connection_daily_limit_free,
            daily_limit_premium: self.connection_daily_limit_premium,
            quota_utc_offset_minutes: self.quota_utc_offset_minutes,
        }
    }

    pub fn exchange_policy(&self) -> rapport_domain::exchange::ExchangePolicy {
        rapport_domain::exchange::ExchangePolicy {
            reveal_window_ms: self.reveal_window_secs * 1_000,
            archive_window_ms: self.archive_window_days * rapport_domain::util::MS_PER_DAY,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn sample() -> AppConfig {
        AppConfig {
            app_env: "test".to_string(),
            port: 0,
            log_level: "info".to_string(),
            jwt_secret: "secret".to_string(),
            redis_url: "redis://127.0.0.1:6379".to_string(),
            realtime_transport: "local".to_string(),
            realtime_channel_prefix: "rapport:presence".to_string(),
            presence_probe_interval_ms: 30_000,
            presence_owner_ttl_ms: 90_000,
            chat_window_hours: 48,
            chat_message_budget: 10,
            connection_daily_limit_free: 5,
            connection_daily_limit_premium: 20,
            quota_utc_offset_minutes: 0,
            reveal_window_secs: 300,
            archive_window_days: 7,
            expiry_sweep_enabled: false,
            expiry_sweep_interval_ms: 60_000,
            directory_seed_path: String::new(),
            data_backend: "memory".to_string(),
            surreal_endpoint: "ws://127.0.0.1:8000".to_string(),
            surreal_ns: "rapport".to_string(),
            surreal_db: "ledgers".to_string(),
            surreal_user: "root".to_string(),
            surreal_pass: "root".to_string(),
        }
    }

    #[test]
    fn defaults_pass_validation() {
        assert!(sample().validate().is_ok());
    }

    #[test]
    fn reveal_window_must_close_before_archive() {
        let mut config = sample();
        config.reveal_window_secs = 700_000;
        assert!(config.validate().is_err());

        config.reveal_window_secs = 7 * 24 * 3600;
        assert!(config.validate().is_err());

        config.reveal_window_secs = 7 * 24 * 3600 - 1;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_message_budget_is_rejected() {
        let mut config = sample();
        config.chat_message_budget = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("chat_message_budget"));
    }

    #[test]
    fn surreal_backend_is_selected_case_insensitively() {
        let mut config = sample();
        assert!(!config.uses_surreal());
        config.data_backend = "SurrealDB".to_string();
        assert!(config.uses_surreal());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn unknown_data_backend_is_rejected() {
        let mut config = sample();
        config.data_backend = "postgres".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("data_backend"));
    }
}
