use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Environment {
    Development,
    Test,
    Production,
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Test => write!(f, "test"),
            Environment::Production => write!(f, "production"),
        }
    }
}

#[derive(Clone)]
pub struct AppConfig {
    pub env: Environment,
    pub log_level: String,
    pub api_base_url: String,
    pub api_token: Option<String>,
    pub session_id: Option<String>,
    pub storage_path: PathBuf,
    pub http_timeout_secs: u64,
    pub geo_max_retries: u32,
    pub geo_retry_base_delay_ms: u64,
    pub geo_attempt_timeout_ms: u64,
    pub watch_min_interval_ms: u64,
    pub auto_refresh: bool,
    pub deliverability_max_age_ms: i64,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("env", &self.env)
            .field("log_level", &self.log_level)
            .field("api_base_url", &self.api_base_url)
            .field("api_token", &self.api_token.as_ref().map(|_| "[redacted]"))
            .field("session_id", &self.session_id)
            .field("storage_path", &self.storage_path)
            .field("http_timeout_secs", &self.http_timeout_secs)
            .field("geo_max_retries", &self.geo_max_retries)
            .field("geo_retry_base_delay_ms", &self.geo_retry_base_delay_ms)
            .field("geo_attempt_timeout_ms", &self.geo_attempt_timeout_ms)
            .field("watch_min_interval_ms", &self.watch_min_interval_ms)
            .field("auto_refresh", &self.auto_refresh)
            .field(
                "deliverability_max_age_ms",
                &self.deliverability_max_age_ms,
            )
            .finish()
    }
}
