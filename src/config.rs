use clap::{Args, Parser};

#[derive(Clone, Debug, Default, Parser)]
#[command(version, about, long_about = None)]
pub struct Config {
    #[command(flatten)]
    pub server: ServerConfig,

    #[command(flatten)]
    pub queue: QueueConfig,

    #[command(flatten)]
    pub telemetry: TelemetryConfig,

    #[command(flatten)]
    pub webhook: WebhookConfig,

    #[command(flatten)]
    pub telegram: TelegramConfig,
}

impl Config {
    #[must_use]
    pub fn load() -> Self {
        Self::parse()
    }
}

#[derive(Clone, Debug, Args)]
pub struct ServerConfig {
    /// Host the API listens on
    #[arg(long = "api-host", env = "SHOVE_API_HOST", default_value_t = ServerConfig::default().host)]
    pub host: String,

    /// Port the API listens on
    #[arg(long = "api-port", env = "SHOVE_API_PORT", default_value_t = ServerConfig::default().port)]
    pub port: u16,

    /// How long to wait for pumps to drain during shutdown in seconds
    #[arg(long, env = "SHOVE_SHUTDOWN_TIMEOUT_SECS", default_value_t = ServerConfig::default().shutdown_timeout_secs)]
    pub shutdown_timeout_secs: u64,

    /// Serve queues without exposing the HTTP API
    #[arg(long, env = "SHOVE_WORKER_ONLY", default_value_t = ServerConfig::default().worker_only)]
    pub worker_only: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8322,
            shutdown_timeout_secs: 5,
            worker_only: false,
        }
    }
}

#[derive(Clone, Debug, Default, Args)]
pub struct QueueConfig {
    /// Redis connection URL (e.g. <redis://localhost:6379>). Unset means
    /// non-persistent in-memory queues.
    #[arg(long = "redis-url", env = "SHOVE_REDIS_URL")]
    pub redis_url: Option<String>,
}

#[derive(Clone, Debug, Default, clap::ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
        }
    }
}

#[derive(Clone, Debug, Default, Args)]
pub struct TelemetryConfig {
    /// Log format (text or json)
    #[arg(long, env = "SHOVE_LOG_FORMAT", default_value_t = TelemetryConfig::default().log_format)]
    pub log_format: LogFormat,
}

#[derive(Clone, Debug, Default, Args)]
pub struct WebhookConfig {
    /// Number of workers pushing webhook messages (0 disables the service)
    #[arg(
        long = "webhook-workers",
        id = "webhook_workers",
        env = "SHOVE_WEBHOOK_WORKERS",
        default_value_t = WebhookConfig::default().workers
    )]
    pub workers: usize,
}

#[derive(Clone, Debug, Args)]
pub struct TelegramConfig {
    /// Telegram bot token; unset disables the service
    #[arg(long = "telegram-bot-token", env = "SHOVE_TELEGRAM_BOT_TOKEN")]
    pub bot_token: Option<String>,

    /// Number of workers pushing Telegram messages
    #[arg(
        long = "telegram-workers",
        id = "telegram_workers",
        env = "SHOVE_TELEGRAM_WORKERS",
        default_value_t = TelegramConfig::default().workers
    )]
    pub workers: usize,

    /// Telegram max. rate (amount, 0 disables rate limiting)
    #[arg(long = "telegram-rate-amount", env = "SHOVE_TELEGRAM_RATE_AMOUNT", default_value_t = TelegramConfig::default().rate_amount)]
    pub rate_amount: u32,

    /// Telegram max. rate (per seconds)
    #[arg(long = "telegram-rate-per", env = "SHOVE_TELEGRAM_RATE_PER", default_value_t = TelegramConfig::default().rate_per_secs)]
    pub rate_per_secs: u64,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            workers: 2,
            rate_amount: 0,
            rate_per_secs: 0,
        }
    }
}
