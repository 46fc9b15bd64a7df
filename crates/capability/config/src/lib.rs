//! 应用运行配置加载。

use domain::Dialect;
use std::env;
use std::time::Duration;

/// 配置加载错误。
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {0}: {1}")]
    Invalid(String, String),
}

/// 默认守护进程端口。
pub const DEFAULT_PORT: u16 = 10101;
/// 开发模式下的 extraInfo 地址模板，`{pvd}` 替换为 PvD 标识。
pub const DEFAULT_DEV_URL_TEMPLATE: &str = "http://localhost:8000/{pvd}";

/// 应用运行配置。
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub daemon_host: String,
    pub daemon_port: u16,
    pub dialect: Dialect,
    pub development: bool,
    pub dev_url_template: String,
    pub default_pvds: Vec<String>,
    pub verbose: bool,
    pub retry_delay_ms: u64,
    pub reconnect_interval_ms: u64,
    pub connect_timeout_ms: u64,
    pub fetch_timeout_ms: u64,
    pub keepalive: bool,
}

impl AppConfig {
    /// 从环境变量读取配置。
    pub fn from_env() -> Result<Self, ConfigError> {
        let daemon_host = env::var("PVD_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let daemon_port = match read_optional("PVD_PORT") {
            Some(_) => read_u16_with_default("PVD_PORT", DEFAULT_PORT)?,
            // 旧版 pvdid-daemon 使用 PVDID_PORT
            None => read_u16_with_default("PVDID_PORT", DEFAULT_PORT)?,
        };
        let dialect = match read_optional("PVD_DIALECT") {
            Some(value) => value
                .parse::<Dialect>()
                .map_err(|_| ConfigError::Invalid("PVD_DIALECT".to_string(), value))?,
            None => Dialect::default(),
        };
        let development = read_bool_with_default("PVD_DEVELOPMENT", false);
        let dev_url_template = env::var("PVD_DEV_URL_TEMPLATE")
            .unwrap_or_else(|_| DEFAULT_DEV_URL_TEMPLATE.to_string());
        let default_pvds = read_optional("PVD_DEFAULT_PVDS")
            .map(|value| split_list(&value))
            .unwrap_or_default();
        let verbose = read_bool_with_default("PVD_VERBOSE", false);
        let retry_delay_ms = read_u64_with_default("PVD_RETRY_DELAY_MS", 5_000)?;
        let reconnect_interval_ms = read_u64_with_default("PVD_RECONNECT_INTERVAL_MS", 1_000)?;
        let connect_timeout_ms = read_u64_with_default("PVD_CONNECT_TIMEOUT_MS", 3_000)?;
        let fetch_timeout_ms = read_u64_with_default("PVD_FETCH_TIMEOUT_MS", 10_000)?;
        let keepalive = read_bool_with_default("PVD_KEEPALIVE", true);

        if reconnect_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "PVD_RECONNECT_INTERVAL_MS".to_string(),
                "0".to_string(),
            ));
        }

        Ok(Self {
            daemon_host,
            daemon_port,
            dialect,
            development,
            dev_url_template,
            default_pvds,
            verbose,
            retry_delay_ms,
            reconnect_interval_ms,
            connect_timeout_ms,
            fetch_timeout_ms,
            keepalive,
        })
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
}

/// 拆分逗号或空白分隔的列表，忽略空项。
fn split_list(value: &str) -> Vec<String> {
    value
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn read_u16_with_default(key: &str, default: u16) -> Result<u16, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<u16>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_u64_with_default(key: &str, default: u64) -> Result<u64, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<u64>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_optional(key: &str) -> Option<String> {
    match env::var(key) {
        Ok(value) if !value.is_empty() => Some(value),
        _ => None,
    }
}

fn read_bool_with_default(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(value) => matches!(
            value.to_ascii_lowercase().as_str(),
            "1" | "true" | "on" | "yes"
        ),
        Err(_) => default,
    }
}
