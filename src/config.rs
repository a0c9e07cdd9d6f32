use crate::error::{Result, RotaError};
use std::env;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// SOCKS proxy all traffic is routed through
    pub proxy: SocksProxyConfig,
    /// Control channel of the anonymity backend
    pub control: ControlConfig,
    /// Identity rotation policy
    pub rotation: RotationConfig,
    /// Address-echo oracle used to confirm a new identity
    pub probe: ProbeConfig,
    /// Worker pool configuration
    pub workers: WorkerConfig,
    /// Telemetry output
    pub telemetry: TelemetryConfig,
    /// Logging configuration
    pub log: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocksProxyConfig {
    /// Proxy host (default: 127.0.0.1)
    pub host: String,
    /// Proxy port (default: 9050)
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ControlConfig {
    /// Control host (default: proxy host)
    pub host: String,
    /// Control port (default: 9051)
    pub port: u16,
    /// Control password, empty for null authentication
    pub password: String,
    /// Connection timeout
    pub connect_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct RotationConfig {
    /// Outer renewal attempts per acquisition
    pub max_attempts: u32,
    /// Minimum interval between accepted renewals
    pub min_interval: Duration,
    /// Wait after a failed control attempt
    pub retry_backoff: Duration,
    /// Upper bound on one acquisition
    pub deadline: Duration,
    /// Probes per outer attempt
    pub confirm_attempts: u32,
    /// Wait between probes
    pub confirm_backoff: Duration,
}

#[derive(Debug, Clone)]
pub struct ProbeConfig {
    pub url: Url,
    /// JSON field holding the visible address
    pub field: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Number of concurrent workers (default: 5)
    pub count: usize,
    /// Per-request timeout
    pub request_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// JSON-lines file records are appended to
    pub path: String,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level (debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty)
    pub format: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let proxy = parse_socks_proxy()?;
        let control_host = get_env_or("TOR_CONTROL_HOST", &proxy.host);

        let workers = parse_env::<usize>("WORKER_COUNT", "5")?;
        if workers == 0 {
            return Err(RotaError::InvalidConfig(
                "WORKER_COUNT must be at least 1".into(),
            ));
        }

        let max_attempts = parse_env::<u32>("ROTATION_MAX_ATTEMPTS", "3")?;
        let confirm_attempts = parse_env::<u32>("CONFIRM_ATTEMPTS", "3")?;
        if max_attempts == 0 || confirm_attempts == 0 {
            return Err(RotaError::InvalidConfig(
                "ROTATION_MAX_ATTEMPTS and CONFIRM_ATTEMPTS must be at least 1".into(),
            ));
        }

        let probe_url = get_env_or("PROBE_URL", "http://httpbin.org/ip");
        let probe_url = Url::parse(&probe_url).map_err(|e| {
            RotaError::InvalidConfig(format!("PROBE_URL must be a valid URL: {}", e))
        })?;

        Ok(Config {
            control: ControlConfig {
                host: control_host,
                port: parse_port("TOR_CONTROL_PORT", "9051")?,
                password: get_env_or("TOR_CONTROL_PASSWORD", ""),
                connect_timeout: parse_secs("TOR_CONNECTION_TIMEOUT", "30")?,
            },
            proxy,
            rotation: RotationConfig {
                max_attempts,
                min_interval: parse_secs("ROTATION_MIN_INTERVAL", "10")?,
                retry_backoff: parse_secs("ROTATION_RETRY_BACKOFF", "5")?,
                deadline: parse_secs("ROTATION_DEADLINE", "180")?,
                confirm_attempts,
                confirm_backoff: parse_secs("CONFIRM_BACKOFF", "2")?,
            },
            probe: ProbeConfig {
                url: probe_url,
                field: get_env_or("PROBE_FIELD", "origin"),
                timeout: parse_secs("PROBE_TIMEOUT", "10")?,
            },
            workers: WorkerConfig {
                count: workers,
                request_timeout: parse_secs("REQUEST_TIMEOUT", "10")?,
            },
            telemetry: TelemetryConfig {
                path: get_env_or("TELEMETRY_PATH", "traffic_log.json"),
            },
            log: LogConfig {
                level: get_env_or("LOG_LEVEL", "info"),
                format: get_env_or("LOG_FORMAT", "pretty"),
            },
        })
    }

    /// Get the SOCKS proxy address
    pub fn socks_addr(&self) -> String {
        format!("{}:{}", self.proxy.host, self.proxy.port)
    }

    /// Get the control channel address
    pub fn control_addr(&self) -> String {
        format!("{}:{}", self.control.host, self.control.port)
    }
}

fn parse_socks_proxy() -> Result<SocksProxyConfig> {
    let username = non_empty_env("TOR_SOCKS_USERNAME");
    let password = non_empty_env("TOR_SOCKS_PASSWORD");

    if username.is_some() != password.is_some() {
        return Err(RotaError::InvalidConfig(
            "TOR_SOCKS_USERNAME and TOR_SOCKS_PASSWORD must be set together".into(),
        ));
    }

    Ok(SocksProxyConfig {
        host: get_env_or("TOR_PROXY_HOST", "127.0.0.1"),
        port: parse_port("TOR_SOCKS_PORT", "9050")?,
        username,
        password,
    })
}

fn parse_port(key: &str, default: &str) -> Result<u16> {
    get_env_or(key, default).parse().map_err(|_| {
        RotaError::InvalidConfig(format!("{} must be a valid port number", key))
    })
}

fn parse_secs(key: &str, default: &str) -> Result<Duration> {
    parse_env::<u64>(key, default).map(Duration::from_secs)
}

fn parse_env<T: FromStr>(key: &str, default: &str) -> Result<T> {
    get_env_or(key, default)
        .trim()
        .parse()
        .map_err(|_| RotaError::InvalidConfig(format!("{} must be a valid number", key)))
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

/// Get environment variable with a default value
fn get_env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const CONFIG_ENV_KEYS: &[&str] = &[
        "TOR_PROXY_HOST",
        "TOR_SOCKS_PORT",
        "TOR_SOCKS_USERNAME",
        "TOR_SOCKS_PASSWORD",
        "TOR_CONTROL_HOST",
        "TOR_CONTROL_PORT",
        "TOR_CONTROL_PASSWORD",
        "TOR_CONNECTION_TIMEOUT",
        "WORKER_COUNT",
        "REQUEST_TIMEOUT",
        "ROTATION_MAX_ATTEMPTS",
        "ROTATION_MIN_INTERVAL",
        "ROTATION_RETRY_BACKOFF",
        "ROTATION_DEADLINE",
        "CONFIRM_ATTEMPTS",
        "CONFIRM_BACKOFF",
        "PROBE_URL",
        "PROBE_FIELD",
        "PROBE_TIMEOUT",
        "TELEMETRY_PATH",
        "LOG_LEVEL",
        "LOG_FORMAT",
    ];

    struct EnvGuard {
        saved: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new(keys: &[&str]) -> Self {
            let saved = keys
                .iter()
                .map(|&key| {
                    let old = env::var(key).ok();
                    env::remove_var(key);
                    (key.to_string(), old)
                })
                .collect();

            Self { saved }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in self.saved.drain(..) {
                match value {
                    Some(v) => env::set_var(key, v),
                    None => env::remove_var(key),
                }
            }
        }
    }

    #[test]
    fn test_config_from_env_defaults() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = EnvGuard::new(CONFIG_ENV_KEYS);

        let config = Config::from_env().unwrap();

        assert_eq!(config.socks_addr(), "127.0.0.1:9050");
        assert_eq!(config.control_addr(), "127.0.0.1:9051");
        assert!(config.proxy.username.is_none());
        assert_eq!(config.control.password, "");
        assert_eq!(config.control.connect_timeout, Duration::from_secs(30));

        assert_eq!(config.rotation.max_attempts, 3);
        assert_eq!(config.rotation.min_interval, Duration::from_secs(10));
        assert_eq!(config.rotation.confirm_attempts, 3);
        assert_eq!(config.rotation.confirm_backoff, Duration::from_secs(2));

        assert_eq!(config.probe.url.as_str(), "http://httpbin.org/ip");
        assert_eq!(config.probe.field, "origin");
        assert_eq!(config.workers.count, 5);
        assert_eq!(config.workers.request_timeout, Duration::from_secs(10));
        assert_eq!(config.telemetry.path, "traffic_log.json");
    }

    #[test]
    fn test_config_from_env_overrides() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = EnvGuard::new(CONFIG_ENV_KEYS);

        env::set_var("TOR_PROXY_HOST", "10.0.0.2");
        env::set_var("TOR_SOCKS_PORT", "9150");
        env::set_var("TOR_SOCKS_USERNAME", "worker");
        env::set_var("TOR_SOCKS_PASSWORD", "isolate");
        env::set_var("TOR_CONTROL_PORT", "9151");
        env::set_var("TOR_CONTROL_PASSWORD", "secret");
        env::set_var("WORKER_COUNT", "8");
        env::set_var("ROTATION_MIN_INTERVAL", "15");
        env::set_var("PROBE_URL", "https://api.ipify.org/?format=json");
        env::set_var("PROBE_FIELD", "ip");

        let config = Config::from_env().unwrap();

        assert_eq!(
            config.proxy,
            SocksProxyConfig {
                host: "10.0.0.2".to_string(),
                port: 9150,
                username: Some("worker".to_string()),
                password: Some("isolate".to_string()),
            }
        );
        // control host follows the proxy host unless set explicitly
        assert_eq!(config.control_addr(), "10.0.0.2:9151");
        assert_eq!(config.control.password, "secret");
        assert_eq!(config.workers.count, 8);
        assert_eq!(config.rotation.min_interval, Duration::from_secs(15));
        assert_eq!(config.probe.url.host_str(), Some("api.ipify.org"));
        assert_eq!(config.probe.field, "ip");
    }

    #[test]
    fn test_config_from_env_invalid_port() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = EnvGuard::new(CONFIG_ENV_KEYS);

        env::set_var("TOR_CONTROL_PORT", "not-a-port");
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, RotaError::InvalidConfig(_)));
    }

    #[test]
    fn test_config_from_env_rejects_zero_workers() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = EnvGuard::new(CONFIG_ENV_KEYS);

        env::set_var("WORKER_COUNT", "0");
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, RotaError::InvalidConfig(_)));
    }

    #[test]
    fn test_config_from_env_socks_credentials_must_pair() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = EnvGuard::new(CONFIG_ENV_KEYS);

        env::set_var("TOR_SOCKS_USERNAME", "worker");
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, RotaError::InvalidConfig(_)));
    }

    #[test]
    fn test_config_from_env_invalid_probe_url() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = EnvGuard::new(CONFIG_ENV_KEYS);

        env::set_var("PROBE_URL", "not a url");
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, RotaError::InvalidConfig(_)));
    }
}
