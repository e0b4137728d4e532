use std::path::PathBuf;
use std::str::FromStr;

use renderq_browser::BrowserOptions;
use renderq_transport::QueueOptions;

/// Which transports to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnMode {
    Nats,
    #[default]
    WebSocket,
    Both,
}

impl ConnMode {
    pub fn uses_nats(self) -> bool {
        matches!(self, Self::Nats | Self::Both)
    }

    pub fn uses_websocket(self) -> bool {
        matches!(self, Self::WebSocket | Self::Both)
    }
}

impl FromStr for ConnMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NATS" => Ok(Self::Nats),
            "WS" | "WEBSOCKET" | "" => Ok(Self::WebSocket),
            "BOTH" => Ok(Self::Both),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var}={value:?} is invalid, expected {expected}")]
    Invalid {
        var: &'static str,
        value: String,
        expected: &'static str,
    },
}

/// Worker configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub conn_mode: ConnMode,
    pub nats: QueueOptions,
    pub websocket_url: String,
    pub browser: BrowserOptions,
    pub log_format: LogFormat,
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var             | Default                    |
    /// |---------------------|----------------------------|
    /// | `CONN_MODE`         | `WS`                       |
    /// | `NATS_URL`          | `nats://localhost:4222`    |
    /// | `JOB_SUBJECT`       | `job`                      |
    /// | `JOB_QUEUE_GROUP`   | `job.workers`              |
    /// | `NATS_REGISTER`     | `false`                    |
    /// | `REGISTER_SUBJECT`  | `register`                 |
    /// | `WEBSOCKET_URL`     | `ws://localhost:8162`      |
    /// | `CHROME_EXECUTABLE` | unset (fetch a browser)    |
    /// | `BROWSER_CACHE_DIR` | `$TMPDIR/renderq-chromium` |
    /// | `BROWSER_HEADLESS`  | `true`                     |
    /// | `LOG_FORMAT`        | `text`                     |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Same as [`from_env`](Self::from_env) but reads through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let string = |var: &str, default: &str| lookup(var).unwrap_or_else(|| default.to_string());

        let conn_mode = parse::<ConnMode>(&lookup, "CONN_MODE", "NATS, WS, WEBSOCKET or BOTH")?
            .unwrap_or_default();
        let log_format = parse::<LogFormat>(&lookup, "LOG_FORMAT", "text or json")?.unwrap_or_default();
        let register = flag(&lookup, "NATS_REGISTER")?.unwrap_or(false);
        let headless = flag(&lookup, "BROWSER_HEADLESS")?.unwrap_or(true);

        let defaults = QueueOptions::default();
        let nats = QueueOptions {
            url: string("NATS_URL", &defaults.url),
            subject: string("JOB_SUBJECT", &defaults.subject),
            queue_group: string("JOB_QUEUE_GROUP", &defaults.queue_group),
            register_subject: register.then(|| string("REGISTER_SUBJECT", "register")),
        };

        let browser_defaults = BrowserOptions::default();
        let browser = BrowserOptions {
            executable: lookup("CHROME_EXECUTABLE")
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
            cache_dir: lookup("BROWSER_CACHE_DIR")
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or(browser_defaults.cache_dir),
            headless,
        };

        Ok(Self {
            conn_mode,
            nats,
            websocket_url: string("WEBSOCKET_URL", "ws://localhost:8162"),
            browser,
            log_format,
        })
    }
}

fn parse<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    expected: &'static str,
) -> Result<Option<T>, ConfigError> {
    lookup(var)
        .map(|value| {
            value.parse().map_err(|_| ConfigError::Invalid {
                var,
                value,
                expected,
            })
        })
        .transpose()
}

fn flag(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<bool>, ConfigError> {
    let Some(value) = lookup(var) else {
        return Ok(None);
    };
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(Some(true)),
        "0" | "false" | "no" | "off" => Ok(Some(false)),
        "" => Ok(None),
        _ => Err(ConfigError::Invalid {
            var,
            value,
            expected: "true or false",
        }),
    }
}
