//! Server configuration.

use crate::DEFAULT_PORT;
use crate::storage::{ExpiryConfig, NodeId, TransactionLimits};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    // === Server ===
    /// Bind address
    pub bind: String,
    /// Port number
    pub port: u16,
    /// Maximum number of clients
    pub max_clients: usize,
    /// Log level
    pub loglevel: LogLevel,
    /// Log file path (empty for stdout)
    pub logfile: Option<PathBuf>,
    /// Reject every write
    pub read_only: bool,
    /// Id of this node on the cluster listener bus
    pub node_id: NodeId,

    // === Transactions ===
    /// Maximum registered watchers across the cluster
    pub max_watchers: usize,
    /// Maximum concurrently active local transactions
    pub max_transactions: usize,
    /// Age after which an active local transaction is rolled back
    pub transaction_timeout: Option<Duration>,

    // === Expiry ===
    /// Active expire cycle interval
    pub active_expire_interval: Duration,
    /// Keys sampled per active expire pass
    pub active_expire_keys: usize,
}

/// Log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Debug,
    Verbose,
    #[default]
    Notice,
    Warning,
}

impl LogLevel {
    /// Parse a redis.conf style level name.
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "debug" => Some(LogLevel::Debug),
            "verbose" => Some(LogLevel::Verbose),
            "notice" => Some(LogLevel::Notice),
            "warning" => Some(LogLevel::Warning),
            _ => None,
        }
    }

    /// Default `tracing` filter directive for this level.
    pub fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Debug => "trace",
            LogLevel::Verbose => "debug",
            LogLevel::Notice => "info",
            LogLevel::Warning => "warn",
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let expiry = ExpiryConfig::default();
        Self {
            bind: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            max_clients: 10000,
            loglevel: LogLevel::default(),
            logfile: None,
            read_only: false,
            node_id: 1,
            max_watchers: 1_000_000,
            max_transactions: 10_000,
            transaction_timeout: None,
            active_expire_interval: expiry.cycle_interval,
            active_expire_keys: expiry.keys_per_cycle,
        }
    }
}

impl Config {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the bind address.
    pub fn bind(mut self, bind: impl Into<String>) -> Self {
        self.bind = bind.into();
        self
    }

    /// Set the port.
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set max clients.
    pub fn max_clients(mut self, max: usize) -> Self {
        self.max_clients = max;
        self
    }

    /// Reject writes.
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Set the node id.
    pub fn node_id(mut self, node_id: NodeId) -> Self {
        self.node_id = node_id;
        self
    }

    /// Set the watcher limit.
    pub fn max_watchers(mut self, max: usize) -> Self {
        self.max_watchers = max;
        self
    }

    /// Set the active transaction limit.
    pub fn max_transactions(mut self, max: usize) -> Self {
        self.max_transactions = max;
        self
    }

    /// Set the transaction timeout.
    pub fn transaction_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.transaction_timeout = timeout;
        self
    }

    /// Limits handed to the transaction table.
    pub fn transaction_limits(&self) -> TransactionLimits {
        TransactionLimits {
            max_active: self.max_transactions,
            timeout: self.transaction_timeout,
        }
    }

    /// Settings for the active expire cycle.
    pub fn expiry_config(&self) -> ExpiryConfig {
        ExpiryConfig {
            cycle_interval: self.active_expire_interval,
            keys_per_cycle: self.active_expire_keys,
            ..ExpiryConfig::default()
        }
    }

    /// Load configuration from a file (redis.conf compatible format).
    ///
    /// # Format
    /// ```text
    /// # Comment
    /// directive value
    /// directive "value with spaces"
    /// include /path/to/other.conf
    /// ```
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let mut config = Config::default();
        config.apply_file(path.as_ref(), 0)?;
        Ok(config)
    }

    /// Parse configuration from a string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let mut config = Config::default();
        config.apply_str(content, 0)?;
        Ok(config)
    }

    fn apply_file(&mut self, path: &Path, depth: usize) -> Result<(), ConfigError> {
        let content =
            fs::read_to_string(path).map_err(|e| ConfigError::IoError(format!("{}: {e}", path.display())))?;
        self.apply_str(&content, depth)
    }

    /// Apply directives in order. Included files apply at the point of
    /// their `include` line, so later lines override them.
    fn apply_str(&mut self, content: &str, depth: usize) -> Result<(), ConfigError> {
        for (line_num, line) in content.lines().enumerate() {
            let line = line.trim();

            // Skip empty lines and comments
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let (directive, value) = Self::parse_line(line).ok_or_else(|| ConfigError::ParseError {
                line: line_num + 1,
                message: "Invalid directive format".to_string(),
            })?;

            if directive.eq_ignore_ascii_case("include") {
                if depth >= MAX_INCLUDE_DEPTH {
                    return Err(ConfigError::ParseError {
                        line: line_num + 1,
                        message: "include nested too deeply".to_string(),
                    });
                }
                self.apply_file(Path::new(value), depth + 1)?;
                continue;
            }

            self.apply_directive(&directive.to_lowercase(), value, line_num + 1)?;
        }
        Ok(())
    }

    /// Parse a single config line into directive and value.
    fn parse_line(line: &str) -> Option<(&str, &str)> {
        let mut parts = line.splitn(2, |c: char| c.is_whitespace());
        let directive = parts.next()?.trim();
        let value = parts.next().map(|v| v.trim()).unwrap_or("");

        // Handle quoted values
        let value = if value.starts_with('"') && value.ends_with('"') && value.len() >= 2 {
            &value[1..value.len() - 1]
        } else {
            value
        };

        Some((directive, value))
    }

    /// Apply a single directive to the config.
    fn apply_directive(&mut self, directive: &str, value: &str, line: usize) -> Result<(), ConfigError> {
        match directive {
            // Server
            "bind" => self.bind = value.to_string(),
            "port" => self.port = parse_number(value, line)?,
            "maxclients" => self.max_clients = parse_number(value, line)?,
            "loglevel" => {
                self.loglevel = LogLevel::parse(value).ok_or_else(|| ConfigError::ParseError {
                    line,
                    message: format!("Invalid loglevel: {value}"),
                })?;
            }
            "logfile" => {
                if value.is_empty() {
                    self.logfile = None;
                } else {
                    self.logfile = Some(PathBuf::from(value));
                }
            }
            "read-only" => self.read_only = parse_bool(value, line)?,
            "node-id" => self.node_id = parse_number(value, line)?,

            // Transactions
            "max-watchers" => self.max_watchers = parse_number(value, line)?,
            "max-transactions" => self.max_transactions = parse_number(value, line)?,
            "transaction-timeout" => {
                let millis: u64 = parse_number(value, line)?;
                self.transaction_timeout = (millis > 0).then(|| Duration::from_millis(millis));
            }

            // Expiry
            "active-expire-interval" => {
                let millis: u64 = parse_number(value, line)?;
                if millis == 0 {
                    return Err(ConfigError::ParseError {
                        line,
                        message: "active-expire-interval must be positive".to_string(),
                    });
                }
                self.active_expire_interval = Duration::from_millis(millis);
            }
            "active-expire-keys" => self.active_expire_keys = parse_number(value, line)?,

            // Unknown directive - ignore for forward compatibility
            _ => {
                tracing::warn!("Unknown config directive at line {}: {}", line, directive);
            }
        }

        Ok(())
    }
}

const MAX_INCLUDE_DEPTH: usize = 8;

/// Configuration parsing error.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O error reading config file.
    #[error("Config I/O error: {0}")]
    IoError(String),
    /// Parse error in config file.
    #[error("Config error at line {line}: {message}")]
    ParseError { line: usize, message: String },
}

// Helper functions for parsing

fn parse_bool(value: &str, line: usize) -> Result<bool, ConfigError> {
    match value.to_lowercase().as_str() {
        "yes" | "true" | "1" => Ok(true),
        "no" | "false" | "0" => Ok(false),
        _ => Err(ConfigError::ParseError {
            line,
            message: format!("Invalid boolean: {value}"),
        }),
    }
}

fn parse_number<T: std::str::FromStr>(value: &str, line: usize) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::ParseError {
        line,
        message: format!("Invalid number: {value}"),
    })
}

#[cfg(test)]
mod config_tests {
    use super::*;

    #[test]
    fn test_parse_config() {
        let config_str = r#"
# Test config
bind 0.0.0.0
port 6380
maxclients 1000
loglevel debug
logfile "/tmp/cachewire.log"
read-only yes
node-id 4
max-watchers 64
max-transactions 8
transaction-timeout 2500
active-expire-interval 50
active-expire-keys 10
"#;

        let config = Config::parse(config_str).unwrap();
        assert_eq!(config.bind, "0.0.0.0");
        assert_eq!(config.port, 6380);
        assert_eq!(config.max_clients, 1000);
        assert_eq!(config.loglevel, LogLevel::Debug);
        assert_eq!(config.logfile, Some(PathBuf::from("/tmp/cachewire.log")));
        assert!(config.read_only);
        assert_eq!(config.node_id, 4);
        assert_eq!(config.max_watchers, 64);

        let limits = config.transaction_limits();
        assert_eq!(limits.max_active, 8);
        assert_eq!(limits.timeout, Some(Duration::from_millis(2500)));

        let expiry = config.expiry_config();
        assert_eq!(expiry.cycle_interval, Duration::from_millis(50));
        assert_eq!(expiry.keys_per_cycle, 10);
    }

    #[test]
    fn test_zero_timeout_disables() {
        let config = Config::parse("transaction-timeout 0").unwrap();
        assert_eq!(config.transaction_timeout, None);
    }

    #[test]
    fn test_parse_errors_report_line() {
        let err = Config::parse("port 6379\nport abc").unwrap_err();
        assert_eq!(err.to_string(), "Config error at line 2: Invalid number: abc");

        assert!(Config::parse("loglevel loud").is_err());
        assert!(Config::parse("read-only maybe").is_err());
        assert!(Config::parse("active-expire-interval 0").is_err());
    }

    #[test]
    fn test_include_applies_in_place() {
        let dir = std::env::temp_dir().join(format!("cachewire-config-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let included = dir.join("included.conf");
        fs::write(&included, "port 7000\nnode-id 9\n").unwrap();

        let config =
            Config::parse(&format!("port 6000\ninclude {}\nport 7001\n", included.display())).unwrap();
        assert_eq!(config.port, 7001);
        assert_eq!(config.node_id, 9);

        assert!(matches!(
            Config::parse(&format!("include {}", dir.join("missing.conf").display())),
            Err(ConfigError::IoError(_))
        ));
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_parse_bool() {
        assert!(parse_bool("yes", 1).unwrap());
        assert!(parse_bool("true", 1).unwrap());
        assert!(!parse_bool("no", 1).unwrap());
        assert!(!parse_bool("0", 1).unwrap());
    }
}
