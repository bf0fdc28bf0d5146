use lazy_static::lazy_static;
use log::warn;
use parking_lot::RwLock;
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::{InputError, Result};
use crate::format::ts::types::{INPUT_READ_ONCE, NB_DATA, NB_PES};

lazy_static! {
    static ref CONFIG: RwLock<Config> = RwLock::new(Config::new());
}

const CONFIG_PATHS: [&str; 2] = ["./tsinput.toml", "./tsinput_config.toml"];

/// Poll timeout of one read cycle
pub const DEFAULT_POLL_TIMEOUT_MS: u64 = 500;
pub const DEFAULT_MAX_READ_ERRORS: u32 = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Input method forced by the user, e.g. "ts"
    pub input_method: Option<String>,
    pub nb_data: usize,
    pub nb_pes: usize,
    pub read_once: usize,
    pub poll_timeout_ms: u64,
    /// Consecutive failed read cycles before the driver gives up
    pub max_read_errors: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            input_method: None,
            nb_data: NB_DATA,
            nb_pes: NB_PES,
            read_once: INPUT_READ_ONCE,
            poll_timeout_ms: DEFAULT_POLL_TIMEOUT_MS,
            max_read_errors: DEFAULT_MAX_READ_ERRORS,
        }
    }
}

impl Config {
    /// Defaults, then environment variables, then the first config file found.
    pub fn new() -> Self {
        let mut config = Config::default();

        for (var, key) in [
            ("TSINPUT_METHOD", "input_method"),
            ("TSINPUT_NB_DATA", "nb_data"),
            ("TSINPUT_NB_PES", "nb_pes"),
            ("TSINPUT_READ_ONCE", "read_once"),
            ("TSINPUT_POLL_TIMEOUT_MS", "poll_timeout_ms"),
            ("TSINPUT_MAX_READ_ERRORS", "max_read_errors"),
        ] {
            if let Ok(value) = env::var(var) {
                if let Err(e) = config.set(key, &value) {
                    warn!("ignoring {}: {}", var, e);
                }
            }
        }

        for path in &CONFIG_PATHS {
            if let Ok(content) = fs::read_to_string(path) {
                if let Err(e) = config.apply_str(&content) {
                    warn!("ignoring part of {}: {}", path, e);
                }
                break;
            }
        }

        config
    }

    /// Reads a config file on top of the defaults.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let mut config = Config::default();
        config.apply_str(&content)?;
        Ok(config)
    }

    /// Applies `key = value` lines. Blank lines and `#` comments are skipped;
    /// every line is applied even if an earlier one fails.
    pub fn apply_str(&mut self, content: &str) -> Result<()> {
        let mut first_error = None;
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                first_error.get_or_insert(InputError::Config(format!("malformed line '{line}'")));
                continue;
            };
            let value = value.trim().trim_matches('"').trim_matches('\'');
            if let Err(e) = self.set(key.trim(), value) {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "input_method" => {
                self.input_method = Some(value.to_string()).filter(|v| !v.is_empty());
            }
            "nb_data" => self.nb_data = parse_number(key, value)?,
            "nb_pes" => self.nb_pes = parse_number(key, value)?,
            "read_once" => self.read_once = parse_number(key, value)?,
            "poll_timeout_ms" => self.poll_timeout_ms = parse_number(key, value)?,
            "max_read_errors" => self.max_read_errors = parse_number(key, value)?,
            _ => return Err(InputError::Config(format!("unknown key '{key}'"))),
        }
        Ok(())
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    /// Whether the user pinned the input method to `method`.
    pub fn is_method_forced(&self, method: &str) -> bool {
        self.input_method
            .as_deref()
            .is_some_and(|m| m.eq_ignore_ascii_case(method))
    }

    pub fn reload() {
        let new_config = Config::new();
        *CONFIG.write() = new_config;
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| InputError::Config(format!("invalid value '{value}' for {key}")))
}

/// Returns a copy of the global configuration
pub fn get_config() -> Config {
    CONFIG.read().clone()
}

/// Returns the input method forced through the configuration, if any
pub fn get_input_method() -> Option<String> {
    CONFIG.read().input_method.clone()
}

/// Creates a default config template file if it doesn't exist
pub fn create_default_config_template<P: AsRef<Path>>(path: P) -> std::io::Result<()> {
    if !path.as_ref().exists() {
        let template = r#"# tsinput configuration

# Force the TS input method regardless of the probe result
# input_method = "ts"

nb_data = 16384
nb_pes = 8192
read_once = 7
poll_timeout_ms = 500
max_read_errors = 16
"#;
        fs::write(path, template)?;
    }
    Ok(())
}
