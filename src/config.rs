use std::collections::HashMap;
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

/// Immutable configuration for the REPL pool and HTTP surface, loaded once at startup.
///
/// Read from the environment, with an optional TOML file (pointed to by
/// `LEAN_REPL_HOST_CONFIG`) supplying the `init_repls` warm-start plan, which
/// doesn't fit naturally into a single env var.
#[derive(Debug, Clone)]
pub struct Config {
    pub max_repls: usize,
    pub max_uses: u32,
    pub max_mem_mib: u64,
    pub init_repls: HashMap<String, usize>,
    pub interpreter_path: PathBuf,
    pub interpreter_cwd: PathBuf,
    pub default_timeout: Duration,
    pub bind_addr: SocketAddr,
}

#[derive(Debug, Default, Deserialize)]
struct FileOverrides {
    init_repls: Option<HashMap<String, usize>>,
}

impl Config {
    /// Load configuration from the environment, validating invariants before
    /// the pool is ever constructed. A `LEAN_REPL_HOST_CONFIG` oversubscription
    /// or a missing interpreter path is a startup error, not a runtime one.
    pub fn from_env() -> Result<Self, ConfigError> {
        let max_repls: usize = parse_env_or("MAX_REPLS", 4)?;
        let max_uses: u32 = parse_env_or("MAX_USES", 50)?;
        let max_mem_mib: u64 = parse_env_or("MAX_MEM_MIB", 4096)?;
        let default_timeout_secs: f64 = parse_env_or("DEFAULT_TIMEOUT_SECS", 30.0)?;

        let bind_addr_raw = env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string());
        let bind_addr: SocketAddr = bind_addr_raw
            .parse()
            .map_err(|_| ConfigError::InvalidBindAddr(bind_addr_raw.clone()))?;

        let interpreter_path = env::var("LEAN_REPL_PATH")
            .map(PathBuf::from)
            .map_err(|_| ConfigError::MissingInterpreterPath)?;
        let interpreter_cwd = env::var("LEAN_REPL_CWD")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."));

        let init_repls = load_init_repls()?;

        let sum: usize = init_repls.values().sum();
        if sum > max_repls {
            return Err(ConfigError::InitReplsOversubscribed { sum, max_repls });
        }

        tracing::info!(
            max_repls,
            max_uses,
            max_mem_mib,
            "loaded REPL pool configuration"
        );

        Ok(Config {
            max_repls,
            max_uses,
            max_mem_mib,
            init_repls,
            interpreter_path,
            interpreter_cwd,
            default_timeout: Duration::from_secs_f64(default_timeout_secs),
            bind_addr,
        })
    }
}

fn load_init_repls() -> Result<HashMap<String, usize>, ConfigError> {
    let Ok(path) = env::var("LEAN_REPL_HOST_CONFIG") else {
        return Ok(HashMap::new());
    };

    let contents = std::fs::read_to_string(&path).map_err(|source| ConfigError::FileRead {
        path: path.clone(),
        source,
    })?;

    let overrides: FileOverrides = toml::from_str(&contents).map_err(|source| ConfigError::FileParse {
        path: path.clone(),
        source,
    })?;

    Ok(overrides.init_repls.unwrap_or_default())
}

fn parse_env_or<T>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| ConfigError::InvalidValue(key, std::any::type_name::<T>())),
        Err(_) => Ok(default),
    }
}
