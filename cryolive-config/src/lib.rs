//! Environment-driven configuration for the CryoLive orchestrator server.
//!
//! Mirrors the teacher's `Args`-struct-plus-`.env`-file loading pattern:
//! values come from CLI flags, falling back to environment variables,
//! falling back to defaults, with the exception of secrets (`JWT_SECRET`)
//! which have no default and cause the process to refuse to start.

use std::str::FromStr;
use std::time::Duration;

use clap::Parser;

#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("required environment variable {0} is not set")]
    MissingRequired(&'static str),
    #[error("invalid value for {key}: {value:?} ({reason})")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Local launcher used when a stage is run outside the queue (e.g. during
/// interactive debugging), matching the scheduler contract's `srun`/`mpirun`
/// choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MpiLauncher {
    Srun,
    Mpirun,
}

impl FromStr for MpiLauncher {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "srun" => Ok(MpiLauncher::Srun),
            "mpirun" => Ok(MpiLauncher::Mpirun),
            other => Err(ConfigError::InvalidValue {
                key: "MPI_LAUNCHER",
                value: other.to_string(),
                reason: "expected `srun` or `mpirun`".to_string(),
            }),
        }
    }
}

/// CLI arguments, each overridable by an environment variable of the same
/// name as the long flag (uppercased), following the teacher's `Args`
/// pattern in its server binary.
#[derive(Debug, Parser)]
#[command(name = "cryolive-server", about = "CryoLive live-processing orchestrator")]
pub struct Args {
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(long, env = "PORT", default_value_t = 8001)]
    pub port: u16,

    #[arg(long, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    #[arg(long, env = "REDIS_URL")]
    pub redis_url: Option<String>,

    #[arg(long, env = "CORS_ORIGIN", default_value = "http://localhost:5173")]
    pub cors_origin: String,

    #[arg(long, env = "MPI_LAUNCHER", default_value = "srun")]
    pub mpi_launcher: String,

    #[arg(long, env = "MONITOR_POLL_INTERVAL_SECS", default_value_t = 5)]
    pub monitor_poll_interval_secs: u64,

    #[arg(long, env = "GHOST_JOB_MISS_THRESHOLD", default_value_t = 60)]
    pub ghost_job_miss_threshold: u32,

    #[arg(long, env = "WATCH_DEBOUNCE_SECS", default_value_t = 5)]
    pub watch_debounce_secs: u64,

    #[arg(long, env = "MAX_WS_CONNECTIONS", default_value_t = 200)]
    pub max_ws_connections: usize,

    #[arg(long, env = "DATA_DIR", default_value = "./cryolive-sessions")]
    pub data_dir: String,
}

/// Fully validated runtime configuration. Construction is the only place
/// `JWT_SECRET` is read; a missing secret is a startup error, never a
/// deferred `AuthError`.
#[derive(Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_url: Option<String>,
    pub redis_url: Option<String>,
    pub cors_origin: String,
    pub mpi_launcher: MpiLauncher,
    pub jwt_secret: String,
    pub monitor_poll_interval: Duration,
    pub ghost_job_miss_threshold: u32,
    pub watch_debounce: Duration,
    pub max_ws_connections: usize,
    pub data_dir: std::path::PathBuf,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("cors_origin", &self.cors_origin)
            .field("mpi_launcher", &self.mpi_launcher)
            .field("jwt_secret", &"<redacted>")
            .field("monitor_poll_interval", &self.monitor_poll_interval)
            .field("ghost_job_miss_threshold", &self.ghost_job_miss_threshold)
            .field("watch_debounce", &self.watch_debounce)
            .field("max_ws_connections", &self.max_ws_connections)
            .field("data_dir", &self.data_dir)
            .finish()
    }
}

impl Config {
    /// Loads `.env` (if present) then parses CLI/env args, then reads
    /// `JWT_SECRET` directly from the environment since it must never have a
    /// default or appear in `--help` output.
    pub fn load() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        let args = Args::parse();
        Self::from_args(args)
    }

    pub fn from_args(args: Args) -> Result<Self, ConfigError> {
        let jwt_secret = std::env::var("JWT_SECRET")
            .map_err(|_| ConfigError::MissingRequired("JWT_SECRET"))?;
        if jwt_secret.trim().is_empty() {
            return Err(ConfigError::MissingRequired("JWT_SECRET"));
        }

        let mpi_launcher = args.mpi_launcher.parse()?;

        Ok(Self {
            host: args.host,
            port: args.port,
            database_url: args.database_url,
            redis_url: args.redis_url,
            cors_origin: args.cors_origin,
            mpi_launcher,
            jwt_secret,
            monitor_poll_interval: Duration::from_secs(args.monitor_poll_interval_secs),
            ghost_job_miss_threshold: args.ghost_job_miss_threshold,
            watch_debounce: Duration::from_secs(args.watch_debounce_secs),
            max_ws_connections: args.max_ws_connections,
            data_dir: std::path::PathBuf::from(args.data_dir),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_args() -> Args {
        Args {
            host: "0.0.0.0".into(),
            port: 8001,
            database_url: None,
            redis_url: None,
            cors_origin: "http://localhost:5173".into(),
            mpi_launcher: "srun".into(),
            monitor_poll_interval_secs: 5,
            ghost_job_miss_threshold: 60,
            watch_debounce_secs: 5,
            max_ws_connections: 200,
            data_dir: "./cryolive-sessions".into(),
        }
    }

    #[test]
    fn missing_jwt_secret_is_rejected() {
        // SAFETY: test-only, single-threaded access to the process env.
        unsafe {
            std::env::remove_var("JWT_SECRET");
        }
        let err = Config::from_args(base_args()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingRequired("JWT_SECRET")));
    }

    #[test]
    fn valid_config_loads() {
        unsafe {
            std::env::set_var("JWT_SECRET", "test-secret");
        }
        let cfg = Config::from_args(base_args()).unwrap();
        assert_eq!(cfg.port, 8001);
        assert_eq!(cfg.mpi_launcher, MpiLauncher::Srun);
        unsafe {
            std::env::remove_var("JWT_SECRET");
        }
    }

    #[test]
    fn invalid_mpi_launcher_rejected() {
        unsafe {
            std::env::set_var("JWT_SECRET", "test-secret");
        }
        let mut args = base_args();
        args.mpi_launcher = "bogus".into();
        let err = Config::from_args(args).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
        unsafe {
            std::env::remove_var("JWT_SECRET");
        }
    }
}
