//! Configuration for Concierge
//!
//! CLI arguments and environment variables via clap; a `.env` file is loaded
//! first by the binary.

use chrono::Duration;
use clap::{Parser, Subcommand, ValueEnum};
use uuid::Uuid;

use crate::auth::role_change::DEFAULT_TICKET_TTL_SECS;
use crate::notify::DEFAULT_RETENTION_HOURS;
use crate::store::DEFAULT_CHANGE_CAPACITY;

/// Concierge - service-request lifecycle engine
#[derive(Parser, Debug, Clone)]
#[command(name = "concierge")]
#[command(about = "Role-gated service-request lifecycle engine with realtime fan-out")]
pub struct Args {
    /// Unique node identifier, used to drop our own bridged echoes
    #[arg(long, env = "NODE_ID", default_value_t = Uuid::new_v4())]
    pub node_id: Uuid,

    /// Enable development mode (in-memory store allowed, bootstrap superuser)
    #[arg(long, env = "DEV_MODE", default_value = "false")]
    pub dev_mode: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Emit JSON log lines
    #[arg(long, env = "LOG_JSON", default_value = "false")]
    pub log_json: bool,

    /// Persistence backend
    #[arg(long, env = "STORE", value_enum, default_value = "mongo")]
    pub store: StoreBackend,

    /// MongoDB connection URI
    #[arg(long, env = "MONGODB_URI", default_value = "mongodb://localhost:27017")]
    pub mongodb_uri: String,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DB", default_value = "concierge")]
    pub mongodb_db: String,

    /// NATS configuration
    #[command(flatten)]
    pub nats: NatsArgs,

    /// Hours before automated notifications expire
    #[arg(long, env = "NOTIFICATION_RETENTION_HOURS", default_value_t = DEFAULT_RETENTION_HOURS)]
    pub notification_retention_hours: i64,

    /// Seconds between retention sweeps; 0 leaves purging to reads
    #[arg(long, env = "NOTIFICATION_SWEEP_SECS", default_value = "0")]
    pub notification_sweep_secs: u64,

    /// Seconds an unconfirmed role change stays open
    #[arg(long, env = "ROLE_CHANGE_TTL_SECS", default_value_t = DEFAULT_TICKET_TTL_SECS)]
    pub role_change_ttl_secs: i64,

    /// Capacity of the change stream channels
    #[arg(long, env = "CHANGE_CAPACITY", default_value_t = DEFAULT_CHANGE_CAPACITY)]
    pub change_capacity: usize,

    /// Base URL result artifacts are served from
    #[arg(long, env = "ARTIFACT_BASE_URL", default_value = "http://localhost:8080/artifacts")]
    pub artifact_base_url: String,

    /// Superuser registered at startup (dev mode only)
    #[arg(long, env = "BOOTSTRAP_SUPERUSER")]
    pub bootstrap_superuser: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

/// NATS connection arguments
#[derive(clap::Args, Debug, Clone)]
pub struct NatsArgs {
    /// Bridge realtime traffic between nodes over NATS
    #[arg(long, env = "NATS_ENABLED", default_value = "false")]
    pub nats_enabled: bool,

    /// NATS server URL
    #[arg(long, env = "NATS_URL", default_value = "nats://127.0.0.1:4222")]
    pub nats_url: String,

    /// NATS username (optional)
    #[arg(long, env = "NATS_USER")]
    pub nats_user: Option<String>,

    /// NATS password (optional)
    #[arg(long, env = "NATS_PASSWORD")]
    pub nats_password: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StoreBackend {
    /// Process memory; development and tests only
    Memory,
    /// MongoDB collections
    Mongo,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Run the service (default)
    Serve,

    /// Delete every rejected request
    PurgeRejected {
        /// Superuser performing the purge
        #[arg(long)]
        actor: String,
    },

    /// Delete expired automated notifications
    CleanupNotifications,
}

/// Runtime settings derived from [`Args`]
#[derive(Debug, Clone)]
pub struct PlatformConfig {
    pub node_id: String,
    pub notification_retention: Duration,
    /// `None` disables the periodic sweep
    pub sweep_interval: Option<std::time::Duration>,
    pub role_change_ttl: Duration,
    pub change_capacity: usize,
    pub artifact_base_url: String,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            node_id: Uuid::new_v4().to_string(),
            notification_retention: Duration::hours(DEFAULT_RETENTION_HOURS),
            sweep_interval: None,
            role_change_ttl: Duration::seconds(DEFAULT_TICKET_TTL_SECS),
            change_capacity: DEFAULT_CHANGE_CAPACITY,
            artifact_base_url: "http://localhost:8080/artifacts".to_string(),
        }
    }
}

impl Args {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.store == StoreBackend::Memory && !self.dev_mode {
            return Err("STORE=memory is only allowed in development mode".to_string());
        }

        if self.notification_retention_hours <= 0 {
            return Err("NOTIFICATION_RETENTION_HOURS must be positive".to_string());
        }

        if self.role_change_ttl_secs <= 0 {
            return Err("ROLE_CHANGE_TTL_SECS must be positive".to_string());
        }

        if self.change_capacity == 0 {
            return Err("CHANGE_CAPACITY must be at least 1".to_string());
        }

        if self.bootstrap_superuser.is_some() && !self.dev_mode {
            return Err("BOOTSTRAP_SUPERUSER is only honoured in development mode".to_string());
        }

        Ok(())
    }

    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Serve)
    }

    pub fn platform_config(&self) -> PlatformConfig {
        PlatformConfig {
            node_id: self.node_id.to_string(),
            notification_retention: Duration::hours(self.notification_retention_hours),
            sweep_interval: (self.notification_sweep_secs > 0)
                .then(|| std::time::Duration::from_secs(self.notification_sweep_secs)),
            role_change_ttl: Duration::seconds(self.role_change_ttl_secs),
            change_capacity: self.change_capacity,
            artifact_base_url: self.artifact_base_url.clone(),
        }
    }
}
