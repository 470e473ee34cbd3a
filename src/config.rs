use clap::Parser;

/// Server configuration, parsed from CLI flags with environment-variable
/// fallbacks (`SYNC_*`), the way `clap`'s `env` attribute layers over
/// `std::env::var` for container deployments that set env instead of args.
#[derive(Parser, Debug, Clone)]
#[command(name = "collab-sync-server")]
#[command(about = "Differential synchronization server for collaborative text editing")]
pub struct Config {
    #[arg(short, long, env = "SYNC_ADDRESS", default_value = "127.0.0.1:8080")]
    pub address: String,

    #[arg(short, long, env = "SYNC_DATABASE_PATH", default_value = "documents.db")]
    pub database_path: String,

    /// HS256 secret used to validate bearer tokens at handshake.
    #[arg(long, env = "SYNC_TOKEN_SECRET", default_value = "development-only-secret")]
    pub token_secret: String,

    #[arg(long, env = "SYNC_ENVIRONMENT", default_value = "development")]
    pub environment: String,

    /// Capacity of a session's outbound channel before it is considered a
    /// slow peer and disconnected.
    #[arg(long, env = "SYNC_OUTBOUND_CAPACITY", default_value_t = 256)]
    pub outbound_capacity: usize,

    /// Minimum interval between automatic version snapshots, in seconds.
    #[arg(long, env = "SYNC_SNAPSHOT_INTERVAL_SECS", default_value_t = 60)]
    pub snapshot_interval_secs: i64,

    /// Grace period given to writer tasks to flush on shutdown, in
    /// milliseconds.
    #[arg(long, env = "SYNC_SHUTDOWN_GRACE_MS", default_value_t = 2000)]
    pub shutdown_grace_ms: u64,
}

impl Config {
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }
}
