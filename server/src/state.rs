use std::path::PathBuf;
use std::time::Duration;
use wagerbook_execution::{
    WriteMode, DEFAULT_MAX_ADMIN_SESSIONS, DEFAULT_MAX_SESSIONS, DEFAULT_SESSION_TTL,
};

pub const DEFAULT_ADMIN_LOGIN_RATE_LIMIT_PER_MINUTE: u64 = 10;
pub const DEFAULT_ADMIN_LOGIN_RATE_LIMIT_BURST: u32 = 5;
pub const DEFAULT_HTTP_RATE_LIMIT_PER_SECOND: u64 = 50;
pub const DEFAULT_HTTP_RATE_LIMIT_BURST: u32 = 100;
pub const DEFAULT_HTTP_BODY_LIMIT_BYTES: usize = 16 * 1024;

#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// SQLite file for balances, accounts and house config; in-memory when unset.
    pub ledger_path: Option<PathBuf>,
    pub write_mode: WriteMode,
    /// Plain admin secret. Ignored when `admin_secret_hash` is set.
    pub admin_secret: Option<String>,
    /// Argon2 PHC string for the admin secret.
    pub admin_secret_hash: Option<String>,
    pub admin_login_rate_limit_per_minute: Option<u64>,
    pub admin_login_rate_limit_burst: Option<u32>,
    pub http_rate_limit_per_second: Option<u64>,
    pub http_rate_limit_burst: Option<u32>,
    pub http_body_limit_bytes: Option<usize>,
    /// Lifetime of player and admin tokens.
    pub session_ttl: Duration,
    pub max_player_sessions: usize,
    pub max_admin_sessions: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            ledger_path: None,
            write_mode: WriteMode::default(),
            admin_secret: None,
            admin_secret_hash: None,
            admin_login_rate_limit_per_minute: Some(DEFAULT_ADMIN_LOGIN_RATE_LIMIT_PER_MINUTE),
            admin_login_rate_limit_burst: Some(DEFAULT_ADMIN_LOGIN_RATE_LIMIT_BURST),
            http_rate_limit_per_second: Some(DEFAULT_HTTP_RATE_LIMIT_PER_SECOND),
            http_rate_limit_burst: Some(DEFAULT_HTTP_RATE_LIMIT_BURST),
            http_body_limit_bytes: Some(DEFAULT_HTTP_BODY_LIMIT_BYTES),
            session_ttl: DEFAULT_SESSION_TTL,
            max_player_sessions: DEFAULT_MAX_SESSIONS,
            max_admin_sessions: DEFAULT_MAX_ADMIN_SESSIONS,
        }
    }
}

impl ServerConfig {
    /// Configuration without rate limits, for tests and embedded use.
    pub fn unlimited() -> Self {
        Self {
            admin_login_rate_limit_per_minute: None,
            admin_login_rate_limit_burst: None,
            http_rate_limit_per_second: None,
            http_rate_limit_burst: None,
            ..Self::default()
        }
    }
}
