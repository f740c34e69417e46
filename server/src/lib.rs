use anyhow::Context;
use std::sync::Arc;
use tracing::{info, warn};
use wagerbook_execution::{
    AdminGate, CredentialCheck, HashedSecret, Ledger, LocalIdentity, SharedSecret,
};

mod api;
pub use api::Api;

mod persistence;
pub use persistence::SqliteStore;

mod state;
pub use state::{
    ServerConfig, DEFAULT_ADMIN_LOGIN_RATE_LIMIT_BURST, DEFAULT_ADMIN_LOGIN_RATE_LIMIT_PER_MINUTE,
    DEFAULT_HTTP_BODY_LIMIT_BYTES, DEFAULT_HTTP_RATE_LIMIT_BURST,
    DEFAULT_HTTP_RATE_LIMIT_PER_SECOND,
};

/// Shared state behind every HTTP handler.
pub struct Server {
    pub(crate) config: ServerConfig,
    pub(crate) ledger: Ledger<SqliteStore>,
    pub(crate) identity: LocalIdentity<SqliteStore>,
    pub(crate) admin: AdminGate,
}

impl Server {
    pub fn new(config: ServerConfig) -> anyhow::Result<Arc<Self>> {
        let store = match &config.ledger_path {
            Some(path) => {
                info!(path = %path.display(), "opening ledger db");
                SqliteStore::open(path)?
            }
            None => {
                warn!("no ledger path configured; balances will not survive a restart");
                SqliteStore::open_in_memory()?
            }
        };
        let check: Arc<dyn CredentialCheck> = match (&config.admin_secret_hash, &config.admin_secret)
        {
            (Some(phc), _) => Arc::new(
                HashedSecret::from_phc(phc.as_str()).context("parse admin secret hash")?,
            ),
            (None, Some(secret)) => Arc::new(SharedSecret::new(secret.as_str())),
            (None, None) => {
                warn!("no admin secret configured; using the built-in default");
                Arc::new(SharedSecret::default())
            }
        };
        let identity = LocalIdentity::new(store.clone())
            .with_session_limits(config.session_ttl, config.max_player_sessions);
        let admin = AdminGate::new(check)
            .with_session_limits(config.session_ttl, config.max_admin_sessions);
        let ledger = Ledger::new(store).with_write_mode(config.write_mode);
        Ok(Arc::new(Self {
            config,
            ledger,
            identity,
            admin,
        }))
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn ledger(&self) -> &Ledger<SqliteStore> {
        &self.ledger
    }
}
