use crate::sessions::SessionTable;
use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use rand_core::OsRng;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};
use wagerbook_types::{LedgerError, PlayerId};

pub const MIN_PASSWORD_LENGTH: usize = 6;

/// A signed-in player.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Session {
    pub token: String,
    pub email: String,
}

impl Session {
    pub fn player_id(&self) -> Result<PlayerId, LedgerError> {
        PlayerId::from_email(&self.email)
    }
}

/// Player identity provider.
pub trait Identity: Send + Sync {
    fn sign_in(
        &self,
        email: &str,
        password: &str,
    ) -> impl Future<Output = Result<Session, LedgerError>> + Send;

    fn create_account(
        &self,
        email: &str,
        password: &str,
    ) -> impl Future<Output = Result<Session, LedgerError>> + Send;

    fn current_session(&self, token: &str) -> impl Future<Output = Option<Session>> + Send;

    fn sign_out(&self, token: &str) -> impl Future<Output = ()> + Send;
}

/// A registered player and their argon2 password hash (PHC string).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccountRecord {
    pub email: String,
    pub player: PlayerId,
    pub password_hash: String,
}

/// Durable account storage behind [`LocalIdentity`].
///
/// Calls are blocking; [`LocalIdentity`] only makes them from the blocking pool.
pub trait AccountBook: Send + Sync + 'static {
    fn find(&self, email: &str) -> Result<Option<AccountRecord>, LedgerError>;

    /// Stores a new account. Fails with [`LedgerError::AccountExists`] when the email or the
    /// player id is already registered, since two accounts with one id would share a balance.
    fn insert(&self, record: AccountRecord) -> Result<(), LedgerError>;
}

/// Process-local account book. Accounts are lost on restart.
#[derive(Default)]
pub struct MemoryAccounts {
    accounts: RwLock<HashMap<String, AccountRecord>>,
}

fn poisoned() -> LedgerError {
    LedgerError::StoreUnavailable("identity state poisoned".into())
}

impl AccountBook for MemoryAccounts {
    fn find(&self, email: &str) -> Result<Option<AccountRecord>, LedgerError> {
        Ok(self.accounts.read().map_err(|_| poisoned())?.get(email).cloned())
    }

    fn insert(&self, record: AccountRecord) -> Result<(), LedgerError> {
        let mut accounts = self.accounts.write().map_err(|_| poisoned())?;
        if accounts.contains_key(&record.email)
            || accounts.values().any(|account| account.player == record.player)
        {
            return Err(LedgerError::AccountExists);
        }
        accounts.insert(record.email.clone(), record);
        Ok(())
    }
}

impl<B: AccountBook + ?Sized> AccountBook for Arc<B> {
    fn find(&self, email: &str) -> Result<Option<AccountRecord>, LedgerError> {
        (**self).find(email)
    }

    fn insert(&self, record: AccountRecord) -> Result<(), LedgerError> {
        (**self).insert(record)
    }
}

/// Identity provider with argon2 password hashes and expiring bearer sessions.
///
/// Hashing and account lookups run on the blocking pool.
pub struct LocalIdentity<B: AccountBook = MemoryAccounts> {
    accounts: Arc<B>,
    sessions: SessionTable<String>,
}

/// Accounts are keyed case-insensitively so one mailbox maps to one balance.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

async fn blocking<T, F>(f: F) -> Result<T, LedgerError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, LedgerError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|err| LedgerError::StoreUnavailable(format!("identity task: {err}")))?
}

impl<B: AccountBook> LocalIdentity<B> {
    pub fn new(accounts: B) -> Self {
        Self {
            accounts: Arc::new(accounts),
            sessions: SessionTable::default(),
        }
    }

    pub fn with_session_limits(mut self, ttl: Duration, max_sessions: usize) -> Self {
        self.sessions = SessionTable::new(ttl, max_sessions);
        self
    }

    pub fn accounts(&self) -> &B {
        &self.accounts
    }

    fn open_session(&self, email: String) -> Result<Session, LedgerError> {
        let token = self.sessions.open(email.clone())?;
        Ok(Session { token, email })
    }
}

impl Default for LocalIdentity<MemoryAccounts> {
    fn default() -> Self {
        Self::new(MemoryAccounts::default())
    }
}

impl<B: AccountBook> Identity for LocalIdentity<B> {
    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, LedgerError> {
        let email = normalize_email(email);
        let accounts = Arc::clone(&self.accounts);
        let (lookup, password) = (email.clone(), password.to_string());
        let verified = blocking(move || {
            let Some(account) = accounts.find(&lookup)? else {
                debug!(email = %lookup, "sign in for unknown account");
                return Ok(false);
            };
            let parsed = PasswordHash::new(&account.password_hash)
                .map_err(|_| LedgerError::AuthenticationFailed)?;
            Ok(Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok())
        })
        .await?;
        if !verified {
            warn!(%email, "sign in rejected");
            return Err(LedgerError::AuthenticationFailed);
        }
        info!(%email, "player signed in");
        self.open_session(email)
    }

    async fn create_account(&self, email: &str, password: &str) -> Result<Session, LedgerError> {
        let email = normalize_email(email);
        if !email.contains('@') {
            return Err(LedgerError::InvalidIdentifier(email));
        }
        let player = PlayerId::from_email(&email)?;
        if password.chars().count() < MIN_PASSWORD_LENGTH {
            return Err(LedgerError::WeakPassword {
                min: MIN_PASSWORD_LENGTH,
            });
        }
        let accounts = Arc::clone(&self.accounts);
        let (record_email, record_player, password) =
            (email.clone(), player.clone(), password.to_string());
        blocking(move || {
            let salt = SaltString::generate(&mut OsRng);
            let password_hash = Argon2::default()
                .hash_password(password.as_bytes(), &salt)
                .map_err(|err| LedgerError::StoreUnavailable(format!("argon2: {err}")))?
                .to_string();
            accounts.insert(AccountRecord {
                email: record_email,
                player: record_player,
                password_hash,
            })
        })
        .await?;
        info!(%email, %player, "player account created");
        self.open_session(email)
    }

    async fn current_session(&self, token: &str) -> Option<Session> {
        self.sessions.get(token).map(|email| Session {
            token: token.to_string(),
            email,
        })
    }

    async fn sign_out(&self, token: &str) {
        self.sessions.remove(token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_then_sign_in() {
        let identity = LocalIdentity::default();
        let created = identity
            .create_account("Alice@Example.com", "hunter22")
            .await
            .unwrap();
        assert_eq!(created.player_id().unwrap().as_str(), "alice");

        let session = identity
            .sign_in("alice@example.com", "hunter22")
            .await
            .unwrap();
        assert_ne!(session.token, created.token);
        assert_eq!(session.player_id().unwrap(), created.player_id().unwrap());
        assert_eq!(
            identity.current_session(&session.token).await,
            Some(session.clone())
        );

        identity.sign_out(&session.token).await;
        assert_eq!(identity.current_session(&session.token).await, None);
    }

    #[tokio::test]
    async fn test_bad_password_rejected() {
        let identity = LocalIdentity::default();
        identity
            .create_account("bob@example.com", "correct-horse")
            .await
            .unwrap();
        assert_eq!(
            identity.sign_in("bob@example.com", "wrong-horse").await,
            Err(LedgerError::AuthenticationFailed)
        );
        assert_eq!(
            identity.sign_in("nobody@example.com", "correct-horse").await,
            Err(LedgerError::AuthenticationFailed)
        );
    }

    #[tokio::test]
    async fn test_duplicate_accounts_rejected() {
        let identity = LocalIdentity::default();
        identity
            .create_account("carol@example.com", "secret1")
            .await
            .unwrap();
        assert_eq!(
            identity.create_account("carol@example.com", "secret2").await,
            Err(LedgerError::AccountExists)
        );
        assert_eq!(
            identity.create_account("carol@other.org", "secret3").await,
            Err(LedgerError::AccountExists)
        );
    }

    #[tokio::test]
    async fn test_accounts_outlive_the_provider() {
        let book = Arc::new(MemoryAccounts::default());
        let first = LocalIdentity::new(Arc::clone(&book));
        first
            .create_account("erin@example.com", "secret1")
            .await
            .unwrap();
        drop(first);

        // A new provider over the same book sees the account, so the id cannot be reclaimed.
        let second = LocalIdentity::new(Arc::clone(&book));
        assert_eq!(
            second.create_account("erin@elsewhere.net", "takeover").await,
            Err(LedgerError::AccountExists)
        );
        assert!(second.sign_in("erin@example.com", "secret1").await.is_ok());
        assert_eq!(
            book.find("erin@example.com").unwrap().unwrap().player.as_str(),
            "erin"
        );
    }

    #[tokio::test]
    async fn test_sessions_expire() {
        let identity = LocalIdentity::default().with_session_limits(Duration::ZERO, 8);
        let session = identity
            .create_account("fay@example.com", "secret1")
            .await
            .unwrap();
        assert_eq!(identity.current_session(&session.token).await, None);
    }

    #[tokio::test]
    async fn test_session_cap_evicts_oldest() {
        let identity = LocalIdentity::default()
            .with_session_limits(crate::sessions::DEFAULT_SESSION_TTL, 1);
        let first = identity
            .create_account("gus@example.com", "secret1")
            .await
            .unwrap();
        let second = identity
            .sign_in("gus@example.com", "secret1")
            .await
            .unwrap();
        assert_eq!(identity.current_session(&first.token).await, None);
        assert_eq!(
            identity.current_session(&second.token).await,
            Some(second.clone())
        );
    }

    #[tokio::test]
    async fn test_create_account_validation() {
        let identity = LocalIdentity::default();
        assert_eq!(
            identity.create_account("dave@example.com", "123").await,
            Err(LedgerError::WeakPassword {
                min: MIN_PASSWORD_LENGTH
            })
        );
        assert!(matches!(
            identity.create_account("not-an-email", "secret1").await,
            Err(LedgerError::InvalidIdentifier(_))
        ));
        assert!(matches!(
            identity.create_account("@example.com", "secret1").await,
            Err(LedgerError::InvalidIdentifier(_))
        ));
    }
}
