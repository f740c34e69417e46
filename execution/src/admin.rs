//! Admin gating.
//!
//! The gate is binary: a token is either an authenticated admin session or it is nothing.
//! A wrong secret changes no state; there is no lockout or backoff here (callers may rate
//! limit in front of [`AdminGate::login`]). Verifying a hashed secret is CPU-bound, so async
//! callers should run `login` on the blocking pool.
//!
//! Admin tokens expire like player sessions, and only a bounded number stay live.

use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use crate::sessions::{SessionTable, DEFAULT_MAX_ADMIN_SESSIONS, DEFAULT_SESSION_TTL};
use rand_core::OsRng;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use wagerbook_types::LedgerError;

/// Secret accepted when no other credential is configured.
pub const DEFAULT_ADMIN_SECRET: &str = "4361";

/// Checks a secret supplied by someone claiming to be the administrator.
pub trait CredentialCheck: Send + Sync {
    fn verify(&self, secret: &str) -> bool;
}

impl<C: CredentialCheck + ?Sized> CredentialCheck for Arc<C> {
    fn verify(&self, secret: &str) -> bool {
        (**self).verify(secret)
    }
}

impl<C: CredentialCheck + ?Sized> CredentialCheck for Box<C> {
    fn verify(&self, secret: &str) -> bool {
        (**self).verify(secret)
    }
}

/// Plain shared secret, compared without early exit.
#[derive(Clone)]
pub struct SharedSecret(String);

impl SharedSecret {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }
}

impl Default for SharedSecret {
    fn default() -> Self {
        Self::new(DEFAULT_ADMIN_SECRET)
    }
}

impl CredentialCheck for SharedSecret {
    fn verify(&self, secret: &str) -> bool {
        let expected = self.0.as_bytes();
        let supplied = secret.as_bytes();
        // Length is not hidden; the content comparison always scans every byte.
        if expected.len() != supplied.len() {
            return false;
        }
        expected
            .iter()
            .zip(supplied)
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

/// Salted argon2 hash in PHC string format.
#[derive(Clone)]
pub struct HashedSecret {
    phc: String,
}

impl HashedSecret {
    pub fn from_phc(phc: impl Into<String>) -> Result<Self, LedgerError> {
        let phc = phc.into();
        PasswordHash::new(&phc).map_err(|err| {
            warn!(?err, "rejecting malformed admin secret hash");
            LedgerError::AuthenticationFailed
        })?;
        Ok(Self { phc })
    }

    pub fn from_secret(secret: &str) -> Result<Self, LedgerError> {
        let salt = SaltString::generate(&mut OsRng);
        let phc = Argon2::default()
            .hash_password(secret.as_bytes(), &salt)
            .map_err(|err| LedgerError::StoreUnavailable(format!("argon2: {err}")))?
            .to_string();
        Ok(Self { phc })
    }

    pub fn phc(&self) -> &str {
        &self.phc
    }
}

impl CredentialCheck for HashedSecret {
    fn verify(&self, secret: &str) -> bool {
        match PasswordHash::new(&self.phc) {
            Ok(parsed) => Argon2::default()
                .verify_password(secret.as_bytes(), &parsed)
                .is_ok(),
            Err(_) => false,
        }
    }
}

/// Issues admin session tokens to callers that pass the credential check.
pub struct AdminGate {
    check: Arc<dyn CredentialCheck>,
    sessions: SessionTable<()>,
}

impl AdminGate {
    pub fn new(check: Arc<dyn CredentialCheck>) -> Self {
        Self {
            check,
            sessions: SessionTable::new(DEFAULT_SESSION_TTL, DEFAULT_MAX_ADMIN_SESSIONS),
        }
    }

    pub fn with_session_limits(mut self, ttl: Duration, max_sessions: usize) -> Self {
        self.sessions = SessionTable::new(ttl, max_sessions);
        self
    }

    /// Returns a session token when `secret` verifies, `None` otherwise.
    pub fn login(&self, secret: &str) -> Option<String> {
        if !self.check.verify(secret) {
            warn!("admin login rejected");
            return None;
        }
        match self.sessions.open(()) {
            Ok(token) => {
                info!("admin session opened");
                Some(token)
            }
            Err(err) => {
                warn!(?err, "admin session not opened");
                None
            }
        }
    }

    pub fn is_authenticated(&self, token: &str) -> bool {
        self.sessions.get(token).is_some()
    }

    pub fn logout(&self, token: &str) {
        self.sessions.remove(token);
    }
}

impl Default for AdminGate {
    fn default() -> Self {
        Self::new(Arc::new(SharedSecret::default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_secret() {
        let check = SharedSecret::default();
        assert!(check.verify("4361"));
        assert!(!check.verify("4362"));
        assert!(!check.verify("43610"));
        assert!(!check.verify(""));
    }

    #[test]
    fn test_hashed_secret() {
        let check = HashedSecret::from_secret("open sesame").unwrap();
        assert!(check.verify("open sesame"));
        assert!(!check.verify("open sesame "));

        let reparsed = HashedSecret::from_phc(check.phc()).unwrap();
        assert!(reparsed.verify("open sesame"));

        assert!(HashedSecret::from_phc("not a hash").is_err());
    }

    #[test]
    fn test_gate_login_and_logout() {
        let gate = AdminGate::default();
        assert_eq!(gate.login("0000"), None);

        let token = gate.login("4361").expect("secret should verify");
        assert!(gate.is_authenticated(&token));
        assert!(!gate.is_authenticated("some-other-token"));

        gate.logout(&token);
        assert!(!gate.is_authenticated(&token));
    }

    #[test]
    fn test_admin_sessions_are_bounded_and_expire() {
        let gate = AdminGate::default().with_session_limits(DEFAULT_SESSION_TTL, 2);
        let first = gate.login("4361").unwrap();
        std::thread::sleep(Duration::from_millis(2));
        let second = gate.login("4361").unwrap();
        std::thread::sleep(Duration::from_millis(2));
        let third = gate.login("4361").unwrap();
        assert!(gate.is_authenticated(&second));
        assert!(gate.is_authenticated(&third));
        assert!(!gate.is_authenticated(&first));

        let gate = AdminGate::default().with_session_limits(Duration::ZERO, 2);
        let token = gate.login("4361").unwrap();
        assert!(!gate.is_authenticated(&token));
    }

    #[test]
    fn test_failed_login_changes_nothing() {
        let gate = AdminGate::default();
        let token = gate.login("4361").unwrap();
        assert_eq!(gate.login("wrong"), None);
        assert!(gate.is_authenticated(&token));
    }
}
