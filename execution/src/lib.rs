//! Wagerbook ledger service.
//!
//! This crate holds the balance arithmetic (`ledger`), the collaborator seams the service is
//! written against (`Store` for documents, `Identity` and `AccountBook` for players,
//! `CredentialCheck` for admin gating) and the [`Ledger`] service that ties them together.
//!
//! ## Consistency
//! Balance writes default to read-then-overwrite ([`WriteMode::Overwrite`]). Two concurrent
//! updates for the same player may both read the same balance and the later write wins.
//! [`WriteMode::Increment`] routes updates through [`Store::increment`], which stores may
//! implement atomically.
//!
//! ## Example
//! ```rust,ignore
//! # #[cfg(feature = "mocks")]
//! # {
//! use wagerbook_execution::{Ledger, Memory};
//! use wagerbook_types::{BetSlip, Multiplier, Outcome, PlayerId};
//!
//! # async fn example() -> Result<(), wagerbook_types::LedgerError> {
//! let ledger = Ledger::new(Memory::default());
//! let player = PlayerId::from_email("alice@example.com")?;
//! let receipt = ledger
//!     .place_bet(
//!         &player,
//!         BetSlip { amount: 1.into(), multiplier: Multiplier::X2, outcome: Outcome::Win },
//!     )
//!     .await?;
//! assert_eq!(receipt.balance, 2.into());
//! # Ok(())
//! # }
//! # }
//! ```

pub mod admin;
pub mod identity;
pub mod ledger;
pub mod service;
pub mod sessions;
pub mod store;

pub use admin::{AdminGate, CredentialCheck, HashedSecret, SharedSecret, DEFAULT_ADMIN_SECRET};
pub use identity::{
    normalize_email, AccountBook, AccountRecord, Identity, LocalIdentity, MemoryAccounts, Session,
    MIN_PASSWORD_LENGTH,
};
pub use ledger::{
    apply_admin_adjustment, apply_outcome, checked_sum, clamp_bet, outcome_delta,
    recompute_house_total,
};
pub use service::{Ledger, WriteMode};
pub use sessions::{
    SessionTable, DEFAULT_MAX_ADMIN_SESSIONS, DEFAULT_MAX_SESSIONS, DEFAULT_SESSION_TTL,
};
pub use store::{
    Fields, Store, AMOUNT_FIELD, CONFIG_COLLECTION, MAX_BET_DOCUMENT, MAX_FIELD,
    WINNINGS_COLLECTION,
};

#[cfg(any(test, feature = "mocks"))]
pub use store::Memory;
