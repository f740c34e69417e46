use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Signed decimal used for balances, stakes and limits.
pub type Amount = Decimal;

/// Max bet used until an administrator stores one.
pub const DEFAULT_MAX_BET: Amount = Decimal::TWO;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("document not found")]
    NotFound,
    #[error("invalid configuration: max bet must be >= 0 (got {0})")]
    InvalidConfiguration(Amount),
    #[error("authentication failed")]
    AuthenticationFailed,
    #[error("account already exists")]
    AccountExists,
    #[error("password too short (min {min} characters)")]
    WeakPassword { min: usize },
    #[error("invalid bet amount: {0}")]
    InvalidBet(Amount),
    #[error("invalid multiplier: {0} (valid values: 1, 2)")]
    InvalidMultiplier(u8),
    #[error("invalid player identifier: {0:?}")]
    InvalidIdentifier(String),
    #[error("amount out of range")]
    Overflow,
}

/// Payout scaling offered to players.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Multiplier {
    #[default]
    X1,
    X2,
}

impl Multiplier {
    pub const ALL: [Multiplier; 2] = [Multiplier::X1, Multiplier::X2];

    pub fn factor(self) -> u8 {
        match self {
            Multiplier::X1 => 1,
            Multiplier::X2 => 2,
        }
    }

    pub fn as_amount(self) -> Amount {
        Amount::from(self.factor())
    }
}

impl TryFrom<u8> for Multiplier {
    type Error = LedgerError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Multiplier::X1),
            2 => Ok(Multiplier::X2),
            other => Err(LedgerError::InvalidMultiplier(other)),
        }
    }
}

impl From<Multiplier> for u8 {
    fn from(value: Multiplier) -> Self {
        value.factor()
    }
}

impl fmt::Display for Multiplier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x", self.factor())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Win,
    Loss,
}

impl Outcome {
    pub fn is_win(self) -> bool {
        matches!(self, Outcome::Win)
    }
}

impl std::str::FromStr for Outcome {
    type Err = &'static str;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "win" => Ok(Self::Win),
            "loss" | "lose" => Ok(Self::Loss),
            _ => Err("valid values: win, loss"),
        }
    }
}

/// Player identifier: the local part of the login email.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(String);

impl PlayerId {
    pub fn new(id: impl Into<String>) -> Result<Self, LedgerError> {
        let id = id.into();
        // The id is used as a single URL path segment.
        if id.trim().is_empty() || id.contains('@') || id.contains('/') || id == "." || id == ".."
        {
            return Err(LedgerError::InvalidIdentifier(id));
        }
        Ok(Self(id))
    }

    /// Derives the identifier from everything before the first `@`.
    pub fn from_email(email: &str) -> Result<Self, LedgerError> {
        let local = email.split('@').next().unwrap_or_default();
        Self::new(local.trim())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerAccount {
    pub id: PlayerId,
    pub balance: Amount,
}

impl PlayerAccount {
    pub fn new(id: PlayerId) -> Self {
        Self {
            id,
            balance: Amount::ZERO,
        }
    }
}

/// Process-wide house settings, owned by the administrator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HouseConfig {
    max_bet: Amount,
}

impl Default for HouseConfig {
    fn default() -> Self {
        Self {
            max_bet: DEFAULT_MAX_BET,
        }
    }
}

impl HouseConfig {
    pub fn new(max_bet: Amount) -> Result<Self, LedgerError> {
        if max_bet < Amount::ZERO {
            return Err(LedgerError::InvalidConfiguration(max_bet));
        }
        Ok(Self { max_bet })
    }

    pub fn max_bet(&self) -> Amount {
        self.max_bet
    }

    /// Replaces the max bet. A rejected value leaves the current one in place.
    pub fn set_max_bet(&mut self, max_bet: Amount) -> Result<(), LedgerError> {
        *self = Self::new(max_bet)?;
        Ok(())
    }
}

/// A single wager as entered by a player.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BetSlip {
    pub amount: Amount,
    #[serde(default)]
    pub multiplier: Multiplier,
    pub outcome: Outcome,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BetReceipt {
    pub player: PlayerId,
    /// Stake after clamping to the max bet.
    pub stake: Amount,
    pub multiplier: Multiplier,
    pub outcome: Outcome,
    pub delta: Amount,
    pub balance: Amount,
}

/// Admin view of every account plus the house's net position.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HouseSummary {
    pub players: Vec<PlayerAccount>,
    pub total: Amount,
}
