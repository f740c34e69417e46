//! Common types shared by the wagerbook ledger, server and client.

pub mod api;
pub mod ledger;

pub use ledger::{
    Amount, BetReceipt, BetSlip, HouseConfig, HouseSummary, LedgerError, Multiplier, Outcome,
    PlayerAccount, PlayerId, DEFAULT_MAX_BET,
};
