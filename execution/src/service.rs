use crate::ledger::{
    apply_admin_adjustment, apply_outcome, clamp_bet, outcome_delta, recompute_house_total,
};
use crate::store::{
    single_field, Store, AMOUNT_FIELD, CONFIG_COLLECTION, MAX_BET_DOCUMENT, MAX_FIELD,
    WINNINGS_COLLECTION,
};
use tracing::{info, warn};
use wagerbook_types::{
    Amount, BetReceipt, BetSlip, HouseConfig, HouseSummary, LedgerError, PlayerAccount, PlayerId,
};

/// How balance changes are written back to the store.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum WriteMode {
    /// Read the balance, compute the new value, overwrite the document.
    #[default]
    Overwrite,
    /// Hand the delta to [`Store::increment`].
    Increment,
}

impl std::str::FromStr for WriteMode {
    type Err = &'static str;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "overwrite" => Ok(Self::Overwrite),
            "increment" => Ok(Self::Increment),
            _ => Err("valid values: overwrite, increment"),
        }
    }
}

/// Balance ledger over a document store.
pub struct Ledger<S: Store> {
    store: S,
    mode: WriteMode,
}

impl<S: Store> Ledger<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            mode: WriteMode::default(),
        }
    }

    pub fn with_write_mode(mut self, mode: WriteMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn write_mode(&self) -> WriteMode {
        self.mode
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Loads the player's account, creating a zero balance if none is stored.
    pub async fn get_or_initialize(&self, player: &PlayerId) -> Result<PlayerAccount, LedgerError> {
        match self.balance(player).await {
            Ok(balance) => Ok(PlayerAccount {
                id: player.clone(),
                balance,
            }),
            Err(LedgerError::NotFound) => {
                self.store
                    .set(
                        WINNINGS_COLLECTION,
                        player.as_str(),
                        single_field(AMOUNT_FIELD, Amount::ZERO),
                        false,
                    )
                    .await?;
                info!(%player, "initialized player account");
                Ok(PlayerAccount::new(player.clone()))
            }
            Err(err) => Err(err),
        }
    }

    /// The stored balance. A document without an amount field reads as zero.
    pub async fn balance(&self, player: &PlayerId) -> Result<Amount, LedgerError> {
        let fields = self
            .store
            .get(WINNINGS_COLLECTION, player.as_str())
            .await?
            .ok_or(LedgerError::NotFound)?;
        Ok(fields.get(AMOUNT_FIELD).copied().unwrap_or_default())
    }

    pub async fn house_config(&self) -> Result<HouseConfig, LedgerError> {
        let stored = self
            .store
            .get(CONFIG_COLLECTION, MAX_BET_DOCUMENT)
            .await?
            .and_then(|fields| fields.get(MAX_FIELD).copied());
        match stored {
            Some(max_bet) => match HouseConfig::new(max_bet) {
                Ok(config) => Ok(config),
                Err(err) => {
                    warn!(?err, "stored max bet is invalid; using default");
                    Ok(HouseConfig::default())
                }
            },
            None => Ok(HouseConfig::default()),
        }
    }

    /// Stores a new max bet. Negative values are rejected before anything is written.
    pub async fn set_max_bet(&self, max_bet: Amount) -> Result<HouseConfig, LedgerError> {
        let config = HouseConfig::new(max_bet)?;
        self.store
            .set(
                CONFIG_COLLECTION,
                MAX_BET_DOCUMENT,
                single_field(MAX_FIELD, config.max_bet()),
                true,
            )
            .await?;
        info!(%max_bet, "max bet updated");
        Ok(config)
    }

    /// Clamps the stake to the current max bet, settles it and persists the new balance.
    pub async fn place_bet(
        &self,
        player: &PlayerId,
        slip: BetSlip,
    ) -> Result<BetReceipt, LedgerError> {
        let config = self.house_config().await?;
        let stake = clamp_bet(slip.amount, &config)?;
        let delta = outcome_delta(stake, slip.multiplier, slip.outcome)?;
        let balance = match self.mode {
            WriteMode::Overwrite => {
                let current = self.get_or_initialize(player).await?.balance;
                let next = apply_outcome(current, stake, slip.multiplier, slip.outcome)?;
                self.write_balance(player, next).await?;
                next
            }
            WriteMode::Increment => {
                self.store
                    .increment(WINNINGS_COLLECTION, player.as_str(), AMOUNT_FIELD, delta)
                    .await?
            }
        };
        info!(
            %player,
            %stake,
            multiplier = %slip.multiplier,
            outcome = ?slip.outcome,
            %balance,
            "bet settled"
        );
        Ok(BetReceipt {
            player: player.clone(),
            stake,
            multiplier: slip.multiplier,
            outcome: slip.outcome,
            delta,
            balance,
        })
    }

    /// Applies a one-shot signed correction to an existing player's balance.
    pub async fn admin_adjust(
        &self,
        player: &PlayerId,
        change: Amount,
    ) -> Result<PlayerAccount, LedgerError> {
        let current = self.balance(player).await?;
        let balance = match self.mode {
            WriteMode::Overwrite => {
                let next = apply_admin_adjustment(current, change)?;
                self.write_balance(player, next).await?;
                next
            }
            WriteMode::Increment => {
                self.store
                    .increment(WINNINGS_COLLECTION, player.as_str(), AMOUNT_FIELD, change)
                    .await?
            }
        };
        info!(%player, %change, %balance, "admin adjusted balance");
        Ok(PlayerAccount {
            id: player.clone(),
            balance,
        })
    }

    /// Every account and the house total, read fresh from the store.
    pub async fn house_summary(&self) -> Result<HouseSummary, LedgerError> {
        let documents = self.store.list_all(WINNINGS_COLLECTION).await?;
        let players = documents
            .into_iter()
            .filter_map(|(id, fields)| match PlayerId::new(id) {
                Ok(id) => Some(PlayerAccount {
                    id,
                    balance: fields.get(AMOUNT_FIELD).copied().unwrap_or_default(),
                }),
                Err(err) => {
                    warn!(?err, "skipping balance document with invalid id");
                    None
                }
            })
            .collect::<Vec<_>>();
        let total = recompute_house_total(players.iter().map(|player| player.balance))?;
        Ok(HouseSummary { players, total })
    }

    async fn write_balance(&self, player: &PlayerId, balance: Amount) -> Result<(), LedgerError> {
        self.store
            .set(
                WINNINGS_COLLECTION,
                player.as_str(),
                single_field(AMOUNT_FIELD, balance),
                false,
            )
            .await
    }
}
