//! Admin dashboard state.
//!
//! The board caches the house summary and one pending change per player. Committing a change
//! sends it as a one-shot delta and zeroes the staged value, so committing twice never
//! applies the same change twice.

use crate::{Client, Error, Result};
use tracing::info;
use wagerbook_execution::recompute_house_total;
use wagerbook_types::{Amount, HouseSummary, PlayerAccount, PlayerId};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BoardRow {
    pub account: PlayerAccount,
    /// Pending signed correction; zero when nothing is staged.
    pub change: Amount,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HouseBoard {
    rows: Vec<BoardRow>,
    total: Amount,
}

impl HouseBoard {
    pub async fn load(client: &Client) -> Result<Self> {
        let mut board = Self::default();
        board.refresh(client).await?;
        Ok(board)
    }

    /// Reloads every account. Staged changes survive for players still present.
    pub async fn refresh(&mut self, client: &Client) -> Result<()> {
        let summary = client.house().await?;
        self.replace(summary);
        Ok(())
    }

    fn replace(&mut self, summary: HouseSummary) {
        let rows = summary
            .players
            .into_iter()
            .map(|account| {
                let change = self.staged(&account.id).unwrap_or_default();
                BoardRow { account, change }
            })
            .collect();
        self.rows = rows;
        self.total = summary.total;
    }

    pub fn rows(&self) -> &[BoardRow] {
        &self.rows
    }

    /// Negated sum of the cached balances.
    pub fn total(&self) -> Amount {
        self.total
    }

    pub fn staged(&self, player: &PlayerId) -> Option<Amount> {
        self.row(player).map(|row| row.change)
    }

    fn row(&self, player: &PlayerId) -> Option<&BoardRow> {
        self.rows.iter().find(|row| &row.account.id == player)
    }

    fn row_mut(&mut self, player: &PlayerId) -> Result<&mut BoardRow> {
        self.rows
            .iter_mut()
            .find(|row| &row.account.id == player)
            .ok_or_else(|| Error::UnknownPlayer(player.clone()))
    }

    pub fn stage_change(&mut self, player: &PlayerId, change: Amount) -> Result<()> {
        self.row_mut(player)?.change = change;
        Ok(())
    }

    /// Sends the staged change for `player`, then resets it and updates the row and total.
    ///
    /// On failure the staged change is kept so it can be retried.
    pub async fn commit(&mut self, client: &Client, player: &PlayerId) -> Result<PlayerAccount> {
        let change = self.row_mut(player)?.change;
        let account = client.adjust(player, change).await?;
        let row = self.row_mut(player)?;
        row.account = account.clone();
        row.change = Amount::ZERO;
        self.total = recompute_house_total(self.rows.iter().map(|row| row.account.balance))?;
        info!(%player, %change, total = %self.total, "committed adjustment");
        Ok(account)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn summary(players: &[(&str, Amount)]) -> HouseSummary {
        let players: Vec<_> = players
            .iter()
            .map(|(id, balance)| PlayerAccount {
                id: PlayerId::new(*id).unwrap(),
                balance: *balance,
            })
            .collect();
        let total = recompute_house_total(players.iter().map(|p| p.balance)).unwrap();
        HouseSummary { players, total }
    }

    #[test]
    fn test_stage_unknown_player() {
        let mut board = HouseBoard::default();
        board.replace(summary(&[("amy", dec!(1))]));
        let ghost = PlayerId::new("ghost").unwrap();
        assert!(matches!(
            board.stage_change(&ghost, dec!(5)),
            Err(Error::UnknownPlayer(id)) if id == ghost
        ));
    }

    #[test]
    fn test_refresh_keeps_staged_changes() {
        let mut board = HouseBoard::default();
        board.replace(summary(&[("amy", dec!(1)), ("ben", dec!(-4))]));
        let amy = PlayerId::new("amy").unwrap();
        board.stage_change(&amy, dec!(2.5)).unwrap();

        board.replace(summary(&[("amy", dec!(3)), ("cat", dec!(0))]));
        assert_eq!(board.staged(&amy), Some(dec!(2.5)));
        assert_eq!(board.staged(&PlayerId::new("cat").unwrap()), Some(dec!(0)));
        assert_eq!(board.staged(&PlayerId::new("ben").unwrap()), None);
        assert_eq!(board.total(), dec!(-3));
    }
}
