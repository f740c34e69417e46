use anyhow::Context;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{error, warn};
use wagerbook_execution::{checked_sum, AccountBook, AccountRecord, Fields, Store};
use wagerbook_types::{Amount, LedgerError, PlayerId};

/// Document store backed by a single SQLite connection.
///
/// Values are kept as decimal text so balances round-trip exactly. Calls run on the blocking
/// pool; the connection mutex serializes them. Player accounts live in the same database so
/// an id keeps its owner across restarts.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let conn = Connection::open(path).context("open ledger db")?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;",
        )
        .context("configure ledger db")?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory ledger db")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> anyhow::Result<Self> {
        init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Every write runs inside a transaction, so a panic while the lock was held leaves
    /// nothing half-written and the connection can be reused.
    fn lock(conn: &Mutex<Connection>) -> MutexGuard<'_, Connection> {
        conn.lock().unwrap_or_else(|poisoned| {
            warn!("ledger db mutex poisoned; recovering");
            poisoned.into_inner()
        })
    }

    fn blocking<T, F>(&self, op: &'static str, f: F) -> Result<T, LedgerError>
    where
        F: FnOnce(&mut Connection) -> anyhow::Result<T>,
    {
        let mut conn = Self::lock(&self.conn);
        f(&mut conn).map_err(|err| store_error(op, err))
    }

    async fn run<T, F>(&self, op: &'static str, f: F) -> Result<T, LedgerError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> anyhow::Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = Self::lock(&conn);
            f(&mut conn)
        })
        .await;
        match result {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(store_error(op, err)),
            Err(err) => {
                error!(op, "ledger db task failed: {err}");
                Err(LedgerError::StoreUnavailable(format!("{op}: {err}")))
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn break_schema(&self) {
        Self::lock(&self.conn)
            .execute_batch("DROP TABLE fields; DROP TABLE documents;")
            .unwrap();
    }
}

/// Ledger rule violations raised inside a transaction pass through; anything else is a
/// backend failure.
fn store_error(op: &'static str, err: anyhow::Error) -> LedgerError {
    match err.downcast::<LedgerError>() {
        Ok(err) => err,
        Err(err) => {
            error!(op, "ledger db failed: {err:#}");
            LedgerError::StoreUnavailable(format!("{op}: {err}"))
        }
    }
}

fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS documents (
             collection TEXT NOT NULL,
             id TEXT NOT NULL,
             PRIMARY KEY (collection, id)
         );
         CREATE TABLE IF NOT EXISTS fields (
             collection TEXT NOT NULL,
             id TEXT NOT NULL,
             name TEXT NOT NULL,
             value TEXT NOT NULL,
             PRIMARY KEY (collection, id, name)
         );
         CREATE TABLE IF NOT EXISTS accounts (
             email TEXT PRIMARY KEY,
             player TEXT NOT NULL UNIQUE,
             password_hash TEXT NOT NULL
         );",
    )
    .context("init ledger schema")?;
    Ok(())
}

fn parse_value(raw: &str) -> anyhow::Result<Amount> {
    Amount::from_str(raw).with_context(|| format!("decode stored decimal {raw:?}"))
}

fn load_fields(conn: &Connection, collection: &str, id: &str) -> anyhow::Result<Fields> {
    let mut stmt =
        conn.prepare("SELECT name, value FROM fields WHERE collection = ? AND id = ?")?;
    let rows = stmt.query_map(params![collection, id], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;
    let mut fields = Fields::new();
    for row in rows {
        let (name, raw) = row?;
        fields.insert(name, parse_value(&raw)?);
    }
    Ok(fields)
}

fn get_document(
    conn: &Connection,
    collection: &str,
    id: &str,
) -> anyhow::Result<Option<Fields>> {
    let exists = conn
        .query_row(
            "SELECT 1 FROM documents WHERE collection = ? AND id = ?",
            params![collection, id],
            |_| Ok(()),
        )
        .optional()
        .context("query document")?;
    if exists.is_none() {
        return Ok(None);
    }
    load_fields(conn, collection, id).map(Some)
}

fn set_document(
    conn: &mut Connection,
    collection: &str,
    id: &str,
    fields: &Fields,
    merge: bool,
) -> anyhow::Result<()> {
    let tx = conn.transaction()?;
    tx.execute(
        "INSERT OR IGNORE INTO documents (collection, id) VALUES (?, ?)",
        params![collection, id],
    )?;
    if !merge {
        tx.execute(
            "DELETE FROM fields WHERE collection = ? AND id = ?",
            params![collection, id],
        )?;
    }
    for (name, value) in fields {
        tx.execute(
            "INSERT OR REPLACE INTO fields (collection, id, name, value) VALUES (?, ?, ?, ?)",
            params![collection, id, name, value.to_string()],
        )?;
    }
    tx.commit().context("commit document write")?;
    Ok(())
}

fn list_documents(conn: &Connection, collection: &str) -> anyhow::Result<Vec<(String, Fields)>> {
    let mut stmt = conn.prepare("SELECT id FROM documents WHERE collection = ? ORDER BY id ASC")?;
    let ids = stmt
        .query_map([collection], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    let mut documents = Vec::with_capacity(ids.len());
    for id in ids {
        let fields = load_fields(conn, collection, &id)?;
        documents.push((id, fields));
    }
    Ok(documents)
}

fn increment_field(
    conn: &mut Connection,
    collection: &str,
    id: &str,
    field: &str,
    delta: Amount,
) -> anyhow::Result<Amount> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let current = tx
        .query_row(
            "SELECT value FROM fields WHERE collection = ? AND id = ? AND name = ?",
            params![collection, id, field],
            |row| row.get::<_, String>(0),
        )
        .optional()?;
    let current = match current {
        Some(raw) => parse_value(&raw)?,
        None => Amount::ZERO,
    };
    // Dropping the transaction rolls it back.
    let next = checked_sum(current, delta)?;
    tx.execute(
        "INSERT OR IGNORE INTO documents (collection, id) VALUES (?, ?)",
        params![collection, id],
    )?;
    tx.execute(
        "INSERT OR REPLACE INTO fields (collection, id, name, value) VALUES (?, ?, ?, ?)",
        params![collection, id, field, next.to_string()],
    )?;
    tx.commit().context("commit increment")?;
    Ok(next)
}

fn find_account(conn: &Connection, email: &str) -> anyhow::Result<Option<AccountRecord>> {
    let row = conn
        .query_row(
            "SELECT player, password_hash FROM accounts WHERE email = ?",
            [email],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
        )
        .optional()
        .context("query account")?;
    let Some((player, password_hash)) = row else {
        return Ok(None);
    };
    Ok(Some(AccountRecord {
        email: email.to_string(),
        player: PlayerId::new(player)?,
        password_hash,
    }))
}

fn insert_account(conn: &mut Connection, record: &AccountRecord) -> anyhow::Result<()> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let taken = tx
        .query_row(
            "SELECT 1 FROM accounts WHERE email = ? OR player = ?",
            params![record.email, record.player.as_str()],
            |_| Ok(()),
        )
        .optional()?;
    if taken.is_some() {
        return Err(LedgerError::AccountExists.into());
    }
    tx.execute(
        "INSERT INTO accounts (email, player, password_hash) VALUES (?, ?, ?)",
        params![record.email, record.player.as_str(), record.password_hash],
    )?;
    tx.commit().context("commit account")?;
    Ok(())
}

impl AccountBook for SqliteStore {
    fn find(&self, email: &str) -> Result<Option<AccountRecord>, LedgerError> {
        self.blocking("find_account", |conn| find_account(conn, email))
    }

    fn insert(&self, record: AccountRecord) -> Result<(), LedgerError> {
        self.blocking("insert_account", |conn| insert_account(conn, &record))
    }
}

impl Store for SqliteStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Fields>, LedgerError> {
        let (collection, id) = (collection.to_string(), id.to_string());
        self.run("get", move |conn| get_document(conn, &collection, &id))
            .await
    }

    async fn set(
        &self,
        collection: &str,
        id: &str,
        fields: Fields,
        merge: bool,
    ) -> Result<(), LedgerError> {
        let (collection, id) = (collection.to_string(), id.to_string());
        self.run("set", move |conn| {
            set_document(conn, &collection, &id, &fields, merge)
        })
        .await
    }

    async fn list_all(&self, collection: &str) -> Result<Vec<(String, Fields)>, LedgerError> {
        let collection = collection.to_string();
        self.run("list_all", move |conn| list_documents(conn, &collection))
            .await
    }

    async fn increment(
        &self,
        collection: &str,
        id: &str,
        field: &str,
        delta: Amount,
    ) -> Result<Amount, LedgerError> {
        let (collection, id, field) = (collection.to_string(), id.to_string(), field.to_string());
        let result = self
            .run("increment", move |conn| {
                increment_field(conn, &collection, &id, &field, delta)
            })
            .await;
        if let Err(err) = &result {
            warn!(?err, "atomic increment failed");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use wagerbook_execution::store::single_field;
    use wagerbook_execution::{
        Identity, Ledger, LocalIdentity, WriteMode, AMOUNT_FIELD, WINNINGS_COLLECTION,
    };
    use wagerbook_types::{BetSlip, Multiplier, Outcome, PlayerId};

    #[tokio::test]
    async fn test_document_semantics() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert_eq!(store.get("c", "missing").await.unwrap(), None);

        store.set("c", "empty", Fields::new(), false).await.unwrap();
        assert_eq!(store.get("c", "empty").await.unwrap(), Some(Fields::new()));

        let mut fields = single_field("a", dec!(1.10));
        fields.insert("b".into(), dec!(-2));
        store.set("c", "doc", fields, false).await.unwrap();
        store
            .set("c", "doc", single_field("a", dec!(3)), true)
            .await
            .unwrap();
        let doc = store.get("c", "doc").await.unwrap().unwrap();
        assert_eq!(doc.get("a"), Some(&dec!(3)));
        assert_eq!(doc.get("b"), Some(&dec!(-2)));

        store
            .set("c", "doc", single_field("a", dec!(4)), false)
            .await
            .unwrap();
        let doc = store.get("c", "doc").await.unwrap().unwrap();
        assert_eq!(doc.len(), 1);

        let ids: Vec<_> = store
            .list_all("c")
            .await
            .unwrap()
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert_eq!(ids, vec!["doc", "empty"]);
    }

    #[tokio::test]
    async fn test_decimal_precision_preserved() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .set(WINNINGS_COLLECTION, "alice", single_field(AMOUNT_FIELD, dec!(0.10)), false)
            .await
            .unwrap();
        let value = store
            .increment(WINNINGS_COLLECTION, "alice", AMOUNT_FIELD, dec!(0.20))
            .await
            .unwrap();
        assert_eq!(value, dec!(0.30));
    }

    #[tokio::test]
    async fn test_concurrent_increments_are_not_lost() {
        let ledger = std::sync::Arc::new(
            Ledger::new(SqliteStore::open_in_memory().unwrap())
                .with_write_mode(WriteMode::Increment),
        );
        let player = PlayerId::new("bob").unwrap();
        let mut handles = Vec::new();
        for _ in 0..20 {
            let ledger = ledger.clone();
            let player = player.clone();
            handles.push(tokio::spawn(async move {
                ledger
                    .place_bet(
                        &player,
                        BetSlip {
                            amount: dec!(1),
                            multiplier: Multiplier::X1,
                            outcome: Outcome::Win,
                        },
                    )
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(ledger.balance(&player).await.unwrap(), dec!(20));
    }

    #[tokio::test]
    async fn test_reopen_keeps_balances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.db");
        let player = PlayerId::new("carol").unwrap();
        {
            let ledger = Ledger::new(SqliteStore::open(&path).unwrap());
            ledger.set_max_bet(dec!(3)).await.unwrap();
            ledger
                .place_bet(
                    &player,
                    BetSlip {
                        amount: dec!(2.5),
                        multiplier: Multiplier::X2,
                        outcome: Outcome::Loss,
                    },
                )
                .await
                .unwrap();
        }
        let ledger = Ledger::new(SqliteStore::open(&path).unwrap());
        assert_eq!(ledger.balance(&player).await.unwrap(), dec!(-5));
        assert_eq!(ledger.house_config().await.unwrap().max_bet(), dec!(3));
        assert_eq!(ledger.house_summary().await.unwrap().total, dec!(5));
    }

    #[tokio::test]
    async fn test_increment_overflow_leaves_store_usable() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .increment(WINNINGS_COLLECTION, "dan", AMOUNT_FIELD, Amount::MAX)
            .await
            .unwrap();
        assert_eq!(
            store
                .increment(WINNINGS_COLLECTION, "dan", AMOUNT_FIELD, Amount::MAX)
                .await,
            Err(LedgerError::Overflow)
        );

        let ledger = Ledger::new(store).with_write_mode(WriteMode::Increment);
        let dan = PlayerId::new("dan").unwrap();
        assert_eq!(ledger.balance(&dan).await.unwrap(), Amount::MAX);
        assert_eq!(
            ledger.admin_adjust(&dan, dec!(1)).await,
            Err(LedgerError::Overflow)
        );
        let account = ledger.admin_adjust(&dan, dec!(-1)).await.unwrap();
        assert_eq!(account.balance, Amount::MAX - dec!(1));
        assert_eq!(ledger.house_summary().await.unwrap().players.len(), 1);
    }

    #[tokio::test]
    async fn test_accounts_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.db");
        {
            let identity = LocalIdentity::new(SqliteStore::open(&path).unwrap());
            identity
                .create_account("eve@example.com", "secret1")
                .await
                .unwrap();
        }
        let identity = LocalIdentity::new(SqliteStore::open(&path).unwrap());
        assert_eq!(
            identity.create_account("eve@example.com", "takeover").await,
            Err(LedgerError::AccountExists)
        );
        assert_eq!(
            identity.create_account("eve@other.org", "takeover").await,
            Err(LedgerError::AccountExists)
        );
        assert_eq!(
            identity.sign_in("eve@example.com", "takeover").await,
            Err(LedgerError::AuthenticationFailed)
        );
        let session = identity.sign_in("eve@example.com", "secret1").await.unwrap();
        assert_eq!(session.player_id().unwrap().as_str(), "eve");
    }

    #[tokio::test]
    async fn test_missing_schema_is_unavailable() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.break_schema();
        assert!(matches!(
            store.get(WINNINGS_COLLECTION, "x").await,
            Err(LedgerError::StoreUnavailable(_))
        ));
    }
}
