//! Transactions.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use tracing::{debug, warn};

use crate::conn::{Shared, command};
use crate::driver::Driver;
use crate::error::{Error, Result};
use crate::params::{Params, ParsedQuery, ensure_not_empty};
use crate::reservation::Release;
use crate::result::ResultSet;
use crate::statement::Statement;

/// Transaction isolation level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    ReadUncommitted,
    /// PostgreSQL's default.
    #[default]
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    /// SQL form, as used after `ISOLATION LEVEL`.
    pub fn as_sql(&self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

/// Lifecycle state of a [`Transaction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Active,
    Committed,
    RolledBack,
}

impl TransactionState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => TransactionState::Committed,
            2 => TransactionState::RolledBack,
            _ => TransactionState::Active,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            TransactionState::Active => 0,
            TransactionState::Committed => 1,
            TransactionState::RolledBack => 2,
        }
    }
}

/// State shared between a transaction and the statements prepared in it.
#[derive(Debug)]
pub(crate) struct Status(AtomicU8);

impl Status {
    fn new() -> Self {
        Self(AtomicU8::new(TransactionState::Active.as_u8()))
    }

    pub(crate) fn get(&self) -> TransactionState {
        TransactionState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn ensure_active(&self) -> Result<()> {
        match self.get() {
            TransactionState::Active => Ok(()),
            TransactionState::Committed => Err(Error::Transaction(
                "Transaction has already been committed".into(),
            )),
            TransactionState::RolledBack => Err(Error::Transaction(
                "Transaction has already been rolled back".into(),
            )),
        }
    }

    /// Move from `Active` to a terminal state. Only one caller wins.
    fn finish(&self, to: TransactionState) -> Result<()> {
        match self.0.compare_exchange(
            TransactionState::Active.as_u8(),
            to.as_u8(),
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => Ok(()),
            Err(_) => self.ensure_active(),
        }
    }
}

/// A transaction holding its connection's reservation.
///
/// Every other operation on the connection waits until the transaction is
/// committed or rolled back. A transaction dropped while still active is
/// rolled back in the background and keeps the reservation until the
/// `ROLLBACK` finishes; commit or roll back explicitly instead of relying on
/// this. The same happens when a `commit` or `rollback` future is dropped
/// before it completes. Without a runtime to roll back on, the connection is
/// closed instead.
///
/// Calling `commit` or `rollback` on a transaction that has already ended
/// fails with `Error::Transaction` and sends nothing.
pub struct Transaction<D: Driver> {
    shared: Arc<Shared<D>>,
    isolation: IsolationLevel,
    status: Arc<Status>,
    savepoints: Vec<String>,
    release: Option<Release>,
}

impl<D: Driver> Transaction<D> {
    pub(crate) fn new(shared: Arc<Shared<D>>, isolation: IsolationLevel, release: Release) -> Self {
        Self {
            shared,
            isolation,
            status: Arc::new(Status::new()),
            savepoints: Vec::new(),
            release: Some(release),
        }
    }

    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation
    }

    pub fn state(&self) -> TransactionState {
        self.status.get()
    }

    pub fn is_active(&self) -> bool {
        self.status.get() == TransactionState::Active
    }

    /// Active and the underlying connection is alive.
    pub fn is_alive(&self) -> bool {
        self.is_active() && self.shared.driver.is_alive()
    }

    pub async fn query(&self, sql: &str) -> Result<ResultSet<D::Result>> {
        self.status.ensure_active()?;
        ensure_not_empty(sql)?;
        let raw = self.shared.driver.query(sql).await?;
        ResultSet::new(raw, self.shared.is_buffering()).await
    }

    pub async fn execute(
        &self,
        sql: &str,
        params: impl Into<Params>,
    ) -> Result<ResultSet<D::Result>> {
        self.status.ensure_active()?;
        let parsed = ParsedQuery::parse(sql)?;
        let values = parsed.bind(&params.into())?;
        let raw = self.shared.driver.execute(parsed.sql(), &values).await?;
        ResultSet::new(raw, self.shared.is_buffering()).await
    }

    /// Prepare a statement bound to this transaction.
    pub async fn prepare(&self, sql: &str) -> Result<Statement<D>> {
        self.status.ensure_active()?;
        let parsed = ParsedQuery::parse(sql)?;
        let raw = self.shared.driver.prepare(parsed.sql()).await?;
        Ok(Statement::new(
            raw,
            sql,
            parsed,
            Arc::clone(&self.shared),
            Some(Arc::clone(&self.status)),
        ))
    }

    /// `SAVEPOINT name`.
    pub async fn create_savepoint(&mut self, name: &str) -> Result<()> {
        self.status.ensure_active()?;
        if name.is_empty() {
            return Err(Error::Query("Savepoint name cannot be empty".into()));
        }
        let sql = format!("SAVEPOINT {}", self.shared.driver.quote_name(name));
        command(&self.shared.driver, &sql).await?;
        self.savepoints.push(name.to_string());
        Ok(())
    }

    /// `ROLLBACK TO SAVEPOINT name`. The savepoint stays; later ones are
    /// destroyed.
    pub async fn rollback_to(&mut self, name: &str) -> Result<()> {
        self.status.ensure_active()?;
        let pos = self.savepoint_position(name)?;
        let sql = format!(
            "ROLLBACK TO SAVEPOINT {}",
            self.shared.driver.quote_name(name)
        );
        command(&self.shared.driver, &sql).await?;
        self.savepoints.truncate(pos + 1);
        Ok(())
    }

    /// `RELEASE SAVEPOINT name`. Destroys it and every later savepoint.
    pub async fn release_savepoint(&mut self, name: &str) -> Result<()> {
        self.status.ensure_active()?;
        let pos = self.savepoint_position(name)?;
        let sql = format!("RELEASE SAVEPOINT {}", self.shared.driver.quote_name(name));
        command(&self.shared.driver, &sql).await?;
        self.savepoints.truncate(pos);
        Ok(())
    }

    fn savepoint_position(&self, name: &str) -> Result<usize> {
        self.savepoints
            .iter()
            .rposition(|s| s == name)
            .ok_or_else(|| Error::Transaction(format!("No savepoint named '{}'", name)))
    }

    /// Commit and release the connection.
    ///
    /// The transaction is over even if `COMMIT` fails.
    pub async fn commit(&mut self) -> Result<()> {
        self.finish(TransactionState::Committed, "COMMIT").await
    }

    /// Roll back and release the connection.
    pub async fn rollback(&mut self) -> Result<()> {
        self.finish(TransactionState::RolledBack, "ROLLBACK").await
    }

    async fn finish(&mut self, to: TransactionState, sql: &str) -> Result<()> {
        self.status.finish(to)?;
        self.savepoints.clear();
        let result = command(&self.shared.driver, sql).await;
        if let Some(release) = self.release.take() {
            release.release();
        }
        result
    }
}

impl<D: Driver> Drop for Transaction<D> {
    fn drop(&mut self) {
        // A held release means neither COMMIT nor ROLLBACK completed, even if
        // the state is already terminal because `finish` was cancelled.
        let Some(release) = self.release.take() else {
            return;
        };
        let _ = self.status.finish(TransactionState::RolledBack);

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!("rolling back abandoned transaction");
                let shared = Arc::clone(&self.shared);
                handle.spawn(async move {
                    if let Err(e) = command(&shared.driver, "ROLLBACK").await {
                        warn!(error = %e, "failed to roll back abandoned transaction");
                    }
                    release.release();
                });
            }
            Err(_) => {
                warn!("no runtime to roll back abandoned transaction, closing connection");
                self.shared.driver.close();
                release.release();
            }
        }
    }
}
