//! The connection coordinator.

use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::connect::handshake;
use crate::driver::{Connector, Driver};
use crate::error::{Error, Result};
use crate::listener::Listener;
use crate::opts::Opts;
use crate::params::{Params, ParsedQuery, ensure_not_empty};
use crate::reservation::Reservation;
use crate::result::{ResultSet, drain};
use crate::statement::Statement;
use crate::transaction::{IsolationLevel, Transaction};

/// State shared by a connection and every handle it produces.
pub(crate) struct Shared<D> {
    pub(crate) driver: D,
    pub(crate) reservation: Arc<Reservation>,
    buffering: AtomicBool,
    listeners: Mutex<HashSet<String>>,
}

impl<D> Shared<D> {
    pub(crate) fn is_buffering(&self) -> bool {
        self.buffering.load(Ordering::Relaxed)
    }

    fn register_listener(&self, channel: &str) -> Result<()> {
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        if !listeners.insert(channel.to_string()) {
            return Err(Error::Query(format!(
                "Already listening on channel '{}'",
                channel
            )));
        }
        Ok(())
    }

    pub(crate) fn unregister_listener(&self, channel: &str) {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(channel);
    }
}

/// A channel registered for a pending `listen`, undone unless kept.
struct Registration<'a, D> {
    shared: &'a Shared<D>,
    channel: &'a str,
    kept: bool,
}

impl<'a, D> Registration<'a, D> {
    fn new(shared: &'a Shared<D>, channel: &'a str) -> Result<Self> {
        shared.register_listener(channel)?;
        Ok(Self {
            shared,
            channel,
            kept: false,
        })
    }

    fn keep(mut self) {
        self.kept = true;
    }
}

impl<D> Drop for Registration<'_, D> {
    fn drop(&mut self) {
        if !self.kept {
            self.shared.unregister_listener(self.channel);
        }
    }
}

/// Run a command and discard its results.
pub(crate) async fn command<D: Driver>(driver: &D, sql: &str) -> Result<()> {
    let raw = driver.query(sql).await?;
    drain(raw, true).await
}

/// A PostgreSQL connection shared by every handle created from it.
///
/// Plain operations (`query`, `execute`, `prepare`, `notify`, `listen`) wait
/// while a [`Transaction`] holds the connection and then go straight to the
/// driver; they are not ordered against each other. A plain operation that
/// got in before a transaction was begun is handed to the driver before
/// `BEGIN`, on any runtime flavor. Waiting never times out:
/// a transaction that is never finished blocks the connection for good, so
/// bound transactions with server-side timeouts.
///
/// Cloning is cheap and yields another handle to the same connection.
pub struct Conn<D: Driver> {
    shared: Arc<Shared<D>>,
}

impl<D: Driver> Clone for Conn<D> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<D: Driver> Conn<D> {
    /// Wrap an established driver connection.
    pub fn new(driver: D, buffer_results: bool) -> Self {
        Self {
            shared: Arc::new(Shared {
                driver,
                reservation: Arc::new(Reservation::new()),
                buffering: AtomicBool::new(buffer_results),
                listeners: Mutex::new(HashSet::new()),
            }),
        }
    }

    /// Connect through `connector`.
    ///
    /// The handshake is aborted with `Error::Cancelled` once `cancel` fires.
    pub async fn connect<C>(connector: &C, opts: &Opts, cancel: &CancellationToken) -> Result<Self>
    where
        C: Connector<Driver = D>,
    {
        let connecting = connector.start(&opts.conninfo()).map_err(|e| {
            Error::Connection(format!("Could not connect to PostgreSQL server: {}", e))
        })?;
        let driver = handshake(connecting, cancel).await?;
        debug!(host = %opts.host, port = opts.port, "connected");
        Ok(Self::new(driver, opts.buffer_results))
    }

    /// Run a simple query, which may contain several statements.
    pub async fn query(&self, sql: &str) -> Result<ResultSet<D::Result>> {
        ensure_not_empty(sql)?;
        let pass = self.shared.reservation.enter().await;
        let raw = self.shared.driver.query(sql).await;
        drop(pass);
        ResultSet::new(raw?, self.shared.is_buffering()).await
    }

    /// Run one statement with parameters.
    ///
    /// Placeholders are checked against `params` before waiting for the
    /// connection.
    pub async fn execute(
        &self,
        sql: &str,
        params: impl Into<Params>,
    ) -> Result<ResultSet<D::Result>> {
        let parsed = ParsedQuery::parse(sql)?;
        let values = parsed.bind(&params.into())?;
        let pass = self.shared.reservation.enter().await;
        let raw = self.shared.driver.execute(parsed.sql(), &values).await;
        drop(pass);
        ResultSet::new(raw?, self.shared.is_buffering()).await
    }

    pub async fn prepare(&self, sql: &str) -> Result<Statement<D>> {
        let parsed = ParsedQuery::parse(sql)?;
        let pass = self.shared.reservation.enter().await;
        let raw = self.shared.driver.prepare(parsed.sql()).await;
        drop(pass);
        Ok(Statement::new(
            raw?,
            sql,
            parsed,
            Arc::clone(&self.shared),
            None,
        ))
    }

    /// `NOTIFY channel, payload`.
    pub async fn notify(&self, channel: &str, payload: &str) -> Result<ResultSet<D::Result>> {
        let pass = self.shared.reservation.enter().await;
        let raw = self.shared.driver.notify(channel, payload).await;
        drop(pass);
        ResultSet::new(raw?, self.shared.is_buffering()).await
    }

    /// Listen on `channel`.
    ///
    /// # Errors
    ///
    /// Fails with `Error::Query` if a listener on this connection is already
    /// listening on `channel`. This is checked before waiting for the
    /// connection.
    pub async fn listen(&self, channel: &str) -> Result<Listener<D>> {
        let registration = Registration::new(&*self.shared, channel)?;
        let pass = self.shared.reservation.enter().await;
        let source = self.shared.driver.listen(channel).await;
        drop(pass);
        let source = source?;
        registration.keep();
        Ok(Listener::new(channel, source, Arc::clone(&self.shared)))
    }

    /// Begin a transaction.
    ///
    /// The connection is reserved when this is called, before the returned
    /// future is polled, so `BEGIN` is the next command the connection
    /// sends on behalf of this coordinator. If the connection is already
    /// reserved, the future waits for that transaction to end.
    pub fn begin_transaction(
        &self,
        isolation: IsolationLevel,
    ) -> impl Future<Output = Result<Transaction<D>>> + Send + 'static + use<D> {
        let shared = Arc::clone(&self.shared);
        let reserved = shared.reservation.try_acquire();
        async move {
            let release = match reserved {
                Some(release) => release,
                None => shared.reservation.acquire().await,
            };
            // Plain operations admitted before the reservation go first.
            shared.reservation.wait_idle().await;
            // An error drops `release`, which frees the connection.
            command(
                &shared.driver,
                &format!("BEGIN TRANSACTION ISOLATION LEVEL {}", isolation.as_sql()),
            )
            .await?;
            Ok(Transaction::new(shared, isolation, release))
        }
    }

    pub fn quote_string(&self, data: &str) -> String {
        self.shared.driver.quote_string(data)
    }

    pub fn quote_name(&self, name: &str) -> String {
        self.shared.driver.quote_name(name)
    }

    pub fn is_alive(&self) -> bool {
        self.shared.driver.is_alive()
    }

    pub fn last_used_at(&self) -> Instant {
        self.shared.driver.last_used_at()
    }

    /// Check if a transaction currently holds the connection.
    pub fn is_reserved(&self) -> bool {
        self.shared.reservation.is_reserved()
    }

    pub fn close(&self) {
        self.shared.driver.close();
    }

    pub fn is_buffering_results(&self) -> bool {
        self.shared.is_buffering()
    }

    /// Read each result set fully into memory before returning it.
    pub fn should_buffer_results(&self) {
        self.shared.buffering.store(true, Ordering::Relaxed);
    }

    /// Stream rows on demand. This is the default.
    pub fn should_not_buffer_results(&self) {
        self.shared.buffering.store(false, Ordering::Relaxed);
    }
}
