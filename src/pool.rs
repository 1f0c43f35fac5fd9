//! Connection pool.
//!
//! Idle connections are kept in a bounded queue. There is no health check
//! beyond the driver's `is_alive`, no retry and no sizing policy.

use std::ops::Deref;
use std::sync::Arc;

use crossbeam_queue::ArrayQueue;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::conn::Conn;
use crate::driver::{Connector, Driver};
use crate::error::Result;
use crate::opts::Opts;
use crate::params::Params;
use crate::result::ResultSet;
use crate::statement::Statement;
use crate::transaction::{IsolationLevel, Transaction, TransactionState};

pub struct Pool<C: Connector> {
    opts: Opts,
    connector: C,
    conns: ArrayQueue<Conn<C::Driver>>,
}

impl<C: Connector> Pool<C> {
    pub fn new(connector: C, opts: Opts) -> Self {
        Self {
            conns: ArrayQueue::new(opts.pool_max_idle_conn.max(1)),
            connector,
            opts,
        }
    }

    /// Take an idle connection, or connect a new one.
    pub async fn get(self: &Arc<Self>) -> Result<PooledConn<C>> {
        let conn = loop {
            match self.conns.pop() {
                Some(c) if c.is_alive() => break c,
                // Connection dead, try next one
                Some(_) => {}
                None => {
                    break Conn::connect(&self.connector, &self.opts, &CancellationToken::new())
                        .await?;
                }
            }
        };
        Ok(PooledConn {
            conn,
            pool: Arc::clone(self),
        })
    }

    /// Begin a transaction on a pooled connection. The connection returns
    /// to the pool once the transaction ends.
    pub async fn begin_transaction(
        self: &Arc<Self>,
        isolation: IsolationLevel,
    ) -> Result<PooledTransaction<C::Driver>> {
        self.get().await?.begin_transaction(isolation).await
    }

    /// Number of idle connections.
    pub fn idle_count(&self) -> usize {
        self.conns.len()
    }

    fn check_in(&self, conn: Conn<C::Driver>) {
        if !conn.is_alive() {
            return;
        }
        if self.conns.push(conn).is_err() {
            debug!("pool full, closing idle connection");
        }
    }
}

/// A connection borrowed from a [`Pool`], returned to it on drop.
pub struct PooledConn<C: Connector> {
    pool: Arc<Pool<C>>,
    conn: Conn<C::Driver>,
}

impl<C: Connector> PooledConn<C> {
    /// Begin a transaction that keeps this connection out of the pool until
    /// it ends.
    pub fn begin_transaction(
        self,
        isolation: IsolationLevel,
    ) -> impl Future<Output = Result<PooledTransaction<C::Driver>>> + Send + 'static + use<C> {
        let begin = self.conn.begin_transaction(isolation);
        async move {
            let tx = begin.await?;
            Ok(PooledTransaction::new(tx, move || drop(self)))
        }
    }
}

impl<C: Connector> Deref for PooledConn<C> {
    type Target = Conn<C::Driver>;
    fn deref(&self) -> &Self::Target {
        &self.conn
    }
}

impl<C: Connector> Drop for PooledConn<C> {
    fn drop(&mut self) {
        self.pool.check_in(self.conn.clone());
    }
}

/// A transaction on a connection that belongs to a pool.
///
/// Behaves exactly like the wrapped [`Transaction`], except that when it
/// ends the connection is handed back through `release` instead of being
/// kept by the caller. `release` runs exactly once: on commit, on rollback,
/// or on drop.
pub struct PooledTransaction<D: Driver> {
    tx: Transaction<D>,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl<D: Driver> PooledTransaction<D> {
    pub fn new(tx: Transaction<D>, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            tx,
            release: Some(Box::new(release)),
        }
    }

    fn release(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }

    pub fn isolation_level(&self) -> IsolationLevel {
        self.tx.isolation_level()
    }

    pub fn state(&self) -> TransactionState {
        self.tx.state()
    }

    pub fn is_active(&self) -> bool {
        self.tx.is_active()
    }

    pub fn is_alive(&self) -> bool {
        self.tx.is_alive()
    }

    pub async fn query(&self, sql: &str) -> Result<ResultSet<D::Result>> {
        self.tx.query(sql).await
    }

    pub async fn execute(
        &self,
        sql: &str,
        params: impl Into<Params>,
    ) -> Result<ResultSet<D::Result>> {
        self.tx.execute(sql, params).await
    }

    pub async fn prepare(&self, sql: &str) -> Result<Statement<D>> {
        self.tx.prepare(sql).await
    }

    pub async fn create_savepoint(&mut self, name: &str) -> Result<()> {
        self.tx.create_savepoint(name).await
    }

    pub async fn rollback_to(&mut self, name: &str) -> Result<()> {
        self.tx.rollback_to(name).await
    }

    pub async fn release_savepoint(&mut self, name: &str) -> Result<()> {
        self.tx.release_savepoint(name).await
    }

    pub async fn commit(&mut self) -> Result<()> {
        let result = self.tx.commit().await;
        if !self.tx.is_active() {
            self.release();
        }
        result
    }

    pub async fn rollback(&mut self) -> Result<()> {
        let result = self.tx.rollback().await;
        if !self.tx.is_active() {
            self.release();
        }
        result
    }
}

impl<D: Driver> Drop for PooledTransaction<D> {
    fn drop(&mut self) {
        self.release();
    }
}
