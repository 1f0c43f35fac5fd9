//! The contract of the wire-protocol driver underneath a [`Conn`](crate::Conn).
//!
//! A driver talks to one PostgreSQL backend over one socket. It sends
//! commands, encodes parameters and decodes rows; everything above that
//! (reservation, transactions, cursors, listeners) lives in this crate.
//!
//! A driver processes one command at a time. A [`RawResult`] owns the
//! command slot of its connection until it is exhausted (its last
//! [`RawResult::next_result`] returned `None`) or dropped; a command issued
//! meanwhile waits for the slot.

use std::future::Future;
use std::os::fd::RawFd;
use std::time::Instant;

use crate::error::Result;
use crate::notification::Notification;
use crate::row::Row;
use crate::value::Value;

/// A connected wire-protocol driver.
///
/// SQL passed to [`execute`](Driver::execute) and [`prepare`](Driver::prepare)
/// only uses `$n` placeholders.
pub trait Driver: Send + Sync + 'static {
    type Result: RawResult;
    type Statement: RawStatement<Result = Self::Result>;
    type Notifications: RawNotifications;

    /// Run a (possibly multi-statement) simple query.
    fn query(&self, sql: &str) -> impl Future<Output = Result<Self::Result>> + Send;

    /// Run a single statement with bound parameters.
    fn execute(
        &self,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Result<Self::Result>> + Send;

    fn prepare(&self, sql: &str) -> impl Future<Output = Result<Self::Statement>> + Send;

    fn notify(
        &self,
        channel: &str,
        payload: &str,
    ) -> impl Future<Output = Result<Self::Result>> + Send;

    /// `LISTEN` on a channel and return the source of its notifications.
    ///
    /// The source ends when the channel is unlistened or the connection is lost.
    fn listen(&self, channel: &str) -> impl Future<Output = Result<Self::Notifications>> + Send;

    fn unlisten(&self, channel: &str) -> impl Future<Output = Result<()>> + Send;

    /// Quote a string literal.
    fn quote_string(&self, data: &str) -> String;

    /// Quote an identifier.
    fn quote_name(&self, name: &str) -> String;

    fn is_alive(&self) -> bool;

    fn last_used_at(&self) -> Instant;

    fn close(&self);
}

/// The raw result of one statement, chained to the results of the
/// statements that follow it in the same query.
pub trait RawResult: Send + 'static {
    /// Number of columns; zero for commands that return no rows.
    fn column_count(&self) -> usize;

    /// Rows affected, for command results.
    fn rows_affected(&self) -> Option<u64>;

    /// Fetch the next row of this statement's result.
    fn fetch_row(&mut self) -> impl Future<Output = Result<Option<Row>>> + Send;

    /// Move on to the result of the next statement.
    ///
    /// Any unread rows of the current statement are discarded.
    fn next_result(self) -> impl Future<Output = Result<Option<Self>>> + Send
    where
        Self: Sized;
}

/// A server-side prepared statement.
pub trait RawStatement: Send + Sync + 'static {
    type Result: RawResult;

    fn execute(&self, params: &[Value]) -> impl Future<Output = Result<Self::Result>> + Send;
}

/// Notifications of one listened channel, in arrival order.
pub trait RawNotifications: Send + 'static {
    /// Wait for the next notification; `None` once the source has ended.
    ///
    /// Must be cancel safe: dropping the future before it completes loses
    /// no notification.
    fn recv(&mut self) -> impl Future<Output = Option<Notification>> + Send;
}

/// Result of one step of a non-blocking connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollingStatus {
    /// Wait until the socket is readable, then poll again.
    Reading,
    /// Wait until the socket is writable, then poll again.
    Writing,
    /// The connection is established.
    Ok,
    /// The attempt failed; see [`Connecting::error_message`].
    Failed,
}

/// A connection attempt in progress.
pub trait Connecting: Send {
    type Driver: Driver;

    /// Socket of the attempt. Owned by the attempt, not by the caller.
    fn socket(&self) -> RawFd;

    /// Advance the handshake after the socket became ready.
    fn poll(&mut self) -> PollingStatus;

    fn error_message(&self) -> String;

    /// Finish a successful attempt.
    fn into_driver(self) -> Self::Driver;
}

/// Starts connection attempts.
pub trait Connector: Send + Sync + 'static {
    type Driver: Driver;
    type Connecting: Connecting<Driver = Self::Driver>;

    /// Open a non-blocking socket for the libpq-style `conninfo` string.
    fn start(&self, conninfo: &str) -> std::io::Result<Self::Connecting>;
}
