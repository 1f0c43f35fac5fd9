//! Concurrency coordination for a single PostgreSQL connection.
//!
//! The wire protocol is left to a [`Driver`]. This crate sits on top of it
//! and lets many tasks share the one connection safely:
//!
//! - **Reservation**: a [`Transaction`] holds the connection exclusively;
//!   other operations wait until it commits or rolls back
//! - **Streaming results**: a [`ResultSet`] fetches rows on demand and chains
//!   through multi-statement queries; abandoned rows are drained in the
//!   background
//! - **LISTEN/NOTIFY**: a [`Listener`] delivers one channel's notifications
//!   in order until it is unlistened or the connection is lost
//! - **Cancellable connect**: the non-blocking handshake can be aborted with
//!   a [`CancellationToken`](tokio_util::sync::CancellationToken)
//!
//! # Example
//!
//! ```ignore
//! use pglink::{Conn, IsolationLevel, Opts};
//! use tokio_util::sync::CancellationToken;
//!
//! async fn transfer<C: pglink::Connector>(connector: &C) -> pglink::Result<()> {
//!     let opts = Opts::try_from("postgres://postgres@localhost/bank")?;
//!     let conn = Conn::connect(connector, &opts, &CancellationToken::new()).await?;
//!
//!     let mut tx = conn.begin_transaction(IsolationLevel::Serializable).await?;
//!     tx.execute("UPDATE account SET balance = balance - $1 WHERE id = $2", [100, 1]).await?;
//!     tx.execute("UPDATE account SET balance = balance + :amount WHERE id = :id",
//!         pglink::Params::named([("amount", 100), ("id", 2)])).await?;
//!     tx.commit().await?;
//!
//!     let mut rows = conn.query("SELECT id, balance FROM account").await?;
//!     while let Some(row) = rows.next_row().await? {
//!         let (id, balance): (i64, i64) = pglink::FromRow::from_row(&row)?;
//!         println!("{id}: {balance}");
//!     }
//!     Ok(())
//! }
//! ```

mod connect;
mod conn;
pub mod driver;
pub mod error;
mod listener;
mod notification;
pub mod opts;
mod params;
mod pool;
mod reservation;
mod result;
pub mod row;
mod statement;
mod transaction;
pub mod value;

pub use conn::Conn;
pub use driver::{Connecting, Connector, Driver, PollingStatus, RawNotifications, RawResult, RawStatement};
pub use error::{Error, ErrorFields, Result};
pub use listener::{Listener, ListenerHandle};
pub use notification::Notification;
pub use opts::{Opts, SslMode};
pub use params::{ParamKey, Params, ParsedQuery};
pub use pool::{Pool, PooledConn, PooledTransaction};
pub use result::ResultSet;
pub use row::{ColumnIndex, FromRow, Row};
pub use statement::Statement;
pub use transaction::{IsolationLevel, Transaction, TransactionState};
pub use value::{FromValue, Value};
