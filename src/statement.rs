//! Prepared statements.

use std::sync::Arc;

use crate::conn::Shared;
use crate::driver::{Driver, RawStatement};
use crate::error::Result;
use crate::params::{Params, ParsedQuery};
use crate::result::ResultSet;
use crate::transaction::Status;

/// A statement prepared on a connection or inside a transaction.
///
/// A statement prepared on a [`Conn`](crate::Conn) waits for any transaction
/// on that connection to finish before executing. One prepared inside a
/// [`Transaction`](crate::Transaction) fails once the transaction has ended.
pub struct Statement<D: Driver> {
    raw: D::Statement,
    query: String,
    parsed: ParsedQuery,
    shared: Arc<Shared<D>>,
    tx: Option<Arc<Status>>,
}

impl<D: Driver> Statement<D> {
    pub(crate) fn new(
        raw: D::Statement,
        query: &str,
        parsed: ParsedQuery,
        shared: Arc<Shared<D>>,
        tx: Option<Arc<Status>>,
    ) -> Self {
        Self {
            raw,
            query: query.to_string(),
            parsed,
            shared,
            tx,
        }
    }

    /// The SQL as it was given to `prepare`, before placeholder rewriting.
    pub fn query(&self) -> &str {
        &self.query
    }

    /// Bind `params` and execute.
    ///
    /// # Errors
    ///
    /// Fails with `Error::Query` before anything is sent if a placeholder has
    /// no value, and with `Error::Transaction` if the owning transaction has
    /// ended.
    pub async fn execute(&self, params: impl Into<Params>) -> Result<ResultSet<D::Result>> {
        let values = self.parsed.bind(&params.into())?;
        let pass = match &self.tx {
            Some(status) => {
                status.ensure_active()?;
                None
            }
            None => Some(self.shared.reservation.enter().await),
        };
        let raw = self.raw.execute(&values).await;
        drop(pass);
        ResultSet::new(raw?, self.shared.is_buffering()).await
    }
}
