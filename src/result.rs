//! Result cursors.
//!
//! A [`ResultSet`] exposes the rows of one statement and chains to the
//! result of the next statement of a multi-statement query:
//!
//! ```text
//! Producing ──rows exhausted──▶ Finished ──next_result()──▶ Exhausted
//!     └──────────────next_result() (drains rows)──────────────┘
//! ```
//!
//! Dropping a cursor before it reached `Exhausted` spawns a task that reads
//! and discards the rest of the chain, so the connection's command slot is
//! freed without blocking the caller.

use std::collections::VecDeque;

use tracing::{debug, trace};

use crate::driver::RawResult;
use crate::error::Result;
use crate::row::{FromRow, Row};

enum State<R> {
    /// Rows are fetched from the raw result on demand.
    Producing(R),
    /// No rows left in this statement; the raw result still chains on.
    Finished(R),
    Exhausted,
}

/// Rows of one statement, fetched lazily unless the connection buffers
/// results.
pub struct ResultSet<R: RawResult> {
    state: State<R>,
    buffered: VecDeque<Row>,
    column_count: usize,
    row_count: Option<u64>,
    buffering: bool,
}

impl<R: RawResult> ResultSet<R> {
    /// Wrap a raw result. When `buffering`, every row of the statement is
    /// read into memory before returning.
    pub(crate) async fn new(mut raw: R, buffering: bool) -> Result<Self> {
        let column_count = raw.column_count();
        if column_count == 0 {
            return Ok(Self {
                row_count: raw.rows_affected(),
                state: State::Finished(raw),
                buffered: VecDeque::new(),
                column_count,
                buffering,
            });
        }

        if !buffering {
            return Ok(Self {
                state: State::Producing(raw),
                buffered: VecDeque::new(),
                column_count,
                row_count: None,
                buffering,
            });
        }

        let mut buffered = VecDeque::new();
        while let Some(row) = raw.fetch_row().await? {
            buffered.push_back(row);
        }
        Ok(Self {
            row_count: Some(buffered.len() as u64),
            state: State::Finished(raw),
            buffered,
            column_count,
            buffering,
        })
    }

    /// Number of columns; zero for command results.
    pub fn column_count(&self) -> usize {
        self.column_count
    }

    /// Rows affected by a command, or rows held by a buffered result.
    ///
    /// `None` for a streaming result: its size is unknown until it is read.
    pub fn row_count(&self) -> Option<u64> {
        self.row_count
    }

    /// Fetch the next row of this statement.
    pub async fn next_row(&mut self) -> Result<Option<Row>> {
        if let Some(row) = self.buffered.pop_front() {
            return Ok(Some(row));
        }

        let State::Producing(raw) = &mut self.state else {
            return Ok(None);
        };
        if let Some(row) = raw.fetch_row().await? {
            return Ok(Some(row));
        }

        if let State::Producing(raw) = std::mem::replace(&mut self.state, State::Exhausted) {
            self.state = State::Finished(raw);
        }
        Ok(None)
    }

    /// Decode the remaining rows of this statement.
    pub async fn collect<T: FromRow>(&mut self) -> Result<Vec<T>> {
        let mut rows = Vec::new();
        while let Some(row) = self.next_row().await? {
            rows.push(T::from_row(&row)?);
        }
        Ok(rows)
    }

    /// Result of the next statement in the query, or `None` after the last.
    ///
    /// Unread rows of this statement are discarded first. Calling this again
    /// returns `None`.
    pub async fn next_result(&mut self) -> Result<Option<ResultSet<R>>> {
        self.buffered.clear();
        let raw = match std::mem::replace(&mut self.state, State::Exhausted) {
            State::Producing(mut raw) => {
                while raw.fetch_row().await?.is_some() {}
                raw
            }
            State::Finished(raw) => raw,
            State::Exhausted => return Ok(None),
        };

        match raw.next_result().await? {
            Some(next) => Ok(Some(ResultSet::new(next, self.buffering).await?)),
            None => Ok(None),
        }
    }
}

impl<R: RawResult> Drop for ResultSet<R> {
    fn drop(&mut self) {
        let (raw, producing) = match std::mem::replace(&mut self.state, State::Exhausted) {
            State::Producing(raw) => (raw, true),
            State::Finished(raw) => (raw, false),
            State::Exhausted => return,
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                trace!("draining abandoned result set");
                handle.spawn(async move {
                    if let Err(e) = drain(raw, producing).await {
                        debug!(error = %e, "failed to drain abandoned result set");
                    }
                });
            }
            Err(_) => debug!("no runtime to drain abandoned result set"),
        }
    }
}

/// Read and discard a raw result and every result chained after it.
pub(crate) async fn drain<R: RawResult>(mut raw: R, mut producing: bool) -> Result<()> {
    loop {
        if producing {
            while raw.fetch_row().await?.is_some() {}
        }
        match raw.next_result().await? {
            Some(next) => {
                raw = next;
                producing = true;
            }
            None => return Ok(()),
        }
    }
}
