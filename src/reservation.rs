//! Exclusive reservation of a connection by a transaction.
//!
//! A connection is either free or reserved. Acquiring is a single
//! check-then-set on the watch channel, so two callers can never both see
//! it free. Plain operations never acquire; they enter with a [`Pass`] that
//! is held until the driver has taken their command. A reservation holder
//! waits for outstanding passes before sending anything, so a plain
//! operation that got in before the reservation is always sent before
//! `BEGIN`, and one that did not waits for the transaction to end.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct State {
    reserved: bool,
    /// Plain operations between entering and the driver taking their command.
    in_flight: usize,
}

#[derive(Debug)]
pub(crate) struct Reservation {
    state: watch::Sender<State>,
}

impl Reservation {
    pub(crate) fn new() -> Self {
        Self {
            state: watch::Sender::new(State {
                reserved: false,
                in_flight: 0,
            }),
        }
    }

    pub(crate) fn is_reserved(&self) -> bool {
        self.state.borrow().reserved
    }

    /// Reserve without waiting.
    pub(crate) fn try_acquire(self: &Arc<Self>) -> Option<Release> {
        let acquired = self.state.send_if_modified(|state| {
            if state.reserved {
                return false;
            }
            state.reserved = true;
            true
        });
        acquired.then(|| {
            trace!("connection reserved");
            Release {
                reservation: Some(Arc::clone(self)),
            }
        })
    }

    /// Reserve, waiting for the current holder to release first.
    pub(crate) async fn acquire(self: &Arc<Self>) -> Release {
        let mut rx = self.state.subscribe();
        loop {
            if let Some(release) = self.try_acquire() {
                return release;
            }
            // The sender lives as long as `self`, so this cannot fail.
            let _ = rx.wait_for(|state| !state.reserved).await;
        }
    }

    /// Wait until every plain operation that entered before the
    /// reservation has been handed to the driver.
    pub(crate) async fn wait_idle(&self) {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(|state| state.in_flight == 0).await;
    }

    /// Enter without waiting. Fails while reserved.
    pub(crate) fn try_enter(self: &Arc<Self>) -> Option<Pass> {
        let entered = self.state.send_if_modified(|state| {
            if state.reserved {
                return false;
            }
            state.in_flight += 1;
            true
        });
        entered.then(|| Pass {
            reservation: Arc::clone(self),
        })
    }

    /// Enter for a plain operation, waiting while a transaction holds the
    /// connection. Returns immediately when free.
    pub(crate) async fn enter(self: &Arc<Self>) -> Pass {
        let mut rx = self.state.subscribe();
        loop {
            if let Some(pass) = self.try_enter() {
                return pass;
            }
            let _ = rx.wait_for(|state| !state.reserved).await;
        }
    }

    fn set_free(&self) {
        self.state.send_modify(|state| state.reserved = false);
        trace!("connection released");
    }
}

/// Admission of one plain operation. Drop it once the driver has taken the
/// command.
#[derive(Debug)]
pub(crate) struct Pass {
    reservation: Arc<Reservation>,
}

impl Drop for Pass {
    fn drop(&mut self) {
        self.reservation
            .state
            .send_modify(|state| state.in_flight = state.in_flight.saturating_sub(1));
    }
}

/// One-shot capability to release a reservation.
///
/// Releasing consumes the capability. Dropping one that was never released
/// releases the reservation as well.
#[derive(Debug)]
pub(crate) struct Release {
    reservation: Option<Arc<Reservation>>,
}

impl Release {
    pub(crate) fn release(mut self) {
        self.fire();
    }

    fn fire(&mut self) {
        if let Some(reservation) = self.reservation.take() {
            reservation.set_free();
        }
    }
}

impl Drop for Release {
    fn drop(&mut self) {
        self.fire();
    }
}
