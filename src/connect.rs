//! Non-blocking connection handshake.

use std::os::fd::{AsRawFd, RawFd};

use tokio::io::unix::AsyncFd;
use tokio::io::{Interest, Ready};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::driver::{Connecting, PollingStatus};
use crate::error::{Error, Result};

/// Borrowed socket of a connection attempt. The attempt keeps ownership, so
/// deregistering never closes the descriptor.
struct Socket(RawFd);

impl AsRawFd for Socket {
    fn as_raw_fd(&self) -> RawFd {
        self.0
    }
}

/// Drive `connecting` until it succeeds, fails or `cancel` fires.
///
/// The socket is registered with the reactor for the duration of the
/// handshake and deregistered on every exit path.
pub(crate) async fn handshake<C: Connecting>(
    mut connecting: C,
    cancel: &CancellationToken,
) -> Result<C::Driver> {
    let fd = AsyncFd::with_interest(
        Socket(connecting.socket()),
        Interest::READABLE | Interest::WRITABLE,
    )?;

    // A fresh attempt is waiting for its connect() to complete.
    let mut interest = Interest::WRITABLE;
    loop {
        let mut guard = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(Error::Cancelled),
            guard = fd.ready(interest) => guard?,
        };

        let status = connecting.poll();
        trace!(?status, "connect poll");
        match status {
            PollingStatus::Reading => {
                guard.clear_ready_matching(Ready::READABLE);
                interest = Interest::READABLE;
            }
            PollingStatus::Writing => {
                guard.clear_ready_matching(Ready::WRITABLE);
                interest = Interest::WRITABLE;
            }
            PollingStatus::Failed => return Err(Error::Connection(connecting.error_message())),
            PollingStatus::Ok => break,
        }
    }

    drop(fd);
    Ok(connecting.into_driver())
}
