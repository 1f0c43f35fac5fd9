//! LISTEN/NOTIFY subscriptions.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::conn::Shared;
use crate::driver::{Driver, RawNotifications};
use crate::error::{Error, Result};
use crate::notification::Notification;

struct Subscription<D> {
    channel: String,
    shared: Arc<Shared<D>>,
    listening: AtomicBool,
    unlistened: CancellationToken,
}

impl<D> Subscription<D> {
    /// Mark the subscription ended. Returns false if it already was.
    fn end(&self) -> bool {
        if !self.listening.swap(false, Ordering::AcqRel) {
            return false;
        }
        self.unlistened.cancel();
        true
    }
}

/// Notifications of one channel, in arrival order.
///
/// The sequence ends after [`unlisten`](Listener::unlisten) or when the
/// connection is lost. A listener dropped while still listening is
/// unlistened in the background.
pub struct Listener<D: Driver> {
    source: D::Notifications,
    handle: ListenerHandle<D>,
}

impl<D: Driver> Listener<D> {
    pub(crate) fn new(channel: &str, source: D::Notifications, shared: Arc<Shared<D>>) -> Self {
        Self {
            source,
            handle: ListenerHandle {
                inner: Arc::new(Subscription {
                    channel: channel.to_string(),
                    shared,
                    listening: AtomicBool::new(true),
                    unlistened: CancellationToken::new(),
                }),
            },
        }
    }

    pub fn channel(&self) -> &str {
        &self.handle.inner.channel
    }

    pub fn is_listening(&self) -> bool {
        self.handle.is_listening()
    }

    /// A handle that can unlisten while this listener is being consumed.
    pub fn handle(&self) -> ListenerHandle<D> {
        self.handle.clone()
    }

    /// Wait for the next notification.
    ///
    /// Returns `None` once the listener has been unlistened and nothing
    /// already received is left, or when the connection is lost.
    pub async fn recv(&mut self) -> Option<Notification> {
        let inner = &self.handle.inner;
        tokio::select! {
            biased;
            notification = self.source.recv() => {
                if notification.is_none() && inner.end() {
                    debug!(channel = %inner.channel, "notification source ended");
                    inner.shared.unregister_listener(&inner.channel);
                }
                notification
            }
            () = inner.unlistened.cancelled() => None,
        }
    }

    /// Stop listening.
    ///
    /// # Errors
    ///
    /// Fails with `Error::InvalidUsage` if already unlistened.
    pub async fn unlisten(&self) -> Result<()> {
        self.handle.unlisten().await
    }
}

impl<D: Driver> Drop for Listener<D> {
    fn drop(&mut self) {
        if !self.handle.is_listening() {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let handle = self.handle.clone();
                runtime.spawn(async move {
                    debug!(channel = %handle.channel(), "unlistening abandoned listener");
                    if let Err(e) = handle.unlisten().await {
                        debug!(error = %e, "failed to unlisten abandoned listener");
                    }
                });
            }
            Err(_) => {
                let inner = &self.handle.inner;
                if inner.end() {
                    inner.shared.unregister_listener(&inner.channel);
                }
            }
        }
    }
}

/// Unlisten capability of a [`Listener`], cloneable across tasks.
pub struct ListenerHandle<D: Driver> {
    inner: Arc<Subscription<D>>,
}

impl<D: Driver> Clone for ListenerHandle<D> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<D: Driver> ListenerHandle<D> {
    pub fn channel(&self) -> &str {
        &self.inner.channel
    }

    pub fn is_listening(&self) -> bool {
        self.inner.listening.load(Ordering::Acquire)
    }

    /// Stop listening. The listener's sequence completes right away.
    ///
    /// # Errors
    ///
    /// Fails with `Error::InvalidUsage` if already unlistened, or with the
    /// driver's error if `UNLISTEN` fails.
    pub async fn unlisten(&self) -> Result<()> {
        let inner = &self.inner;
        if !inner.end() {
            return Err(Error::InvalidUsage(
                "Already unlistened on this channel".into(),
            ));
        }
        let pass = inner.shared.reservation.enter().await;
        let result = inner.shared.driver.unlisten(&inner.channel).await;
        drop(pass);
        inner.shared.unregister_listener(&inner.channel);
        result
    }
}
