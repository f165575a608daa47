//! Event publishing/subscription abstraction (mechanics only).
//!
//! Change notifications are pushed by the backend; consumers see them as a
//! cancellable stream. Cancelling a subscription releases whatever the
//! producer holds for it (a bus slot, a realtime topic) and ends the stream.
//!
//! Delivery is at-least-once from the consumer's point of view: a record may be
//! echoed back after a local write already applied it, so consumers must apply
//! events idempotently (upsert / remove by identifier).

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures::Stream;
use tokio::sync::{Notify, mpsc};

type Release = Box<dyn FnOnce() + Send + 'static>;

struct HandleInner {
    cancelled: AtomicBool,
    release: Mutex<Option<Release>>,
    notify: Notify,
}

/// Cloneable cancel handle for a [`Subscription`].
///
/// Stores keep one of these so they can unsubscribe while a dispatch loop owns
/// the receiving side.
#[derive(Clone)]
pub struct SubscriptionHandle {
    inner: Arc<HandleInner>,
}

impl SubscriptionHandle {
    /// Create a handle that runs `release` exactly once on cancellation.
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                cancelled: AtomicBool::new(false),
                release: Mutex::new(Some(Box::new(release))),
                notify: Notify::new(),
            }),
        }
    }

    /// A handle with nothing to release.
    pub fn detached() -> Self {
        Self::new(|| {})
    }

    /// Cancel the subscription. Idempotent.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        let release = match self.inner.release.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(release) = release {
            release();
        }
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// A subscription to a change stream.
///
/// Messages are received in the order the producer sent them. Dropping the
/// subscription cancels it.
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: mpsc::UnboundedReceiver<M>,
    handle: SubscriptionHandle,
}

impl<M> Subscription<M> {
    pub fn new(receiver: mpsc::UnboundedReceiver<M>, handle: SubscriptionHandle) -> Self {
        Self { receiver, handle }
    }

    /// A handle that can cancel this subscription from elsewhere.
    pub fn handle(&self) -> SubscriptionHandle {
        self.handle.clone()
    }

    /// Wait for the next message.
    ///
    /// Returns `None` once the subscription was cancelled or the producer went
    /// away.
    pub async fn recv(&mut self) -> Option<M> {
        let notified = self.handle.inner.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if self.handle.is_cancelled() {
            return None;
        }

        tokio::select! {
            biased;
            _ = &mut notified => None,
            msg = self.receiver.recv() => msg,
        }
    }

    /// Try to receive a message without waiting.
    pub fn try_recv(&mut self) -> Option<M> {
        if self.handle.is_cancelled() {
            return None;
        }
        self.receiver.try_recv().ok()
    }

    /// Cancel this subscription.
    pub fn close(&mut self) {
        self.handle.cancel();
        self.receiver.close();
    }

    pub fn is_closed(&self) -> bool {
        self.handle.is_cancelled()
    }

    /// Adapt into a `futures::Stream`.
    pub fn into_stream(self) -> impl Stream<Item = M>
    where
        M: Send + 'static,
    {
        futures::stream::unfold(self, |mut sub| async move {
            sub.recv().await.map(|msg| (msg, sub))
        })
    }
}

impl<M> Drop for Subscription<M> {
    fn drop(&mut self) {
        self.handle.cancel();
    }
}

/// Predicate deciding whether a subscriber wants a message.
pub type Accept<M> = Box<dyn Fn(&M) -> bool + Send + Sync + 'static>;

/// Domain-agnostic pub/sub bus.
///
/// Each subscriber receives a copy of every published message its predicate
/// accepts (broadcast semantics).
pub trait EventBus<M: 'static>: Send + Sync {
    type Error: core::fmt::Debug + Send + Sync + 'static;

    fn publish(&self, message: M) -> Result<(), Self::Error>;

    fn subscribe_where(&self, accept: Accept<M>) -> Subscription<M>;

    fn subscribe(&self) -> Subscription<M> {
        self.subscribe_where(Box::new(|_: &M| true))
    }
}

impl<M: 'static, B> EventBus<M> for Arc<B>
where
    B: EventBus<M> + ?Sized,
{
    type Error = B::Error;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        (**self).publish(message)
    }

    fn subscribe_where(&self, accept: Accept<M>) -> Subscription<M> {
        (**self).subscribe_where(accept)
    }
}
