//! Notification Queue
//!
//! Wake-up mechanism shared by all links of a pipeline. Every link side
//! that others may wait on (the "data" side and the "space" side) owns
//! a handle registered here.
//!
//! # 1) Waiting for a handle
//!
//! A stage that cannot proceed (a consumer with an empty link, a producer
//! with a full one) must not miss the notification that would unblock it.
//! The check of the condition and the registration of the waiter have to
//! be atomic with respect to `notify`, so the waiter takes the queue lock
//! first and checks again under it:
//!
//! ```ignore
//! if !can_proceed() {
//!     let lock = queue.get_lock();
//!     if !can_proceed() {
//!         queue.wait_async(handle, debug_hint, lock).await;
//!         // lock is consumed by wait_async and released before awaiting
//!     }
//! }
//! ```
//!
//! Lock ordering is always queue lock, then link buffer lock. Notifiers
//! release the buffer lock before calling `notify`.
//!
//! # 2) Subscribing to a handle
//!
//! Observers get every notification argument through a broadcast
//! receiver. Links pass the buffered weight as the argument, which makes
//! subscriptions a cheap way to sample buffer levels.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

pub use crate::idgen::{Handle, IntCanBeHandle};

/// Argument sent to waiters and subscribers when a handle is unlisted
pub const UNLISTED: IntCanBeHandle = -1;

struct WaitingClient {
    sender: tokio::sync::oneshot::Sender<IntCanBeHandle>,
    debug_hint: String,
}

impl std::fmt::Debug for WaitingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WaitingClient")
            .field("debug_hint", &self.debug_hint)
            .finish_non_exhaustive()
    }
}

struct BroadcastChannel {
    sender: tokio::sync::broadcast::Sender<IntCanBeHandle>,
    debug_hint: String,
}

pub struct InnerState {
    whitelist: HashMap<Handle, String>,
    waiting_clients: HashMap<Handle, Vec<WaitingClient>>,
    broadcast_channels: HashMap<Handle, BroadcastChannel>,
}

impl InnerState {
    fn new() -> Self {
        Self {
            whitelist: HashMap::new(),
            waiting_clients: HashMap::new(),
            broadcast_channels: HashMap::new(),
        }
    }
}

/// Thread-safe queue for handle notifications
#[derive(Clone)]
pub struct NotificationQueueArc {
    inner: Arc<Mutex<InnerState>>,
}

impl NotificationQueueArc {
    #[must_use]
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(InnerState::new())),
        }
    }

    /// Get the lock for atomic condition-check + register operations
    pub fn get_lock(&self) -> parking_lot::MutexGuard<'_, InnerState> {
        self.inner.lock()
    }

    /// Register a handle in the whitelist
    pub fn whitelist(&self, handle: Handle, debug_hint: &str) {
        let mut state = self.inner.lock();
        if let Some(old_hint) = state.whitelist.insert(handle, debug_hint.to_string()) {
            log::warn!(
                "queue.whitelist: handle {handle:?} already in whitelist (was: '{old_hint}')",
            );
        }
    }

    /// Check whether a handle is currently registered
    #[must_use]
    pub fn is_whitelisted(&self, handle: Handle) -> bool {
        self.inner.lock().whitelist.contains_key(&handle)
    }

    /// Unregister a handle
    ///
    /// Wakes all waiters and subscribers with [`UNLISTED`] and drops the
    /// subscriptions. Unlisting an unknown handle is a no-op apart from a
    /// debug message, because both link sides may race to unlist.
    pub fn unlist(&self, handle: Handle) {
        let mut state = self.inner.lock();
        if state.whitelist.remove(&handle).is_none() {
            log::debug!("queue.unlist: handle {handle:?} not in whitelist");
        }
        drop(state);

        self.notify_and_optionally_delete(handle, UNLISTED, true);
    }

    /// Notify waiting clients and subscribers for a handle
    pub fn notify(&self, handle: Handle, arg: IntCanBeHandle) {
        self.notify_and_optionally_delete(handle, arg, false);
    }

    /// Wait for the handle notification
    ///
    /// Precondition: the caller holds the lock obtained by `get_lock`.
    /// Post-condition: the lock is released before the returned future is
    /// polled. Returns immediately for a handle that is not whitelisted.
    pub fn wait_async(
        &self,
        handle: Handle,
        debug_hint: &str,
        mut lock: parking_lot::MutexGuard<'_, InnerState>,
    ) -> impl std::future::Future<Output = ()> + Send {
        let (tx, rx) = tokio::sync::oneshot::channel();

        if lock.whitelist.contains_key(&handle) {
            lock.waiting_clients
                .entry(handle)
                .or_default()
                .push(WaitingClient {
                    sender: tx,
                    debug_hint: debug_hint.to_string(),
                });
            drop(lock);
        } else {
            drop(lock);
            let _ = tx.send(UNLISTED);
        }

        // A receive error only happens if the whole queue is dropped while
        // a stage is still waiting; treat it as a wake-up.
        async move {
            let _ = rx.await;
        }
    }

    /// Subscribe to the handle notification
    ///
    /// Returns `None` if the handle is not whitelisted. Drop the receiver
    /// to unsubscribe.
    #[must_use]
    pub fn subscribe(
        &self,
        handle: Handle,
        channel_capacity: usize,
        debug_hint: &str,
    ) -> Option<tokio::sync::broadcast::Receiver<IntCanBeHandle>> {
        let mut state = self.inner.lock();

        if !state.whitelist.contains_key(&handle) {
            log::warn!("queue.subscribe: handle {handle:?} not in whitelist");
            return None;
        }

        let broadcast = state.broadcast_channels.entry(handle).or_insert_with(|| {
            let (tx, _rx) = tokio::sync::broadcast::channel(channel_capacity);
            BroadcastChannel {
                sender: tx,
                debug_hint: debug_hint.to_string(),
            }
        });

        Some(broadcast.sender.subscribe())
    }

    fn notify_and_optionally_delete(
        &self,
        handle: Handle,
        arg: IntCanBeHandle,
        delete_subscribed: bool,
    ) {
        let mut state = self.inner.lock();

        let waiters = state.waiting_clients.remove(&handle).unwrap_or_default();

        log::trace!(
            "queue.notify: handle {:?}, arg={}, waiters: {}",
            handle,
            arg,
            waiters.len()
        );

        for waiter in waiters {
            if waiter.sender.send(arg).is_err() {
                log::debug!(
                    "queue.notify: waiter gone for handle {:?} (hint: {})",
                    handle,
                    waiter.debug_hint
                );
            }
        }

        let channel = if delete_subscribed {
            state.broadcast_channels.remove(&handle)
        } else {
            None
        };
        let sender = channel
            .as_ref()
            .or_else(|| state.broadcast_channels.get(&handle));
        if let Some(bc) = sender {
            // Fails only when nobody listens, which is fine
            if bc.sender.send(arg).is_err() {
                log::trace!(
                    "queue.notify: no subscribers for handle {:?} (hint: {})",
                    handle,
                    bc.debug_hint
                );
            }
        }

        drop(state);
    }
}
