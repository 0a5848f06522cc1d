//! Bounded link between two adjacent pipeline stages
//!
//! A link is a FIFO of data units with a capacity (the high-water-mark):
//! - One Writer appends units and waits while the link is full
//! - One Reader takes units in order and waits while the link is empty
//! - A unit handed to the Reader stays counted as buffered until the
//!   Reader releases it, so upstream capacity is only replenished once
//!   the downstream stage has finished its processing call
//!
//! Coordination goes through the notification queue: the Reader waits on
//! the link's data handle, the Writer waits on its space handle.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use crate::idgen::{IdGen, IntCanBeHandle};
use crate::notification_queue::{Handle, NotificationQueueArc};
use crate::unit::{DataUnit, Mode};

/// Errors returned by link operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum LinkError {
    #[error("link was aborted")]
    Aborted,

    #[error("link is closed for writing")]
    Closed,

    #[error("production was stopped")]
    Stopped,

    #[error("receiving stage is gone")]
    ReceiverGone,

    #[error("{got} unit sent into a {expected} link")]
    ModeMismatch { expected: Mode, got: Mode },
}

/// Snapshot of a link's accounting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkStats {
    pub capacity: usize,
    pub buffered: usize,
    pub peak: usize,
}

/// Shared state between Writer and Reader
struct SharedQueue {
    units: VecDeque<(DataUnit, usize)>,
    queued: usize,
    in_flight: usize,
    peak: usize,
    closed: bool,
    aborted: bool,
    stop_requested: bool,
    receiver_gone: bool,
}

impl SharedQueue {
    fn new() -> Self {
        Self {
            units: VecDeque::new(),
            queued: 0,
            in_flight: 0,
            peak: 0,
            closed: false,
            aborted: false,
            stop_requested: false,
            receiver_gone: false,
        }
    }

    fn buffered(&self) -> usize {
        self.queued + self.in_flight
    }
}

struct LinkCore {
    shared: Mutex<SharedQueue>,
    data_handle: Handle,
    space_handle: Handle,
    queue: NotificationQueueArc,
    mode: Mode,
    capacity: usize,
    debug_hint: String,
}

impl LinkCore {
    fn stats(&self) -> LinkStats {
        let shared = self.shared.lock();
        LinkStats {
            capacity: self.capacity,
            buffered: shared.buffered(),
            peak: shared.peak,
        }
    }
}

#[allow(clippy::cast_possible_wrap)]
fn level_arg(level: usize) -> IntCanBeHandle {
    level as IntCanBeHandle
}

/// Bounded link factory and control surface
///
/// Cloning a `Link` clones the control surface, not the buffer.
#[derive(Clone)]
pub struct Link {
    core: Arc<LinkCore>,
}

impl Link {
    /// Create a link holding at most `capacity` weight of units
    ///
    /// Capacity is counted in bytes for [`Mode::Bytes`] and in units for
    /// [`Mode::Object`].
    #[must_use]
    pub fn new(
        idgen: &IdGen,
        queue: NotificationQueueArc,
        mode: Mode,
        capacity: usize,
        debug_hint: &str,
    ) -> Self {
        let data_handle = idgen.next_handle();
        let space_handle = idgen.next_handle();
        queue.whitelist(data_handle, &format!("link.data {debug_hint}"));
        queue.whitelist(space_handle, &format!("link.space {debug_hint}"));

        Self {
            core: Arc::new(LinkCore {
                shared: Mutex::new(SharedQueue::new()),
                data_handle,
                space_handle,
                queue,
                mode,
                capacity,
                debug_hint: debug_hint.to_string(),
            }),
        }
    }

    /// Writer side. A link is meant to have exactly one writer.
    #[must_use]
    pub fn writer(&self) -> Writer {
        Writer {
            core: Arc::clone(&self.core),
        }
    }

    /// Reader side. A link is meant to have exactly one reader.
    #[must_use]
    pub fn reader(&self) -> Reader {
        Reader {
            core: Arc::clone(&self.core),
            holding: None,
        }
    }

    #[must_use]
    pub fn mode(&self) -> Mode {
        self.core.mode
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.core.capacity
    }

    #[must_use]
    pub fn stats(&self) -> LinkStats {
        self.core.stats()
    }

    /// Handle notified on every append (argument: buffered weight) and on close
    #[must_use]
    pub fn data_handle(&self) -> Handle {
        self.core.data_handle
    }

    /// Observe buffered levels after every append
    ///
    /// Yields [`crate::notification_queue::UNLISTED`] once the link is
    /// closed or aborted.
    #[must_use]
    pub fn subscribe(
        &self,
        channel_capacity: usize,
    ) -> Option<tokio::sync::broadcast::Receiver<IntCanBeHandle>> {
        self.core.queue.subscribe(
            self.core.data_handle,
            channel_capacity,
            &self.core.debug_hint,
        )
    }

    /// Fail every pending and future operation on both sides
    ///
    /// Buffered units are discarded from the reader's point of view.
    pub fn abort(&self) {
        {
            let mut shared = self.core.shared.lock();
            if shared.aborted {
                return;
            }
            shared.aborted = true;
        }
        log::debug!("link.abort: {}", self.core.debug_hint);
        self.core.queue.unlist(self.core.data_handle);
        self.core.queue.unlist(self.core.space_handle);
    }

    /// Make the writer's `reserve` fail with [`LinkError::Stopped`]
    ///
    /// Units already accepted stay buffered and are delivered normally.
    pub fn request_stop(&self) {
        let level = {
            let mut shared = self.core.shared.lock();
            shared.stop_requested = true;
            shared.buffered()
        };
        self.core
            .queue
            .notify(self.core.space_handle, level_arg(level));
    }
}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shared = self.core.shared.lock();
        write!(
            f,
            "Link(hint={}, mode={}, capacity={}, buffered={}, closed={}, aborted={})",
            self.core.debug_hint,
            self.core.mode,
            self.core.capacity,
            shared.buffered(),
            shared.closed,
            shared.aborted
        )
    }
}

/// What the writer should do about the current fill level
enum SpaceAction {
    Wait,
    Proceed,
    Fail(LinkError),
}

/// Result of one append attempt
enum Push {
    Accepted(usize),
    Full(DataUnit),
}

/// Writer side of a link
///
/// Dropping the writer closes the link.
pub struct Writer {
    core: Arc<LinkCore>,
}

impl Writer {
    /// Decide whether there is room
    ///
    /// `weight = None` asks for any room at all (buffered < capacity),
    /// which is the gate before a unit is produced. For a concrete unit
    /// the unit must fit entirely, unless the link is empty: an oversized
    /// byte chunk would otherwise never pass.
    fn check_space(&self, weight: Option<usize>, honor_stop: bool) -> SpaceAction {
        let shared = self.core.shared.lock();
        if shared.aborted {
            return SpaceAction::Fail(LinkError::Aborted);
        }
        if shared.closed {
            return SpaceAction::Fail(LinkError::Closed);
        }
        if shared.receiver_gone {
            return SpaceAction::Fail(LinkError::ReceiverGone);
        }
        if honor_stop && shared.stop_requested {
            return SpaceAction::Fail(LinkError::Stopped);
        }
        let buffered = shared.buffered();
        let room = match weight {
            None => buffered < self.core.capacity,
            Some(w) => buffered == 0 || buffered + w <= self.core.capacity,
        };
        if room {
            SpaceAction::Proceed
        } else {
            SpaceAction::Wait
        }
    }

    /// Wait for the reader to release capacity
    ///
    /// Re-checks under the queue lock, see `crate::notification_queue`.
    async fn wait_for_space(&self, weight: Option<usize>, honor_stop: bool) {
        let queue_lock = self.core.queue.get_lock();
        match self.check_space(weight, honor_stop) {
            SpaceAction::Wait => {
                self.core
                    .queue
                    .wait_async(self.core.space_handle, "writer", queue_lock)
                    .await;
            }
            SpaceAction::Proceed | SpaceAction::Fail(_) => drop(queue_lock),
        }
    }

    /// Wait until the link has room for at least one more unit
    ///
    /// # Errors
    ///
    /// Fails if the link is aborted or closed, the reader is gone, or a
    /// stop was requested.
    pub async fn reserve(&self) -> Result<(), LinkError> {
        loop {
            match self.check_space(None, true) {
                SpaceAction::Proceed => return Ok(()),
                SpaceAction::Fail(e) => return Err(e),
                SpaceAction::Wait => self.wait_for_space(None, true).await,
            }
        }
    }

    fn try_push(&self, unit: DataUnit, weight: usize) -> Result<Push, LinkError> {
        let level = {
            let mut shared = self.core.shared.lock();
            if shared.aborted {
                return Err(LinkError::Aborted);
            }
            if shared.closed {
                return Err(LinkError::Closed);
            }
            if shared.receiver_gone {
                return Err(LinkError::ReceiverGone);
            }
            let buffered = shared.buffered();
            if buffered != 0 && buffered + weight > self.core.capacity {
                return Ok(Push::Full(unit));
            }
            shared.units.push_back((unit, weight));
            shared.queued += weight;
            let level = shared.buffered();
            shared.peak = shared.peak.max(level);
            level
        };

        // Notify outside the buffer lock
        self.core.queue.notify(self.core.data_handle, level_arg(level));
        Ok(Push::Accepted(level))
    }

    /// Append a unit, waiting until it fits
    ///
    /// # Errors
    ///
    /// Fails on a mode mismatch, or if the link is aborted or closed, or
    /// the reader is gone.
    pub async fn send(&self, unit: DataUnit) -> Result<(), LinkError> {
        if unit.mode() != self.core.mode {
            return Err(LinkError::ModeMismatch {
                expected: self.core.mode,
                got: unit.mode(),
            });
        }
        let weight = unit.weight(self.core.mode);
        let mut pending = unit;
        loop {
            match self.try_push(pending, weight)? {
                Push::Accepted(level) => {
                    log::trace!("link.send: {} level={level}", self.core.debug_hint);
                    return Ok(());
                }
                Push::Full(unit) => {
                    pending = unit;
                    self.wait_for_space(Some(weight), false).await;
                }
            }
        }
    }

    /// Signal end-of-data to the reader
    pub fn close(&self) {
        {
            let mut shared = self.core.shared.lock();
            if shared.closed {
                return;
            }
            shared.closed = true;
        }
        // Unlisting wakes the reader, and later waits return at once
        self.core.queue.unlist(self.core.data_handle);
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.core.shared.lock().closed
    }

    #[must_use]
    pub fn buffered(&self) -> usize {
        self.core.shared.lock().buffered()
    }
}

impl fmt::Debug for Writer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shared = self.core.shared.lock();
        write!(
            f,
            "Link.Writer(hint={}, buffered={}, closed={})",
            self.core.debug_hint,
            shared.buffered(),
            shared.closed
        )
    }
}

impl Drop for Writer {
    fn drop(&mut self) {
        self.close();
    }
}

/// Action to take when checking if the reader should wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WaitAction {
    Wait,
    DontWait,
    Closed,
    Aborted,
}

/// Reader side of a link
///
/// Dropping the reader makes further writes fail with
/// [`LinkError::ReceiverGone`].
pub struct Reader {
    core: Arc<LinkCore>,
    holding: Option<usize>,
}

impl Reader {
    /// Priority: abort first (even with units buffered), then data, then
    /// end-of-data, then wait.
    fn should_wait_for_writer(&self) -> WaitAction {
        let shared = self.core.shared.lock();
        if shared.aborted {
            WaitAction::Aborted
        } else if !shared.units.is_empty() {
            WaitAction::DontWait
        } else if shared.closed {
            WaitAction::Closed
        } else {
            WaitAction::Wait
        }
    }

    async fn wait_for_writer(&self) {
        let queue_lock = self.core.queue.get_lock();
        match self.should_wait_for_writer() {
            WaitAction::Wait => {
                self.core
                    .queue
                    .wait_async(self.core.data_handle, "reader", queue_lock)
                    .await;
            }
            WaitAction::DontWait | WaitAction::Closed | WaitAction::Aborted => drop(queue_lock),
        }
    }

    /// Take the next unit
    ///
    /// Returns `Ok(None)` at end-of-data. The returned unit keeps
    /// occupying capacity until [`Reader::release`]; receiving the next
    /// unit releases the previous one implicitly.
    ///
    /// # Errors
    ///
    /// Fails with [`LinkError::Aborted`] once the link is aborted.
    pub async fn recv(&mut self) -> Result<Option<DataUnit>, LinkError> {
        self.release();
        loop {
            match self.should_wait_for_writer() {
                WaitAction::Wait => self.wait_for_writer().await,
                WaitAction::Aborted => return Err(LinkError::Aborted),
                WaitAction::Closed => return Ok(None),
                WaitAction::DontWait => {
                    let mut shared = self.core.shared.lock();
                    if let Some((unit, weight)) = shared.units.pop_front() {
                        shared.queued -= weight;
                        shared.in_flight += weight;
                        self.holding = Some(weight);
                        return Ok(Some(unit));
                    }
                }
            }
        }
    }

    /// Report that the last received unit has been fully processed
    pub fn release(&mut self) {
        let Some(weight) = self.holding.take() else {
            return;
        };
        let level = {
            let mut shared = self.core.shared.lock();
            shared.in_flight -= weight;
            shared.buffered()
        };
        self.core
            .queue
            .notify(self.core.space_handle, level_arg(level));
    }

    #[must_use]
    pub fn buffered(&self) -> usize {
        self.core.shared.lock().buffered()
    }
}

impl fmt::Debug for Reader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shared = self.core.shared.lock();
        write!(
            f,
            "Link.Reader(hint={}, queued={}, in_flight={}, closed={})",
            self.core.debug_hint, shared.queued, shared.in_flight, shared.closed
        )
    }
}

impl Drop for Reader {
    fn drop(&mut self) {
        self.release();
        self.core.shared.lock().receiver_gone = true;
        self.core.queue.unlist(self.core.space_handle);
    }
}
