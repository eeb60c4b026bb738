//! # Event Queue
//!
//! Timer queue plus posted events, dispatched inline.

use std::collections::{BTreeMap, HashMap};

use tokio::sync::mpsc;
use tokio::time::{self, Duration, Instant};
use tracing::trace;

/// Receiver of posted events
///
/// The dispatcher hands each event to the handler together with the queue,
/// so the handler can schedule or cancel timers while reacting.
pub trait EventHandler: Sized {
    type Event;

    fn handle_event(&mut self, event: Self::Event, queue: &mut EventQueue<Self>);
}

/// Cancellation handle for a scheduled callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(u64);

type Callback<H> = Box<dyn FnOnce(&mut H, &mut EventQueue<H>)>;

enum Wake<E> {
    Event(Option<E>),
    Timer,
}

/// Cooperative run loop owning one timer queue and one event channel
///
/// # Examples
///
/// ```
/// use lora_uplink::dispatch::{EventHandler, EventQueue};
/// use std::time::Duration;
///
/// struct Counter(u32);
///
/// impl EventHandler for Counter {
///     type Event = ();
///     fn handle_event(&mut self, _: (), queue: &mut EventQueue<Self>) {
///         self.0 += 1;
///         queue.stop();
///     }
/// }
///
/// let mut queue: EventQueue<Counter> = EventQueue::new();
/// let handle = queue.schedule_after(Duration::from_secs(1), |c: &mut Counter, _| c.0 += 10);
/// assert_eq!(queue.pending_timers(), 1);
/// assert!(queue.cancel(handle));
/// assert_eq!(queue.pending_timers(), 0);
/// ```
pub struct EventQueue<H: EventHandler> {
    /// Ordered by deadline, ties broken by scheduling order
    timers: BTreeMap<(Instant, u64), Callback<H>>,
    deadlines: HashMap<u64, Instant>,
    next_id: u64,
    sender: mpsc::UnboundedSender<H::Event>,
    events: mpsc::UnboundedReceiver<H::Event>,
    stopped: bool,
}

impl<H: EventHandler> EventQueue<H> {
    pub fn new() -> Self {
        let (sender, events) = mpsc::unbounded_channel();
        Self {
            timers: BTreeMap::new(),
            deadlines: HashMap::new(),
            next_id: 0,
            sender,
            events,
            stopped: false,
        }
    }

    /// Handle for posting events from outside the loop
    pub fn sender(&self) -> mpsc::UnboundedSender<H::Event> {
        self.sender.clone()
    }

    /// Register a one-shot callback to run after `delay`
    pub fn schedule_after<F>(&mut self, delay: Duration, callback: F) -> TimerHandle
    where
        F: FnOnce(&mut H, &mut EventQueue<H>) + 'static,
    {
        let id = self.next_id;
        self.next_id += 1;

        let deadline = Instant::now() + delay;
        self.timers.insert((deadline, id), Box::new(callback));
        self.deadlines.insert(id, deadline);
        trace!("Timer {} scheduled in {:?}", id, delay);

        TimerHandle(id)
    }

    /// Cancel a pending callback
    ///
    /// Returns `false` if it already ran or was cancelled.
    pub fn cancel(&mut self, handle: TimerHandle) -> bool {
        match self.deadlines.remove(&handle.0) {
            Some(deadline) => {
                self.timers.remove(&(deadline, handle.0));
                trace!("Timer {} cancelled", handle.0);
                true
            }
            None => false,
        }
    }

    pub fn is_pending(&self, handle: TimerHandle) -> bool {
        self.deadlines.contains_key(&handle.0)
    }

    /// Deadline of a pending callback
    pub fn deadline(&self, handle: TimerHandle) -> Option<Instant> {
        self.deadlines.get(&handle.0).copied()
    }

    pub fn pending_timers(&self) -> usize {
        self.timers.len()
    }

    /// Earliest pending deadline
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.keys().next().map(|(deadline, _)| *deadline)
    }

    /// Make [`dispatch_forever`](Self::dispatch_forever) return once the
    /// running callback completes
    pub fn stop(&mut self) {
        self.stopped = true;
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Run callbacks until [`stop`](Self::stop) is called
    ///
    /// Waits for the next timer expiry or posted event and runs its callback
    /// inline. Posted events already queued are handled before expired
    /// timers. The stop request is consumed on return, so the queue can be
    /// dispatched again.
    ///
    /// Cancelling this future (e.g. from `tokio::select!`) only ever happens
    /// between callbacks.
    pub async fn dispatch_forever(&mut self, handler: &mut H) {
        while !self.stopped {
            let wake = match self.next_deadline() {
                Some(deadline) => {
                    tokio::select! {
                        biased;
                        event = self.events.recv() => Wake::Event(event),
                        _ = time::sleep_until(deadline) => Wake::Timer,
                    }
                }
                None => Wake::Event(self.events.recv().await),
            };

            match wake {
                Wake::Event(Some(event)) => handler.handle_event(event, self),
                Wake::Event(None) => break,
                Wake::Timer => {
                    self.fire_next_due(handler);
                }
            }
        }

        self.stopped = false;
    }

    /// Run everything that is ready right now without waiting
    ///
    /// Returns the number of callbacks run.
    pub fn dispatch_pending(&mut self, handler: &mut H) -> usize {
        let mut ran = 0;
        while !self.stopped {
            if let Ok(event) = self.events.try_recv() {
                handler.handle_event(event, self);
            } else if !self.fire_next_due(handler) {
                break;
            }
            ran += 1;
        }
        ran
    }

    fn fire_next_due(&mut self, handler: &mut H) -> bool {
        let now = Instant::now();
        let key = match self.timers.keys().next() {
            Some(&key) if key.0 <= now => key,
            _ => return false,
        };

        match self.timers.remove(&key) {
            Some(callback) => {
                self.deadlines.remove(&key.1);
                trace!("Timer {} fired", key.1);
                callback(handler, self);
                true
            }
            None => false,
        }
    }
}

impl<H: EventHandler> Default for EventQueue<H> {
    fn default() -> Self {
        Self::new()
    }
}
