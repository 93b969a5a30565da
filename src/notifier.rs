//! Publish/subscribe channel for player events.
//!
//! Subscribers get their own unbounded crossbeam receiver. Subscriptions whose
//! receiver was dropped are pruned on the next publish.

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use log::trace;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::playback::PlayState;

/// Something observable about the player changed.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    StateChanged(PlayState),
    /// Position inside the current chapter, in milliseconds.
    PositionChanged { path: PathBuf, time: i64 },
    /// A different book was bound to the player.
    BookChanged { book_id: i64 },
    SpeedChanged(f32),
    /// Remaining sleep time, `None` once the timer is off.
    SleepTimerChanged(Option<Duration>),
}

/// Identifies one subscription for [`ChangeNotifier::unsubscribe`].
pub type SubscriptionId = u64;

/// Receiving end of a subscription.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    receiver: Receiver<PlayerEvent>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn receiver(&self) -> &Receiver<PlayerEvent> {
        &self.receiver
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<PlayerEvent> {
        match self.receiver.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Every event already queued.
    pub fn drain(&self) -> Vec<PlayerEvent> {
        self.receiver.try_iter().collect()
    }
}

#[derive(Debug, Default)]
struct Subscribers {
    entries: Mutex<Vec<(SubscriptionId, Sender<PlayerEvent>)>>,
    next_id: AtomicU64,
}

/// Cloneable handle; all clones share one subscriber list.
#[derive(Debug, Clone, Default)]
pub struct ChangeNotifier {
    inner: Arc<Subscribers>,
}

impl ChangeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Subscription {
        let (sender, receiver) = channel::unbounded();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries().push((id, sender));
        trace!("Subscriber {id} added");
        Subscription { id, receiver }
    }

    /// Returns `false` if `id` was not subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|(sid, _)| *sid != id);
        entries.len() != before
    }

    /// Sends `event` to every live subscriber.
    pub fn publish(&self, event: PlayerEvent) {
        let mut entries = self.entries();
        entries.retain(|(id, sender)| {
            let alive = sender.send(event.clone()).is_ok();
            if !alive {
                trace!("Subscriber {id} went away");
            }
            alive
        });
    }

    pub fn subscriber_count(&self) -> usize {
        self.entries().len()
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, Vec<(SubscriptionId, Sender<PlayerEvent>)>> {
        self.inner.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
