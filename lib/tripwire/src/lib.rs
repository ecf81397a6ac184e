//! A one-shot cancellation primitive.
//!
//! [`Tripwire::new`] returns a [`Trigger`] and a [`Tripwire`]. The tripwire is a
//! future which resolves once the trigger is cancelled or dropped, so it can be
//! raced against other work with `tokio::select!` or passed to
//! `StreamExt::take_until`. Tripwires can be cloned freely, every clone resolves
//! at the same time.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, Waker};

use tracing::debug;

const ARMED: u8 = 0;
const CANCELLED: u8 = 1;
const DROPPED: u8 = 2;

struct Shared {
    name: &'static str,
    state: AtomicU8,
    next_id: AtomicU64,
    wakers: Mutex<HashMap<u64, Waker>>,
}

impl Shared {
    fn state(&self) -> u8 {
        self.state.load(Ordering::Acquire)
    }

    fn wakers(&self) -> MutexGuard<'_, HashMap<u64, Waker>> {
        // a poisoned map still holds valid wakers
        self.wakers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn fire(&self, state: u8) {
        if self
            .state
            .compare_exchange(ARMED, state, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let wakers = std::mem::take(&mut *self.wakers());
        debug!(message = "tripwire fired", name = self.name, waiters = wakers.len());

        wakers.into_values().for_each(Waker::wake);
    }
}

/// The owning half, firing it resolves every associated [`Tripwire`].
pub struct Trigger {
    shared: Arc<Shared>,
}

impl Trigger {
    /// Cancel all associated tripwires, make them immediately resolved.
    pub fn cancel(self) {
        self.shared.fire(CANCELLED);
    }
}

impl Drop for Trigger {
    fn drop(&mut self) {
        // no-op if `cancel` already fired
        self.shared.fire(DROPPED);
    }
}

pub struct Tripwire {
    shared: Arc<Shared>,
    id: u64,
}

impl Tripwire {
    pub fn new(name: &'static str) -> (Trigger, Tripwire) {
        let shared = Arc::new(Shared {
            name,
            state: AtomicU8::new(ARMED),
            next_id: AtomicU64::new(1),
            wakers: Mutex::new(HashMap::new()),
        });

        let tripwire = Tripwire {
            shared: Arc::clone(&shared),
            id: 0,
        };

        (Trigger { shared }, tripwire)
    }

    /// Whether the trigger was cancelled explicitly. A dropped trigger resolves
    /// the tripwire too, but is not reported as cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.shared.state() == CANCELLED
    }

    /// Whether the tripwire has resolved, either way.
    pub fn is_fired(&self) -> bool {
        self.shared.state() != ARMED
    }
}

impl Clone for Tripwire {
    fn clone(&self) -> Self {
        Tripwire {
            shared: Arc::clone(&self.shared),
            id: self.shared.next_id.fetch_add(1, Ordering::Relaxed),
        }
    }
}

impl Drop for Tripwire {
    fn drop(&mut self) {
        self.shared.wakers().remove(&self.id);
    }
}

impl Future for Tripwire {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.is_fired() {
            return Poll::Ready(());
        }

        self.shared.wakers().insert(self.id, cx.waker().clone());

        // the trigger may have fired between the check and the insert
        if self.is_fired() {
            self.shared.wakers().remove(&self.id);
            return Poll::Ready(());
        }

        Poll::Pending
    }
}
