//! Per-stream timeout table.
//!
//! # Responsibilities
//! - Register, re-arm, suspend and remove timeouts keyed by (client, stream)
//! - Extract every due timeout in expiry order
//! - Dispatch expiry callbacks as independent tasks
//!
//! # Design Decisions
//! - One mutex guards both the heap and the entry table, so extraction and
//!   entry removal are atomic with respect to `update`/`remove`
//! - Entries hold a `Weak<Client>`; the queue never extends a client's life
//! - `remove_client` must be called from the client's close hook; the queue
//!   cannot observe a client going away on its own
//! - Extraction destroys the entry. The key stays marked as firing only while
//!   its callback runs, so an `update` racing with the tick is a no-op
//! - Removed callbacks are dropped after the lock is released; they may own
//!   clients whose close hooks call back into the queue

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::time::Instant;

use crate::net::{Client, ClientId};
use crate::observability::metrics;
use crate::timeouts::heap::KeyedHeap;

/// Stream identifier, scoped to one client.
pub type StreamId = u32;

/// Stream ID used for connection-level timeouts (HTTP/1.x).
pub const CONNECTION_STREAM: StreamId = 0;

/// Identity of one timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeoutKey {
    pub client: ClientId,
    pub stream: StreamId,
}

impl TimeoutKey {
    pub fn new(client: &Client, stream: StreamId) -> Self {
        Self {
            client: client.id(),
            stream,
        }
    }
}

impl fmt::Display for TimeoutKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.client, self.stream)
    }
}

type OnExpire = Box<dyn FnOnce(Arc<Client>, StreamId) -> BoxFuture<'static, ()> + Send>;

/// Registered timeout; queued unless suspended.
struct Entry {
    client: Weak<Client>,
    on_expire: OnExpire,
}

#[derive(Default)]
struct State {
    queue: KeyedHeap<TimeoutKey>,
    entries: HashMap<TimeoutKey, Entry>,
    streams: HashMap<ClientId, HashSet<StreamId>>,
    /// Extracted keys whose callback has not finished yet.
    firing: HashMap<TimeoutKey, usize>,
}

impl State {
    fn forget(&mut self, key: &TimeoutKey) -> Option<Entry> {
        self.queue.remove(key);
        if let Some(streams) = self.streams.get_mut(&key.client) {
            streams.remove(&key.stream);
            if streams.is_empty() {
                self.streams.remove(&key.client);
            }
        }
        self.entries.remove(key)
    }
}

fn lock(state: &Mutex<State>) -> MutexGuard<'_, State> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Keeps a fired key marked as firing until dropped.
struct Firing {
    state: Weak<Mutex<State>>,
    key: TimeoutKey,
}

impl Drop for Firing {
    fn drop(&mut self) {
        let Some(state) = self.state.upgrade() else {
            return;
        };
        let mut state = lock(&state);
        if let Some(count) = state.firing.get_mut(&self.key) {
            *count -= 1;
            if *count == 0 {
                state.firing.remove(&self.key);
            }
        }
    }
}

/// A timeout pulled off the queue, ready to be dispatched.
pub struct ExpiredTimeout {
    pub key: TimeoutKey,
    client: Weak<Client>,
    on_expire: OnExpire,
    firing: Firing,
}

impl ExpiredTimeout {
    /// Run the callback as its own task. Panics are logged, never propagated.
    pub fn dispatch(self) {
        let ExpiredTimeout {
            key,
            client,
            on_expire,
            firing,
        } = self;

        let Some(client) = client.upgrade() else {
            tracing::debug!(timeout = %key, "Timeout expired for a client that is already gone");
            return;
        };

        metrics::timeout_fired();
        tokio::spawn(async move {
            let _firing = firing;
            let callback = AssertUnwindSafe(async move { on_expire(client, key.stream).await });
            if callback.catch_unwind().await.is_err() {
                tracing::error!(
                    client_id = %key.client,
                    stream_id = key.stream,
                    "Timeout callback panicked"
                );
            }
        });
    }
}

impl fmt::Debug for ExpiredTimeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExpiredTimeout").field("key", &self.key).finish()
    }
}

/// Timeouts for every active stream of every client.
#[derive(Default)]
pub struct TimeoutQueue {
    state: Arc<Mutex<State>>,
}

impl TimeoutQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        lock(&self.state)
    }

    /// Start a timeout for `stream`, calling `on_expire` once `timeout` elapses.
    ///
    /// # Panics
    /// If a timeout is already registered for this client and stream.
    pub fn register<F, Fut>(&self, client: &Arc<Client>, stream: StreamId, timeout: Duration, on_expire: F)
    where
        F: FnOnce(Arc<Client>, StreamId) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let key = TimeoutKey::new(client, stream);
        let mut state = self.lock();

        // Checked under the lock: a closed client's hook has run or is waiting on it.
        if client.is_closed() {
            tracing::debug!(timeout = %key, "Ignoring timeout registration for a closed client");
            return;
        }

        assert!(
            !state.entries.contains_key(&key),
            "timeout already registered for {}",
            key
        );

        let entry = Entry {
            client: Arc::downgrade(client),
            on_expire: Box::new(move |client, stream| on_expire(client, stream).boxed()),
        };
        state.entries.insert(key, entry);
        state.streams.entry(key.client).or_default().insert(stream);
        state.queue.insert(key, Instant::now() + timeout);
    }

    /// Re-arm a registered timeout to expire `timeout` from now.
    ///
    /// Re-activates a suspended timeout. No-op while the timeout's callback
    /// is running or once the client has closed.
    ///
    /// # Panics
    /// If no timeout is registered for an open client and stream.
    pub fn update(&self, client: &Client, stream: StreamId, timeout: Duration) {
        let key = TimeoutKey::new(client, stream);
        let mut state = self.lock();

        if Self::is_live(&state, client, &key) {
            state.queue.insert(key, Instant::now() + timeout);
        }
    }

    /// Take a timeout off the queue without forgetting it.
    ///
    /// A later `update` re-activates it.
    ///
    /// # Panics
    /// If no timeout is registered for an open client and stream.
    pub fn suspend(&self, client: &Client, stream: StreamId) {
        let key = TimeoutKey::new(client, stream);
        let mut state = self.lock();

        if Self::is_live(&state, client, &key) {
            state.queue.remove(&key);
        }
    }

    /// Forget a timeout. Idempotent.
    pub fn remove(&self, client: &Client, stream: StreamId) {
        let key = TimeoutKey::new(client, stream);
        let removed = {
            let mut state = self.lock();
            state.forget(&key)
        };
        drop(removed);
    }

    /// Forget every timeout of a client. Call this from the client's close hook.
    pub fn remove_client(&self, client: &Client) {
        let removed: Vec<Entry> = {
            let mut state = self.lock();
            let Some(streams) = state.streams.remove(&client.id()) else {
                return;
            };

            streams
                .into_iter()
                .filter_map(|stream| {
                    let key = TimeoutKey {
                        client: client.id(),
                        stream,
                    };
                    state.queue.remove(&key);
                    state.entries.remove(&key)
                })
                .collect()
        };
        drop(removed);
    }

    /// Pull every timeout due at `now` off the queue, earliest first.
    ///
    /// Each extracted entry is destroyed. Its key counts as firing until the
    /// returned timeout is dispatched and its callback completes, or until it
    /// is dropped.
    pub fn expire(&self, now: Instant) -> Vec<ExpiredTimeout> {
        let mut state = self.lock();
        let mut expired = Vec::new();

        while let Some((key, _)) = state.queue.pop_due(now) {
            let Some(entry) = state.forget(&key) else {
                tracing::error!(timeout = %key, "Queued timeout has no entry");
                continue;
            };
            *state.firing.entry(key).or_default() += 1;
            expired.push(ExpiredTimeout {
                key,
                client: entry.client,
                on_expire: entry.on_expire,
                firing: Firing {
                    state: Arc::downgrade(&self.state),
                    key,
                },
            });
        }

        expired
    }

    /// Expire and dispatch everything due at `now`. Returns how many fired.
    pub fn tick(&self, now: Instant) -> usize {
        let expired = self.expire(now);
        let count = expired.len();
        for timeout in expired {
            timeout.dispatch();
        }
        count
    }

    /// Deadline of a queued timeout; `None` if suspended, fired or unknown.
    pub fn deadline(&self, client: &Client, stream: StreamId) -> Option<Instant> {
        self.lock().queue.deadline(&TimeoutKey::new(client, stream))
    }

    /// Number of timeouts currently queued (suspended ones excluded).
    pub fn queued(&self) -> usize {
        self.lock().queue.len()
    }

    /// Number of registered timeouts, suspended ones included.
    pub fn entries(&self) -> usize {
        self.lock().entries.len()
    }

    fn is_live(state: &State, client: &Client, key: &TimeoutKey) -> bool {
        if state.entries.contains_key(key) {
            return true;
        }
        if state.firing.contains_key(key) {
            tracing::trace!(timeout = %key, "Timeout already fired");
            return false;
        }
        if client.is_closed() {
            return false;
        }
        panic!("no timeout registered for {}", key)
    }
}

impl fmt::Debug for TimeoutQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("TimeoutQueue")
            .field("queued", &state.queue.len())
            .field("entries", &state.entries.len())
            .field("firing", &state.firing.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use crate::net::SocketAddress;

    fn client() -> Arc<Client> {
        Arc::new(Client::new(
            SocketAddress::Inet("198.51.100.9:40000".parse().unwrap()),
            SocketAddress::Inet("192.0.2.1:8080".parse().unwrap()),
        ))
    }

    fn noop(_: Arc<Client>, _: StreamId) -> std::future::Ready<()> {
        std::future::ready(())
    }

    fn keys(expired: &[ExpiredTimeout]) -> Vec<TimeoutKey> {
        expired.iter().map(|t| t.key).collect()
    }

    #[test]
    fn expires_at_or_after_deadline() {
        let queue = TimeoutQueue::new();
        let client = client();
        let start = Instant::now();

        queue.register(&client, 1, Duration::from_secs(5), noop);

        assert!(queue.expire(start + Duration::from_millis(4900)).is_empty());
        let expired = queue.expire(start + Duration::from_secs(6));
        assert_eq!(keys(&expired), vec![TimeoutKey::new(&client, 1)]);

        // Exactly once.
        assert!(queue.expire(start + Duration::from_secs(60)).is_empty());
    }

    #[test]
    fn expires_in_deadline_order_across_clients() {
        let queue = TimeoutQueue::new();
        let a = client();
        let b = client();
        let start = Instant::now();

        queue.register(&a, 1, Duration::from_secs(3), noop);
        queue.register(&b, 1, Duration::from_secs(1), noop);
        queue.register(&a, 3, Duration::from_secs(2), noop);

        let expired = queue.expire(start + Duration::from_secs(10));
        assert_eq!(
            keys(&expired),
            vec![
                TimeoutKey::new(&b, 1),
                TimeoutKey::new(&a, 3),
                TimeoutKey::new(&a, 1),
            ]
        );
    }

    #[test]
    fn update_pushes_the_deadline_back() {
        let queue = TimeoutQueue::new();
        let client = client();
        let start = Instant::now();

        queue.register(&client, 1, Duration::from_secs(5), noop);
        queue.update(&client, 1, Duration::from_secs(60));

        assert!(queue.expire(start + Duration::from_secs(10)).is_empty());
        assert_eq!(queue.expire(start + Duration::from_secs(61)).len(), 1);
    }

    #[test]
    fn suspend_holds_until_update() {
        let queue = TimeoutQueue::new();
        let client = client();
        let start = Instant::now();

        queue.register(&client, 1, Duration::from_secs(1), noop);
        queue.suspend(&client, 1);
        assert_eq!(queue.queued(), 0);
        assert_eq!(queue.entries(), 1);
        assert_eq!(queue.deadline(&client, 1), None);

        assert!(queue.expire(start + Duration::from_secs(30)).is_empty());

        queue.update(&client, 1, Duration::from_secs(1));
        assert_eq!(queue.queued(), 1);
        assert_eq!(queue.expire(start + Duration::from_secs(30)).len(), 1);
    }

    #[test]
    fn remove_releases_entry() {
        let queue = TimeoutQueue::new();
        let client = client();
        let start = Instant::now();

        queue.register(&client, 1, Duration::from_secs(1), noop);
        queue.remove(&client, 1);
        queue.remove(&client, 1);

        assert_eq!(queue.entries(), 0);
        assert_eq!(queue.queued(), 0);
        assert!(queue.expire(start + Duration::from_secs(30)).is_empty());

        // Key can be reused.
        queue.register(&client, 1, Duration::from_secs(1), noop);
        assert_eq!(queue.entries(), 1);
    }

    #[test]
    fn remove_suspended_entry() {
        let queue = TimeoutQueue::new();
        let client = client();

        queue.register(&client, 5, Duration::from_secs(1), noop);
        queue.suspend(&client, 5);
        queue.remove(&client, 5);
        assert_eq!(queue.entries(), 0);
    }

    #[test]
    fn update_while_firing_is_noop() {
        let queue = TimeoutQueue::new();
        let client = client();
        let start = Instant::now();

        queue.register(&client, 1, Duration::from_secs(1), noop);
        let expired = queue.expire(start + Duration::from_secs(2));
        assert_eq!(expired.len(), 1);
        assert_eq!(queue.entries(), 0);

        // Racing updates against an in-flight expiry do not re-arm it.
        queue.update(&client, 1, Duration::from_secs(1));
        queue.suspend(&client, 1);
        queue.remove(&client, 1);
        assert_eq!(queue.queued(), 0);
        assert_eq!(queue.entries(), 0);

        drop(expired);
        assert!(queue.lock().firing.is_empty());
    }

    #[test]
    fn fired_entries_are_destroyed() {
        let queue = TimeoutQueue::new();
        let client = client();
        let start = Instant::now();

        for stream in 1..=1000 {
            queue.register(&client, stream, Duration::from_secs(1), noop);
        }
        assert_eq!(queue.entries(), 1000);

        let expired = queue.expire(start + Duration::from_secs(5));
        assert_eq!(expired.len(), 1000);
        assert_eq!(queue.queued(), 0);
        assert_eq!(queue.entries(), 0);
        assert!(queue.lock().streams.is_empty());

        drop(expired);
        assert!(queue.lock().firing.is_empty());
    }

    #[test]
    #[should_panic(expected = "no timeout registered")]
    fn update_after_callback_finished_panics() {
        let queue = TimeoutQueue::new();
        let client = client();
        let start = Instant::now();

        queue.register(&client, 1, Duration::from_secs(1), noop);
        drop(queue.expire(start + Duration::from_secs(2)));
        queue.update(&client, 1, Duration::from_secs(1));
    }

    #[tokio::test]
    async fn firing_mark_clears_when_callback_completes() {
        let queue = TimeoutQueue::new();
        let client = client();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let (done_tx, mut done_rx) = tokio::sync::mpsc::unbounded_channel();

        queue.register(&client, 1, Duration::ZERO, move |_, _| async move {
            let _ = rx.await;
        });
        {
            let done_tx = done_tx.clone();
            queue.register(&client, 2, Duration::ZERO, move |_, _| async move {
                let _ = done_tx.send(());
            });
        }
        drop(done_tx);

        assert_eq!(queue.tick(Instant::now()), 2);
        assert_eq!(done_rx.recv().await, Some(()));
        tokio::task::yield_now().await;
        // Stream 1 is still waiting on its callback.
        assert_eq!(queue.lock().firing.len(), 1);
        queue.update(&client, 1, Duration::from_secs(1));
        assert_eq!(queue.queued(), 0);

        tx.send(()).unwrap();
        for _ in 0..10 {
            if queue.lock().firing.is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(queue.lock().firing.is_empty());
    }

    #[test]
    fn removing_a_callback_that_owns_a_client_does_not_deadlock() {
        let queue = Arc::new(TimeoutQueue::new());
        let owner = client();
        let owned = client();

        {
            let queue = queue.clone();
            owned.on_close(move |client| queue.remove_client(client));
        }
        queue.register(&owned, 1, Duration::from_secs(1), noop);

        // The callback holds the last strong reference to `owned`.
        queue.register(&owner, 1, Duration::from_secs(1), move |_, _| {
            let _owned = owned;
            std::future::ready(())
        });

        let (tx, rx) = std::sync::mpsc::channel();
        let remover = queue.clone();
        std::thread::spawn(move || {
            remover.remove(&owner, 1);
            remover.remove_client(&owner);
            let _ = tx.send(());
        });

        rx.recv_timeout(Duration::from_secs(5))
            .expect("remove deadlocked on the queue lock");
        assert_eq!(queue.entries(), 0);
    }

    #[test]
    fn remove_client_drops_callbacks_outside_the_lock() {
        let queue = Arc::new(TimeoutQueue::new());
        let owner = client();
        let owned = client();

        {
            let queue = queue.clone();
            owned.on_close(move |client| queue.remove_client(client));
        }
        queue.register(&owned, 1, Duration::from_secs(1), noop);
        queue.register(&owner, 1, Duration::from_secs(1), move |_, _| {
            let _owned = owned;
            std::future::ready(())
        });

        let (tx, rx) = std::sync::mpsc::channel();
        let remover = queue.clone();
        std::thread::spawn(move || {
            remover.remove_client(&owner);
            let _ = tx.send(());
        });

        rx.recv_timeout(Duration::from_secs(5))
            .expect("remove_client deadlocked on the queue lock");
        assert_eq!(queue.entries(), 0);
    }

    #[test]
    fn fired_key_can_be_registered_again() {
        let queue = TimeoutQueue::new();
        let client = client();
        let start = Instant::now();

        queue.register(&client, 1, Duration::from_secs(1), noop);
        assert_eq!(queue.expire(start + Duration::from_secs(2)).len(), 1);

        queue.register(&client, 1, Duration::from_secs(1), noop);
        assert_eq!(queue.queued(), 1);
    }

    #[test]
    fn remove_client_clears_every_stream() {
        let queue = TimeoutQueue::new();
        let a = client();
        let b = client();

        for stream in [1, 3, 5] {
            queue.register(&a, stream, Duration::from_secs(1), noop);
        }
        queue.suspend(&a, 3);
        queue.register(&b, 1, Duration::from_secs(1), noop);

        queue.remove_client(&a);
        assert_eq!(queue.entries(), 1);
        assert_eq!(queue.queued(), 1);

        queue.remove_client(&a);
        assert_eq!(queue.entries(), 1);
    }

    #[test]
    fn close_hook_cleanup_tolerates_late_updates() {
        let queue = Arc::new(TimeoutQueue::new());
        let client = client();

        {
            let queue = queue.clone();
            client.on_close(move |client| queue.remove_client(client));
        }
        queue.register(&client, CONNECTION_STREAM, Duration::from_secs(1), noop);
        client.close();
        assert_eq!(queue.entries(), 0);

        // The driver may still finish a request after the client closed.
        queue.update(&client, CONNECTION_STREAM, Duration::from_secs(1));
        queue.suspend(&client, CONNECTION_STREAM);
        queue.register(&client, 7, Duration::from_secs(1), noop);
        assert_eq!(queue.entries(), 0);
    }

    #[test]
    #[should_panic(expected = "already registered")]
    fn duplicate_registration_panics() {
        let queue = TimeoutQueue::new();
        let client = client();
        queue.register(&client, 1, Duration::from_secs(1), noop);
        queue.register(&client, 1, Duration::from_secs(1), noop);
    }

    #[test]
    #[should_panic(expected = "no timeout registered")]
    fn update_of_unknown_timeout_panics() {
        let queue = TimeoutQueue::new();
        let client = client();
        queue.update(&client, 9, Duration::from_secs(1));
    }

    #[test]
    fn expired_entries_do_not_own_the_client() {
        let queue = TimeoutQueue::new();
        let client = client();
        let start = Instant::now();

        queue.register(&client, 1, Duration::from_secs(1), noop);
        let weak = Arc::downgrade(&client);
        drop(client);
        assert!(weak.upgrade().is_none());

        // Dispatching for a dropped client is skipped, so no runtime is needed.
        for timeout in queue.expire(start + Duration::from_secs(2)) {
            timeout.dispatch();
        }
    }

    #[tokio::test]
    async fn dispatch_runs_callback_with_client_and_stream() {
        let queue = TimeoutQueue::new();
        let client = client();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        queue.register(&client, 3, Duration::ZERO, move |client, stream| async move {
            let _ = tx.send((client.id(), stream));
        });

        assert_eq!(queue.tick(Instant::now()), 1);
        assert_eq!(rx.recv().await, Some((client.id(), 3)));
    }

    #[tokio::test]
    async fn panicking_callback_does_not_stop_others() {
        let queue = TimeoutQueue::new();
        let client = client();
        let calls = Arc::new(AtomicUsize::new(0));
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        queue.register(&client, 1, Duration::ZERO, |_, _| async move {
            panic!("callback failure");
        });
        let c = calls.clone();
        queue.register(&client, 2, Duration::from_millis(1), move |_, stream| async move {
            c.fetch_add(1, Ordering::SeqCst);
            let _ = tx.send(stream);
        });

        assert_eq!(queue.tick(Instant::now() + Duration::from_secs(1)), 2);
        assert_eq!(rx.recv().await, Some(2));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
