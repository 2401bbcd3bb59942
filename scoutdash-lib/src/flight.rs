//! In-flight call deduplication
//!
//! Both the server-side [`FetchCoordinator`](crate::cache::FetchCoordinator)
//! and the client-side [`RetryGateway`](crate::gateway::RetryGateway) funnel
//! concurrent requests for the same key through one shared call. The first
//! caller starts the call, later callers join it, and the registration is
//! released the moment the call settles.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::Weak;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::task::Context;
use std::task::Poll;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::future::BoxFuture;
use futures::future::FutureExt;
use futures::future::Shared;

type SharedCall<V> = Shared<BoxFuture<'static, V>>;

/// Registry of outstanding calls keyed by an opaque string.
///
/// At most one call per key is outstanding at any instant. Check-and-register
/// is atomic per key, and happens before anything is awaited.
///
/// Calls are driven by a spawned task, so they run to completion even when
/// every waiting caller goes away. Must be used from within a tokio runtime.
///
/// This registry is cheap to clone.
pub struct InFlightRegistry<V> {
    inner: Arc<RegistryInner<V>>,
}

struct RegistryInner<V> {
    flights: DashMap<String, Registration<V>>,
    next_id: AtomicU64,
}

struct Registration<V> {
    id: u64,
    call: SharedCall<V>,
}

impl<V> Clone for InFlightRegistry<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> Default for InFlightRegistry<V> {
    fn default() -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                flights: DashMap::new(),
                next_id: AtomicU64::new(0),
            }),
        }
    }
}

impl<V> InFlightRegistry<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Joins the outstanding call for `key`, or registers and spawns a new one.
    ///
    /// `start` is only invoked when no call is outstanding, and only builds the
    /// future; the work itself runs on the spawned driver task.
    pub fn join_or_start<F>(&self, key: &str, start: F) -> Flight<V>
    where
        F: FnOnce() -> BoxFuture<'static, V>,
    {
        let call = match self.inner.flights.entry(key.to_string()) {
            Entry::Occupied(occupied) => {
                return Flight {
                    call: occupied.get().call.clone(),
                    leader: false,
                };
            }
            Entry::Vacant(vacant) => {
                let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
                let release = release_on_drop(Arc::downgrade(&self.inner), key.to_string(), id);
                let work = start();
                let call = async move {
                    let result = AssertUnwindSafe(work).catch_unwind().await;
                    // Release before resuming a panic so the key is never pinned.
                    drop(release);
                    match result {
                        Ok(value) => value,
                        Err(panic) => std::panic::resume_unwind(panic),
                    }
                }
                .boxed()
                .shared();
                vacant.insert(Registration {
                    id,
                    call: call.clone(),
                });
                call
            }
        };

        tokio::spawn(call.clone().map(drop));
        Flight { call, leader: true }
    }

    /// Returns `true` if a call for `key` is outstanding.
    pub fn contains(&self, key: &str) -> bool {
        self.inner.flights.contains_key(key)
    }

    /// Returns the number of outstanding calls.
    pub fn len(&self) -> usize {
        self.inner.flights.len()
    }

    /// Returns `true` if nothing is outstanding.
    pub fn is_empty(&self) -> bool {
        self.inner.flights.is_empty()
    }

    /// Forgets every registration.
    ///
    /// Calls already running keep going for the callers holding them, but new
    /// callers start fresh calls.
    pub fn clear(&self) {
        self.inner.flights.clear();
    }
}

/// Handle to a shared call. Resolves to the call's result.
#[must_use = "a flight does nothing for its caller unless awaited"]
pub struct Flight<V> {
    call: SharedCall<V>,
    leader: bool,
}

impl<V> Flight<V> {
    /// Returns `true` if this caller started the call.
    pub fn is_leader(&self) -> bool {
        self.leader
    }
}

impl<V: Clone> Future for Flight<V> {
    type Output = V;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<V> {
        Pin::new(&mut self.call).poll(cx)
    }
}

/// Runs a closure when dropped, on every exit path.
struct CallOnDrop {
    f: Option<Box<dyn FnOnce() + Send + 'static>>,
}

impl CallOnDrop {
    fn new<F: FnOnce() + Send + 'static>(f: F) -> Self {
        Self {
            f: Some(Box::new(f)),
        }
    }
}

impl Drop for CallOnDrop {
    fn drop(&mut self) {
        if let Some(f) = self.f.take() {
            f();
        }
    }
}

fn release_on_drop<V>(registry: Weak<RegistryInner<V>>, key: String, id: u64) -> CallOnDrop
where
    V: Send + Sync + 'static,
{
    CallOnDrop::new(move || {
        if let Some(registry) = registry.upgrade() {
            // Only remove our own registration; `clear` may have let a newer
            // call register under the same key.
            registry
                .flights
                .remove_if(&key, |_, registration| registration.id == id);
        }
    })
}
