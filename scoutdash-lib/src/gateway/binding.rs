//! Observable per-caller resource state.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use log::debug;
use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::RetryGateway;
use crate::error::GatewayError;
use crate::response::ResponseMeta;

/// Snapshot of a bound resource.
#[derive(Debug, Clone)]
pub struct ResourceState<T> {
    /// Last successfully fetched data for the bound path. Kept across later
    /// failures on the same path.
    pub data: Option<T>,
    /// `true` while a request for the current path is outstanding.
    pub loading: bool,
    /// Failure of the most recent request, after retries.
    pub error: Option<GatewayError>,
    /// Cache metadata of `data`.
    pub meta: Option<ResponseMeta>,
}

impl<T> Default for ResourceState<T> {
    fn default() -> Self {
        Self {
            data: None,
            loading: false,
            error: None,
            meta: None,
        }
    }
}

impl<T> ResourceState<T> {
    /// Returns `true` if the shown data is a server-side stale fallback.
    pub fn is_stale(&self) -> bool {
        self.meta.is_some_and(|meta| meta.stale)
    }

    /// Returns `true` if a retry should be offered.
    pub fn can_retry(&self) -> bool {
        !self.loading && self.error.is_some()
    }
}

/// One caller's view of a resource, such as a page component.
///
/// Owns its own cancellation token: rebinding to another path, calling
/// [`cancel`](Self::cancel) or dropping the binding cancels it. Results that
/// arrive for a cancelled token are discarded. The gateway's shared request is
/// unaffected, so other bindings on the same path still receive it.
///
/// # Example
///
/// ```ignore
/// let binding = ResourceBinding::<Vec<Match>>::new(gateway.clone());
/// let mut updates = binding.subscribe();
///
/// binding.bind("/api/events/2024casj/matches");
/// while updates.changed().await.is_ok() {
///     let state = updates.borrow().clone();
///     if state.can_retry() {
///         binding.retry();
///     }
/// }
/// ```
pub struct ResourceBinding<T> {
    gateway: RetryGateway,
    state: Arc<watch::Sender<ResourceState<T>>>,
    current: Mutex<Option<ActiveRequest>>,
}

struct ActiveRequest {
    path: String,
    cancel: CancellationToken,
}

impl<T> ResourceBinding<T>
where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// Creates an unbound binding.
    pub fn new(gateway: RetryGateway) -> Self {
        let (state, _) = watch::channel(ResourceState::default());
        Self {
            gateway,
            state: Arc::new(state),
            current: Mutex::new(None),
        }
    }

    /// Points the binding at `path` and starts fetching it.
    ///
    /// Any request for the previous path is cancelled. Binding a different
    /// path clears `data` and `meta`; rebinding the same path keeps them until
    /// the new result arrives. The returned handle completes once the state
    /// has been updated or the result discarded.
    pub fn bind(&self, path: impl Into<String>) -> JoinHandle<()> {
        let path = path.into();
        let cancel = CancellationToken::new();

        let previous = self.lock_current().replace(ActiveRequest {
            path: path.clone(),
            cancel: cancel.clone(),
        });
        let switched = previous.as_ref().is_none_or(|previous| previous.path != path);
        if let Some(previous) = previous {
            previous.cancel.cancel();
        }

        self.state.send_modify(|state| {
            state.loading = true;
            state.error = None;
            // Data of another path is never shown under this one.
            if switched {
                state.data = None;
                state.meta = None;
            }
        });

        let gateway = self.gateway.clone();
        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            let result = gateway.fetch_resource_with_cancel::<T>(&path, &cancel).await;
            // Checked under the channel lock: a rebind cancels before it
            // touches the state, so a cancelled result can never land.
            state.send_if_modified(|state| {
                if cancel.is_cancelled() {
                    debug!("discarding result for {path}");
                    return false;
                }
                state.loading = false;
                match result {
                    Ok(response) => {
                        let (data, meta) = response.into_parts();
                        state.data = Some(data);
                        state.meta = Some(meta);
                        state.error = None;
                    }
                    Err(err) => state.error = Some(err),
                }
                true
            });
        })
    }

    /// Re-issues the request for the current path.
    ///
    /// Returns `None` if the binding was never bound.
    pub fn retry(&self) -> Option<JoinHandle<()>> {
        let path = self.path()?;
        Some(self.bind(path))
    }

    /// Cancels the outstanding request, if any, and clears `loading`.
    pub fn cancel(&self) {
        if let Some(active) = self.lock_current().as_ref() {
            active.cancel.cancel();
        }
        self.state.send_if_modified(|state| std::mem::replace(&mut state.loading, false));
    }

    /// Returns the currently bound path.
    pub fn path(&self) -> Option<String> {
        self.lock_current().as_ref().map(|active| active.path.clone())
    }

    /// Returns a snapshot of the current state.
    pub fn state(&self) -> ResourceState<T> {
        self.state.borrow().clone()
    }

    /// Returns a receiver notified on every state change.
    pub fn subscribe(&self) -> watch::Receiver<ResourceState<T>> {
        self.state.subscribe()
    }
}

impl<T> ResourceBinding<T> {
    fn lock_current(&self) -> MutexGuard<'_, Option<ActiveRequest>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> Drop for ResourceBinding<T> {
    fn drop(&mut self) {
        if let Some(active) = self.lock_current().take() {
            active.cancel.cancel();
        }
    }
}
