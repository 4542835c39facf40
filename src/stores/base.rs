//! Observable store state and the shared request helper.
//!
//! Each domain store keeps its state in a [`StoreCell`]: a `watch` channel
//! whose `send_modify` is the transaction boundary. Observers only ever see
//! whole snapshots, never a half-applied mutation.
//!
//! Every fetch and mutation runs through [`StoreCell::execute`]:
//! 1. set `is_loading` (foreground only) and clear the previous error
//! 2. await the request
//! 3. on success apply the callback, on failure record a readable message
//! 4. reset `is_loading`, including when the callback panics
//!
//! Failures never reach the caller; `execute` returns `None` and the error is
//! read from the store state.

use std::future::Future;

use tokio::sync::watch;

use crate::error::ApiError;

/// Loading/error flags every store carries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestStatus {
    pub is_loading: bool,
    pub error: Option<String>,
}

pub trait StoreState: Clone + Default + Send + Sync + 'static {
    fn status(&self) -> &RequestStatus;
    fn status_mut(&mut self) -> &mut RequestStatus;
}

/// Implements [`StoreState`] for a struct with a `status: RequestStatus` field.
macro_rules! impl_store_state {
    ($state:ty) => {
        impl $crate::stores::base::StoreState for $state {
            fn status(&self) -> &$crate::stores::base::RequestStatus {
                &self.status
            }
            fn status_mut(&mut self) -> &mut $crate::stores::base::RequestStatus {
                &mut self.status
            }
        }
    };
}
pub(crate) use impl_store_state;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMode {
    /// Toggles `is_loading` around the request.
    Foreground,
    /// Statistics and refreshes: no loading indicator, errors still recorded.
    Background,
}

pub struct StoreCell<S: StoreState> {
    name: &'static str,
    tx: watch::Sender<S>,
}

/// Resets `is_loading` if the request future is dropped or the success
/// callback panics before the flag was cleared in the same transaction.
struct LoadingGuard<'a, S: StoreState> {
    tx: &'a watch::Sender<S>,
    armed: bool,
}

impl<S: StoreState> LoadingGuard<'_, S> {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl<S: StoreState> Drop for LoadingGuard<'_, S> {
    fn drop(&mut self) {
        if self.armed {
            self.tx.send_modify(|state| state.status_mut().is_loading = false);
        }
    }
}

impl<S: StoreState> StoreCell<S> {
    pub fn new(name: &'static str) -> Self {
        Self::with_state(name, S::default())
    }

    pub fn with_state(name: &'static str, state: S) -> Self {
        let (tx, _) = watch::channel(state);
        Self { name, tx }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Clone of the current state.
    pub fn snapshot(&self) -> S {
        self.tx.borrow().clone()
    }

    /// Read without cloning. Do not hold across an await.
    pub fn read<R>(&self, f: impl FnOnce(&S) -> R) -> R {
        f(&self.tx.borrow())
    }

    pub fn subscribe(&self) -> watch::Receiver<S> {
        self.tx.subscribe()
    }

    /// Apply one mutation; subscribers are notified once.
    pub fn update(&self, f: impl FnOnce(&mut S)) {
        self.tx.send_modify(f);
    }

    pub fn clear_error(&self) {
        self.tx.send_if_modified(|state| state.status_mut().error.take().is_some());
    }

    pub fn reset(&self) {
        self.tx.send_replace(S::default());
    }

    /// Run `action` with standard loading/error bookkeeping.
    pub async fn execute<T, Fut, F>(&self, mode: LoadMode, action: Fut, on_success: F) -> Option<T>
    where
        Fut: Future<Output = Result<T, ApiError>>,
        F: FnOnce(&mut S, &T),
    {
        let foreground = mode == LoadMode::Foreground;
        self.tx.send_modify(|state| {
            let status = state.status_mut();
            if foreground {
                status.is_loading = true;
            }
            status.error = None;
        });
        let mut guard = LoadingGuard {
            tx: &self.tx,
            armed: foreground,
        };

        match action.await {
            Ok(value) => {
                self.tx.send_modify(|state| {
                    on_success(state, &value);
                    if foreground {
                        state.status_mut().is_loading = false;
                    }
                });
                guard.disarm();
                Some(value)
            }
            Err(err) => {
                self.record_failure(&err, foreground);
                guard.disarm();
                None
            }
        }
    }

    fn record_failure(&self, err: &ApiError, foreground: bool) {
        // Expired sessions end in a forced logout rather than a visible error.
        let message = if matches!(err, ApiError::AuthExpired) {
            log::info!("{}: request abandoned, session expired", self.name);
            None
        } else {
            log::warn!("{}: request failed: {}", self.name, err);
            Some(err.user_message())
        };
        self.tx.send_modify(|state| {
            let status = state.status_mut();
            status.error = message;
            if foreground {
                status.is_loading = false;
            }
        });
    }
}
