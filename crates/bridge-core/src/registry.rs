//! Correlation of pending tasks with their response handlers.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, PoisonError, RwLock,
        atomic::{AtomicU64, Ordering},
    },
};

use crate::{DispatchError, InboundEnvelope, Response, TaskId};

/// What a handler wants after it has processed a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Continuation {
    /// Keep the handler registered for further responses.
    Continue,
    /// Deregister the handler.
    Complete,
}

/// Handler invoked for every response addressed to its task.
pub type ResponseHandler = Box<dyn FnMut(Response) -> Continuation + Send>;

/// Observer for inbound envelopes that have no registered handler.
pub type UnroutedHook = Arc<dyn Fn(&InboundEnvelope) + Send + Sync>;

// `None` once the handler returned `Complete`; a response racing the removal
// then counts as unrouted instead of reaching a finished handler.
type Slot = Arc<Mutex<Option<ResponseHandler>>>;

/// Maps task identifiers to pending response handlers.
///
/// Handlers run without the map lock held, so they may register or
/// dispatch other tasks.
#[derive(Default)]
pub struct CorrelationRegistry {
    pending: Mutex<HashMap<TaskId, Slot>>,
    unrouted: AtomicU64,
    unrouted_hook: RwLock<Option<UnroutedHook>>,
}

impl CorrelationRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for `task_id`.
    ///
    /// # Errors
    /// Returns [`DispatchError::DuplicateTask`] if a handler is already
    /// pending for this task.
    pub fn register(&self, task_id: TaskId, handler: ResponseHandler) -> Result<(), DispatchError> {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if pending.contains_key(&task_id) {
            return Err(DispatchError::DuplicateTask(task_id));
        }
        pending.insert(task_id, Arc::new(Mutex::new(Some(handler))));
        Ok(())
    }

    /// Drop the handler for `task_id`, returning whether one was pending.
    pub fn withdraw(&self, task_id: &TaskId) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(task_id)
            .is_some()
    }

    #[must_use]
    pub fn is_pending(&self, task_id: &TaskId) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(task_id)
    }

    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Number of inbound envelopes dropped for lack of a handler.
    #[must_use]
    pub fn unrouted_count(&self) -> u64 {
        self.unrouted.load(Ordering::Relaxed)
    }

    pub fn set_unrouted_hook(&self, hook: UnroutedHook) {
        *self
            .unrouted_hook
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(hook);
    }

    /// Route an inbound envelope to its handler.
    ///
    /// Responses to one task are serialized on its slot lock; a handler must
    /// not re-enter `dispatch` for its own task.
    pub fn dispatch(&self, envelope: InboundEnvelope) {
        let slot = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&envelope.task_id)
            .cloned();

        let Some(slot) = slot else {
            self.drop_unrouted(&envelope);
            return;
        };

        let mut guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
        if guard.is_none() {
            drop(guard);
            self.drop_unrouted(&envelope);
            return;
        }

        let InboundEnvelope { task_id, response } = envelope;
        let continuation = guard
            .as_mut()
            .map_or(Continuation::Complete, |handler| handler(response));
        if continuation == Continuation::Complete {
            *guard = None;
            drop(guard);

            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            if pending
                .get(&task_id)
                .is_some_and(|current| Arc::ptr_eq(current, &slot))
            {
                pending.remove(&task_id);
            }
        }
    }

    fn drop_unrouted(&self, envelope: &InboundEnvelope) {
        self.unrouted.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("Dropping inbound envelope for unknown task {}", envelope.task_id);

        let hook = self
            .unrouted_hook
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(hook) = hook {
            hook(envelope);
        }
    }
}
