use std::{collections::HashMap, sync::Arc};

use futures::future::join_all;
use parking_lot::Mutex;
use tracing::debug;

use crate::operation::{AbortHandle, Operation};

#[derive(Default)]
struct Tracked {
    next_id: u64,
    handles: HashMap<u64, AbortHandle>,
}

/// Tracks in-flight operations so an owner can abort all of them on
/// shutdown. Operations deregister themselves once settled.
#[derive(Clone, Default)]
pub struct OperationManager {
    tracked: Arc<Mutex<Tracked>>,
}

impl OperationManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracks `op` until it settles.
    pub fn manage<T: Send + 'static>(&self, op: Operation<T>) -> Operation<T> {
        let id = {
            let mut tracked = self.tracked.lock();
            let id = tracked.next_id;
            tracked.next_id += 1;
            tracked.handles.insert(id, op.abort_handle());
            id
        };

        let weak = Arc::downgrade(&self.tracked);
        let managed = op.finally(move || {
            if let Some(tracked) = weak.upgrade() {
                tracked.lock().handles.remove(&id);
            }
        });

        // Track the outer handle so destroy_all also waits for deregistration.
        // A missing entry means the operation already settled.
        if let Some(slot) = self.tracked.lock().handles.get_mut(&id) {
            *slot = managed.abort_handle();
        }
        managed
    }

    /// Aborts every tracked operation and waits for all of them to settle.
    pub async fn destroy_all(&self) {
        let handles: Vec<AbortHandle> = {
            let mut tracked = self.tracked.lock();
            tracked.handles.drain().map(|(_, handle)| handle).collect()
        };
        debug!(count = handles.len(), "aborting outstanding operations");
        join_all(handles.iter().map(AbortHandle::abort)).await;
    }

    pub fn len(&self) -> usize {
        self.tracked.lock().handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
