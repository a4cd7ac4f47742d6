use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard,
    },
};

use crate::{
    bridge::{DisconnectReason, PeerId},
    utils::lock,
};

/// Lifecycle events delivered to features and to the public observers of an endpoint.
#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleEvent {
    Starting,
    Started,
    Stopping,
    Stopped,
    Connecting(SocketAddr),
    Connected(PeerId),
    Disconnecting(PeerId, DisconnectReason),
    Disconnected(PeerId, DisconnectReason),
    Authenticating,
    Authenticated,
    AuthenticationFailed,
    Reconnecting { attempt: u32 },
    Reconnected,
    ReconnectionFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

type Observer<E> = Arc<dyn Fn(&E) + Send + Sync + 'static>;

/// A thread-safe observer list for one kind of event.
///
/// Observers are invoked outside the internal lock, so an observer may subscribe or unsubscribe others.
pub struct Observers<E> {
    next_id: AtomicU64,
    list: Mutex<Vec<(ObserverId, Observer<E>)>>,
}

impl<E> Default for Observers<E> {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            list: Mutex::new(Vec::new()),
        }
    }
}

impl<E> Observers<E> {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn subscribe<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().push((id, Arc::new(observer)));
        id
    }
    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        let mut list = self.lock();
        let before = list.len();
        list.retain(|(observer_id, _)| *observer_id != id);
        list.len() != before
    }
    pub fn len(&self) -> usize {
        self.lock().len()
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
    pub fn notify(&self, event: &E) {
        let snapshot: Vec<Observer<E>> = self.lock().iter().map(|(_, o)| o.clone()).collect();
        for observer in snapshot {
            observer(event);
        }
    }
    fn lock(&self) -> MutexGuard<'_, Vec<(ObserverId, Observer<E>)>> {
        lock(&self.list)
    }
}
