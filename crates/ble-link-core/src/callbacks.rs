//! The app-facing capability record
//!
//! A flattened record of optional closures, one per event `Communicator` can
//! raise. An application registers only the ones it cares about; anything
//! unset is simply not called.

use std::fmt;
use std::sync::Arc;

use crate::channel::Role;
use crate::error::Error;
use crate::message::{DataMessage, Message};
use crate::peer::Peer;

type Hook<A> = Arc<dyn Fn(A) + Send + Sync>;
type Hook2<A, B> = Arc<dyn Fn(A, B) + Send + Sync>;

/// All application-visible events a `Communicator` can raise, as optional
/// hooks.
#[derive(Clone, Default)]
pub struct Callbacks {
    pub on_advertise_started: Option<Hook<()>>,
    pub on_advertise_stopped: Option<Hook<()>>,
    pub on_discovery_started: Option<Hook<()>>,
    pub on_discovery_stopped: Option<Hook<()>>,
    pub on_peer_found: Option<Hook<Peer>>,
    pub on_peer_lost: Option<Hook<Peer>>,
    pub on_peer_updated: Option<Hook2<Peer, Peer>>,
    pub on_connection_request: Option<Hook<Peer>>,
    pub on_connection_success: Option<Hook2<Peer, Role>>,
    pub on_connection_failed: Option<Hook2<Peer, Arc<Error>>>,
    pub on_connection_lost: Option<Hook<Peer>>,
    pub on_connection_resumed: Option<Hook<Peer>>,
    pub on_message_received: Option<Hook2<Message, Role>>,
    pub on_data_received: Option<Hook2<DataMessage, Role>>,
    pub on_disconnected: Option<Hook2<Peer, usize>>,
    pub on_disconnection_failed: Option<Hook<Peer>>,
    pub on_bluetooth_le_not_supported: Option<Hook<()>>,
}

impl fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callbacks").finish_non_exhaustive()
    }
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_on_advertise_started(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_advertise_started = Some(Arc::new(move |_| f()));
        self
    }

    pub fn with_on_peer_found(mut self, f: impl Fn(Peer) + Send + Sync + 'static) -> Self {
        self.on_peer_found = Some(Arc::new(f));
        self
    }

    pub fn with_on_peer_lost(mut self, f: impl Fn(Peer) + Send + Sync + 'static) -> Self {
        self.on_peer_lost = Some(Arc::new(f));
        self
    }

    pub fn with_on_peer_updated(mut self, f: impl Fn(Peer, Peer) + Send + Sync + 'static) -> Self {
        self.on_peer_updated = Some(Arc::new(f));
        self
    }

    pub fn with_on_connection_request(mut self, f: impl Fn(Peer) + Send + Sync + 'static) -> Self {
        self.on_connection_request = Some(Arc::new(f));
        self
    }

    pub fn with_on_connection_success(mut self, f: impl Fn(Peer, Role) + Send + Sync + 'static) -> Self {
        self.on_connection_success = Some(Arc::new(f));
        self
    }

    pub fn with_on_connection_failed(mut self, f: impl Fn(Peer, Arc<Error>) + Send + Sync + 'static) -> Self {
        self.on_connection_failed = Some(Arc::new(f));
        self
    }

    pub fn with_on_connection_lost(mut self, f: impl Fn(Peer) + Send + Sync + 'static) -> Self {
        self.on_connection_lost = Some(Arc::new(f));
        self
    }

    pub fn with_on_connection_resumed(mut self, f: impl Fn(Peer) + Send + Sync + 'static) -> Self {
        self.on_connection_resumed = Some(Arc::new(f));
        self
    }

    pub fn with_on_message_received(mut self, f: impl Fn(Message, Role) + Send + Sync + 'static) -> Self {
        self.on_message_received = Some(Arc::new(f));
        self
    }

    pub fn with_on_data_received(mut self, f: impl Fn(DataMessage, Role) + Send + Sync + 'static) -> Self {
        self.on_data_received = Some(Arc::new(f));
        self
    }

    pub fn with_on_disconnected(mut self, f: impl Fn(Peer, usize) + Send + Sync + 'static) -> Self {
        self.on_disconnected = Some(Arc::new(f));
        self
    }

    pub fn with_on_disconnection_failed(mut self, f: impl Fn(Peer) + Send + Sync + 'static) -> Self {
        self.on_disconnection_failed = Some(Arc::new(f));
        self
    }

    pub(crate) fn fire_peer_found(&self, peer: Peer) {
        if let Some(f) = &self.on_peer_found {
            f(peer);
        }
    }

    pub(crate) fn fire_peer_lost(&self, peer: Peer) {
        if let Some(f) = &self.on_peer_lost {
            f(peer);
        }
    }

    pub(crate) fn fire_peer_updated(&self, old: Peer, new: Peer) {
        if let Some(f) = &self.on_peer_updated {
            f(old, new);
        }
    }

    pub(crate) fn fire_connection_request(&self, peer: Peer) {
        if let Some(f) = &self.on_connection_request {
            f(peer);
        }
    }

    pub(crate) fn fire_connection_success(&self, peer: Peer, role: Role) {
        if let Some(f) = &self.on_connection_success {
            f(peer, role);
        }
    }

    pub(crate) fn fire_connection_failed(&self, peer: Peer, err: Error) {
        if let Some(f) = &self.on_connection_failed {
            f(peer, Arc::new(err));
        }
    }

    pub(crate) fn fire_connection_lost(&self, peer: Peer) {
        if let Some(f) = &self.on_connection_lost {
            f(peer);
        }
    }

    pub(crate) fn fire_connection_resumed(&self, peer: Peer) {
        if let Some(f) = &self.on_connection_resumed {
            f(peer);
        }
    }

    pub(crate) fn fire_message_received(&self, message: Message, role: Role) {
        if let Some(f) = &self.on_message_received {
            f(message, role);
        }
    }

    pub(crate) fn fire_data_received(&self, data: DataMessage, role: Role) {
        if let Some(f) = &self.on_data_received {
            f(data, role);
        }
    }

    pub(crate) fn fire_disconnected(&self, peer: Peer, peers_left: usize) {
        if let Some(f) = &self.on_disconnected {
            f(peer, peers_left);
        }
    }

    pub(crate) fn fire_disconnection_failed(&self, peer: Peer) {
        if let Some(f) = &self.on_disconnection_failed {
            f(peer);
        }
    }

    pub(crate) fn fire_bluetooth_le_not_supported(&self) {
        if let Some(f) = &self.on_bluetooth_le_not_supported {
            f(());
        }
    }

    pub(crate) fn fire_advertise_started(&self) {
        if let Some(f) = &self.on_advertise_started {
            f(());
        }
    }

    pub(crate) fn fire_advertise_stopped(&self) {
        if let Some(f) = &self.on_advertise_stopped {
            f(());
        }
    }

    pub(crate) fn fire_discovery_started(&self) {
        if let Some(f) = &self.on_discovery_started {
            f(());
        }
    }

    pub(crate) fn fire_discovery_stopped(&self) {
        if let Some(f) = &self.on_discovery_stopped {
            f(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn unset_hooks_are_silent_no_ops() {
        let callbacks = Callbacks::new();
        callbacks.fire_peer_found(Peer::new("Ghost42"));
    }

    #[test]
    fn registered_hook_fires() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let callbacks = Callbacks::new().with_on_peer_found(move |_peer| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        });
        callbacks.fire_peer_found(Peer::new("Ghost42"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
