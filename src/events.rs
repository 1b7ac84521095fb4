//! Client event bus.
//!
//! Registered handlers receive every event synchronously; they are the
//! presentation layer's view into connection and call lifecycle.

use serde::Serialize;
use std::sync::{Arc, RwLock};

use crate::calls::state::EndReason;
use crate::identity::SessionIdentity;

#[derive(Debug, Clone, Serialize)]
pub struct IdentityAssigned {
    pub identity: SessionIdentity,
}

#[derive(Debug, Clone, Serialize)]
pub struct IncomingCall {
    pub caller: SessionIdentity,
    pub caller_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CallAccepted {
    pub peer: SessionIdentity,
}

#[derive(Debug, Clone, Serialize)]
pub struct CallActive {
    pub peer: SessionIdentity,
}

#[derive(Debug, Clone, Serialize)]
pub struct CallEnded {
    pub peer: SessionIdentity,
    pub reason: EndReason,
}

#[derive(Debug, Clone, Serialize)]
pub enum Event {
    /// The relay connection is up.
    Connected,
    /// The relay connection is gone, along with the session identity.
    Disconnected,
    IdentityAssigned(IdentityAssigned),
    IncomingCall(IncomingCall),
    /// The remote peer accepted our invite.
    CallAccepted(CallAccepted),
    /// Inbound media arrived; the call is live.
    CallActive(CallActive),
    CallEnded(CallEnded),
}

pub trait EventHandler: Send + Sync {
    fn handle_event(&self, event: &Event);
}

#[derive(Default, Clone)]
pub struct EventBus {
    handlers: Arc<RwLock<Vec<Arc<dyn EventHandler>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_handler(&self, handler: Arc<dyn EventHandler>) {
        self.handlers
            .write()
            .expect("RwLock should not be poisoned")
            .push(handler);
    }

    /// Returns true if there are any event handlers registered.
    pub fn has_handlers(&self) -> bool {
        !self
            .handlers
            .read()
            .expect("RwLock should not be poisoned")
            .is_empty()
    }

    pub fn dispatch(&self, event: &Event) {
        for handler in self
            .handlers
            .read()
            .expect("RwLock should not be poisoned")
            .iter()
        {
            handler.handle_event(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    impl EventHandler for Recorder {
        fn handle_event(&self, event: &Event) {
            let name = match event {
                Event::Connected => "connected",
                Event::Disconnected => "disconnected",
                Event::IdentityAssigned(_) => "identity-assigned",
                Event::IncomingCall(_) => "incoming-call",
                Event::CallAccepted(_) => "call-accepted",
                Event::CallActive(_) => "call-active",
                Event::CallEnded(_) => "call-ended",
            };
            self.seen.lock().unwrap().push(name.to_string());
        }
    }

    #[test]
    fn test_dispatch_reaches_all_handlers() {
        let bus = EventBus::new();
        assert!(!bus.has_handlers());

        let recorder = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
        });
        bus.add_handler(recorder.clone());
        assert!(bus.has_handlers());

        bus.dispatch(&Event::Connected);
        bus.dispatch(&Event::IncomingCall(IncomingCall {
            caller: SessionIdentity::new("abc"),
            caller_name: "Alice".to_string(),
        }));

        let seen = recorder.seen.lock().unwrap();
        assert_eq!(*seen, vec!["connected", "incoming-call"]);
    }
}
