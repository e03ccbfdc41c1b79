//! Forward session callbacks into a channel so an async loop can own the view state.

use crate::client::protocol::{GroupAddress, Level, LightStates, SourceAddress};
use crate::client::session::SessionHandler;
use crate::client::transport::CloseInfo;
use tokio::sync::mpsc;

/// One session callback, as a value.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Connected,
    Disconnected(CloseInfo),
    GroupOn {
        source: SourceAddress,
        groups: Vec<GroupAddress>,
    },
    GroupOff {
        source: SourceAddress,
        groups: Vec<GroupAddress>,
    },
    GroupRamp {
        source: SourceAddress,
        group: GroupAddress,
        duration: u32,
        level: Level,
    },
    States(LightStates),
}

/// `SessionHandler` that sends every callback to an mpsc receiver. Events after the
/// receiver is dropped are discarded.
pub struct EventForwarder {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl EventForwarder {
    pub fn new(tx: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self { tx }
    }

    /// Forwarder plus the receiving end.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    fn forward(&self, event: SessionEvent) {
        if self.tx.send(event).is_err() {
            log::debug!("session event receiver gone, dropping event");
        }
    }
}

impl SessionHandler for EventForwarder {
    fn on_connect(&self) {
        self.forward(SessionEvent::Connected);
    }

    fn on_disconnect(&self, close: &CloseInfo) {
        self.forward(SessionEvent::Disconnected(close.clone()));
    }

    fn on_lighting_group_on(&self, source: SourceAddress, groups: &[GroupAddress]) {
        self.forward(SessionEvent::GroupOn {
            source,
            groups: groups.to_vec(),
        });
    }

    fn on_lighting_group_off(&self, source: SourceAddress, groups: &[GroupAddress]) {
        self.forward(SessionEvent::GroupOff {
            source,
            groups: groups.to_vec(),
        });
    }

    fn on_lighting_group_ramp(
        &self,
        source: SourceAddress,
        group: GroupAddress,
        duration: u32,
        level: Level,
    ) {
        self.forward(SessionEvent::GroupRamp {
            source,
            group,
            duration,
            level,
        });
    }

    fn on_light_states(&self, states: &LightStates) {
        self.forward(SessionEvent::States(states.clone()));
    }
}
