//! rpcmux-transport-mem: In-process channel for rpcmux.
//!
//! This is the **semantic reference** implementation. Every real transport
//! must behave identically to this one with respect to the engine's state
//! machine; if behavior differs, the other transport has a bug.
//!
//! Two modes:
//! - **Scripted**: [`MemChannel::new`] / [`MemChannel::builder`] return a
//!   channel plus a [`MemHandle`]. The handle drives lifecycle events and
//!   inspects sent frames, which is what the engine's tests use.
//! - **Paired**: [`MemChannel::pair`] links two channels so that a frame
//!   sent on one side surfaces as [`ChannelEvent::FrameReceived`] on the
//!   other, with `SendComplete(true)` echoed to the sender. Two engines
//!   polled in turn form a complete in-process RPC loop.

#![forbid(unsafe_code)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::{Rc, Weak};

use rpcmux_core::{Channel, ChannelEvent, Frame};

#[derive(Default)]
struct MemState {
    events: VecDeque<ChannelEvent>,
    sent: Vec<String>,
    accept_sends: bool,
    /// Push `SendComplete(true)` as soon as a send is accepted.
    auto_complete: bool,
    /// Emit `Open` from `connect()` instead of waiting for the handle.
    open_on_connect: bool,
    connect_count: usize,
    peer: Option<Weak<RefCell<MemState>>>,
}

/// An in-process channel.
pub struct MemChannel {
    state: Rc<RefCell<MemState>>,
    channel_type: &'static str,
    info: Option<String>,
    persistent: bool,
    broadcast: bool,
}

/// Scripting/inspection handle for a [`MemChannel`].
#[derive(Clone)]
pub struct MemHandle {
    state: Rc<RefCell<MemState>>,
}

/// Builder for scripted channels.
pub struct MemChannelBuilder {
    accept_sends: bool,
    auto_complete: bool,
    open_on_connect: bool,
    persistent: bool,
    broadcast: bool,
    info: Option<String>,
}

impl Default for MemChannelBuilder {
    fn default() -> Self {
        Self {
            accept_sends: true,
            auto_complete: false,
            open_on_connect: false,
            persistent: false,
            broadcast: false,
            info: None,
        }
    }
}

impl MemChannelBuilder {
    pub fn accept_sends(mut self, yes: bool) -> Self {
        self.accept_sends = yes;
        self
    }

    pub fn auto_complete(mut self, yes: bool) -> Self {
        self.auto_complete = yes;
        self
    }

    pub fn open_on_connect(mut self, yes: bool) -> Self {
        self.open_on_connect = yes;
        self
    }

    pub fn persistent(mut self, yes: bool) -> Self {
        self.persistent = yes;
        self
    }

    pub fn broadcast(mut self, yes: bool) -> Self {
        self.broadcast = yes;
        self
    }

    pub fn info(mut self, info: impl Into<String>) -> Self {
        self.info = Some(info.into());
        self
    }

    pub fn build(self) -> (MemChannel, MemHandle) {
        let state = Rc::new(RefCell::new(MemState {
            accept_sends: self.accept_sends,
            auto_complete: self.auto_complete,
            open_on_connect: self.open_on_connect,
            ..MemState::default()
        }));
        let handle = MemHandle {
            state: state.clone(),
        };
        let channel = MemChannel {
            state,
            channel_type: "mem",
            info: self.info,
            persistent: self.persistent,
            broadcast: self.broadcast,
        };
        (channel, handle)
    }
}

impl MemChannel {
    /// A scripted channel that accepts sends; all events come from the
    /// handle.
    pub fn new() -> (Self, MemHandle) {
        MemChannelBuilder::default().build()
    }

    pub fn builder() -> MemChannelBuilder {
        MemChannelBuilder::default()
    }

    /// A connected pair: frames sent on one side are received on the other,
    /// and each accepted send completes immediately. `connect()` opens the
    /// connecting side.
    pub fn pair() -> ((Self, MemHandle), (Self, MemHandle)) {
        let (a, ha) = MemChannelBuilder::default()
            .auto_complete(true)
            .open_on_connect(true)
            .build();
        let (b, hb) = MemChannelBuilder::default()
            .auto_complete(true)
            .open_on_connect(true)
            .build();
        a.state.borrow_mut().peer = Some(Rc::downgrade(&b.state));
        b.state.borrow_mut().peer = Some(Rc::downgrade(&a.state));
        ((a, ha), (b, hb))
    }
}

impl Channel for MemChannel {
    fn connect(&mut self) {
        let mut state = self.state.borrow_mut();
        state.connect_count += 1;
        if state.open_on_connect {
            state.events.push_back(ChannelEvent::Open);
        }
    }

    fn close(&mut self) {
        self.state.borrow_mut().events.push_back(ChannelEvent::Closed);
    }

    fn send_frame(&mut self, frame: &str) -> bool {
        let mut state = self.state.borrow_mut();
        if !state.accept_sends {
            return false;
        }
        state.sent.push(frame.to_string());
        if let Some(peer) = state.peer.as_ref().and_then(Weak::upgrade) {
            peer.borrow_mut()
                .events
                .push_back(ChannelEvent::FrameReceived(frame.to_string()));
        }
        if state.auto_complete {
            state.events.push_back(ChannelEvent::SendComplete(true));
        }
        true
    }

    fn channel_type(&self) -> &str {
        self.channel_type
    }

    fn info(&self) -> Option<String> {
        self.info.clone()
    }

    fn is_persistent(&self) -> bool {
        self.persistent
    }

    fn is_broadcast_enabled(&self) -> bool {
        self.broadcast
    }

    fn poll_event(&mut self) -> Option<ChannelEvent> {
        self.state.borrow_mut().events.pop_front()
    }
}

impl MemHandle {
    /// Queue an `Open` event.
    pub fn open(&self) {
        self.state.borrow_mut().events.push_back(ChannelEvent::Open);
    }

    /// Queue a `Closed` event.
    pub fn closed(&self) {
        self.state.borrow_mut().events.push_back(ChannelEvent::Closed);
    }

    /// Queue an incoming serialized frame.
    pub fn inject_frame(&self, frame: impl Into<String>) {
        self.state
            .borrow_mut()
            .events
            .push_back(ChannelEvent::FrameReceived(frame.into()));
    }

    /// Queue an incoming pre-parsed frame.
    pub fn inject_parsed(&self, frame: Frame) {
        self.state
            .borrow_mut()
            .events
            .push_back(ChannelEvent::FrameReceivedParsed(frame));
    }

    /// Queue completion of the in-flight send.
    pub fn complete_send(&self, success: bool) {
        self.state
            .borrow_mut()
            .events
            .push_back(ChannelEvent::SendComplete(success));
    }

    pub fn set_accept_sends(&self, yes: bool) {
        self.state.borrow_mut().accept_sends = yes;
    }

    /// Frames the engine handed to this channel, in send order.
    pub fn sent(&self) -> Vec<String> {
        self.state.borrow().sent.clone()
    }

    /// Drain the sent-frame log.
    pub fn take_sent(&self) -> Vec<String> {
        std::mem::take(&mut self.state.borrow_mut().sent)
    }

    pub fn sent_count(&self) -> usize {
        self.state.borrow().sent.len()
    }

    pub fn connect_count(&self) -> usize {
        self.state.borrow().connect_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripted_events_drain_in_order() {
        let (mut ch, handle) = MemChannel::new();
        handle.open();
        handle.inject_frame("{\"id\":1}");
        handle.closed();
        assert!(matches!(ch.poll_event(), Some(ChannelEvent::Open)));
        assert!(matches!(
            ch.poll_event(),
            Some(ChannelEvent::FrameReceived(_))
        ));
        assert!(matches!(ch.poll_event(), Some(ChannelEvent::Closed)));
        assert!(ch.poll_event().is_none());
    }

    #[test]
    fn rejected_sends_are_not_recorded() {
        let (mut ch, handle) = MemChannel::builder().accept_sends(false).build();
        assert!(!ch.send_frame("{}"));
        assert_eq!(handle.sent_count(), 0);
        handle.set_accept_sends(true);
        assert!(ch.send_frame("{}"));
        assert_eq!(handle.sent_count(), 1);
    }

    #[test]
    fn connect_opens_when_configured() {
        let (mut ch, _handle) = MemChannel::builder().open_on_connect(true).build();
        ch.connect();
        assert!(matches!(ch.poll_event(), Some(ChannelEvent::Open)));
    }

    #[test]
    fn pair_crosses_frames() {
        let ((mut a, _ha), (mut b, _hb)) = MemChannel::pair();
        a.connect();
        b.connect();
        assert!(matches!(a.poll_event(), Some(ChannelEvent::Open)));
        assert!(matches!(b.poll_event(), Some(ChannelEvent::Open)));

        assert!(a.send_frame("{\"id\":1,\"method\":\"M\"}"));
        // Sender gets its completion, receiver gets the frame.
        assert!(matches!(a.poll_event(), Some(ChannelEvent::SendComplete(true))));
        match b.poll_event() {
            Some(ChannelEvent::FrameReceived(f)) => {
                assert_eq!(f, "{\"id\":1,\"method\":\"M\"}");
            }
            other => panic!("expected frame, got {other:?}"),
        }
    }

    #[test]
    fn pair_survives_dropped_peer() {
        let ((mut a, _ha), peer) = MemChannel::pair();
        drop(peer);
        // The weak peer link is gone; the send is still accepted locally.
        assert!(a.send_frame("{}"));
    }
}
