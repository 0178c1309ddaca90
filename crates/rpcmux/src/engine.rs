//! The RPC engine: dispatch, handler lookup, observer notification, and the
//! state machine reacting to channel lifecycle events.

use serde::Serialize;
use serde_json::value::RawValue;

use rpcmux_core::{
    codes, parse_frame, serialize_frame, Channel, ChannelEvent, ChannelId, ChannelInfo, Frame,
    FramePieces, OutboundFactory, Payload, RpcConfig,
};

use crate::pending::{IdSequence, PendingTable};
use crate::queue::{OutboundQueue, QueueEntry};
use crate::registry::ChannelRegistry;
use crate::request::{
    AuthnInfo, CallOpts, FrameInfo, HandlerCb, ObserverCb, ObserverId, PrehandlerCb, Request,
    Response, ResultCb, RpcEvent,
};

struct Handler {
    method: String,
    args_fmt: String,
    cb: HandlerCb,
}

/// The RPC multiplexer.
///
/// Owns channels, handlers, observers, the pending-request table and the
/// outbound queue. Single-threaded and cooperative: no operation suspends,
/// and callbacks receive `&mut Rpc` so they may re-enter the engine —
/// respond, issue further calls, register handlers, add or remove
/// observers.
///
/// Pending requests have no timeout: an entry whose response never arrives
/// stays registered until the engine is dropped, and its callback is then
/// dropped uninvoked. Channel close does not cancel pending requests routed
/// through it.
pub struct Rpc {
    cfg: RpcConfig,
    ids: IdSequence,
    local_ids: Vec<String>,
    handlers: Vec<Handler>,
    prehandler: Option<PrehandlerCb>,
    registry: ChannelRegistry,
    pending: PendingTable,
    queue: OutboundQueue,
    observers: Vec<(ObserverId, ObserverCb)>,
    next_observer_id: u64,
}

impl Rpc {
    pub fn new(cfg: RpcConfig) -> Self {
        let queue = OutboundQueue::new(cfg.max_queue_length);
        let mut rpc = Self {
            ids: IdSequence::new(),
            local_ids: Vec::new(),
            handlers: Vec::new(),
            prehandler: None,
            registry: ChannelRegistry::new(),
            pending: PendingTable::default(),
            queue,
            observers: Vec::new(),
            next_observer_id: 1,
            cfg,
        };
        let id = rpc.cfg.id.clone();
        rpc.add_local_id(&id);
        rpc
    }

    pub fn config(&self) -> &RpcConfig {
        &self.cfg
    }

    // ========================================================================
    // Identities
    // ========================================================================

    /// Append a name this engine answers to. Incoming frames with a
    /// non-empty `dst` are accepted only if `dst` is one of these.
    pub fn add_local_id(&mut self, id: &str) {
        if id.is_empty() {
            return;
        }
        self.local_ids.push(id.to_string());
    }

    pub fn local_ids(&self) -> &[String] {
        &self.local_ids
    }

    fn is_local_id(&self, id: &str) -> bool {
        self.local_ids.iter().any(|l| l == id)
    }

    fn primary_local_id(&self) -> &str {
        self.local_ids.first().map(String::as_str).unwrap_or("")
    }

    // ========================================================================
    // Channels
    // ========================================================================

    /// Register a pre-built channel. `dst` may be empty (learned from the
    /// first incoming frame) or the default-route sentinel
    /// [`DST_DEFAULT`](rpcmux_core::DST_DEFAULT).
    pub fn add_channel(&mut self, dst: &str, channel: Box<dyn Channel>) -> ChannelId {
        self.registry.add(dst, channel)
    }

    /// Install the factory the registry uses to create on-demand outbound
    /// channels for URI destinations.
    pub fn set_outbound_factory<F: OutboundFactory + 'static>(&mut self, factory: F) {
        self.registry.set_factory(Box::new(factory));
    }

    /// Ask every channel to establish its transport.
    pub fn connect(&mut self) {
        for id in self.registry.ids() {
            if let Some(entry) = self.registry.get_mut(id) {
                entry.channel.connect();
            }
        }
    }

    /// Ask every channel to tear its transport down.
    pub fn disconnect(&mut self) {
        for id in self.registry.ids() {
            if let Some(entry) = self.registry.get_mut(id) {
                entry.channel.close();
            }
        }
    }

    /// Whether the default-route channel is open.
    pub fn is_connected(&self) -> bool {
        self.registry.default_route().is_some_and(|e| e.is_open)
    }

    /// Whether the default-route channel can take a frame right now.
    pub fn can_send(&self) -> bool {
        self.registry
            .default_route()
            .is_some_and(|e| e.is_open && !e.is_busy)
    }

    pub fn channel_info(&self, id: ChannelId) -> Option<ChannelInfo> {
        self.registry.info(id)
    }

    pub fn channel_infos(&self) -> Vec<ChannelInfo> {
        self.registry.infos()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    // ========================================================================
    // Handlers and observers
    // ========================================================================

    /// Register a handler for `method` (exact match). `args_fmt` is an
    /// opaque hint surfaced by `RPC.Describe`. The first registration for a
    /// method wins.
    pub fn add_handler<F>(&mut self, method: impl Into<String>, args_fmt: impl Into<String>, cb: F)
    where
        F: Fn(&mut Rpc, Request, &FrameInfo, Option<&RawValue>) + 'static,
    {
        self.handlers.push(Handler {
            method: method.into(),
            args_fmt: args_fmt.into(),
            cb: std::rc::Rc::new(cb),
        });
    }

    /// Install an interceptor run before every handler.
    pub fn set_prehandler<F>(&mut self, cb: F)
    where
        F: Fn(&mut Rpc, Request, &FrameInfo, Option<&RawValue>) -> Option<Request> + 'static,
    {
        self.prehandler = Some(std::rc::Rc::new(cb));
    }

    /// Registered method names, in registration order.
    pub fn method_names(&self) -> Vec<String> {
        self.handlers.iter().map(|h| h.method.clone()).collect()
    }

    pub(crate) fn handler_args_fmt(&self, method: &str) -> Option<String> {
        self.handlers
            .iter()
            .find(|h| h.method == method)
            .map(|h| h.args_fmt.clone())
    }

    pub fn add_observer<F>(&mut self, cb: F) -> ObserverId
    where
        F: Fn(&mut Rpc, &RpcEvent) + 'static,
    {
        let id = ObserverId(self.next_observer_id);
        self.next_observer_id += 1;
        self.observers.push((id, std::rc::Rc::new(cb)));
        id
    }

    pub fn remove_observer(&mut self, id: ObserverId) {
        self.observers.retain(|(oid, _)| *oid != id);
    }

    fn notify_observers(&mut self, event: &RpcEvent) {
        // Snapshot: observers may be added or removed from inside a callback.
        let snapshot: Vec<ObserverCb> = self.observers.iter().map(|(_, cb)| cb.clone()).collect();
        for cb in snapshot {
            cb(self, event);
        }
    }

    // ========================================================================
    // Outgoing calls
    // ========================================================================

    /// Issue a call. With no callback the frame carries `"nr":true` and no
    /// pending-request entry is created.
    ///
    /// Returns true iff the frame was sent or queued (unicast), or at least
    /// one broadcast dispatch succeeded.
    pub fn call(
        &mut self,
        method: &str,
        cb: Option<ResultCb>,
        opts: &CallOpts,
        args: Option<&RawValue>,
    ) -> bool {
        let id = self.ids.next_id();
        let payload = Payload::Request {
            method,
            args,
            no_response: cb.is_none(),
        };
        let sent = if !opts.broadcast {
            self.dispatch(
                &opts.src,
                &opts.dst,
                id,
                &opts.tag,
                &opts.key,
                None,
                !opts.no_queue,
                payload,
            )
        } else {
            // Best effort, per channel, never enqueued.
            let mut any = false;
            for channel in self.registry.ids() {
                let eligible = self
                    .registry
                    .get(channel)
                    .is_some_and(|e| e.channel.is_broadcast_enabled());
                if !eligible {
                    continue;
                }
                any |= self.dispatch(
                    &opts.src,
                    &opts.dst,
                    id,
                    &opts.tag,
                    &opts.key,
                    Some(channel),
                    false,
                    payload,
                );
            }
            any
        };
        match (sent, cb) {
            (true, Some(cb)) => {
                self.pending.register(id, cb);
                true
            }
            (sent, _) => sent,
        }
    }

    /// [`call`](Self::call) with a serializable args value.
    pub fn call_with<T: Serialize>(
        &mut self,
        method: &str,
        cb: Option<ResultCb>,
        opts: &CallOpts,
        args: &T,
    ) -> bool {
        match serde_json::value::to_raw_value(args) {
            Ok(raw) => self.call(method, cb, opts, Some(&raw)),
            Err(err) => {
                tracing::error!(method, %err, "failed to serialize call args");
                false
            }
        }
    }

    // ========================================================================
    // Responses
    // ========================================================================

    /// Send a success response. Consumes the handle; the response carries
    /// the request's `id` and `tag` with `src` and `dst` swapped, and leaves
    /// through the channel the request arrived on (enqueued on failure).
    pub fn send_response_raw(&mut self, req: Request, result: Option<&RawValue>) -> bool {
        let pinned = self.registry.get(req.channel).map(|e| e.id);
        self.dispatch(
            &req.dst,
            &req.src,
            req.id,
            &req.tag,
            "",
            pinned,
            true,
            Payload::Response { result },
        )
    }

    /// Send a success response with a serializable value.
    pub fn send_response<T: Serialize>(&mut self, req: Request, result: &T) -> bool {
        match serde_json::value::to_raw_value(result) {
            Ok(raw) => self.send_response_raw(req, Some(&raw)),
            Err(err) => {
                tracing::error!(method = %req.method, %err, "failed to serialize response");
                false
            }
        }
    }

    /// Send an error response. Consumes the handle.
    pub fn send_error(&mut self, req: Request, code: i32, message: &str) -> bool {
        let pinned = self.registry.get(req.channel).map(|e| e.id);
        self.dispatch(
            &req.dst,
            &req.src,
            req.id,
            &req.tag,
            "",
            pinned,
            true,
            Payload::Error {
                code,
                message: Some(message),
            },
        )
    }

    // ========================================================================
    // Frame dispatch
    // ========================================================================

    #[allow(clippy::too_many_arguments)]
    fn dispatch(
        &mut self,
        src: &str,
        dst: &str,
        id: i64,
        tag: &str,
        key: &str,
        pinned: Option<ChannelId>,
        enqueue: bool,
        payload: Payload<'_>,
    ) -> bool {
        let mut final_dst = dst.to_string();
        let target = match pinned {
            Some(channel) => Some(channel),
            None => self.registry.resolve(&mut final_dst, &self.cfg),
        };
        let src_default;
        let src = if src.is_empty() {
            src_default = self.primary_local_id().to_string();
            &src_default
        } else {
            src
        };
        let frame = serialize_frame(&FramePieces {
            id,
            src,
            dst: &final_dst,
            tag,
            key,
            payload,
        });
        if self.send_on_channel(target, &frame) {
            return true;
        }
        if enqueue {
            match self.queue.enqueue(QueueEntry {
                dst: dst.to_string(),
                pin: target,
                frame,
            }) {
                Ok(()) => return true,
                Err(entry) => {
                    tracing::debug!(len = entry.frame.len(), frame = %entry.frame, "dropped frame");
                    return false;
                }
            }
        }
        tracing::debug!(len = frame.len(), frame = %frame, "dropped frame");
        false
    }

    /// Single-flight send: refuses when the channel is missing, not open,
    /// or already has a frame in flight.
    fn send_on_channel(&mut self, target: Option<ChannelId>, frame: &str) -> bool {
        let Some(id) = target else { return false };
        let Some(entry) = self.registry.get_mut(id) else {
            return false;
        };
        if !entry.is_open || entry.is_busy {
            return false;
        }
        let accepted = entry.channel.send_frame(frame);
        tracing::debug!(channel = id, len = frame.len(), frame = %frame, accepted, "send frame");
        if accepted {
            entry.is_busy = true;
        }
        accepted
    }

    /// Walk the queue head-to-tail, sending what can be sent now. Entries
    /// with no pin re-resolve their destination, which may itself create an
    /// on-demand channel.
    fn process_queue(&mut self) {
        let mut idx = 0;
        while idx < self.queue.len() {
            let entry = self.queue.remove(idx);
            let target = match entry.pin {
                Some(pin) => Some(pin),
                None => {
                    let mut dst = entry.dst.clone();
                    self.registry.resolve(&mut dst, &self.cfg)
                }
            };
            if self.send_on_channel(target, &entry.frame) {
                continue;
            }
            self.queue.insert(idx, entry);
            idx += 1;
        }
    }

    // ========================================================================
    // Channel events
    // ========================================================================

    /// Drain pending events from every registered channel and run them
    /// through the state machine, until everything is quiet.
    pub fn poll(&mut self) {
        loop {
            let mut progressed = false;
            for id in self.registry.ids() {
                // The entry can vanish mid-drain (CLOSED removes it).
                while let Some(event) = self
                    .registry
                    .get_mut(id)
                    .and_then(|e| e.channel.poll_event())
                {
                    progressed = true;
                    self.deliver(id, event);
                }
            }
            if !progressed {
                break;
            }
        }
    }

    /// Feed one channel event into the state machine. Hosts that drive
    /// their transports directly call this instead of [`poll`](Self::poll).
    pub fn deliver(&mut self, channel: ChannelId, event: ChannelEvent) {
        if self.registry.get(channel).is_none() {
            return;
        }
        match event {
            ChannelEvent::Open => {
                let dst = {
                    let Some(entry) = self.registry.get_mut(channel) else {
                        return;
                    };
                    entry.is_open = true;
                    entry.is_busy = false;
                    tracing::debug!(
                        channel,
                        channel_type = entry.channel.channel_type(),
                        info = entry.channel.info().as_deref().unwrap_or(""),
                        "channel open"
                    );
                    entry.dst.clone()
                };
                self.process_queue();
                if !dst.is_empty() {
                    self.notify_observers(&RpcEvent::ChannelOpen { dst });
                }
            }
            ChannelEvent::FrameReceived(raw) => {
                tracing::debug!(channel, len = raw.len(), frame = %raw, "got frame");
                let ok = match parse_frame(&raw) {
                    Ok(frame) => self.handle_frame(channel, &frame),
                    Err(err) => {
                        tracing::error!(channel, %err, "frame parse error");
                        false
                    }
                };
                if !ok {
                    tracing::error!(channel, frame = %raw, "invalid frame");
                    self.close_if_not_persistent(channel);
                }
            }
            ChannelEvent::FrameReceivedParsed(frame) => {
                tracing::debug!(
                    channel,
                    src = %frame.src,
                    dst = %frame.dst,
                    id = frame.id,
                    "got parsed frame"
                );
                if !self.handle_frame(channel, &frame) {
                    tracing::error!(
                        channel,
                        src = %frame.src,
                        method = %frame.method,
                        "invalid parsed frame"
                    );
                    self.close_if_not_persistent(channel);
                }
            }
            ChannelEvent::SendComplete(success) => {
                if let Some(entry) = self.registry.get_mut(channel) {
                    entry.is_busy = false;
                }
                tracing::debug!(channel, success, "frame sent");
                self.process_queue();
            }
            ChannelEvent::Closed => {
                let (persistent, dst) = {
                    let Some(entry) = self.registry.get_mut(channel) else {
                        return;
                    };
                    let persistent = entry.channel.is_persistent();
                    entry.is_open = false;
                    entry.is_busy = false;
                    (persistent, entry.dst.clone())
                };
                tracing::debug!(channel, remove = !persistent, "channel closed");
                if !dst.is_empty() {
                    self.notify_observers(&RpcEvent::ChannelClosed { dst });
                }
                if !persistent {
                    self.queue.purge_pinned(channel);
                    self.registry.remove(channel);
                }
            }
        }
    }

    fn close_if_not_persistent(&mut self, channel: ChannelId) {
        if let Some(entry) = self.registry.get_mut(channel) {
            if !entry.channel.is_persistent() {
                entry.channel.close();
            }
        }
    }

    // ========================================================================
    // Incoming frames
    // ========================================================================

    fn handle_frame(&mut self, channel: ChannelId, frame: &Frame) -> bool {
        let Some(entry) = self.registry.get(channel) else {
            return false;
        };
        if !entry.is_open {
            tracing::error!(
                channel,
                channel_type = entry.channel.channel_type(),
                "ignored frame from closed channel"
            );
            return false;
        }
        // An empty dst means "whoever is on the other end", i.e. us.
        if !frame.dst.is_empty() && !self.is_local_id(&frame.dst) {
            // Addressed to someone else. Drop it, but a misdirected frame
            // is no reason to tear the channel down.
            tracing::error!(channel, dst = %frame.dst, "wrong destination");
            return true;
        }
        // If this channel did not have an associated address, record it now.
        if let Some(entry) = self.registry.get_mut(channel) {
            if entry.dst.is_empty() {
                entry.dst = frame.src.clone();
            }
        }
        if frame.is_request() {
            self.handle_request(channel, frame)
        } else {
            self.handle_response(channel, frame)
        }
    }

    fn frame_info(&self, channel: ChannelId) -> FrameInfo {
        FrameInfo {
            channel_type: self
                .registry
                .get(channel)
                .map(|e| e.channel.channel_type().to_string())
                .unwrap_or_default(),
        }
    }

    fn handle_request(&mut self, channel: ChannelId, frame: &Frame) -> bool {
        let mut req = Request {
            id: frame.id,
            src: frame.src.clone(),
            dst: frame.dst.clone(),
            tag: frame.tag.clone(),
            auth: frame.auth.clone(),
            method: frame.method.clone(),
            channel,
            args_fmt: String::new(),
            authn: AuthnInfo::default(),
        };
        let Some(handler) = self.handlers.iter().find(|h| h.method == frame.method) else {
            tracing::error!(method = %frame.method, "no handler");
            self.send_error(
                req,
                codes::NOT_FOUND,
                &format!("No handler for {}", frame.method),
            );
            return true;
        };
        let cb = handler.cb.clone();
        req.args_fmt = handler.args_fmt.clone();
        let fi = self.frame_info(channel);
        let args = frame.args.as_deref();
        let req = if let Some(prehandler) = self.prehandler.clone() {
            match prehandler(self, req, &fi, args) {
                Some(req) => req,
                // The prehandler responded or dropped the request.
                None => return true,
            }
        } else {
            req
        };
        cb(self, req, &fi, args);
        true
    }

    fn handle_response(&mut self, channel: ChannelId, frame: &Frame) -> bool {
        if frame.id == 0 {
            tracing::error!(channel, "response without an id");
            return false;
        }
        let Some(cb) = self.pending.take(frame.id) else {
            // A response to a request we did not send — or, more likely,
            // one we sent without asking for a response. Stay quiet.
            return true;
        };
        let fi = self.frame_info(channel);
        let response = Response {
            result: frame.result.as_deref(),
            error_code: frame.error_code,
            error_message: &frame.error_msg,
        };
        cb(self, response, &fi);
        true
    }
}
