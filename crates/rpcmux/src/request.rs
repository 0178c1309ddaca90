//! Request handles, callback signatures and call options.

use std::rc::Rc;

use serde_json::value::RawValue;

use rpcmux_core::ChannelId;

use crate::Rpc;

/// Per-frame channel diagnostics passed to handlers and result callbacks.
#[derive(Debug, Clone, Default)]
pub struct FrameInfo {
    pub channel_type: String,
}

/// Authentication facts established for a request.
#[derive(Debug, Clone, Default)]
pub struct AuthnInfo {
    /// Verified username; empty until some authentication step succeeds.
    pub username: String,
}

/// An incoming request awaiting its response.
///
/// Ownership passes to the handler on invocation. Responding through
/// [`Rpc::send_response`] or [`Rpc::send_error`] consumes the handle, so
/// each request is answered at most once.
#[derive(Debug)]
pub struct Request {
    pub id: i64,
    pub src: String,
    pub dst: String,
    pub tag: String,
    pub auth: Option<Box<RawValue>>,
    pub method: String,
    /// Channel the request arrived on; responses leave through it.
    pub channel: ChannelId,
    /// Args-format hint from the matched handler registration.
    pub args_fmt: String,
    pub authn: AuthnInfo,
}

/// A response as delivered to a result callback.
#[derive(Debug, Clone, Copy)]
pub struct Response<'a> {
    pub result: Option<&'a RawValue>,
    /// 0 = success.
    pub error_code: i32,
    pub error_message: &'a str,
}

impl Response<'_> {
    pub fn is_error(&self) -> bool {
        self.error_code != 0
    }
}

/// Options for [`Rpc::call`]. Empty fields take their defaults.
#[derive(Debug, Clone, Default)]
pub struct CallOpts {
    pub dst: String,
    pub src: String,
    pub tag: String,
    pub key: String,
    /// Fan out to every broadcast-enabled channel; never enqueued.
    pub broadcast: bool,
    /// Fail instead of queueing when no channel can take the frame now.
    pub no_queue: bool,
}

/// Channel lifecycle events delivered to observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RpcEvent {
    ChannelOpen { dst: String },
    ChannelClosed { dst: String },
}

/// Token returned by [`Rpc::add_observer`]; removes the observer again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(pub(crate) u64);

/// Result callback for an outgoing request. Invoked at most once, when the
/// correlated response arrives.
pub type ResultCb = Box<dyn FnOnce(&mut Rpc, Response<'_>, &FrameInfo)>;

/// Request handler. The handler owns the handle and must eventually respond
/// (possibly after stashing the handle for later).
pub type HandlerCb = Rc<dyn Fn(&mut Rpc, Request, &FrameInfo, Option<&RawValue>)>;

/// Interceptor invoked before every handler. Returning `None` stops
/// dispatch: the prehandler has either already responded or chosen to drop
/// the request.
pub type PrehandlerCb =
    Rc<dyn Fn(&mut Rpc, Request, &FrameInfo, Option<&RawValue>) -> Option<Request>>;

/// Channel lifecycle observer.
pub type ObserverCb = Rc<dyn Fn(&mut Rpc, &RpcEvent)>;
