//! RPC frame representation and JSON codec.
//!
//! One frame is one JSON object on the wire. A frame with a non-empty
//! `method` is a request; a frame with no method and a non-zero `id` is a
//! response; anything else is ill-formed.
//!
//! `args` and `result` are carried as raw JSON fragments
//! ([`serde_json::value::RawValue`]), so a string-typed `result` keeps its
//! surrounding quotes and downstream consumers always receive valid JSON.

use std::fmt::Write as _;

use serde::Deserialize;
use serde_json::value::RawValue;

use crate::FrameError;

/// A single parsed wire message.
///
/// Missing fields take their zero values; `id == 0` means no correlation is
/// expected.
#[derive(Debug, Default)]
pub struct Frame {
    pub version: i32,
    pub id: i64,
    pub src: String,
    pub dst: String,
    pub tag: String,
    /// Authentication payload, kept as a raw JSON fragment.
    pub auth: Option<Box<RawValue>>,
    /// Method name; empty iff the frame is a response.
    pub method: String,
    pub args: Option<Box<RawValue>>,
    pub result: Option<Box<RawValue>>,
    /// 0 = no error.
    pub error_code: i32,
    pub error_msg: String,
}

impl Frame {
    pub fn is_request(&self) -> bool {
        !self.method.is_empty()
    }

    pub fn is_response(&self) -> bool {
        self.method.is_empty() && self.id != 0
    }
}

#[derive(Deserialize)]
struct WireFrame {
    v: Option<i32>,
    id: Option<i64>,
    src: Option<String>,
    dst: Option<String>,
    tag: Option<String>,
    auth: Option<Box<RawValue>>,
    method: Option<String>,
    args: Option<Box<RawValue>>,
    result: Option<Box<RawValue>>,
    error: Option<WireError>,
}

#[derive(Deserialize)]
struct WireError {
    code: Option<i32>,
    message: Option<String>,
}

/// Parse a single JSON object into a [`Frame`].
///
/// Unknown fields are ignored. Fails if the input is not a JSON object or if
/// no recognized field is present.
pub fn parse_frame(input: &str) -> Result<Frame, FrameError> {
    if !input.trim_start().starts_with('{') {
        return Err(FrameError::NotAnObject);
    }
    let wire: WireFrame = serde_json::from_str(input)?;
    let recognized = wire.v.is_some()
        || wire.id.is_some()
        || wire.src.is_some()
        || wire.dst.is_some()
        || wire.tag.is_some()
        || wire.auth.is_some()
        || wire.method.is_some()
        || wire.args.is_some()
        || wire.result.is_some()
        || wire.error.is_some();
    if !recognized {
        return Err(FrameError::NoRecognizedField);
    }
    let (error_code, error_msg) = match wire.error {
        Some(e) => (e.code.unwrap_or(0), e.message.unwrap_or_default()),
        None => (0, String::new()),
    };
    let frame = Frame {
        version: wire.v.unwrap_or(0),
        id: wire.id.unwrap_or(0),
        src: wire.src.unwrap_or_default(),
        dst: wire.dst.unwrap_or_default(),
        tag: wire.tag.unwrap_or_default(),
        auth: wire.auth,
        method: wire.method.unwrap_or_default(),
        args: wire.args,
        result: wire.result,
        error_code,
        error_msg,
    };
    tracing::debug!(
        id = frame.id,
        src = %frame.src,
        dst = %frame.dst,
        method = %frame.method,
        "parsed frame"
    );
    Ok(frame)
}

/// The payload of an outgoing frame.
#[derive(Debug, Clone, Copy)]
pub enum Payload<'a> {
    Request {
        method: &'a str,
        args: Option<&'a RawValue>,
        /// Emits `"nr":true`: the caller does not expect a response.
        no_response: bool,
    },
    Response {
        /// `None` serializes as `"result":null`.
        result: Option<&'a RawValue>,
    },
    Error {
        code: i32,
        message: Option<&'a str>,
    },
}

/// The pieces of an outgoing frame, pre-resolved by the engine.
///
/// `src` must already be defaulted to the sender's primary local identity.
#[derive(Debug, Clone, Copy)]
pub struct FramePieces<'a> {
    pub id: i64,
    pub src: &'a str,
    pub dst: &'a str,
    pub tag: &'a str,
    pub key: &'a str,
    pub payload: Payload<'a>,
}

/// Serialize an outgoing frame.
///
/// Emits only the non-empty fields, in the order
/// `id, src, dst, tag, key, <payload>`.
pub fn serialize_frame(pieces: &FramePieces<'_>) -> String {
    let mut obj = JsonObject::new();
    if pieces.id != 0 {
        obj.int("id", pieces.id);
    }
    if !pieces.src.is_empty() {
        obj.string("src", pieces.src);
    }
    if !pieces.dst.is_empty() {
        obj.string("dst", pieces.dst);
    }
    if !pieces.tag.is_empty() {
        obj.string("tag", pieces.tag);
    }
    if !pieces.key.is_empty() {
        obj.string("key", pieces.key);
    }
    match pieces.payload {
        Payload::Request {
            method,
            args,
            no_response,
        } => {
            if no_response {
                obj.raw("nr", "true");
            }
            obj.string("method", method);
            if let Some(args) = args {
                obj.raw("args", args.get());
            }
        }
        Payload::Response { result } => {
            obj.raw("result", result.map_or("null", RawValue::get));
        }
        Payload::Error { code, message } => {
            let mut err = JsonObject::new();
            err.int("code", i64::from(code));
            if let Some(message) = message {
                err.string("message", message);
            }
            let err = err.finish();
            obj.raw("error", &err);
        }
    }
    obj.finish()
}

/// Minimal ordered JSON-object writer. serde_json maps do not guarantee
/// field order, and the wire format does.
struct JsonObject {
    buf: String,
    has_fields: bool,
}

impl JsonObject {
    fn new() -> Self {
        Self {
            buf: String::from("{"),
            has_fields: false,
        }
    }

    fn key(&mut self, name: &str) {
        if self.has_fields {
            self.buf.push(',');
        }
        self.has_fields = true;
        self.buf.push('"');
        self.buf.push_str(name);
        self.buf.push_str("\":");
    }

    fn int(&mut self, name: &str, value: i64) {
        self.key(name);
        let _ = write!(self.buf, "{value}");
    }

    fn string(&mut self, name: &str, value: &str) {
        self.key(name);
        // Serializing a &str to JSON cannot fail.
        let quoted = serde_json::to_string(value).expect("string serialization");
        self.buf.push_str(&quoted);
    }

    fn raw(&mut self, name: &str, json: &str) {
        self.key(name);
        self.buf.push_str(json);
    }

    fn finish(mut self) -> String {
        self.buf.push('}');
        self.buf
    }
}
