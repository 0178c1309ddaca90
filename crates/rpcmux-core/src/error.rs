//! Error types and RPC status codes.

use core::fmt;

/// Status codes carried in RPC error responses.
///
/// These are the codes the engine itself produces; handlers may use any
/// integer they like.
pub mod codes {
    /// Handler-level validation failure (e.g. a missing required argument).
    pub const BAD_REQUEST: i32 = 400;
    /// No handler registered for the requested method.
    pub const NOT_FOUND: i32 = 404;
    /// Handler-side or infrastructure failure.
    pub const INTERNAL: i32 = 500;
}

/// Frame parse errors.
///
/// These never propagate as RPC errors: an ill-formed frame is logged and,
/// on a non-persistent channel, tears the channel down.
#[derive(Debug)]
pub enum FrameError {
    /// The input is not a JSON object.
    NotAnObject,
    /// The input is a JSON object but carries no recognized field.
    NoRecognizedField,
    /// The input is not valid JSON, or a field has the wrong type.
    Json(serde_json::Error),
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotAnObject => write!(f, "frame is not a JSON object"),
            Self::NoRecognizedField => write!(f, "frame has no recognized field"),
            Self::Json(e) => write!(f, "frame JSON error: {e}"),
        }
    }
}

impl std::error::Error for FrameError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for FrameError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}
