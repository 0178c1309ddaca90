//! rpcmux: a lightweight, embedded-friendly, bidirectional RPC multiplexer.
//!
//! One [`Rpc`] engine owns any number of channels with independent
//! lifecycles. The same endpoint dispatches incoming method calls and
//! originates outgoing ones, over whatever transports the host plugs in.
//! The engine:
//!
//! - routes outgoing frames by destination (plain identities or URIs, with
//!   on-demand outbound channel creation for `ws`/`wss`/`http`/`https`)
//! - correlates outgoing request IDs with incoming responses
//! - queues frames that no channel can take right now, bounded, and retries
//!   them on channel-open and send-complete
//! - fans channel lifecycle events out to observers
//!
//! The engine is single-threaded and cooperative: every operation, every
//! handler and every callback runs on the host's event loop, and callbacks
//! may re-enter the engine freely. Asynchrony lives in the channels; the
//! outbound queue is the sole bridge.

#![forbid(unsafe_code)]

mod auth;
mod builtin;
mod engine;
mod pending;
mod queue;
mod registry;
mod request;

pub use engine::Rpc;
pub use request::*;

pub use rpcmux_core::*;
