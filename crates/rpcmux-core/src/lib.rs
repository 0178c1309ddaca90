//! rpcmux-core: Core types for the rpcmux RPC multiplexer.
//!
//! This crate defines:
//! - The frame value object and JSON codec ([`Frame`], [`parse_frame`],
//!   [`serialize_frame`])
//! - The channel capability contract ([`Channel`], [`ChannelEvent`])
//! - Destination syntax ([`dst_is_equal`], [`DstUri`], [`DST_DEFAULT`])
//! - On-demand outbound channel creation ([`OutboundFactory`],
//!   [`WsChannelConfig`])
//! - Configuration ([`RpcConfig`])
//! - Error types ([`FrameError`], status [`codes`])

#![forbid(unsafe_code)]

mod channel;
mod config;
mod dst;
mod error;
mod frame;

pub use channel::*;
pub use config::*;
pub use dst::*;
pub use error::*;
pub use frame::*;
