//! Engine configuration.

use std::path::PathBuf;

const DEFAULT_MAX_QUEUE_LENGTH: usize = 16;
const DEFAULT_IDLE_CLOSE_TIMEOUT: u64 = 600;

fn max_queue_length() -> usize {
    std::env::var("RPCMUX_MAX_QUEUE_LENGTH")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(DEFAULT_MAX_QUEUE_LENGTH)
}

/// Defaults for on-demand outbound websocket channels. A destination URI's
/// fragment overrides these per channel.
#[derive(Debug, Clone)]
pub struct WsDefaults {
    /// Seconds.
    pub reconnect_interval_min: u64,
    /// Seconds.
    pub reconnect_interval_max: u64,
}

impl Default for WsDefaults {
    fn default() -> Self {
        Self {
            reconnect_interval_min: 1,
            reconnect_interval_max: 60,
        }
    }
}

/// Process-wide configuration consumed by the engine.
#[derive(Debug, Clone)]
pub struct RpcConfig {
    /// Master on/off switch. The engine itself does not consult this; hosts
    /// skip engine construction when it is false.
    pub enable: bool,
    /// Primary local identity, registered at construction. Outgoing frames
    /// with no explicit `src` carry it.
    pub id: String,
    /// Outbound queue capacity.
    pub max_queue_length: usize,
    /// Default idle-close timeout for on-demand channels, seconds.
    pub default_out_channel_idle_close_timeout: u64,
    /// Digest-auth realm.
    pub auth_domain: Option<String>,
    /// htdigest credential file.
    pub auth_file: Option<PathBuf>,
    pub ws: WsDefaults,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            enable: true,
            id: String::new(),
            max_queue_length: max_queue_length(),
            default_out_channel_idle_close_timeout: DEFAULT_IDLE_CLOSE_TIMEOUT,
            auth_domain: None,
            auth_file: None,
            ws: WsDefaults::default(),
        }
    }
}
