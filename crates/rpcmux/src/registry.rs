//! Channel registry: owns channel entries, maps destinations to channels,
//! and creates on-demand outbound channels for URI destinations.

use rpcmux_core::{
    dst_is_equal, Channel, ChannelId, ChannelInfo, DstUri, OutboundFactory, RpcConfig,
    WsChannelConfig, DST_DEFAULT,
};

/// One registered channel and its routing state.
pub(crate) struct ChannelEntry {
    pub id: ChannelId,
    /// Remote peer identity this channel serves; may stay empty until
    /// learned from the first incoming frame.
    pub dst: String,
    pub channel: Box<dyn Channel>,
    pub is_open: bool,
    pub is_busy: bool,
}

pub(crate) struct ChannelRegistry {
    entries: Vec<ChannelEntry>,
    next_id: ChannelId,
    factory: Option<Box<dyn OutboundFactory>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_id: 1,
            factory: None,
        }
    }

    pub fn set_factory(&mut self, factory: Box<dyn OutboundFactory>) {
        self.factory = Some(factory);
    }

    pub fn add(&mut self, dst: &str, channel: Box<dyn Channel>) -> ChannelId {
        let id = self.next_id;
        self.next_id += 1;
        tracing::debug!(
            channel = id,
            dst,
            channel_type = channel.channel_type(),
            "add channel"
        );
        self.entries.push(ChannelEntry {
            id,
            dst: dst.to_string(),
            channel,
            is_open: false,
            is_busy: false,
        });
        id
    }

    pub fn get(&self, id: ChannelId) -> Option<&ChannelEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    pub fn get_mut(&mut self, id: ChannelId) -> Option<&mut ChannelEntry> {
        self.entries.iter_mut().find(|e| e.id == id)
    }

    pub fn remove(&mut self, id: ChannelId) -> Option<ChannelEntry> {
        let idx = self.entries.iter().position(|e| e.id == id)?;
        Some(self.entries.remove(idx))
    }

    /// Snapshot of entry IDs, safe to iterate while entries come and go.
    pub fn ids(&self) -> Vec<ChannelId> {
        self.entries.iter().map(|e| e.id).collect()
    }

    /// The entry registered under the default-route sentinel, if any.
    pub fn default_route(&self) -> Option<&ChannelEntry> {
        self.entries.iter().find(|e| e.dst == DST_DEFAULT)
    }

    /// Destination lookup. Policy, in order:
    ///
    /// 1. An entry whose `dst` equals the requested destination
    ///    (canonical-URI equality when both sides parse as URIs).
    /// 2. For `ws`/`wss`/`http`/`https` URIs, a freshly created outbound
    ///    channel, registered under the canonical URI and told to connect.
    /// 3. The default-route entry.
    ///
    /// URI destinations are implied — connections are point to point — so
    /// `dst` is cleared before returning and the frame carries no `dst`.
    pub fn resolve(&mut self, dst: &mut String, cfg: &RpcConfig) -> Option<ChannelId> {
        let uri = DstUri::parse(dst);
        let mut matched = None;
        let mut default_route = None;
        for entry in &self.entries {
            if !dst.is_empty() && dst_is_equal(dst, &entry.dst) {
                matched = Some(entry.id);
                break;
            }
            if entry.dst == DST_DEFAULT {
                default_route = Some(entry.id);
            }
        }
        let resolved = if matched.is_some() {
            matched
        } else if let Some(uri) = &uri {
            if uri.supports_outbound() {
                self.create_outbound(uri, cfg)
            } else {
                tracing::error!(dst = %dst, scheme = uri.scheme(), "unsupported connection scheme");
                None
            }
        } else {
            default_route
        };
        tracing::debug!(dst = %dst, channel = ?resolved, "resolved destination");
        if uri.is_some() {
            dst.clear();
        }
        resolved
    }

    fn create_outbound(&mut self, uri: &DstUri, cfg: &RpcConfig) -> Option<ChannelId> {
        let canonical = uri.canonical();
        let secs = |v: Option<String>| v.and_then(|v| v.parse::<u64>().ok());
        let chcfg = WsChannelConfig {
            server_address: canonical.clone(),
            ssl_ca_file: uri.fragment_param("ssl_ca_file"),
            ssl_client_cert_file: uri.fragment_param("ssl_client_cert_file"),
            ssl_server_name: uri.fragment_param("ssl_server_name"),
            reconnect_interval_min: secs(uri.fragment_param("reconnect_interval_min"))
                .unwrap_or(cfg.ws.reconnect_interval_min),
            reconnect_interval_max: secs(uri.fragment_param("reconnect_interval_max"))
                .unwrap_or(cfg.ws.reconnect_interval_max),
            idle_close_timeout: secs(uri.fragment_param("idle_close_timeout"))
                .unwrap_or(cfg.default_out_channel_idle_close_timeout),
        };
        let Some(factory) = self.factory.as_mut() else {
            tracing::error!(dst = %canonical, "no outbound channel factory installed");
            return None;
        };
        let Some(channel) = factory.create(&chcfg) else {
            tracing::error!(dst = %canonical, "failed to create RPC channel");
            return None;
        };
        let id = self.add(&canonical, channel);
        if let Some(entry) = self.get_mut(id) {
            entry.channel.connect();
        }
        Some(id)
    }

    pub fn info(&self, id: ChannelId) -> Option<ChannelInfo> {
        self.get(id).map(entry_info)
    }

    pub fn infos(&self) -> Vec<ChannelInfo> {
        self.entries.iter().map(entry_info).collect()
    }
}

fn entry_info(entry: &ChannelEntry) -> ChannelInfo {
    ChannelInfo {
        dst: entry.dst.clone(),
        channel_type: entry.channel.channel_type().to_string(),
        info: entry.channel.info(),
        is_open: entry.is_open,
        is_persistent: entry.channel.is_persistent(),
        is_broadcast_enabled: entry.channel.is_broadcast_enabled(),
    }
}
