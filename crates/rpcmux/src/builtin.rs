//! Built-in service discovery handlers.

use serde::Deserialize;
use serde_json::json;

use rpcmux_core::codes;

use crate::Rpc;

#[derive(Deserialize)]
struct DescribeArgs {
    name: String,
}

impl Rpc {
    /// Register the built-in discovery handlers:
    ///
    /// - `RPC.List` — the registered method names
    /// - `RPC.Describe` — `{name, args_fmt}` for one method
    /// - `RPC.Ping` — `{channel_info}` of the channel the ping came in on
    pub fn add_builtin_handlers(&mut self) {
        self.add_handler("RPC.List", "", |rpc, req, _fi, _args| {
            let methods = rpc.method_names();
            rpc.send_response(req, &methods);
        });
        self.add_handler("RPC.Describe", "{name: %T}", |rpc, req, _fi, args| {
            let parsed = args.and_then(|a| serde_json::from_str::<DescribeArgs>(a.get()).ok());
            let Some(DescribeArgs { name }) = parsed else {
                rpc.send_error(req, codes::BAD_REQUEST, "name is required");
                return;
            };
            match rpc.handler_args_fmt(&name) {
                Some(args_fmt) => {
                    rpc.send_response(req, &json!({ "name": name, "args_fmt": args_fmt }));
                }
                None => {
                    rpc.send_error(req, codes::NOT_FOUND, "name not found");
                }
            }
        });
        self.add_handler("RPC.Ping", "", |rpc, req, _fi, _args| {
            let info = rpc
                .channel_info(req.channel)
                .and_then(|ci| ci.info)
                .unwrap_or_default();
            rpc.send_response(req, &json!({ "channel_info": info }));
        });
    }
}
