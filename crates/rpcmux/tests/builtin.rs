//! Built-in discovery handlers: RPC.List, RPC.Describe, RPC.Ping.

use serde_json::Value;

use rpcmux::{ChannelEvent, Rpc, RpcConfig};
use rpcmux_transport_mem::{MemChannel, MemHandle};

fn engine_with_builtins() -> (Rpc, MemHandle) {
    let mut rpc = Rpc::new(RpcConfig {
        id: "self".to_string(),
        ..RpcConfig::default()
    });
    rpc.add_builtin_handlers();
    rpc.add_handler("App.Do", "{x: %d}", |rpc, req, _fi, _args| {
        rpc.send_response_raw(req, None);
    });
    let (ch, handle) = MemChannel::builder().info("loopback 1").build();
    let id = rpc.add_channel("peer", Box::new(ch));
    rpc.deliver(id, ChannelEvent::Open);
    (rpc, handle)
}

fn response(handle: &MemHandle, idx: usize) -> Value {
    serde_json::from_str(&handle.sent()[idx]).expect("valid JSON")
}

#[test]
fn list_returns_method_names_in_registration_order() {
    let (mut rpc, handle) = engine_with_builtins();
    handle.inject_frame(r#"{"id":1,"src":"peer","method":"RPC.List"}"#);
    rpc.poll();
    let v = response(&handle, 0);
    assert_eq!(v["id"], 1);
    assert_eq!(
        v["result"],
        serde_json::json!(["RPC.List", "RPC.Describe", "RPC.Ping", "App.Do"])
    );
}

#[test]
fn describe_returns_name_and_args_fmt() {
    let (mut rpc, handle) = engine_with_builtins();
    handle.inject_frame(r#"{"id":2,"src":"peer","method":"RPC.Describe","args":{"name":"App.Do"}}"#);
    rpc.poll();
    let v = response(&handle, 0);
    assert_eq!(
        v["result"],
        serde_json::json!({"name": "App.Do", "args_fmt": "{x: %d}"})
    );
}

#[test]
fn describe_unknown_name_is_404() {
    let (mut rpc, handle) = engine_with_builtins();
    handle.inject_frame(r#"{"id":3,"src":"peer","method":"RPC.Describe","args":{"name":"Nope"}}"#);
    rpc.poll();
    let v = response(&handle, 0);
    assert_eq!(v["error"]["code"], 404);
    assert_eq!(v["error"]["message"], "name not found");
}

#[test]
fn describe_without_name_is_400() {
    let (mut rpc, handle) = engine_with_builtins();
    handle.inject_frame(r#"{"id":4,"src":"peer","method":"RPC.Describe"}"#);
    rpc.poll();
    let v = response(&handle, 0);
    assert_eq!(v["error"]["code"], 400);
    assert_eq!(v["error"]["message"], "name is required");

    handle.complete_send(true);
    handle.inject_frame(r#"{"id":5,"src":"peer","method":"RPC.Describe","args":{}}"#);
    rpc.poll();
    let v = response(&handle, 1);
    assert_eq!(v["error"]["code"], 400);
}

#[test]
fn ping_reports_the_channel_info() {
    let (mut rpc, handle) = engine_with_builtins();
    handle.inject_frame(r#"{"id":6,"src":"peer","method":"RPC.Ping"}"#);
    rpc.poll();
    let v = response(&handle, 0);
    assert_eq!(v["result"], serde_json::json!({"channel_info": "loopback 1"}));
}
