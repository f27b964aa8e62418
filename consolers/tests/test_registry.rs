//! Tests for the connection-type registry.

use std::{cell::Cell, rc::Rc, time::Duration};

use rstest::*;

use consolers::{
    ConnectionParams, ConnectionRegistry, Connector, ConsoleError, ConsoleSession,
    LoopbackBridge,
};

/// A connector producing loopback-backed sessions with a recognizable prompt.
fn loopback_connector(prompt: &'static str) -> Connector {
    Box::new(move |name, _params| {
        let bridge = LoopbackBridge::new(Vec::<String>::new(), Vec::<String>::new());
        Ok(Box::new(ConsoleSession::new(name, bridge, prompt)))
    })
}

#[fixture]
fn params() -> ConnectionParams {
    ConnectionParams::default()
}

#[rstest]
fn test_builtin_types_are_seeded() {
    let registry = ConnectionRegistry::new();
    assert!(registry.has_type("ser2net"));
    assert_eq!(registry.available_types(), vec!["ser2net"]);
}

#[rstest]
fn test_unknown_type_without_fallback(params: ConnectionParams) {
    let registry = ConnectionRegistry::empty();
    match registry.resolve("lxd", "board.console", &params) {
        Err(ConsoleError::UnknownConnectionType(tag)) => assert_eq!(tag, "lxd"),
        other => panic!("expected UnknownConnectionType, got {other:?}"),
    }
}

/// Types unknown to the registry delegate to the original resolver
/// unchanged, before and after new entries are installed.
#[rstest]
fn test_unknown_types_pass_through_to_fallback(params: ConnectionParams) {
    let calls = Rc::new(Cell::new(0usize));
    let calls_seen = Rc::clone(&calls);
    let fallback: Connector = Box::new(move |name, _params| {
        calls_seen.set(calls_seen.get() + 1);
        let bridge = LoopbackBridge::new(Vec::<String>::new(), Vec::<String>::new());
        Ok(Box::new(ConsoleSession::new(name, bridge, "hostprompt")))
    });
    let mut registry = ConnectionRegistry::with_fallback(fallback);

    let console = registry.resolve("telnet", "board.console", &params).unwrap();
    assert_eq!(calls.get(), 1);
    assert!(console.shell_prompt()[0].starts_with("hostprompt"));

    // Installing a new entry must not change what unknown types resolve to.
    registry.register("lxd", loopback_connector("lxdprompt"));
    let console = registry.resolve("telnet", "board.console", &params).unwrap();
    assert_eq!(calls.get(), 2);
    assert!(console.shell_prompt()[0].starts_with("hostprompt"));
}

/// Installing the same entry twice leaves observable resolve results
/// unchanged.
#[rstest]
fn test_reinstall_is_idempotent(params: ConnectionParams) {
    let mut registry = ConnectionRegistry::empty();
    registry.register("lxd", loopback_connector("lxdprompt"));
    let first = registry.resolve("lxd", "board.console", &params).unwrap();

    registry.register("lxd", loopback_connector("lxdprompt"));
    let second = registry.resolve("lxd", "board.console", &params).unwrap();

    assert_eq!(first.shell_prompt(), second.shell_prompt());
    assert_eq!(registry.available_types(), vec!["lxd"]);
}

/// A registered tag shadows the fallback for that tag only.
#[rstest]
fn test_registered_tag_wins_over_fallback(params: ConnectionParams) {
    let fallback: Connector = loopback_connector("hostprompt");
    let mut registry = ConnectionRegistry::with_fallback(fallback);
    registry.register("lxd", loopback_connector("lxdprompt"));

    let console = registry.resolve("lxd", "board.console", &params).unwrap();
    assert!(console.shell_prompt()[0].starts_with("lxdprompt"));
}

#[rstest]
fn test_resolve_from_requires_connection_type(params: ConnectionParams) {
    let registry = ConnectionRegistry::new();
    let err = registry.resolve_from("board.console", &params).unwrap_err();
    assert!(err.to_string().contains("connection_type"));
}

#[rstest]
fn test_ser2net_requires_address_at_first_use() {
    let registry = ConnectionRegistry::new();
    let mut params = ConnectionParams::default();
    params.connection_type = Some("ser2net".to_string());
    let err = registry.resolve_from("board.console", &params).unwrap_err();
    assert!(err.to_string().contains("ip_addr"));
}

/// The resolved console is a ready-to-login session honoring the descriptor.
#[rstest]
fn test_resolved_console_uses_descriptor_prompt() {
    let mut registry = ConnectionRegistry::empty();
    registry.register(
        "loopback",
        Box::new(|name, params| {
            let bridge = LoopbackBridge::new(vec!["uname"], vec!["Linux\n"]);
            Ok(Box::new(ConsoleSession::from_params(name, bridge, params)?))
        }),
    );
    let mut params = ConnectionParams::default();
    params.shell_prompt = Some("root@gw".to_string());

    let mut console = registry.resolve("loopback", "board.console", &params).unwrap();
    console.login_to_server().unwrap();
    let output = console
        .execute_command("uname", Duration::from_secs(5))
        .unwrap();
    assert_eq!(output, "Linux\n");
    console.close().unwrap();
}
