//! Tests for the LXD transport that do not need an LXD server.

use std::net::TcpListener;

use rstest::*;

use consolers::{CommandBridge, ConnectionParams, ConnectionRegistry, ConsoleError};
use lxd_console::LxdBridge;

/// A loopback port that is guaranteed to refuse connections.
fn refused_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

#[fixture]
fn params() -> ConnectionParams {
    let mut params = ConnectionParams::default();
    params.lxd_endpoint = Some(format!("http://127.0.0.1:{}", refused_port()));
    params.container_name = Some("rdk-container".to_string());
    params.timeout_secs = Some(1);
    params
}

#[rstest]
fn test_from_params_requires_endpoint() {
    let mut params = ConnectionParams::default();
    params.container_name = Some("rdk-container".to_string());
    let err = LxdBridge::from_params(&params).unwrap_err();
    assert!(err.to_string().contains("lxd_endpoint"));
}

#[rstest]
fn test_from_params_requires_container_name() {
    let mut params = ConnectionParams::default();
    params.lxd_endpoint = Some("https://127.0.0.1:8443".to_string());
    let err = LxdBridge::from_params(&params).unwrap_err();
    assert!(err.to_string().contains("container_name"));
}

#[rstest]
fn test_from_params_does_no_network_io(params: ConnectionParams) {
    // Construction must succeed even though nothing listens on the endpoint.
    let bridge = LxdBridge::from_params(&params).unwrap();
    assert!(bridge.endpoint().starts_with("http://127.0.0.1:"));
}

/// A dead endpoint fails `connect` with `Unreachable`, bounded by the
/// configured timeout instead of hanging.
#[rstest]
fn test_connect_to_dead_endpoint_is_unreachable(params: ConnectionParams) {
    let mut bridge = LxdBridge::from_params(&params).unwrap();
    match bridge.connect() {
        Err(ConsoleError::Unreachable { endpoint, .. }) => {
            assert_eq!(endpoint, params.lxd_endpoint.unwrap());
        }
        other => panic!("expected Unreachable, got {other:?}"),
    }
}

#[rstest]
fn test_install_registers_the_lxd_type() {
    let mut registry = ConnectionRegistry::new();
    assert!(!registry.has_type("lxd"));
    LxdBridge::install(&mut registry);
    assert!(registry.has_type("lxd"));
    assert_eq!(registry.available_types(), vec!["lxd", "ser2net"]);
}

#[rstest]
fn test_install_twice_is_idempotent(params: ConnectionParams) {
    let mut registry = ConnectionRegistry::new();
    LxdBridge::install(&mut registry);
    LxdBridge::install(&mut registry);
    assert_eq!(registry.available_types(), vec!["lxd", "ser2net"]);
    // Resolution still works and fails only at first use of missing keys.
    let mut incomplete = ConnectionParams::default();
    incomplete.connection_type = Some("lxd".to_string());
    let err = registry.resolve_from("board.console", &incomplete).unwrap_err();
    assert!(err.to_string().contains("lxd_endpoint"));
    let console = registry.resolve("lxd", "board.console", &params);
    assert!(console.is_ok());
}
