use crate::config::{ProbeConfig, DEFAULT_PORT};
use crate::Error;
use std::time::Duration;
use tempfile::TempDir;

#[test]
fn test_default_config() {
    let config = ProbeConfig::default();

    assert!(!config.debug);
    assert_eq!(config.port, None);
    assert_eq!(config.listen_port(), DEFAULT_PORT);
    assert_eq!(config.settle_delay(), Duration::from_secs(2));
    assert!(config.natpmp_enabled);
    assert!(config.validate().is_ok());
}

#[test]
fn test_explicit_and_ephemeral_ports() {
    let mut config = ProbeConfig::default();

    config.port = Some(8080);
    assert_eq!(config.listen_port(), 8080);

    config.port = Some(0);
    assert_eq!(config.listen_port(), 0, "Some(0) requests an ephemeral port");
}

#[test]
fn test_load_missing_file_returns_defaults() {
    let dir = TempDir::new().unwrap();
    let config = ProbeConfig::load(dir.path().join("absent.json")).unwrap();
    assert_eq!(config, ProbeConfig::default());
}

#[test]
fn test_load_empty_file_returns_defaults() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("empty.json");
    std::fs::write(&path, "  \n").unwrap();

    let config = ProbeConfig::load(&path).unwrap();
    assert_eq!(config, ProbeConfig::default());
}

#[test]
fn test_load_partial_file_fills_defaults() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("partial.json");
    std::fs::write(&path, r#"{"debug": true, "port": 50000}"#).unwrap();

    let config = ProbeConfig::load(&path).unwrap();
    assert!(config.debug);
    assert_eq!(config.port, Some(50000));
    assert_eq!(config.echo_url, ProbeConfig::default().echo_url);
}

#[test]
fn test_save_and_load_preserves_values() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.json");

    let config = ProbeConfig {
        debug: true,
        port: Some(40000),
        natpmp_enabled: false,
        natpmp_gateway: Some("192.168.1.1".parse().unwrap()),
        ..ProbeConfig::default()
    };
    config.save(&path).unwrap();

    assert_eq!(ProbeConfig::load(&path).unwrap(), config);
}

#[test]
fn test_load_invalid_json_is_config_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("broken.json");
    std::fs::write(&path, "{ not json").unwrap();

    assert!(matches!(ProbeConfig::load(&path), Err(Error::Config(_))));
}

#[test]
fn test_validate_rejects_zero_timeouts_and_empty_urls() {
    let zero_http = ProbeConfig {
        http_timeout_secs: 0,
        ..ProbeConfig::default()
    };
    assert!(matches!(zero_http.validate(), Err(Error::Config(_))));

    let zero_stun = ProbeConfig {
        stun_timeout_ms: 0,
        ..ProbeConfig::default()
    };
    assert!(zero_stun.validate().is_err());

    let no_probe = ProbeConfig {
        probe_url: " ".to_string(),
        ..ProbeConfig::default()
    };
    assert!(no_probe.validate().is_err());
}
