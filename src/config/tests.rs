//! Config module tests

use std::io::Write;
use std::time::Duration;

use super::*;

#[test]
fn test_substitute_env_vars_simple() {
    std::env::set_var("TEST_VAR_SIMPLE", "hello");
    let result = substitute_env_vars("value = \"${TEST_VAR_SIMPLE}\"");
    assert_eq!(result, "value = \"hello\"");
    std::env::remove_var("TEST_VAR_SIMPLE");
}

#[test]
fn test_substitute_env_vars_with_default() {
    // Unset var should use default
    std::env::remove_var("TEST_VAR_UNSET");
    let result = substitute_env_vars("value = \"${TEST_VAR_UNSET:-default_value}\"");
    assert_eq!(result, "value = \"default_value\"");

    // Set var should use env value
    std::env::set_var("TEST_VAR_SET", "env_value");
    let result = substitute_env_vars("value = \"${TEST_VAR_SET:-default_value}\"");
    assert_eq!(result, "value = \"env_value\"");
    std::env::remove_var("TEST_VAR_SET");
}

#[test]
fn test_substitute_env_vars_multiple() {
    std::env::set_var("TEST_HOST", "localhost");
    std::env::set_var("TEST_PORT", "7947");
    let result = substitute_env_vars("bind = \"${TEST_HOST}:${TEST_PORT}\"");
    assert_eq!(result, "bind = \"localhost:7947\"");
    std::env::remove_var("TEST_HOST");
    std::env::remove_var("TEST_PORT");
}

#[test]
fn test_substitute_env_vars_missing_no_default() {
    std::env::remove_var("TEST_VAR_MISSING");
    let result = substitute_env_vars("value = \"${TEST_VAR_MISSING}\"");
    assert_eq!(result, "value = \"\"");
}

#[test]
fn test_load_config_with_env_substitution() {
    let mut file = tempfile::NamedTempFile::new().unwrap();

    std::env::set_var("TEST_BIND_HOST", "127.0.0.1");
    std::env::set_var("TEST_BIND_PORT", "9100");

    let config_content = r#"
[router]
bind = "${TEST_BIND_HOST}:${TEST_BIND_PORT}"
virtual_points = ${TEST_VIRTUAL_POINTS:-32}
connect_timeout = "250ms"
"#;
    file.write_all(config_content.as_bytes()).unwrap();

    let config = Config::load(file.path()).unwrap();
    assert_eq!(config.router.bind.to_string(), "127.0.0.1:9100");
    assert_eq!(config.router.virtual_points, 32); // Uses default
    assert_eq!(config.router.connect_timeout, Duration::from_millis(250));
    assert_eq!(config.router.ring_size, 65536);

    std::env::remove_var("TEST_BIND_HOST");
    std::env::remove_var("TEST_BIND_PORT");
}

#[test]
fn test_load_missing_file_uses_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::load(dir.path().join("absent.toml")).unwrap();
    assert_eq!(config.router.path, "/eventrouter");
    assert_eq!(config.cluster.mode, MembershipMode::Static);
}

#[test]
fn test_default_config() {
    let config = Config::default();
    assert_eq!(config.log.level, "info");
    assert_eq!(config.router.bind.port(), 7947);
    assert_eq!(config.router.virtual_points, 16);
    assert_eq!(config.router.ring_size, 65536);
    assert_eq!(config.cluster.mode, MembershipMode::Static);
    assert!(config.validate().is_ok());
}

#[test]
fn test_parse_minimal_config() {
    let config = Config::parse("").unwrap();
    assert_eq!(config.router.path, "/eventrouter");
    assert!(config.cluster.members.is_empty());
}

#[test]
fn test_parse_static_cluster() {
    let config = Config::parse(
        r#"
[log]
level = "debug"

[router]
bind = "0.0.0.0:9000"
advertise_addr = "node-a:9000"
path = "/events"

[cluster]
mode = "static"
node_id = "a"
members = [
    { id = "a", addr = "node-a:9000" },
    { id = "b", addr = "node-b:9000" },
]
"#,
    )
    .unwrap();

    assert_eq!(config.log.level, "debug");
    assert_eq!(config.router.path, "/events");
    assert_eq!(config.router.get_advertise_addr(), "node-a:9000");
    assert_eq!(config.cluster.members.len(), 2);
    assert_eq!(config.cluster.members[1].addr, "node-b:9000");
}

#[test]
fn test_parse_gossip_cluster() {
    let config = Config::parse(
        r#"
[cluster]
mode = "gossip"
node_id = "a"
cluster_id = "events"
gossip_addr = "0.0.0.0:7000"
seeds = ["node-b:7000", "node-c:7000"]
gossip_interval = 2
"#,
    )
    .unwrap();

    assert_eq!(config.cluster.mode, MembershipMode::Gossip);
    assert_eq!(config.cluster.cluster_id, "events");
    assert_eq!(config.cluster.seeds.len(), 2);
    assert_eq!(config.cluster.gossip_interval_duration(), Duration::from_secs(2));
}

#[test]
fn test_invalid_virtual_points() {
    let result = Config::parse(
        r#"
[router]
virtual_points = 0
"#,
    );
    assert!(matches!(result, Err(ConfigError::Validation(_))));
}

#[test]
fn test_invalid_ring_size() {
    let result = Config::parse(
        r#"
[router]
ring_size = 0
"#,
    );
    assert!(matches!(result, Err(ConfigError::Validation(_))));
}

#[test]
fn test_invalid_path() {
    let result = Config::parse(
        r#"
[router]
path = "eventrouter"
"#,
    );
    assert!(matches!(result, Err(ConfigError::Validation(_))));
}

#[test]
fn test_duplicate_member() {
    let result = Config::parse(
        r#"
[cluster]
node_id = "a"
members = [
    { id = "a", addr = "node-a:7947" },
    { id = "a", addr = "node-b:7947" },
]
"#,
    );
    let err = result.unwrap_err();
    assert!(err.to_string().contains("Duplicate cluster member 'a'"));
}

#[test]
fn test_node_not_among_members() {
    let result = Config::parse(
        r#"
[cluster]
node_id = "z"
members = [
    { id = "a", addr = "node-a:7947" },
    { id = "b", addr = "node-b:7947" },
]
"#,
    );
    let err = result.unwrap_err();
    assert!(err.to_string().contains("'z' is not listed"));
}

#[test]
fn test_gossip_mode_ignores_members() {
    let result = Config::parse(
        r#"
[cluster]
mode = "gossip"
node_id = "z"
members = [{ id = "a", addr = "node-a:7947" }]
"#,
    );
    assert!(result.is_ok());
}

#[test]
fn test_parse_error() {
    let result = Config::parse("[router\nbind = ");
    assert!(matches!(result, Err(ConfigError::Parse(_))));
}
