use apis::{VolumeKind, GIB, MIB};
use std::collections::HashMap;
use system::{
    format_bytes, parse_bytes, required_tools, AuthConfig, CommandRunner, Environment, HostCommandRunner,
    NodeAnnotationConfig, SystemError,
};

fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key| vars.get(key).cloned()
}

#[test]
fn test_environment_from_lookup() {
    let env = Environment::from_lookup(lookup(&[
        ("NODENAME", "node-1"),
        ("NAMESPACE", "hwameistor"),
        ("NODE_ANNOTATION_KEY_STORAGE_IPV4", "example.io/storage-ip"),
    ]))
    .unwrap();
    assert_eq!(env.require_node_name().unwrap(), "node-1");
    assert_eq!(env.namespace, "hwameistor");
    assert_eq!(env.storage_ip_annotation_key.as_deref(), Some("example.io/storage-ip"));
    assert!(!env.auth.enabled);

    let bare = Environment::from_lookup(lookup(&[("NODE_ANNOTATION_KEY_STORAGE_IPV4", "")])).unwrap();
    assert!(bare.storage_ip_annotation_key.is_none());
    assert!(matches!(bare.require_node_name(), Err(SystemError::Environment(_))));
}

#[test]
fn test_environment_auth_settings() {
    let env = Environment::from_lookup(lookup(&[
        ("EnableAuth", "TRUE"),
        ("AuthAccessId", "admin"),
        ("AuthSecretKey", "s3cret"),
    ]))
    .unwrap();
    assert_eq!(
        env.auth,
        AuthConfig {
            enabled: true,
            access_id: "admin".to_string(),
            secret_key: "s3cret".to_string(),
        }
    );

    let missing_secret = Environment::from_lookup(lookup(&[("EnableAuth", "true"), ("AuthAccessId", "admin")]));
    assert!(matches!(missing_secret, Err(SystemError::Environment(_))));

    let garbage = Environment::from_lookup(lookup(&[("EnableAuth", "sometimes")]));
    assert!(matches!(garbage, Err(SystemError::Environment(_))));
}

#[test]
fn test_auth_verify() {
    assert!(AuthConfig::default().verify(None, None));

    let auth = AuthConfig {
        enabled: true,
        access_id: "admin".to_string(),
        secret_key: "s3cret".to_string(),
    };
    assert!(auth.verify(Some("admin"), Some("s3cret")));
    assert!(!auth.verify(Some("admin"), Some("wrong")));
    assert!(!auth.verify(Some("admin"), None));
    assert!(!auth.verify(None, None));
}

#[test]
fn test_node_annotation_parse() {
    let config = NodeAnnotationConfig::parse(
        r#"{"storageIP":"10.6.1.20","topology":{"zone":"z1","region":"r1"},
            "localStorageConfig":{"volumeKind":"RAM","ramDiskTotalCapacity":"2Gi"}}"#,
    )
    .unwrap();
    assert_eq!(config.storage_ip, "10.6.1.20");
    assert_eq!(config.topology.as_ref().map(|t| t.zone.as_str()), Some("z1"));
    assert_eq!(config.volume_kind(), VolumeKind::Ram);
    assert_eq!(config.ram_disk_total_capacity_bytes().unwrap(), 2 * GIB);

    let empty = NodeAnnotationConfig::parse("{}").unwrap();
    assert_eq!(empty.volume_kind(), VolumeKind::Lvm);
    assert_eq!(empty.ram_disk_total_capacity_bytes().unwrap(), 0);
}

#[test]
fn test_node_annotation_rejects_bad_values() {
    for raw in [
        r#"{"storageIP":"not-an-ip"}"#,
        r#"{"storageIP":"fe80::1"}"#,
        r#"{"storageIp":"10.6.1.20"}"#,
        r#"{"localStorageConfig":{"ramDiskTotalCapacity":"lots"}}"#,
        "not json",
    ] {
        assert!(
            matches!(NodeAnnotationConfig::parse(raw), Err(SystemError::NodeConfig(_)) | Err(SystemError::Quantity(_))),
            "{} should be rejected",
            raw
        );
    }
}

#[test]
fn test_byte_quantities() {
    assert_eq!(parse_bytes("4096").unwrap(), 4096);
    assert_eq!(parse_bytes("512Mi").unwrap(), 512 * MIB);
    assert_eq!(parse_bytes(" 10G ").unwrap(), 10 * GIB);
    assert_eq!(parse_bytes("1k").unwrap(), 1000);
    assert_eq!(parse_bytes("2Ti").unwrap(), 2 * 1024 * GIB);
    assert!(matches!(parse_bytes("Gi"), Err(SystemError::Quantity(_))));
    assert!(matches!(parse_bytes("5Pi"), Err(SystemError::Quantity(_))));
    assert!(matches!(parse_bytes("9999999999Ti"), Err(SystemError::Quantity(_))));

    assert_eq!(format_bytes(0), "0");
    assert_eq!(format_bytes(1000), "1000");
    assert_eq!(format_bytes(4 * MIB), "4Mi");
    assert_eq!(format_bytes(GIB + MIB), "1025Mi");
    assert_eq!(format_bytes(3 * 1024 * GIB), "3Ti");
}

#[test]
fn test_required_tools_cover_lvm() {
    let tools = required_tools();
    assert!(tools.contains(&"lvcreate"));
    assert!(tools.contains(&"udevadm"));
}

#[tokio::test]
async fn test_host_runner_reports_exit_status() {
    let runner = HostCommandRunner;
    let args = vec!["-c".to_string(), "echo out; echo err >&2; exit 3".to_string()];
    let output = runner.run("sh", &args).await.unwrap();
    assert_eq!(output.code, 3);
    assert_eq!(output.stdout.trim(), "out");
    assert_eq!(output.stderr.trim(), "err");

    match runner.run_checked("sh", &args).await {
        Err(SystemError::CommandFailed { code, stderr, .. }) => {
            assert_eq!(code, 3);
            assert_eq!(stderr, "err");
        }
        other => panic!("expected a command failure, got {:?}", other),
    }

    let ok = runner.run_checked("sh", &["-c".to_string(), "printf ready".to_string()]).await;
    assert_eq!(ok.unwrap(), "ready");
}
