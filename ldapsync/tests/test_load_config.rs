use ldapsync::load_config::{load_config, DestinationKind, NotificationSection};
use ldapsync_core::Level;
use serial_test::serial;
use std::env;
use std::fs::write;
use tempfile::NamedTempFile;

const FULL_CONFIG: &str = r#"
directory:
  url: ldaps://ldap.example.org
  base_dn: ou=Group,dc=example,dc=org
notification:
  type: command
  program: mail
  args: ["-s", "ldapsync report", "root@example.org"]
report_level: info
concurrency: 4
timeout_secs: 10
destinations:
  - type: google_groups
    name: lists
    domain: example.org
    bot_user: syncbot
    pairs:
      - source: officers
        destination: officers@example.org
      - source: staff
        destination: staff@example.org
  - type: discourse
    name: forum
    base_url: https://forum.example.org
    pairs:
      - source: staff
        destination: staff
"#;

fn config_file(yaml: &str) -> NamedTempFile {
    let file = NamedTempFile::new().expect("temp file");
    write(file.path(), yaml).unwrap();
    file
}

fn clear_bind_env() {
    env::remove_var("LDAP_BIND_DN");
    env::remove_var("LDAP_BIND_PASSWORD");
}

#[test]
#[serial]
fn test_load_full_config() {
    clear_bind_env();
    let file = config_file(FULL_CONFIG);

    let config = load_config(file.path()).expect("Config should load");

    assert_eq!(config.directory.url, "ldaps://ldap.example.org");
    assert_eq!(config.directory.base_dn, "ou=Group,dc=example,dc=org");
    assert!(config.directory.bind.is_none());
    assert_eq!(config.report_level, Level::Info);
    assert_eq!(config.concurrency, 4);
    assert_eq!(config.timeout_secs, 10);

    match &config.notification {
        NotificationSection::Command { program, args } => {
            assert_eq!(program, "mail");
            assert_eq!(args.len(), 3);
        }
        other => panic!("Unexpected notification section: {other:?}"),
    }

    assert_eq!(config.destinations.len(), 2);
    let lists = &config.destinations[0];
    assert_eq!(lists.name, "lists");
    match &lists.kind {
        DestinationKind::GoogleGroups {
            domain,
            bot_user,
            base_url,
        } => {
            assert_eq!(domain, "example.org");
            assert_eq!(bot_user.as_deref(), Some("syncbot"));
            assert!(base_url.is_none());
        }
        other => panic!("Unexpected destination kind: {other:?}"),
    }
    let pairs = lists.pair_config();
    assert_eq!(pairs.destination, "lists");
    assert_eq!(pairs.pairs[1].source, "staff");
    assert_eq!(pairs.pairs[1].destination, "staff@example.org");

    match &config.destinations[1].kind {
        DestinationKind::Discourse { base_url, bot_user } => {
            assert_eq!(base_url, "https://forum.example.org");
            assert!(bot_user.is_none());
        }
        other => panic!("Unexpected destination kind: {other:?}"),
    }
}

#[test]
#[serial]
fn test_defaults_apply_to_minimal_config() {
    clear_bind_env();
    let file = config_file(
        r#"
directory:
  url: ldap://localhost
  base_dn: dc=example,dc=org
notification:
  type: webhook
  url: https://hooks.example.org/report
"#,
    );

    let config = load_config(file.path()).expect("Minimal config should load");
    assert_eq!(config.report_level, Level::Warning);
    assert_eq!(config.concurrency, 1);
    assert_eq!(config.timeout_secs, 30);
    assert!(config.destinations.is_empty());
    match &config.notification {
        NotificationSection::Webhook { url, subject } => {
            assert_eq!(url, "https://hooks.example.org/report");
            assert_eq!(subject, "ldapsync report");
        }
        other => panic!("Unexpected notification section: {other:?}"),
    }
}

#[test]
#[serial]
fn test_bind_credentials_come_from_env() {
    env::set_var("LDAP_BIND_DN", "cn=sync,dc=example,dc=org");
    env::set_var("LDAP_BIND_PASSWORD", "hunter2");
    let file = config_file(FULL_CONFIG);

    let config = load_config(file.path()).expect("Config should load");
    clear_bind_env();

    let bind = config.directory.bind.expect("bind credentials");
    assert_eq!(bind.dn, "cn=sync,dc=example,dc=org");
    assert_eq!(bind.password, "hunter2");
}

#[test]
#[serial]
fn test_bind_dn_without_password_fails() {
    clear_bind_env();
    env::set_var("LDAP_BIND_DN", "cn=sync,dc=example,dc=org");
    let file = config_file(FULL_CONFIG);

    let result = load_config(file.path());
    clear_bind_env();
    assert!(result.is_err());
}

#[test]
#[serial]
fn test_unknown_destination_type_fails() {
    clear_bind_env();
    let file = config_file(
        r#"
directory:
  url: ldap://localhost
  base_dn: dc=example,dc=org
notification:
  type: command
  program: cat
destinations:
  - type: mailman
    name: lists
    pairs: []
"#,
    );

    let err = load_config(file.path()).unwrap_err();
    assert!(err.to_string().contains("Failed to parse config YAML"), "{err}");
}

#[test]
#[serial]
fn test_duplicate_destination_names_fail() {
    clear_bind_env();
    let file = config_file(
        r#"
directory:
  url: ldap://localhost
  base_dn: dc=example,dc=org
notification:
  type: command
  program: cat
destinations:
  - type: discourse
    name: forum
    base_url: https://a.example.org
  - type: discourse
    name: forum
    base_url: https://b.example.org
"#,
    );

    let err = load_config(file.path()).unwrap_err();
    assert!(err.to_string().contains("Duplicate destination name"), "{err}");
}

#[test]
#[serial]
fn test_zero_concurrency_fails() {
    clear_bind_env();
    let file = config_file(
        r#"
directory:
  url: ldap://localhost
  base_dn: dc=example,dc=org
notification:
  type: command
  program: cat
concurrency: 0
"#,
    );

    assert!(load_config(file.path()).is_err());
}

#[test]
#[serial]
fn test_missing_file_fails() {
    let err = load_config("/nonexistent/ldapsync.yaml").unwrap_err();
    assert!(err.to_string().contains("Failed to read config file"), "{err}");
}

#[test]
#[serial]
fn test_report_level_is_case_insensitive() {
    clear_bind_env();
    let file = config_file(
        r#"
directory:
  url: ldap://localhost
  base_dn: dc=example,dc=org
notification:
  type: command
  program: cat
report_level: WARNING
"#,
    );

    let config = load_config(file.path()).expect("Upper-case report level should load");
    assert_eq!(config.report_level, Level::Warning);
}
