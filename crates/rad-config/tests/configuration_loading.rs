//! Loading behaviour for the JSON configuration document.

use std::fs;
use std::path::Path;

use rad_config::{Config, ConfigError, LogFormat};
use rstest::rstest;
use tempfile::TempDir;

const FULL_CONFIG: &str = r#"{
    "log_filter": "rad_server=debug",
    "log_format": "compact",
    "modules": {
        "linelog": {
            "filename": "/var/log/radius/linelog",
            "format": "%{User-Name}"
        },
        "acct_log": {
            "module": "linelog",
            "filename": "syslog",
            "reference": "messages.%{Acct-Status-Type}",
            "messages": { "Start": "started %{User-Name}" }
        }
    },
    "servers": {
        "default": {
            "namespace": "radius",
            "authorize": ["linelog", "ok"],
            "accounting": ["acct_log"]
        }
    }
}"#;

fn write_config(dir: &Path, body: &str) -> std::path::PathBuf {
    let path = dir.join("radiusd.json");
    fs::write(&path, body).expect("write config");
    path
}

#[test]
fn loads_modules_servers_and_logging() {
    let dir = TempDir::new().expect("temp dir");
    let path = write_config(dir.path(), FULL_CONFIG);

    let config = Config::load(&path).expect("load config");

    assert_eq!(config.log_filter(), "rad_server=debug");
    assert_eq!(config.log_format(), LogFormat::Compact);
    assert_eq!(config.modules().len(), 2);

    let acct = config.module("acct_log").expect("acct_log instance");
    assert_eq!(acct.pair("module"), Some("linelog"));
    assert!(acct.reference(".messages.Start").is_some());

    let server = config.server("default").expect("default server");
    assert_eq!(server.pair("namespace"), Some("radius"));
    let authorize = server.subsection("authorize").expect("authorize list");
    let words: Vec<&str> = authorize.pairs().map(|pair| pair.name()).collect();
    assert_eq!(words, ["linelog", "ok"]);
}

#[test]
fn empty_document_uses_defaults() {
    let config = Config::from_json_str("{}").expect("parse empty document");
    assert_eq!(config.log_filter(), "info");
    assert_eq!(config.log_format(), LogFormat::Json);
    assert!(config.modules().is_empty());
    assert!(config.servers().is_empty());
}

#[rstest]
#[case::malformed_json(r#"{ "log_filter": "#)]
#[case::unknown_key(r#"{ "listen": {} }"#)]
#[case::bad_format(r#"{ "log_format": "xml" }"#)]
fn malformed_documents_fail_to_parse(#[case] body: &str) {
    let err = Config::from_json_str(body).expect_err("document should be rejected");
    assert!(matches!(err, ConfigError::Parse { .. }), "got {err:?}");
}

#[test]
fn empty_log_filter_is_rejected() {
    let err = Config::from_json_str(r#"{ "log_filter": "  " }"#).expect_err("should fail");
    assert!(matches!(err, ConfigError::InvalidValue { .. }));
}

#[test]
fn scalar_module_block_is_rejected() {
    let err = Config::from_json_str(r#"{ "modules": { "linelog": "yes" } }"#)
        .expect_err("module block must be an object");
    assert!(matches!(err, ConfigError::Structure { .. }));
}

#[test]
fn missing_file_reports_path() {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("absent.json");
    let err = Config::load(&path).expect_err("file does not exist");
    assert!(matches!(err, ConfigError::Read { .. }));
    assert!(err.to_string().contains("absent.json"));
}
