use std::io::Write;
use std::time::Duration;

use super::loading::{apply_file_config, parse_config};
use super::*;

const SAMPLE: &str = r#"
[storage]
data_dir = "/var/lib/mailcheck"

[scaling]
tiers = [{ up_to = 5, partitions = 1 }, { up_to = 100, partitions = 3 }]
overflow_partitions = 6
max_partitions = 6

[timeouts]
poll_interval_ms = 250
inactivity_secs = 60

[bounce]
escalation_attempts = 4

[[accounts]]
address = "probe@example.com"
credential = "s3cret"
outbound_host = "smtp.example.com"
inbound_host = "imap.example.com"
"#;

#[test]
fn file_overrides_only_what_it_names() {
    let mut config = Config::default();
    let file = parse_config(SAMPLE).expect("sample parses");
    apply_file_config(&mut config, file).expect("sample applies");

    assert_eq!(config.storage.data_dir.to_str(), Some("/var/lib/mailcheck"));
    assert_eq!(config.scaling.partitions_for(50), 3);
    assert_eq!(config.scaling.partitions_for(1_000), 6);
    assert_eq!(config.orchestrator.poll_interval, Duration::from_millis(250));
    assert_eq!(config.orchestrator.inactivity, Duration::from_secs(60));
    assert_eq!(config.orchestrator.max_wait, Duration::from_secs(30 * 60));
    assert_eq!(config.bounce.escalation_attempts, 4);
    assert_eq!(config.bounce.max_concurrent_sends, 4);

    let account = &config.accounts[0];
    assert_eq!(account.outbound_port, 587);
    assert_eq!(account.inbound_port, 993);
}

#[test]
fn empty_file_keeps_defaults() {
    let mut config = Config::default();
    apply_file_config(&mut config, parse_config("").expect("empty parses")).expect("applies");
    assert_eq!(config.scaling, crate::jobs::ScalingPolicy::default());
    assert!(config.accounts.is_empty());
}

#[test]
fn unknown_keys_are_rejected() {
    assert!(parse_config("[timeouts]\npoll = 3\n").is_err());
}

#[test]
fn non_monotonic_tiers_are_invalid() {
    let toml = r#"
[scaling]
tiers = [{ up_to = 10, partitions = 4 }, { up_to = 50, partitions = 2 }]
"#;
    let mut config = Config::default();
    let err = apply_file_config(&mut config, parse_config(toml).expect("parses"))
        .expect_err("decreasing tiers must fail");
    assert!(matches!(err, ConfigError::Invalid(_)));
}

#[test]
fn builder_reads_file_and_validates_accounts() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    writeln!(
        file,
        "[[accounts]]\naddress = \"probe@example.com\"\ncredential = \"\"\noutbound_host = \"smtp\"\ninbound_host = \"imap\""
    )
    .expect("write config");

    let err = ConfigBuilder::new()
        .file(file.path())
        .build()
        .expect_err("blank credential must fail");
    assert!(err.to_string().contains("credential"));
}

#[test]
fn builder_overrides_win_over_file() {
    let config = ConfigBuilder::new()
        .data_dir("/tmp/elsewhere")
        .accounts(Vec::new())
        .build()
        .expect("defaults are valid");
    assert_eq!(config.storage.data_dir.to_str(), Some("/tmp/elsewhere"));
}

#[test]
fn missing_file_reports_path() {
    let err = ConfigBuilder::new()
        .file("/definitely/not/here.toml")
        .build()
        .expect_err("missing file");
    assert!(matches!(err, ConfigError::Read { .. }));
}

#[test]
fn account_debug_redacts_credential() {
    let account = Account {
        address: "probe@example.com".into(),
        credential: "hunter2".into(),
        outbound_host: "smtp.example.com".into(),
        outbound_port: 587,
        inbound_host: "imap.example.com".into(),
        inbound_port: 993,
    };
    let rendered = format!("{account:?}");
    assert!(!rendered.contains("hunter2"));
    assert!(rendered.contains("<redacted>"));
}
