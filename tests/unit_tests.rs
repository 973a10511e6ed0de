use clap::Parser;
use loyalty_clips::{RunOpts, Settings, StoreKind};
use std::time::Duration;

#[derive(Parser)]
struct TestCli {
    #[command(flatten)]
    opts: RunOpts,
}

#[test]
fn test_run_opts_from_flags() {
    let cli = TestCli::try_parse_from([
        "loyalty-clips",
        "--store",
        "postgres",
        "--nodes",
        "10.0.0.5,10.0.0.6",
        "--interval",
        "250ms",
        "--settle",
        "0",
        "--batch-size",
        "50",
        "--dry-run",
    ])
    .unwrap();

    let settings = Settings::resolve(&cli.opts).unwrap();
    assert_eq!(settings.store, StoreKind::Postgres);
    assert_eq!(settings.nodes, vec!["10.0.0.5", "10.0.0.6"]);
    assert_eq!(settings.interval, Duration::from_millis(250));
    assert_eq!(settings.settle, Duration::ZERO);
    assert_eq!(settings.batch_size, 50);
    assert!(settings.dry_run);
}

#[test]
fn test_invalid_duration_flag() {
    assert!(TestCli::try_parse_from(["loyalty-clips", "--interval", "soon"]).is_err());
    assert!(TestCli::try_parse_from(["loyalty-clips", "--store", "cassandra"]).is_err());
}

#[test]
fn test_missing_config_file() {
    let opts = RunOpts {
        config: Some("/nonexistent/loyalty.toml".into()),
        ..RunOpts::default()
    };
    let err = Settings::resolve(&opts).unwrap_err();
    assert!(format!("{err:#}").contains("Failed to read config file"));
}
