use clap::Parser;
use std::path::PathBuf;

use trapline::cli::commands::config::ConfigCommand;
use trapline::cli::{Cli, Commands};

#[test]
fn test_parse_run_with_overrides() {
    let cli = Cli::try_parse_from([
        "trapline",
        "run",
        "--preset",
        "kymograph",
        "--seed",
        "11",
        "--max-trials",
        "3",
        "--abort-on-failure",
        "--export-dir",
        "/data/out",
    ])
    .unwrap();

    match cli.command {
        Commands::Run(args) => {
            assert_eq!(args.protocol.preset.as_deref(), Some("kymograph"));
            assert_eq!(args.seed, Some(11));
            assert_eq!(args.max_trials, Some(3));
            assert!(args.abort_on_failure);
            assert_eq!(args.export_dir, Some(PathBuf::from("/data/out")));
        }
        other => panic!("Wrong command: {other:?}"),
    }
    assert!(!cli.json);
}

#[test]
fn test_global_flags_after_subcommand() {
    let cli = Cli::try_parse_from([
        "trapline",
        "validate",
        "--protocol",
        "hold.yaml",
        "--json",
        "--config",
        "lab.yaml",
    ])
    .unwrap();

    assert!(cli.json);
    assert_eq!(cli.config, Some(PathBuf::from("lab.yaml")));
    match cli.command {
        Commands::Validate(args) => {
            assert_eq!(args.protocol.protocol, Some(PathBuf::from("hold.yaml")));
            assert!(args.protocol.preset.is_none());
        }
        other => panic!("Wrong command: {other:?}"),
    }
}

#[test]
fn test_preset_and_protocol_conflict() {
    let result = Cli::try_parse_from([
        "trapline",
        "run",
        "--preset",
        "fd-curves",
        "--protocol",
        "hold.yaml",
    ]);
    assert!(result.is_err());
}

#[test]
fn test_parse_config_show() {
    let cli = Cli::try_parse_from(["trapline", "config", "show"]).unwrap();
    match cli.command {
        Commands::Config(args) => assert!(matches!(args.command, ConfigCommand::Show)),
        other => panic!("Wrong command: {other:?}"),
    }
}

#[test]
fn test_missing_subcommand_is_rejected() {
    assert!(Cli::try_parse_from(["trapline"]).is_err());
}
