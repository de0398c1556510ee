//! CLI argument parsing tests

use crate::{Cli, Commands, ConfigAction, OutputFormat};
use clap::Parser;
use switchyard_core::policy::Stage;

#[test]
fn test_promote_defaults_to_canary() {
    let cli = Cli::try_parse_from(["switchyard", "promote", "pkg.json"]).unwrap();
    match cli.command {
        Commands::Promote {
            package,
            stage,
            skip_preflight,
            force,
        } => {
            assert_eq!(package, std::path::PathBuf::from("pkg.json"));
            assert_eq!(stage, Stage::Canary);
            assert!(!skip_preflight);
            assert!(!force);
        }
        _ => panic!("expected promote"),
    }
    assert_eq!(cli.format, OutputFormat::Text);
}

#[test]
fn test_stage_is_parsed() {
    let cli = Cli::try_parse_from(["switchyard", "rollback", "--stage", "production"]).unwrap();
    assert!(matches!(cli.command, Commands::Rollback { stage: Stage::Prod }));

    assert!(Cli::try_parse_from(["switchyard", "rollback", "--stage", "staging"]).is_err());
}

#[test]
fn test_global_flags() {
    let cli = Cli::try_parse_from(["switchyard", "status", "--format", "json", "-q"]).unwrap();
    assert_eq!(cli.format, OutputFormat::Json);
    assert!(cli.quiet);
    assert!(matches!(cli.command, Commands::Status { stage: None }));
}

#[test]
fn test_config_actions() {
    let cli = Cli::try_parse_from(["switchyard", "config", "set", "canary.traffic_percent", "10"]).unwrap();
    match cli.command {
        Commands::Config {
            action: ConfigAction::Set { key, value },
        } => {
            assert_eq!(key, "canary.traffic_percent");
            assert_eq!(value, "10");
        }
        _ => panic!("expected config set"),
    }
}

#[test]
fn test_replay_flags() {
    let cli = Cli::try_parse_from(["switchyard", "replay", "--refit", "--dry-run", "--stage", "canary"]).unwrap();
    match cli.command {
        Commands::Replay {
            archive,
            stage,
            refit,
            dry_run,
        } => {
            assert!(archive.is_none());
            assert_eq!(stage, Some(Stage::Canary));
            assert!(refit);
            assert!(dry_run);
        }
        _ => panic!("expected replay"),
    }
}
