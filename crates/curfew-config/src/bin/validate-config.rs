//! Config validation CLI tool
//!
//! Validates a curfewd configuration file and reports any errors.

use curfew_util::{default_config_path, format_duration};
use std::path::PathBuf;
use std::process::ExitCode;

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();

    let config_path = match args.get(1) {
        Some(path) => PathBuf::from(path),
        None => {
            let default_path = default_config_path();
            eprintln!("Usage: validate-config [config-file]");
            eprintln!();
            eprintln!("Validates a curfewd configuration file.");
            eprintln!();
            eprintln!("If no path is provided, uses: {}", default_path.display());
            eprintln!();
            eprintln!("Example:");
            eprintln!("  validate-config {}", default_path.display());
            return ExitCode::from(2);
        }
    };

    if !config_path.exists() {
        eprintln!("Error: Configuration file not found: {}", config_path.display());
        return ExitCode::from(1);
    }

    match curfew_config::load_config(&config_path) {
        Ok(policy) => {
            println!("✓ Configuration is valid");
            println!();
            println!("Summary:");
            println!("  Config version: {}", curfew_config::CURRENT_CONFIG_VERSION);
            println!("  Data dir: {}", policy.service.data_dir.display());
            println!("  Log dir: {}", policy.service.log_dir.display());
            println!(
                "  Tick interval: {}",
                format_duration(policy.engine.tick_interval)
            );
            println!(
                "  Warning threshold: {}",
                format_duration(policy.engine.warning_threshold)
            );
            println!(
                "  Default limit: {}",
                format_duration(policy.engine.default_limit)
            );
            println!(
                "  Enforcement: {} attempts every {}",
                policy.enforcement.max_attempts,
                format_duration(policy.enforcement.recheck_interval)
            );
            println!(
                "  Ignored packages: {} (+{} prefixes)",
                policy.feed.ignored_packages.len(),
                policy.feed.ignored_prefixes.len()
            );
            match &policy.remote {
                Some(remote) => println!(
                    "  Remote: {} (grants polled every {})",
                    remote.base_url,
                    format_duration(remote.grant_poll_interval)
                ),
                None => println!("  Remote: offline"),
            }
            match &policy.host.corrective_command {
                Some(argv) => println!("  Corrective command: {}", argv.join(" ")),
                None => println!("  Corrective command: none (log only)"),
            }

            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("✗ Configuration validation failed");
            eprintln!();
            match &e {
                curfew_config::ConfigError::ReadError(io_err) => {
                    eprintln!("Failed to read file: {}", io_err);
                }
                curfew_config::ConfigError::ParseError(parse_err) => {
                    eprintln!("TOML parse error:");
                    eprintln!("  {}", parse_err);
                }
                curfew_config::ConfigError::ValidationFailed { errors } => {
                    eprintln!("Validation errors ({}):", errors.len());
                    for err in errors {
                        eprintln!("  - {}", err);
                    }
                }
                curfew_config::ConfigError::UnsupportedVersion(ver) => {
                    eprintln!(
                        "Unsupported config version: {} (expected {})",
                        ver,
                        curfew_config::CURRENT_CONFIG_VERSION
                    );
                }
            }
            ExitCode::from(1)
        }
    }
}
