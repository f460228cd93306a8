// /////////////////////////////////////////////////////////////////////////////
// CRDT Storage Engine
// Copyright (c) 2025 A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Command-Line Interface Module
//!
//! Bootstrap-layer CLI handling with security-first design.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │  1. parser::parse()                 │  Parse CLI with clap
//! └─────────────────┬───────────────────┘
//!                   ↓
//! ┌─────────────────────────────────────┐
//! │  2. validator::validate()           │  Security validation
//! └─────────────────┬───────────────────┘
//!                   ↓
//! ┌─────────────────────────────────────┐
//! │  3. ValidatedCli                    │  Safe, validated config
//! └─────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - `parser` - CLI structure and clap parsing
//! - `validator` - Security validation layer

pub mod parser;
pub mod validator;

pub use parser::{parse_cli, Cli, Commands};
pub use validator::{ParseError, SecureArgParser};

use std::path::PathBuf;

/// Validated CLI configuration
///
/// Holds all CLI arguments after security validation. Paths that must
/// already exist are canonicalized; paths that the command will create
/// (storage roots, WAL directories) are checked for dangerous patterns only.
#[derive(Debug, Clone)]
pub struct ValidatedCli {
    pub command: ValidatedCommand,
    pub verbose: bool,
    pub config: Option<PathBuf>,
    pub node_addr: String,
    pub connect_timeout_ms: u64,
}

/// Validated command variants, one per operator-surface action
/// plus the ambient `Ping`/`Status`/`Validate` additions.
#[derive(Debug, Clone)]
pub enum ValidatedCommand {
    Start {
        storage_path: Option<PathBuf>,
        wal_path: Option<PathBuf>,
        bind: Option<String>,
        partition_id: Option<String>,
    },
    Stop,
    ConsolidateNow,
    CleanupNow,
    Repartition { source: String },
    Ping,
    Status,
    Validate { config: PathBuf },
}

/// Parse and validate CLI arguments
///
/// 1. Parse CLI with clap
/// 2. Validate all paths and strings with `SecureArgParser`
/// 3. Return `ValidatedCli` on success
///
/// # Errors
///
/// Returns `ParseError` if any validation fails
pub fn parse_and_validate() -> Result<ValidatedCli, ParseError> {
    let cli = parse_cli();
    validate_cli(cli)
}

/// Validate parsed CLI arguments
fn validate_cli(cli: Cli) -> Result<ValidatedCli, ParseError> {
    let config = if let Some(ref path) = cli.config {
        SecureArgParser::validate_argument(&path.to_string_lossy())?;
        Some(path.clone())
    } else {
        None
    };

    SecureArgParser::validate_argument(&cli.node_addr)?;

    if cli.connect_timeout_ms == 0 {
        return Err(ParseError::InvalidValue {
                arg: "connect-timeout-ms".to_string(),
                reason: "must be greater than 0".to_string(),
            });
    }

    let command = match cli.command {
        Commands::Start { storage_path, wal_path, bind, partition_id } => {
            if let Some(ref path) = storage_path {
                SecureArgParser::validate_argument(&path.to_string_lossy())?;
            }
            if let Some(ref path) = wal_path {
                SecureArgParser::validate_argument(&path.to_string_lossy())?;
            }
            if let Some(ref addr) = bind {
                SecureArgParser::validate_argument(addr)?;
            }
            if let Some(ref pid) = partition_id {
                SecureArgParser::validate_argument(pid)?;
            }
            ValidatedCommand::Start { storage_path, wal_path, bind, partition_id }
        }
        Commands::Stop => ValidatedCommand::Stop,
        Commands::ConsolidateNow => ValidatedCommand::ConsolidateNow,
        Commands::CleanupNow => ValidatedCommand::CleanupNow,
        Commands::Repartition { source } => {
            SecureArgParser::validate_argument(&source)?;
            ValidatedCommand::Repartition { source }
        }
        Commands::Ping => ValidatedCommand::Ping,
        Commands::Status => ValidatedCommand::Status,
        Commands::Validate { config } => {
            let validated_config = SecureArgParser::validate_path(&config.to_string_lossy())?;
            ValidatedCommand::Validate { config: validated_config }
        }
    };

    Ok(ValidatedCli {
            command,
            verbose: cli.verbose,
            config,
            node_addr: cli.node_addr,
            connect_timeout_ms: cli.connect_timeout_ms,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_cli(command: Commands) -> Cli {
        Cli {
            command,
            verbose: false,
            config: None,
            node_addr: "127.0.0.1:7878".to_string(),
            connect_timeout_ms: 5000,
        }
    }

    #[test]
    fn validates_start_command() {
        let cli = base_cli(Commands::Start {
                storage_path: Some(PathBuf::from("/var/lib/crdt/chunks")),
                wal_path: Some(PathBuf::from("/var/lib/crdt/wal")),
                bind: Some("0.0.0.0:7878".to_string()),
                partition_id: Some("p0".to_string()),
            });
        let validated = validate_cli(cli).unwrap();
        assert!(matches!(validated.command, ValidatedCommand::Start { .. }));
    }

    #[test]
    fn rejects_dangerous_partition_id() {
        let cli = base_cli(Commands::Repartition {
                source: "p0; rm -rf /".to_string(),
            });
        assert!(matches!(validate_cli(cli), Err(ParseError::DangerousPattern { .. })));
    }

    #[test]
    fn rejects_zero_connect_timeout() {
        let mut cli = base_cli(Commands::Ping);
        cli.connect_timeout_ms = 0;
        assert!(matches!(validate_cli(cli), Err(ParseError::InvalidValue { .. })));
    }

    #[test]
    fn validates_simple_commands() {
        for command in [Commands::Stop, Commands::ConsolidateNow, Commands::CleanupNow, Commands::Ping, Commands::Status] {
            let cli = base_cli(command);
            assert!(validate_cli(cli).is_ok());
        }
    }
}
