//! Clap derive structures for the `nutly` CLI.
//!
//! Defines the command tree, global flags, and shared argument groups.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// nutly -- command-line client for Network UPS Tools
#[derive(Debug, Parser)]
#[command(
    name = "nutly",
    version,
    about = "Query and control UPS devices through a NUT upsd server",
    long_about = "Command-line interface to Network UPS Tools.\n\n\
        Talks the upsd line protocol (default port 3493) to list devices,\n\
        read and write variables, run instant commands and monitor hosts.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// upsd host as hostname[:port]
    #[arg(
        long,
        short = 'H',
        env = "UPS_HOST",
        default_value = "localhost",
        global = true
    )]
    pub host: String,

    /// Username as defined in upsd.users
    #[arg(long, short = 'U', env = "UPS_USERNAME", global = true)]
    pub username: Option<String>,

    /// Password as defined in upsd.users
    #[arg(
        long,
        short = 'P',
        env = "UPS_PASSWORD",
        global = true,
        hide_env_values = true
    )]
    pub password: Option<String>,

    /// Response timeout in seconds (1-60)
    #[arg(
        long,
        short = 't',
        default_value_t = 5,
        value_parser = clap::value_parser!(u64).range(1..=60),
        global = true
    )]
    pub timeout: u64,

    /// Print protocol traffic (-D debug, -DD trace)
    #[arg(long, short = 'D', action = clap::ArgAction::Count, global = true)]
    pub debug: u8,

    /// Output format
    #[arg(long, short = 'o', default_value = "json", global = true)]
    pub output: OutputFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    JsonCompact,
    Yaml,
}

// ── Commands ─────────────────────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Print upsd info: versions and every device with its data
    Info(InfoArgs),

    /// Print the value of a variable
    Get(GetArgs),

    /// Set a read-write variable
    Set(SetArgs),

    /// Run an instant command
    #[command(name = "command")]
    Instcmd(InstcmdArgs),

    /// Poll every configured host and print status updates
    Monitor(MonitorArgs),

    /// Inspect the configuration file
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

#[derive(Debug, Args)]
pub struct InfoArgs {
    /// List variable and command descriptions and variable types
    #[arg(long, short = 'v')]
    pub verbose: bool,
}

/// Device selection shared by the single-device commands.
#[derive(Debug, Args)]
pub struct DeviceArg {
    /// Device name; defaults to the only device on the server
    #[arg(long, short = 'd', env = "UPS_DEVICE")]
    pub device: Option<String>,
}

#[derive(Debug, Args)]
pub struct GetArgs {
    /// Variable name, e.g. battery.charge
    pub variable: String,

    #[command(flatten)]
    pub device: DeviceArg,
}

#[derive(Debug, Args)]
pub struct SetArgs {
    /// Variable name, e.g. battery.charge.low
    pub variable: String,

    /// New value
    pub value: String,

    #[command(flatten)]
    pub device: DeviceArg,
}

#[derive(Debug, Args)]
pub struct InstcmdArgs {
    /// Instant command, e.g. test.battery.start
    pub command: String,

    #[command(flatten)]
    pub device: DeviceArg,
}

#[derive(Debug, Args)]
pub struct MonitorArgs {
    /// Config file to read hosts from
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the config file location
    Path,

    /// Print the effective configuration, passwords masked
    Show {
        /// Config file to read instead of the default
        #[arg(long, short = 'c')]
        config: Option<PathBuf>,
    },
}

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn command_tree_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn globals_are_accepted_after_the_subcommand() {
        let cli = Cli::try_parse_from([
            "nutly", "get", "battery.charge", "-H", "nas:3494", "-t", "9", "-d", "ups",
        ])
        .unwrap();
        assert_eq!(cli.global.host, "nas:3494");
        assert_eq!(cli.global.timeout, 9);
        let Command::Get(args) = cli.command else {
            panic!("expected get");
        };
        assert_eq!(args.variable, "battery.charge");
        assert_eq!(args.device.device.as_deref(), Some("ups"));
    }

    #[test]
    fn timeout_outside_range_is_rejected() {
        assert!(Cli::try_parse_from(["nutly", "-t", "0", "info"]).is_err());
        assert!(Cli::try_parse_from(["nutly", "-t", "61", "info"]).is_err());
        assert!(Cli::try_parse_from(["nutly", "-t", "60", "info"]).is_ok());
    }

    #[test]
    fn debug_flag_counts() {
        let cli = Cli::try_parse_from(["nutly", "-DD", "info", "-v"]).unwrap();
        assert_eq!(cli.global.debug, 2);
        assert!(matches!(cli.command, Command::Info(InfoArgs { verbose: true })));
    }
}
