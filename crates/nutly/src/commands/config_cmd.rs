//! Config subcommand handlers.

use crate::cli::{ConfigArgs, ConfigCommand};
use crate::error::CliError;
use crate::output;

pub fn handle(args: &ConfigArgs) -> Result<(), CliError> {
    match &args.command {
        ConfigCommand::Path => output::print_output(&nutly_config::config_path().display().to_string()),
        ConfigCommand::Show { config } => {
            let cfg = nutly_config::load_config(config.as_deref())?;
            output::print_output(&nutly_config::render_redacted(&cfg)?)
        }
    }
}
