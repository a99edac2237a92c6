//! Command dispatch: bridges CLI args -> engine / supervisor -> output formatting.

pub mod config_cmd;
pub mod gate;
pub mod scan;
pub mod token;
pub mod util;

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

/// Dispatch a venue-bound command to the appropriate handler.
pub async fn dispatch(cmd: Command, global: &GlobalOpts) -> Result<(), CliError> {
    match cmd {
        Command::Scan(args) => scan::handle(args, global).await,
        Command::Token(args) => token::handle(args, global).await,
        Command::Gate(args) => gate::handle(args, global).await,
        // Config and Completions are handled before dispatch
        Command::Config(_) | Command::Completions(_) => unreachable!(),
    }
}
