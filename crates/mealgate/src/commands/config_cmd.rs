//! Config subcommand handlers.

use std::io::Read;

use mealgate_config::{self as config, Config};

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts, OutputFormat};
use crate::error::CliError;
use crate::output;

use super::util;

// ── Helpers ─────────────────────────────────────────────────────────

/// Copy of `cfg` safe to print: plaintext API keys are masked.
fn redacted(cfg: &Config) -> Config {
    let mut cfg = cfg.clone();
    for gate in &mut cfg.gates {
        if gate.api_key.is_some() {
            gate.api_key = Some("****".into());
        }
    }
    cfg
}

// ── Handler ─────────────────────────────────────────────────────────

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Init { force } => {
            let path = util::config_file(global);
            if path.exists() && !force {
                return Err(CliError::ConfigExists {
                    path: path.display().to_string(),
                });
            }
            config::save_config_to(&Config::default(), &path)?;
            if !global.quiet {
                eprintln!("✓ Configuration written to {}", path.display());
                eprintln!("  Next: set data_file and add [[gates]] entries");
            }
            Ok(())
        }

        ConfigCommand::Show => {
            let cfg = redacted(&util::load_config(global)?);
            let out = match global.output {
                OutputFormat::Table | OutputFormat::Plain => toml::to_string_pretty(&cfg)?,
                ref format => output::render_single(format, &cfg, |_| String::new(), |_| {
                    String::new()
                })?,
            };
            output::print_output(out.trim_end(), global.quiet);
            Ok(())
        }

        ConfigCommand::Path => {
            println!("{}", util::config_file(global).display());
            Ok(())
        }

        ConfigCommand::SetKey { gate } => {
            let cfg = util::load_config(global)?;
            if !cfg.gates.iter().any(|g| g.id == gate) {
                return Err(CliError::NotFound {
                    resource_type: "gate".into(),
                    identifier: gate,
                    list_command: "gate list".into(),
                });
            }

            let mut key = String::new();
            std::io::stdin().read_to_string(&mut key)?;
            let key = key.trim();
            if key.is_empty() {
                return Err(CliError::Validation {
                    field: "api_key".into(),
                    reason: "API key cannot be empty".into(),
                });
            }

            config::store_gate_api_key(&gate, key)?;
            if !global.quiet {
                eprintln!("✓ API key for gate '{gate}' stored in system keyring");
            }
            Ok(())
        }
    }
}
