//! Clap derive structures for the `mealgate` CLI.
//!
//! Defines the complete command tree, global flags, and shared types.
//! Only clap and the standard library are used here so `build.rs` can
//! include this file to render man pages.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// mealgate -- guest meal access control from the command line
#[derive(Debug, Parser)]
#[command(
    name = "mealgate",
    version,
    about = "Guest meal access control: scan decisions and gate control",
    long_about = "Decide restaurant-entry scans against card, guest and meal window\n\
        rules, and supervise the TCP/IP, RS485 and HTTP gates in front of each\n\
        restaurant.",
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
    /// Config file (defaults to the platform config dir)
    #[arg(long, env = "MEALGATE_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Venue data file: cards, guests, restaurants, meal windows (JSON)
    #[arg(long, short = 'd', env = "MEALGATE_DATA", global = true)]
    pub data: Option<PathBuf>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "MEALGATE_OUTPUT",
        default_value = "table",
        global = true
    )]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Log line format on stderr
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// YAML
    Yaml,
    /// Plain text, one value per line (scripting)
    Plain,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines
    Text,
    /// One JSON object per line
    Json,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Decide a scan against the venue data (manual entry or test)
    #[command(alias = "s")]
    Scan(ScanArgs),

    /// Encode and decode card payloads
    #[command(alias = "t")]
    Token(TokenArgs),

    /// Query and control gates
    #[command(alias = "g")]
    Gate(GateArgs),

    /// Manage CLI configuration
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  SCAN
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct ScanArgs {
    /// Raw payload read from the card (bare id or JSON token)
    pub card_data: String,

    /// How the payload was read
    #[arg(long, short = 't', default_value = "qr")]
    pub scan_type: ScanTypeArg,

    /// Scanning station id
    #[arg(long, short = 's')]
    pub station: Option<String>,

    /// Evaluate as of this instant (RFC 3339) instead of now
    #[arg(long)]
    pub at: Option<String>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ScanTypeArg {
    Qr,
    Rfid,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  TOKEN
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct TokenArgs {
    #[command(subcommand)]
    pub command: TokenCommand,
}

#[derive(Debug, Subcommand)]
pub enum TokenCommand {
    /// Issue a structured token for a card in the venue data
    Encode {
        /// Card id or card data
        card: String,

        /// Restaurant the token grants (defaults to the guest's)
        #[arg(long, short = 'r')]
        restaurant: Option<String>,
    },

    /// Decode and verify a payload
    Decode {
        /// Raw payload
        raw: String,
    },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  GATE
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct GateArgs {
    #[command(subcommand)]
    pub command: GateCommand,
}

#[derive(Debug, Subcommand)]
pub enum GateCommand {
    /// List configured gates
    #[command(alias = "ls")]
    List,

    /// Poll gates once and show their state
    Status {
        /// Gate id (all gates if omitted)
        gate: Option<String>,
    },

    /// Open a gate
    Open(GateActionArgs),

    /// Close a gate
    Close(GateActionArgs),

    /// Reset a gate controller
    Reset(GateActionArgs),

    /// Open a gate regardless of its door state
    EmergencyOpen(GateActionArgs),

    /// Pin a gate to maintenance (persisted in the config file)
    Maintenance {
        /// Gate id
        gate: String,

        /// Release the gate instead
        #[arg(long)]
        off: bool,
    },

    /// Supervise gates and print every state change until interrupted
    Watch {
        /// Poll interval in seconds (overrides config)
        #[arg(long, short = 'i')]
        interval: Option<u64>,
    },
}

#[derive(Debug, Args)]
pub struct GateActionArgs {
    /// Gate id
    pub gate: String,

    /// Seconds before the device recloses on its own
    #[arg(long)]
    pub duration: Option<u16>,

    /// Free-text reason recorded in the control log
    #[arg(long)]
    pub reason: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  CONFIG
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Display current resolved configuration (secrets masked)
    Show,

    /// Print the config file path
    Path,

    /// Store an HTTP gate API key in the system keyring (read from stdin)
    SetKey {
        /// Gate id
        gate: String,
    },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  COMPLETIONS
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
