use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(version, about = "Provisioning and authentication tool for hexmark badges")]
struct Cli {
    /// I2C bus device carrying the badge
    #[arg(short, long, default_value = "/dev/i2c-1")]
    bus: String,

    /// Secrets store: JSON map of hex slot numbers to hex keys
    #[arg(short, long, default_value = "secrets.json")]
    secrets: PathBuf,

    /// Trace level output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Provision a factory-fresh badge end to end
    Provision {
        /// Board serial number (decimal or 0x-prefixed hex)
        #[arg(required = true, value_parser = commands::parse_board_serial)]
        id: u16,

        /// Registration log to append to
        #[arg(long, default_value = "registry.csv")]
        registry: PathBuf,

        /// GPIO character device for jig control; skips jig handling
        /// if not given
        #[arg(long)]
        gpio: Option<String>,
    },

    /// Run a challenge against the chip and print what a validator needs
    Challenge {
        /// Key slot to challenge
        #[arg(long, default_value_t = 0)]
        slot: u8,

        /// Badge identifier mixed into the nonce (random if omitted)
        #[arg(long)]
        id: Option<String>,
    },

    /// Prove a slot holds the key the secrets store says it should
    CheckKey {
        /// Key slot to verify
        #[arg(long, default_value_t = 0)]
        slot: u8,
    },

    /// Verify the chip carries the intended slot policy and key material
    CheckConfig,

    /// Write and read back the EEPROM identity header
    SelfTest {
        /// Board serial number (decimal or 0x-prefixed hex)
        #[arg(required = true, value_parser = commands::parse_board_serial)]
        id: u16,

        /// GPIO character device, used to release write protect
        #[arg(long)]
        gpio: Option<String>,
    },

    /// Recompute and compare a reported challenge response (no hardware)
    Validate {
        /// 9-byte chip serial number, hex
        #[arg(long, required = true)]
        serial: String,

        /// 32-byte random seed the chip reported, hex
        #[arg(long, required = true)]
        random: String,

        /// 32-byte response the chip reported, hex
        #[arg(long, required = true)]
        response: String,

        /// Badge identifier the challenge was run with
        #[arg(long, default_value = "")]
        id: String,

        /// Key slot the challenge was run against
        #[arg(long, default_value_t = 0)]
        slot: u8,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    match &cli.command {
        Commands::Provision { id, registry, gpio } => {
            commands::provision(&cli.bus, &cli.secrets, *id, registry, gpio.as_deref())
        }
        Commands::Challenge { slot, id } => commands::challenge(&cli.bus, *slot, id.as_deref()),
        Commands::CheckKey { slot } => commands::check_key(&cli.bus, &cli.secrets, *slot),
        Commands::CheckConfig => commands::check_config(&cli.bus, &cli.secrets),
        Commands::SelfTest { id, gpio } => commands::self_test(&cli.bus, *id, gpio.as_deref()),
        Commands::Validate {
            serial,
            random,
            response,
            id,
            slot,
        } => commands::validate(&cli.secrets, serial, random, response, id, *slot),
    }
}

fn setup_logging(verbose: bool) {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_ansi(true)
        .init();
}
