use std::path::PathBuf;

use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use ledger_core::{
    Artifact, Chain, Ledger, LedgerConfig, MintOutcome, QueryFilter, Tier, VerificationLevel,
};
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "evidence-ledger")]
#[command(about = "Append-only, content-addressed evidence ledger")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Mint a small sample batch end to end and print the result.
    Demo,
    /// Validate a chain export file and report any integrity errors.
    Validate(ValidateArgs),
    /// Display version information.
    Version,
}

#[derive(Args)]
struct ValidateArgs {
    /// Path to a JSON chain export produced by `Chain::export`.
    path: PathBuf,
}

fn main() {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    let cli = Cli::parse();
    match cli.command.unwrap_or(Commands::Demo) {
        Commands::Demo => run_demo(),
        Commands::Validate(args) => run_validate(&args.path),
        Commands::Version => println!("evidence-ledger {}", env!("CARGO_PKG_VERSION")),
    }
}

fn run_demo() {
    let config = LedgerConfig {
        mining_difficulty: 1,
        default_require_consent: false,
        ..LedgerConfig::default()
    };
    let ledger = Ledger::new(config);

    let court_order = Artifact::proposed(
        "ARTIFACT-001",
        "a".repeat(64),
        "Court order compelling production of records",
        0.96,
        Tier::Government,
        "COURT_ORDER",
        Utc::now(),
    );

    let mut exhibit = Artifact::proposed(
        "ARTIFACT-002",
        "b".repeat(64),
        "Exhibit referencing the court order above",
        0.90,
        Tier::BusinessRecords,
        "EXHIBIT",
        Utc::now(),
    );
    // Business records always require corroboration on their own tier;
    // a digitally sealed copy upgrades straight to Accept instead.
    exhibit.authentication_method = Some("DIGITAL_SEAL".to_string());
    exhibit.dependencies = vec!["ARTIFACT-001".to_string()];

    info!("minting sample batch");
    match ledger.mint(vec![court_order, exhibit], VerificationLevel::Standard) {
        Ok(MintOutcome::Committed(result)) => {
            println!(
                "committed block {} ({}) minting {:?}, rejected {:?}",
                result.block_index, result.block_hash, result.minted, result.rejected
            );
        }
        Ok(MintOutcome::Empty) => println!("batch produced no committed artifacts"),
        Err(e) => eprintln!("mint failed: {e}"),
    }

    let hits = ledger.query(&QueryFilter {
        tier: Some(Tier::Government),
        ..Default::default()
    });
    println!("{} government-tier artifacts on the ledger", hits.len());

    let validation = ledger.validate();
    println!("chain valid: {}", validation.is_ok());
}

fn run_validate(path: &PathBuf) {
    let payload = match std::fs::read_to_string(path) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("failed to read {}: {e}", path.display());
            std::process::exit(1);
        }
    };

    let export = match serde_json::from_str(&payload) {
        Ok(e) => e,
        Err(e) => {
            eprintln!("failed to parse export: {e}");
            std::process::exit(1);
        }
    };

    let chain = match Chain::import(&export) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("import failed: {e}");
            std::process::exit(1);
        }
    };

    let report = ledger_core::validate_chain(&chain);
    if report.is_ok() {
        println!("chain is valid: {} blocks, no errors", chain.height() + 1);
    } else {
        println!("chain has {} error(s):", report.errors.len());
        for error in &report.errors {
            println!("  block {}: {} ({})", error.block_index, error.detail, error.kind);
        }
        std::process::exit(1);
    }
    for warning in &report.warnings {
        println!("warning (block {}): {}", warning.block_index, warning.detail);
    }
}
