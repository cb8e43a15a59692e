use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use receipt_audit::config::{Settings, DEFAULT_PROJECT_ID};
use receipt_audit::models::{Decision, FraudSignal};
use receipt_audit::services::orchestrator::ManualEvidence;
use receipt_audit::services::state::AppState;

mod commands;

#[derive(Parser)]
#[command(name = "receipt-audit")]
#[command(about = "Receipt fraud scoring with a per-vendor evidence ledger", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Ledger {
    #[arg(long, default_value = DEFAULT_PROJECT_ID)]
    project: String,
    #[arg(long)]
    vendor: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract, score and persist one receipt image
    Audit {
        image: PathBuf,
        #[command(flatten)]
        ledger: Ledger,
        /// Prior fraud flags held against the vendor
        #[arg(long, default_value_t = 0)]
        fraud_flags: u32,
    },
    /// Audit every png/jpg/jpeg/webp file directly inside a folder
    Scan {
        dir: PathBuf,
        #[command(flatten)]
        ledger: Ledger,
        #[arg(long, default_value_t = 0)]
        fraud_flags: u32,
    },
    /// Set the manual decision on a receipt
    Override {
        receipt_id: String,
        /// SAFE, REVIEW, FLAGGED or FRAUD
        decision: String,
        #[command(flatten)]
        ledger: Ledger,
    },
    /// Record evidence by hand, or mark an existing receipt
    Record {
        #[command(flatten)]
        ledger: Ledger,
        #[arg(long)]
        receipt_id: Option<String>,
        #[arg(long, default_value = "")]
        image_path: String,
        #[arg(long, default_value_t = 0.0)]
        amount: f64,
        #[arg(long, default_value_t = 0.0)]
        risk_score: f64,
        #[arg(long)]
        marked_as: Option<String>,
        /// JSON array of {type, severity, description}
        #[arg(long)]
        signals: Option<String>,
    },
    /// Aggregate metrics for a ledger
    Totals {
        #[command(flatten)]
        ledger: Ledger,
    },
    /// Receipts, totals and recent chat for a ledger
    Memory {
        #[command(flatten)]
        ledger: Ledger,
    },
    /// Ledger facts as handed to the chat model
    Context {
        #[command(flatten)]
        ledger: Ledger,
    },
    /// Ask the audit assistant about a ledger
    Chat {
        message: Option<String>,
        #[command(flatten)]
        ledger: Ledger,
        #[arg(long)]
        tool: Option<String>,
        #[arg(long)]
        receipt_id: Option<String>,
    },
    /// Stored chat history for a ledger
    History {
        #[command(flatten)]
        ledger: Ledger,
    },
    /// Store the OpenRouter API key encrypted in the evidence database
    SetApiKey { key: String },
    /// Show the effective configuration
    Config,
    /// Hand a job to the analysis queue (placeholder, never executed)
    Enqueue {
        name: String,
        #[arg(long)]
        payload: Option<String>,
    },
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings = Settings::from_env().context("failed to load configuration")?;
    let state = AppState::new(settings).context("failed to open audit stores")?;

    match cli.command {
        Commands::Audit {
            image,
            ledger,
            fraud_flags,
        } => {
            let outcome =
                commands::receipts::audit(&state, &ledger.project, &ledger.vendor, &image, fraud_flags)
                    .await?;
            print_json(&outcome)?;
        }
        Commands::Scan {
            dir,
            ledger,
            fraud_flags,
        } => {
            let entries =
                commands::receipts::scan(&state, &ledger.project, &ledger.vendor, &dir, fraud_flags)
                    .await?;
            print_json(&entries)?;
        }
        Commands::Override {
            receipt_id,
            decision,
            ledger,
        } => {
            let receipt = commands::receipts::override_decision(
                &state,
                &ledger.project,
                &ledger.vendor,
                &receipt_id,
                &decision,
            )?;
            print_json(&receipt)?;
        }
        Commands::Record {
            ledger,
            receipt_id,
            image_path,
            amount,
            risk_score,
            marked_as,
            signals,
        } => {
            let marked_as = marked_as
                .map(|raw| raw.parse::<Decision>())
                .transpose()?;
            let fraud_signals: Vec<FraudSignal> = match signals {
                Some(raw) => serde_json::from_str(&raw).context("--signals is not a valid signal list")?,
                None => Vec::new(),
            };
            let outcome = commands::receipts::record(
                &state,
                &ledger.project,
                &ledger.vendor,
                ManualEvidence {
                    receipt_id,
                    image_path,
                    amount,
                    risk_score,
                    fraud_signals,
                    marked_as,
                },
            )?;
            print_json(&outcome)?;
        }
        Commands::Totals { ledger } => {
            print_json(&commands::dashboard::totals(&state, &ledger.project, &ledger.vendor)?)?;
        }
        Commands::Memory { ledger } => {
            print_json(&commands::dashboard::memory(&state, &ledger.project, &ledger.vendor)?)?;
        }
        Commands::Context { ledger } => {
            print_json(&commands::dashboard::context(&state, &ledger.project, &ledger.vendor)?)?;
        }
        Commands::Chat {
            message,
            ledger,
            tool,
            receipt_id,
        } => {
            let reply = commands::chat::chat(
                &state,
                &ledger.project,
                &ledger.vendor,
                message,
                tool,
                receipt_id,
            )
            .await?;
            print_json(&reply)?;
        }
        Commands::History { ledger } => {
            print_json(&commands::chat::history(&state, &ledger.project, &ledger.vendor)?)?;
        }
        Commands::SetApiKey { key } => {
            commands::settings::set_api_key(&state, &key)?;
            println!("API key stored.");
        }
        Commands::Config => {
            print_json(&commands::settings::show(&state))?;
        }
        Commands::Enqueue { name, payload } => {
            let ticket = commands::receipts::enqueue(&state, &name, payload.as_deref())?;
            print_json(&ticket)?;
        }
    }

    Ok(())
}
