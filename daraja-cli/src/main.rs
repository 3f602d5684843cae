//! Command-line front end for the Daraja client.
//!
//! # Usage
//!
//! ```bash
//! # STK push from the `staging` account of ./daraja.toml
//! daraja --account staging stk-push --amount 10 --phone 254708374149
//!
//! # Custom config path and log level
//! DARAJA_CONFIG=/etc/daraja.toml RUST_LOG=debug daraja --account live balance
//! ```
//!
//! # Environment Variables
//!
//! - `DARAJA_CONFIG` - Path to the TOML configuration file (default: `daraja.toml`)
//! - `DARAJA_ACCOUNT` - Account to use when `--account` is not given
//! - `RUST_LOG` - Log level filter (default: `info`)
//!
//! A `.env` file in the working directory is loaded first.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use daraja::payload::SAMPLE_TRANSACTION_ID;
use daraja::{B2cCommandId, DarajaConfig, GatewayResponse, Mpesa};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "daraja", version, about = "Call the Safaricom Daraja (M-Pesa) API")]
struct Cli {
    /// Configuration file.
    #[arg(long, env = "DARAJA_CONFIG", default_value = "daraja.toml")]
    config: PathBuf,

    /// Account entry to use.
    #[arg(long, env = "DARAJA_ACCOUNT")]
    account: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Send money from the paybill to a customer.
    B2c {
        #[arg(long)]
        amount: u64,
        #[arg(long)]
        phone: String,
        /// SalaryPayment, BusinessPayment or PromotionPayment.
        #[arg(long, default_value = "BusinessPayment")]
        command_id: B2cCommandId,
        #[arg(long, default_value = "Payment")]
        remarks: String,
        #[arg(long)]
        occasion: Option<String>,
    },
    /// Transfer to another business (sends fixed demo values).
    B2b {
        #[arg(long)]
        amount: u64,
        #[arg(long)]
        shortcode: String,
    },
    /// Register the configured C2B confirmation and validation URLs.
    RegisterUrls,
    /// Simulate a customer paying into the paybill.
    Simulate {
        #[arg(long)]
        amount: u64,
        #[arg(long)]
        msisdn: String,
        #[arg(long)]
        reference: String,
    },
    /// Query the paybill balance.
    Balance,
    /// Query the status of a transaction.
    Status {
        #[arg(long, default_value = SAMPLE_TRANSACTION_ID)]
        transaction_id: String,
    },
    /// Reverse a transaction (sends a fixed receiver and transaction id).
    Reverse {
        #[arg(long)]
        receiver: String,
        #[arg(long)]
        transaction_id: String,
        #[arg(long)]
        amount: u64,
    },
    /// Prompt a phone to pay through Lipa Na M-Pesa Online.
    StkPush {
        #[arg(long)]
        amount: u64,
        #[arg(long)]
        phone: String,
        #[arg(long)]
        reference: Option<String>,
        #[arg(long)]
        description: Option<String>,
    },
    /// Query the outcome of an STK push.
    StkQuery {
        #[arg(long)]
        checkout_request_id: String,
    },
}

#[tokio::main]
async fn main() {
    // Missing .env is fine
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        tracing::error!("Request failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), daraja::Error> {
    let config = DarajaConfig::load_from(&cli.config)?;
    tracing::info!(
        config = %cli.config.display(),
        account = %cli.account,
        environment = %config.environment,
        "Loaded configuration"
    );

    let mpesa = Mpesa::new(config, &cli.account).await?;
    let response = match cli.command {
        Command::B2c {
            amount,
            phone,
            command_id,
            remarks,
            occasion,
        } => {
            mpesa
                .b2c(amount, &phone, command_id, &remarks, occasion.as_deref())
                .await?
        }
        Command::B2b { amount, shortcode } => mpesa.b2b(amount, &shortcode).await?,
        Command::RegisterUrls => mpesa.c2b_register_urls().await?,
        Command::Simulate {
            amount,
            msisdn,
            reference,
        } => mpesa.simulate_c2b(amount, &msisdn, &reference).await?,
        Command::Balance => mpesa.check_balance().await?,
        Command::Status { transaction_id } => mpesa.transaction_status(&transaction_id).await?,
        Command::Reverse {
            receiver,
            transaction_id,
            amount,
        } => {
            mpesa
                .reverse_transaction(&receiver, &transaction_id, amount)
                .await?
        }
        Command::StkPush {
            amount,
            phone,
            reference,
            description,
        } => {
            mpesa
                .express_checkout(amount, &phone, reference.as_deref(), description.as_deref())
                .await?
        }
        Command::StkQuery {
            checkout_request_id,
        } => mpesa.express_query(&checkout_request_id).await?,
    };

    print_response(&response);
    Ok(())
}

#[allow(clippy::print_stdout)]
fn print_response(response: &GatewayResponse) {
    tracing::debug!(status = %response.status, "Gateway accepted the request");
    println!("{}", response.body);
}
