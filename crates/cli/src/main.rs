//! Orchard CLI - Database migrations and operator tools.
//!
//! # Usage
//!
//! ```bash
//! # Run storefront database migrations
//! orchard-cli migrate
//!
//! # Run one order lifecycle sweep (for cron)
//! orchard-cli orders sweep
//!
//! # Confirm or fail a payment by reference
//! orchard-cli orders confirm-payment --reference REF-... --status paid
//!
//! # Correct stock by hand
//! orchard-cli stock set --product 12 --quantity 40
//! ```

#![cfg_attr(not(test), forbid(unsafe_code))]

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "orchard-cli")]
#[command(author, version, about = "Orchard operator tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run database migrations
    Migrate,
    /// Order lifecycle and payments
    Orders {
        #[command(subcommand)]
        action: OrdersAction,
    },
    /// Manual stock corrections
    Stock {
        #[command(subcommand)]
        action: StockAction,
    },
}

#[derive(Subcommand)]
enum OrdersAction {
    /// Fail stale pending orders and delete stale failed orders
    Sweep,
    /// Apply a payment status to an order
    ConfirmPayment {
        /// Payment reference id of the order
        #[arg(short, long)]
        reference: String,

        /// New payment status (`paid`, `failed`, `pending`)
        #[arg(short, long)]
        status: String,

        /// Provider payment id
        #[arg(long)]
        payment_id: Option<String>,

        /// Provider payment method
        #[arg(long)]
        method: Option<String>,
    },
}

#[derive(Subcommand)]
enum StockAction {
    /// Set product-level stock
    Set {
        #[arg(short, long)]
        product: i32,

        /// Units on hand; omit for unlimited
        #[arg(short, long)]
        quantity: Option<u32>,
    },
    /// Set one attribute entry of a variant
    SetVariant {
        #[arg(short, long)]
        product: i32,

        #[arg(long)]
        variant: i32,

        #[arg(short, long)]
        attribute: String,

        #[arg(long)]
        value: String,

        #[arg(short, long)]
        quantity: u32,
    },
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let result: Result<(), Box<dyn std::error::Error>> = run(cli).await;

    if let Err(e) = result {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Migrate => commands::migrate::run().await?,
        Commands::Orders { action } => match action {
            OrdersAction::Sweep => commands::orders::sweep().await?,
            OrdersAction::ConfirmPayment {
                reference,
                status,
                payment_id,
                method,
            } => {
                commands::orders::confirm_payment(&reference, &status, payment_id, method).await?;
            }
        },
        Commands::Stock { action } => match action {
            StockAction::Set { product, quantity } => {
                commands::stock::set(product, quantity).await?;
            }
            StockAction::SetVariant {
                product,
                variant,
                attribute,
                value,
                quantity,
            } => {
                commands::stock::set_variant(product, variant, &attribute, &value, quantity)
                    .await?;
            }
        },
    }
    Ok(())
}
