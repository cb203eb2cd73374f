//! tpsync CLI: batch TPS/CTPS checks for CRM phone numbers.
//!
//! Sweeps the CRM collection against the compliance API, records verdicts
//! in a local ledger and writes them back onto the CRM records.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::load_dotenv();
    commands::run(cli).await
}
