//! listingscout CLI: harvest avito.ma property listings into CSV or libSQL.
//!
//! Scans the listing index for detail-page links, renders every detail page
//! in headless Chrome until its dynamic sections settle, and writes one
//! record per listing.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
