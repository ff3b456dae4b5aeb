#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::unnecessary_literal_bound,
    clippy::module_name_repetitions,
    clippy::struct_field_names
)]

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;

mod app;
mod cli;

use axgate::Config;
use cli::commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load_or_init()?;
    axgate::observability::init(&config.observability)?;
    app::dispatch::dispatch(cli, Arc::new(config)).await
}
