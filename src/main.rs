use anyhow::Result;
use clap::{Parser, Subcommand};
use dotenvy::dotenv;

mod cache;
mod codec;
mod config;
mod engine;
mod model;
mod output;
mod pipeline;
mod platform;
mod progress;
mod server;
mod source;
mod telemetry;
mod util;

#[derive(Parser)]
#[command(name = "adflow", about = "Marketing analytics retrieval and scoring pipeline")]
struct Cli {
    /// Postgres connection string; overrides DATABASE_URL and the Supabase REST backend
    #[arg(global = true, short, long)]
    dsn: Option<String>,
    /// Emit a single JSON envelope to stdout; logs go to stderr
    #[arg(global = true, long, default_value_t = false)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API
    Serve(server::ServeCmd),
    /// Page through every platform for a date range
    Retrieve(pipeline::retrieve::RetrieveCmd),
    /// Score saved rows through the engine and export CSVs
    Process(pipeline::process::ProcessCmd),
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let cli = Cli::parse();
    telemetry::config::set_json_mode(cli.json);

    // stderr logging; respects RUST_LOG and ADFLOW_LOG_FORMAT
    telemetry::config::init_tracing();

    let settings = config::Settings::from_env()?.with_dsn(cli.dsn);
    let pipe = pipeline::Pipeline::from_settings(settings)?;

    match cli.command {
        Commands::Serve(args) => server::run(pipe, args).await?,
        Commands::Retrieve(args) => pipeline::retrieve::run(pipe, args).await?,
        Commands::Process(args) => pipeline::process::run(pipe, args).await?,
    }

    Ok(())
}
