pub mod types;
pub mod error;
pub mod config;
pub mod crs;
pub mod dbf;
pub mod data;
pub mod districts;
pub mod filter;
pub mod layers;
pub mod view;
pub mod context;
pub mod export;
pub mod server;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the interactive district dashboard
    Serve {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
    },
    /// Render one view to a standalone HTML file
    Export {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
        /// District display name, or "all"
        #[arg(short, long, default_value = types::ALL_DISTRICTS)]
        district: String,
        /// Output path; defaults to output.export_html from the config
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config } => {
            info!("Serving dashboard with config: {:?}", config);
            let app_config = config::AppConfig::load_from_file(&config)?;

            // Startup-fatal: never serve a partially loaded context.
            let context = context::AppContext::load(&app_config)?;

            server::start_server(app_config, context).await?;
        }
        Commands::Export {
            config,
            district,
            output,
        } => {
            let app_config = config::AppConfig::load_from_file(&config)?;
            let context = context::AppContext::load(&app_config)?;

            let selector = types::DistrictSelector::parse(&district);
            let view = context.render(&selector)?;

            let path = output.unwrap_or_else(|| app_config.output.export_html.clone());
            export::write_html(&path, &app_config.view.title, &view.to_figure())?;
            info!("Exported '{}' view to {:?}", selector, path);
        }
    }

    Ok(())
}
