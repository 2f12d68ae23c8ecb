use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "planloop")]
#[command(version, about = "Reactive orchestrator for an AI-assisted planning pipeline")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the orchestrator: every processor component plus the
    /// `/workflow-api/` HTTP surface, wired against NATS JetStream.
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    planloop::serve::init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve => {
            let config = planloop::serve::ServeConfig::from_env()?;
            planloop::serve::serve(config).await?;
        }
    }

    Ok(())
}
