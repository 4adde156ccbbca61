use clap::Parser;
use folio_server::cli::{self, Cli, Commands};
use folio_server::config::FolioConfig;
use folio_server::serve;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve => {
            let mut config = FolioConfig::load_or_default(&cli.config)?.with_env_overrides();
            if let Some(addr) = cli.http_addr {
                config.server.http_addr = addr;
            }
            serve::run(config).await
        }
        Commands::Query(args) => {
            let config = FolioConfig::load_or_default(&cli.config)?.with_env_overrides();
            cli::query::run(args, &config).await
        }
        Commands::Config(cmd) => cli::config_cmd::run(cmd, &cli.config),
    }
}
