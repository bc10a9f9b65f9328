use clap::Parser;
use flotilla::wiring;
use flotilla_core::CoordinatorConfig;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "flotilla",
    about = "Coordinator for CLI AI agents hosted in tmux panes"
)]
struct Cli {
    /// Data directory for state, memory, and transport configs
    #[arg(long, default_value = "./flotilla-data")]
    data_dir: String,

    /// Bind address for the HTTP surface
    #[arg(long, default_value = "127.0.0.1")]
    bind: String,

    /// Port for the HTTP surface
    #[arg(long, default_value_t = 18901)]
    port: u16,

    /// Captain loop period in seconds
    #[arg(long, default_value_t = 30)]
    cycle_secs: u64,

    /// Run without a tmux server (headless pane simulator)
    #[arg(long, default_value_t = false)]
    no_tmux: bool,

    /// Do not spawn the captain agent (loop still runs)
    #[arg(long, default_value_t = false)]
    no_captain: bool,

    /// Optional config file; CLI flags override it
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => CoordinatorConfig::load(std::path::Path::new(path))?,
        None => CoordinatorConfig::default(),
    };
    config.data_dir = cli.data_dir.into();
    config.bind = cli.bind;
    config.port = cli.port;
    config.cycle_interval_secs = cli.cycle_secs;
    config.tmux = !cli.no_tmux;

    let coordinator = wiring::build(&config, !cli.no_captain).await?;

    let cancel = coordinator.cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
            cancel.cancel();
        }
    });

    wiring::run(coordinator, &config).await
}
