use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use wtmon::config::{Command, Config, Settings};
use wtmon::runner;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Config::parse_args();

    // Setup logging
    setup_logging(cli.debug);

    // Load settings
    let mut settings = Settings::load(cli.config.as_ref())?;
    settings.merge_cli(&cli);
    settings.validate();

    match cli.command {
        Command::Watch { root, active } => {
            runner::run_watch(&settings, &root, active.as_deref()).await
        }
        Command::Status { root, pretty } => runner::run_status(&settings, &root, pretty).await,
    }
}

/// Events go to stdout, so logs are written to stderr
fn setup_logging(debug: bool) {
    let filter = if debug {
        EnvFilter::new("wtmon=debug,wtmon_core=debug")
    } else {
        EnvFilter::new("wtmon=info,wtmon_core=info")
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}
