use std::io::Read;

use ask_widget::cli::Args;
use ask_widget::config::WidgetConfig;
use ask_widget::{highlight, terminal, web};
use clap::Parser;
use tracing_subscriber::EnvFilter;

fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    // Chat output shares the terminal with logs, so keep it quiet there.
    init_tracing(if args.web { "info" } else { "warn" });

    // Highlighter mode: stdin -> tagged HTML on stdout
    if let Some(lang) = &args.highlight {
        let mut code = String::new();
        std::io::stdin().read_to_string(&mut code)?;
        print!("{}", highlight(&code, lang));
        return Ok(());
    }

    let config = WidgetConfig::from_args(&args)?;

    // Widget host mode
    if args.web {
        web::serve(&config).await?;
        return Ok(());
    }

    terminal::run(
        &config,
        args.message.as_deref(),
        args.image.as_deref(),
        args.html,
    )
    .await
}
