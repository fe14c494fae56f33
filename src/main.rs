use anyhow::Result;
use clap::Parser;
use std::process::ExitCode;
use stream_fanout::cli::{self, Cli};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_filter()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    match run(&cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<bool> {
    let summary = cli::execute(cli)?;

    if cli.json {
        println!("{}", summary.render_json()?);
    } else {
        print!("{}", summary.render_text());
    }
    for failure in &summary.failures {
        eprintln!("Error: {} failed: {}", failure.consumer, failure.error);
    }
    Ok(summary.is_success())
}
