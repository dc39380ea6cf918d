use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use dotpress::config;
use dotpress::gcode::{GcodeCommand, GcodeTranslator};
use dotpress::job::{PrintJobController, PrintStatus};
use dotpress::layout::PageLayoutEngine;
use dotpress::parse_symbols;

/// Drives a braille dot embosser over a checksummed serial G-code link.
#[derive(Parser)]
#[command(name = "embosser-host", version)]
struct Args {
    /// File containing Unicode braille text to emboss.
    input: PathBuf,

    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "embosser.toml")]
    config: PathBuf,

    /// Print the generated command stream instead of driving the device.
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args = Args::parse();
    let config = if args.config.exists() {
        config::load_config(&args.config)?
    } else {
        tracing::info!(
            "no config at {}, using built-in defaults",
            args.config.display()
        );
        config::Config::default()
    };

    let text = std::fs::read_to_string(&args.input)?;
    let symbols = parse_symbols(&text);

    let engine = PageLayoutEngine::new(&config.layout);
    let pages = engine.layout(&symbols);
    let translator = GcodeTranslator::new(&config.layout, &config.gcode);
    let commands: Vec<GcodeCommand> = pages
        .iter()
        .flat_map(|page| translator.translate(page))
        .collect();

    tracing::info!(
        "{} symbols -> {} pages, {} commands",
        symbols.len(),
        pages.len(),
        commands.len()
    );

    if args.dry_run {
        for command in &commands {
            println!("{}", command.raw);
        }
        return Ok(());
    }

    let controller = PrintJobController::new(&config);
    let total = commands.len();
    let job = controller.submit(commands);
    tracing::info!("job {} submitted to {}", job.id(), config.device.port);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupt received, stopping job");
                job.stop().await;
            }
            _ = tokio::time::sleep(Duration::from_millis(500)) => {}
        }
        match job.status().await {
            PrintStatus::Completed => {
                tracing::info!("embossing complete ({total} commands)");
                break;
            }
            PrintStatus::Idle => {
                tracing::info!("job stopped by operator");
                break;
            }
            PrintStatus::Error => {
                tracing::error!("job failed, see log for the link error");
                std::process::exit(1);
            }
            status => {
                tracing::debug!(
                    "{status:?}: {}/{total} commands acknowledged",
                    job.commands_acknowledged()
                );
            }
        }
    }

    Ok(())
}
