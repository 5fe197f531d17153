use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use annal::config::Config;
use annal::source::SourceRegistry;

#[derive(Parser)]
#[command(name = "annal")]
#[command(about = "Coding-assistant session history ingestion and normalization")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, default_value = "annal.yaml")]
    config: String,
}

#[derive(Subcommand)]
enum Commands {
    /// List configured sources and what they can see on this machine
    Sources,

    /// Extract and normalize sessions, one JSON record set per line
    Extract {
        /// Only this source (claude-code, codex, cursor, gemini)
        #[arg(short, long)]
        source: Option<String>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config).unwrap_or_default();
    let registry = SourceRegistry::new(&config);

    match cli.command {
        Commands::Sources => {
            for source in registry.all_sources() {
                let status = if source.detect() { "detected" } else { "absent" };
                let locations = source.discover().map(|l| l.len()).unwrap_or(0);
                println!(
                    "{:12} {:10} {} locations ({})",
                    source.source().tag(),
                    status,
                    locations,
                    source.description()
                );
            }
        }
        Commands::Extract { source } => {
            let sources: Vec<_> = match &source {
                Some(tag) => registry.get_source(tag).into_iter().collect(),
                None => registry.detected_sources(),
            };

            for src in sources {
                let locations = match src.discover() {
                    Ok(locations) => locations,
                    Err(e) => {
                        eprintln!("{}: discovery failed: {}", src.source().tag(), e);
                        continue;
                    }
                };
                for location in &locations {
                    let conversations = match src.extract(location) {
                        Ok(conversations) => conversations,
                        Err(e) => {
                            eprintln!(
                                "{}: extract failed for {}: {}",
                                src.source().tag(),
                                location.store_path.display(),
                                e
                            );
                            continue;
                        }
                    };
                    for raw in &conversations {
                        let normalized = src.normalize(raw, location);
                        println!("{}", serde_json::to_string(&normalized)?);
                    }
                }
            }
        }
    }

    Ok(())
}
