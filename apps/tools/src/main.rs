use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use shared::{
    domain::{PresentationState, Slide, SlideArity, LIVE_STATE_KEY},
    validation::parse_state_payload,
};
use storage::Storage;

#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, default_value = "sqlite://./data/presenter.db")]
    database_url: String,
    #[arg(long, default_value_t = SlideArity::DEFAULT.get())]
    arity: usize,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Replace the live state with `slides` blank slides.
    Seed {
        #[arg(long, default_value_t = 1)]
        slides: usize,
    },
    /// Replace the live state (or a snapshot) with a JSON file.
    Import {
        path: PathBuf,
        #[arg(long)]
        id: Option<String>,
    },
    /// Print the live state (or a snapshot) as JSON.
    Show {
        #[arg(long)]
        id: Option<String>,
    },
    Snapshots,
    Blobs {
        #[arg(long, default_value_t = 100)]
        limit: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let arity = SlideArity::new(cli.arity)?;
    let storage = Storage::new(&cli.database_url).await?;

    match cli.command {
        Command::Seed { slides } => {
            let state = PresentationState::new(vec![Slide::blank(arity); slides], 0);
            storage.upsert_presentation(LIVE_STATE_KEY, &state).await?;
            println!("seeded live state with {slides} blank slides");
        }
        Command::Import { path, id } => {
            let body = tokio::fs::read(&path)
                .await
                .with_context(|| format!("failed to read {}", path.display()))?;
            let state = parse_state_payload(&body, arity)
                .map_err(|err| anyhow!("{}: {}", path.display(), err.message))?;
            let key = id.as_deref().unwrap_or(LIVE_STATE_KEY);
            let stored = storage.upsert_presentation(key, &state).await?;
            println!("imported {} slides into '{}'", stored.state.len(), stored.id);
        }
        Command::Show { id } => {
            let key = id.as_deref().unwrap_or(LIVE_STATE_KEY);
            let Some(snapshot) = storage.load_presentation(key).await? else {
                bail!("no presentation stored under '{key}'");
            };
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
        Command::Snapshots => {
            for summary in storage.list_presentations(Some(LIVE_STATE_KEY)).await? {
                println!("{}  {}", summary.updated_at.to_rfc3339(), summary.id);
            }
        }
        Command::Blobs { limit } => {
            for blob in storage.list_blobs(limit).await? {
                println!(
                    "{}  {:>10}  {}",
                    blob.created_at.to_rfc3339(),
                    blob.size_bytes,
                    blob.name
                );
            }
        }
    }

    Ok(())
}
