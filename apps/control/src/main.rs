use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use client_core::{
    ActionOutcome, ClientConfig, ControlClient, HttpPresentationClient, SlideAction,
};
use shared::domain::{image_display_name, PresentationState, SlideArity};
use tracing_subscriber::EnvFilter;

/// Operator console for the live presentation.
#[derive(Parser, Debug)]
struct Args {
    #[arg(long, default_value = "http://127.0.0.1:8080")]
    server_url: String,
    #[arg(long, default_value_t = SlideArity::DEFAULT.get())]
    arity: usize,
    #[arg(long, default_value_t = 5000)]
    timeout_ms: u64,
    #[command(subcommand)]
    command: Command,
}

/// Slide numbers are 1-based, as shown by `show`.
#[derive(Subcommand, Debug)]
enum Command {
    Show,
    Next,
    Prev,
    Goto { slide: usize },
    Add,
    Delete { slide: usize },
    SetImages { slide: usize, images: Vec<String> },
    Move { from: usize, to: usize },
    Snapshots,
    Save { id: String },
    Load { id: String },
    Forget { id: String },
    Images,
    Upload { path: PathBuf },
    RemoveImage { name: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();
    let args = Args::parse();

    let arity = SlideArity::new(args.arity)?;
    let config = ClientConfig::new(&args.server_url, arity)?
        .with_request_timeout(Duration::from_millis(args.timeout_ms));
    let http = Arc::new(HttpPresentationClient::new(config)?);
    let control = ControlClient::new(http.clone(), http.clone(), arity);

    if let ActionOutcome::Failed(err) = control.initialize().await {
        bail!("failed to load presentation: {err}");
    }

    let action = match args.command {
        Command::Show => None,
        Command::Next => Some(SlideAction::Next),
        Command::Prev => Some(SlideAction::Previous),
        Command::Goto { slide } => Some(SlideAction::GoTo(slide_index(slide)?)),
        Command::Add => Some(SlideAction::Add),
        Command::Delete { slide } => Some(SlideAction::Delete(slide_index(slide)?)),
        Command::SetImages { slide, images } => Some(SlideAction::UpdateImages {
            index: slide_index(slide)?,
            images: pad_images(images, arity)?,
        }),
        Command::Move { from, to } => Some(SlideAction::Reorder {
            from: slide_index(from)?,
            to: slide_index(to)?,
        }),
        Command::Snapshots => {
            for summary in control.list_snapshots().await? {
                println!("{}  {}", summary.updated_at.to_rfc3339(), summary.id);
            }
            return Ok(());
        }
        Command::Save { id } => {
            let summary = control.save_snapshot(&id).await?;
            println!("saved '{}' at {}", summary.id, summary.updated_at.to_rfc3339());
            return Ok(());
        }
        Command::Load { id } => {
            report(control.load_snapshot(&id).await, &format!("load '{id}'"))?;
            print_state(&control.status().await.state);
            return Ok(());
        }
        Command::Forget { id } => {
            control.delete_snapshot(&id).await?;
            println!("deleted '{id}'");
            return Ok(());
        }
        Command::Images => {
            for image in http.list_images().await? {
                println!("{}  {}", image.name, image.url);
            }
            return Ok(());
        }
        Command::Upload { path } => {
            let bytes = tokio::fs::read(&path)
                .await
                .with_context(|| format!("failed to read {}", path.display()))?;
            let file_name = path
                .file_name()
                .and_then(|name| name.to_str())
                .unwrap_or("upload.jpg");
            let url = http.upload_image(file_name, bytes).await?;
            println!("{url}");
            return Ok(());
        }
        Command::RemoveImage { name } => {
            http.delete_image(&name).await?;
            println!("deleted {name}");
            return Ok(());
        }
    };

    if let Some(action) = action {
        let label = format!("{action:?}");
        report(control.perform(action).await, &label)?;
    }
    print_state(&control.status().await.state);
    Ok(())
}

fn slide_index(slide: usize) -> Result<usize> {
    match slide.checked_sub(1) {
        Some(index) => Ok(index),
        None => bail!("slide numbers start at 1"),
    }
}

/// Fills missing trailing slots with unset placeholders.
fn pad_images(mut images: Vec<String>, arity: SlideArity) -> Result<Vec<String>> {
    if images.len() > arity.get() {
        bail!(
            "a slide holds {} images, got {}",
            arity.get(),
            images.len()
        );
    }
    images.resize(arity.get(), String::new());
    Ok(images)
}

fn report(outcome: ActionOutcome, label: &str) -> Result<()> {
    match outcome {
        ActionOutcome::Applied => Ok(()),
        ActionOutcome::Ignored => {
            println!("{label}: nothing to do");
            Ok(())
        }
        ActionOutcome::Failed(err) => bail!("{label} failed: {err}"),
    }
}

fn print_state(state: &PresentationState) {
    if state.is_empty() {
        println!("(no slides)");
        return;
    }
    let current = state.current_index();
    for (index, slide) in state.slides.iter().enumerate() {
        let marker = if Some(index) == current { ">" } else { " " };
        let images: Vec<&str> = slide
            .images
            .iter()
            .map(|url| {
                if url.is_empty() {
                    "-"
                } else {
                    image_display_name(url)
                }
            })
            .collect();
        println!("{marker} {:>3}  {}", index + 1, images.join("  |  "));
    }
}
