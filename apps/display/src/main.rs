use std::{sync::Arc, time::Duration};

use anyhow::Result;
use clap::Parser;
use client_core::{
    display::PollSettings, ClientConfig, DisplayModel, DisplayPoller, DisplayView,
    HttpImageProbe, HttpPresentationClient, ImageStatus,
};
use shared::domain::SlideArity;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Follows the live presentation for one physical screen.
#[derive(Parser, Debug)]
struct Args {
    #[arg(long, default_value = "http://127.0.0.1:8080")]
    server_url: String,
    /// 1-based screen id.
    #[arg(long)]
    screen: String,
    #[arg(long, default_value_t = 500)]
    poll_ms: u64,
    #[arg(long, default_value_t = 5000)]
    timeout_ms: u64,
    #[arg(long, default_value_t = SlideArity::DEFAULT.get())]
    arity: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args = Args::parse();

    let arity = SlideArity::new(args.arity)?;
    let model = match DisplayModel::for_screen_id(&args.screen, arity) {
        Ok(model) => model,
        Err(view) => {
            render(&view);
            return Ok(());
        }
    };

    let config = ClientConfig::new(&args.server_url, arity)?
        .with_poll_interval(Duration::from_millis(args.poll_ms))
        .with_request_timeout(Duration::from_millis(args.timeout_ms));
    let repo = Arc::new(HttpPresentationClient::new(config.clone())?);
    let probe = Arc::new(HttpImageProbe::new(&config)?);

    let handle = DisplayPoller::new(repo, probe, PollSettings::from(&config), model).spawn();
    let mut views = handle.views();
    render(&views.borrow_and_update());

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(error) = signal {
                    warn!(%error, "failed to listen for ctrl-c");
                }
                break;
            }
            changed = views.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = views.borrow_and_update().clone();
                render(&view);
            }
        }
    }

    handle.stop().await;
    info!("display stopped");
    Ok(())
}

fn render(view: &DisplayView) {
    match view {
        DisplayView::InvalidScreen { raw } => println!("Invalid Screen ID ({raw})"),
        DisplayView::Waiting { message: None } => println!("WAITING..."),
        DisplayView::Waiting {
            message: Some(message),
        } => println!("[!] {message}"),
        DisplayView::Image {
            url,
            status,
            previous,
            warning,
        } => {
            match (status, previous) {
                (ImageStatus::Loading, Some(previous)) => {
                    println!("fading {previous} -> {url}")
                }
                (ImageStatus::Loading, None) => println!("loading {url}"),
                (ImageStatus::Loaded, _) => println!("showing {url}"),
                (ImageStatus::Error, _) => println!(
                    "Image failed to load: {url}. Please check the image URL in the control panel."
                ),
            }
            if let Some(warning) = warning {
                println!("[!] {warning}");
            }
        }
    }
}
