//! `vjts` -- command-line client for the VJTS plate-tracking server.
//!
//! Uploads local videos (or points the server at one of its own
//! directories), follows the job's event stream, and prints progress, plate
//! crops, trajectory metrics and the result link. Ctrl-C asks the server to
//! cancel the job; a second Ctrl-C exits immediately.
//!
//! # Environment variables
//!
//! | Variable                    | Default                 | Description                        |
//! |-----------------------------|-------------------------|------------------------------------|
//! | `VJTS_API_URL`              | `http://127.0.0.1:8000` | Base URL of the VJTS server        |
//! | `VJTS_REQUEST_TIMEOUT_SECS` | `300`                   | Cancel request timeout             |
//! | `VJTS_CONNECT_TIMEOUT_SECS` | `10`                    | TCP connect timeout                |
//! | `RUST_LOG`                  | `vjts_cli=info,...`     | Log filter                         |

mod render;

use std::future::Future;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vjts_client::api::VjtsApi;
use vjts_client::config::ClientConfig;
use vjts_client::session::{CancelOutcome, Dispatch, SessionController, Terminal};
use vjts_client::view::Feedback;
use vjts_core::job::{JobParams, DEFAULT_OUTPUT_DIR, DEFAULT_VIDEO_DIR};

const EXIT_FAILED: u8 = 1;
const EXIT_CANCELLED: u8 = 130;

#[derive(Parser)]
#[command(name = "vjts")]
#[command(about = "Track a licence plate across videos on a VJTS server", long_about = None)]
struct Args {
    /// Licence plate to search for
    #[arg(long)]
    plate: String,

    /// Server-side video directory (ignored when FILES are uploaded)
    #[arg(long, default_value = DEFAULT_VIDEO_DIR)]
    video_dir: String,

    /// Server-side output directory
    #[arg(long, default_value = DEFAULT_OUTPUT_DIR)]
    output_dir: String,

    /// Base URL of the VJTS server
    #[arg(long, env = "VJTS_API_URL")]
    api_url: Option<String>,

    /// Save the result video to this path when the job succeeds
    #[arg(long)]
    download: Option<PathBuf>,

    /// Pages of plate crops to list in the summary
    #[arg(long, default_value = "1")]
    crop_pages: usize,

    /// Local video files to upload before processing
    files: Vec<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vjts_cli=info,vjts_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    let mut config = ClientConfig::from_env().context("invalid configuration")?;
    if let Some(url) = &args.api_url {
        config = config.with_api_url(url)?;
    }

    tracing::info!(
        api_url = %config.api_url,
        plate = %args.plate,
        files = args.files.len(),
        "Starting vjts",
    );

    let api = VjtsApi::new(&config).context("failed to build HTTP client")?;
    let mut controller = SessionController::new(api);

    let params = JobParams::new(args.plate.clone())
        .with_video_dir(args.video_dir.clone())
        .with_output_dir(args.output_dir.clone());

    let started = controller.start(&args.files, params).await;
    print_feedback(controller.view().feedback.clone(), &mut None);
    if let Err(e) = started {
        tracing::debug!(error = %e, "Run did not start");
        return Ok(ExitCode::from(EXIT_FAILED));
    }

    let terminal = follow(&mut controller).await;

    for _ in 1..args.crop_pages {
        controller.show_more_crops();
    }
    println!("\n{}", render::summary(controller.view()));

    let code = match terminal {
        Some(Terminal::Completed { result }) => {
            if let (Some(result), Some(dest)) = (result, &args.download) {
                let bytes = controller
                    .service()
                    .download_result(&result.result_ref, dest)
                    .await
                    .with_context(|| format!("failed to download {}", result.result_ref))?;
                println!("Saved {} ({bytes} bytes)", dest.display());
            }
            ExitCode::SUCCESS
        }
        Some(Terminal::Cancelled { .. }) => ExitCode::from(EXIT_CANCELLED),
        Some(Terminal::Failed { .. } | Terminal::TransportError { .. }) => {
            ExitCode::from(EXIT_FAILED)
        }
        // Only reached after a locally acknowledged cancel.
        None => ExitCode::from(EXIT_CANCELLED),
    };
    Ok(code)
}

/// Pump events until the session ends, handling Ctrl-C as cancel.
async fn follow(controller: &mut SessionController<VjtsApi>) -> Option<Terminal> {
    let mut last_feedback = Some(controller.view().feedback.clone());
    let mut cancel_requested = false;

    loop {
        tokio::select! {
            message = controller.next_message() => {
                let message = message?;
                let crops_before = controller.view().crops.len();
                let dispatch = controller.dispatch(message);

                let crops = &controller.view().crops;
                if crops.len() > crops_before {
                    if let Some(newest) = crops.visible().next() {
                        println!("Crop #{}: {}", crops.len(), render::crop_label(newest));
                    }
                }
                print_feedback(controller.view().feedback.clone(), &mut last_feedback);

                if let Dispatch::Terminal(terminal) = dispatch {
                    return Some(terminal);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                if cancel_requested {
                    tracing::warn!("Second interrupt, exiting without waiting");
                    return Some(Terminal::Cancelled { message: None });
                }
                cancel_requested = true;

                let interrupt = async {
                    let _ = tokio::signal::ctrl_c().await;
                };
                match unless_interrupted(controller.cancel(), interrupt).await {
                    None => {
                        tracing::warn!("Second interrupt while cancelling, exiting without waiting");
                        return Some(Terminal::Cancelled { message: None });
                    }
                    Some(Ok(CancelOutcome::Requested)) => {
                        print_feedback(controller.view().feedback.clone(), &mut last_feedback);
                        return None;
                    }
                    // Rejected or failed requests leave the stream running.
                    Some(_) => {}
                }
                print_feedback(controller.view().feedback.clone(), &mut last_feedback);
            }
        }
    }
}

/// Drive `work` to completion unless `interrupt` resolves first.
async fn unless_interrupted<T>(
    work: impl Future<Output = T>,
    interrupt: impl Future<Output = ()>,
) -> Option<T> {
    tokio::select! {
        output = work => Some(output),
        _ = interrupt => None,
    }
}

/// Print `feedback` unless it repeats the previous line.
fn print_feedback(feedback: Feedback, last: &mut Option<Feedback>) {
    if last.as_ref() == Some(&feedback) {
        return;
    }
    println!("{}", render::feedback_line(&feedback));
    *last = Some(feedback);
}
