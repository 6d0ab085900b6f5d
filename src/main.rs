//! xlayer - X11 image overlays for terminal emulators
//!
//! draws decoded images into override-redirect X11 windows positioned over
//! the terminal's cell grid, following tmux panes, resizes, and exposure.
//! commands arrive as json lines on stdin (the ueberzug layer protocol):
//!
//! ```text
//! xlayer layer --silent < commands.jsonl
//! ```

mod canvas;
mod cmd;
mod img;
mod term;
mod tmux;
mod x11;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{debug, error, info, warn};

use canvas::{Canvas, Placement};
use term::TermInfo;

#[derive(Parser)]
#[command(name = "xlayer")]
#[command(about = "X11 image overlays for terminal emulators and tmux panes")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display images on the terminal, driven by json commands on stdin
    Layer {
        /// Discard all log output
        #[arg(short, long)]
        silent: bool,

        /// Don't listen on stdin for commands
        #[arg(long)]
        no_stdin: bool,

        /// Unused, present for ueberzug compatibility
        #[arg(short, long)]
        parser: Option<String>,

        /// Unused, present for ueberzug compatibility
        #[arg(short, long)]
        loader: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Layer {
            silent, no_stdin, ..
        } => {
            init_logging(silent);
            run_layer(no_stdin).await
        }
    }
}

fn init_logging(silent: bool) {
    let filter = tracing_subscriber::EnvFilter::from_default_env();
    if silent {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::sink)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

async fn run_layer(no_stdin: bool) -> Result<()> {
    let term = TermInfo::detect().context("cannot inspect the owning terminal")?;
    debug!(
        cols = term.cols,
        rows = term.rows,
        font_w = term.font_width,
        font_h = term.font_height,
        tmux = term.tmux_pane.is_some(),
        "terminal detected"
    );

    let mut canvas = x11::X11Canvas::new(term.clone()).context("cannot start the X11 canvas")?;
    let result = command_loop(&mut canvas, &term, no_stdin).await;
    canvas.destroy().await;
    result
}

async fn command_loop<C: Canvas>(canvas: &mut C, term: &TermInfo, no_stdin: bool) -> Result<()> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sighup = signal(SignalKind::hangup())?;
    let mut lost = canvas.shutdown_signal();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("SIGINT received, exiting");
                break;
            }
            _ = sigterm.recv() => {
                info!("SIGTERM received, exiting");
                break;
            }
            _ = sighup.recv() => {
                info!("SIGHUP received, exiting");
                break;
            }
            res = lost.changed() => {
                if res.is_err() || *lost.borrow() {
                    error!("display connection lost, exiting");
                    break;
                }
            }
            line = lines.next_line(), if !no_stdin => {
                match line.context("stdin read failed")? {
                    None => break, // command channel closed
                    Some(line) if line.trim().is_empty() => {}
                    Some(line) => {
                        if let Err(e) = handle_command(canvas, term, &line).await {
                            warn!("{e:#}");
                        }
                    }
                }
            }
        }
    }
    Ok(())
}

async fn handle_command<C: Canvas>(canvas: &mut C, term: &TermInfo, line: &str) -> Result<()> {
    match cmd::parse(line)? {
        cmd::Command::Add(add) => {
            let (max_w, max_h) = term.pixel_bounds(add.max_width, add.max_height);
            let path = add.path.clone();
            let image = tokio::task::spawn_blocking(move || img::Image::load(&path, max_w, max_h))
                .await
                .context("image loader panicked")??;
            canvas
                .add_image(
                    &add.identifier,
                    image,
                    Placement {
                        col: add.x,
                        row: add.y,
                    },
                )
                .await
        }
        cmd::Command::Remove { identifier } => canvas.remove_image(&identifier).await,
        cmd::Command::Hide => canvas.hide().await,
        cmd::Command::Show => canvas.show().await,
    }
}
