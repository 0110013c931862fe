use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use common::{Command, ElementLayout, HostAction, Rect, Response, Viewport};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};

#[derive(Parser)]
#[command(name = "clipctl")]
#[command(about = "Clipdeck video playback daemon control", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ping the daemon to check if it's running
    Ping,

    /// Show daemon status
    Status,

    /// List mounted videos and their load state
    Videos,

    /// Kill the running daemon
    Kill,

    /// Mirror a newly mounted video element
    Mount {
        /// Element id
        id: String,

        /// Top edge, in viewport pixels
        #[arg(long, allow_hyphen_values = true)]
        top: f64,

        /// Bottom edge, in viewport pixels
        #[arg(long, allow_hyphen_values = true)]
        bottom: f64,

        /// The element plays HLS manifests natively
        #[arg(long)]
        native_hls: bool,
    },

    /// Forget a video element
    Unmount { id: String },

    /// Put a mounted video under scheduler control
    Register {
        id: String,

        /// Do not play even when selected
        #[arg(long)]
        no_play: bool,
    },

    /// Remove a video from scheduler control (pauses it)
    Unregister { id: String },

    /// Change whether a registered video wants to play
    Prefer {
        id: String,

        /// true or false
        #[arg(action = clap::ArgAction::Set)]
        prefers_to_play: bool,
    },

    /// Report a new viewport and one element position
    Layout {
        /// Viewport width
        #[arg(long, default_value = "400")]
        width: f64,

        /// Viewport height
        #[arg(long)]
        height: f64,

        #[command(flatten)]
        element: ElementArgs,
    },

    /// Report a scrolled element position
    Scroll {
        #[command(flatten)]
        element: ElementArgs,
    },

    /// Assign a source to a mounted video
    Load {
        id: String,

        /// Source URL (omit to report a missing source)
        src: Option<String>,

        /// Poster image URL
        #[arg(short, long)]
        poster: Option<String>,

        /// Play once data has loaded
        #[arg(short, long)]
        autoplay: bool,
    },

    /// Reload the current source of a video
    Retry { id: String },

    /// Track viewport visibility of a video
    Observe {
        id: String,

        /// Visible fraction required (0.0-1.0)
        #[arg(short, long)]
        threshold: Option<f64>,

        /// Pixels to grow the viewport by
        #[arg(short, long)]
        root_margin: Option<f64>,
    },

    /// Stop tracking visibility of a video
    Unobserve { id: String },

    /// Print actions pushed by deferred scheduling passes
    Watch,
}

/// One element's position
#[derive(clap::Args)]
struct ElementArgs {
    /// Element id (omit to only update the viewport)
    #[arg(long)]
    id: Option<String>,

    #[arg(long, allow_hyphen_values = true, default_value = "0")]
    top: f64,

    #[arg(long, allow_hyphen_values = true, default_value = "0")]
    bottom: f64,

    /// The element has left the document
    #[arg(long)]
    detached: bool,
}

impl ElementArgs {
    fn into_layouts(self) -> Vec<ElementLayout> {
        self.id
            .map(|id| ElementLayout {
                id,
                rect: Rect::new(self.top, self.bottom),
                connected: !self.detached,
            })
            .into_iter()
            .collect()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let command = match cli.command {
        Commands::Ping => Command::Ping,
        Commands::Status => Command::Query,
        Commands::Videos => Command::ListVideos,
        Commands::Kill => Command::Kill,
        Commands::Mount {
            id,
            top,
            bottom,
            native_hls,
        } => Command::Mount {
            id,
            rect: Rect::new(top, bottom),
            native_hls,
        },
        Commands::Unmount { id } => Command::Unmount { id },
        Commands::Register { id, no_play } => Command::Register {
            id,
            prefers_to_play: !no_play,
        },
        Commands::Unregister { id } => Command::Unregister { id },
        Commands::Prefer {
            id,
            prefers_to_play,
        } => Command::UpdatePreference {
            id,
            prefers_to_play,
        },
        Commands::Layout {
            width,
            height,
            element,
        } => Command::Layout {
            viewport: Viewport::new(width, height),
            elements: element.into_layouts(),
        },
        Commands::Scroll { element } => Command::Scroll {
            elements: element.into_layouts(),
        },
        Commands::Load {
            id,
            src,
            poster,
            autoplay,
        } => Command::Load {
            id,
            src,
            poster,
            autoplay,
        },
        Commands::Retry { id } => Command::Retry { id },
        Commands::Observe {
            id,
            threshold,
            root_margin,
        } => Command::Observe {
            id,
            threshold,
            root_margin,
        },
        Commands::Unobserve { id } => Command::Unobserve { id },
        Commands::Watch => {
            if let Err(e) = watch().await {
                exit_unreachable(e);
            }
            return Ok(());
        }
    };

    match send_command(command).await {
        Ok(response) => {
            handle_response(response);
            Ok(())
        }
        Err(e) => exit_unreachable(e),
    }
}

fn exit_unreachable(e: anyhow::Error) -> ! {
    eprintln!("Error: {:#}", e);
    eprintln!("\nIs the daemon running? Try starting it with: clipdeckd");
    std::process::exit(1);
}

async fn connect() -> Result<(BufReader<OwnedReadHalf>, OwnedWriteHalf)> {
    let socket_path = common::get_socket_path();
    let stream = UnixStream::connect(&socket_path)
        .await
        .with_context(|| format!("Failed to connect to {}", socket_path.display()))?;
    let (reader, writer) = stream.into_split();
    Ok((BufReader::new(reader), writer))
}

async fn write_command(writer: &mut OwnedWriteHalf, command: &Command) -> Result<()> {
    let command_json = serde_json::to_string(command)?;
    writer.write_all(command_json.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

async fn read_response(reader: &mut BufReader<OwnedReadHalf>) -> Result<Option<Response>> {
    let mut response_line = String::new();
    if reader.read_line(&mut response_line).await? == 0 {
        return Ok(None);
    }
    let response = serde_json::from_str(&response_line).context("Malformed daemon response")?;
    Ok(Some(response))
}

async fn send_command(command: Command) -> Result<Response> {
    let (mut reader, mut writer) = connect().await?;
    write_command(&mut writer, &command).await?;
    read_response(&mut reader)
        .await?
        .context("Daemon closed the connection without answering")
}

async fn watch() -> Result<()> {
    let (mut reader, mut writer) = connect().await?;
    write_command(&mut writer, &Command::Subscribe).await?;

    while let Some(response) = read_response(&mut reader).await? {
        match response {
            Response::Ok => println!("Watching pushed actions (Ctrl+C to stop)"),
            other => handle_response(other),
        }
    }

    println!("Daemon closed the stream");
    Ok(())
}

fn handle_response(response: Response) {
    match response {
        Response::Ok => {
            println!("✓ Success");
        }
        Response::Error(e) => {
            eprintln!("✗ Error: {}", e);
            std::process::exit(1);
        }
        Response::Pong => {
            println!("✓ Daemon is running");
        }
        Response::Status(status) => {
            println!("Daemon Status:");
            println!("  Version: {}", status.version);
            println!("  Uptime: {}s", status.uptime_secs);
            println!(
                "  Active video: {}",
                status.active_video.as_deref().unwrap_or("none")
            );
            println!("  Mounted: {}", status.mounted);
            println!("  Registered: {}", status.registered);
            println!("  Loading: {}", status.loading);
            println!("  Errored: {}", status.errored);
        }
        Response::Videos(videos) => {
            if videos.is_empty() {
                println!("No mounted videos");
            }
            for video in videos {
                let marker = if video.active { "*" } else { " " };
                let playback = if video.paused { "paused" } else { "playing" };
                let scheduling = match (video.registered, video.prefers_to_play) {
                    (false, _) => "unregistered",
                    (true, true) => "wants to play",
                    (true, false) => "held",
                };
                println!("{} {} - {}, {}", marker, video.id, playback, scheduling);

                if let Some(load) = video.load {
                    let phase = if let Some(ref error) = load.error {
                        format!("error: {}", error)
                    } else if load.is_loading {
                        "loading".to_string()
                    } else if load.loaded_data_fired {
                        "ready".to_string()
                    } else {
                        "idle".to_string()
                    };
                    println!("    {} ({})", load.src, phase);
                    if !load.error_details.is_empty() {
                        println!("    details: {}", load.error_details);
                    }
                }
            }
        }
        Response::Actions(actions) => {
            if actions.is_empty() {
                println!("✓ Success (no actions)");
            }
            for action in actions {
                println!("  {}", describe_action(&action));
            }
        }
    }
}

fn describe_action(action: &HostAction) -> String {
    match action {
        HostAction::Play { id } => format!("{}: play", id),
        HostAction::Pause { id } => format!("{}: pause", id),
        HostAction::SetSource { id, src } => format!("{}: src = {}", id, src),
        HostAction::RemoveSource { id } => format!("{}: remove src", id),
        HostAction::SetPreload { id, preload } => format!("{}: preload = {}", id, preload.as_str()),
        HostAction::SetPoster { id, poster } => format!("{}: poster = {}", id, poster),
        HostAction::Load { id } => format!("{}: load()", id),
        HostAction::StreamAttach { id } => format!("{}: attach streaming client", id),
        HostAction::StreamLoadSource { id, url } => format!("{}: stream {}", id, url),
        HostAction::StreamRecoverMedia { id } => format!("{}: recover media error", id),
        HostAction::StreamDestroy { id } => format!("{}: destroy streaming client", id),
        HostAction::LoadStateChanged { id, state } => match state.error {
            Some(ref error) => format!("{}: load failed: {}", id, error),
            None if state.is_loading => format!("{}: loading {}", id, state.src),
            None => format!("{}: loaded {}", id, state.src),
        },
        HostAction::VisibilityChanged { id, visible } => {
            format!(
                "{}: {}",
                id,
                if *visible { "visible" } else { "hidden" }
            )
        }
    }
}
