//! Server Console - supervise a local game server and bridge its console.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use server_console::config::{ConfigLoader, ConsoleConfig};
use server_console::console::{classify, LaunchTarget};
use server_console::display;
use server_console::supervisor::{
    ProcessSupervisor, SupervisorError, SupervisorEvent, SupervisorEvents, SupervisorOptions,
    SupervisorState,
};

#[derive(Parser)]
#[command(
    name = "server-console",
    about = "Run a local game server and bridge its console",
    version
)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the server and forward terminal input to it.
    Run {
        /// Server directory containing the launch script.
        #[arg(short = 'd', long, default_value = ".")]
        server_dir: PathBuf,
        /// Explicit executable, instead of the launch script.
        #[arg(long)]
        launch: Option<PathBuf>,
        /// Seconds to wait for the server to exit after `stop`.
        #[arg(long)]
        shutdown_timeout: Option<u64>,
        /// Config file to use instead of the default search paths.
        #[arg(long)]
        config: Option<PathBuf>,
        /// Print events as JSON lines.
        #[arg(long)]
        json: bool,
        /// Print output without colors or decorations.
        #[arg(long)]
        raw: bool,
    },
    /// Print the display category for a line of output.
    Classify {
        /// Text to classify.
        text: String,
    },
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

/// Read terminal lines on a dedicated thread; stdin reads block.
fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(16);
    std::thread::spawn(move || {
        for line in std::io::stdin().lines() {
            let Ok(line) = line else { break };
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
    });
    rx
}

struct Renderer {
    json: bool,
    raw: bool,
}

impl Renderer {
    fn render(&self, event: &SupervisorEvent) {
        if self.json {
            display::print_json(event);
        } else {
            display::print_event(event, self.raw);
        }
    }

    fn drain(&self, events: &mut SupervisorEvents) {
        for event in events.drain() {
            self.render(&event);
        }
    }
}

fn load_config(path: Option<PathBuf>) -> Result<ConsoleConfig, String> {
    let loader = path.map_or_else(ConfigLoader::new, ConfigLoader::with_path);
    loader.load().map_err(|e| e.to_string())
}

async fn run(
    server_dir: PathBuf,
    launch: Option<PathBuf>,
    shutdown_timeout: Option<u64>,
    config: Option<PathBuf>,
    renderer: Renderer,
) -> ExitCode {
    let mut config = match load_config(config) {
        Ok(config) => config,
        Err(message) => {
            display::print_error(&message);
            return ExitCode::FAILURE;
        }
    };
    if let Some(secs) = shutdown_timeout {
        config.shutdown_timeout_secs = secs;
    }
    let timeout = config.shutdown_timeout();

    let target = match launch {
        Some(executable) => LaunchTarget::explicit(executable, Some(server_dir)),
        None => match LaunchTarget::find_in(&server_dir, config.launch_script.as_deref()) {
            Ok(target) => target,
            Err(e) => {
                display::print_error(&e.to_string());
                return ExitCode::FAILURE;
            }
        },
    };

    tracing::info!(
        executable = %target.executable.display(),
        working_dir = %target.working_dir.display(),
        shutdown_timeout_secs = config.shutdown_timeout_secs,
        "Starting server console"
    );

    let (supervisor, mut events) = ProcessSupervisor::spawn(SupervisorOptions::from(&config));
    if let Err(e) = supervisor.start_target(&target).await {
        tracing::error!(error = %e, "Server failed to start");
        renderer.drain(&mut events);
        let _ = supervisor.close(timeout).await;
        return ExitCode::FAILURE;
    }

    let mut input = spawn_stdin_reader();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut exited_on_its_own = false;
    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                renderer.render(&event);
                if let SupervisorEvent::StateChanged { to, .. } = event {
                    if matches!(to, SupervisorState::Stopped | SupervisorState::Crashed) {
                        exited_on_its_own = true;
                        break;
                    }
                }
            }
            line = input.recv() => {
                let Some(line) = line else {
                    tracing::info!("Terminal input closed, stopping server");
                    break;
                };
                match supervisor.submit_command(line).await {
                    // Both failures are already on the event queue.
                    Ok(())
                    | Err(SupervisorError::WriteFailed(_) | SupervisorError::InvalidCommand) => {}
                    Err(e) => display::print_error(&e.to_string()),
                }
            }
            _ = &mut ctrl_c => {
                tracing::info!("Interrupted, stopping server");
                break;
            }
        }
    }

    let crashed = supervisor.state() == SupervisorState::Crashed;
    let close = supervisor.close(timeout);
    tokio::pin!(close);
    let outcome = loop {
        tokio::select! {
            outcome = &mut close => break outcome,
            Some(event) = events.recv() => renderer.render(&event),
        }
    };
    renderer.drain(&mut events);

    if !exited_on_its_own && !renderer.json {
        display::print_shutdown_outcome(outcome);
    }

    if crashed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Run {
            server_dir,
            launch,
            shutdown_timeout,
            config,
            json,
            raw,
        } => {
            run(
                server_dir,
                launch,
                shutdown_timeout,
                config,
                Renderer { json, raw },
            )
            .await
        }
        Commands::Classify { text } => {
            println!("{}", classify(&text).as_str());
            ExitCode::SUCCESS
        }
    }
}
