use clap::{Args, Parser, Subcommand};
use lib::client::{EventForwarder, GroupAddress, Session, SessionError, SessionEvent};
use lib::config::ClientConfig;
use lib::project::Project;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};
use tokio::sync::mpsc;

mod view;

#[derive(Parser)]
#[command(name = "sage")]
#[command(about = "sage: remote control for a saged lighting server", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

/// Where to find the config, the project descriptor and the saged endpoint.
#[derive(Args, Clone)]
struct Target {
    /// Config file path (default: SAGE_CONFIG_PATH or ~/.sage/config.json)
    #[arg(long, short, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Project descriptor (default: config `project` or project.json next to the config)
    #[arg(long, short, value_name = "PATH")]
    project: Option<PathBuf>,

    /// saged WebSocket URI (default: SAGE_ENDPOINT or the project's `saged`)
    #[arg(long, short, value_name = "URI")]
    endpoint: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory, a default config and a sample project.json to edit.
    Init {
        /// Config file path (default: SAGE_CONFIG_PATH or ~/.sage/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// List the project's locations and the widgets at each.
    Locations {
        #[command(flatten)]
        target: Target,
    },

    /// Switch lighting groups on.
    On {
        #[command(flatten)]
        target: Target,
        #[arg(required = true, value_name = "GA")]
        groups: Vec<GroupAddress>,
    },

    /// Switch lighting groups off.
    Off {
        #[command(flatten)]
        target: Target,
        #[arg(required = true, value_name = "GA")]
        groups: Vec<GroupAddress>,
    },

    /// Ramp one group to a level (0.0 - 1.0).
    Ramp {
        #[command(flatten)]
        target: Target,
        #[arg(value_name = "GA")]
        group: GroupAddress,
        level: f64,
        /// Ramp duration in seconds (0 = immediate)
        #[arg(long, short, default_value_t = 0)]
        duration: u32,
    },

    /// Stop a ramp in progress.
    TerminateRamp {
        #[command(flatten)]
        target: Target,
        #[arg(value_name = "GA")]
        group: GroupAddress,
    },

    /// Print current levels (default: every widget in the project).
    States {
        #[command(flatten)]
        target: Target,
        #[arg(value_name = "GA")]
        groups: Vec<GroupAddress>,
    },

    /// Print bus events as they happen. Reconnects until interrupted.
    Watch {
        #[command(flatten)]
        target: Target,
    },

    /// Interactive remote control (type `help` for commands).
    Control {
        #[command(flatten)]
        target: Target,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    let result = match cli.command {
        Some(Commands::Version) => {
            println!("sage {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Some(Commands::Init { config }) => run_init(config),
        Some(Commands::Locations { target }) => run_locations(&target),
        Some(Commands::On { target, groups }) => {
            run_command(&target, |s| s.lighting_group_on(&groups)).await
        }
        Some(Commands::Off { target, groups }) => {
            run_command(&target, |s| s.lighting_group_off(&groups)).await
        }
        Some(Commands::Ramp {
            target,
            group,
            level,
            duration,
        }) => run_command(&target, |s| s.lighting_group_ramp(group, duration, level)).await,
        Some(Commands::TerminateRamp { target, group }) => {
            run_command(&target, |s| s.lighting_group_terminate_ramp(group)).await
        }
        Some(Commands::States { target, groups }) => run_states(&target, groups).await,
        Some(Commands::Watch { target }) => run_view(&target, false).await,
        Some(Commands::Control { target }) => run_view(&target, true).await,
        None => {
            println!("Run with --help for usage");
            Ok(())
        }
    };

    if let Err(e) = result {
        log::error!("{:#}", e);
        eprintln!("sage: {:#}", e);
        std::process::exit(1);
    }
}

fn run_init(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(lib::config::default_config_path);
    let dir = lib::init::init_config_dir(&path)?;
    println!("initialized configuration at {}", dir.display());
    Ok(())
}

/// Config, project and endpoint resolved for one invocation.
struct Resolved {
    project: Option<Project>,
    endpoint: String,
    client: ClientConfig,
}

/// `--endpoint` makes the project optional; without it the project must exist and supplies
/// the endpoint (unless SAGE_ENDPOINT is set).
fn resolve(target: &Target) -> anyhow::Result<Resolved> {
    let (config, config_path) = lib::config::load_config(target.config.clone())?;
    let project_path = target
        .project
        .clone()
        .unwrap_or_else(|| lib::config::resolve_project_path(&config, &config_path));

    let project = if target.endpoint.is_some() && !project_path.exists() {
        None
    } else {
        lib::init::require_project(&project_path)?;
        Some(lib::project::load_project(&project_path)?)
    };
    let endpoint = match (&target.endpoint, &project) {
        (Some(uri), _) => uri.trim().to_string(),
        (None, Some(project)) => lib::config::resolve_endpoint(project),
        (None, None) => anyhow::bail!("no saged endpoint configured"),
    };
    Ok(Resolved {
        project,
        endpoint,
        client: config.client,
    })
}

fn open_session(
    endpoint: &str,
    client: &ClientConfig,
) -> anyhow::Result<(Session, mpsc::UnboundedReceiver<SessionEvent>)> {
    let session = Session::new(endpoint);
    if !session.has_transport() {
        anyhow::bail!("no WebSocket transport available");
    }
    session.set_close_timeout(client.close_timeout());
    let (forwarder, events) = EventForwarder::channel();
    session.set_handler(Arc::new(forwarder));
    Ok((session, events))
}

/// Wait for the first `Connected`, failing on disconnect or timeout.
async fn wait_connected(
    session: &Session,
    events: &mut mpsc::UnboundedReceiver<SessionEvent>,
    client: &ClientConfig,
) -> anyhow::Result<()> {
    let wait = async {
        while let Some(event) = events.recv().await {
            match event {
                SessionEvent::Connected => return Ok(()),
                SessionEvent::Disconnected(close) => {
                    anyhow::bail!("could not connect to {} ({})", session.uri(), close)
                }
                _ => continue,
            }
        }
        anyhow::bail!("session ended before connecting")
    };
    tokio::time::timeout(client.connect_timeout(), wait)
        .await
        .map_err(|_| anyhow::anyhow!("timed out connecting to {}", session.uri()))?
}

/// Connect, send one command, close.
async fn run_command<F>(target: &Target, send: F) -> anyhow::Result<()>
where
    F: FnOnce(&Session) -> Result<(), SessionError>,
{
    let resolved = resolve(target)?;
    let (session, mut events) = open_session(&resolved.endpoint, &resolved.client)?;
    let task = session.connect();
    wait_connected(&session, &mut events, &resolved.client).await?;
    send(&session)?;
    session.close();
    let _ = task.await;
    Ok(())
}

async fn run_states(target: &Target, groups: Vec<GroupAddress>) -> anyhow::Result<()> {
    let resolved = resolve(target)?;
    let groups = if groups.is_empty() {
        resolved
            .project
            .as_ref()
            .map(Project::group_addresses)
            .unwrap_or_default()
    } else {
        groups
    };
    if groups.is_empty() {
        anyhow::bail!("no group addresses given and the project has no widgets");
    }

    let (session, mut events) = open_session(&resolved.endpoint, &resolved.client)?;
    let task = session.connect();
    wait_connected(&session, &mut events, &resolved.client).await?;
    session.get_light_states(&groups)?;

    let reply = async {
        while let Some(event) = events.recv().await {
            match event {
                SessionEvent::States(states) => return Some(states),
                SessionEvent::Disconnected(_) => return None,
                _ => continue,
            }
        }
        None
    };
    let states = tokio::time::timeout(resolved.client.connect_timeout(), reply)
        .await
        .map_err(|_| anyhow::anyhow!("no light_states reply from {}", session.uri()))?
        .ok_or_else(|| anyhow::anyhow!("connection closed before light_states reply"))?;

    for (group, level) in &states {
        let name = resolved
            .project
            .as_ref()
            .and_then(|p| p.widgets.get(group))
            .map(|w| w.name.as_str())
            .unwrap_or("");
        println!("{:>5}  {:<24} {:>3.0}%", group, name, level * 100.0);
    }

    session.close();
    let _ = task.await;
    Ok(())
}

fn run_locations(target: &Target) -> anyhow::Result<()> {
    let resolved = resolve(target)?;
    let Some(project) = resolved.project else {
        anyhow::bail!("no project descriptor");
    };
    println!("saged: {}", resolved.endpoint);
    for (id, name) in &project.locations {
        println!("{}: {}", id, name);
        for placed in project.widgets_at(*id) {
            println!(
                "  {:>5}  {:<24} {:?} (weight {})",
                placed.group, placed.widget.name, placed.widget.kind, placed.weight
            );
        }
    }
    Ok(())
}

/// Long-running view: `watch` prints events, `control` also reads commands from stdin.
async fn run_view(target: &Target, interactive: bool) -> anyhow::Result<()> {
    let resolved = resolve(target)?;
    let project = resolved.project.unwrap_or_else(|| Project {
        saged: resolved.endpoint.clone(),
        locations: Default::default(),
        widgets: Default::default(),
    });
    let (session, mut events) = open_session(&resolved.endpoint, &resolved.client)?;
    let mut view = view::View::new(
        session.clone(),
        project,
        resolved.client.reconnect_delay(),
        !interactive,
    );

    println!("connecting to {}...", session.uri());
    let _ = session.connect();

    let lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::warn!("listening for ctrl-c failed: {}", e);
            std::future::pending::<()>().await;
        }
    };
    let result = drive_view(&mut view, &mut events, lines, interactive, ctrl_c).await;
    session.close();
    result
}

/// Feed session events and (when `read_lines`) input lines to the view until `/quit`, the end
/// of the event stream, or `shutdown` resolves.
async fn drive_view<R, S>(
    view: &mut view::View,
    events: &mut mpsc::UnboundedReceiver<SessionEvent>,
    mut lines: Lines<R>,
    read_lines: bool,
    shutdown: S,
) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
    S: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    let mut lines_open = read_lines;
    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                view.handle_event(event);
            }
            line = lines.next_line(), if lines_open => {
                match line? {
                    Some(line) => {
                        if view.handle_line(line.trim()) == view::Flow::Quit {
                            break;
                        }
                    }
                    None => lines_open = false,
                }
            }
            _ = &mut shutdown => break,
        }
    }
    Ok(())
}
