mod app;
mod config;
mod frontend;
mod keys;
mod launch;
mod logging;
mod workspaces;

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tokio::sync::mpsc;
use warren_db::presets;

use app::App;
use frontend::HostTerminal;

/// Terminal multiplexer for coding agents.
#[derive(Parser, Debug)]
#[command(name = "warren", version, about)]
struct Cli {
    /// Workspaces to open. Defaults to the current directory.
    paths: Vec<PathBuf>,

    /// Launch preset for new tabs (see the `launch_presets` table).
    #[arg(short, long)]
    preset: Option<String>,

    /// Database file. Defaults to ~/.warren/warren.db.
    #[arg(long)]
    db: Option<PathBuf>,

    /// Most agents kept attached at once; older ones are detached. 0 means
    /// unlimited.
    #[arg(long, value_name = "N")]
    agent_limit: Option<usize>,

    /// Start in the monitor grid.
    #[arg(long)]
    monitor: bool,

    /// Open every worktree of each given repository.
    #[arg(long)]
    all_worktrees: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let home = warren_home().context("could not determine home directory")?;
    logging::init(&home.join("warren.log"))?;

    let db_path = cli.db.clone().unwrap_or_else(|| home.join("warren.db"));
    let db = warren_db::open(&db_path).with_context(|| format!("opening {}", db_path.display()))?;
    let seeded = presets::seed_builtin_presets(&db)?;
    if seeded > 0 {
        tracing::info!("seeded {seeded} built-in presets");
    }

    let mut cfg = config::load(&db);
    if let Some(limit) = cli.agent_limit {
        cfg.attached_agent_limit = (limit > 0).then_some(limit);
    }
    let preset = cli.preset.clone().unwrap_or_else(|| config::default_preset(&db));
    // Fail before touching the terminal.
    launch::find(&db, &preset)?;

    let paths = workspace_paths(&cli)?;
    let (cols, rows) = HostTerminal::size()?;
    tracing::info!("starting with {} workspaces in {cols}x{rows}", paths.len());

    let mut host = HostTerminal::enter()?;
    let (input_tx, input_rx) = mpsc::channel(256);
    frontend::spawn_input(input_tx)?;

    let mut app = App::new(db, cfg, cols, rows, preset);
    for path in paths {
        app.open_workspace(path);
    }
    if cli.monitor {
        app.set_monitor(true);
    }

    let result = app.run(&mut host, input_rx).await;
    drop(host);
    if let Err(e) = &result {
        tracing::error!("exiting on error: {e:#}");
    }
    result
}

fn workspace_paths(cli: &Cli) -> anyhow::Result<Vec<PathBuf>> {
    let given = if cli.paths.is_empty() {
        vec![std::env::current_dir()?]
    } else {
        cli.paths.clone()
    };
    if !cli.all_worktrees {
        return Ok(given);
    }
    let mut paths: Vec<PathBuf> = Vec::new();
    for path in given.iter().flat_map(|p| workspaces::worktree_paths(p)) {
        if !paths.contains(&path) {
            paths.push(path);
        }
    }
    Ok(paths)
}

/// `~/.warren`, created if missing.
fn warren_home() -> anyhow::Result<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from).context("HOME is not set")?;
    let dir = home.join(".warren");
    std::fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
    Ok(dir)
}
