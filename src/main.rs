mod backends;
mod config;
mod history;
mod keybindings;
mod monitor;
mod netperf;
mod process;
mod ui;

use anyhow::{Context, Result};
use clap::Parser;
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyEventKind},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{Terminal, backend::CrosstermBackend};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;

use crate::backends::{CaptureBackend, ProcfsSocketSource, select_capture_backend};
use crate::config::Config;
use crate::keybindings::{Action, action_for};
use crate::monitor::{ProcessFilter, ProcessMonitor, kill_process};
use crate::netperf::NetPerf;
use crate::process::SortMethod;
use crate::ui::AppState;

/// stortop - per-process CPU, memory, disk and network usage for a storage server
#[derive(Parser, Debug)]
#[command(name = "stortop")]
#[command(version)]
#[command(about = "Storage server process dashboard with per-process network accounting", long_about = None)]
struct Args {
    /// Config file (default: ~/.config/stortop/config.json)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Track processes whose name starts with this prefix
    #[arg(long, value_name = "PREFIX")]
    prefix: Option<String>,

    /// Track every process
    #[arg(long)]
    all: bool,

    /// Refresh interval in milliseconds
    #[arg(long, value_name = "MS")]
    interval: Option<u64>,

    /// Root of the proc filesystem
    #[arg(long, value_name = "PATH")]
    proc_root: Option<PathBuf>,

    /// Capture read timeout in milliseconds (default: block until a packet arrives)
    #[arg(long, value_name = "MS")]
    read_timeout: Option<u64>,

    /// Wait for capture threads to stop on exit
    #[arg(long)]
    wait_on_exit: bool,

    /// Write the effective configuration to the config file
    #[arg(long)]
    save_config: bool,

    /// List capture interfaces and exit
    #[arg(long)]
    list_interfaces: bool,
}

impl Args {
    /// Command line flags win over the config file
    fn apply(&self, config: &mut Config) {
        if let Some(prefix) = &self.prefix {
            config.process_prefix = prefix.clone();
        }
        if self.all {
            config.show_all = true;
        }
        if let Some(interval) = self.interval {
            config.tick_interval_ms = interval;
        }
        if let Some(root) = &self.proc_root {
            config.proc_root = root.clone();
        }
        if let Some(timeout) = self.read_timeout {
            config.capture.read_timeout_ms = Some(timeout);
        }
        if self.wait_on_exit {
            config.wait_for_capture_on_exit = true;
        }
    }
}

fn print_interfaces(config: &Config) -> Result<()> {
    println!("stortop v{} - Capture Interfaces\n", env!("CARGO_PKG_VERSION"));

    let Some(backend) = select_capture_backend() else {
        println!("  (no capture backend compiled in)");
        return Ok(());
    };

    let devices = backend
        .interfaces()
        .context("Failed to enumerate network interfaces")?;

    for device in devices {
        let addresses: Vec<String> = device.addresses.iter().map(|a| a.to_string()).collect();
        let status = if config.capture.is_ignored(&device.name) {
            "ignored"
        } else {
            "capturable"
        };
        println!(
            "  {:16} [{:?}] {:12} {}",
            device.name,
            device.link,
            status,
            addresses.join(", ")
        );
    }

    Ok(())
}

/// Start network accounting, or explain why the dashboard runs without it
fn start_netperf(config: &Config, pids: &[i32]) -> Option<NetPerf> {
    let Some(backend) = select_capture_backend() else {
        log::warn!("No packet capture backend available, network columns will stay at zero");
        return None;
    };
    let backend: Arc<dyn CaptureBackend> = Arc::from(backend);

    let source = ProcfsSocketSource::with_root(&config.proc_root);
    if !source.is_available() {
        log::warn!(
            "{:?} is not a proc filesystem, network columns will stay at zero",
            config.proc_root
        );
        return None;
    }

    match NetPerf::init(pids, Box::new(source), backend, config.capture.clone()) {
        Ok(netperf) => Some(netperf),
        Err(e) => {
            log::warn!("Network accounting disabled: {}", e);
            None
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if std::env::var("RUST_LOG").is_ok() {
        pretty_env_logger::formatted_builder()
            .parse_default_env()
            .init();
    }

    let config_path = match &args.config {
        Some(path) => path.clone(),
        None => Config::default_path()?,
    };
    let mut config = Config::load_from(&config_path)?;
    args.apply(&mut config);

    if args.save_config {
        config.save_to(&config_path)?;
    }

    if args.list_interfaces {
        return print_interfaces(&config);
    }

    let mut monitor = ProcessMonitor::new(
        ProcessFilter {
            prefix: config.process_prefix.clone(),
            show_all: config.show_all,
        },
        config.proc_root.clone(),
        None,
    );
    if let Some(netperf) = start_netperf(&config, &monitor.select_pids()) {
        monitor.attach_netperf(netperf);
    }

    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = AppState::new(config.sort, config.show_all);
    app.network_status = monitor.network_status();

    let res = run_app(&mut terminal, &mut app, &mut monitor, &config).await;

    // Restore terminal
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    monitor.shutdown(config.wait_for_capture_on_exit);

    if let Err(err) = res {
        log::error!("Error: {:?}", err);
        return Err(err);
    }

    Ok(())
}

/// Apply one key action. Returns `false` when the app should exit.
fn handle_action(app: &mut AppState, monitor: &mut ProcessMonitor, action: Action) -> bool {
    if action != Action::KillPending {
        app.pending_kill = false;
    }

    match action {
        Action::Quit => return false,
        Action::ToggleHelp => app.show_help = true,
        Action::SelectNext => app.select_next(),
        Action::SelectPrevious => app.select_previous(),
        Action::SelectFirst => app.select_first(),
        Action::SelectLast => app.select_last(),
        Action::SortByCpu => app.set_sort(SortMethod::Cpu),
        Action::SortByMem => app.set_sort(SortMethod::Mem),
        Action::SortByPid => app.set_sort(SortMethod::Pid),
        Action::ToggleAll => {
            app.show_all = !app.show_all;
            monitor.set_show_all(app.show_all);
            app.status_message = if app.show_all {
                "Showing all processes".to_string()
            } else {
                format!("Showing {}* processes", monitor.filter().prefix)
            };
        }
        Action::CycleInterface => {
            app.net.cycle();
            app.status_message = format!("Network panel: {}", app.net.selected().name);
        }
        Action::KillPending => {
            if !app.pending_kill {
                app.pending_kill = app.selected_row().is_some();
                if !app.pending_kill {
                    app.status_message = "No process selected".to_string();
                }
            } else {
                app.pending_kill = false;
                if let Some(row) = app.selected_row() {
                    let (pid, command) = (row.pid, row.command.clone());
                    app.status_message = match kill_process(pid) {
                        Ok(()) => format!("Sent SIGTERM to {} (PID {})", command, pid),
                        Err(e) => format!("{:#}", e),
                    };
                }
            }
        }
    }

    true
}

async fn run_app<B: ratatui::backend::Backend>(
    terminal: &mut Terminal<B>,
    app: &mut AppState,
    monitor: &mut ProcessMonitor,
    config: &Config,
) -> Result<()> {
    let mut update_interval = interval(config.tick_interval());

    loop {
        terminal.draw(|f| ui::draw_ui(f, app))?;

        // Handle input with timeout
        if event::poll(Duration::from_millis(100))? {
            if let Event::Key(key) = event::read()? {
                if key.kind != KeyEventKind::Press {
                    continue;
                }

                // If help is shown, any key closes it
                if app.show_help {
                    app.show_help = false;
                    continue;
                }

                if let Some(action) = action_for(&key) {
                    if !handle_action(app, monitor, action) {
                        return Ok(());
                    }
                }
            }
        }

        if tokio::time::timeout(Duration::from_millis(1), update_interval.tick())
            .await
            .is_ok()
        {
            let rows = monitor.update();
            app.net.refresh();
            app.update_rows(rows);
            app.network_status = monitor.network_status();
        }
    }
}
