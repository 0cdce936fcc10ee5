mod config;
mod events;
mod scenario;
mod tui;

use std::io;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use clap::Parser;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal::{self, EnterAlternateScreen, LeaveAlternateScreen};
use crossterm::{cursor, execute};
use log::info;
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;

use netemu::LinkConditions;

use config::SimConfig;
use scenario::{ScenarioSettings, Simulation};
use tui::TuiState;

#[derive(Parser)]
#[command(name = "netemu-sim")]
#[command(about = "Host and clients syncing state over an emulated UDP network")]
struct Args {
    #[arg(short, long, default_value_t = 2)]
    clients: usize,

    #[arg(short, long, default_value_t = 30, help = "Simulated seconds to run")]
    duration: u64,

    #[arg(long, default_value_t = 16.0, help = "Milliseconds per simulation step")]
    tick_ms: f64,

    #[arg(long, default_value_t = 0.0, help = "Delivery lag in ms")]
    lag: f64,

    #[arg(long, default_value_t = 0.0, help = "Packet drop ratio (0-1)")]
    drop: f64,

    #[arg(long)]
    seed: Option<u64>,

    #[arg(long, default_value_t = 1)]
    app_id: u16,

    #[arg(long, default_value_t = 9000)]
    host_port: u16,

    #[arg(long, help = "JSON file with client/host overrides")]
    config: Option<PathBuf>,

    #[arg(long)]
    headless: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => SimConfig::load(path)?,
        None => SimConfig::default(),
    };

    let settings = ScenarioSettings {
        clients: args.clients,
        application_id: args.app_id,
        host_port: args.host_port,
        tick_ms: args.tick_ms.max(1.0),
        conditions: LinkConditions::new(args.lag, args.drop),
        seed: args.seed.unwrap_or_else(rand::random),
        client: config.client,
        host: config.host,
    };
    let duration_ms = args.duration as f64 * 1000.0;

    if args.headless {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
        info!("Seed {}", settings.seed);
        let mut simulation = Simulation::new(settings)?;
        run_headless(&mut simulation, duration_ms)?;
    } else {
        let mut simulation = Simulation::new(settings)?;
        run_with_tui(&mut simulation, duration_ms)?;
    }

    Ok(())
}

fn run_headless(simulation: &mut Simulation, duration_ms: f64) -> Result<()> {
    while simulation.time() < duration_ms {
        simulation.step()?;
        for event in simulation.drain_events() {
            if event.is_noteworthy() {
                info!("{}", event);
            }
        }
    }
    simulation.shutdown();

    let stats = simulation.stats();
    info!(
        "Finished after {}: {}/{} clients connected, {} peers on host",
        tui::format_duration((stats.time_ms / 1000.0) as u64),
        stats.connected_clients(),
        stats.clients.len(),
        stats.peers.len()
    );
    info!(
        "Host: {} sent / {} recv, {} dropped, {} rejected, {} out",
        stats.host.packets_sent,
        stats.host.packets_received,
        stats.host.packets_dropped,
        stats.host.packets_rejected,
        tui::format_bytes(stats.host.bytes_sent)
    );
    info!(
        "Clients: {} sent / {} recv, {} dropped, {} rejected, {} out",
        stats.clients_total.packets_sent,
        stats.clients_total.packets_received,
        stats.clients_total.packets_dropped,
        stats.clients_total.packets_rejected,
        tui::format_bytes(stats.clients_total.bytes_sent)
    );
    Ok(())
}

fn run_with_tui(simulation: &mut Simulation, duration_ms: f64) -> Result<()> {
    terminal::enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, cursor::Hide)?;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut tui_state = TuiState::new();
    if let Some(addr) = simulation.local_addr() {
        tui_state.log(format!("Host listening on {}", addr));
    }

    let result = tui_loop(&mut terminal, simulation, &mut tui_state, duration_ms);

    simulation.shutdown();
    terminal::disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, cursor::Show)?;

    result
}

fn tui_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    simulation: &mut Simulation,
    tui_state: &mut TuiState,
    duration_ms: f64,
) -> Result<()> {
    let tick = Duration::from_secs_f64(simulation.tick_ms() / 1000.0);

    loop {
        let started = Instant::now();

        if !tui_state.is_paused() && simulation.time() < duration_ms {
            simulation.step()?;
            for event in simulation.drain_events() {
                tui_state.log_event(&event);
            }
        }

        if event::poll(Duration::from_millis(1))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    let conditions = simulation.conditions();
                    match key.code {
                        KeyCode::Char('q') | KeyCode::Esc => break,
                        KeyCode::Char(' ') => tui_state.toggle_pause(),
                        KeyCode::Up => simulation.set_conditions(LinkConditions::new(
                            conditions.lag_ms,
                            conditions.packet_drop_ratio + tui::DROP_STEP,
                        )),
                        KeyCode::Down => simulation.set_conditions(LinkConditions::new(
                            conditions.lag_ms,
                            conditions.packet_drop_ratio - tui::DROP_STEP,
                        )),
                        KeyCode::Right => simulation.set_conditions(LinkConditions::new(
                            conditions.lag_ms + tui::LAG_STEP_MS,
                            conditions.packet_drop_ratio,
                        )),
                        KeyCode::Left => simulation.set_conditions(LinkConditions::new(
                            conditions.lag_ms - tui::LAG_STEP_MS,
                            conditions.packet_drop_ratio,
                        )),
                        _ => {}
                    }
                }
            }
        }

        let stats = simulation.stats();
        terminal.draw(|frame| {
            tui::render(frame, tui_state, &stats);
        })?;

        if let Some(rest) = tick.checked_sub(started.elapsed()) {
            thread::sleep(rest);
        }
    }

    Ok(())
}
