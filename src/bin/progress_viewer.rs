//! Thin interactive progress viewer, keyed on a backend pid.
//!
//! The live `pg_query_plan(pid)` polling loop is out of scope for this crate
//! (see `planpulse::progress::orchestrator`): this binary instead re-reads a
//! leader/worker plan JSON document set from disk on every tick, which is
//! how the core's input is shaped regardless of where it came from. Point it
//! at a directory a real connector is dropping snapshots into and it behaves
//! the same way against `pg_query_plan` live output.
//!
//! Commands: `help`, `verbose`, `quit`. An empty line re-ticks.

use std::error::Error as StdError;
use std::path::PathBuf;

use clap::Parser;
use ratatui::backend::CrosstermBackend;
use ratatui::style::{Color, Style};
use ratatui::widgets::{Block, Borders, Gauge};
use ratatui::{Terminal, TerminalOptions, Viewport};
use reedline::{DefaultPrompt, DefaultPromptSegment, Reedline, Signal};

use planpulse::logging;
use planpulse::progress::orchestrator::{compute_progress, WorkerKind, WorkerSample};
use planpulse::repository::{FsRepository, RepositoryRegressionSource};

/// Watch the estimated completion progress of one backend's in-flight query.
#[derive(Parser, Debug)]
#[command(name = "progress-viewer")]
#[command(version, about = "Interactively watch a running query's estimated completion progress")]
struct Args {
    /// Base directory containing `pgpi_repository/` (for looking up stored
    /// regression parameters; defaults to the user's home directory).
    #[arg(long, value_name = "DIR")]
    base_dir: Option<PathBuf>,

    /// serverId to resolve regression parameters against.
    #[arg(long, default_value = "default")]
    server_id: String,

    /// Backend pid this viewer is tracking (cosmetic: labels the display).
    #[arg(long)]
    pid: i64,

    /// Leader plan JSON document (what a real connector would fetch from
    /// `pg_query_plan(pid)` for `worker_type = "leader"`).
    #[arg(long, value_name = "FILE")]
    leader_plan: PathBuf,

    /// Worker plan JSON documents (one per parallel worker backend), if any.
    #[arg(long = "worker-plan", value_name = "FILE")]
    worker_plans: Vec<PathBuf>,

    /// queryid for this backend (0 lets the orchestrator resolve via
    /// query_hash, matching parallel workers that haven't learned theirs yet).
    #[arg(long, default_value_t = 0)]
    queryid: i64,

    #[arg(long, default_value_t = 1)]
    query_hash: i64,

    /// Increase logging verbosity (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn load_samples(args: &Args) -> Result<Vec<WorkerSample>, Box<dyn StdError>> {
    let mut samples = Vec::new();
    let leader_json: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&args.leader_plan)?)?;
    samples.push(WorkerSample {
        kind: WorkerKind::Leader,
        queryid: args.queryid,
        planid: 0,
        plan_json: leader_json,
        query_hash: args.query_hash,
    });
    for path in &args.worker_plans {
        let worker_json: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(path)?)?;
        samples.push(WorkerSample {
            kind: WorkerKind::Worker,
            queryid: args.queryid,
            planid: 0,
            plan_json: worker_json,
            query_hash: args.query_hash,
        });
    }
    Ok(samples)
}

type ViewerTerminal = Terminal<CrosstermBackend<std::io::Stdout>>;

fn draw_gauge(terminal: &mut ViewerTerminal, pid: i64, queryid: i64, progress: f64) -> std::io::Result<()> {
    terminal.draw(|frame| {
        let label = format!("pid {pid} · queryid {queryid} · {:.2}%", progress * 100.0);
        let gauge = Gauge::default()
            .block(Block::default().borders(Borders::ALL).title("query progress"))
            .gauge_style(Style::default().fg(Color::Cyan))
            .ratio(progress.clamp(0.0, 1.0))
            .label(label);
        frame.render_widget(gauge, frame.area());
    })?;
    Ok(())
}

fn tick(args: &Args, repo: &FsRepository, terminal: &mut ViewerTerminal, verbose: bool) {
    let samples = match load_samples(args) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("could not load plan snapshot: {e}");
            return;
        }
    };

    let source = RepositoryRegressionSource {
        repo,
        server_id: args.server_id.clone(),
    };

    match compute_progress(&samples, &source) {
        Ok(results) => {
            for (queryid, progress) in results {
                if let Err(e) = draw_gauge(terminal, args.pid, queryid, progress) {
                    eprintln!("could not render progress bar: {e}");
                }
                if verbose {
                    let now = chrono::Local::now().format("%H:%M:%S");
                    let detail = format!(
                        "[{now}] leader plan: {} | workers: {}",
                        args.leader_plan.display(),
                        args.worker_plans.len()
                    );
                    for line in textwrap::wrap(&detail, 80) {
                        println!("    {line}");
                    }
                }
            }
        }
        Err(e) => eprintln!("progress unavailable: {e}"),
    }
}

fn print_help() {
    println!("commands:");
    println!("  help      show this message");
    println!("  verbose   toggle verbose per-tick detail");
    println!("  quit      exit the viewer");
    println!("  <enter>   re-tick against the current plan snapshot");
}

fn main() -> Result<(), Box<dyn StdError>> {
    let args = Args::parse();
    logging::init(args.verbose);

    let base_dir = args
        .base_dir
        .clone()
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")));
    let repo = FsRepository::new(base_dir);

    // Inline viewport: draws a few lines above the next prompt rather than
    // taking over the whole screen, so it coexists with reedline's own
    // (non-raw-mode) line reads between ticks.
    let mut terminal = Terminal::with_options(
        CrosstermBackend::new(std::io::stdout()),
        TerminalOptions {
            viewport: Viewport::Inline(3),
        },
    )?;

    let mut verbose = args.verbose > 0;
    let mut line_editor = Reedline::create();
    let prompt = DefaultPrompt::new(
        DefaultPromptSegment::Basic(format!("pid:{}", args.pid)),
        DefaultPromptSegment::Empty,
    );

    print_help();
    tick(&args, &repo, &mut terminal, verbose);

    loop {
        match line_editor.read_line(&prompt) {
            Ok(Signal::Success(input)) => {
                let cmd = input.trim();
                match cmd {
                    "" => tick(&args, &repo, &mut terminal, verbose),
                    "help" => print_help(),
                    "verbose" => {
                        verbose = !verbose;
                        println!("verbose = {verbose}");
                    }
                    "quit" => break,
                    other => println!("unrecognized command '{other}'; type 'help'"),
                }
            }
            Ok(Signal::CtrlC) | Ok(Signal::CtrlD) => break,
            Err(e) => {
                eprintln!("input error: {e}");
                break;
            }
        }
    }

    Ok(())
}
