use std::path::PathBuf;
use std::process::{self, Command};

use anyhow::{anyhow, Context, Result};
use clap::{Parser, ValueEnum};
use nix::sys::ptrace;
use nix::sys::wait::waitpid;
use nix::unistd::Pid;
use spawn_ptrace::CommandPtraceSpawn;

use globtrace::config::Config;
use globtrace::sink::{JsonSink, Sink, TextSink};
use globtrace::watch::TraceOutcome;

#[derive(Copy, Clone, Debug, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

/// Traces every write to a global variable in an AArch64 ELF executable.
#[derive(Parser, Debug)]
#[command(name = "globtrace", version, about)]
struct Args {
    /// The executable to trace
    executable_path: Option<PathBuf>,

    /// Arguments forwarded to the tracee
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    tracee_args: Vec<String>,

    /// Global variable to watch, by its linker or demangled source-level name
    #[arg(long)]
    var: String,

    /// Attach to an already-running pid instead of spawning `executable_path`
    #[arg(long, conflicts_with = "tracee_args")]
    attach: Option<i32>,

    /// Output format for reported events
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,
}

/// Spawns `executable_path` with ptrace armed, or attaches to `--attach`,
/// returning once the tracee is stopped at its initial (post-exec) stop.
/// This is the CLI front-end's job per the core's contract: the core never
/// performs this first wait itself.
fn obtain_tracee(args: &Args) -> Result<Pid> {
    if let Some(raw_pid) = args.attach {
        let pid = Pid::from_raw(raw_pid);
        ptrace::attach(pid).with_context(|| format!("failed to attach to pid {}", raw_pid))?;
        waitpid(pid, None).with_context(|| format!("failed to wait for pid {} to stop", raw_pid))?;
        return Ok(pid);
    }

    let executable_path = args
        .executable_path
        .as_ref()
        .ok_or_else(|| anyhow!("an executable path or --attach <pid> is required"))?;

    let child = Command::new(executable_path)
        .args(&args.tracee_args)
        .spawn_ptrace()
        .with_context(|| format!("failed to spawn {}", executable_path.display()))?;

    log::debug!(
        "spawned {} for tracing as child {}",
        executable_path.display(),
        child.id()
    );

    Ok(Pid::from_raw(child.id() as i32))
}

fn run() -> Result<TraceOutcome> {
    let args = Args::parse();

    let executable_path = args
        .executable_path
        .clone()
        .ok_or_else(|| anyhow!("an executable path is required for symbol resolution"))?;

    let tracee_pid = obtain_tracee(&args)?;

    let config = Config {
        executable_path,
        variable_name: args.var.clone(),
        tracee_pid,
    };

    let stdout = std::io::stdout();
    let mut sink: Box<dyn Sink> = match args.format {
        OutputFormat::Text => Box::new(TextSink::new(stdout.lock())),
        OutputFormat::Json => Box::new(JsonSink::new(stdout.lock())),
    };

    Ok(globtrace::run_trace(&config, sink.as_mut())?)
}

fn main() {
    env_logger::init();

    process::exit(match run() {
        Ok(_outcome) => 0,
        Err(e) => {
            eprintln!("Fatal: {:#}", e);
            1
        }
    });
}
