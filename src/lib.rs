pub mod breakpoint;
pub mod config;
pub mod debugregs;
pub mod error;
pub mod resolve;
pub mod sink;
pub mod tracee;
pub mod watch;

use config::Config;
use error::TraceError;
use sink::Sink;
use tracee::TraceeController;
use watch::TraceOutcome;

/// Runs a full trace: resolves addresses, drives the tracee to `main`, then
/// runs the change-detection loop until it exits, reporting everything
/// through `sink` as it happens.
pub fn run_trace(config: &Config, sink: &mut dyn Sink) -> Result<TraceOutcome, TraceError> {
    let target = resolve::resolve(config)?;
    sink.resolution(&target);

    let tracee = TraceeController::new(config.tracee_pid);
    breakpoint::run_to_main(&tracee, target.main_runtime_address)?;

    let outcome =
        watch::run_change_detection(&tracee, &target, &config.variable_name, sink)?;

    Ok(outcome)
}
