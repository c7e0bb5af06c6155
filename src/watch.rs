//! Change-Detection Loop (component E).
//!
//! Starting from the tracee stopped at `main`, single-steps until the
//! tracee exits, emitting a [`ChangeEvent`] for every distinct value
//! observed at the watched address. Arming a hardware watchpoint first is a
//! best-effort optimization; its failure never aborts the trace.

use nix::sys::signal::Signal;
use serde::Serialize;

use crate::debugregs;
use crate::error::TraceeControlError;
use crate::resolve::ResolvedTarget;
use crate::sink::Sink;
use crate::tracee::{TraceeController, TraceeStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChangeEvent {
    pub previous_value: u64,
    pub current_value: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceOutcome {
    Exited(i32),
    Signaled(i32),
}

fn try_arm_watchpoint(tracee: &TraceeController, target: &ResolvedTarget) -> anyhow::Result<()> {
    let descriptor = debugregs::encode(target.variable_runtime_address, target.variable_size)?;
    let (_, len) = tracee.get_debug_regs()?;
    let image = debugregs::build_image(&descriptor);
    tracee.set_debug_regs(&image, len)?;
    Ok(())
}

/// Pure comparison driving the loop's core guarantee: emits an event only on
/// an actual difference, and threads `last_value` forward so consecutive
/// events chain (`e_{i+1}.previous_value == e_i.current_value`).
fn detect_change(last_value: &mut u64, current: u64) -> Option<ChangeEvent> {
    if current == *last_value {
        return None;
    }

    let event = ChangeEvent {
        previous_value: *last_value,
        current_value: current,
    };
    *last_value = current;
    Some(event)
}

pub fn run_change_detection(
    tracee: &TraceeController,
    target: &ResolvedTarget,
    variable_name: &str,
    sink: &mut dyn Sink,
) -> Result<TraceOutcome, TraceeControlError> {
    let baseline = tracee.peek_word(target.variable_runtime_address)?;
    sink.initial_value(target.variable_runtime_address, baseline);

    match try_arm_watchpoint(tracee, target) {
        Ok(()) => log::info!(
            "hardware watchpoint armed at 0x{:x}",
            target.variable_runtime_address
        ),
        Err(e) => log::warn!(
            "hardware watchpoint unavailable, falling back to single-step polling: {}",
            e
        ),
    }

    let mut last_value = baseline;
    let mut pending_signal: Option<Signal> = None;

    loop {
        tracee.single_step(pending_signal.take())?;
        let status = tracee.wait_for_stop()?;

        match status {
            TraceeStatus::Exited(code) => {
                sink.terminated_exit(code);
                return Ok(TraceOutcome::Exited(code));
            }
            TraceeStatus::Signaled(signal) => {
                sink.terminated_signal(signal);
                return Ok(TraceOutcome::Signaled(signal));
            }
            TraceeStatus::Stopped(Some(signal)) if signal != Signal::SIGTRAP => {
                log::info!("tracee stopped by signal {}, forwarding", signal);
                sink.signal_received(signal as i32);
                pending_signal = Some(signal);
            }
            TraceeStatus::Stopped(_) => {
                // Either a genuine trap (single-step or a fired hardware
                // watchpoint, indistinguishable here and both harmless) or
                // an unrecognized stop treated as one; either way, sample.
                let current = tracee.peek_word(target.variable_runtime_address)?;
                if let Some(event) = detect_change(&mut last_value, current) {
                    sink.change(variable_name, event.previous_value, event.current_value);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_event_for_repeated_value() {
        let mut last = 5u64;
        assert_eq!(detect_change(&mut last, 5), None);
        assert_eq!(last, 5);
    }

    #[test]
    fn emits_event_on_difference_and_advances_last_value() {
        let mut last = 0u64;
        let event = detect_change(&mut last, 1).unwrap();
        assert_eq!(event.previous_value, 0);
        assert_eq!(event.current_value, 1);
        assert_eq!(last, 1);
    }

    #[test]
    fn chained_events_satisfy_the_ordering_invariant() {
        let baseline = 0u64;
        let mut last = baseline;
        let samples = [0u64, 1, 1, 2, 2, 2, 3];

        let events: Vec<ChangeEvent> = samples
            .iter()
            .filter_map(|&sample| detect_change(&mut last, sample))
            .collect();

        assert_eq!(events.len(), 3);
        assert_eq!(events[0].previous_value, baseline);
        for pair in events.windows(2) {
            assert_eq!(pair[0].current_value, pair[1].previous_value);
        }
        for event in &events {
            assert_ne!(event.previous_value, event.current_value);
        }
    }

    #[test]
    fn write_same_value_repeatedly_yields_exactly_one_event() {
        let mut last = 0u64;
        let samples = [5u64, 5, 5];
        let events: Vec<ChangeEvent> = samples
            .iter()
            .filter_map(|&sample| detect_change(&mut last, sample))
            .collect();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0], ChangeEvent { previous_value: 0, current_value: 5 });
    }
}
