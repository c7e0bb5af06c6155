use nix::errno::Errno;
use thiserror::Error;

/// Errors raised while computing a [`crate::resolve::ResolvedTarget`] (component A).
#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error("executable has no PT_LOAD segments")]
    MissingLoadSegment,
    #[error("no mapping for executable `{0}` found in /proc/{1}/maps")]
    MissingMapping(String, i32),
    #[error("symbol `{0}` not found in executable's symbol table")]
    SymbolNotFound(String),
    #[error("variable `{0}` has unsupported size {1} bytes (must be 1, 2, 4, or 8)")]
    UnsupportedSize(String, u64),
    #[error("failed to read executable: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse ELF file: {0}")]
    Elf(#[from] object::Error),
    #[error("failed to read process memory map: {0}")]
    ProcMaps(String),
}

/// Errors raised by the tracee controller (component C), including its use from
/// the breakpoint driver (component D).
#[derive(Debug, Error)]
pub enum TraceeControlError {
    #[error("failed to wait for tracee: {0}")]
    Wait(#[source] Errno),
    #[error("failed to peek tracee memory at 0x{0:x}: {1}")]
    PeekFailed(u64, #[source] Errno),
    #[error("failed to poke tracee memory at 0x{0:x}: {1}")]
    PokeFailed(u64, #[source] Errno),
    #[error("failed to access general registers: {0}")]
    RegsFailed(#[source] Errno),
    #[error("failed to single-step tracee: {0}")]
    StepFailed(#[source] Errno),
    #[error("failed to continue tracee: {0}")]
    ContinueFailed(#[source] Errno),
}

/// Errors raised while arming or reading back the AArch64 hardware watchpoint
/// (components B and E). Recovered locally per the design: a failure here
/// degrades the change-detection loop to single-step polling rather than
/// aborting the trace.
#[derive(Debug, Error)]
pub enum WatchpointError {
    #[error("unsupported watch size {0} bytes (must be 1, 2, 4, or 8)")]
    UnsupportedSize(u64),
    #[error("debug register set unavailable on this kernel/platform: {0}")]
    DebugRegsUnsupported(#[source] Errno),
}

/// Errors raised by the breakpoint-to-main driver (component D).
#[derive(Debug, Error)]
pub enum BreakpointError {
    #[error(transparent)]
    Control(#[from] TraceeControlError),
    #[error("tracee exited before reaching main()")]
    NeverReachedMain,
}

/// Aggregate error returned by [`crate::run_trace`].
#[derive(Debug, Error)]
pub enum TraceError {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),
    #[error(transparent)]
    Control(#[from] TraceeControlError),
    #[error(transparent)]
    Breakpoint(#[from] BreakpointError),
}
