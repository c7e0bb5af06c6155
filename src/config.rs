use std::path::PathBuf;

use nix::unistd::Pid;

/// The core's sole input. Constructed once by the CLI front-end and read by
/// every component; immutable for the lifetime of a trace.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the unstripped ELF executable being traced.
    pub executable_path: PathBuf,
    /// Exact or demangled symbol name of the global variable to watch.
    pub variable_name: String,
    /// Pid of the already-forked, pre-ptraced child, in its initial stop.
    pub tracee_pid: Pid,
}
