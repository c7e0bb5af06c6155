//! Tracee Controller (component C).
//!
//! A typed wrapper over the kernel debugger interface. Every operation here
//! requires the tracee to already be stopped; the controller does not track
//! that invariant itself, it trusts its callers (the breakpoint driver and
//! the change-detection loop), which alternate these calls with
//! [`TraceeController::wait_for_stop`].

use std::os::raw::c_void;

use nix::errno::Errno;
use nix::sys::ptrace;
use nix::sys::signal::Signal;
use nix::sys::wait::{waitpid, WaitStatus as NixWaitStatus};
use nix::unistd::Pid;

use crate::debugregs::{DebugRegImage, NT_ARM_HW_WATCH};
use crate::error::{TraceeControlError, WatchpointError};

/// The kernel's `NT_PRSTATUS` register-set id, used for AArch64 general
/// registers since the architecture has no `PTRACE_GETREGS`.
const NT_PRSTATUS: i32 = 1;

/// Mirrors the kernel's `struct user_pt_regs` for AArch64: 31 general
/// registers, `sp`, `pc`, and `pstate`, the exact layout returned by
/// `PTRACE_GETREGSET` with `NT_PRSTATUS`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GeneralRegs {
    pub regs: [u64; 31],
    pub sp: u64,
    pub pc: u64,
    pub pstate: u64,
}

/// The three ways a `waitpid` on a ptraced process can resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceeStatus {
    Stopped(Option<Signal>),
    Exited(i32),
    Signaled(i32),
}

pub struct TraceeController {
    pid: Pid,
}

impl TraceeController {
    pub fn new(pid: Pid) -> Self {
        Self { pid }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn wait_for_stop(&self) -> Result<TraceeStatus, TraceeControlError> {
        let status = waitpid(self.pid, None).map_err(TraceeControlError::Wait)?;

        Ok(match status {
            NixWaitStatus::Exited(_, code) => TraceeStatus::Exited(code),
            NixWaitStatus::Signaled(_, signal, _) => TraceeStatus::Signaled(signal as i32),
            NixWaitStatus::Stopped(_, signal) => TraceeStatus::Stopped(Some(signal)),
            other => {
                log::debug!("unusual wait status, treating as a bare stop: {:?}", other);
                TraceeStatus::Stopped(None)
            }
        })
    }

    pub fn peek_word(&self, addr: u64) -> Result<u64, TraceeControlError> {
        let word = ptrace::read(self.pid, addr as ptrace::AddressType)
            .map_err(|e| TraceeControlError::PeekFailed(addr, e))?;
        Ok(word as u64)
    }

    pub fn poke_word(&self, addr: u64, value: u64) -> Result<(), TraceeControlError> {
        poke_data(self.pid, addr, value).map_err(|e| TraceeControlError::PokeFailed(addr, e))
    }

    pub fn get_general_regs(&self) -> Result<GeneralRegs, TraceeControlError> {
        let mut regs = GeneralRegs::default();
        let buf = as_bytes_mut(&mut regs);
        getregset(self.pid, NT_PRSTATUS, buf).map_err(TraceeControlError::RegsFailed)?;
        Ok(regs)
    }

    pub fn set_general_regs(&self, regs: &GeneralRegs) -> Result<(), TraceeControlError> {
        let mut regs = *regs;
        let len = std::mem::size_of::<GeneralRegs>();
        let buf = as_bytes_mut(&mut regs);
        setregset(self.pid, NT_PRSTATUS, buf, len).map_err(TraceeControlError::RegsFailed)
    }

    /// Returns the current debug-register image and the exact byte length
    /// the kernel reports for it. The length must be preserved and passed
    /// back unchanged to [`Self::set_debug_regs`].
    pub fn get_debug_regs(&self) -> Result<(DebugRegImage, usize), WatchpointError> {
        let mut image = DebugRegImage::default();
        let buf = as_bytes_mut(&mut image);
        let len = getregset(self.pid, NT_ARM_HW_WATCH, buf)
            .map_err(WatchpointError::DebugRegsUnsupported)?;
        Ok((image, len))
    }

    pub fn set_debug_regs(&self, image: &DebugRegImage, len: usize) -> Result<(), WatchpointError> {
        let mut image = *image;
        let buf = as_bytes_mut(&mut image);
        setregset(self.pid, NT_ARM_HW_WATCH, buf, len).map_err(WatchpointError::DebugRegsUnsupported)
    }

    pub fn single_step(&self, signal: Option<Signal>) -> Result<(), TraceeControlError> {
        ptrace::step(self.pid, signal).map_err(TraceeControlError::StepFailed)
    }

    pub fn cont(&self, signal: Option<Signal>) -> Result<(), TraceeControlError> {
        ptrace::cont(self.pid, signal).map_err(TraceeControlError::ContinueFailed)
    }
}

/// Reinterprets a `repr(C)` value as a mutable byte slice, for marshalling
/// into the kernel's iovec register-set interface.
fn as_bytes_mut<T>(value: &mut T) -> &mut [u8] {
    unsafe { std::slice::from_raw_parts_mut(value as *mut T as *mut u8, std::mem::size_of::<T>()) }
}

fn getregset(pid: Pid, nt_type: i32, buf: &mut [u8]) -> Result<usize, Errno> {
    let mut iov = libc::iovec {
        iov_base: buf.as_mut_ptr() as *mut c_void,
        iov_len: buf.len(),
    };

    let ret = unsafe {
        libc::ptrace(
            libc::PTRACE_GETREGSET as libc::c_uint,
            pid.as_raw(),
            nt_type as *mut c_void,
            &mut iov as *mut libc::iovec as *mut c_void,
        )
    };

    if ret == -1 {
        return Err(Errno::last());
    }

    Ok(iov.iov_len)
}

fn setregset(pid: Pid, nt_type: i32, buf: &mut [u8], len: usize) -> Result<(), Errno> {
    let mut iov = libc::iovec {
        iov_base: buf.as_mut_ptr() as *mut c_void,
        iov_len: len,
    };

    let ret = unsafe {
        libc::ptrace(
            libc::PTRACE_SETREGSET as libc::c_uint,
            pid.as_raw(),
            nt_type as *mut c_void,
            &mut iov as *mut libc::iovec as *mut c_void,
        )
    };

    if ret == -1 {
        return Err(Errno::last());
    }

    Ok(())
}

fn poke_data(pid: Pid, addr: u64, value: u64) -> Result<(), Errno> {
    let ret = unsafe {
        libc::ptrace(
            libc::PTRACE_POKEDATA as libc::c_uint,
            pid.as_raw(),
            addr as *mut c_void,
            value as *mut c_void,
        )
    };

    if ret == -1 {
        return Err(Errno::last());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn general_regs_layout_is_34_words() {
        // 31 GPRs + sp + pc + pstate, matching struct user_pt_regs exactly;
        // PTRACE_GETREGSET/NT_PRSTATUS on AArch64 expects this exact size.
        assert_eq!(std::mem::size_of::<GeneralRegs>(), 34 * 8);
    }

    #[test]
    fn as_bytes_mut_exposes_full_struct() {
        let mut regs = GeneralRegs {
            pc: 0x1234,
            ..Default::default()
        };
        let bytes = as_bytes_mut(&mut regs);
        assert_eq!(bytes.len(), std::mem::size_of::<GeneralRegs>());
    }
}
