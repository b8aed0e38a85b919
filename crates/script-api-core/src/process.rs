// script-api-core/src/process.rs
// ============================================================================
// Module: Process Group Control
// Description: New-session spawn and whole-group signalling for child scripts.
// Purpose: Make `stop` reliable for scripts that themselves spawn children.
// Dependencies: nix, tokio
// ============================================================================

//! ## Overview
//! A child run in its own session cannot be reliably stopped by signalling
//! its pid alone: if it has spawned grandchildren, they survive. Every child
//! is therefore placed into a fresh session at spawn time (`setsid`), and
//! every signal is sent to the negated pid (the process group), not the pid
//! itself.

#![allow(
    unsafe_code,
    reason = "setsid() must run after fork and before exec, which only pre_exec allows"
)]

use std::io;

use nix::sys::signal::Signal;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use tokio::process::Command;

/// Configures `cmd` to start its child in a new session/process group.
///
/// # Safety
///
/// The closure passed to `pre_exec` runs in the forked child between `fork`
/// and `exec`, where only async-signal-safe operations are permitted.
/// `setsid()` is async-signal-safe and touches no shared state.
pub fn set_new_process_group(cmd: &mut Command) {
    // SAFETY: `setsid()` is async-signal-safe and performs no allocation,
    // locking, or access to parent-process state.
    unsafe {
        cmd.pre_exec(|| {
            nix::unistd::setsid().map_err(|errno| io::Error::from_raw_os_error(errno as i32))?;
            Ok(())
        });
    }
}

/// Sends `signal` to the process group led by `pid`.
///
/// A group is signalled by negating the pid per POSIX `kill(2)` semantics.
/// Returns `Ok(())` if the group is already gone (`ESRCH`), matching the
/// "already gone is success" stop-protocol rule.
pub fn signal_group(pid: u32, signal: Signal) -> io::Result<()> {
    #[allow(clippy::cast_possible_wrap, reason = "pid_t is i32; OS pids fit comfortably")]
    let group = Pid::from_raw(-(pid as i32));
    match kill(group, signal) {
        Ok(()) | Err(nix::errno::Errno::ESRCH) => Ok(()),
        Err(errno) => Err(io::Error::from_raw_os_error(errno as i32)),
    }
}

/// Best-effort liveness probe for a process by pid (signal 0).
#[must_use]
pub fn is_alive(pid: u32) -> bool {
    #[allow(clippy::cast_possible_wrap, reason = "pid_t is i32; OS pids fit comfortably")]
    let target = Pid::from_raw(pid as i32);
    kill(target, None).is_ok()
}
