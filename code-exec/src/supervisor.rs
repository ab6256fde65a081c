//! Per-step supervisor process.
//!
//! Every sandboxed command is forked from a small supervisor that the server
//! spawns in its place. The supervisor marks itself a child subreaper, so
//! descendants that leave the process group (`setsid`, `setpgid`, double
//! forks) are reparented to it instead of to init. Once the command exits,
//! or the supervisor receives `SIGTERM`, it kills every remaining descendant
//! and reaps them before exiting with the command's own status.

use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::io;
use tracing::warn;

/// Server-side handle on a running supervisor
pub(crate) struct SupervisorHandle {
    pid: Option<Pid>,
}

impl SupervisorHandle {
    pub(crate) fn new(pid: Option<u32>) -> Self {
        Self {
            pid: pid.map(|pid| Pid::from_raw(pid as i32)),
        }
    }

    /// Ask the supervisor to kill the command and everything it started
    pub(crate) fn terminate(&self) {
        if let Some(pid) = self.pid {
            match nix::sys::signal::kill(pid, Signal::SIGTERM) {
                Ok(()) | Err(Errno::ESRCH) => {}
                Err(e) => warn!("Failed to signal supervisor {}: {}", pid, e),
            }
        }
    }

    /// `SIGKILL` the supervisor's process group. The command then dies
    /// through its parent-death signal.
    pub(crate) fn kill(&mut self) {
        if let Some(pid) = self.pid.take() {
            match killpg(pid, Signal::SIGKILL) {
                Ok(()) | Err(Errno::ESRCH) => {}
                Err(e) => warn!("Failed to kill supervisor group {}: {}", pid, e),
            }
        }
    }

    /// The supervisor has been reaped and its pid may be reused
    pub(crate) fn release(&mut self) {
        self.pid = None;
    }
}

impl Drop for SupervisorHandle {
    fn drop(&mut self) {
        self.terminate();
    }
}

/// Split the pre-exec child into supervisor and command.
///
/// Returns only in the process that goes on to exec the command. Must be the
/// last pre-exec step: the limits set before it apply to both processes.
#[cfg(target_os = "linux")]
pub(crate) fn fork_supervisor() -> io::Result<()> {
    use nix::sys::prctl;
    use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet};
    use nix::unistd::{fork, setpgid, ForkResult};

    prctl::set_child_subreaper(true)?;
    // No SA_RESTART, so a blocked waitpid returns EINTR
    let on_term = SigAction::new(
        SigHandler::Handler(interrupted),
        SaFlags::empty(),
        SigSet::empty(),
    );
    unsafe { sigaction(Signal::SIGTERM, &on_term) }?;

    match unsafe { fork() }? {
        ForkResult::Child => {
            prctl::set_pdeathsig(Signal::SIGKILL)?;
            setpgid(Pid::from_raw(0), Pid::from_raw(0))?;
            Ok(())
        }
        ForkResult::Parent { child } => {
            linux::close_exec_fds();
            let status = linux::wait_command(child);
            linux::sweep_descendants();
            linux::exit_like(status)
        }
    }
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn fork_supervisor() -> io::Result<()> {
    Ok(())
}

#[cfg(target_os = "linux")]
extern "C" fn interrupted(_: nix::libc::c_int) {}

/// Everything below runs in the forked supervisor and must stay
/// async-signal-safe: no allocation, no locks, no logging.
#[cfg(target_os = "linux")]
mod linux {
    use nix::errno::Errno;
    use nix::fcntl::{fcntl, open, FcntlArg, FdFlag, OFlag};
    use nix::libc;
    use nix::sys::resource::{getrlimit, Resource};
    use nix::sys::signal::{kill, raise, signal, SigHandler, Signal};
    use nix::sys::stat::Mode;
    use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
    use nix::unistd::{close, read, Pid};

    const CHILDREN: &str = "/proc/thread-self/children";

    /// Close every descriptor the server marked close-on-exec. That includes
    /// the pipe `spawn` blocks on until the command execs.
    pub(super) fn close_exec_fds() {
        let max = getrlimit(Resource::RLIMIT_NOFILE)
            .map(|(soft, _)| soft.min(1 << 16))
            .unwrap_or(1024);
        for fd in 3..max as i32 {
            if let Ok(flags) = fcntl(fd, FcntlArg::F_GETFD) {
                if FdFlag::from_bits_truncate(flags).contains(FdFlag::FD_CLOEXEC) {
                    let _ = close(fd);
                }
            }
        }
    }

    /// Wait for the command. `SIGTERM` kills it and the wait goes on.
    pub(super) fn wait_command(command: Pid) -> WaitStatus {
        loop {
            match waitpid(command, None) {
                Ok(status @ (WaitStatus::Exited(..) | WaitStatus::Signaled(..))) => {
                    return status
                }
                Ok(_) => {}
                Err(Errno::EINTR) => {
                    let _ = kill(command, Signal::SIGKILL);
                }
                Err(_) => return WaitStatus::Exited(command, 127),
            }
        }
    }

    /// Kill and reap descendants until none are left
    pub(super) fn sweep_descendants() {
        loop {
            let flags = if kill_children() {
                None
            } else {
                // Without the children list only already-dead ones are reaped
                Some(WaitPidFlag::WNOHANG)
            };
            match waitpid(Pid::from_raw(-1), flags) {
                Ok(WaitStatus::StillAlive) => return,
                Ok(_) | Err(Errno::EINTR) => {}
                Err(_) => return,
            }
        }
    }

    /// `SIGKILL` every current child. False if the list cannot be read.
    fn kill_children() -> bool {
        let Ok(fd) = open(CHILDREN, OFlag::O_RDONLY | OFlag::O_CLOEXEC, Mode::empty()) else {
            return false;
        };

        let mut buf = [0u8; 512];
        let mut pid: i32 = 0;
        loop {
            let n = match read(fd, &mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(Errno::EINTR) => continue,
                Err(_) => break,
            };
            for &b in &buf[..n] {
                if b.is_ascii_digit() {
                    pid = pid.saturating_mul(10).saturating_add(i32::from(b - b'0'));
                } else {
                    kill_pid(pid);
                    pid = 0;
                }
            }
        }
        kill_pid(pid);
        let _ = close(fd);
        true
    }

    fn kill_pid(pid: i32) {
        if pid > 0 {
            let _ = kill(Pid::from_raw(pid), Signal::SIGKILL);
        }
    }

    /// Exit with the command's status, re-raising its signal if it had one
    pub(super) fn exit_like(status: WaitStatus) -> ! {
        match status {
            WaitStatus::Exited(_, code) => unsafe { libc::_exit(code) },
            WaitStatus::Signaled(_, sig, _) => {
                let _ = unsafe { signal(sig, SigHandler::SigDfl) };
                let _ = raise(sig);
                unsafe { libc::_exit(128 + sig as i32) }
            }
            _ => unsafe { libc::_exit(127) },
        }
    }
}
