//! Resource ceilings and process-group control.

use std::process::ExitStatus;

use tokio::process::Command;

use crate::language::{LanguageSpec, MemoryPolicy};

/// Per-process resource ceilings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceLimits {
    /// Memory ceiling in MiB. `None` disables it.
    pub memory_mb: Option<u64>,
}

impl ResourceLimits {
    /// Build from a configured MiB value, where `0` means unlimited.
    pub fn from_memory_mb(memory_mb: u64) -> Self {
        Self {
            memory_mb: (memory_mb > 0).then_some(memory_mb),
        }
    }

    /// The heap flag value handed to runtime-flag languages.
    pub fn run_flag_memory(&self, spec: &LanguageSpec) -> Option<u64> {
        match spec.memory_policy {
            MemoryPolicy::RuntimeFlag => self.memory_mb,
            MemoryPolicy::AddressSpace => None,
        }
    }

    /// Place the child in its own process group and, for address-space
    /// languages, cap its virtual memory before exec.
    pub fn apply(&self, spec: &LanguageSpec, cmd: &mut Command) {
        #[cfg(unix)]
        {
            cmd.process_group(0);

            if let (MemoryPolicy::AddressSpace, Some(mb)) = (spec.memory_policy, self.memory_mb) {
                let bytes = mb.saturating_mul(1024 * 1024) as libc::rlim_t;
                // SAFETY: the closure only calls setrlimit, which is
                // async-signal-safe, and allocates nothing.
                unsafe {
                    cmd.pre_exec(move || {
                        let limit = libc::rlimit {
                            rlim_cur: bytes,
                            rlim_max: bytes,
                        };
                        if libc::setrlimit(libc::RLIMIT_AS, &limit) != 0 {
                            return Err(std::io::Error::last_os_error());
                        }
                        Ok(())
                    });
                }
            }
        }

        #[cfg(not(unix))]
        {
            let _ = (spec, cmd);
        }
    }
}

/// SIGKILL every process in the group led by `pid`.
///
/// Reaches grandchildren that outlive the direct child. Errors (typically
/// `ESRCH` once the group is gone) are ignored.
pub fn kill_process_group(pid: u32) {
    #[cfg(unix)]
    {
        let Ok(pgid) = i32::try_from(pid) else {
            return;
        };
        if pgid <= 0 {
            return;
        }
        // SAFETY: plain syscall; a negative pid targets the process group.
        unsafe {
            libc::kill(-pgid, libc::SIGKILL);
        }
    }

    #[cfg(not(unix))]
    {
        let _ = pid;
    }
}

/// Exit code of a finished process; signal deaths map to `128 + signal`.
pub fn exit_code_of(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }

    1
}
