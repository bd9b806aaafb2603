use nix::unistd::{access, geteuid, AccessFlags};
use std::sync::atomic::{AtomicU32, Ordering};

/// Passing this as a logger's command path disables the command channel.
pub const NULL_COMMAND_PATH: &str = "";

// Process-scoped counter so several loggers in one process get distinct
// default socket paths. Never reset.
static CTL_COUNT: AtomicU32 = AtomicU32::new(0);

/// Default command socket path: `$XDG_RUNTIME_DIR/logringctl.<pid>.<N>`,
/// where `N` increments per call. Falls back to `/run/user/<uid>` when the
/// variable is unset, and to `$TMPDIR` (else `/tmp`) when the runtime
/// directory is not writable.
pub fn default_command_path() -> String {
    let pid = std::process::id();
    let n = CTL_COUNT.fetch_add(1, Ordering::Relaxed);

    let mut dir = rundir();
    if access(dir.as_str(), AccessFlags::W_OK).is_err() {
        dir = tmpdir();
    }

    format!("{}/logringctl.{}.{}", dir, pid, n)
}

fn rundir() -> String {
    std::env::var("XDG_RUNTIME_DIR").unwrap_or_else(|_| format!("/run/user/{}", geteuid()))
}

fn tmpdir() -> String {
    std::env::var("TMPDIR").unwrap_or_else(|_| "/tmp".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_are_distinct() {
        let a = default_command_path();
        let b = default_command_path();
        assert_ne!(a, b);
        assert!(a.contains("logringctl."));
        assert!(a.contains(&std::process::id().to_string()));
    }
}
