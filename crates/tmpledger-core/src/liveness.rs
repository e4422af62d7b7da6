//! Owner-process liveness checks
//!
//! A slot records its owner as `(pid, start_time)`. The pair identifies a
//! live process only if a process with that pid exists *and* started at the
//! recorded unix second, which rules out pid reuse.

use std::io;

/// Capability to ask whether a recorded owner is still running
pub trait ProcessLiveness: Send + Sync {
    fn is_alive(&self, pid: u32, start_time: u64) -> bool;
}

/// Liveness backed by the OS process table
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemLiveness;

impl ProcessLiveness for SystemLiveness {
    #[cfg(target_os = "linux")]
    fn is_alive(&self, pid: u32, start_time: u64) -> bool {
        match process_start_time(pid) {
            Ok(actual) => actual == start_time,
            Err(_) => false,
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn is_alive(&self, pid: u32, _start_time: u64) -> bool {
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        // No portable start-time source: fall back to existence only
        match i32::try_from(pid) {
            Ok(raw) => !matches!(kill(Pid::from_raw(raw), None), Err(nix::errno::Errno::ESRCH)),
            Err(_) => false,
        }
    }
}

/// `(pid, start_time)` of the calling process
pub fn current_process_identity() -> io::Result<(u32, u64)> {
    let pid = std::process::id();
    #[cfg(target_os = "linux")]
    let start = process_start_time(pid)?;
    #[cfg(not(target_os = "linux"))]
    let start = 0;
    Ok((pid, start))
}

/// Start time of `pid` in unix seconds, from procfs
#[cfg(target_os = "linux")]
pub fn process_start_time(pid: u32) -> io::Result<u64> {
    let stat = std::fs::read_to_string(format!("/proc/{}/stat", pid))?;
    let ticks = parse_start_ticks(&stat)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "unparseable /proc stat"))?;
    Ok(boot_time()? + ticks / clock_ticks_per_second()?)
}

/// Field 22 (`starttime`) of a `/proc/<pid>/stat` line. The command name
/// may contain spaces and parentheses, so fields are counted after the last `)`.
#[cfg(target_os = "linux")]
fn parse_start_ticks(stat: &str) -> Option<u64> {
    let rest = &stat[stat.rfind(')')? + 1..];
    // rest begins at field 3 (state)
    rest.split_whitespace().nth(22 - 3)?.parse().ok()
}

#[cfg(target_os = "linux")]
fn boot_time() -> io::Result<u64> {
    let stat = std::fs::read_to_string("/proc/stat")?;
    stat.lines()
        .find_map(|line| line.strip_prefix("btime "))
        .and_then(|v| v.trim().parse().ok())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "btime missing from /proc/stat"))
}

#[cfg(target_os = "linux")]
fn clock_ticks_per_second() -> io::Result<u64> {
    let ticks = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
    if ticks <= 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(ticks as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_process_is_alive() {
        let (pid, start) = current_process_identity().unwrap();
        assert!(SystemLiveness.is_alive(pid, start));
    }

    #[test]
    fn test_missing_pid_is_dead() {
        // Above the kernel's pid_max ceiling (2^22)
        assert!(!SystemLiveness.is_alive(10_000_000, 1_700_000_000));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_start_time_mismatch_is_dead() {
        let (pid, start) = current_process_identity().unwrap();
        assert!(!SystemLiveness.is_alive(pid, start + 3600));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_parse_start_ticks_with_tricky_comm() {
        let line = "1234 (my (odd) proc) S 1 1234 1234 0 -1 4194560 100 0 0 0 \
                    5 3 0 0 20 0 1 0 98765 1000000 200 18446744073709551615";
        assert_eq!(parse_start_ticks(line), Some(98765));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_parse_start_ticks_truncated() {
        assert_eq!(parse_start_ticks("1234 (sh) S 1 2 3"), None);
    }
}
