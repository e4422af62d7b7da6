//! Human-readable ledger reports for `tmpledgerd inspect`

use std::fmt::Write;
use tmpledger_core::{unix_now, Record, Status};
use tmpledger_ipc::LedgerStatus;

/// Render occupancy and one line per occupied slot
pub fn render(status: &LedgerStatus, records: &[Record]) -> String {
    let now = unix_now();
    let mut out = String::new();

    let _ = writeln!(out);
    let _ = writeln!(out, "  tmpledger ledger: {}", status.ledger_path.display());
    let _ = writeln!(out, "  ========================================");
    let _ = writeln!(
        out,
        "    Occupied: {} / {} slots ({:.1}%)",
        format_number(status.occupied),
        format_number(status.capacity as u64),
        percent(status.occupied, status.capacity as u64)
    );

    let count = |s: Status| records.iter().filter(|r| r.status == s).count() as u64;
    let _ = writeln!(out, "    Undecided:      {}", format_number(count(Status::Unknown)));
    let _ = writeln!(out, "    Wait-delete:    {}", format_number(count(Status::WaitDelete)));
    let _ = writeln!(out, "    Cancelled:      {}", format_number(count(Status::NotDelete)));

    if records.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "  No occupied slots.");
        return out;
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "  {:>6}  {}  {:>8}  {:<14}  {}", "INDEX", "S", "PID", "DUE", "PATH");
    for record in records {
        let _ = writeln!(
            out,
            "  {:>6}  {}  {:>8}  {:<14}  {}",
            record.index,
            record.status.as_char(),
            record.pid,
            describe_due(record, now),
            record.file_path
        );
    }
    out
}

fn describe_due(record: &Record, now: u64) -> String {
    match (record.status, record.delete_timestamp) {
        (Status::WaitDelete, Some(due)) if due <= now => "now".to_string(),
        (Status::WaitDelete, Some(due)) => format!("in {}", format_duration(due - now)),
        (Status::Unknown, _) => "on owner exit".to_string(),
        _ => "-".to_string(),
    }
}

fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 * 100.0 / whole as f64
    }
}

/// Format seconds as the two largest units, e.g. `2h05m`
fn format_duration(secs: u64) -> String {
    const MINUTE: u64 = 60;
    const HOUR: u64 = 60 * MINUTE;
    const DAY: u64 = 24 * HOUR;

    if secs >= DAY {
        format!("{}d{:02}h", secs / DAY, (secs % DAY) / HOUR)
    } else if secs >= HOUR {
        format!("{}h{:02}m", secs / HOUR, (secs % HOUR) / MINUTE)
    } else if secs >= MINUTE {
        format!("{}m{:02}s", secs / MINUTE, secs % MINUTE)
    } else {
        format!("{}s", secs)
    }
}

/// Format number with comma separators
fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::new();
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}
