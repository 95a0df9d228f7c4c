//! Pure helpers for port scanning and selection
//!
//! The I/O lives in `services::ports`; everything here is deterministic
//! over its inputs so the parsing and block-search logic stays unit
//! testable without touching the host.

use std::collections::HashSet;

/// Socket state code for LISTEN in /proc/net/tcp{,6}
const TCP_LISTEN: &str = "0A";

/// Extract listening ports from the contents of /proc/net/tcp or
/// /proc/net/tcp6. Unparseable lines are skipped, not errors; the kernel
/// table header is one of them.
pub fn parse_proc_net_tcp(contents: &str) -> HashSet<u16> {
    let mut ports = HashSet::new();
    for line in contents.lines().skip(1) {
        let mut fields = line.split_whitespace();
        let local = match fields.nth(1) {
            Some(f) => f,
            None => continue,
        };
        let _rem_address = fields.next();
        let state = match fields.next() {
            Some(s) => s,
            None => continue,
        };
        if state != TCP_LISTEN {
            continue;
        }
        if let Some(port_hex) = local.rsplit(':').next() {
            if let Ok(port) = u16::from_str_radix(port_hex, 16) {
                ports.insert(port);
            }
        }
    }
    ports
}

/// Extract listening ports from `lsof -iTCP -sTCP:LISTEN -P -n` output,
/// used on hosts without /proc/net/tcp.
pub fn parse_lsof_listen(contents: &str) -> HashSet<u16> {
    let mut ports = HashSet::new();
    for line in contents.lines().skip(1) {
        // NAME column looks like "*:3000" or "127.0.0.1:5432"
        let Some(name) = line.split_whitespace().nth(8) else {
            continue;
        };
        if let Some(port_str) = name.rsplit(':').next() {
            if let Ok(port) = port_str.parse::<u16>() {
                ports.insert(port);
            }
        }
    }
    ports
}

/// Choose `count` ports out of a sorted list of available ones,
/// preferring the first contiguous run, falling back to the first
/// `count` scattered ports.
pub fn pick_ports(available: &[u16], count: usize) -> Option<Vec<u16>> {
    if count == 0 {
        return Some(Vec::new());
    }
    if available.len() < count {
        return None;
    }

    for window in available.windows(count) {
        let contiguous = window[count - 1] as usize - window[0] as usize == count - 1;
        if contiguous {
            return Some(window.to_vec());
        }
    }

    Some(available[..count].to_vec())
}
