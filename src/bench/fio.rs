//! kbench FIO summary parser
//!
//! Extracts the three metric groups (IOPS, bandwidth, latency) from the
//! free-form pod log of a completed kbench Job. The parse is all-or-nothing:
//! either every section yields its random and sequential read/write pairs,
//! or the whole parse returns `None`.
//!
//! Expected shape (whitespace varies):
//!
//! ```text
//! IOPS (Read/Write)
//!         Random:          98,368 / 89,200
//!     Sequential:        108,513 / 107,636
//!   CPU Idleness:                      68%
//!
//! Bandwidth in KiB/sec (Read/Write)
//! ...
//! Latency in ns (Read/Write)
//! ...
//! ```

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

// =============================================================================
// Types
// =============================================================================

/// One metric group: read/write pairs for random and sequential access, plus
/// the CPU idleness percentage observed during the phase.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricGroup {
    pub random_read: f64,
    pub random_write: f64,
    pub sequential_read: f64,
    pub sequential_write: f64,
    pub cpu_idleness: u32,
}

/// Parsed FIO summary: IOPS, bandwidth (KiB/s), latency (ns).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FioReport {
    pub iops: MetricGroup,
    pub bandwidth: MetricGroup,
    pub latency: MetricGroup,
}

const IOPS_HEADER: &str = "IOPS (Read/Write)";
const BANDWIDTH_HEADER: &str = "Bandwidth in KiB/sec (Read/Write)";
const LATENCY_HEADER: &str = "Latency in ns (Read/Write)";

/// Body lines examined after a section header before giving up.
const SECTION_WINDOW: usize = 9;

// =============================================================================
// Parser
// =============================================================================

static READ_WRITE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d[\d,]*)\s*/\s*(\d[\d,]*)").unwrap());
static CPU_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)%").unwrap());

/// Parse a kbench pod log. Returns `None` unless all three sections parse.
pub fn parse_fio_summary(log_text: &str) -> Option<FioReport> {
    let lines: Vec<&str> = log_text.lines().map(str::trim).collect();

    let iops = parse_section(&lines, IOPS_HEADER)?;
    let bandwidth = parse_section(&lines, BANDWIDTH_HEADER)?;
    let latency = parse_section(&lines, LATENCY_HEADER)?;

    Some(FioReport {
        iops,
        bandwidth,
        latency,
    })
}

/// Up to [`SECTION_WINDOW`] non-blank lines after the first line starting
/// with `header`; an embedded blank line terminates the section early.
fn section_body<'a>(lines: &[&'a str], header: &str) -> Vec<&'a str> {
    let Some(idx) = lines.iter().position(|l| l.starts_with(header)) else {
        return Vec::new();
    };
    lines[idx + 1..]
        .iter()
        .take(SECTION_WINDOW)
        .take_while(|l| !l.is_empty())
        .copied()
        .collect()
}

/// First `read / write` integer pair on the line, commas stripped.
fn parse_read_write(line: &str) -> Option<(f64, f64)> {
    let caps = READ_WRITE_RE.captures(line)?;
    let read: f64 = caps[1].replace(',', "").parse().ok()?;
    let write: f64 = caps[2].replace(',', "").parse().ok()?;
    if read.is_finite() && write.is_finite() {
        Some((read, write))
    } else {
        None
    }
}

/// CPU idleness is best-effort: a missing match is 0, not a failure.
fn parse_cpu(line: &str) -> u32 {
    CPU_RE
        .captures(line)
        .and_then(|caps| caps[1].parse().ok())
        .unwrap_or(0)
}

fn parse_section(lines: &[&str], header: &str) -> Option<MetricGroup> {
    let body = section_body(lines, header);
    if body.is_empty() {
        return None;
    }

    // Order within the body is not assumed.
    let random = body
        .iter()
        .find(|l| l.starts_with("Random:"))
        .and_then(|l| parse_read_write(l))?;
    let sequential = body
        .iter()
        .find(|l| l.starts_with("Sequential:"))
        .and_then(|l| parse_read_write(l))?;
    let cpu = body
        .iter()
        .find(|l| l.starts_with("CPU Idleness:"))
        .map(|l| parse_cpu(l))
        .unwrap_or(0);

    Some(MetricGroup {
        random_read: random.0,
        random_write: random.1,
        sequential_read: sequential.0,
        sequential_write: sequential.1,
        cpu_idleness: cpu,
    })
}

// =============================================================================
// Result formatting
// =============================================================================

/// IOPS with thousands separators.
pub fn format_iops(value: f64) -> String {
    let n = value.round() as i64;
    let raw = n.abs().to_string();
    let mut grouped = String::new();
    for (i, ch) in raw.chars().enumerate() {
        if i > 0 && (raw.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    if n < 0 {
        format!("-{}", grouped)
    } else {
        grouped
    }
}

/// Bandwidth given in KiB/s, displayed at the largest sensible unit.
pub fn format_bandwidth(kib: f64) -> String {
    let mib = kib / 1024.0;
    if mib >= 1024.0 {
        format!("{:.1} GiB/s", mib / 1024.0)
    } else if mib >= 1.0 {
        format!("{:.0} MiB/s", mib)
    } else {
        format!("{:.0} KiB/s", kib)
    }
}

/// Latency given in nanoseconds.
pub fn format_latency(ns: f64) -> String {
    if ns >= 1_000_000.0 {
        format!("{:.2} ms", ns / 1_000_000.0)
    } else if ns >= 1_000.0 {
        format!("{:.1} µs", ns / 1_000.0)
    } else {
        format!("{} ns", ns)
    }
}
