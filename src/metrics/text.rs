//! Prometheus exposition text decoder
//!
//! Decodes the raw `/metrics` body of the driver controller into an
//! insertion-ordered map of metric families. Only the subset of the format
//! the driver emits is handled (gauges, counters, histogram sample lines).
//! Decoding is total: malformed lines are skipped, never an error.

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// Types
// =============================================================================

/// One sample: a label set and a finite numeric value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub labels: BTreeMap<String, String>,
    pub value: f64,
}

/// A named family of samples. `help`/`type` are empty for sample names that
/// were never declared (histogram `_bucket`/`_count` variants).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricFamily {
    pub name: String,
    pub help: String,
    #[serde(rename = "type")]
    pub type_: String,
    pub samples: Vec<MetricSample>,
}

/// Families keyed by metric name exactly as it appears in the source text,
/// in first-occurrence order.
pub type MetricFamilies = IndexMap<String, MetricFamily>;

// =============================================================================
// Decoder
// =============================================================================

static LABEL_PAIR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"(\w+)="([^"]*)""#).unwrap());

fn parse_labels(block: &str) -> BTreeMap<String, String> {
    LABEL_PAIR_RE
        .captures_iter(block)
        .map(|cap| (cap[1].to_string(), cap[2].to_string()))
        .collect()
}

/// Decode exposition text into a family map.
pub fn decode(text: &str) -> MetricFamilies {
    let mut families = MetricFamilies::new();
    let mut pending_name = String::new();
    let mut pending_help = String::new();
    let mut pending_type = String::new();

    for raw_line in text.lines() {
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(rest) = line.strip_prefix("# HELP ") {
            match rest.split_once(' ') {
                Some((name, help)) => {
                    pending_name = name.to_string();
                    pending_help = help.to_string();
                }
                None => {
                    pending_name = rest.to_string();
                    pending_help = String::new();
                }
            }
            continue;
        }

        if let Some(rest) = line.strip_prefix("# TYPE ") {
            pending_type = rest
                .split_once(' ')
                .map(|(_, t)| t.to_string())
                .unwrap_or_default();
            continue;
        }

        if line.starts_with('#') {
            continue;
        }

        // Sample line: name{label="val"} value [timestamp]  or  name value [timestamp]
        let open = line.find('{');
        let close = line.rfind('}');
        let (name, labels, value_part) = match (open, close) {
            (Some(o), Some(c)) if c > o => {
                (&line[..o], parse_labels(&line[o + 1..c]), &line[c + 1..])
            }
            _ => match line.split_once(char::is_whitespace) {
                Some((name, rest)) => (name, BTreeMap::new(), rest),
                None => continue,
            },
        };

        // First trailing token is the value; a second one is a timestamp and
        // is ignored. Non-finite or unparseable values skip the whole line.
        let Some(value_str) = value_part.split_whitespace().next() else {
            continue;
        };
        let value = match value_str.parse::<f64>() {
            Ok(v) if v.is_finite() => v,
            _ => continue,
        };

        let family = families.entry(name.to_string()).or_insert_with(|| {
            // HELP/TYPE carry over only when the sample name matches the
            // immediately preceding declaration.
            let declared = name == pending_name;
            MetricFamily {
                name: name.to_string(),
                help: if declared {
                    pending_help.clone()
                } else {
                    String::new()
                },
                type_: if declared {
                    pending_type.clone()
                } else {
                    String::new()
                },
                samples: Vec::new(),
            }
        });
        family.samples.push(MetricSample { labels, value });
    }

    families
}
