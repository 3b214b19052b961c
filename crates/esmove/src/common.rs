//! Core data types shared across the pipeline.

use std::fmt;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

/// One document in flight, in Elasticsearch wire shape.
///
/// The same struct is a scroll hit, a queue message, a dump-file line and a
/// bulk action input. `_source` stays an opaque [`RawValue`] so the payload
/// bytes are never reparsed between source and sink. Immutable once enqueued.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct Doc {
    #[serde(rename = "_index")]
    pub index: String,
    /// Absent on 7.x clusters, which dropped mapping types.
    #[serde(rename = "_type", default, skip_serializing_if = "Option::is_none")]
    pub doc_type: Option<String>,
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "_routing", default, skip_serializing_if = "Option::is_none")]
    pub routing: Option<String>,
    #[serde(rename = "_parent", default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(rename = "_version", default, skip_serializing_if = "Option::is_none")]
    pub version: Option<i64>,
    #[serde(rename = "_version_type", default, skip_serializing_if = "Option::is_none")]
    pub version_type: Option<String>,
    #[serde(rename = "_source")]
    pub source: Box<RawValue>,
}

impl Doc {
    /// Rough wire size of this record inside a bulk request. The sink worker
    /// only needs a flush trigger, not an exact byte count, so the action
    /// line is approximated with a flat overhead.
    pub(crate) fn approx_bytes(&self) -> usize {
        let meta = self.index.len()
            + self.id.as_deref().map_or(0, str::len)
            + self.routing.as_deref().map_or(0, str::len);
        self.source.get().len() + meta + 64
    }
}

/// Major/minor/patch of a cluster, parsed from the `version.number` the root
/// endpoint reports. The major selects the REST dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ClusterVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl ClusterVersion {
    /// Accepts `7.10.2` as well as suffixed builds like `5.6.16-SNAPSHOT`.
    pub(crate) fn parse(number: &str) -> Result<Self> {
        let mut parts = number.trim().splitn(3, '.');
        let major = match parts.next().map(leading_number) {
            Some(Some(major)) => major,
            _ => bail!("unparseable cluster version number '{number}'"),
        };
        let minor = parts.next().and_then(leading_number).unwrap_or(0);
        let patch = parts.next().and_then(leading_number).unwrap_or(0);
        Ok(Self { major, minor, patch })
    }
}

impl fmt::Display for ClusterVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

fn leading_number(part: &str) -> Option<u32> {
    let digits: String = part.chars().take_while(char::is_ascii_digit).collect();
    digits.parse().ok()
}

/// `GET /_cluster/health`, reduced to what the health gate looks at.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ClusterHealth {
    #[serde(rename = "cluster_name", default)]
    pub name: String,
    pub status: HealthStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum HealthStatus {
    Green,
    Yellow,
    Red,
    #[serde(other)]
    Unknown,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            HealthStatus::Green => "green",
            HealthStatus::Yellow => "yellow",
            HealthStatus::Red => "red",
            HealthStatus::Unknown => "unknown",
        };
        f.write_str(label)
    }
}

/// Parses Elasticsearch-style time values (`1m`, `30s`, `500ms`, bare
/// seconds) as used for scroll keep-alives and flush intervals.
pub(crate) fn parse_time_value(value: &str) -> Result<Duration> {
    let value = value.trim();
    let split = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    let (digits, unit) = value.split_at(split);
    let amount: u64 = digits
        .parse()
        .with_context(|| format!("invalid time value '{value}'"))?;
    let duration = match unit {
        "ms" => Duration::from_millis(amount),
        "" | "s" => Duration::from_secs(amount),
        "m" => Duration::from_secs(amount * 60),
        "h" => Duration::from_secs(amount * 3600),
        "d" => Duration::from_secs(amount * 86_400),
        _ => bail!("unsupported time unit '{unit}' in '{value}'"),
    };
    Ok(duration)
}
