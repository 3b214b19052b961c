//! Wire-level types and helpers shared by every dialect.

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::value::RawValue;
use serde_json::{Map, Value, json};
use tracing::warn;

use crate::common::Doc;

/// Payload of `GET /` — only the version number matters here.
#[derive(Debug, Deserialize)]
pub(crate) struct RootInfo {
    pub version: RootVersion,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RootVersion {
    pub number: String,
}

/// `hits.total` changed shape in 7.0: a bare number before, an object with
/// `value`/`relation` after.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum HitsTotal {
    Legacy(u64),
    Tracked { value: u64 },
}

impl HitsTotal {
    pub(crate) fn value(&self) -> u64 {
        match self {
            HitsTotal::Legacy(n) => *n,
            HitsTotal::Tracked { value } => *value,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ScrollEnvelope {
    #[serde(rename = "_scroll_id", default)]
    scroll_id: Option<String>,
    hits: ScrollHits,
}

#[derive(Debug, Deserialize)]
struct ScrollHits {
    #[serde(default)]
    total: Option<HitsTotal>,
    #[serde(default)]
    hits: Vec<ScrollHit>,
}

#[derive(Debug, Deserialize)]
struct ScrollHit {
    #[serde(rename = "_index")]
    index: String,
    #[serde(rename = "_type", default)]
    doc_type: Option<String>,
    #[serde(rename = "_id", default)]
    id: Option<String>,
    #[serde(rename = "_routing", default)]
    routing: Option<String>,
    #[serde(rename = "_parent", default)]
    parent: Option<String>,
    /// Pre-5 clusters report routing and parent in here instead.
    #[serde(default)]
    fields: Option<Map<String, Value>>,
    #[serde(rename = "_source", default)]
    source: Option<Box<RawValue>>,
}

impl ScrollHit {
    fn into_doc(self) -> Option<Doc> {
        let Some(source) = self.source else {
            warn!("hit without _source in scroll response; skipped");
            return None;
        };
        let fields = self.fields;
        let routing = self
            .routing
            .or_else(|| fields.as_ref().and_then(|f| field_string(f, "_routing")));
        let parent = self
            .parent
            .or_else(|| fields.as_ref().and_then(|f| field_string(f, "_parent")));
        Some(Doc {
            index: self.index,
            doc_type: self.doc_type,
            id: self.id,
            routing,
            parent,
            version: None,
            version_type: None,
            source,
        })
    }
}

/// Stored fields arrive either bare or wrapped in a one-element array.
fn field_string(fields: &Map<String, Value>, key: &str) -> Option<String> {
    match fields.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Array(a) => a.first().and_then(Value::as_str).map(str::to_owned),
        _ => None,
    }
}

/// One page of a scroll, already normalized across dialects.
#[derive(Debug)]
pub(crate) struct ScrollBatch {
    /// Scroll ids rotate between calls; always advance with the latest.
    pub scroll_id: String,
    /// The slice's share of `hits.total`, reported on every page.
    pub total: u64,
    pub docs: Vec<Doc>,
}

pub(crate) fn parse_scroll_body(body: &str) -> Result<ScrollBatch> {
    let envelope: ScrollEnvelope =
        serde_json::from_str(body).context("unexpected scroll response payload")?;
    Ok(ScrollBatch {
        scroll_id: envelope.scroll_id.unwrap_or_default(),
        total: envelope.hits.total.map(|t| t.value()).unwrap_or(0),
        docs: envelope
            .hits
            .hits
            .into_iter()
            .filter_map(ScrollHit::into_doc)
            .collect(),
    })
}

/// How a dialect spells bulk action lines.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BulkDialect {
    /// Pre-7 clusters want a `_type` on every action and spell routing
    /// with a leading underscore.
    pub typed: bool,
}

/// Renders the NDJSON bulk body: one action line and one source line per
/// record, with a final trailing newline as the API requires.
pub(crate) fn render_bulk_body(
    docs: &[Doc],
    index_override: Option<&str>,
    dialect: BulkDialect,
) -> Result<String> {
    let mut body = String::with_capacity(docs.iter().map(Doc::approx_bytes).sum());
    for doc in docs {
        let mut action = Map::new();
        let index = index_override.unwrap_or(&doc.index);
        action.insert("_index".into(), Value::String(index.to_owned()));
        if dialect.typed {
            let doc_type = doc.doc_type.as_deref().unwrap_or("_doc");
            action.insert("_type".into(), Value::String(doc_type.to_owned()));
        }
        if let Some(id) = &doc.id {
            action.insert("_id".into(), Value::String(id.clone()));
        }
        if let Some(routing) = &doc.routing {
            let key = if dialect.typed { "_routing" } else { "routing" };
            action.insert(key.into(), Value::String(routing.clone()));
        }
        if dialect.typed {
            if let Some(parent) = &doc.parent {
                action.insert("_parent".into(), Value::String(parent.clone()));
            }
        }
        if let Some(version) = doc.version {
            action.insert("version".into(), json!(version));
            let version_type = doc.version_type.as_deref().unwrap_or("external");
            action.insert("version_type".into(), Value::String(version_type.to_owned()));
        }
        body.push_str(&serde_json::to_string(&json!({ "index": action }))?);
        body.push('\n');
        body.push_str(doc.source.get());
        body.push('\n');
    }
    Ok(body)
}

/// What came back from one `_bulk` request.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct BulkSummary {
    pub written: u64,
    pub failed: u64,
}

#[derive(Debug, Deserialize)]
struct BulkEnvelope {
    #[serde(default)]
    items: Vec<Map<String, Value>>,
}

/// Walks the per-item statuses; anything 400+ is logged and counted as
/// failed, never retried.
pub(crate) fn parse_bulk_body(body: &str, requested: usize) -> Result<BulkSummary> {
    let envelope: BulkEnvelope =
        serde_json::from_str(body).context("unexpected bulk response payload")?;
    if envelope.items.is_empty() {
        // ancient servers acknowledge without echoing items
        return Ok(BulkSummary {
            written: requested as u64,
            failed: 0,
        });
    }
    let mut summary = BulkSummary::default();
    for item in &envelope.items {
        // each item is keyed by its action, e.g. {"index": {...}}
        let Some(outcome) = item.values().next() else {
            continue;
        };
        let status = outcome.get("status").and_then(Value::as_u64).unwrap_or(0);
        if status >= 400 {
            summary.failed += 1;
            let id = outcome.get("_id").and_then(Value::as_str).unwrap_or("?");
            let error = outcome
                .get("error")
                .map(|e| e.to_string())
                .unwrap_or_default();
            warn!("bulk item '{id}' rejected with status {status}: {error}");
        } else {
            summary.written += 1;
        }
    }
    Ok(summary)
}

/// Settings keys the cluster manages itself; writing them back is rejected.
const PRIVATE_INDEX_SETTINGS: [&str; 4] = ["creation_date", "uuid", "version", "provided_name"];

fn ensure_object(value: &mut Value) -> &mut Map<String, Value> {
    if !value.is_object() {
        *value = Value::Object(Map::new());
    }
    match value {
        Value::Object(map) => map,
        _ => unreachable!("just replaced with an object"),
    }
}

/// Descends into a descriptor's `settings.index` block, creating the nesting
/// when absent.
pub(crate) fn index_settings_mut(tree: &mut Value) -> &mut Map<String, Value> {
    let root = ensure_object(tree);
    let settings = ensure_object(root.entry("settings").or_insert_with(|| json!({})));
    ensure_object(settings.entry("index").or_insert_with(|| json!({})))
}

/// Strips cluster-private keys from a descriptor copied off a live index.
pub(crate) fn sanitize_index_settings(tree: &mut Value) {
    let index = index_settings_mut(tree);
    for key in PRIVATE_INDEX_SETTINGS {
        index.remove(key);
    }
}

/// The source's refresh cadence, or `Null` when it never set one (restoring
/// `Null` puts the target back on the cluster default).
pub(crate) fn index_refresh_interval(tree: &Value) -> Value {
    tree.pointer("/settings/index/refresh_interval")
        .cloned()
        .unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(index: &str, id: &str, source: &str) -> Doc {
        Doc {
            index: index.into(),
            doc_type: Some("doc".into()),
            id: Some(id.into()),
            routing: None,
            parent: None,
            version: None,
            version_type: None,
            source: RawValue::from_string(source.to_owned()).expect("valid json"),
        }
    }

    #[test]
    fn legacy_and_tracked_totals_both_parse() {
        let legacy = r#"{"_scroll_id":"abc","hits":{"total":42,"hits":[]}}"#;
        let batch = parse_scroll_body(legacy).unwrap();
        assert_eq!(batch.total, 42);
        assert_eq!(batch.scroll_id, "abc");

        let tracked =
            r#"{"_scroll_id":"abc","hits":{"total":{"value":42,"relation":"eq"},"hits":[]}}"#;
        let batch = parse_scroll_body(tracked).unwrap();
        assert_eq!(batch.total, 42);
    }

    #[test]
    fn hits_keep_their_identity_and_payload() {
        let body = r#"{
            "_scroll_id": "s1",
            "hits": { "total": 2, "hits": [
                {"_index":"logs","_type":"doc","_id":"1","_source":{"a":1}},
                {"_index":"logs","_id":"2","_routing":"eu","_source":{"a":2}}
            ]}
        }"#;
        let batch = parse_scroll_body(body).unwrap();
        assert_eq!(batch.docs.len(), 2);
        assert_eq!(batch.docs[0].id.as_deref(), Some("1"));
        assert_eq!(batch.docs[0].source.get(), r#"{"a":1}"#);
        assert_eq!(batch.docs[1].routing.as_deref(), Some("eu"));
    }

    #[test]
    fn old_clusters_report_routing_under_fields() {
        let body = r#"{
            "_scroll_id": "s1",
            "hits": { "total": 1, "hits": [
                {"_index":"logs","_type":"doc","_id":"1",
                 "fields":{"_routing":["shard-7"],"_parent":"p9"},
                 "_source":{}}
            ]}
        }"#;
        let batch = parse_scroll_body(body).unwrap();
        assert_eq!(batch.docs[0].routing.as_deref(), Some("shard-7"));
        assert_eq!(batch.docs[0].parent.as_deref(), Some("p9"));
    }

    #[test]
    fn typed_bulk_bodies_spell_the_old_dialect() {
        let mut record = doc("logs", "1", r#"{"msg":"hi"}"#);
        record.routing = Some("eu".into());
        record.parent = Some("p1".into());
        let body = render_bulk_body(&[record], None, BulkDialect { typed: true }).unwrap();
        let mut lines = body.lines();
        let action = lines.next().unwrap();
        assert!(action.contains(r#""_type":"doc""#), "got: {action}");
        assert!(action.contains(r#""_routing":"eu""#), "got: {action}");
        assert!(action.contains(r#""_parent":"p1""#), "got: {action}");
        assert_eq!(lines.next().unwrap(), r#"{"msg":"hi"}"#);
        assert!(body.ends_with('\n'));
    }

    #[test]
    fn typeless_bulk_bodies_drop_types_and_parents() {
        let mut record = doc("logs", "1", r#"{"msg":"hi"}"#);
        record.routing = Some("eu".into());
        record.parent = Some("p1".into());
        let body = render_bulk_body(&[record], None, BulkDialect { typed: false }).unwrap();
        let action = body.lines().next().unwrap();
        assert!(!action.contains("_type"), "got: {action}");
        assert!(!action.contains("_parent"), "got: {action}");
        assert!(action.contains(r#""routing":"eu""#), "got: {action}");
    }

    #[test]
    fn index_override_rewrites_every_action_line() {
        let docs = vec![doc("a", "1", "{}"), doc("a", "2", "{}")];
        let body = render_bulk_body(&docs, Some("b"), BulkDialect { typed: false }).unwrap();
        for line in body.lines().step_by(2) {
            assert!(line.contains(r#""_index":"b""#), "got: {line}");
            assert!(!line.contains(r#""_index":"a""#), "got: {line}");
        }
    }

    #[test]
    fn without_an_override_every_doc_keeps_its_own_index() {
        let docs = vec![doc("logs-a", "1", "{}"), doc("logs-b", "2", "{}")];
        let body = render_bulk_body(&docs, None, BulkDialect { typed: false }).unwrap();
        let actions: Vec<&str> = body.lines().step_by(2).collect();
        assert!(actions[0].contains(r#""_index":"logs-a""#), "got: {}", actions[0]);
        assert!(actions[1].contains(r#""_index":"logs-b""#), "got: {}", actions[1]);
    }

    #[test]
    fn explicit_versions_ride_the_action_line() {
        let mut record = doc("logs", "1", "{}");
        record.version = Some(3);
        let body = render_bulk_body(&[record], None, BulkDialect { typed: false }).unwrap();
        let action = body.lines().next().unwrap();
        assert!(action.contains(r#""version":3"#), "got: {action}");
        assert!(action.contains(r#""version_type":"external""#), "got: {action}");
    }

    #[test]
    fn bulk_items_split_into_written_and_failed() {
        let body = r#"{"took":3,"errors":true,"items":[
            {"index":{"_id":"1","status":201}},
            {"index":{"_id":"2","status":429,"error":{"type":"es_rejected_execution_exception"}}},
            {"index":{"_id":"3","status":200}}
        ]}"#;
        let summary = parse_bulk_body(body, 3).unwrap();
        assert_eq!(summary.written, 2);
        assert_eq!(summary.failed, 1);
    }

    #[test]
    fn itemless_acks_trust_the_request_size() {
        let summary = parse_bulk_body(r#"{"took":1,"errors":false}"#, 5).unwrap();
        assert_eq!(summary.written, 5);
        assert_eq!(summary.failed, 0);
    }

    #[test]
    fn settings_helpers_build_and_scrub_the_nesting() {
        let mut tree = json!({});
        index_settings_mut(&mut tree).insert("refresh_interval".into(), json!(-1));
        assert_eq!(tree.pointer("/settings/index/refresh_interval"), Some(&json!(-1)));

        let mut copied = json!({
            "settings": { "index": {
                "refresh_interval": "5s",
                "number_of_shards": "3",
                "creation_date": "1700000000000",
                "uuid": "abc123",
                "version": { "created": "7100299" },
                "provided_name": "logs"
            }}
        });
        sanitize_index_settings(&mut copied);
        let index = copied.pointer("/settings/index").unwrap();
        assert!(index.get("uuid").is_none());
        assert!(index.get("creation_date").is_none());
        assert_eq!(index.get("refresh_interval"), Some(&json!("5s")));
        assert_eq!(index.get("number_of_shards"), Some(&json!("3")));
    }

    #[test]
    fn refresh_interval_lookup_defaults_to_null() {
        let tree = json!({"settings": {"index": {"refresh_interval": "30s"}}});
        assert_eq!(index_refresh_interval(&tree), json!("30s"));
        assert_eq!(index_refresh_interval(&json!({})), Value::Null);
    }
}
