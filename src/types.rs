//! Core types for the CouchDB client.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

/// Server-assigned sequence token.
///
/// Sequence tokens are:
/// - Opaque: Do not parse or interpret their structure
/// - Polymorphic: A number on 1.x servers, a string (or array) on 2.x+
/// - Replayable: Hand one back verbatim as `since` to resume a feed
///
/// No ordering is defined between tokens.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Seq(Value);

impl Seq {
    /// Wrap a raw JSON token.
    pub fn new(value: Value) -> Self {
        Seq(value)
    }

    /// The token exactly as the server sent it.
    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// Convert to query parameter value.
    ///
    /// Strings are sent unquoted, numbers as their decimal form and any
    /// composite token as its compact JSON text.
    pub fn to_query_value(&self) -> String {
        match &self.0 {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for Seq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_query_value())
    }
}

impl From<&str> for Seq {
    fn from(s: &str) -> Self {
        Seq(Value::String(s.to_string()))
    }
}

impl From<String> for Seq {
    fn from(s: String) -> Self {
        Seq(Value::String(s))
    }
}

impl From<u64> for Seq {
    fn from(n: u64) -> Self {
        Seq(Value::from(n))
    }
}

/// Starting position of a change feed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Since {
    /// From the first change (sentinel "0")
    #[default]
    Beginning,
    /// Only changes made after the request (sentinel "now")
    Now,
    /// Resume after a previously observed token
    At(Seq),
}

impl Since {
    /// Convert to query parameter value
    pub fn to_query_value(&self) -> String {
        match self {
            Since::Beginning => "0".to_string(),
            Since::Now => "now".to_string(),
            Since::At(seq) => seq.to_query_value(),
        }
    }
}

impl From<Seq> for Since {
    fn from(seq: Seq) -> Self {
        Since::At(seq)
    }
}

impl From<&Seq> for Since {
    fn from(seq: &Seq) -> Self {
        Since::At(seq.clone())
    }
}

impl From<&str> for Since {
    fn from(s: &str) -> Self {
        match s {
            "now" => Since::Now,
            "" | "0" => Since::Beginning,
            other => Since::At(Seq::from(other)),
        }
    }
}

impl From<String> for Since {
    fn from(s: String) -> Self {
        Since::from(s.as_str())
    }
}

/// Feed type of a `_changes` request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Feed {
    /// One bounded, buffered response
    Normal,
    /// An open, line-delimited stream
    Continuous,
}

impl Feed {
    pub fn to_query_value(&self) -> &'static str {
        match self {
            Feed::Normal => "normal",
            Feed::Continuous => "continuous",
        }
    }
}

/// How many revisions each change row reports.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Style {
    /// Only the winning revision
    #[default]
    MainOnly,
    /// All leaf revisions, including conflicts
    AllDocs,
}

impl Style {
    pub fn to_query_value(&self) -> &'static str {
        match self {
            Style::MainOnly => "main_only",
            Style::AllDocs => "all_docs",
        }
    }
}

/// Envelope returned by write operations.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocResponse {
    #[serde(default)]
    pub ok: bool,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub rev: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// A revision entry of a change row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRev {
    pub rev: String,
}

/// One row of a change feed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChangeRow {
    /// `None` for rows the server skipped when `seq_interval` is set.
    #[serde(default)]
    pub seq: Option<Seq>,
    pub id: String,
    #[serde(default)]
    pub changes: Vec<ChangeRev>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc: Option<Value>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub deleted: bool,
}

impl ChangeRow {
    /// Revision tokens of this row, in server order.
    pub fn revs(&self) -> impl Iterator<Item = &str> {
        self.changes.iter().map(|c| c.rev.as_str())
    }
}

/// Result of a normal feed request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChangesResult {
    pub results: Vec<ChangeRow>,
    pub last_seq: Seq,
    #[serde(default)]
    pub pending: Option<u64>,
}

/// Database metadata returned by `GET /{db}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DbInfo {
    pub db_name: String,
    #[serde(default)]
    pub doc_count: u64,
    #[serde(default)]
    pub doc_del_count: u64,
    pub update_seq: Seq,
    #[serde(default)]
    pub purge_seq: Option<Seq>,
    #[serde(default)]
    pub compact_running: bool,
    #[serde(default)]
    pub instance_start_time: Option<String>,
}

/// One row of the server-wide `_db_updates` feed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DbUpdate {
    pub db_name: String,
    /// `created`, `updated` or `deleted`
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub seq: Option<Seq>,
}

/// Result of a `_db_updates` request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DbUpdates {
    #[serde(default)]
    pub results: Vec<DbUpdate>,
    pub last_seq: Seq,
}

/// Result of a `_purge` request.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PurgeResponse {
    #[serde(default)]
    pub purge_seq: Option<Seq>,
    #[serde(default)]
    pub purged: HashMap<String, Vec<String>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_seq_query_value_keeps_token_verbatim() {
        assert_eq!(Seq::from(42u64).to_query_value(), "42");
        assert_eq!(Seq::from("3-g1AAAA").to_query_value(), "3-g1AAAA");
        assert_eq!(Seq::new(json!([3, "abc"])).to_query_value(), r#"[3,"abc"]"#);
    }

    #[test]
    fn test_since_from_str() {
        assert_eq!(Since::from("now"), Since::Now);
        assert_eq!(Since::from(""), Since::Beginning);
        assert_eq!(Since::from("7-xyz").to_query_value(), "7-xyz");
    }

    #[test]
    fn test_change_row_with_null_seq() {
        let row: ChangeRow = serde_json::from_value(json!({
            "seq": null,
            "id": "doc1",
            "changes": [{"rev": "2-b"}, {"rev": "1-a"}]
        }))
        .unwrap();
        assert!(row.seq.is_none());
        assert_eq!(row.revs().collect::<Vec<_>>(), vec!["2-b", "1-a"]);
        assert!(!row.deleted);
        assert!(row.doc.is_none());
    }

    #[test]
    fn test_changes_result_with_composite_seq() {
        let result: ChangesResult = serde_json::from_value(json!({
            "results": [
                {"seq": [1, "g1"], "id": "a", "changes": [{"rev": "1-a"}], "deleted": true}
            ],
            "last_seq": [1, "g1"],
            "pending": 0
        }))
        .unwrap();
        assert_eq!(result.results.len(), 1);
        assert!(result.results[0].deleted);
        assert_eq!(result.last_seq, Seq::new(json!([1, "g1"])));
    }

    #[test]
    fn test_doc_response_error_envelope() {
        let resp: DocResponse =
            serde_json::from_str(r#"{"error":"conflict","reason":"Document update conflict."}"#)
                .unwrap();
        assert!(!resp.ok);
        assert_eq!(resp.error.as_deref(), Some("conflict"));
    }
}
