//! Change notifications (`_changes`).
//!
//! ```rust,no_run
//! use couchdb_client::{Client, Since};
//!
//! # fn main() -> Result<(), couchdb_client::CouchError> {
//! let client = Client::builder().database("orders").build()?;
//!
//! // normal feed
//! let result = client.changes().since(Since::Now).limit(10).get_changes()?;
//! for row in &result.results {
//!     println!("{} -> {:?}", row.id, row.revs().collect::<Vec<_>>());
//! }
//!
//! // continuous feed
//! let mut feed = client
//!     .changes()
//!     .include_docs(true)
//!     .heartbeat(std::time::Duration::from_secs(30))
//!     .continuous_changes()?;
//! while feed.has_next()? {
//!     if let Some(row) = feed.next_row() {
//!         println!("changed: {}", row.id);
//!     }
//!     feed.stop();
//! }
//! # Ok(())
//! # }
//! ```

use crate::client::Client;
use crate::error::{CouchError, Result};
use crate::feed::ChangeStream;
use crate::request::Request;
use crate::types::{ChangesResult, Feed, Since, Style};
use crate::uri::UriBuilder;
use reqwest::Url;
use serde_json::{json, Value};
use std::time::Duration;

/// Which rows the server reports. At most one mechanism per query.
#[derive(Clone, Debug, Default, PartialEq)]
enum Selection {
    #[default]
    All,
    /// Named design-document filter function, e.g. `app/important`
    Filter(String),
    /// Mango selector expression
    Selector(Value),
    DocIds(Vec<String>),
}

impl Selection {
    fn describe(&self) -> &'static str {
        match self {
            Selection::All => "none",
            Selection::Filter(_) => "filter",
            Selection::Selector(_) => "selector",
            Selection::DocIds(_) => "doc_ids",
        }
    }

    fn filter_param(&self) -> Option<&str> {
        match self {
            Selection::All => None,
            Selection::Filter(name) => Some(name),
            Selection::Selector(_) => Some("_selector"),
            Selection::DocIds(_) => Some("_doc_ids"),
        }
    }
}

/// Builder for a `_changes` request.
///
/// Filter mechanisms are mutually exclusive: setting a second one of
/// [`filter`](Self::filter), [`selector`](Self::selector) and
/// [`doc_ids`](Self::doc_ids) fails right away.
#[derive(Clone, Debug)]
#[must_use = "builders do nothing unless you call .get_changes() or .continuous_changes()"]
pub struct ChangesQuery<'a> {
    client: &'a Client,
    since: Option<Since>,
    limit: Option<u64>,
    heartbeat: Option<Duration>,
    timeout: Option<Duration>,
    include_docs: Option<bool>,
    style: Option<Style>,
    seq_interval: Option<u64>,
    selection: Selection,
}

impl Client {
    /// Start building a change feed request.
    pub fn changes(&self) -> ChangesQuery<'_> {
        ChangesQuery::new(self)
    }
}

impl<'a> ChangesQuery<'a> {
    pub(crate) fn new(client: &'a Client) -> Self {
        Self {
            client,
            since: None,
            limit: None,
            heartbeat: None,
            timeout: None,
            include_docs: None,
            style: None,
            seq_interval: None,
            selection: Selection::All,
        }
    }

    /// Start after the given sequence token, or at `Since::Now`.
    pub fn since(mut self, since: impl Into<Since>) -> Self {
        self.since = Some(since.into());
        self
    }

    /// Maximum number of rows.
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Ask the server to send an empty line at this interval while idle.
    pub fn heartbeat(mut self, interval: Duration) -> Self {
        self.heartbeat = Some(interval);
        self
    }

    /// Ask the server to close the feed after this much idle time.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Embed the current document in each row.
    pub fn include_docs(mut self, include: bool) -> Self {
        self.include_docs = Some(include);
        self
    }

    pub fn style(mut self, style: Style) -> Self {
        self.style = Some(style);
        self
    }

    /// Only compute `seq` for every Nth row; the others carry `null`.
    pub fn seq_interval(mut self, interval: u64) -> Self {
        self.seq_interval = Some(interval);
        self
    }

    /// Filter rows with a design-document filter function (`ddoc/name`).
    pub fn filter(self, name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(CouchError::precondition("filter name may not be empty"));
        }
        self.select(Selection::Filter(name))
    }

    /// Filter rows with a Mango selector expression.
    ///
    /// `selector` is the expression itself, e.g. `{"type": "order"}`; it is
    /// sent as `{"selector": ...}`.
    pub fn selector(self, selector: Value) -> Result<Self> {
        if !selector.is_object() {
            return Err(CouchError::precondition("selector must be a JSON object"));
        }
        self.select(Selection::Selector(selector))
    }

    /// Only report changes to the listed documents.
    pub fn doc_ids<I, S>(self, ids: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let ids: Vec<String> = ids.into_iter().map(Into::into).collect();
        if ids.is_empty() {
            return Err(CouchError::precondition("doc_ids may not be empty"));
        }
        self.select(Selection::DocIds(ids))
    }

    fn select(mut self, selection: Selection) -> Result<Self> {
        if self.selection != Selection::All {
            return Err(CouchError::precondition(format!(
                "{} is not compatible with {}",
                selection.describe(),
                self.selection.describe()
            )));
        }
        self.selection = selection;
        Ok(self)
    }

    /// Request URL for the given feed type.
    pub(crate) fn build_url(&self, feed: Feed) -> Url {
        let mut uri = UriBuilder::new(&self.client.db_url)
            .path("_changes")
            .query("feed", feed.to_query_value())
            .query_opt("since", self.since.as_ref().map(Since::to_query_value))
            .query_opt("limit", self.limit)
            .query_opt("heartbeat", self.heartbeat.map(|d| d.as_millis()))
            .query_opt("timeout", self.timeout.map(|d| d.as_millis()))
            .query_opt("filter", self.selection.filter_param())
            .query_opt("include_docs", self.include_docs)
            .query_opt("style", self.style.map(|s| s.to_query_value()))
            .query_opt("seq_interval", self.seq_interval);

        // A streaming request only carries a body for selectors; the id
        // list travels in the query string instead.
        if feed == Feed::Continuous {
            if let Selection::DocIds(ids) = &self.selection {
                uri = uri.query("doc_ids", Value::from(ids.clone()));
            }
        }
        uri.build()
    }

    /// JSON body for the given feed type, if the request needs one.
    pub(crate) fn build_body(&self, feed: Feed) -> Option<Value> {
        match (&self.selection, feed) {
            (Selection::Selector(selector), _) => Some(json!({ "selector": selector })),
            (Selection::DocIds(ids), Feed::Normal) => Some(json!({ "doc_ids": ids })),
            _ => None,
        }
    }

    /// Fetch one buffered batch of changes (`feed=normal`).
    ///
    /// Sent as `POST` when a selector or id list is set, `GET` otherwise.
    pub fn get_changes(&self) -> Result<ChangesResult> {
        let url = self.build_url(Feed::Normal);
        match self.build_body(Feed::Normal) {
            Some(body) => self.client.post_json(url, &body),
            None => self.client.get_json(url),
        }
    }

    /// Open a continuous feed (`feed=continuous`).
    ///
    /// The returned stream holds one connection until it terminates.
    pub fn continuous_changes(&self) -> Result<ChangeStream> {
        let url = self.build_url(Feed::Continuous);
        let req = match self.build_body(Feed::Continuous) {
            Some(body) => Request::post(url).json(&body)?,
            None => Request::get(url),
        };
        let resp = self.client.execute(req.streaming())?;
        tracing::info!(db = %self.client.config.db_name, "continuous feed opened");
        Ok(ChangeStream::new(resp))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Seq;

    fn client() -> Client {
        Client::builder()
            .endpoint("http://localhost:5984")
            .database("orders")
            .build()
            .unwrap()
    }

    #[test]
    fn test_second_filter_mechanism_fails() {
        let client = client();

        let err = client
            .changes()
            .filter("app/important")
            .unwrap()
            .selector(json!({"type": "order"}))
            .unwrap_err();
        assert!(err.is_precondition());

        let err = client
            .changes()
            .selector(json!({"type": "order"}))
            .unwrap()
            .doc_ids(["a"])
            .unwrap_err();
        assert!(err.is_precondition());

        let err = client
            .changes()
            .doc_ids(["a"])
            .unwrap()
            .filter("app/important")
            .unwrap_err();
        assert!(err.is_precondition());
    }

    #[test]
    fn test_empty_arguments_fail() {
        let client = client();
        assert!(client.changes().filter("").is_err());
        assert!(client.changes().doc_ids(Vec::<String>::new()).is_err());
        assert!(client.changes().selector(json!("x")).is_err());
    }

    #[test]
    fn test_normal_url() {
        let client = client();
        let query = client
            .changes()
            .since(Seq::from("5-g1AA"))
            .limit(10)
            .include_docs(true)
            .style(Style::AllDocs)
            .seq_interval(2)
            .filter("app/important")
            .unwrap();
        let url = query.build_url(Feed::Normal);
        assert_eq!(url.path(), "/orders/_changes");
        assert_eq!(
            url.query(),
            Some(
                "feed=normal&since=5-g1AA&limit=10&filter=app%2Fimportant\
                 &include_docs=true&style=all_docs&seq_interval=2"
            )
        );
        assert!(query.build_body(Feed::Normal).is_none());
    }

    #[test]
    fn test_continuous_url_with_heartbeat() {
        let client = client();
        let query = client
            .changes()
            .since(Since::Now)
            .heartbeat(Duration::from_secs(30))
            .timeout(Duration::from_millis(500));
        let url = query.build_url(Feed::Continuous);
        assert_eq!(
            url.query(),
            Some("feed=continuous&since=now&heartbeat=30000&timeout=500")
        );
    }

    #[test]
    fn test_selector_body() {
        let client = client();
        let query = client.changes().selector(json!({"type": "order"})).unwrap();
        let expected = json!({"selector": {"type": "order"}});
        assert_eq!(query.build_body(Feed::Normal), Some(expected.clone()));
        assert_eq!(query.build_body(Feed::Continuous), Some(expected));
        assert!(query
            .build_url(Feed::Normal)
            .query()
            .unwrap()
            .contains("filter=_selector"));
    }

    #[test]
    fn test_doc_ids_body_and_query() {
        let client = client();
        let query = client.changes().doc_ids(["a", "b"]).unwrap();
        assert_eq!(
            query.build_body(Feed::Normal),
            Some(json!({"doc_ids": ["a", "b"]}))
        );
        assert!(query.build_body(Feed::Continuous).is_none());

        let url = query.build_url(Feed::Continuous);
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("filter".into(), "_doc_ids".into())));
        assert!(pairs.contains(&("doc_ids".into(), r#"["a","b"]"#.into())));
    }
}
