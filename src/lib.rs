//! CouchDB Rust Client
//!
//! A blocking client for the CouchDB HTTP API - pooled, authenticated
//! sessions, document CRUD and change feeds.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use couchdb_client::{Client, CouchError, Since};
//! use serde_json::json;
//!
//! fn main() -> Result<(), CouchError> {
//!     let client = Client::builder()
//!         .endpoint("http://127.0.0.1:5984")
//!         .database("orders")
//!         .credentials("admin", "secret")
//!         .build()?;
//!
//!     // Create a document
//!     let resp = client.save(&json!({"type": "order", "total": 12}))?;
//!
//!     // Read it back
//!     let doc: serde_json::Value = client.find(&resp.id)?;
//!     assert_eq!(doc["_rev"], json!(resp.rev));
//!
//!     // Follow changes
//!     let mut feed = client.changes().since(Since::Now).continuous_changes()?;
//!     while feed.has_next()? {
//!         let row = feed.next_row().expect("row after has_next");
//!         println!("{} changed", row.id);
//!         feed.stop();
//!     }
//!
//!     client.shutdown();
//!     Ok(())
//! }
//! ```

mod changes;
mod client;
mod config;
mod document;
mod error;
mod feed;
mod local;
mod params;
mod pool;
mod request;
mod types;
mod uri;

pub use changes::ChangesQuery;
pub use client::{Client, ClientBuilder};
pub use config::{Config, TlsPolicy, ENV_PREFIX};
pub use document::generate_id;
pub use error::{CouchError, InvalidHeaderError, Result};
pub use feed::{ChangeStream, StopHandle};
pub use local::Local;
pub use params::Params;
pub use request::{Request, Response};
pub use types::{
    ChangeRev, ChangeRow, ChangesResult, DbInfo, DbUpdate, DbUpdates, DocResponse, Feed,
    PurgeResponse, Seq, Since, Style,
};
pub use uri::UriBuilder;
