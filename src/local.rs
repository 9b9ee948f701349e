//! Local (non-replicated) documents.

use crate::client::Client;
use crate::document::{prepare_write, require, WriteMode};
use crate::error::{CouchError, Result};
use crate::types::DocResponse;
use crate::uri::UriBuilder;
use reqwest::Url;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

const LOCAL_PATH: &str = "_local";
const LOCAL_PREFIX: &str = "_local/";
const LOCAL_DOCS: &str = "_local_docs";

#[derive(Deserialize)]
struct LocalDocs<T> {
    rows: Vec<LocalDocRow<T>>,
}

#[derive(Deserialize)]
struct LocalDocRow<T> {
    doc: Option<T>,
}

/// Handle for `_local/` document CRUD.
///
/// Ids may be given with or without the `_local/` prefix.
#[derive(Clone, Copy, Debug)]
pub struct Local<'a> {
    client: &'a Client,
}

impl Client {
    /// Access local documents of this database.
    pub fn local(&self) -> Local<'_> {
        Local { client: self }
    }
}

impl<'a> Local<'a> {
    fn url(&self, id: &str) -> Url {
        let id = id.strip_prefix(LOCAL_PREFIX).unwrap_or(id);
        UriBuilder::new(&self.client.db_url)
            .path(LOCAL_PATH)
            .path(id)
            .build()
    }

    pub fn find<T: DeserializeOwned>(&self, id: &str) -> Result<T> {
        require(id, "id")?;
        self.client.get_json(self.url(id))
    }

    /// Every local document of the database (`_local_docs`).
    pub fn find_all<T: DeserializeOwned>(&self) -> Result<Vec<T>> {
        let url = UriBuilder::new(&self.client.db_url)
            .path(LOCAL_DOCS)
            .query("include_docs", true)
            .build();
        let listing: LocalDocs<T> = self.client.get_json(url)?;
        Ok(listing.rows.into_iter().filter_map(|row| row.doc).collect())
    }

    pub fn contains(&self, id: &str) -> Result<bool> {
        require(id, "id")?;
        match self.client.head(self.url(id)) {
            Ok(_) => Ok(true),
            Err(CouchError::NotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Store a new local document; a missing `_id` is generated.
    pub fn save<D: Serialize + ?Sized>(&self, doc: &D) -> Result<DocResponse> {
        let (id, json) = prepare_write(doc, WriteMode::Create)?;
        self.client.put_json(self.url(&id), &json)
    }

    pub fn update<D: Serialize + ?Sized>(&self, doc: &D) -> Result<DocResponse> {
        let (id, json) = prepare_write(doc, WriteMode::Update)?;
        self.client.put_json(self.url(&id), &json)
    }

    pub fn remove(&self, id: &str) -> Result<DocResponse> {
        require(id, "id")?;
        self.client.delete_json(self.url(id))
    }

    pub fn remove_with_rev(&self, id: &str, rev: &str) -> Result<DocResponse> {
        require(id, "id")?;
        require(rev, "revision")?;
        let url = UriBuilder::new(&self.url(id)).query("rev", rev).build();
        self.client.delete_json(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> Client {
        Client::builder().database("orders").build().unwrap()
    }

    #[test]
    fn test_local_url_strips_prefix() {
        let client = client();
        let local = client.local();
        assert_eq!(local.url("cp-1").path(), "/orders/_local/cp-1");
        assert_eq!(local.url("_local/cp-1").path(), "/orders/_local/cp-1");
    }

    #[test]
    fn test_local_url_encodes_slash() {
        let client = client();
        assert_eq!(client.local().url("a/b").path(), "/orders/_local/a%2Fb");
    }

    #[test]
    fn test_update_without_rev_fails_locally() {
        let client = client();
        let err = client
            .local()
            .update(&serde_json::json!({"_id": "cp-1"}))
            .unwrap_err();
        assert!(err.is_precondition());
    }
}
