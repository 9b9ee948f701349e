//! Document operations on the client's database.

use crate::client::Client;
use crate::error::{CouchError, Result};
use crate::params::Params;
use crate::request::{decode, Request};
use crate::types::{DbInfo, DbUpdates, DocResponse, PurgeResponse, Since};
use crate::uri::UriBuilder;
use reqwest::header::{HeaderValue, IF_NONE_MATCH};
use reqwest::Url;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Whether a write may create a document or must update an existing one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum WriteMode {
    Create,
    Update,
}

/// Serialize `doc` and check its `_id`/`_rev` against the write mode.
///
/// Creates reject a revision and fill in a generated id when none is set.
/// Updates require both. No request is sent when this fails.
pub(crate) fn prepare_write<D>(doc: &D, mode: WriteMode) -> Result<(String, Map<String, Value>)>
where
    D: Serialize + ?Sized,
{
    let mut json = to_object(doc)?;
    let id = string_field(&json, "_id");
    let rev = string_field(&json, "_rev");

    let id = match mode {
        WriteMode::Create => {
            if rev.is_some() {
                return Err(CouchError::precondition(
                    "a new document may not carry a revision",
                ));
            }
            // A null or empty `_rev` is rejected by the server.
            json.remove("_rev");
            match id {
                Some(id) => id,
                None => {
                    let id = generate_id();
                    json.insert("_id".to_string(), Value::String(id.clone()));
                    id
                }
            }
        }
        WriteMode::Update => {
            let id = id.ok_or_else(|| CouchError::precondition("id may not be empty"))?;
            if rev.is_none() {
                return Err(CouchError::precondition("revision may not be empty"));
            }
            id
        }
    };
    Ok((id, json))
}

/// Serialize a document, which must be a JSON object.
pub(crate) fn to_object<D: Serialize + ?Sized>(doc: &D) -> Result<Map<String, Value>> {
    match serde_json::to_value(doc)? {
        Value::Object(map) => Ok(map),
        _ => Err(CouchError::precondition("document must be a JSON object")),
    }
}

/// A non-empty string member; `null` and `""` count as absent.
pub(crate) fn string_field(json: &Map<String, Value>, name: &str) -> Option<String> {
    json.get(name)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

pub(crate) fn require(value: &str, name: &str) -> Result<()> {
    if value.is_empty() {
        return Err(CouchError::precondition(format!("{name} may not be empty")));
    }
    Ok(())
}

/// Generate a document id: a random UUID in 32-digit hex form.
pub fn generate_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

#[derive(Deserialize)]
struct FindResult<T> {
    docs: Vec<T>,
}

#[derive(Deserialize)]
struct Welcome {
    version: String,
}

impl Client {
    /// URL of a document in this database.
    pub(crate) fn doc_url(&self, id: &str) -> Url {
        UriBuilder::new(&self.db_url).path(id).build()
    }

    /// Fetch a document by id.
    ///
    /// Returns `CouchError::NotFound` when the document does not exist.
    pub fn find<T: DeserializeOwned>(&self, id: &str) -> Result<T> {
        self.find_with_params(id, &Params::new())
    }

    /// Fetch a document with extra query parameters.
    pub fn find_with_params<T: DeserializeOwned>(&self, id: &str, params: &Params) -> Result<T> {
        require(id, "id")?;
        let url = UriBuilder::new(&self.db_url).path(id).params(params).build();
        self.get_json(url)
    }

    /// Fetch a document only if its current revision differs from `rev`.
    ///
    /// Returns `CouchError::NotModified` when `rev` is still current.
    pub fn find_if_modified<T: DeserializeOwned>(&self, id: &str, rev: &str) -> Result<T> {
        require(id, "id")?;
        require(rev, "revision")?;
        let etag = HeaderValue::from_str(&format!("\"{rev}\""))
            .map_err(|_| CouchError::precondition(format!("invalid revision: {rev}")))?;
        let req = Request::get(self.doc_url(id)).header(IF_NONE_MATCH, etag);
        decode(self.execute(req)?)
    }

    /// Check whether a document exists.
    pub fn contains(&self, id: &str) -> Result<bool> {
        require(id, "id")?;
        match self.head(self.doc_url(id)) {
            Ok(_) => Ok(true),
            Err(CouchError::NotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Create a document with `PUT`.
    ///
    /// Uses the document's `_id`, or a generated one when it has none.
    /// A document that already carries `_rev` is rejected locally.
    pub fn save<D: Serialize + ?Sized>(&self, doc: &D) -> Result<DocResponse> {
        let (id, json) = prepare_write(doc, WriteMode::Create)?;
        self.put_json(self.doc_url(&id), &json)
    }

    /// Create a document with `POST`, letting the server assign the id.
    pub fn post<D: Serialize + ?Sized>(&self, doc: &D) -> Result<DocResponse> {
        let json = to_object(doc)?;
        self.post_json(self.db_url.clone(), &json)
    }

    /// Update an existing document; `_id` and `_rev` are required.
    pub fn update<D: Serialize + ?Sized>(&self, doc: &D) -> Result<DocResponse> {
        let (id, json) = prepare_write(doc, WriteMode::Update)?;
        self.put_json(self.doc_url(&id), &json)
    }

    /// Delete a document revision.
    pub fn remove(&self, id: &str, rev: &str) -> Result<DocResponse> {
        require(id, "id")?;
        require(rev, "revision")?;
        let url = UriBuilder::new(&self.db_url).path(id).query("rev", rev).build();
        self.delete_json(url)
    }

    /// Delete a document, reading `_id` and `_rev` from it.
    pub fn remove_doc<D: Serialize + ?Sized>(&self, doc: &D) -> Result<DocResponse> {
        let (id, json) = prepare_write(doc, WriteMode::Update)?;
        let rev = string_field(&json, "_rev").unwrap_or_default();
        self.remove(&id, &rev)
    }

    /// Run a Mango query (`_find`) and return the matching documents.
    pub fn find_docs<T, Q>(&self, query: &Q) -> Result<Vec<T>>
    where
        T: DeserializeOwned,
        Q: Serialize + ?Sized,
    {
        let url = UriBuilder::new(&self.db_url).path("_find").build();
        let result: FindResult<T> = self.post_json(url, query)?;
        Ok(result.docs)
    }

    /// Permanently remove revisions from the database.
    pub fn purge(&self, revs: &HashMap<String, Vec<String>>) -> Result<PurgeResponse> {
        if revs.is_empty() {
            return Err(CouchError::precondition("to purge map may not be empty"));
        }
        let url = UriBuilder::new(&self.db_url).path("_purge").build();
        self.post_json(url, revs)
    }

    /// Metadata of the client's database.
    pub fn info(&self) -> Result<DbInfo> {
        self.get_json(self.db_url.clone())
    }

    /// Version string reported by the server root.
    pub fn server_version(&self) -> Result<String> {
        let welcome: Welcome = self.get_json(self.base_url.clone())?;
        Ok(welcome.version)
    }

    /// Create a database unless it exists. Returns whether it was created.
    pub fn create_db(&self, name: &str) -> Result<bool> {
        require(name, "database name")?;
        let url = UriBuilder::new(&self.base_url).dir(name).build();
        match self.head(url.clone()) {
            Ok(_) => Ok(false),
            Err(CouchError::NotFound { .. }) => {
                let _: DocResponse = decode(self.execute(Request::put(url))?)?;
                tracing::info!(db = name, "created database");
                Ok(true)
            }
            Err(e) => Err(e),
        }
    }

    /// Delete a database and everything in it.
    pub fn delete_db(&self, name: &str) -> Result<()> {
        require(name, "database name")?;
        let url = UriBuilder::new(&self.base_url).dir(name).build();
        let _: DocResponse = self.delete_json(url)?;
        tracing::info!(db = name, "deleted database");
        Ok(())
    }

    /// Server-wide database events (`_db_updates`) after `since`.
    ///
    /// Requires admin rights on the server.
    pub fn db_updates(&self, since: impl Into<Since>) -> Result<DbUpdates> {
        let since = since.into();
        let url = UriBuilder::new(&self.base_url)
            .path("_db_updates")
            .query("since", since.to_query_value())
            .build();
        self.get_json(url)
    }
}
