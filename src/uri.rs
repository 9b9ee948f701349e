//! Request URL construction.

use crate::params::Params;
use reqwest::Url;

/// Builds request URLs below a server or database root.
///
/// Path segments are percent-encoded one at a time, so document ids
/// containing `/` stay a single segment.
#[derive(Clone, Debug)]
pub struct UriBuilder {
    url: Url,
    params: Vec<(String, String)>,
}

impl UriBuilder {
    /// Start from a root URL; an existing query string is kept.
    pub fn new(base: &Url) -> Self {
        Self {
            url: base.clone(),
            params: Vec::new(),
        }
    }

    /// Append one encoded path segment.
    pub fn path(mut self, segment: &str) -> Self {
        if let Ok(mut segments) = self.url.path_segments_mut() {
            segments.pop_if_empty().push(segment);
        }
        self
    }

    /// Append a path segment followed by a trailing slash.
    pub fn dir(self, segment: &str) -> Self {
        let mut builder = self.path(segment);
        if let Ok(mut segments) = builder.url.path_segments_mut() {
            segments.push("");
        }
        builder
    }

    /// Add a query parameter.
    pub fn query(mut self, name: &str, value: impl ToString) -> Self {
        self.params.push((name.to_string(), value.to_string()));
        self
    }

    /// Add a query parameter when a value is present.
    pub fn query_opt<V: ToString>(self, name: &str, value: Option<V>) -> Self {
        match value {
            Some(v) => self.query(name, v),
            None => self,
        }
    }

    /// Add every parameter of a [`Params`] set.
    pub fn params(mut self, params: &Params) -> Self {
        self.params.extend(params.iter().cloned());
        self
    }

    pub fn build(&self) -> Url {
        let mut url = self.url.clone();
        if !self.params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (name, value) in &self.params {
                pairs.append_pair(name, value);
            }
        }
        url
    }
}
