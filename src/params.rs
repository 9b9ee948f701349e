//! Query parameters for document reads.

/// Extra query parameters appended to a `find` request.
///
/// ```
/// use couchdb_client::Params;
/// let params = Params::new().revs_info().conflicts();
/// assert_eq!(params.len(), 2);
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Params {
    params: Vec<(String, String)>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn revs_info(self) -> Self {
        self.add_param("revs_info", "true")
    }

    pub fn attachments(self) -> Self {
        self.add_param("attachments", "true")
    }

    pub fn revisions(self) -> Self {
        self.add_param("revs", "true")
    }

    /// Read a specific revision instead of the winner.
    pub fn rev(self, rev: impl Into<String>) -> Self {
        self.add_param("rev", rev)
    }

    pub fn conflicts(self) -> Self {
        self.add_param("conflicts", "true")
    }

    pub fn local_seq(self) -> Self {
        self.add_param("local_seq", "true")
    }

    pub fn add_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((name.into(), value.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, String)> {
        self.params.iter()
    }
}
