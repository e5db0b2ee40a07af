use uuid::Uuid;

/// Identifying fields of the conversion being served.
///
/// Passed explicitly through every phase so that API calls and log events
/// always refer to the same repository and build.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    pub request_id: Uuid,
    pub namespace: String,
    pub name: String,
    pub build_ref: String,
    pub branch: String,
    pub event: String,
    pub before: String,
    pub after: String,
}

impl RequestContext {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        RequestContext {
            request_id: Uuid::new_v4(),
            namespace: namespace.into(),
            name: name.into(),
            ..RequestContext::default()
        }
    }

    /// `namespace/name` of the repository.
    pub fn slug(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    /// Span carrying the identifying fields; every event of the conversion is recorded inside it.
    pub fn span(&self) -> tracing::Span {
        tracing::info_span!(
            "conversion",
            request_id = %self.request_id,
            repo_namespace = %self.namespace,
            repo_name = %self.name,
            build_before = %self.before,
            build_after = %self.after,
        )
    }
}
