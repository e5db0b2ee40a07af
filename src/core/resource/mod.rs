//! Typed view over the documents of a multi-document pipeline configuration.
//!
//! Only the fields the converter reads or rewrites are typed; every other key
//! is kept in [`Resource::rest`] and written back untouched.

use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};

/// `kind` value identifying a pipeline document.
pub const PIPELINE_KIND: &str = "pipeline";
pub const JOBSET_MARKER: &str = "nix-jobset";
pub const BUILD_MARKER: &str = "nix-build";
pub const POST_BUILD_MARKER: &str = "nix-post-build";

/// One configuration document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    /// Kept as written; non-string values are tolerated and emitted unchanged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    kind: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<Value>,
    #[serde(
        rename = "nix-jobset",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    jobset_marker: Option<Value>,
    #[serde(rename = "nix-build", default, skip_serializing_if = "Option::is_none")]
    build_marker: Option<Value>,
    #[serde(
        rename = "nix-post-build",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    post_build_marker: Option<Value>,
    /// Every key without a typed field, in document order.
    #[serde(flatten)]
    pub rest: Mapping,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<Mapping>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depends_on: Option<Vec<String>>,
}

/// Role of a resource in the dynamic evaluation flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageRole {
    Jobset,
    Build,
    PostBuild,
    Other,
}

impl Resource {
    /// Build an empty pipeline resource.
    pub fn pipeline(name: Option<&str>) -> Self {
        Resource {
            kind: Some(Value::String(PIPELINE_KIND.to_string())),
            name: name.map(|name| Value::String(name.to_string())),
            ..Resource::default()
        }
    }

    /// `kind` when it is a string.
    pub fn kind(&self) -> Option<&str> {
        self.kind.as_ref().and_then(Value::as_str)
    }

    /// `name` when it is a string.
    pub fn name(&self) -> Option<&str> {
        self.name.as_ref().and_then(Value::as_str)
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = Some(Value::String(name.into()));
    }

    pub fn is_pipeline(&self) -> bool {
        self.kind() == Some(PIPELINE_KIND)
    }

    /// Returns `true` when any role-marker key is present, whatever its value.
    pub fn has_marker_fields(&self) -> bool {
        self.jobset_marker.is_some()
            || self.build_marker.is_some()
            || self.post_build_marker.is_some()
    }

    /// Role of this resource without modifying it. Precedence: jobset, build, post-build.
    pub fn role(&self) -> StageRole {
        if !self.is_pipeline() {
            return StageRole::Other;
        }
        if is_enabled(&self.jobset_marker) {
            StageRole::Jobset
        } else if is_enabled(&self.build_marker) {
            StageRole::Build
        } else if is_enabled(&self.post_build_marker) {
            StageRole::PostBuild
        } else {
            StageRole::Other
        }
    }

    /// Resolve the role and strip every marker key from pipeline documents.
    pub fn take_role(&mut self) -> StageRole {
        let role = self.role();
        if self.is_pipeline() {
            self.jobset_marker = None;
            self.build_marker = None;
            self.post_build_marker = None;
        } else if self.has_marker_fields() {
            tracing::debug!(resource = %self.label(), "ignoring role markers on non-pipeline resource");
        }
        role
    }

    /// Human readable identifier used in diagnostics.
    pub fn label(&self) -> String {
        match self.name() {
            Some(name) => name.to_string(),
            None => format!("{:?}", self),
        }
    }

    /// Serialize as one YAML document including the leading `---` separator.
    pub fn to_document(&self) -> Result<String, serde_yaml::Error> {
        let body = serde_yaml::to_string(self)?;
        Ok(format!("---\n{}", body))
    }
}

fn is_enabled(marker: &Option<Value>) -> bool {
    matches!(marker, Some(Value::Bool(true)))
}

/// Errors produced while decoding the configuration text.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("document {document} is not valid YAML: {source}")]
    Syntax {
        document: usize,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("document {document} is not a mapping: {content}")]
    NotAMapping { document: usize, content: String },
    #[error("document {document} has an invalid field: {source}\n{content}")]
    InvalidField {
        document: usize,
        content: String,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Decode every document of `text`; empty documents are skipped.
///
/// Merge keys (`<<: *anchor`) are resolved before the typed fields are read.
pub fn parse(text: &str) -> Result<Vec<Resource>, ParseError> {
    let mut resources = Vec::new();
    for (index, document) in serde_yaml::Deserializer::from_str(text).enumerate() {
        let position = index + 1;
        let mut value = Value::deserialize(document).map_err(|source| ParseError::Syntax {
            document: position,
            source,
        })?;
        match &value {
            Value::Null => continue,
            Value::Mapping(_) => {}
            other => {
                return Err(ParseError::NotAMapping {
                    document: position,
                    content: describe(other),
                })
            }
        }
        let invalid = |value: &Value, source: serde_yaml::Error| ParseError::InvalidField {
            document: position,
            content: describe(value),
            source,
        };
        if let Err(source) = value.apply_merge() {
            return Err(invalid(&value, source));
        }
        let resource = Resource::deserialize(&value).map_err(|source| invalid(&value, source))?;
        resources.push(resource);
    }
    Ok(resources)
}

fn describe(value: &Value) -> String {
    serde_yaml::to_string(value).unwrap_or_else(|_| format!("{:?}", value))
}

/// Resources partitioned by role, each bucket in input order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Classified {
    pub jobsets: Vec<Resource>,
    pub builds: Vec<Resource>,
    pub post_builds: Vec<Resource>,
    pub others: Vec<Resource>,
}

impl Classified {
    /// `true` when there is at least one jobset and one build template.
    pub fn is_dynamic(&self) -> bool {
        !self.jobsets.is_empty() && !self.builds.is_empty()
    }
}

pub fn classify(resources: Vec<Resource>) -> Classified {
    let mut classified = Classified::default();
    for mut resource in resources {
        match resource.take_role() {
            StageRole::Jobset => classified.jobsets.push(resource),
            StageRole::Build => classified.builds.push(resource),
            StageRole::PostBuild => classified.post_builds.push(resource),
            StageRole::Other => classified.others.push(resource),
        }
    }
    classified
}
