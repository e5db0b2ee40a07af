use crate::core::types::ErrorCategory;
use std::collections::BTreeMap;

/// Service-level error used by configuration loading, startup and the CLI.
///
/// Failures of a single conversion are reported through
/// [`ConvertError`](crate::core::converter::ConvertError) instead; they are
/// wrapped into an `AppError` only when they cross into the CLI.
#[derive(Debug)]
pub struct AppError {
    pub category: ErrorCategory,
    pub code: String,
    pub message: String,
    pub context: BTreeMap<String, String>,
    pub source: Option<anyhow::Error>,
}

impl AppError {
    pub fn new<T: Into<String>>(category: ErrorCategory, message: T) -> Self {
        let code = match category {
            ErrorCategory::ValidationError => "CFG-001",
            ErrorCategory::ConversionError => "CNV-001",
            ErrorCategory::NetworkError => "NET-001",
            ErrorCategory::IoError => "IO-001",
        };
        AppError {
            category,
            code: code.to_string(),
            message: message.into(),
            context: BTreeMap::new(),
            source: None,
        }
    }

    pub fn with_source<T: Into<String>>(
        category: ErrorCategory,
        message: T,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        let mut error = AppError::new(category, message);
        error.source = Some(anyhow::Error::new(source));
        error
    }

    pub fn with_code<T: Into<String>>(mut self, code: T) -> Self {
        self.code = code.into();
        self
    }

    pub fn with_context(mut self, key: &str, value: impl Into<String>) -> Self {
        self.context.insert(key.to_string(), value.into());
        self
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}: {}", self.code, self.category, self.message)?;
        if !self.context.is_empty() {
            write!(f, " (Context: {:?})", self.context)?;
        }
        if let Some(ref source) = self.source {
            write!(f, "\nCaused by: {}", source)?;
        }
        Ok(())
    }
}

impl std::error::Error for AppError {}

impl From<std::io::Error> for AppError {
    fn from(e: std::io::Error) -> Self {
        AppError::new(ErrorCategory::IoError, e.to_string()).with_code("IO_ERROR")
    }
}
