pub mod config;
pub mod context;
pub mod converter;
pub mod error;
pub mod evaluation;
pub mod manifest;
pub mod render;
pub mod resource;
pub mod types;

pub use config::{ConfigLoader, PluginConfig};
pub use context::RequestContext;
pub use converter::{ConversionRequest, ConversionResult, ConvertError, Converter, ConverterOptions};
pub use error::AppError;
pub use types::*;
