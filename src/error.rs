#![deny(clippy::unwrap_used, clippy::expect_used)]

use serde::{Deserialize, Serialize};

/// A struct that represents an error with a context and possibly the propagated source error.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ContextError {
    pub context: String,
    pub source_error: Option<String>,
}

impl std::fmt::Display for ContextError {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.source_error {
            Some(source_error) => write!(
                formatter,
                "{}: {}",
                self.context,
                minimize_first_letter(source_error.to_string()),
            ),
            None => write!(formatter, "{}", self.context),
        }
    }
}

impl std::error::Error for ContextError {}

impl ContextError {
    /// Create a new `ContextError` with the given context.
    pub fn with_context<S: Into<String>>(context: S) -> ContextError {
        ContextError {
            context: context.into(),
            source_error: None,
        }
    }

    /// Create a new `ContextError` with the given context and source error.
    pub fn with_error<S: Into<String>>(context: S, error: &dyn std::error::Error) -> ContextError {
        ContextError {
            context: context.into(),
            source_error: Some(error.to_string()),
        }
    }
}

/// The failure of a single document generation. Every variant names the template that was
/// being rendered, so that a batch report or a notification can tell the failures apart.
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationError {
    /// A template or font could not be retrieved.
    AssetFetch {
        template: String,
        asset: String,
        cause: ContextError,
    },
    /// The template bytes were retrieved but are not a usable PDF.
    TemplateParse { template: String, cause: ContextError },
    /// A font could not be parsed or embedded into the template.
    FontEmbed {
        template: String,
        font: String,
        cause: ContextError,
    },
    /// A field which is essential to the output is missing or malformed.
    Validation {
        template: String,
        field: String,
        reason: String,
    },
    /// Drawing onto the template or serializing the result failed.
    Render { template: String, cause: ContextError },
}

impl GenerationError {
    /// The name of the template whose generation failed.
    pub fn template(&self) -> &str {
        match self {
            GenerationError::AssetFetch { template, .. }
            | GenerationError::TemplateParse { template, .. }
            | GenerationError::FontEmbed { template, .. }
            | GenerationError::Validation { template, .. }
            | GenerationError::Render { template, .. } => template,
        }
    }

    /// A short machine-friendly name of the failure kind.
    pub fn kind(&self) -> &'static str {
        match self {
            GenerationError::AssetFetch { .. } => "asset-fetch",
            GenerationError::TemplateParse { .. } => "template-parse",
            GenerationError::FontEmbed { .. } => "font-embed",
            GenerationError::Validation { .. } => "validation",
            GenerationError::Render { .. } => "render",
        }
    }
}

impl std::fmt::Display for GenerationError {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GenerationError::AssetFetch {
                template,
                asset,
                cause,
            } => write!(
                formatter,
                "Failed to generate {template}: unable to fetch the asset {asset:?}: {cause}"
            ),
            GenerationError::TemplateParse { template, cause } => write!(
                formatter,
                "Failed to generate {template}: unable to parse the template: {cause}"
            ),
            GenerationError::FontEmbed {
                template,
                font,
                cause,
            } => write!(
                formatter,
                "Failed to generate {template}: unable to embed the font {font}: {cause}"
            ),
            GenerationError::Validation {
                template,
                field,
                reason,
            } => write!(
                formatter,
                "Failed to generate {template}: invalid field {field:?}: {reason}"
            ),
            GenerationError::Render { template, cause } => {
                write!(formatter, "Failed to generate {template}: {cause}")
            }
        }
    }
}

impl std::error::Error for GenerationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            GenerationError::AssetFetch { cause, .. }
            | GenerationError::TemplateParse { cause, .. }
            | GenerationError::FontEmbed { cause, .. }
            | GenerationError::Render { cause, .. } => Some(cause),
            GenerationError::Validation { .. } => None,
        }
    }
}

/// Minimizes the first letter of a string, it is used for standardizing the error message.
fn minimize_first_letter(string: String) -> String {
    let mut characters = string.chars();
    match characters.next() {
        None => String::new(),
        Some(character) => character.to_lowercase().chain(characters).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_error_chains_the_source_in_lowercase() {
        let source = ContextError::with_context("No such file");
        let error = ContextError::with_error("Failed to read the template", &source);
        assert_eq!(error.to_string(), "Failed to read the template: no such file");
    }

    #[test]
    fn generation_error_names_the_template() {
        let error = GenerationError::AssetFetch {
            template: "certificate2".into(),
            asset: "fonts/Sora-Regular.ttf".into(),
            cause: ContextError::with_context("Not found"),
        };
        assert_eq!(error.template(), "certificate2");
        assert_eq!(error.kind(), "asset-fetch");
        assert_eq!(
            error.to_string(),
            "Failed to generate certificate2: unable to fetch the asset \"fonts/Sora-Regular.ttf\": Not found"
        );
    }
}
