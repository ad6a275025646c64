//! Error types for recipes and the microdata codec.
//!
//! Every variant carries a stable short code (see [`CoreError::code`]) plus
//! the context needed to diagnose the failure. Codec errors that originate in
//! the parser carry the byte offset of the parse point.

use thiserror::Error;

/// Result type for sediment-core operations.
pub type Result<T> = core::result::Result<T, CoreError>;

/// Errors produced by the recipe registry and the microdata codec.
///
/// All of these are non-retryable domain errors: the input or the recipe is
/// wrong, and retrying the same call cannot succeed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoreError {
    /// No recipe is registered under the given type name.
    #[error("unknown recipe type '{name}'")]
    UnknownType {
        /// The type name that failed to resolve.
        name: String,
    },

    /// A value carries a property the recipe does not declare.
    #[error("property '{itemprop}' is not declared by recipe '{recipe}'")]
    UnknownProperty { recipe: String, itemprop: String },

    /// A non-optional property is missing from the value.
    #[error("mandatory property '{itemprop}' of recipe '{recipe}' is missing")]
    MissingMandatory { recipe: String, itemprop: String },

    /// An integer rule received a non-integer value.
    #[error("property '{itemprop}' expects an integer, got {found}")]
    IntegerCheck { itemprop: String, found: String },

    /// A number rule received NaN or an infinity.
    #[error("property '{itemprop}' must be a finite number")]
    NonFiniteNumber { itemprop: String },

    /// A restricted string did not match its rule's regular expression.
    #[error("value of property '{itemprop}' does not match /{pattern}/")]
    RegexpMismatch { itemprop: String, pattern: String },

    /// Re-registration of a recipe name with differing content.
    #[error("recipe '{name}' is already registered with different content")]
    RecipeConflict { name: String },

    /// A recipe failed structural validation at registration.
    #[error("recipe '{name}' is invalid: {reason}")]
    InvalidRecipe { name: String, reason: String },

    /// A value did not match the shape its rule requires.
    #[error("type mismatch for property '{itemprop}': {reason}")]
    ValueMismatch { itemprop: String, reason: String },

    /// A string failed the `^[0-9a-f]{64}$` hash shape check.
    #[error("'{input}' is not a 64-char lowercase hex hash")]
    BadHashString {
        /// The offending input, truncated to a reasonable length.
        input: String,
    },

    /// The parser expected a specific token at the given byte offset.
    #[error("expected '{expected}' at byte {offset}")]
    BadTag { expected: String, offset: usize },

    /// The parser expected a specific end tag at the given byte offset.
    #[error("expected end tag '{expected}' at byte {offset}")]
    BadEndTag { expected: String, offset: usize },

    /// Bytes remained after the outer end tag.
    #[error("trailing data after outer end tag at byte {offset}")]
    TrailingData { offset: usize },

    /// Embedded JSON in a stringifiable property failed to parse.
    #[error("invalid stringifiable JSON at byte {offset}")]
    BadStringifiable { offset: usize },
}

impl CoreError {
    /// Stable short code for this error, suitable for matching and logging.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::UnknownType { .. } => "UnknownType",
            CoreError::UnknownProperty { .. } => "UnknownProperty",
            CoreError::MissingMandatory { .. } => "MissingMandatory",
            CoreError::IntegerCheck { .. } => "IntegerCheck",
            CoreError::NonFiniteNumber { .. } => "NonFiniteNumber",
            CoreError::RegexpMismatch { .. } => "RegexpMismatch",
            CoreError::RecipeConflict { .. } => "RecipeConflict",
            CoreError::InvalidRecipe { .. } => "InvalidRecipe",
            CoreError::ValueMismatch { .. } => "ValueMismatch",
            CoreError::BadHashString { .. } => "BadHashString",
            CoreError::BadTag { .. } => "BadTag",
            CoreError::BadEndTag { .. } => "BadEndTag",
            CoreError::TrailingData { .. } => "TrailingData",
            CoreError::BadStringifiable { .. } => "BadStringifiable",
        }
    }

    /// The byte offset of the parse point, for parser errors.
    pub fn offset(&self) -> Option<usize> {
        match self {
            CoreError::BadTag { offset, .. }
            | CoreError::BadEndTag { offset, .. }
            | CoreError::TrailingData { offset }
            | CoreError::BadStringifiable { offset } => Some(*offset),
            _ => None,
        }
    }
}
