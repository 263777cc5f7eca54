//! Error taxonomy for the symbol graph and reconstruction engine.
//!
//! Mirrors the shape of `ms-codeview`'s `ParserError`: small, enumerable,
//! manually implementing `Display`/`Error` rather than pulling in a derive
//! crate, with a `tracing` call at the point each variant is constructed so
//! a debugger breakpoint (or a log filter) can catch the failure at its
//! source rather than at whatever call site eventually prints it.

use std::fmt;

/// Everything that can go wrong while resolving or reconstructing a symbol
/// graph. CLI-level and driver-level errors (`InvalidParameters`,
/// `FileNotFound`) live in their respective crates; this enum only carries
/// the two variants the core itself can raise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// A Symbol reference does not resolve within the graph.
    SymbolNotFound {
        /// The dangling reference, formatted for display (the raw index).
        id: u32,
    },
    /// A tagged-union payload did not match its kind tag, or one of the
    /// data-model invariants in the symbol graph was violated.
    ConsistencyViolation {
        /// Human-readable detail identifying which invariant broke.
        detail: String,
    },
}

impl CoreError {
    pub(crate) fn symbol_not_found(id: u32) -> Self {
        tracing::error!(id, "symbol not found");
        CoreError::SymbolNotFound { id }
    }

    pub(crate) fn consistency_violation(detail: impl Into<String>) -> Self {
        let detail = detail.into();
        tracing::error!(%detail, "consistency violation");
        CoreError::ConsistencyViolation { detail }
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreError::SymbolNotFound { id } => {
                write!(f, "symbol {id} referenced but not present in the graph")
            }
            CoreError::ConsistencyViolation { detail } => {
                write!(f, "consistency violation: {detail}")
            }
        }
    }
}

impl std::error::Error for CoreError {}

/// Result alias used throughout the crate.
pub type CoreResult<T> = Result<T, CoreError>;
