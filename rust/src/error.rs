// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The error taxonomy surfaced by manifest generation.
//!
//! Everything in this crate returns [`anyhow::Result`]; when a failure has a
//! meaningful kind, the root cause is one of the variants below, so callers
//! can use [`ImageError::kind_of`] (or `anyhow::Error::downcast_ref`) to
//! classify it even after context has been attached.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImageError {
    /// Parse errors and malformed customizations.
    #[error("{0}")]
    InvalidBlueprint(String),
    /// A path or customization that the policy for this image type forbids.
    #[error("{0}")]
    PolicyViolation(String),
    /// The requested disk layout cannot be realised.
    #[error("{0}")]
    LayoutError(String),
    /// A distro, architecture or image type that is not registered.
    #[error("{0}")]
    UnknownEntity(String),
    #[error("{0}")]
    UnsupportedForImageType(String),
    /// Something the assembler needs was not supplied by the caller.
    #[error("{0}")]
    MissingDependency(String),
    #[error("duplicate distro: {0}")]
    DuplicateDistro(String),
    /// An invariant of this crate was broken.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ImageError {
    /// Find the typed error at the root of an error chain, if any.
    pub fn kind_of(err: &anyhow::Error) -> Option<&ImageError> {
        err.chain().find_map(|e| e.downcast_ref::<ImageError>())
    }
}

macro_rules! ctor {
    ($fn:ident, $variant:ident) => {
        pub(crate) fn $fn(msg: impl Into<String>) -> anyhow::Error {
            ImageError::$variant(msg.into()).into()
        }
    };
}

ctor!(invalid_blueprint, InvalidBlueprint);
ctor!(policy_violation, PolicyViolation);
ctor!(layout_error, LayoutError);
ctor!(unknown_entity, UnknownEntity);
ctor!(unsupported, UnsupportedForImageType);
ctor!(missing_dependency, MissingDependency);
ctor!(internal, Internal);
