//! manifest
//!
//! The tag-update engine: pure text transformation over kustomization
//! manifests. No I/O happens in this module; callers hand in the raw
//! manifest text and get back either a rewritten text or a typed failure.
//!
//! # Design
//!
//! The raw text is authoritative. A secondary structured parse of the
//! `images:` list exists only to learn which image names are declared; the
//! output is always produced by splicing new tag values into the original
//! text, so every byte outside the replaced spans survives untouched -
//! whitespace, key ordering, and comments included.
//!
//! # Modules
//!
//! - [`glob`] - anchored `fnmatch`-style image name matching
//! - [`template`] - compiled commit-message templates
//! - [`update`] - image-list parsing and index-splice tag rewriting

pub mod glob;
pub mod template;
pub mod update;

pub use template::Template;
pub use update::{apply_tag, splice_tag, ManifestUpdate};

use thiserror::Error;

/// Errors from manifest processing.
///
/// [`UpdateError::MissingImages`] and [`UpdateError::DuplicateImage`] are
/// configuration-versus-manifest conflicts: the whole operation fails rather
/// than committing a partial update.
#[derive(Debug, Error)]
pub enum UpdateError {
    /// The manifest could not be parsed far enough to list declared images.
    #[error("failed to decode manifest: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// A required (non-glob) pattern matched no declared image.
    #[error("manifest does not contain image(s): {}", .0.join(", "))]
    MissingImages(Vec<String>),

    /// No declaration block was found for a declared image name.
    ///
    /// The image appeared in the structured parse but the literal text
    /// search could not locate its block, which means the manifest uses a
    /// layout the engine does not understand.
    #[error("could not find image definition for {0}")]
    DefinitionNotFound(String),

    /// More than one declaration block exists for the same image name.
    #[error("found more than one image definition for {0}")]
    DuplicateImage(String),
}
