//! manifest::update
//!
//! Image-list parsing and index-splice tag rewriting.
//!
//! # Algorithm
//!
//! 1. Decode the manifest just far enough to list declared `(name, newTag)`
//!    pairs. The decoded form is never reserialized.
//! 2. Partition configured patterns into required (exact names) and optional
//!    (globs). Every required name must be declared or the operation fails.
//! 3. For each declared image matching a pattern, locate its declaration
//!    block in the raw text and replace only the `newTag` value span.
//! 4. A byte-identical result is reported as [`ManifestUpdate::Unchanged`],
//!    which is an outcome, not an error.

use regex::Regex;
use serde::Deserialize;

use super::glob::matches_any;
use super::UpdateError;

/// Outcome of applying a tag to a manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestUpdate {
    /// At least one tag value changed; contains the full rewritten text.
    Updated(String),
    /// Every matched image already carried the requested tag.
    Unchanged,
}

/// Structured view of a kustomization file, used only to learn which image
/// names are declared. Unknown fields are ignored.
#[derive(Debug, Deserialize)]
struct Kustomization {
    #[serde(default)]
    images: Vec<DeclaredImage>,
}

#[derive(Debug, Deserialize)]
struct DeclaredImage {
    name: String,
}

/// Replace the `newTag` value of one image's declaration block.
///
/// Pure text surgery: the block is located with a multiline regex anchored
/// on the literal `- name:` line, the tag must appear on a later line of the
/// same block, and only the tag value's character span is replaced. Finding
/// two blocks for the same name is a configuration conflict and fails the
/// whole operation.
///
/// Returns the (possibly identical) text and whether any bytes changed.
pub fn splice_tag(
    text: &str,
    image_name: &str,
    new_tag: &str,
) -> Result<(String, bool), UpdateError> {
    let quoted = regex::escape(image_name);
    let pattern = format!(
        r#"(?ms)^\s*-\s+name:\s+["']?{quoted}["']?$.+?^\s+newTag:\s+["']?([^"'$]+?)["']?$"#
    );
    // Escaped name plus fixed scaffolding; cannot fail to compile.
    let re = Regex::new(&pattern).expect("block pattern is statically valid");

    // We only want one match, but look for two so duplicates are detected.
    let mut spans = re
        .captures_iter(text)
        .take(2)
        .map(|caps| caps.get(1).expect("group 1 always participates").range());
    let span = match spans.next() {
        None => return Err(UpdateError::DefinitionNotFound(image_name.to_string())),
        Some(span) => span,
    };
    if spans.next().is_some() {
        return Err(UpdateError::DuplicateImage(image_name.to_string()));
    }

    if &text[span.clone()] == new_tag {
        return Ok((text.to_string(), false));
    }
    let mut out = String::with_capacity(text.len() + new_tag.len());
    out.push_str(&text[..span.start]);
    out.push_str(new_tag);
    out.push_str(&text[span.end..]);
    Ok((out, true))
}

/// Apply a new tag to every declared image matching the configured patterns.
///
/// `patterns` keeps the deployment's configured order: entries without `*`
/// are required and must each be declared in the manifest; glob entries are
/// optional and may match nothing.
pub fn apply_tag(
    text: &str,
    patterns: &[String],
    new_tag: &str,
) -> Result<ManifestUpdate, UpdateError> {
    let kustomization: Kustomization = serde_yaml::from_str(text)?;

    let mut required: Vec<&String> = patterns.iter().filter(|p| !p.contains('*')).collect();

    let mut current = text.to_string();
    let mut changed = false;
    for image in &kustomization.images {
        if !matches_any(patterns, &image.name) {
            continue;
        }
        required.retain(|p| *p != &image.name);
        let (next, image_changed) = splice_tag(&current, &image.name, new_tag)?;
        changed |= image_changed;
        current = next;
    }

    if !required.is_empty() {
        return Err(UpdateError::MissingImages(
            required.into_iter().cloned().collect(),
        ));
    }
    if !changed {
        return Ok(ManifestUpdate::Unchanged);
    }
    Ok(ManifestUpdate::Updated(current))
}
