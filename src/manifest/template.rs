//! manifest::template
//!
//! Commit-message templates with a fixed set of named variables.
//!
//! Templates use `{name}`-style placeholders and are compiled eagerly at
//! configuration time, so a malformed template fails startup instead of the
//! first webhook that needs it. `{{` and `}}` render literal braces.
//!
//! # Example
//!
//! ```
//! use capstan::manifest::Template;
//!
//! let tpl = Template::compile(
//!     "[{name}] Version bumped to {tag} by {user}",
//!     &["name", "tag", "user"],
//! ).unwrap();
//! let msg = tpl.render(&[("name", "api"), ("tag", "2.0"), ("user", "ci")]);
//! assert_eq!(msg, "[api] Version bumped to 2.0 by ci");
//! ```

use thiserror::Error;

/// Errors from template compilation.
#[derive(Debug, Error)]
pub enum TemplateError {
    /// A placeholder references a variable outside the allowed set.
    #[error("unknown template variable: {{{0}}}")]
    UnknownVariable(String),

    /// A `{` was opened but never closed.
    #[error("unclosed placeholder starting at byte {0}")]
    UnclosedPlaceholder(usize),

    /// A `}` appeared without a matching `{`.
    #[error("unmatched '}}' at byte {0}")]
    UnmatchedBrace(usize),
}

#[derive(Debug, Clone)]
enum Segment {
    Literal(String),
    Variable(String),
}

/// A compiled message template.
///
/// Compilation validates the placeholder syntax and the variable names, so
/// rendering is infallible.
#[derive(Debug, Clone)]
pub struct Template {
    segments: Vec<Segment>,
}

impl Template {
    /// Compile a template, allowing only the given variable names.
    pub fn compile(source: &str, variables: &[&str]) -> Result<Self, TemplateError> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = source.char_indices().peekable();

        while let Some((pos, ch)) = chars.next() {
            match ch {
                '{' => {
                    if matches!(chars.peek(), Some((_, '{'))) {
                        chars.next();
                        literal.push('{');
                        continue;
                    }
                    let mut name = String::new();
                    let mut closed = false;
                    for (_, inner) in chars.by_ref() {
                        if inner == '}' {
                            closed = true;
                            break;
                        }
                        name.push(inner);
                    }
                    if !closed {
                        return Err(TemplateError::UnclosedPlaceholder(pos));
                    }
                    let name = name.trim().to_string();
                    if !variables.contains(&name.as_str()) {
                        return Err(TemplateError::UnknownVariable(name));
                    }
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Variable(name));
                }
                '}' => {
                    if matches!(chars.peek(), Some((_, '}'))) {
                        chars.next();
                        literal.push('}');
                    } else {
                        return Err(TemplateError::UnmatchedBrace(pos));
                    }
                }
                other => literal.push(other),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self { segments })
    }

    /// Render the template with the given variable values.
    ///
    /// Variables compiled into the template but absent from `values` render
    /// as empty strings; compile-time validation makes that unreachable when
    /// callers pass the same variable set they compiled with.
    pub fn render(&self, values: &[(&str, &str)]) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Variable(name) => {
                    if let Some((_, value)) = values.iter().find(|(k, _)| k == name) {
                        out.push_str(value);
                    }
                }
            }
        }
        out
    }
}
