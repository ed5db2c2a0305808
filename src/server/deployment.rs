//! server::deployment
//!
//! Runtime deployment definitions and the update-and-commit operation.
//!
//! A [`Deployment`] is built once at startup from its config block and is
//! immutable afterwards; template compilation happens here, so a malformed
//! commit message aborts startup instead of the first request.

use thiserror::Error;

use crate::config::schema::{DEFAULT_COMMIT_MESSAGE, DEFAULT_MANIFEST_PATH};
use crate::config::{ConfigError, DeploymentConfig};
use crate::manifest::update::ManifestUpdate;
use crate::manifest::{apply_tag, Template, UpdateError};
use crate::repo::{RepoError, RepoSession};

/// Variables available to commit-message templates.
pub const TEMPLATE_VARIABLES: &[&str] = &["name", "tag", "user"];

/// Errors from applying a deployment update to a session.
#[derive(Debug, Error)]
pub enum ApplyError {
    #[error(transparent)]
    Update(#[from] UpdateError),

    #[error(transparent)]
    Repo(#[from] RepoError),
}

/// Outcome of one update-and-commit operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The manifest changed; a commit with this id now exists.
    Updated { commit: String },
    /// Every matched image already carried the requested tag.
    Unchanged,
}

/// One logical deployment, immutable after construction.
#[derive(Debug, Clone)]
pub struct Deployment {
    pub name: String,
    pub repository: String,
    pub manifest_path: String,
    pub images: Vec<String>,
    pub argocd_app: Option<String>,
    template: Template,
}

impl Deployment {
    /// Build a deployment from configuration, compiling its template.
    pub fn new(config: DeploymentConfig) -> Result<Self, ConfigError> {
        let message = config
            .message
            .as_deref()
            .unwrap_or(DEFAULT_COMMIT_MESSAGE);
        let template = Template::compile(message, TEMPLATE_VARIABLES).map_err(|err| {
            ConfigError::InvalidValue(format!(
                "deployment '{}': bad commit message template: {err}",
                config.name
            ))
        })?;
        Ok(Self {
            name: config.name,
            repository: config.repository,
            manifest_path: config
                .path
                .unwrap_or_else(|| DEFAULT_MANIFEST_PATH.to_string()),
            images: config.images,
            argocd_app: config.argocd_app,
            template,
        })
    }

    /// Rewrite the manifest in `session`'s worktree and commit the result.
    ///
    /// Reads the manifest, applies the tag to every configured image
    /// pattern, and, when any byte changed, writes the text back, stages
    /// it, and commits with the rendered message. An unchanged manifest is
    /// a distinct outcome, not an error, and leaves no commit behind.
    pub fn apply(
        &self,
        session: &RepoSession,
        tag: &str,
        user: &str,
    ) -> Result<ApplyOutcome, ApplyError> {
        let text = session.read_manifest(&self.manifest_path)?;
        match apply_tag(&text, &self.images, tag)? {
            ManifestUpdate::Unchanged => Ok(ApplyOutcome::Unchanged),
            ManifestUpdate::Updated(updated) => {
                session.write_manifest(&self.manifest_path, &updated)?;
                let message = self.template.render(&[
                    ("name", self.name.as_str()),
                    ("tag", tag),
                    ("user", user),
                ]);
                let commit = session.commit(&self.manifest_path, &message)?;
                Ok(ApplyOutcome::Updated { commit })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> DeploymentConfig {
        DeploymentConfig {
            name: "api".to_string(),
            repository: "infra".to_string(),
            path: None,
            images: vec!["api".to_string()],
            message: None,
            argocd_app: None,
        }
    }

    #[test]
    fn defaults_are_applied() {
        let deployment = Deployment::new(config()).unwrap();
        assert_eq!(deployment.manifest_path, "kustomization.yaml");
    }

    #[test]
    fn default_template_renders() {
        let deployment = Deployment::new(config()).unwrap();
        let message = deployment.template.render(&[
            ("name", "api"),
            ("tag", "2.0"),
            ("user", "ci"),
        ]);
        assert_eq!(message, "[api] Version bumped to 2.0 by ci");
    }

    #[test]
    fn malformed_template_fails_construction() {
        let mut cfg = config();
        cfg.message = Some("{nope}".to_string());
        let err = Deployment::new(cfg).unwrap_err();
        assert!(err.to_string().contains("deployment 'api'"));
    }
}
