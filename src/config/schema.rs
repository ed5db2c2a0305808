//! config::schema
//!
//! Configuration schema types.
//!
//! # Validation
//!
//! Config values are validated after parsing: every deployment must
//! reference a configured repository, image lists must be non-empty, and
//! commit-message templates must compile. Validation happens before the
//! server binds, so a bad config never serves a request.

use serde::Deserialize;

use super::ConfigError;

/// Default manifest path inside a repository checkout.
pub const DEFAULT_MANIFEST_PATH: &str = "kustomization.yaml";

/// Default commit message template.
pub const DEFAULT_COMMIT_MESSAGE: &str = "[{name}] Version bumped to {tag} by {user}";

fn default_listen_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_branch() -> String {
    "main".to_string()
}

/// Top-level configuration file.
///
/// # Example
///
/// ```toml
/// listen_address = "0.0.0.0:8080"
/// secret_key = "env:CAPSTAN_SECRET_KEY"
/// allowed_ips = ["10.0.0.0/8", "192.168.1.7"]
/// argocd_url = "https://argocd.internal"
/// argocd_token = "env:ARGOCD_TOKEN"
///
/// [[repository]]
/// name = "infra"
/// url = "https://git.example.com/team/infra.git"
/// username = "deploy-bot"
/// password = "env:GIT_PASSWORD"
/// committer_name = "Capstan"
/// committer_email = "capstan@example.com"
///
/// [[deployment]]
/// name = "api"
/// repository = "infra"
/// images = ["api", "api-*"]
/// argocd_app = "api"
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Address the HTTP server binds to.
    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    /// Log filter override (e.g. "debug" or "capstan=trace").
    pub log_level: Option<String>,

    /// CIDRs (or bare IPs) allowed to reach the server. Empty = no filter.
    pub allowed_ips: Vec<String>,

    /// Shared secret compared against the `X-Key` request header.
    pub secret_key: Option<String>,

    /// Argo CD server base URL. Sync is disabled when unset.
    pub argocd_url: Option<String>,

    /// Argo CD API token.
    pub argocd_token: Option<String>,

    /// Configured repositories.
    #[serde(rename = "repository")]
    pub repositories: Vec<RepositoryConfig>,

    /// Configured deployments.
    #[serde(rename = "deployment")]
    pub deployments: Vec<DeploymentConfig>,
}

/// One remote git repository.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RepositoryConfig {
    /// Unique name referenced by deployments.
    pub name: String,

    /// Clone/push URL (HTTP(S) basic auth).
    pub url: String,

    /// Branch to clone and push.
    #[serde(default = "default_branch")]
    pub branch: String,

    /// Basic-auth username.
    pub username: String,

    /// Basic-auth password or token. Supports `env:VAR` indirection.
    pub password: String,

    /// Committer identity written into each commit.
    pub committer_name: String,
    pub committer_email: String,
}

/// One logical deployment.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeploymentConfig {
    /// Unique name addressed by webhook calls.
    pub name: String,

    /// Name of the repository holding the manifest.
    pub repository: String,

    /// Manifest path inside the checkout.
    #[serde(default)]
    pub path: Option<String>,

    /// Image patterns to update. Exact names are required matches; entries
    /// containing `*` are optional globs.
    pub images: Vec<String>,

    /// Commit message template with `{name}`, `{tag}`, `{user}` variables.
    #[serde(default)]
    pub message: Option<String>,

    /// Argo CD application to synchronize after a push.
    #[serde(default)]
    pub argocd_app: Option<String>,
}

impl Config {
    /// Validate cross-cutting constraints the schema cannot express.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` for duplicate names, empty image
    /// lists, or a deployment referencing an unknown repository. Template
    /// compilation is validated separately when deployments are built.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut repo_names = Vec::with_capacity(self.repositories.len());
        for repo in &self.repositories {
            if repo_names.contains(&repo.name.as_str()) {
                return Err(ConfigError::InvalidValue(format!(
                    "duplicate repository name '{}'",
                    repo.name
                )));
            }
            repo_names.push(repo.name.as_str());
        }

        let mut deploy_names = Vec::with_capacity(self.deployments.len());
        for deploy in &self.deployments {
            if deploy_names.contains(&deploy.name.as_str()) {
                return Err(ConfigError::InvalidValue(format!(
                    "duplicate deployment name '{}'",
                    deploy.name
                )));
            }
            deploy_names.push(deploy.name.as_str());

            if !repo_names.contains(&deploy.repository.as_str()) {
                return Err(ConfigError::InvalidValue(format!(
                    "deployment '{}' references unknown repository '{}'",
                    deploy.name, deploy.repository
                )));
            }
            if deploy.images.is_empty() {
                return Err(ConfigError::InvalidValue(format!(
                    "deployment '{}' has no image patterns",
                    deploy.name
                )));
            }
        }

        if self.argocd_url.is_some() != self.argocd_token.is_some() {
            return Err(ConfigError::InvalidValue(
                "argocd_url and argocd_token must be set together".to_string(),
            ));
        }

        Ok(())
    }
}
