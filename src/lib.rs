//! Capstan - a webhook server that bumps image tags in GitOps manifests
//!
//! Capstan is a single-binary service sitting between a CI pipeline and a
//! GitOps repository: an authenticated HTTP call names a deployment and a new
//! image tag, and Capstan rewrites the matching image reference in the
//! repository's kustomization file, commits, pushes, and optionally nudges
//! Argo CD to synchronize once the new revision is visible.
//!
//! # Architecture
//!
//! The codebase follows a strict layered architecture:
//!
//! - [`cli`] - Command-line interface layer (parses args and env overrides)
//! - [`config`] - Configuration schema, loading, and startup validation
//! - [`manifest`] - Pure tag-update engine (glob matching, text surgery,
//!   commit-message templates); no I/O
//! - [`repo`] - Single interface for all Git operations, one ephemeral
//!   session per request
//! - [`server`] - HTTP surface: webhook dispatcher, gating middleware,
//!   Prometheus metrics
//! - [`sync`] - Argo CD client with bounded-retry state machine
//!
//! # Correctness Invariants
//!
//! Capstan maintains the following invariants:
//!
//! 1. A repository is mutated by at most one request at a time
//! 2. A request produces exactly one commit, or none and a reported outcome
//! 3. Manifest rewrites touch only the bytes of the replaced tag values
//! 4. Repository sessions are discarded on every exit path

pub mod cli;
pub mod config;
pub mod manifest;
pub mod repo;
pub mod server;
pub mod sync;
