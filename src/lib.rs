//! Restore files task - restores files from a k8up backup and uploads them to a
//! Lagoon task
//!
//! The `restore` command provisions a volume claim, has k8up restore the
//! selected paths of a snapshot into it, then runs the upload phase. The
//! `upload` command archives the restored files and attaches the archive to
//! the Lagoon task. In production `restore` bootstraps a pod that runs
//! `upload`, since only that pod can mount the restored claim.
//!
//! # Modules
//!
//! - [`config`] - Command line and layered environment configuration
//! - [`task`] - Task identity and derived resource names
//! - [`client`] - Kubernetes operations behind a mockable trait
//! - [`provision`] - Volume claims
//! - [`restore`] - k8up Restore creation and status classification
//! - [`watch`] - Waiting for terminal conditions
//! - [`cleanup`] - Best-effort resource teardown
//! - [`archive`] - tar.gz archiving
//! - [`lagoon`] - Token retrieval and file upload
//! - [`upload`] - Upload phase runners and the pod bootstrap
//! - [`orchestrator`] - The restore workflow
//! - [`commands`] - Top-level commands

#![deny(missing_docs)]

pub mod archive;
pub mod cleanup;
pub mod client;
pub mod commands;
pub mod config;
pub mod lagoon;
pub mod orchestrator;
pub mod provision;
pub mod restore;
pub mod task;
pub mod upload;
pub mod watch;

pub use restore_task_common::Error;
