//! Integration tests for the restore files task
//!
//! These tests require a Kubernetes cluster (kind) and tell the story of the
//! cluster side of a restore task.
//!
//! # Test Organization
//!
//! - `task_resources`: Stories about the volume claims and upload pod a task
//!   creates, and about tearing them down again
//!
//! k8up itself is not required. Restore CRs are never created here, since
//! without the operator they would never complete.
//!
//! # Running These Tests
//!
//! ```bash
//! cargo test --test kind -- --ignored
//! ```

mod helpers;
mod task_resources;
