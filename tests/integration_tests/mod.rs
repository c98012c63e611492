//! Integration tests module
//!
//! End-to-end tests for the claim/lease subsystem:
//! - Claim acquisition, renewal, release and force-release
//! - Crash recovery, graceful shutdown and resume in the worker loop
//! - Checkpoint save / resume / degradation
//! - Control API routes
//! - Live backend behavior

pub mod claim_protocol;
pub mod frontier_checkpoint;
pub mod worker_flow;
