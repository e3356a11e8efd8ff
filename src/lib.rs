// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(warnings)]                    // All warnings are treated as errors
#![forbid(unsafe_code)]               // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![deny(dead_code)]                   // Unused code is forbidden
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![deny(unused_imports)]              // Unused imports are forbidden
#![deny(unused_variables)]            // Unused variables are forbidden
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::missing_const_for_fn)] // Force const when possible
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::module_inception)]    // Module with same name as crate warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::shadow_unrelated)]    // Shadowing unrelated variables warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # topoplan
//!
//! A deterministic infrastructure topology compiler.
//!
//! ## Overview
//!
//! topoplan turns a declarative description of networks, subnets, discovery
//! namespaces, clusters and services into a typed resource graph, validates
//! it, and plans the dependency-ordered changeset that moves the recorded
//! state to the declared one:
//!
//! - Carve subnet blocks out of network address ranges
//! - Infer dependencies from namespace-qualified names in service environments
//! - Reject overlapping blocks, host port clashes and dependency cycles
//! - Diff against the last applied snapshot and apply through a backend
//!
//! ## Architecture
//!
//! 1. **Declaration**: `topoplan.yaml`, parsed into [`config::TopologyConfig`]
//! 2. **Graph**: built and validated by [`graph::build`] and [`graph::validate`]
//! 3. **Changeset**: computed by [`planner::DiffEngine`] against the snapshot
//! 4. **Execution**: [`planner::PlanExecutor`] drives a [`backend::ProvisioningBackend`]
//! 5. **State**: the outcome is written by a [`state::StateStore`]
//!
//! ## Modules
//!
//! - [`config`]: Declaration parsing, environment overrides, hashing
//! - [`graph`]: Resource graph model, construction and validation
//! - [`planner`]: Ordering, diffing and changeset execution
//! - [`backend`]: Provisioning backend seam and retries
//! - [`state`]: Snapshot storage and locking
//! - [`reconciler`]: Whole runs (plan, apply, destroy)
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! project:
//!   name: photoview
//!   environment: dev
//!
//! networks:
//!   - name: main
//!     cidr: 10.0.0.0/21
//!     subnets:
//!       - name: Application
//!         type: private
//!         cidr_mask: 24
//!
//! clusters:
//!   - name: photos
//!     network: main
//!     capacity:
//!       instance_type: t3a.medium
//!
//! services:
//!   - name: photoview
//!     cluster: photos
//!     image: viktorstrate/photoview:1
//!     ports:
//!       - "24:24/tcp"
//!     subnets:
//!       - Application
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod backend;
pub mod cli;
pub mod config;
pub mod error;
pub mod graph;
pub mod planner;
pub mod reconciler;
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use backend::{AppliedState, ProvisioningBackend, RetryPolicy, SimulatedBackend};
pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{ConfigHasher, ConfigParser, TopologyConfig};
pub use error::{Result, TopoplanError};
pub use graph::{Graph, ResourceId, ResourceKind, build, validate};
pub use planner::{Changeset, DiffEngine, Operation, PlanExecutor, plan};
pub use reconciler::{Reconciler, RunReport};
pub use state::{LocalStateStore, StateSnapshot, StateStore};
