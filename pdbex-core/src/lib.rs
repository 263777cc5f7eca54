//! Symbol graph, traversal, and header reconstruction engine.
//!
//! This crate has no I/O of its own: a driver populates a [`graph::SymbolGraph`]
//! (see that module's population contract), and [`pipeline::reconstruct`]
//! turns the populated graph into C-style header text.

pub mod builder;
pub mod error;
pub mod graph;
pub mod pipeline;
pub mod reconstruct;
pub mod sorter;
pub mod traversal;
pub mod visitor;

pub use error::{CoreError, CoreResult};
pub use pipeline::{reconstruct, Reconstruction};
