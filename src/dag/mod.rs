//! Dependency graph construction and execution planning.
//!
//! ## Architecture
//!
//! 1. **Builder** - Constructs a graph from parsed components, rejecting bad references
//! 2. **Validator** - Detects cycles and computes execution levels
//!
//! ## Example
//!
//! ```
//! use anvil::dag;
//!
//! let spec = r#"
//! components:
//!   - { id: A, file: a.rs }
//!   - { id: B, file: b.rs, depends_on: [A] }
//!   - { id: C, file: c.rs, depends_on: [A] }
//!   - { id: D, file: d.rs, depends_on: [B, C] }
//! "#;
//!
//! let (_graph, plan) = dag::plan(spec).unwrap();
//! assert_eq!(plan.levels(), &[vec!["A"], vec!["B", "C"], vec!["D"]]);
//! ```

mod builder;
mod validator;

pub use builder::{ComponentIndex, DependencyGraph, GraphBuilder};
pub use validator::{ExecutionPlan, GraphValidator};

use crate::component::SpecDocument;
use crate::errors::{OrchestratorError, ParseError};

/// Parse spec text into a dependency graph.
///
/// Pure: either the whole graph is produced or a `ParseError` is returned.
pub fn parse(spec_text: &str) -> Result<DependencyGraph, ParseError> {
    let document = SpecDocument::parse(spec_text)?;
    GraphBuilder::from_document(document).build()
}

/// Parse and validate in one step.
pub fn plan(spec_text: &str) -> Result<(DependencyGraph, ExecutionPlan), OrchestratorError> {
    let graph = parse(spec_text)?;
    let plan = GraphValidator::validate(&graph)?;
    Ok((graph, plan))
}
