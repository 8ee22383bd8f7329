//! # gatenet
//!
//! Gated recurrent networks trained online with eligibility traces.
//!
//! Units keep a primary eligibility trace per incoming link and an extended
//! trace per unit they gate, so a network can learn through multiplicative
//! gating without unrolling time. A graph can run interpreted over its
//! object arena or through a compiled flat-memory program; both paths give
//! bit-identical results.
//!
//! ## Quick Start
//!
//! ```
//! use gatenet::prelude::*;
//!
//! let mut circuit = Circuit::new(CircuitConfig::default().with_seed(7));
//! let input = circuit.add_ensemble(2);
//! let hidden = circuit.add_ensemble(3);
//! let output = circuit.add_ensemble(1);
//! circuit.project_ensemble(input, hidden, None, None)?;
//! circuit.project_ensemble(hidden, output, None, None)?;
//!
//! let mut graph = Graph::new(circuit, Layers::new(input, vec![hidden], output))?;
//! let y = graph.activate(&[1.0, 0.0])?;
//! graph.propagate(0.3, &[1.0])?;
//! assert_eq!(y.len(), 1);
//! # Ok::<(), gatenet::error::NetError>(())
//! ```
//!
//! ## Feature Flags
//!
//! - `serde` (default): JSON state import/export and serde derives
//!
//! ## Modules
//!
//! - [`unit`]: units, links and the RTRL equations
//! - [`ensemble`]: ensembles, link groups, projections and gating
//! - [`graph`]: layered graphs with lazy compilation
//! - [`compiler`] / [`program`]: the flat-memory backend
//! - [`observer`]: read-only views for rendering collaborators

#[path = "core/error.rs"]
pub mod error;

#[path = "core/prng.rs"]
pub mod prng;

#[path = "core/transfer.rs"]
pub mod transfer;

#[path = "core/unit.rs"]
pub mod unit;

#[path = "core/ensemble.rs"]
pub mod ensemble;

#[path = "core/graph.rs"]
pub mod graph;

#[path = "core/program.rs"]
pub mod program;

#[path = "core/compiler.rs"]
pub mod compiler;

#[path = "core/storage.rs"]
pub mod storage;

#[path = "core/cost.rs"]
pub mod cost;

#[cfg(feature = "serde")]
#[path = "core/snapshot.rs"]
pub mod snapshot;

pub mod observer;

/// Prelude module for convenient imports.
///
/// ```
/// use gatenet::prelude::*;
/// ```
pub mod prelude {
    pub use crate::ensemble::{
        Ensemble, EnsembleId, EnsembleOptions, GateKind, GateRecord, GroupId, LinkGroup,
        ProjectionTarget, Topology,
    };
    pub use crate::error::{NetError, Result};
    pub use crate::graph::{Graph, LayerTag, Layers, NeuronRef, Optimization};
    pub use crate::program::{Instr, Program, Symbol};
    pub use crate::transfer::Transfer;
    pub use crate::unit::{Circuit, CircuitConfig, CircuitId, Link, LinkId, Unit, UnitId, Weight};

    #[cfg(feature = "serde")]
    pub use crate::snapshot::GraphSnapshot;
}
