use crate::ensemble::{EnsembleId, GateRecord, GroupId, Topology};
use crate::graph::{Graph, LayerTag};

/// A read-only picture of a graph's ensemble-level wiring.
///
/// Design intent:
/// - Observers cannot mutate or steer the graph.
/// - Snapshotting is *on-demand* and can allocate; evaluation stays unchanged.
/// - Rendering (dot, json, ...) is left to the consumer.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphView {
    pub ensembles: Vec<EnsembleView>,
    pub diagnostics: Diagnostics,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnsembleView {
    pub id: EnsembleId,
    pub layer: LayerTag,
    pub size: usize,
    pub self_connected: bool,
    pub connected_to: Vec<ProjectionView>,
}

/// One outgoing link group and the ensembles gating it.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectionView {
    pub group: GroupId,
    pub target: EnsembleId,
    pub topology: Topology,
    pub size: usize,
    pub gated_from: Vec<GateRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Diagnostics {
    pub units: usize,
    pub links: usize,
    pub gated_links: usize,
    /// Memory slots of the live program, if one is compiled.
    pub compiled_slots: Option<usize>,
}

pub struct GraphAdapter<'a> {
    graph: &'a Graph,
}

impl<'a> GraphAdapter<'a> {
    pub fn new(graph: &'a Graph) -> Self {
        Self { graph }
    }

    pub fn snapshot(&self) -> GraphView {
        let c = self.graph.circuit();
        let ensembles = self
            .graph
            .layers()
            .iter()
            .map(|(layer, id)| {
                let ensemble = c.ensemble(id);
                EnsembleView {
                    id,
                    layer,
                    size: ensemble.size(),
                    self_connected: ensemble.size() > 0 && c.is_ensemble_self_connected(id),
                    connected_to: ensemble
                        .connected_to()
                        .iter()
                        .map(|&g| {
                            let group = c.group(g);
                            ProjectionView {
                                group: g,
                                target: group.to,
                                topology: group.topology,
                                size: group.size(),
                                gated_from: group.gated_from.clone(),
                            }
                        })
                        .collect(),
                }
            })
            .collect();

        GraphView {
            ensembles,
            diagnostics: self.diagnostics(),
        }
    }

    pub fn diagnostics(&self) -> Diagnostics {
        let units = self.graph.neurons().len();
        let c = self.graph.circuit();
        Diagnostics {
            units,
            links: c
                .links()
                .iter()
                .filter(|l| l.from != l.to || l.weight != 0.0)
                .count(),
            gated_links: c.gated_link_count(),
            compiled_slots: self.graph.program().map(|p| p.memory().len()),
        }
    }
}
