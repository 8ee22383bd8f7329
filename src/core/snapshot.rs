use std::collections::BTreeMap;

use hashbrown::HashMap;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, warn};

use crate::error::{NetError, Result};
use crate::graph::{Graph, LayerTag, Layers};
use crate::transfer::Transfer;
use crate::unit::{Circuit, CircuitConfig, UnitId};

/// Wire form of a [`LayerTag`]: `"input"`, `"output"` or a hidden index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LayerLabel {
    Hidden(usize),
    Named(String),
}

impl From<LayerTag> for LayerLabel {
    fn from(tag: LayerTag) -> Self {
        match tag {
            LayerTag::Input => LayerLabel::Named("input".to_owned()),
            LayerTag::Hidden(i) => LayerLabel::Hidden(i),
            LayerTag::Output => LayerLabel::Named("output".to_owned()),
        }
    }
}

impl TryFrom<LayerLabel> for LayerTag {
    type Error = String;

    fn try_from(label: LayerLabel) -> core::result::Result<Self, String> {
        match label {
            LayerLabel::Hidden(i) => Ok(LayerTag::Hidden(i)),
            LayerLabel::Named(name) => match name.as_str() {
                "input" => Ok(LayerTag::Input),
                "output" => Ok(LayerTag::Output),
                other => Err(format!("unknown layer label {other:?}")),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeuronRecord {
    pub state: f64,
    pub old: f64,
    pub activation: f64,
    pub bias: f64,
    pub layer: LayerTag,
    /// Required; `null` or an unknown name reads as LOGISTIC.
    #[serde(alias = "squash", deserialize_with = "transfer_or_default")]
    pub transfer: Transfer,
}

/// Indices refer to positions in [`GraphSnapshot::neurons`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionRecord {
    pub from: usize,
    pub to: usize,
    pub weight: f64,
    /// Last gain driven by the gater; documents without it read as 1.
    #[serde(default = "neutral_gain")]
    pub gain: f64,
    #[serde(default)]
    pub gater: Option<usize>,
}

fn neutral_gain() -> f64 {
    1.0
}

/// Continuous state and topology of a graph in canonical unit order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub neurons: Vec<NeuronRecord>,
    pub connections: Vec<ConnectionRecord>,
}

fn transfer_or_default<'de, D: Deserializer<'de>>(d: D) -> core::result::Result<Transfer, D::Error> {
    let Some(name) = Option::<String>::deserialize(d)? else {
        warn!("transfer function is null, using LOGISTIC");
        return Ok(Transfer::default());
    };
    Ok(Transfer::from_name(&name).unwrap_or_else(|| {
        warn!(name = %name, "unknown transfer function, using LOGISTIC");
        Transfer::default()
    }))
}

impl Graph {
    /// Restores, then captures every unit and every live link.
    ///
    /// Links are listed in creation order. Self links appear only when they
    /// carry weight or a gater.
    pub fn to_snapshot(&mut self) -> GraphSnapshot {
        self.restore();
        let neurons = self.neurons();
        let c = self.circuit();

        let index: HashMap<UnitId, usize> =
            neurons.iter().enumerate().map(|(i, n)| (n.unit, i)).collect();

        let records = neurons
            .iter()
            .map(|n| {
                let u = c.unit(n.unit);
                NeuronRecord {
                    state: u.state,
                    old: u.old,
                    activation: u.activation,
                    bias: u.bias,
                    layer: n.layer,
                    transfer: u.transfer,
                }
            })
            .collect();

        let mut connections = Vec::new();
        for link in c.links() {
            let (Some(&from), Some(&to)) = (index.get(&link.from), index.get(&link.to)) else {
                continue;
            };
            if link.from == link.to && link.weight == 0.0 && link.gater.is_none() {
                continue;
            }
            let gater = match link.gater {
                Some(g) => {
                    let local = index.get(&g).copied();
                    if local.is_none() {
                        warn!(link = link.id, gater = g, "gater outside the graph is not exported");
                    }
                    local
                }
                None => None,
            };
            connections.push(ConnectionRecord {
                from,
                to,
                weight: link.weight,
                gain: link.gain,
                gater,
            });
        }

        GraphSnapshot {
            neurons: records,
            connections,
        }
    }

    /// Rebuilds a graph in a fresh circuit configured by `cfg`.
    pub fn from_snapshot(snapshot: &GraphSnapshot, cfg: CircuitConfig) -> Result<Graph> {
        let n = snapshot.neurons.len();
        for (i, conn) in snapshot.connections.iter().enumerate() {
            let endpoints_ok = conn.from < n && conn.to < n;
            if !endpoints_ok || conn.gater.is_some_and(|g| g >= n) {
                return Err(NetError::Snapshot(format!(
                    "connection {i} refers to a neuron outside 0..{n}"
                )));
            }
        }

        let mut circuit = Circuit::new(cfg);
        let mut ids = Vec::with_capacity(n);
        let mut input = Vec::new();
        let mut hidden: BTreeMap<usize, Vec<UnitId>> = BTreeMap::new();
        let mut output = Vec::new();

        for record in &snapshot.neurons {
            let id = circuit.add_unit();
            let unit = circuit.unit_mut(id);
            unit.state = record.state;
            unit.old = record.old;
            unit.activation = record.activation;
            unit.bias = record.bias;
            unit.transfer = record.transfer;
            match record.layer {
                LayerTag::Input => input.push(id),
                LayerTag::Hidden(i) => hidden.entry(i).or_default().push(id),
                LayerTag::Output => output.push(id),
            }
            ids.push(id);
        }

        let input = circuit.ensemble_from_units(input);
        let hidden: Vec<_> = hidden
            .into_values()
            .map(|units| circuit.ensemble_from_units(units))
            .collect();
        let output = circuit.ensemble_from_units(output);

        for conn in &snapshot.connections {
            let link = circuit.project(ids[conn.from], ids[conn.to], Some(conn.weight));
            if let Some(g) = conn.gater {
                circuit.gate(ids[g], link);
            }
            circuit.link_mut(link).gain = conn.gain;
        }

        debug!(
            neurons = n,
            connections = snapshot.connections.len(),
            hidden = hidden.len(),
            "imported graph snapshot"
        );
        Graph::new(circuit, Layers::new(input, hidden, output))
    }

    pub fn to_json(&mut self) -> Result<String> {
        Ok(serde_json::to_string(&self.to_snapshot())?)
    }

    pub fn from_json(json: &str, cfg: CircuitConfig) -> Result<Graph> {
        let snapshot: GraphSnapshot = serde_json::from_str(json)?;
        Graph::from_snapshot(&snapshot, cfg)
    }

    /// Independent copy built through a snapshot round trip.
    pub fn duplicate(&mut self) -> Result<Graph> {
        let cfg = *self.circuit().config();
        Graph::from_snapshot(&self.to_snapshot(), cfg)
    }
}
