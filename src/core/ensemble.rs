#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{check_len, NetError, Result};
use crate::graph::Layers;
use crate::transfer::Transfer;
use crate::unit::{Circuit, LinkId, UnitId, Weight};

pub type EnsembleId = usize;
pub type GroupId = usize;

/// Wiring pattern of one ensemble-to-ensemble projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Topology {
    AllToAll,
    OneToOne,
    /// All-to-all without the diagonal (no unit projects onto itself).
    AllToElse,
}

/// Which side of a link group a gating ensemble controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum GateKind {
    /// Gater unit i gates the group's links entering target unit i.
    Input,
    /// Gater unit i gates the group's links leaving source unit i.
    Output,
    /// Gater unit i gates the group's i-th link.
    OneToOne,
}

/// Fixed-size ordered group of units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ensemble {
    pub(crate) units: Vec<UnitId>,
    pub(crate) connected_to: Vec<GroupId>,
}

impl Ensemble {
    pub fn size(&self) -> usize {
        self.units.len()
    }

    pub fn units(&self) -> &[UnitId] {
        &self.units
    }

    /// Link groups projected out of this ensemble, in creation order.
    pub fn connected_to(&self) -> &[GroupId] {
        &self.connected_to
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateRecord {
    pub gater: EnsembleId,
    pub kind: GateKind,
}

/// Links created by one ensemble projection.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkGroup {
    pub id: GroupId,
    pub from: EnsembleId,
    pub to: EnsembleId,
    pub topology: Topology,
    pub links: Vec<LinkId>,
    pub gated_from: Vec<GateRecord>,
}

impl LinkGroup {
    pub fn size(&self) -> usize {
        self.links.len()
    }

    pub fn is_self_projection(&self) -> bool {
        self.from == self.to
    }
}

/// Where an ensemble projection lands.
#[derive(Debug, Clone, Copy)]
pub enum ProjectionTarget<'a> {
    Ensemble(EnsembleId),
    /// Another layer set; its input ensemble receives the links.
    Layers(&'a Layers),
}

impl From<EnsembleId> for ProjectionTarget<'_> {
    fn from(id: EnsembleId) -> Self {
        ProjectionTarget::Ensemble(id)
    }
}

impl<'a> From<&'a Layers> for ProjectionTarget<'a> {
    fn from(layers: &'a Layers) -> Self {
        ProjectionTarget::Layers(layers)
    }
}

/// Bulk settings applied by [`Circuit::configure_ensemble`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EnsembleOptions {
    pub transfer: Option<Transfer>,
    pub bias: Option<f64>,
}

impl EnsembleOptions {
    pub fn transfer(mut self, transfer: Transfer) -> Self {
        self.transfer = Some(transfer);
        self
    }

    pub fn bias(mut self, bias: f64) -> Self {
        self.bias = Some(bias);
        self
    }
}

impl Circuit {
    pub fn ensembles(&self) -> &[Ensemble] {
        &self.ensembles
    }

    pub fn groups(&self) -> &[LinkGroup] {
        &self.groups
    }

    pub fn ensemble(&self, id: EnsembleId) -> &Ensemble {
        &self.ensembles[id]
    }

    pub fn group(&self, id: GroupId) -> &LinkGroup {
        &self.groups[id]
    }

    pub fn contains_ensemble(&self, id: EnsembleId) -> bool {
        id < self.ensembles.len()
    }

    /// Creates an ensemble of `size` fresh units.
    pub fn add_ensemble(&mut self, size: usize) -> EnsembleId {
        let units = (0..size).map(|_| self.add_unit()).collect();
        self.ensemble_from_units(units)
    }

    /// Wraps existing units into a new ensemble.
    pub fn ensemble_from_units(&mut self, units: Vec<UnitId>) -> EnsembleId {
        let id = self.ensembles.len();
        self.ensembles.push(Ensemble {
            units,
            connected_to: Vec::new(),
        });
        id
    }

    pub fn configure_ensemble(&mut self, id: EnsembleId, options: EnsembleOptions) {
        for &u in &self.ensembles[id].units {
            let unit = &mut self.units[u];
            if let Some(t) = options.transfer {
                unit.transfer = t;
            }
            if let Some(b) = options.bias {
                unit.bias = b;
            }
        }
    }

    /// Activates every unit in order; `inputs` makes the ensemble a source.
    pub fn activate_ensemble(&mut self, id: EnsembleId, inputs: Option<&[f64]>) -> Result<Vec<f64>> {
        let size = self.ensembles[id].size();
        if let Some(xs) = inputs {
            check_len("input", size, xs.len())?;
        }
        let mut activations = Vec::with_capacity(size);
        for i in 0..size {
            let u = self.ensembles[id].units[i];
            activations.push(self.activate_unit(u, inputs.map(|xs| xs[i])));
        }
        Ok(activations)
    }

    /// Propagates error through every unit in reverse order.
    pub fn propagate_ensemble(
        &mut self,
        id: EnsembleId,
        rate: Option<f64>,
        targets: Option<&[f64]>,
    ) -> Result<()> {
        let size = self.ensembles[id].size();
        if let Some(ts) = targets {
            check_len("target", size, ts.len())?;
        }
        for i in (0..size).rev() {
            let u = self.ensembles[id].units[i];
            self.propagate_unit(u, rate, targets.map(|ts| ts[i]));
        }
        Ok(())
    }

    pub fn clear_ensemble(&mut self, id: EnsembleId) {
        for i in 0..self.ensembles[id].size() {
            let u = self.ensembles[id].units[i];
            self.clear_unit(u);
        }
    }

    pub fn reset_ensemble(&mut self, id: EnsembleId) {
        for i in 0..self.ensembles[id].size() {
            let u = self.ensembles[id].units[i];
            self.reset_unit(u);
        }
    }

    pub fn is_ensemble_self_connected(&self, id: EnsembleId) -> bool {
        self.ensembles[id]
            .units
            .iter()
            .all(|&u| self.is_self_connected(u))
    }

    /// Classifies how `from` is already wired to `to`.
    pub fn ensemble_connection(&self, from: EnsembleId, to: EnsembleId) -> Option<Topology> {
        let here = &self.ensembles[from].units;
        let there = &self.ensembles[to].units;

        let all = here
            .iter()
            .flat_map(|&a| there.iter().map(move |&b| (a, b)))
            .filter(|&(a, b)| self.projected_link(a, b).is_some())
            .count();
        if all == here.len() * there.len() {
            return Some(Topology::AllToAll);
        }

        if here.len() == there.len() {
            let pairs = here
                .iter()
                .zip(there)
                .filter(|&(&a, &b)| self.projected_link(a, b).is_some())
                .count();
            if pairs == here.len() {
                return Some(Topology::OneToOne);
            }
        }
        None
    }

    pub(crate) fn resolve_target(&self, target: ProjectionTarget<'_>) -> Result<EnsembleId> {
        let id = match target {
            ProjectionTarget::Ensemble(id) => id,
            ProjectionTarget::Layers(layers) => {
                if layers.circuit().is_some_and(|owner| owner != self.id()) {
                    return Err(NetError::InvalidProjectionTarget(
                        "layer set belongs to another circuit".to_owned(),
                    ));
                }
                layers.input
            }
        };
        if !self.contains_ensemble(id) {
            return Err(NetError::InvalidProjectionTarget(format!(
                "ensemble {id} does not belong to this circuit"
            )));
        }
        Ok(id)
    }

    /// Projects `from` onto `target`.
    ///
    /// Returns the existing group when the pair is already fully connected, so
    /// projecting twice never duplicates links.
    pub fn project_ensemble<'a>(
        &mut self,
        from: EnsembleId,
        target: impl Into<ProjectionTarget<'a>>,
        topology: Option<Topology>,
        weight: Option<Weight>,
    ) -> Result<GroupId> {
        if !self.contains_ensemble(from) {
            return Err(NetError::InvalidProjectionTarget(format!(
                "source ensemble {from} does not belong to this circuit"
            )));
        }
        let to = self.resolve_target(target.into())?;
        let topology = topology.unwrap_or(if from == to {
            Topology::OneToOne
        } else {
            Topology::AllToAll
        });
        if topology == Topology::OneToOne && self.ensembles[from].size() != self.ensembles[to].size() {
            return Err(NetError::SizeMismatch {
                what: "one-to-one projection target",
                expected: self.ensembles[from].size(),
                got: self.ensembles[to].size(),
            });
        }

        if let Some(existing) = self
            .groups
            .iter()
            .find(|g| g.from == from && g.to == to && g.topology == topology)
        {
            return Ok(existing.id);
        }
        let covered = matches!(
            (self.ensemble_connection(from, to), topology),
            (Some(Topology::AllToAll), _) | (Some(Topology::OneToOne), Topology::OneToOne)
        );
        if covered {
            if let Some(existing) = self.groups.iter().find(|g| g.from == from && g.to == to) {
                return Ok(existing.id);
            }
        }

        let here = self.ensembles[from].units.clone();
        let there = self.ensembles[to].units.clone();
        let mut links = Vec::new();
        match topology {
            Topology::AllToAll | Topology::AllToElse => {
                for &a in &here {
                    for &b in &there {
                        if topology == Topology::AllToElse && a == b {
                            continue;
                        }
                        links.push(self.project(a, b, weight));
                    }
                }
            }
            Topology::OneToOne => {
                for (&a, &b) in here.iter().zip(&there) {
                    links.push(self.project(a, b, weight));
                }
            }
        }

        let id = self.groups.len();
        self.groups.push(LinkGroup {
            id,
            from,
            to,
            topology,
            links,
            gated_from: Vec::new(),
        });
        self.ensembles[from].connected_to.push(id);
        Ok(id)
    }

    /// Lets the units of `gater` drive the gains of `group`'s links.
    pub fn gate_ensemble(&mut self, gater: EnsembleId, group: GroupId, kind: GateKind) -> Result<()> {
        if !self.contains_ensemble(gater) {
            return Err(NetError::InvalidGate(format!("unknown gater ensemble {gater}")));
        }
        let Some(g) = self.groups.get(group) else {
            return Err(NetError::InvalidGate(format!("unknown link group {group}")));
        };
        let gaters = self.ensembles[gater].units.clone();

        let mut plan: Vec<(UnitId, LinkId)> = Vec::new();
        match kind {
            GateKind::Input | GateKind::Output => {
                let side = if kind == GateKind::Input { g.to } else { g.from };
                let side_units = &self.ensembles[side].units;
                if side_units.len() != gaters.len() {
                    return Err(NetError::InvalidGate(format!(
                        "gater has {} units but the gated side has {}",
                        gaters.len(),
                        side_units.len()
                    )));
                }
                for (&unit, &gater_unit) in side_units.iter().zip(&gaters) {
                    for &l in &g.links {
                        let link = &self.links[l];
                        let endpoint = if kind == GateKind::Input { link.to } else { link.from };
                        if endpoint == unit {
                            plan.push((gater_unit, l));
                        }
                    }
                }
            }
            GateKind::OneToOne => {
                if g.links.len() != gaters.len() {
                    return Err(NetError::InvalidGate(format!(
                        "gater has {} units but the group has {} links",
                        gaters.len(),
                        g.links.len()
                    )));
                }
                plan.extend(gaters.iter().copied().zip(g.links.iter().copied()));
            }
        }

        for (gater_unit, l) in plan {
            self.gate(gater_unit, l);
        }
        self.groups[group].gated_from.push(GateRecord { gater, kind });
        Ok(())
    }
}
