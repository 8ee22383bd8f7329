use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::ensemble::{Ensemble, LinkGroup};
use crate::error::{NetError, Result};
use crate::prng::Prng;
use crate::transfer::Transfer;

pub type UnitId = usize;
pub type LinkId = usize;

/// Type alias for learned link weights.
pub type Weight = f64;

/// Identity of one circuit, distinct for every circuit built or cloned in
/// this process. Layer sets carry it so they cannot be resolved against a
/// circuit they do not belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CircuitId(u64);

impl CircuitId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        CircuitId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Arena configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CircuitConfig {
    /// Seed for weight/bias initialization and for `reset`.
    pub seed: u64,

    /// Initial weights and biases are drawn from (-init_range, init_range).
    pub init_range: f64,

    /// Learning rate used by `propagate_unit` when the caller gives none.
    pub default_rate: f64,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            seed: 1,
            init_range: 0.1,
            default_rate: 0.1,
        }
    }
}

impl CircuitConfig {
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_init_range(mut self, init_range: f64) -> Self {
        self.init_range = init_range;
        self
    }

    pub fn with_default_rate(mut self, rate: f64) -> Self {
        self.default_rate = rate;
        self
    }

    pub fn validate(&self) -> core::result::Result<(), &'static str> {
        if !(self.init_range.is_finite() && self.init_range >= 0.0) {
            return Err("init_range must be finite and non-negative");
        }
        if !self.default_rate.is_finite() {
            return Err("default_rate must be finite");
        }
        Ok(())
    }
}

/// A weighted, optionally gated edge. Endpoints are arena ids; the gater does
/// not own the link.
#[derive(Debug, Clone, PartialEq)]
pub struct Link {
    pub id: LinkId,
    pub from: UnitId,
    pub to: UnitId,
    pub weight: Weight,
    pub gain: f64,
    pub gater: Option<UnitId>,
}

impl Link {
    pub fn new(id: LinkId, from: Option<UnitId>, to: Option<UnitId>, weight: Weight) -> Result<Self> {
        match (from, to) {
            (Some(from), Some(to)) => Ok(Self {
                id,
                from,
                to,
                weight,
                gain: 1.0,
                gater: None,
            }),
            _ => Err(NetError::InvalidConnection { from, to }),
        }
    }

    pub fn is_gated(&self) -> bool {
        self.gater.is_some()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ErrorTerms {
    pub responsibility: f64,
    pub projected: f64,
    pub gated: f64,
}

/// Trace memory of a unit.
///
/// All maps are keyed by arena ids, so iteration follows creation order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Traces {
    /// incoming link -> eligibility
    pub eligibility: BTreeMap<LinkId, f64>,
    /// gated unit -> incoming link -> extended eligibility
    pub extended: BTreeMap<UnitId, BTreeMap<LinkId, f64>>,
    /// gated unit -> links into it that this unit gates (self links excluded)
    pub influences: BTreeMap<UnitId, BTreeSet<LinkId>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Connections {
    pub inputs: BTreeSet<LinkId>,
    pub projected: BTreeSet<LinkId>,
    pub gated: BTreeSet<LinkId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Unit {
    pub id: UnitId,
    pub activation: f64,
    pub state: f64,
    pub old: f64,
    pub bias: f64,
    pub derivative: f64,
    pub transfer: Transfer,
    pub error: ErrorTerms,
    pub trace: Traces,
    pub connections: Connections,
    pub self_link: LinkId,
}

/// How two units relate, seen from the first one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    SelfLink,
    Incoming,
    Outgoing,
    Gated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connection {
    pub role: Role,
    pub link: LinkId,
}

/// Arena owning every unit, link, ensemble and link group of a network.
#[derive(Debug)]
pub struct Circuit {
    id: CircuitId,
    cfg: CircuitConfig,
    pub(crate) units: Vec<Unit>,
    pub(crate) links: Vec<Link>,
    pub(crate) ensembles: Vec<Ensemble>,
    pub(crate) groups: Vec<LinkGroup>,
    pub(crate) rng: Prng,
}

/// A clone is a separate arena and gets its own identity.
impl Clone for Circuit {
    fn clone(&self) -> Self {
        Self {
            id: CircuitId::next(),
            cfg: self.cfg,
            units: self.units.clone(),
            links: self.links.clone(),
            ensembles: self.ensembles.clone(),
            groups: self.groups.clone(),
            rng: self.rng.clone(),
        }
    }
}

impl Default for Circuit {
    fn default() -> Self {
        Self::new(CircuitConfig::default())
    }
}

impl Circuit {
    pub fn new(cfg: CircuitConfig) -> Self {
        Self {
            id: CircuitId::next(),
            rng: Prng::new(cfg.seed),
            cfg,
            units: Vec::new(),
            links: Vec::new(),
            ensembles: Vec::new(),
            groups: Vec::new(),
        }
    }

    pub fn id(&self) -> CircuitId {
        self.id
    }

    pub fn config(&self) -> &CircuitConfig {
        &self.cfg
    }

    pub fn units(&self) -> &[Unit] {
        &self.units
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }

    pub fn unit(&self, id: UnitId) -> &Unit {
        &self.units[id]
    }

    pub fn unit_mut(&mut self, id: UnitId) -> &mut Unit {
        &mut self.units[id]
    }

    pub fn link(&self, id: LinkId) -> &Link {
        &self.links[id]
    }

    pub fn link_mut(&mut self, id: LinkId) -> &mut Link {
        &mut self.links[id]
    }

    pub fn contains_unit(&self, id: UnitId) -> bool {
        id < self.units.len()
    }

    /// Creates a unit with a random bias and an unconnected self link.
    pub fn add_unit(&mut self) -> UnitId {
        let id = self.units.len();
        let self_link = self.links.len();
        self.links.push(Link {
            id: self_link,
            from: id,
            to: id,
            weight: 0.0,
            gain: 1.0,
            gater: None,
        });
        let bias = self.rng.symmetric(self.cfg.init_range);
        self.units.push(Unit {
            id,
            activation: 0.0,
            state: 0.0,
            old: 0.0,
            bias,
            derivative: 0.0,
            transfer: Transfer::default(),
            error: ErrorTerms::default(),
            trace: Traces::default(),
            connections: Connections::default(),
            self_link,
        });
        id
    }

    pub fn is_self_connected(&self, id: UnitId) -> bool {
        self.links[self.units[id].self_link].weight != 0.0
    }

    /// The link `from -> to` created by `project`, if any.
    pub fn projected_link(&self, from: UnitId, to: UnitId) -> Option<LinkId> {
        if from == to {
            return self.is_self_connected(from).then(|| self.units[from].self_link);
        }
        self.units[from]
            .connections
            .projected
            .iter()
            .copied()
            .find(|&l| self.links[l].to == to)
    }

    /// Links `from` to `to`. Both endpoints must be given.
    pub fn connect(
        &mut self,
        from: Option<UnitId>,
        to: Option<UnitId>,
        weight: Option<Weight>,
    ) -> Result<LinkId> {
        let known = |id: Option<UnitId>| id.filter(|&u| u < self.units.len());
        let (Some(from), Some(to)) = (known(from), known(to)) else {
            return Err(NetError::InvalidConnection { from, to });
        };
        Ok(self.project(from, to, weight))
    }

    /// Projects `from` onto `to`.
    ///
    /// Projecting a unit onto itself enables its self link (weight 1, or the
    /// given weight). An existing link is reused and only its weight updated.
    pub fn project(&mut self, from: UnitId, to: UnitId, weight: Option<Weight>) -> LinkId {
        if from == to {
            let l = self.units[from].self_link;
            self.links[l].weight = weight.unwrap_or(1.0);
            return l;
        }

        if let Some(existing) = self.projected_link(from, to) {
            if let Some(w) = weight {
                self.links[existing].weight = w;
            }
            return existing;
        }

        let weight = match weight {
            Some(w) => w,
            None => self.rng.symmetric(self.cfg.init_range),
        };
        let id = self.links.len();
        self.links.push(Link {
            id,
            from,
            to,
            weight,
            gain: 1.0,
            gater: None,
        });

        self.units[from].connections.projected.insert(id);
        let target = &mut self.units[to];
        target.connections.inputs.insert(id);
        target.trace.eligibility.insert(id, 0.0);
        for xtrace in target.trace.extended.values_mut() {
            xtrace.insert(id, 0.0);
        }
        id
    }

    /// Lets `gater` drive the gain of `link`.
    pub fn gate(&mut self, gater: UnitId, link: LinkId) {
        if let Some(previous) = self.links[link].gater {
            if previous == gater {
                return;
            }
            self.ungate(previous, link);
        }

        let gated_unit = self.links[link].to;
        let is_self = self.units[gated_unit].self_link == link;
        let unit = &mut self.units[gater];
        unit.connections.gated.insert(link);
        if !unit.trace.extended.contains_key(&gated_unit) {
            let xtrace = unit.trace.eligibility.keys().map(|&l| (l, 0.0)).collect();
            unit.trace.extended.insert(gated_unit, xtrace);
        }
        let influences = unit.trace.influences.entry(gated_unit).or_default();
        if !is_self {
            influences.insert(link);
        }
        self.links[link].gater = Some(gater);
    }

    fn ungate(&mut self, gater: UnitId, link: LinkId) {
        let gated_unit = self.links[link].to;
        self.links[link].gater = None;
        let still_gates_self = self.links[self.units[gated_unit].self_link].gater == Some(gater);
        let unit = &mut self.units[gater];
        unit.connections.gated.remove(&link);
        let now_empty = match unit.trace.influences.get_mut(&gated_unit) {
            Some(set) => {
                set.remove(&link);
                set.is_empty()
            }
            None => true,
        };
        if now_empty && !still_gates_self {
            unit.trace.influences.remove(&gated_unit);
            unit.trace.extended.remove(&gated_unit);
        }
    }

    /// Reports how `a` is linked to `b`, if at all.
    pub fn connected(&self, a: UnitId, b: UnitId) -> Option<Connection> {
        if a == b {
            return self.is_self_connected(a).then(|| Connection {
                role: Role::SelfLink,
                link: self.units[a].self_link,
            });
        }
        let conns = &self.units[a].connections;
        let touches = |l: LinkId| self.links[l].from == b || self.links[l].to == b;
        [
            (Role::Incoming, &conns.inputs),
            (Role::Outgoing, &conns.projected),
            (Role::Gated, &conns.gated),
        ]
        .into_iter()
        .find_map(|(role, set)| {
            set.iter()
                .copied()
                .find(|&l| touches(l))
                .map(|link| Connection { role, link })
        })
    }

    /// Influence of `gater` on `gated`: the gated unit's previous state when
    /// its self link is gated by `gater`, plus every gated input's weighted
    /// activation.
    #[inline]
    fn influence(&self, gater: UnitId, gated: UnitId) -> f64 {
        let g = &self.units[gated];
        let mut influence = if self.links[g.self_link].gater == Some(gater) {
            g.old
        } else {
            0.0
        };
        if let Some(links) = self.units[gater].trace.influences.get(&gated) {
            for &l in links {
                let link = &self.links[l];
                influence += link.weight * self.units[link.from].activation;
            }
        }
        influence
    }

    #[inline]
    fn recurrence(&self, unit: UnitId) -> f64 {
        let s = &self.links[self.units[unit].self_link];
        s.gain * s.weight
    }

    /// Activates one unit. With `input` the unit acts as a source.
    pub fn activate_unit(&mut self, id: UnitId, input: Option<f64>) -> f64 {
        if let Some(x) = input {
            let unit = &mut self.units[id];
            unit.activation = x;
            unit.derivative = 0.0;
            unit.bias = 0.0;
            return x;
        }

        let old = self.units[id].state;
        self.units[id].old = old;

        let self_link = &self.links[self.units[id].self_link];
        let unit = &self.units[id];
        let mut state = self_link.gain * self_link.weight * old + unit.bias;
        for &l in &unit.connections.inputs {
            let link = &self.links[l];
            state += self.units[link.from].activation * link.weight * link.gain;
        }
        let (activation, derivative) = unit.transfer.eval(state);

        let unit = &mut self.units[id];
        unit.state = state;
        unit.activation = activation;
        unit.derivative = derivative;

        let unit = &self.units[id];
        let influences: Vec<(UnitId, f64, f64)> = unit
            .trace
            .extended
            .keys()
            .map(|&g| (g, self.influence(id, g), self.recurrence(g)))
            .collect();

        let self_link = &self.links[unit.self_link];
        let mut eligibility = Vec::with_capacity(unit.connections.inputs.len());
        let mut extended = Vec::with_capacity(unit.connections.inputs.len() * influences.len());
        for &l in &unit.connections.inputs {
            let link = &self.links[l];
            let e = self_link.gain * self_link.weight * unit.trace.eligibility[&l]
                + link.gain * self.units[link.from].activation;
            eligibility.push((l, e));
            for &(g, influence, g_recurrence) in &influences {
                let x = unit.trace.extended[&g][&l];
                extended.push((g, l, g_recurrence * x + derivative * e * influence));
            }
        }

        let unit = &mut self.units[id];
        for (l, e) in eligibility {
            unit.trace.eligibility.insert(l, e);
        }
        for (g, l, x) in extended {
            if let Some(xtrace) = unit.trace.extended.get_mut(&g) {
                xtrace.insert(l, x);
            }
        }

        for &l in &self.units[id].connections.gated {
            self.links[l].gain = activation;
        }
        activation
    }

    /// Back-propagates error into one unit and adjusts its incoming weights
    /// and bias. `target` marks an output unit.
    pub fn propagate_unit(&mut self, id: UnitId, rate: Option<f64>, target: Option<f64>) {
        let rate = rate.unwrap_or(self.cfg.default_rate);

        if let Some(t) = target {
            let unit = &mut self.units[id];
            let e = t - unit.activation;
            unit.error.responsibility = e;
            unit.error.projected = e;
        } else {
            let unit = &self.units[id];
            let mut error = 0.0;
            for &l in &unit.connections.projected {
                let link = &self.links[l];
                error += self.units[link.to].error.responsibility * link.gain * link.weight;
            }
            let projected = unit.derivative * error;

            let mut error = 0.0;
            for &g in unit.trace.extended.keys() {
                error += self.units[g].error.responsibility * self.influence(id, g);
            }
            let gated = unit.derivative * error;

            let unit = &mut self.units[id];
            unit.error.projected = projected;
            unit.error.gated = gated;
            unit.error.responsibility = projected + gated;
        }

        let unit = &self.units[id];
        let mut updates = Vec::with_capacity(unit.connections.inputs.len());
        for &l in &unit.connections.inputs {
            let mut gradient = unit.error.projected * unit.trace.eligibility[&l];
            for (&g, xtrace) in &unit.trace.extended {
                gradient += self.units[g].error.responsibility * xtrace[&l];
            }
            updates.push((l, gradient));
        }
        for (l, gradient) in updates {
            self.links[l].weight += rate * gradient;
        }

        let unit = &mut self.units[id];
        unit.bias += rate * unit.error.responsibility;
    }

    /// Forgets short-term context: traces and error terms go to zero, weights
    /// and bias stay.
    pub fn clear_unit(&mut self, id: UnitId) {
        let unit = &mut self.units[id];
        unit.trace.eligibility.values_mut().for_each(|e| *e = 0.0);
        for xtrace in unit.trace.extended.values_mut() {
            xtrace.values_mut().for_each(|x| *x = 0.0);
        }
        unit.error = ErrorTerms::default();
    }

    /// Clears the unit, then re-draws its incident weights and bias.
    pub fn reset_unit(&mut self, id: UnitId) {
        self.clear_unit(id);

        let range = self.cfg.init_range;
        let conns = &self.units[id].connections;
        // Gated self links keep their weight; it is the recurrence switch.
        let incident: BTreeSet<LinkId> = conns
            .inputs
            .iter()
            .chain(&conns.projected)
            .chain(&conns.gated)
            .copied()
            .filter(|&l| self.units[self.links[l].to].self_link != l)
            .collect();
        for l in incident {
            self.links[l].weight = self.rng.symmetric(range);
        }

        let bias = self.rng.symmetric(range);
        let unit = &mut self.units[id];
        unit.bias = bias;
        unit.old = 0.0;
        unit.state = 0.0;
        unit.activation = 0.0;
    }

    pub fn gated_link_count(&self) -> usize {
        self.links.iter().filter(|l| l.is_gated()).count()
    }
}
