use tracing::debug;

use crate::compiler::Compiler;
use crate::ensemble::{EnsembleId, GateKind, GroupId, ProjectionTarget, Topology};
use crate::error::{check_len, NetError, Result};
use crate::program::Program;
use crate::unit::{Circuit, CircuitId, UnitId, Weight};

/// Position of an ensemble in a graph's canonical order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(try_from = "crate::snapshot::LayerLabel", into = "crate::snapshot::LayerLabel")
)]
pub enum LayerTag {
    Input,
    Hidden(usize),
    Output,
}

/// One input ensemble, any number of hidden ensembles, one output ensemble.
///
/// Once a graph owns the layer set it is bound to the graph's circuit, and
/// projecting onto it from any other circuit is rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layers {
    pub input: EnsembleId,
    pub hidden: Vec<EnsembleId>,
    pub output: EnsembleId,
    circuit: Option<CircuitId>,
}

impl Layers {
    pub fn new(input: EnsembleId, hidden: Vec<EnsembleId>, output: EnsembleId) -> Self {
        Self {
            input,
            hidden,
            output,
            circuit: None,
        }
    }

    /// The circuit this layer set is bound to, if any.
    pub fn circuit(&self) -> Option<CircuitId> {
        self.circuit
    }

    /// Ensembles in canonical order: input, hidden in declared order, output.
    pub fn iter(&self) -> impl Iterator<Item = (LayerTag, EnsembleId)> + '_ {
        std::iter::once((LayerTag::Input, self.input))
            .chain(
                self.hidden
                    .iter()
                    .enumerate()
                    .map(|(i, &e)| (LayerTag::Hidden(i), e)),
            )
            .chain(std::iter::once((LayerTag::Output, self.output)))
    }
}

/// A unit together with the layer it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NeuronRef {
    pub unit: UnitId,
    pub layer: LayerTag,
}

/// Compiled-program state of a graph.
#[derive(Debug, Clone)]
pub enum Optimization {
    /// Compile on the next activate or propagate.
    Pending,
    Compiled(Box<Program>),
    /// Always run the interpreted walk.
    Disabled,
}

/// Trainable network over a [`Circuit`].
///
/// While a program is live it owns the authoritative values; the circuit is
/// brought up to date by [`Graph::restore`], which every topology edit and
/// export performs first.
#[derive(Debug)]
pub struct Graph {
    circuit: Circuit,
    layers: Layers,
    optimization: Optimization,
}

impl Clone for Graph {
    fn clone(&self) -> Self {
        let circuit = self.circuit.clone();
        let mut layers = self.layers.clone();
        layers.circuit = Some(circuit.id());
        Self {
            circuit,
            layers,
            optimization: self.optimization.clone(),
        }
    }
}

impl Graph {
    pub fn new(circuit: Circuit, mut layers: Layers) -> Result<Self> {
        if let Some((_, missing)) = layers.iter().find(|&(_, e)| !circuit.contains_ensemble(e)) {
            return Err(NetError::UnknownEnsemble(missing));
        }
        layers.circuit = Some(circuit.id());
        Ok(Self {
            circuit,
            layers,
            optimization: Optimization::Pending,
        })
    }

    pub fn layers(&self) -> &Layers {
        &self.layers
    }

    /// Read access to the circuit. Values may lag behind a live program; call
    /// [`Graph::restore`] first to see them.
    pub fn circuit(&self) -> &Circuit {
        &self.circuit
    }

    /// Restores and drops the program before handing out the circuit.
    pub fn circuit_mut(&mut self) -> &mut Circuit {
        self.invalidate();
        &mut self.circuit
    }

    pub fn into_parts(mut self) -> (Circuit, Layers) {
        self.restore();
        (self.circuit, self.layers)
    }

    pub fn optimization(&self) -> &Optimization {
        &self.optimization
    }

    pub fn program(&self) -> Option<&Program> {
        match &self.optimization {
            Optimization::Compiled(p) => Some(p.as_ref()),
            _ => None,
        }
    }

    pub fn program_mut(&mut self) -> Option<&mut Program> {
        match &mut self.optimization {
            Optimization::Compiled(p) => Some(p.as_mut()),
            _ => None,
        }
    }

    pub fn is_compiled(&self) -> bool {
        matches!(self.optimization, Optimization::Compiled(_))
    }

    pub fn inputs(&self) -> usize {
        self.circuit.ensemble(self.layers.input).size()
    }

    pub fn outputs(&self) -> usize {
        self.circuit.ensemble(self.layers.output).size()
    }

    /// Units in canonical order, tagged with their layer.
    pub fn neurons(&self) -> Vec<NeuronRef> {
        self.layers
            .iter()
            .flat_map(|(layer, e)| {
                self.circuit
                    .ensemble(e)
                    .units()
                    .iter()
                    .map(move |&unit| NeuronRef { unit, layer })
            })
            .collect()
    }

    /// Feeds `input` forward and returns the output activations.
    pub fn activate(&mut self, input: &[f64]) -> Result<Vec<f64>> {
        check_len("input", self.inputs(), input.len())?;
        if let Some(program) = self.live_program() {
            return program.activate(input);
        }

        self.circuit.activate_ensemble(self.layers.input, Some(input))?;
        for &h in &self.layers.hidden {
            self.circuit.activate_ensemble(h, None)?;
        }
        self.circuit.activate_ensemble(self.layers.output, None)
    }

    /// Back-propagates `target` and applies one learning step at `rate`.
    pub fn propagate(&mut self, rate: f64, target: &[f64]) -> Result<()> {
        check_len("target", self.outputs(), target.len())?;
        if let Some(program) = self.live_program() {
            return program.propagate(rate, target);
        }

        self.circuit
            .propagate_ensemble(self.layers.output, Some(rate), Some(target))?;
        for &h in self.layers.hidden.iter().rev() {
            self.circuit.propagate_ensemble(h, Some(rate), None)?;
        }
        Ok(())
    }

    /// Projects the output ensemble onto `target`.
    pub fn project<'a>(
        &mut self,
        target: impl Into<ProjectionTarget<'a>>,
        topology: Option<Topology>,
        weight: Option<Weight>,
    ) -> Result<GroupId> {
        let to = self.circuit.resolve_target(target.into())?;
        self.invalidate();
        self.circuit
            .project_ensemble(self.layers.output, to, topology, weight)
    }

    /// Lets the output ensemble gate `group`.
    pub fn gate(&mut self, group: GroupId, kind: GateKind) -> Result<()> {
        self.invalidate();
        self.circuit.gate_ensemble(self.layers.output, group, kind)
    }

    /// Zeroes traces and error terms across the graph.
    pub fn clear(&mut self) {
        self.restore();
        for (_, e) in self.layers.iter() {
            self.circuit.clear_ensemble(e);
        }
        self.discard();
    }

    /// Clears the graph and re-draws every weight and bias.
    pub fn reset(&mut self) {
        self.restore();
        for (_, e) in self.layers.iter() {
            self.circuit.reset_ensemble(e);
        }
        self.discard();
    }

    /// Builds a fresh program, restoring the previous one first.
    pub fn compile(&mut self) {
        self.restore();
        let program = Compiler::new(&self.circuit).compile(&self.neurons());
        self.optimization = Optimization::Compiled(Box::new(program));
    }

    /// Switches between compiled and interpreted evaluation.
    pub fn set_optimize(&mut self, enabled: bool) {
        self.restore();
        self.optimization = if enabled {
            Optimization::Pending
        } else {
            Optimization::Disabled
        };
        debug!(enabled, "graph optimization toggled");
    }

    /// Copies the live program's memory back into the circuit.
    pub fn restore(&mut self) {
        if let Optimization::Compiled(program) = &self.optimization {
            program.restore_into(&mut self.circuit);
            debug!(slots = program.memory().len(), "restored program memory");
        }
    }

    /// Restores, then drops the program so the next evaluation recompiles.
    pub fn invalidate(&mut self) {
        self.restore();
        self.discard();
    }

    fn discard(&mut self) {
        if self.is_compiled() {
            self.optimization = Optimization::Pending;
            debug!("program invalidated");
        }
    }

    fn live_program(&mut self) -> Option<&mut Program> {
        if matches!(self.optimization, Optimization::Pending) {
            self.compile();
        }
        self.program_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ensemble::EnsembleOptions;
    use crate::transfer::Transfer;
    use crate::unit::CircuitConfig;

    fn layered(seed: u64, sizes: &[usize]) -> Graph {
        let mut c = Circuit::new(CircuitConfig::default().with_seed(seed));
        let ids: Vec<EnsembleId> = sizes.iter().map(|&n| c.add_ensemble(n)).collect();
        for pair in ids.windows(2) {
            c.project_ensemble(pair[0], pair[1], None, None).unwrap();
        }
        let (input, rest) = ids.split_first().unwrap();
        let (output, hidden) = rest.split_last().unwrap();
        Graph::new(c, Layers::new(*input, hidden.to_vec(), *output)).unwrap()
    }

    /// Two hidden ensembles; the second gates the first one's self links, its
    /// inputs and its outgoing links.
    fn gated_recurrent(seed: u64, transfer: Transfer) -> Graph {
        let mut c = Circuit::new(CircuitConfig::default().with_seed(seed));
        let input = c.add_ensemble(2);
        let memory = c.add_ensemble(3);
        let gates = c.add_ensemble(3);
        let output = c.add_ensemble(2);
        c.configure_ensemble(memory, EnsembleOptions::default().transfer(transfer));
        c.configure_ensemble(output, EnsembleOptions::default().transfer(Transfer::Tanh));

        let feed = c.project_ensemble(input, memory, None, None).unwrap();
        let recur = c.project_ensemble(memory, memory, None, Some(0.5)).unwrap();
        c.project_ensemble(input, gates, None, None).unwrap();
        c.project_ensemble(memory, gates, None, None).unwrap();
        let out = c.project_ensemble(memory, output, None, None).unwrap();
        c.project_ensemble(gates, output, None, None).unwrap();

        c.gate_ensemble(gates, recur, GateKind::OneToOne).unwrap();
        c.gate_ensemble(gates, feed, GateKind::Input).unwrap();
        c.gate_ensemble(gates, out, GateKind::Output).unwrap();

        Graph::new(c, Layers::new(input, vec![memory, gates], output)).unwrap()
    }

    fn assert_bit_identical(a: &Circuit, b: &Circuit) {
        let bits = |x: f64| x.to_bits();
        for (x, y) in a.units().iter().zip(b.units()) {
            assert_eq!(bits(x.activation), bits(y.activation), "unit {}", x.id);
            assert_eq!(bits(x.state), bits(y.state), "unit {}", x.id);
            assert_eq!(bits(x.old), bits(y.old), "unit {}", x.id);
            assert_eq!(bits(x.bias), bits(y.bias), "unit {}", x.id);
            assert_eq!(bits(x.derivative), bits(y.derivative), "unit {}", x.id);
            assert_eq!(bits(x.error.responsibility), bits(y.error.responsibility));
            assert_eq!(bits(x.error.projected), bits(y.error.projected));
            assert_eq!(bits(x.error.gated), bits(y.error.gated));
            for (l, e) in &x.trace.eligibility {
                assert_eq!(bits(*e), bits(y.trace.eligibility[l]), "eligibility {l}");
            }
            for (g, xtrace) in &x.trace.extended {
                for (l, v) in xtrace {
                    assert_eq!(bits(*v), bits(y.trace.extended[g][l]), "extended {g}/{l}");
                }
            }
        }
        for (x, y) in a.links().iter().zip(b.links()) {
            assert_eq!(bits(x.weight), bits(y.weight), "link {}", x.id);
            assert_eq!(bits(x.gain), bits(y.gain), "link {}", x.id);
        }
    }

    fn sigmoid(x: f64) -> f64 {
        1.0 / (1.0 + (-x).exp())
    }

    #[test]
    fn two_two_one_matches_closed_form() {
        for optimize in [false, true] {
            let mut g = layered(1, &[2, 2, 1]);
            g.set_optimize(optimize);
            let c = g.circuit_mut();
            let [i0, i1] = [0, 1];
            let [h0, h1] = [2, 3];
            let o = 4;
            let w = |c: &Circuit, a, b| c.projected_link(a, b).unwrap();
            let weights = [
                (i0, h0, 0.1),
                (i0, h1, -0.2),
                (i1, h0, 0.3),
                (i1, h1, 0.4),
                (h0, o, 0.5),
                (h1, o, -0.6),
            ];
            for (a, b, v) in weights {
                let l = w(c, a, b);
                c.link_mut(l).weight = v;
            }
            c.unit_mut(h0).bias = 0.05;
            c.unit_mut(h1).bias = -0.05;
            c.unit_mut(o).bias = 0.1;

            let out = g.activate(&[1.0, 0.0]).unwrap();
            let a0 = sigmoid(0.05 + 0.1);
            let a1 = sigmoid(-0.05 - 0.2);
            let y = sigmoid(0.1 + a0 * 0.5 + a1 * -0.6);
            assert!((out[0] - y).abs() < 1e-12);

            g.propagate(0.3, &[1.0]).unwrap();
            g.restore();
            let c = g.circuit();

            let r = 1.0 - y;
            let w_h0o = 0.5 + 0.3 * r * a0;
            let w_h1o = -0.6 + 0.3 * r * a1;
            assert!((c.link(w(c, h0, o)).weight - w_h0o).abs() < 1e-12);
            assert!((c.link(w(c, h1, o)).weight - w_h1o).abs() < 1e-12);

            // Hidden units see the already updated outgoing weights.
            let p0 = a0 * (1.0 - a0) * (r * w_h0o);
            let p1 = a1 * (1.0 - a1) * (r * w_h1o);
            assert!((c.link(w(c, i0, h0)).weight - (0.1 + 0.3 * p0)).abs() < 1e-12);
            assert!((c.link(w(c, i0, h1)).weight - (-0.2 + 0.3 * p1)).abs() < 1e-12);
            assert_eq!(c.link(w(c, i1, h0)).weight, 0.3);
            assert_eq!(c.link(w(c, i1, h1)).weight, 0.4);
        }
    }

    #[test]
    fn responsibility_invariants_hold_after_propagate() {
        let mut g = gated_recurrent(9, Transfer::Logistic);
        let target = [0.25, -0.5];
        for step in 0..4 {
            g.activate(&[1.0, step as f64 * 0.5]).unwrap();
            g.propagate(0.1, &target).unwrap();
        }
        g.restore();
        let c = g.circuit();
        for n in g.neurons() {
            let u = c.unit(n.unit);
            match n.layer {
                LayerTag::Input => {}
                LayerTag::Output => {
                    let i = n.unit - c.ensemble(g.layers().output).units()[0];
                    assert_eq!(u.error.responsibility, target[i] - u.activation);
                    assert_eq!(u.error.projected, u.error.responsibility);
                }
                LayerTag::Hidden(_) => {
                    assert_eq!(u.error.responsibility, u.error.projected + u.error.gated);
                }
            }
        }
    }

    #[test]
    fn compiled_matches_interpreted_bit_for_bit() {
        for transfer in Transfer::ALL {
            let mut interpreted = gated_recurrent(21, transfer);
            let mut compiled = gated_recurrent(21, transfer);
            interpreted.set_optimize(false);

            let inputs = [[1.0, 0.0], [0.0, 1.0], [0.5, -0.25], [-1.0, 2.0], [0.3, 0.3]];
            for (step, x) in inputs.iter().enumerate() {
                let a = interpreted.activate(x).unwrap();
                let b = compiled.activate(x).unwrap();
                let bits = |v: &[f64]| v.iter().map(|x| x.to_bits()).collect::<Vec<_>>();
                assert_eq!(bits(&a), bits(&b), "{transfer:?} step {step}");

                let target = [x[1], -x[0]];
                interpreted.propagate(0.2, &target).unwrap();
                compiled.propagate(0.2, &target).unwrap();
            }
            assert!(compiled.is_compiled());
            assert!(!interpreted.is_compiled());

            compiled.restore();
            assert_bit_identical(interpreted.circuit(), compiled.circuit());
        }
    }

    #[test]
    fn compiled_state_survives_topology_edits() {
        let mut interpreted = gated_recurrent(4, Transfer::Tanh);
        let mut compiled = gated_recurrent(4, Transfer::Tanh);
        interpreted.set_optimize(false);

        for g in [&mut interpreted, &mut compiled] {
            g.activate(&[0.2, 0.8]).unwrap();
            g.propagate(0.1, &[1.0, 0.0]).unwrap();
            let output = g.layers().output;
            g.project(output, Some(Topology::OneToOne), Some(0.1)).unwrap();
            g.activate(&[0.8, 0.2]).unwrap();
            g.propagate(0.1, &[0.0, 1.0]).unwrap();
        }
        compiled.restore();
        assert_bit_identical(interpreted.circuit(), compiled.circuit());
    }

    #[test]
    fn clear_keeps_learning_and_reset_redraws() {
        let mut g = gated_recurrent(13, Transfer::Logistic);
        for _ in 0..3 {
            g.activate(&[1.0, -1.0]).unwrap();
            g.propagate(0.3, &[0.5, 0.5]).unwrap();
        }
        g.restore();
        let weights: Vec<u64> = g.circuit().links().iter().map(|l| l.weight.to_bits()).collect();
        let biases: Vec<u64> = g.circuit().units().iter().map(|u| u.bias.to_bits()).collect();

        g.clear();
        let c = g.circuit();
        assert_eq!(weights, c.links().iter().map(|l| l.weight.to_bits()).collect::<Vec<_>>());
        assert_eq!(biases, c.units().iter().map(|u| u.bias.to_bits()).collect::<Vec<_>>());
        for u in c.units() {
            assert!(u.trace.eligibility.values().all(|&e| e == 0.0));
            assert!(u.trace.extended.values().flat_map(|x| x.values()).all(|&x| x == 0.0));
            assert_eq!(u.error.responsibility, 0.0);
            assert_eq!(u.error.projected, 0.0);
            assert_eq!(u.error.gated, 0.0);
        }

        g.reset();
        let c = g.circuit();
        let range = c.config().init_range;
        for u in c.units() {
            assert!(u.bias > -range && u.bias < range);
            assert_eq!((u.activation, u.state, u.old), (0.0, 0.0, 0.0));
            for &l in u.connections.inputs.iter().chain(&u.connections.projected) {
                let w = c.link(l).weight;
                assert!(w > -range && w < range, "link {l} weight {w}");
            }
        }
    }

    #[test]
    fn project_through_graph_is_idempotent() {
        let mut c = Circuit::new(CircuitConfig::default());
        let input = c.add_ensemble(2);
        let output = c.add_ensemble(2);
        let other = c.add_ensemble(3);
        let mut g = Graph::new(c, Layers::new(input, vec![], output)).unwrap();

        let first = g.project(other, None, None).unwrap();
        let links = g.circuit().links().len();
        let second = g.project(other, None, None).unwrap();
        assert_eq!(first, second);
        assert_eq!(g.circuit().links().len(), links);
        assert_eq!(
            g.circuit().ensemble_connection(output, other),
            Some(Topology::AllToAll)
        );
    }

    #[test]
    fn projecting_onto_unknown_ensemble_fails() {
        let mut g = layered(3, &[1, 1]);
        assert!(matches!(
            g.project(99, None, None),
            Err(NetError::InvalidProjectionTarget(_))
        ));
        assert!(matches!(
            Graph::new(Circuit::default(), Layers::new(0, vec![], 1)),
            Err(NetError::UnknownEnsemble(0))
        ));
    }

    #[test]
    fn projecting_onto_another_graph_fails() {
        let mut g1 = layered(3, &[2, 2]);
        let g2 = layered(4, &[2, 2]);
        let (i1, o1) = (g1.layers().input, g1.layers().output);
        let links = g1.circuit().links().len();

        assert!(matches!(
            g1.project(g2.layers(), None, None),
            Err(NetError::InvalidProjectionTarget(_))
        ));
        assert_eq!(g1.circuit().links().len(), links);
        assert_eq!(g1.circuit().ensemble_connection(o1, i1), None);

        let copy = g1.clone();
        assert!(g1.project(copy.layers(), None, None).is_err());

        let own = g1.layers().clone();
        g1.project(&own, None, None).unwrap();
        assert_eq!(
            g1.circuit().ensemble_connection(o1, i1),
            Some(Topology::AllToAll)
        );
    }

    #[test]
    fn size_mismatch_writes_nothing() {
        let mut g = layered(8, &[2, 3, 1]);
        g.activate(&[0.5, 0.5]).unwrap();
        let before = g.program().unwrap().memory().to_vec();

        assert!(matches!(
            g.activate(&[1.0]),
            Err(NetError::SizeMismatch { what: "input", expected: 2, got: 1 })
        ));
        assert!(matches!(
            g.propagate(0.1, &[1.0, 0.0]),
            Err(NetError::SizeMismatch { what: "target", expected: 1, got: 2 })
        ));
        assert_eq!(g.program().unwrap().memory(), before.as_slice());

        g.set_optimize(false);
        let snapshot = g.circuit().clone();
        assert!(g.activate(&[1.0, 2.0, 3.0]).is_err());
        assert_bit_identical(&snapshot, g.circuit());
    }

    #[test]
    fn empty_graph_compiles_to_noop() {
        let mut c = Circuit::default();
        let input = c.add_ensemble(0);
        let output = c.add_ensemble(0);
        let mut g = Graph::new(c, Layers::new(input, vec![], output)).unwrap();
        assert_eq!(g.activate(&[]).unwrap(), Vec::<f64>::new());
        g.propagate(0.1, &[]).unwrap();
        let p = g.program().unwrap();
        assert_eq!(p.instruction_count(), 0);
        assert_eq!(p.memory().len(), 1);
    }

    #[test]
    fn neurons_follow_canonical_order() {
        let g = layered(2, &[2, 1, 2, 1]);
        let tags: Vec<LayerTag> = g.neurons().iter().map(|n| n.layer).collect();
        assert_eq!(
            tags,
            vec![
                LayerTag::Input,
                LayerTag::Input,
                LayerTag::Hidden(0),
                LayerTag::Hidden(1),
                LayerTag::Hidden(1),
                LayerTag::Output,
            ]
        );
        assert_eq!((g.inputs(), g.outputs()), (2, 1));
    }

    #[test]
    fn optimization_state_machine() {
        let mut g = layered(6, &[1, 1]);
        assert!(matches!(g.optimization(), Optimization::Pending));
        g.activate(&[1.0]).unwrap();
        assert!(g.is_compiled());

        g.circuit_mut();
        assert!(matches!(g.optimization(), Optimization::Pending));

        g.set_optimize(false);
        g.activate(&[1.0]).unwrap();
        assert!(matches!(g.optimization(), Optimization::Disabled));

        g.compile();
        assert!(g.is_compiled());
    }

    #[test]
    fn gated_self_link_gain_tracks_gater_through_graph() {
        let mut c = Circuit::new(CircuitConfig::default().with_seed(17));
        let input = c.add_ensemble(1);
        let gater = c.add_ensemble(1);
        let cell = c.add_ensemble(1);
        c.project_ensemble(input, gater, None, None).unwrap();
        c.project_ensemble(input, cell, None, None).unwrap();
        let recur = c.project_ensemble(cell, cell, None, None).unwrap();
        c.gate_ensemble(gater, recur, GateKind::OneToOne).unwrap();
        let mut g = Graph::new(c, Layers::new(input, vec![gater], cell)).unwrap();

        for x in [0.3, -0.7, 1.1] {
            g.activate(&[x]).unwrap();
        }
        g.restore();
        let c = g.circuit();
        let a = c.ensemble(gater).units()[0];
        let b = c.ensemble(cell).units()[0];
        assert_eq!(c.link(c.unit(b).self_link).gain, c.unit(a).activation);
    }
}
