//! Lowers a graph into a [`Program`].
//!
//! Every statement mirrors one step of [`Circuit::activate_unit`] or
//! [`Circuit::propagate_unit`] with the same operand order, so compiled and
//! interpreted runs produce identical floating point results.

use tracing::debug;

use crate::graph::{LayerTag, NeuronRef};
use crate::program::{
    Instr, LayerCode, LinkAttr, Program, Scratch, Slot, Symbol, SymbolTable, UnitAttr, UnitCode,
};
use crate::unit::{Circuit, LinkId, UnitId};

impl Circuit {
    /// Current value of the object field behind `symbol`.
    pub(crate) fn load(&self, symbol: Symbol) -> f64 {
        match symbol {
            Symbol::Rate => self.config().default_rate,
            Symbol::Target(_) | Symbol::Influence { .. } | Symbol::Scratch(_) => 0.0,
            Symbol::Unit(u, attr) => {
                let unit = &self.units[u];
                match attr {
                    UnitAttr::Activation => unit.activation,
                    UnitAttr::State => unit.state,
                    UnitAttr::Old => unit.old,
                    UnitAttr::Bias => unit.bias,
                    UnitAttr::Derivative => unit.derivative,
                    UnitAttr::Responsibility => unit.error.responsibility,
                    UnitAttr::Projected => unit.error.projected,
                    UnitAttr::Gated => unit.error.gated,
                }
            }
            Symbol::Link(l, LinkAttr::Weight) => self.links[l].weight,
            Symbol::Link(l, LinkAttr::Gain) => self.links[l].gain,
            Symbol::Eligibility { unit, link } => self.units[unit]
                .trace
                .eligibility
                .get(&link)
                .copied()
                .unwrap_or(0.0),
            Symbol::Extended { unit, gated, link } => self.units[unit]
                .trace
                .extended
                .get(&gated)
                .and_then(|x| x.get(&link))
                .copied()
                .unwrap_or(0.0),
        }
    }

    /// Writes `value` back into the object field behind `symbol`. Program
    /// temporaries have no field and are skipped.
    pub(crate) fn store(&mut self, symbol: Symbol, value: f64) {
        match symbol {
            Symbol::Rate | Symbol::Target(_) | Symbol::Influence { .. } | Symbol::Scratch(_) => {}
            Symbol::Unit(u, attr) => {
                let unit = &mut self.units[u];
                let field = match attr {
                    UnitAttr::Activation => &mut unit.activation,
                    UnitAttr::State => &mut unit.state,
                    UnitAttr::Old => &mut unit.old,
                    UnitAttr::Bias => &mut unit.bias,
                    UnitAttr::Derivative => &mut unit.derivative,
                    UnitAttr::Responsibility => &mut unit.error.responsibility,
                    UnitAttr::Projected => &mut unit.error.projected,
                    UnitAttr::Gated => &mut unit.error.gated,
                };
                *field = value;
            }
            Symbol::Link(l, LinkAttr::Weight) => self.links[l].weight = value,
            Symbol::Link(l, LinkAttr::Gain) => self.links[l].gain = value,
            Symbol::Eligibility { unit, link } => {
                if let Some(e) = self.units[unit].trace.eligibility.get_mut(&link) {
                    *e = value;
                }
            }
            Symbol::Extended { unit, gated, link } => {
                if let Some(x) = self.units[unit]
                    .trace
                    .extended
                    .get_mut(&gated)
                    .and_then(|x| x.get_mut(&link))
                {
                    *x = value;
                }
            }
        }
    }
}

pub struct Compiler<'c> {
    circuit: &'c Circuit,
    symbols: SymbolTable,
    memory: Vec<f64>,
}

impl<'c> Compiler<'c> {
    pub fn new(circuit: &'c Circuit) -> Self {
        Self {
            circuit,
            symbols: SymbolTable::default(),
            memory: Vec::new(),
        }
    }

    /// Compiles `neurons`, which must be in input, hidden, output order.
    pub fn compile(mut self, neurons: &[NeuronRef]) -> Program {
        let rate = self.slot(Symbol::Rate);

        let mut layers: Vec<LayerCode> = Vec::new();
        let mut inputs = Vec::new();
        let mut outputs = Vec::new();
        let mut targets = Vec::new();

        for n in neurons {
            let code = match n.layer {
                LayerTag::Input => {
                    inputs.push(self.slot(Symbol::Unit(n.unit, UnitAttr::Activation)));
                    self.input_code(n.unit)
                }
                LayerTag::Hidden(_) => self.unit_code(n.unit, None),
                LayerTag::Output => {
                    let target = self.slot(Symbol::Target(targets.len()));
                    targets.push(target);
                    outputs.push(self.slot(Symbol::Unit(n.unit, UnitAttr::Activation)));
                    self.unit_code(n.unit, Some(target))
                }
            };
            match layers.last_mut() {
                Some(layer) if layer.tag == n.layer => layer.units.push(code),
                _ => layers.push(LayerCode {
                    tag: n.layer,
                    units: vec![code],
                }),
            }
        }

        let activate: Vec<Instr> = layers
            .iter()
            .flat_map(|layer| &layer.units)
            .flat_map(|u| u.activation.iter().chain(&u.trace))
            .cloned()
            .collect();
        let propagate: Vec<Instr> = layers
            .iter()
            .rev()
            .flat_map(|layer| layer.units.iter().rev())
            .flat_map(|u| u.propagation.iter())
            .cloned()
            .collect();

        debug!(
            units = neurons.len(),
            slots = self.memory.len(),
            activate = activate.len(),
            propagate = propagate.len(),
            "compiled graph"
        );

        Program {
            memory: self.memory,
            symbols: self.symbols,
            layers,
            activate,
            propagate,
            inputs,
            outputs,
            targets,
            rate,
        }
    }

    fn slot(&mut self, symbol: Symbol) -> Slot {
        if let Some(slot) = self.symbols.get(symbol) {
            return slot;
        }
        self.memory.push(self.circuit.load(symbol));
        self.symbols.insert(symbol)
    }

    fn unit(&mut self, u: UnitId, attr: UnitAttr) -> Slot {
        self.slot(Symbol::Unit(u, attr))
    }

    fn weight(&mut self, l: LinkId) -> Slot {
        self.slot(Symbol::Link(l, LinkAttr::Weight))
    }

    /// Gain slot of `l`, or `None` when the gain is a constant 1.
    fn gain(&mut self, l: LinkId) -> Option<Slot> {
        let link = &self.circuit.links[l];
        if link.gater.is_none() && link.gain == 1.0 {
            None
        } else {
            Some(self.slot(Symbol::Link(l, LinkAttr::Gain)))
        }
    }

    /// `[gain, weight]` of a unit's self link, gain first as in the interpreter.
    fn recurrence(&mut self, u: UnitId) -> Vec<Slot> {
        let s = self.circuit.units[u].self_link;
        let mut factors: Vec<Slot> = self.gain(s).into_iter().collect();
        factors.push(self.weight(s));
        factors
    }

    fn input_code(&mut self, u: UnitId) -> UnitCode {
        let derivative = self.unit(u, UnitAttr::Derivative);
        let bias = self.unit(u, UnitAttr::Bias);
        UnitCode {
            unit: u,
            activation: vec![
                Instr::Const { dst: derivative, value: 0.0 },
                Instr::Const { dst: bias, value: 0.0 },
            ],
            trace: Vec::new(),
            propagation: Vec::new(),
        }
    }

    fn unit_code(&mut self, u: UnitId, target: Option<Slot>) -> UnitCode {
        let circuit = self.circuit;
        let unit = &circuit.units[u];
        let inputs: Vec<LinkId> = unit.connections.inputs.iter().copied().collect();
        let gated_units: Vec<UnitId> = unit.trace.extended.keys().copied().collect();

        let old = self.unit(u, UnitAttr::Old);
        let state = self.unit(u, UnitAttr::State);
        let bias = self.unit(u, UnitAttr::Bias);
        let activation = self.unit(u, UnitAttr::Activation);
        let derivative = self.unit(u, UnitAttr::Derivative);

        // activation
        let mut code = Vec::new();
        code.push(Instr::Copy { dst: old, src: state });
        let mut factors = self.recurrence(u);
        factors.push(old);
        code.push(Instr::Product { dst: state, factors: factors.into() });
        code.push(Instr::Sum { dst: state, lhs: state, rhs: bias });
        for &l in &inputs {
            let from = circuit.links[l].from;
            let mut factors = vec![self.unit(from, UnitAttr::Activation), self.weight(l)];
            factors.extend(self.gain(l));
            code.push(Instr::Accumulate { dst: state, factors: factors.into() });
        }
        code.push(Instr::Transfer {
            kind: unit.transfer,
            state,
            activation,
            derivative,
        });
        let activation_code = code;

        // traces
        let mut code = Vec::new();
        let mut influences = Vec::with_capacity(gated_units.len());
        for &g in &gated_units {
            let infl = self.slot(Symbol::Influence { unit: u, gated: g });
            self.influence_code(&mut code, u, g, infl);
            influences.push((g, infl));
        }
        for &l in &inputs {
            let from = circuit.links[l].from;
            let e = self.slot(Symbol::Eligibility { unit: u, link: l });
            let mut factors = self.recurrence(u);
            factors.push(e);
            code.push(Instr::Product { dst: e, factors: factors.into() });
            let mut factors: Vec<Slot> = self.gain(l).into_iter().collect();
            factors.push(self.unit(from, UnitAttr::Activation));
            code.push(Instr::Accumulate { dst: e, factors: factors.into() });

            for &(g, infl) in &influences {
                let x = self.slot(Symbol::Extended { unit: u, gated: g, link: l });
                let mut factors = self.recurrence(g);
                factors.push(x);
                code.push(Instr::Product { dst: x, factors: factors.into() });
                code.push(Instr::Accumulate {
                    dst: x,
                    factors: vec![derivative, e, infl].into(),
                });
            }
        }
        for &l in &unit.connections.gated {
            let gain = self.slot(Symbol::Link(l, LinkAttr::Gain));
            code.push(Instr::Copy { dst: gain, src: activation });
        }
        let trace_code = code;

        // propagation
        let mut code = Vec::new();
        let responsibility = self.unit(u, UnitAttr::Responsibility);
        let projected = self.unit(u, UnitAttr::Projected);
        if let Some(target) = target {
            code.push(Instr::Difference {
                dst: responsibility,
                lhs: target,
                rhs: activation,
            });
            code.push(Instr::Copy { dst: projected, src: responsibility });
        } else {
            let error = self.slot(Symbol::Scratch(Scratch::Error));
            code.push(Instr::Const { dst: error, value: 0.0 });
            for &l in &unit.connections.projected {
                let to = circuit.links[l].to;
                let mut factors = vec![self.unit(to, UnitAttr::Responsibility)];
                factors.extend(self.gain(l));
                factors.push(self.weight(l));
                code.push(Instr::Accumulate { dst: error, factors: factors.into() });
            }
            code.push(Instr::Product {
                dst: projected,
                factors: vec![derivative, error].into(),
            });

            code.push(Instr::Const { dst: error, value: 0.0 });
            if !gated_units.is_empty() {
                let infl = self.slot(Symbol::Scratch(Scratch::Influence));
                for &g in &gated_units {
                    self.influence_code(&mut code, u, g, infl);
                    let r = self.unit(g, UnitAttr::Responsibility);
                    code.push(Instr::Accumulate {
                        dst: error,
                        factors: vec![r, infl].into(),
                    });
                }
            }
            let gated = self.unit(u, UnitAttr::Gated);
            code.push(Instr::Product {
                dst: gated,
                factors: vec![derivative, error].into(),
            });
            code.push(Instr::Sum {
                dst: responsibility,
                lhs: projected,
                rhs: gated,
            });
        }

        let rate = self.slot(Symbol::Rate);
        if !inputs.is_empty() {
            let gradient = self.slot(Symbol::Scratch(Scratch::Gradient));
            for &l in &inputs {
                let e = self.slot(Symbol::Eligibility { unit: u, link: l });
                code.push(Instr::Product {
                    dst: gradient,
                    factors: vec![projected, e].into(),
                });
                for &g in &gated_units {
                    let r = self.unit(g, UnitAttr::Responsibility);
                    let x = self.slot(Symbol::Extended { unit: u, gated: g, link: l });
                    code.push(Instr::Accumulate {
                        dst: gradient,
                        factors: vec![r, x].into(),
                    });
                }
                let w = self.weight(l);
                code.push(Instr::Accumulate {
                    dst: w,
                    factors: vec![rate, gradient].into(),
                });
            }
        }
        code.push(Instr::Accumulate {
            dst: bias,
            factors: vec![rate, responsibility].into(),
        });

        UnitCode {
            unit: u,
            activation: activation_code,
            trace: trace_code,
            propagation: code,
        }
    }

    /// Emits the influence of `u` on `g` into `dst`.
    fn influence_code(&mut self, code: &mut Vec<Instr>, u: UnitId, g: UnitId, dst: Slot) {
        let circuit = self.circuit;
        let self_link = circuit.units[g].self_link;
        if circuit.links[self_link].gater == Some(u) {
            let old = self.unit(g, UnitAttr::Old);
            code.push(Instr::Copy { dst, src: old });
        } else {
            code.push(Instr::Const { dst, value: 0.0 });
        }
        if let Some(links) = circuit.units[u].trace.influences.get(&g) {
            for &l in links {
                let from = circuit.links[l].from;
                let w = self.weight(l);
                let a = self.unit(from, UnitAttr::Activation);
                code.push(Instr::Accumulate { dst, factors: vec![w, a].into() });
            }
        }
    }
}

impl Program {
    /// Copies every slot that mirrors an object field back into `circuit`.
    pub fn restore_into(&self, circuit: &mut Circuit) {
        for (symbol, slot) in self.symbols.iter() {
            circuit.store(symbol, self.memory[slot]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::CircuitConfig;

    fn chain() -> (Circuit, Vec<NeuronRef>, LinkId) {
        let mut c = Circuit::new(CircuitConfig::default().with_seed(5));
        let a = c.add_unit();
        let b = c.add_unit();
        let l = c.project(a, b, Some(0.5));
        let neurons = vec![
            NeuronRef { unit: a, layer: LayerTag::Input },
            NeuronRef { unit: b, layer: LayerTag::Output },
        ];
        (c, neurons, l)
    }

    #[test]
    fn slots_start_from_object_values() {
        let (c, neurons, l) = chain();
        let p = Compiler::new(&c).compile(&neurons);
        assert_eq!(p.read(Symbol::Link(l, LinkAttr::Weight)), Some(0.5));
        assert_eq!(p.read(Symbol::Unit(1, UnitAttr::Bias)), Some(c.unit(1).bias));
        assert_eq!(p.read(Symbol::Rate), Some(c.config().default_rate));
        assert_eq!(p.input_slots().len(), 1);
        assert_eq!(p.output_slots().len(), 1);
        assert_eq!(p.target_slots().len(), 1);
    }

    #[test]
    fn ungated_unit_gain_is_folded_out() {
        let (c, neurons, l) = chain();
        let p = Compiler::new(&c).compile(&neurons);
        assert_eq!(p.slot(Symbol::Link(l, LinkAttr::Gain)), None);
    }

    #[test]
    fn gated_links_keep_their_gain_slot() {
        let (mut c, mut neurons, l) = chain();
        let g = c.add_unit();
        c.project(0, g, Some(0.3));
        c.gate(g, l);
        neurons.insert(1, NeuronRef { unit: g, layer: LayerTag::Hidden(0) });

        let p = Compiler::new(&c).compile(&neurons);
        let gain = p.slot(Symbol::Link(l, LinkAttr::Gain)).unwrap();
        let act = p.slot(Symbol::Unit(g, UnitAttr::Activation)).unwrap();
        let hidden = p
            .layers()
            .iter()
            .find(|layer| layer.tag == LayerTag::Hidden(0))
            .unwrap();
        assert_eq!(
            hidden.units[0].trace.last(),
            Some(&Instr::Copy { dst: gain, src: act })
        );
    }

    #[test]
    fn propagation_runs_output_first() {
        let (mut c, mut neurons, _) = chain();
        let h = c.add_unit();
        c.project(0, h, None);
        neurons.insert(1, NeuronRef { unit: h, layer: LayerTag::Hidden(0) });

        let p = Compiler::new(&c).compile(&neurons);
        let tags: Vec<LayerTag> = p.layers().iter().map(|l| l.tag).collect();
        assert_eq!(tags, vec![LayerTag::Input, LayerTag::Hidden(0), LayerTag::Output]);
        let target = p.target_slots()[0];
        assert!(matches!(
            p.propagation_code().first(),
            Some(Instr::Difference { lhs, .. }) if *lhs == target
        ));
        assert!(p.layers()[0].units[0].propagation.is_empty());
    }

    #[test]
    fn restore_writes_back_learned_values() {
        let (mut c, neurons, l) = chain();
        let mut p = Compiler::new(&c).compile(&neurons);
        let y = p.activate(&[1.0]).unwrap()[0];
        p.propagate(0.2, &[1.0]).unwrap();
        p.restore_into(&mut c);

        assert_eq!(c.unit(1).activation, y);
        assert_eq!(c.link(l).weight, p.read(Symbol::Link(l, LinkAttr::Weight)).unwrap());
        assert_eq!(c.unit(1).trace.eligibility[&l], 1.0);
        assert_eq!(c.unit(1).error.responsibility, 1.0 - y);
    }
}
