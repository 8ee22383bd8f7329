use std::io::{self, Read, Write};

use hashbrown::HashMap;

use crate::error::{check_len, Result};
use crate::graph::LayerTag;
use crate::storage;
use crate::transfer::Transfer;
use crate::unit::{LinkId, UnitId};

/// Index into the program's flat memory.
pub type Slot = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitAttr {
    Activation,
    State,
    Old,
    Bias,
    Derivative,
    Responsibility,
    Projected,
    Gated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkAttr {
    Weight,
    Gain,
}

/// Temporaries shared by every unit; each is fully rewritten before it is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scratch {
    Error,
    Gradient,
    Influence,
}

/// Identity of one memory slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Symbol {
    Rate,
    Target(usize),
    Unit(UnitId, UnitAttr),
    Link(LinkId, LinkAttr),
    Eligibility { unit: UnitId, link: LinkId },
    Extended { unit: UnitId, gated: UnitId, link: LinkId },
    /// Influence of `unit` on `gated`, kept for the whole trace update.
    Influence { unit: UnitId, gated: UnitId },
    Scratch(Scratch),
}

/// Symbol -> slot table, in allocation order.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    slots: HashMap<Symbol, Slot>,
    order: Vec<Symbol>,
}

impl SymbolTable {
    pub fn get(&self, symbol: Symbol) -> Option<Slot> {
        self.slots.get(&symbol).copied()
    }

    pub(crate) fn insert(&mut self, symbol: Symbol) -> Slot {
        let slot = self.order.len();
        self.slots.insert(symbol, slot);
        self.order.push(symbol);
        slot
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// `(symbol, slot)` pairs in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (Symbol, Slot)> + '_ {
        self.order.iter().copied().zip(0..)
    }
}

/// One assignment over memory slots.
///
/// Products fold left to right, matching the interpreter's evaluation order.
#[derive(Debug, Clone, PartialEq)]
pub enum Instr {
    Const { dst: Slot, value: f64 },
    Copy { dst: Slot, src: Slot },
    /// `F[dst] = F[a] * F[b] * ...`
    Product { dst: Slot, factors: Box<[Slot]> },
    /// `F[dst] += F[a] * F[b] * ...`
    Accumulate { dst: Slot, factors: Box<[Slot]> },
    Sum { dst: Slot, lhs: Slot, rhs: Slot },
    Difference { dst: Slot, lhs: Slot, rhs: Slot },
    Transfer {
        kind: Transfer,
        state: Slot,
        activation: Slot,
        derivative: Slot,
    },
}

#[inline]
fn product(memory: &[f64], factors: &[Slot]) -> f64 {
    let (&first, rest) = match factors.split_first() {
        Some(split) => split,
        None => return 1.0,
    };
    rest.iter().fold(memory[first], |acc, &s| acc * memory[s])
}

#[inline]
fn execute(memory: &mut [f64], code: &[Instr]) {
    for instr in code {
        match instr {
            Instr::Const { dst, value } => memory[*dst] = *value,
            Instr::Copy { dst, src } => memory[*dst] = memory[*src],
            Instr::Product { dst, factors } => memory[*dst] = product(memory, factors),
            Instr::Accumulate { dst, factors } => {
                let p = product(memory, factors);
                memory[*dst] += p;
            }
            Instr::Sum { dst, lhs, rhs } => memory[*dst] = memory[*lhs] + memory[*rhs],
            Instr::Difference { dst, lhs, rhs } => memory[*dst] = memory[*lhs] - memory[*rhs],
            Instr::Transfer {
                kind,
                state,
                activation,
                derivative,
            } => {
                let (y, dy) = kind.eval(memory[*state]);
                memory[*activation] = y;
                memory[*derivative] = dy;
            }
        }
    }
}

/// Instruction groups emitted for one unit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UnitCode {
    pub unit: UnitId,
    pub activation: Vec<Instr>,
    /// Trace updates followed by the gains of the links this unit gates.
    pub trace: Vec<Instr>,
    pub propagation: Vec<Instr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LayerCode {
    pub tag: LayerTag,
    pub units: Vec<UnitCode>,
}

/// Flat-memory form of a graph.
#[derive(Debug, Clone)]
pub struct Program {
    pub(crate) memory: Vec<f64>,
    pub(crate) symbols: SymbolTable,
    pub(crate) layers: Vec<LayerCode>,
    pub(crate) activate: Vec<Instr>,
    pub(crate) propagate: Vec<Instr>,
    pub(crate) inputs: Vec<Slot>,
    pub(crate) outputs: Vec<Slot>,
    pub(crate) targets: Vec<Slot>,
    pub(crate) rate: Slot,
}

impl Program {
    /// Writes `input` into the input slots and runs the activation procedure.
    pub fn activate(&mut self, input: &[f64]) -> Result<Vec<f64>> {
        check_len("input", self.inputs.len(), input.len())?;
        for (&slot, &x) in self.inputs.iter().zip(input) {
            self.memory[slot] = x;
        }
        execute(&mut self.memory, &self.activate);
        Ok(self.outputs.iter().map(|&s| self.memory[s]).collect())
    }

    /// Writes `rate` and `target` and runs the propagation procedure.
    pub fn propagate(&mut self, rate: f64, target: &[f64]) -> Result<()> {
        check_len("target", self.targets.len(), target.len())?;
        self.memory[self.rate] = rate;
        for (&slot, &t) in self.targets.iter().zip(target) {
            self.memory[slot] = t;
        }
        execute(&mut self.memory, &self.propagate);
        Ok(())
    }

    pub fn memory(&self) -> &[f64] {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut [f64] {
        &mut self.memory
    }

    pub fn into_memory(self) -> Vec<f64> {
        self.memory
    }

    /// Swaps in a buffer of the same length and hands back the previous one.
    pub fn replace_memory(&mut self, memory: Vec<f64>) -> Result<Vec<f64>> {
        check_len("memory buffer", self.memory.len(), memory.len())?;
        Ok(std::mem::replace(&mut self.memory, memory))
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    pub fn slot(&self, symbol: Symbol) -> Option<Slot> {
        self.symbols.get(symbol)
    }

    pub fn read(&self, symbol: Symbol) -> Option<f64> {
        self.slot(symbol).map(|s| self.memory[s])
    }

    pub fn layers(&self) -> &[LayerCode] {
        &self.layers
    }

    pub fn activation_code(&self) -> &[Instr] {
        &self.activate
    }

    pub fn propagation_code(&self) -> &[Instr] {
        &self.propagate
    }

    pub fn input_slots(&self) -> &[Slot] {
        &self.inputs
    }

    pub fn output_slots(&self) -> &[Slot] {
        &self.outputs
    }

    pub fn target_slots(&self) -> &[Slot] {
        &self.targets
    }

    pub fn instruction_count(&self) -> usize {
        self.activate.len() + self.propagate.len()
    }

    /// Writes the memory as a compressed image.
    pub fn save_memory_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(storage::MAGIC)?;
        storage::write_u32_le(w, storage::VERSION_CURRENT)?;
        storage::write_u64_le(w, self.memory.len() as u64)?;

        let mut payload = Vec::with_capacity(self.memory.len() * 8);
        for &x in &self.memory {
            storage::write_f64_le(&mut payload, x)?;
        }
        storage::write_chunk_lz4(w, *b"MEMF", &payload)
    }

    /// Loads an image written by [`Program::save_memory_to`]. The image must
    /// match this program's memory size; nothing is written otherwise.
    pub fn load_memory_from<R: Read>(&mut self, r: &mut R) -> Result<()> {
        let magic = storage::read_exact::<8, _>(r)?;
        if &magic != storage::MAGIC {
            return Err(invalid("bad magic").into());
        }
        let version = storage::read_u32_le(r)?;
        if version != storage::VERSION_CURRENT {
            return Err(invalid("unsupported version").into());
        }
        let len = storage::read_u64_le(r)? as usize;
        check_len("memory image", self.memory.len(), len)?;

        let bytes = len
            .checked_mul(8)
            .ok_or_else(|| invalid("memory image too large"))?;
        let (tag, payload) = storage::read_chunk_lz4(r, bytes)?;
        if &tag != b"MEMF" {
            return Err(invalid("missing MEMF chunk").into());
        }

        let mut cursor = payload.as_slice();
        let mut memory = Vec::with_capacity(len);
        for _ in 0..len {
            memory.push(storage::read_f64_le(&mut cursor)?);
        }
        self.memory = memory;
        Ok(())
    }
}

fn invalid(msg: &'static str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}
