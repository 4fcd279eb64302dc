//! Path walks over one method body.

use rustc_hash::{FxHashMap, FxHashSet};

use contextify_core::{
    AnalysisError, InstrId, Instruction, MethodBody, MethodId, ModelError, OpCode, Program,
    StackEffect,
};

use super::{FlowIndex, PathOrigin, ProvenancePath, Usage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Mode {
    /// Walking past values above the one being traced.
    Skip,
    /// Collecting everything that supplies the top `n` values.
    Need,
}

type Key = (InstrId, usize, Mode);

/// A path under construction, in execution order.
#[derive(Clone, PartialEq)]
struct Partial {
    instructions: Vec<InstrId>,
    origin: PathOrigin,
    exact: bool,
}

impl Partial {
    fn empty() -> Self {
        Self {
            instructions: Vec::new(),
            origin: PathOrigin::Instruction,
            exact: true,
        }
    }

    fn catch(entry: InstrId) -> Self {
        Self {
            instructions: Vec::new(),
            origin: PathOrigin::CatchEntry(entry),
            exact: false,
        }
    }

    fn finish(self) -> ProvenancePath {
        ProvenancePath {
            instructions: self.instructions,
            origin: self.origin,
            exact: self.exact,
        }
    }
}

/// Borrowed view of one method plus its flow index.
pub(super) struct Walker<'a> {
    pub(super) program: &'a Program,
    pub(super) method: MethodId,
    pub(super) body: &'a MethodBody,
    pub(super) index: &'a FlowIndex,
    /// Keys being expanded, mapped to their depth on the walk stack.
    on_path: FxHashMap<Key, usize>,
    /// Shallowest walk-stack depth cut short by a cycle in the current subtree.
    low: usize,
    /// Completed expansions, shared by every query made through this walker.
    memo: FxHashMap<Key, Vec<Partial>>,
}

impl<'a> Walker<'a> {
    pub(super) fn new(
        program: &'a Program,
        method: MethodId,
        body: &'a MethodBody,
        index: &'a FlowIndex,
    ) -> Self {
        Self {
            program,
            method,
            body,
            index,
            on_path: FxHashMap::default(),
            low: usize::MAX,
            memo: FxHashMap::default(),
        }
    }

    pub(super) fn instr(&self, id: InstrId) -> Result<&'a Instruction, AnalysisError> {
        let body: &'a MethodBody = self.body;
        self.index
            .position(id)
            .and_then(|p| body.at(p))
            .ok_or(AnalysisError::Model(ModelError::UnknownInstruction { instr: id }))
    }

    pub(super) fn effect(&self, id: InstrId) -> Result<StackEffect, AnalysisError> {
        let instr = self.instr(id)?;
        self.program.stack_effect(self.method, instr)
    }

    fn underflow(&self, at: InstrId) -> AnalysisError {
        AnalysisError::StackUnderflow {
            method: self.program.identity(self.method),
            instr: at,
        }
    }

    // ==========================================================================
    // Backward: provenance
    // ==========================================================================

    /// Paths producing the value `depth` slots below the top of the stack
    /// just before `at` executes.
    pub(super) fn value_paths(
        &mut self,
        at: InstrId,
        depth: usize,
    ) -> Result<Vec<ProvenancePath>, AnalysisError> {
        let mut paths: Vec<ProvenancePath> = Vec::new();
        for partial in self.producers(at, depth)? {
            let path = partial.finish();
            if !paths.contains(&path) {
                paths.push(path);
            }
        }
        Ok(paths)
    }

    fn producers(&mut self, at: InstrId, depth: usize) -> Result<Vec<Partial>, AnalysisError> {
        if let Some(entry) = self.index.handler_entry(at) {
            return match entry {
                Some(_) if depth == 0 => Ok(vec![Partial::catch(at)]),
                _ => Err(self.underflow(at)),
            };
        }
        let index: &'a FlowIndex = self.index;
        let preds = index.predecessors(at);
        if preds.is_empty() {
            return Err(self.underflow(at));
        }
        let mut out = Vec::new();
        for &pred in preds {
            let alts = self.expand((pred, depth, Mode::Skip))?;
            merge(&mut out, alts);
        }
        Ok(out)
    }

    fn skip_step(&mut self, pred: InstrId, depth: usize) -> Result<Vec<Partial>, AnalysisError> {
        if self.instr(pred)?.opcode == OpCode::Leave {
            return Err(self.underflow(pred));
        }
        let effect = self.effect(pred)?;
        if depth >= effect.pushes {
            return self.producers(pred, depth - effect.pushes + effect.pops);
        }
        let exact = depth + 1 == effect.pushes;
        let mut alts = self.inputs(pred, effect.pops)?;
        for alt in &mut alts {
            alt.instructions.push(pred);
            alt.exact &= exact;
        }
        Ok(alts)
    }

    /// Sub-sequences supplying the top `need` values just before `at`.
    fn inputs(&mut self, at: InstrId, need: usize) -> Result<Vec<Partial>, AnalysisError> {
        if need == 0 {
            return Ok(vec![Partial::empty()]);
        }
        if let Some(entry) = self.index.handler_entry(at) {
            return match entry {
                Some(_) if need == 1 => Ok(vec![Partial::catch(at)]),
                _ => Err(self.underflow(at)),
            };
        }
        let index: &'a FlowIndex = self.index;
        let preds = index.predecessors(at);
        if preds.is_empty() {
            return Err(self.underflow(at));
        }
        let mut out = Vec::new();
        for &pred in preds {
            let alts = self.expand((pred, need, Mode::Need))?;
            merge(&mut out, alts);
        }
        Ok(out)
    }

    /// Expands one `(instruction, depth, mode)` key at most once per walker.
    ///
    /// A key met again while it is still being expanded closes a loop and
    /// contributes nothing. Results computed under such a cut are only
    /// memoized once the cut key itself has finished.
    fn expand(&mut self, key: Key) -> Result<Vec<Partial>, AnalysisError> {
        if let Some(hit) = self.memo.get(&key) {
            return Ok(hit.clone());
        }
        if let Some(&at) = self.on_path.get(&key) {
            self.low = self.low.min(at);
            return Ok(Vec::new());
        }
        let level = self.on_path.len();
        self.on_path.insert(key, level);
        let outer = std::mem::replace(&mut self.low, usize::MAX);
        let (pred, depth, mode) = key;
        let result = match mode {
            Mode::Skip => self.skip_step(pred, depth),
            Mode::Need => self.need_step(pred, depth),
        };
        self.on_path.remove(&key);
        let inner = std::mem::replace(&mut self.low, outer);
        let alts = result?;
        if inner < level {
            self.low = self.low.min(inner);
        } else {
            self.memo.insert(key, alts.clone());
        }
        Ok(alts)
    }

    fn need_step(&mut self, pred: InstrId, need: usize) -> Result<Vec<Partial>, AnalysisError> {
        if self.instr(pred)?.opcode == OpCode::Leave {
            return Err(self.underflow(pred));
        }
        let effect = self.effect(pred)?;
        if effect.pops == 0 && effect.pushes == 0 {
            return self.inputs(pred, need);
        }
        let exact = effect.pushes <= need;
        let remaining = if effect.pushes >= need {
            effect.pops
        } else {
            need - effect.pushes + effect.pops
        };
        let mut alts = self.inputs(pred, remaining)?;
        for alt in &mut alts {
            alt.instructions.push(pred);
            alt.exact &= exact;
        }
        Ok(alts)
    }

    // ==========================================================================
    // Forward: usage
    // ==========================================================================

    /// Direct consumers of every value pushed by `at`.
    pub(super) fn usage(&self, at: InstrId) -> Result<Vec<Usage>, AnalysisError> {
        let effect = self.effect(at)?;
        let mut seen: FxHashSet<(InstrId, usize)> = FxHashSet::default();
        let mut out: Vec<Usage> = Vec::new();
        let mut work: Vec<(InstrId, usize)> = Vec::new();
        for depth in 0..effect.pushes {
            for &succ in self.index.successors(at) {
                work.push((succ, depth));
            }
        }
        while let Some((id, depth)) = work.pop() {
            if !seen.insert((id, depth)) {
                continue;
            }
            let instr = self.instr(id)?;
            if instr.opcode == OpCode::Leave {
                // leave empties the stack
                out.push(Usage { consumer: id, slot: 0 });
                continue;
            }
            let effect = self.program.stack_effect(self.method, instr)?;
            if depth < effect.pops {
                out.push(Usage {
                    consumer: id,
                    slot: effect.pops - 1 - depth,
                });
                continue;
            }
            let next = depth - effect.pops + effect.pushes;
            for &succ in self.index.successors(id) {
                work.push((succ, next));
            }
        }
        self.sort_usages(&mut out);
        Ok(out)
    }

    /// Consumers of the values pushed by `at`, looking through `stloc`/`ldloc`
    /// pairs and `dup`.
    pub(super) fn usage_through_locals(&self, at: InstrId) -> Result<Vec<Usage>, AnalysisError> {
        let mut producers = vec![at];
        let mut visited: FxHashSet<InstrId> = FxHashSet::default();
        let mut out = Vec::new();
        while let Some(producer) = producers.pop() {
            if !visited.insert(producer) {
                continue;
            }
            for usage in self.usage(producer)? {
                let consumer = self.instr(usage.consumer)?;
                match consumer.opcode {
                    OpCode::StLoc => {
                        for load in self.local_uses(usage.consumer)? {
                            if self.instr(load)?.opcode == OpCode::LdLoc {
                                producers.push(load);
                            } else {
                                out.push(Usage { consumer: load, slot: 0 });
                            }
                        }
                    }
                    OpCode::Dup => producers.push(usage.consumer),
                    _ => out.push(usage),
                }
            }
        }
        self.sort_usages(&mut out);
        Ok(out)
    }

    fn sort_usages(&self, usages: &mut Vec<Usage>) {
        usages.sort_by_key(|u| (self.index.position(u.consumer), u.slot));
        usages.dedup();
    }

    // ==========================================================================
    // Locals
    // ==========================================================================

    fn local_of(&self, id: InstrId) -> Result<u16, AnalysisError> {
        let instr = self.instr(id)?;
        instr.local_operand().ok_or_else(|| {
            AnalysisError::Model(ModelError::InvalidOperand {
                instr: id,
                detail: "expected a local operand".into(),
            })
        })
    }

    /// `stloc` sites whose value may be observed by the load at `at`.
    pub(super) fn local_sources(&self, at: InstrId) -> Result<Vec<InstrId>, AnalysisError> {
        let local = self.local_of(at)?;
        let mut seen: FxHashSet<InstrId> = FxHashSet::default();
        let mut out = Vec::new();
        let mut work: Vec<InstrId> = self.index.predecessors(at).to_vec();
        while let Some(id) = work.pop() {
            if !seen.insert(id) {
                continue;
            }
            let instr = self.instr(id)?;
            if instr.opcode == OpCode::StLoc && instr.local_operand() == Some(local) {
                out.push(id);
                continue;
            }
            work.extend_from_slice(self.index.predecessors(id));
        }
        out.sort_by_key(|id| self.index.position(*id));
        Ok(out)
    }

    /// `ldloc`/`ldloca` sites reached by the store at `at` before any other
    /// store to the same local.
    pub(super) fn local_uses(&self, at: InstrId) -> Result<Vec<InstrId>, AnalysisError> {
        let local = self.local_of(at)?;
        let mut seen: FxHashSet<InstrId> = FxHashSet::default();
        let mut out = Vec::new();
        let mut work: Vec<InstrId> = self.index.successors(at).to_vec();
        while let Some(id) = work.pop() {
            if !seen.insert(id) {
                continue;
            }
            let instr = self.instr(id)?;
            if instr.local_operand() == Some(local) {
                match instr.opcode {
                    OpCode::StLoc => continue,
                    OpCode::LdLoc | OpCode::LdLocA => out.push(id),
                    _ => {}
                }
            }
            work.extend_from_slice(self.index.successors(id));
        }
        out.sort_by_key(|id| self.index.position(*id));
        Ok(out)
    }
}

fn merge(out: &mut Vec<Partial>, alts: Vec<Partial>) {
    for alt in alts {
        if !out.contains(&alt) {
            out.push(alt);
        }
    }
}
