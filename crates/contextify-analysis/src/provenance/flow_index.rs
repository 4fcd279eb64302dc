//! Per-method control-flow index.
//!
//! A [`FlowIndex`] maps every instruction to its control-flow predecessors
//! and successors and records where exception handlers begin. It is built
//! once per body revision and memoized in a [`FlowCache`]; structural edits
//! must call [`FlowCache::invalidate`] before the next query. The index also
//! stores the revision and length it was built from, so a missed invalidation
//! is caught and the index rebuilt.

use rustc_hash::FxHashMap;
use tracing::debug;

use contextify_core::{FlowKind, HandlerKind, InstrId, MethodBody, MethodId, TypeRef};

/// Control-flow edges of one method body.
#[derive(Debug, Clone)]
pub struct FlowIndex {
    revision: u64,
    len: usize,
    order: Vec<InstrId>,
    positions: FxHashMap<InstrId, usize>,
    predecessors: FxHashMap<InstrId, Vec<InstrId>>,
    successors: FxHashMap<InstrId, Vec<InstrId>>,
    /// Handler entry -> type of the value on the stack at entry (catch only).
    handler_entries: FxHashMap<InstrId, Option<TypeRef>>,
}

impl FlowIndex {
    pub fn build(body: &MethodBody) -> Self {
        let instructions = body.instructions();
        let order: Vec<InstrId> = instructions.iter().map(|i| i.id).collect();
        let positions = order.iter().enumerate().map(|(p, id)| (*id, p)).collect();

        let mut predecessors: FxHashMap<InstrId, Vec<InstrId>> = FxHashMap::default();
        let mut successors: FxHashMap<InstrId, Vec<InstrId>> = FxHashMap::default();

        // Fall-through edges first so predecessor lists start with the
        // layout predecessor, then jump edges in layout order.
        for window in instructions.windows(2) {
            let (from, to) = (&window[0], &window[1]);
            if from.opcode.falls_through() {
                predecessors.entry(to.id).or_default().push(from.id);
                successors.entry(from.id).or_default().push(to.id);
            }
        }
        for instr in instructions {
            if !matches!(
                instr.opcode.flow(),
                FlowKind::Branch | FlowKind::CondBranch | FlowKind::Switch
            ) {
                continue;
            }
            for target in instr.jump_targets() {
                let preds = predecessors.entry(*target).or_default();
                if !preds.contains(&instr.id) {
                    preds.push(instr.id);
                }
                let succs = successors.entry(instr.id).or_default();
                if !succs.contains(target) {
                    succs.push(*target);
                }
            }
        }

        let handler_entries = body
            .handlers()
            .iter()
            .map(|h| {
                let on_entry = match &h.kind {
                    HandlerKind::Catch(ty) => Some(ty.clone()),
                    HandlerKind::Finally => None,
                };
                (h.handler_start, on_entry)
            })
            .collect();

        Self {
            revision: body.revision(),
            len: body.len(),
            order,
            positions,
            predecessors,
            successors,
            handler_entries,
        }
    }

    /// Whether this index still describes `body`.
    pub fn is_current(&self, body: &MethodBody) -> bool {
        self.revision == body.revision() && self.len == body.len()
    }

    pub fn position(&self, id: InstrId) -> Option<usize> {
        self.positions.get(&id).copied()
    }

    pub fn order(&self) -> &[InstrId] {
        &self.order
    }

    pub fn predecessors(&self, id: InstrId) -> &[InstrId] {
        self.predecessors.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn successors(&self, id: InstrId) -> &[InstrId] {
        self.successors.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// `Some(Some(ty))` for a catch entry, `Some(None)` for a finally entry.
    pub fn handler_entry(&self, id: InstrId) -> Option<Option<&TypeRef>> {
        self.handler_entries.get(&id).map(Option::as_ref)
    }

    pub fn entry(&self) -> Option<InstrId> {
        self.order.first().copied()
    }
}

/// Memo of [`FlowIndex`]es keyed by method.
#[derive(Debug, Default)]
pub struct FlowCache {
    entries: FxHashMap<MethodId, FlowIndex>,
    builds: usize,
}

impl FlowCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index for `method`, rebuilding it if missing or stale.
    pub fn index(&mut self, method: MethodId, body: &MethodBody) -> &FlowIndex {
        let stale = match self.entries.get(&method) {
            Some(index) if index.is_current(body) => false,
            Some(_) => {
                debug!(%method, "flow index out of date without invalidation, rebuilding");
                true
            }
            None => true,
        };
        if stale {
            self.builds += 1;
            self.entries.insert(method, FlowIndex::build(body));
        }
        &self.entries[&method]
    }

    /// Drop the memo for `method`; call after any structural edit.
    pub fn invalidate(&mut self, method: MethodId) {
        self.entries.remove(&method);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of index builds performed, for diagnostics.
    pub fn builds(&self) -> usize {
        self.builds
    }
}
