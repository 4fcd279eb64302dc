//! Captured-callable construction and invocation sites.
//!
//! A capture site is the `ldftn`/`ldvirtftn` + delegate `newobj` pair that
//! turns a method into a callable value. The graph links each captured target
//! back to that site and to the `Invoke` calls reached by the constructed
//! value inside the same method (following locals and `dup`).

use std::collections::{BTreeMap, BTreeSet};

use rustc_hash::FxHashMap;
use tracing::warn;

use contextify_core::{AnalysisError, InstrId, MethodId, OpCode, Program};

use crate::provenance::StackAnalyzer;

/// Where a callable is constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CaptureSite {
    /// Method containing the construction.
    pub method: MethodId,
    /// The `ldftn` or `ldvirtftn` naming the target.
    pub ldftn: InstrId,
    /// The delegate constructor call consuming the function pointer.
    pub construct: InstrId,
}

/// A captured target together with its construction site and local invokes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureLink {
    pub target: MethodId,
    pub site: CaptureSite,
    /// `Invoke` calls in `site.method` consuming the constructed callable.
    pub invokes: Vec<InstrId>,
}

/// Every recognized capture site in the program, indexed by target.
#[derive(Debug, Default)]
pub struct CaptureGraph {
    links: BTreeMap<(MethodId, InstrId), CaptureLink>,
    by_target: FxHashMap<MethodId, BTreeSet<(MethodId, InstrId)>>,
    unmatched: BTreeSet<(MethodId, InstrId)>,
}

impl CaptureGraph {
    pub fn build(program: &Program, analyzer: &mut StackAnalyzer) -> Result<Self, AnalysisError> {
        let mut graph = Self::default();
        for method in program.methods_with_bodies() {
            graph.scan(program, analyzer, method)?;
        }
        Ok(graph)
    }

    /// Drop everything recorded for `method`.
    pub fn forget_method(&mut self, method: MethodId) {
        let stale: Vec<(MethodId, InstrId)> = self
            .links
            .range((method, InstrId::new(0))..=(method, InstrId::new(u32::MAX)))
            .map(|(key, _)| *key)
            .collect();
        for key in stale {
            if let Some(link) = self.links.remove(&key) {
                if let Some(keys) = self.by_target.get_mut(&link.target) {
                    keys.remove(&key);
                    if keys.is_empty() {
                        self.by_target.remove(&link.target);
                    }
                }
            }
        }
        self.unmatched.retain(|(m, _)| *m != method);
    }

    /// Rescan `method` after its body changed.
    pub fn rederive_method(
        &mut self,
        program: &Program,
        analyzer: &mut StackAnalyzer,
        method: MethodId,
    ) -> Result<(), AnalysisError> {
        self.forget_method(method);
        let live = program
            .method(method)
            .is_ok_and(|m| !m.is_retired() && m.body.is_some());
        if live {
            self.scan(program, analyzer, method)?;
        }
        Ok(())
    }

    fn scan(
        &mut self,
        program: &Program,
        analyzer: &mut StackAnalyzer,
        method: MethodId,
    ) -> Result<(), AnalysisError> {
        let body = program.body(method)?;
        let mut matched_invokes: BTreeSet<InstrId> = BTreeSet::new();
        let mut invoke_sites: Vec<InstrId> = Vec::new();

        for instr in body.instructions() {
            match instr.opcode {
                OpCode::LdFtn | OpCode::LdVirtFtn => {
                    let Some(target) = instr.method_operand() else {
                        continue;
                    };
                    if let Some(link) = self.link_site(program, analyzer, method, instr.id, target)? {
                        matched_invokes.extend(link.invokes.iter().copied());
                        let key = (method, instr.id);
                        self.by_target.entry(target).or_default().insert(key);
                        self.links.insert(key, link);
                    }
                }
                OpCode::Call | OpCode::CallVirt => {
                    if instr
                        .method_operand()
                        .is_some_and(|m| Self::is_invoke(program, m))
                    {
                        invoke_sites.push(instr.id);
                    }
                }
                _ => {}
            }
        }

        for site in invoke_sites {
            if !matched_invokes.contains(&site) {
                warn!(
                    method = %program.identity(method),
                    instr = %site,
                    "callable invocation matches no capture site; excluded from the graph"
                );
                self.unmatched.insert((method, site));
            }
        }
        Ok(())
    }

    fn is_invoke(program: &Program, method: MethodId) -> bool {
        program
            .method(method)
            .is_ok_and(|m| program.delegate_invoke(m.owner) == Some(method))
    }

    fn link_site(
        &self,
        program: &Program,
        analyzer: &mut StackAnalyzer,
        method: MethodId,
        ldftn: InstrId,
        target: MethodId,
    ) -> Result<Option<CaptureLink>, AnalysisError> {
        let usages = analyzer.usage(program, method, ldftn)?;
        let construct = match usages.as_slice() {
            [only] => {
                let consumer = program
                    .body(method)?
                    .get(only.consumer)
                    .filter(|c| c.opcode == OpCode::NewObj)
                    .and_then(|c| c.method_operand())
                    .filter(|ctor| program.is_delegate_ctor(*ctor));
                match consumer {
                    Some(_) if only.slot == 1 => Some(only.consumer),
                    _ => None,
                }
            }
            _ => None,
        };
        let Some(construct) = construct else {
            warn!(
                method = %program.identity(method),
                instr = %ldftn,
                target = %program.identity(target),
                "function pointer is not consumed by a callable constructor"
            );
            return Ok(None);
        };

        let mut invokes = Vec::new();
        for usage in analyzer.usage_through_locals(program, method, construct)? {
            let is_invoke = usage.slot == 0
                && program
                    .body(method)?
                    .get(usage.consumer)
                    .filter(|c| matches!(c.opcode, OpCode::Call | OpCode::CallVirt))
                    .and_then(|c| c.method_operand())
                    .is_some_and(|m| Self::is_invoke(program, m));
            if is_invoke {
                invokes.push(usage.consumer);
            }
        }

        Ok(Some(CaptureLink {
            target,
            site: CaptureSite {
                method,
                ldftn,
                construct,
            },
            invokes,
        }))
    }

    // ==========================================================================
    // Queries
    // ==========================================================================

    /// Every link, ordered by (method, ldftn).
    pub fn links(&self) -> impl Iterator<Item = &CaptureLink> {
        self.links.values()
    }

    /// Links capturing `target`, ordered by site.
    pub fn links_to(&self, target: MethodId) -> Vec<&CaptureLink> {
        self.by_target
            .get(&target)
            .into_iter()
            .flatten()
            .filter_map(|key| self.links.get(key))
            .collect()
    }

    /// Links whose construction site is inside `method`.
    pub fn links_in(&self, method: MethodId) -> Vec<&CaptureLink> {
        self.links
            .range((method, InstrId::new(0))..=(method, InstrId::new(u32::MAX)))
            .map(|(_, link)| link)
            .collect()
    }

    pub fn link_at(&self, method: MethodId, ldftn: InstrId) -> Option<&CaptureLink> {
        self.links.get(&(method, ldftn))
    }

    /// Invoke calls whose callable could not be traced to a capture site.
    pub fn unmatched(&self) -> impl Iterator<Item = &(MethodId, InstrId)> {
        self.unmatched.iter()
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}
