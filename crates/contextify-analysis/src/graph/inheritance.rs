//! Override and interface-implementation relations between methods.
//!
//! Uses `petgraph::DiGraph` with:
//! - Nodes: virtual, abstract and interface methods
//! - Edges: base -> immediate override (or interface slot -> implementation)

use std::collections::BTreeSet;

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use rustc_hash::{FxHashMap, FxHashSet};

use contextify_core::{MethodDef, MethodFlags, MethodId, Program, TypeId};

/// Override graph over every non-retired virtual method.
#[derive(Debug, Default)]
pub struct InheritanceGraph {
    graph: DiGraph<MethodId, ()>,
    nodes: FxHashMap<MethodId, NodeIndex>,
    abstracts: FxHashSet<MethodId>,
}

fn same_signature(a: &MethodDef, b: &MethodDef) -> bool {
    a.name == b.name
        && a.return_type == b.return_type
        && a.params.len() == b.params.len()
        && a.params.iter().zip(&b.params).all(|(x, y)| x.ty == y.ty)
}

impl InheritanceGraph {
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn build(program: &Program) -> Self {
        let mut graph = Self::default();
        graph.rebuild(program);
        graph
    }

    /// Recompute every edge from the current program.
    pub fn rebuild(&mut self, program: &Program) {
        self.graph.clear();
        self.nodes.clear();
        self.abstracts.clear();

        for method in program.methods() {
            if method.is_retired() || !method.is_virtual() {
                continue;
            }
            if method.is_abstract() || method.body.is_none() {
                self.abstracts.insert(method.id);
            }
            for base in self.bases_of(program, method) {
                let from = self.node(base);
                let to = self.node(method.id);
                if !self.graph.contains_edge(from, to) {
                    self.graph.add_edge(from, to, ());
                }
            }
            self.node(method.id);
        }
    }

    fn node(&mut self, method: MethodId) -> NodeIndex {
        if let Some(&node) = self.nodes.get(&method) {
            return node;
        }
        let node = self.graph.add_node(method);
        self.nodes.insert(method, node);
        node
    }

    /// Methods `method` overrides or implements.
    fn bases_of(&self, program: &Program, method: &MethodDef) -> Vec<MethodId> {
        let mut bases: BTreeSet<MethodId> = method
            .overrides
            .iter()
            .copied()
            .filter(|m| program.method(*m).is_ok_and(|d| !d.is_retired()))
            .collect();

        let Ok(owner) = program.type_def(method.owner) else {
            return bases.into_iter().collect();
        };

        // Implicit override: nearest matching virtual in the base chain.
        if !method.flags.contains(MethodFlags::NEW_SLOT) && !owner.is_interface() {
            let mut current = owner.base_type();
            while let Some(ty) = current {
                if let Some(found) = Self::matching(program, ty, method) {
                    bases.insert(found);
                    break;
                }
                current = program.type_def(ty).ok().and_then(|t| t.base_type());
            }
        }

        for iface in Self::interfaces_of(program, method.owner) {
            if let Some(found) = Self::matching(program, iface, method) {
                bases.insert(found);
            }
        }
        bases.into_iter().collect()
    }

    fn matching(program: &Program, ty: TypeId, method: &MethodDef) -> Option<MethodId> {
        let def = program.type_def(ty).ok()?;
        def.methods.iter().copied().find(|m| {
            program.method(*m).is_ok_and(|candidate| {
                candidate.id != method.id
                    && !candidate.is_retired()
                    && candidate.is_virtual()
                    && same_signature(candidate, method)
            })
        })
    }

    /// Interfaces declared on `ty` itself, plus the interfaces they extend.
    fn interfaces_of(program: &Program, ty: TypeId) -> Vec<TypeId> {
        let mut seen: BTreeSet<TypeId> = BTreeSet::new();
        let mut work: Vec<TypeId> = program
            .type_def(ty)
            .map(|t| t.interfaces.clone())
            .unwrap_or_default();
        while let Some(iface) = work.pop() {
            if !seen.insert(iface) {
                continue;
            }
            if let Ok(def) = program.type_def(iface) {
                work.extend(def.interfaces.iter().copied());
            }
        }
        seen.into_iter().collect()
    }

    pub fn contains(&self, method: MethodId) -> bool {
        self.nodes.contains_key(&method)
    }

    fn neighbors(&self, method: MethodId, direction: Direction) -> Vec<MethodId> {
        let Some(&node) = self.nodes.get(&method) else {
            return Vec::new();
        };
        let mut out: Vec<MethodId> = self
            .graph
            .neighbors_directed(node, direction)
            .map(|n| self.graph[n])
            .collect();
        out.sort();
        out.dedup();
        out
    }

    /// Immediate overrides and implementations of `method`.
    pub fn overriders(&self, method: MethodId) -> Vec<MethodId> {
        self.neighbors(method, Direction::Outgoing)
    }

    /// Methods `method` immediately overrides or implements.
    pub fn overridden(&self, method: MethodId) -> Vec<MethodId> {
        self.neighbors(method, Direction::Incoming)
    }

    /// Every concrete method a virtual call to `method` may dispatch to,
    /// excluding `method` itself.
    pub fn implementations(&self, method: MethodId) -> Vec<MethodId> {
        let mut seen: FxHashSet<MethodId> = FxHashSet::default();
        let mut work = self.overriders(method);
        let mut out = Vec::new();
        while let Some(m) = work.pop() {
            if !seen.insert(m) {
                continue;
            }
            if !self.abstracts.contains(&m) {
                out.push(m);
            }
            work.extend(self.overriders(m));
        }
        out.sort();
        out
    }

    /// The connected override/interface component containing `method`,
    /// sorted, including `method`.
    pub fn family(&self, method: MethodId) -> Vec<MethodId> {
        let Some(&start) = self.nodes.get(&method) else {
            return vec![method];
        };
        let mut seen: FxHashSet<NodeIndex> = FxHashSet::default();
        let mut work = vec![start];
        while let Some(node) = work.pop() {
            if !seen.insert(node) {
                continue;
            }
            work.extend(self.graph.neighbors_undirected(node));
        }
        let mut out: Vec<MethodId> = seen.into_iter().map(|n| self.graph[n]).collect();
        out.sort();
        out
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contextify_core::{BodyBuilder, OpCode, Param, TypeFlags, TypeRef};

    struct Shapes {
        program: Program,
        shape_area: MethodId,
        circle_area: MethodId,
        square_area: MethodId,
        hidden: MethodId,
        measured: MethodId,
    }

    /// Shape (abstract Area) <- Circle, Square; IMeasured.Area implemented by
    /// Square; Ring.Area declared new-slot on a Circle subclass.
    fn shapes() -> Shapes {
        let mut p = Program::new();
        let virt = MethodFlags::VIRTUAL;
        let shape = p.add_type("G", "Shape", None, TypeFlags::ABSTRACT).unwrap();
        let circle = p.add_type("G", "Circle", None, TypeFlags::empty()).unwrap();
        let square = p.add_type("G", "Square", None, TypeFlags::empty()).unwrap();
        let ring = p.add_type("G", "Ring", None, TypeFlags::empty()).unwrap();
        let iface = p.add_type("G", "IMeasured", None, TypeFlags::INTERFACE).unwrap();
        p.set_base(circle, TypeRef::Named(shape)).unwrap();
        p.set_base(square, TypeRef::Named(shape)).unwrap();
        p.set_base(ring, TypeRef::Named(circle)).unwrap();
        p.add_interface(square, iface).unwrap();

        let shape_area = p
            .add_method(shape, "Area", vec![], TypeRef::Float64, virt | MethodFlags::ABSTRACT)
            .unwrap();
        let measured = p
            .add_method(iface, "Area", vec![], TypeRef::Float64, virt | MethodFlags::ABSTRACT)
            .unwrap();
        let circle_area = p.add_method(circle, "Area", vec![], TypeRef::Float64, virt).unwrap();
        let square_area = p.add_method(square, "Area", vec![], TypeRef::Float64, virt).unwrap();
        let hidden = p
            .add_method(ring, "Area", vec![], TypeRef::Float64, virt | MethodFlags::NEW_SLOT)
            .unwrap();
        // Same name, different signature: not an override.
        p.add_method(
            circle,
            "Area",
            vec![Param::new("scale", TypeRef::Float64)],
            TypeRef::Float64,
            virt,
        )
        .unwrap();
        for m in [circle_area, square_area, hidden] {
            let mut b = BodyBuilder::new();
            b.emit(OpCode::LdcR8);
            b.emit(OpCode::Ret);
            p.set_body(m, b.build().unwrap()).unwrap();
        }
        Shapes {
            program: p,
            shape_area,
            circle_area,
            square_area,
            hidden,
            measured,
        }
    }

    #[test]
    fn implicit_overrides() {
        let s = shapes();
        let g = InheritanceGraph::build(&s.program);
        assert_eq!(g.overriders(s.shape_area), vec![s.circle_area, s.square_area]);
        assert_eq!(g.overridden(s.square_area), vec![s.shape_area, s.measured]);
    }

    #[test]
    fn new_slot_breaks_the_chain() {
        let s = shapes();
        let g = InheritanceGraph::build(&s.program);
        assert!(g.overriders(s.circle_area).is_empty());
        assert!(g.overridden(s.hidden).is_empty());
        assert_eq!(g.family(s.hidden), vec![s.hidden]);
    }

    #[test]
    fn implementations_skip_abstract() {
        let s = shapes();
        let g = InheritanceGraph::build(&s.program);
        assert_eq!(
            g.implementations(s.shape_area),
            vec![s.circle_area, s.square_area]
        );
        assert_eq!(g.implementations(s.measured), vec![s.square_area]);
    }

    #[test]
    fn family_spans_interfaces() {
        let s = shapes();
        let g = InheritanceGraph::build(&s.program);
        let family = vec![s.shape_area, s.measured, s.circle_area, s.square_area];
        let mut sorted = family.clone();
        sorted.sort();
        assert_eq!(g.family(s.circle_area), sorted);
        assert_eq!(g.family(s.measured), sorted);
    }

    #[test]
    fn explicit_override_list() {
        let mut p = Program::new();
        let a = p.add_type("", "A", None, TypeFlags::empty()).unwrap();
        let b = p.add_type("", "B", None, TypeFlags::empty()).unwrap();
        let base = p
            .add_method(a, "Run", vec![], TypeRef::Void, MethodFlags::VIRTUAL)
            .unwrap();
        let renamed = p
            .add_method(b, "A.Run", vec![], TypeRef::Void, MethodFlags::VIRTUAL)
            .unwrap();
        p.method_mut(renamed).unwrap().overrides.push(base);
        let g = InheritanceGraph::build(&p);
        assert_eq!(g.overriders(base), vec![renamed]);
    }
}
