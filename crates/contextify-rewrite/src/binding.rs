//! Binding map: original methods and their context-bound replacements.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use contextify_core::{BindingError, MethodId, Program};

use crate::plan::ContextId;

/// How a method reaches its context handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BindingMode {
    Unbound,
    /// Moved onto a context type as an instance member.
    InstanceConverted(ContextId),
    /// Gained a leading root-handle parameter.
    AddedParameter,
}

impl fmt::Display for BindingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindingMode::Unbound => f.write_str("unbound"),
            BindingMode::InstanceConverted(context) => write!(f, "instance-converted into {context}"),
            BindingMode::AddedParameter => f.write_str("added-parameter"),
        }
    }
}

/// One original -> replacement pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Binding {
    pub original: MethodId,
    pub replacement: MethodId,
    pub mode: BindingMode,
}

/// Grows monotonically; each original is bound at most once.
#[derive(Debug, Clone, Default)]
pub struct BindingMap {
    bindings: BTreeMap<MethodId, Binding>,
    replacements: BTreeSet<MethodId>,
}

impl BindingMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `original -> replacement`.
    ///
    /// Binding the same pair again with the same mode is a no-op; anything
    /// else for an already-bound original is fatal.
    pub fn bind(
        &mut self,
        program: &Program,
        original: MethodId,
        replacement: MethodId,
        mode: BindingMode,
    ) -> Result<(), BindingError> {
        if let Some(existing) = self.bindings.get(&original) {
            if existing.replacement == replacement && existing.mode == mode {
                return Ok(());
            }
            return Err(BindingError::AlreadyBound {
                method: program.identity(original),
                existing: program.identity(existing.replacement),
            });
        }
        self.bindings.insert(
            original,
            Binding {
                original,
                replacement,
                mode,
            },
        );
        self.replacements.insert(replacement);
        Ok(())
    }

    pub fn get(&self, original: MethodId) -> Option<&Binding> {
        self.bindings.get(&original)
    }

    pub fn replacement(&self, original: MethodId) -> Option<MethodId> {
        self.bindings.get(&original).map(|b| b.replacement)
    }

    pub fn mode(&self, method: MethodId) -> BindingMode {
        self.bindings
            .get(&method)
            .map_or(BindingMode::Unbound, |b| b.mode)
    }

    pub fn is_bound(&self, method: MethodId) -> bool {
        self.bindings.contains_key(&method)
    }

    pub fn is_replacement(&self, method: MethodId) -> bool {
        self.replacements.contains(&method)
    }

    /// The binding whose replacement is `replacement`.
    pub fn original_of(&self, replacement: MethodId) -> Option<&Binding> {
        if !self.replacements.contains(&replacement) {
            return None;
        }
        self.bindings.values().find(|b| b.replacement == replacement)
    }

    /// Bindings in original-id order.
    pub fn iter(&self) -> impl Iterator<Item = &Binding> {
        self.bindings.values()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contextify_core::{MethodFlags, TypeFlags, TypeRef};

    fn two_methods() -> (Program, MethodId, MethodId, MethodId) {
        let mut p = Program::new();
        let t = p.add_type("G", "T", None, TypeFlags::empty()).unwrap();
        let a = p.add_method(t, "A", vec![], TypeRef::Void, MethodFlags::STATIC).unwrap();
        let b = p.add_method(t, "B", vec![], TypeRef::Void, MethodFlags::STATIC).unwrap();
        let c = p.add_method(t, "C", vec![], TypeRef::Void, MethodFlags::STATIC).unwrap();
        (p, a, b, c)
    }

    #[test]
    fn bind_once() {
        let (p, a, b, _) = two_methods();
        let mut map = BindingMap::new();
        map.bind(&p, a, b, BindingMode::AddedParameter).unwrap();
        assert_eq!(map.replacement(a), Some(b));
        assert_eq!(map.mode(a), BindingMode::AddedParameter);
        assert_eq!(map.mode(b), BindingMode::Unbound);
        assert!(map.is_replacement(b));
        assert_eq!(map.original_of(b).map(|x| x.original), Some(a));
    }

    #[test]
    fn same_binding_twice_is_noop() {
        let (p, a, b, _) = two_methods();
        let mut map = BindingMap::new();
        map.bind(&p, a, b, BindingMode::AddedParameter).unwrap();
        map.bind(&p, a, b, BindingMode::AddedParameter).unwrap();
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn rebinding_is_fatal() {
        let (p, a, b, c) = two_methods();
        let mut map = BindingMap::new();
        map.bind(&p, a, b, BindingMode::AddedParameter).unwrap();
        let err = map
            .bind(&p, a, c, BindingMode::InstanceConverted(ContextId(0)))
            .unwrap_err();
        assert_eq!(
            err,
            BindingError::AlreadyBound {
                method: "G.T::A()".into(),
                existing: "G.T::B()".into(),
            }
        );
    }
}
