//! Closure and capture rewriting.
//!
//! A callable built from a function pointer loses any extra argument the
//! target gained: the delegate's invoke signature stays the same. Four idioms
//! are handled:
//!
//! 1. Capture-free static targets: a [`CaptureRecord`] stores the root and
//!    its trampoline forwards to the replacement.
//! 2. Callables cached in a static field of a closure singleton: the cache is
//!    removed, then the construction is handled as 1 or 3.
//! 3. Instance targets: the record stores the receiver and the root.
//! 4. Display classes: the display class itself gains a root field (see
//!    [`display`]).
//!
//! Targets converted onto a context type need no record; the context instance
//! becomes the callable's target object.

mod display;
mod idioms;
mod records;

use std::collections::BTreeMap;

use rustc_hash::{FxHashMap, FxHashSet};

use contextify_core::{FieldId, MethodId, ModelError, Program, TypeClone, TypeId, TypeRef};

pub use display::DISPLAY_ROOT_FIELD;
pub use records::{CaptureRecord, CapturedValue, RecordKey, RECORD_MARKER};

pub(crate) use records::fresh_body;

use crate::handle::HandleSource;

/// The method whose body is being rewritten and how it reaches its handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RewriteSite {
    pub method: MethodId,
    pub handle: HandleSource,
}

/// Result of rewriting one capture site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureOutcome {
    Rewritten,
    /// Left as is; only possible when unrecognized shapes are tolerated.
    Skipped,
}

/// Synthesized records, display-class root fields and relocated display
/// classes of one run.
#[derive(Debug)]
pub struct ClosureRewriter {
    root: TypeId,
    strict: bool,
    records: BTreeMap<RecordKey, CaptureRecord>,
    record_types: FxHashSet<TypeId>,
    display_roots: FxHashMap<TypeId, FieldId>,
    /// (display class, context type) -> copy.
    relocated: BTreeMap<(TypeId, TypeId), TypeClone>,
    skipped: usize,
}

impl ClosureRewriter {
    /// Pick up records and display-class root fields left by an earlier run.
    pub fn new(program: &Program, root: TypeId, strict: bool) -> Self {
        let mut record_types = FxHashSet::default();
        let mut display_roots = FxHashMap::default();
        for ty in program.types() {
            if CaptureRecord::is_record_name(&ty.name) {
                record_types.insert(ty.id);
            }
            if ty.is_display_class() {
                let existing = ty.fields.iter().copied().find(|f| {
                    program.field(*f).is_ok_and(|def| {
                        def.name == DISPLAY_ROOT_FIELD && def.ty == TypeRef::Named(root)
                    })
                });
                if let Some(field) = existing {
                    display_roots.insert(ty.id, field);
                }
            }
        }
        Self {
            root,
            strict,
            records: BTreeMap::new(),
            record_types,
            display_roots,
            relocated: BTreeMap::new(),
            skipped: 0,
        }
    }

    /// Record for `key`, synthesizing it on first use.
    pub(crate) fn record(&mut self, program: &mut Program, key: RecordKey) -> Result<&mut CaptureRecord, ModelError> {
        if !self.records.contains_key(&key) {
            let record = CaptureRecord::synthesize(program, self.root, key)?;
            self.record_types.insert(record.ty);
            self.records.insert(key, record);
        }
        self.records
            .get_mut(&key)
            .ok_or(ModelError::UnknownMethod { id: key.enclosing })
    }

    /// Whether `ty` is a synthesized capture record.
    pub fn is_record_type(&self, ty: TypeId) -> bool {
        self.record_types.contains(&ty)
    }

    /// Records synthesized in this run, in key order.
    pub fn records(&self) -> impl Iterator<Item = &CaptureRecord> {
        self.records.values()
    }

    pub fn into_records(self) -> Vec<CaptureRecord> {
        self.records.into_values().collect()
    }

    /// Capture sites left unrewritten.
    pub fn skipped(&self) -> usize {
        self.skipped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contextify_analysis::StackAnalyzer;
    use contextify_core::{
        BindingError, BodyBuilder, ContextifyError, FieldFlags, InstrId, MethodFlags, MethodShape,
        OpCode, Param, TypeFlags,
    };

    use crate::binding::{Binding, BindingMode};
    use crate::plan::{ContextDescriptor, ContextPlan};

    struct World {
        program: Program,
        plan: ContextPlan,
        root: TypeId,
        action_ctor: MethodId,
        invoke: MethodId,
        helper: MethodId,
        helper_bound: MethodId,
        helper_converted: MethodId,
        tick: MethodId,
        tick_bound: MethodId,
        widget: TypeId,
        slot: FieldId,
    }

    /// Root, a static holder `H` converted to `H_Context`, a utility type
    /// with a static `Helper`, a `Widget` with an instance `Tick`, and an
    /// `Action` delegate.
    fn world() -> World {
        let mut p = Program::new();
        let root = p.add_type("G", "Root", None, TypeFlags::empty()).unwrap();
        let root_ctor = p
            .add_method(root, ".ctor", vec![], TypeRef::Void, MethodFlags::CONSTRUCTOR)
            .unwrap();
        let action = p.add_type("G", "Action", None, TypeFlags::DELEGATE).unwrap();
        let action_ctor = p
            .add_method(
                action,
                ".ctor",
                vec![Param::new("object", TypeRef::Object), Param::new("method", TypeRef::NativeInt)],
                TypeRef::Void,
                MethodFlags::CONSTRUCTOR,
            )
            .unwrap();
        let invoke = p
            .add_method(action, "Invoke", vec![], TypeRef::Void, MethodFlags::VIRTUAL)
            .unwrap();

        let holder = p.add_type("G", "H", None, TypeFlags::STATIC).unwrap();
        let generated = p.add_type("G", "H_Context", None, TypeFlags::empty()).unwrap();
        let h_ctor = p
            .add_method(generated, ".ctor", vec![], TypeRef::Void, MethodFlags::CONSTRUCTOR)
            .unwrap();
        let slot = p
            .add_field(root, "H_field", TypeRef::Named(generated), FieldFlags::empty())
            .unwrap();
        let helper = p
            .add_method(holder, "Helper", vec![], TypeRef::Void, MethodFlags::STATIC)
            .unwrap();
        let helper_converted = p
            .clone_method(helper, generated, "Helper", MethodShape::instance())
            .unwrap();
        let helper_bound = p
            .clone_method(
                helper,
                holder,
                "Helper",
                MethodShape::leading(Param::new("context", TypeRef::Named(root))),
            )
            .unwrap();

        let widget = p.add_type("G", "Widget", None, TypeFlags::empty()).unwrap();
        let tick = p
            .add_method(widget, "Tick", vec![], TypeRef::Void, MethodFlags::empty())
            .unwrap();
        let tick_bound = p
            .clone_method(
                tick,
                widget,
                "Tick",
                MethodShape::leading(Param::new("context", TypeRef::Named(root))),
            )
            .unwrap();

        let mut plan = ContextPlan::new(root, root_ctor);
        plan.add_context(ContextDescriptor::new("H", holder, generated, h_ctor).with_chain(vec![slot]));

        World {
            program: p,
            plan,
            root,
            action_ctor,
            invoke,
            helper,
            helper_bound,
            helper_converted,
            tick,
            tick_bound,
            widget,
            slot,
        }
    }

    /// Static `Run(Root context, Widget w)` on `Util` built by `build`.
    fn run_method(w: &mut World, build: impl FnOnce(&mut BodyBuilder, &World) -> InstrId) -> (MethodId, InstrId) {
        let util = match w.program.find_type("G.Util") {
            Some(t) => t,
            None => w.program.add_type("G", "Util", None, TypeFlags::STATIC).unwrap(),
        };
        let name = format!("Run{}", w.program.methods().count());
        let run = w
            .program
            .add_method(
                util,
                &name,
                vec![
                    Param::new("context", TypeRef::Named(w.root)),
                    Param::new("w", TypeRef::Named(w.widget)),
                ],
                TypeRef::Void,
                MethodFlags::STATIC,
            )
            .unwrap();
        let mut b = BodyBuilder::new();
        let ldftn = build(&mut b, &*w);
        w.program.set_body(run, b.build().unwrap()).unwrap();
        (run, ldftn)
    }

    fn site(method: MethodId) -> RewriteSite {
        RewriteSite {
            method,
            handle: HandleSource::Parameter(0),
        }
    }

    fn added(original: MethodId, replacement: MethodId) -> Binding {
        Binding {
            original,
            replacement,
            mode: BindingMode::AddedParameter,
        }
    }

    #[test]
    fn capture_free_static_target_gets_record() {
        let mut w = world();
        let (run, ldftn) = run_method(&mut w, |b, w| {
            b.emit(OpCode::LdNull);
            let ldftn = b.emit_method(OpCode::LdFtn, w.helper);
            b.emit_method(OpCode::NewObj, w.action_ctor);
            b.emit_method(OpCode::CallVirt, w.invoke);
            b.emit(OpCode::Ret);
            ldftn
        });
        let mut closures = ClosureRewriter::new(&w.program, w.root, true);
        let mut analyzer = StackAnalyzer::new();
        let outcome = closures
            .rewrite_capture(
                &mut w.program,
                &mut analyzer,
                &w.plan,
                site(run),
                ldftn,
                added(w.helper, w.helper_bound),
            )
            .unwrap();
        assert_eq!(outcome, CaptureOutcome::Rewritten);

        let body = w.program.body(run).unwrap();
        body.assert_opcodes(&[
            OpCode::LdNull,
            OpCode::Pop,
            OpCode::LdArg,
            OpCode::NewObj,
            OpCode::LdFtn,
            OpCode::NewObj,
            OpCode::CallVirt,
            OpCode::Ret,
        ]);
        let record = closures.records().next().unwrap();
        assert_eq!(record.captured, vec![CapturedValue::ContextHandle]);
        let forward = record.trampolines[&w.helper_bound];
        assert_eq!(body.get(ldftn).unwrap().method_operand(), Some(forward));
        assert!(record.rewritten.contains(&run));
        assert!(closures.is_record_type(record.ty));
    }

    #[test]
    fn cached_callable_is_expanded() {
        let mut w = world();
        let cache_owner = w
            .program
            .add_type("G", "<>c", None, TypeFlags::CLOSURE_SINGLETON)
            .unwrap();
        let action = w.program.method(w.action_ctor).unwrap().owner;
        let cache = w
            .program
            .add_field(cache_owner, "<>9__0_0", TypeRef::Named(action), FieldFlags::STATIC)
            .unwrap();
        let (run, ldftn) = run_method(&mut w, |b, w| {
            let resume = b.label();
            b.emit_field(OpCode::LdSFld, cache);
            b.emit(OpCode::Dup);
            b.emit_branch(OpCode::BrTrue, resume);
            b.emit(OpCode::Pop);
            b.emit(OpCode::LdNull);
            let ldftn = b.emit_method(OpCode::LdFtn, w.helper);
            b.emit_method(OpCode::NewObj, w.action_ctor);
            b.emit(OpCode::Dup);
            b.emit_field(OpCode::StSFld, cache);
            b.mark(resume);
            b.emit_method(OpCode::CallVirt, w.invoke);
            b.emit(OpCode::Ret);
            ldftn
        });
        let mut closures = ClosureRewriter::new(&w.program, w.root, true);
        let mut analyzer = StackAnalyzer::new();
        closures
            .rewrite_capture(
                &mut w.program,
                &mut analyzer,
                &w.plan,
                site(run),
                ldftn,
                added(w.helper, w.helper_bound),
            )
            .unwrap();
        w.program.body(run).unwrap().assert_opcodes(&[
            OpCode::LdNull,
            OpCode::Pop,
            OpCode::LdArg,
            OpCode::NewObj,
            OpCode::LdFtn,
            OpCode::NewObj,
            OpCode::CallVirt,
            OpCode::Ret,
        ]);
    }

    #[test]
    fn instance_target_captures_receiver() {
        let mut w = world();
        let (run, ldftn) = run_method(&mut w, |b, w| {
            b.emit_arg(OpCode::LdArg, 1);
            let ldftn = b.emit_method(OpCode::LdFtn, w.tick);
            b.emit_method(OpCode::NewObj, w.action_ctor);
            b.emit_method(OpCode::CallVirt, w.invoke);
            b.emit(OpCode::Ret);
            ldftn
        });
        let mut closures = ClosureRewriter::new(&w.program, w.root, true);
        let mut analyzer = StackAnalyzer::new();
        closures
            .rewrite_capture(
                &mut w.program,
                &mut analyzer,
                &w.plan,
                site(run),
                ldftn,
                added(w.tick, w.tick_bound),
            )
            .unwrap();
        w.program.body(run).unwrap().assert_opcodes(&[
            OpCode::LdArg,
            OpCode::LdArg,
            OpCode::NewObj,
            OpCode::LdFtn,
            OpCode::NewObj,
            OpCode::CallVirt,
            OpCode::Ret,
        ]);
        let record = closures.records().next().unwrap();
        assert_eq!(
            record.captured,
            vec![CapturedValue::Receiver(w.widget), CapturedValue::ContextHandle]
        );
    }

    #[test]
    fn converted_target_binds_context_instance() {
        let mut w = world();
        let (run, ldftn) = run_method(&mut w, |b, w| {
            b.emit(OpCode::LdNull);
            let ldftn = b.emit_method(OpCode::LdFtn, w.helper);
            b.emit_method(OpCode::NewObj, w.action_ctor);
            b.emit_method(OpCode::CallVirt, w.invoke);
            b.emit(OpCode::Ret);
            ldftn
        });
        let context = w.plan.contexts().next().unwrap().0;
        let mut closures = ClosureRewriter::new(&w.program, w.root, true);
        let mut analyzer = StackAnalyzer::new();
        closures
            .rewrite_capture(
                &mut w.program,
                &mut analyzer,
                &w.plan,
                site(run),
                ldftn,
                Binding {
                    original: w.helper,
                    replacement: w.helper_converted,
                    mode: BindingMode::InstanceConverted(context),
                },
            )
            .unwrap();
        let body = w.program.body(run).unwrap();
        body.assert_opcodes(&[
            OpCode::LdNull,
            OpCode::Pop,
            OpCode::LdArg,
            OpCode::LdFld,
            OpCode::LdFtn,
            OpCode::NewObj,
            OpCode::CallVirt,
            OpCode::Ret,
        ]);
        assert!(body
            .instructions()
            .iter()
            .any(|i| i.opcode == OpCode::LdFld && i.field_operand() == Some(w.slot)));
        assert_eq!(body.get(ldftn).unwrap().method_operand(), Some(w.helper_converted));
        assert_eq!(closures.records().count(), 0);
    }

    #[test]
    fn stray_function_pointer() {
        let build = |b: &mut BodyBuilder, w: &World| {
            let ldftn = b.emit_method(OpCode::LdFtn, w.helper);
            b.emit(OpCode::Pop);
            b.emit(OpCode::Ret);
            ldftn
        };

        let mut w = world();
        let (run, ldftn) = run_method(&mut w, build);
        let mut strict = ClosureRewriter::new(&w.program, w.root, true);
        let mut analyzer = StackAnalyzer::new();
        let err = strict
            .rewrite_capture(
                &mut w.program,
                &mut analyzer,
                &w.plan,
                site(run),
                ldftn,
                added(w.helper, w.helper_bound),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            ContextifyError::Binding(BindingError::UnrecognizedCallable { .. })
        ));

        let mut lenient = ClosureRewriter::new(&w.program, w.root, false);
        let outcome = lenient
            .rewrite_capture(
                &mut w.program,
                &mut analyzer,
                &w.plan,
                site(run),
                ldftn,
                added(w.helper, w.helper_bound),
            )
            .unwrap();
        assert_eq!(outcome, CaptureOutcome::Skipped);
        assert_eq!(lenient.skipped(), 1);
    }
}
