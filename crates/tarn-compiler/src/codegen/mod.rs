//! Bytecode generation
//!
//! One [`ClassGenerator`] per class, constructed fresh each time so no
//! state leaks between classes. Lowering walks the completed AST and
//! emits stack-machine code; closures spawn synthetic inner classes the
//! driver recurses into afterwards.

mod closure;
mod expr;
mod scope;
mod stmt;

pub use scope::ScopeStack;

use rustc_hash::{FxHashMap, FxHashSet};
use tarn_ast::{
    modifiers, ClassId, ClassNode, CompileUnit, ConstructorNode, DelegationKind, MethodNode,
    Parameter, Statement, TypeRef, OBJECT_CLASS,
};
use tarn_bytecode::{
    access, verify_class, BytecodeWriter, ClassFile, ExceptionEntry, FieldDef, MethodDef, Opcode,
};

use crate::classpath::ClassPath;
use crate::error::{CompileError, Result};

/// What the lowering of an expression left on the operand stack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ValueKind {
    /// A boxed object reference
    Object,
    /// A bare boolean, branch-friendly; must be boxed before it is used
    /// as an object
    Boolean,
}

/// Loop-like contexts break/continue can target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LoopKind {
    Loop,
    Switch,
    /// A labeled non-loop statement: break-only target
    Block,
}

pub(crate) struct LoopContext {
    pub label: Option<String>,
    pub kind: LoopKind,
    pub break_patches: Vec<usize>,
    /// Backward continue target when the loop header precedes the body
    pub continue_target: Option<usize>,
    /// Forward continue patches when the continue point follows the body
    pub continue_patches: Vec<usize>,
    pub finally_depth: usize,
}

/// A pending finally obligation that break/continue/return must replay
/// before leaving its region
pub(crate) enum FinallyEntry {
    Block(Statement),
    /// Monitor-exit obligation of a synchronized block; the slot holds
    /// the monitor object
    Monitor(u16),
}

struct Trampoline {
    target_class: String,
    target_method: String,
    argc: u8,
    is_void: bool,
}

/// Output of generating one class
pub struct GeneratedClass {
    /// The class node with all generation-time synthetic members added;
    /// replaces the arena entry
    pub class: ClassNode,
    pub file: ClassFile,
    /// Synthetic inner classes (closures) for the driver to append and
    /// recurse into
    pub inner: Vec<ClassNode>,
}

pub struct ClassGenerator<'a> {
    unit: &'a CompileUnit,
    classpath: &'a dyn ClassPath,
    class: ClassNode,
    file: ClassFile,

    // Per-body state, reset by begin_body
    pub(crate) code: BytecodeWriter,
    pub(crate) scopes: ScopeStack,
    pub(crate) loops: Vec<LoopContext>,
    pub(crate) finallies: Vec<FinallyEntry>,
    pub(crate) exceptions: Vec<ExceptionEntry>,
    pub(crate) cell_vars: FxHashSet<String>,
    pub(crate) in_static: bool,
    /// Cell-typed fields are installed directly inside constructors and
    /// written through everywhere else
    pub(crate) in_ctor: bool,
    pub(crate) return_type: TypeRef,
    pub(crate) reachable: bool,

    // Class-level synthetic accumulation
    inner: Vec<ClassNode>,
    closure_counter: u32,
    literal_caches: FxHashMap<String, String>,
    trampolines: Vec<(String, Trampoline)>,
}

impl<'a> ClassGenerator<'a> {
    pub fn new(unit: &'a CompileUnit, classpath: &'a dyn ClassPath, class_id: ClassId) -> Self {
        let class = unit.class(class_id).clone();
        let file = ClassFile::new(class.name.clone());
        ClassGenerator {
            unit,
            classpath,
            class,
            file,
            code: BytecodeWriter::new(),
            scopes: ScopeStack::new(),
            loops: Vec::new(),
            finallies: Vec::new(),
            exceptions: Vec::new(),
            cell_vars: FxHashSet::default(),
            in_static: false,
            in_ctor: false,
            return_type: TypeRef::void(),
            reachable: true,
            inner: Vec::new(),
            closure_counter: 0,
            literal_caches: FxHashMap::default(),
            trampolines: Vec::new(),
        }
    }

    /// Generate the binary form of the class, verify it and return it
    /// together with the synthetic inner classes spawned along the way
    pub fn generate(mut self) -> Result<GeneratedClass> {
        self.file.access = self.class.modifiers;
        self.file.super_name = if self.class.name == OBJECT_CLASS {
            None
        } else {
            Some(self.class.super_class_name().to_string())
        };
        self.file.interfaces = self.class.interfaces.clone();
        self.file.generic_signature = self.class.generic_signature.clone();
        self.file.annotations = self
            .class
            .annotations
            .iter()
            .filter(|a| a.runtime_visible)
            .map(|a| a.name.clone())
            .collect();

        let constructors = self.class.constructors.clone();
        for ctor in &constructors {
            let def = self.gen_constructor(ctor)?;
            self.file.methods.push(def);
        }

        let methods = self.class.methods.clone();
        for method in &methods {
            let def = self.gen_method(method)?;
            self.file.methods.push(def);
        }

        self.emit_trampolines();
        self.emit_field_defs();

        self.file.select_version();
        verify_class(&self.file)?;

        Ok(GeneratedClass {
            class: self.class,
            file: self.file,
            inner: self.inner,
        })
    }

    fn gen_method(&mut self, method: &MethodNode) -> Result<MethodDef> {
        let mut access = method.modifiers;
        if method.synthetic {
            access |= access::SYNTHETIC;
        }

        let Some(body) = &method.body else {
            return Ok(MethodDef {
                name: method.name.clone(),
                descriptor: descriptor(&method.params, &method.return_type),
                access: access | access::ABSTRACT,
                max_locals: 0,
                code: Vec::new(),
                exceptions: Vec::new(),
            });
        };

        self.begin_body(method.is_static(), method.return_type.clone(), &method.params, body);
        self.lower_stmt(body)?;
        if self.reachable {
            // Completion normalizes user bodies; this guards synthetic ones
            self.emit_default_return();
        }

        Ok(MethodDef {
            name: method.name.clone(),
            descriptor: descriptor(&method.params, &method.return_type),
            access,
            max_locals: self.scopes.max_locals(),
            code: std::mem::replace(&mut self.code, BytecodeWriter::new()).into_bytes(),
            exceptions: std::mem::take(&mut self.exceptions),
        })
    }

    fn gen_constructor(&mut self, ctor: &ConstructorNode) -> Result<MethodDef> {
        let mut access = ctor.modifiers;
        if ctor.synthetic {
            access |= access::SYNTHETIC;
        }

        self.begin_body(false, TypeRef::void(), &ctor.params, &ctor.body);
        self.in_ctor = true;

        // No explicit delegation means an implicit zero-argument super call
        if ctor.delegation().is_none() && self.class.name != OBJECT_CLASS {
            let super_name = self.class.super_class_name().to_string();
            self.check_ctor_target(&super_name, 0, &ctor.describe())?;
            self.emit_u16_op(Opcode::LoadLocal, 0);
            let owner = self.intern(&super_name);
            self.code.emit(Opcode::CallCtor);
            self.code.emit_u16(owner);
            self.code.emit_u8(0);
        }

        self.lower_stmt(&ctor.body)?;
        if self.reachable {
            self.replay_finallies(0)?;
            self.code.emit(Opcode::Return);
        }

        Ok(MethodDef {
            name: "<init>".to_string(),
            descriptor: descriptor(&ctor.params, &TypeRef::void()),
            access,
            max_locals: self.scopes.max_locals(),
            code: std::mem::replace(&mut self.code, BytecodeWriter::new()).into_bytes(),
            exceptions: std::mem::take(&mut self.exceptions),
        })
    }

    fn begin_body(
        &mut self,
        is_static: bool,
        return_type: TypeRef,
        params: &[Parameter],
        body: &Statement,
    ) {
        self.code = BytecodeWriter::new();
        self.loops.clear();
        self.finallies.clear();
        self.exceptions = Vec::new();
        self.in_static = is_static;
        self.in_ctor = false;
        self.return_type = return_type;
        self.reachable = true;

        let reserved = params.len() as u16 + if is_static { 0 } else { 1 };
        self.scopes.reset(reserved);
        let base = if is_static { 0 } else { 1 };
        for (i, param) in params.iter().enumerate() {
            self.scopes.bind(param.name.clone(), base + i as u16);
        }

        self.cell_vars = closure::collect_cell_vars(body, params);

        // Captured-and-mutated parameters are rewrapped into cells up front
        for (i, param) in params.iter().enumerate() {
            if self.cell_vars.contains(&param.name) {
                let slot = base + i as u16;
                self.emit_u16_op(Opcode::LoadLocal, slot);
                self.code.emit(Opcode::NewCell);
                self.emit_u16_op(Opcode::StoreLocal, slot);
            }
        }
    }

    fn emit_default_return(&mut self) {
        if self.return_type.is_void() {
            self.code.emit(Opcode::Return);
        } else if self.return_type.is_int() {
            self.code.emit(Opcode::ConstI64);
            self.code.emit_i64(0);
            self.code.emit(Opcode::ReturnValue);
        } else if self.return_type.is_float() {
            self.code.emit(Opcode::ConstF64);
            self.code.emit_f64(0.0);
            self.code.emit(Opcode::ReturnValue);
        } else if self.return_type.is_boolean() {
            self.code.emit(Opcode::ConstFalse);
            self.code.emit(Opcode::Box);
            self.code.emit(Opcode::ReturnValue);
        } else {
            self.code.emit(Opcode::ConstNull);
            self.code.emit(Opcode::ReturnValue);
        }
        self.reachable = false;
    }

    // ===== Synthetic class-level members =====

    fn emit_trampolines(&mut self) {
        let pending = std::mem::take(&mut self.trampolines);
        for (name, tramp) in pending {
            let mut writer = BytecodeWriter::new();
            writer.emit(Opcode::LoadLocal);
            writer.emit_u16(0);
            for i in 1..=tramp.argc as u16 {
                writer.emit(Opcode::LoadLocal);
                writer.emit_u16(i);
            }
            let owner = self.file.pool.add(tramp.target_class.as_str());
            let method = self.file.pool.add(tramp.target_method.as_str());
            writer.emit(Opcode::CallSpecial);
            writer.emit_u16(owner);
            writer.emit_u16(method);
            writer.emit_u8(tramp.argc);
            if tramp.is_void {
                writer.emit(Opcode::Pop);
                writer.emit(Opcode::Return);
            } else {
                writer.emit(Opcode::ReturnValue);
            }

            let params: Vec<String> = (0..tramp.argc).map(|_| OBJECT_CLASS.to_string()).collect();
            let return_name = if tramp.is_void { "void" } else { OBJECT_CLASS };
            self.file.methods.push(MethodDef {
                name: name.clone(),
                descriptor: format!("({}){}", params.join(","), return_name),
                access: access::PUBLIC | access::SYNTHETIC,
                max_locals: 1 + tramp.argc as u16,
                code: writer.into_bytes(),
                exceptions: Vec::new(),
            });

            // Record the trampoline on the class node for later phases
            let node_params: Vec<Parameter> = (0..tramp.argc)
                .map(|i| Parameter::new(format!("a{i}"), TypeRef::object()))
                .collect();
            let return_type = if tramp.is_void {
                TypeRef::void()
            } else {
                TypeRef::object()
            };
            self.class.methods.push(
                MethodNode::new(name, return_type)
                    .with_params(node_params)
                    .synthetic(),
            );
        }
    }

    fn emit_field_defs(&mut self) {
        for field in &self.class.fields {
            let mut field_access = field.modifiers;
            if field.synthetic {
                field_access |= access::SYNTHETIC;
            }
            self.file.fields.push(FieldDef {
                name: field.name.clone(),
                type_name: field.ty.name.clone(),
                access: field_access,
            });
        }
        // Class-literal caches, in first-use order
        let mut caches: Vec<(&String, &String)> = self.literal_caches.iter().collect();
        caches.sort_by_key(|(_, field)| (field.len(), field.as_str()));
        for (_, field_name) in caches {
            self.file.fields.push(FieldDef {
                name: field_name.clone(),
                type_name: tarn_ast::CLASS_CLASS.to_string(),
                access: access::PRIVATE | access::STATIC | access::SYNTHETIC,
            });
            self.class.fields.push(
                tarn_ast::FieldNode::new(field_name.clone(), TypeRef::class_type())
                    .with_modifiers(modifiers::PRIVATE | modifiers::STATIC)
                    .synthetic(),
            );
        }
    }

    // ===== Shared lowering helpers =====

    pub(crate) fn intern(&mut self, s: &str) -> u16 {
        self.file.pool.add(s)
    }

    pub(crate) fn emit_u16_op(&mut self, op: Opcode, operand: u16) {
        self.code.emit(op);
        self.code.emit_u16(operand);
    }

    /// Emit a forward branch with a placeholder offset; returns the patch
    /// position
    pub(crate) fn jump(&mut self, op: Opcode) -> usize {
        self.code.emit(op);
        let at = self.code.offset();
        self.code.emit_i16(0);
        at
    }

    /// Patch a forward branch to land at the current offset
    pub(crate) fn patch(&mut self, at: usize) -> Result<()> {
        let rel = self.code.offset() as i64 - (at as i64 + 2);
        self.code.patch_i16(at, Self::branch_offset(rel)?);
        Ok(())
    }

    /// Emit a backward branch to an already-emitted offset
    pub(crate) fn jump_back(&mut self, op: Opcode, target: usize) -> Result<()> {
        self.code.emit(op);
        let rel = target as i64 - (self.code.offset() as i64 + 2);
        let rel = Self::branch_offset(rel)?;
        self.code.emit_i16(rel);
        Ok(())
    }

    /// Branch operands are two bytes; inlined finally bodies can push a
    /// method past that range
    fn branch_offset(rel: i64) -> Result<i16> {
        i16::try_from(rel).map_err(|_| {
            CompileError::user(format!(
                "method too large: branch distance {rel} exceeds {} bytes",
                i16::MAX
            ))
        })
    }

    /// Call arity is a one-byte operand
    pub(crate) fn call_argc(&self, argc: usize) -> Result<u8> {
        u8::try_from(argc).map_err(|_| {
            CompileError::user(format!(
                "call with {argc} arguments exceeds the limit of {}",
                u8::MAX
            ))
        })
    }

    /// Box a bare boolean when an object is required
    pub(crate) fn ensure_object(&mut self, kind: ValueKind) {
        if kind == ValueKind::Boolean {
            self.code.emit(Opcode::Box);
        }
    }

    /// Leave a bare boolean for an upcoming branch
    pub(crate) fn ensure_boolean(&mut self, kind: ValueKind) {
        if kind == ValueKind::Object {
            self.code.emit(Opcode::Unbox);
        }
    }

    /// Replay every pending finally obligation above `depth`, innermost
    /// first, without consuming the stack entries: the same obligation
    /// fires again on other exit paths
    pub(crate) fn replay_finallies(&mut self, depth: usize) -> Result<()> {
        let pending = self.finallies.split_off(depth);
        for entry in pending.iter().rev() {
            match entry {
                FinallyEntry::Block(stmt) => {
                    let stmt = stmt.clone();
                    self.lower_stmt(&stmt)?;
                }
                FinallyEntry::Monitor(slot) => {
                    self.emit_u16_op(Opcode::LoadLocal, *slot);
                    self.code.emit(Opcode::MonitorExit);
                }
            }
        }
        self.finallies.extend(pending);
        Ok(())
    }

    /// Register (or reuse) a trampoline and return its synthetic name
    pub(crate) fn trampoline_for(
        &mut self,
        direction: &str,
        hops: u32,
        target_class: &str,
        target_method: &str,
        argc: u8,
        is_void: bool,
    ) -> String {
        let name = format!("tramp${direction}${hops}${target_method}");
        if !self.trampolines.iter().any(|(n, _)| *n == name) {
            self.trampolines.push((
                name.clone(),
                Trampoline {
                    target_class: target_class.to_string(),
                    target_method: target_method.to_string(),
                    argc,
                    is_void,
                },
            ));
        }
        name
    }

    /// Per-literal static cache field name
    pub(crate) fn literal_cache_field(&mut self, literal: &str) -> String {
        let next = format!("$class${}", self.literal_caches.len());
        self.literal_caches
            .entry(literal.to_string())
            .or_insert(next)
            .clone()
    }

    pub(crate) fn next_closure_name(&mut self) -> String {
        let name = format!("{}$_closure{}", self.class.name, self.closure_counter);
        self.closure_counter += 1;
        name
    }

    pub(crate) fn add_inner_class(&mut self, class: ClassNode) {
        self.inner.push(class);
    }

    pub(crate) fn class_node(&self) -> &ClassNode {
        &self.class
    }

    pub(crate) fn unit(&self) -> &'a CompileUnit {
        self.unit
    }

    pub(crate) fn classpath(&self) -> &'a dyn ClassPath {
        self.classpath
    }

    /// Check a constructor-delegation target exists, by arity
    pub(crate) fn check_ctor_target(
        &self,
        class_name: &str,
        argc: usize,
        caller: &str,
    ) -> Result<()> {
        if let Some(id) = self.unit.find_class(class_name) {
            if self.unit.class(id).declares_constructor(argc) {
                return Ok(());
            }
            return Err(CompileError::user(format!(
                "{caller}: no constructor of {class_name} takes {argc} argument(s)"
            )));
        }
        if self.classpath.contains(class_name) {
            // External shape is opaque; the loader checks at link time
            return Ok(());
        }
        Err(CompileError::MissingClass {
            name: class_name.to_string(),
            referenced_by: caller.to_string(),
        })
    }

    /// Arity-based resolution of an explicit delegation, shared by the
    /// `this(...)` and `super(...)` statements
    pub(crate) fn delegation_target(&self, kind: DelegationKind, argc: usize) -> Result<String> {
        let target = match kind {
            DelegationKind::This => self.class.name.clone(),
            DelegationKind::Super => self.class.super_class_name().to_string(),
        };
        self.check_ctor_target(&target, argc, &format!("constructor of {}", self.class.name))?;
        Ok(target)
    }
}

/// Textual method descriptor: "(T1,T2)Ret"
pub(crate) fn descriptor(params: &[Parameter], return_type: &TypeRef) -> String {
    let types: Vec<&str> = params.iter().map(|p| p.ty.name.as_str()).collect();
    format!("({}){}", types.join(","), return_type.name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classpath::BootClasspath;
    use crate::completion::CompletionVisitor;
    use crate::diagnostics::ErrorCollector;
    use tarn_ast::{Expression, FieldNode, StmtKind};

    /// Complete and generate one class, panicking on any failure
    pub(crate) fn generate(unit: &mut CompileUnit, id: ClassId) -> GeneratedClass {
        let cp = BootClasspath::new();
        let mut collector = ErrorCollector::new();
        collector.set_unit("test");
        CompletionVisitor::complete(unit, id, &cp, &mut collector).unwrap();
        assert!(!collector.has_errors(), "{:?}", collector.diagnostics());
        ClassGenerator::new(unit, &cp, id).generate().unwrap()
    }

    #[test]
    fn test_empty_class_generates_and_verifies() {
        let mut unit = CompileUnit::new();
        let id = unit.add_class(ClassNode::new("demo.Empty"));
        let generated = generate(&mut unit, id);

        assert_eq!(generated.file.name, "demo.Empty");
        assert_eq!(generated.file.super_name.as_deref(), Some(OBJECT_CLASS));
        // Default ctor plus the dynamic-protocol trampolines
        assert!(generated.file.get_method("<init>").is_some());
        assert!(generated.file.get_method("invokeMethod").is_some());
        assert!(generated.inner.is_empty());
    }

    #[test]
    fn test_constructor_emits_implicit_super_call() {
        let mut unit = CompileUnit::new();
        let id = unit.add_class(ClassNode::new("demo.A"));
        let generated = generate(&mut unit, id);
        let init = generated.file.get_method("<init>").unwrap();
        assert_eq!(init.code[0], Opcode::LoadLocal as u8);
        assert_eq!(init.code[3], Opcode::CallCtor as u8);
        assert_eq!(*init.code.last().unwrap(), Opcode::Return as u8);
    }

    #[test]
    fn test_method_descriptor() {
        let params = vec![
            Parameter::new("a", TypeRef::int()),
            Parameter::new("b", TypeRef::object()),
        ];
        assert_eq!(
            descriptor(&params, &TypeRef::void()),
            "(int,tarn.lang.Object)void"
        );
        assert_eq!(descriptor(&[], &TypeRef::int()), "()int");
    }

    #[test]
    fn test_field_defs_emitted() {
        let mut unit = CompileUnit::new();
        let mut class = ClassNode::new("demo.A");
        class
            .add_field(FieldNode::new("x", TypeRef::int()))
            .unwrap();
        let id = unit.add_class(class);
        let generated = generate(&mut unit, id);
        assert!(generated.file.fields.iter().any(|f| f.name == "x"));
        // The synthetic $meta handle field is present too
        assert!(generated.file.fields.iter().any(|f| f.name == "$meta"));
    }

    #[test]
    fn test_abstract_method_has_no_code() {
        let mut unit = CompileUnit::new();
        let mut class =
            ClassNode::new("demo.A").with_modifiers(modifiers::PUBLIC | modifiers::ABSTRACT);
        class
            .add_method(
                MethodNode::new("pending", TypeRef::object())
                    .with_modifiers(modifiers::PUBLIC | modifiers::ABSTRACT),
            )
            .unwrap();
        let id = unit.add_class(class);
        let generated = generate(&mut unit, id);
        let m = generated.file.get_method("pending").unwrap();
        assert!(m.code.is_empty());
        assert!(m.is_abstract());
    }

    /// Complete and generate, returning the error instead of panicking
    fn try_generate(unit: &mut CompileUnit, id: ClassId) -> Result<GeneratedClass> {
        let cp = BootClasspath::new();
        let mut collector = ErrorCollector::new();
        collector.set_unit("test");
        CompletionVisitor::complete(unit, id, &cp, &mut collector)?;
        ClassGenerator::new(unit, &cp, id).generate()
    }

    #[test]
    fn test_call_arity_capped_at_one_byte() {
        let call_with = |n: usize| {
            let mut unit = CompileUnit::new();
            let mut class = ClassNode::new("demo.A");
            class
                .add_method(MethodNode::new("run", TypeRef::void()).with_body(
                    Statement::expr(Expression::MethodCall {
                        receiver: Expression::This.boxed(),
                        name: "wide".to_string(),
                        args: vec![Expression::NullLit; n],
                        is_super: false,
                    }),
                ))
                .unwrap();
            let id = unit.add_class(class);
            try_generate(&mut unit, id)
        };
        assert!(call_with(255).is_ok());
        assert!(matches!(call_with(256), Err(CompileError::User(_))));
    }

    #[test]
    fn test_oversized_branch_rejected() {
        // 10 bytes per discarded literal; enough to push the loop's exit
        // branch past the signed 16-bit operand
        let filler: Vec<Statement> = (0..3300)
            .map(|_| Statement::expr(Expression::IntLit(7)))
            .collect();
        let body = Statement::new(StmtKind::While {
            cond: Expression::BoolLit(true),
            body: Box::new(Statement::block(filler)),
        });
        let mut unit = CompileUnit::new();
        let mut class = ClassNode::new("demo.A");
        class
            .add_method(
                MethodNode::new("run", TypeRef::void()).with_body(Statement::block(vec![body])),
            )
            .unwrap();
        let id = unit.add_class(class);
        let result = try_generate(&mut unit, id);
        assert!(matches!(result, Err(CompileError::User(_))));
    }

    #[test]
    fn test_class_literal_memoized_per_name() {
        let mut unit = CompileUnit::new();
        unit.add_class(ClassNode::new("demo.Other"));
        let mut class = ClassNode::new("demo.A");
        class
            .add_method(
                MethodNode::new("twice", TypeRef::object()).with_body(Statement::block(vec![
                    Statement::new(StmtKind::VarDecl {
                        name: "a".to_string(),
                        ty: TypeRef::class_type(),
                        init: Some(Expression::ClassLiteral("demo.Other".to_string())),
                    }),
                    Statement::ret(Some(Expression::ClassLiteral("demo.Other".to_string()))),
                ])),
            )
            .unwrap();
        let id = unit.add_class(class);
        let generated = generate(&mut unit, id);

        // Same literal twice: exactly one cache field
        let caches: Vec<_> = generated
            .file
            .fields
            .iter()
            .filter(|f| f.name.starts_with("$class$"))
            .collect();
        assert_eq!(caches.len(), 1);
        assert_eq!(caches[0].type_name, tarn_ast::CLASS_CLASS);
    }
}
