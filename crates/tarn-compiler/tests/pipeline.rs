//! End-to-end pipeline tests: class nodes in, verified binary class
//! definitions out.

use std::cell::RefCell;
use std::rc::Rc;

use tarn_ast::{
    ClassNode, Expression, MethodNode, ModuleNode, Parameter, Statement, StmtKind, TypeRef,
};
use tarn_bytecode::{verify_class, ClassFile, ClassFileError, Opcode};
use tarn_compiler::{
    CompilationDriver, CompileError, GeneratedUnitCallback, ParsedUnit, Phase,
};

/// Captures every generated definition as raw bytes
#[derive(Clone, Default)]
struct Capture {
    files: Rc<RefCell<Vec<(String, Vec<u8>)>>>,
}

impl GeneratedUnitCallback for Capture {
    fn generated(&mut self, class: &ClassNode, file: &ClassFile) {
        self.files
            .borrow_mut()
            .push((class.name.clone(), file.encode()));
    }
}

fn compile_classes(classes: Vec<ClassNode>) -> (CompilationDriver, Capture) {
    let mut driver = CompilationDriver::new();
    let capture = Capture::default();
    driver.add_callback(Box::new(capture.clone()));
    driver.add_parsed(
        "test.tarn",
        ParsedUnit {
            module: ModuleNode::new("demo", "test.tarn"),
            classes,
        },
    );
    driver.compile(Phase::Output).expect("compilation failed");
    (driver, capture)
}

fn decode(capture: &Capture, name: &str) -> ClassFile {
    let files = capture.files.borrow();
    let (_, bytes) = files
        .iter()
        .find(|(n, _)| n == name)
        .unwrap_or_else(|| panic!("no generated class named {name}"));
    ClassFile::decode(bytes).expect("generated bytes must decode")
}

#[test]
fn test_default_arguments_expand_to_overloads() {
    let mut class = ClassNode::new("demo.Greeter");
    class
        .add_method(
            MethodNode::new("greet", TypeRef::object())
                .with_params(vec![
                    Parameter::new("name", TypeRef::object()),
                    Parameter::new("prefix", TypeRef::object())
                        .with_default(Expression::StringLit("Hello".to_string())),
                    Parameter::new("suffix", TypeRef::object())
                        .with_default(Expression::StringLit("!".to_string())),
                ])
                .with_body(Statement::ret(Some(Expression::Var("name".to_string())))),
        )
        .unwrap();

    let (_, capture) = compile_classes(vec![class]);
    let file = decode(&capture, "demo.Greeter");
    let arities: Vec<usize> = file
        .methods_named("greet")
        .iter()
        .map(|m| m.descriptor.matches("tarn.lang.Object").count() - 1)
        .collect();
    assert_eq!(file.methods_named("greet").len(), 3);
    assert!(arities.contains(&3) && arities.contains(&2) && arities.contains(&1));
}

#[test]
fn test_covariant_override_gets_a_bridge() {
    let mut base = ClassNode::new("demo.Base");
    base.add_method(
        MethodNode::new("create", TypeRef::object())
            .with_body(Statement::ret(Some(Expression::NullLit))),
    )
    .unwrap();
    let mut sub = ClassNode::new("demo.Sub").with_super("demo.Base");
    sub.add_method(
        MethodNode::new("create", TypeRef::new("demo.Sub"))
            .with_body(Statement::ret(Some(Expression::NullLit))),
    )
    .unwrap();

    let (driver, capture) = compile_classes(vec![base, sub]);
    // The synthesized bridge must not trip the duplicate-signature check
    assert!(driver.collector().diagnostics().is_empty());

    let file = decode(&capture, "demo.Sub");
    // The declared override plus the object-returning bridge
    assert_eq!(file.methods_named("create").len(), 2);
    assert!(file
        .methods_named("create")
        .iter()
        .any(|m| m.descriptor.ends_with(")tarn.lang.Object")));
}

#[test]
fn test_trailing_expression_becomes_return() {
    let mut class = ClassNode::new("demo.Calc");
    class
        .add_method(
            MethodNode::new("answer", TypeRef::object())
                .with_body(Statement::block(vec![Statement::expr(Expression::IntLit(42))])),
        )
        .unwrap();

    let (_, capture) = compile_classes(vec![class]);
    let file = decode(&capture, "demo.Calc");
    let code = &file.get_method("answer").unwrap().code;
    assert_eq!(*code.last().unwrap(), Opcode::ReturnValue as u8);
}

#[test]
fn test_finally_copied_per_exit_edge() {
    let body = Statement::block(vec![Statement::new(StmtKind::Try {
        body: Box::new(Statement::new(StmtKind::If {
            cond: Expression::Var("flag".to_string()),
            then_branch: Box::new(Statement::ret(Some(Expression::IntLit(1)))),
            else_branch: None,
        })),
        catches: Vec::new(),
        finally: Some(Box::new(Statement::expr(Expression::StringLit(
            "cleanup".to_string(),
        )))),
    })]);
    let mut class = ClassNode::new("demo.Guard");
    class
        .add_method(
            MethodNode::new("run", TypeRef::object())
                .with_params(vec![Parameter::new("flag", TypeRef::object())])
                .with_body(body),
        )
        .unwrap();

    let (_, capture) = compile_classes(vec![class]);
    let file = decode(&capture, "demo.Guard");
    let def = file.get_method("run").unwrap();

    let idx = (0..file.pool.len() as u16)
        .find(|&i| file.pool.get(i) == Some("cleanup"))
        .unwrap();
    let bytes = idx.to_le_bytes();
    let copies = def
        .code
        .windows(3)
        .filter(|w| w[0] == Opcode::ConstStr as u8 && w[1] == bytes[0] && w[2] == bytes[1])
        .count();
    // Early return, normal fall-through, exceptional rethrow
    assert_eq!(copies, 3);
    assert!(def.exceptions.iter().any(|e| e.catch_type.is_none()));
}

#[test]
fn test_mutated_capture_goes_through_cells() {
    let body = Statement::block(vec![
        Statement::new(StmtKind::VarDecl {
            name: "count".to_string(),
            ty: TypeRef::object(),
            init: Some(Expression::IntLit(0)),
        }),
        Statement::ret(Some(Expression::Closure {
            params: vec![],
            body: Box::new(Statement::block(vec![
                Statement::expr(Expression::Assign {
                    target: Expression::Var("count".to_string()).boxed(),
                    value: Expression::IntLit(1).boxed(),
                }),
                Statement::ret(Some(Expression::Var("count".to_string()))),
            ])),
        })),
    ]);
    let mut class = ClassNode::new("demo.Counter");
    class
        .add_method(MethodNode::new("make", TypeRef::object()).with_body(body))
        .unwrap();

    let (driver, capture) = compile_classes(vec![class]);

    // The enclosing body wraps the local in a cell
    let outer = decode(&capture, "demo.Counter");
    let make = outer.get_method("make").unwrap();
    assert!(make.code.contains(&(Opcode::NewCell as u8)));

    // The closure reads and writes through the cell
    let inner = decode(&capture, "demo.Counter$_closure0");
    let do_call = inner.get_method("doCall").unwrap();
    assert!(do_call.code.contains(&(Opcode::CellGet as u8)));
    assert!(do_call.code.contains(&(Opcode::CellSet as u8)));

    // And the inner class is registered on the unit
    assert!(driver
        .compile_unit()
        .find_class("demo.Counter$_closure0")
        .is_some());
}

#[test]
fn test_duplicate_signatures_rejected() {
    let mut class = ClassNode::new("demo.Clash");
    class
        .add_method(
            MethodNode::new("go", TypeRef::object())
                .with_body(Statement::ret(Some(Expression::NullLit))),
        )
        .unwrap();
    class
        .add_method(
            MethodNode::new("go", TypeRef::object())
                .with_body(Statement::ret(Some(Expression::NullLit))),
        )
        .unwrap();

    let mut driver = CompilationDriver::new();
    driver.add_parsed(
        "clash.tarn",
        ParsedUnit {
            module: ModuleNode::new("demo", "clash.tarn"),
            classes: vec![class],
        },
    );
    let err = driver.compile(Phase::ClassGeneration).unwrap_err();
    assert!(matches!(err, CompileError::Failed { .. }));
    assert!(driver
        .collector()
        .diagnostics()
        .iter()
        .any(|d| d.message.contains("duplicate")));
}

#[test]
fn test_generated_bytes_roundtrip_and_verify() {
    let mut class = ClassNode::new("demo.Round");
    class
        .add_method(
            MethodNode::new("ping", TypeRef::object())
                .with_body(Statement::ret(Some(Expression::StringLit("pong".to_string())))),
        )
        .unwrap();

    let (_, capture) = compile_classes(vec![class]);
    let files = capture.files.borrow();
    let (_, bytes) = files.iter().find(|(n, _)| n == "demo.Round").unwrap();

    let decoded = ClassFile::decode(bytes).unwrap();
    assert_eq!(decoded.name, "demo.Round");
    verify_class(&decoded).unwrap();

    // A flipped payload byte must fail the checksum
    let mut corrupt = bytes.clone();
    let last = corrupt.len() - 1;
    corrupt[last] ^= 0xFF;
    assert!(matches!(
        ClassFile::decode(&corrupt),
        Err(ClassFileError::ChecksumMismatch { .. })
    ));
}

#[test]
fn test_output_mirrors_package_tree() {
    let dir = tempfile::tempdir().unwrap();
    let mut driver = CompilationDriver::new().with_target_root(dir.path());
    let mut class = ClassNode::new("demo.deep.Thing");
    class
        .add_method(
            MethodNode::new("make", TypeRef::object()).with_body(Statement::ret(Some(
                Expression::Closure {
                    params: vec![],
                    body: Box::new(Statement::ret(Some(Expression::IntLit(1)))),
                },
            ))),
        )
        .unwrap();
    driver.add_parsed(
        "thing.tarn",
        ParsedUnit {
            module: ModuleNode::new("demo.deep", "thing.tarn"),
            classes: vec![class],
        },
    );
    driver.compile(Phase::Finalization).unwrap();

    assert!(dir.path().join("demo/deep/Thing.tclass").is_file());
    assert!(dir.path().join("demo/deep/Thing$_closure0.tclass").is_file());

    let bytes = std::fs::read(dir.path().join("demo/deep/Thing.tclass")).unwrap();
    verify_class(&ClassFile::decode(&bytes).unwrap()).unwrap();
}
