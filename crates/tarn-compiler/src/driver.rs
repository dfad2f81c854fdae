//! Phase-sequencing compilation driver
//!
//! Sources move through an ordered phase ladder; each unit remembers the
//! phase it has reached, so re-running `compile` after adding units only
//! does the missing work for the old ones. Every unit is attempted in
//! each phase before the batch fails, so one broken source does not hide
//! diagnostics from the rest.

use std::mem;

use tarn_ast::{
    modifiers, ClassId, ClassNode, CompileUnit, MethodNode, ModuleNode, Span, Statement, TypeRef,
};
use tarn_bytecode::ClassFile;

use crate::classpath::BootClasspath;
use crate::codegen::ClassGenerator;
use crate::completion::CompletionVisitor;
use crate::diagnostics::ErrorCollector;
use crate::error::{CompileError, Result};
use crate::output::{ClassFileWriter, GeneratedUnitCallback};
use crate::validate::StructuralValidator;

/// Compilation phases, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Initialization,
    Parsing,
    Conversion,
    ClassGeneration,
    Output,
    Finalization,
}

impl Phase {
    pub const ALL: [Phase; 6] = [
        Phase::Initialization,
        Phase::Parsing,
        Phase::Conversion,
        Phase::ClassGeneration,
        Phase::Output,
        Phase::Finalization,
    ];
}

/// What a front end hands the driver for one source unit: the module
/// header (package, imports, script body) plus the declared classes
pub struct ParsedUnit {
    pub module: ModuleNode,
    pub classes: Vec<ClassNode>,
}

/// Pluggable front end; lexing and parsing are outside this crate
pub trait SourceProvider {
    fn parse(&mut self, unit_name: &str, source: &str) -> Result<ParsedUnit>;
}

/// One source unit moving through the phase ladder
pub struct SourceUnit {
    pub name: String,
    source: Option<String>,
    parsed: Option<ParsedUnit>,
    phase: Phase,
    module_index: usize,
    class_ids: Vec<ClassId>,
}

impl SourceUnit {
    fn from_source(name: String, source: String) -> Self {
        SourceUnit {
            name,
            source: Some(source),
            parsed: None,
            phase: Phase::Initialization,
            module_index: 0,
            class_ids: Vec::new(),
        }
    }

    fn from_parsed(name: String, parsed: ParsedUnit) -> Self {
        SourceUnit {
            name,
            source: None,
            parsed: Some(parsed),
            phase: Phase::Initialization,
            module_index: 0,
            class_ids: Vec::new(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn class_ids(&self) -> &[ClassId] {
        &self.class_ids
    }

    fn advance(&mut self, phase: Phase) {
        if phase > self.phase {
            self.phase = phase;
        }
    }
}

pub struct CompilationDriver {
    unit: CompileUnit,
    units: Vec<SourceUnit>,
    classpath: BootClasspath,
    collector: ErrorCollector,
    provider: Option<Box<dyn SourceProvider>>,
    writer: Option<ClassFileWriter>,
    callbacks: Vec<Box<dyn GeneratedUnitCallback>>,
    /// Classes generated but not yet written
    pending_output: Vec<(ClassId, ClassFile)>,
    /// Classes written but not yet frozen
    pending_freeze: Vec<ClassId>,
}

impl CompilationDriver {
    pub fn new() -> Self {
        CompilationDriver {
            unit: CompileUnit::new(),
            units: Vec::new(),
            classpath: BootClasspath::new(),
            collector: ErrorCollector::new(),
            provider: None,
            writer: None,
            callbacks: Vec::new(),
            pending_output: Vec::new(),
            pending_freeze: Vec::new(),
        }
    }

    pub fn with_provider(mut self, provider: Box<dyn SourceProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn with_target_root(mut self, root: impl Into<std::path::PathBuf>) -> Self {
        self.writer = Some(ClassFileWriter::new(root));
        self
    }

    pub fn add_callback(&mut self, callback: Box<dyn GeneratedUnitCallback>) {
        self.callbacks.push(callback);
    }

    /// Queue a raw source text; requires a [`SourceProvider`]
    pub fn add_source(&mut self, name: impl Into<String>, source: impl Into<String>) {
        self.units
            .push(SourceUnit::from_source(name.into(), source.into()));
    }

    /// Queue a pre-parsed unit, bypassing the Parsing phase
    pub fn add_parsed(&mut self, name: impl Into<String>, parsed: ParsedUnit) {
        self.units.push(SourceUnit::from_parsed(name.into(), parsed));
    }

    pub fn classpath_mut(&mut self) -> &mut BootClasspath {
        &mut self.classpath
    }

    pub fn compile_unit(&self) -> &CompileUnit {
        &self.unit
    }

    pub fn collector(&self) -> &ErrorCollector {
        &self.collector
    }

    pub fn units(&self) -> &[SourceUnit] {
        &self.units
    }

    /// Run every phase up to and including `through`. Re-runnable: units
    /// that already reached a phase are skipped, so adding sources and
    /// compiling again only does the delta.
    pub fn compile(&mut self, through: Phase) -> Result<()> {
        self.collector = ErrorCollector::new();
        for phase in Phase::ALL {
            if phase > through {
                break;
            }
            match phase {
                Phase::Initialization => self.run_initialization(),
                Phase::Parsing => self.run_parsing(),
                Phase::Conversion => self.run_conversion(),
                Phase::ClassGeneration => self.run_generation()?,
                Phase::Output => self.run_output(),
                Phase::Finalization => self.run_finalization(),
            }
            if self.collector.has_errors() {
                return Err(CompileError::Failed {
                    errors: self.collector.error_count(),
                });
            }
        }
        Ok(())
    }

    fn run_initialization(&mut self) {
        for unit in &mut self.units {
            unit.advance(Phase::Initialization);
        }
    }

    fn run_parsing(&mut self) {
        let mut provider = self.provider.take();
        for unit in &mut self.units {
            if unit.phase >= Phase::Parsing {
                continue;
            }
            self.collector.set_unit(&unit.name);
            if unit.parsed.is_none() {
                let source = unit.source.as_deref().unwrap_or("");
                match &mut provider {
                    Some(p) => match p.parse(&unit.name, source) {
                        Ok(parsed) => unit.parsed = Some(parsed),
                        Err(e) => {
                            self.collector.report_error(Span::synthetic(), &e);
                            continue;
                        }
                    },
                    None => {
                        self.collector.error(
                            Span::synthetic(),
                            "no source provider configured for raw source input",
                        );
                        continue;
                    }
                }
            }
            unit.advance(Phase::Parsing);
        }
        self.provider = provider;
    }

    /// Register every parsed module and class in the arena; loose script
    /// statements become a synthetic script class with a static `run`
    fn run_conversion(&mut self) {
        for i in 0..self.units.len() {
            if self.units[i].phase >= Phase::Conversion {
                continue;
            }
            let Some(mut parsed) = self.units[i].parsed.take() else {
                continue;
            };
            self.collector.set_unit(self.units[i].name.clone());

            let script_body = mem::take(&mut parsed.module.script_body);
            let script_name = script_class_name(&parsed.module);
            let module_index = self.unit.add_module(parsed.module);
            self.units[i].module_index = module_index;

            let mut ids = Vec::new();
            for class in parsed.classes {
                if self.unit.find_class(&class.name).is_some() {
                    self.collector
                        .error(Span::synthetic(), format!("duplicate class {}", class.name));
                    continue;
                }
                ids.push(self.unit.add_class_to_module(class, module_index));
            }
            if !script_body.is_empty() {
                let mut script = ClassNode::new(script_name)
                    .with_modifiers(modifiers::PUBLIC | modifiers::SYNTHETIC);
                script.is_script = true;
                let run = MethodNode::new("run", TypeRef::object())
                    .with_modifiers(modifiers::PUBLIC | modifiers::STATIC)
                    .with_body(Statement::block(script_body));
                script.methods.push(run);
                ids.push(self.unit.add_class_to_module(script, module_index));
            }
            self.units[i].class_ids = ids;
            self.units[i].advance(Phase::Conversion);
        }
    }

    fn run_generation(&mut self) -> Result<()> {
        for i in 0..self.units.len() {
            if self.units[i].phase >= Phase::ClassGeneration {
                continue;
            }
            self.collector.set_unit(self.units[i].name.clone());
            let ids = self.units[i].class_ids.clone();
            let module = self.units[i].module_index;
            for id in ids {
                self.generate_class(id, module)?;
            }
            self.units[i].advance(Phase::ClassGeneration);
        }
        Ok(())
    }

    /// Complete, validate and generate one class, then recurse into the
    /// synthetic inner classes the generator spawned
    fn generate_class(&mut self, id: ClassId, module: usize) -> Result<()> {
        let before = self.collector.error_count();
        CompletionVisitor::complete(&mut self.unit, id, &self.classpath, &mut self.collector)?;
        StructuralValidator::validate(&self.unit, id, &self.classpath, &mut self.collector);
        if self.collector.error_count() > before {
            // Structurally broken; generation would only cascade
            return Ok(());
        }

        match ClassGenerator::new(&self.unit, &self.classpath, id).generate() {
            Ok(generated) => {
                *self.unit.class_mut(id) = generated.class;
                self.pending_output.push((id, generated.file));
                for inner in generated.inner {
                    let inner_id = self.unit.add_class_to_module(inner, module);
                    self.unit.class_mut(id).inner_classes.push(inner_id);
                    self.generate_class(inner_id, module)?;
                }
                Ok(())
            }
            Err(e) if e.is_internal() => Err(e),
            Err(e) => {
                self.collector.report_error(Span::synthetic(), &e);
                Ok(())
            }
        }
    }

    /// Write every pending class definition; all outputs are attempted
    /// before IO failures fail the batch
    fn run_output(&mut self) {
        let pending = mem::take(&mut self.pending_output);
        for (id, file) in &pending {
            let class = self.unit.class(*id);
            for callback in &mut self.callbacks {
                callback.generated(class, file);
            }
            if let Some(writer) = &self.writer {
                if let Err(e) = writer.write(class, file) {
                    self.collector.error(
                        Span::synthetic(),
                        format!("failed to write {}: {e}", class.name),
                    );
                }
            }
        }
        self.pending_freeze.extend(pending.iter().map(|(id, _)| *id));
        for unit in &mut self.units {
            unit.advance(Phase::Output);
        }
    }

    fn run_finalization(&mut self) {
        for id in mem::take(&mut self.pending_freeze) {
            self.unit.class_mut(id).freeze();
        }
        for unit in &mut self.units {
            unit.advance(Phase::Finalization);
        }
    }
}

impl Default for CompilationDriver {
    fn default() -> Self {
        CompilationDriver::new()
    }
}

/// Script classes are named after their source unit
fn script_class_name(module: &ModuleNode) -> String {
    let base = module
        .unit_name
        .split('.')
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or("Script");
    let mut chars = base.chars();
    let simple: String = match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => "Script".to_string(),
    };
    if module.package.is_empty() {
        simple
    } else {
        format!("{}.{}", module.package, simple)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tarn_ast::Expression;

    fn parsed(package: &str, unit_name: &str, classes: Vec<ClassNode>) -> ParsedUnit {
        ParsedUnit {
            module: ModuleNode::new(package, unit_name),
            classes,
        }
    }

    #[test]
    fn test_phase_order() {
        assert!(Phase::Initialization < Phase::Parsing);
        assert!(Phase::ClassGeneration < Phase::Output);
        assert!(Phase::Output < Phase::Finalization);
    }

    #[test]
    fn test_compile_through_generation() {
        let mut driver = CompilationDriver::new();
        driver.add_parsed(
            "box.tarn",
            parsed("demo", "box.tarn", vec![ClassNode::new("demo.Box")]),
        );
        driver.compile(Phase::ClassGeneration).unwrap();

        let id = driver.compile_unit().find_class("demo.Box").unwrap();
        let class = driver.compile_unit().class(id);
        // Completion ran: default ctor and protocol members present
        assert!(!class.constructors.is_empty());
        assert!(class.declares_method("getMetaHandle", 0));
        // Not frozen until finalization
        assert!(!class.is_frozen());
    }

    #[test]
    fn test_script_body_becomes_run_class() {
        let mut driver = CompilationDriver::new();
        let mut module = ModuleNode::new("demo", "main.tarn");
        module
            .script_body
            .push(Statement::expr(Expression::StringLit("hi".to_string())));
        driver.add_parsed("main.tarn", ParsedUnit { module, classes: vec![] });
        driver.compile(Phase::ClassGeneration).unwrap();

        let id = driver.compile_unit().find_class("demo.Main").unwrap();
        let class = driver.compile_unit().class(id);
        assert!(class.is_script);
        let run = class.get_methods("run").remove(0);
        assert!(run.is_static());
    }

    #[test]
    fn test_output_writes_and_finalization_freezes() {
        let dir = tempfile::tempdir().unwrap();
        let mut driver = CompilationDriver::new().with_target_root(dir.path());
        driver.add_parsed(
            "box.tarn",
            parsed("demo", "box.tarn", vec![ClassNode::new("demo.Box")]),
        );
        driver.compile(Phase::Finalization).unwrap();

        assert!(dir.path().join("demo/Box.tclass").is_file());
        let id = driver.compile_unit().find_class("demo.Box").unwrap();
        assert!(driver.compile_unit().class(id).is_frozen());
    }

    #[test]
    fn test_delta_recompilation_skips_finished_units() {
        let mut driver = CompilationDriver::new();
        driver.add_parsed(
            "a.tarn",
            parsed("demo", "a.tarn", vec![ClassNode::new("demo.A")]),
        );
        driver.compile(Phase::ClassGeneration).unwrap();
        let first_count = driver.compile_unit().class_count();

        driver.add_parsed(
            "b.tarn",
            parsed("demo", "b.tarn", vec![ClassNode::new("demo.B")]),
        );
        driver.compile(Phase::ClassGeneration).unwrap();

        // The first unit was not re-registered
        assert_eq!(driver.compile_unit().class_count(), first_count + 1);
        assert!(driver.units().iter().all(|u| u.phase() == Phase::ClassGeneration));
    }

    #[test]
    fn test_all_units_attempted_before_batch_fails() {
        let mut driver = CompilationDriver::new();
        // Broken: unknown superclass
        driver.add_parsed(
            "bad.tarn",
            parsed(
                "demo",
                "bad.tarn",
                vec![ClassNode::new("demo.Bad").with_super("demo.Missing")],
            ),
        );
        driver.add_parsed(
            "good.tarn",
            parsed("demo", "good.tarn", vec![ClassNode::new("demo.Good")]),
        );
        let err = driver.compile(Phase::ClassGeneration).unwrap_err();
        assert!(matches!(err, CompileError::Failed { .. }));

        // The good unit still generated; only the bad one has diagnostics
        assert!(driver.collector().for_unit("good.tarn").is_empty());
        assert!(!driver.collector().for_unit("bad.tarn").is_empty());
    }

    #[test]
    fn test_raw_source_without_provider_is_an_error() {
        let mut driver = CompilationDriver::new();
        driver.add_source("main.tarn", "class A {}");
        let err = driver.compile(Phase::Parsing).unwrap_err();
        assert!(matches!(err, CompileError::Failed { .. }));
    }

    #[test]
    fn test_closure_inner_class_joins_the_unit() {
        use tarn_ast::{Parameter, StmtKind};
        let mut class = ClassNode::new("demo.Maker");
        class
            .add_method(
                MethodNode::new("make", TypeRef::object()).with_body(Statement::ret(Some(
                    Expression::Closure {
                        params: vec![Parameter::new("x", TypeRef::object())],
                        body: Box::new(Statement::new(StmtKind::Return(Some(
                            Expression::Var("x".to_string()),
                        )))),
                    },
                ))),
            )
            .unwrap();

        let mut driver = CompilationDriver::new();
        driver.add_parsed("maker.tarn", parsed("demo", "maker.tarn", vec![class]));
        driver.compile(Phase::ClassGeneration).unwrap();

        let inner = driver
            .compile_unit()
            .find_class("demo.Maker$_closure0")
            .unwrap();
        let parent = driver.compile_unit().find_class("demo.Maker").unwrap();
        assert!(driver
            .compile_unit()
            .class(parent)
            .inner_classes
            .contains(&inner));
    }
}
