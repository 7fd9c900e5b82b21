use std::path::PathBuf;

use tracing::info;

use crate::error::CoreError;
use crate::interface::{ModuleInterface, build_interface, mark_associated};
use crate::ir::{IrModule, lower_program};
use crate::parser::parse;
use crate::prelude::{PreludeFile, default_prelude_root, load_prelude_files};
use crate::sema::Program;
use crate::sema::analyze::analyze;
use crate::sema::preanalyze::preanalyze_module;
use crate::sema::simplify::simplify;
use crate::span::FileId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileOptions {
    pub module_name: String,
    /// `None` compiles the unit without a prelude.
    pub prelude_root: Option<PathBuf>,
    pub simplify: bool,
    pub emit_interface: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        CompileOptions {
            module_name: "main".to_string(),
            prelude_root: None,
            simplify: true,
            emit_interface: true,
        }
    }
}

impl CompileOptions {
    pub fn new() -> Self {
        CompileOptions::default()
    }

    pub fn module_name(mut self, name: impl Into<String>) -> Self {
        self.module_name = name.into();
        self
    }

    pub fn prelude_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.prelude_root = Some(root.into());
        self
    }

    pub fn with_default_prelude(self) -> Self {
        self.prelude_root(default_prelude_root())
    }

    pub fn simplify(mut self, enabled: bool) -> Self {
        self.simplify = enabled;
        self
    }

    pub fn emit_interface(mut self, enabled: bool) -> Self {
        self.emit_interface = enabled;
        self
    }
}

#[derive(Debug)]
pub struct CompilationArtifact {
    pub module: IrModule,
    pub interface: Option<ModuleInterface>,
    pub prelude: Vec<PreludeFile>,
}

/// Runs the whole pipeline over one unit.
#[tracing::instrument(skip_all, fields(module = %options.module_name))]
pub fn compile_unit(
    source: &str,
    options: &CompileOptions,
) -> Result<CompilationArtifact, CoreError> {
    let (mut program, prelude) = analyze_unit(source, options)?;

    info!(functions = program.analyzed_functions.len(), "lowering");
    let module = lower_program(&program)?;

    let interface = if options.emit_interface {
        let scope = program.module_scope;
        mark_associated(&mut program, scope)?;
        Some(build_interface(&program, scope)?)
    } else {
        None
    };

    Ok(CompilationArtifact {
        module,
        interface,
        prelude,
    })
}

/// Parses, pre-analyzes, analyzes and (if enabled) simplifies one unit
/// together with its prelude.
#[tracing::instrument(skip_all, fields(module = %options.module_name))]
pub fn analyze_unit(
    source: &str,
    options: &CompileOptions,
) -> Result<(Program, Vec<PreludeFile>), CoreError> {
    let prelude = match &options.prelude_root {
        Some(root) => load_prelude_files(root)?,
        None => Vec::new(),
    };
    let mut program = Program::new(options.module_name.clone(), options.prelude_root.is_some());

    info!(files = prelude.len(), "pre-analyzing");
    if let Some(scope) = program.prelude_scope {
        for (index, file) in prelude.iter().enumerate() {
            let module = parse(FileId(index as u32 + 1), &file.contents)?;
            let block = preanalyze_module(&mut program, &module, scope)?;
            program.prelude_blocks.push(block);
        }
        program.scopes.close(scope);
    }
    let module = parse(FileId::UNIT, source)?;
    let scope = program.module_scope;
    program.module_block = Some(preanalyze_module(&mut program, &module, scope)?);
    program.scopes.close(scope);

    info!("analyzing");
    let mut program = analyze(program)?;

    if options.simplify {
        info!("simplifying");
        simplify(&mut program)?;
    }
    Ok((program, prelude))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Opcode;

    #[test]
    fn compiles_without_a_prelude() {
        let artifact = compile_unit(
            "export fn answer() -> integer { return 40 + 2; }",
            &CompileOptions::default(),
        )
        .expect("compile");
        assert!(artifact.prelude.is_empty());
        let answer = artifact.module.function("main::answer").expect("answer");
        assert!(answer.is_exported);
        assert_eq!(answer.instructions[0].operands, vec![crate::ir::IrValue::Integer(42)]);
        let interface = artifact.interface.expect("interface");
        assert!(interface.entity("answer").is_some());
    }

    #[test]
    fn reports_missing_prelude_root() {
        let options = CompileOptions::new().prelude_root("./path/that/does/not/exist");
        let err = compile_unit("fn f() -> integer { return 1; }", &options).unwrap_err();
        assert!(matches!(err, CoreError::MissingPrelude(_)));
    }

    #[test]
    fn captures_loaded_prelude_files_in_artifact() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path();
        let nested = root.join("nested");
        std::fs::create_dir_all(&nested).expect("create nested dir");
        std::fs::write(root.join("base.brm"), "fn one() -> integer { return 1; }")
            .expect("write prelude root file");
        std::fs::write(nested.join("two.brm"), "fn two() -> integer { return one() + 1; }")
            .expect("write nested prelude file");

        let options = CompileOptions::new().prelude_root(root);
        let artifact = compile_unit("fn f() -> integer { return two(); }", &options)
            .expect("compile should succeed");
        assert_eq!(artifact.prelude.len(), 2, "expected two prelude files recorded");

        let paths: Vec<_> = artifact.prelude.iter().map(|file| file.path.clone()).collect();
        assert_eq!(paths, vec![PathBuf::from("base.brm"), PathBuf::from("nested/two.brm")]);
        assert!(artifact.module.function("prelude::one").is_some());
        assert!(artifact.module.function("prelude::two").is_some());
        let f = artifact.module.function("main::f").expect("f");
        assert_eq!(
            f.instructions[0].operands[0],
            crate::ir::IrValue::Function("prelude::two".to_string())
        );
    }

    #[test]
    fn the_bundled_prelude_provides_equality() {
        let options = CompileOptions::new().with_default_prelude().module_name("demo");
        let artifact = compile_unit(
            "fn f(a : integer) -> boolean { return Equality(integer).differ(a, 3); }",
            &options,
        )
        .expect("compile");
        let differ = artifact
            .module
            .function("prelude::Equality(integer)::differ")
            .expect("cloned default member");
        assert_eq!(differ.parent_type.as_deref(), Some("Equality(integer)"));
        assert!(artifact.module.function("demo::f").is_some());
    }

    #[test]
    fn unsimplified_units_still_lower() {
        let source = "fn f() -> integer { if true { return 1; } return 2; return 3; }";
        let options = CompileOptions::new().simplify(false).emit_interface(false);
        let artifact = compile_unit(source, &options).expect("compile");
        assert!(artifact.interface.is_none());
        let f = artifact.module.function("main::f").expect("f");
        assert_eq!(f.count(Opcode::Return), 1);
        // Without simplification the unreachable return stays a phi input.
        let phi = f.instructions.iter().find(|inst| inst.is(Opcode::Phi)).expect("phi");
        assert_eq!(phi.operands.len(), 6);

        let simplified = compile_unit(source, &CompileOptions::default()).expect("compile");
        let f = simplified.module.function("main::f").expect("f");
        let phi = f.instructions.iter().find(|inst| inst.is(Opcode::Phi)).expect("phi");
        assert_eq!(phi.operands.len(), 4);
    }

    #[test]
    fn user_errors_abort_the_unit() {
        let err = compile_unit("fn f() -> integer { return g(); }", &CompileOptions::default())
            .unwrap_err();
        assert!(matches!(err, CoreError::UnboundName { ref name, .. } if name == "g"));
        assert!(!err.is_internal());
    }
}
