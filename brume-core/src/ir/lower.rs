//! Lowering of the analyzed tree into IR.
//!
//! Every analyzed, non-generic function whose parameter and return types have
//! a runtime representation becomes one `IrFunction`. Lowering a statement
//! yields a list of instructions; blocks insert `destroy` instructions for the
//! scopes they leave in front of each `return`, and the function body then
//! funnels all return sites into a single `return` through a `phi`.

use rustc_hash::{FxHashMap, FxHashSet};

use super::{Instruction, IrFunction, IrModule, IrType, IrValue, Opcode, mangle};
use crate::error::CoreError;
use crate::sema::Program;
use crate::sema::scope::{ScopeId, SymbolId};
use crate::sema::tree::{Block, CallTarget, ExprId, ExprKind, FunctionId, StmtId, StmtKind};
use crate::sema::types::{TypeId, TypeKind};
use crate::sema::value::Value;

const RETURN_PHI: &str = "__return_phi";

/// Lowers every analyzed function of `program`.
pub fn lower_program(program: &Program) -> Result<IrModule, CoreError> {
    let mut lowerer = Lowerer::new(program);
    for function in &program.analyzed_functions {
        lowerer.function(*function)?;
    }
    tracing::debug!(functions = lowerer.functions.len(), "lowering complete");
    Ok(IrModule {
        name: program.module_name.clone(),
        functions: lowerer.functions,
    })
}

/// Runtime representation of `ty`, computed once and cached on the type.
/// Types that exist only during compilation have none.
pub fn codegen_type(program: &Program, ty: TypeId) -> Option<IrType> {
    codegen_type_guarded(program, ty, &mut FxHashSet::default())
}

fn codegen_type_guarded(
    program: &Program,
    ty: TypeId,
    visiting: &mut FxHashSet<TypeId>,
) -> Option<IrType> {
    let data = program.types.get(ty);
    if let Some(cached) = data.codegen.get() {
        return cached.clone();
    }
    // A struct containing itself has no finite layout.
    if !visiting.insert(ty) {
        return None;
    }
    let computed = match &data.kind {
        TypeKind::Integer => Some(IrType::Integer),
        TypeKind::Boolean => Some(IrType::Boolean),
        TypeKind::Struct { fields } => fields
            .iter()
            .map(|field| {
                program
                    .ast
                    .expr(*field)
                    .ty
                    .and_then(|field_ty| codegen_type_guarded(program, field_ty, visiting))
            })
            .collect::<Option<Vec<_>>>()
            .map(|fields| IrType::Struct {
                name: data.name.clone(),
                fields,
            }),
        TypeKind::Type
        | TypeKind::Unconstrained
        | TypeKind::Typeclass(_)
        | TypeKind::TypeclassInstance { .. }
        | TypeKind::OverloadSet(_) => None,
    };
    visiting.remove(&ty);
    let _ = data.codegen.set(computed.clone());
    computed
}

/// Mangled name of `function`: the names of the enclosing module and types,
/// the function name and its position in the overload set.
pub fn mangled_name(program: &Program, function: FunctionId) -> String {
    let data = program.ast.function(function);
    let set = program.ast.overload_set(data.overload_set);
    let overload_index = set
        .functions
        .iter()
        .position(|candidate| *candidate == function)
        .unwrap_or_default();
    mangle(&program.scope_path(set.scope), &data.name, overload_index)
}

struct Lowerer<'p> {
    program: &'p Program,
    functions: Vec<IrFunction>,
    labels: usize,
    next_var: u32,
    vars: FxHashMap<SymbolId, IrValue>,
}

impl<'p> Lowerer<'p> {
    fn new(program: &'p Program) -> Self {
        Lowerer {
            program,
            functions: Vec::new(),
            labels: 0,
            next_var: 0,
            vars: FxHashMap::default(),
        }
    }

    fn next_label(&mut self) -> usize {
        let label = self.labels;
        self.labels += 1;
        label
    }

    fn fresh_var(&mut self, ty: IrType) -> IrValue {
        let id = self.next_var;
        self.next_var += 1;
        IrValue::Variable {
            id,
            ty,
            parameter: false,
        }
    }

    fn ir_type(&self, ty: TypeId) -> Result<IrType, CoreError> {
        codegen_type(self.program, ty).ok_or_else(|| {
            CoreError::malformed(
                format!("value of type `{}`", self.program.type_name(ty)),
                "lowering",
            )
        })
    }

    fn expr_ir_type(&self, expr: ExprId) -> Result<IrType, CoreError> {
        self.ir_type(self.program.expr_type(expr)?)
    }

    /// Signature of `function` when every type in it has a runtime
    /// representation.
    fn signature(&self, function: FunctionId) -> Option<(Vec<IrType>, IrType)> {
        let data = self.program.ast.function(function);
        let params = data
            .params
            .iter()
            .map(|param| {
                self.program
                    .ast
                    .expr(*param)
                    .ty
                    .and_then(|ty| codegen_type(self.program, ty))
            })
            .collect::<Option<Vec<_>>>()?;
        let result = codegen_type(self.program, data.return_type?)?;
        Some((params, result))
    }

    fn function(&mut self, function: FunctionId) -> Result<(), CoreError> {
        let program = self.program;
        let data = program.ast.function(function);
        if data.generic || !data.analyzed {
            return Ok(());
        }
        let Some((param_types, return_type)) = self.signature(function) else {
            tracing::trace!(function = %data.name, "skipped compile-time function");
            return Ok(());
        };
        let body = data.body.ok_or_else(|| {
            CoreError::malformed(format!("function `{}` without a body", data.name), "lowering")
        })?;

        self.labels = 0;
        self.next_var = 0;
        self.vars.clear();

        let mut parameters = Vec::with_capacity(param_types.len());
        for (param, ty) in data.params.iter().zip(param_types) {
            let ExprKind::Parameter { name, .. } = &program.ast.expr(*param).kind else {
                return Err(CoreError::malformed("function parameter", "lowering"));
            };
            let symbol = program
                .scopes
                .lookup_local(data.scope, name)
                .ok_or_else(|| CoreError::malformed(format!("parameter `{name}`"), "lowering"))?;
            let value = IrValue::Variable {
                id: self.next_var,
                ty,
                parameter: true,
            };
            self.next_var += 1;
            self.vars.insert(symbol, value.clone());
            parameters.push(value);
        }

        let mut instructions = self.stmt(body)?;
        self.unify_returns(&mut instructions)?;

        let set = program.ast.overload_set(data.overload_set);
        let overload_index = set
            .functions
            .iter()
            .position(|candidate| *candidate == function)
            .unwrap_or_default();
        let is_exported = program
            .scopes
            .lookup_local(set.scope, &set.name)
            .is_some_and(|symbol| program.scopes.symbol(symbol).exported);

        self.functions.push(IrFunction {
            name: data.name.clone(),
            scopes: program.scope_path(set.scope),
            overload_index,
            parameters,
            return_type,
            instructions,
            is_exported,
            parent_type: data.parent_type.map(|ty| program.type_name(ty).to_string()),
        });
        Ok(())
    }

    /// Gives every return a label and, when there are several return sites,
    /// replaces them with jumps to one `phi` followed by a single `return`.
    fn unify_returns(&mut self, instructions: &mut Vec<Instruction>) -> Result<(), CoreError> {
        // Flat list of (label, value) pairs.
        let mut labeled_return_values = Vec::new();
        for index in 0..instructions.len() {
            if !instructions[index].is(Opcode::Return) {
                continue;
            }
            if instructions[index].label.is_none() {
                let label = format!("__return_label_{}", self.next_label());
                instructions[index].label = Some(label);
            }
            let instruction = &instructions[index];
            let value = instruction
                .operands
                .first()
                .cloned()
                .ok_or_else(|| CoreError::malformed("return without a value", "lowering"))?;
            labeled_return_values.push(IrValue::Label(instruction.label.clone().unwrap_or_default()));
            labeled_return_values.push(value);
        }

        if labeled_return_values.len() <= 2 {
            return Ok(());
        }

        let mut phi_operands = Vec::with_capacity(labeled_return_values.len());
        let mut unified = Vec::with_capacity(instructions.len() + labeled_return_values.len());
        for instruction in instructions.drain(..) {
            if !instruction.is(Opcode::Return) {
                unified.push(instruction);
                continue;
            }
            let label = instruction.label.unwrap_or_default();
            let value = instruction.operands.into_iter().next().unwrap_or(IrValue::Void);
            let jump = Instruction::new(
                Opcode::Jump,
                vec![IrValue::Boolean(true), IrValue::label(RETURN_PHI)],
                IrValue::Void,
            );

            if value.is_variable() {
                phi_operands.push(IrValue::Label(label.clone()));
                phi_operands.push(value);
                unified.push(jump.labeled(label));
            } else {
                let ty = value
                    .ty()
                    .ok_or_else(|| CoreError::malformed("untyped return value", "lowering"))?;
                let var = self.fresh_var(ty);
                let mut materialize =
                    Instruction::new(Opcode::Materialize, vec![value], var.clone())
                        .labeled(label.clone());
                materialize.result_label = Some(label.clone());
                phi_operands.push(IrValue::Label(label));
                phi_operands.push(var);
                unified.push(materialize);
                unified.push(jump);
            }
        }

        let ty = phi_operands
            .get(1)
            .and_then(IrValue::ty)
            .ok_or_else(|| CoreError::malformed("untyped return value", "lowering"))?;
        let merged = self.fresh_var(ty);
        tracing::debug!(sites = phi_operands.len() / 2, "unified return paths");
        unified.push(Instruction::new(Opcode::Phi, phi_operands, merged.clone()).labeled(RETURN_PHI));
        unified.push(Instruction::new(Opcode::Return, vec![merged.clone()], merged));
        *instructions = unified;
        Ok(())
    }

    fn stmt(&mut self, stmt: StmtId) -> Result<Vec<Instruction>, CoreError> {
        let program = self.program;
        match &program.ast.stmt(stmt).kind {
            StmtKind::Block(block) => self.block(block),
            StmtKind::Let { symbol, binding } => {
                let ExprKind::Variable { init, .. } = &program.ast.expr(*binding).kind else {
                    return Err(CoreError::malformed("let without a variable", "lowering"));
                };
                let mut out = Vec::new();
                let value = self.expr(*init, &mut out)?;
                if value == IrValue::Void {
                    return Ok(out);
                }
                let var = self.fresh_var(self.expr_ir_type(*binding)?);
                out.push(Instruction::new(Opcode::Materialize, vec![value], var.clone()));
                self.vars.insert(*symbol, var);
                Ok(out)
            }
            StmtKind::Return { value } => {
                let mut out = Vec::new();
                let value = self.expr(*value, &mut out)?;
                out.push(Instruction::new(Opcode::Return, vec![value.clone()], value));
                Ok(out)
            }
            StmtKind::If {
                condition,
                then_branch,
                else_branch,
            } => self.if_stmt(*condition, *then_branch, *else_branch),
            StmtKind::Expr(value) => {
                let mut out = Vec::new();
                let value = self.expr(*value, &mut out)?;
                if out.is_empty() {
                    let operands = if value == IrValue::Void { vec![] } else { vec![value] };
                    out.push(Instruction::new(Opcode::Pass, operands, IrValue::Void));
                }
                Ok(out)
            }
            // Declarations are lowered on their own or have no code.
            StmtKind::Function(_)
            | StmtKind::Struct { .. }
            | StmtKind::Typeclass(_)
            | StmtKind::Instance(_) => Ok(Vec::new()),
        }
    }

    fn block(&mut self, block: &Block) -> Result<Vec<Instruction>, CoreError> {
        let mut out = Vec::new();
        for entry in &block.entries {
            let mut lowered = self.stmt(entry.stmt)?;
            let destroys = self.destroys(entry.scope, block);
            if !destroys.is_empty() {
                lowered = insert_before_returns(lowered, &destroys);
            }
            out.extend(lowered);
        }
        if let Some(value) = block.value {
            let value = self.expr(value, &mut out)?;
            out.extend(self.destroys(block.current_scope, block));
            out.push(Instruction::new(Opcode::Return, vec![value.clone()], value));
        }
        Ok(out)
    }

    /// `destroy` for every variable live in `innermost` up to the block's own
    /// scope, innermost first.
    fn destroys(&self, innermost: ScopeId, block: &Block) -> Vec<Instruction> {
        self.program
            .scopes
            .destruction_order(innermost, block.scope)
            .into_iter()
            .filter_map(|symbol| self.vars.get(&symbol))
            .map(|var| Instruction::new(Opcode::Destroy, vec![var.clone()], IrValue::Void))
            .collect()
    }

    fn if_stmt(
        &mut self,
        condition: ExprId,
        then_branch: StmtId,
        else_branch: Option<StmtId>,
    ) -> Result<Vec<Instruction>, CoreError> {
        let else_label = format!("__else_{}", self.next_label());
        let after_label = format!("__after_else_{}", self.next_label());

        let mut out = Vec::new();
        let condition = self.expr(condition, &mut out)?;
        let negated = self.fresh_var(IrType::Boolean);
        out.push(Instruction::new(
            Opcode::BooleanNegation,
            vec![condition],
            negated.clone(),
        ));
        out.push(Instruction::new(
            Opcode::Jump,
            vec![negated, IrValue::label(else_label.clone())],
            IrValue::Void,
        ));

        out.extend(self.stmt(then_branch)?);
        out.push(Instruction::new(
            Opcode::Jump,
            vec![IrValue::Boolean(true), IrValue::label(after_label.clone())],
            IrValue::Void,
        ));

        let mut otherwise = match else_branch {
            Some(branch) => self.stmt(branch)?,
            None => Vec::new(),
        };
        if otherwise.first().is_none_or(|first| first.label.is_some()) {
            otherwise.insert(0, noop(else_label));
        } else if let Some(first) = otherwise.first_mut() {
            first.label = Some(else_label);
        }
        out.extend(otherwise);
        out.push(noop(after_label));
        Ok(out)
    }

    /// Lowers `expr`, appending its instructions to `out`, and returns the
    /// value it produces. Constants produce no instructions; values that exist
    /// only during compilation produce `Void`.
    fn expr(&mut self, expr: ExprId, out: &mut Vec<Instruction>) -> Result<IrValue, CoreError> {
        let program = self.program;
        let node = program.ast.expr(expr);
        if node.value.is_compile_time_only() {
            return Ok(IrValue::Void);
        }
        if node.value.is_constant() {
            return self.constant(&node.value);
        }

        match &node.kind {
            ExprKind::Integer(v) => Ok(IrValue::Integer(*v)),
            ExprKind::Boolean(v) => Ok(IrValue::Boolean(*v)),
            ExprKind::Identifier {
                name, referenced, ..
            } => {
                let symbol = referenced.ok_or_else(|| {
                    CoreError::malformed(format!("unresolved identifier `{name}`"), "lowering")
                })?;
                self.vars.get(&symbol).cloned().ok_or_else(|| {
                    CoreError::malformed(
                        format!("reference to `{name}` outside its function"),
                        "lowering",
                    )
                })
            }
            ExprKind::Unary {
                operand,
                resolution,
                ..
            } => {
                let resolution = resolution
                    .ok_or_else(|| CoreError::malformed("unresolved unary operator", "lowering"))?;
                let operand = self.expr(*operand, out)?;
                let result = self.fresh_var(self.ir_type(resolution.result)?);
                out.push(Instruction::new(resolution.opcode, vec![operand], result.clone()));
                Ok(result)
            }
            ExprKind::Binary {
                lhs,
                rhs,
                resolution,
                ..
            } => {
                let resolution = resolution
                    .ok_or_else(|| CoreError::malformed("unresolved binary operator", "lowering"))?;
                let lhs = self.expr(*lhs, out)?;
                let rhs = self.expr(*rhs, out)?;
                let result = self.fresh_var(self.ir_type(resolution.result)?);
                out.push(Instruction::new(resolution.opcode, vec![lhs, rhs], result.clone()));
                Ok(result)
            }
            ExprKind::Call {
                args, resolution, ..
            } => {
                let Some(CallTarget::Function(callee)) = resolution else {
                    return Err(CoreError::malformed("unresolved call", "lowering"));
                };
                if self.signature(*callee).is_none() {
                    return Err(CoreError::malformed(
                        format!(
                            "call to compile-time function `{}`",
                            program.ast.function(*callee).name
                        ),
                        "lowering",
                    ));
                }
                let mut operands = vec![IrValue::Function(mangled_name(program, *callee))];
                for arg in args {
                    operands.push(self.expr(*arg, out)?);
                }
                let result = self.fresh_var(self.expr_ir_type(expr)?);
                out.push(Instruction::new(Opcode::Call, operands, result.clone()));
                Ok(result)
            }
            ExprKind::Member {
                base,
                member,
                referenced,
            } => {
                let field = referenced
                    .map(|symbol| program.scopes.symbol(symbol).value)
                    .ok_or_else(|| {
                        CoreError::malformed(format!("unresolved member `{member}`"), "lowering")
                    })?;
                let ExprKind::Field { index, .. } = program.ast.expr(field).kind else {
                    return Err(CoreError::malformed(format!("member `{member}`"), "lowering"));
                };
                let base = self.expr(*base, out)?;
                let result = self.fresh_var(self.expr_ir_type(expr)?);
                let index = i64::try_from(index)
                    .map_err(|_| CoreError::malformed("field index", "lowering"))?;
                out.push(Instruction::new(
                    Opcode::Member,
                    vec![base, IrValue::Integer(index)],
                    result.clone(),
                ));
                Ok(result)
            }
            ExprKind::StructLiteral { layout, .. } => {
                let mut operands = Vec::with_capacity(layout.len());
                for field in layout {
                    operands.push(self.expr(*field, out)?);
                }
                let result = self.fresh_var(self.expr_ir_type(expr)?);
                out.push(Instruction::new(Opcode::Construct, operands, result.clone()));
                Ok(result)
            }
            ExprKind::TypeRef(_)
            | ExprKind::TypeclassRef(_)
            | ExprKind::OverloadSetRef(_)
            | ExprKind::Parameter { .. }
            | ExprKind::Field { .. }
            | ExprKind::Variable { .. } => Err(CoreError::malformed(
                "declaration used as a value",
                "lowering",
            )),
        }
    }

    fn constant(&self, value: &Value) -> Result<IrValue, CoreError> {
        match value {
            Value::Integer(v) => Ok(IrValue::Integer(*v)),
            Value::Boolean(v) => Ok(IrValue::Boolean(*v)),
            Value::Struct { ty, fields } => Ok(IrValue::Struct {
                ty: self.ir_type(*ty)?,
                fields: fields
                    .iter()
                    .map(|field| self.constant(field))
                    .collect::<Result<_, _>>()?,
            }),
            _ => Err(CoreError::malformed("non-constant value", "constant lowering")),
        }
    }
}

fn noop(label: String) -> Instruction {
    Instruction::new(Opcode::Noop, vec![], IrValue::Label(label.clone())).labeled(label)
}

fn insert_before_returns(instructions: Vec<Instruction>, destroys: &[Instruction]) -> Vec<Instruction> {
    let mut out = Vec::with_capacity(instructions.len() + destroys.len());
    for mut instruction in instructions {
        if instruction.is(Opcode::Return) {
            let mut cleanup = destroys.to_vec();
            // Jumps to a labeled return must run the cleanup too.
            if let Some(first) = cleanup.first_mut() {
                first.label = instruction.label.take();
            }
            out.extend(cleanup);
        }
        out.push(instruction);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use crate::sema::analyze::analyze;
    use crate::sema::preanalyze::preanalyze_module;
    use crate::sema::simplify::simplify;
    use crate::span::FileId;

    fn lowered(source: &str) -> IrModule {
        let module = parse(FileId::UNIT, source).expect("parse");
        let mut program = Program::new("main", false);
        let scope = program.module_scope;
        program.module_block = Some(preanalyze_module(&mut program, &module, scope).expect("preanalyze"));
        program.scopes.close(scope);
        let mut program = analyze(program).expect("analyze");
        simplify(&mut program).expect("simplify");
        lower_program(&program).expect("lower")
    }

    fn ops(function: &IrFunction) -> Vec<Opcode> {
        function.instructions.iter().map(|inst| inst.op).collect()
    }

    #[test]
    fn early_return_merges_through_a_phi() {
        let module = lowered("fn f() -> integer { if true { return 1; } return 2; }");
        let f = module.function("main::f").expect("f");
        assert_eq!(f.count(Opcode::Return), 1);
        assert_eq!(f.count(Opcode::Phi), 1);

        let phi = f
            .instructions
            .iter()
            .find(|inst| inst.is(Opcode::Phi))
            .expect("phi");
        assert_eq!(phi.label.as_deref(), Some("__return_phi"));
        assert_eq!(phi.operands.len(), 4);
        assert!(phi.operands[0] == IrValue::label("__return_label_2"));
        assert!(phi.operands[2] == IrValue::label("__return_label_3"));

        let last = f.instructions.last().expect("return");
        assert!(last.is(Opcode::Return));
        assert_eq!(last.operands, vec![phi.result.clone()]);

        // Constant return values are materialized on their edge.
        let materialized: Vec<_> = f
            .instructions
            .iter()
            .filter(|inst| inst.is(Opcode::Materialize))
            .collect();
        assert_eq!(materialized.len(), 2);
        assert_eq!(materialized[0].operands, vec![IrValue::Integer(1)]);
        assert_eq!(materialized[0].result_label.as_deref(), Some("__return_label_2"));
        assert_eq!(materialized[0].result, phi.operands[1]);
    }

    #[test]
    fn single_return_has_no_phi() {
        let module = lowered("fn f(a : integer) -> integer { return a + 1; }");
        let f = module.function("main::f").expect("f");
        assert_eq!(ops(f), vec![Opcode::IntegerAddition, Opcode::Return]);
        assert_eq!(f.count(Opcode::Phi), 0);
        assert_eq!(f.instructions[1].label.as_deref(), Some("__return_label_0"));
        assert!(matches!(
            f.instructions[0].operands[0],
            IrValue::Variable { id: 0, parameter: true, .. }
        ));
    }

    #[test]
    fn if_else_jumps_over_branches() {
        let module = lowered(
            "fn f(a : integer) -> integer { if a < 0 { return -a; } else { return a; } }",
        );
        let f = module.function("main::f").expect("f");
        let labels: Vec<&str> = f
            .instructions
            .iter()
            .filter_map(|inst| inst.label.as_deref())
            .collect();
        assert_eq!(
            labels,
            vec!["__return_label_2", "__else_0", "__after_else_1", "__return_phi"]
        );

        assert!(f.instructions[1].is(Opcode::BooleanNegation));
        let branch = &f.instructions[2];
        assert!(branch.is(Opcode::Jump));
        assert_eq!(branch.operands[0], f.instructions[1].result);
        assert_eq!(branch.operands[1], IrValue::label("__else_0"));

        // The else branch starts with its return, which keeps the else label
        // when it becomes a jump to the phi.
        let else_start = f
            .instructions
            .iter()
            .position(|inst| inst.label.as_deref() == Some("__else_0"))
            .expect("else label");
        assert_eq!(
            f.instructions[else_start].operands,
            vec![IrValue::Boolean(true), IrValue::label("__return_phi")]
        );
        assert_eq!(
            f.instructions[else_start - 1].operands,
            vec![IrValue::Boolean(true), IrValue::label("__after_else_1")]
        );
        let phi = f.instructions.iter().find(|inst| inst.is(Opcode::Phi)).expect("phi");
        assert_eq!(phi.operands[2], IrValue::label("__else_0"));
    }

    #[test]
    fn else_target_runs_cleanup_before_returning() {
        let module = lowered(
            "fn f(a : integer, c : boolean) -> integer {
                 let y = a + 1;
                 if c { return 1; } else { return y; }
             }",
        );
        let f = module.function("main::f").expect("f");
        let else_at = f
            .instructions
            .iter()
            .position(|inst| inst.label.as_deref() == Some("__else_0"))
            .expect("else label");
        assert!(f.instructions[else_at].is(Opcode::Destroy));
        assert_eq!(
            f.instructions[else_at + 1].operands,
            vec![IrValue::Boolean(true), IrValue::label("__return_phi")]
        );
        assert_eq!(
            f.instructions[else_at - 1].operands,
            vec![IrValue::Boolean(true), IrValue::label("__after_else_1")]
        );
        assert_eq!(f.count(Opcode::Destroy), 2);
    }

    #[test]
    fn missing_else_gets_a_noop_target() {
        let module = lowered("fn f(a : boolean) -> integer { if a { 1; } return 2; }");
        let f = module.function("main::f").expect("f");
        assert_eq!(
            ops(f),
            vec![
                Opcode::BooleanNegation,
                Opcode::Jump,
                Opcode::Pass,
                Opcode::Jump,
                Opcode::Noop,
                Opcode::Noop,
                Opcode::Return,
            ]
        );
        assert_eq!(f.instructions[4].label.as_deref(), Some("__else_0"));
        assert_eq!(f.instructions[5].label.as_deref(), Some("__after_else_1"));
    }

    #[test]
    fn scopes_are_destroyed_innermost_first() {
        let module = lowered(
            "fn f(a : integer) -> integer {
                 let x = a + 1;
                 let y = x * 2;
                 { let z = y - a; return z; }
             }",
        );
        let f = module.function("main::f").expect("f");
        let var_of = |index: usize| f.instructions[index].result.clone();
        // x: add, materialize; y: mul, materialize; z: sub, materialize.
        let (x, y, z) = (var_of(1), var_of(3), var_of(5));

        let destroyed: Vec<IrValue> = f
            .instructions
            .iter()
            .filter(|inst| inst.is(Opcode::Destroy))
            .map(|inst| inst.operands[0].clone())
            .collect();
        assert_eq!(destroyed, vec![z, y, x]);
        assert!(f.instructions.last().expect("return").is(Opcode::Return));
        assert!(f.instructions[f.instructions.len() - 2].is(Opcode::Destroy));
    }

    #[test]
    fn calls_name_the_mangled_overload() {
        let module = lowered(
            "fn g(a : integer) -> integer { return a; }
             fn g(a : boolean) -> integer { return 0; }
             fn f(b : boolean) -> integer { return g(b); }",
        );
        let f = module.function("main::f").expect("f");
        assert!(f.instructions[0].is(Opcode::Call));
        assert_eq!(f.instructions[0].operands[0], IrValue::Function("main::g#1".to_string()));
        assert!(module.function("main::g").is_some());
        assert!(module.function("main::g#1").is_some());
    }

    #[test]
    fn struct_literals_follow_the_field_layout() {
        let module = lowered(
            "struct P { x : integer, y : integer = 2 }
             fn f(a : integer) -> integer { let p = P { x: a }; return p.y; }",
        );
        let f = module.function("main::f").expect("f");
        let construct = &f.instructions[0];
        assert!(construct.is(Opcode::Construct));
        assert_eq!(construct.operands[1], IrValue::Integer(2));
        let member = f
            .instructions
            .iter()
            .find(|inst| inst.is(Opcode::Member))
            .expect("member");
        assert_eq!(member.operands[1], IrValue::Integer(1));
    }

    #[test]
    fn instance_members_are_mangled_under_the_instance() {
        let module = lowered(
            "typeclass Pair(T : type) {
                 fn first(a : T, b : T) -> T { return a; }
             }
             instance Pair(integer) {}
             fn f() -> integer { return Pair(integer).first(1, 2); }",
        );
        let first = module
            .function("main::Pair(integer)::first")
            .expect("instance member");
        assert_eq!(first.parent_type.as_deref(), Some("Pair(integer)"));
        let f = module.function("main::f").expect("f");
        assert_eq!(
            f.instructions[0].operands[0],
            IrValue::Function("main::Pair(integer)::first".to_string())
        );
    }

    #[test]
    fn compile_time_functions_are_not_lowered() {
        let module = lowered("fn t() -> type { return integer; } fn f() -> integer { return 1; }");
        assert!(module.function("main::t").is_none());
        assert!(module.function("main::f").is_some());
    }
}
