//! Simplification.
//!
//! Runs bottom-up over analyzed code and maps every statement and expression
//! to a (possibly identical) replacement:
//!
//! - value expressions with a scalar constant value become literals;
//! - statements after one that always returns are dropped, together with the
//!   block's trailing value;
//! - a nested block with no trailing value and a single statement is
//!   replaced by that statement.
//!
//! Results are memoized per node. Blocks are rewritten in place after a
//! snapshot of their original form is taken; every other node is replaced by
//! a fresh copy when one of its children changes.

use rustc_hash::FxHashMap;

use super::Program;
use super::clone::ensure_snapshot;
use super::tree::{Block, Entry, Expr, ExprId, ExprKind, StmtId, StmtKind};
use super::value::Value;
use crate::error::CoreError;
use crate::span::Span;

/// Simplifies the top-level blocks and the body of every analyzed function.
pub fn simplify(program: &mut Program) -> Result<(), CoreError> {
    let mut simplifier = Simplifier::new(program);
    for block in simplifier.program.top_level_blocks() {
        simplifier.stmt(block)?;
    }
    let bodies: Vec<StmtId> = simplifier
        .program
        .analyzed_functions
        .iter()
        .filter_map(|function| simplifier.program.ast.function(*function).body)
        .collect();
    for body in bodies {
        simplifier.stmt(body)?;
    }
    tracing::debug!(
        statements = simplifier.stmts.len(),
        expressions = simplifier.exprs.len(),
        "simplification complete"
    );
    Ok(())
}

/// Whether control never continues past `stmt`.
pub fn always_returns(program: &Program, stmt: StmtId) -> bool {
    match &program.ast.stmt(stmt).kind {
        StmtKind::Return { .. } => true,
        StmtKind::Block(block) => block
            .entries
            .iter()
            .any(|entry| always_returns(program, entry.stmt)),
        StmtKind::If {
            then_branch,
            else_branch: Some(else_branch),
            ..
        } => always_returns(program, *then_branch) && always_returns(program, *else_branch),
        _ => false,
    }
}

pub struct Simplifier<'p> {
    program: &'p mut Program,
    stmts: FxHashMap<StmtId, StmtId>,
    exprs: FxHashMap<ExprId, ExprId>,
}

impl<'p> Simplifier<'p> {
    pub fn new(program: &'p mut Program) -> Self {
        Simplifier {
            program,
            stmts: FxHashMap::default(),
            exprs: FxHashMap::default(),
        }
    }

    pub fn stmt(&mut self, stmt: StmtId) -> Result<StmtId, CoreError> {
        if let Some(result) = self.stmts.get(&stmt) {
            return Ok(*result);
        }
        let span = self.program.ast.stmt(stmt).span;
        let result = match self.program.ast.stmt(stmt).kind.clone() {
            StmtKind::Block(block) => self.block(stmt, block)?,
            StmtKind::Let { symbol, binding } => {
                let simplified = self.variable(binding)?;
                let kind = StmtKind::Let {
                    symbol,
                    binding: simplified,
                };
                self.replace_stmt(stmt, simplified != binding, kind, span)
            }
            StmtKind::Return { value } => {
                let simplified = self.expr(value)?;
                let kind = StmtKind::Return { value: simplified };
                self.replace_stmt(stmt, simplified != value, kind, span)
            }
            StmtKind::Expr(value) => {
                let simplified = self.expr(value)?;
                self.replace_stmt(stmt, simplified != value, StmtKind::Expr(simplified), span)
            }
            // Constant conditions are kept; only the branches are simplified.
            StmtKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                let new_condition = self.expr(condition)?;
                let new_then = self.stmt(then_branch)?;
                let new_else = else_branch.map(|branch| self.stmt(branch)).transpose()?;
                let changed =
                    new_condition != condition || new_then != then_branch || new_else != else_branch;
                self.replace_stmt(
                    stmt,
                    changed,
                    StmtKind::If {
                        condition: new_condition,
                        then_branch: new_then,
                        else_branch: new_else,
                    },
                    span,
                )
            }
            // Function bodies are simplified on their own.
            StmtKind::Function(_)
            | StmtKind::Struct { .. }
            | StmtKind::Typeclass(_)
            | StmtKind::Instance(_) => stmt,
        };
        self.stmts.insert(stmt, result);
        Ok(result)
    }

    fn replace_stmt(&mut self, stmt: StmtId, changed: bool, kind: StmtKind, span: Span) -> StmtId {
        if changed {
            self.program.ast.add_stmt(kind, span)
        } else {
            stmt
        }
    }

    fn block(&mut self, stmt: StmtId, block: Block) -> Result<StmtId, CoreError> {
        if !block.is_top_level && block.value.is_none() && block.entries.len() == 1 {
            return self.stmt(block.entries[0].stmt);
        }

        let mut entries = Vec::with_capacity(block.entries.len());
        let mut terminated = false;
        for entry in &block.entries {
            let simplified = self.stmt(entry.stmt)?;
            entries.push(Entry {
                stmt: simplified,
                scope: entry.scope,
            });
            if always_returns(self.program, simplified) {
                terminated = true;
                break;
            }
        }
        let value = match (terminated, block.value) {
            (false, Some(value)) => Some(self.expr(value)?),
            _ => None,
        };

        if entries == block.entries && value == block.value {
            return Ok(stmt);
        }
        if terminated && entries.len() < block.entries.len() {
            tracing::trace!(
                block = stmt.index(),
                dropped = block.entries.len() - entries.len(),
                "dropped unreachable statements"
            );
        }
        ensure_snapshot(self.program, stmt)?;
        if let Some(target) = self.program.ast.block_mut(stmt) {
            target.entries = entries;
            target.value = value;
        }
        Ok(stmt)
    }

    /// `let` bindings keep their variable node unless the initializer
    /// changes.
    fn variable(&mut self, binding: ExprId) -> Result<ExprId, CoreError> {
        let ExprKind::Variable {
            name,
            annotation,
            init,
        } = self.program.ast.expr(binding).kind.clone()
        else {
            return Err(CoreError::malformed("let without a variable", "simplification"));
        };
        let simplified = self.expr(init)?;
        if simplified == init {
            return Ok(binding);
        }
        Ok(self.derive(
            binding,
            ExprKind::Variable {
                name,
                annotation,
                init: simplified,
            },
        ))
    }

    pub fn expr(&mut self, expr: ExprId) -> Result<ExprId, CoreError> {
        if let Some(result) = self.exprs.get(&expr) {
            return Ok(*result);
        }
        let data = self.program.ast.expr(expr);
        let result = if data.kind.is_value_expression() && data.value.is_scalar() {
            let literal = match data.value {
                Value::Integer(v) => ExprKind::Integer(v),
                Value::Boolean(v) => ExprKind::Boolean(v),
                _ => return Err(CoreError::malformed("non-scalar constant", "simplification")),
            };
            self.derive(expr, literal)
        } else {
            match data.kind.clone() {
                ExprKind::Unary {
                    op,
                    operand,
                    resolution,
                } => {
                    let new_operand = self.expr(operand)?;
                    self.derive_if(expr, new_operand != operand, ExprKind::Unary {
                        op,
                        operand: new_operand,
                        resolution,
                    })
                }
                ExprKind::Binary {
                    op,
                    lhs,
                    rhs,
                    resolution,
                } => {
                    let new_lhs = self.expr(lhs)?;
                    let new_rhs = self.expr(rhs)?;
                    self.derive_if(expr, new_lhs != lhs || new_rhs != rhs, ExprKind::Binary {
                        op,
                        lhs: new_lhs,
                        rhs: new_rhs,
                        resolution,
                    })
                }
                ExprKind::Call {
                    callee,
                    args,
                    resolution,
                } => {
                    let new_args = args
                        .iter()
                        .map(|arg| self.expr(*arg))
                        .collect::<Result<Vec<_>, _>>()?;
                    self.derive_if(expr, new_args != args, ExprKind::Call {
                        callee,
                        args: new_args,
                        resolution,
                    })
                }
                ExprKind::Member {
                    base,
                    member,
                    referenced,
                } => {
                    let new_base = self.expr(base)?;
                    self.derive_if(expr, new_base != base, ExprKind::Member {
                        base: new_base,
                        member,
                        referenced,
                    })
                }
                ExprKind::StructLiteral {
                    ty_expr,
                    fields,
                    layout,
                } => {
                    let mut new_fields = Vec::with_capacity(fields.len());
                    for (name, value) in &fields {
                        new_fields.push((name.clone(), self.expr(*value)?));
                    }
                    let new_layout = layout
                        .iter()
                        .map(|slot| self.expr(*slot))
                        .collect::<Result<Vec<_>, _>>()?;
                    let changed = new_fields != fields || new_layout != layout;
                    self.derive_if(expr, changed, ExprKind::StructLiteral {
                        ty_expr,
                        fields: new_fields,
                        layout: new_layout,
                    })
                }
                _ => expr,
            }
        };
        self.exprs.insert(expr, result);
        Ok(result)
    }

    fn derive_if(&mut self, expr: ExprId, changed: bool, kind: ExprKind) -> ExprId {
        if changed { self.derive(expr, kind) } else { expr }
    }

    /// New node with `kind` and the analysis results of `from`.
    fn derive(&mut self, from: ExprId, kind: ExprKind) -> ExprId {
        let source = self.program.ast.expr(from);
        let copy = Expr {
            kind,
            span: source.span,
            ty: source.ty,
            value: source.value.clone(),
        };
        self.program.ast.push_expr(copy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use crate::sema::analyze::analyze;
    use crate::sema::preanalyze::preanalyze_module;
    use crate::sema::print::render_stmt;
    use crate::sema::tree::FunctionId;
    use crate::span::FileId;

    fn simplified(source: &str) -> Program {
        let module = parse(FileId::UNIT, source).expect("parse");
        let mut program = Program::new("main", false);
        let scope = program.module_scope;
        program.module_block =
            Some(preanalyze_module(&mut program, &module, scope).expect("preanalyze"));
        program.scopes.close(scope);
        let mut program = analyze(program).expect("analyze");
        simplify(&mut program).expect("simplify");
        program
    }

    fn body_of(program: &Program, name: &str) -> StmtId {
        let function: FunctionId = program
            .ast
            .function_ids()
            .find(|id| program.ast.function(*id).name == name)
            .expect("function");
        program.ast.function(function).body.expect("body")
    }

    #[test]
    fn statements_after_a_return_are_dropped() {
        let program = simplified("fn f() -> integer { return 1; let x = 2; return x; }");
        let body = program.ast.block(body_of(&program, "f")).expect("block");
        assert_eq!(body.entries.len(), 1);
        assert!(matches!(
            program.ast.stmt(body.entries[0].stmt).kind,
            StmtKind::Return { .. }
        ));
    }

    #[test]
    fn both_branches_returning_ends_the_block() {
        let program = simplified(
            "fn f(b : boolean) -> integer {
                 if b { return 1; } else { return 2; }
                 return 3;
             }",
        );
        let body = program.ast.block(body_of(&program, "f")).expect("block");
        assert_eq!(body.entries.len(), 1);
        assert!(always_returns(&program, body.entries[0].stmt));
    }

    #[test]
    fn single_statement_blocks_are_flattened() {
        let program = simplified("fn f(b : boolean) -> integer { if b { return 1; } return 2; }");
        let body = program.ast.block(body_of(&program, "f")).expect("block");
        let StmtKind::If { then_branch, .. } = program.ast.stmt(body.entries[0].stmt).kind else {
            panic!("if");
        };
        assert!(matches!(program.ast.stmt(then_branch).kind, StmtKind::Return { .. }));
        // Function bodies keep their block.
        assert!(program.ast.block(body_of(&program, "f")).is_some());
    }

    #[test]
    fn flattening_equals_simplifying_the_statement() {
        let mut program = simplified("fn f() -> integer { { return 1 + 1; } }");
        let body = program.ast.block(body_of(&program, "f")).expect("block").clone();
        let flattened = body.entries[0].stmt;
        let snapshot = *body.snapshot.get().expect("body rewritten");
        let original = program.ast.block(snapshot).expect("snapshot").entries[0].stmt;
        let inner = program.ast.block(original).expect("inner block").entries[0].stmt;

        let mut simplifier = Simplifier::new(&mut program);
        let direct = simplifier.stmt(inner).expect("simplify");
        assert_eq!(render_stmt(&program, direct), render_stmt(&program, flattened));
    }

    #[test]
    fn scalar_constants_become_literals() {
        let program = simplified(
            "let base = 40;
             fn f() -> integer { return base + 2; }",
        );
        let body = program.ast.block(body_of(&program, "f")).expect("block");
        let StmtKind::Return { value } = program.ast.stmt(body.entries[0].stmt).kind else {
            panic!("return");
        };
        assert!(matches!(program.ast.expr(value).kind, ExprKind::Integer(42)));
        assert_eq!(program.ast.expr(value).ty, Some(crate::sema::types::TypeId::INTEGER));
    }

    #[test]
    fn constant_if_conditions_are_kept() {
        let program = simplified("fn f() -> integer { if 1 == 1 { return 1; } return 2; }");
        let body = program.ast.block(body_of(&program, "f")).expect("block");
        assert_eq!(body.entries.len(), 2);
        let StmtKind::If { condition, .. } = program.ast.stmt(body.entries[0].stmt).kind else {
            panic!("if");
        };
        assert!(matches!(program.ast.expr(condition).kind, ExprKind::Boolean(true)));
    }

    #[test]
    fn unchanged_blocks_take_no_snapshot() {
        let program = simplified("fn f(n : integer) -> integer { return n; }");
        let body = program.ast.block(body_of(&program, "f")).expect("block");
        assert!(body.snapshot.get().is_none());
    }
}
