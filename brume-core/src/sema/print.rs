//! Source-like rendering of the semantic tree, for tests and debugging.

use std::fmt::Write;

use super::Program;
use super::tree::{ExprId, ExprKind, FunctionId, StmtId, StmtKind};

pub fn render_stmt(program: &Program, stmt: StmtId) -> String {
    let mut printer = Printer::new(program);
    printer.stmt(stmt);
    printer.out
}

pub fn render_expr(program: &Program, expr: ExprId) -> String {
    let mut out = String::new();
    Printer::new(program).expr_into(&mut out, expr);
    out
}

pub fn render_function(program: &Program, function: FunctionId) -> String {
    let mut printer = Printer::new(program);
    printer.function(function);
    printer.out
}

struct Printer<'p> {
    program: &'p Program,
    out: String,
    indent: usize,
}

impl<'p> Printer<'p> {
    fn new(program: &'p Program) -> Self {
        Printer {
            program,
            out: String::new(),
            indent: 0,
        }
    }

    fn line(&mut self, text: &str) {
        for _ in 0..self.indent {
            self.out.push_str("    ");
        }
        self.out.push_str(text);
        self.out.push('\n');
    }

    fn render(&self, expr: ExprId) -> String {
        let mut out = String::new();
        self.expr_into(&mut out, expr);
        out
    }

    fn stmt(&mut self, stmt: StmtId) {
        let program = self.program;
        match &program.ast.stmt(stmt).kind {
            StmtKind::Block(block) => {
                self.line("{");
                self.indent += 1;
                for entry in &block.entries {
                    self.stmt(entry.stmt);
                }
                if let Some(value) = block.value {
                    let value = self.render(value);
                    self.line(&value);
                }
                self.indent -= 1;
                self.line("}");
            }
            StmtKind::Let { binding, .. } => {
                let text = format!("let {};", self.render(*binding));
                self.line(&text);
            }
            StmtKind::Function(function) => self.function(*function),
            StmtKind::Return { value } => {
                let text = format!("return {};", self.render(*value));
                self.line(&text);
            }
            StmtKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                let text = format!("if {}", self.render(*condition));
                self.line(&text);
                self.nested(*then_branch);
                if let Some(branch) = else_branch {
                    self.line("else");
                    self.nested(*branch);
                }
            }
            StmtKind::Expr(value) => {
                let text = format!("{};", self.render(*value));
                self.line(&text);
            }
            StmtKind::Struct { ty } => {
                let data = program.types.get(*ty);
                let fields: Vec<String> = data
                    .struct_fields()
                    .unwrap_or_default()
                    .iter()
                    .map(|field| self.render(*field))
                    .collect();
                let text = format!("struct {} {{ {} }}", data.name, fields.join(", "));
                self.line(&text);
            }
            StmtKind::Typeclass(typeclass) => {
                let data = program.ast.typeclass(*typeclass);
                let params: Vec<String> = data.params.iter().map(|p| self.render(*p)).collect();
                let text = format!("typeclass {}({})", data.name, params.join(", "));
                self.line(&text);
            }
            StmtKind::Instance(instance) => {
                let data = program.ast.instance(*instance);
                let args: Vec<String> = data.arguments.iter().map(|a| self.render(*a)).collect();
                let text = format!(
                    "instance {}({})",
                    self.render(data.typeclass_expr),
                    args.join(", ")
                );
                self.line(&text);
            }
        }
    }

    /// Branches that are not blocks are indented like block contents.
    fn nested(&mut self, stmt: StmtId) {
        if self.program.ast.block(stmt).is_some() {
            self.stmt(stmt);
        } else {
            self.indent += 1;
            self.stmt(stmt);
            self.indent -= 1;
        }
    }

    fn function(&mut self, function: FunctionId) {
        let program = self.program;
        let data = program.ast.function(function);
        let params: Vec<String> = data.params.iter().map(|p| self.render(*p)).collect();
        let mut header = format!("fn {}({})", data.name, params.join(", "));
        match (data.return_type, data.return_type_expr) {
            (Some(ty), _) => {
                let _ = write!(header, " -> {}", program.type_name(ty));
            }
            (None, Some(expr)) => {
                let _ = write!(header, " -> {}", self.render(expr));
            }
            (None, None) => {}
        }
        if let Some(slot) = data.vtable_slot {
            let _ = write!(header, " [slot {slot}]");
        }
        match data.body {
            Some(body) => {
                self.line(&header);
                self.stmt(body);
            }
            None => {
                header.push(';');
                self.line(&header);
            }
        }
    }

    fn expr_into(&self, out: &mut String, expr: ExprId) {
        let ast = &self.program.ast;
        let _ = match &ast.expr(expr).kind {
            ExprKind::Integer(v) => write!(out, "{v}"),
            ExprKind::Boolean(v) => write!(out, "{v}"),
            ExprKind::Identifier { name, .. } => write!(out, "{name}"),
            ExprKind::Unary { op, operand, .. } => {
                write!(out, "{op}{}", self.render(*operand))
            }
            ExprKind::Binary { op, lhs, rhs, .. } => {
                write!(out, "({} {op} {})", self.render(*lhs), self.render(*rhs))
            }
            ExprKind::Call { callee, args, .. } => {
                let args: Vec<String> = args.iter().map(|arg| self.render(*arg)).collect();
                write!(out, "{}({})", self.render(*callee), args.join(", "))
            }
            ExprKind::Member { base, member, .. } => {
                write!(out, "{}.{member}", self.render(*base))
            }
            ExprKind::StructLiteral { ty_expr, fields, .. } => {
                let fields: Vec<String> = fields
                    .iter()
                    .map(|(name, value)| format!("{name}: {}", self.render(*value)))
                    .collect();
                write!(out, "{} {{ {} }}", self.render(*ty_expr), fields.join(", "))
            }
            ExprKind::TypeRef(ty) => write!(out, "{}", self.program.type_name(*ty)),
            ExprKind::TypeclassRef(typeclass) => {
                write!(out, "{}", ast.typeclass(*typeclass).name)
            }
            ExprKind::OverloadSetRef(set) => write!(out, "{}", ast.overload_set(*set).name),
            ExprKind::Parameter {
                name, type_expr, ..
            } => write!(out, "{name} : {}", self.render(*type_expr)),
            ExprKind::Field {
                name,
                type_expr,
                default,
                ..
            } => {
                let _ = write!(out, "{name} : {}", self.render(*type_expr));
                match default {
                    Some(default) => write!(out, " = {}", self.render(*default)),
                    None => Ok(()),
                }
            }
            ExprKind::Variable {
                name,
                annotation,
                init,
            } => {
                let _ = write!(out, "{name}");
                if let Some(annotation) = annotation {
                    let _ = write!(out, " : {}", self.render(*annotation));
                }
                write!(out, " = {}", self.render(*init))
            }
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use crate::sema::preanalyze::preanalyze_module;
    use crate::span::FileId;

    #[test]
    fn renders_functions_as_source() {
        let module = parse(
            FileId::UNIT,
            "fn f(n : integer) -> integer { let m = n * 2; if m == 4 { return 1; } return -m; }",
        )
        .expect("parse");
        let mut program = Program::new("main", false);
        let scope = program.module_scope;
        preanalyze_module(&mut program, &module, scope).expect("preanalyze");
        let function = program.ast.function_ids().next().expect("function");

        let text = render_function(&program, function);
        let expected = "\
fn f(n : integer) -> integer
{
    let m = (n * 2);
    if (m == 4)
    {
        return 1;
    }
    return -m;
}
";
        assert_eq!(text, expected);
    }
}
