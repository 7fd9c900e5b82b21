//! Linear intermediate representation handed to backends.
//!
//! A function is a flat list of instructions. Control flow is explicit:
//! `jump` takes a condition and a target label, `phi` merges values by the
//! label control arrived from. Every function has a single `return` once
//! lowering has unified its return paths.

pub mod lower;

use core::fmt;

pub use lower::lower_program;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IrType {
    Integer,
    Boolean,
    Struct { name: String, fields: Vec<IrType> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IrValue {
    /// Result of instructions that produce nothing.
    Void,
    Integer(i64),
    Boolean(bool),
    Variable {
        id: u32,
        ty: IrType,
        parameter: bool,
    },
    Label(String),
    Struct {
        ty: IrType,
        fields: Vec<IrValue>,
    },
    Function(String),
}

impl IrValue {
    pub fn is_variable(&self) -> bool {
        matches!(self, IrValue::Variable { .. })
    }

    pub fn ty(&self) -> Option<IrType> {
        match self {
            IrValue::Integer(_) => Some(IrType::Integer),
            IrValue::Boolean(_) => Some(IrType::Boolean),
            IrValue::Variable { ty, .. } | IrValue::Struct { ty, .. } => Some(ty.clone()),
            IrValue::Void | IrValue::Label(_) | IrValue::Function(_) => None,
        }
    }

    pub fn label(name: impl Into<String>) -> Self {
        IrValue::Label(name.into())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    Noop,
    Pass,
    Materialize,
    Destroy,
    Jump,
    Return,
    Phi,
    Call,
    BooleanNegation,
    IntegerNegation,
    IntegerAddition,
    IntegerSubtraction,
    IntegerMultiplication,
    IntegerEqual,
    IntegerNotEqual,
    IntegerLess,
    IntegerLessEqual,
    IntegerGreater,
    IntegerGreaterEqual,
    BooleanEqual,
    BooleanNotEqual,
    Member,
    Construct,
}

impl Opcode {
    pub fn mnemonic(self) -> &'static str {
        match self {
            Opcode::Noop => "noop",
            Opcode::Pass => "pass",
            Opcode::Materialize => "materialize",
            Opcode::Destroy => "destroy",
            Opcode::Jump => "jump",
            Opcode::Return => "return",
            Opcode::Phi => "phi",
            Opcode::Call => "call",
            Opcode::BooleanNegation => "boolean-negation",
            Opcode::IntegerNegation => "integer-negation",
            Opcode::IntegerAddition => "integer-addition",
            Opcode::IntegerSubtraction => "integer-subtraction",
            Opcode::IntegerMultiplication => "integer-multiplication",
            Opcode::IntegerEqual => "integer-equal",
            Opcode::IntegerNotEqual => "integer-not-equal",
            Opcode::IntegerLess => "integer-less",
            Opcode::IntegerLessEqual => "integer-less-equal",
            Opcode::IntegerGreater => "integer-greater",
            Opcode::IntegerGreaterEqual => "integer-greater-equal",
            Opcode::BooleanEqual => "boolean-equal",
            Opcode::BooleanNotEqual => "boolean-not-equal",
            Opcode::Member => "member",
            Opcode::Construct => "construct",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub label: Option<String>,
    /// Label of the control-flow edge this instruction's result feeds.
    pub result_label: Option<String>,
    pub op: Opcode,
    pub operands: Vec<IrValue>,
    pub result: IrValue,
}

impl Instruction {
    pub fn new(op: Opcode, operands: Vec<IrValue>, result: IrValue) -> Self {
        Instruction {
            label: None,
            result_label: None,
            op,
            operands,
            result,
        }
    }

    pub fn labeled(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn is(&self, op: Opcode) -> bool {
        self.op == op
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IrFunction {
    pub name: String,
    /// Module and type names enclosing the function, outermost first.
    pub scopes: Vec<String>,
    /// Position in its overload set; disambiguates overloads.
    pub overload_index: usize,
    pub parameters: Vec<IrValue>,
    pub return_type: IrType,
    pub instructions: Vec<Instruction>,
    pub is_exported: bool,
    pub parent_type: Option<String>,
}

impl IrFunction {
    pub fn mangled_name(&self) -> String {
        mangle(&self.scopes, &self.name, self.overload_index)
    }

    pub fn count(&self, op: Opcode) -> usize {
        self.instructions.iter().filter(|inst| inst.is(op)).count()
    }
}

pub fn mangle(scopes: &[String], name: &str, overload_index: usize) -> String {
    let mut mangled = String::new();
    for scope in scopes {
        mangled.push_str(scope);
        mangled.push_str("::");
    }
    mangled.push_str(name);
    if overload_index > 0 {
        mangled.push('#');
        mangled.push_str(&overload_index.to_string());
    }
    mangled
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IrModule {
    pub name: String,
    pub functions: Vec<IrFunction>,
}

impl IrModule {
    pub fn function(&self, mangled: &str) -> Option<&IrFunction> {
        self.functions.iter().find(|f| f.mangled_name() == mangled)
    }

    pub fn functions_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a IrFunction> + 'a {
        self.functions.iter().filter(move |f| f.name == name)
    }
}

impl fmt::Display for IrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IrType::Integer => f.write_str("integer"),
            IrType::Boolean => f.write_str("boolean"),
            IrType::Struct { name, .. } => f.write_str(name),
        }
    }
}

impl fmt::Display for IrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IrValue::Void => f.write_str("()"),
            IrValue::Integer(v) => write!(f, "{v}"),
            IrValue::Boolean(v) => write!(f, "{v}"),
            IrValue::Variable { id, ty, parameter } => {
                let sigil = if *parameter { "%arg" } else { "%" };
                write!(f, "{sigil}{id}: {ty}")
            }
            IrValue::Label(name) => write!(f, "@{name}"),
            IrValue::Struct { ty, fields } => {
                write!(f, "{ty} {{ ")?;
                for (index, field) in fields.iter().enumerate() {
                    if index > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{field}")?;
                }
                f.write_str(" }")
            }
            IrValue::Function(name) => write!(f, "&{name}"),
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(label) = &self.label {
            writeln!(f, "{label}:")?;
        }
        f.write_str("    ")?;
        if self.result != IrValue::Void {
            write!(f, "{} = ", self.result)?;
        }
        f.write_str(self.op.mnemonic())?;
        for (index, operand) in self.operands.iter().enumerate() {
            f.write_str(if index == 0 { " " } else { ", " })?;
            write!(f, "{operand}")?;
        }
        if let Some(label) = &self.result_label {
            write!(f, " -> @{label}")?;
        }
        Ok(())
    }
}

impl fmt::Display for IrFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_exported {
            f.write_str("export ")?;
        }
        write!(f, "fn {}(", self.mangled_name())?;
        for (index, param) in self.parameters.iter().enumerate() {
            if index > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{param}")?;
        }
        writeln!(f, ") -> {} {{", self.return_type)?;
        for instruction in &self.instructions {
            writeln!(f, "{instruction}")?;
        }
        f.write_str("}")
    }
}

impl fmt::Display for IrModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "module {}", self.name)?;
        for function in &self.functions {
            writeln!(f)?;
            writeln!(f, "{function}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mangles_with_scope_chain_and_overload_index() {
        let scopes = vec!["main".to_string(), "Equality(integer)".to_string()];
        assert_eq!(mangle(&scopes, "equal", 0), "main::Equality(integer)::equal");
        assert_eq!(mangle(&scopes[..1], "f", 2), "main::f#2");
    }

    #[test]
    fn renders_labeled_instructions() {
        let var = IrValue::Variable {
            id: 3,
            ty: IrType::Boolean,
            parameter: false,
        };
        let negate = Instruction::new(Opcode::BooleanNegation, vec![IrValue::Boolean(true)], var);
        let noop = Instruction::new(Opcode::Noop, vec![], IrValue::label("__else_0")).labeled("__else_0");
        assert_eq!(negate.to_string(), "    %3: boolean = boolean-negation true");
        assert_eq!(noop.to_string(), "__else_0:\n    @__else_0 = noop");
    }
}
