//! Compile-time knowledge about the value of an expression.

use super::tree::{OverloadSetId, TypeclassId};
use super::types::TypeId;
use crate::ir::Opcode;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Value {
    /// Only known when the program runs.
    #[default]
    Runtime,
    Integer(i64),
    Boolean(bool),
    Type(TypeId),
    Typeclass(TypeclassId),
    OverloadSet(OverloadSetId),
    Struct {
        ty: TypeId,
        fields: Vec<Value>,
    },
    /// A field of a struct type named statically, as in `Point.x`.
    Member {
        owner: TypeId,
        index: usize,
    },
}

impl Value {
    pub fn is_constant(&self) -> bool {
        match self {
            Value::Runtime => false,
            Value::Struct { fields, .. } => fields.iter().all(Value::is_constant),
            _ => true,
        }
    }

    /// Integer and boolean constants: the ones simplification turns into
    /// literal nodes.
    pub fn is_scalar(&self) -> bool {
        matches!(self, Value::Integer(_) | Value::Boolean(_))
    }

    /// Values that exist only during compilation and have no runtime
    /// representation.
    pub fn is_compile_time_only(&self) -> bool {
        matches!(
            self,
            Value::Type(_) | Value::Typeclass(_) | Value::OverloadSet(_) | Value::Member { .. }
        )
    }

    /// Structural equality between two constants. Runtime values are never
    /// equal to anything, including themselves.
    pub fn is_equal(&self, other: &Value) -> bool {
        self.is_constant() && other.is_constant() && self == other
    }

    pub fn as_type(&self) -> Option<TypeId> {
        match self {
            Value::Type(ty) => Some(*ty),
            _ => None,
        }
    }
}

pub fn fold_unary(opcode: Opcode, operand: &Value) -> Value {
    match (opcode, operand) {
        (Opcode::IntegerNegation, Value::Integer(v)) => {
            v.checked_neg().map_or(Value::Runtime, Value::Integer)
        }
        (Opcode::BooleanNegation, Value::Boolean(v)) => Value::Boolean(!v),
        _ => Value::Runtime,
    }
}

/// Folds a builtin binary operation over two constants. Overflow leaves the
/// result unknown so the operation is kept for run time.
pub fn fold_binary(opcode: Opcode, lhs: &Value, rhs: &Value) -> Value {
    match (lhs, rhs) {
        (Value::Integer(a), Value::Integer(b)) => {
            let (a, b) = (*a, *b);
            match opcode {
                Opcode::IntegerAddition => a.checked_add(b).map_or(Value::Runtime, Value::Integer),
                Opcode::IntegerSubtraction => {
                    a.checked_sub(b).map_or(Value::Runtime, Value::Integer)
                }
                Opcode::IntegerMultiplication => {
                    a.checked_mul(b).map_or(Value::Runtime, Value::Integer)
                }
                Opcode::IntegerEqual => Value::Boolean(a == b),
                Opcode::IntegerNotEqual => Value::Boolean(a != b),
                Opcode::IntegerLess => Value::Boolean(a < b),
                Opcode::IntegerLessEqual => Value::Boolean(a <= b),
                Opcode::IntegerGreater => Value::Boolean(a > b),
                Opcode::IntegerGreaterEqual => Value::Boolean(a >= b),
                _ => Value::Runtime,
            }
        }
        (Value::Boolean(a), Value::Boolean(b)) => match opcode {
            Opcode::BooleanEqual => Value::Boolean(a == b),
            Opcode::BooleanNotEqual => Value::Boolean(a != b),
            _ => Value::Runtime,
        },
        _ => Value::Runtime,
    }
}
