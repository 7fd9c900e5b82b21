//! Overload resolution.
//!
//! Function calls and builtin operators share one selection rule: keep the
//! candidates whose parameter types accept the argument types, and require
//! exactly one survivor.

use super::tree::OperatorResolution;
use super::types::{TypeId, TypeTable};
use crate::ast::{BinaryOp, UnaryOp};
use crate::error::CoreError;
use crate::ir::Opcode;
use crate::span::Span;

struct BuiltinOperator {
    symbol: &'static str,
    params: &'static [TypeId],
    result: TypeId,
    opcode: Opcode,
}

const INT2: &[TypeId] = &[TypeId::INTEGER, TypeId::INTEGER];
const BOOL2: &[TypeId] = &[TypeId::BOOLEAN, TypeId::BOOLEAN];

const BUILTIN_OPERATORS: &[BuiltinOperator] = &[
    BuiltinOperator { symbol: "+", params: INT2, result: TypeId::INTEGER, opcode: Opcode::IntegerAddition },
    BuiltinOperator { symbol: "-", params: INT2, result: TypeId::INTEGER, opcode: Opcode::IntegerSubtraction },
    BuiltinOperator { symbol: "*", params: INT2, result: TypeId::INTEGER, opcode: Opcode::IntegerMultiplication },
    BuiltinOperator { symbol: "==", params: INT2, result: TypeId::BOOLEAN, opcode: Opcode::IntegerEqual },
    BuiltinOperator { symbol: "!=", params: INT2, result: TypeId::BOOLEAN, opcode: Opcode::IntegerNotEqual },
    BuiltinOperator { symbol: "<", params: INT2, result: TypeId::BOOLEAN, opcode: Opcode::IntegerLess },
    BuiltinOperator { symbol: "<=", params: INT2, result: TypeId::BOOLEAN, opcode: Opcode::IntegerLessEqual },
    BuiltinOperator { symbol: ">", params: INT2, result: TypeId::BOOLEAN, opcode: Opcode::IntegerGreater },
    BuiltinOperator { symbol: ">=", params: INT2, result: TypeId::BOOLEAN, opcode: Opcode::IntegerGreaterEqual },
    BuiltinOperator { symbol: "==", params: BOOL2, result: TypeId::BOOLEAN, opcode: Opcode::BooleanEqual },
    BuiltinOperator { symbol: "!=", params: BOOL2, result: TypeId::BOOLEAN, opcode: Opcode::BooleanNotEqual },
    BuiltinOperator { symbol: "-", params: &[TypeId::INTEGER], result: TypeId::INTEGER, opcode: Opcode::IntegerNegation },
    BuiltinOperator { symbol: "!", params: &[TypeId::BOOLEAN], result: TypeId::BOOLEAN, opcode: Opcode::BooleanNegation },
];

/// Picks the single candidate whose parameters accept `args`.
pub fn select<K: Copy>(
    types: &TypeTable,
    name: &str,
    candidates: impl IntoIterator<Item = (K, Vec<TypeId>)>,
    args: &[TypeId],
    span: Span,
) -> Result<K, CoreError> {
    let viable: Vec<K> = candidates
        .into_iter()
        .filter(|(_, params)| {
            params.len() == args.len()
                && params
                    .iter()
                    .zip(args)
                    .all(|(param, arg)| types.matches(*param, *arg))
        })
        .map(|(key, _)| key)
        .collect();

    match viable.as_slice() {
        [] => Err(CoreError::NoMatchingOverload {
            name: describe_call(types, name, args),
            span,
        }),
        [single] => Ok(*single),
        many => Err(CoreError::AmbiguousOverload {
            name: describe_call(types, name, args),
            candidates: many.len(),
            span,
        }),
    }
}

fn describe_call(types: &TypeTable, name: &str, args: &[TypeId]) -> String {
    let args: Vec<&str> = args.iter().map(|arg| types.name(*arg)).collect();
    format!("{name}({})", args.join(", "))
}

fn resolve_operator(
    types: &TypeTable,
    symbol: &str,
    args: &[TypeId],
    span: Span,
) -> Result<OperatorResolution, CoreError> {
    let candidates = BUILTIN_OPERATORS
        .iter()
        .filter(|op| op.symbol == symbol)
        .map(|op| (op, op.params.to_vec()));
    let op = select(types, &format!("operator {symbol}"), candidates, args, span)?;
    tracing::trace!(operator = symbol, opcode = ?op.opcode, "resolved builtin operator");
    Ok(OperatorResolution {
        opcode: op.opcode,
        result: op.result,
    })
}

pub fn resolve_binary(
    types: &TypeTable,
    op: BinaryOp,
    lhs: TypeId,
    rhs: TypeId,
    span: Span,
) -> Result<OperatorResolution, CoreError> {
    resolve_operator(types, &op.to_string(), &[lhs, rhs], span)
}

pub fn resolve_unary(
    types: &TypeTable,
    op: UnaryOp,
    operand: TypeId,
    span: Span,
) -> Result<OperatorResolution, CoreError> {
    resolve_operator(types, &op.to_string(), &[operand], span)
}
