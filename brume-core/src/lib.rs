//! Middle end of the Brume compiler.
//!
//! The pipeline over one compilation unit is:
//!
//!   source .brm (+ prelude/*.brm)
//!     -> lexer / parser   (concrete syntax tree)
//!     -> sema::preanalyze (semantic tree, scopes, symbols)
//!     -> sema::analyze    (types, overloads, typeclass instances)
//!     -> sema::simplify   (constant literals, dead code, block flattening)
//!     -> ir::lower        (linear IR with unified returns)
//!
//! Backends consume the `ir::IrModule`; the exported surface of a unit is
//! described by `interface::ModuleInterface`.

// ---------------------------------------------------------------------
// Error handling and diagnostics
// ---------------------------------------------------------------------

pub mod span;
pub mod diagnostic;
pub mod error;

// ---------------------------------------------------------------------
// Front-end: lexing and parsing
// ---------------------------------------------------------------------

pub mod lexer;
pub mod parser;
pub mod ast;

// ---------------------------------------------------------------------
// Semantic analysis and lowering
// ---------------------------------------------------------------------

pub mod sema;
pub mod ir;

// ---------------------------------------------------------------------
// Prelude, interfaces and compiler orchestration
// ---------------------------------------------------------------------

pub mod prelude;
pub mod interface;
pub mod compiler;

// ---------------------------------------------------------------------
// Public API re-exports
// ---------------------------------------------------------------------

pub use compiler::{CompilationArtifact, CompileOptions, analyze_unit, compile_unit};
pub use error::CoreError;
pub use interface::ModuleInterface;
pub use ir::IrModule;
