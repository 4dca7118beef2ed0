//! Matcha compiler
//!
//! Compiles `.mtc` match-transform decision programs — components of
//! bundles of units whose `if`/`switch`/`goto`/`return` trees describe
//! flag and feature computation over a fixed key/value context — into
//! flat, minimized return-point tables ready for bundle emission.

pub mod compiler;
pub mod diagnostics;

pub use compiler::analyzer::ir::{
    AndExpr, Bundle, Component, OrExpr, ReturnPoint, TestExpr, Unit,
};
pub use compiler::analyzer::{AnalyzeError, Analyzer, DEFAULT_OPTIMIZATION_LEVEL};
pub use compiler::emit::{BundleWriter, EmitError};
pub use compiler::keys::{KeyRegistry, KeyRegistryError};
pub use compiler::ops::{OpRegistryError, TestOpRegistry};
pub use compiler::parser::{ParseError, Parser};
pub use compiler::scanner::{ScanError, Scanner};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CompileError {
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Analyze(#[from] AnalyzeError),
    #[error(transparent)]
    Emit(#[from] EmitError),
    #[error(transparent)]
    Keys(#[from] KeyRegistryError),
    #[error(transparent)]
    Ops(#[from] OpRegistryError),
}

/// Options for the compile pipeline. The optimization level gates the
/// simplification stages: 0 expands to DNF only, 1 adds reduction and
/// merging, 2 adds cross-row dismissal.
#[derive(Debug, Clone)]
pub struct CompileOptions {
    pub optimization_level: u8,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            optimization_level: DEFAULT_OPTIMIZATION_LEVEL,
        }
    }
}

/// Compiles one source file into an analyzed component.
///
/// `key_registry` supplies declared keys and receives any keys pulled in
/// by the file's `import` statements; `ops` supplies test operator
/// metadata.
pub fn compile_source(
    source: &str,
    file_name: &str,
    short_file_name: &str,
    key_registry: &mut KeyRegistry,
    ops: &TestOpRegistry,
    options: &CompileOptions,
) -> Result<Component, CompileError> {
    let scanner = Scanner::new(source, file_name, short_file_name);
    let mut parser = Parser::new(scanner, key_registry);
    let declaration = parser.component_declaration()?;
    let analyzer =
        Analyzer::with_optimization_level(&declaration, ops, options.optimization_level);
    Ok(analyzer.component()?)
}
