use log::{debug, trace};
use oxc_allocator::Allocator;
use oxc_ast::ast::*;
use oxc_parser::{Parser as OxcParser, ParserReturn};
use oxc_span::SourceType;
use serde::Serialize;
use std::{fs, path::Path};

use crate::error::{EvalError, EvalResult};

/// How a config module publishes its export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleKind {
    /// CommonJS: `module.exports = ...`
    Script,
    /// ES module: `export default ...`
    Module,
}

pub fn read_source(path: &Path) -> EvalResult<String> {
    trace!("Reading config source: {}", path.display());
    fs::read_to_string(path).map_err(|source| EvalError::Io { path: path.to_path_buf(), source })
}

/// Parse `source` into the allocator. Any diagnostic fails the whole module.
pub fn parse_module<'a>(
    allocator: &'a Allocator,
    path: &Path,
    source: &'a str,
) -> EvalResult<&'a Program<'a>> {
    let st = source_type_for(path);
    let ParserReturn { program, errors, panicked, .. } =
        OxcParser::new(allocator, source, st).parse();

    if let Some(first) = errors.first() {
        debug!("{} parse diagnostics in {}", errors.len(), path.display());
        return Err(EvalError::Parse { path: path.to_path_buf(), message: first.to_string() });
    }
    if panicked {
        return Err(EvalError::Parse {
            path: path.to_path_buf(),
            message: "parser aborted".to_string(),
        });
    }

    trace!("Parsed {} top-level statements in {}", program.body.len(), path.display());
    Ok(allocator.alloc(program))
}

pub fn module_kind(program: &Program) -> ModuleKind {
    let is_module = program.body.iter().any(|stmt| {
        matches!(
            stmt,
            Statement::ImportDeclaration(_)
                | Statement::ExportAllDeclaration(_)
                | Statement::ExportDefaultDeclaration(_)
                | Statement::ExportNamedDeclaration(_)
                | Statement::TSExportAssignment(_)
        )
    });
    if is_module { ModuleKind::Module } else { ModuleKind::Script }
}

pub(crate) fn source_type_for(path: &Path) -> SourceType {
    let ext = path.extension().and_then(|e| e.to_str());

    // Config files are parsed as modules whatever their extension so that `export` and
    // top-level `await` are accepted in `.js` files too.
    SourceType::default()
        .with_jsx(matches!(ext, Some("tsx") | Some("jsx")))
        .with_typescript(matches!(ext, Some("ts") | Some("tsx") | Some("mts") | Some("cts")))
        .with_module(true)
}
