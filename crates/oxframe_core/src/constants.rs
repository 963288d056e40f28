//! Constants shared by parsing, collection, and the sandbox.
//!
//! ## Supported Extensions
//!
//! - **TypeScript**: `.ts`, `.mts` (ES module), `.cts` (CommonJS)
//! - **JavaScript**: `.js`, `.mjs` (ES module), `.cjs` (CommonJS)
//!
//! JSX variants are accepted by the parser but are not expected in config files.

/// File extensions a framework config module may use
pub const CONFIG_EXTENSIONS: &[&str] = &[
    "js",  // JavaScript
    "mjs", // JavaScript module
    "cjs", // JavaScript CommonJS
    "ts",  // TypeScript
    "mts", // TypeScript module
    "cts", // TypeScript CommonJS
];

/// Directories never descended into when collecting config files
pub const SKIPPED_DIRS: &[&str] = &["node_modules", ".git"];

/// Maximum nesting of function calls inside one evaluation
pub const MAX_CALL_DEPTH: usize = 64;

/// Upper bound on virtual timer callbacks run while settling a single promise
pub const MAX_TIMER_TICKS: usize = 10_000;

/// Builtin helpers that return their first argument unchanged
pub const IDENTITY_HELPERS: &[&str] = &["defineConfig", "defineNuxtConfig", "defineUserConfig"];

/// Module specifiers served by the sandbox's `path` implementation
pub const PATH_MODULES: &[&str] = &["path", "node:path"];

/// Module specifiers served with the Next.js build phase constants
pub const NEXT_CONSTANTS_MODULES: &[&str] = &["next/constants", "next/constants.js"];

/// Build phase names exported by `next/constants` and the tokens Next.js passes for them
pub const NEXT_PHASES: &[(&str, &str)] = &[
    ("PHASE_EXPORT", "phase-export"),
    ("PHASE_PRODUCTION_BUILD", "phase-production-build"),
    ("PHASE_PRODUCTION_SERVER", "phase-production-server"),
    ("PHASE_DEVELOPMENT_SERVER", "phase-development-server"),
    ("PHASE_TEST", "phase-test"),
    ("PHASE_INFO", "phase-info"),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_extensions_cover_module_variants() {
        for ext in ["mjs", "cjs", "mts", "cts"] {
            assert!(CONFIG_EXTENSIONS.contains(&ext), "missing '{}'", ext);
        }
    }

    #[test]
    fn test_next_phases_are_prefixed() {
        for (name, phase) in NEXT_PHASES {
            assert!(name.starts_with("PHASE_"));
            assert!(phase.starts_with("phase-"), "unexpected token '{}'", phase);
        }
    }

    #[test]
    fn test_node_modules_is_skipped() {
        assert!(SKIPPED_DIRS.contains(&"node_modules"));
    }
}
