use std::{
    fs,
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use oxframe_resolver::{
    ExportShape, FieldSource, Framework, Resolution, ResolutionError, ResolveOptions, resolve,
    resolve_async, resolve_framework_config,
};
use serde_json::{Map, Value, json};
use tempfile::TempDir;

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/nextjs").join(name)
}

fn nextjs<'o>(base_config: &'o Map<String, Value>, timeout: Duration) -> ResolveOptions<'o> {
    ResolveOptions {
        framework: Some(Framework::Nextjs),
        phase: "phase-production-build",
        base_config,
        timeout,
    }
}

fn resolve_fixture(name: &str, timeout: Duration) -> Result<Resolution, ResolutionError> {
    let base = Map::new();
    resolve(&fixture(name), &nextjs(&base, timeout))
}

fn output_dir(name: &str) -> String {
    resolve_fixture(name, Duration::from_secs(5))
        .unwrap_or_else(|err| panic!("{} failed: {}", name, err))
        .info
        .output_dir
}

/// Copy a fixture into a fresh project as `next.config.<ext>` so the framework is inferred.
fn as_next_config(temp_dir: &TempDir, name: &str) -> PathBuf {
    let ext = Path::new(name).extension().and_then(|e| e.to_str()).unwrap_or("js");
    let target = temp_dir.path().join(format!("next.config.{}", ext));
    fs::copy(fixture(name), &target).unwrap();
    target
}

#[test]
fn test_async_fixture_resolves_to_build() {
    let temp_dir = TempDir::new().unwrap();
    let path = as_next_config(&temp_dir, "next_js_v4.mjs");

    let info = resolve_framework_config(&path, "phase-production-build", &json!({}), None).unwrap();
    assert_eq!(info.framework, Framework::Nextjs);
    assert_eq!(info.output_dir, "build");
    assert_eq!(info.output_dir_source, FieldSource::Config);
}

#[test]
fn test_async_fixture_shape() {
    let resolution = resolve_fixture("next_js_v4.mjs", Duration::from_secs(5)).unwrap();
    assert_eq!(
        resolution.shape,
        ExportShape::AsyncFunction {
            arity: 2,
            variadic: false,
            params: vec!["phase".to_string(), "{..}".to_string()],
        }
    );
}

#[test]
fn test_every_shape_gives_the_same_result() {
    let base = Map::new();
    let opts = nextjs(&base, Duration::from_secs(5));
    let results: Vec<_> = ["object_literal.mjs", "sync_function.js", "next_js_v4.mjs"]
        .iter()
        .map(|name| resolve(&fixture(name), &opts).unwrap())
        .collect();

    assert_eq!(results[0].shape, ExportShape::ObjectLiteral);
    assert!(matches!(results[1].shape, ExportShape::SyncFunction { arity: 2, .. }));
    assert!(results[2].shape.is_async());
    assert_eq!(results[0].info, results[1].info);
    assert_eq!(results[1].info, results[2].info);
}

#[test]
fn test_object_literal_resolves_without_waiting() {
    let start = Instant::now();
    let resolution = resolve_fixture("out_dir.mjs", Duration::from_secs(5)).unwrap();
    assert_eq!(resolution.info.output_dir, "out");
    assert!(start.elapsed() < Duration::from_secs(1));
}

#[test]
fn test_zero_arity_function_gets_no_arguments() {
    assert_eq!(output_dir("arity_zero.js"), "no-args");
}

#[test]
fn test_phase_is_forwarded() {
    let base = Map::new();
    let mut opts = nextjs(&base, Duration::from_secs(5));
    let prod = resolve(&fixture("phase_aware.js"), &opts).unwrap();
    assert_eq!(prod.info.output_dir, ".next-prod");
    assert_eq!(prod.info.base_path.as_deref(), Some("/docs"));

    opts.phase = "phase-development-server";
    let dev = resolve(&fixture("phase_aware.js"), &opts).unwrap();
    assert_eq!(dev.info.output_dir, ".next-dev");
    assert_eq!(dev.info.base_path, None);
}

#[test]
fn test_phase_constants_from_next_constants() {
    let base = json!({ "distDir": ".next" });
    let base = base.as_object().unwrap();
    let mut opts = nextjs(base, Duration::from_secs(5));
    let prod = resolve(&fixture("phase_constants.js"), &opts).unwrap();
    assert_eq!(prod.info.output_dir, ".next-prod");
    assert_eq!(prod.info.base_path.as_deref(), Some("/docs"));

    opts.phase = "phase-development-server";
    let dev = resolve(&fixture("phase_constants.js"), &opts).unwrap();
    assert_eq!(dev.info.output_dir, ".next-dev");
    assert_eq!(dev.info.base_path, None);

    opts.phase = "phase-export";
    let other = resolve(&fixture("phase_constants.js"), &opts).unwrap();
    assert_eq!(other.info.output_dir, ".next");
    assert_eq!(other.info.output_dir_source, FieldSource::Config);
}

#[test]
fn test_dist_dir_built_from_an_import_is_unresolved() {
    let err = resolve_fixture("derived_dist_dir.mjs", Duration::from_secs(5)).unwrap_err();
    match err {
        ResolutionError::InvalidFieldType { key, found, .. } => {
            assert_eq!(key, "distDir");
            assert_eq!(found, "an unresolved value");
        }
        other => panic!("expected InvalidFieldType, got {}", other),
    }
}

#[test]
fn test_writes_after_module_exports_are_kept() {
    let resolution = resolve_fixture("mutated_after_export.js", Duration::from_secs(5)).unwrap();
    assert_eq!(resolution.shape, ExportShape::ObjectLiteral);
    assert_eq!(resolution.info.output_dir, "out");
    assert_eq!(resolution.info.output_dir_source, FieldSource::Config);
}

#[test]
fn test_never_settling_export_times_out() {
    let timeout = Duration::from_millis(100);
    let start = Instant::now();
    let err = resolve_fixture("never_settles.mjs", timeout).unwrap_err();

    assert!(matches!(
        err,
        ResolutionError::ConfigResolutionTimeout { timeout: t, .. } if t == timeout
    ));
    let elapsed = start.elapsed();
    assert!(elapsed >= timeout);
    assert!(elapsed < Duration::from_secs(5), "took {:?}", elapsed);
}

#[test]
fn test_delayed_export_waits_for_timer() {
    let start = Instant::now();
    let resolution = resolve_fixture("delayed.mjs", Duration::from_secs(5)).unwrap();
    assert_eq!(resolution.info.output_dir, "delayed");
    assert!(start.elapsed() >= Duration::from_millis(50));
}

#[test]
fn test_delayed_export_past_timeout() {
    let err = resolve_fixture("delayed.mjs", Duration::from_millis(10)).unwrap_err();
    assert_eq!(err.kind(), "config_resolution_timeout");
}

#[test]
fn test_wrong_field_type_is_rejected() {
    let err = resolve_fixture("wrong_type.js", Duration::from_secs(5)).unwrap_err();
    match err {
        ResolutionError::InvalidFieldType { key, expected, found, .. } => {
            assert_eq!(key, "distDir");
            assert_eq!(expected, "a string");
            assert_eq!(found, "a number");
        }
        other => panic!("expected InvalidFieldType, got {}", other),
    }
}

#[test]
fn test_missing_field_uses_framework_default() {
    let resolution = resolve_fixture("no_distdir.js", Duration::from_secs(5)).unwrap();
    assert_eq!(resolution.info.output_dir, ".next");
    assert_eq!(resolution.info.output_dir_source, FieldSource::Default);
}

#[test]
fn test_async_rejection_is_resolution_error() {
    let err = resolve_fixture("rejects.mjs", Duration::from_secs(5)).unwrap_err();
    assert_eq!(err.kind(), "config_resolution_error");
    assert!(err.to_string().contains("NEXT_PUBLIC_SITE_URL is not set"));
}

#[test]
fn test_typescript_config() {
    let resolution = resolve_fixture("typed.ts", Duration::from_secs(5)).unwrap();
    assert_eq!(resolution.info.output_dir, "ts-build");
    assert_eq!(resolution.info.base_path.as_deref(), Some("/docs"));
}

#[test]
fn test_class_export_is_unsupported() {
    let err = resolve_fixture("class_export.js", Duration::from_secs(5)).unwrap_err();
    assert_eq!(err.kind(), "unsupported_export_kind");
}

#[test]
fn test_missing_file_is_load_error() {
    let err = resolve_fixture("does_not_exist.mjs", Duration::from_secs(5)).unwrap_err();
    assert_eq!(err.kind(), "module_load_error");
}

#[test]
fn test_resolution_is_idempotent() {
    let temp_dir = TempDir::new().unwrap();
    let path = as_next_config(&temp_dir, "sync_function.js");
    let base = json!({ "distDir": ".next", "poweredByHeader": false });

    let first = resolve_framework_config(&path, "phase-production-build", &base, None).unwrap();
    let second = resolve_framework_config(&path, "phase-production-build", &base, None).unwrap();
    assert_eq!(first, second);
    assert_eq!(base, json!({ "distDir": ".next", "poweredByHeader": false }));
}

#[tokio::test]
async fn test_async_api_matches_blocking_api() {
    let base = Map::new();
    let opts = nextjs(&base, Duration::from_secs(5));
    let resolution = resolve_async(&fixture("delayed.mjs"), &opts).await.unwrap();
    assert_eq!(resolution.info.output_dir, "delayed");

    let short = ResolveOptions { timeout: Duration::from_millis(20), ..opts };
    let err = resolve_async(&fixture("never_settles.mjs"), &short).await.unwrap_err();
    assert_eq!(err.kind(), "config_resolution_timeout");
}
