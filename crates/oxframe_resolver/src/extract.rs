use std::path::Path;

use log::trace;
use serde_json::Value;

use crate::{
    error::{ResolutionError, Result, json_kind},
    frameworks::{Framework, OutputKey},
    types::{FieldSource, Lookup, NormalizedBuildInfo, ResolvedConfig},
};

/// Map a resolved config onto normalized build fields for `framework`.
///
/// Keys the framework table does not mention are ignored. A mapped key with the wrong type is
/// an error, never coerced.
pub fn extract(
    path: &Path,
    framework: Framework,
    config: &ResolvedConfig,
) -> Result<NormalizedBuildInfo> {
    let profile = framework.profile();

    let configured = match profile.output_key {
        OutputKey::Field(key) => string_field(path, config, key)?,
        OutputKey::PluginOption { plugin, option } => plugin_option(path, config, plugin, option)?,
        OutputKey::Fixed => None,
    };
    let (output_dir, output_dir_source) = match configured {
        Some(dir) => (dir, FieldSource::Config),
        None => {
            trace!(
                "{} not set in {}, using default {}",
                profile.output_key,
                path.display(),
                profile.default_output_dir
            );
            (profile.default_output_dir.to_string(), FieldSource::Default)
        }
    };
    let base_path = string_field(path, config, profile.base_path_key)?;

    Ok(NormalizedBuildInfo { framework, output_dir, output_dir_source, base_path })
}

/// Read `options.<option>` from the `plugins` entry whose `resolve` names `plugin`.
fn plugin_option(
    path: &Path,
    config: &ResolvedConfig,
    plugin: &str,
    option: &str,
) -> Result<Option<String>> {
    let invalid = |key: String, expected: &'static str, found: &str| {
        ResolutionError::InvalidFieldType {
            path: path.to_path_buf(),
            key,
            expected,
            found: found.to_string(),
        }
    };
    let plugins = match config.lookup("plugins") {
        Lookup::Found(Value::Array(plugins)) => plugins,
        Lookup::Missing => return Ok(None),
        Lookup::Unresolved => {
            return Err(invalid("plugins".to_string(), "an array", "an unresolved value"));
        }
        Lookup::Found(other) => {
            return Err(invalid("plugins".to_string(), "an array", json_kind(other)));
        }
    };

    let entry = plugins
        .iter()
        .position(|entry| entry.get("resolve").and_then(Value::as_str) == Some(plugin));
    match entry {
        Some(idx) => string_field(path, config, &format!("plugins.{}.options.{}", idx, option)),
        None => {
            // An entry whose `resolve` we could not see might be the plugin.
            let hidden = (0..plugins.len()).any(|idx| {
                config.lookup(&format!("plugins.{}.resolve", idx)) == Lookup::Unresolved
            });
            if hidden {
                let key = format!("plugins[{}].options.{}", plugin, option);
                return Err(invalid(key, "a string", "an unresolved value"));
            }
            Ok(None)
        }
    }
}

fn string_field(path: &Path, config: &ResolvedConfig, key: &str) -> Result<Option<String>> {
    let invalid = |found: &str| ResolutionError::InvalidFieldType {
        path: path.to_path_buf(),
        key: key.to_string(),
        expected: "a string",
        found: found.to_string(),
    };
    match config.lookup(key) {
        Lookup::Missing => Ok(None),
        Lookup::Unresolved => Err(invalid("an unresolved value")),
        Lookup::Found(Value::String(s)) => Ok(Some(s.clone())),
        Lookup::Found(other) => Err(invalid(json_kind(other))),
    }
}
