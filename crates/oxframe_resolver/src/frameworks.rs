use std::{fmt, path::Path};

use clap::ValueEnum;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Framework {
    Nextjs,
    Astro,
    Sveltekit,
    Vitepress,
    Vuepress,
    Nuxtjs,
    Nuxt3,
    Eleventy,
    Gatsby,
    Docusaurus,
}

/// Where a config sets the build output directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKey {
    /// A dotted key path such as `kit.outDir`.
    Field(&'static str),
    /// `options.<option>` of the `plugins` entry whose `resolve` is `plugin`.
    PluginOption { plugin: &'static str, option: &'static str },
    /// The config file cannot change it.
    Fixed,
}

impl fmt::Display for OutputKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputKey::Field(key) => f.write_str(key),
            OutputKey::PluginOption { plugin, option } => {
                write!(f, "plugins[{}].options.{}", plugin, option)
            }
            OutputKey::Fixed => f.write_str("(not configurable)"),
        }
    }
}

/// What a function-shaped config export is called with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgumentStyle {
    /// `(phase, { defaultConfig })`, truncated to the declared arity.
    PhaseContext,
    /// One configuration API object owned by the framework, such as Eleventy's `eleventyConfig`.
    ConfigApi(&'static str),
}

/// Where a framework keeps its config and which keys carry build metadata.
pub struct FrameworkProfile {
    /// Trailing path components of recognised config files.
    pub config_files: &'static [&'static str],
    pub output_key: OutputKey,
    pub default_output_dir: &'static str,
    pub base_path_key: &'static str,
    pub arguments: ArgumentStyle,
}

const NEXTJS: FrameworkProfile = FrameworkProfile {
    config_files: &[
        "next.config.js",
        "next.config.mjs",
        "next.config.cjs",
        "next.config.ts",
        "next.config.mts",
    ],
    output_key: OutputKey::Field("distDir"),
    default_output_dir: ".next",
    base_path_key: "basePath",
    arguments: ArgumentStyle::PhaseContext,
};

const ASTRO: FrameworkProfile = FrameworkProfile {
    config_files: &[
        "astro.config.mjs",
        "astro.config.js",
        "astro.config.ts",
        "astro.config.mts",
        "astro.config.cjs",
    ],
    output_key: OutputKey::Field("outDir"),
    default_output_dir: "./dist",
    base_path_key: "base",
    arguments: ArgumentStyle::PhaseContext,
};

const SVELTEKIT: FrameworkProfile = FrameworkProfile {
    config_files: &[
        "svelte.config.js",
        "svelte.config.mjs",
        "svelte.config.cjs",
        "svelte.config.ts",
    ],
    output_key: OutputKey::Field("kit.outDir"),
    default_output_dir: "build",
    base_path_key: "kit.paths.base",
    arguments: ArgumentStyle::PhaseContext,
};

const VITEPRESS: FrameworkProfile = FrameworkProfile {
    config_files: &[
        ".vitepress/config.js",
        ".vitepress/config.mjs",
        ".vitepress/config.ts",
        ".vitepress/config.mts",
        ".vitepress/config.cjs",
    ],
    output_key: OutputKey::Field("outDir"),
    default_output_dir: ".vitepress/dist",
    base_path_key: "base",
    arguments: ArgumentStyle::PhaseContext,
};

const VUEPRESS: FrameworkProfile = FrameworkProfile {
    config_files: &[
        ".vuepress/config.js",
        ".vuepress/config.mjs",
        ".vuepress/config.ts",
        ".vuepress/config.cjs",
    ],
    output_key: OutputKey::Field("dest"),
    default_output_dir: ".vuepress/dist",
    base_path_key: "base",
    arguments: ArgumentStyle::PhaseContext,
};

const NUXTJS: FrameworkProfile = FrameworkProfile {
    config_files: &["nuxt.config.js", "nuxt.config.mjs", "nuxt.config.ts"],
    output_key: OutputKey::Field("buildDir"),
    default_output_dir: ".nuxt",
    base_path_key: "router.base",
    arguments: ArgumentStyle::PhaseContext,
};

const NUXT3: FrameworkProfile = FrameworkProfile {
    config_files: &["nuxt.config.js", "nuxt.config.mjs", "nuxt.config.ts"],
    output_key: OutputKey::Field("publicDir"),
    default_output_dir: ".output",
    base_path_key: "app.baseURL",
    arguments: ArgumentStyle::PhaseContext,
};

const ELEVENTY: FrameworkProfile = FrameworkProfile {
    config_files: &[".eleventy.js", "eleventy.config.js", "eleventy.config.cjs"],
    output_key: OutputKey::Field("dir.output"),
    default_output_dir: "_site",
    base_path_key: "pathPrefix",
    arguments: ArgumentStyle::ConfigApi("eleventyConfig"),
};

const GATSBY: FrameworkProfile = FrameworkProfile {
    config_files: &["gatsby-config.js", "gatsby-config.mjs", "gatsby-config.ts"],
    output_key: OutputKey::PluginOption { plugin: "gatsby-plugin-output", option: "publicPath" },
    default_output_dir: "public",
    base_path_key: "pathPrefix",
    arguments: ArgumentStyle::PhaseContext,
};

const DOCUSAURUS: FrameworkProfile = FrameworkProfile {
    config_files: &["docusaurus.config.js", "docusaurus.config.ts"],
    output_key: OutputKey::Fixed,
    default_output_dir: "build",
    base_path_key: "baseUrl",
    arguments: ArgumentStyle::PhaseContext,
};

impl Framework {
    /// Inference order. Nuxt 2 and Nuxt 3 share file names, so a bare `nuxt.config.*` is Nuxt 2.
    pub const ALL: [Framework; 10] = [
        Framework::Nextjs,
        Framework::Astro,
        Framework::Sveltekit,
        Framework::Vitepress,
        Framework::Vuepress,
        Framework::Nuxtjs,
        Framework::Nuxt3,
        Framework::Eleventy,
        Framework::Gatsby,
        Framework::Docusaurus,
    ];

    pub fn profile(self) -> &'static FrameworkProfile {
        match self {
            Framework::Nextjs => &NEXTJS,
            Framework::Astro => &ASTRO,
            Framework::Sveltekit => &SVELTEKIT,
            Framework::Vitepress => &VITEPRESS,
            Framework::Vuepress => &VUEPRESS,
            Framework::Nuxtjs => &NUXTJS,
            Framework::Nuxt3 => &NUXT3,
            Framework::Eleventy => &ELEVENTY,
            Framework::Gatsby => &GATSBY,
            Framework::Docusaurus => &DOCUSAURUS,
        }
    }

    pub fn id(self) -> &'static str {
        match self {
            Framework::Nextjs => "nextjs",
            Framework::Astro => "astro",
            Framework::Sveltekit => "sveltekit",
            Framework::Vitepress => "vitepress",
            Framework::Vuepress => "vuepress",
            Framework::Nuxtjs => "nuxtjs",
            Framework::Nuxt3 => "nuxt3",
            Framework::Eleventy => "eleventy",
            Framework::Gatsby => "gatsby",
            Framework::Docusaurus => "docusaurus",
        }
    }

    /// Whether `path` is named like one of this framework's config files.
    pub fn matches(self, path: &Path) -> bool {
        self.profile().config_files.iter().any(|name| path.ends_with(name))
    }

    /// Infer the framework from a config file's name.
    pub fn from_config_path(path: &Path) -> Option<Framework> {
        Framework::ALL.into_iter().find(|fw| fw.matches(path))
    }
}

impl fmt::Display for Framework {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_path() {
        let detect = |p: &str| Framework::from_config_path(Path::new(p));
        assert_eq!(detect("/app/next.config.mjs"), Some(Framework::Nextjs));
        assert_eq!(detect("site/astro.config.ts"), Some(Framework::Astro));
        assert_eq!(
            Framework::from_config_path(Path::new("docs/.vitepress/config.mts")),
            Some(Framework::Vitepress)
        );
        assert_eq!(
            Framework::from_config_path(Path::new("docs/.vuepress/config.js")),
            Some(Framework::Vuepress)
        );
    }

    #[test]
    fn test_unrelated_files_are_not_recognised() {
        assert_eq!(Framework::from_config_path(Path::new("docs/config.ts")), None);
        assert_eq!(Framework::from_config_path(Path::new("vite.config.ts")), None);
        assert_eq!(Framework::from_config_path(Path::new("mynext.config.js")), None);
    }

    #[test]
    fn test_nextjs_defaults() {
        let profile = Framework::Nextjs.profile();
        assert_eq!(profile.output_key, OutputKey::Field("distDir"));
        assert_eq!(profile.default_output_dir, ".next");
        assert_eq!(profile.arguments, ArgumentStyle::PhaseContext);
    }

    #[test]
    fn test_static_site_generators() {
        let detect = |p: &str| Framework::from_config_path(Path::new(p));
        assert_eq!(detect("site/.eleventy.js"), Some(Framework::Eleventy));
        assert_eq!(detect("site/eleventy.config.cjs"), Some(Framework::Eleventy));
        assert_eq!(detect("gatsby-config.ts"), Some(Framework::Gatsby));
        assert_eq!(detect("website/docusaurus.config.js"), Some(Framework::Docusaurus));
        assert_eq!(detect("site/eleventy.js"), None);
    }

    #[test]
    fn test_nuxt_file_names_infer_nuxt2() {
        let path = Path::new("app/nuxt.config.ts");
        assert_eq!(Framework::from_config_path(path), Some(Framework::Nuxtjs));
        assert!(Framework::Nuxt3.matches(path));
        assert_eq!(Framework::Nuxt3.profile().output_key, OutputKey::Field("publicDir"));
    }

    #[test]
    fn test_output_key_display() {
        assert_eq!(Framework::Sveltekit.profile().output_key.to_string(), "kit.outDir");
        assert_eq!(
            Framework::Gatsby.profile().output_key.to_string(),
            "plugins[gatsby-plugin-output].options.publicPath"
        );
    }

    #[test]
    fn test_ids_match_serde() {
        for fw in Framework::ALL {
            assert_eq!(serde_json::to_value(fw).unwrap(), serde_json::json!(fw.id()));
            let value = fw.to_possible_value().unwrap();
            assert_eq!(value.get_name(), fw.id());
        }
    }
}
