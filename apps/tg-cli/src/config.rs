//! Smoke-test configuration.
//!
//! Loaded from `tempground.toml` when present. Every field has a default, so
//! an empty file (or no file at all) checks the `io.github.rtmigo:dec`
//! library from its `dev` branch:
//!
//! ```toml
//! [library]
//! module = "io.github.rtmigo:dec"
//! repository = "https://github.com/rtmigo/dec_kt"
//! branch = "dev"            # "" depends on the published version instead
//!
//! [check]
//! command = ["gradle", "run", "-q"]
//! expected_stdout = "12.3\n"
//! timeout_secs = 900
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tg_workspace::RunOptions;

/// Top-level smoke-test configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SmokeConfig {
    #[serde(default)]
    pub library: LibraryConfig,

    #[serde(default)]
    pub project: ProjectConfig,

    #[serde(default)]
    pub check: CheckConfig,
}

/// The library under test and where Gradle should fetch it from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryConfig {
    /// Maven coordinates without a version (`group:artifact`).
    #[serde(default = "default_module")]
    pub module: String,

    /// Git repository that produces the module (source dependency).
    #[serde(default = "default_repository")]
    pub repository: String,

    /// Branch to build from; empty means no version constraint.
    #[serde(default = "default_branch")]
    pub branch: String,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            module: default_module(),
            repository: default_repository(),
            branch: default_branch(),
        }
    }
}

/// Shape of the generated Gradle project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    #[serde(default = "default_kotlin_version")]
    pub kotlin_version: String,

    #[serde(default = "default_serialization_version")]
    pub serialization_version: String,

    #[serde(default = "default_main_class")]
    pub main_class: String,

    /// Contents of `src/main/kotlin/Main.kt`.
    #[serde(default = "default_code")]
    pub code: String,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            kotlin_version: default_kotlin_version(),
            serialization_version: default_serialization_version(),
            main_class: default_main_class(),
            code: default_code(),
        }
    }
}

/// The command to run and what it must produce.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckConfig {
    #[serde(default = "default_command")]
    pub command: Vec<String>,

    /// Compared byte for byte, trailing newline included.
    #[serde(default = "default_expected_stdout")]
    pub expected_stdout: String,

    #[serde(default)]
    pub expected_exit_code: i32,

    /// Kill the build after this many seconds. No limit when absent.
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Extra environment variables for the build.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl Default for CheckConfig {
    fn default() -> Self {
        Self {
            command: default_command(),
            expected_stdout: default_expected_stdout(),
            expected_exit_code: 0,
            timeout_secs: None,
            env: BTreeMap::new(),
        }
    }
}

impl CheckConfig {
    pub fn run_options(&self) -> RunOptions {
        let mut options = RunOptions::new();
        if let Some(secs) = self.timeout_secs {
            options = options.timeout(Duration::from_secs(secs));
        }
        for (key, value) in &self.env {
            options = options.env(key, value);
        }
        options
    }
}

// Serde default functions
fn default_module() -> String {
    "io.github.rtmigo:dec".to_string()
}

fn default_repository() -> String {
    "https://github.com/rtmigo/dec_kt".to_string()
}

fn default_branch() -> String {
    "dev".to_string()
}

fn default_kotlin_version() -> String {
    "1.6.20".to_string()
}

fn default_serialization_version() -> String {
    "1.3.2".to_string()
}

fn default_main_class() -> String {
    "MainKt".to_string()
}

fn default_code() -> String {
    r#"import io.github.rtmigo.dec.*
import kotlinx.serialization.*
import kotlinx.serialization.json.Json

fun main() {
    Json.encodeToString(Dec(5.23))

    println(Dec(12.3))
}
"#
    .to_string()
}

fn default_command() -> Vec<String> {
    vec!["gradle".to_string(), "run".to_string(), "-q".to_string()]
}

fn default_expected_stdout() -> String {
    "12.3\n".to_string()
}

impl SmokeConfig {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config = toml::from_str(&content)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }

    /// Load config, falling back to the built-in defaults if the file
    /// doesn't exist. A file that exists but fails to parse is an error.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file; using defaults");
            return Ok(Self::default());
        }
        Self::load(path)
    }
}
