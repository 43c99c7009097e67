// project.rs - Renders the throwaway Gradle Kotlin project that imports the
// library under test.
//
// The library is declared as a source dependency: settings.gradle.kts maps
// the module to its git repository, and the build script optionally pins a
// branch.

use std::collections::BTreeMap;

use crate::config::SmokeConfig;
use crate::template::{Template, TemplateError};

pub const BUILD_FILE: &str = "build.gradle.kts";
pub const SETTINGS_FILE: &str = "settings.gradle.kts";
pub const MAIN_FILE: &str = "src/main/kotlin/Main.kt";

const BUILD_TEMPLATE: &str = r#"plugins {
    id("application")
    kotlin("jvm") version "__KOTLIN__"
    id("org.jetbrains.kotlin.plugin.serialization") version "__KOTLIN__"
}

repositories { mavenCentral() }
application { mainClass.set("__MAIN_CLASS__") }

dependencies {
    implementation("__MODULE__") __IMP_DETAILS__
    implementation("org.jetbrains.kotlinx:kotlinx-serialization-json:__SERIALIZATION__")
}
"#;

const SETTINGS_TEMPLATE: &str = r#"sourceControl {
    gitRepository(java.net.URI("__URL__.git")) {
        producesModule("__MODULE__")
    }
}
"#;

const BRANCH_TEMPLATE: &str = r#"{ version { branch = "__BRANCH__" } }"#;

/// Relative path -> content for every file of the generated project.
pub fn render_project(config: &SmokeConfig) -> Result<BTreeMap<String, String>, TemplateError> {
    let library = &config.library;
    let project = &config.project;

    let imp_details = if library.branch.is_empty() {
        String::new()
    } else {
        Template::new(BRANCH_TEMPLATE)
            .literal("BRANCH", &library.branch)?
            .render()?
    };

    let build = Template::new(BUILD_TEMPLATE)
        .literal("MODULE", &library.module)?
        .literal("KOTLIN", &project.kotlin_version)?
        .literal("SERIALIZATION", &project.serialization_version)?
        .literal("MAIN_CLASS", &project.main_class)?
        .fragment("IMP_DETAILS", imp_details)
        .render()?;

    let url = library
        .repository
        .strip_suffix(".git")
        .unwrap_or(&library.repository);
    let settings = Template::new(SETTINGS_TEMPLATE)
        .literal("URL", url)?
        .literal("MODULE", &library.module)?
        .render()?;

    let mut files = BTreeMap::new();
    files.insert(BUILD_FILE.to_string(), build);
    files.insert(SETTINGS_FILE.to_string(), settings);
    files.insert(MAIN_FILE.to_string(), project.code.clone());
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_project_layout() {
        let files = render_project(&SmokeConfig::default()).unwrap();
        let paths: Vec<&str> = files.keys().map(String::as_str).collect();
        assert_eq!(paths, vec![BUILD_FILE, SETTINGS_FILE, MAIN_FILE]);
    }

    #[test]
    fn build_file_declares_module_and_branch() {
        let files = render_project(&SmokeConfig::default()).unwrap();
        let build = &files[BUILD_FILE];

        assert!(build.contains(
            r#"implementation("io.github.rtmigo:dec") { version { branch = "dev" } }"#
        ));
        assert!(build.contains(r#"kotlin("jvm") version "1.6.20""#));
        assert!(build.contains(r#"mainClass.set("MainKt")"#));
        assert!(build.contains("kotlinx-serialization-json:1.3.2"));
        assert!(!build.contains("__"));
    }

    #[test]
    fn settings_map_module_to_repository() {
        let files = render_project(&SmokeConfig::default()).unwrap();
        let settings = &files[SETTINGS_FILE];

        assert!(settings.contains(r#"java.net.URI("https://github.com/rtmigo/dec_kt.git")"#));
        assert!(settings.contains(r#"producesModule("io.github.rtmigo:dec")"#));
    }

    #[test]
    fn repository_git_suffix_not_doubled() {
        let mut config = SmokeConfig::default();
        config.library.repository = "https://github.com/rtmigo/dec_kt.git".to_string();
        let files = render_project(&config).unwrap();
        assert!(files[SETTINGS_FILE].contains(r#"URI("https://github.com/rtmigo/dec_kt.git")"#));
    }

    #[test]
    fn empty_branch_drops_version_block() {
        let mut config = SmokeConfig::default();
        config.library.branch.clear();
        let files = render_project(&config).unwrap();

        assert!(files[BUILD_FILE].contains("implementation(\"io.github.rtmigo:dec\") \n"));
        assert!(!files[BUILD_FILE].contains("branch"));
    }

    #[test]
    fn hostile_branch_rejected() {
        let mut config = SmokeConfig::default();
        config.library.branch = r#"dev" } } ; exec("rm")"#.to_string();
        let err = render_project(&config).unwrap_err();
        assert!(matches!(err, TemplateError::UnsafeValue { .. }));
    }

    #[test]
    fn main_file_is_the_configured_code() {
        let mut config = SmokeConfig::default();
        config.project.code = "fun main() = println(\"12.3\")\n".to_string();
        let files = render_project(&config).unwrap();
        assert_eq!(files[MAIN_FILE], config.project.code);
    }
}
