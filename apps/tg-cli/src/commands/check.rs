// check.rs - Run the smoke test: build the generated project in a fresh
// workspace and compare the run result against the expected literals.

use anyhow::{bail, Context};
use tg_workspace::{with_workspace, RunResult};

use crate::config::{CheckConfig, SmokeConfig};
use crate::project;

/// Printed when every expectation holds.
pub const SUCCESS_LINE: &str = "Everything is OK!";

/// Run the check. With `json`, stdout carries only the serialized
/// [`RunResult`]; otherwise the generated files, the result, and the final
/// verdict are printed.
pub fn execute(config: &SmokeConfig, json: bool) -> anyhow::Result<()> {
    let check = &config.check;
    if check.command.is_empty() {
        bail!("check.command must name a program to run");
    }

    let files = project::render_project(config).context("rendering project files")?;
    let options = check.run_options();

    tracing::info!(
        module = %config.library.module,
        branch = %config.library.branch,
        command = %check.command.join(" "),
        "starting smoke check"
    );

    let result = with_workspace(&files, |ws| -> anyhow::Result<RunResult> {
        let listing = ws.files_content()?;
        if json {
            tracing::debug!("generated files:\n{}", listing);
        } else {
            println!("{}", listing);
        }

        let result = ws
            .run(check.command.as_slice(), &options)
            .with_context(|| format!("running `{}`", check.command.join(" ")))?;
        Ok(result)
    })?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("{}", result);
    }

    verify(&result, check)?;

    if !json {
        println!("{}", SUCCESS_LINE);
    }
    Ok(())
}

/// Compare a run against the expectations. Stdout must match exactly,
/// trailing newline included.
pub fn verify(result: &RunResult, check: &CheckConfig) -> anyhow::Result<()> {
    if result.exit_code != check.expected_exit_code {
        bail!(
            "expected exit code {}, got {}\nstderr:\n{}",
            check.expected_exit_code,
            result.exit_code,
            result.stderr.as_deref().unwrap_or("<not captured>")
        );
    }

    if result.stdout != check.expected_stdout {
        bail!(
            "stdout mismatch: expected {:?}, got {:?}",
            check.expected_stdout,
            result.stdout
        );
    }

    Ok(())
}
