//! Python environment facts, gathered through the interpreter itself.

use serde_json::{json, Value};

use crate::error::RainError;
use crate::host::ProbeCtx;
use crate::probe::{Probe, Source};
use crate::util::{command_stdout, run_command};

/// Installed-package listings are capped at this many entries; the value
/// still reports the full count.
const PACKAGE_LIMIT: usize = 50;

pub fn probes(ctx: &ProbeCtx) -> Vec<Probe<'_>> {
    vec![
        Probe::new(
            "version",
            vec![
                Source::new("python3", version_from(ctx, "python3")),
                Source::new("python", version_from(ctx, "python")),
            ],
        )
        .required(),
        Probe::new(
            "executable",
            vec![
                Source::new("python3", eval_string(ctx, "python3", "import sys; print(sys.executable)")),
                Source::new("python", eval_string(ctx, "python", "import sys; print(sys.executable)")),
            ],
        ),
        Probe::new(
            "implementation",
            vec![
                Source::new(
                    "python3",
                    eval_string(ctx, "python3", "import platform; print(platform.python_implementation())"),
                ),
                Source::new(
                    "python",
                    eval_string(ctx, "python", "import platform; print(platform.python_implementation())"),
                ),
            ],
        ),
        Probe::new(
            "packages",
            vec![
                Source::new("pip3", packages_from_pip(ctx, "pip3")),
                Source::new("pip", packages_from_pip(ctx, "pip")),
                Source::new("python3-m-pip", packages_from_module(ctx, "python3")),
                Source::new("python-m-pip", packages_from_module(ctx, "python")),
            ],
        )
        .cacheable(),
    ]
}

/// `--version` lands on stdout for Python 3 and stderr for Python 2.
async fn version_from(ctx: &ProbeCtx, interpreter: &'static str) -> Result<Value, RainError> {
    let output = run_command(interpreter, &["--version"], ctx.command_timeout()).await?;
    if !output.status_ok {
        return Err(RainError::Unavailable(format!(
            "{interpreter} --version failed: {}",
            output.stderr.trim()
        )));
    }
    let text = if output.stdout.trim().is_empty() {
        output.stderr
    } else {
        output.stdout
    };
    let version = parse_python_version(&text).ok_or_else(|| {
        RainError::Unavailable(format!("unexpected version output: {:?}", text.trim()))
    })?;
    Ok(json!(version))
}

async fn eval_string(
    ctx: &ProbeCtx,
    interpreter: &'static str,
    code: &'static str,
) -> Result<Value, RainError> {
    let stdout = command_stdout(interpreter, &["-c", code], ctx.command_timeout()).await?;
    Ok(json!(stdout.trim()))
}

async fn packages_from_pip(ctx: &ProbeCtx, pip: &'static str) -> Result<Value, RainError> {
    let stdout = command_stdout(
        pip,
        &["list", "--format=json", "--disable-pip-version-check"],
        ctx.command_timeout(),
    )
    .await?;
    parse_pip_packages(&stdout, PACKAGE_LIMIT)
}

/// `<interpreter> -m pip` covers hosts where pip has no standalone binary;
/// tried for each interpreter the version probe knows.
async fn packages_from_module(ctx: &ProbeCtx, interpreter: &str) -> Result<Value, RainError> {
    let stdout = command_stdout(
        interpreter,
        &["-m", "pip", "list", "--format=json", "--disable-pip-version-check"],
        ctx.command_timeout(),
    )
    .await?;
    parse_pip_packages(&stdout, PACKAGE_LIMIT)
}

/// `Python 3.11.4` (or a Python 2 equivalent) to the bare version number.
fn parse_python_version(text: &str) -> Option<String> {
    let version = text.split_whitespace().nth(1)?;
    version
        .chars()
        .next()
        .filter(char::is_ascii_digit)
        .map(|_| version.to_string())
}

/// `pip list --format=json` emits an array of `{name, version}` objects.
fn parse_pip_packages(raw: &str, limit: usize) -> Result<Value, RainError> {
    let listed: Value = serde_json::from_str(raw.trim())
        .map_err(|err| RainError::Unavailable(format!("unparseable pip listing: {err}")))?;
    let entries = listed
        .as_array()
        .ok_or_else(|| RainError::Unavailable("pip listing is not an array".into()))?;
    let packages: Vec<Value> = entries
        .iter()
        .take(limit)
        .filter_map(|entry| {
            let name = entry.get("name")?.as_str()?;
            let version = entry.get("version")?.as_str()?;
            Some(json!({ "name": name, "version": version }))
        })
        .collect();
    Ok(json!({ "package_count": entries.len(), "packages": packages }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_string_is_extracted() {
        assert_eq!(parse_python_version("Python 3.11.4\n").unwrap(), "3.11.4");
        assert_eq!(parse_python_version("Python 2.7.18\n").unwrap(), "2.7.18");
        assert!(parse_python_version("bash: python: command not found").is_none());
        assert!(parse_python_version("Python").is_none());
    }

    #[test]
    fn pip_listing_reports_full_count_but_caps_entries() {
        let raw = r#"[
            {"name": "requests", "version": "2.31.0"},
            {"name": "numpy", "version": "1.26.0"},
            {"name": "rich", "version": "13.5.2"}
        ]"#;
        let value = parse_pip_packages(raw, 2).unwrap();
        assert_eq!(value["package_count"], 3);
        assert_eq!(value["packages"].as_array().unwrap().len(), 2);
        assert_eq!(value["packages"][0]["name"], "requests");
        assert_eq!(value["packages"][1]["version"], "1.26.0");
    }

    #[test]
    fn malformed_pip_output_is_a_source_failure() {
        let err = parse_pip_packages("WARNING: pip is out of date", 50).unwrap_err();
        assert!(matches!(err, RainError::Unavailable(_)));
        assert!(parse_pip_packages("{\"name\": \"x\"}", 50).is_err());
    }

    #[test]
    fn empty_pip_listing_is_a_valid_zero() {
        let value = parse_pip_packages("[]", 50).unwrap();
        assert_eq!(value["package_count"], 0);
        assert!(value["packages"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn packages_fall_back_to_the_bare_interpreter() {
        use crate::config::Config;
        use crate::host::HostSnapshot;
        use crate::probe::{run_probe, ProbeResult};
        use std::os::unix::fs::PermissionsExt;
        use std::sync::Arc;

        // A host whose only interpreter is `python`: every pip binary and
        // python3 are absent, so the last leg has to answer.
        let dir = tempfile::tempdir().unwrap();
        let shim = dir.path().join("python");
        std::fs::write(
            &shim,
            "#!/bin/sh\necho '[{\"name\": \"requests\", \"version\": \"2.31.0\"}]'\n",
        )
        .unwrap();
        std::fs::set_permissions(&shim, std::fs::Permissions::from_mode(0o755)).unwrap();
        let shim = shim.to_string_lossy().into_owned();

        let ctx = ProbeCtx::new(Arc::new(Config::default()), HostSnapshot::capture().await);
        let probe = Probe::new(
            "packages",
            vec![
                Source::new("pip3", packages_from_pip(&ctx, "rain-test-no-pip3")),
                Source::new("pip", packages_from_pip(&ctx, "rain-test-no-pip")),
                Source::new("python3-m-pip", packages_from_module(&ctx, "rain-test-no-python3")),
                Source::new("python-m-pip", packages_from_module(&ctx, &shim)),
            ],
        );
        match run_probe(probe).await {
            ProbeResult::Ok(value) => {
                assert_eq!(value["package_count"], 1);
                assert_eq!(value["packages"][0]["name"], "requests");
            }
            ProbeResult::Degraded { error } => {
                panic!("expected the interpreter leg to answer: {error}")
            }
        }
    }
}
