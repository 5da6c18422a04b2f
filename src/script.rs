//! Runs external programs for script based plugins.

use std::{path::Path, process::Stdio};

use eyre::{bail, WrapErr as _};

/// Replaces `{Name}` placeholders in every argument. Unknown placeholders are left alone.
pub(crate) fn expand_arguments(template: &str, values: &[(&str, &str)]) -> Vec<String> {
    template
        .split_whitespace()
        .map(|arg| {
            values.iter().fold(arg.to_owned(), |arg, (name, value)| {
                arg.replace(&format!("{{{name}}}"), value)
            })
        })
        .collect()
}

/// Runs `script` with `args`, failing when it exits unsuccessfully.
pub(crate) async fn run(script: &Path, args: &[String]) -> eyre::Result<()> {
    log::debug!("Running {} {}", script.display(), args.join(" "));

    let output = tokio::process::Command::new(script)
        .args(args)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .wrap_err_with(|| format!("starting {}", script.display()))?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    for line in stdout.lines().filter(|line| !line.trim().is_empty()) {
        log::info!("{}: {line}", script.display());
    }

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!(
            "{} exited with {}: {}",
            script.display(),
            output.status,
            stderr.trim()
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholders() {
        let args = expand_arguments(
            "create {Identifier} {RecordName} {Unknown}",
            &[("Identifier", "example.com"), ("RecordName", "_acme-challenge.example.com")],
        );

        assert_eq!(
            args,
            ["create", "example.com", "_acme-challenge.example.com", "{Unknown}"]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_script_reports_stderr() {
        let err = run(
            Path::new("/bin/sh"),
            &["-c".to_owned(), "echo nope >&2; exit 3".to_owned()],
        )
        .await
        .unwrap_err();

        assert!(err.to_string().contains("nope"));
    }
}
