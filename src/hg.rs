use anyhow::Context as _;
use anyhow::Result;
use anyhow::bail;
use std::path::Path;
use std::process::Command;
use std::process::Output;
use std::process::Stdio;

/// Builds an `hg` invocation with a neutral environment.
///
/// `HGPLAIN` disables localization, aliases and user templates; the helper
/// parses some English command output and needs to see it verbatim. An
/// empty `HGRCPATH` keeps user extensions from interfering, and
/// `HGENCODING` is pinned so changeset metadata round-trips as UTF-8.
pub fn hg_command_bare() -> Command {
    let mut cmd = Command::new("hg");
    cmd.env("HGPLAIN", "1")
        .env("HGRCPATH", "")
        .env("HGENCODING", "utf-8");
    cmd
}

/// Same as [`hg_command_bare`] but rooted in an existing repository.
pub fn hg_command(repo_dir: &Path) -> Command {
    let mut cmd = hg_command_bare();
    cmd.arg("--repository").arg(repo_dir);
    cmd
}

/// Builds a `git` invocation for the controlling repository.
///
/// Git exports `GIT_DIR` to remote helpers, so no explicit repository
/// argument is needed.
pub fn git_command() -> Command {
    Command::new("git")
}

pub trait CommandExtension {
    /// Runs the command with stdin closed and all output captured, without
    /// interpreting the exit status. Stdout must never leak through to the
    /// protocol stream, so inherited stdio is not an option here.
    fn capture(&mut self) -> Result<Output>;

    /// Like [`CommandExtension::capture`], but a non-zero exit status
    /// becomes an error carrying the command line and its stderr text.
    fn check_output(&mut self) -> Result<Output> {
        let output = self.capture()?;
        if !output.status.success() {
            bail!("{}", describe_failure(self.describe(), &output));
        }
        Ok(output)
    }

    /// Like [`CommandExtension::check_output`] but treats the listed exit
    /// codes as success as well. Mercurial uses exit code 1 for benign
    /// "nothing found" situations.
    fn check_output_allowing(&mut self, extra_codes: &[i32]) -> Result<Output> {
        let output = self.capture()?;
        let code = output.status.code();
        if !output.status.success() && !code.is_some_and(|c| extra_codes.contains(&c)) {
            bail!("{}", describe_failure(self.describe(), &output));
        }
        Ok(output)
    }

    fn describe(&self) -> String;
}

impl CommandExtension for Command {
    fn capture(&mut self) -> Result<Output> {
        self.stdin(Stdio::null())
            .output()
            .with_context(|| format!("Failed to run {}", self.describe()))
    }

    fn describe(&self) -> String {
        let mut words = vec![self.get_program().to_string_lossy().into_owned()];
        words.extend(
            self.get_args()
                .map(|arg| arg.to_string_lossy().into_owned()),
        );
        words.join(" ")
    }
}

fn describe_failure(command_line: String, output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stderr = stderr.trim();
    if stderr.is_empty() {
        format!("{command_line}: {}", output.status)
    } else if !stderr.contains('\n') {
        format!("{command_line}: {} ({stderr})", output.status)
    } else {
        format!("{command_line}: {}\n{stderr}", output.status)
    }
}

/// Extracts the `abort: …` message from Mercurial stderr, falling back to
/// the trimmed text when there is none.
pub fn abort_message(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    for line in text.lines() {
        if let Some(msg) = line.strip_prefix("abort: ") {
            return msg.to_owned();
        }
    }
    text.trim().to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abort_message_extraction() {
        assert_eq!(
            abort_message(b"pulling from http://x\nabort: push creates new remote head 123abc!\n"),
            "push creates new remote head 123abc!"
        );
        assert_eq!(abort_message(b"  plain text\n"), "plain text");
    }

    #[test]
    fn test_describe_failure_formats() {
        let mut cmd = Command::new("false");
        cmd.arg("--flag");
        assert_eq!(cmd.describe(), "false --flag");
    }
}
