use std::io::{self, Write};
use std::process::Stdio;

use futures_util::stream::{self, BoxStream, StreamExt};
use tempfile::TempPath;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info};

use super::OperationError;

/// An external command to run, described independently of how it is spawned
#[derive(Debug, Clone, PartialEq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub requires_elevation: bool,
    pub script: Option<Script>,
    /// Exit codes that count as success
    pub success_codes: Vec<i32>,
}

/// Script text handed to the program through a transient file.
/// The path is appended after `flag` (or alone when there is no flag).
#[derive(Debug, Clone, PartialEq)]
pub struct Script {
    pub flag: Option<String>,
    pub contents: String,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            requires_elevation: false,
            script: None,
            success_codes: vec![0],
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn elevated(mut self) -> Self {
        self.requires_elevation = true;
        self
    }

    /// fsck-style tools exit non-zero after fixing errors
    pub fn succeeds_with(mut self, codes: &[i32]) -> Self {
        self.success_codes = codes.to_vec();
        self
    }

    pub fn with_script(mut self, flag: Option<&str>, contents: impl Into<String>) -> Self {
        self.script = Some(Script {
            flag: flag.map(str::to_string),
            contents: contents.into(),
        });
        self
    }

    /// Command line as shown to the user
    pub fn display(&self) -> String {
        let mut parts = vec![self.program.clone()];
        parts.extend(self.args.iter().cloned());
        if let Some(script) = &self.script {
            parts.extend(script.flag.iter().cloned());
            parts.push("<script>".to_string());
        }
        parts.join(" ")
    }
}

/// Spawns external commands and streams their merged output line by line
#[derive(Debug, Clone, Copy)]
pub struct CommandRunner {
    elevated: bool,
}

impl CommandRunner {
    pub fn new(elevated: bool) -> Self {
        Self { elevated }
    }

    pub fn check_privileges(&self, spec: &CommandSpec) -> Result<(), OperationError> {
        if spec.requires_elevation && !self.elevated {
            return Err(OperationError::InsufficientPrivilege);
        }
        Ok(())
    }

    /// Starts the command. Nothing is spawned when elevation is missing.
    pub fn run(&self, spec: &CommandSpec) -> Result<RunningCommand, OperationError> {
        self.check_privileges(spec)?;

        let script = spec.script.as_ref().map(write_script).transpose()?;

        let mut command = Command::new(&spec.program);
        command.args(&spec.args);
        if let (Some(script_spec), Some(path)) = (&spec.script, &script) {
            if let Some(flag) = &script_spec.flag {
                command.arg(flag);
            }
            command.arg(path.as_os_str());
        }
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        info!("Spawning {}", spec.display());
        let mut child = command
            .spawn()
            .map_err(|source| OperationError::SpawnFailed {
                program: spec.program.clone(),
                source,
            })?;

        let stdout = child.stdout.take().ok_or_else(|| {
            OperationError::StreamInterrupted("stdout pipe unavailable".to_string())
        })?;
        let stderr = child.stderr.take().ok_or_else(|| {
            OperationError::StreamInterrupted("stderr pipe unavailable".to_string())
        })?;

        Ok(RunningCommand {
            program: spec.program.clone(),
            success_codes: spec.success_codes.clone(),
            child,
            lines: stream::select(line_stream(stdout), line_stream(stderr)).boxed(),
            script,
        })
    }
}

/// A spawned process whose output has not been fully consumed yet
pub struct RunningCommand {
    program: String,
    success_codes: Vec<i32>,
    child: Child,
    lines: BoxStream<'static, io::Result<String>>,
    script: Option<TempPath>,
}

impl RunningCommand {
    /// Next line of merged stdout/stderr, `None` once both pipes are closed
    pub async fn next_line(&mut self) -> Option<Result<String, OperationError>> {
        self.lines
            .next()
            .await
            .map(|line| line.map_err(|e| OperationError::StreamInterrupted(e.to_string())))
    }

    #[cfg(test)]
    pub fn script_path(&self) -> Option<&std::path::Path> {
        self.script.as_deref()
    }

    /// Waits for the exit status. Remaining output is drained first.
    /// The script file, if any, is removed when this returns.
    pub async fn finish(mut self) -> Result<(), OperationError> {
        while self.lines.next().await.is_some() {}

        let status = self
            .child
            .wait()
            .await
            .map_err(|e| OperationError::StreamInterrupted(e.to_string()))?;
        debug!("{} exited with {}", self.program, status);

        match status.code() {
            Some(code) if self.success_codes.contains(&code) => Ok(()),
            Some(code) => Err(OperationError::NonZeroExit(code)),
            None => Err(OperationError::StreamInterrupted(format!(
                "{} was terminated by a signal",
                self.program
            ))),
        }
    }

    /// Feeds every line to `on_line`, then reports the exit status
    pub async fn stream_to<F>(mut self, mut on_line: F) -> Result<(), OperationError>
    where
        F: FnMut(String),
    {
        while let Some(line) = self.next_line().await {
            on_line(line?);
        }
        self.finish().await
    }
}

fn write_script(script: &Script) -> Result<TempPath, OperationError> {
    let mut file = tempfile::Builder::new()
        .prefix("usbcheck-")
        .suffix(".txt")
        .tempfile()?;
    file.write_all(script.contents.as_bytes())?;
    file.flush()?;
    Ok(file.into_temp_path())
}

fn line_stream<R>(reader: R) -> BoxStream<'static, io::Result<String>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    stream::unfold(Some(BufReader::new(reader)), |state| async move {
        let mut reader = state?;
        let mut buf = Vec::new();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => None,
            Ok(_) => Some((Ok(decode_line(&buf)), Some(reader))),
            Err(e) => Some((Err(e), None)),
        }
    })
    .boxed()
}

// Tools like chkdsk print in the console code page, so decode lossily
fn decode_line(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw)
        .trim_end_matches(['\n', '\r'])
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> CommandSpec {
        CommandSpec::new("sh").args(["-c", script])
    }

    #[test]
    fn decode_line_strips_line_endings() {
        assert_eq!(decode_line(b"hello\r\n"), "hello");
        assert_eq!(decode_line(b"no newline"), "no newline");
        assert_eq!(decode_line(&[0x66, 0xff, b'\n']), "f\u{fffd}");
    }

    #[test]
    fn display_hides_script_contents() {
        let spec = CommandSpec::new("diskpart").with_script(Some("/s"), "select volume E");
        assert_eq!(spec.display(), "diskpart /s <script>");
    }

    #[tokio::test]
    async fn missing_elevation_fails_before_spawning() {
        let runner = CommandRunner::new(false);
        let spec = CommandSpec::new("/nonexistent/usbcheck-never-runs").elevated();
        match runner.run(&spec) {
            Err(OperationError::InsufficientPrivilege) => {}
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("command should not start"),
        }
    }

    #[tokio::test]
    async fn missing_binary_is_a_spawn_failure() {
        let runner = CommandRunner::new(true);
        let spec = CommandSpec::new("/nonexistent/usbcheck-missing-tool");
        match runner.run(&spec) {
            Err(OperationError::SpawnFailed { program, .. }) => {
                assert_eq!(program, "/nonexistent/usbcheck-missing-tool");
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("command should not start"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn partial_output_precedes_exit_failure() {
        let runner = CommandRunner::new(false);
        let Ok(mut running) = runner.run(&sh("printf 'a\\nb\\n'; exit 1")) else {
            panic!("sh should spawn");
        };

        let mut lines = Vec::new();
        while let Some(line) = running.next_line().await {
            lines.push(line.expect("line"));
        }
        assert_eq!(lines, vec!["a", "b"]);

        match running.finish().await {
            Err(OperationError::NonZeroExit(1)) => {}
            other => panic!("expected NonZeroExit(1), got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stdout_and_stderr_are_merged() {
        let runner = CommandRunner::new(false);
        let Ok(running) = runner.run(&sh("echo out; echo err 1>&2")) else {
            panic!("sh should spawn");
        };

        let mut lines = Vec::new();
        running
            .stream_to(|line| lines.push(line))
            .await
            .expect("clean exit");
        lines.sort();
        assert_eq!(lines, vec!["err", "out"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn listed_exit_codes_count_as_success() {
        let runner = CommandRunner::new(false);
        let Ok(running) = runner.run(&sh("echo fixed; exit 1").succeeds_with(&[0, 1])) else {
            panic!("sh should spawn");
        };
        assert!(running.stream_to(|_| {}).await.is_ok());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn script_file_is_removed_after_the_run() {
        let runner = CommandRunner::new(false);
        let spec = CommandSpec::new("sh").with_script(None, "echo from-script\nexit 3\n");
        let Ok(mut running) = runner.run(&spec) else {
            panic!("sh should spawn");
        };
        let script = running.script_path().expect("script path").to_path_buf();
        assert!(script.exists());

        let first = running.next_line().await.expect("one line").expect("line");
        assert_eq!(first, "from-script");
        assert!(matches!(
            running.finish().await,
            Err(OperationError::NonZeroExit(3))
        ));
        assert!(!script.exists());
    }
}
