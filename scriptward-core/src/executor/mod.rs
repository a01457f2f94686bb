//! Runs accepted scripts in an isolated Python child.
//!
//! Gates run in a fixed order before anything touches the disk: emptiness,
//! length, the scanner, then GUI detection. Only then is a harness written
//! to the scratch directory and handed to the [`ProcessLauncher`].

mod harness;

use std::collections::HashMap;
use std::ffi::OsString;
use std::path::PathBuf;

use scriptward_commons::{scrub_output_lines, truncate_chars};
use scriptward_config::{PolicySet, SandboxConfig};
use scriptward_runner::{
    ChildLimits, CommandStatus, LaunchSpec, ProcessLauncher, build_sanitized_env, current_env,
};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{ExecutionError, TimeBudget};
use crate::scanner;
use harness::{HARNESS_IDENT_PREFIX, HarnessScript};

/// Interpreter flags: isolated mode, unbuffered, no bytecode, UTF-8 I/O.
const INTERPRETER_FLAGS: &[&str] = &["-I", "-u", "-B", "-X", "utf8"];

/// Output of one finished run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionResult {
    /// Merged stdout and stderr after scrubbing and truncation.
    pub output: String,
    pub truncated: bool,
    pub exit_code: Option<i32>,
    #[serde(skip)]
    pub exit_status: CommandStatus,
}

impl ExecutionResult {
    pub fn success(&self) -> bool {
        self.exit_status.success()
    }
}

/// Borrowed view over the startup state needed to run one script.
#[derive(Clone, Copy)]
pub struct Executor<'a> {
    config: &'a SandboxConfig,
    policy: &'a PolicySet,
    launcher: &'a dyn ProcessLauncher,
}

impl<'a> Executor<'a> {
    pub fn new(
        config: &'a SandboxConfig,
        policy: &'a PolicySet,
        launcher: &'a dyn ProcessLauncher,
    ) -> Self {
        Self {
            config,
            policy,
            launcher,
        }
    }

    /// Check, wrap and run `source`.
    pub async fn execute(&self, source: &str) -> Result<ExecutionResult, ExecutionError> {
        self.admit(source)?;

        let interpreter = self.resolve_interpreter()?;
        let rendered = harness::render(source)
            .map_err(|error| ExecutionError::LaunchFailed(error.to_string()))?;
        let script = HarnessScript::create(&self.config.layout.scratch_dir, &rendered)
            .map_err(|error| {
                ExecutionError::LaunchFailed(format!("failed to write harness script: {error}"))
            })?;

        let limits = &self.config.limits;
        let spec = LaunchSpec::new(interpreter, &self.config.layout.scratch_dir)
            .args(
                INTERPRETER_FLAGS
                    .iter()
                    .map(OsString::from)
                    .chain(std::iter::once(script.path().as_os_str().to_owned())),
            )
            .env(self.child_env())
            .timeout(limits.execution_timeout())
            .limits(ChildLimits::strict(limits.cpu_time_limit()))
            .output_cap(limits.max_captured_output_bytes);

        info!(chars = source.chars().count(), "starting sandboxed run");
        let run = self.launcher.launch(&spec).await?;
        info!(
            pid = run.pid,
            elapsed_ms = run.elapsed.as_millis(),
            code = ?run.status.code(),
            "sandboxed run finished"
        );

        if run.timed_out {
            warn!(pid = run.pid, "sandboxed run hit the wall-clock budget");
            return Err(ExecutionError::TimedOut(TimeBudget::WallClock(
                limits.execution_timeout(),
            )));
        }
        if let Some(cpu_seconds) = limits.cpu_time_limit()
            && run.status.cpu_limit_exceeded()
        {
            warn!(pid = run.pid, "sandboxed run hit the CPU budget");
            return Err(ExecutionError::TimedOut(TimeBudget::CpuTime(cpu_seconds)));
        }
        if run.output_limit_exceeded {
            warn!(pid = run.pid, "sandboxed run exceeded the output ceiling");
            return Err(ExecutionError::OutputTooLarge {
                limit: limits.max_captured_output_bytes,
            });
        }

        let mut markers = self.policy.output_leak_markers.clone();
        markers.push(HARNESS_IDENT_PREFIX.to_owned());
        markers.push(script.path().display().to_string());
        let scrubbed = scrub_output_lines(&run.output_lossy(), &markers);
        let (output, truncated) = truncate_chars(&scrubbed, limits.max_output_chars);

        Ok(ExecutionResult {
            output,
            truncated,
            exit_code: run.status.code(),
            exit_status: run.status,
        })
    }

    /// Every check that must pass before a run is prepared.
    pub fn admit(&self, source: &str) -> Result<(), ExecutionError> {
        if source.trim().is_empty() {
            return Err(ExecutionError::EmptySource);
        }

        let actual = source.chars().count();
        let limit = self.config.limits.max_script_chars;
        if actual > limit {
            debug!(actual, limit, "script rejected: too long");
            return Err(ExecutionError::SourceTooLong { actual, limit });
        }

        if let Some(violation) = scanner::scan(source, self.policy) {
            return Err(ExecutionError::Rejected(violation));
        }

        if let Some(keyword) = self.policy.gui_keyword_in(source) {
            debug!(keyword, "script rejected: GUI toolkit");
            return Err(ExecutionError::GuiNotSupported(keyword.to_owned()));
        }

        Ok(())
    }

    fn resolve_interpreter(&self) -> Result<PathBuf, ExecutionError> {
        let name = &self.config.python.interpreter;
        which::which(name).map_err(|error| {
            ExecutionError::LaunchFailed(format!("python interpreter `{name}` not found: {error}"))
        })
    }

    fn child_env(&self) -> HashMap<String, String> {
        let mut env = build_sanitized_env(&current_env(), &self.config.layout.scratch_dir);
        env.insert("PYTHONIOENCODING".to_owned(), "utf-8".to_owned());
        env.insert("PYTHONDONTWRITEBYTECODE".to_owned(), "1".to_owned());
        env
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ScanViolation;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use scriptward_commons::TRUNCATION_MARKER;
    use scriptward_runner::{CapturedRun, IsolatedLauncher, LaunchError};
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Records every launch and answers with a canned run.
    struct RecordingLauncher {
        launches: Mutex<Vec<LaunchSpec>>,
        reply: CapturedRun,
    }

    impl RecordingLauncher {
        fn replying(output: &str, status: CommandStatus) -> Self {
            Self {
                launches: Mutex::new(Vec::new()),
                reply: CapturedRun {
                    output: output.as_bytes().to_vec(),
                    status,
                    timed_out: false,
                    output_limit_exceeded: false,
                    elapsed: Duration::from_millis(5),
                    pid: 4242,
                },
            }
        }

        fn launch_count(&self) -> usize {
            self.launches.lock().map(|launches| launches.len()).unwrap_or(0)
        }
    }

    #[async_trait]
    impl ProcessLauncher for RecordingLauncher {
        async fn launch(&self, spec: &LaunchSpec) -> Result<CapturedRun, LaunchError> {
            if let Ok(mut launches) = self.launches.lock() {
                launches.push(spec.clone());
            }
            Ok(self.reply.clone())
        }
    }

    /// Config whose interpreter is this test binary, so `which` always resolves.
    fn fake_config(temp: &TempDir) -> anyhow::Result<SandboxConfig> {
        let mut config = SandboxConfig::load_from_base(temp.path(), None)?;
        config.python.interpreter = std::env::current_exe()?.display().to_string();
        Ok(config)
    }

    fn ok_status() -> CommandStatus {
        CommandStatus::new(true, Some(0), None)
    }

    #[tokio::test]
    async fn oversized_source_never_reaches_the_launcher() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let mut config = fake_config(&temp)?;
        config.limits.max_script_chars = 10;
        let policy = PolicySet::default();
        let launcher = RecordingLauncher::replying("", ok_status());

        let result = Executor::new(&config, &policy, &launcher)
            .execute("print('this is too long')")
            .await;
        assert!(matches!(
            result,
            Err(ExecutionError::SourceTooLong { limit: 10, .. })
        ));
        assert_eq!(launcher.launch_count(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn rejected_scripts_are_not_written_or_launched() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let config = fake_config(&temp)?;
        let policy = PolicySet::default();
        let launcher = RecordingLauncher::replying("", ok_status());
        let executor = Executor::new(&config, &policy, &launcher);

        assert!(matches!(
            executor.execute("   \n").await,
            Err(ExecutionError::EmptySource)
        ));
        assert!(matches!(
            executor.execute("import os\nprint(os.getcwd())").await,
            Err(ExecutionError::Rejected(_))
        ));
        assert!(matches!(
            executor.execute("import tkinter\n").await,
            Err(ExecutionError::GuiNotSupported(keyword)) if keyword == "tkinter"
        ));
        assert_eq!(launcher.launch_count(), 0);
        assert_eq!(std::fs::read_dir(&config.layout.scratch_dir)?.count(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn launch_uses_scratch_dir_and_clean_env() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let config = fake_config(&temp)?;
        let policy = PolicySet::default();
        let launcher = RecordingLauncher::replying("4.0\n", ok_status());

        let result = Executor::new(&config, &policy, &launcher)
            .execute("print(math.sqrt(16))")
            .await?;
        assert_eq!(result.output, "4.0");
        assert!(!result.truncated);

        let spec = launcher
            .launches
            .lock()
            .ok()
            .and_then(|launches| launches.first().cloned())
            .ok_or_else(|| anyhow::anyhow!("launcher was not called"))?;
        assert_eq!(spec.cwd, config.layout.scratch_dir);
        assert_eq!(spec.limits, ChildLimits::strict(Some(10)));
        assert_eq!(spec.timeout, Duration::from_secs(30));
        assert_eq!(
            spec.env.get("HOME").map(String::as_str),
            Some(config.layout.scratch_dir.display().to_string().as_str())
        );
        assert!(spec.args.iter().any(|arg| arg == "-I"));
        assert_eq!(std::fs::read_dir(&config.layout.scratch_dir)?.count(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn output_is_scrubbed_and_truncated() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let mut config = fake_config(&temp)?;
        config.limits.max_output_chars = 12;
        let policy = PolicySet::default();
        let launcher = RecordingLauncher::replying(
            "line one\nsys.path = ['/x']\n    exec(_sw_code, _sw_namespace)\n    ^^^^^^\nline two\n",
            CommandStatus::new(false, Some(1), None),
        );

        let result = Executor::new(&config, &policy, &launcher)
            .execute("print('x')")
            .await?;
        assert!(result.truncated);
        assert_eq!(result.output, format!("line one\nlin\n\n{TRUNCATION_MARKER}"));
        assert_eq!(result.exit_code, Some(1));
        assert!(!result.success());
        Ok(())
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cpu_kill_is_reported_as_timeout() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let config = fake_config(&temp)?;
        let policy = PolicySet::default();
        let launcher =
            RecordingLauncher::replying("", CommandStatus::new(false, None, Some(libc::SIGXCPU)));

        let result = Executor::new(&config, &policy, &launcher)
            .execute("print(1)")
            .await;
        assert!(matches!(
            result,
            Err(ExecutionError::TimedOut(TimeBudget::CpuTime(10)))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn missing_interpreter_is_a_launch_failure() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let mut config = SandboxConfig::load_from_base(temp.path(), None)?;
        config.python.interpreter = "scriptward-no-such-python".to_owned();
        let policy = PolicySet::default();
        let launcher = RecordingLauncher::replying("", ok_status());

        let result = Executor::new(&config, &policy, &launcher)
            .execute("print(1)")
            .await;
        assert!(matches!(result, Err(ExecutionError::LaunchFailed(_))));
        assert_eq!(launcher.launch_count(), 0);
        Ok(())
    }

    fn python_available() -> bool {
        which::which("python3").is_ok()
    }

    fn real_config(temp: &TempDir) -> anyhow::Result<SandboxConfig> {
        let mut config = SandboxConfig::load_from_base(temp.path(), None)?;
        config.limits.execution_timeout_secs = 10;
        Ok(config)
    }

    #[tokio::test]
    async fn runs_real_python_with_exposed_modules() -> anyhow::Result<()> {
        if !python_available() {
            return Ok(());
        }
        let temp = TempDir::new()?;
        let config = real_config(&temp)?;
        let policy = PolicySet::default();
        let executor = Executor::new(&config, &policy, &IsolatedLauncher);

        let result = executor
            .execute("import random\nrandom.seed(7)\nprint(math.sqrt(16), 1 <= random.randint(1, 6) <= 6)\n")
            .await?;
        assert!(result.success(), "output: {}", result.output);
        assert_eq!(result.output.trim(), "4.0 True");
        Ok(())
    }

    #[tokio::test]
    async fn harness_blocks_what_the_scanner_misses() -> anyhow::Result<()> {
        if !python_available() {
            return Ok(());
        }
        let temp = TempDir::new()?;
        let config = real_config(&temp)?;
        let policy = PolicySet::default();
        let executor = Executor::new(&config, &policy, &IsolatedLauncher);

        let result = executor.execute("import xml\n").await?;
        assert!(!result.success());
        assert!(result.output.contains("not allowed in the sandbox"), "{}", result.output);

        let result = executor.execute("print(getattr)\n").await?;
        assert!(result.output.contains("NameError"), "{}", result.output);

        let result = executor.execute("print(random.Random)\nprint(random._os)\n").await?;
        assert!(result.output.contains("AttributeError"), "{}", result.output);
        Ok(())
    }

    #[tokio::test]
    async fn format_field_lookups_cannot_reach_host_modules() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let config = fake_config(&temp)?;
        let policy = PolicySet::default();
        let executor = Executor::new(&config, &policy, &IsolatedLauncher);
        let literal = "import string\n\
            g = string.Formatter().get_field('0.__init__.__globals__', [random.Random], {})[0]\n\
            print(g['_os'].getcwd())\n";
        assert!(matches!(
            executor.admit(literal),
            Err(ExecutionError::Rejected(ScanViolation::SuspiciousToken(_)))
        ));

        if !python_available() {
            return Ok(());
        }
        let config = real_config(&temp)?;
        let executor = Executor::new(&config, &policy, &IsolatedLauncher);
        let spliced = "import string\n\
            path = '0.__init__.__glob' + 'als__'\n\
            g = string.Formatter().get_field(path, [random.Random], {})[0]\n\
            print('HOST', g['_os'].getcwd())\n";
        executor.admit(spliced)?;
        let result = executor.execute(spliced).await?;
        assert!(!result.success());
        assert!(result.output.contains("not allowed in the sandbox"), "{}", result.output);
        assert!(!result.output.contains("HOST"), "{}", result.output);
        Ok(())
    }

    #[tokio::test]
    async fn tracebacks_do_not_reveal_the_harness() -> anyhow::Result<()> {
        if !python_available() {
            return Ok(());
        }
        let temp = TempDir::new()?;
        let config = real_config(&temp)?;
        let policy = PolicySet::default();
        let executor = Executor::new(&config, &policy, &IsolatedLauncher);

        let result = executor.execute("print(1 / 0)\n").await?;
        assert!(result.output.contains("ZeroDivisionError"), "{}", result.output);
        assert!(!result.output.contains("_sw_"), "{}", result.output);
        assert!(
            !result
                .output
                .contains(&config.layout.scratch_dir.display().to_string()),
            "{}",
            result.output
        );
        Ok(())
    }

    #[tokio::test]
    async fn endless_loop_times_out() -> anyhow::Result<()> {
        if !python_available() {
            return Ok(());
        }
        let temp = TempDir::new()?;
        let mut config = real_config(&temp)?;
        config.limits.execution_timeout_secs = 2;
        config.limits.cpu_time_limit_secs = 1;
        let policy = PolicySet::default();

        let started = std::time::Instant::now();
        let result = Executor::new(&config, &policy, &IsolatedLauncher)
            .execute("while True:\n    pass\n")
            .await;
        assert!(matches!(result, Err(ExecutionError::TimedOut(_))));
        assert!(started.elapsed() < Duration::from_secs(6));
        Ok(())
    }

    #[tokio::test]
    async fn flooding_output_is_stopped() -> anyhow::Result<()> {
        if !python_available() {
            return Ok(());
        }
        let temp = TempDir::new()?;
        let mut config = real_config(&temp)?;
        config.limits.max_captured_output_bytes = 16 * 1024;
        let policy = PolicySet::default();

        let result = Executor::new(&config, &policy, &IsolatedLauncher)
            .execute("while True:\n    print('x' * 1000)\n")
            .await;
        assert!(matches!(
            result,
            Err(ExecutionError::OutputTooLarge { limit: 16_384 })
        ));
        Ok(())
    }
}
