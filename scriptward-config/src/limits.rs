use std::time::Duration;

use anyhow::{Result, ensure};
use serde::{Deserialize, Serialize};

use crate::constants::limits;

/// Size and time ceilings applied to every request.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Limits {
    /// Longest script (in characters) accepted for scanning and execution.
    #[serde(default = "Limits::default_max_script_chars")]
    pub max_script_chars: usize,
    /// Characters of sandbox output returned before truncation.
    #[serde(default = "Limits::default_max_output_chars")]
    pub max_output_chars: usize,
    /// Characters returned from a file read before truncation.
    #[serde(default = "Limits::default_max_file_chars")]
    pub max_file_chars: usize,
    /// Largest content (in characters) accepted by a shared write.
    #[serde(default = "Limits::default_max_shared_chars")]
    pub max_shared_chars: usize,
    /// Characters of fetched page text kept in the cache file.
    #[serde(default = "Limits::default_max_web_chars")]
    pub max_web_chars: usize,
    /// Wall-clock budget for one sandboxed run.
    #[serde(default = "Limits::default_execution_timeout_secs")]
    pub execution_timeout_secs: u64,
    /// CPU-time rlimit applied to the sandboxed child (0 disables it).
    #[serde(default = "Limits::default_cpu_time_limit_secs")]
    pub cpu_time_limit_secs: u64,
    /// Hard ceiling on raw captured output; the run is killed past it.
    #[serde(default = "Limits::default_max_captured_output_bytes")]
    pub max_captured_output_bytes: usize,
    /// Request timeout for URL fetches.
    #[serde(default = "Limits::default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_script_chars: Self::default_max_script_chars(),
            max_output_chars: Self::default_max_output_chars(),
            max_file_chars: Self::default_max_file_chars(),
            max_shared_chars: Self::default_max_shared_chars(),
            max_web_chars: Self::default_max_web_chars(),
            execution_timeout_secs: Self::default_execution_timeout_secs(),
            cpu_time_limit_secs: Self::default_cpu_time_limit_secs(),
            max_captured_output_bytes: Self::default_max_captured_output_bytes(),
            fetch_timeout_secs: Self::default_fetch_timeout_secs(),
        }
    }
}

impl Limits {
    const fn default_max_script_chars() -> usize {
        limits::MAX_SCRIPT_CHARS
    }

    const fn default_max_output_chars() -> usize {
        limits::MAX_OUTPUT_CHARS
    }

    const fn default_max_file_chars() -> usize {
        limits::MAX_FILE_CHARS
    }

    const fn default_max_shared_chars() -> usize {
        limits::MAX_SHARED_CHARS
    }

    const fn default_max_web_chars() -> usize {
        limits::MAX_WEB_CHARS
    }

    const fn default_execution_timeout_secs() -> u64 {
        limits::EXECUTION_TIMEOUT_SECS
    }

    const fn default_cpu_time_limit_secs() -> u64 {
        limits::CPU_TIME_LIMIT_SECS
    }

    const fn default_max_captured_output_bytes() -> usize {
        limits::MAX_CAPTURED_OUTPUT_BYTES
    }

    const fn default_fetch_timeout_secs() -> u64 {
        limits::FETCH_TIMEOUT_SECS
    }

    pub fn execution_timeout(&self) -> Duration {
        Duration::from_secs(self.execution_timeout_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    /// CPU rlimit in seconds, `None` when disabled.
    pub fn cpu_time_limit(&self) -> Option<u64> {
        (self.cpu_time_limit_secs > 0).then_some(self.cpu_time_limit_secs)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.max_script_chars > 0,
            "limits.max_script_chars must be at least 1"
        );
        ensure!(
            self.max_output_chars > 0,
            "limits.max_output_chars must be at least 1"
        );
        ensure!(
            self.execution_timeout_secs > 0,
            "limits.execution_timeout_secs must be at least 1 second"
        );
        ensure!(
            self.max_captured_output_bytes >= self.max_output_chars,
            "limits.max_captured_output_bytes must not be smaller than limits.max_output_chars"
        );
        ensure!(
            self.fetch_timeout_secs > 0,
            "limits.fetch_timeout_secs must be at least 1 second"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn partial_table_keeps_remaining_defaults() -> Result<()> {
        let limits: Limits = toml::from_str("execution_timeout_secs = 5\nmax_output_chars = 100")?;
        assert_eq!(limits.execution_timeout(), Duration::from_secs(5));
        assert_eq!(limits.max_output_chars, 100);
        assert_eq!(limits.max_script_chars, limits::MAX_SCRIPT_CHARS);
        assert_eq!(limits.cpu_time_limit(), Some(limits::CPU_TIME_LIMIT_SECS));
        Ok(())
    }

    #[test]
    fn zero_cpu_limit_disables_rlimit() {
        let limits = Limits {
            cpu_time_limit_secs: 0,
            ..Limits::default()
        };
        assert_eq!(limits.cpu_time_limit(), None);
    }

    #[test]
    fn validate_rejects_zero_timeout() {
        let limits = Limits {
            execution_timeout_secs: 0,
            ..Limits::default()
        };
        assert!(limits.validate().is_err());
        assert!(Limits::default().validate().is_ok());
    }
}
