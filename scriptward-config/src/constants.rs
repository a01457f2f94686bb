/// Environment variables read once at startup.
pub mod env {
    /// Installation base directory. Falls back to the current directory.
    pub const HOME_ENV_VAR: &str = "SCRIPTWARD_HOME";
    /// Extra allowed roots, separated by the platform path separator.
    pub const ALLOWED_DIRS_ENV_VAR: &str = "SCRIPTWARD_ALLOWED_DIRS";
}

/// Fixed layout beneath the installation base directory.
pub mod layout {
    pub const CONFIG_FILE_NAME: &str = "scriptward.toml";
    pub const DATA_DIR: &str = "data";
    /// Relative to the data directory.
    pub const SHARED_DIR: &str = "shared";
    /// Relative to the data directory.
    pub const SCRATCH_DIR: &str = "scratch";
    /// Relative to the data directory.
    pub const WEB_CACHE_FILE: &str = "last_web_content.txt";
    /// Relative to the data directory.
    pub const MEMORY_FILE: &str = "memory.json";
}

pub mod limits {
    pub const MAX_SCRIPT_CHARS: usize = 50_000;
    pub const MAX_OUTPUT_CHARS: usize = 20_000;
    pub const MAX_FILE_CHARS: usize = 200_000;
    pub const MAX_SHARED_CHARS: usize = 200_000;
    pub const MAX_WEB_CHARS: usize = 200_000;
    pub const EXECUTION_TIMEOUT_SECS: u64 = 30;
    pub const CPU_TIME_LIMIT_SECS: u64 = 10;
    pub const MAX_CAPTURED_OUTPUT_BYTES: usize = 1024 * 1024;
    pub const FETCH_TIMEOUT_SECS: u64 = 30;
    pub const SHARED_LIST_DEFAULT: usize = 200;
    pub const SHARED_LIST_MAX: usize = 500;
    /// Bytes inspected for executable magic numbers before a shared read.
    pub const BINARY_SNIFF_BYTES: usize = 1024;
}

/// Deny-lists consumed by the scanner, the guards and the executor.
pub mod policy {
    pub const BLOCKED_IMPORTS: &[&str] = &[
        "os",
        "sys",
        "subprocess",
        "socket",
        "shutil",
        "pathlib",
        "importlib",
        "builtins",
        "ctypes",
        "multiprocessing",
        "threading",
        "pickle",
        "marshal",
        "zipfile",
        "tarfile",
        "glob",
        "fnmatch",
        "tempfile",
        "configparser",
        "plistlib",
        "json",
        "yaml",
    ];

    pub const BLOCKED_CALLS: &[&str] = &[
        "open",
        "eval",
        "exec",
        "compile",
        "__import__",
        "global",
        "breakpoint",
        "help",
        "dir",
        "vars",
        "locals",
        "reload",
    ];

    pub const BLOCKED_NAMES: &[&str] = &[
        "__builtins__",
        "builtins",
        "__globals__",
        "__class__",
        "__import__",
        "_io",
        "_thread",
        "sys",
        "os",
        "subprocess",
        "socket",
    ];

    /// Core names (without the surrounding `__`) of forbidden dunder attributes.
    pub const BLOCKED_ATTRIBUTES: &[&str] =
        &["builtins", "globals", "class", "mro", "subclasses", "bases"];

    /// Frame and code introspection attributes, matched exactly.
    pub const REFLECTION_ATTRIBUTES: &[&str] = &[
        "gi_frame",
        "gi_code",
        "cr_frame",
        "ag_frame",
        "f_back",
        "f_globals",
        "f_locals",
        "f_builtins",
        "tb_frame",
        "tb_next",
    ];

    /// Checked in order against the lower-cased source; first hit wins.
    pub const SUSPICIOUS_TOKENS: &[&str] = &[
        "import os",
        "import sys",
        "import subprocess",
        "import socket",
        "import shutil",
        "__import__",
        "open(",
        "eval(",
        "exec(",
        ".iterdir()",
        ".rglob",
        ".glob(",
        "pathlib",
        "global(",
        "__builtins__",
        "breakpoint",
        "help(",
        "vars(",
        "locals(",
        "__globals__",
        "__subclasses__",
    ];

    /// Raw-text catch-all checked after the tree walk, case-sensitive.
    pub const RAW_RECHECK_TOKENS: &[&str] = &["global ", "__import__", "breakpoint"];

    /// Lower-cased substrings that mark GUI toolkit usage.
    pub const GUI_KEYWORDS: &[&str] = &["pygame", "tkinter", "turtle", "pyqt", "pyside", "kivy"];

    /// Output lines containing any of these are dropped before returning.
    pub const OUTPUT_LEAK_MARKERS: &[&str] = &["__builtins__", "sys.path"];

    /// Case-insensitive substrings refused inside shared-file content.
    pub const SHARED_CONTENT_MARKERS: &[&str] = &["../", "..\\", "/etc/", "\\windows\\"];

    pub const ALLOWED_URL_SCHEMES: &[&str] = &["http", "https"];

    pub const BLOCKED_HOSTS: &[&str] = &["localhost", "127.0.0.1", "0.0.0.0"];
}
