//! `ProcessStartSpec` — the ProcessStartInfo-equivalent configuration for a
//! `ProcessTask`.

use std::collections::HashMap;
use std::path::PathBuf;

/// Program, arguments, redirects, and the window-visibility flag for a
/// process a `ProcessTask` will spawn. Must be installed via `Configure`
/// before `Start`.
#[derive(Debug, Clone)]
pub struct ProcessStartSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env_overlay: HashMap<String, String>,
    /// Whether a `StandardInput` writer should be attached.
    pub redirect_stdin: bool,
    /// Host windowing hint; the core never interprets this, it is forwarded
    /// as-is for platforms where process spawning distinguishes windowed
    /// vs. headless launches (no-op on Unix).
    pub create_window: bool,
}

impl ProcessStartSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env_overlay: HashMap::new(),
            redirect_stdin: false,
            create_window: false,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_overlay.insert(key.into(), value.into());
        self
    }

    pub fn redirect_stdin(mut self, enabled: bool) -> Self {
        self.redirect_stdin = enabled;
        self
    }
}
