//! `ProcessEnvironment` — opaque-to-the-core facts supplied by the host.

use std::collections::HashMap;
use std::path::PathBuf;

/// Host-supplied facts a `ProcessTask` needs to locate and launch a program.
/// The core treats every field here as an opaque string/path; resolution
/// policy (e.g. how `unity_application_contents` is used to find a bundled
/// interpreter) belongs to the caller building the `ProcessStartSpec`.
#[derive(Debug, Clone)]
pub struct ProcessEnvironment {
    pub working_directory: PathBuf,
    pub is_windows: bool,
    pub executable_extension: String,
    pub unity_application_contents: Option<PathBuf>,
    pub environment_variables: HashMap<String, String>,
}

impl ProcessEnvironment {
    /// Build a `ProcessEnvironment` describing the current host process.
    pub fn host_default() -> Self {
        Self {
            working_directory: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            is_windows: cfg!(windows),
            executable_extension: if cfg!(windows) { "exe".into() } else { String::new() },
            unity_application_contents: None,
            environment_variables: HashMap::new(),
        }
    }

    pub fn with_working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = dir.into();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment_variables.insert(key.into(), value.into());
        self
    }
}
