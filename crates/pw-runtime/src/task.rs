use std::path::PathBuf;

use url::Url;

use pw_core::binding::TagMap;
use pw_core::provider::ProviderSet;

// ---------------------------------------------------------------------------
// Call — the command line to run
// ---------------------------------------------------------------------------

/// The user's command: executable, arguments (which may embed `%{tag}`
/// placeholders), extra environment, and an optional working directory.
pub struct Call {
    pub executable: String,
    pub args: Vec<String>,
    /// Wrap the command in `<shell> -c "<joined line>"` when set.
    pub shell: Option<String>,
    pub env: Vec<(String, String)>,
    pub working_dir: Option<PathBuf>,
}

impl Call {
    /// The binary and argv to actually spawn. Shell mode joins the whole
    /// command into one `-c` line, so placeholders inside it still expand.
    pub fn cmdline(&self) -> (String, Vec<String>) {
        match &self.shell {
            Some(shell) => {
                let mut line = self.executable.clone();
                for arg in &self.args {
                    line.push(' ');
                    line.push_str(arg);
                }
                (shell.clone(), vec!["-c".to_string(), line])
            }
            None => (self.executable.clone(), self.args.clone()),
        }
    }
}

// ---------------------------------------------------------------------------
// Task — everything one invocation needs
// ---------------------------------------------------------------------------

/// One run's worth of state: the call, the tag bindings, the provider set,
/// and the scratch directory hosting the FIFO inodes.
pub struct Task {
    pub call: Call,
    /// Keep created targets when the command fails.
    pub preserve: bool,
    /// Directory hosting the FIFO inodes. Must be writable.
    pub scratch: PathBuf,
    pub providers: ProviderSet,
    pub sources: TagMap,
    pub targets: TagMap,
    /// Child stdin source; `None` inherits the parent's stdin.
    pub stdin: Option<Url>,
    /// Child stdout target; `None` inherits the parent's stdout.
    pub stdout: Option<Url>,
    /// Child stderr target; `None` inherits the parent's stderr.
    pub stderr: Option<Url>,
}
