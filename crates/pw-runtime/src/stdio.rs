use orion_error::ErrorOweBase;
use url::Url;

use pw_core::provider::{NoopSink, SinkBox, SourceStream};

use crate::error::{RuntimeReason, RuntimeResult};
use crate::task::Task;

// ---------------------------------------------------------------------------
// Standard stream binding — inherit the parent's streams or go remote
// ---------------------------------------------------------------------------

/// Where the child's stdin comes from.
pub(crate) enum InputBinding {
    /// The parent's own stdin.
    Inherit,
    /// A provider-backed stream, pumped into a pipe to the child.
    Remote(SourceStream),
}

/// Where one of the child's output streams goes.
///
/// `piped` decides the child's fd setup: an inherited stream keeps the
/// parent's fd (no copying), a remote one is piped through a pump task.
/// Either way `sink` takes part in teardown, so an inherited stream carries
/// a [`NoopSink`] whose close and destroy do nothing.
pub(crate) struct OutputBinding {
    pub sink: SinkBox,
    pub piped: bool,
}

pub(crate) async fn bind_stdin(task: &Task) -> RuntimeResult<InputBinding> {
    match &task.stdin {
        None => Ok(InputBinding::Inherit),
        Some(url) => {
            let stream = task
                .providers
                .open_source(url)
                .await
                .owe(RuntimeReason::Stdio)?;
            Ok(InputBinding::Remote(stream))
        }
    }
}

pub(crate) async fn bind_stdout(task: &Task) -> RuntimeResult<OutputBinding> {
    bind_output(task, task.stdout.as_ref(), || {
        Box::new(NoopSink(tokio::io::stdout()))
    })
    .await
}

pub(crate) async fn bind_stderr(task: &Task) -> RuntimeResult<OutputBinding> {
    bind_output(task, task.stderr.as_ref(), || {
        Box::new(NoopSink(tokio::io::stderr()))
    })
    .await
}

async fn bind_output(
    task: &Task,
    url: Option<&Url>,
    inherit: impl FnOnce() -> SinkBox,
) -> RuntimeResult<OutputBinding> {
    match url {
        None => Ok(OutputBinding {
            sink: inherit(),
            piped: false,
        }),
        Some(url) => {
            let sink = task
                .providers
                .open_target(url)
                .await
                .owe(RuntimeReason::Stdio)?;
            Ok(OutputBinding { sink, piped: true })
        }
    }
}
