use std::sync::{Arc, Mutex};

use orion_error::StructError;
use tokio::io::AsyncRead;
use tokio::process::ChildStdin;
use tokio_util::sync::CancellationToken;

use pw_core::error::CoreReason;
use pw_core::multi_error::MultiError;
use pw_core::pipe::{SourcePipe, TargetPipe};
use pw_core::provider::{SinkBox, SourceStream};

/// A FIFO end that failed to open.
fn setup_error(detail: String) -> anyhow::Error {
    anyhow::anyhow!("{}", StructError::from(CoreReason::Setup).with_detail(detail))
}

/// A byte copy that failed mid-flight.
fn stream_error(detail: String) -> anyhow::Error {
    anyhow::anyhow!("{}", StructError::from(CoreReason::Stream).with_detail(detail))
}

// ---------------------------------------------------------------------------
// Sink vault — sinks come back from pump tasks for teardown custody
// ---------------------------------------------------------------------------

pub(crate) type SinkVault = Arc<Mutex<Vec<SinkBox>>>;

pub(crate) fn new_vault() -> SinkVault {
    Arc::new(Mutex::new(Vec::new()))
}

pub(crate) fn drain_vault(vault: &SinkVault) -> Vec<SinkBox> {
    let mut guard = match vault.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    std::mem::take(&mut *guard)
}

fn stash(vault: &SinkVault, sink: SinkBox) {
    let mut guard = match vault.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    guard.push(sink);
}

// ---------------------------------------------------------------------------
// Pump tasks — one per stream, all under the copy set's cancellation
// ---------------------------------------------------------------------------

/// Drain one target FIFO into its remote sink.
///
/// The read-end open parks until a writer arrives, and the child is that
/// writer, so this task must already be running when the child starts. The
/// sink lands in `vault` afterwards so teardown can close it and, on
/// failure, destroy it.
pub(crate) async fn pump_target(
    pipe: TargetPipe,
    cancel: CancellationToken,
    vault: SinkVault,
) -> MultiError {
    let TargetPipe { path, url, mut sink } = pipe;
    let mut mu = MultiError::new();

    let opened = tokio::select! {
        result = tokio::fs::File::open(&path) => Some(result),
        // A cancelled open leaves its blocking thread parked until the
        // process exits; no writer will ever arrive on this inode.
        _ = cancel.cancelled() => None,
    };
    match opened {
        None => {}
        Some(Err(e)) => {
            mu.push(setup_error(format!("open target pipe {}: {e}", path.display())));
        }
        Some(Ok(mut fifo)) => {
            pw_debug!(pipe, url = %url, path = %path.display(), "draining target pipe");
            let copied = tokio::select! {
                result = tokio::io::copy(&mut fifo, &mut sink) => result.map(|_| ()),
                _ = cancel.cancelled() => Ok(()),
            };
            mu.catch(copied.map_err(|e| stream_error(format!("write to {url}: {e}"))));
        }
    }

    stash(&vault, sink);
    mu
}

/// Feed one source FIFO from its remote stream.
///
/// The write-end open parks until a reader arrives, and the child is that
/// reader, so this task is only started after spawn. Stream and FIFO close
/// on drop when the pump finishes.
pub(crate) async fn pump_source(pipe: SourcePipe, cancel: CancellationToken) -> MultiError {
    let SourcePipe {
        path,
        url,
        mut stream,
    } = pipe;
    let mut mu = MultiError::new();

    let mut open_opts = tokio::fs::OpenOptions::new();
    open_opts.write(true).append(true);
    let opened = tokio::select! {
        result = open_opts.open(&path) => Some(result),
        _ = cancel.cancelled() => None,
    };
    match opened {
        None => {}
        Some(Err(e)) => {
            mu.push(setup_error(format!("open source pipe {}: {e}", path.display())));
        }
        Some(Ok(mut fifo)) => {
            pw_debug!(pipe, url = %url, path = %path.display(), "feeding source pipe");
            let copied = tokio::select! {
                result = tokio::io::copy(&mut stream, &mut fifo) => result.map(|_| ()),
                _ = cancel.cancelled() => Ok(()),
            };
            mu.catch(copied.map_err(|e| stream_error(format!("read from {url}: {e}"))));
        }
    }

    mu
}

/// Pump a provider-backed stdin stream into the child.
pub(crate) async fn pump_stdin(
    mut stream: SourceStream,
    mut stdin: ChildStdin,
    cancel: CancellationToken,
) -> MultiError {
    let mut mu = MultiError::new();
    let copied = tokio::select! {
        result = tokio::io::copy(&mut stream, &mut stdin) => match result {
            Ok(_) => Ok(()),
            // The child exiting without draining its stdin is not a failure.
            Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => Ok(()),
            Err(e) => Err(e),
        },
        _ = cancel.cancelled() => Ok(()),
    };
    mu.catch(copied.map_err(|e| stream_error(format!("feed child stdin: {e}"))));
    mu
}

/// Drain one of the child's piped output streams into its remote sink.
pub(crate) async fn pump_output<R>(
    mut reader: R,
    mut sink: SinkBox,
    name: &'static str,
    cancel: CancellationToken,
    vault: SinkVault,
) -> MultiError
where
    R: AsyncRead + Unpin + Send,
{
    let mut mu = MultiError::new();
    let copied = tokio::select! {
        result = tokio::io::copy(&mut reader, &mut sink) => result.map(|_| ()),
        _ = cancel.cancelled() => Ok(()),
    };
    mu.catch(copied.map_err(|e| stream_error(format!("drain child {name}: {e}"))));
    stash(&vault, sink);
    mu
}
