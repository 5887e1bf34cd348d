use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use anyhow::Context;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use orion_error::StructError;
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

use pw_core::multi_error::MultiError;
use pw_core::pipe::{PipeManager, SourcePipe, TargetPipe};
use pw_core::provider::SinkBox;
use pw_core::task_set::TaskSet;
use pw_core::template::ArgTemplater;

use crate::copy::{
    SinkVault, drain_vault, new_vault, pump_output, pump_source, pump_stdin, pump_target,
};
use crate::error::RuntimeReason;
use crate::stdio::{InputBinding, bind_stderr, bind_stdin, bind_stdout};
use crate::task::Task;

// ---------------------------------------------------------------------------
// RunOutcome — exit code plus every failure the run accumulated
// ---------------------------------------------------------------------------

pub struct RunOutcome {
    /// The child's exit code, or 1 when the child never ran.
    pub code: i32,
    pub errors: MultiError,
}

impl RunOutcome {
    /// Process exit code: the child's own code wins; a clean child with
    /// aggregated failures still exits non-zero.
    pub fn process_code(&self) -> i32 {
        if self.code != 0 {
            self.code
        } else if self.errors.is_empty() {
            0
        } else {
            1
        }
    }
}

// ---------------------------------------------------------------------------
// run — the supervision loop for one task
// ---------------------------------------------------------------------------

/// Run one task to completion: expand the command line, materialise pipes,
/// spawn the child under `cancel`, pump bytes both ways, and tear everything
/// down in reverse order of acquisition. Partially produced targets are
/// destroyed when the run failed and `preserve` is off.
pub async fn run(task: Task, cancel: CancellationToken) -> RunOutcome {
    let mut mu = MultiError::new();

    let manager = PipeManager::new(&task.scratch, &task.providers);
    let mut templater = ArgTemplater::new(&manager, &task.sources, &task.targets);

    let (bin, raw_args) = task.call.cmdline();
    let args = match templater.expand(&raw_args).await {
        Ok(args) => Some(args),
        Err(e) => {
            mu.push(anyhow::anyhow!("{e}"));
            None
        }
    };

    // Pipes created so far move into the inventory; teardown owns them from
    // here on, whichever way the run goes.
    let mut inv = Inventory::new(
        std::mem::take(&mut templater.sources),
        std::mem::take(&mut templater.targets),
    );

    let code = match args {
        Some(args) => execute(&task, &bin, args, &mut inv, &mut mu, &cancel).await,
        None => 1,
    };

    teardown(inv, task.preserve, &mut mu).await;

    RunOutcome { code, errors: mu }
}

// ---------------------------------------------------------------------------
// Inventory — everything teardown must account for
// ---------------------------------------------------------------------------

struct Inventory {
    /// Pipes not yet handed to a pump task (early failures leave them here).
    source_pipes: Vec<SourcePipe>,
    target_pipes: Vec<TargetPipe>,
    /// FIFO inodes to unlink, recorded up front so the paths survive the
    /// pipes moving into pump tasks.
    source_paths: Vec<PathBuf>,
    target_paths: Vec<PathBuf>,
    /// stdout/stderr sinks in teardown custody (inherited, or never pumped).
    outputs: Vec<SinkBox>,
    /// Sinks returned by finished pump tasks.
    pumped_targets: SinkVault,
    pumped_outputs: SinkVault,
}

impl Inventory {
    fn new(source_pipes: Vec<SourcePipe>, target_pipes: Vec<TargetPipe>) -> Self {
        Self {
            source_paths: source_pipes.iter().map(|p| p.path.clone()).collect(),
            target_paths: target_pipes.iter().map(|p| p.path.clone()).collect(),
            source_pipes,
            target_pipes,
            outputs: Vec::new(),
            pumped_targets: new_vault(),
            pumped_outputs: new_vault(),
        }
    }
}

// ---------------------------------------------------------------------------
// execute — stdio binding, pump scheduling, spawn, join, wait
// ---------------------------------------------------------------------------

async fn execute(
    task: &Task,
    bin: &str,
    args: Vec<String>,
    inv: &mut Inventory,
    mu: &mut MultiError,
    cancel: &CancellationToken,
) -> i32 {
    let stdin = match bind_stdin(task).await {
        Ok(binding) => binding,
        Err(e) => {
            mu.push(anyhow::anyhow!("unable to set up input: {e}"));
            return 1;
        }
    };

    let stdout = match bind_stdout(task).await {
        Ok(binding) => binding,
        Err(e) => {
            mu.push(anyhow::anyhow!("unable to set up output: {e}"));
            return 1;
        }
    };
    let stderr = match bind_stderr(task).await {
        Ok(binding) => binding,
        Err(e) => {
            inv.outputs.push(stdout.sink);
            mu.push(anyhow::anyhow!("unable to set up output: {e}"));
            return 1;
        }
    };

    let mut cmd = Command::new(bin);
    cmd.args(&args)
        .kill_on_drop(true)
        .stdin(match &stdin {
            InputBinding::Inherit => Stdio::inherit(),
            InputBinding::Remote(_) => Stdio::piped(),
        })
        .stdout(if stdout.piped { Stdio::piped() } else { Stdio::inherit() })
        .stderr(if stderr.piped { Stdio::piped() } else { Stdio::inherit() });
    if !task.call.env.is_empty() {
        cmd.envs(task.call.env.iter().cloned());
    }
    if let Some(dir) = &task.call.working_dir {
        cmd.current_dir(dir);
    }

    // Target pumps start first: their FIFO read-end opens must be pending
    // before the child (the write side) exists, or the child blocks forever
    // opening the pipe.
    let mut copies = TaskSet::new(cancel.child_token());
    let copy_cancel = copies.cancel_token();
    for pipe in inv.target_pipes.drain(..) {
        copies.spawn(pump_target(
            pipe,
            copy_cancel.clone(),
            Arc::clone(&inv.pumped_targets),
        ));
    }

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            let err = StructError::from(RuntimeReason::Spawn)
                .with_detail(format!("unable to start \"{bin}\": {e}"));
            mu.push(anyhow::anyhow!("{err}"));
            copy_cancel.cancel();
            mu.merge(copies.wait().await);
            inv.outputs.push(stdout.sink);
            inv.outputs.push(stderr.sink);
            return 1;
        }
    };
    pw_debug!(proc, pid = child.id().unwrap_or(0), command = bin, "child started");

    if let InputBinding::Remote(stream) = stdin {
        if let Some(child_stdin) = child.stdin.take() {
            copies.spawn(pump_stdin(stream, child_stdin, copy_cancel.clone()));
        }
    }

    // Source pumps start only after the child exists: the write-end open
    // blocks until a reader arrives, and the child is that reader.
    for pipe in inv.source_pipes.drain(..) {
        copies.spawn(pump_source(pipe, copy_cancel.clone()));
    }

    if stdout.piped {
        match child.stdout.take() {
            Some(out) => copies.spawn(pump_output(
                out,
                stdout.sink,
                "stdout",
                copy_cancel.clone(),
                Arc::clone(&inv.pumped_outputs),
            )),
            None => inv.outputs.push(stdout.sink),
        }
    } else {
        inv.outputs.push(stdout.sink);
    }
    if stderr.piped {
        match child.stderr.take() {
            Some(err) => copies.spawn(pump_output(
                err,
                stderr.sink,
                "stderr",
                copy_cancel.clone(),
                Arc::clone(&inv.pumped_outputs),
            )),
            None => inv.outputs.push(stderr.sink),
        }
    } else {
        inv.outputs.push(stderr.sink);
    }

    // Join the copy fan-out. On failure, nudge the child before waiting so
    // it cannot block forever on a pipe nobody serves any more.
    let copy_errors = copies.wait().await;
    let copy_failed = !copy_errors.is_empty();
    mu.merge(copy_errors);
    if copy_failed {
        mu.catch(terminate(&child));
    }

    let status = tokio::select! {
        status = child.wait() => status,
        _ = cancel.cancelled() => {
            let _ = child.start_kill();
            child.wait().await
        }
    };
    match status {
        Ok(status) => {
            let code = exit_code(status);
            if code != 0 {
                mu.push(child_failure(status));
            }
            code
        }
        Err(e) => {
            mu.push(anyhow::Error::from(e).context("wait for child"));
            1
        }
    }
}

/// Ask the child to stop. SIGTERM rather than SIGKILL: the child may still
/// be blocked writing a pipe and deserves a chance to clean up.
fn terminate(child: &Child) -> std::io::Result<()> {
    let Some(pid) = child.id() else {
        return Ok(());
    };
    pw_warn!(proc, pid, "copy failure, sending SIGTERM to child");
    kill(Pid::from_raw(pid as i32), Signal::SIGTERM).map_err(std::io::Error::from)
}

fn exit_code(status: std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    match status.code() {
        Some(code) => code,
        None => 128 + status.signal().unwrap_or(0),
    }
}

fn child_failure(status: std::process::ExitStatus) -> anyhow::Error {
    use std::os::unix::process::ExitStatusExt;
    match status.signal() {
        Some(sig) => anyhow::anyhow!("command terminated by signal {sig}"),
        None => anyhow::anyhow!("command exited with code {}", status.code().unwrap_or(1)),
    }
}

// ---------------------------------------------------------------------------
// teardown — reverse order of acquisition, destroy only after close
// ---------------------------------------------------------------------------

async fn teardown(mut inv: Inventory, preserve: bool, mu: &mut MultiError) {
    // Child outputs: close first, then decide about destruction.
    let mut outputs = std::mem::take(&mut inv.outputs);
    outputs.extend(drain_vault(&inv.pumped_outputs));
    for sink in &mut outputs {
        mu.catch(
            sink.commit()
                .await
                .map_err(|e| teardown_error(format!("close output: {e:#}"))),
        );
    }
    if !mu.is_empty() && !preserve {
        for sink in &mut outputs {
            mu.catch(
                sink.destroy()
                    .await
                    .map_err(|e| teardown_error(format!("destroy output: {e:#}"))),
            );
        }
    }

    // Target pipes: close every sink, unlink the inodes, then decide.
    let mut targets: Vec<SinkBox> = inv.target_pipes.drain(..).map(|p| p.sink).collect();
    targets.extend(drain_vault(&inv.pumped_targets));
    for sink in &mut targets {
        mu.catch(
            sink.commit()
                .await
                .map_err(|e| teardown_error(format!("close target: {e:#}"))),
        );
    }
    for path in &inv.target_paths {
        mu.catch(remove_pipe(path).await);
    }
    if !mu.is_empty() && !preserve {
        for sink in &mut targets {
            mu.catch(
                sink.destroy()
                    .await
                    .map_err(|e| teardown_error(format!("destroy target: {e:#}"))),
            );
        }
    }

    // Source pipes: streams close on drop; unlink the inodes.
    inv.source_pipes.clear();
    for path in &inv.source_paths {
        mu.catch(remove_pipe(path).await);
    }
}

fn teardown_error(detail: String) -> anyhow::Error {
    anyhow::anyhow!(
        "{}",
        StructError::from(RuntimeReason::Teardown).with_detail(detail)
    )
}

async fn remove_pipe(path: &Path) -> anyhow::Result<()> {
    tokio::fs::remove_file(path)
        .await
        .map_err(|e| teardown_error(format!("remove pipe {}: {e}", path.display())))
}
