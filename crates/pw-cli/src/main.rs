use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;

use pw_core::binding::{TagBinding, UrlValue, tag_map};
use pw_core::provider::{FileProvider, HttpProvider, ProviderSet, S3Provider};
use pw_runtime::signal::wait_for_signal;
use pw_runtime::supervisor::run;
use pw_runtime::task::{Call, Task};
use pw_runtime::tracing_init::init_tracing;

#[derive(Parser)]
#[command(
    name = "pipewarp",
    version,
    about = "Native cloud streaming for legacy tooling"
)]
struct Cli {
    /// Declare an input source (repeatable)
    #[arg(short = 's', long = "source", value_name = "TAG=URL", value_parser = parse_binding)]
    sources: Vec<TagBinding>,

    /// Declare an output target (repeatable)
    #[arg(short = 't', long = "target", value_name = "TAG=URL", value_parser = parse_binding)]
    targets: Vec<TagBinding>,

    /// Keep created targets when the command fails
    #[arg(long)]
    preserve: bool,

    /// Host the named pipes in this directory instead of a fresh temp dir
    #[arg(long, value_name = "DIR")]
    pipes: Option<PathBuf>,

    /// Command shell the command line runs under; empty execs directly
    #[arg(long, value_name = "SH", default_value = "sh")]
    shell: String,

    /// Extra environment for the command (repeatable)
    #[arg(long = "env", value_name = "KEY=VALUE", value_parser = parse_env)]
    env: Vec<(String, String)>,

    /// Working directory for the command
    #[arg(long, value_name = "DIR")]
    chdir: Option<PathBuf>,

    /// Read command stdin from this URL instead of the parent's stdin
    #[arg(long, value_name = "URL", value_parser = parse_url)]
    stdin: Option<UrlValue>,

    /// Write command stdout to this URL instead of the parent's stdout
    #[arg(long, value_name = "URL", value_parser = parse_url)]
    stdout: Option<UrlValue>,

    /// Write command stderr to this URL instead of the parent's stderr
    #[arg(long, value_name = "URL", value_parser = parse_url)]
    stderr: Option<UrlValue>,

    /// Command to run; arguments may reference tags as %{tag}
    #[arg(
        required = true,
        value_name = "COMMAND",
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    command: Vec<String>,
}

fn parse_binding(s: &str) -> Result<TagBinding, String> {
    s.parse().map_err(|e| format!("{e}"))
}

fn parse_url(s: &str) -> Result<UrlValue, String> {
    s.parse().map_err(|e| format!("{e}"))
}

fn parse_env(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE format, got \"{s}\"")),
    }
}

fn env_nonempty(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

#[tokio::main]
async fn main() -> ExitCode {
    match run_main().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("pipewarp: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run_main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing("warn")?;

    // Caller-supplied pipe directories are left in place; an auto-created
    // scratch dir is removed with everything in it once the run is over.
    let (scratch, scratch_guard) = match cli.pipes {
        Some(dir) => (dir, None),
        None => {
            let dir = tempfile::Builder::new().prefix("pipewarp").tempdir()?;
            (dir.path().to_path_buf(), Some(dir))
        }
    };

    let providers = ProviderSet::new(vec![
        Box::new(FileProvider::default()),
        Box::new(HttpProvider::new()?),
        Box::new(S3Provider::new(env_nonempty("AWS_ENDPOINT"))),
    ]);

    let mut command = cli.command.into_iter();
    let executable = command
        .next()
        .ok_or_else(|| anyhow::anyhow!("no command given"))?;

    let task = Task {
        call: Call {
            executable,
            args: command.collect(),
            shell: Some(cli.shell).filter(|s| !s.is_empty()),
            env: cli.env,
            working_dir: cli.chdir,
        },
        preserve: cli.preserve,
        scratch,
        providers,
        sources: tag_map(&cli.sources),
        targets: tag_map(&cli.targets),
        stdin: cli.stdin.map(|u| u.0),
        stdout: cli.stdout.map(|u| u.0),
        stderr: cli.stderr.map(|u| u.0),
    };

    let cancel = CancellationToken::new();
    tokio::spawn(wait_for_signal(cancel.clone()));

    let outcome = run(task, cancel).await;

    for err in outcome.errors.errors() {
        eprintln!("  * {err:#}");
    }

    drop(scratch_guard);

    Ok(as_exit_code(outcome.process_code()))
}

fn as_exit_code(code: i32) -> ExitCode {
    ExitCode::from(code.clamp(0, 255) as u8)
}
