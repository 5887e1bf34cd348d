use std::path::{Path, PathBuf};

use nix::sys::stat::Mode;
use nix::unistd;
use orion_error::StructError;
use rand::Rng;
use url::Url;

use crate::error::{CoreReason, CoreResult};
use crate::provider::{ProviderSet, SinkBox, SourceStream};

/// Characters that survive URL sanitisation untouched; everything else
/// becomes `_`.
const SAFE_CHARS: &str = "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ01234567890_-. ";
const PREFIX_CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const PREFIX_LEN: usize = 6;

/// Derive the on-disk FIFO filename for `url`: a random six-character
/// prefix, a dot, then the URL string with unsafe characters replaced.
/// The random prefix keeps two bindings distinct even when their URLs
/// sanitise to the same string.
pub fn fifo_filename(url: &Url) -> String {
    let mut rng = rand::thread_rng();
    let mut name = String::with_capacity(PREFIX_LEN + 1 + url.as_str().len());
    for _ in 0..PREFIX_LEN {
        name.push(PREFIX_CHARS[rng.gen_range(0..PREFIX_CHARS.len())] as char);
    }
    name.push('.');
    for c in url.as_str().chars() {
        name.push(if SAFE_CHARS.contains(c) { c } else { '_' });
    }
    name
}

// ---------------------------------------------------------------------------
// Pipe records — one FIFO inode plus its remote stream
// ---------------------------------------------------------------------------

/// An input shim: remote bytes from `stream` are pumped into the FIFO at
/// `path`, where the child reads them like a regular file.
pub struct SourcePipe {
    pub path: PathBuf,
    pub url: Url,
    pub stream: SourceStream,
}

/// An output shim: bytes the child writes into the FIFO at `path` are
/// drained into `sink`.
pub struct TargetPipe {
    pub path: PathBuf,
    pub url: Url,
    pub sink: SinkBox,
}

// ---------------------------------------------------------------------------
// PipeManager — FIFO allocation in the scratch directory
// ---------------------------------------------------------------------------

/// Allocates FIFO inodes in the scratch directory and eagerly opens the
/// matching remote streams through the provider set.
pub struct PipeManager<'a> {
    scratch: &'a Path,
    providers: &'a ProviderSet,
}

impl<'a> PipeManager<'a> {
    pub fn new(scratch: &'a Path, providers: &'a ProviderSet) -> Self {
        Self { scratch, providers }
    }

    /// Allocate an input shim for `url`.
    pub async fn source(&self, url: &Url) -> CoreResult<SourcePipe> {
        let path = self.scratch.join(fifo_filename(url));
        let stream = self.providers.open_source(url).await?;
        // Stream is dropped, and with it closed, if the FIFO cannot be made.
        mkfifo(&path)?;
        Ok(SourcePipe {
            path,
            url: url.clone(),
            stream,
        })
    }

    /// Allocate an output shim for `url`.
    pub async fn target(&self, url: &Url) -> CoreResult<TargetPipe> {
        let path = self.scratch.join(fifo_filename(url));
        let sink = self.providers.open_target(url).await?;
        mkfifo(&path)?;
        Ok(TargetPipe {
            path,
            url: url.clone(),
            sink,
        })
    }
}

fn mkfifo(path: &Path) -> CoreResult<()> {
    unistd::mkfifo(path, Mode::from_bits_truncate(0o666)).map_err(|e| {
        StructError::from(CoreReason::Setup)
            .with_detail(format!("mkfifo {}: {e}", path.display()))
    })
}

#[cfg(test)]
mod tests {
    use std::os::unix::fs::FileTypeExt;

    use crate::provider::FileProvider;

    use super::*;

    #[test]
    fn filename_has_prefix_dot_sanitised_url() {
        let url = Url::parse("s3://bucket/some/key?acl=private").unwrap();
        let name = fifo_filename(&url);

        let (prefix, rest) = name.split_at(PREFIX_LEN);
        assert!(prefix.bytes().all(|b| PREFIX_CHARS.contains(&b)));
        assert_eq!(&rest[..1], ".");
        assert_eq!(&rest[1..], "s3___bucket_some_key_acl_private");
    }

    #[test]
    fn filename_is_posix_safe() {
        let url = Url::parse("http://h%C3%B8st:8080/a b/%7Bc%7D").unwrap();
        let name = fifo_filename(&url);
        assert!(!name.contains('/'));
        assert!(name.chars().all(|c| c.is_ascii()));
    }

    #[test]
    fn same_url_gets_distinct_names() {
        let url = Url::parse("file:///x").unwrap();
        assert_ne!(fifo_filename(&url), fifo_filename(&url));
    }

    #[tokio::test]
    async fn source_creates_fifo_and_opens_stream() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("in.txt");
        std::fs::write(&data, b"abc").unwrap();

        let providers = ProviderSet::new(vec![Box::new(FileProvider::default())]);
        let manager = PipeManager::new(dir.path(), &providers);
        let url = Url::parse(&format!("file://{}", data.display())).unwrap();

        let pipe = manager.source(&url).await.unwrap();
        let meta = std::fs::metadata(&pipe.path).unwrap();
        assert!(meta.file_type().is_fifo());
    }

    #[tokio::test]
    async fn unknown_scheme_creates_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let providers = ProviderSet::new(vec![Box::new(FileProvider::default())]);
        let manager = PipeManager::new(dir.path(), &providers);
        let url = Url::parse("gopher://old/times").unwrap();

        assert!(manager.source(&url).await.is_err());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
