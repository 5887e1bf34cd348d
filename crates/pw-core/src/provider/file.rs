use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use url::Url;

use super::{DestroyableSink, Provider, SinkBox, SourceProvider, SourceStream, TargetProvider};

// ---------------------------------------------------------------------------
// FileProvider — file:// scheme, read and write
// ---------------------------------------------------------------------------

/// Local filesystem provider for `file://` URLs.
///
/// The local path is the URL host joined with the URL path, so
/// `file://./out.txt` resolves relative to the working directory and
/// `file:///var/data` is absolute.
pub struct FileProvider {
    /// Mode bits applied to newly created target files.
    create_mode: u32,
}

impl FileProvider {
    pub fn new(create_mode: u32) -> Self {
        Self { create_mode }
    }

    /// Map a `file://` URL to its local path.
    pub fn local_path(url: &Url) -> PathBuf {
        let host = url.host_str().unwrap_or("");
        if host.is_empty() {
            PathBuf::from(url.path())
        } else {
            Path::new(host).join(url.path().trim_start_matches('/'))
        }
    }
}

impl Default for FileProvider {
    fn default() -> Self {
        Self::new(0o666)
    }
}

impl Provider for FileProvider {
    fn schemes(&self) -> &[&'static str] {
        &["file"]
    }

    fn as_source(&self) -> Option<&dyn SourceProvider> {
        Some(self)
    }

    fn as_target(&self) -> Option<&dyn TargetProvider> {
        Some(self)
    }
}

#[async_trait]
impl SourceProvider for FileProvider {
    async fn read(&self, url: &Url) -> anyhow::Result<SourceStream> {
        let file = tokio::fs::File::open(Self::local_path(url)).await?;
        Ok(Box::pin(file))
    }
}

#[async_trait]
impl TargetProvider for FileProvider {
    async fn write(&self, url: &Url) -> anyhow::Result<SinkBox> {
        let path = Self::local_path(url);
        let file = tokio::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(self.create_mode)
            .open(&path)
            .await?;
        Ok(Box::new(FileSink { path, file }))
    }
}

// ---------------------------------------------------------------------------
// FileSink — destroyable file writer
// ---------------------------------------------------------------------------

struct FileSink {
    path: PathBuf,
    file: tokio::fs::File,
}

impl AsyncWrite for FileSink {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.file).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.file).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.file).poll_shutdown(cx)
    }
}

#[async_trait]
impl DestroyableSink for FileSink {
    async fn commit(&mut self) -> anyhow::Result<()> {
        self.file.flush().await?;
        Ok(())
    }

    async fn destroy(&mut self) -> anyhow::Result<()> {
        tokio::fs::remove_file(&self.path).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncReadExt;

    use super::*;

    #[test]
    fn local_path_joins_host_and_path() {
        let url = Url::parse("file://./a.txt").unwrap();
        assert_eq!(FileProvider::local_path(&url), PathBuf::from("./a.txt"));

        let url = Url::parse("file:///var/data/x").unwrap();
        assert_eq!(FileProvider::local_path(&url), PathBuf::from("/var/data/x"));
    }

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        let url = Url::parse(&format!("file://{}", path.display())).unwrap();

        let provider = FileProvider::default();
        let mut sink = provider.write(&url).await.unwrap();
        sink.write_all(b"hello\n").await.unwrap();
        sink.commit().await.unwrap();

        let mut stream = provider.read(&url).await.unwrap();
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"hello\n");
    }

    #[tokio::test]
    async fn destroy_unlinks_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doomed");
        let url = Url::parse(&format!("file://{}", path.display())).unwrap();

        let provider = FileProvider::default();
        let mut sink = provider.write(&url).await.unwrap();
        sink.write_all(b"partial").await.unwrap();
        sink.commit().await.unwrap();
        assert!(path.exists());

        sink.destroy().await.unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn read_of_missing_file_fails() {
        let url = Url::parse("file:///definitely/not/here").unwrap();
        assert!(FileProvider::default().read(&url).await.is_err());
    }
}
