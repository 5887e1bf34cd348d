mod file;
mod http;
mod s3;

use std::pin::Pin;

use async_trait::async_trait;
use orion_error::StructError;
use tokio::io::{AsyncRead, AsyncWrite};
use url::Url;

use crate::error::{CoreReason, CoreResult};

pub use file::FileProvider;
pub use http::HttpProvider;
pub use s3::S3Provider;

/// Byte stream feeding a source pipe. Opened eagerly, closed on drop.
pub type SourceStream = Pin<Box<dyn AsyncRead + Send>>;

/// Boxed destroyable sink, as returned by target providers.
pub type SinkBox = Box<dyn DestroyableSink>;

// ---------------------------------------------------------------------------
// DestroyableSink — a write sink whose artefact can be rolled back
// ---------------------------------------------------------------------------

/// A write sink with three lifecycle operations: write, commit, destroy.
///
/// Lifecycle: any number of writes, then [`commit`](Self::commit), then
/// optionally [`destroy`](Self::destroy). Destroy must only be called after
/// commit, and never on a run that succeeded. Dropping a sink without
/// committing abandons the artefact without finalising it.
#[async_trait]
pub trait DestroyableSink: AsyncWrite + Send + Unpin {
    /// Flush buffered bytes and finalise the artefact. Deferred failures,
    /// such as a background upload going wrong, surface here.
    async fn commit(&mut self) -> anyhow::Result<()>;

    /// Remove the artefact produced so far.
    async fn destroy(&mut self) -> anyhow::Result<()>;
}

// ---------------------------------------------------------------------------
// Provider — a capability object claiming one or more URL schemes
// ---------------------------------------------------------------------------

/// A capability object claiming one or more URL schemes.
///
/// A provider that can open URLs for reading returns itself from
/// [`as_source`](Self::as_source); one that can open URLs for writing
/// returns itself from [`as_target`](Self::as_target). A provider may be
/// both. Providers are shared across tasks and must not keep per-URL state;
/// that state lives in the returned stream or sink.
pub trait Provider: Send + Sync {
    /// The URL schemes this provider serves.
    fn schemes(&self) -> &[&'static str];

    fn as_source(&self) -> Option<&dyn SourceProvider> {
        None
    }

    fn as_target(&self) -> Option<&dyn TargetProvider> {
        None
    }
}

#[async_trait]
pub trait SourceProvider: Provider {
    /// Open `url` for reading.
    async fn read(&self, url: &Url) -> anyhow::Result<SourceStream>;
}

#[async_trait]
pub trait TargetProvider: Provider {
    /// Open `url` for writing.
    async fn write(&self, url: &Url) -> anyhow::Result<SinkBox>;
}

// ---------------------------------------------------------------------------
// ProviderSet — ordered scheme dispatch
// ---------------------------------------------------------------------------

/// Ordered provider list. Dispatch walks the list and picks the first
/// provider that claims the URL's scheme and has the needed capability.
pub struct ProviderSet {
    providers: Vec<Box<dyn Provider>>,
}

impl ProviderSet {
    pub fn new(providers: Vec<Box<dyn Provider>>) -> Self {
        Self { providers }
    }

    /// Open `url` for reading through the first matching source provider.
    pub async fn open_source(&self, url: &Url) -> CoreResult<SourceStream> {
        for provider in &self.providers {
            if !provider.schemes().contains(&url.scheme()) {
                continue;
            }
            let Some(source) = provider.as_source() else {
                continue;
            };
            return source.read(url).await.map_err(|e| {
                StructError::from(CoreReason::Setup)
                    .with_detail(format!("open {url} for reading: {e:#}"))
            });
        }
        Err(StructError::from(CoreReason::Provider)
            .with_detail(format!("no such source provider for scheme \"{}\"", url.scheme())))
    }

    /// Open `url` for writing through the first matching target provider.
    pub async fn open_target(&self, url: &Url) -> CoreResult<SinkBox> {
        for provider in &self.providers {
            if !provider.schemes().contains(&url.scheme()) {
                continue;
            }
            let Some(target) = provider.as_target() else {
                continue;
            };
            return target.write(url).await.map_err(|e| {
                StructError::from(CoreReason::Setup)
                    .with_detail(format!("open {url} for writing: {e:#}"))
            });
        }
        Err(StructError::from(CoreReason::Provider)
            .with_detail(format!("no such target provider for scheme \"{}\"", url.scheme())))
    }
}

// ---------------------------------------------------------------------------
// NoopSink — wraps an inherited stream in the destroyable shape
// ---------------------------------------------------------------------------

/// Destroyable wrapper whose commit and destroy do nothing. Used for the
/// parent's own stdout/stderr, which the run must never finalise or remove.
pub struct NoopSink<W>(pub W);

impl<W: AsyncWrite + Send + Unpin> AsyncWrite for NoopSink<W> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &[u8],
    ) -> std::task::Poll<std::io::Result<usize>> {
        Pin::new(&mut self.0).poll_write(cx, buf)
    }

    fn poll_flush(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        Pin::new(&mut self.0).poll_flush(cx)
    }

    fn poll_shutdown(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        // Leave the inherited stream open; the parent still owns it.
        Pin::new(&mut self.0).poll_flush(cx)
    }
}

#[async_trait]
impl<W: AsyncWrite + Send + Unpin> DestroyableSink for NoopSink<W> {
    async fn commit(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn destroy(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SourceOnly;

    impl Provider for SourceOnly {
        fn schemes(&self) -> &[&'static str] {
            &["mem"]
        }

        fn as_source(&self) -> Option<&dyn SourceProvider> {
            Some(self)
        }
    }

    #[async_trait]
    impl SourceProvider for SourceOnly {
        async fn read(&self, _url: &Url) -> anyhow::Result<SourceStream> {
            Ok(Box::pin(std::io::Cursor::new(b"data".to_vec())))
        }
    }

    #[tokio::test]
    async fn dispatch_skips_wrong_scheme() {
        let set = ProviderSet::new(vec![Box::new(SourceOnly)]);
        let url = Url::parse("other://x/y").unwrap();
        let err = match set.open_source(&url).await {
            Ok(_) => panic!("expected no such source provider error"),
            Err(err) => err,
        };
        assert!(format!("{err:?}").contains("no such source provider"));
    }

    #[tokio::test]
    async fn dispatch_requires_capability() {
        let set = ProviderSet::new(vec![Box::new(SourceOnly)]);
        let url = Url::parse("mem://x/y").unwrap();
        assert!(set.open_source(&url).await.is_ok());
        let err = match set.open_target(&url).await {
            Ok(_) => panic!("expected no such target provider error"),
            Err(err) => err,
        };
        assert!(format!("{err:?}").contains("no such target provider"));
    }
}
