use std::pin::Pin;
use std::task::{Context, Poll};

use anyhow::{anyhow, bail};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::Client;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart, ObjectCannedAcl};
use bytes::{Bytes, BytesMut};
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tokio_util::sync::PollSender;
use url::Url;

use super::{DestroyableSink, Provider, SinkBox, SourceProvider, SourceStream, TargetProvider};

const SCHEME: &str = "s3";
const SCHEME_INSECURE: &str = "s3+insecure";

/// Upload part size. S3 rejects non-final parts under 5 MiB; 8 MiB keeps
/// well clear of that floor.
const PART_SIZE: usize = 8 * 1024 * 1024;

/// In-flight parts queued to the upload task before writes block.
const UPLOAD_QUEUE: usize = 2;

// ---------------------------------------------------------------------------
// S3Provider — s3 / s3+insecure object store access
// ---------------------------------------------------------------------------

/// Object-store provider for `s3://bucket/key` URLs.
///
/// `s3+insecure` downgrades the transport to plaintext, which only takes
/// effect against an explicitly configured endpoint host. Region and
/// credentials come from the usual AWS environment.
pub struct S3Provider {
    /// Endpoint host (`host[:port]`, no scheme), typically from
    /// `AWS_ENDPOINT`. `None` means the SDK's own resolution.
    endpoint: Option<String>,
    sdk: OnceCell<aws_config::SdkConfig>,
}

impl S3Provider {
    pub fn new(endpoint: Option<String>) -> Self {
        Self {
            endpoint,
            sdk: OnceCell::new(),
        }
    }

    fn endpoint_url(&self, scheme: &str) -> Option<String> {
        self.endpoint.as_ref().map(|host| {
            let transport = if scheme == SCHEME_INSECURE { "http" } else { "https" };
            format!("{transport}://{host}")
        })
    }

    async fn client(&self, url: &Url) -> Client {
        let sdk = self
            .sdk
            .get_or_init(|| aws_config::load_defaults(BehaviorVersion::latest()))
            .await;
        let mut builder = aws_sdk_s3::config::Builder::from(sdk);
        if let Some(endpoint) = self.endpoint_url(url.scheme()) {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }
        Client::from_conf(builder.build())
    }

    /// Split an object URL into bucket (host) and key (path).
    fn bucket_key(url: &Url) -> anyhow::Result<(String, String)> {
        let bucket = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| anyhow!("object url {url} has no bucket"))?;
        let key = url.path().trim_start_matches('/');
        if key.is_empty() {
            bail!("object url {url} has no key");
        }
        Ok((bucket.to_string(), key.to_string()))
    }
}

impl Provider for S3Provider {
    fn schemes(&self) -> &[&'static str] {
        &[SCHEME, SCHEME_INSECURE]
    }

    fn as_source(&self) -> Option<&dyn SourceProvider> {
        Some(self)
    }

    fn as_target(&self) -> Option<&dyn TargetProvider> {
        Some(self)
    }
}

#[async_trait]
impl SourceProvider for S3Provider {
    async fn read(&self, url: &Url) -> anyhow::Result<SourceStream> {
        let (bucket, key) = Self::bucket_key(url)?;
        let client = self.client(url).await;
        let object = client.get_object().bucket(bucket).key(key).send().await?;
        Ok(Box::pin(object.body.into_async_read()))
    }
}

#[async_trait]
impl TargetProvider for S3Provider {
    async fn write(&self, url: &Url) -> anyhow::Result<SinkBox> {
        let (bucket, key) = Self::bucket_key(url)?;
        let meta = UploadMeta::from_url(url);
        let client = self.client(url).await;

        let (tx, rx) = mpsc::channel(UPLOAD_QUEUE);
        let upload = tokio::spawn(run_upload(
            client.clone(),
            bucket.clone(),
            key.clone(),
            meta,
            rx,
        ));

        Ok(Box::new(S3Sink {
            tx: Some(PollSender::new(tx)),
            upload: Some(upload),
            buf: BytesMut::with_capacity(PART_SIZE),
            client,
            bucket,
            key,
        }))
    }
}

// ---------------------------------------------------------------------------
// UploadMeta — write-side metadata from URL query parameters
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Clone)]
struct UploadMeta {
    acl: Option<ObjectCannedAcl>,
    content_type: Option<String>,
}

impl UploadMeta {
    fn from_url(url: &Url) -> Self {
        let mut meta = Self::default();
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "acl" => meta.acl = Some(ObjectCannedAcl::from(value.as_ref())),
                "type" => meta.content_type = Some(value.into_owned()),
                _ => {}
            }
        }
        meta
    }
}

// ---------------------------------------------------------------------------
// S3Sink — destroyable writer feeding the background upload task
// ---------------------------------------------------------------------------

enum UploadMsg {
    Part(Bytes),
    /// Sent by commit. A channel that closes without this marker means the
    /// sink was dropped and the upload must leave nothing behind.
    Finish,
}

struct S3Sink {
    tx: Option<PollSender<UploadMsg>>,
    upload: Option<JoinHandle<anyhow::Result<()>>>,
    buf: BytesMut,
    client: Client,
    bucket: String,
    key: String,
}

fn upload_gone() -> std::io::Error {
    std::io::Error::other("object upload task is no longer running")
}

impl AsyncWrite for S3Sink {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        let this = self.get_mut();
        if this.buf.len() >= PART_SIZE {
            let Some(tx) = this.tx.as_mut() else {
                return Poll::Ready(Err(std::io::Error::other("write after commit")));
            };
            match tx.poll_reserve(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Err(_)) => return Poll::Ready(Err(upload_gone())),
                Poll::Ready(Ok(())) => {
                    let part = this.buf.split().freeze();
                    if tx.send_item(UploadMsg::Part(part)).is_err() {
                        return Poll::Ready(Err(upload_gone()));
                    }
                }
            }
        }
        this.buf.extend_from_slice(data);
        Poll::Ready(Ok(data.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        // Durability is only promised at commit time.
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

async fn send_msg(tx: &mut PollSender<UploadMsg>, msg: UploadMsg) -> anyhow::Result<()> {
    std::future::poll_fn(|cx| tx.poll_reserve(cx))
        .await
        .map_err(|_| anyhow!("object upload task stopped early"))?;
    tx.send_item(msg)
        .map_err(|_| anyhow!("object upload task stopped early"))?;
    Ok(())
}

#[async_trait]
impl DestroyableSink for S3Sink {
    async fn commit(&mut self) -> anyhow::Result<()> {
        let Some(mut tx) = self.tx.take() else {
            return Ok(());
        };

        let mut send_err = None;
        if !self.buf.is_empty() {
            let part = self.buf.split().freeze();
            send_err = send_msg(&mut tx, UploadMsg::Part(part)).await.err();
        }
        if send_err.is_none() {
            send_err = send_msg(&mut tx, UploadMsg::Finish).await.err();
        }
        drop(tx);

        // Join the upload task even when a send failed; its own error is the
        // one worth reporting.
        if let Some(upload) = self.upload.take() {
            match upload.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(e),
                Err(e) => return Err(anyhow!("object upload task join error: {e}")),
            }
        }
        match send_err {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }

    async fn destroy(&mut self) -> anyhow::Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(&self.key)
            .send()
            .await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Background upload task
// ---------------------------------------------------------------------------

async fn run_upload(
    client: Client,
    bucket: String,
    key: String,
    meta: UploadMeta,
    mut rx: mpsc::Receiver<UploadMsg>,
) -> anyhow::Result<()> {
    let mut mp: Option<Multipart> = None;
    let result = drive_upload(&client, &bucket, &key, &meta, &mut mp, &mut rx).await;
    if result.is_err() {
        if let Some(mp) = mp.take() {
            if let Err(e) = mp.abort().await {
                tracing::warn!(bucket = %bucket, key = %key, error = %e, "failed to abort multipart upload");
            }
        }
    }
    result
}

async fn drive_upload(
    client: &Client,
    bucket: &str,
    key: &str,
    meta: &UploadMeta,
    mp: &mut Option<Multipart>,
    rx: &mut mpsc::Receiver<UploadMsg>,
) -> anyhow::Result<()> {
    // One chunk is always held back: the final part may be under the
    // multipart minimum, so the strategy is only decided once the stream
    // ends. A single held chunk at finish goes up as one PutObject.
    let mut held: Option<Bytes> = None;
    let mut finished = false;

    while let Some(msg) = rx.recv().await {
        match msg {
            UploadMsg::Part(chunk) => {
                if let Some(prev) = held.replace(chunk) {
                    let started = match mp.as_mut() {
                        Some(started) => started,
                        None => mp.insert(Multipart::begin(client, bucket, key, meta).await?),
                    };
                    started.upload_part(prev).await?;
                }
            }
            UploadMsg::Finish => {
                finished = true;
                break;
            }
        }
    }

    if !finished {
        // Sink dropped without commit: abandon rather than finalise.
        if let Some(mp) = mp.take() {
            mp.abort().await?;
        }
        return Ok(());
    }

    match (mp.as_mut(), held) {
        (None, last) => {
            let mut req = client
                .put_object()
                .bucket(bucket)
                .key(key)
                .body(ByteStream::from(last.unwrap_or_default()));
            if let Some(acl) = &meta.acl {
                req = req.acl(acl.clone());
            }
            if let Some(content_type) = &meta.content_type {
                req = req.content_type(content_type);
            }
            req.send().await?;
        }
        (Some(started), Some(last)) => {
            started.upload_part(last).await?;
            started.complete().await?;
        }
        (Some(started), None) => {
            started.complete().await?;
        }
    }
    *mp = None;
    Ok(())
}

struct Multipart {
    client: Client,
    bucket: String,
    key: String,
    upload_id: String,
    parts: Vec<CompletedPart>,
}

impl Multipart {
    async fn begin(
        client: &Client,
        bucket: &str,
        key: &str,
        meta: &UploadMeta,
    ) -> anyhow::Result<Self> {
        let mut req = client.create_multipart_upload().bucket(bucket).key(key);
        if let Some(acl) = &meta.acl {
            req = req.acl(acl.clone());
        }
        if let Some(content_type) = &meta.content_type {
            req = req.content_type(content_type);
        }
        let created = req.send().await?;
        let upload_id = created
            .upload_id()
            .ok_or_else(|| anyhow!("create multipart upload returned no upload id"))?
            .to_string();
        Ok(Self {
            client: client.clone(),
            bucket: bucket.to_string(),
            key: key.to_string(),
            upload_id,
            parts: Vec::new(),
        })
    }

    async fn upload_part(&mut self, data: Bytes) -> anyhow::Result<()> {
        let part_number = self.parts.len() as i32 + 1;
        let uploaded = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(&self.upload_id)
            .part_number(part_number)
            .body(ByteStream::from(data))
            .send()
            .await?;
        self.parts.push(
            CompletedPart::builder()
                .set_e_tag(uploaded.e_tag().map(str::to_string))
                .part_number(part_number)
                .build(),
        );
        Ok(())
    }

    async fn complete(&mut self) -> anyhow::Result<()> {
        let parts = std::mem::take(&mut self.parts);
        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(&self.upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .send()
            .await?;
        Ok(())
    }

    async fn abort(&self) -> anyhow::Result<()> {
        self.client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(&self.upload_id)
            .send()
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_and_key_come_from_host_and_path() {
        let url = Url::parse("s3://my-bucket/deep/ly/nested.key").unwrap();
        let (bucket, key) = S3Provider::bucket_key(&url).unwrap();
        assert_eq!(bucket, "my-bucket");
        assert_eq!(key, "deep/ly/nested.key");
    }

    #[test]
    fn url_without_key_is_rejected() {
        let url = Url::parse("s3://my-bucket").unwrap();
        assert!(S3Provider::bucket_key(&url).is_err());
    }

    #[test]
    fn insecure_scheme_downgrades_endpoint_transport() {
        let provider = S3Provider::new(Some("minio.local:9000".to_string()));
        assert_eq!(
            provider.endpoint_url(SCHEME).as_deref(),
            Some("https://minio.local:9000")
        );
        assert_eq!(
            provider.endpoint_url(SCHEME_INSECURE).as_deref(),
            Some("http://minio.local:9000")
        );
        assert_eq!(S3Provider::new(None).endpoint_url(SCHEME), None);
    }

    #[test]
    fn query_parameters_set_upload_metadata() {
        let url = Url::parse("s3://b/k?acl=public-read&type=text/plain&other=x").unwrap();
        let meta = UploadMeta::from_url(&url);
        assert_eq!(meta.acl, Some(ObjectCannedAcl::PublicRead));
        assert_eq!(meta.content_type.as_deref(), Some("text/plain"));
    }

    #[test]
    fn claims_both_object_schemes() {
        let provider = S3Provider::new(None);
        assert_eq!(provider.schemes(), [SCHEME, SCHEME_INSECURE]);
    }
}
