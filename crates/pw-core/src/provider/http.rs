use async_trait::async_trait;
use futures_util::TryStreamExt;
use tokio_util::io::StreamReader;
use url::Url;

use super::{Provider, SourceProvider, SourceStream};

/// User agent presented on outbound requests.
const USER_AGENT: &str = concat!("pipewarp/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// HttpProvider — http/https, source only
// ---------------------------------------------------------------------------

/// Read-only provider for `http://` and `https://` URLs. The response body
/// is streamed as-is; a non-success status fails the open.
pub struct HttpProvider {
    client: reqwest::Client,
}

impl HttpProvider {
    pub fn new() -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self { client })
    }
}

impl Provider for HttpProvider {
    fn schemes(&self) -> &[&'static str] {
        &["http", "https"]
    }

    fn as_source(&self) -> Option<&dyn SourceProvider> {
        Some(self)
    }
}

#[async_trait]
impl SourceProvider for HttpProvider {
    async fn read(&self, url: &Url) -> anyhow::Result<SourceStream> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await?
            .error_for_status()?;
        let body = response.bytes_stream().map_err(std::io::Error::other);
        Ok(Box::pin(StreamReader::new(body)))
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;

    #[test]
    fn claims_both_http_schemes() {
        let provider = HttpProvider::new().unwrap();
        assert_eq!(provider.schemes(), ["http", "https"]);
        assert!(provider.as_source().is_some());
        assert!(provider.as_target().is_none());
    }

    /// One-shot HTTP server returning a canned response; yields the request
    /// head it saw.
    async fn serve_once(response: &'static str) -> (Url, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut request = vec![0u8; 4096];
            let n = sock.read(&mut request).await.unwrap();
            sock.write_all(response.as_bytes()).await.unwrap();
            String::from_utf8_lossy(&request[..n]).to_string()
        });
        let url = Url::parse(&format!("http://{addr}/data")).unwrap();
        (url, handle)
    }

    #[tokio::test]
    async fn streams_the_response_body() {
        let (url, server) =
            serve_once("HTTP/1.1 200 OK\r\ncontent-length: 5\r\n\r\nhello").await;

        let mut stream = HttpProvider::new().unwrap().read(&url).await.unwrap();
        let mut body = Vec::new();
        stream.read_to_end(&mut body).await.unwrap();
        assert_eq!(body, b"hello");

        let request = server.await.unwrap().to_lowercase();
        assert!(request.starts_with("get /data"));
        assert!(request.contains("user-agent: pipewarp/"));
    }

    #[tokio::test]
    async fn non_success_status_fails_the_open() {
        let (url, _server) =
            serve_once("HTTP/1.1 404 Not Found\r\ncontent-length: 0\r\n\r\n").await;
        assert!(HttpProvider::new().unwrap().read(&url).await.is_err());
    }
}
