use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use tokio::sync::mpsc;

use llmgate_protocol::openai::request::ChatCompletionRequestBody;
use llmgate_transform::error::{GatewayError, TransportErrorKind};

#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub base_url: String,
    pub api_key: String,
    pub body: ChatCompletionRequestBody,
    pub stream: bool,
}

#[derive(Debug)]
pub enum UpstreamResponse {
    Json {
        status: u16,
        body: Bytes,
    },
    /// Successful streaming body; frames arrive until close or error.
    Stream {
        chunks: mpsc::Receiver<Result<Bytes, GatewayError>>,
    },
}

pub trait UpstreamClient: Send + Sync {
    fn send<'a>(
        &'a self,
        req: UpstreamRequest,
    ) -> Pin<Box<dyn Future<Output = Result<UpstreamResponse, GatewayError>> + Send + 'a>>;
}

#[derive(Debug, Clone)]
pub struct UpstreamClientConfig {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub stream_idle_timeout: Duration,
}

impl Default for UpstreamClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(86400),
            stream_idle_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpUpstreamClient {
    config: UpstreamClientConfig,
    client: reqwest::Client,
}

impl HttpUpstreamClient {
    pub fn new(config: UpstreamClientConfig) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .read_timeout(config.stream_idle_timeout)
            .build()
            .map_err(map_reqwest_error)?;
        Ok(Self { config, client })
    }
}

impl UpstreamClient for HttpUpstreamClient {
    fn send<'a>(
        &'a self,
        req: UpstreamRequest,
    ) -> Pin<Box<dyn Future<Output = Result<UpstreamResponse, GatewayError>> + Send + 'a>> {
        Box::pin(async move {
            let url = format!(
                "{}/v1/chat/completions",
                req.base_url.trim_end_matches('/')
            );
            let response = self
                .client
                .post(url)
                .bearer_auth(&req.api_key)
                .json(&req.body)
                .send()
                .await
                .map_err(map_reqwest_error)?;

            let status = response.status().as_u16();
            let is_success = (200..300).contains(&status);
            if !is_success || !req.stream {
                let body = response.bytes().await.map_err(map_reqwest_error)?;
                return Ok(UpstreamResponse::Json { status, body });
            }

            let (tx, rx) = mpsc::channel::<Result<Bytes, GatewayError>>(16);
            let idle = self.config.stream_idle_timeout;
            tokio::spawn(async move {
                let mut stream = response.bytes_stream();
                loop {
                    let next = tokio::time::timeout(idle, stream.next()).await;
                    let item = match next {
                        Ok(item) => item,
                        Err(_) => {
                            let _ = tx
                                .send(Err(GatewayError::UpstreamTransport {
                                    kind: TransportErrorKind::Timeout,
                                    message: format!(
                                        "no upstream data for {}s",
                                        idle.as_secs()
                                    ),
                                }))
                                .await;
                            break;
                        }
                    };
                    let Some(item) = item else {
                        break;
                    };
                    let result = item.map_err(map_reqwest_error);
                    let failed = result.is_err();
                    if tx.send(result).await.is_err() || failed {
                        break;
                    }
                }
            });

            Ok(UpstreamResponse::Stream { chunks: rx })
        })
    }
}

fn map_reqwest_error(err: reqwest::Error) -> GatewayError {
    let message = err.to_string();
    let kind = if err.is_timeout() {
        TransportErrorKind::Timeout
    } else if err.is_connect() {
        TransportErrorKind::Connect
    } else if message.contains("reset") {
        TransportErrorKind::Reset
    } else {
        TransportErrorKind::Other
    };
    GatewayError::UpstreamTransport { kind, message }
}
