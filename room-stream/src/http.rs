use std::future::Future;
use std::time::Duration;

use reqwest::{Client, Proxy, header};

use crate::error::{StreamError, StreamResult};

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/**
    Status and body of an HTTP exchange.

    Non-2xx statuses are ordinary responses here; the caller decides what
    they mean.
*/
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == 200
    }
}

/**
    The HTTP capability the engine needs from its host.

    Implementations must only fail for transport problems (connection,
    timeout, unreadable body), never for a non-2xx status.
*/
pub trait HttpClient: Send + Sync + 'static {
    fn get(&self, url: &str) -> impl Future<Output = StreamResult<HttpResponse>> + Send;

    fn post_form(
        &self,
        url: &str,
        form: &[(String, String)],
    ) -> impl Future<Output = StreamResult<HttpResponse>> + Send;
}

/**
    Settings for the default reqwest-backed client.
*/
#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub user_agent: String,
    pub proxy: Option<String>,
    pub timeout: Option<Duration>,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            proxy: None,
            timeout: Some(Duration::from_secs(15)),
        }
    }
}

/**
    [`HttpClient`] backed by a shared `reqwest::Client`.
*/
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    client: Client,
}

impl ReqwestClient {
    pub fn new(settings: &HttpSettings) -> StreamResult<Self> {
        let mut builder = Client::builder().user_agent(settings.user_agent.as_str());

        if let Some(proxy_url) = &settings.proxy {
            let proxy = Proxy::all(proxy_url).map_err(|e| {
                StreamError::Transport(format!("invalid proxy URL '{}': {}", proxy_url, e))
            })?;
            builder = builder.proxy(proxy);
        }

        if let Some(timeout) = settings.timeout {
            builder = builder.timeout(timeout);
        }

        let client = builder
            .build()
            .map_err(|e| StreamError::Transport(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    async fn read(response: reqwest::Response) -> StreamResult<HttpResponse> {
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(HttpResponse { status, body })
    }
}

impl HttpClient for ReqwestClient {
    fn get(&self, url: &str) -> impl Future<Output = StreamResult<HttpResponse>> + Send {
        let request = self.client.get(url);
        async move { Self::read(request.send().await?).await }
    }

    fn post_form(
        &self,
        url: &str,
        form: &[(String, String)],
    ) -> impl Future<Output = StreamResult<HttpResponse>> + Send {
        let request = self
            .client
            .post(url)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(encode_form(form));
        async move { Self::read(request.send().await?).await }
    }
}

/// Encode pairs as an `application/x-www-form-urlencoded` body.
pub fn encode_form(form: &[(String, String)]) -> String {
    url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(form.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .finish()
}
