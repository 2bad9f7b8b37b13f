//! Reqwest-backed implementation of the [`SessionTransport`] trait.
//!
//! A thin adapter: default headers and proxy are fixed at construction,
//! cookies are passed explicitly per request, and the response is flattened
//! into the shared [`TransportResponse`] representation. The reqwest cookie
//! store stays disabled so session state never travels through an implicit
//! side channel.

use async_trait::async_trait;
use reqwest::{Client, Proxy};

use super::{
    ProxyEndpoint, RequestBody, SessionDelta, SessionTransport, TransportError, TransportRequest,
    TransportResponse, default_browser_headers,
};

pub struct ReqwestSessionTransport {
    client: Client,
    proxy: Option<ProxyEndpoint>,
}

impl ReqwestSessionTransport {
    /// Build a transport with the default browser header set and an optional
    /// proxy endpoint (`http://`, `https://`, or `socks5://` URL).
    pub fn new(proxy: Option<&str>) -> Result<Self, TransportError> {
        let endpoint = proxy.map(ProxyEndpoint::parse).transpose()?;

        let mut builder = Client::builder().default_headers(default_browser_headers());
        if let Some(ref endpoint) = endpoint {
            let proxy = Proxy::all(&endpoint.url)
                .map_err(|_| TransportError::InvalidProxy(endpoint.url.clone()))?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|err| TransportError::Build(err.to_string()))?;

        Ok(Self {
            client,
            proxy: endpoint,
        })
    }
}

#[async_trait]
impl SessionTransport for ReqwestSessionTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        let mut builder = self
            .client
            .request(request.method, request.url)
            .headers(request.headers);

        if !request.params.is_empty() {
            builder = builder.query(&request.params);
        }

        if !request.cookies.is_empty() {
            let line = request
                .cookies
                .iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect::<Vec<_>>()
                .join("; ");
            builder = builder.header(http::header::COOKIE, line);
        }

        match request.body {
            Some(RequestBody::Json(ref payload)) => builder = builder.json(payload),
            Some(RequestBody::Form(ref fields)) => builder = builder.form(fields),
            None => {}
        }

        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder.send().await.map_err(map_send_error)?;

        let status = response.status().as_u16();
        let url = response.url().clone();
        let headers = response.headers().clone();
        let session = SessionDelta::from_response_headers(&headers);
        let text = response
            .text()
            .await
            .map_err(|err| TransportError::Request(err.to_string()))?;
        let json = serde_json::from_str(&text).ok();

        Ok(TransportResponse {
            status,
            url,
            headers,
            text,
            json,
            session,
        })
    }

    fn proxy(&self) -> Option<&ProxyEndpoint> {
        self.proxy.as_ref()
    }
}

fn map_send_error(err: reqwest::Error) -> TransportError {
    if err.is_connect() {
        TransportError::Blocked(err.to_string())
    } else {
        TransportError::Request(err.to_string())
    }
}
