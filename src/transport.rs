//! One HTTP/2 connection per request.
//!
//! Nothing is pooled, retried or timed out here: a request opens a
//! connection, sends one stream, reads the response to its end and closes
//! the connection again, whatever the outcome.

use std::collections::BTreeMap;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::HeaderMap;
use tracing::{info, warn};

use crate::{
    error::ApnsError,
    request::RequestDescriptor,
    response::{HeaderValues, ServerResponse},
};

/// Opens connections to an APNs base URL.
#[async_trait]
pub trait Connector: Send + Sync {
    type Connection: Connection;

    async fn connect(&self, endpoint: &str) -> Result<Self::Connection, ApnsError>;
}

/// A single-use connection.
#[async_trait]
pub trait Connection: Send {
    /// Send `request` on a new stream and feed the response into `sink`
    /// until the stream ends.
    async fn exchange(
        &mut self,
        request: &RequestDescriptor,
        sink: &mut ResponseCollector,
    ) -> Result<(), ApnsError>;

    async fn close(&mut self);
}

/// Accumulates response events: headers once, then body chunks.
#[derive(Debug, Default)]
pub struct ResponseCollector {
    status: Option<u16>,
    headers: BTreeMap<String, HeaderValues>,
    body: Vec<u8>,
}

impl ResponseCollector {
    pub fn on_response(&mut self, status: u16, headers: &HeaderMap) {
        self.status = Some(status);
        for (name, value) in headers {
            let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
            match self.headers.get_mut(name.as_str()) {
                Some(existing) => existing.push(value),
                None => {
                    self.headers
                        .insert(name.as_str().to_string(), HeaderValues::Single(value));
                }
            }
        }
    }

    pub fn on_data(&mut self, chunk: &[u8]) {
        self.body.extend_from_slice(chunk);
    }

    /// A stream that ended without ever reporting a status is a transport
    /// failure, not a success.
    pub fn finish(self) -> Result<ServerResponse, ApnsError> {
        let status = self
            .status
            .ok_or_else(|| ApnsError::transport("stream ended without a response status"))?;
        Ok(ServerResponse {
            status,
            data: String::from_utf8_lossy(&self.body).into_owned(),
            headers: self.headers,
        })
    }
}

/// Run `request` against `endpoint` on a fresh connection.
///
/// The connection is closed exactly once, on success and on failure.
pub async fn dispatch<C: Connector>(
    connector: &C,
    request: &RequestDescriptor,
    endpoint: &str,
) -> Result<ServerResponse, ApnsError> {
    let mut connection = connector.connect(endpoint).await.inspect_err(|err| {
        warn!(endpoint, path = %request.path, "APNs connect failed: {err}");
    })?;

    let mut collector = ResponseCollector::default();
    let outcome = connection.exchange(request, &mut collector).await;
    connection.close().await;

    if let Err(err) = outcome {
        warn!(method = %request.method, path = %request.path, "APNs request failed: {err}");
        return Err(err);
    }

    let response = collector.finish()?;
    info!(
        method = %request.method,
        path = %request.path,
        status = response.status,
        "APNs response"
    );
    Ok(response)
}

/// HTTP/2 over TLS (or cleartext prior knowledge for `http://` URLs).
#[derive(Debug, Clone, Copy, Default)]
pub struct Http2Connector;

pub struct Http2Connection {
    endpoint: String,
    client: Option<reqwest::Client>,
}

#[async_trait]
impl Connector for Http2Connector {
    type Connection = Http2Connection;

    async fn connect(&self, endpoint: &str) -> Result<Http2Connection, ApnsError> {
        // APNs only speaks HTTP/2; without prior knowledge reqwest may settle
        // on HTTP/1.1.
        let client = reqwest::Client::builder()
            .http2_prior_knowledge()
            .pool_max_idle_per_host(0)
            .build()?;

        Ok(Http2Connection {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            client: Some(client),
        })
    }
}

#[async_trait]
impl Connection for Http2Connection {
    async fn exchange(
        &mut self,
        request: &RequestDescriptor,
        sink: &mut ResponseCollector,
    ) -> Result<(), ApnsError> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| ApnsError::transport("connection already closed"))?;

        let url = format!("{}{}", self.endpoint, request.path);
        let mut builder = client
            .request(request.method.clone(), url)
            .headers(request.headers.clone());
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await?;
        sink.on_response(response.status().as_u16(), response.headers());

        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            sink.on_data(&chunk?);
        }
        Ok(())
    }

    async fn close(&mut self) {
        self.client.take();
    }
}
