//! [`HttpStack`] over a `reqwest::Client`.
use crate::{
    Method,
    network::{HttpStack, RawResponse, TransportError},
    progress::ProgressReporter,
    request::RequestCore,
};
use async_trait::async_trait;
use rally_config::{
    HttpSettings,
    http::{HttpClientParams, build_http_client},
};
use std::{collections::HashMap, time::Duration};

#[derive(Debug, Clone)]
pub struct ReqwestStack {
    client: reqwest::Client,
}

impl ReqwestStack {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    pub fn from_settings(settings: &HttpSettings) -> Result<Self, reqwest::Error> {
        build_http_client(HttpClientParams::from_settings(settings)).map(Self::new)
    }
}

fn reqwest_method(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Delete => reqwest::Method::DELETE,
        Method::Head => reqwest::Method::HEAD,
        Method::Options => reqwest::Method::OPTIONS,
        Method::Trace => reqwest::Method::TRACE,
        Method::Patch => reqwest::Method::PATCH,
    }
}

fn transport_error(error: reqwest::Error) -> TransportError {
    if error.is_connect() && error.is_timeout() {
        TransportError::ConnectTimeout
    } else if error.is_timeout() {
        TransportError::Timeout
    } else if error.is_builder() {
        TransportError::BadUrl(error.to_string())
    } else {
        TransportError::Connection(error.to_string())
    }
}

/// Header map flattened to one value per name; repeated headers are joined
/// with ", ".
fn flatten_headers(headers: &reqwest::header::HeaderMap) -> HashMap<String, String> {
    let mut flat: HashMap<String, String> = HashMap::new();
    for (name, value) in headers {
        let Ok(value) = value.to_str() else {
            continue;
        };
        flat.entry(name.as_str().to_string())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }
    flat
}

#[async_trait]
impl HttpStack for ReqwestStack {
    async fn perform_once(
        &self,
        request: &RequestCore,
        extra_headers: &HashMap<String, String>,
        timeout: Duration,
    ) -> Result<RawResponse, TransportError> {
        let mut builder = self
            .client
            .request(reqwest_method(request.method()), request.url())
            .timeout(timeout);
        for (name, value) in request.headers().iter().chain(extra_headers) {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body() {
            if let Some(content_type) = request.body_content_type() {
                builder = builder.header(reqwest::header::CONTENT_TYPE, content_type);
            }
            builder = builder.body(body.to_vec());
        }

        let mut response = builder.send().await.map_err(transport_error)?;
        let status = response.status().as_u16();
        let headers = flatten_headers(response.headers());
        let body_error = |e: reqwest::Error| {
            if e.is_timeout() {
                TransportError::Timeout
            } else {
                TransportError::Body {
                    status: Some(status),
                    message: e.to_string(),
                }
            }
        };

        let mut progress = ProgressReporter::start(request, response.content_length());
        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(body_error)? {
            progress.advance(chunk.len());
            body.extend_from_slice(&chunk);
        }
        progress.finish();

        Ok(RawResponse {
            status,
            headers,
            body: Some(body),
        })
    }
}
