use bytes::Bytes;
use reqwest::Client;
use url::Url;

use crate::{
    error::{NetError, NetResult},
    retry::retrying,
    types::{Headers, NetOptions},
};

/// Status, headers and body of a completed request.
///
/// The update protocol carries data in response headers (manifest filters,
/// server-defined headers), so callers get the full triple rather than
/// bare bytes.
#[derive(Clone, Debug)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: Bytes,
}

impl HttpResponse {
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.headers.get("content-type")
    }
}

#[derive(Clone, Debug)]
pub struct HttpClient {
    inner: Client,
    options: NetOptions,
}

impl HttpClient {
    pub fn new(options: NetOptions) -> Self {
        let inner = Client::builder()
            .build()
            .expect("failed to build reqwest client");
        Self { inner, options }
    }

    #[must_use]
    pub fn options(&self) -> &NetOptions {
        &self.options
    }

    fn apply_headers(
        mut req: reqwest::RequestBuilder,
        headers: Option<&Headers>,
    ) -> reqwest::RequestBuilder {
        if let Some(headers) = headers {
            for (k, v) in headers.iter() {
                req = req.header(k, v);
            }
        }
        req
    }

    async fn get_once(&self, url: Url, headers: Option<&Headers>) -> NetResult<HttpResponse> {
        let req = self.inner.get(url.clone());
        let req = Self::apply_headers(req, headers);
        let req = req.timeout(self.options.request_timeout);

        let resp = req.send().await.map_err(NetError::from)?;
        let status = resp.status();

        if !status.is_success() && status.as_u16() != 204 {
            let body = resp.text().await.unwrap_or_default();
            return Err(NetError::HttpStatus {
                url,
                status: status.as_u16(),
                body: Some(body),
            });
        }

        let mut out = Headers::new();
        for (name, value) in resp.headers().iter() {
            if let Ok(v) = value.to_str() {
                out.insert(name.as_str().to_ascii_lowercase(), v);
            }
        }

        let status = status.as_u16();
        let body = resp.bytes().await.map_err(NetError::from)?;
        Ok(HttpResponse {
            status,
            headers: out,
            body,
        })
    }

    /// GET with the configured retry policy; returns status + headers + body.
    pub async fn get(&self, url: Url, headers: Option<&Headers>) -> NetResult<HttpResponse> {
        let retry = self.options.retry.clone();
        retrying(&retry, || self.get_once(url.clone(), headers)).await
    }

    /// GET returning only the body, for asset downloads.
    pub async fn get_bytes(&self, url: Url, headers: Option<&Headers>) -> NetResult<Bytes> {
        Ok(self.get(url, headers).await?.body)
    }
}
