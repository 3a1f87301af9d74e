//! REST implementation of the remote API.
//!
//! The adapter is assembled from three capabilities:
//! - [`HttpClient`] sends requests (reqwest, hyper, a test double, ...)
//! - [`UrlBuilder`] maps model types and ids to endpoints
//! - [`HeaderBuilder`] produces the headers of each request
//!
//! Bodies are JSON. Status codes map onto engine errors: 404 is
//! `NotFound`, 410 is `Gone`, 408/429/5xx are `Server` (retryable), other
//! 4xx are `Validation`, and client failures are `Network`.

use crate::error::{SyncError, SyncResult};
use crate::model::SyncModel;
use crate::transport::{RemoteApi, RequestOptions};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;

/// HTTP request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    /// GET
    Get,
    /// POST
    Post,
    /// PUT
    Put,
    /// PATCH
    Patch,
    /// DELETE
    Delete,
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        })
    }
}

/// An outgoing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    /// Method.
    pub method: HttpMethod,
    /// Absolute URL.
    pub url: String,
    /// Request headers.
    pub headers: BTreeMap<String, String>,
    /// JSON body, if any.
    pub body: Option<Vec<u8>>,
}

/// A received response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Response body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Creates a response.
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

/// HTTP client abstraction.
///
/// Implement this trait to provide the actual HTTP transport. Return `Err`
/// only when no response was received; HTTP error statuses are responses.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Sends a request and returns the response.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, String>;
}

/// Maps model types and ids to endpoint URLs.
pub trait UrlBuilder: Send + Sync {
    /// URL of the collection of a model type.
    fn collection_url(&self, model_type: &str) -> String;

    /// URL of one record.
    fn record_url(&self, model_type: &str, id: &str) -> String {
        format!("{}/{id}", self.collection_url(model_type))
    }
}

/// `{base_url}/{path}` endpoints, where the path defaults to the model type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestUrls {
    base_url: String,
    paths: BTreeMap<String, String>,
}

impl RestUrls {
    /// Creates endpoints under `base_url` (a trailing slash is ignored).
    pub fn new(base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            base_url,
            paths: BTreeMap::new(),
        }
    }

    /// Overrides the path segment of one model type.
    #[must_use]
    pub fn with_path(mut self, model_type: impl Into<String>, path: impl Into<String>) -> Self {
        self.paths.insert(model_type.into(), path.into());
        self
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl UrlBuilder for RestUrls {
    fn collection_url(&self, model_type: &str) -> String {
        let path = self
            .paths
            .get(model_type)
            .map_or(model_type, String::as_str);
        format!("{}/{}", self.base_url, path.trim_matches('/'))
    }
}

/// Produces the headers of each request.
pub trait HeaderBuilder: Send + Sync {
    /// Returns the headers for a request carrying `options`.
    fn headers(&self, options: &RequestOptions) -> BTreeMap<String, String>;
}

/// Fixed headers merged with each request's own (request headers win).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticHeaders {
    headers: BTreeMap<String, String>,
}

impl StaticHeaders {
    /// Creates JSON content headers.
    pub fn new() -> Self {
        let mut headers = BTreeMap::new();
        headers.insert("accept".to_string(), "application/json".to_string());
        headers.insert("content-type".to_string(), "application/json".to_string());
        Self { headers }
    }

    /// Adds a fixed header.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Adds a bearer token.
    #[must_use]
    pub fn with_bearer_token(self, token: &str) -> Self {
        self.with("authorization", format!("Bearer {token}"))
    }
}

impl Default for StaticHeaders {
    fn default() -> Self {
        Self::new()
    }
}

impl HeaderBuilder for StaticHeaders {
    fn headers(&self, options: &RequestOptions) -> BTreeMap<String, String> {
        let mut headers = self.headers.clone();
        headers.extend(options.headers.clone());
        headers
    }
}

/// REST remote API for one model type.
///
/// | Operation      | Request                         |
/// |----------------|---------------------------------|
/// | `find_one`     | `GET {collection}/{id}`         |
/// | `find_all`     | `GET {collection}`              |
/// | `create_one`   | `POST {collection}`             |
/// | `update_one`   | `PATCH {collection}/{id}`       |
/// | `replace_one`  | `PUT {collection}/{id}`         |
/// | `delete_one`   | `DELETE {collection}/{id}`      |
pub struct RestAdapter<M, C, U = RestUrls, H = StaticHeaders> {
    client: C,
    urls: U,
    headers: H,
    _model: PhantomData<fn() -> M>,
}

impl<M, C: HttpClient> RestAdapter<M, C> {
    /// Creates an adapter with `{base_url}/{model_type}` endpoints and JSON
    /// headers.
    pub fn new(base_url: impl Into<String>, client: C) -> Self {
        Self::with_parts(client, RestUrls::new(base_url), StaticHeaders::new())
    }
}

impl<M, C, U, H> RestAdapter<M, C, U, H>
where
    C: HttpClient,
    U: UrlBuilder,
    H: HeaderBuilder,
{
    /// Creates an adapter from its capabilities.
    pub fn with_parts(client: C, urls: U, headers: H) -> Self {
        Self {
            client,
            urls,
            headers,
            _model: PhantomData,
        }
    }

    /// Returns the URL builder.
    pub fn urls(&self) -> &U {
        &self.urls
    }

    async fn call<B, R>(
        &self,
        method: HttpMethod,
        url: String,
        body: Option<&B>,
        options: &RequestOptions,
        model_type: &str,
        id: &str,
    ) -> SyncResult<Option<R>>
    where
        B: Serialize + Sync,
        R: DeserializeOwned,
    {
        let body = body.map(serde_json::to_vec).transpose()?;
        let request = HttpRequest {
            method,
            url,
            headers: self.headers.headers(options),
            body,
        };
        tracing::debug!(%method, url = %request.url, "sending request");

        let response = self
            .client
            .send(request)
            .await
            .map_err(SyncError::Network)?;
        check_status(&response, model_type, id)?;

        if response.body.is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_slice(&response.body)?))
    }

    async fn call_expecting<B, R>(
        &self,
        method: HttpMethod,
        url: String,
        body: Option<&B>,
        options: &RequestOptions,
        model_type: &str,
        id: &str,
    ) -> SyncResult<R>
    where
        B: Serialize + Sync,
        R: DeserializeOwned,
    {
        self.call(method, url, body, options, model_type, id)
            .await?
            .ok_or_else(|| SyncError::server(None, format!("empty response body for {method}")))
    }
}

/// Maps an HTTP status onto an engine error.
fn check_status(response: &HttpResponse, model_type: &str, id: &str) -> SyncResult<()> {
    let message = || String::from_utf8_lossy(&response.body).into_owned();
    match response.status {
        200..=299 => Ok(()),
        404 => Err(SyncError::not_found(model_type, id)),
        410 => Err(SyncError::gone(model_type, id)),
        408 | 429 => Err(SyncError::server(Some(response.status), message())),
        400..=499 => Err(SyncError::Validation(format!(
            "{} {}",
            response.status,
            message()
        ))),
        status => Err(SyncError::server(Some(status), message())),
    }
}

#[async_trait]
impl<M, C, U, H> RemoteApi<M> for RestAdapter<M, C, U, H>
where
    M: SyncModel,
    C: HttpClient,
    U: UrlBuilder,
    H: HeaderBuilder,
{
    async fn find_one(&self, id: &str, options: &RequestOptions) -> SyncResult<M> {
        let url = self.urls.record_url(M::MODEL_TYPE, id);
        self.call_expecting::<(), M>(HttpMethod::Get, url, None, options, M::MODEL_TYPE, id)
            .await
    }

    async fn find_all(&self, options: &RequestOptions) -> SyncResult<Vec<M>> {
        let url = self.urls.collection_url(M::MODEL_TYPE);
        let found: Option<Vec<M>> = self
            .call::<(), _>(HttpMethod::Get, url, None, options, M::MODEL_TYPE, "*")
            .await?;
        Ok(found.unwrap_or_default())
    }

    async fn create_one(&self, model: &M, options: &RequestOptions) -> SyncResult<M> {
        let url = self.urls.collection_url(M::MODEL_TYPE);
        self.call_expecting(
            HttpMethod::Post,
            url,
            Some(model),
            options,
            M::MODEL_TYPE,
            model.id(),
        )
        .await
    }

    async fn update_one(&self, model: &M, options: &RequestOptions) -> SyncResult<M> {
        let url = self.urls.record_url(M::MODEL_TYPE, model.id());
        let updated: Option<M> = self
            .call(
                HttpMethod::Patch,
                url,
                Some(model),
                options,
                M::MODEL_TYPE,
                model.id(),
            )
            .await?;
        Ok(updated.unwrap_or_else(|| model.clone()))
    }

    async fn replace_one(&self, model: &M, options: &RequestOptions) -> SyncResult<M> {
        let url = self.urls.record_url(M::MODEL_TYPE, model.id());
        let replaced: Option<M> = self
            .call(
                HttpMethod::Put,
                url,
                Some(model),
                options,
                M::MODEL_TYPE,
                model.id(),
            )
            .await?;
        Ok(replaced.unwrap_or_else(|| model.clone()))
    }

    async fn delete_one(&self, id: &str, options: &RequestOptions) -> SyncResult<()> {
        let url = self.urls.record_url(M::MODEL_TYPE, id);
        let _: Option<serde_json::Value> = self
            .call::<(), _>(HttpMethod::Delete, url, None, options, M::MODEL_TYPE, id)
            .await?;
        Ok(())
    }
}
