use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use http::{Method, Request, StatusCode, header};
use http_body_util::{BodyExt, Full};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::Client as HttpClient;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tokio_util::io::StreamReader;
use tracing::trace;

use super::config::{self, Auth, Config};
use super::resource::Resource;
use super::version::Version;
use super::ObjectList;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(config::Error),
    #[error("build http request failed, {0}")]
    BuildRequest(http::Error),
    #[error("read http response failed, {0}")]
    ReadResponse(hyper::Error),
    #[error(transparent)]
    Http(hyper_util::client::legacy::Error),
    #[error("invalid config, {0}")]
    Validation(String),
    #[error("api server error, status: {}, reason: {}, message: {}", .0.status, .0.reason, .0.message)]
    Api(ErrorResponse),
    #[error("serialize request failed, {0}")]
    Serialize(serde_json::Error),
    #[error("deserialize response failed, {0}")]
    Deserialize(serde_json::Error),
    #[error("decode list response failed, {0}")]
    DecodeList(serde_json::Error),
    #[error("read watch event failed, {0}")]
    ReadEvents(std::io::Error),
    #[error("chunk line is too large")]
    LinesCodecMaxLineLengthExceeded,
    #[error("refresh token failed, {0}")]
    RefreshToken(std::io::Error),
}

impl Error {
    /// The HTTP status code returned by the API server, if this error came
    /// from one.
    pub fn code(&self) -> Option<u16> {
        match self {
            Error::Api(resp) => Some(resp.code),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.code() == Some(StatusCode::NOT_FOUND.as_u16())
    }

    /// The object was modified since it was read, and the write was rejected.
    pub fn is_conflict(&self) -> bool {
        self.code() == Some(StatusCode::CONFLICT.as_u16())
    }
}

impl From<hyper::Error> for Error {
    fn from(err: hyper::Error) -> Self {
        Error::ReadResponse(err)
    }
}

impl From<http::Error> for Error {
    fn from(err: http::Error) -> Self {
        Error::BuildRequest(err)
    }
}

/// An error response from the API.
#[derive(Debug, Deserialize)]
pub struct ErrorResponse {
    /// The status
    pub status: String,
    /// A message about the error
    #[serde(default)]
    pub message: String,
    /// The reason for the error
    #[serde(default)]
    pub reason: String,
    /// The error code
    pub code: u16,
}

impl ErrorResponse {
    /// Decode the `Status` object the API server sends along with a failed
    /// response, falling back to the bare status code when the body is not one
    /// (e.g. a proxy in front of the server answered).
    fn from_response(status: StatusCode, body: &[u8]) -> Self {
        match serde_json::from_slice::<ErrorResponse>(body) {
            Ok(resp) => resp,
            Err(_) => ErrorResponse {
                status: "Failure".to_string(),
                message: String::from_utf8_lossy(body).trim().to_string(),
                reason: status.canonical_reason().unwrap_or_default().to_string(),
                code: status.as_u16(),
            },
        }
    }
}

/// Controls how the resource version parameter is applied for list calls
///
/// Not specifying a `VersionMatch` strategy will give you different semantics
/// depending on what `resource_version`, `limit`, `continue_token` you include
/// with the list request.
///
/// See <https://kubernetes.io/docs/reference/using-api/api-concepts/#semantics-for-get-and-list> for details.
#[derive(Debug, PartialEq)]
pub enum VersionMatch {
    /// Returns data at least as new as the provided resource version.
    NotOlderThan,

    /// Return data at the exact resource version provided.
    ///
    /// Note that `Exact` cannot be used with resource version "0". For the most up-to-date
    /// list; use `Unset`.
    Exact,
}

/// Common query parameters used in list calls on collections
#[derive(Debug, Default)]
pub struct ListParams {
    /// A selector to restrict the list of returned objects by their labels.
    pub label_selector: Option<String>,

    /// A selector to restrict the list of returned objects by their fields.
    pub field_selector: Option<String>,

    /// Timeout for the list call
    pub timeout: Option<u32>,

    /// Limit the number of results
    ///
    /// If there are more results, the server will respond with a continue token
    /// which can be used to fetch another page of results.
    pub limit: Option<u32>,

    /// Fetch a second page of results.
    pub continue_token: Option<String>,

    /// Determines how resourceVersion is matched applied to list calls
    pub version_match: Option<VersionMatch>,

    /// An explicit resourceVersion using the given `VersionMatch` strategy
    pub resource_version: Option<String>,
}

impl ListParams {
    fn validate(&self) -> Result<(), Error> {
        if let Some(rv) = &self.resource_version {
            if self.version_match == Some(VersionMatch::Exact) && rv == "0" {
                return Err(Error::Validation(
                    "A non-zero resource_version is required when using an Exact match".into(),
                ));
            }
        } else if self.version_match.is_some() {
            return Err(Error::Validation(
                "A resource_version is required when using an explicit match".into(),
            ));
        }

        Ok(())
    }

    fn query(&self) -> String {
        let mut builder = form_urlencoded::Serializer::new(String::new());

        if let Some(field_selector) = &self.field_selector {
            builder.append_pair("fieldSelector", field_selector);
        }
        if let Some(label_selector) = &self.label_selector {
            builder.append_pair("labelSelector", label_selector);
        }
        if let Some(timeout) = &self.timeout {
            builder.append_pair("timeoutSeconds", &timeout.to_string());
        }
        if let Some(limit) = &self.limit {
            builder.append_pair("limit", &limit.to_string());
        }
        if let Some(continue_token) = &self.continue_token {
            builder.append_pair("continue", continue_token);
        } else if let Some(resource_version) = &self.resource_version {
            // When there's a continue token, we don't want to set resourceVersion
            if resource_version != "0" || self.limit.is_none() {
                builder.append_pair("resourceVersion", resource_version);

                match self.version_match {
                    None => {}
                    Some(VersionMatch::NotOlderThan) => {
                        builder.append_pair("resourceVersionMatch", "NotOlderThan");
                    }
                    Some(VersionMatch::Exact) => {
                        builder.append_pair("resourceVersionMatch", "Exact");
                    }
                }
            }
        }

        builder.finish()
    }
}

/// Common query parameters used in watch calls on collections
#[derive(Debug, Default)]
pub struct WatchParams {
    /// A selector to restrict returned objects by their labels.
    pub label_selector: Option<String>,

    /// A selector to restrict returned objects by their fields.
    pub field_selector: Option<String>,

    /// Timeout for the watch call.
    ///
    /// If unset for a watch call, we will use 290s. We limit this to 295s due to
    /// [inherent watch limitations](https://github.com/kubernetes/kubernetes/issues/6513).
    pub timeout: Option<u32>,

    /// Enables watch events with type "BOOKMARK"
    pub bookmarks: bool,

    /// Kubernetes 1.27 Streaming Lists `sendInitialEvents=true` may be set together with
    /// `watch=true`. In that case, the watch stream will begin with synthetic events to
    /// produce the current state of objects in the collection. Once all such events have
    /// been sent, a synthetic "Bookmark" event will be sent, marked with the
    /// `"k8s.io/initial-events-end": "true"` annotation.
    pub send_initial_events: bool,
}

impl WatchParams {
    fn query(&self, version: &str) -> Result<String, Error> {
        if let Some(timeout) = self.timeout {
            if timeout >= 295 {
                return Err(Error::Validation("invalid timeout limit".into()));
            }
        }

        let mut builder = form_urlencoded::Serializer::new(String::new());

        builder.append_pair("resourceVersion", version);
        builder.append_pair("watch", "true");
        // https://github.com/kubernetes/kubernetes/issues/6513
        builder.append_pair(
            "timeoutSeconds",
            self.timeout.unwrap_or(290).to_string().as_str(),
        );

        if let Some(label_selector) = self.label_selector.as_ref() {
            builder.append_pair("labelSelector", label_selector);
        }
        if let Some(field_selector) = self.field_selector.as_ref() {
            builder.append_pair("fieldSelector", field_selector);
        }

        if self.bookmarks {
            builder.append_pair("allowWatchBookmarks", "true");
        }
        if self.send_initial_events {
            builder.append_pair("sendInitialEvents", "true");
            builder.append_pair("resourceVersionMatch", "NotOlderThan");
        }

        Ok(builder.finish())
    }
}

#[derive(Deserialize)]
pub struct BookmarkMeta {
    /// The only field we need from a Bookmark event.
    #[serde(rename = "resourceVersion")]
    pub resource_version: String,

    /// Kubernetes 1.27 Streaming Lists
    /// The rest of the fields are optional and may be empty.
    #[serde(default)]
    pub annotations: std::collections::BTreeMap<String, String>,
}

/// Can only be relied upon to have metadata with resource version.
///
/// See https://kubernetes.io/docs/reference/using-api/api-concepts/#watch-bookmarks
#[derive(Deserialize)]
pub struct Bookmark {
    /// Basically empty metadata
    pub metadata: BookmarkMeta,
}

/// A raw event returned from a watch query
///
/// Note that a watch query returns many of these as newline separated JSON
#[derive(Deserialize)]
#[serde(tag = "type", content = "object", rename_all = "UPPERCASE")]
pub enum WatchEvent<K> {
    /// Resource was added
    Added(K),
    /// Resource was modified
    Modified(K),
    /// Resource was deleted
    Deleted(K),
    /// Resource bookmark. `Bookmark` is a slimmed down `K`
    Bookmark(Bookmark),
    /// There was some kind of error
    Error(ErrorResponse),
}

#[derive(Clone)]
pub struct Client {
    http_client: HttpClient<HttpsConnector<HttpConnector>, Full<Bytes>>,
    auth: Auth,
    endpoint: String,
    namespace: Option<String>,
}

impl Client {
    /// Build a client from the ambient credentials, see [`Config::load`].
    /// `namespace` scopes every request, `None` means all namespaces for
    /// collection calls.
    pub fn new(namespace: Option<String>) -> Result<Self, Error> {
        let config = Config::load().map_err(Error::Config)?;

        Ok(Self::with_config(config, namespace))
    }

    pub fn with_config(config: Config, namespace: Option<String>) -> Self {
        let builder = HttpsConnectorBuilder::new()
            .with_tls_config(config.tls)
            .https_or_http();
        let mut inner = HttpConnector::new();
        inner.enforce_http(false);
        let connector = builder.enable_http1().wrap_connector(inner);

        let http_client = HttpClient::builder(TokioExecutor::new()).build(connector);

        let url = config.cluster_url.to_string();
        let endpoint = url.strip_suffix('/').unwrap_or(&url).to_string();

        Client {
            http_client,
            endpoint,
            auth: config.auth,
            namespace,
        }
    }

    pub fn set_namespace(&mut self, namespace: Option<String>) {
        self.namespace = namespace;
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// Retrieve version info of the API server, so we can check the compatibility
    pub async fn version(&self) -> Result<Version, Error> {
        let req = Request::builder()
            .method(Method::GET)
            .uri(format!("{}/version", self.endpoint))
            .body(Full::<Bytes>::default())?;

        self.send(req).await
    }

    /// List a collection of a resource
    pub async fn list<R: Resource>(&self, params: &ListParams) -> Result<ObjectList<R>, Error> {
        self.list_as::<R, R>(params).await
    }

    /// List a collection of a resource without decoding the items, so a
    /// single malformed object does not fail the whole page.
    pub async fn list_raw<R: Resource>(
        &self,
        params: &ListParams,
    ) -> Result<ObjectList<serde_json::Value>, Error> {
        self.list_as::<R, serde_json::Value>(params).await
    }

    async fn list_as<R: Resource, T: DeserializeOwned>(
        &self,
        params: &ListParams,
    ) -> Result<ObjectList<T>, Error> {
        params.validate()?;

        let req = Request::builder()
            .method(Method::GET)
            .uri(format!(
                "{}{}?{}",
                self.endpoint,
                R::url_path(self.namespace.as_deref()),
                params.query()
            ))
            .body(Full::<Bytes>::default())?;

        self.send(req).await.map_err(|err| match err {
            Error::Deserialize(err) => Error::DecodeList(err),
            err => err,
        })
    }

    /// Get a named object, `None` is returned if it does not exist.
    pub async fn get<R: Resource>(&self, name: &str) -> Result<Option<R>, Error> {
        let req = Request::builder()
            .method(Method::GET)
            .uri(format!(
                "{}{}",
                self.endpoint,
                R::object_path(self.namespace.as_deref(), name)
            ))
            .body(Full::<Bytes>::default())?;

        match self.send(req).await {
            Ok(obj) => Ok(Some(obj)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Create an object, and return the one stored by the API server.
    pub async fn create<R: Resource + Serialize>(&self, obj: &R) -> Result<R, Error> {
        let body = serde_json::to_vec(obj).map_err(Error::Serialize)?;
        let req = Request::builder()
            .method(Method::POST)
            .uri(format!(
                "{}{}",
                self.endpoint,
                R::url_path(self.namespace.as_deref())
            ))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Full::new(Bytes::from(body)))?;

        self.send(req).await
    }

    /// Replace a named object entirely. If `obj` carries a resource version,
    /// the API server rejects the write with `409 Conflict` when the stored
    /// object has been changed since.
    pub async fn replace<R: Resource + Serialize>(&self, name: &str, obj: &R) -> Result<R, Error> {
        let body = serde_json::to_vec(obj).map_err(Error::Serialize)?;
        let req = Request::builder()
            .method(Method::PUT)
            .uri(format!(
                "{}{}",
                self.endpoint,
                R::object_path(self.namespace.as_deref(), name)
            ))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Full::new(Bytes::from(body)))?;

        self.send(req).await
    }

    /// watch returns a stream the produce WatchEvent<R>, and it will stop if
    /// an error occurred or the connection timeout. So, user have to call this
    /// function again to get notified again.
    pub async fn watch<R: Resource + Send + 'static>(
        &self,
        params: &WatchParams,
        version: &str,
    ) -> Result<BoxStream<'static, Result<WatchEvent<R>, Error>>, Error> {
        let uri = format!(
            "{}{}?{}",
            self.endpoint,
            R::url_path(self.namespace.as_deref()),
            params.query(version)?
        );

        trace!(message = "doing http request", uri);

        let mut req = Request::builder()
            .method(Method::GET)
            .uri(uri)
            .body(Full::<Bytes>::default())?;

        self.auth.apply(&mut req).map_err(Error::RefreshToken)?;

        self.request_events(req).await
    }

    async fn send<T: DeserializeOwned>(&self, mut req: Request<Full<Bytes>>) -> Result<T, Error> {
        self.auth.apply(&mut req).map_err(Error::RefreshToken)?;

        trace!(message = "doing http request", method = %req.method(), uri = %req.uri());

        let resp = self.http_client.request(req).await.map_err(Error::Http)?;
        let (parts, incoming) = resp.into_parts();
        let body = incoming.collect().await?.to_bytes();

        if !parts.status.is_success() {
            return Err(Error::Api(ErrorResponse::from_response(parts.status, &body)));
        }

        serde_json::from_slice(&body).map_err(Error::Deserialize)
    }

    async fn request_events<R: Resource + Send + 'static>(
        &self,
        req: Request<Full<Bytes>>,
    ) -> Result<BoxStream<'static, Result<WatchEvent<R>, Error>>, Error> {
        let resp = self.http_client.request(req).await.map_err(Error::Http)?;
        if !resp.status().is_success() {
            let (parts, incoming) = resp.into_parts();
            let body = incoming.collect().await?.to_bytes();
            return Err(Error::Api(ErrorResponse::from_response(parts.status, &body)));
        }

        let frames = FramedRead::new(
            StreamReader::new(resp.into_body().into_data_stream().map_err(|err| {
                // Unexpected EOF from chunked decoder.
                // Tends to happen when watching for 300+s. This will be ignored
                if err.to_string().contains("unexpected EOF during check") {
                    return std::io::Error::new(std::io::ErrorKind::UnexpectedEof, err);
                }

                std::io::Error::other(err)
            })),
            LinesCodec::new(),
        );

        Ok(Box::pin(frames.filter_map(|result| async {
            match result {
                Ok(line) => decode_event(&line),
                Err(LinesCodecError::Io(err)) => match err.kind() {
                    // Client timeout
                    std::io::ErrorKind::TimedOut => {
                        tracing::warn!(message = "timeout in poll", %err);
                        None
                    }
                    // Unexpected EOF from chunked decoder.
                    // Tends to happen after 300+s of watching.
                    std::io::ErrorKind::UnexpectedEof => {
                        tracing::warn!(message = "eof in poll", %err);
                        None
                    }
                    _ => Some(Err(Error::ReadEvents(err))),
                },

                // Reached the maximum line length without finding a newline.
                // This should never happen because we're using the default `usize::MAX`.
                Err(LinesCodecError::MaxLineLengthExceeded) => {
                    Some(Err(Error::LinesCodecMaxLineLengthExceeded))
                }
            }
        })))
    }
}

fn decode_event<R: Resource>(line: &str) -> Option<Result<WatchEvent<R>, Error>> {
    match serde_json::from_str::<WatchEvent<R>>(line) {
        Ok(event) => Some(Ok(event)),
        Err(err) => {
            // Ignore EOF error that can happen for incomplete line from `decode_eof`.
            if err.is_eof() {
                return None;
            }

            // Got general error response
            if let Ok(resp) = serde_json::from_str::<ErrorResponse>(line) {
                return Some(Err(Error::Api(resp)));
            }

            // Parsing error
            Some(Err(Error::Deserialize(err)))
        }
    }
}
