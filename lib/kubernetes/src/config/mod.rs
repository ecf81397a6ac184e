mod file;
mod incluster;
mod tls;

use std::fmt::{Debug, Formatter};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use headers::{Authorization, HeaderMapExt};
use http::Request;

/// Errors from loading data from a base64 string or a file
#[derive(Debug, thiserror::Error)]
pub enum LoadDataError {
    /// Failed to decode base64 data
    #[error("failed to decode base64 data: {0}")]
    DecodeBase64(#[source] base64::DecodeError),

    /// Failed to read file
    #[error("failed to read file '{1:?}': {0}")]
    ReadFile(#[source] std::io::Error, PathBuf),
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    InCluster(#[from] incluster::Error),

    #[error(transparent)]
    File(#[from] file::Error),

    /// Neither in-cluster environment nor a kubeconfig file is available
    #[error("no credentials found, not running in a cluster and no kubeconfig at {0:?}")]
    NoCredentials(Option<PathBuf>),
}

/// Service account tokens are rotated by the kubelet, so the file is read
/// again once the cached value is older than a minute.
#[derive(Clone)]
pub struct RefreshableToken {
    path: PathBuf,
    inner: Arc<Mutex<(String, Instant)>>,
}

impl Debug for RefreshableToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshableToken")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl RefreshableToken {
    const TTL: Duration = Duration::from_secs(60);

    pub(crate) fn new(path: PathBuf) -> std::io::Result<Self> {
        let token = read_token(&path)?;

        Ok(RefreshableToken {
            path,
            inner: Arc::new(Mutex::new((token, Instant::now() + Self::TTL))),
        })
    }

    pub fn token(&self) -> std::io::Result<String> {
        let now = Instant::now();
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);

        if now > inner.1 {
            *inner = (read_token(&self.path)?, now + Self::TTL);
        }

        Ok(inner.0.clone())
    }
}

fn read_token(path: &Path) -> std::io::Result<String> {
    std::fs::read_to_string(path).map(|token| token.trim().to_string())
}

#[derive(Clone, Debug)]
pub enum Auth {
    None,
    Basic { username: String, password: String },
    Bearer { token: String },
    RefreshableToken(RefreshableToken),
}

impl Auth {
    pub fn apply<T>(&self, req: &mut Request<T>) -> std::io::Result<()> {
        match self {
            Auth::None => {}
            Auth::Basic { username, password } => {
                req.headers_mut()
                    .typed_insert(Authorization::basic(username, password));
            }
            Auth::Bearer { token } => {
                req.headers_mut().typed_insert(bearer(token)?);
            }
            Auth::RefreshableToken(refreshable_token) => {
                let token = refreshable_token.token()?;
                req.headers_mut().typed_insert(bearer(&token)?);
            }
        }

        Ok(())
    }
}

fn bearer(token: &str) -> std::io::Result<Authorization<headers::authorization::Bearer>> {
    Authorization::bearer(token).map_err(|_err| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "bearer token contains invalid characters",
        )
    })
}

/// Configuration object detailing things like cluster URL, root certificates
/// and authentication. It exists to be consumed by the
/// [`Client`](crate::Client).
#[derive(Debug)]
pub struct Config {
    /// The configured cluster url.
    pub cluster_url: http::Uri,

    /// Stores information to tell the cluster who you are.
    pub auth: Auth,

    pub tls: rustls::ClientConfig,
}

impl Config {
    /// Load credentials from the environment.
    ///
    /// Inside a pod (`KUBERNETES_SERVICE_HOST` is set) the mounted service
    /// account is used. Otherwise the current context of the kubeconfig file
    /// named by `KUBECONFIG`, or `~/.kube/config`, is used.
    pub fn load() -> Result<Config, Error> {
        if incluster::in_cluster() {
            return incluster::incluster_env().map_err(Into::into);
        }

        match kubeconfig_path() {
            Some(path) if path.exists() => file::from_config(path).map_err(Into::into),
            path => Err(Error::NoCredentials(path)),
        }
    }
}

fn kubeconfig_path() -> Option<PathBuf> {
    if let Some(value) = std::env::var_os("KUBECONFIG") {
        // multiple paths are merged by kubectl, only the first one is honored here
        if let Some(first) = std::env::split_paths(&value).find(|p| !p.as_os_str().is_empty()) {
            return Some(first);
        }
    }

    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".kube").join("config"))
}
