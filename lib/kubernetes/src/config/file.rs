use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::warn;

use super::{Auth, Config, LoadDataError, RefreshableToken, tls};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Failed to read kube config
    #[error("failed to read '{1:?}': {0}")]
    ReadFile(#[source] std::io::Error, PathBuf),
    /// Failed to parse kube config YAML
    #[error("failed to parse kube config YAML: {0}")]
    Parse(#[source] serde_yaml::Error),
    /// Failed to determine current context
    #[error("failed to determine current context")]
    CurrentContextNotSet,
    /// Failed to load current context
    #[error("failed to load current context: {0}")]
    LoadContext(String),
    /// Failed to load the cluster of context
    #[error("failed to load the cluster of context: {0}")]
    LoadClusterOfContext(String),
    /// Failed to find named user
    #[error("failed to find named user: {0}")]
    FindUser(String),
    /// Cluster url is missing on selected cluster
    #[error("cluster url is missing on selected cluster")]
    MissingClusterUrl,
    /// Failed to parse cluster uri
    #[error("failed to parse cluster url: {0}")]
    ParseClusterUri(#[source] http::uri::InvalidUri),
    #[error("build tls config failed, {0}")]
    Tls(#[from] tls::Error),
    /// Failed to load client certificate
    #[error("failed to load client certificate, {0}")]
    LoadClientCertificate(#[source] LoadDataError),
    /// Failed to load client key
    #[error("failed to load client key, {0}")]
    LoadClientKey(#[source] LoadDataError),
    /// Failed to load certificate authority
    #[error("failed to load certificate authority, {0}")]
    LoadCertificateAuthority(#[source] LoadDataError),
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct AuthInfo {
    username: Option<String>,
    password: Option<String>,

    token: Option<String>,
    token_file: Option<PathBuf>,

    client_certificate: Option<PathBuf>,
    /// Base64 encoded PEM, overrides `client_certificate`
    client_certificate_data: Option<String>,

    client_key: Option<PathBuf>,
    /// Base64 encoded PEM, overrides `client_key`
    client_key_data: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct Cluster {
    server: Option<String>,

    #[serde(default)]
    insecure_skip_tls_verify: bool,

    certificate_authority: Option<PathBuf>,
    /// Base64 encoded PEM, overrides `certificate_authority`
    certificate_authority_data: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
struct Context {
    cluster: String,
    user: String,
}

#[derive(Deserialize)]
struct Named<T> {
    name: String,
    #[serde(alias = "cluster", alias = "user", alias = "context")]
    value: Option<T>,
}

fn find<T: Clone>(items: &[Named<T>], name: &str) -> Option<T> {
    items
        .iter()
        .find(|item| item.name == name)
        .and_then(|item| item.value.clone())
}

/// The subset of a kubeconfig file needed to reach the API server of the
/// current context.
#[derive(Deserialize)]
struct KubeConfig {
    #[serde(default)]
    clusters: Vec<Named<Cluster>>,

    #[serde(default)]
    users: Vec<Named<AuthInfo>>,

    #[serde(default)]
    contexts: Vec<Named<Context>>,

    #[serde(rename = "current-context")]
    current_context: Option<String>,
}

pub fn from_config(path: impl AsRef<Path>) -> Result<Config, Error> {
    let path = path.as_ref();
    let data = std::fs::read(path).map_err(|err| Error::ReadFile(err, path.into()))?;
    let config = serde_yaml::from_slice::<KubeConfig>(&data).map_err(Error::Parse)?;

    let context_name = config
        .current_context
        .filter(|name| !name.is_empty())
        .ok_or(Error::CurrentContextNotSet)?;
    let context = find(&config.contexts, &context_name).ok_or(Error::LoadContext(context_name))?;
    let cluster = find(&config.clusters, &context.cluster)
        .ok_or_else(|| Error::LoadClusterOfContext(context.cluster.clone()))?;
    let auth_info =
        find(&config.users, &context.user).ok_or_else(|| Error::FindUser(context.user.clone()))?;

    let cluster_url = cluster
        .server
        .as_deref()
        .ok_or(Error::MissingClusterUrl)?
        .parse::<http::Uri>()
        .map_err(Error::ParseClusterUri)?;

    if cluster.insecure_skip_tls_verify {
        warn!(
            message = "insecure-skip-tls-verify is not supported, the server certificate is still verified",
            cluster = %context.cluster
        );
    }

    let root_store = match load_pem(
        cluster.certificate_authority_data.as_deref(),
        cluster.certificate_authority.as_deref(),
    )
    .map_err(Error::LoadCertificateAuthority)?
    {
        Some(ca) => tls::root_store(&ca)?,
        None => tls::native_root_store()?,
    };

    let client_cert = load_pem(
        auth_info.client_certificate_data.as_deref(),
        auth_info.client_certificate.as_deref(),
    )
    .map_err(Error::LoadClientCertificate)?;
    let client_key = load_pem(
        auth_info.client_key_data.as_deref(),
        auth_info.client_key.as_deref(),
    )
    .map_err(Error::LoadClientKey)?;

    let identity = match (client_cert, client_key) {
        (Some(mut cert), Some(key)) => {
            cert.push(b'\n');
            cert.extend_from_slice(&key);
            Some(cert)
        }
        _ => None,
    };
    let tls = tls::client_config(root_store, identity.as_deref())?;

    let auth = if let (Some(username), Some(password)) = (auth_info.username, auth_info.password) {
        Auth::Basic { username, password }
    } else if let Some(path) = auth_info.token_file {
        let token =
            RefreshableToken::new(path.clone()).map_err(|err| Error::ReadFile(err, path))?;
        Auth::RefreshableToken(token)
    } else if let Some(token) = auth_info.token {
        Auth::Bearer { token }
    } else {
        Auth::None
    };

    Ok(Config {
        cluster_url,
        auth,
        tls,
    })
}

/// Inline data is base64 encoded PEM, while the referenced file holds the PEM
/// itself.
fn load_pem(data: Option<&str>, file: Option<&Path>) -> Result<Option<Vec<u8>>, LoadDataError> {
    use base64::Engine;

    if let Some(data) = data {
        return base64::engine::general_purpose::STANDARD
            .decode(data.trim())
            .map(Some)
            .map_err(LoadDataError::DecodeBase64);
    }

    match file {
        Some(path) => std::fs::read(path)
            .map(Some)
            .map_err(|err| LoadDataError::ReadFile(err, path.to_path_buf())),
        None => Ok(None),
    }
}
