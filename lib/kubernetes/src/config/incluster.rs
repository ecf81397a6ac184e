use std::env;
use std::path::PathBuf;

use super::{Auth, Config, RefreshableToken, tls};

const SERVICE_HOSTENV: &str = "KUBERNETES_SERVICE_HOST";
const SERVICE_PORTENV: &str = "KUBERNETES_SERVICE_PORT";

// Mounted credential files
const SERVICE_TOKENFILE: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";
const SERVICE_CERTFILE: &str = "/var/run/secrets/kubernetes.io/serviceaccount/ca.crt";

/// Errors from loading in-cluster config
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Failed to read the in-cluster environment variables
    #[error("failed to read an in-cluster environment variable {0}, {1}")]
    ReadEnvironmentVariable(&'static str, #[source] env::VarError),

    /// Failed to read a certificate
    #[error("failed to read the certificate file {0}")]
    ReadCertificate(#[source] std::io::Error),

    /// Failed to parse cluster port value
    #[error("failed to parse cluster port: {0}")]
    ParseClusterPort(#[source] std::num::ParseIntError),

    /// Failed to parse cluster url
    #[error("failed to parse cluster uri: {0}")]
    ParseClusterUri(#[source] http::uri::InvalidUri),

    /// Failed to read token file
    #[error("failed to read token file: '{1:?}': {0}")]
    ReadTokenFile(#[source] std::io::Error, PathBuf),

    #[error("build tls config failed, {0}")]
    Tls(#[from] tls::Error),
}

pub fn in_cluster() -> bool {
    env::var_os(SERVICE_HOSTENV).is_some()
}

pub fn incluster_env() -> Result<Config, Error> {
    let host = env::var(SERVICE_HOSTENV)
        .map_err(|err| Error::ReadEnvironmentVariable(SERVICE_HOSTENV, err))?;
    let port = env::var(SERVICE_PORTENV)
        .map_err(|err| Error::ReadEnvironmentVariable(SERVICE_PORTENV, err))?
        .parse::<u16>()
        .map_err(Error::ParseClusterPort)?;
    let cluster_url = cluster_uri(&host, port)?;

    let ca = std::fs::read(SERVICE_CERTFILE).map_err(Error::ReadCertificate)?;
    let tls = tls::client_config(tls::root_store(&ca)?, None)?;

    let refreshable_token = RefreshableToken::new(PathBuf::from(SERVICE_TOKENFILE))
        .map_err(|err| Error::ReadTokenFile(err, SERVICE_TOKENFILE.into()))?;

    Ok(Config {
        cluster_url,
        auth: Auth::RefreshableToken(refreshable_token),
        tls,
    })
}

/// Format a host and, if not using 443, a port.
///
/// Ensure that IPv6 addresses are properly bracketed.
fn cluster_uri(host: &str, port: u16) -> Result<http::Uri, Error> {
    let host = match host.parse::<std::net::IpAddr>() {
        Ok(ip) if ip.is_ipv6() => format!("[{ip}]"),
        _ => host.to_string(),
    };

    let uri = if port == 443 {
        format!("https://{host}")
    } else {
        format!("https://{host}:{port}")
    };

    uri.parse().map_err(Error::ParseClusterUri)
}
