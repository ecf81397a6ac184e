use serde::Deserialize;

/// Info contains versioning information of the API server.
#[derive(Deserialize, Debug)]
pub struct Version {
    /// Major version of the ApiServer
    pub major: String,

    /// Minor version of the ApiServer
    pub minor: String,

    #[serde(rename = "gitVersion", default)]
    pub git_version: String,

    pub platform: String,
}
