//! IS-04 API versions and resource version timestamps.

use serde::{Deserialize, Serialize};

use crate::error::{ModelError, ModelResult};

/// An IS-04 API version, formatted as `v<major>.<minor>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ApiVersion {
    pub major: u32,
    pub minor: u32,
}

/// v1.0
pub const V1_0: ApiVersion = ApiVersion { major: 1, minor: 0 };
/// v1.1
pub const V1_1: ApiVersion = ApiVersion { major: 1, minor: 1 };
/// v1.2
pub const V1_2: ApiVersion = ApiVersion { major: 1, minor: 2 };
/// v1.3, the node's native resource version.
pub const V1_3: ApiVersion = ApiVersion { major: 1, minor: 3 };

/// All API versions the node can serve, lowest first.
pub const SUPPORTED_VERSIONS: [ApiVersion; 4] = [V1_0, V1_1, V1_2, V1_3];

impl ApiVersion {
    pub const fn new(major: u32, minor: u32) -> Self {
        ApiVersion { major, minor }
    }
}

impl std::fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}.{}", self.major, self.minor)
    }
}

impl std::str::FromStr for ApiVersion {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ModelError::InvalidVersion(s.to_string());

        let rest = s.strip_prefix('v').ok_or_else(invalid)?;
        let (major, minor) = rest.split_once('.').ok_or_else(invalid)?;

        Ok(ApiVersion {
            major: major.parse().map_err(|_| invalid())?,
            minor: minor.parse().map_err(|_| invalid())?,
        })
    }
}

impl TryFrom<String> for ApiVersion {
    type Error = ModelError;

    fn try_from(value: String) -> ModelResult<Self> {
        value.parse()
    }
}

impl From<ApiVersion> for String {
    fn from(value: ApiVersion) -> Self {
        value.to_string()
    }
}

/// Returns the supported versions as the comma-separated `api_ver` TXT value.
pub fn supported_versions_txt() -> String {
    SUPPORTED_VERSIONS
        .iter()
        .map(ApiVersion::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

/// Returns the current time as a TAI-style `<seconds>:<nanoseconds>` version
/// timestamp, the format used in every resource's `version` field.
pub fn tai_now() -> String {
    let now = chrono::Utc::now();
    format!("{}:{}", now.timestamp(), now.timestamp_subsec_nanos())
}
