//! Registration API client.
//!
//! Translates resource change events into requests on the selected registry:
//!
//! | Event kind  | Request                      | Expected   |
//! |-------------|------------------------------|------------|
//! | added, sync | POST /resource               | 201        |
//! | modified    | POST /resource               | 200        |
//! | removed     | DELETE /resource/\<path\>    | 204        |
//!
//! A 200 in response to a creation means the registry still holds a stale
//! copy; the client clears it with a DELETE and re-issues the POST once.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::error::{NodeError, NodeResult};
use nmos_model::version::V1_3;
use nmos_model::{downgrade, ApiVersion, EventKind, ResourceEvent, ResourceId, ResourceType};

// =============================================================================
// Request Body
// =============================================================================

/// The body of a `POST /resource` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationRequest {
    #[serde(rename = "type")]
    pub resource_type: ResourceType,
    pub data: Value,
}

/// Builds the request body for a resource, downgraded to the registry's
/// API version where that is lower than the resource's native version.
pub fn make_registration_request(
    resource_type: ResourceType,
    data: &Value,
    registry_version: ApiVersion,
) -> RegistrationRequest {
    RegistrationRequest {
        resource_type,
        data: downgrade(resource_type, data, registry_version),
    }
}

/// Extracts the registry's API version from the base URI path,
/// e.g. `/x-nmos/registration/v1.2`.
pub fn registry_version_from_uri(base: &Url) -> ApiVersion {
    base.path_segments()
        .into_iter()
        .flatten()
        .filter(|segment| !segment.is_empty())
        .last()
        .and_then(|segment| segment.parse().ok())
        .unwrap_or_else(|| {
            debug!(uri = %base, "No API version in registry URI, assuming native");
            V1_3
        })
}

// =============================================================================
// Registry Transport
// =============================================================================

/// HTTP transport to a Registration API.
///
/// Implementations return the response status code; transport-level failures
/// (connection refused, timeout) surface as errors, which the agent treats
/// identically to 5xx responses.
#[async_trait]
pub trait RegistryTransport: Send + Sync {
    /// `POST <base>/resource` with a registration request body.
    async fn post_resource(&self, base: &Url, body: &RegistrationRequest) -> NodeResult<u16>;

    /// `DELETE <base>/resource/<path>`.
    async fn delete_resource(&self, base: &Url, path: &str) -> NodeResult<u16>;

    /// `POST <base>/health/nodes/<id>` with no body.
    async fn post_health(&self, base: &Url, node_id: &ResourceId) -> NodeResult<u16>;
}

fn endpoint(base: &Url, suffix: &str) -> NodeResult<Url> {
    let joined = format!("{}/{}", base.as_str().trim_end_matches('/'), suffix);
    Ok(Url::parse(&joined)?)
}

/// reqwest-backed registry transport with a per-request timeout.
pub struct HttpRegistryClient {
    client: reqwest::Client,
}

impl HttpRegistryClient {
    /// Default per-request timeout.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

    pub fn new(request_timeout: Duration) -> NodeResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .user_agent(concat!("nmos-node/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(HttpRegistryClient { client })
    }
}

#[async_trait]
impl RegistryTransport for HttpRegistryClient {
    async fn post_resource(&self, base: &Url, body: &RegistrationRequest) -> NodeResult<u16> {
        let url = endpoint(base, "resource")?;
        let response = self.client.post(url).json(body).send().await?;
        Ok(response.status().as_u16())
    }

    async fn delete_resource(&self, base: &Url, path: &str) -> NodeResult<u16> {
        let url = endpoint(base, &format!("resource/{}", path))?;
        let response = self.client.delete(url).send().await?;
        Ok(response.status().as_u16())
    }

    async fn post_health(&self, base: &Url, node_id: &ResourceId) -> NodeResult<u16> {
        let url = endpoint(base, &format!("health/nodes/{}", node_id))?;
        let response = self.client.post(url).send().await?;
        Ok(response.status().as_u16())
    }
}

// =============================================================================
// Per-Event Registration
// =============================================================================

// Should be called when an error condition has been identified; always logs.
//
// A 5xx, inability to connect or a timeout indicates a server-side issue and
// makes the selected registry unusable. A 4xx likely indicates a validation
// failure, but can also mean the super-resource was garbage-collected by the
// registry; the two cannot be distinguished, so the event is consumed and the
// registry-held state is allowed to drift rather than wedging the pump.
fn handle_registration_error(status: u16, operation: &str) -> NodeResult<()> {
    if (500..600).contains(&status) {
        error!(status, operation, "Registration error");
        Err(NodeError::ServiceError { status })
    } else if (400..500).contains(&status) {
        error!(status, operation, "Registration error");
        Ok(())
    } else {
        // a non-error status the caller didn't expect, possibly even 2xx
        error!(status, operation, "Unexpected registration status");
        Ok(())
    }
}

/// Issues the registry request for one resource event.
///
/// Returns `Ok(())` when the event is consumed (success or an ignored 4xx),
/// and a registry-service error when the selected registry must be popped.
pub async fn request_registration(
    transport: &dyn RegistryTransport,
    base: &Url,
    event: &ResourceEvent,
) -> NodeResult<()> {
    let (id, resource_type) = event.id_and_type()?;
    let registry_version = registry_version_from_uri(base);

    match event.kind {
        EventKind::Added | EventKind::Sync => {
            let Some(data) = event.post.as_ref() else {
                warn!(path = %event.path, "Creation event without post payload");
                return Ok(());
            };
            let body = make_registration_request(resource_type, data, registry_version);

            info!(%resource_type, %id, "Requesting registration creation");
            let status = transport.post_resource(base, &body).await?;

            if status == 201 {
                debug!(%resource_type, %id, "Registration created");
                Ok(())
            } else if status == 200 {
                // the registry still holds a stale copy of this resource;
                // clear it explicitly, then register afresh
                warn!(%resource_type, %id, "Registration out of sync");

                info!(%resource_type, %id, "Requesting out of sync registration deletion");
                let status = transport.delete_resource(base, &event.path).await?;
                if status == 204 {
                    debug!(%resource_type, %id, "Registration deleted");
                } else {
                    handle_registration_error(status, "deletion")?;
                }

                info!(%resource_type, %id, "Re-requesting registration creation");
                let status = transport.post_resource(base, &body).await?;
                if status == 201 {
                    debug!(%resource_type, %id, "Registration created");
                    Ok(())
                } else {
                    handle_registration_error(status, "creation")
                }
            } else {
                handle_registration_error(status, "creation")
            }
        }

        EventKind::Modified => {
            let Some(data) = event.post.as_ref() else {
                warn!(path = %event.path, "Modification event without post payload");
                return Ok(());
            };
            let body = make_registration_request(resource_type, data, registry_version);

            info!(%resource_type, %id, "Requesting registration update");
            let status = transport.post_resource(base, &body).await?;

            if status == 200 {
                debug!(%resource_type, %id, "Registration updated");
                Ok(())
            } else {
                handle_registration_error(status, "update")
            }
        }

        EventKind::Removed => {
            info!(%resource_type, %id, "Requesting registration deletion");
            let status = transport.delete_resource(base, &event.path).await?;

            if status == 204 {
                debug!(%resource_type, %id, "Registration deleted");
                Ok(())
            } else {
                handle_registration_error(status, "deletion")
            }
        }
    }
}
