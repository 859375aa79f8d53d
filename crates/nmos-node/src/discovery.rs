//! Registration API discovery.
//!
//! A browse yields `{priority, uri}` answers; the agent keeps them in a
//! stable priority-ordered list and always talks to the top entry. When a
//! registry stops responding correctly its entry is popped and the next one
//! is selected.

use tracing::{debug, info, warn};
use url::Url;

use crate::config::NO_PRIORITY;
use crate::mdns::{DiscoveredService, ServiceBrowser, REGISTRATION_SERVICE};
use nmos_model::version::{ApiVersion, SUPPORTED_VERSIONS, V1_3};

// =============================================================================
// Registry List
// =============================================================================

/// A stable priority-ordered multiset of discovered registries.
///
/// The top entry is the minimum-priority one; equal priorities keep their
/// insertion order.
#[derive(Debug, Clone, Default)]
pub struct RegistryList {
    entries: Vec<(u32, Url)>,
}

impl RegistryList {
    pub fn new() -> Self {
        RegistryList::default()
    }

    /// Inserts an entry, after any existing entries of equal priority.
    pub fn insert(&mut self, priority: u32, uri: Url) {
        let position = self
            .entries
            .iter()
            .position(|(held, _)| *held > priority)
            .unwrap_or(self.entries.len());
        self.entries.insert(position, (priority, uri));
    }

    /// The currently selected registry: the minimum-priority entry.
    pub fn top(&self) -> Option<&Url> {
        self.entries.first().map(|(_, uri)| uri)
    }

    /// Removes exactly the currently selected registry.
    pub fn pop_top(&mut self) -> Option<(u32, Url)> {
        if self.entries.is_empty() {
            None
        } else {
            Some(self.entries.remove(0))
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

// =============================================================================
// Discovery
// =============================================================================

// The highest advertised API version the node also supports; a registry
// advertising only unknown versions is assumed to speak the native version.
fn select_api_version(api_ver: Option<&str>) -> ApiVersion {
    api_ver
        .into_iter()
        .flat_map(|csv| csv.split(','))
        .filter_map(|v| v.trim().parse::<ApiVersion>().ok())
        .filter(|v| SUPPORTED_VERSIONS.contains(v))
        .max()
        .unwrap_or(V1_3)
}

fn registration_uri(answer: &DiscoveredService) -> Option<(u32, Url)> {
    let priority = match answer.txt.get("pri") {
        Some(pri) => match pri.parse::<u32>() {
            Ok(parsed) => parsed,
            Err(_) => {
                debug!(pri, host = %answer.host, "Ignoring answer with unparseable pri");
                return None;
            }
        },
        None => NO_PRIORITY,
    };

    let proto = answer.txt.get("api_proto").unwrap_or("http");
    let version = select_api_version(answer.txt.get("api_ver"));

    let uri = format!(
        "{}://{}:{}/x-nmos/registration/{}",
        proto, answer.host, answer.port, version
    );

    match Url::parse(&uri) {
        Ok(url) => Some((priority, url)),
        Err(e) => {
            debug!(%uri, ?e, "Ignoring answer with unparseable URI");
            None
        }
    }
}

/// Browses for Registration APIs and returns them as a priority-ordered list.
///
/// If the browse yields nothing and a fallback registry is configured, the
/// fallback is inserted at the priority reserved for unadvertised services.
pub async fn discover_registration_services(
    browser: &dyn ServiceBrowser,
    fallback: Option<&Url>,
) -> RegistryList {
    info!("Attempting discovery of a Registration API");

    let answers = match browser.browse(REGISTRATION_SERVICE).await {
        Ok(answers) => answers,
        Err(e) => {
            warn!(?e, "Registration API browse failed");
            Vec::new()
        }
    };

    let mut discovered: Vec<(u32, Url)> =
        answers.iter().filter_map(registration_uri).collect();
    // deterministic order for equal-priority answers
    discovered.sort_by(|a, b| (a.0, a.1.as_str()).cmp(&(b.0, b.1.as_str())));

    let mut services = RegistryList::new();
    for (priority, uri) in discovered {
        services.insert(priority, uri);
    }

    if !services.is_empty() {
        info!(count = services.len(), "Discovered Registration API(s)");
    } else {
        warn!("Did not discover a suitable Registration API");

        if let Some(uri) = fallback {
            info!(uri = %uri, "Falling back to the configured Registration API");
            services.insert(NO_PRIORITY, uri.clone());
        }
    }

    services
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mdns::TxtRecords;
    use std::net::{IpAddr, Ipv4Addr};

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_top_is_min_priority() {
        let mut list = RegistryList::new();
        list.insert(100, url("http://c:8235/"));
        list.insert(10, url("http://a:8235/"));
        list.insert(50, url("http://b:8235/"));

        assert_eq!(list.top().unwrap().as_str(), "http://a:8235/");
        assert_eq!(list.len(), 3);
    }

    #[test]
    fn test_equal_priority_keeps_insertion_order() {
        let mut list = RegistryList::new();
        list.insert(10, url("http://first:8235/"));
        list.insert(10, url("http://second:8235/"));

        assert_eq!(list.top().unwrap().as_str(), "http://first:8235/");
        list.pop_top();
        assert_eq!(list.top().unwrap().as_str(), "http://second:8235/");
    }

    #[test]
    fn test_pop_top_removes_exactly_one() {
        let mut list = RegistryList::new();
        list.insert(10, url("http://a:8235/"));
        list.insert(20, url("http://b:8235/"));

        let (priority, uri) = list.pop_top().unwrap();
        assert_eq!(priority, 10);
        assert_eq!(uri.as_str(), "http://a:8235/");
        assert_eq!(list.len(), 1);

        list.pop_top();
        assert!(list.pop_top().is_none());
        assert!(list.is_empty());
    }

    #[test]
    fn test_registration_uri_from_answer() {
        let mut txt = TxtRecords::new();
        txt.push("pri", "30");
        txt.push("api_proto", "http");
        txt.push("api_ver", "v1.0,v1.1,v1.2,v1.3");

        let answer = DiscoveredService {
            host: IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20)),
            port: 8235,
            txt,
        };

        let (priority, uri) = registration_uri(&answer).unwrap();
        assert_eq!(priority, 30);
        assert_eq!(
            uri.as_str(),
            "http://192.168.1.20:8235/x-nmos/registration/v1.3"
        );
    }

    #[test]
    fn test_registration_uri_picks_highest_common_version() {
        let mut txt = TxtRecords::new();
        txt.push("pri", "0");
        txt.push("api_ver", "v1.0,v1.1,v9.9");

        let answer = DiscoveredService {
            host: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            port: 80,
            txt,
        };

        let (_, uri) = registration_uri(&answer).unwrap();
        assert!(uri.path().ends_with("/v1.1"));
    }

    #[test]
    fn test_registration_uri_defaults() {
        let answer = DiscoveredService {
            host: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            port: 80,
            txt: TxtRecords::new(),
        };

        let (priority, uri) = registration_uri(&answer).unwrap();
        assert_eq!(priority, NO_PRIORITY);
        assert!(uri.path().ends_with("/v1.3"));
        assert_eq!(uri.scheme(), "http");
    }
}
