//! Region endpoint resolution with deterministic fallback ordering.
//!
//! The service runs the same protocol on several geographic hosts. Demo
//! accounts are only accepted on the demo hosts; live accounts on the
//! rest. Candidate order is fixed (not randomized) so retry sequences
//! are reproducible in tests; a preferred region, when present, is
//! promoted to the front.

use serde::{Deserialize, Serialize};

/// Live endpoint URLs, in priority order; region labels derive from the
/// host at construction.
const LIVE_URLS: &[&str] = &[
    "wss://api-eu.po.market/socket.io/?EIO=4&transport=websocket",
    "wss://api-sc.po.market/socket.io/?EIO=4&transport=websocket",
    "wss://api-hk.po.market/socket.io/?EIO=4&transport=websocket",
    "wss://api-fr.po.market/socket.io/?EIO=4&transport=websocket",
    "wss://api-in.po.market/socket.io/?EIO=4&transport=websocket",
    "wss://api-us2.po.market/socket.io/?EIO=4&transport=websocket",
];

/// Demo-capable endpoint URLs, in priority order.
const DEMO_URLS: &[&str] = &[
    "wss://demo-api-eu.po.market/socket.io/?EIO=4&transport=websocket",
    "wss://try-demo-eu.po.market/socket.io/?EIO=4&transport=websocket",
];

/// One transport endpoint candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub region: String,
    pub url: String,
}

impl Endpoint {
    pub fn new(region: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            url: url.into(),
        }
    }

    /// Endpoint whose region label is derived from the URL's host.
    pub fn from_url(url: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            region: region_from_url(&url),
            url,
        }
    }
}

/// Ordered candidate list per mode.
#[derive(Debug, Clone)]
pub struct EndpointResolver {
    demo: Vec<Endpoint>,
    live: Vec<Endpoint>,
}

impl Default for EndpointResolver {
    fn default() -> Self {
        Self {
            demo: DEMO_URLS.iter().map(|url| Endpoint::from_url(*url)).collect(),
            live: LIVE_URLS.iter().map(|url| Endpoint::from_url(*url)).collect(),
        }
    }
}

impl EndpointResolver {
    /// Resolver over an explicit candidate set, same list for both
    /// modes. Used by tests and by callers pinning custom hosts.
    pub fn from_endpoints(endpoints: Vec<Endpoint>) -> Self {
        Self {
            demo: endpoints.clone(),
            live: endpoints,
        }
    }

    /// Ordered candidates for a mode, preferred region first when present.
    pub fn candidates(&self, demo: bool, preferred_region: Option<&str>) -> Vec<Endpoint> {
        let pool = if demo { &self.demo } else { &self.live };
        let mut ordered: Vec<Endpoint> = Vec::with_capacity(pool.len());

        if let Some(preferred) = preferred_region {
            if let Some(hit) = pool.iter().find(|e| e.region.eq_ignore_ascii_case(preferred)) {
                ordered.push(hit.clone());
            }
        }
        for endpoint in pool {
            if !ordered.contains(endpoint) {
                ordered.push(endpoint.clone());
            }
        }

        ordered
    }
}

/// Derive the region label from an endpoint URL's host.
/// `api-eu.po.market` ⇒ `EU`, `demo-api-eu…` ⇒ `DEMO`.
pub fn region_from_url(url: &str) -> String {
    let host_label = url
        .split("//")
        .nth(1)
        .and_then(|rest| rest.split('.').next())
        .unwrap_or("");

    if host_label.contains("demo") {
        "DEMO".to_string()
    } else if let Some(region) = host_label.strip_prefix("api-") {
        region.to_uppercase()
    } else {
        "UNKNOWN".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demo_mode_restricts_to_demo_endpoints() {
        let resolver = EndpointResolver::default();
        let demo = resolver.candidates(true, None);

        assert!(!demo.is_empty());
        assert!(demo.iter().all(|e| e.region.starts_with("DEMO")));
    }

    #[test]
    fn live_mode_excludes_demo_endpoints() {
        let resolver = EndpointResolver::default();
        let live = resolver.candidates(false, None);

        assert!(!live.is_empty());
        assert!(live.iter().all(|e| !e.region.starts_with("DEMO")));
    }

    #[test]
    fn preferred_region_is_promoted_to_front() {
        let resolver = EndpointResolver::default();
        let ordered = resolver.candidates(false, Some("hk"));

        assert_eq!(ordered[0].region, "HK");
        // Remaining order is the fixed priority order, minus the promoted one.
        let rest: Vec<&str> = ordered[1..].iter().map(|e| e.region.as_str()).collect();
        assert_eq!(rest, vec!["EU", "SC", "FR", "IN", "US2"]);
    }

    #[test]
    fn unknown_preferred_region_keeps_fixed_order() {
        let resolver = EndpointResolver::default();
        let ordered = resolver.candidates(false, Some("MARS"));
        let regions: Vec<&str> = ordered.iter().map(|e| e.region.as_str()).collect();
        assert_eq!(regions, vec!["EU", "SC", "HK", "FR", "IN", "US2"]);
    }

    #[test]
    fn candidate_order_is_deterministic() {
        let resolver = EndpointResolver::default();
        assert_eq!(resolver.candidates(true, None), resolver.candidates(true, None));
        assert_eq!(resolver.candidates(false, None), resolver.candidates(false, None));
    }

    #[test]
    fn region_derivation_from_host_label() {
        assert_eq!(region_from_url("wss://api-eu.po.market/socket.io/"), "EU");
        assert_eq!(
            region_from_url("wss://demo-api-eu.po.market/socket.io/"),
            "DEMO"
        );
        assert_eq!(region_from_url("wss://localhost:9001"), "UNKNOWN");
    }

    #[test]
    fn from_url_labels_the_endpoint() {
        let live = Endpoint::from_url("wss://api-hk.po.market/socket.io/");
        assert_eq!(live.region, "HK");

        let demo = Endpoint::from_url("wss://try-demo-eu.po.market/socket.io/");
        assert_eq!(demo.region, "DEMO");
    }
}
