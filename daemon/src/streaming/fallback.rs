use serde::{Deserialize, Serialize};
use url::Url;

/// Maps manifests on a recognized host to direct-file alternatives.
///
/// A manifest matches when its host equals `host` or is a subdomain of it and
/// its path ends with `manifest_suffix`. Each alternative replaces that suffix,
/// in order. Query strings are dropped.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct FallbackRule {
    pub host: String,
    pub manifest_suffix: String,
    pub alternatives: Vec<String>,
}

impl FallbackRule {
    fn matches_host(&self, host: &str) -> bool {
        let host = host.to_ascii_lowercase();
        let rule_host = self.host.to_ascii_lowercase();
        host == rule_host || host.ends_with(&format!(".{}", rule_host))
    }

    fn candidates(&self, url: &Url) -> Option<Vec<String>> {
        if !self.matches_host(url.host_str()?) {
            return None;
        }

        let base = url.path().strip_suffix(self.manifest_suffix.as_str())?;
        let candidates = self
            .alternatives
            .iter()
            .map(|alt| {
                let mut candidate = url.clone();
                candidate.set_path(&format!("{}{}", base, alt));
                candidate.set_query(None);
                candidate.set_fragment(None);
                candidate.to_string()
            })
            .collect();
        Some(candidates)
    }
}

/// Default rules: stream-delivery CDNs expose a default MP4 download next to
/// the manifest; object storage keeps encoded siblings beside the playlist.
pub fn default_rules() -> Vec<FallbackRule> {
    vec![
        FallbackRule {
            host: "videodelivery.net".to_string(),
            manifest_suffix: "/manifest/video.m3u8".to_string(),
            alternatives: vec!["/downloads/default.mp4".to_string()],
        },
        FallbackRule {
            host: "cloudflarestream.com".to_string(),
            manifest_suffix: "/manifest/video.m3u8".to_string(),
            alternatives: vec!["/downloads/default.mp4".to_string()],
        },
        FallbackRule {
            host: "supabase.co".to_string(),
            manifest_suffix: ".m3u8".to_string(),
            alternatives: vec![".mp4".to_string(), ".webm".to_string()],
        },
    ]
}

#[derive(Debug, Clone)]
pub struct FallbackPlanner {
    rules: Vec<FallbackRule>,
}

impl FallbackPlanner {
    pub fn new(rules: Vec<FallbackRule>) -> Self {
        Self { rules }
    }

    /// Ordered direct-file alternatives for `manifest_url`; empty when the
    /// host is not recognized.
    pub fn candidates(&self, manifest_url: &str) -> Vec<String> {
        let Ok(url) = Url::parse(manifest_url) else {
            return Vec::new();
        };

        self.rules
            .iter()
            .find_map(|rule| rule.candidates(&url))
            .unwrap_or_default()
    }
}

impl Default for FallbackPlanner {
    fn default() -> Self {
        Self::new(default_rules())
    }
}
