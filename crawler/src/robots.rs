//! robots.txt fetch + cache (spec.md §4.1: "respect robots.txt if
//! `respect_robots_txt` is set"). Fetched once per host and cached for the
//! crawl run's lifetime; a failed fetch is treated as "allow all" — an
//! Open Question resolved in DESIGN.md, since spec.md gates enforcement
//! behind the config flag but does not say what to do when the fetch
//! itself fails.

use std::{collections::HashMap, sync::Arc};

use tokio::sync::Mutex;
use tracing::debug;
use url::Url;

#[derive(Debug, Default, Clone)]
struct RobotsRules {
    disallow: Vec<String>,
}

impl RobotsRules {
    fn allows(&self, path: &str) -> bool {
        !self
            .disallow
            .iter()
            .any(|prefix| !prefix.is_empty() && path.starts_with(prefix.as_str()))
    }

    fn parse(body: &str) -> Self {
        let mut disallow = Vec::new();
        let mut applies = false;
        for raw_line in body.lines() {
            let line = raw_line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim();
            match key.trim().to_ascii_lowercase().as_str() {
                "user-agent" => applies = value == "*",
                "disallow" if applies => disallow.push(value.to_string()),
                _ => {}
            }
        }
        Self { disallow }
    }
}

/// Per-host robots.txt cache, shared across a crawl run.
pub struct RobotsCache {
    cache: Mutex<HashMap<String, Arc<RobotsRules>>>,
}

impl RobotsCache {
    pub fn new() -> Self {
        Self {
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Whether `url` may be fetched under the `user_agent` identity.
    pub async fn is_allowed(&self, client: &reqwest::Client, url: &Url, user_agent: &str) -> bool {
        let Some(host) = url.host_str() else {
            return true;
        };
        let host = host.to_string();

        if let Some(rules) = self.cache.lock().await.get(&host) {
            return rules.allows(url.path());
        }

        let rules = Arc::new(self.fetch(client, url, user_agent).await);
        self.cache.lock().await.insert(host, rules.clone());
        rules.allows(url.path())
    }

    async fn fetch(&self, client: &reqwest::Client, url: &Url, user_agent: &str) -> RobotsRules {
        let Ok(robots_url) = url.join("/robots.txt") else {
            return RobotsRules::default();
        };

        match client.get(robots_url.as_str()).header("User-Agent", user_agent).send().await {
            Ok(response) if response.status().is_success() => match response.text().await {
                Ok(body) => RobotsRules::parse(&body),
                Err(_) => RobotsRules::default(),
            },
            Ok(response) => {
                debug!(host = url.host_str(), status = %response.status(), "no robots.txt, allowing all");
                RobotsRules::default()
            }
            Err(_) => {
                debug!(host = url.host_str(), "robots.txt fetch failed, allowing all");
                RobotsRules::default()
            }
        }
    }
}

impl Default for RobotsCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disallow_under_active_user_agent_blocks_path() {
        let rules = RobotsRules::parse("User-agent: *\nDisallow: /private\n");
        assert!(!rules.allows("/private/page"));
        assert!(rules.allows("/public/page"));
    }

    #[test]
    fn disallow_under_other_user_agent_is_ignored() {
        let rules = RobotsRules::parse("User-agent: Googlebot\nDisallow: /private\n");
        assert!(rules.allows("/private/page"));
    }

    #[test]
    fn empty_disallow_allows_everything() {
        let rules = RobotsRules::parse("User-agent: *\nDisallow:\n");
        assert!(rules.allows("/anything"));
    }

    #[test]
    fn missing_rules_default_to_allow_all() {
        let rules = RobotsRules::default();
        assert!(rules.allows("/anything"));
    }
}
