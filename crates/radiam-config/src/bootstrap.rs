//! Named-object resolution. A bootstrap file holds an ordered list of search
//! rules `{NameRegex, Base}`; objects are looked up by name against the
//! rules, and fetched from a filesystem prefix or an HTTP URL prefix. An
//! optional instance name is tried as a path component first, so a given
//! instance can shadow shared objects.

use radiam_core::{RadiamError, Result};
use regex::Regex;
use serde::Deserialize;
use tracing::debug;

/// Environment variable pointing at the bootstrap file
pub const ENV_CONFIG_BASE: &str = "RADIAM_BASE";

#[derive(Debug, Clone, Deserialize)]
pub struct SearchRule {
    #[serde(rename = "NameRegex")]
    pub name_regex: String,
    #[serde(rename = "Base")]
    pub base: String,
}

pub struct ConfigManager {
    rules: Vec<(Regex, String)>,
    instance: Option<String>,
    http: reqwest::Client,
}

fn is_http(location: &str) -> bool {
    location.starts_with("http://") || location.starts_with("https://")
}

async fn fetch(http: &reqwest::Client, location: &str) -> Result<String> {
    if is_http(location) {
        let response = http
            .get(location)
            .send()
            .await
            .map_err(|e| RadiamError::Config(format!("{location}: {e}")))?;
        if !response.status().is_success() {
            return Err(RadiamError::Config(format!(
                "{location}: http status {}",
                response.status()
            )));
        }
        response
            .text()
            .await
            .map_err(|e| RadiamError::Config(format!("{location}: {e}")))
    } else {
        tokio::fs::read_to_string(location)
            .await
            .map_err(|e| RadiamError::Config(format!("{location}: {e}")))
    }
}

impl ConfigManager {
    /// Read the bootstrap file named by `RADIAM_BASE`
    pub async fn from_env(instance: Option<String>) -> Result<Self> {
        let base = std::env::var(ENV_CONFIG_BASE)
            .map_err(|_| RadiamError::Config(format!("{ENV_CONFIG_BASE} is not set")))?;
        Self::new(&base, instance).await
    }

    pub async fn new(bootstrap_location: &str, instance: Option<String>) -> Result<Self> {
        let http = reqwest::Client::new();
        let text = fetch(&http, bootstrap_location).await?;
        let raw: Vec<SearchRule> =
            serde_json::from_str(&text).map_err(|e| RadiamError::Config(e.to_string()))?;

        let mut rules = Vec::with_capacity(raw.len());
        for rule in raw {
            let regex = Regex::new(&rule.name_regex).map_err(|e| {
                RadiamError::Config(format!("bad NameRegex {}: {e}", rule.name_regex))
            })?;
            rules.push((regex, rule.base));
        }

        Ok(Self {
            rules,
            instance,
            http,
        })
    }

    /// Resolve and fetch a named object. Rules are tried in order; the first
    /// whose regex matches decides the base. With an instance name set, the
    /// instance-qualified path is tried before the shared one.
    pub async fn read_object(&self, name: &str) -> Result<String> {
        for (regex, base) in &self.rules {
            if !regex.is_match(name) {
                continue;
            }

            if let Some(instance) = &self.instance {
                let qualified = format!("{base}{instance}/{name}");
                match fetch(&self.http, &qualified).await {
                    Ok(text) => {
                        debug!(%name, location = %qualified, "object resolved");
                        return Ok(text);
                    }
                    Err(_) => {
                        debug!(%name, location = %qualified, "instance path missed, trying shared");
                    }
                }
            }

            let shared = format!("{base}{name}");
            return fetch(&self.http, &shared).await;
        }

        Err(RadiamError::Config(format!(
            "no search rule matches object {name}"
        )))
    }

    /// Fetch and deserialize a named JSON object
    pub async fn read_json<T: serde::de::DeserializeOwned>(&self, name: &str) -> Result<T> {
        let text = self.read_object(name).await?;
        serde_json::from_str(&text)
            .map_err(|e| RadiamError::Config(format!("object {name}: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    async fn write(path: &PathBuf, content: &str) {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.unwrap();
        }
        tokio::fs::write(path, content).await.unwrap();
    }

    async fn setup(dir_name: &str) -> PathBuf {
        let root = std::env::temp_dir()
            .join("radiam-config-tests")
            .join(dir_name)
            .join(format!("{}", std::process::id()));
        let _ = tokio::fs::remove_dir_all(&root).await;
        tokio::fs::create_dir_all(&root).await.unwrap();
        root
    }

    #[tokio::test]
    async fn test_object_resolution_and_instance_shadowing() {
        let root = setup("shadowing").await;
        let base = format!("{}/", root.display());

        write(&root.join("serverConfig.json"), r#"{"shared": true}"#).await;
        write(
            &root.join("instance01/serverConfig.json"),
            r#"{"shared": false}"#,
        )
        .await;
        write(
            &root.join("bootstrap.json"),
            &format!(r#"[{{"NameRegex": ".*", "Base": "{base}"}}]"#),
        )
        .await;

        // Without an instance, the shared object is used
        let manager = ConfigManager::new(&format!("{base}bootstrap.json"), None)
            .await
            .unwrap();
        let text = manager.read_object("serverConfig.json").await.unwrap();
        assert!(text.contains("true"));

        // The instance path shadows the shared one
        let manager = ConfigManager::new(
            &format!("{base}bootstrap.json"),
            Some("instance01".to_string()),
        )
        .await
        .unwrap();
        let text = manager.read_object("serverConfig.json").await.unwrap();
        assert!(text.contains("false"));
    }

    #[tokio::test]
    async fn test_first_matching_rule_wins() {
        let root = setup("rule-order").await;
        let base = format!("{}/", root.display());

        write(&root.join("specific/dictionary.json"), r#"{"from": "specific"}"#).await;
        write(&root.join("general/dictionary.json"), r#"{"from": "general"}"#).await;
        write(
            &root.join("bootstrap.json"),
            &format!(
                r#"[
                    {{"NameRegex": "dictionary.*", "Base": "{base}specific/"}},
                    {{"NameRegex": ".*", "Base": "{base}general/"}}
                ]"#
            ),
        )
        .await;

        let manager = ConfigManager::new(&format!("{base}bootstrap.json"), None)
            .await
            .unwrap();
        let text = manager.read_object("dictionary.json").await.unwrap();
        assert!(text.contains("specific"));
    }

    #[tokio::test]
    async fn test_unmatched_object_fails() {
        let root = setup("unmatched").await;
        let base = format!("{}/", root.display());
        write(
            &root.join("bootstrap.json"),
            &format!(r#"[{{"NameRegex": "^config.*", "Base": "{base}"}}]"#),
        )
        .await;

        let manager = ConfigManager::new(&format!("{base}bootstrap.json"), None)
            .await
            .unwrap();
        let result = manager.read_object("other.json").await;
        assert!(matches!(result, Err(RadiamError::Config(_))));
    }

    #[tokio::test]
    async fn test_bad_regex_is_fatal() {
        let root = setup("bad-regex").await;
        let base = format!("{}/", root.display());
        write(
            &root.join("bootstrap.json"),
            r#"[{"NameRegex": "([", "Base": "/tmp/"}]"#,
        )
        .await;

        let result = ConfigManager::new(&format!("{base}bootstrap.json"), None).await;
        assert!(matches!(result, Err(RadiamError::Config(_))));
    }
}
