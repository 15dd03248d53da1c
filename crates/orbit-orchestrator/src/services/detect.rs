//! Language/framework detection over a checked-out repository.

use std::path::Path;

use serde::{Deserialize, Serialize};

use orbit_core::{OrbitError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectedBuildConfig {
    pub language: String,
    pub language_version: String,
    #[serde(default)]
    pub framework: Option<String>,
    pub build_cmd: String,
    pub start_cmd: String,
}

/// Outcome of repository analysis: either a single resolved configuration
/// or a candidate set the user must choose from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Detection {
    Resolved { config: DetectedBuildConfig },
    Ambiguous { candidates: Vec<String> },
}

/// Node LTS lines offered when the manifest does not pin an engine.
const NODE_CANDIDATES: [&str; 2] = ["node-18", "node-20"];

/// Inspect marker files under `root`. Multiple runtimes, or a runtime
/// without a pinned version, yield `Ambiguous`.
pub fn detect(root: &Path) -> Result<Detection> {
    let mut found: Vec<Detection> = Vec::new();

    if root.join("package.json").exists() {
        found.push(detect_node(root)?);
    }
    if root.join("go.mod").exists() {
        found.push(detect_go(root)?);
    }
    if root.join("Cargo.toml").exists() {
        found.push(Detection::Resolved {
            config: DetectedBuildConfig {
                language: "rust".into(),
                language_version: "rust-stable".into(),
                framework: None,
                build_cmd: "cargo build --release".into(),
                start_cmd: "./target/release/app".into(),
            },
        });
    }
    if root.join("pyproject.toml").exists() || root.join("requirements.txt").exists() {
        found.push(Detection::Resolved {
            config: DetectedBuildConfig {
                language: "python".into(),
                language_version: "python-3.12".into(),
                framework: None,
                build_cmd: "pip install -r requirements.txt".into(),
                start_cmd: "python main.py".into(),
            },
        });
    }
    if root.join("pom.xml").exists() {
        found.push(Detection::Resolved {
            config: DetectedBuildConfig {
                language: "java".into(),
                language_version: "java-21".into(),
                framework: Some("maven".into()),
                build_cmd: "mvn -B package".into(),
                start_cmd: "java -jar target/app.jar".into(),
            },
        });
    }

    if found.is_empty() {
        return Err(OrbitError::validation(
            "no recognizable build manifest in repository",
        ));
    }
    if found.len() == 1 {
        return Ok(found.remove(0));
    }

    // More than one runtime: surface every language as a candidate.
    let mut candidates = Vec::new();
    for detection in found {
        match detection {
            Detection::Resolved { config } => candidates.push(config.language_version),
            Detection::Ambiguous { candidates: inner } => candidates.extend(inner),
        }
    }
    candidates.sort();
    candidates.dedup();
    Ok(Detection::Ambiguous { candidates })
}

fn detect_node(root: &Path) -> Result<Detection> {
    let raw = std::fs::read_to_string(root.join("package.json"))?;
    let manifest: serde_json::Value = serde_json::from_str(&raw)
        .map_err(|e| OrbitError::validation(format!("package.json unparsable: {e}")))?;

    let framework = ["next", "express", "fastify", "nest"]
        .iter()
        .find(|name| {
            manifest
                .get("dependencies")
                .and_then(|d| d.get(**name))
                .is_some()
        })
        .map(|name| name.to_string());

    let engine = manifest
        .get("engines")
        .and_then(|e| e.get("node"))
        .and_then(|v| v.as_str());

    match engine.and_then(parse_major) {
        Some(major) => Ok(Detection::Resolved {
            config: node_config(&format!("node-{major}"), framework),
        }),
        None => Ok(Detection::Ambiguous {
            candidates: NODE_CANDIDATES.iter().map(|c| c.to_string()).collect(),
        }),
    }
}

fn detect_go(root: &Path) -> Result<Detection> {
    let raw = std::fs::read_to_string(root.join("go.mod"))?;
    let version = raw
        .lines()
        .find_map(|line| line.trim().strip_prefix("go "))
        .map(|v| v.trim().to_string())
        .unwrap_or_else(|| "1.22".to_string());
    Ok(Detection::Resolved {
        config: DetectedBuildConfig {
            language: "go".into(),
            language_version: format!("go-{version}"),
            framework: None,
            build_cmd: "go build -o app ./...".into(),
            start_cmd: "./app".into(),
        },
    })
}

/// First integer in a semver-ish constraint (`>=18 <21`, `20.x`, `^18.17`).
fn parse_major(constraint: &str) -> Option<u32> {
    let digits: String = constraint
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

/// Configuration for a user-chosen candidate (e.g. `node-20`).
pub fn config_for_candidate(candidate: &str) -> Result<DetectedBuildConfig> {
    let (language, _version) = candidate.split_once('-').ok_or_else(|| {
        OrbitError::validation(format!("malformed build candidate {candidate:?}"))
    })?;
    match language {
        "node" => Ok(node_config(candidate, None)),
        "go" => Ok(DetectedBuildConfig {
            language: "go".into(),
            language_version: candidate.to_string(),
            framework: None,
            build_cmd: "go build -o app ./...".into(),
            start_cmd: "./app".into(),
        }),
        other => Err(OrbitError::validation(format!(
            "unsupported build candidate language {other:?}"
        ))),
    }
}

fn node_config(version: &str, framework: Option<String>) -> DetectedBuildConfig {
    DetectedBuildConfig {
        language: "node".into(),
        language_version: version.to_string(),
        framework,
        build_cmd: "npm ci && npm run build".into(),
        start_cmd: "npm start".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pinned_node_engine_resolves() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("package.json"),
            r#"{"engines": {"node": ">=20"}, "dependencies": {"express": "^4"}}"#,
        )
        .unwrap();

        match detect(dir.path()).unwrap() {
            Detection::Resolved { config } => {
                assert_eq!(config.language_version, "node-20");
                assert_eq!(config.framework.as_deref(), Some("express"));
            }
            other => panic!("expected resolved, got {other:?}"),
        }
    }

    #[test]
    fn unpinned_node_is_ambiguous() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("package.json"), r#"{"name": "x"}"#).unwrap();

        match detect(dir.path()).unwrap() {
            Detection::Ambiguous { candidates } => {
                assert_eq!(candidates, vec!["node-18", "node-20"]);
            }
            other => panic!("expected ambiguous, got {other:?}"),
        }
    }

    #[test]
    fn go_version_is_read_from_mod() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("go.mod"), "module acme/svc\n\ngo 1.23\n").unwrap();

        match detect(dir.path()).unwrap() {
            Detection::Resolved { config } => assert_eq!(config.language_version, "go-1.23"),
            other => panic!("expected resolved, got {other:?}"),
        }
    }

    #[test]
    fn multiple_runtimes_are_ambiguous() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("go.mod"), "module x\n\ngo 1.22\n").unwrap();
        std::fs::write(
            dir.path().join("package.json"),
            r#"{"engines": {"node": "18"}}"#,
        )
        .unwrap();

        match detect(dir.path()).unwrap() {
            Detection::Ambiguous { candidates } => {
                assert!(candidates.contains(&"go-1.22".to_string()));
                assert!(candidates.contains(&"node-18".to_string()));
            }
            other => panic!("expected ambiguous, got {other:?}"),
        }
    }

    #[test]
    fn empty_tree_is_validation() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            detect(dir.path()).unwrap_err().kind,
            orbit_core::ErrorKind::Validation
        );
    }

    #[test]
    fn candidate_resolution() {
        let config = config_for_candidate("node-20").unwrap();
        assert_eq!(config.language_version, "node-20");
        assert!(config_for_candidate("cobol-74").is_err());
        assert!(config_for_candidate("node20").is_err());
    }
}
