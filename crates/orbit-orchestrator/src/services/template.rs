//! Template-variable substitution over a checked-out file tree.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex_lite::Regex;
use serde::{Deserialize, Serialize};

use orbit_core::{OrbitError, Result};

/// `{{ key }}` with optional inner whitespace.
static TOKEN_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").unwrap());

static KEY_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());

/// Bytes scanned for the binary heuristic.
const BINARY_SNIFF_LEN: usize = 8192;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppliedStats {
    pub files_rewritten: u32,
    pub files_skipped_binary: u32,
}

/// Reject malformed variable keys before any file is touched.
pub fn validate_variable_keys(variables: &BTreeMap<String, String>) -> Result<()> {
    for key in variables.keys() {
        if !KEY_PATTERN.is_match(key) {
            return Err(OrbitError::validation(format!(
                "variable key {key:?} is not a valid identifier"
            )));
        }
    }
    Ok(())
}

/// Rewrite every text file under `root` in place. Unknown tokens fail the
/// whole application; binary files (null byte in the sniff window) are
/// left verbatim. The `.git` directory is never touched.
pub fn apply_variables(root: &Path, variables: &BTreeMap<String, String>) -> Result<AppliedStats> {
    validate_variable_keys(variables)?;
    let mut stats = AppliedStats::default();
    let mut files = Vec::new();
    collect_files(root, &mut files)?;
    files.sort();

    for path in files {
        let bytes = std::fs::read(&path)?;
        if looks_binary(&bytes) {
            stats.files_skipped_binary += 1;
            continue;
        }
        let Ok(text) = String::from_utf8(bytes) else {
            stats.files_skipped_binary += 1;
            continue;
        };

        let mut unbound: Option<String> = None;
        for capture in TOKEN_PATTERN.captures_iter(&text) {
            let name = &capture[1];
            if !variables.contains_key(name) {
                unbound = Some(name.to_string());
                break;
            }
        }
        if let Some(name) = unbound {
            let rel = path.strip_prefix(root).unwrap_or(&path).display().to_string();
            return Err(OrbitError::validation(format!(
                "unbound template variable {name} in {rel}"
            ))
            .with_code("UNBOUND_VARIABLE"));
        }

        let rewritten = TOKEN_PATTERN.replace_all(&text, |caps: &regex_lite::Captures<'_>| {
            variables[&caps[1]].clone()
        });
        if rewritten != text {
            std::fs::write(&path, rewritten.as_bytes())?;
            stats.files_rewritten += 1;
        }
    }
    Ok(stats)
}

fn looks_binary(bytes: &[u8]) -> bool {
    bytes.iter().take(BINARY_SNIFF_LEN).any(|b| *b == 0)
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            if entry.file_name() == ".git" {
                continue;
            }
            collect_files(&path, out)?;
        } else {
            out.push(path);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn substitutes_tokens_across_tree() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("cmd")).unwrap();
        std::fs::write(
            dir.path().join("README.md"),
            "# {{ service_name }}\nby {{owner}}\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("cmd/main.go"), "// {{ service_name }}\n").unwrap();

        let stats = apply_variables(
            dir.path(),
            &vars(&[("service_name", "payments"), ("owner", "acme")]),
        )
        .unwrap();

        assert_eq!(stats.files_rewritten, 2);
        let readme = std::fs::read_to_string(dir.path().join("README.md")).unwrap();
        assert_eq!(readme, "# payments\nby acme\n");
    }

    #[test]
    fn unbound_token_names_path_and_variable() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("conf.yaml"), "name: {{ mystery }}\n").unwrap();

        let err = apply_variables(dir.path(), &vars(&[("known", "x")])).unwrap_err();
        assert_eq!(err.code_str(), "UNBOUND_VARIABLE");
        assert!(err.message.contains("mystery"));
        assert!(err.message.contains("conf.yaml"));
    }

    #[test]
    fn binary_files_are_copied_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let blob = [0x7fu8, b'E', b'L', b'F', 0x00, 0x01, b'{', b'{'];
        std::fs::write(dir.path().join("asset.bin"), blob).unwrap();

        let stats = apply_variables(dir.path(), &vars(&[("service_name", "x")])).unwrap();
        assert_eq!(stats.files_skipped_binary, 1);
        assert_eq!(std::fs::read(dir.path().join("asset.bin")).unwrap(), blob);
    }

    #[test]
    fn git_dir_is_untouched() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join(".git")).unwrap();
        std::fs::write(dir.path().join(".git/config"), "url = {{ nope }}\n").unwrap();

        apply_variables(dir.path(), &vars(&[("service_name", "x")])).unwrap();
        let config = std::fs::read_to_string(dir.path().join(".git/config")).unwrap();
        assert!(config.contains("{{ nope }}"));
    }

    #[test]
    fn bad_variable_keys_are_rejected() {
        let err = validate_variable_keys(&vars(&[("bad key", "v")])).unwrap_err();
        assert_eq!(err.kind, orbit_core::ErrorKind::Validation);
        assert!(validate_variable_keys(&vars(&[("good_key", "v")])).is_ok());
    }
}
