//! Spec file loading: JSON or YAML, one spec or a list per document.

use std::path::Path;

use anyhow::{bail, Context, Result};
use graphop_core::DesiredGraphSpec;
use metrics::counter;
use serde::Deserialize;
use tracing::debug;

pub const DEFAULT_MAX_SPEC_BYTES: u64 = 1024 * 1024;

pub fn max_spec_bytes() -> u64 {
    std::env::var("GRAPHOP_MAX_SPEC_BYTES").ok().and_then(|s| s.parse::<u64>().ok()).unwrap_or(DEFAULT_MAX_SPEC_BYTES)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    Many(Vec<DesiredGraphSpec>),
    One(Box<DesiredGraphSpec>),
}

impl OneOrMany {
    fn into_vec(self) -> Vec<DesiredGraphSpec> {
        match self {
            OneOrMany::Many(v) => v,
            OneOrMany::One(s) => vec![*s],
        }
    }
}

fn is_json(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()).map(|e| e.eq_ignore_ascii_case("json")).unwrap_or(false)
}

/// Parse specs from text. `.json` files go through serde_json; anything
/// else is read as (possibly multi-document) YAML.
pub fn parse_specs(text: &str, json: bool) -> Result<Vec<DesiredGraphSpec>> {
    if json {
        let v: OneOrMany = serde_json::from_str(text).context("parsing JSON spec")?;
        return Ok(v.into_vec());
    }
    let mut out = Vec::new();
    for doc in serde_yaml::Deserializer::from_str(text) {
        let v = OneOrMany::deserialize(doc).context("parsing YAML spec")?;
        out.extend(v.into_vec());
    }
    Ok(out)
}

pub fn load_file(path: &Path, max_bytes: u64) -> Result<Vec<DesiredGraphSpec>> {
    let len = std::fs::metadata(path).with_context(|| format!("stat {}", path.display()))?.len();
    if len > max_bytes {
        bail!("{} is {} bytes; limit is {} (GRAPHOP_MAX_SPEC_BYTES)", path.display(), len, max_bytes);
    }
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let specs = parse_specs(&text, is_json(path)).with_context(|| format!("in {}", path.display()))?;
    counter!("spec_files_loaded_total").increment(1);
    debug!(file = %path.display(), specs = specs.len(), "loaded spec file");
    Ok(specs)
}

/// Load every file in order; the first failure aborts.
pub fn load_all<P: AsRef<Path>>(paths: &[P]) -> Result<Vec<DesiredGraphSpec>> {
    let max = max_spec_bytes();
    let mut out = Vec::new();
    for p in paths {
        out.extend(load_file(p.as_ref(), max)?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn tmp(name: &str, body: &str) -> PathBuf {
        let p = std::env::temp_dir().join(format!("graphopctl-{}-{}", std::process::id(), name));
        std::fs::write(&p, body).unwrap();
        p
    }

    const YAML_ONE: &str = r#"
environmentId: env-1
buildId: b1
components:
  - packageName: users-api
    artifactHash: abc
    runtime:
      replicas: 2
      env:
        LOG_LEVEL: debug
ingress:
  host: env-1.preview.example.com
  routes:
    - path: /users
      targetComponent: users-api
      targetPort: 8080
"#;

    #[test]
    fn yaml_single_spec() {
        let specs = parse_specs(YAML_ONE, false).unwrap();
        assert_eq!(specs.len(), 1);
        let s = &specs[0];
        assert_eq!(s.environment_id, "env-1");
        assert_eq!(s.components[0].runtime.replicas, 2);
        assert_eq!(s.components[0].runtime.env.get("LOG_LEVEL").map(String::as_str), Some("debug"));
        assert_eq!(s.ingress.routes[0].target_port, 8080);
    }

    #[test]
    fn yaml_list_and_multi_document() {
        let text = "- environmentId: a\n  buildId: b1\n- environmentId: b\n  buildId: b1\n---\nenvironmentId: c\nbuildId: b2\n";
        let ids: Vec<String> = parse_specs(text, false).unwrap().into_iter().map(|s| s.environment_id).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn json_single_and_list() {
        let one = parse_specs(r#"{"environmentId":"a","buildId":"b"}"#, true).unwrap();
        assert_eq!(one.len(), 1);
        let many = parse_specs(r#"[{"environmentId":"a","buildId":"b"},{"environmentId":"b","buildId":"b"}]"#, true).unwrap();
        assert_eq!(many.len(), 2);
        assert!(parse_specs("{not json", true).is_err());
    }

    #[test]
    fn load_file_picks_format_by_extension() {
        let p = tmp("one.json", r#"{"environmentId":"j","buildId":"b"}"#);
        let specs = load_file(&p, DEFAULT_MAX_SPEC_BYTES).unwrap();
        assert_eq!(specs[0].environment_id, "j");
        let _ = std::fs::remove_file(&p);

        let p = tmp("one.yaml", YAML_ONE);
        assert_eq!(load_file(&p, DEFAULT_MAX_SPEC_BYTES).unwrap()[0].environment_id, "env-1");
        let _ = std::fs::remove_file(&p);
    }

    #[test]
    fn oversized_file_is_rejected() {
        let p = tmp("big.yaml", YAML_ONE);
        let err = load_file(&p, 16).unwrap_err().to_string();
        assert!(err.contains("limit is 16"), "err={}", err);
        let _ = std::fs::remove_file(&p);
    }
}
