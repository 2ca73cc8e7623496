//! Fragment discovery and parsing for one pool.
//!
//! A pool directory holds `*.json` fragments. Each fragment is folded into
//! the pool tree in file-name order. A fragment `topic.json` can be extended
//! by a sibling directory `topic/`, whose fragments fold into the subtree at
//! key `topic`, to any depth:
//!
//! ```text
//! config/framework/site.json            -> {site: ...}
//! config/framework/layout.json          -> tree root
//! config/framework/layout/routes.json   -> tree["layout"]
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tracing::{debug, warn};
use walkdir::WalkDir;

use super::merge::merge_into;
use super::{ConfigError, ConfigResult};

/// Fragment file extension.
pub const FRAGMENT_EXTENSION: &str = "json";

/// Load every fragment of the pool rooted at `pool_root`.
///
/// A missing pool directory is always an error. Unreadable or malformed
/// fragments are errors in strict mode and skipped otherwise.
pub fn load_pool(pool_root: &Path, strict: bool) -> ConfigResult<Value> {
    if !pool_root.is_dir() {
        return Err(ConfigError::SourceMissing {
            pool: pool_name(pool_root),
            path: pool_root.to_path_buf(),
        });
    }

    let loader = FragmentLoader { strict };
    let mut tree = Value::Object(Map::new());
    loader.load_directory(pool_root, &mut tree, true)?;
    Ok(tree)
}

/// List the pool directories under `config_dir`, in name order.
pub fn discover_pools(config_dir: &Path) -> ConfigResult<Vec<String>> {
    let mut pools = Vec::new();
    for entry in WalkDir::new(config_dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| ConfigError::Io {
            path: config_dir.to_path_buf(),
            reason: e.to_string(),
        })?;
        if entry.file_type().is_dir() {
            pools.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    Ok(pools)
}

struct FragmentLoader {
    strict: bool,
}

impl FragmentLoader {
    fn load_directory(&self, dir: &Path, node: &mut Value, is_pool_root: bool) -> ConfigResult<()> {
        for fragment in fragment_files(dir)? {
            let Some(contents) = self.parse(&fragment, is_pool_root)? else {
                continue;
            };
            debug!(path = %fragment.display(), "merging config fragment");
            merge_into(node, contents);

            let Some(stem) = fragment.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
                continue;
            };
            let extension_dir = dir.join(&stem);
            if !extension_dir.is_dir() {
                continue;
            }
            match subtree_mut(node, &stem) {
                Some(subtree) => self.load_directory(&extension_dir, subtree, false)?,
                None => warn!(
                    path = %extension_dir.display(),
                    "extension directory under a sequence has no key to extend, skipping"
                ),
            }
        }
        Ok(())
    }

    /// Read one fragment. `Ok(None)` means it was skipped in non-strict mode.
    fn parse(&self, path: &Path, is_pool_root: bool) -> ConfigResult<Option<Value>> {
        let parsed = fs::read_to_string(path)
            .map_err(|e| e.to_string())
            .and_then(|raw| serde_json::from_str::<Value>(&raw).map_err(|e| e.to_string()))
            .and_then(|value| match value {
                Value::Object(_) => Ok(value),
                Value::Array(_) if !is_pool_root => Ok(value),
                Value::Array(_) => Err("pool-level fragment must be a JSON object".to_string()),
                _ => Err("fragment must be a JSON object or array".to_string()),
            });

        match parsed {
            Ok(value) => Ok(Some(value)),
            Err(reason) if self.strict => Err(ConfigError::Parse {
                path: path.to_path_buf(),
                reason,
            }),
            Err(reason) => {
                warn!(path = %path.display(), %reason, "skipping config fragment");
                Ok(None)
            }
        }
    }
}

/// `*.json` files directly inside `dir`, sorted by file name.
fn fragment_files(dir: &Path) -> ConfigResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| ConfigError::Io {
            path: dir.to_path_buf(),
            reason: e.to_string(),
        })?;
        let path = entry.path();
        let is_fragment = path
            .extension()
            .is_some_and(|ext| ext == FRAGMENT_EXTENSION);
        if is_fragment && !entry.file_type().is_dir() {
            files.push(path.to_path_buf());
        }
    }
    Ok(files)
}

/// Child container at `key` of a record node, created as an empty record
/// when absent or scalar. Sequences have no keys to extend.
fn subtree_mut<'a>(node: &'a mut Value, key: &str) -> Option<&'a mut Value> {
    let record = node.as_object_mut()?;
    let child = record
        .entry(key.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    if !(child.is_object() || child.is_array()) {
        *child = Value::Object(Map::new());
    }
    Some(child)
}

fn pool_name(pool_root: &Path) -> String {
    pool_root
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| pool_root.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn write(dir: &Path, rel: &str, contents: &str) {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn test_missing_pool_is_always_fatal() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("user");

        for strict in [false, true] {
            let err = load_pool(&missing, strict).unwrap_err();
            assert!(
                matches!(&err, ConfigError::SourceMissing { pool, .. } if pool == "user"),
                "unexpected error: {err}"
            );
        }
    }

    #[test]
    fn test_fragments_merge_in_name_order() {
        let temp_dir = TempDir::new().unwrap();
        write(temp_dir.path(), "b.json", r#"{"site": {"title": "from b"}}"#);
        write(temp_dir.path(), "a.json", r#"{"site": {"title": "from a", "locale": "en"}}"#);

        let tree = load_pool(temp_dir.path(), true).unwrap();

        assert_eq!(tree, json!({"site": {"title": "from b", "locale": "en"}}));
    }

    #[test]
    fn test_extension_directory_merges_into_subtree() {
        let temp_dir = TempDir::new().unwrap();
        write(temp_dir.path(), "layout.json", r#"{"layout": {"base": {"template": "1col"}}}"#);
        write(
            temp_dir.path(),
            "layout/routes.json",
            r#"{"routes": [{"name": "home", "template": "2col"}]}"#,
        );
        write(
            temp_dir.path(),
            "layout/routes/extra.json",
            r#"[{"name": "home", "title": "Home"}, {"name": "blog"}]"#,
        );

        let tree = load_pool(temp_dir.path(), true).unwrap();

        assert_eq!(tree["layout"]["base"]["template"], "1col");
        assert_eq!(
            tree["layout"]["routes"],
            json!([
                {"name": "home", "template": "2col", "title": "Home"},
                {"name": "blog"}
            ])
        );
    }

    #[test]
    fn test_extension_of_sequence_fragment() {
        let temp_dir = TempDir::new().unwrap();
        write(temp_dir.path(), "menus.json", r#"{"menus": [{"name": "main"}]}"#);
        write(temp_dir.path(), "menus/footer.json", r#"[{"name": "footer"}]"#);

        let tree = load_pool(temp_dir.path(), true).unwrap();

        assert_eq!(tree["menus"], json!([{"name": "main"}, {"name": "footer"}]));
    }

    #[test]
    fn test_directory_without_fragment_is_ignored() {
        let temp_dir = TempDir::new().unwrap();
        write(temp_dir.path(), "site.json", r#"{"site": {"title": "x"}}"#);
        write(temp_dir.path(), "orphan/extra.json", r#"{"orphan": true}"#);

        let tree = load_pool(temp_dir.path(), true).unwrap();

        assert_eq!(tree, json!({"site": {"title": "x"}}));
    }

    #[test]
    fn test_non_json_files_are_ignored() {
        let temp_dir = TempDir::new().unwrap();
        write(temp_dir.path(), "site.json", r#"{"site": 1}"#);
        write(temp_dir.path(), "notes.txt", "not config");

        assert_eq!(load_pool(temp_dir.path(), true).unwrap(), json!({"site": 1}));
    }

    #[test]
    fn test_malformed_fragment_depends_on_mode() {
        let temp_dir = TempDir::new().unwrap();
        write(temp_dir.path(), "a.json", r#"{"a": 1}"#);
        write(temp_dir.path(), "b.json", "{broken");
        write(temp_dir.path(), "c.json", "42");

        let lenient = load_pool(temp_dir.path(), false).unwrap();
        assert_eq!(lenient, json!({"a": 1}));

        let err = load_pool(temp_dir.path(), true).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { ref path, .. } if path.ends_with("b.json")));
    }

    #[test]
    fn test_pool_level_array_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        write(temp_dir.path(), "list.json", "[1, 2]");

        assert!(matches!(
            load_pool(temp_dir.path(), true),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_discover_pools_sorted() {
        let temp_dir = TempDir::new().unwrap();
        fs::create_dir(temp_dir.path().join("user")).unwrap();
        fs::create_dir(temp_dir.path().join("framework")).unwrap();
        write(temp_dir.path(), "stray.json", "{}");

        assert_eq!(
            discover_pools(temp_dir.path()).unwrap(),
            vec!["framework".to_string(), "user".to_string()]
        );
    }
}
