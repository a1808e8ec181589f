//! Configuration file discovery

use std::path::{Path, PathBuf};

/// Configuration file locations, in order of precedence
pub const CONFIG_LOCATIONS: &[&str] = &[
    "./async-test.yaml",
    "./async-test.yml",
    "./async-test.json",
    "./.async-test/config.yaml",
    "~/.config/async-test/config.yaml",
    "~/.async-test.yaml",
];

/// First existing file among [`CONFIG_LOCATIONS`]
pub fn find() -> Option<PathBuf> {
    CONFIG_LOCATIONS
        .iter()
        .map(|location| expand_path(location))
        .find(|path| path.exists())
}

/// Expand a leading `~/` to the home directory
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

pub fn is_yaml_file(path: &Path) -> bool {
    path.extension()
        .map(|e| e == "yaml" || e == "yml")
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_path() {
        assert_eq!(expand_path("./test.yaml"), PathBuf::from("./test.yaml"));

        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_path("~/a.yaml"), home.join("a.yaml"));
        }
    }

    #[test]
    fn test_is_yaml_file() {
        assert!(is_yaml_file(Path::new("config.yml")));
        assert!(is_yaml_file(Path::new("dir/config.yaml")));
        assert!(!is_yaml_file(Path::new("config.json")));
        assert!(!is_yaml_file(Path::new("config")));
    }
}
