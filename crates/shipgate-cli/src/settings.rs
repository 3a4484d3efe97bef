use anyhow::Context;
use shipgate_core::config::{Config, CONFIG_FILE};
use std::path::{Path, PathBuf};

/// Locate the config file to use.
///
/// Priority:
/// 1. `--config` flag / `SHIPGATE_CONFIG` env var (passed in as `explicit`)
/// 2. Walk upward from `cwd` looking for `shipgate.yaml`
/// 3. None: built-in defaults apply
pub fn find_config(explicit: Option<&Path>, cwd: &Path) -> Option<PathBuf> {
    if let Some(p) = explicit {
        return Some(p.to_path_buf());
    }
    let mut dir = cwd.to_path_buf();
    loop {
        let candidate = dir.join(CONFIG_FILE);
        if candidate.is_file() {
            return Some(candidate);
        }
        match dir.parent() {
            Some(p) => dir = p.to_path_buf(),
            None => return None,
        }
    }
}

/// The effective config: file (or defaults) with command-line overrides.
pub fn load(explicit: Option<&Path>, api_base: Option<&str>) -> anyhow::Result<Config> {
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let path = find_config(explicit, &cwd);
    let mut config = Config::resolve(path.as_deref(), &cwd)
        .with_context(|| match &path {
            Some(p) => format!("failed to load config from {}", p.display()),
            None => "failed to load config".to_string(),
        })?;
    if let Some(base) = api_base {
        config.api_base = base.to_string();
    }
    Ok(config)
}
