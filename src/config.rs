use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use tracing::{debug, warn};

use crate::models::Page;

#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: PathBuf,
    pub session_path: PathBuf,
    pub page_size: u32,
}

impl Config {
    /// Environment first, then the platform data directory.
    pub fn load() -> Self {
        let data_dir = data_dir();
        Self {
            db_path: path_var("SMARTMATCH_DB").unwrap_or_else(|| data_dir.join("smartmatch.db")),
            session_path: path_var("SMARTMATCH_SESSION")
                .unwrap_or_else(|| data_dir.join("session.json")),
            page_size: try_load("SMARTMATCH_PAGE_SIZE", Page::DEFAULT_LIMIT),
        }
    }

    pub fn with_db_path(mut self, path: Option<PathBuf>) -> Self {
        if let Some(path) = path {
            // Keep the session next to an explicitly chosen database.
            if env::var_os("SMARTMATCH_SESSION").is_none() {
                if let Some(parent) = path.parent() {
                    self.session_path = parent.join("session.json");
                }
            }
            self.db_path = path;
        }
        self
    }

    pub fn page(&self, offset: Option<u32>, limit: Option<u32>) -> Page {
        Page::new(offset.unwrap_or(0), limit.unwrap_or(self.page_size))
    }
}

fn data_dir() -> PathBuf {
    if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "smartmatch") {
        proj_dirs.data_dir().to_path_buf()
    } else {
        PathBuf::from(".")
    }
}

fn path_var(key: &str) -> Option<PathBuf> {
    env::var_os(key)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

fn try_load<T: FromStr + Copy + std::fmt::Display>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("Invalid {key} value '{raw}', using default {default}");
            default
        }),
        Err(_) => {
            debug!("{key} not set, using default: {default}");
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config {
            db_path: PathBuf::from("/data/smartmatch.db"),
            session_path: PathBuf::from("/data/session.json"),
            page_size: 20,
        }
    }

    #[test]
    fn test_page_uses_configured_size() {
        let page = config().page(None, None);
        assert_eq!(page, Page { offset: 0, limit: 20 });

        let page = config().page(Some(40), Some(5));
        assert_eq!(page, Page { offset: 40, limit: 5 });
    }

    #[test]
    fn test_page_limit_never_zero() {
        assert_eq!(config().page(None, Some(0)).limit, 1);
    }

    #[test]
    fn test_db_override_moves_session() {
        if env::var_os("SMARTMATCH_SESSION").is_some() {
            return;
        }
        let cfg = config().with_db_path(Some(PathBuf::from("/tmp/other/market.db")));
        assert_eq!(cfg.db_path, PathBuf::from("/tmp/other/market.db"));
        assert_eq!(cfg.session_path, PathBuf::from("/tmp/other/session.json"));
    }

    #[test]
    fn test_no_override_keeps_paths() {
        let cfg = config().with_db_path(None);
        assert_eq!(cfg.db_path, PathBuf::from("/data/smartmatch.db"));
        assert_eq!(cfg.session_path, PathBuf::from("/data/session.json"));
    }
}
