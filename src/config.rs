//! Server configuration and bundle roster loading (component K).
//!
//! Grounded in `config.c` (server.ini: `[Server] imagebase/outputdir/emptydir/
//! initialversion`) and `groups.c` (groups.ini: one `[bundle-name]` section per
//! bundle, each carrying a `status` key and, optionally, an `include=` list).
//! The original reads both through glib's `GKeyFile`; this crate uses the
//! `ini` crate for the same job.

use std::path::{Path, PathBuf};

use ini::Ini;

use crate::error::{ConfigLoadSnafu, ConfigMissingKeySnafu, Result};
use snafu::{OptionExt, ResultExt};

/// `[Server]` section of `server.ini`.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub image_base: PathBuf,
    pub output_dir: PathBuf,
    pub empty_dir: PathBuf,
    pub initial_version: u32,
}

impl ServerConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let ini = Ini::load_from_file(path).context(ConfigLoadSnafu { path })?;
        let section = ini.section(Some("Server"));

        let get = |key: &str| -> Result<String> {
            section
                .and_then(|s| s.get(key))
                .map(|s| s.to_string())
                .context(ConfigMissingKeySnafu {
                    path,
                    section: "Server",
                    key,
                })
        };

        let initial_version = section
            .and_then(|s| s.get("initialversion"))
            .map(|v| v.parse::<u32>().unwrap_or(0))
            .unwrap_or(0);

        Ok(ServerConfig {
            image_base: PathBuf::from(get("imagebase")?),
            output_dir: PathBuf::from(get("outputdir")?),
            empty_dir: PathBuf::from(get("emptydir")?),
            initial_version,
        })
    }
}

/// One `[bundle-name]` section of `groups.ini`.
#[derive(Debug, Clone)]
pub struct BundleEntry {
    pub name: String,
    pub status: String,
    pub includes: Vec<String>,
}

/// The full bundle roster read from `groups.ini`.
#[derive(Debug, Clone, Default)]
pub struct GroupRoster {
    bundles: Vec<BundleEntry>,
}

impl GroupRoster {
    pub fn load(path: &Path) -> Result<Self> {
        let ini = Ini::load_from_file(path).context(ConfigLoadSnafu { path })?;
        let mut bundles = Vec::new();

        for (section, props) in ini.iter() {
            let name = match section {
                Some(name) => name.to_string(),
                None => continue,
            };
            let status = props.get("status").unwrap_or("active").to_string();
            let includes = props
                .get("include")
                .map(|v| {
                    v.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_default();
            bundles.push(BundleEntry {
                name,
                status,
                includes,
            });
        }

        Ok(GroupRoster { bundles })
    }

    pub fn bundles(&self) -> &[BundleEntry] {
        &self.bundles
    }

    pub fn find(&self, name: &str) -> Option<&BundleEntry> {
        self.bundles.iter().find(|b| b.name == name)
    }

    pub fn is_active(&self, name: &str) -> bool {
        self.find(name)
            .map(|b| b.status != "disabled")
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_server_section() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            f,
            "[Server]\nimagebase=/image\noutputdir=/out\nemptydir=/empty\ninitialversion=10\n"
        )
        .unwrap();
        let cfg = ServerConfig::load(f.path()).unwrap();
        assert_eq!(PathBuf::from("/image"), cfg.image_base);
        assert_eq!(10, cfg.initial_version);
    }

    #[test]
    fn loads_bundle_roster() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "[os-core]\nstatus=active\n\n[os-core-update]\nstatus=active\ninclude=os-core\n").unwrap();
        let roster = GroupRoster::load(f.path()).unwrap();
        assert_eq!(2, roster.bundles().len());
        let update = roster.find("os-core-update").unwrap();
        assert_eq!(vec!["os-core".to_string()], update.includes);
        assert!(roster.is_active("os-core"));
    }
}
