//! INI parsing: maps key names onto [`ConfigFile`] fields.

use ini::Ini;
use std::path::PathBuf;
use std::str::FromStr;

use super::defaults::AGENT_CONCURRENCY_CHOICES;
use super::file::ConfigFileError;
use super::settings::ConfigFile;
use crate::job::SUPPORTED_RATIOS;

/// Parse an `Ini` object into a `ConfigFile`.
///
/// Starts from `ConfigFile::default()` and overlays any values found in the INI.
pub(super) fn parse_ini(ini: &Ini) -> Result<ConfigFile, ConfigFileError> {
    let mut config = ConfigFile::default();

    // [store] section
    if let Some(section) = ini.section(Some("store")) {
        if let Some(v) = section.get("directory") {
            let v = v.trim();
            if !v.is_empty() {
                config.store.directory = expand_tilde(v);
            }
        }
    }

    // [agent] section
    if let Some(section) = ini.section(Some("agent")) {
        if let Some(v) = section.get("queue_url") {
            let v = v.trim();
            if !v.starts_with("http://") && !v.starts_with("https://") {
                return Err(invalid("agent", "queue_url", v, "must be an http(s) URL"));
            }
            config.agent.queue_url = v.trim_end_matches('/').to_string();
        }
        if let Some(v) = section.get("worker_id") {
            let v = v.trim();
            if !v.is_empty() {
                config.agent.worker_id = v.to_string();
            }
        }
        if let Some(v) = section.get("poll_interval_ms") {
            config.agent.poll_interval_ms = positive("agent", "poll_interval_ms", v)?;
        }
        if let Some(v) = section.get("progress_interval_secs") {
            config.agent.progress_interval_secs = positive("agent", "progress_interval_secs", v)?;
        }
        if let Some(v) = section.get("concurrency") {
            let n: usize = number("agent", "concurrency", v)?;
            if !AGENT_CONCURRENCY_CHOICES.contains(&n) {
                return Err(invalid(
                    "agent",
                    "concurrency",
                    v,
                    "must be one of: 1, 2, 4, 8, 16, 32",
                ));
            }
            config.agent.concurrency = n;
        }
        if let Some(v) = section.get("tile_concurrency") {
            config.agent.tile_concurrency = positive("agent", "tile_concurrency", v)?;
        }
        if let Some(v) = section.get("ratio") {
            let ratio: u32 = number("agent", "ratio", v)?;
            if !SUPPORTED_RATIOS.contains(&ratio) {
                return Err(invalid("agent", "ratio", v, "must be one of: 1, 2, 4, 8"));
            }
            config.agent.ratio = ratio;
        }
    }

    // [render] section
    if let Some(section) = ini.section(Some("render")) {
        if let Some(v) = section.get("renderer") {
            let v = v.trim();
            if v.is_empty() {
                return Err(invalid("render", "renderer", v, "must not be empty"));
            }
            config.render.renderer = v.to_string();
        }
    }

    // [logging] section
    if let Some(section) = ini.section(Some("logging")) {
        if let Some(v) = section.get("directory") {
            let v = v.trim();
            if !v.is_empty() {
                config.logging.directory = Some(expand_tilde(v));
            }
        }
    }

    Ok(config)
}

fn invalid(section: &str, key: &str, value: &str, reason: &str) -> ConfigFileError {
    ConfigFileError::InvalidValue {
        section: section.to_string(),
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn number<T: FromStr>(section: &str, key: &str, value: &str) -> Result<T, ConfigFileError> {
    value
        .trim()
        .parse()
        .map_err(|_| invalid(section, key, value, "must be a non-negative integer"))
}

fn positive<T>(section: &str, key: &str, value: &str) -> Result<T, ConfigFileError>
where
    T: FromStr + Default + PartialEq,
{
    let n: T = number(section, key, value)?;
    if n == T::default() {
        return Err(invalid(section, key, value, "must be greater than 0"));
    }
    Ok(n)
}

/// Expand a leading `~/` to the home directory.
pub(super) fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn load(content: &str) -> Result<ConfigFile, ConfigFileError> {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.ini");
        std::fs::write(&config_path, content).unwrap();
        ConfigFile::load_from(&config_path)
    }

    #[test]
    fn test_full_config() {
        let config = load(
            r#"
[store]
directory = /srv/store

[agent]
queue_url = http://queue:7081/
worker_id = seeder-1
poll_interval_ms = 250
progress_interval_secs = 5
concurrency = 8
tile_concurrency = 4
ratio = 2

[render]
renderer = render-tile --gl egl

[logging]
directory = /var/log/tileseed
"#,
        )
        .unwrap();

        assert_eq!(config.store.directory, PathBuf::from("/srv/store"));
        assert_eq!(config.agent.queue_url, "http://queue:7081");
        assert_eq!(config.agent.worker_id, "seeder-1");
        assert_eq!(config.agent.poll_interval_ms, 250);
        assert_eq!(config.agent.progress_interval_secs, 5);
        assert_eq!(config.agent.concurrency, 8);
        assert_eq!(config.agent.tile_concurrency, 4);
        assert_eq!(config.agent.ratio, 2);
        assert_eq!(config.render.renderer, "render-tile --gl egl");
        assert_eq!(
            config.logging.directory,
            Some(PathBuf::from("/var/log/tileseed"))
        );
    }

    #[test]
    fn test_partial_config() {
        let config = load(
            r#"
[agent]
ratio = 4
"#,
        )
        .unwrap();

        let default = ConfigFile::default();
        assert_eq!(config.agent.ratio, 4);
        assert_eq!(config.agent.queue_url, default.agent.queue_url);
        assert_eq!(config.store, default.store);
    }

    #[test]
    fn test_invalid_ratio() {
        let err = load("[agent]\nratio = 3\n").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid configuration: agent.ratio = '3' - must be one of: 1, 2, 4, 8"
        );
    }

    #[test]
    fn test_invalid_concurrency() {
        let err = load("[agent]\nconcurrency = 3\n").unwrap_err();
        assert!(err.to_string().contains("agent.concurrency"));

        let err = load("[agent]\nconcurrency = many\n").unwrap_err();
        assert!(err.to_string().contains("non-negative integer"));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let err = load("[agent]\npoll_interval_ms = 0\n").unwrap_err();
        assert!(err.to_string().contains("greater than 0"));
    }

    #[test]
    fn test_invalid_queue_url() {
        let err = load("[agent]\nqueue_url = localhost:7081\n").unwrap_err();
        assert!(err.to_string().contains("queue_url"));
    }

    #[test]
    fn test_expand_tilde() {
        let path = expand_tilde("~/test/path");
        if let Some(home) = dirs::home_dir() {
            assert_eq!(path, home.join("test/path"));
        }

        let path = expand_tilde("/absolute/path");
        assert_eq!(path, PathBuf::from("/absolute/path"));
    }
}
