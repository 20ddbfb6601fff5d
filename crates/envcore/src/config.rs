//! Configuration recognized by the core: channel list, platform subdir,
//! cache/timeout/concurrency knobs. Mirrors the ambient config convention —
//! a plain struct with `Default`, loadable from `CONDA_*`-prefixed
//! environment variables, with no on-disk file-format parsing.
//!
//! Grounded on `original_source/conda/base/context.py`'s defaults for
//! `repodata_timeout_secs`/worker count/etc., and on the field list in
//! `SPEC_FULL.md` section 6.

use std::env;
use std::path::PathBuf;

/// Plain configuration struct consumed by the fetcher, index builder, and
/// link engine. Not populated from any on-disk YAML/RC file — an outer
/// driver owns that.
#[derive(Debug, Clone)]
pub struct Config {
    pub channels: Vec<String>,
    pub subdir: String,
    pub pkgs_dir: PathBuf,
    pub repodata_timeout_secs: u64,
    pub remote_connect_timeout_secs: u64,
    pub remote_read_timeout_secs: u64,
    pub ssl_verify: bool,
    pub concurrent: bool,
    pub add_pip_as_python_dependency: bool,
    pub channel_alias: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            channels: vec!["defaults".to_string()],
            subdir: default_subdir().to_string(),
            pkgs_dir: default_pkgs_dir(),
            repodata_timeout_secs: 600,
            remote_connect_timeout_secs: 9,
            remote_read_timeout_secs: 60,
            ssl_verify: true,
            concurrent: true,
            add_pip_as_python_dependency: true,
            channel_alias: None,
        }
    }
}

fn default_subdir() -> &'static str {
    match (env::consts::OS, env::consts::ARCH) {
        ("linux", "x86_64") => "linux-64",
        ("linux", "aarch64") => "linux-aarch64",
        ("macos", "x86_64") => "osx-64",
        ("macos", "aarch64") => "osx-arm64",
        ("windows", "x86_64") => "win-64",
        _ => "noarch",
    }
}

fn default_pkgs_dir() -> PathBuf {
    dirs_home().join(".conda").join("pkgs")
}

fn dirs_home() -> PathBuf {
    env::var_os("HOME")
        .or_else(|| env::var_os("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn env_bool(raw: &str) -> bool {
    matches!(raw.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

impl Config {
    /// Loads a `Config` starting from [`Config::default`] and overriding
    /// each field for which a `CONDA_*`-prefixed environment variable is
    /// set. Unset variables leave the default in place.
    pub fn from_env() -> Self {
        let mut config = Config::default();

        if let Ok(raw) = env::var("CONDA_CHANNELS") {
            config.channels = raw.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect();
        }
        if let Ok(raw) = env::var("CONDA_SUBDIR") {
            config.subdir = raw;
        }
        if let Ok(raw) = env::var("CONDA_PKGS_DIRS") {
            if let Some(first) = raw.split(',').next() {
                config.pkgs_dir = PathBuf::from(first);
            }
        }
        if let Ok(raw) = env::var("CONDA_REPODATA_TIMEOUT_SECS") {
            if let Ok(parsed) = raw.parse() {
                config.repodata_timeout_secs = parsed;
            }
        }
        if let Ok(raw) = env::var("CONDA_REMOTE_CONNECT_TIMEOUT_SECS") {
            if let Ok(parsed) = raw.parse() {
                config.remote_connect_timeout_secs = parsed;
            }
        }
        if let Ok(raw) = env::var("CONDA_REMOTE_READ_TIMEOUT_SECS") {
            if let Ok(parsed) = raw.parse() {
                config.remote_read_timeout_secs = parsed;
            }
        }
        if let Ok(raw) = env::var("CONDA_SSL_VERIFY") {
            config.ssl_verify = env_bool(&raw);
        }
        if let Ok(raw) = env::var("CONDA_CONCURRENT") {
            config.concurrent = env_bool(&raw);
        }
        if let Ok(raw) = env::var("CONDA_ADD_PIP_AS_PYTHON_DEPENDENCY") {
            config.add_pip_as_python_dependency = env_bool(&raw);
        }
        if let Ok(raw) = env::var("CONDA_CHANNEL_ALIAS") {
            config.channel_alias = Some(raw);
        }

        config
    }

    pub fn fetch_options(&self) -> envcore_repodata::FetchOptions {
        envcore_repodata::FetchOptions {
            repodata_timeout_secs: self.repodata_timeout_secs,
            remote_connect_timeout_secs: self.remote_connect_timeout_secs,
            remote_read_timeout_secs: self.remote_read_timeout_secs,
            ssl_verify: self.ssl_verify,
            concurrent: self.concurrent,
            channel_alias: self.channel_alias.clone(),
            offline: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_repodata_timeout_is_ten_minutes() {
        let config = Config::default();
        assert_eq!(config.repodata_timeout_secs, 600);
        assert!(config.concurrent);
    }

    #[test]
    fn from_env_overrides_channels() {
        temp_env_var("CONDA_CHANNELS", Some("conda-forge,bioconda"), || {
            let config = Config::from_env();
            assert_eq!(config.channels, vec!["conda-forge", "bioconda"]);
        });
    }

    fn temp_env_var(key: &str, value: Option<&str>, f: impl FnOnce()) {
        let previous = env::var(key).ok();
        match value {
            Some(v) => env::set_var(key, v),
            None => env::remove_var(key),
        }
        f();
        match previous {
            Some(v) => env::set_var(key, v),
            None => env::remove_var(key),
        }
    }
}
