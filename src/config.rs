//! Startup configuration: an optional TOML file plus environment overrides.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::grading::{Band, GradeScale, ScaleError};

const DEFAULT_DB_FILE: &str = "school.sqlite3";
const DEFAULT_LOG_FILTER: &str = "warn";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("unable to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid grading scale: {0}")]
    Grading(#[from] ScaleError),
    #[error("--config needs a path")]
    MissingConfigArg,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    database_path: Option<PathBuf>,
    log_filter: Option<String>,
    admin: Option<AdminFile>,
    grading: Option<GradingFile>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct AdminFile {
    id: Option<String>,
    email: Option<String>,
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct GradingFile {
    bands: Vec<Band>,
}

/// The ADMIN account ensured at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminSeed {
    pub id: String,
    pub email: String,
    pub name: String,
}

impl Default for AdminSeed {
    fn default() -> Self {
        Self {
            id: "admin".to_string(),
            email: "admin@school.local".to_string(),
            name: "Administrator".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: PathBuf,
    pub log_filter: String,
    pub admin: AdminSeed,
    pub grading: GradeScale,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from(DEFAULT_DB_FILE),
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            admin: AdminSeed::default(),
            grading: GradeScale::default(),
        }
    }
}

impl Config {
    /// Reads `--config <path>` / `SCHOOLD_CONFIG`, then applies `SCHOOLD_*` overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let path = config_path_from_args(std::env::args().skip(1))?
            .or_else(|| std::env::var_os("SCHOOLD_CONFIG").map(PathBuf::from));
        Self::from_sources(path.as_deref(), |k| std::env::var(k).ok())
    }

    pub fn from_sources<F>(path: Option<&Path>, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let file = match path {
            Some(p) => {
                let text = std::fs::read_to_string(p).map_err(|source| ConfigError::Read {
                    path: p.to_path_buf(),
                    source,
                })?;
                toml::from_str::<ConfigFile>(&text).map_err(|source| ConfigError::Parse {
                    path: p.to_path_buf(),
                    source,
                })?
            }
            None => ConfigFile::default(),
        };

        let mut c = Self::default();
        if let Some(p) = file.database_path {
            c.database_path = p;
        }
        if let Some(admin) = file.admin {
            if let Some(v) = admin.id {
                c.admin.id = v;
            }
            if let Some(v) = admin.email {
                c.admin.email = v;
            }
            if let Some(v) = admin.name {
                c.admin.name = v;
            }
        }
        if let Some(g) = file.grading {
            c.grading = GradeScale::new(g.bands)?;
        }

        if let Some(v) = env("SCHOOLD_DB_PATH") {
            c.database_path = PathBuf::from(v);
        }
        if let Some(v) = env("SCHOOLD_ADMIN_ID") {
            c.admin.id = v;
        }
        c.log_filter = env("SCHOOLD_LOG")
            .or(file.log_filter)
            .or_else(|| env("RUST_LOG"))
            .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());

        Ok(c)
    }
}

fn config_path_from_args<I>(mut args: I) -> Result<Option<PathBuf>, ConfigError>
where
    I: Iterator<Item = String>,
{
    while let Some(a) = args.next() {
        if a == "--config" {
            return args
                .next()
                .map(|p| Some(PathBuf::from(p)))
                .ok_or(ConfigError::MissingConfigArg);
        }
        if let Some(p) = a.strip_prefix("--config=") {
            return Ok(Some(PathBuf::from(p)));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn defaults_without_file_or_env() {
        let c = Config::from_sources(None, no_env).unwrap();
        assert_eq!(c.database_path, PathBuf::from("school.sqlite3"));
        assert_eq!(c.log_filter, "warn");
        assert_eq!(c.admin, AdminSeed::default());
        assert_eq!(c.grading.label(85.0), "B");
    }

    #[test]
    fn file_values_then_env_overrides() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(
            f,
            r#"
database_path = "/tmp/from-file.sqlite3"
log_filter = "info"

[admin]
id = "root"
email = "root@example.org"

[[grading.bands]]
min = 50
label = "PASS"

[[grading.bands]]
min = 0
label = "FAIL"
"#
        )
        .unwrap();

        let c = Config::from_sources(Some(f.path()), no_env).unwrap();
        assert_eq!(c.database_path, PathBuf::from("/tmp/from-file.sqlite3"));
        assert_eq!(c.log_filter, "info");
        assert_eq!(c.admin.id, "root");
        assert_eq!(c.admin.email, "root@example.org");
        assert_eq!(c.admin.name, "Administrator");
        assert_eq!(c.grading.label(55.0), "PASS");

        let env: HashMap<&str, &str> = [
            ("SCHOOLD_DB_PATH", "/tmp/env.sqlite3"),
            ("SCHOOLD_LOG", "debug"),
            ("SCHOOLD_ADMIN_ID", "boss"),
        ]
        .into_iter()
        .collect();
        let c = Config::from_sources(Some(f.path()), |k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(c.database_path, PathBuf::from("/tmp/env.sqlite3"));
        assert_eq!(c.log_filter, "debug");
        assert_eq!(c.admin.id, "boss");
    }

    #[test]
    fn rust_log_is_last_resort() {
        let c = Config::from_sources(None, |k| (k == "RUST_LOG").then(|| "trace".to_string())).unwrap();
        assert_eq!(c.log_filter, "trace");
    }

    #[test]
    fn bad_grading_scale_is_rejected() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(f, "[[grading.bands]]\nmin = 40\nlabel = \"P\"\n").unwrap();
        let e = Config::from_sources(Some(f.path()), no_env).unwrap_err();
        assert!(matches!(e, ConfigError::Grading(ScaleError::NoFloor)), "got {e}");
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(f, "databse_path = \"x\"\n").unwrap();
        let e = Config::from_sources(Some(f.path()), no_env).unwrap_err();
        assert!(matches!(e, ConfigError::Parse { .. }), "got {e}");
    }

    #[test]
    fn config_arg_forms() {
        let args = |v: &[&str]| v.iter().map(|s| s.to_string()).collect::<Vec<_>>().into_iter();
        assert_eq!(config_path_from_args(args(&[])).unwrap(), None);
        assert_eq!(
            config_path_from_args(args(&["--config", "a.toml"])).unwrap(),
            Some(PathBuf::from("a.toml"))
        );
        assert_eq!(
            config_path_from_args(args(&["--config=b.toml"])).unwrap(),
            Some(PathBuf::from("b.toml"))
        );
        assert!(config_path_from_args(args(&["--config"])).is_err());
    }
}
