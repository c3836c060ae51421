use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ServiceError;

/// Default config file name, resolved next to the executable under the service host.
pub const DEFAULT_CONFIG_FILE: &str = "service.config.json";

/// Log file name used when `logFilePath` is empty or relative.
pub const DEFAULT_LOG_FILE: &str = "service.log";

const DEFAULT_LOG_MAX_SIZE_MB: u64 = 100;

/// On‑disk description of the wrapped service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServiceConfig {
    pub name: String,
    pub description: String,
    pub parent_exec_path: String,
    pub child_exec_path: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub child_exec_args: Vec<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub log_file_path: String,
    #[serde(rename = "logFileMaxSizeMB")]
    pub log_file_max_size_mb: u64,
    pub log_file_max_backups: usize,
    pub log_file_max_age_days: u64,
    pub log_file_compress: bool,
}

impl ServiceConfig {
    /// Load a config file; `.toml` files are parsed as TOML, anything else as JSON.
    pub fn load(path: &Path) -> Result<Self, ServiceError> {
        let raw = fs::read_to_string(path).map_err(|e| {
            ServiceError::Config(format!("can not read config file {}: {e}", path.display()))
        })?;

        let parsed = if path.extension().and_then(|s| s.to_str()) == Some("toml") {
            toml::from_str(&raw).map_err(|e| e.to_string())
        } else {
            serde_json::from_str(&raw).map_err(|e| e.to_string())
        };

        parsed.map_err(|e| {
            ServiceError::Config(format!("can not parse config file {}: {e}", path.display()))
        })
    }
}

/// Rotation limits handed to the log sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRotation {
    pub path: PathBuf,
    pub max_bytes: u64,
    /// 0 keeps every backup.
    pub max_backups: usize,
    pub max_age: Option<Duration>,
    pub compress: bool,
}

/// Immutable description of one supervised service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    pub name: String,
    pub description: String,
    pub parent_exec_path: PathBuf,
    pub child_exec_path: PathBuf,
    pub child_exec_args: Vec<String>,
    pub log: LogRotation,
}

impl ServiceDescriptor {
    pub fn from_config(cfg: ServiceConfig) -> Result<Self, ServiceError> {
        if cfg.name.trim().is_empty() {
            return Err(ServiceError::Config("service name must not be empty".into()));
        }
        if cfg.child_exec_path.trim().is_empty() {
            return Err(ServiceError::Config(
                "childExecPath must not be empty".into(),
            ));
        }

        let parent_exec_path = if cfg.parent_exec_path.is_empty() {
            std::env::current_exe().map_err(|e| {
                ServiceError::Config(format!("can not determine current executable: {e}"))
            })?
        } else {
            PathBuf::from(&cfg.parent_exec_path)
        };

        let child_exec_path = PathBuf::from(&cfg.child_exec_path);
        let log_path = resolve_log_path(&cfg.log_file_path, &child_exec_path);

        let max_size_mb = if cfg.log_file_max_size_mb == 0 {
            DEFAULT_LOG_MAX_SIZE_MB
        } else {
            cfg.log_file_max_size_mb
        };

        Ok(Self {
            name: cfg.name,
            description: cfg.description,
            parent_exec_path,
            child_exec_path,
            child_exec_args: cfg.child_exec_args,
            log: LogRotation {
                path: log_path,
                max_bytes: max_size_mb * 1024 * 1024,
                max_backups: cfg.log_file_max_backups,
                max_age: (cfg.log_file_max_age_days > 0)
                    .then(|| Duration::from_secs(cfg.log_file_max_age_days * 24 * 60 * 60)),
                compress: cfg.log_file_compress,
            },
        })
    }

    /// Read and validate a config file in one step.
    pub fn load(path: &Path) -> Result<Self, ServiceError> {
        Self::from_config(ServiceConfig::load(path)?)
    }
}

/// Empty or relative log paths land beside the child executable.
pub fn resolve_log_path(configured: &str, child_exec_path: &Path) -> PathBuf {
    let configured = Path::new(configured);
    if configured.as_os_str().is_empty() || !configured.is_absolute() {
        let dir = child_exec_path.parent().unwrap_or_else(|| Path::new(""));
        return dir.join(DEFAULT_LOG_FILE);
    }
    configured.to_path_buf()
}

/// Resolve a relative config path against the running executable's directory.
///
/// The service host starts processes in the system directory, so a bare file
/// name would otherwise never be found.
pub fn resolve_beside_exe(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    match std::env::current_exe() {
        Ok(exe) => exe
            .parent()
            .map(|dir| dir.join(path))
            .unwrap_or_else(|| path.to_path_buf()),
        Err(e) => {
            log::warn!("Could not determine executable directory: {e}");
            path.to_path_buf()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ServiceConfig {
        ServiceConfig {
            name: "test_service".into(),
            description: "Test service".into(),
            parent_exec_path: "/opt/svc/svcwrap".into(),
            child_exec_path: "/opt/app/server".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_log_path_defaults_beside_child() {
        let d = ServiceDescriptor::from_config(sample()).unwrap();
        assert_eq!(d.log.path, PathBuf::from("/opt/app").join(DEFAULT_LOG_FILE));
    }

    #[test]
    fn test_relative_log_path_is_ignored() {
        let mut cfg = sample();
        cfg.log_file_path = "logs/custom.log".into();
        let d = ServiceDescriptor::from_config(cfg).unwrap();
        assert_eq!(d.log.path, PathBuf::from("/opt/app").join(DEFAULT_LOG_FILE));
    }

    #[cfg(unix)]
    #[test]
    fn test_absolute_log_path_is_kept() {
        let mut cfg = sample();
        cfg.log_file_path = "/var/log/custom.log".into();
        let d = ServiceDescriptor::from_config(cfg).unwrap();
        assert_eq!(d.log.path, PathBuf::from("/var/log/custom.log"));
    }

    #[test]
    fn test_rotation_defaults() {
        let d = ServiceDescriptor::from_config(sample()).unwrap();
        assert_eq!(d.log.max_bytes, 100 * 1024 * 1024);
        assert_eq!(d.log.max_backups, 0);
        assert_eq!(d.log.max_age, None);
        assert!(!d.log.compress);
    }

    #[test]
    fn test_rotation_limits_from_config() {
        let mut cfg = sample();
        cfg.log_file_max_size_mb = 5;
        cfg.log_file_max_backups = 3;
        cfg.log_file_max_age_days = 2;
        cfg.log_file_compress = true;
        let d = ServiceDescriptor::from_config(cfg).unwrap();
        assert_eq!(d.log.max_bytes, 5 * 1024 * 1024);
        assert_eq!(d.log.max_backups, 3);
        assert_eq!(d.log.max_age, Some(Duration::from_secs(2 * 86_400)));
        assert!(d.log.compress);
    }

    #[test]
    fn test_empty_parent_defaults_to_current_exe() {
        let mut cfg = sample();
        cfg.parent_exec_path.clear();
        let d = ServiceDescriptor::from_config(cfg).unwrap();
        assert_eq!(d.parent_exec_path, std::env::current_exe().unwrap());
    }

    #[test]
    fn test_missing_name_rejected() {
        let mut cfg = sample();
        cfg.name = "  ".into();
        assert!(matches!(
            ServiceDescriptor::from_config(cfg),
            Err(ServiceError::Config(_))
        ));
    }

    #[test]
    fn test_missing_child_rejected() {
        let mut cfg = sample();
        cfg.child_exec_path.clear();
        assert!(matches!(
            ServiceDescriptor::from_config(cfg),
            Err(ServiceError::Config(_))
        ));
    }

    #[test]
    fn test_load_json_camel_case() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_CONFIG_FILE);
        fs::write(
            &path,
            r#"{
                "name": "svc",
                "description": "demo",
                "parentExecPath": "/bin/parent",
                "childExecPath": "/bin/child",
                "childExecArgs": ["--port", "8080"],
                "logFileMaxSizeMB": 10,
                "logFileMaxBackups": 2,
                "logFileCompress": true
            }"#,
        )
        .unwrap();

        let cfg = ServiceConfig::load(&path).unwrap();
        assert_eq!(cfg.name, "svc");
        assert_eq!(cfg.child_exec_args, vec!["--port", "8080"]);
        assert_eq!(cfg.log_file_max_size_mb, 10);
        assert_eq!(cfg.log_file_max_backups, 2);
        assert_eq!(cfg.log_file_max_age_days, 0);
        assert!(cfg.log_file_compress);
    }

    #[test]
    fn test_load_toml_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("service.toml");
        fs::write(
            &path,
            "name = \"svc\"\nchildExecPath = \"/bin/child\"\nlogFileMaxAgeDays = 7\n",
        )
        .unwrap();

        let cfg = ServiceConfig::load(&path).unwrap();
        assert_eq!(cfg.name, "svc");
        assert_eq!(cfg.child_exec_path, "/bin/child");
        assert_eq!(cfg.log_file_max_age_days, 7);
    }

    #[test]
    fn test_load_reports_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, "{ not json").unwrap();
        let err = ServiceConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains("can not parse config file"));
    }

    #[test]
    fn test_load_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = ServiceConfig::load(&dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, ServiceError::Config(_)));
    }
}
