//! Migration configuration from YAML

use crate::core::error::ConfigError;
use crate::execution::backoff::Backoff;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file, looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "bak2cloud.yaml";

/// Environment variable overriding the configuration location
pub const CONFIG_ENV_VAR: &str = "BAK2CLOUD_CONFIG";

/// Loads configuration from a file
pub struct ConfigSource;

impl ConfigSource {
    /// Load and validate configuration from `path`
    pub fn load<P: AsRef<Path>>(path: P) -> Result<MigrationConfig, ConfigError> {
        MigrationConfig::from_file(path)
    }

    /// The configuration path used when none is given on the command line
    pub fn default_path() -> PathBuf {
        std::env::var_os(CONFIG_ENV_VAR)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
    }
}

/// A secret string that never prints its value
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Secret(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// SQL login used against a server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: Secret,
}

/// Stages the pipeline knows how to build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StageKey {
    Authenticate,
    UploadBackup,
    AwaitStaging,
    RestoreToStaging,
    ExportPackage,
    ArchivePackage,
    DownloadPackage,
    ImportToTarget,
    CleanupBackup,
}

impl StageKey {
    /// Stages run when the configuration does not list any
    pub const DEFAULT_ORDER: [StageKey; 8] = [
        StageKey::Authenticate,
        StageKey::UploadBackup,
        StageKey::AwaitStaging,
        StageKey::RestoreToStaging,
        StageKey::ExportPackage,
        StageKey::ArchivePackage,
        StageKey::ImportToTarget,
        StageKey::CleanupBackup,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageKey::Authenticate => "authenticate",
            StageKey::UploadBackup => "upload-backup",
            StageKey::AwaitStaging => "await-staging",
            StageKey::RestoreToStaging => "restore-to-staging",
            StageKey::ExportPackage => "export-package",
            StageKey::ArchivePackage => "archive-package",
            StageKey::DownloadPackage => "download-package",
            StageKey::ImportToTarget => "import-to-target",
            StageKey::CleanupBackup => "cleanup-backup",
        }
    }
}

impl fmt::Display for StageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stage list entry: either a bare stage name or a name with overrides
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StageEntry {
    Name(StageKey),
    Detailed(StageOverride),
}

/// Per-stage policy overrides
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageOverride {
    pub name: StageKey,

    #[serde(default)]
    pub timeout_secs: Option<u64>,

    #[serde(default)]
    pub max_attempts: Option<u32>,

    #[serde(default)]
    pub backoff_secs: Option<u64>,
}

impl StageEntry {
    fn into_override(self) -> StageOverride {
        match self {
            StageEntry::Name(name) => StageOverride {
                name,
                timeout_secs: None,
                max_attempts: None,
                backoff_secs: None,
            },
            StageEntry::Detailed(o) => o,
        }
    }
}

/// Top-level migration configuration loaded from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Pipeline name, used in history and summaries
    #[serde(default = "default_name")]
    pub name: String,

    #[serde(default)]
    pub cloud: CloudConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub source: SourceConfig,

    /// Intermediate server the backup is restored onto
    #[serde(default)]
    pub staging: ServerConfig,

    /// Final managed database
    #[serde(default)]
    pub target: TargetConfig,

    #[serde(default)]
    pub package: PackageConfig,

    /// Scratch directory for local artifacts
    #[serde(default = "default_workdir")]
    pub workdir: String,

    #[serde(default)]
    pub tools: ToolsConfig,

    #[serde(default)]
    pub probe: ProbeConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    /// Ordered stage list (defaults to `StageKey::DEFAULT_ORDER`)
    #[serde(default)]
    pub stages: Option<Vec<StageEntry>>,

    #[serde(default)]
    pub audit: AuditConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudConfig {
    pub tenant_id: String,
    pub subscription_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub account: String,
    pub container: String,
    /// Lifetime of the access token handed to the restore
    pub token_expiry_hours: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            account: String::new(),
            container: String::new(),
            token_expiry_hours: 4,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Local path of the `.bak` file
    pub backup_file: String,
    /// Blob name to upload under (defaults to the file name)
    pub blob_name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub server: String,
    pub admin_user: String,
    /// Inline password
    pub password: Option<String>,
    /// Name of the environment variable holding the password
    pub password_env: Option<String>,
    pub database: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TargetConfig {
    #[serde(flatten)]
    pub endpoint: ServerConfig,

    #[serde(default)]
    pub sizing: SizingOptions,
}

/// Sizing of the imported database
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SizingOptions {
    pub edition: Option<String>,
    pub service_objective: Option<String>,
    pub max_size_gb: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PackageConfig {
    /// Local package path (defaults to `<workdir>/<staging.database>.bacpac`)
    pub file: Option<String>,
    /// Blob name for archive/download (defaults to the file name)
    pub blob_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub az: String,
    pub sqlcmd: String,
    pub sqlpackage: String,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            az: "az".to_string(),
            sqlcmd: "sqlcmd".to_string(),
            sqlpackage: "sqlpackage".to_string(),
        }
    }
}

/// Bounded wait for a server to accept connections
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    pub timeout_secs: u64,
    pub interval_secs: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 900,
            interval_secs: 15,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    Constant,
    Exponential,
}

/// Default retry/timeout policy, overridable per stage
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub timeout_secs: u64,
    pub backoff_secs: u64,
    pub backoff: BackoffKind,
    pub max_backoff_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            timeout_secs: 3600, // 1 hour
            backoff_secs: 30,
            backoff: BackoffKind::Exponential,
            max_backoff_secs: 600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Directory for the attempt journal and run summaries
    pub dir: String,
    /// Upload the run summary to the storage container
    pub mirror: bool,
    pub mirror_prefix: String,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            dir: "./audit".to_string(),
            mirror: false,
            mirror_prefix: "audit/".to_string(),
        }
    }
}

fn default_name() -> String {
    "migration".to_string()
}

fn default_workdir() -> String {
    "./work".to_string()
}

/// Effective policy of one stage after applying overrides
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagePolicy {
    pub key: StageKey,
    pub timeout: Duration,
    pub max_attempts: u32,
    pub backoff: Backoff,
}

const STORAGE_ACCOUNT_PATTERN: &str = r"^[a-z0-9]{3,24}$";
const CONTAINER_PATTERN: &str = r"^[a-z0-9][a-z0-9-]{1,61}[a-z0-9]$";

fn matches_pattern(field: &str, pattern: &str, value: &str) -> Result<bool, ConfigError> {
    let regex = Regex::new(pattern).map_err(|e| ConfigError::invalid(field, e.to_string()))?;
    Ok(regex.is_match(value))
}

fn require(field: &str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::missing(field));
    }
    Ok(())
}

fn file_name_of(path: &str) -> Option<String> {
    Path::new(path)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
}

impl ServerConfig {
    fn validate(&self, prefix: &str, with_database: bool) -> Result<(), ConfigError> {
        require(&format!("{}.server", prefix), &self.server)?;
        require(&format!("{}.admin_user", prefix), &self.admin_user)?;
        match (&self.password, &self.password_env) {
            (Some(password), _) if !password.is_empty() => {}
            (_, Some(var)) if !var.trim().is_empty() => {}
            _ => return Err(ConfigError::missing(format!("{}.password", prefix))),
        }
        if with_database {
            require(&format!("{}.database", prefix), &self.database)?;
        }
        Ok(())
    }

    /// Resolve the credential handle into a login
    pub fn credentials(&self, prefix: &str) -> Result<Credentials, ConfigError> {
        let password = match (&self.password, &self.password_env) {
            (Some(password), _) if !password.is_empty() => password.clone(),
            (_, Some(var)) if !var.trim().is_empty() => std::env::var(var)
                .ok()
                .filter(|v| !v.is_empty())
                .ok_or_else(|| {
                    ConfigError::invalid(
                        format!("{}.password_env", prefix),
                        format!("environment variable {} is not set", var),
                    )
                })?,
            _ => return Err(ConfigError::missing(format!("{}.password", prefix))),
        };

        Ok(Credentials {
            user: self.admin_user.clone(),
            password: Secret::new(password),
        })
    }
}

impl MigrationConfig {
    /// Load migration configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    /// Parse migration configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: MigrationConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Stage list with overrides, in run order
    pub fn stage_overrides(&self) -> Vec<StageOverride> {
        match &self.stages {
            Some(entries) => entries.iter().cloned().map(StageEntry::into_override).collect(),
            None => StageKey::DEFAULT_ORDER
                .iter()
                .map(|key| StageEntry::Name(*key).into_override())
                .collect(),
        }
    }

    /// Effective policy for every included stage, in run order
    pub fn stage_policies(&self) -> Vec<StagePolicy> {
        self.stage_overrides()
            .into_iter()
            .map(|o| {
                let base = Duration::from_secs(o.backoff_secs.unwrap_or(self.retry.backoff_secs));
                let backoff = match self.retry.backoff {
                    BackoffKind::Constant => Backoff::Constant(base),
                    BackoffKind::Exponential => Backoff::Exponential {
                        base,
                        max: Duration::from_secs(self.retry.max_backoff_secs),
                    },
                };
                StagePolicy {
                    key: o.name,
                    timeout: Duration::from_secs(o.timeout_secs.unwrap_or(self.retry.timeout_secs)),
                    max_attempts: o.max_attempts.unwrap_or(self.retry.max_attempts),
                    backoff,
                }
            })
            .collect()
    }

    /// Blob name of the uploaded backup
    pub fn backup_blob_name(&self) -> Option<String> {
        self.source
            .blob_name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .or_else(|| file_name_of(&self.source.backup_file))
    }

    /// Local path of the exported package
    pub fn package_file(&self) -> PathBuf {
        match self.package.file.as_deref().filter(|f| !f.trim().is_empty()) {
            Some(file) => PathBuf::from(file),
            None => Path::new(&self.workdir).join(format!("{}.bacpac", self.staging.database)),
        }
    }

    /// Blob name of the archived package
    pub fn package_blob_name(&self) -> Option<String> {
        self.package
            .blob_name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .or_else(|| file_name_of(&self.package_file().to_string_lossy()))
    }

    fn validate_storage(&self) -> Result<(), ConfigError> {
        require("storage.account", &self.storage.account)?;
        require("storage.container", &self.storage.container)?;
        if !matches_pattern("storage.account", STORAGE_ACCOUNT_PATTERN, &self.storage.account)? {
            return Err(ConfigError::invalid(
                "storage.account",
                "must be 3-24 lowercase letters or digits",
            ));
        }
        if !matches_pattern("storage.container", CONTAINER_PATTERN, &self.storage.container)?
            || self.storage.container.contains("--")
        {
            return Err(ConfigError::invalid(
                "storage.container",
                "must be 3-63 lowercase letters, digits or single hyphens",
            ));
        }
        Ok(())
    }

    fn require_backup_blob(&self) -> Result<(), ConfigError> {
        if self.backup_blob_name().is_none() {
            return Err(ConfigError::missing("source.blob_name"));
        }
        Ok(())
    }

    /// Validate the configuration for the included stages
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::invalid("retry.max_attempts", "must be at least 1"));
        }
        if self.probe.interval_secs == 0 {
            return Err(ConfigError::invalid("probe.interval_secs", "must be greater than 0"));
        }

        let overrides = self.stage_overrides();
        if overrides.is_empty() {
            return Err(ConfigError::invalid("stages", "at least one stage is required"));
        }

        let mut seen = HashSet::new();
        for o in &overrides {
            if !seen.insert(o.name) {
                return Err(ConfigError::DuplicateStage(o.name.to_string()));
            }
            if o.max_attempts == Some(0) {
                return Err(ConfigError::invalid(
                    format!("stages.{}.max_attempts", o.name),
                    "must be at least 1",
                ));
            }
            if o.timeout_secs == Some(0) {
                return Err(ConfigError::invalid(
                    format!("stages.{}.timeout_secs", o.name),
                    "must be greater than 0",
                ));
            }
        }

        for o in &overrides {
            match o.name {
                StageKey::Authenticate => {
                    require("cloud.tenant_id", &self.cloud.tenant_id)?;
                    require("cloud.subscription_id", &self.cloud.subscription_id)?;
                }
                StageKey::UploadBackup => {
                    require("source.backup_file", &self.source.backup_file)?;
                    self.validate_storage()?;
                    self.require_backup_blob()?;
                }
                StageKey::AwaitStaging => {
                    self.staging.validate("staging", false)?;
                }
                StageKey::RestoreToStaging => {
                    self.validate_storage()?;
                    self.require_backup_blob()?;
                    self.staging.validate("staging", true)?;
                    if self.storage.token_expiry_hours == 0 {
                        return Err(ConfigError::invalid(
                            "storage.token_expiry_hours",
                            "must be greater than 0",
                        ));
                    }
                }
                StageKey::ExportPackage => {
                    self.staging.validate("staging", true)?;
                }
                StageKey::ArchivePackage | StageKey::DownloadPackage => {
                    self.validate_storage()?;
                    if self.package.file.is_none() {
                        require("staging.database", &self.staging.database)
                            .map_err(|_| ConfigError::missing("package.file"))?;
                    }
                }
                StageKey::ImportToTarget => {
                    self.target.endpoint.validate("target", true)?;
                    if self.package.file.is_none() {
                        require("staging.database", &self.staging.database)
                            .map_err(|_| ConfigError::missing("package.file"))?;
                    }
                }
                StageKey::CleanupBackup => {
                    self.validate_storage()?;
                    self.require_backup_blob()?;
                }
            }
        }

        Ok(())
    }
}
