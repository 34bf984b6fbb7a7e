//! The configuration shape consumed from the CLI/XML front-end (§6).
//!
//! Parsing XML into this shape is an external collaborator's job (§1);
//! this module only models the data it hands off, the way
//! `moses-core::device` models `Device`/`DeviceInfo` without itself
//! enumerating devices.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ShadowPolicy {
    None,
    Newest,
    Oldest,
    All,
    SpecificGuids,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShadowConfig {
    pub policy: ShadowPolicy,
    #[serde(default)]
    pub guids: Vec<uuid::Uuid>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ResurrectMode {
    No,
    ResidentOnly,
    All,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgo {
    Md5,
    Sha1,
    Sha256,
    SsDeep,
    Tlsh,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ContentAction {
    CollectDataStream,
    CollectAllStreams,
    MetadataOnly,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleConfig {
    pub id: String,
    #[serde(default)]
    pub path_globs: Vec<String>,
    #[serde(default)]
    pub name_globs: Vec<String>,
    pub size_min: Option<u64>,
    pub size_max: Option<u64>,
    #[serde(default)]
    pub header_signatures: Vec<Vec<u8>>,
    #[serde(default)]
    pub extensions: Vec<String>,
    #[serde(default)]
    pub yara_rules: Vec<String>,
    #[serde(default)]
    pub hash_list: Vec<String>,
    #[serde(default)]
    pub hashes: Vec<HashAlgo>,
    pub action: ContentAction,
    pub max_per_sample_bytes: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Limits {
    pub max_total_bytes: Option<u64>,
    pub max_per_sample_bytes: Option<u64>,
    pub max_sample_count: Option<u64>,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            max_total_bytes: None,
            max_per_sample_bytes: None,
            max_sample_count: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveFormat {
    SevenZip,
    Zip,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    pub format: ArchiveFormat,
    pub compression_level: u8,
    pub password: Option<String>,
    pub concurrency: usize,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        ArchiveConfig {
            format: ArchiveFormat::SevenZip,
            compression_level: 5,
            password: None,
            concurrency: 8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    pub csv_path: Option<PathBuf>,
    pub directory: Option<PathBuf>,
    pub archive_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsnConfig {
    pub configure: bool,
    pub min_size: Option<u64>,
    pub max_size: Option<u64>,
    pub delta: Option<u64>,
}

impl Default for UsnConfig {
    fn default() -> Self {
        UsnConfig {
            configure: false,
            min_size: None,
            max_size: None,
            delta: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub locations: Vec<String>,
    pub shadows: ShadowConfig,
    #[serde(default)]
    pub excludes: Vec<String>,
    pub rules: Vec<RuleConfig>,
    #[serde(default)]
    pub yara_sources: Vec<PathBuf>,
    #[serde(default)]
    pub resurrect: ResurrectModeOrDefault,
    pub archive: ArchiveConfig,
    pub output: OutputConfig,
    #[serde(default)]
    pub limits: Limits,
    #[serde(default)]
    pub usn: UsnConfig,
}

/// Thin wrapper so `resurrect` can be omitted from a config document and
/// default to `No` without requiring `ResurrectMode` itself to implement
/// `Default` (it intentionally does not — callers should have to name
/// the mode they want when they do set it).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct ResurrectModeOrDefault(pub ResurrectMode);

impl Default for ResurrectModeOrDefault {
    fn default() -> Self {
        ResurrectModeOrDefault(ResurrectMode::No)
    }
}

impl Config {
    /// Startup-time validation: invalid rule, missing yara source,
    /// unknown algorithm are all `Configuration` errors and fatal —
    /// the pipeline must not start (§7).
    pub fn validate(&self) -> crate::Result<()> {
        if self.rules.is_empty() {
            return Err(crate::OrcError::Configuration(
                "no selection rules configured".into(),
            ));
        }
        for rule in &self.rules {
            if rule.id.is_empty() {
                return Err(crate::OrcError::Configuration(
                    "rule with empty id".into(),
                ));
            }
            if !rule.yara_rules.is_empty() && self.yara_sources.is_empty() {
                return Err(crate::OrcError::Configuration(format!(
                    "rule {} references yara rules but no yara-sources configured",
                    rule.id
                )));
            }
        }
        if self.archive.concurrency == 0 {
            return Err(crate::OrcError::Configuration(
                "archive concurrency must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_rule_set() {
        let cfg = Config {
            locations: vec!["*".into()],
            shadows: ShadowConfig { policy: ShadowPolicy::None, guids: vec![] },
            excludes: vec![],
            rules: vec![],
            yara_sources: vec![],
            resurrect: ResurrectModeOrDefault::default(),
            archive: ArchiveConfig::default(),
            output: OutputConfig { csv_path: None, directory: None, archive_path: "out.7z".into() },
            limits: Limits::default(),
            usn: UsnConfig::default(),
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_yara_rule_without_source() {
        let mut cfg_rules = RuleConfig {
            id: "r1".into(),
            path_globs: vec![],
            name_globs: vec!["*.evtx".into()],
            size_min: None,
            size_max: None,
            header_signatures: vec![],
            extensions: vec![],
            yara_rules: vec!["suspicious".into()],
            hash_list: vec![],
            hashes: vec![HashAlgo::Sha256],
            action: ContentAction::CollectDataStream,
            max_per_sample_bytes: None,
        };
        cfg_rules.yara_rules = vec!["suspicious".into()];

        let cfg = Config {
            locations: vec!["*".into()],
            shadows: ShadowConfig { policy: ShadowPolicy::None, guids: vec![] },
            excludes: vec![],
            rules: vec![cfg_rules],
            yara_sources: vec![],
            resurrect: ResurrectModeOrDefault::default(),
            archive: ArchiveConfig::default(),
            output: OutputConfig { csv_path: None, directory: None, archive_path: "out.7z".into() },
            limits: Limits::default(),
            usn: UsnConfig::default(),
        };
        assert!(cfg.validate().is_err());
    }
}
