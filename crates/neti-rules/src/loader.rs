//! Packet-filter loader driver
//!
//! The host's restore-style bulk loader gives us atomic table
//! replacement: every snapshot becomes a complete program, written to a
//! private scratch file, syntax-checked, and only then loaded. The
//! loader binary is located and version-gated once, at agent startup.
//!
//! [`RuleInstaller`] is the seam between synthesis and the host binary,
//! so tests (and dry runs) can capture programs without touching live
//! rules.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use tempfile::NamedTempFile;
use tokio::process::Command;
use tracing::{debug, error, info};

use crate::error::RuleError;

/// Minimum supported loader version, compared as a lexical tuple over the
/// dotted fragments (so `1.2.9` outranks `1.2.10`; a long-standing quirk
/// kept for compatibility)
const MIN_VERSION: [&str; 3] = ["1", "2", "10"];

/// How far an installation should go
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallMode {
    /// Stop after the syntax check (dry runs)
    CheckOnly,
    /// Syntax check, then load into the kernel
    Full,
}

/// What actually happened to a program handed to the installer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallStatus {
    /// Syntax check passed; apply was not requested
    Checked,
    /// Syntax check passed and the program was loaded
    Applied,
    /// Syntax check failed; live rules were not touched
    CheckFailed,
    /// Syntax check passed but the load failed; the next snapshot retries
    ApplyFailed,
}

/// The seam between rule synthesis and the host's loader binary
#[async_trait]
pub trait RuleInstaller: Send + Sync {
    async fn install(&self, program: &str, mode: InstallMode) -> Result<InstallStatus, RuleError>;
}

/// Driver for the real `iptables-restore` loader
pub struct IptablesRestore {
    iptables: PathBuf,
    restore: PathBuf,
}

impl IptablesRestore {
    /// Locate the loader binaries and check the compatibility
    /// precondition. Both failures are fatal at agent startup.
    pub async fn detect() -> Result<Self, RuleError> {
        let iptables = locate("iptables").await?;
        let restore = locate("iptables-restore").await?;
        let loader = Self { iptables, restore };

        let fragments = loader.read_version().await?;
        if !meets_minimum(&fragments) {
            return Err(RuleError::InvalidPacketFilterVersion(fragments.join(".")));
        }
        info!(version = %fragments.join("."), "packet filter loader detected");
        Ok(loader)
    }

    async fn read_version(&self) -> Result<Vec<String>, RuleError> {
        let output = Command::new(&self.iptables)
            .arg("-V")
            .output()
            .await
            .map_err(|_| RuleError::MissingPacketFilter)?;
        if !output.status.success() {
            return Err(RuleError::MissingPacketFilter);
        }
        parse_version(&String::from_utf8_lossy(&output.stdout))
            .ok_or(RuleError::MissingPacketFilter)
    }
}

async fn locate(name: &str) -> Result<PathBuf, RuleError> {
    let output = Command::new("which")
        .arg(name)
        .output()
        .await
        .map_err(|_| RuleError::MissingPacketFilter)?;
    if !output.status.success() {
        return Err(RuleError::MissingPacketFilter);
    }
    let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if path.is_empty() {
        return Err(RuleError::MissingPacketFilter);
    }
    Ok(PathBuf::from(path))
}

/// Extract the dotted version fragments from `-V` output such as
/// `iptables v1.8.7 (nf_tables)`
fn parse_version(output: &str) -> Option<Vec<String>> {
    let token = output.split_whitespace().nth(1)?;
    let digits: String = token
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    if digits.is_empty() {
        return None;
    }
    Some(digits.split('.').map(str::to_string).collect())
}

fn meets_minimum(fragments: &[String]) -> bool {
    let fragments: Vec<&str> = fragments.iter().map(String::as_str).collect();
    fragments.as_slice() >= MIN_VERSION.as_slice()
}

#[async_trait]
impl RuleInstaller for IptablesRestore {
    async fn install(&self, program: &str, mode: InstallMode) -> Result<InstallStatus, RuleError> {
        // Scratch file local to this one synthesis.
        let mut scratch = NamedTempFile::new()?;
        scratch.write_all(program.as_bytes())?;
        scratch.flush()?;
        let path = scratch.path();

        let check = Command::new(&self.restore)
            .arg("-t")
            .arg(path)
            .output()
            .await?;
        if !check.status.success() {
            error!(
                stderr = %String::from_utf8_lossy(&check.stderr),
                "rule program failed the loader syntax check"
            );
            return Ok(InstallStatus::CheckFailed);
        }
        if mode == InstallMode::CheckOnly {
            debug!("rule program checked; not applied");
            return Ok(InstallStatus::Checked);
        }

        let apply = Command::new(&self.restore)
            .arg("-v")
            .arg(path)
            .output()
            .await?;
        if !apply.status.success() {
            error!(
                stderr = %String::from_utf8_lossy(&apply.stderr),
                "loader failed to apply rule program"
            );
            return Ok(InstallStatus::ApplyFailed);
        }
        info!("rule program applied");
        Ok(InstallStatus::Applied)
    }
}

/// Installer that captures programs instead of loading them
#[derive(Debug, Default)]
pub struct RecordingInstaller {
    programs: Mutex<Vec<String>>,
}

impl RecordingInstaller {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every program handed to [`RuleInstaller::install`], in order
    pub fn programs(&self) -> Vec<String> {
        self.programs.lock().unwrap().clone()
    }
}

#[async_trait]
impl RuleInstaller for RecordingInstaller {
    async fn install(&self, program: &str, mode: InstallMode) -> Result<InstallStatus, RuleError> {
        self.programs.lock().unwrap().push(program.to_string());
        Ok(match mode {
            InstallMode::CheckOnly => InstallStatus::Checked,
            InstallMode::Full => InstallStatus::Applied,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fragments(version: &str) -> Vec<String> {
        version.split('.').map(str::to_string).collect()
    }

    #[test]
    fn test_parse_version_from_banner() {
        assert_eq!(
            parse_version("iptables v1.8.7 (nf_tables)"),
            Some(fragments("1.8.7"))
        );
        assert_eq!(parse_version("iptables v1.4.21"), Some(fragments("1.4.21")));
    }

    #[test]
    fn test_parse_version_rejects_garbage() {
        assert_eq!(parse_version("iptables"), None);
        assert_eq!(parse_version("iptables vgarbage"), None);
    }

    #[test]
    fn test_minimum_version_gate() {
        assert!(meets_minimum(&fragments("1.2.10")));
        assert!(meets_minimum(&fragments("1.8.7")));
        assert!(meets_minimum(&fragments("2.0")));
        assert!(!meets_minimum(&fragments("1.2.1")));
        assert!(!meets_minimum(&fragments("1.1.99")));
    }

    #[test]
    fn test_version_comparison_is_lexical() {
        // The comparison is over string fragments, so "9" outranks "10".
        // Kept as-is for compatibility with existing deployments.
        assert!(meets_minimum(&fragments("1.2.9")));
        assert!(!meets_minimum(&fragments("1.10")));
    }

    #[tokio::test]
    async fn test_recording_installer_captures_in_order() {
        let installer = RecordingInstaller::new();
        installer.install("first", InstallMode::Full).await.unwrap();
        installer
            .install("second", InstallMode::CheckOnly)
            .await
            .unwrap();
        assert_eq!(installer.programs(), vec!["first", "second"]);
    }
}
