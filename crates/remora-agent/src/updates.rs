//! Package update discovery and installation
//!
//! The dispatcher drives this through the [`UpdateManager`] trait; the
//! shipped implementation probes the host's package manager the same way
//! for every request, so a tool installed after startup is picked up
//! without a restart.

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::{timeout, Duration};
use tracing::{debug, warn};

use remora_proto::UpdateRecord;

use crate::error::{AgentError, Result};

/// Most records ever reported for one enumeration.
const MAX_UPDATES: usize = 50;

/// Update discovery and installation seam.
#[async_trait]
pub trait UpdateManager: Send + Sync {
    /// Enumerate available updates, capped at a server-friendly count.
    async fn list_available(&self) -> Result<Vec<UpdateRecord>>;

    /// Install updates. Returns a human-readable result line.
    ///
    /// `update_ids` is advisory: the platform package managers this
    /// implementation shells out to upgrade everything pending.
    async fn apply(&self, update_ids: &[String]) -> Result<String>;
}

/// [`UpdateManager`] backed by the host's native package manager.
#[derive(Debug, Default)]
pub struct PackageManager;

impl PackageManager {
    /// Create a package manager probe.
    pub fn new() -> Self {
        Self
    }
}

#[cfg(unix)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PackageTool {
    Apt,
    Dnf,
    Yum,
    Pacman,
}

#[cfg(unix)]
impl PackageTool {
    fn detect() -> Option<Self> {
        let candidates = [
            ("/usr/bin/apt", Self::Apt),
            ("/usr/bin/dnf", Self::Dnf),
            ("/usr/bin/yum", Self::Yum),
            ("/usr/bin/pacman", Self::Pacman),
        ];
        candidates
            .iter()
            .find(|(path, _)| std::path::Path::new(path).exists())
            .map(|(_, tool)| *tool)
    }

    fn name(self) -> &'static str {
        match self {
            Self::Apt => "apt",
            Self::Dnf => "dnf",
            Self::Yum => "yum",
            Self::Pacman => "pacman",
        }
    }
}

#[cfg(unix)]
#[async_trait]
impl UpdateManager for PackageManager {
    async fn list_available(&self) -> Result<Vec<UpdateRecord>> {
        let Some(tool) = PackageTool::detect() else {
            debug!("no supported package manager found");
            return Ok(Vec::new());
        };

        let mut records = match tool {
            PackageTool::Apt => {
                // Refresh the index first; its own failure is not fatal.
                if let Err(e) = run(&["apt", "update"], 120).await {
                    warn!(error = %e, "apt update failed, listing against stale index");
                }
                let output = run(&["apt", "list", "--upgradable"], 60).await?;
                if output.status.success() {
                    parse_apt(&String::from_utf8_lossy(&output.stdout))
                } else {
                    Vec::new()
                }
            }
            PackageTool::Dnf | PackageTool::Yum => {
                let output = run(&[tool.name(), "check-update"], 60).await?;
                // check-update exits 100 when updates are pending.
                if output.status.code() == Some(100) {
                    parse_check_update(&String::from_utf8_lossy(&output.stdout))
                } else {
                    Vec::new()
                }
            }
            PackageTool::Pacman => {
                if let Err(e) = run(&["pacman", "-Sy"], 60).await {
                    warn!(error = %e, "pacman -Sy failed, listing against stale index");
                }
                let output = run(&["pacman", "-Qu"], 60).await?;
                if output.status.success() {
                    parse_pacman(&String::from_utf8_lossy(&output.stdout))
                } else {
                    Vec::new()
                }
            }
        };

        records.truncate(MAX_UPDATES);
        Ok(records)
    }

    async fn apply(&self, _update_ids: &[String]) -> Result<String> {
        let Some(tool) = PackageTool::detect() else {
            return Err(AgentError::Updates(
                "no supported package manager found".to_string(),
            ));
        };

        let argv: &[&str] = match tool {
            PackageTool::Apt => &["apt", "upgrade", "-y"],
            PackageTool::Dnf => &["dnf", "update", "-y"],
            PackageTool::Yum => &["yum", "update", "-y"],
            PackageTool::Pacman => &["pacman", "-Su", "--noconfirm"],
        };

        let output = run(argv, 3600).await?;
        if output.status.success() {
            Ok("Updates installed successfully".to_string())
        } else {
            Err(AgentError::Updates(format!(
                "{} exited with status {}",
                tool.name(),
                output.status.code().unwrap_or(-1)
            )))
        }
    }
}

/// Windows Update enumeration through the COM update session.
#[cfg(windows)]
const CHECK_UPDATES_PS: &str = r#"
$UpdateSession = New-Object -ComObject Microsoft.Update.Session
$UpdateSearcher = $UpdateSession.CreateUpdateSearcher()
$SearchResult = $UpdateSearcher.Search("IsInstalled=0")
$Updates = @()
foreach ($Update in $SearchResult.Updates) {
    $Updates += @{
        "Title" = $Update.Title
        "Description" = $Update.Description
        "KB" = ($Update.KBArticleIDs -join ", ")
        "Size" = [math]::Round($Update.MaxDownloadSize / 1MB, 2)
        "IsImportant" = $Update.IsImportant
        "IsCritical" = $Update.IsCritical
    }
}
ConvertTo-Json -InputObject $Updates -Depth 3
"#;

#[cfg(windows)]
const INSTALL_UPDATES_PS: &str = r#"
$UpdateSession = New-Object -ComObject Microsoft.Update.Session
$UpdateSearcher = $UpdateSession.CreateUpdateSearcher()
$SearchResult = $UpdateSearcher.Search("IsInstalled=0")
$Updates = $SearchResult.Updates | Where-Object { $_.IsImportant -or $_.IsCritical }
if ($Updates.Count -gt 0) {
    $Installer = $UpdateSession.CreateUpdateInstaller()
    $Installer.Updates = $Updates
    $InstallationResult = $Installer.Install()
    "Installed {0} updates. Reboot required: {1}" -f $Updates.Count, $InstallationResult.RebootRequired
} else {
    "No important updates to install"
}
"#;

#[cfg(windows)]
#[async_trait]
impl UpdateManager for PackageManager {
    async fn list_available(&self) -> Result<Vec<UpdateRecord>> {
        let output = run(&["powershell", "-Command", CHECK_UPDATES_PS], 60).await?;
        if !output.status.success() {
            return Ok(Vec::new());
        }
        let text = String::from_utf8_lossy(&output.stdout);
        let mut records = parse_powershell_json(&text);
        records.truncate(MAX_UPDATES);
        Ok(records)
    }

    async fn apply(&self, _update_ids: &[String]) -> Result<String> {
        let output = run(&["powershell", "-Command", INSTALL_UPDATES_PS], 3600).await?;
        if output.status.success() {
            Ok("Updates installed successfully".to_string())
        } else {
            Err(AgentError::Updates(format!(
                "powershell exited with status {}",
                output.status.code().unwrap_or(-1)
            )))
        }
    }
}

/// ConvertTo-Json emits a bare object for a single record; normalise to a
/// list either way.
#[cfg(windows)]
fn parse_powershell_json(text: &str) -> Vec<UpdateRecord> {
    match serde_json::from_str::<serde_json::Value>(text) {
        Ok(serde_json::Value::Array(items)) => items
            .into_iter()
            .filter_map(|v| serde_json::from_value(v).ok())
            .collect(),
        Ok(value) => serde_json::from_value(value).map(|r| vec![r]).unwrap_or_default(),
        Err(_) => Vec::new(),
    }
}

async fn run(argv: &[&str], timeout_secs: u64) -> Result<std::process::Output> {
    let mut command = Command::new(argv[0]);
    command.args(&argv[1..]);
    timeout(Duration::from_secs(timeout_secs), command.output())
        .await
        .map_err(|_| AgentError::Updates(format!("{} timed out", argv[0])))?
        .map_err(AgentError::Io)
}

#[cfg(unix)]
fn parse_apt(stdout: &str) -> Vec<UpdateRecord> {
    stdout
        .lines()
        .filter(|line| line.contains("upgradable") && line.contains('/'))
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let package = parts.next()?.split('/').next()?.to_string();
            let version = parts.next().unwrap_or("unknown").to_string();
            Some(version_record(package, format!("Version {version} available")))
        })
        .collect()
}

#[cfg(unix)]
fn parse_check_update(stdout: &str) -> Vec<UpdateRecord> {
    stdout
        .lines()
        .filter(|line| {
            !line.is_empty() && !line.starts_with("Last metadata") && !line.starts_with('*')
        })
        .filter_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() >= 2 {
                Some(version_record(
                    parts[0].to_string(),
                    format!("Version {} available", parts[1]),
                ))
            } else {
                None
            }
        })
        .collect()
}

#[cfg(unix)]
fn parse_pacman(stdout: &str) -> Vec<UpdateRecord> {
    stdout
        .lines()
        .filter(|line| !line.is_empty())
        .filter_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() >= 2 {
                Some(version_record(
                    parts[0].to_string(),
                    format!("Update to version {}", parts[1]),
                ))
            } else {
                None
            }
        })
        .collect()
}

#[cfg(unix)]
fn version_record(title: String, description: String) -> UpdateRecord {
    UpdateRecord {
        title,
        description,
        kb: String::new(),
        size: 0.0,
        important: false,
        critical: false,
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn apt_listing_extracts_package_and_version() {
        let stdout = "\
Listing... Done
bash/stable 5.2.15-2+b2 amd64 [upgradable from: 5.2.15-2]
libssl3/stable-security 3.0.13-1~deb12u1 amd64 [upgradable from: 3.0.11-1~deb12u2]
";
        let records = parse_apt(stdout);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].title, "bash");
        assert_eq!(records[0].description, "Version 5.2.15-2+b2 available");
        assert_eq!(records[1].title, "libssl3");
        assert!(records.iter().all(|r| r.kb.is_empty() && !r.critical));
    }

    #[test]
    fn apt_listing_skips_the_banner() {
        assert!(parse_apt("Listing... Done\n").is_empty());
    }

    #[test]
    fn check_update_output_skips_metadata_lines() {
        let stdout = "\
Last metadata expiration check: 0:12:42 ago on Tue 05 Aug 2026.

kernel.x86_64    6.9.4-200.fc40    updates
openssl.x86_64   3.2.1-2.fc40      updates
* extra note line
";
        let records = parse_check_update(stdout);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].title, "kernel.x86_64");
        assert_eq!(records[0].description, "Version 6.9.4-200.fc40 available");
    }

    #[test]
    fn pacman_listing_reports_pending_upgrades() {
        let stdout = "linux 6.9.3.arch1-1 -> 6.9.4.arch1-1\nzlib 1.3-1 -> 1.3.1-1\n";
        let records = parse_pacman(stdout);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].title, "linux");
        assert!(records[0].description.starts_with("Update to version"));
    }

    #[tokio::test]
    async fn run_times_out_instead_of_hanging() {
        let err = run(&["sleep", "5"], 1).await.unwrap_err();
        assert!(matches!(err, AgentError::Updates(_)));
    }
}
