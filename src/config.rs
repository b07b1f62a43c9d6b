//! Target description file.
//!
//! One TOML file describes everything probe-specific: how to reach the
//! debugger console, the administrative SSH account, the boot launcher
//! command and its readiness lines, the expected boot flavor, and the
//! kernel build plan. The binaries stay target-agnostic.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::boot::BootFlavor;
use crate::buildplan::BuildPlan;
use crate::kiosk::KdbPolicy;
use crate::session::TransportSpec;

#[derive(Debug, Clone, Deserialize)]
pub struct TargetConfig {
    /// The debugger-facing console.
    pub uart: TransportSpec,
    /// Administrative SSH account on the target, needed by the kiosk suite.
    #[serde(default)]
    pub admin: Option<AdminSpec>,
    /// External boot launcher, when the target is simulated or needs a
    /// flasher to start.
    #[serde(default)]
    pub launcher: Option<LauncherSpec>,
    #[serde(default)]
    pub boot: BootConfig,
    #[serde(default)]
    pub build: BuildPlan,
    /// Base per-expect timeout, seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub kiosk: KioskConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdminSpec {
    pub host: String,
    pub user: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LauncherSpec {
    /// Shell command that starts the boot (simulator, flasher, qemu...).
    pub command: String,
    /// Readiness milestones on the launcher's own console; a launcher that
    /// never prints them is considered hung and goes through the kill
    /// ladder.
    #[serde(default)]
    pub ready: Vec<String>,
    #[serde(default = "default_launcher_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BootConfig {
    pub flavor: BootFlavor,
    /// Board-specific bootloader patterns prepended to the kernel chain.
    pub bootloader: Vec<String>,
}

impl Default for BootConfig {
    fn default() -> Self {
        Self {
            flavor: BootFlavor::Systemd,
            bootloader: Vec::new(),
        }
    }
}

/// Which policy values the kiosk suite pushes. The access-control
/// parameter is an enumerated bitmask, so both sides are configurable.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KioskConfig {
    pub restricted: KdbPolicy,
    pub full: KdbPolicy,
}

impl Default for KioskConfig {
    fn default() -> Self {
        Self {
            restricted: KdbPolicy::PassiveInspection,
            full: KdbPolicy::FullControl,
        }
    }
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_launcher_timeout_secs() -> u64 {
    60
}

impl TargetConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading target config {}", path.display()))?;
        toml::from_str(&text)
            .with_context(|| format!("parsing target config {}", path.display()))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
