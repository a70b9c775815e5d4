//! Snapshot-to-rules synthesis
//!
//! One [`RuleSynthesizer::synthesize`] call per membership snapshot.
//! Unparseable member entries are dropped individually; a snapshot with
//! no usable members installs nothing (there is nobody to whitelist or
//! translate for, and the first snapshot a host processes always carries
//! at least its own entry).

use std::sync::Arc;

use tracing::{info, instrument, warn};

use neti_core::{PeerBundle, Realm};

use crate::error::RuleError;
use crate::loader::{InstallMode, InstallStatus, RuleInstaller};
use crate::program::{FilterPolicy, render_program};

/// The outcome of one synthesis
#[derive(Debug, Clone)]
pub struct Synthesis {
    /// The complete program handed to the installer
    pub program: String,
    /// What the installer did with it
    pub status: InstallStatus,
}

/// Turns membership snapshots into installed rule programs
pub struct RuleSynthesizer {
    realm: Realm,
    policy: FilterPolicy,
    installer: Arc<dyn RuleInstaller>,
    mode: InstallMode,
}

impl RuleSynthesizer {
    pub fn new(realm: Realm, policy: FilterPolicy, installer: Arc<dyn RuleInstaller>) -> Self {
        Self {
            realm,
            policy,
            installer,
            mode: InstallMode::Full,
        }
    }

    /// Stop after the loader syntax check instead of applying (dry runs)
    pub fn with_mode(mut self, mode: InstallMode) -> Self {
        self.mode = mode;
        self
    }

    /// Synthesize and install the program for one snapshot.
    ///
    /// Returns `Ok(None)` when the snapshot held no parseable members.
    /// Synthesis errors (a malformed configured address, an unknown
    /// chain) abort before the installer is invoked.
    #[instrument(skip(self, entries), fields(realm = %self.realm, entries = entries.len()))]
    pub async fn synthesize(&self, entries: &[String]) -> Result<Option<Synthesis>, RuleError> {
        let bundles: Vec<PeerBundle> = entries
            .iter()
            .filter_map(|entry| match PeerBundle::parse(entry) {
                Ok(bundle) => Some(bundle),
                Err(err) => {
                    warn!(error = %err, "dropping unparseable group member");
                    None
                }
            })
            .collect();

        info!(members = bundles.len(), "generating packet-rule program");
        if bundles.is_empty() {
            return Ok(None);
        }

        let program = render_program(self.realm, &self.policy, &bundles)?;
        let status = self.installer.install(&program, self.mode).await?;
        Ok(Some(Synthesis { program, status }))
    }
}
