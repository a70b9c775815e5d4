//! Agent lifecycle
//!
//! One run wires the whole pipeline: host identity → coordinator pair →
//! registration → group joins → local watch → per-snapshot rule
//! synthesis. The watch channel is consumed by a single loop, so two
//! overlapping snapshots can never produce interleaved installs. Any
//! coordination-level failure tears the sessions down and re-enters from
//! the top; retry is immediate and unbounded (callers wanting backoff
//! wrap the supervisor).

use std::sync::Arc;

use tracing::{debug, error, info, instrument};

use neti_coordination::{Connector, CoordinationError, CoordinatorPair};
use neti_core::{AddressTuple, Config};
use neti_rules::{FilterPolicy, InstallMode, InstallStatus, RuleInstaller, RuleSynthesizer};

use crate::allocator::Allocator;
use crate::error::{AgentError, AgentResult};
use crate::identity::{HostIdentity, METADATA_URL};
use crate::membership::Membership;
use crate::tagger::InstanceTagger;

/// How a completed run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunOutcome {
    /// Dry run: the first synthesized program went to stdout
    DryRunComplete,
}

/// Wires the agent together and keeps it alive across session loss
pub struct Supervisor {
    config: Config,
    connector: Arc<dyn Connector>,
    tagger: Arc<dyn InstanceTagger>,
    installer: Arc<dyn RuleInstaller>,
    metadata_url: String,
    dry_run: bool,
}

impl Supervisor {
    pub fn new(
        config: Config,
        connector: Arc<dyn Connector>,
        tagger: Arc<dyn InstanceTagger>,
        installer: Arc<dyn RuleInstaller>,
    ) -> Self {
        Self {
            config,
            connector,
            tagger,
            installer,
            metadata_url: METADATA_URL.to_string(),
            dry_run: false,
        }
    }

    /// Use a different metadata endpoint (tests)
    pub fn with_metadata_url(mut self, url: impl Into<String>) -> Self {
        self.metadata_url = url.into();
        self
    }

    /// Print the first synthesized program instead of applying it, then
    /// return
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Run until a fatal error (or dry-run completion). Session loss is
    /// not fatal: sessions are torn down and the run re-enters from
    /// identity discovery.
    pub async fn run(&self) -> AgentResult<()> {
        loop {
            match self.run_once().await {
                Ok(RunOutcome::DryRunComplete) => return Ok(()),
                Err(AgentError::Coordination(err)) => {
                    error!(error = %err, "coordination failure; re-establishing sessions");
                }
                Err(fatal) => return Err(fatal),
            }
        }
    }

    #[instrument(skip(self))]
    async fn run_once(&self) -> AgentResult<RunOutcome> {
        let identity = HostIdentity::discover(&self.metadata_url).await?;
        let realm = identity.realm();
        info!(instance = %identity.instance_id(), %realm, "starting agent run");

        let pair = CoordinatorPair::connect(
            self.connector.as_ref(),
            realm,
            &self.config.ec2.zk_hosts,
            &self.config.vpc.zk_hosts,
        )
        .await?;
        let paths = self.config.registry_paths();

        // Registration completes before the first group join: a peer must
        // never see us in the group without a durable forward lease.
        let allocator = Allocator::new(
            pair.local(),
            paths.clone(),
            self.config.realm(realm).overlay_subnet,
            identity.instance_id().clone(),
            Arc::clone(&self.tagger),
        );
        let overlay = allocator.register().await?;

        let tuple = AddressTuple {
            public: identity.public_address(),
            private: identity.private_address(),
            overlay,
            realm,
        };
        let membership = Membership::new(&pair, paths.ip_map(), &tuple);
        membership.join().await?;
        let mut snapshots = membership.watch().await?;

        let policy = FilterPolicy {
            open_80: self.config.neti.open_80,
            reject_all: self.config.neti.reject_all,
            ssh_whitelist: self.config.ssh_whitelist_entries(),
        };
        let mode = if self.dry_run {
            InstallMode::CheckOnly
        } else {
            InstallMode::Full
        };
        let synthesizer =
            RuleSynthesizer::new(realm, policy, Arc::clone(&self.installer)).with_mode(mode);

        info!(%overlay, "registered and watching membership");
        while let Some(entries) = snapshots.recv().await {
            match synthesizer.synthesize(&entries).await {
                Ok(Some(synthesis)) => {
                    if self.dry_run && synthesis.status != InstallStatus::CheckFailed {
                        // The loader has vetted the program; show it and stop.
                        println!("{}", synthesis.program);
                        return Ok(RunOutcome::DryRunComplete);
                    }
                }
                Ok(None) => debug!("snapshot held no members; nothing installed"),
                // One bad synthesis never takes the agent down; the next
                // snapshot gets a fresh attempt.
                Err(err) => error!(error = %err, "rule synthesis aborted"),
            }
        }

        Err(CoordinationError::SessionLost("membership watch ended".to_string()).into())
    }
}
