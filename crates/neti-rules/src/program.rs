//! Full rule-program rendering
//!
//! The loader is sensitive to section boundaries, so the layout here is
//! normative: the filter table first (chain declarations, loopback and
//! established/related accepts, whitelist dispatches, the optional
//! port-80 and reject-all policy rules, then the per-peer and ssh
//! whitelists), each table closed with its own COMMIT, then the NAT
//! table with one DNAT per peer.

use std::fmt::Write;

use neti_core::{PeerBundle, Realm};

use crate::error::RuleError;
use crate::rule::{FilterRule, NatRule};

/// Interface the optional port-80 egress rule is bound to
pub const PRIMARY_INTERFACE: &str = "eth0";

/// Fixed head of the filter table: subchain declarations, loopback and
/// established/related ingress, and the whitelist dispatches
const FILTER_PREAMBLE: &str = "\
*filter
-N ec2_whitelist
-N ssh_whitelist
-A INPUT -i lo -j ACCEPT
-A INPUT -m state --state ESTABLISHED,RELATED -j ACCEPT
-A INPUT -j ec2_whitelist
-A INPUT -j ssh_whitelist
";

/// The configured parts of the filter table
#[derive(Debug, Clone, Default)]
pub struct FilterPolicy {
    /// Accept new/established TCP ingress to port 80 and its return
    /// traffic on the primary interface
    pub open_80: bool,
    /// Drop all remaining TCP ingress after the whitelist dispatches
    pub reject_all: bool,
    /// Addresses or CIDRs allowed to reach TCP port 22
    pub ssh_whitelist: Vec<String>,
}

/// Render the complete rule program for one peer snapshot.
///
/// Pure over (snapshot, policy, realm): the same inputs always produce a
/// byte-identical program, and peers appear in snapshot order.
pub fn render_program(
    realm: Realm,
    policy: &FilterPolicy,
    peers: &[PeerBundle],
) -> Result<String, RuleError> {
    let mut program = String::from(FILTER_PREAMBLE);

    if policy.open_80 {
        program.push_str("-A INPUT -p tcp --dport 80 -m state --state NEW,ESTABLISHED -j ACCEPT\n");
        let _ = writeln!(
            program,
            "-A OUTPUT -o {PRIMARY_INTERFACE} -p tcp --sport 80 -m state --state ESTABLISHED -j ACCEPT"
        );
    }
    if policy.reject_all {
        // Placed after the whitelist dispatches, so whitelist hits win.
        program.push_str("-A INPUT -p tcp -j DROP\n");
    }

    for peer in peers {
        let rule = FilterRule::new("ec2_whitelist", &peer.filter_address(realm).to_string(), None)?;
        program.push_str(&rule.to_string());
    }
    for source in &policy.ssh_whitelist {
        let rule = FilterRule::new("ssh_whitelist", source, Some(22))?;
        program.push_str(&rule.to_string());
    }
    if realm.is_vpc() {
        let rule = FilterRule::new("ssh_whitelist", "10.0.0.0/8", None)?;
        program.push_str(&rule.to_string());
    }
    program.push_str("COMMIT\n");

    program.push_str("*nat\n");
    for peer in peers {
        let targets = peer.nat_targets(realm);
        let rule = NatRule::new("OUTPUT", &targets.overlay.to_string(), &targets.dest.to_string())?;
        program.push_str(&rule.to_string());
    }
    program.push_str("COMMIT\n");

    Ok(program)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(entry: &str) -> PeerBundle {
        PeerBundle::parse(entry).unwrap()
    }

    #[test]
    fn test_cross_realm_peer_rules() {
        // A legacy peer seen from a VPC host: only its public address is
        // reachable, for both the filter accept and the DNAT target.
        let peers = vec![peer("uuid1-1.2.3.4|10.0.0.5|10.99.0.7|0")];
        let program = render_program(Realm::Vpc, &FilterPolicy::default(), &peers).unwrap();

        assert!(program.contains("-A ec2_whitelist -s 1.2.3.4 -j ACCEPT\n"));
        assert!(program.contains("-A OUTPUT -d 10.99.0.7 -j DNAT --to-destination 1.2.3.4\n"));
    }

    #[test]
    fn test_same_realm_peer_rules() {
        let peers = vec![peer("uuid2-9.9.9.9|10.0.0.6|10.99.0.8|1")];
        let program = render_program(Realm::Vpc, &FilterPolicy::default(), &peers).unwrap();

        assert!(program.contains("-A ec2_whitelist -s 10.0.0.6 -j ACCEPT\n"));
        assert!(program.contains("-A OUTPUT -d 10.99.0.8 -j DNAT --to-destination 10.0.0.6\n"));
    }

    #[test]
    fn test_program_is_deterministic() {
        let peers = vec![
            peer("u1-1.2.3.4|10.0.0.5|10.99.0.7|0"),
            peer("u2-9.9.9.9|10.0.0.6|10.99.0.8|1"),
        ];
        let policy = FilterPolicy {
            open_80: true,
            reject_all: true,
            ssh_whitelist: vec!["5.6.7.0/24".to_string()],
        };
        let first = render_program(Realm::Vpc, &policy, &peers).unwrap();
        let second = render_program(Realm::Vpc, &policy, &peers).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_section_layout() {
        let peers = vec![peer("u1-1.2.3.4|10.0.0.5|10.99.0.7|0")];
        let program = render_program(Realm::Legacy, &FilterPolicy::default(), &peers).unwrap();

        let filter_at = program.find("*filter").unwrap();
        let nat_at = program.find("*nat").unwrap();
        assert!(filter_at < nat_at);
        // Each table closes with its own COMMIT.
        assert_eq!(program.matches("COMMIT\n").count(), 2);
        // Subchains are declared before anything dispatches into them.
        assert!(program.find("-N ec2_whitelist").unwrap() < program.find("-j ec2_whitelist").unwrap());
    }

    #[test]
    fn test_policy_toggles() {
        let peers = vec![peer("u1-1.2.3.4|10.0.0.5|10.99.0.7|0")];
        let closed = render_program(Realm::Legacy, &FilterPolicy::default(), &peers).unwrap();
        assert!(!closed.contains("--dport 80"));
        assert!(!closed.contains("-j DROP"));

        let policy = FilterPolicy {
            open_80: true,
            reject_all: true,
            ssh_whitelist: vec![],
        };
        let open = render_program(Realm::Legacy, &policy, &peers).unwrap();
        assert!(open.contains(
            "-A INPUT -p tcp --dport 80 -m state --state NEW,ESTABLISHED -j ACCEPT\n"
        ));
        assert!(open.contains(
            "-A OUTPUT -o eth0 -p tcp --sport 80 -m state --state ESTABLISHED -j ACCEPT\n"
        ));
        assert!(open.contains("-A INPUT -p tcp -j DROP\n"));
        // The drop sits after the whitelist dispatches so whitelist hits win.
        assert!(open.find("-A INPUT -j ssh_whitelist").unwrap() < open.find("-A INPUT -p tcp -j DROP").unwrap());
    }

    #[test]
    fn test_vpc_hosts_accept_rfc1918_ssh() {
        let peers = vec![peer("u1-1.2.3.4|10.0.0.5|10.99.0.7|1")];
        let vpc = render_program(Realm::Vpc, &FilterPolicy::default(), &peers).unwrap();
        assert!(vpc.contains("-A ssh_whitelist -s 10.0.0.0/8 -j ACCEPT\n"));

        let legacy = render_program(Realm::Legacy, &FilterPolicy::default(), &peers).unwrap();
        assert!(!legacy.contains("10.0.0.0/8"));
    }

    #[test]
    fn test_ssh_whitelist_entries_render_with_port() {
        let peers = vec![peer("u1-1.2.3.4|10.0.0.5|10.99.0.7|0")];
        let policy = FilterPolicy {
            ssh_whitelist: vec!["8.8.8.8".to_string(), "5.6.7.0/24".to_string()],
            ..FilterPolicy::default()
        };
        let program = render_program(Realm::Legacy, &policy, &peers).unwrap();
        assert!(program.contains("-A ssh_whitelist -s 8.8.8.8 -p tcp --dport 22 -j ACCEPT\n"));
        assert!(program.contains("-A ssh_whitelist -s 5.6.7.0/24 -p tcp --dport 22 -j ACCEPT\n"));
    }

    #[test]
    fn test_malformed_ssh_entry_aborts_synthesis() {
        let peers = vec![peer("u1-1.2.3.4|10.0.0.5|10.99.0.7|0")];
        let policy = FilterPolicy {
            ssh_whitelist: vec!["not-an-ip".to_string()],
            ..FilterPolicy::default()
        };
        let err = render_program(Realm::Legacy, &policy, &peers).unwrap_err();
        assert!(matches!(err, RuleError::InvalidAddress(_)));
    }

    #[test]
    fn test_peers_render_in_snapshot_order() {
        let peers = vec![
            peer("u1-9.9.9.9|10.0.0.6|10.99.0.8|0"),
            peer("u2-1.2.3.4|10.0.0.5|10.99.0.7|0"),
        ];
        let program = render_program(Realm::Legacy, &FilterPolicy::default(), &peers).unwrap();
        let first = program.find("-s 10.0.0.6").unwrap();
        let second = program.find("-s 10.0.0.5").unwrap();
        assert!(first < second);
    }
}
