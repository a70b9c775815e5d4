//! Group member identity
//!
//! Every live host publishes one ephemeral group member whose identifier
//! carries its full address bundle. The wire form is
//! `<uuid>-<public>|<private>|<overlay>|<realm-digit>`, where the uuid is
//! the store-assigned unique suffix up to the first `-` and the rest is
//! the [`AddressTuple`] encoding.

use std::fmt::{self, Display};
use std::net::Ipv4Addr;

use crate::error::PeerError;
use crate::realm::Realm;

/// Delimiter between the store-assigned uuid and the address payload
pub const UUID_DELIMITER: char = '-';

/// Delimiter between the fields of the address payload
pub const IP_DELIMITER: char = '|';

/// Opaque identifier of a host within its cloud, stable for the host's lifetime
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InstanceId(String);

impl InstanceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The address bundle a host publishes: public, private and overlay
/// addresses plus its realm
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressTuple {
    pub public: Ipv4Addr,
    pub private: Ipv4Addr,
    pub overlay: Ipv4Addr,
    pub realm: Realm,
}

impl AddressTuple {
    /// Wire encoding: `public|private|overlay|realm-digit`
    pub fn encode(&self) -> String {
        format!(
            "{}{IP_DELIMITER}{}{IP_DELIMITER}{}{IP_DELIMITER}{}",
            self.public,
            self.private,
            self.overlay,
            self.realm.digit()
        )
    }
}

impl Display for AddressTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.encode())
    }
}

/// The pair of addresses a DNAT rule needs for one peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NatTargets {
    /// The peer's overlay address (the rule's match)
    pub overlay: Ipv4Addr,
    /// The peer's reachable real address (the rule's rewrite target)
    pub dest: Ipv4Addr,
}

/// A validated view of one group member's published address bundle
///
/// Parsing is total: any entry that does not conform to the member
/// identifier grammar raises [`PeerError::IpPatternMismatch`], and one
/// malformed entry never affects the rest of a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerBundle {
    tuple: AddressTuple,
}

impl PeerBundle {
    /// Parse one member identifier of the form `<uuid>-<tuple>`
    pub fn parse(entry: &str) -> Result<Self, PeerError> {
        let mismatch = || PeerError::IpPatternMismatch(entry.to_string());

        // The uuid up to the first delimiter is store-assigned noise.
        let (_uuid, payload) = entry.split_once(UUID_DELIMITER).ok_or_else(mismatch)?;

        // The realm digit is checked before the field count, so a trailing
        // junk field fails here rather than as an address parse error.
        let (_, realm_digit) = payload.rsplit_once(IP_DELIMITER).ok_or_else(mismatch)?;
        let realm = Realm::from_digit(realm_digit).ok_or_else(mismatch)?;

        let fields: Vec<&str> = payload.split(IP_DELIMITER).collect();
        let [public, private, overlay, _] = fields.as_slice() else {
            return Err(mismatch());
        };

        let parse_addr = |field: &str| field.parse::<Ipv4Addr>().map_err(|_| mismatch());
        let tuple = AddressTuple {
            public: parse_addr(public)?,
            private: parse_addr(private)?,
            overlay: parse_addr(overlay)?,
            realm,
        };
        Ok(Self { tuple })
    }

    pub fn tuple(&self) -> &AddressTuple {
        &self.tuple
    }

    pub fn overlay(&self) -> Ipv4Addr {
        self.tuple.overlay
    }

    /// The source address an ingress accept rule should match for this peer.
    ///
    /// Same-realm peers are reachable over their private address; cross-realm
    /// peers only over their public one.
    pub fn filter_address(&self, self_realm: Realm) -> Ipv4Addr {
        if self.tuple.realm == self_realm {
            self.tuple.private
        } else {
            self.tuple.public
        }
    }

    /// The match/rewrite pair for the DNAT rule that makes this peer's
    /// overlay address reachable from a host in `self_realm`
    pub fn nat_targets(&self, self_realm: Realm) -> NatTargets {
        NatTargets {
            overlay: self.tuple.overlay,
            dest: self.filter_address(self_realm),
        }
    }
}
