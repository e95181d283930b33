//! Config entry parsing.
//!
//! The desired-state tree has one fixed positional layout per load balancer
//! kind, below a configurable root:
//!
//! ```text
//! <root>/elb/<region>/<name>/<class>/<instance>
//! <root>/route53/<region>/<hostedZone>/<fqdn>/<class>/<value>
//! ```
//!
//! Any other key (directories included) is not ours and parses to `None`.

use std::fmt;
use std::str::FromStr;

use crate::store::StoreAction;

/// What happened to the key an entry was parsed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryAction {
    /// Found by the initial full read; applied without an immediate sync.
    ReadingConfig,
    Set,
    Delete,
}

impl From<StoreAction> for EntryAction {
    fn from(action: StoreAction) -> Self {
        match action {
            StoreAction::Set => EntryAction::Set,
            StoreAction::Delete => EntryAction::Delete,
        }
    }
}

impl EntryAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryAction::ReadingConfig => "reading_config",
            EntryAction::Set => "set",
            EntryAction::Delete => "delete",
        }
    }
}

/// Kind of external load balancer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadBalancerKind {
    /// Instance registration group.
    Elb,
    /// DNS record set.
    Route53,
}

impl LoadBalancerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadBalancerKind::Elb => "elb",
            LoadBalancerKind::Route53 => "route53",
        }
    }
}

impl fmt::Display for LoadBalancerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Membership policy of a load balancer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Class {
    /// At most one member; the most recently written key wins.
    Single,
    /// Unordered set of members.
    Multiple,
}

impl Class {
    pub fn as_str(&self) -> &'static str {
        match self {
            Class::Single => "single",
            Class::Multiple => "multiple",
        }
    }
}

impl FromStr for Class {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "single" => Ok(Class::Single),
            "multiple" => Ok(Class::Multiple),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Positional fields a load balancer needs for its setup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryMetadata {
    pub region: String,
    /// ELB name, or record FQDN.
    pub name: String,
    pub class: Class,
    pub hosted_zone: Option<String>,
    /// Store path holding this load balancer's class directories.
    pub config_prefix: String,
}

/// A parsed change to the desired-state tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigEntry {
    pub action: EntryAction,
    pub load_balancer_id: String,
    pub kind: LoadBalancerKind,
    pub member: String,
    pub metadata: EntryMetadata,
}

/// Maps store keys below a root to [`ConfigEntry`] values.
#[derive(Debug, Clone)]
pub struct KeyParser {
    root: String,
}

impl KeyParser {
    pub fn new(root: &str) -> Self {
        Self {
            root: root.trim_end_matches('/').to_string(),
        }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    /// Parse a key, or `None` if it does not describe a member.
    pub fn parse(&self, key: &str, action: EntryAction) -> Option<ConfigEntry> {
        let rest = key.strip_prefix(self.root.as_str())?.strip_prefix('/')?;
        let segments: Vec<&str> = rest.split('/').collect();
        if segments.iter().any(|s| s.is_empty()) {
            return None;
        }

        match segments.as_slice() {
            ["elb", region, name, class, instance] => Some(ConfigEntry {
                action,
                load_balancer_id: format!("elb_{}_{}", region, name),
                kind: LoadBalancerKind::Elb,
                member: instance.to_string(),
                metadata: EntryMetadata {
                    region: region.to_string(),
                    name: name.to_string(),
                    class: class.parse().ok()?,
                    hosted_zone: None,
                    config_prefix: format!("{}/elb/{}/{}", self.root, region, name),
                },
            }),
            ["route53", region, zone, fqdn, class, value] => Some(ConfigEntry {
                action,
                load_balancer_id: format!("route53_{}_{}", zone, fqdn),
                kind: LoadBalancerKind::Route53,
                member: value.to_string(),
                metadata: EntryMetadata {
                    region: region.to_string(),
                    name: fqdn.to_string(),
                    class: class.parse().ok()?,
                    hosted_zone: Some(zone.to_string()),
                    config_prefix: format!("{}/route53/{}/{}/{}", self.root, region, zone, fqdn),
                },
            }),
            _ => None,
        }
    }
}
