//! Email domain classification
//!
//! Persons are stored below one of two root subtrees, chosen by the email
//! domain of the school they belong to.

use std::collections::HashSet;
use std::fmt;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use spsh_core::config::LdapConfigSection;
use spsh_core::types::OrganisationLookup;
use tracing::{debug, info};

use crate::error::{DirectoryError, DirectoryResult};

/// Root subtree a person entry lives under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchoolSubtree {
    OeffentlicheSchulen,
    Ersatzschulen,
}

impl SchoolSubtree {
    /// The `ou` value of the subtree
    pub fn ou(&self) -> &'static str {
        match self {
            SchoolSubtree::OeffentlicheSchulen => "oeffentlicheSchulen",
            SchoolSubtree::Ersatzschulen => "ersatzSchulen",
        }
    }
}

impl fmt::Display for SchoolSubtree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.ou())
    }
}

/// The two email domains the directory serves
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainRoots {
    pub oeffentliche_schulen: String,
    pub ersatzschulen: String,
}

impl DomainRoots {
    pub fn new(oeffentliche_schulen: impl Into<String>, ersatzschulen: impl Into<String>) -> Self {
        Self {
            oeffentliche_schulen: oeffentliche_schulen.into(),
            ersatzschulen: ersatzschulen.into(),
        }
    }

    pub fn from_config(config: &LdapConfigSection) -> Self {
        Self::new(
            config.oeffentliche_schulen_domain.clone(),
            config.ersatzschulen_domain.clone(),
        )
    }
}

/// Split an address into local part and domain.
pub fn split_email_address(address: &str) -> DirectoryResult<(&str, &str)> {
    match address.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() && !domain.contains('@') => {
            Ok((local, domain))
        }
        _ => Err(DirectoryError::InvalidEmailAddress(address.to_string())),
    }
}

pub struct EmailDomainResolver {
    roots: RwLock<DomainRoots>,
}

impl EmailDomainResolver {
    pub fn new(roots: DomainRoots) -> Self {
        Self {
            roots: RwLock::new(roots),
        }
    }

    pub fn roots(&self) -> DomainRoots {
        self.roots.read().clone()
    }

    /// Swap the served domains; later classifications use the new values
    pub fn reconfigure(&self, roots: DomainRoots) {
        info!(
            "Email domains reconfigured: oeffentliche Schulen={}, Ersatzschulen={}",
            roots.oeffentliche_schulen, roots.ersatzschulen
        );
        *self.roots.write() = roots;
    }

    pub fn classify_domain(&self, email_domain: &str) -> DirectoryResult<SchoolSubtree> {
        let roots = self.roots.read();
        if email_domain == roots.oeffentliche_schulen {
            Ok(SchoolSubtree::OeffentlicheSchulen)
        } else if email_domain == roots.ersatzschulen {
            Ok(SchoolSubtree::Ersatzschulen)
        } else {
            debug!("Email domain {} is not served", email_domain);
            Err(DirectoryError::InvalidEmailDomain(email_domain.to_string()))
        }
    }

    pub fn classify_email_address(&self, address: &str) -> DirectoryResult<SchoolSubtree> {
        let (_, domain) = split_email_address(address)?;
        self.classify_domain(domain)
    }
}

/// Walk from `organisation_id` towards the root and return the first
/// declared email domain. `None` when no organisation in the chain declares
/// one, or the chain cannot be followed.
pub async fn resolve_effective_email_domain(
    organisations: &dyn OrganisationLookup,
    organisation_id: &str,
) -> Option<String> {
    let mut visited = HashSet::new();
    let mut current = organisation_id.to_string();

    loop {
        if !visited.insert(current.clone()) {
            debug!("Organisation chain of {} contains a cycle at {}", organisation_id, current);
            return None;
        }

        let Some(node) = organisations.find_by_id(&current).await else {
            debug!("Organisation {} not found while resolving email domain", current);
            return None;
        };

        if let Some(domain) = node.declared_email_domain() {
            return Some(domain.to_string());
        }

        match node.parent_id {
            Some(parent) => current = parent,
            None => return None,
        }
    }
}
