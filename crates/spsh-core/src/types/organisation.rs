//! Organisation types

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// An organisation as far as the directory client cares about it: its
/// `Kennung`, its parent and the email domain it may declare.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrganisationNode {
    pub id: String,
    #[serde(default)]
    pub kennung: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub email_domain: Option<String>,
}

impl OrganisationNode {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kennung: None,
            name: None,
            parent_id: None,
            email_domain: None,
        }
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn with_email_domain(mut self, domain: impl Into<String>) -> Self {
        self.email_domain = Some(domain.into());
        self
    }

    pub fn with_kennung(mut self, kennung: impl Into<String>) -> Self {
        self.kennung = Some(kennung.into());
        self
    }

    /// The declared email domain, ignoring empty values
    pub fn declared_email_domain(&self) -> Option<&str> {
        self.email_domain.as_deref().filter(|d| !d.is_empty())
    }
}

/// Read access to the organisation hierarchy owned by the upstream service.
#[async_trait]
pub trait OrganisationLookup: Send + Sync {
    async fn find_by_id(&self, id: &str) -> Option<OrganisationNode>;
}

/// Organisation hierarchy held in memory, loaded from a TOML document of
/// `[[organisation]]` tables.
#[derive(Debug, Clone, Default)]
pub struct InMemoryOrganisations {
    nodes: HashMap<String, OrganisationNode>,
}

#[derive(Deserialize)]
struct OrganisationFile {
    #[serde(default)]
    organisation: Vec<OrganisationNode>,
}

impl InMemoryOrganisations {
    pub fn new(nodes: impl IntoIterator<Item = OrganisationNode>) -> Self {
        Self {
            nodes: nodes.into_iter().map(|n| (n.id.clone(), n)).collect(),
        }
    }

    pub fn from_toml(content: &str) -> crate::Result<Self> {
        let file: OrganisationFile =
            toml::from_str(content).map_err(|e| crate::Error::ConfigParse(e.to_string()))?;
        let organisations = Self::new(file.organisation);
        tracing::debug!("Loaded {} organisations", organisations.len());
        Ok(organisations)
    }

    pub fn from_file(path: &str) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn insert(&mut self, node: OrganisationNode) {
        self.nodes.insert(node.id.clone(), node);
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[async_trait]
impl OrganisationLookup for InMemoryOrganisations {
    async fn find_by_id(&self, id: &str) -> Option<OrganisationNode> {
        self.nodes.get(id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_from_toml() {
        let orgs = InMemoryOrganisations::from_toml(
            r#"
            [[organisation]]
            id = "root"
            emailDomain = "schule-sh.de"

            [[organisation]]
            id = "school-1"
            kennung = "1234567"
            parentId = "root"
            "#,
        )
        .unwrap();

        assert_eq!(orgs.len(), 2);
        let school = orgs.find_by_id("school-1").await.unwrap();
        assert_eq!(school.kennung.as_deref(), Some("1234567"));
        assert_eq!(school.parent_id.as_deref(), Some("root"));
        assert!(orgs.find_by_id("missing").await.is_none());
    }

    #[test]
    fn test_empty_domain_is_not_declared() {
        let node = OrganisationNode::new("x").with_email_domain("");
        assert_eq!(node.declared_email_domain(), None);
    }
}
