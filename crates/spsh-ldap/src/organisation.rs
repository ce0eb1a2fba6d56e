//! Directory entries owned by an organisation

use tracing::{debug, error, info};

use crate::connection::DirectoryConnection;
use crate::dn;
use crate::error::{DirectoryError, DirectoryResult};
use crate::group::GroupMembershipManager;

#[derive(Debug, Clone)]
pub struct OrganisationDirectoryOps {
    base_dn: String,
    groups: GroupMembershipManager,
}

impl OrganisationDirectoryOps {
    pub fn new(base_dn: impl Into<String>) -> Self {
        let base_dn = base_dn.into();
        Self {
            groups: GroupMembershipManager::new(base_dn.clone()),
            base_dn,
        }
    }

    /// Entries below `ou={kennung}`, leaves first
    fn deletion_steps(&self, kennung: &str) -> [(&'static str, String); 3] {
        [
            ("group", dn::lehrer_group_dn(kennung, &self.base_dn)),
            ("role", dn::groups_role_dn(kennung, &self.base_dn)),
            ("organisational unit", dn::organisation_unit_dn(kennung, &self.base_dn)),
        ]
    }

    /// Delete the organisation's subtree. Entries that are already gone are
    /// skipped, so a repeated call picks up where a failed one stopped.
    pub async fn delete_organisation(
        &self,
        conn: &dyn DirectoryConnection,
        kennung: &str,
    ) -> DirectoryResult<()> {
        let mut deleted = Vec::new();

        for (step, entry_dn) in self.deletion_steps(kennung) {
            match conn.delete(&entry_dn).await {
                Ok(()) => {
                    debug!("Deleted {} {}", step, entry_dn);
                    deleted.push(step);
                }
                Err(e) if e.is_no_such_object() => {
                    debug!("{} {} already absent", step, entry_dn);
                }
                Err(e) if deleted.is_empty() => {
                    return Err(DirectoryError::DeleteOrganisation {
                        kennung: kennung.to_string(),
                        step,
                        source: Box::new(e),
                    });
                }
                Err(e) => {
                    error!(
                        kennung,
                        ?deleted,
                        "LDAP: Organisation {} left partially deleted, {} failed: {}",
                        kennung,
                        step,
                        e
                    );
                    return Err(DirectoryError::OrganisationPartiallyDeleted {
                        kennung: kennung.to_string(),
                        deleted,
                        step,
                        source: Box::new(e),
                    });
                }
            }
        }

        info!("LDAP: Deleted organisation {}", kennung);
        Ok(())
    }

    /// Members of the organisation's lehrer group; empty if it has none
    pub async fn organisation_members(
        &self,
        conn: &dyn DirectoryConnection,
        kennung: &str,
    ) -> DirectoryResult<Vec<String>> {
        let group_dn = self.groups.group_dn(kennung);
        Ok(self
            .groups
            .group_members(conn, &group_dn)
            .await?
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::RawAttribute;
    use crate::testing::InMemoryDirectory;

    const BASE: &str = "dc=example,dc=com";
    const OU: &str = "ou=1234567,dc=example,dc=com";
    const ROLE: &str = "cn=groups,ou=1234567,dc=example,dc=com";
    const GROUP: &str = "cn=lehrer-1234567,cn=groups,ou=1234567,dc=example,dc=com";

    fn seed_organisation(directory: &InMemoryDirectory) {
        let text = |s: &str| RawAttribute::Text(s.to_string());
        directory.seed(OU, vec![("objectClass", text("organizationalUnit"))]);
        directory.seed(ROLE, vec![("objectClass", text("organizationalRole"))]);
        directory.seed(
            GROUP,
            vec![
                ("objectClass", text("groupOfNames")),
                ("member", text("uid=a,ou=oeffentlicheSchulen,dc=example,dc=com")),
            ],
        );
    }

    #[tokio::test]
    async fn test_delete_organisation_removes_subtree() {
        let directory = InMemoryDirectory::new();
        seed_organisation(&directory);

        OrganisationDirectoryOps::new(BASE)
            .delete_organisation(&directory, "1234567")
            .await
            .unwrap();

        assert!(!directory.exists(GROUP));
        assert!(!directory.exists(ROLE));
        assert!(!directory.exists(OU));
        assert_eq!(
            directory.writes(),
            vec![
                format!("delete {}", GROUP),
                format!("delete {}", ROLE),
                format!("delete {}", OU)
            ]
        );
    }

    #[tokio::test]
    async fn test_delete_absent_organisation_succeeds() {
        let directory = InMemoryDirectory::new();
        OrganisationDirectoryOps::new(BASE)
            .delete_organisation(&directory, "1234567")
            .await
            .unwrap();
        assert!(directory.writes().is_empty());
    }

    #[tokio::test]
    async fn test_partial_failure_carries_kennung() {
        let directory = InMemoryDirectory::new();
        seed_organisation(&directory);
        directory.break_entry("delete", OU);

        let err = OrganisationDirectoryOps::new(BASE)
            .delete_organisation(&directory, "1234567")
            .await
            .unwrap_err();

        match &err {
            DirectoryError::OrganisationPartiallyDeleted { kennung, deleted, step, .. } => {
                assert_eq!(kennung, "1234567");
                assert_eq!(deleted, &vec!["group", "role"]);
                assert_eq!(*step, "organisational unit");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!directory.exists(GROUP));
        assert!(directory.exists(OU));
    }

    #[tokio::test]
    async fn test_first_step_failure() {
        let directory = InMemoryDirectory::new();
        seed_organisation(&directory);
        directory.break_entry("delete", GROUP);

        let err = OrganisationDirectoryOps::new(BASE)
            .delete_organisation(&directory, "1234567")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "DeleteOrganisationFailed");
        assert!(directory.exists(GROUP));
    }

    #[tokio::test]
    async fn test_organisation_members() {
        let directory = InMemoryDirectory::new();
        let ops = OrganisationDirectoryOps::new(BASE);
        assert!(ops.organisation_members(&directory, "1234567").await.unwrap().is_empty());

        seed_organisation(&directory);
        assert_eq!(
            ops.organisation_members(&directory, "1234567").await.unwrap(),
            vec!["uid=a,ou=oeffentlicheSchulen,dc=example,dc=com"]
        );
    }
}
