//! Group membership of person entries
//!
//! Every organisation has one `groupOfNames` for its lehrer. The chain
//! leading to it (organisational unit, role, group) is created lazily when
//! the first person is added, and the group is removed together with its
//! last member since `groupOfNames` cannot be empty.

use tracing::{debug, info};

use crate::connection::{DirectoryConnection, Modification, RawAttribute, SearchScope};
use crate::dn;
use crate::error::{
    DirectoryError, DirectoryResult, RC_ATTRIBUTE_OR_VALUE_EXISTS, RC_NO_SUCH_ATTRIBUTE,
};

pub const MEMBER_ATTRIBUTE: &str = "member";

/// Decode a `member` attribute into DN strings, whatever shape it came in.
/// A missing attribute has no members.
pub fn normalize_members(raw: Option<&RawAttribute>) -> Vec<String> {
    raw.map(RawAttribute::to_strings).unwrap_or_default()
}

/// One check-then-create step of the group chain
#[derive(Debug, Clone, PartialEq, Eq)]
struct EnsureEntry {
    label: &'static str,
    dn: String,
    attrs: Vec<(String, Vec<String>)>,
}

fn attr(name: &str, values: &[&str]) -> (String, Vec<String>) {
    (
        name.to_string(),
        values.iter().map(|v| v.to_string()).collect(),
    )
}

#[derive(Debug, Clone)]
pub struct GroupMembershipManager {
    base_dn: String,
}

impl GroupMembershipManager {
    pub fn new(base_dn: impl Into<String>) -> Self {
        Self {
            base_dn: base_dn.into(),
        }
    }

    pub fn group_dn(&self, kennung: &str) -> String {
        dn::lehrer_group_dn(kennung, &self.base_dn)
    }

    /// Parents of the lehrer group, outermost first
    fn parent_chain(&self, kennung: &str) -> Vec<EnsureEntry> {
        vec![
            EnsureEntry {
                label: "organisational unit",
                dn: dn::organisation_unit_dn(kennung, &self.base_dn),
                attrs: vec![
                    attr("objectClass", &["organizationalUnit"]),
                    attr("ou", &[kennung]),
                ],
            },
            EnsureEntry {
                label: "organisational role",
                dn: dn::groups_role_dn(kennung, &self.base_dn),
                attrs: vec![
                    attr("objectClass", &["organizationalRole"]),
                    attr("cn", &[dn::GROUPS_ROLE_CN]),
                ],
            },
        ]
    }

    async fn ensure_exists(
        &self,
        conn: &dyn DirectoryConnection,
        step: &EnsureEntry,
    ) -> DirectoryResult<()> {
        let found = conn
            .search(&step.dn, SearchScope::Base, "(objectClass=*)", &["objectClass"])
            .await?;
        if !found.is_empty() {
            return Ok(());
        }

        debug!("Creating {} {}", step.label, step.dn);
        match conn.add(&step.dn, step.attrs.clone()).await {
            Ok(()) => {
                info!("LDAP: Created {} {}", step.label, step.dn);
                Ok(())
            }
            // created concurrently in the meantime
            Err(e) if e.is_already_exists() => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Current members of a group, `None` when the group does not exist
    pub async fn group_members(
        &self,
        conn: &dyn DirectoryConnection,
        group_dn: &str,
    ) -> DirectoryResult<Option<Vec<String>>> {
        let entries = conn
            .search(group_dn, SearchScope::Base, "(objectClass=*)", &[MEMBER_ATTRIBUTE])
            .await?;
        Ok(entries
            .into_iter()
            .next()
            .map(|entry| normalize_members(entry.attr(MEMBER_ATTRIBUTE))))
    }

    /// Add `person_dn` to the lehrer group of `kennung`, creating the group
    /// and its parents when missing. Returns `false` if the person already
    /// was a member.
    pub async fn add_person_to_group(
        &self,
        conn: &dyn DirectoryConnection,
        username: &str,
        kennung: &str,
        person_dn: &str,
    ) -> DirectoryResult<bool> {
        let group_dn = self.group_dn(kennung);
        let wrap = |e: DirectoryError| DirectoryError::AddPersonToGroup {
            group: group_dn.clone(),
            source: Box::new(e),
        };

        for step in self.parent_chain(kennung) {
            self.ensure_exists(conn, &step).await.map_err(wrap)?;
        }

        let mut members = self.group_members(conn, &group_dn).await.map_err(wrap)?;
        if members.is_none() {
            debug!("Group {} missing, creating it with {}", group_dn, username);
            let group_cn = dn::lehrer_group_cn(kennung);
            let created = conn
                .add(
                    &group_dn,
                    vec![
                        attr("objectClass", &["groupOfNames"]),
                        attr("cn", &[group_cn.as_str()]),
                        attr(MEMBER_ATTRIBUTE, &[person_dn]),
                    ],
                )
                .await;
            match created {
                Ok(()) => {
                    info!("LDAP: Added person {} to new group {}", username, group_dn);
                    return Ok(true);
                }
                // another writer created the group in the meantime
                Err(e) if e.is_already_exists() => {
                    debug!("Group {} appeared concurrently", group_dn);
                    members = self.group_members(conn, &group_dn).await.map_err(wrap)?;
                }
                Err(e) => return Err(wrap(e)),
            }
        }

        if members
            .unwrap_or_default()
            .iter()
            .any(|m| dn::dn_eq(m, person_dn))
        {
            debug!("Person {} is already a member of {}", username, group_dn);
            return Ok(false);
        }

        match conn
            .modify(
                &group_dn,
                vec![Modification::add(MEMBER_ATTRIBUTE, vec![person_dn.to_string()])],
            )
            .await
        {
            Ok(()) => {}
            Err(e) if e.ldap_code() == Some(RC_ATTRIBUTE_OR_VALUE_EXISTS) => {
                debug!("Person {} was added to {} concurrently", username, group_dn);
                return Ok(false);
            }
            Err(e) => return Err(wrap(e)),
        }

        info!("LDAP: Added person {} to group {}", username, group_dn);
        Ok(true)
    }

    /// Remove `person_dn` from the lehrer group of `kennung`. Returns
    /// `false` if the person was not a member.
    pub async fn remove_person_from_group(
        &self,
        conn: &dyn DirectoryConnection,
        username: &str,
        kennung: &str,
        person_dn: &str,
    ) -> DirectoryResult<bool> {
        let group_dn = self.group_dn(kennung);
        debug!("Removing person {} from group {}", username, group_dn);
        self.remove_member(conn, &group_dn, person_dn).await
    }

    /// Remove `person_dn` from the group at `group_dn`, deleting the group if
    /// the person was its only member.
    pub async fn remove_member(
        &self,
        conn: &dyn DirectoryConnection,
        group_dn: &str,
        person_dn: &str,
    ) -> DirectoryResult<bool> {
        let wrap = |e: DirectoryError| DirectoryError::RemovePersonFromGroup {
            group: group_dn.to_string(),
            source: Box::new(e),
        };

        let members = self
            .group_members(conn, group_dn)
            .await
            .map_err(wrap)?
            .ok_or_else(|| DirectoryError::GroupNotFound(group_dn.to_string()))?;

        if !members.iter().any(|m| dn::dn_eq(m, person_dn)) {
            debug!("{} is not a member of {}", person_dn, group_dn);
            return Ok(false);
        }

        if members.len() == 1 {
            conn.delete(group_dn).await.map_err(wrap)?;
            info!("LDAP: Removed last member, deleted group {}", group_dn);
        } else {
            let stored = members
                .into_iter()
                .find(|m| dn::dn_eq(m, person_dn))
                .unwrap_or_else(|| person_dn.to_string());
            match conn
                .modify(group_dn, vec![Modification::delete(MEMBER_ATTRIBUTE, vec![stored])])
                .await
            {
                Ok(()) => info!("LDAP: Removed {} from group {}", person_dn, group_dn),
                Err(e) if e.ldap_code() == Some(RC_NO_SUCH_ATTRIBUTE) => {
                    debug!("{} left {} concurrently", person_dn, group_dn);
                    return Ok(false);
                }
                Err(e) => return Err(wrap(e)),
            }
        }

        Ok(true)
    }

    /// DNs of all groups listing `person_dn` as a member
    pub async fn groups_with_member(
        &self,
        conn: &dyn DirectoryConnection,
        person_dn: &str,
    ) -> DirectoryResult<Vec<String>> {
        let filter = format!(
            "(&(objectClass=groupOfNames)({}={}))",
            MEMBER_ATTRIBUTE,
            ldap3::ldap_escape(person_dn)
        );
        let entries = conn
            .search(&self.base_dn, SearchScope::Subtree, &filter, &["cn"])
            .await?;
        Ok(entries.into_iter().map(|e| e.dn).collect())
    }

    /// Rewrite `old_dn` to its renamed form in every group that lists it,
    /// keeping the order of the other members.
    pub async fn update_member_dn_in_groups(
        &self,
        conn: &dyn DirectoryConnection,
        old_username: &str,
        new_username: &str,
        old_dn: &str,
    ) -> DirectoryResult<String> {
        let new_dn = dn::rename_dn(old_dn, new_username);
        let filter = format!("({}={})", MEMBER_ATTRIBUTE, ldap3::ldap_escape(old_dn));
        let groups = conn
            .search(&self.base_dn, SearchScope::Subtree, &filter, &[MEMBER_ATTRIBUTE])
            .await?;

        if groups.is_empty() {
            info!("LDAP: No groups found for person:{}", old_username);
            return Ok(format!("No groups found for person:{}", old_username));
        }

        let mut updated = 0;
        for group in groups {
            let members = normalize_members(group.attr(MEMBER_ATTRIBUTE));
            if members.is_empty() {
                return Err(DirectoryError::MemberDataParse(group.dn));
            }

            let rewritten: Vec<String> = members
                .into_iter()
                .map(|m| if dn::dn_eq(&m, old_dn) { new_dn.clone() } else { m })
                .collect();

            conn.modify(
                &group.dn,
                vec![Modification::replace(MEMBER_ATTRIBUTE, rewritten)],
            )
            .await?;
            debug!("Updated member {} to {} in {}", old_dn, new_dn, group.dn);
            updated += 1;
        }

        info!("LDAP: Updated member data for {} groups of {}", updated, new_username);
        Ok(format!("Updated member data for {} groups.", updated))
    }
}
