//! Person entries
//!
//! All methods run on an already bound connection and are safe to repeat:
//! a retried call observes what the previous attempt left behind and only
//! performs the writes still missing.

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use spsh_core::types::PersonData;
use tracing::{debug, info, warn};

use crate::connection::{DirectoryConnection, Modification, RawEntry, SearchScope};
use crate::dn;
use crate::domain::SchoolSubtree;
use crate::error::{DirectoryError, DirectoryResult};
use crate::group::GroupMembershipManager;

pub const ATTR_ENTRY_UUID: &str = "entryUUID";
pub const ATTR_GIVEN_NAME: &str = "givenName";
pub const ATTR_SURNAME: &str = "sn";
pub const ATTR_COMMON_NAME: &str = "cn";
pub const ATTR_MAIL_PRIMARY: &str = "mailPrimaryAddress";
pub const ATTR_MAIL_ALTERNATIVE: &str = "mailAlternativeAddress";
pub const ATTR_USER_PASSWORD: &str = "userPassword";

const PERSON_OBJECT_CLASSES: &[&str] = &["inetOrgPerson", "univentionMail"];

const PERSON_ATTRIBUTES: &[&str] = &[
    dn::PERSON_NAMING_ATTRIBUTE,
    ATTR_ENTRY_UUID,
    ATTR_GIVEN_NAME,
    ATTR_SURNAME,
    ATTR_COMMON_NAME,
    ATTR_MAIL_PRIMARY,
    ATTR_MAIL_ALTERNATIVE,
];

pub const DEFAULT_PASSWORD_LENGTH: usize = 12;

/// Attributes of a person entry as read from the directory
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonAttributes {
    pub dn: String,
    pub entry_uuid: Option<String>,
    pub given_name: Option<String>,
    pub surname: Option<String>,
    pub cn: Option<String>,
    pub mail_primary_address: Option<String>,
    #[serde(default)]
    pub mail_alternative_address: Vec<String>,
}

impl From<&RawEntry> for PersonAttributes {
    fn from(entry: &RawEntry) -> Self {
        Self {
            dn: entry.dn.clone(),
            entry_uuid: entry.first_value(ATTR_ENTRY_UUID),
            given_name: entry.first_value(ATTR_GIVEN_NAME),
            surname: entry.first_value(ATTR_SURNAME),
            cn: entry.first_value(ATTR_COMMON_NAME),
            mail_primary_address: entry.first_value(ATTR_MAIL_PRIMARY),
            mail_alternative_address: entry.values(ATTR_MAIL_ALTERNATIVE),
        }
    }
}

/// Outcome of an attribute update
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeUpdate {
    /// DN of the entry after the update
    pub dn: String,
    pub changed_attributes: Vec<&'static str>,
    /// Summary of the group rewrite, present when the person was renamed
    pub groups: Option<String>,
}

/// Primary address before and after an email change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailChange {
    pub previous_primary: Option<String>,
    pub primary: String,
}

fn attr(name: &str, values: &[&str]) -> (String, Vec<String>) {
    (
        name.to_string(),
        values.iter().map(|v| v.to_string()).collect(),
    )
}

/// Random password with at least one lowercase letter, uppercase letter,
/// digit and symbol.
pub fn generate_password(length: usize) -> String {
    const LOWER: &[u8] = b"abcdefghijkmnopqrstuvwxyz";
    const UPPER: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ";
    const DIGITS: &[u8] = b"23456789";
    const SYMBOLS: &[u8] = b"!#$%&*+-=?@_";
    const CLASSES: [&[u8]; 4] = [LOWER, UPPER, DIGITS, SYMBOLS];

    let mut rng = rand::rng();
    let length = length.max(CLASSES.len());

    let mut chars: Vec<char> = CLASSES
        .iter()
        .map(|class| class[rng.random_range(0..class.len())] as char)
        .collect();
    while chars.len() < length {
        let class = CLASSES[rng.random_range(0..CLASSES.len())];
        chars.push(class[rng.random_range(0..class.len())] as char);
    }
    chars.shuffle(&mut rng);
    chars.into_iter().collect()
}

#[derive(Debug, Clone)]
pub struct PersonEntryManager {
    base_dn: String,
    groups: GroupMembershipManager,
}

impl PersonEntryManager {
    pub fn new(base_dn: impl Into<String>) -> Self {
        let base_dn = base_dn.into();
        Self {
            groups: GroupMembershipManager::new(base_dn.clone()),
            base_dn,
        }
    }

    pub fn groups(&self) -> &GroupMembershipManager {
        &self.groups
    }

    pub fn person_dn(&self, username: &str, subtree: SchoolSubtree) -> String {
        dn::build_person_dn(username, subtree.ou(), &self.base_dn)
    }

    async fn read_entry(
        &self,
        conn: &dyn DirectoryConnection,
        entry_dn: &str,
    ) -> DirectoryResult<Option<RawEntry>> {
        let entries = conn
            .search(entry_dn, SearchScope::Base, "(objectClass=*)", PERSON_ATTRIBUTES)
            .await?;
        Ok(entries.into_iter().next())
    }

    /// Person entry with the given `uid` anywhere below the base DN
    pub async fn find_entry_by_uid(
        &self,
        conn: &dyn DirectoryConnection,
        username: &str,
    ) -> DirectoryResult<Option<RawEntry>> {
        let filter = format!(
            "({}={})",
            dn::PERSON_NAMING_ATTRIBUTE,
            ldap3::ldap_escape(username)
        );
        let entries = conn
            .search(&self.base_dn, SearchScope::Subtree, &filter, PERSON_ATTRIBUTES)
            .await?;
        if entries.len() > 1 {
            warn!("Found {} entries for uid {}, using the first", entries.len(), username);
        }
        Ok(entries.into_iter().next())
    }

    async fn require_entry(
        &self,
        conn: &dyn DirectoryConnection,
        username: &str,
    ) -> DirectoryResult<RawEntry> {
        self.find_entry_by_uid(conn, username)
            .await?
            .ok_or_else(|| DirectoryError::EntryNotFound(username.to_string()))
    }

    /// Best-effort read of the directory assigned `entryUUID`
    async fn fetch_entry_uuid(
        &self,
        conn: &dyn DirectoryConnection,
        entry_dn: &str,
    ) -> Option<String> {
        match conn
            .search(entry_dn, SearchScope::Base, "(objectClass=*)", &[ATTR_ENTRY_UUID])
            .await
        {
            Ok(entries) => {
                let uuid = entries
                    .first()
                    .and_then(|entry| entry.first_value(ATTR_ENTRY_UUID));
                if uuid.is_none() {
                    warn!("LDAP: entryUUID of {} could not be read", entry_dn);
                }
                uuid
            }
            Err(e) => {
                warn!(error = %e, "LDAP: entryUUID of {} could not be read", entry_dn);
                None
            }
        }
    }

    pub async fn is_existing(
        &self,
        conn: &dyn DirectoryConnection,
        username: &str,
        subtree: SchoolSubtree,
    ) -> DirectoryResult<bool> {
        let entry_dn = self.person_dn(username, subtree);
        Ok(self.read_entry(conn, &entry_dn).await?.is_some())
    }

    /// Attributes of the person's entry. A missing entry is created empty
    /// below `subtree` first.
    pub async fn get_or_create_attributes(
        &self,
        conn: &dyn DirectoryConnection,
        username: &str,
        subtree: SchoolSubtree,
    ) -> DirectoryResult<PersonAttributes> {
        if let Some(entry) = self.find_entry_by_uid(conn, username).await? {
            return Ok(PersonAttributes::from(&entry));
        }

        let entry_dn = self.person_dn(username, subtree);
        debug!("LDAP: No entry for {}, creating {}", username, entry_dn);
        let created = conn
            .add(
                &entry_dn,
                vec![
                    attr("objectClass", PERSON_OBJECT_CLASSES),
                    attr(dn::PERSON_NAMING_ATTRIBUTE, &[username]),
                    attr(ATTR_COMMON_NAME, &[username]),
                    attr(ATTR_SURNAME, &[username]),
                ],
            )
            .await;
        match created {
            Ok(()) => info!("LDAP: Created empty entry {}", entry_dn),
            Err(e) if e.is_already_exists() => debug!("Entry {} appeared concurrently", entry_dn),
            Err(e) => return Err(e),
        }

        Ok(PersonAttributes {
            entry_uuid: self.fetch_entry_uuid(conn, &entry_dn).await,
            cn: Some(username.to_string()),
            surname: Some(username.to_string()),
            dn: entry_dn,
            ..Default::default()
        })
    }

    /// Create the lehrer entry below `subtree` and add it to the lehrer
    /// group of `kennung`. An existing entry is left untouched.
    pub async fn create_lehrer(
        &self,
        conn: &dyn DirectoryConnection,
        person: &PersonData,
        subtree: SchoolSubtree,
        kennung: &str,
        mail_primary_address: Option<&str>,
    ) -> DirectoryResult<PersonData> {
        let username = person
            .username()
            .ok_or_else(|| DirectoryError::UsernameRequired(person.id.clone()))?;
        let entry_dn = self.person_dn(username, subtree);
        debug!("LDAP: createLehrer {}", entry_dn);

        if let Some(existing) = self.read_entry(conn, &entry_dn).await? {
            info!("LDAP: Lehrer {} exists, nothing to create", entry_dn);
            let mut person = person.clone();
            if person.entry_uuid.is_none() {
                person.entry_uuid = existing.first_value(ATTR_ENTRY_UUID);
            }
            return Ok(person);
        }

        let mut attrs = vec![
            attr("objectClass", PERSON_OBJECT_CLASSES),
            attr(dn::PERSON_NAMING_ATTRIBUTE, &[username]),
            attr(ATTR_COMMON_NAME, &[username]),
            attr(ATTR_GIVEN_NAME, &[person.vorname.as_str()]),
            attr(ATTR_SURNAME, &[person.familienname.as_str()]),
        ];
        if let Some(mail) = mail_primary_address {
            attrs.push(attr(ATTR_MAIL_PRIMARY, &[mail]));
        }

        conn.add(&entry_dn, attrs)
            .await
            .map_err(|e| DirectoryError::CreateLehrer {
                dn: entry_dn.clone(),
                source: Box::new(e),
            })?;
        info!("LDAP: Created lehrer entry {}", entry_dn);

        if let Err(group_error) = self
            .groups
            .add_person_to_group(conn, username, kennung, &entry_dn)
            .await
        {
            // leave nothing behind so the next attempt starts from scratch
            if let Err(e) = conn.delete(&entry_dn).await {
                warn!(error = %e, "LDAP: Could not remove half-created entry {}", entry_dn);
            }
            return Err(DirectoryError::CreateLehrer {
                dn: entry_dn,
                source: Box::new(group_error),
            });
        }

        let mut created = person.clone();
        created.entry_uuid = self.fetch_entry_uuid(conn, &entry_dn).await;
        Ok(created)
    }

    /// Remove the lehrer from the group of `kennung` and delete the entry.
    /// Returns `false` when there was no entry.
    pub async fn delete_lehrer(
        &self,
        conn: &dyn DirectoryConnection,
        username: &str,
        subtree: SchoolSubtree,
        kennung: &str,
    ) -> DirectoryResult<bool> {
        let entry_dn = self.person_dn(username, subtree);

        if self.read_entry(conn, &entry_dn).await?.is_none() {
            info!("LDAP: Lehrer {} does not exist, nothing to delete", entry_dn);
            return Ok(false);
        }

        match self
            .groups
            .remove_person_from_group(conn, username, kennung, &entry_dn)
            .await
        {
            Ok(_) | Err(DirectoryError::GroupNotFound(_)) => {}
            Err(e) => return Err(e),
        }

        self.delete_entry(conn, &entry_dn).await?;
        Ok(true)
    }

    /// Delete whatever entry carries `uid={username}`, removing it from
    /// every group first. Returns the deleted DN.
    pub async fn delete_by_username(
        &self,
        conn: &dyn DirectoryConnection,
        username: &str,
    ) -> DirectoryResult<Option<String>> {
        let Some(entry) = self.find_entry_by_uid(conn, username).await? else {
            info!("LDAP: No entry for {}, nothing to delete", username);
            return Ok(None);
        };

        for group_dn in self.groups.groups_with_member(conn, &entry.dn).await? {
            match self.groups.remove_member(conn, &group_dn, &entry.dn).await {
                Ok(_) | Err(DirectoryError::GroupNotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }

        self.delete_entry(conn, &entry.dn).await?;
        Ok(Some(entry.dn))
    }

    async fn delete_entry(&self, conn: &dyn DirectoryConnection, entry_dn: &str) -> DirectoryResult<()> {
        match conn.delete(entry_dn).await {
            Ok(()) => {
                info!("LDAP: Deleted lehrer entry {}", entry_dn);
                Ok(())
            }
            Err(e) if e.is_no_such_object() => Ok(()),
            Err(e) => Err(DirectoryError::DeleteLehrer {
                dn: entry_dn.to_string(),
                source: Box::new(e),
            }),
        }
    }

    /// Write the changed name attributes and, if the username changes,
    /// rename the entry and every group reference to it.
    ///
    /// An entry found under the new username only counts as this person
    /// renamed by an earlier attempt when its `entryUUID` is `entry_uuid`.
    pub async fn modify_attributes(
        &self,
        conn: &dyn DirectoryConnection,
        username: &str,
        entry_uuid: Option<&str>,
        vorname: Option<&str>,
        familienname: Option<&str>,
        new_username: Option<&str>,
    ) -> DirectoryResult<AttributeUpdate> {
        let new_username = new_username.filter(|u| !u.is_empty() && *u != username);
        let wrap = |e: DirectoryError| match e {
            DirectoryError::EntryNotFound(_) => e,
            e => DirectoryError::ModifyAttributes {
                username: username.to_string(),
                source: Box::new(e),
            },
        };

        let (entry, renamed_before) = match self.find_entry_by_uid(conn, username).await.map_err(wrap)? {
            Some(entry) => (entry, false),
            None => {
                // a previous attempt may already have renamed the entry
                let renamed = match (new_username, entry_uuid) {
                    (Some(new), Some(uuid)) => self
                        .find_entry_by_uid(conn, new)
                        .await
                        .map_err(wrap)?
                        .filter(|entry| entry.first_value(ATTR_ENTRY_UUID).as_deref() == Some(uuid)),
                    _ => None,
                };
                match renamed {
                    Some(entry) => (entry, true),
                    None => return Err(DirectoryError::EntryNotFound(username.to_string())),
                }
            }
        };

        let current = PersonAttributes::from(&entry);
        let mut changes = Vec::new();
        let mut changed_attributes = Vec::new();
        let mut push_change = |name: &'static str, current: &Option<String>, wanted: Option<&str>| {
            if let Some(wanted) = wanted {
                if current.as_deref() != Some(wanted) {
                    changes.push(Modification::replace(name, vec![wanted.to_string()]));
                    changed_attributes.push(name);
                }
            }
        };
        push_change(ATTR_GIVEN_NAME, &current.given_name, vorname);
        push_change(ATTR_SURNAME, &current.surname, familienname);
        push_change(ATTR_COMMON_NAME, &current.cn, new_username);

        if !changes.is_empty() {
            debug!("LDAP: Modifying {:?} of {}", changed_attributes, entry.dn);
            conn.modify(&entry.dn, changes).await.map_err(wrap)?;
        }

        let Some(new_username) = new_username else {
            return Ok(AttributeUpdate {
                dn: entry.dn,
                changed_attributes,
                groups: None,
            });
        };

        let (old_dn, new_dn) = if renamed_before {
            (dn::rename_dn(&entry.dn, username), entry.dn)
        } else {
            let new_rdn = format!("{}={}", dn::PERSON_NAMING_ATTRIBUTE, new_username);
            conn.modify_dn(&entry.dn, &new_rdn, true).await.map_err(wrap)?;
            info!("LDAP: Renamed {} to {}", username, new_username);
            (entry.dn.clone(), dn::rename_dn(&entry.dn, new_username))
        };
        changed_attributes.push(dn::PERSON_NAMING_ATTRIBUTE);

        let summary = self
            .groups
            .update_member_dn_in_groups(conn, username, new_username, &old_dn)
            .await
            .map_err(wrap)?;

        Ok(AttributeUpdate {
            dn: new_dn,
            changed_attributes,
            groups: Some(summary),
        })
    }

    /// Make `address` the primary address, keeping the previous primary
    /// address as alternative.
    pub async fn change_email(
        &self,
        conn: &dyn DirectoryConnection,
        username: &str,
        address: &str,
    ) -> DirectoryResult<EmailChange> {
        let entry = self.require_entry(conn, username).await?;
        let current = PersonAttributes::from(&entry);

        if current.mail_primary_address.as_deref() == Some(address) {
            debug!("LDAP: {} already has primary address {}", username, address);
            return Ok(EmailChange {
                previous_primary: current.mail_alternative_address.into_iter().next(),
                primary: address.to_string(),
            });
        }

        let mut mods = vec![Modification::replace(ATTR_MAIL_PRIMARY, vec![address.to_string()])];
        if let Some(previous) = &current.mail_primary_address {
            mods.push(Modification::replace(ATTR_MAIL_ALTERNATIVE, vec![previous.clone()]));
        }

        conn.modify(&entry.dn, mods)
            .await
            .map_err(|e| DirectoryError::ModifyEmail {
                username: username.to_string(),
                source: Box::new(e),
            })?;
        info!("LDAP: Changed primary email address of {}", username);

        Ok(EmailChange {
            previous_primary: current.mail_primary_address,
            primary: address.to_string(),
        })
    }

    /// Returns `false` when `address` was not an alternative address
    pub async fn remove_mail_alternative_address(
        &self,
        conn: &dyn DirectoryConnection,
        username: &str,
        address: &str,
    ) -> DirectoryResult<bool> {
        let entry = self.require_entry(conn, username).await?;
        let alternatives = entry.values(ATTR_MAIL_ALTERNATIVE);

        if !alternatives.iter().any(|a| a.eq_ignore_ascii_case(address)) {
            debug!("LDAP: {} has no alternative address {}", username, address);
            return Ok(false);
        }

        conn.modify(
            &entry.dn,
            vec![Modification::delete(ATTR_MAIL_ALTERNATIVE, vec![address.to_string()])],
        )
        .await
        .map_err(|e| DirectoryError::ModifyEmail {
            username: username.to_string(),
            source: Box::new(e),
        })?;
        info!("LDAP: Removed alternative email address of {}", username);
        Ok(true)
    }

    pub async fn change_password(
        &self,
        conn: &dyn DirectoryConnection,
        username: &str,
        password: &str,
    ) -> DirectoryResult<()> {
        let entry = self.require_entry(conn, username).await?;

        conn.modify(
            &entry.dn,
            vec![Modification::replace(ATTR_USER_PASSWORD, vec![password.to_string()])],
        )
        .await
        .map_err(|e| DirectoryError::ModifyPassword {
            username: username.to_string(),
            source: Box::new(e),
        })?;
        info!("LDAP: Changed password of {}", username);
        Ok(())
    }
}
