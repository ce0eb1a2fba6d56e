//! Directory client facade
//!
//! Entry point for the person and organisation services. Every operation
//! validates its input first, then runs its directory calls through the
//! [`RetryingExecutor`]; input that cannot succeed never opens a connection.

use std::sync::Arc;

use parking_lot::Mutex;
use spsh_core::config::SpshConfig;
use spsh_core::types::{
    DirectoryEvent, DirectoryEventKind, OrganisationLookup, PersonAttributeChanges, PersonData,
};
use tracing::{debug, warn};

use crate::connection::{DirectoryConnector, LdapConnector};
use crate::domain::{self, DomainRoots, EmailDomainResolver, SchoolSubtree};
use crate::error::{DirectoryError, DirectoryResult};
use crate::events::EventPublisher;
use crate::executor::{BindCredentials, RetryPolicy, RetryingExecutor};
use crate::organisation::OrganisationDirectoryOps;
use crate::person::{
    generate_password, AttributeUpdate, EmailChange, PersonAttributes, PersonEntryManager,
    ATTR_ENTRY_UUID, DEFAULT_PASSWORD_LENGTH,
};

pub struct LdapClientService {
    executor: RetryingExecutor,
    domains: EmailDomainResolver,
    persons: PersonEntryManager,
    organisations: OrganisationDirectoryOps,
    events: Arc<dyn EventPublisher>,
}

impl LdapClientService {
    pub fn new(
        config: &SpshConfig,
        connector: Arc<dyn DirectoryConnector>,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        let credentials = BindCredentials {
            bind_dn: config.ldap.bind_dn.clone(),
            password: config.ldap.admin_password.clone(),
        };

        Self {
            executor: RetryingExecutor::new(
                connector,
                credentials,
                RetryPolicy::from_config(&config.retry),
            ),
            domains: EmailDomainResolver::new(DomainRoots::from_config(&config.ldap)),
            persons: PersonEntryManager::new(config.ldap.base_dn.clone()),
            organisations: OrganisationDirectoryOps::new(config.ldap.base_dn.clone()),
            events,
        }
    }

    /// Client for the LDAP server named in the configuration
    pub fn connect(config: &SpshConfig, events: Arc<dyn EventPublisher>) -> Self {
        Self::new(config, Arc::new(LdapConnector::new(&config.ldap)), events)
    }

    pub fn classify_domain(&self, email_domain: &str) -> DirectoryResult<SchoolSubtree> {
        self.domains.classify_domain(email_domain)
    }

    pub fn reconfigure_domains(&self, roots: DomainRoots) {
        self.domains.reconfigure(roots);
    }

    pub async fn resolve_effective_email_domain(
        &self,
        organisations: &dyn OrganisationLookup,
        organisation_id: &str,
    ) -> Option<String> {
        domain::resolve_effective_email_domain(organisations, organisation_id).await
    }

    /// DN a person with this username and email domain is stored under
    pub fn person_dn(&self, username: &str, email_domain: &str) -> DirectoryResult<String> {
        let subtree = self.classify_domain(email_domain)?;
        Ok(self.persons.person_dn(username, subtree))
    }

    async fn publish(&self, kind: DirectoryEventKind) {
        let event = DirectoryEvent::new(kind);
        let name = event.name();
        if let Err(e) = self.events.publish(event).await {
            warn!(error = %e, "Could not publish {}", name);
        }
    }

    /// Attributes of the person's entry, creating an empty entry first if
    /// the person has none yet
    pub async fn get_person_attributes(
        &self,
        person_id: &str,
        username: &str,
        email_domain: &str,
    ) -> DirectoryResult<PersonAttributes> {
        let subtree = self.classify_domain(email_domain)?;
        debug!(person_id, "LDAP: getPersonAttributes {}", username);

        self.executor
            .execute(|conn| async move {
                self.persons
                    .get_or_create_attributes(conn.as_ref(), username, subtree)
                    .await
            })
            .await
    }

    pub async fn create_lehrer(
        &self,
        person: &PersonData,
        email_domain: &str,
        kennung: &str,
        mail_primary_address: Option<&str>,
    ) -> DirectoryResult<PersonData> {
        if person.username().is_none() {
            return Err(DirectoryError::UsernameRequired(person.id.clone()));
        }
        if let Some(address) = mail_primary_address {
            domain::split_email_address(address)?;
        }
        let subtree = self.classify_domain(email_domain)?;

        self.executor
            .execute(|conn| async move {
                self.persons
                    .create_lehrer(conn.as_ref(), person, subtree, kennung, mail_primary_address)
                    .await
            })
            .await
    }

    pub async fn is_lehrer_existing(
        &self,
        username: &str,
        email_domain: &str,
    ) -> DirectoryResult<bool> {
        let subtree = self.classify_domain(email_domain)?;

        self.executor
            .execute(|conn| async move {
                self.persons.is_existing(conn.as_ref(), username, subtree).await
            })
            .await
    }

    /// Returns `false` when the person had no entry
    pub async fn delete_lehrer(
        &self,
        person: &PersonData,
        email_domain: &str,
        kennung: &str,
    ) -> DirectoryResult<bool> {
        let username = person
            .username()
            .ok_or_else(|| DirectoryError::UsernameRequired(person.id.clone()))?;
        let subtree = self.classify_domain(email_domain)?;

        let deleted = self
            .executor
            .execute(|conn| async move {
                self.persons
                    .delete_lehrer(conn.as_ref(), username, subtree, kennung)
                    .await
            })
            .await?;

        if deleted {
            self.publish(DirectoryEventKind::PersonEntryDeleted {
                person_id: person.id.clone(),
                username: username.to_string(),
            })
            .await;
        }
        Ok(deleted)
    }

    /// Delete the entry carrying this username, wherever it lives
    pub async fn delete_lehrer_by_username(
        &self,
        person_id: &str,
        username: &str,
    ) -> DirectoryResult<Option<String>> {
        let deleted = self
            .executor
            .execute(|conn| async move {
                self.persons.delete_by_username(conn.as_ref(), username).await
            })
            .await?;

        if deleted.is_some() {
            self.publish(DirectoryEventKind::PersonEntryDeleted {
                person_id: person_id.to_string(),
                username: username.to_string(),
            })
            .await;
        }
        Ok(deleted)
    }

    /// `None` when `changes` is empty; the directory is not contacted then.
    ///
    /// `entry_uuid` identifies the entry if an earlier call already renamed
    /// it. Without it the `entryUUID` seen by the first attempt is used.
    pub async fn modify_person_attributes(
        &self,
        person_id: &str,
        username: &str,
        entry_uuid: Option<&str>,
        changes: &PersonAttributeChanges,
    ) -> DirectoryResult<Option<AttributeUpdate>> {
        if changes.is_empty() {
            debug!(person_id, "No attribute changes for {}", username);
            return Ok(None);
        }
        debug!(person_id, "LDAP: modifyPersonAttributes {}", username);

        let known_uuid = Mutex::new(entry_uuid.map(str::to_string));
        let known_uuid = &known_uuid;

        let update = self
            .executor
            .execute(|conn| async move {
                let mut expected = known_uuid.lock().clone();
                if expected.is_none() {
                    expected = self
                        .persons
                        .find_entry_by_uid(conn.as_ref(), username)
                        .await?
                        .and_then(|entry| entry.first_value(ATTR_ENTRY_UUID));
                    *known_uuid.lock() = expected.clone();
                }

                self.persons
                    .modify_attributes(
                        conn.as_ref(),
                        username,
                        expected.as_deref(),
                        changes.vorname.as_deref(),
                        changes.familienname.as_deref(),
                        changes.username.as_deref(),
                    )
                    .await
            })
            .await?;
        Ok(Some(update))
    }

    pub async fn change_email_address(
        &self,
        person_id: &str,
        username: &str,
        new_address: &str,
    ) -> DirectoryResult<EmailChange> {
        let (_, email_domain) = domain::split_email_address(new_address)?;
        self.classify_domain(email_domain)?;

        let change = self
            .executor
            .execute(|conn| async move {
                self.persons
                    .change_email(conn.as_ref(), username, new_address)
                    .await
            })
            .await?;

        self.publish(DirectoryEventKind::PersonEntryChanged {
            person_id: person_id.to_string(),
            username: username.to_string(),
            mail_primary_address: Some(change.primary.clone()),
            mail_alternative_address: change.previous_primary.clone(),
        })
        .await;
        Ok(change)
    }

    pub async fn remove_mail_alternative_address(
        &self,
        person_id: &str,
        username: &str,
        address: &str,
    ) -> DirectoryResult<bool> {
        domain::split_email_address(address)?;
        debug!(person_id, "LDAP: removeMailAlternativeAddress {}", username);

        self.executor
            .execute(|conn| async move {
                self.persons
                    .remove_mail_alternative_address(conn.as_ref(), username, address)
                    .await
            })
            .await
    }

    /// Set a freshly generated password and return it. The same password is
    /// written on every attempt.
    pub async fn change_password(&self, person_id: &str, username: &str) -> DirectoryResult<String> {
        let password = generate_password(DEFAULT_PASSWORD_LENGTH);
        let secret = password.as_str();

        self.executor
            .execute(|conn| async move {
                self.persons
                    .change_password(conn.as_ref(), username, secret)
                    .await
            })
            .await?;

        self.publish(DirectoryEventKind::PasswordChanged {
            person_id: person_id.to_string(),
            username: username.to_string(),
        })
        .await;
        Ok(password)
    }

    pub async fn add_person_to_group(
        &self,
        username: &str,
        kennung: &str,
        person_dn: &str,
    ) -> DirectoryResult<bool> {
        self.executor
            .execute(|conn| async move {
                self.persons
                    .groups()
                    .add_person_to_group(conn.as_ref(), username, kennung, person_dn)
                    .await
            })
            .await
    }

    pub async fn remove_person_from_group(
        &self,
        username: &str,
        kennung: &str,
        person_dn: &str,
    ) -> DirectoryResult<bool> {
        self.executor
            .execute(|conn| async move {
                self.persons
                    .groups()
                    .remove_person_from_group(conn.as_ref(), username, kennung, person_dn)
                    .await
            })
            .await
    }

    pub async fn update_member_dn_in_groups(
        &self,
        old_username: &str,
        new_username: &str,
        old_dn: &str,
    ) -> DirectoryResult<String> {
        self.executor
            .execute(|conn| async move {
                self.persons
                    .groups()
                    .update_member_dn_in_groups(conn.as_ref(), old_username, new_username, old_dn)
                    .await
            })
            .await
    }

    /// DNs of the groups listing the person's entry
    pub async fn find_groups_for_person(&self, username: &str) -> DirectoryResult<Vec<String>> {
        self.executor
            .execute(|conn| async move {
                let entry = self
                    .persons
                    .find_entry_by_uid(conn.as_ref(), username)
                    .await?
                    .ok_or_else(|| DirectoryError::EntryNotFound(username.to_string()))?;
                self.persons
                    .groups()
                    .groups_with_member(conn.as_ref(), &entry.dn)
                    .await
            })
            .await
    }

    pub async fn delete_organisation(&self, kennung: &str) -> DirectoryResult<()> {
        debug!("LDAP: deleteOrganisation {}", kennung);
        self.executor
            .execute(|conn| async move {
                self.organisations
                    .delete_organisation(conn.as_ref(), kennung)
                    .await
            })
            .await
    }

    /// Members of the organisation's lehrer group
    pub async fn get_organisation_members(&self, kennung: &str) -> DirectoryResult<Vec<String>> {
        self.executor
            .execute(|conn| async move {
                self.organisations
                    .organisation_members(conn.as_ref(), kennung)
                    .await
            })
            .await
    }
}
