//! LDAP directory client for school staff
//!
//! Provisions lehrer entries and their group memberships below two school
//! subtrees. [`LdapClientService`] is the entry point; the managers beneath
//! it run on a bound [`DirectoryConnection`] handed out by the
//! [`RetryingExecutor`].

pub mod client;
pub mod connection;
pub mod dn;
pub mod domain;
pub mod error;
pub mod events;
pub mod executor;
pub mod group;
pub mod organisation;
pub mod person;

#[cfg(test)]
mod testing;

pub use client::LdapClientService;
pub use connection::{
    DirectoryConnection, DirectoryConnector, LdapConnector, Modification, RawAttribute, RawEntry,
    SearchScope,
};
pub use domain::{DomainRoots, EmailDomainResolver, SchoolSubtree};
pub use error::{DirectoryError, DirectoryResult};
pub use events::{ChannelEventPublisher, EventPublisher, LoggingEventPublisher};
pub use executor::{BindCredentials, RetryPolicy, RetryingExecutor};
pub use group::{normalize_members, GroupMembershipManager};
pub use organisation::OrganisationDirectoryOps;
pub use person::{
    generate_password, AttributeUpdate, EmailChange, PersonAttributes, PersonEntryManager,
};
