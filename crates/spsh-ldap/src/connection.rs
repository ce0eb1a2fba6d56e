//! Directory connection seam
//!
//! Everything above this module talks to the directory through
//! [`DirectoryConnection`]. The production implementation wraps an `ldap3`
//! handle; attribute values arrive in whatever shape the server returns
//! and are kept as [`RawAttribute`] until a caller normalises them.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ldap3::{Ldap, LdapConnAsync, LdapConnSettings, Mod, Scope, SearchEntry, SearchResult};
use spsh_core::config::LdapConfigSection;
use tracing::debug;

use crate::error::{DirectoryError, DirectoryResult, RC_NO_SUCH_OBJECT};

/// Attribute value as delivered by the directory: a string, a byte buffer,
/// or a list of either.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawAttribute {
    Text(String),
    Bytes(Vec<u8>),
    Many(Vec<RawAttribute>),
}

impl RawAttribute {
    /// Build the attribute from plain strings, collapsing single values
    pub fn from_strings(values: Vec<String>) -> Self {
        let mut values = values;
        if values.len() == 1 {
            RawAttribute::Text(values.remove(0))
        } else {
            RawAttribute::Many(values.into_iter().map(RawAttribute::Text).collect())
        }
    }

    /// Decode every contained value into a string, flattening nested lists.
    /// Byte buffers are decoded as UTF-8, replacing invalid sequences.
    pub fn to_strings(&self) -> Vec<String> {
        match self {
            RawAttribute::Text(s) => vec![s.clone()],
            RawAttribute::Bytes(b) => vec![String::from_utf8_lossy(b).into_owned()],
            RawAttribute::Many(values) => values.iter().flat_map(|v| v.to_strings()).collect(),
        }
    }
}

/// One entry returned by a search
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEntry {
    pub dn: String,
    pub attrs: HashMap<String, RawAttribute>,
}

impl RawEntry {
    pub fn new(dn: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            attrs: HashMap::new(),
        }
    }

    /// Look up an attribute by name, ignoring case like the directory does
    pub fn attr(&self, name: &str) -> Option<&RawAttribute> {
        self.attrs
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }

    pub fn values(&self, name: &str) -> Vec<String> {
        self.attr(name).map(|a| a.to_strings()).unwrap_or_default()
    }

    pub fn first_value(&self, name: &str) -> Option<String> {
        self.values(name).into_iter().next()
    }
}

impl From<SearchEntry> for RawEntry {
    fn from(entry: SearchEntry) -> Self {
        let mut attrs: HashMap<String, RawAttribute> = entry
            .attrs
            .into_iter()
            .map(|(name, values)| (name, RawAttribute::from_strings(values)))
            .collect();

        // ldap3 moves attributes with non-UTF-8 values to bin_attrs
        for (name, mut values) in entry.bin_attrs {
            let binary = if values.len() == 1 {
                RawAttribute::Bytes(values.remove(0))
            } else {
                RawAttribute::Many(values.into_iter().map(RawAttribute::Bytes).collect())
            };
            let merged = match attrs.remove(&name) {
                Some(RawAttribute::Many(mut text)) => {
                    text.push(binary);
                    RawAttribute::Many(text)
                }
                Some(text) => RawAttribute::Many(vec![text, binary]),
                None => binary,
            };
            attrs.insert(name, merged);
        }

        RawEntry {
            dn: entry.dn,
            attrs,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchScope {
    Base,
    OneLevel,
    Subtree,
}

impl From<SearchScope> for Scope {
    fn from(scope: SearchScope) -> Self {
        match scope {
            SearchScope::Base => Scope::Base,
            SearchScope::OneLevel => Scope::OneLevel,
            SearchScope::Subtree => Scope::Subtree,
        }
    }
}

/// A single change within a modify request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Modification {
    Replace(String, Vec<String>),
    Add(String, Vec<String>),
    Delete(String, Vec<String>),
}

impl Modification {
    pub fn replace(attr: &str, values: Vec<String>) -> Self {
        Modification::Replace(attr.to_string(), values)
    }

    pub fn add(attr: &str, values: Vec<String>) -> Self {
        Modification::Add(attr.to_string(), values)
    }

    pub fn delete(attr: &str, values: Vec<String>) -> Self {
        Modification::Delete(attr.to_string(), values)
    }

    pub fn attribute(&self) -> &str {
        match self {
            Modification::Replace(a, _) | Modification::Add(a, _) | Modification::Delete(a, _) => a,
        }
    }
}

impl Modification {
    /// The `ldap3` changes for this modification. `ldap3` carries values in
    /// a `HashSet`, so a replaced list is sent as a one-value replace
    /// followed by one add per further value to keep its order.
    pub fn into_mods(self) -> Vec<Mod<String>> {
        let single = |value: String| HashSet::from([value]);
        match self {
            Modification::Replace(attr, values) => {
                let mut values = values.into_iter();
                let Some(first) = values.next() else {
                    return vec![Mod::Replace(attr, HashSet::new())];
                };
                let mut mods = vec![Mod::Replace(attr.clone(), single(first))];
                mods.extend(values.map(|value| Mod::Add(attr.clone(), single(value))));
                mods
            }
            Modification::Add(attr, values) => values
                .into_iter()
                .map(|value| Mod::Add(attr.clone(), single(value)))
                .collect(),
            Modification::Delete(attr, values) => {
                vec![Mod::Delete(attr, values.into_iter().collect())]
            }
        }
    }
}

/// An opened handle to the directory server, owned by one operation attempt.
#[async_trait]
pub trait DirectoryConnection: Send + Sync {
    async fn simple_bind(&self, bind_dn: &str, password: &str) -> DirectoryResult<()>;

    /// Search below `base`. A missing base yields an empty result.
    async fn search(
        &self,
        base: &str,
        scope: SearchScope,
        filter: &str,
        attrs: &[&str],
    ) -> DirectoryResult<Vec<RawEntry>>;

    async fn add(&self, dn: &str, attrs: Vec<(String, Vec<String>)>) -> DirectoryResult<()>;

    async fn modify(&self, dn: &str, mods: Vec<Modification>) -> DirectoryResult<()>;

    /// Rename the entry's leading RDN, keeping it below the same parent
    async fn modify_dn(&self, dn: &str, new_rdn: &str, delete_old: bool) -> DirectoryResult<()>;

    async fn delete(&self, dn: &str) -> DirectoryResult<()>;

    async fn unbind(&self) -> DirectoryResult<()>;
}

/// Opens fresh directory connections
#[async_trait]
pub trait DirectoryConnector: Send + Sync {
    async fn connect(&self) -> DirectoryResult<Arc<dyn DirectoryConnection>>;
}

/// Connector for a real LDAP server
#[derive(Debug, Clone)]
pub struct LdapConnector {
    url: String,
    start_tls: bool,
    timeout: Duration,
}

impl LdapConnector {
    pub fn new(config: &LdapConfigSection) -> Self {
        Self {
            url: config.url.clone(),
            start_tls: config.start_tls,
            timeout: config.timeout(),
        }
    }
}

#[async_trait]
impl DirectoryConnector for LdapConnector {
    async fn connect(&self) -> DirectoryResult<Arc<dyn DirectoryConnection>> {
        let settings = LdapConnSettings::new()
            .set_conn_timeout(self.timeout)
            .set_starttls(self.start_tls);

        debug!("Connecting to LDAP server: {}", self.url);

        let (conn, ldap) = LdapConnAsync::with_settings(settings, &self.url)
            .await
            .map_err(|e| DirectoryError::Connection(format!("{}: {}", self.url, e)))?;

        ldap3::drive!(conn);

        Ok(Arc::new(LdapConnection { ldap }))
    }
}

/// `ldap3` handle; cloning it shares the underlying connection
pub struct LdapConnection {
    ldap: Ldap,
}

fn check(
    operation: &'static str,
    dn: &str,
    result: ldap3::LdapResult,
) -> DirectoryResult<()> {
    if result.rc != 0 {
        return Err(DirectoryError::operation(operation, dn, result.rc, result.text));
    }
    Ok(())
}

#[async_trait]
impl DirectoryConnection for LdapConnection {
    async fn simple_bind(&self, bind_dn: &str, password: &str) -> DirectoryResult<()> {
        let mut ldap = self.ldap.clone();
        let result = ldap
            .simple_bind(bind_dn, password)
            .await
            .map_err(|e| DirectoryError::Bind(e.to_string()))?;

        if result.rc != 0 {
            return Err(DirectoryError::Bind(format!(
                "bind as {} returned code {}: {}",
                bind_dn, result.rc, result.text
            )));
        }
        Ok(())
    }

    async fn search(
        &self,
        base: &str,
        scope: SearchScope,
        filter: &str,
        attrs: &[&str],
    ) -> DirectoryResult<Vec<RawEntry>> {
        let mut ldap = self.ldap.clone();
        let SearchResult(entries, result) = ldap
            .search(base, scope.into(), filter, attrs.to_vec())
            .await?;

        match result.rc {
            0 => Ok(entries
                .into_iter()
                .map(|e| RawEntry::from(SearchEntry::construct(e)))
                .collect()),
            RC_NO_SUCH_OBJECT => Ok(Vec::new()),
            rc => Err(DirectoryError::operation("search", base, rc, result.text)),
        }
    }

    async fn add(&self, dn: &str, attrs: Vec<(String, Vec<String>)>) -> DirectoryResult<()> {
        let mut ldap = self.ldap.clone();
        let attrs: Vec<(String, HashSet<String>)> = attrs
            .into_iter()
            .map(|(name, values)| (name, values.into_iter().collect()))
            .collect();
        let result = ldap.add(dn, attrs).await?;
        check("add", dn, result)
    }

    async fn modify(&self, dn: &str, mods: Vec<Modification>) -> DirectoryResult<()> {
        let mut ldap = self.ldap.clone();
        let mods: Vec<Mod<String>> = mods.into_iter().flat_map(Modification::into_mods).collect();
        let result = ldap.modify(dn, mods).await?;
        check("modify", dn, result)
    }

    async fn modify_dn(&self, dn: &str, new_rdn: &str, delete_old: bool) -> DirectoryResult<()> {
        let mut ldap = self.ldap.clone();
        let result = ldap.modifydn(dn, new_rdn, delete_old, None).await?;
        check("modifyDN", dn, result)
    }

    async fn delete(&self, dn: &str) -> DirectoryResult<()> {
        let mut ldap = self.ldap.clone();
        let result = ldap.delete(dn).await?;
        check("delete", dn, result)
    }

    async fn unbind(&self) -> DirectoryResult<()> {
        let mut ldap = self.ldap.clone();
        ldap.unbind().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_entry_conversion_merges_binary_values() {
        let mut attrs = HashMap::new();
        attrs.insert("cn".to_string(), vec!["lehrer-1".to_string()]);
        attrs.insert("member".to_string(), vec!["uid=a,dc=x".to_string()]);
        let mut bin_attrs = HashMap::new();
        bin_attrs.insert("member".to_string(), vec![b"uid=b,dc=x".to_vec()]);

        let entry = RawEntry::from(SearchEntry {
            dn: "cn=lehrer-1,dc=x".to_string(),
            attrs,
            bin_attrs,
        });

        assert_eq!(entry.first_value("CN").as_deref(), Some("lehrer-1"));
        assert_eq!(entry.values("member"), vec!["uid=a,dc=x", "uid=b,dc=x"]);
    }

    #[test]
    fn test_from_strings_collapses_single_value() {
        assert_eq!(
            RawAttribute::from_strings(vec!["a".to_string()]),
            RawAttribute::Text("a".to_string())
        );
        assert_eq!(RawAttribute::from_strings(Vec::new()).to_strings(), Vec::<String>::new());
    }

    #[test]
    fn test_modification_conversion() {
        let mods = Modification::replace("sn", vec!["Muster".to_string()]).into_mods();
        match mods.as_slice() {
            [Mod::Replace(attr, values)] => {
                assert_eq!(attr, "sn");
                assert!(values.contains("Muster"));
            }
            _ => panic!("expected a single replace"),
        }

        let mods = Modification::delete("member", vec!["uid=a".to_string()]).into_mods();
        assert!(matches!(mods.as_slice(), [Mod::Delete(attr, values)] if attr == "member" && values.len() == 1));

        let mods = Modification::replace("mailAlternativeAddress", Vec::new()).into_mods();
        assert!(matches!(mods.as_slice(), [Mod::Replace(_, values)] if values.is_empty()));
    }

    #[test]
    fn test_replaced_values_keep_their_order() {
        let members: Vec<String> = (0..8)
            .map(|i| format!("uid=m{},ou=oeffentlicheSchulen,dc=example,dc=com", i))
            .collect();

        let mods = Modification::replace("member", members.clone()).into_mods();
        assert_eq!(mods.len(), members.len());
        assert!(matches!(mods[0], Mod::Replace(..)));

        let sent: Vec<String> = mods
            .into_iter()
            .flat_map(|m| match m {
                Mod::Replace(_, values) | Mod::Add(_, values) => values.into_iter().collect::<Vec<_>>(),
                _ => Vec::new(),
            })
            .collect();
        assert_eq!(sent, members);
    }
}
