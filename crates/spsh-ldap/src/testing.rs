//! In-memory directory used by the unit tests

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::connection::{
    DirectoryConnection, DirectoryConnector, Modification, RawAttribute, RawEntry, SearchScope,
};
use crate::error::{
    DirectoryError, DirectoryResult, RC_ALREADY_EXISTS, RC_ATTRIBUTE_OR_VALUE_EXISTS,
    RC_NOT_ALLOWED_ON_NON_LEAF, RC_NO_SUCH_ATTRIBUTE, RC_NO_SUCH_OBJECT,
};

#[derive(Default)]
struct State {
    /// keyed by lowercased DN
    entries: BTreeMap<String, RawEntry>,
    connects: usize,
    binds: usize,
    writes: Vec<String>,
    failing_binds: usize,
    /// operation name -> remaining injected failures
    failing_ops: HashMap<String, usize>,
    /// (operation, lowercased dn) pairs that always fail
    broken: Vec<(String, String)>,
    /// entries that appear right before the next add of their DN
    appearing: Vec<RawEntry>,
}

/// A directory held in memory; connector and connection at once. Clones
/// share state.
#[derive(Clone, Default)]
pub(crate) struct InMemoryDirectory {
    state: Arc<Mutex<State>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an entry without counting it as a write
    pub fn seed(&self, dn: &str, attrs: Vec<(&str, RawAttribute)>) {
        let mut entry = RawEntry::new(dn);
        for (name, value) in attrs {
            entry.attrs.insert(name.to_string(), value);
        }
        self.state
            .lock()
            .entries
            .insert(dn.to_ascii_lowercase(), entry);
    }

    pub fn entry(&self, dn: &str) -> Option<RawEntry> {
        self.state
            .lock()
            .entries
            .get(&dn.to_ascii_lowercase())
            .cloned()
    }

    pub fn exists(&self, dn: &str) -> bool {
        self.entry(dn).is_some()
    }

    pub fn values(&self, dn: &str, attr: &str) -> Vec<String> {
        self.entry(dn).map(|e| e.values(attr)).unwrap_or_default()
    }

    pub fn connect_count(&self) -> usize {
        self.state.lock().connects
    }

    pub fn bind_count(&self) -> usize {
        self.state.lock().binds
    }

    /// Writes performed so far, as "operation dn"
    pub fn writes(&self) -> Vec<String> {
        self.state.lock().writes.clone()
    }

    pub fn fail_binds(&self, times: usize) {
        self.state.lock().failing_binds = times;
    }

    /// Let the next `times` calls of `operation` fail with a transport error
    pub fn fail_next(&self, operation: &str, times: usize) {
        self.state
            .lock()
            .failing_ops
            .insert(operation.to_string(), times);
    }

    /// Let every `operation` on `dn` fail with a transport error
    pub fn break_entry(&self, operation: &str, dn: &str) {
        self.state
            .lock()
            .broken
            .push((operation.to_string(), dn.to_ascii_lowercase()));
    }

    /// Let `dn` be created by someone else just before our next add of it
    pub fn appear_before_add(&self, dn: &str, attrs: Vec<(&str, RawAttribute)>) {
        let mut entry = RawEntry::new(dn);
        for (name, value) in attrs {
            entry.attrs.insert(name.to_string(), value);
        }
        self.state.lock().appearing.push(entry);
    }

    pub fn clear_failures(&self) {
        let mut state = self.state.lock();
        state.failing_binds = 0;
        state.failing_ops.clear();
        state.broken.clear();
    }

    fn injected_failure(&self, state: &mut State, operation: &str, dn: &str) -> DirectoryResult<()> {
        let key = dn.to_ascii_lowercase();
        if state
            .broken
            .iter()
            .any(|(op, broken_dn)| op == operation && *broken_dn == key)
        {
            return Err(DirectoryError::Connection(format!("{} on {} broken", operation, dn)));
        }
        if let Some(remaining) = state.failing_ops.get_mut(operation) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(DirectoryError::Connection(format!("injected {} failure", operation)));
            }
        }
        Ok(())
    }
}

fn parent_of(dn: &str) -> Option<&str> {
    dn.split_once(',').map(|(_, parent)| parent)
}

fn in_scope(dn: &str, base: &str, scope: SearchScope) -> bool {
    match scope {
        SearchScope::Base => dn == base,
        SearchScope::OneLevel => parent_of(dn) == Some(base),
        SearchScope::Subtree => dn == base || dn.ends_with(&format!(",{}", base)),
    }
}

/// Evaluates `(a=v)`, `(a=*)` and `(&...)` filters
fn matches(filter: &str, entry: &RawEntry) -> bool {
    let inner = filter
        .strip_prefix('(')
        .and_then(|f| f.strip_suffix(')'))
        .unwrap_or(filter);

    if let Some(children) = inner.strip_prefix('&') {
        return split_filters(children).iter().all(|f| matches(f, entry));
    }

    let Some((attr, value)) = inner.split_once('=') else {
        return false;
    };
    let values = entry.values(attr);
    if value == "*" {
        return !values.is_empty();
    }
    values.iter().any(|v| v.eq_ignore_ascii_case(value))
}

fn split_filters(s: &str) -> Vec<&str> {
    let mut filters = Vec::new();
    let mut depth = 0;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        match c {
            '(' => {
                if depth == 0 {
                    start = i;
                }
                depth += 1;
            }
            ')' => {
                depth -= 1;
                if depth == 0 {
                    filters.push(&s[start..=i]);
                }
            }
            _ => {}
        }
    }
    filters
}

fn set_values(entry: &mut RawEntry, attr: &str, values: Vec<String>) {
    let existing = entry
        .attrs
        .keys()
        .find(|k| k.eq_ignore_ascii_case(attr))
        .cloned();
    let key = existing.unwrap_or_else(|| attr.to_string());
    if values.is_empty() {
        entry.attrs.remove(&key);
    } else {
        entry.attrs.insert(key, RawAttribute::from_strings(values));
    }
}

#[async_trait]
impl DirectoryConnector for InMemoryDirectory {
    async fn connect(&self) -> DirectoryResult<Arc<dyn DirectoryConnection>> {
        let mut state = self.state.lock();
        state.connects += 1;
        self.injected_failure(&mut state, "connect", "")?;
        drop(state);
        Ok(Arc::new(self.clone()))
    }
}

#[async_trait]
impl DirectoryConnection for InMemoryDirectory {
    async fn simple_bind(&self, bind_dn: &str, _password: &str) -> DirectoryResult<()> {
        let mut state = self.state.lock();
        state.binds += 1;
        if state.failing_binds > 0 {
            state.failing_binds -= 1;
            return Err(DirectoryError::Bind(format!("bind as {} refused", bind_dn)));
        }
        Ok(())
    }

    async fn search(
        &self,
        base: &str,
        scope: SearchScope,
        filter: &str,
        _attrs: &[&str],
    ) -> DirectoryResult<Vec<RawEntry>> {
        let mut state = self.state.lock();
        self.injected_failure(&mut state, "search", base)?;
        let base = base.to_ascii_lowercase();
        Ok(state
            .entries
            .iter()
            .filter(|(dn, entry)| in_scope(dn, &base, scope) && matches(filter, entry))
            .map(|(_, entry)| entry.clone())
            .collect())
    }

    async fn add(&self, dn: &str, attrs: Vec<(String, Vec<String>)>) -> DirectoryResult<()> {
        let mut state = self.state.lock();
        self.injected_failure(&mut state, "add", dn)?;
        let key = dn.to_ascii_lowercase();
        if let Some(pos) = state
            .appearing
            .iter()
            .position(|e| e.dn.eq_ignore_ascii_case(dn))
        {
            let entry = state.appearing.remove(pos);
            state.entries.insert(key.clone(), entry);
        }
        if state.entries.contains_key(&key) {
            return Err(DirectoryError::operation("add", dn, RC_ALREADY_EXISTS, "Already exists"));
        }
        let mut entry = RawEntry::new(dn);
        for (name, values) in attrs {
            set_values(&mut entry, &name, values);
        }
        set_values(
            &mut entry,
            "entryUUID",
            vec![uuid::Uuid::new_v4().to_string()],
        );
        state.entries.insert(key, entry);
        state.writes.push(format!("add {}", dn));
        Ok(())
    }

    async fn modify(&self, dn: &str, mods: Vec<Modification>) -> DirectoryResult<()> {
        let mut state = self.state.lock();
        self.injected_failure(&mut state, "modify", dn)?;
        let key = dn.to_ascii_lowercase();
        let Some(mut entry) = state.entries.get(&key).cloned() else {
            return Err(DirectoryError::operation("modify", dn, RC_NO_SUCH_OBJECT, "No such object"));
        };
        // applied to a copy, committed only if every change succeeds
        for modification in mods {
            match modification {
                Modification::Replace(attr, values) => set_values(&mut entry, &attr, values),
                Modification::Add(attr, values) => {
                    let mut current = entry.values(&attr);
                    if values
                        .iter()
                        .any(|v| current.iter().any(|c| c.eq_ignore_ascii_case(v)))
                    {
                        return Err(DirectoryError::operation(
                            "modify",
                            dn,
                            RC_ATTRIBUTE_OR_VALUE_EXISTS,
                            "Attribute or value exists",
                        ));
                    }
                    current.extend(values);
                    set_values(&mut entry, &attr, current);
                }
                Modification::Delete(attr, values) => {
                    let current = entry.values(&attr);
                    if values
                        .iter()
                        .any(|v| !current.iter().any(|c| c.eq_ignore_ascii_case(v)))
                    {
                        return Err(DirectoryError::operation(
                            "modify",
                            dn,
                            RC_NO_SUCH_ATTRIBUTE,
                            "No such attribute",
                        ));
                    }
                    let remaining = if values.is_empty() {
                        Vec::new()
                    } else {
                        current
                            .into_iter()
                            .filter(|c| !values.iter().any(|v| v.eq_ignore_ascii_case(c)))
                            .collect()
                    };
                    set_values(&mut entry, &attr, remaining);
                }
            }
        }
        state.entries.insert(key, entry);
        state.writes.push(format!("modify {}", dn));
        Ok(())
    }

    async fn modify_dn(&self, dn: &str, new_rdn: &str, _delete_old: bool) -> DirectoryResult<()> {
        let mut state = self.state.lock();
        self.injected_failure(&mut state, "modifyDN", dn)?;
        let Some(mut entry) = state.entries.remove(&dn.to_ascii_lowercase()) else {
            return Err(DirectoryError::operation("modifyDN", dn, RC_NO_SUCH_OBJECT, "No such object"));
        };
        let new_dn = match parent_of(dn) {
            Some(parent) => format!("{},{}", new_rdn, parent),
            None => new_rdn.to_string(),
        };
        if let Some((attr, value)) = new_rdn.split_once('=') {
            set_values(&mut entry, attr, vec![value.to_string()]);
        }
        entry.dn = new_dn.clone();
        state.entries.insert(new_dn.to_ascii_lowercase(), entry);
        state.writes.push(format!("modifyDN {}", dn));
        Ok(())
    }

    async fn delete(&self, dn: &str) -> DirectoryResult<()> {
        let mut state = self.state.lock();
        self.injected_failure(&mut state, "delete", dn)?;
        let key = dn.to_ascii_lowercase();
        if !state.entries.contains_key(&key) {
            return Err(DirectoryError::operation("delete", dn, RC_NO_SUCH_OBJECT, "No such object"));
        }
        if state
            .entries
            .keys()
            .any(|k| parent_of(k) == Some(key.as_str()))
        {
            return Err(DirectoryError::operation(
                "delete",
                dn,
                RC_NOT_ALLOWED_ON_NON_LEAF,
                "Entry has children",
            ));
        }
        state.entries.remove(&key);
        state.writes.push(format!("delete {}", dn));
        Ok(())
    }

    async fn unbind(&self) -> DirectoryResult<()> {
        Ok(())
    }
}

/// Log output captured for the current thread while the handle lives
pub(crate) struct CapturedLogs {
    buffer: Arc<Mutex<Vec<u8>>>,
    _guard: tracing::subscriber::DefaultGuard,
}

impl CapturedLogs {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.buffer.lock()).into_owned()
    }
}

#[derive(Clone)]
struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl io::Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub(crate) fn capture_logs() -> CapturedLogs {
    let buffer = Arc::new(Mutex::new(Vec::new()));
    let writer = SharedBuffer(buffer.clone());
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();
    let guard = tracing::subscriber::set_default(subscriber);
    CapturedLogs {
        buffer,
        _guard: guard,
    }
}
