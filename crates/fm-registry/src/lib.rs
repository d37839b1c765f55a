#![forbid(unsafe_code)]

//! Address-keyed entry registry. Registration order is match priority;
//! entries live until the registry is reset.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use fm_entry::{Entry, Match, Request, RequestHistory, ScriptedError};
use fm_protocol::Address;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntryId(usize);

impl EntryId {
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lookup {
    pub id: EntryId,
    pub outcome: Match,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{} registered entries were never served:\n{}", .descriptions.len(), .descriptions.join("\n"))]
pub struct UnservedEntries {
    pub descriptions: Vec<String>,
}

impl UnservedEntries {
    #[must_use]
    pub fn reason_code(&self) -> &'static str {
        "registry.unserved_entries"
    }
}

/// What a dispatched payload produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// The entry served a reply.
    Reply(Vec<u8>),
    /// The payload extended an earlier request; nothing to serve yet.
    Pending,
}

#[derive(Debug, Default)]
pub struct Registry {
    entries: Vec<Entry>,
    by_address: BTreeMap<Address, Vec<EntryId>>,
    last_connected: Option<Address>,
    last_matched: Option<EntryId>,
    history: RequestHistory,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, entry: Entry) -> EntryId {
        let id = EntryId(self.entries.len());
        tracing::debug!(entry = %entry, id = id.0, "entry registered");
        self.by_address
            .entry(entry.address().clone())
            .or_default()
            .push(id);
        self.entries.push(entry);
        id
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn entry(&self, id: EntryId) -> Option<&Entry> {
        self.entries.get(id.0)
    }

    pub fn entry_mut(&mut self, id: EntryId) -> Option<&mut Entry> {
        self.entries.get_mut(id.0)
    }

    pub fn entries(&self) -> impl Iterator<Item = (EntryId, &Entry)> {
        self.entries
            .iter()
            .enumerate()
            .map(|(idx, entry)| (EntryId(idx), entry))
    }

    /// Entries registered at exactly `address`, in priority order.
    pub fn entries_at<'a>(&'a self, address: &Address) -> impl Iterator<Item = &'a Entry> + 'a {
        self.by_address
            .get(address)
            .into_iter()
            .flatten()
            .filter_map(|id| self.entries.get(id.0))
    }

    pub fn set_last_connected(&mut self, address: Address) {
        self.last_connected = Some(address);
    }

    #[must_use]
    pub fn last_connected(&self) -> Option<&Address> {
        self.last_connected.as_ref()
    }

    #[must_use]
    pub fn last_matched(&self) -> Option<EntryId> {
        self.last_matched
    }

    /// First entry at `address` that accepts `data`. When nothing is
    /// registered at `address` the last connected address is searched
    /// instead.
    pub fn lookup(&mut self, address: &Address, data: &[u8]) -> Option<Lookup> {
        let candidates = match self.by_address.get(address) {
            Some(ids) if !ids.is_empty() => ids,
            _ => self
                .last_connected
                .as_ref()
                .and_then(|fallback| self.by_address.get(fallback))?,
        };
        let found = candidates.iter().find_map(|&id| {
            let entry = self.entries.get(id.0)?;
            let outcome = entry.can_handle(data, self.last_matched == Some(id));
            outcome.is_hit().then_some(Lookup { id, outcome })
        })?;
        self.note_match(found);
        Some(found)
    }

    /// Like [`Registry::lookup`], but a socket's bound entry keeps the
    /// continuation writes of its request even when an earlier entry would
    /// also accept them.
    pub fn resolve(
        &mut self,
        address: &Address,
        data: &[u8],
        bound: Option<EntryId>,
    ) -> Option<Lookup> {
        let continues = bound.filter(|id| {
            self.entries
                .get(id.0)
                .is_some_and(|entry| entry.can_handle(data, true) == Match::Continuation)
        });
        if let Some(id) = continues {
            let found = Lookup {
                id,
                outcome: Match::Continuation,
            };
            self.note_match(found);
            return Some(found);
        }
        self.lookup(address, data)
    }

    fn note_match(&mut self, found: Lookup) {
        if found.outcome == Match::Request {
            self.last_matched = Some(found.id);
        }
        tracing::debug!(id = found.id.0, outcome = ?found.outcome, "entry matched");
    }

    /// Collects `data` on the entry and serves its next reply unless the
    /// payload only extended an earlier request.
    pub fn dispatch(&mut self, id: EntryId, data: &[u8]) -> Result<Dispatch, ScriptedError> {
        let Some(entry) = self.entries.get_mut(id.0) else {
            return Ok(Dispatch::Pending);
        };
        if !entry.collect(data, &mut self.history) {
            return Ok(Dispatch::Pending);
        }
        entry.get_response().map(Dispatch::Reply)
    }

    #[must_use]
    pub fn history(&self) -> &RequestHistory {
        &self.history
    }

    pub fn history_mut(&mut self) -> &mut RequestHistory {
        &mut self.history
    }

    #[must_use]
    pub fn last_request(&self) -> Option<&Request> {
        self.history.last()
    }

    pub fn assert_all_served(&self) -> Result<(), UnservedEntries> {
        let descriptions: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| !entry.is_served())
            .map(ToString::to_string)
            .collect();
        if descriptions.is_empty() {
            Ok(())
        } else {
            Err(UnservedEntries { descriptions })
        }
    }

    /// Every registered entry grouped by address, one per line.
    #[must_use]
    pub fn describe(&self) -> String {
        let mut out = String::new();
        for (address, ids) in &self.by_address {
            if !out.is_empty() {
                out.push('\n');
            }
            let _ = write!(out, "  {address}:");
            for entry in ids.iter().filter_map(|id| self.entries.get(id.0)) {
                let _ = write!(out, "\n    {entry}");
            }
        }
        out
    }

    pub fn reset(&mut self) {
        self.entries.clear();
        self.by_address.clear();
        self.last_connected = None;
        self.last_matched = None;
        self.history.clear();
    }
}

#[cfg(test)]
mod tests {
    use fm_entry::{Entry, Match, Reply};
    use fm_protocol::Address;

    use super::{Dispatch, Registry};

    fn local(port: u16) -> Address {
        Address::new("localhost", port)
    }

    #[test]
    fn first_registered_entry_wins() {
        let mut registry = Registry::new();
        let first = registry.register(Entry::bytes(local(80), vec![Reply::from("e1")]));
        let _second = registry.register(Entry::bytes(local(80), vec![Reply::from("e2")]));
        let found = registry.lookup(&local(80), b"hello").expect("match");
        assert_eq!(found.id, first);
        assert_eq!(
            registry.dispatch(found.id, b"hello").expect("reply"),
            Dispatch::Reply(b"e1".to_vec())
        );
    }

    #[test]
    fn lookup_misses_other_addresses_with_entries() {
        let mut registry = Registry::new();
        registry.register(Entry::bytes(local(80), Vec::new()));
        registry.register(Entry::bytes(local(81), Vec::new()));
        registry.set_last_connected(local(80));
        let found = registry.lookup(&local(81), b"x").expect("match");
        assert_eq!(registry.entry(found.id).expect("entry").address(), &local(81));
    }

    #[test]
    fn lookup_falls_back_to_last_connected_address() {
        let mut registry = Registry::new();
        let id = registry.register(Entry::bytes(local(80), Vec::new()));
        assert!(registry.lookup(&local(9999), b"x").is_none());
        registry.set_last_connected(local(80));
        assert_eq!(registry.lookup(&local(9999), b"x").map(|found| found.id), Some(id));
    }

    #[test]
    fn http_continuation_goes_to_last_matched_entry() {
        let mut registry = Registry::new();
        let upload = registry.register(
            Entry::http("POST", "http://api.local/upload", Vec::new()).expect("http"),
        );
        let address = Address::new("api.local", 80);
        assert!(registry.lookup(&address, b"tail").is_none());

        let head = b"POST /upload HTTP/1.1\r\nContent-Length: 8\r\n\r\nabcd";
        let found = registry.lookup(&address, head).expect("fresh");
        assert_eq!(found.outcome, Match::Request);
        assert_eq!(registry.last_matched(), Some(upload));
        assert!(matches!(
            registry.dispatch(found.id, head).expect("reply"),
            Dispatch::Reply(_)
        ));

        let found = registry.lookup(&address, b"efgh").expect("continuation");
        assert_eq!(found.outcome, Match::Continuation);
        assert_eq!(
            registry.dispatch(found.id, b"efgh").expect("pending"),
            Dispatch::Pending
        );
        assert_eq!(registry.history().len(), 1);
        let request = registry
            .last_request()
            .and_then(|request| request.as_http())
            .expect("http request");
        assert_eq!(request.body(), b"abcdefgh");
    }

    #[test]
    fn bound_entry_keeps_continuations() {
        let mut registry = Registry::new();
        let address = Address::new("api.local", 80);
        let first = registry.register(
            Entry::http("POST", "http://api.local/a", Vec::new()).expect("http"),
        );
        let second = registry.register(
            Entry::http("POST", "http://api.local/b", Vec::new()).expect("http"),
        );
        registry
            .lookup(&address, b"POST /a HTTP/1.1\r\n\r\n")
            .expect("a");
        registry
            .lookup(&address, b"POST /b HTTP/1.1\r\n\r\n")
            .expect("b");
        assert_eq!(registry.last_matched(), Some(second));

        let found = registry
            .resolve(&address, b"body for a", Some(first))
            .expect("bound continuation");
        assert_eq!(found.id, first);
        assert_eq!(found.outcome, Match::Continuation);
    }

    #[test]
    fn served_assertion_lists_unserved_entries() {
        let mut registry = Registry::new();
        let served = registry.register(Entry::bytes(local(1), Vec::new()));
        registry.register(Entry::resp(None, "PING", Vec::new()).expect("resp"));
        registry.dispatch(served, b"x").expect("reply");
        let err = registry.assert_all_served().expect_err("one unserved");
        assert_eq!(err.descriptions.len(), 1);
        assert!(err.to_string().contains("RespEntry(address=localhost:6379"));
        assert_eq!(err.reason_code(), "registry.unserved_entries");

        let resp = registry
            .lookup(&local(6379), b"*1\r\n$4\r\nPING\r\n")
            .expect("ping");
        registry.dispatch(resp.id, b"*1\r\n$4\r\nPING\r\n").expect("ok");
        assert!(registry.assert_all_served().is_ok());
    }

    #[test]
    fn describe_groups_by_address() {
        let mut registry = Registry::new();
        registry.register(Entry::bytes(local(2), Vec::new()));
        registry.register(Entry::bytes(local(1), Vec::new()));
        registry.register(Entry::bytes(local(1), Vec::new()));
        assert_eq!(
            registry.describe(),
            "  localhost:1:\n    Entry(address=localhost:1)\n    Entry(address=localhost:1)\n  localhost:2:\n    Entry(address=localhost:2)"
        );
    }

    #[test]
    fn reset_forgets_everything() {
        let mut registry = Registry::new();
        let id = registry.register(Entry::bytes(local(1), Vec::new()));
        registry.set_last_connected(local(1));
        registry.dispatch(id, b"x").expect("reply");
        registry.reset();
        assert!(registry.is_empty());
        assert!(registry.last_connected().is_none());
        assert!(registry.history().is_empty());
        assert!(registry.lookup(&local(1), b"x").is_none());
    }
}
