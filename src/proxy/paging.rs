//! Legacy paging engine (protocol v0).
//!
//! Bounds response size when iterating arbitrarily large key or entry sets.
//! The continuation token ("cookie") is the last key served; pages walk the
//! collaborator's key order, so the cursor strictly advances and iteration
//! always terminates. Entries are added to a page until the configured byte
//! transfer threshold is met, then the page is cut with a fresh cookie. An
//! empty cookie means "first page" on input and "exhausted" on output.
//!
//! Under concurrent mutation a key observed exactly once is only guaranteed
//! for keys present throughout the loop; a key inserted mid-iteration shows
//! up zero or one times, a removed key stops appearing.

use crate::proxy::error::ProxyResult;
use crate::storage::CacheStore;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Entries fetched from the collaborator per round while filling one page.
const FETCH_CHUNK: usize = 64;

/// One element of a page response. The first element of every page is the
/// cookie carrier (empty key/value); the remaining elements are real data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageEntry {
    pub cookie: Bytes,
    pub key: Bytes,
    pub value: Bytes,
}

impl PageEntry {
    fn cookie_carrier(cookie: Bytes) -> Self {
        Self {
            cookie,
            key: Bytes::new(),
            value: Bytes::new(),
        }
    }

    fn data(key: Bytes, value: Bytes) -> Self {
        Self {
            cookie: Bytes::new(),
            key,
            value,
        }
    }
}

pub struct PagingEngine {
    transfer_threshold: usize,
}

impl PagingEngine {
    pub fn new(transfer_threshold: usize) -> Self {
        Self {
            transfer_threshold: transfer_threshold.max(1),
        }
    }

    /// Next page of keys. Values are omitted from the returned elements.
    pub fn next_key_page(
        &self,
        store: &dyn CacheStore,
        cookie: &[u8],
    ) -> ProxyResult<Vec<PageEntry>> {
        let (entries, next_cookie) = self.fill_page(store, cookie, |key, _| key.len())?;
        let mut page = Vec::with_capacity(entries.len() + 1);
        page.push(PageEntry::cookie_carrier(next_cookie));
        page.extend(
            entries
                .into_iter()
                .map(|(key, _)| PageEntry::data(key, Bytes::new())),
        );
        Ok(page)
    }

    /// Next page of full entries.
    pub fn next_entry_page(
        &self,
        store: &dyn CacheStore,
        cookie: &[u8],
    ) -> ProxyResult<Vec<PageEntry>> {
        let (entries, next_cookie) =
            self.fill_page(store, cookie, |key, value| key.len() + value.len())?;
        let mut page = Vec::with_capacity(entries.len() + 1);
        page.push(PageEntry::cookie_carrier(next_cookie));
        page.extend(
            entries
                .into_iter()
                .map(|(key, value)| PageEntry::data(key, value)),
        );
        Ok(page)
    }

    /// Accumulate entries after the cursor until the byte budget is met.
    /// Returns the page plus the next cookie (empty when exhausted).
    fn fill_page(
        &self,
        store: &dyn CacheStore,
        cookie: &[u8],
        weigh: impl Fn(&Bytes, &Bytes) -> usize,
    ) -> ProxyResult<(Vec<(Bytes, Bytes)>, Bytes)> {
        let mut cursor: Option<Bytes> = if cookie.is_empty() {
            None
        } else {
            Some(Bytes::copy_from_slice(cookie))
        };
        let mut page: Vec<(Bytes, Bytes)> = Vec::new();
        let mut spent = 0usize;

        loop {
            let batch = store.entries_after(cursor.as_deref(), FETCH_CHUNK)?;
            if batch.is_empty() {
                // Source exhausted: this is the final page.
                return Ok((page, Bytes::new()));
            }
            for (key, value) in batch {
                cursor = Some(key.clone());
                spent += weigh(&key, &value);
                page.push((key, value));
                if spent >= self.transfer_threshold {
                    // Budget met: cut here unless nothing follows.
                    let next = cursor.clone().unwrap_or_default();
                    let more = !store.entries_after(Some(&next), 1)?.is_empty();
                    let next_cookie = if more { next } else { Bytes::new() };
                    return Ok((page, next_cookie));
                }
            }
        }
    }
}
