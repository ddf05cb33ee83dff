// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Markup sources, the parsed-template cache, and remote content retrieval.

use std::rc::Rc;

use rustc_hash::FxHashMap;
use tether_dom::{parse, Content, ParseError};
use tracing::{debug, warn};

use crate::ident::{short_hash, template_key, Hash};

/// Where a binding's markup comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Markup {
    /// Literal markup text.
    Inline(String),
    /// A template registered on the controller.
    Named(String),
    /// Markup retrieved through the controller's [`ContentFetcher`].
    Remote(String),
    /// Already-parsed content; child regions carry their template this way.
    Content(Rc<Content>),
}

impl Markup {
    /// Inline markup from a string slice.
    pub fn inline(text: &str) -> Self {
        Self::Inline(text.to_owned())
    }

    /// Named template reference.
    pub fn named(name: &str) -> Self {
        Self::Named(name.to_owned())
    }

    /// Remote markup location.
    pub fn remote(url: &str) -> Self {
        Self::Remote(url.to_owned())
    }
}

/// Parsed templates keyed by `blake3("template:" || markup)`, plus the
/// registry of named templates.
#[derive(Debug, Default)]
pub struct TemplateCache {
    parsed: FxHashMap<Hash, Rc<Content>>,
    named: FxHashMap<String, String>,
    hits: u64,
    misses: u64,
}

impl TemplateCache {
    /// Registers (or replaces) a named template after checking it parses.
    pub fn register(&mut self, name: &str, markup: &str) -> Result<(), ParseError> {
        self.parse(markup)?;
        self.named.insert(name.to_owned(), markup.to_owned());
        Ok(())
    }

    /// Markup text of a named template.
    pub fn named(&self, name: &str) -> Option<&str> {
        self.named.get(name).map(String::as_str)
    }

    /// Parses `markup`, reusing a cached tree for identical text.
    pub fn parse(&mut self, markup: &str) -> Result<Rc<Content>, ParseError> {
        let key = template_key(markup);
        if let Some(hit) = self.parsed.get(&key) {
            self.hits += 1;
            return Ok(Rc::clone(hit));
        }
        self.misses += 1;
        let content = Rc::new(parse(markup)?);
        debug!(key = %short_hash(&key), "template parsed");
        self.parsed.insert(key, Rc::clone(&content));
        Ok(content)
    }

    /// `(hits, misses)` since creation.
    pub fn stats(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }
}

/// Result of one retrieval attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchPoll {
    /// Retrieval finished, with the markup or a failure reason.
    Ready(Result<String, String>),
    /// Retrieval continues; the host later calls
    /// [`crate::Controller::complete_fetch`].
    Pending,
}

/// Host-implemented markup retrieval.
pub trait ContentFetcher {
    /// Starts (or completes) retrieval of `url`.
    fn fetch(&mut self, url: &str) -> FetchPoll;
}

/// Fetcher used when the host supplies none: every request fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoFetcher;

impl ContentFetcher for NoFetcher {
    fn fetch(&mut self, url: &str) -> FetchPoll {
        FetchPoll::Ready(Err(format!("no fetcher configured for {url}")))
    }
}

/// Cached state of one remote location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentEntry {
    /// Requested, not yet delivered.
    Pending,
    /// Delivered markup.
    Ready(String),
    /// Failed; sticky until [`ContentCache::evict`].
    Failed(String),
}

/// Remote content per location.
#[derive(Debug, Default)]
pub struct ContentCache {
    entries: FxHashMap<String, ContentEntry>,
}

impl ContentCache {
    /// Cached entry for `url`.
    pub fn get(&self, url: &str) -> Option<&ContentEntry> {
        self.entries.get(url)
    }

    /// Stores a delivery or failure for `url`.
    pub fn store(&mut self, url: &str, result: Result<String, String>) {
        let entry = match result {
            Ok(text) => ContentEntry::Ready(text),
            Err(reason) => {
                warn!(url, %reason, "remote markup failed");
                ContentEntry::Failed(reason)
            }
        };
        self.entries.insert(url.to_owned(), entry);
    }

    /// Marks `url` as requested.
    pub fn mark_pending(&mut self, url: &str) {
        self.entries.insert(url.to_owned(), ContentEntry::Pending);
    }

    /// Forgets `url`, allowing a failed location to be retried.
    pub fn evict(&mut self, url: &str) -> Option<ContentEntry> {
        self.entries.remove(url)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn identical_markup_parses_once() {
        let mut cache = TemplateCache::default();
        let a = cache.parse("<p>{{x}}</p>").unwrap();
        let b = cache.parse("<p>{{x}}</p>").unwrap();
        assert!(Rc::ptr_eq(&a, &b));
        assert_eq!(cache.stats(), (1, 1));
    }

    #[test]
    fn register_rejects_bad_markup() {
        let mut cache = TemplateCache::default();
        assert!(cache.register("bad", "<p>").is_err());
        assert!(cache.named("bad").is_none());
        cache.register("ok", "<p></p>").unwrap();
        assert_eq!(cache.named("ok"), Some("<p></p>"));
    }

    #[test]
    fn failures_are_sticky_until_evicted() {
        let mut cache = ContentCache::default();
        cache.store("/a", Err("404".into()));
        assert_eq!(cache.get("/a"), Some(&ContentEntry::Failed("404".into())));
        cache.evict("/a");
        assert!(cache.get("/a").is_none());
    }
}
