// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Scripted markup fetcher.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use tether_core::{ContentFetcher, FetchPoll};

/// [`ContentFetcher`] answering from a script.
///
/// Clones share the script, so a test can keep a handle after moving the
/// fetcher into a controller and inspect how often each URL was requested.
/// Unscripted URLs fail.
///
/// # Example
///
/// ```
/// use tether_core::{ContentFetcher, FetchPoll};
/// use tether_dry_tests::ScriptedFetcher;
///
/// let fetcher = ScriptedFetcher::new();
/// fetcher.respond("card.html", Ok("<p>{{name}}</p>".into()));
/// let mut handle = fetcher.clone();
/// assert_eq!(
///     handle.fetch("card.html"),
///     FetchPoll::Ready(Ok("<p>{{name}}</p>".into()))
/// );
/// assert_eq!(fetcher.calls("card.html"), 1);
/// ```
#[derive(Clone, Default)]
pub struct ScriptedFetcher {
    inner: Rc<RefCell<Inner>>,
}

#[derive(Default)]
struct Inner {
    script: HashMap<String, FetchPoll>,
    calls: HashMap<String, usize>,
}

impl ScriptedFetcher {
    /// Creates an empty script.
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers `url` immediately with `result`.
    pub fn respond(&self, url: &str, result: Result<String, String>) {
        self.inner
            .borrow_mut()
            .script
            .insert(url.to_owned(), FetchPoll::Ready(result));
    }

    /// Answers `url` with [`FetchPoll::Pending`]; the test later delivers the
    /// markup through `Controller::complete_fetch`.
    pub fn defer(&self, url: &str) {
        self.inner
            .borrow_mut()
            .script
            .insert(url.to_owned(), FetchPoll::Pending);
    }

    /// How many times `url` was requested.
    pub fn calls(&self, url: &str) -> usize {
        self.inner.borrow().calls.get(url).copied().unwrap_or(0)
    }
}

impl ContentFetcher for ScriptedFetcher {
    fn fetch(&mut self, url: &str) -> FetchPoll {
        let mut inner = self.inner.borrow_mut();
        *inner.calls.entry(url.to_owned()).or_default() += 1;
        inner
            .script
            .get(url)
            .cloned()
            .unwrap_or_else(|| FetchPoll::Ready(Err(format!("unscripted url {url}"))))
    }
}
