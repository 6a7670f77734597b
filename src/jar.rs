use std::collections::HashMap;
use std::sync::Mutex;

use cookie::Cookie;
use url::Url;

use crate::util::lock_unpoisoned;

/// Injectable cookie storage keyed by resolved request URL.
///
/// The engine binds request and client cookies to the resolved URL before
/// dispatch and attaches the store's matches for that URL as the `Cookie`
/// header. Retention and matching policy beyond host scoping belong to the
/// store implementation.
pub trait CookieStore: Send + Sync {
    fn store(&self, url: &Url, cookies: &[Cookie<'static>]);

    fn cookies_for(&self, url: &Url) -> Vec<Cookie<'static>>;
}

/// In-memory store scoped by host. Later cookies replace earlier ones with
/// the same name.
#[derive(Default)]
pub struct MemoryCookieStore {
    by_host: Mutex<HashMap<String, Vec<Cookie<'static>>>>,
}

impl MemoryCookieStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CookieStore for MemoryCookieStore {
    fn store(&self, url: &Url, cookies: &[Cookie<'static>]) {
        let Some(host) = url.host_str() else {
            return;
        };
        let mut by_host = lock_unpoisoned(&self.by_host);
        let slot = by_host.entry(host.to_owned()).or_default();
        for cookie in cookies {
            slot.retain(|existing| existing.name() != cookie.name());
            slot.push(cookie.clone());
        }
    }

    fn cookies_for(&self, url: &Url) -> Vec<Cookie<'static>> {
        let Some(host) = url.host_str() else {
            return Vec::new();
        };
        lock_unpoisoned(&self.by_host)
            .get(host)
            .cloned()
            .unwrap_or_default()
    }
}

/// Renders cookies as a single `Cookie` request header line.
pub(crate) fn render_cookie_header(cookies: &[Cookie<'static>]) -> String {
    let mut line = String::new();
    for cookie in cookies {
        if !line.is_empty() {
            line.push_str("; ");
        }
        line.push_str(cookie.name());
        line.push('=');
        line.push_str(cookie.value());
    }
    line
}

#[cfg(test)]
mod tests {
    use super::{CookieStore, MemoryCookieStore, render_cookie_header};
    use cookie::Cookie;
    use url::Url;

    #[test]
    fn store_is_scoped_by_host_and_replaces_same_name() {
        let store = MemoryCookieStore::new();
        let api = Url::parse("https://api.example.com/users").expect("url");
        let other = Url::parse("https://other.example.com/").expect("url");

        store.store(&api, &[Cookie::new("session", "one")]);
        store.store(&api, &[Cookie::new("session", "two")]);

        let cookies = store.cookies_for(&api);
        assert_eq!(cookies.len(), 1);
        assert_eq!(cookies[0].value(), "two");
        assert!(store.cookies_for(&other).is_empty());
    }

    #[test]
    fn cookie_header_joins_pairs_with_semicolons() {
        let cookies = vec![Cookie::new("a", "1"), Cookie::new("b", "2")];
        assert_eq!(render_cookie_header(&cookies), "a=1; b=2");
    }
}
