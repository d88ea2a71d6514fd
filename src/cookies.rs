//! Session cookie jar carried across the diagnostics chain

use indexmap::IndexMap;

/// Cookie name to value, in first-seen order. Later writes to a name replace
/// the value in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CookieJar {
    entries: IndexMap<String, String>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a jar from a `Cookie` request header (`a=1; b=2`)
    pub fn from_header(header: &str) -> Self {
        let mut jar = Self::new();
        for part in header.split(';') {
            if let Some((name, value)) = split_pair(part) {
                jar.entries.insert(name, value);
            }
        }
        jar
    }

    /// Merge `Set-Cookie` values in arrival order; attributes are ignored.
    pub fn merge_set_cookies<I, S>(&mut self, set_cookies: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for set_cookie in set_cookies {
            let pair = set_cookie.as_ref().split(';').next().unwrap_or_default();
            if let Some((name, value)) = split_pair(pair) {
                self.entries.insert(name, value);
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Serialize back into a single `Cookie` header value
    pub fn to_header(&self) -> String {
        self.entries
            .iter()
            .map(|(name, value)| format!("{}={}", name, value))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// `name=value`, splitting at the first `=`; values may contain `=`.
fn split_pair(raw: &str) -> Option<(String, String)> {
    let (name, value) = raw.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some((name.to_string(), value.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn later_set_cookie_wins_per_name() {
        let mut jar = CookieJar::from_header("A=1");
        jar.merge_set_cookies(["A=2; Path=/; HttpOnly", "B=3; SameSite=Lax"]);

        assert_eq!(jar.len(), 2);
        assert_eq!(jar.get("A"), Some("2"));
        assert_eq!(jar.get("B"), Some("3"));
        assert_eq!(jar.to_header(), "A=2; B=3");
    }

    #[test]
    fn header_parsing_skips_malformed_parts() {
        let jar = CookieJar::from_header("XSRF-TOKEN=abc%3D; broken; =nameless; laravel_session=xyz==");
        assert_eq!(jar.to_header(), "XSRF-TOKEN=abc%3D; laravel_session=xyz==");
    }

    #[test]
    fn empty_header_gives_empty_jar() {
        let jar = CookieJar::from_header("");
        assert!(jar.is_empty());
        assert_eq!(jar.to_header(), "");
    }
}
