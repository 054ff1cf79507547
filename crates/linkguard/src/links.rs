/// Link extraction from message text.
///
/// Recognizes explicit `http(s)://` URLs, `www.` hosts and bare
/// `host.tld[/path]` tokens. Whether a domain actually exists is decided
/// later by a [`DomainResolver`](crate::resolver::DomainResolver).
use url::Url;

/// Punctuation commonly wrapped around links in chat text.
const WRAPPING: &[char] = &[
    '<', '>', '(', ')', '[', ']', '{', '}', '"', '\'', ',', '.', ';', ':', '!', '?', '*', '_', '~',
];

/// A link found in a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedLink {
    /// The token as written.
    pub raw: String,
    /// Lower-cased host without a leading `www.`.
    pub domain: String,
}

/// All links in `text`, in order of appearance. Repeated domains are kept.
pub fn extract_links(text: &str) -> Vec<ExtractedLink> {
    text.split_whitespace().filter_map(parse_token).collect()
}

fn parse_token(token: &str) -> Option<ExtractedLink> {
    let token = token.trim_matches(WRAPPING);
    if token.is_empty() {
        return None;
    }

    let lower = token.to_ascii_lowercase();
    let explicit = lower.starts_with("http://") || lower.starts_with("https://");
    let url = if explicit {
        Url::parse(token).ok()?
    } else {
        // Bare tokens: no user info (emails) and something that looks like a TLD.
        if token.contains('@') || !token.contains('.') {
            return None;
        }
        Url::parse(&format!("http://{token}")).ok()?
    };

    let host = url.host_str()?.to_ascii_lowercase();
    if !explicit && !plausible_host(&host) {
        return None;
    }

    let domain = host.strip_prefix("www.").unwrap_or(&host).to_string();
    if domain.is_empty() {
        return None;
    }
    Some(ExtractedLink {
        raw: token.to_string(),
        domain,
    })
}

/// At least two non-empty labels and an alphabetic TLD of two or more letters.
fn plausible_host(host: &str) -> bool {
    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() < 2 || labels.iter().any(|l| l.is_empty()) {
        return false;
    }
    let tld = labels[labels.len() - 1];
    tld.len() >= 2 && tld.chars().all(|c| c.is_ascii_alphabetic())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn domains(text: &str) -> Vec<String> {
        extract_links(text).into_iter().map(|l| l.domain).collect()
    }

    #[test]
    fn explicit_urls() {
        assert_eq!(
            domains("see https://Example.COM/path?q=1 and http://foo.org"),
            vec!["example.com", "foo.org"]
        );
    }

    #[test]
    fn bare_and_www_hosts() {
        assert_eq!(domains("join www.spam.net now"), vec!["spam.net"]);
        assert_eq!(domains("example.com/page"), vec!["example.com"]);
    }

    #[test]
    fn wrapped_in_punctuation() {
        assert_eq!(domains("(check: bit.ly/abc)."), vec!["bit.ly"]);
        assert_eq!(domains("<https://x.io>"), vec!["x.io"]);
    }

    #[test]
    fn ignores_non_links() {
        assert!(domains("pi is 3.14, e.g. roughly").is_empty());
        assert!(domains("mail me at bob@example.com").is_empty());
        assert!(domains("ends with a dot.").is_empty());
        assert!(domains("").is_empty());
    }

    #[test]
    fn keeps_raw_token() {
        let links = extract_links("go to https://a.com/x!");
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].raw, "https://a.com/x");
    }
}
