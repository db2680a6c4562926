use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use url::Url;

lazy_static! {
    static ref PARAGRAPH: Regex = Regex::new(r"(?i)<p\s*/?>").unwrap();
    static ref LINE_BREAK: Regex = Regex::new(r"(?i)<br\s*/?>").unwrap();
    static ref TAG: Regex = Regex::new(r"<[^>]+>").unwrap();
}

/// Convert an item body (HTML fragment) to plain text.
pub fn plain_text(html: &str) -> String {
    let text = PARAGRAPH.replace_all(html, "\n\n");
    let text = LINE_BREAK.replace_all(&text, "\n");
    // Strip tags before decoding so escaped markup stays literal
    let text = TAG.replace_all(&text, "");
    html_escape::decode_html_entities(&text).trim().to_string()
}

/// Relative age in the "4 hours ago" form the site uses.
pub fn time_ago(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = (now - then).num_seconds().max(0);

    let (value, unit) = match secs {
        s if s < 60 => return "just now".to_string(),
        s if s < 3_600 => (s / 60, "minute"),
        s if s < 86_400 => (s / 3_600, "hour"),
        s if s < 2_592_000 => (s / 86_400, "day"),
        s if s < 31_536_000 => (s / 2_592_000, "month"),
        s => (s / 31_536_000, "year"),
    };

    if value == 1 {
        format!("1 {} ago", unit)
    } else {
        format!("{} {}s ago", value, unit)
    }
}

/// Host of a link, minus any `www.` prefix. Links without a scheme are read
/// as `http`.
pub fn domain_of(link: &str) -> Option<String> {
    let parsed = match Url::parse(link) {
        Ok(url) if url.has_host() => url,
        _ => Url::parse(&format!("http://{}", link)).ok()?,
    };
    let host = parsed.host_str()?;
    Some(host.strip_prefix("www.").unwrap_or(host).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn strips_markup_and_decodes_entities() {
        let html = "First<p>Second with <a href=\"https:&#x2F;&#x2F;x.org\">link</a> &gt; 3";
        assert_eq!(plain_text(html), "First\n\nSecond with link > 3");
    }

    #[test]
    fn escaped_markup_survives() {
        assert_eq!(plain_text("use &lt;b&gt; here"), "use <b> here");
    }

    #[test]
    fn formats_relative_times() {
        let now = Utc::now();
        assert_eq!(time_ago(now - Duration::seconds(5), now), "just now");
        assert_eq!(time_ago(now - Duration::minutes(1), now), "1 minute ago");
        assert_eq!(time_ago(now - Duration::hours(4), now), "4 hours ago");
        assert_eq!(time_ago(now - Duration::days(3), now), "3 days ago");
        assert_eq!(time_ago(now - Duration::days(800), now), "2 years ago");
    }

    #[test]
    fn extracts_domains() {
        assert_eq!(domain_of("https://www.example.com/a?b=c").as_deref(), Some("example.com"));
        assert_eq!(domain_of("http://localhost:8080/x").as_deref(), Some("localhost"));
        assert_eq!(domain_of("https://user:pw@News.Example.org/").as_deref(), Some("news.example.org"));
        assert_eq!(domain_of("http://[::1]:3000/").as_deref(), Some("[::1]"));
        assert_eq!(domain_of("example.net/path").as_deref(), Some("example.net"));
        assert_eq!(domain_of(""), None);
    }
}
