//! Default response parser for RSS 2.0, Atom and Newznab/Torznab feeds
//!
//! Newznab and Torznab are RSS 2.0 with `<newznab:attr name=".." value=".."/>`
//! (or `torznab:attr`) extension elements; the `size` attribute takes
//! precedence over the enclosure length. API-level errors come back as a bare
//! `<error code=".." description=".."/>` document with a 200 status and are
//! mapped onto [`FetchError`].

use crate::error::FetchError;
use crate::fetcher::{HttpResponse, ResponseParser};
use crate::types::Release;
use chrono::{DateTime, Utc};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use tracing::debug;

/// Parses RSS first and falls back to Atom
#[derive(Clone, Copy, Debug, Default)]
pub struct FeedParser;

impl FeedParser {
    /// Create a parser
    pub fn new() -> Self {
        Self
    }
}

impl ResponseParser for FeedParser {
    fn parse(&self, response: &HttpResponse) -> Result<Vec<Release>, FetchError> {
        let content = response.body.as_str();

        if let Some(err) = api_error(content) {
            return Err(err);
        }

        match parse_as_rss(content) {
            Ok(releases) => {
                debug!(count = releases.len(), "parsed RSS page");
                Ok(releases)
            }
            Err(rss_err) => {
                debug!(error = %rss_err, "not RSS, trying Atom");
                parse_as_atom(content).map_err(|atom_err| {
                    FetchError::parse(
                        format!(
                            "Failed to parse feed as RSS or Atom. RSS error: {}. Atom error: {}",
                            rss_err, atom_err
                        ),
                        content,
                    )
                })
            }
        }
    }
}

fn parse_as_rss(content: &str) -> Result<Vec<Release>, rss::Error> {
    let channel = content.parse::<rss::Channel>()?;

    let releases = channel
        .items()
        .iter()
        .filter_map(|item| {
            let title = item.title().unwrap_or_default().to_string();

            let Some(publish_date) = item.pub_date().and_then(|date| {
                DateTime::parse_from_rfc2822(date)
                    .ok()
                    .map(|dt| dt.with_timezone(&Utc))
            }) else {
                debug!(title = %title, "dropping item without a usable pubDate");
                return None;
            };

            let download_url = item
                .enclosure()
                .map(|enc| enc.url().to_string())
                .or_else(|| item.link().map(str::to_string))
                .unwrap_or_default();

            let size = indexer_attr(item, "size")
                .and_then(|v| v.parse::<u64>().ok())
                .or_else(|| {
                    item.enclosure()
                        .and_then(|enc| enc.length().parse::<u64>().ok())
                        .filter(|len| *len > 0)
                });

            let info_url = item
                .comments()
                .map(str::to_string)
                .or_else(|| item.link().filter(|l| *l != download_url).map(str::to_string));

            Some(Release {
                title,
                download_url,
                guid: item.guid().map(|g| g.value().to_string()),
                info_url,
                publish_date,
                size,
                provider: Default::default(),
                provider_name: String::new(),
            })
        })
        .collect();

    Ok(releases)
}

/// `newznab:attr` / `torznab:attr` value by name
fn indexer_attr<'a>(item: &'a rss::Item, name: &str) -> Option<&'a str> {
    ["newznab", "torznab"].iter().find_map(|ns| {
        item.extensions()
            .get(*ns)?
            .get("attr")?
            .iter()
            .find(|ext| ext.attrs().get("name").map(String::as_str) == Some(name))
            .and_then(|ext| ext.attrs().get("value"))
            .map(String::as_str)
    })
}

fn parse_as_atom(content: &str) -> Result<Vec<Release>, atom_syndication::Error> {
    let feed = atom_syndication::Feed::read_from(content.as_bytes())?;

    let releases = feed
        .entries()
        .iter()
        .map(|entry| {
            let publish_date = entry
                .published()
                .copied()
                .unwrap_or_else(|| *entry.updated())
                .with_timezone(&Utc);

            let enclosure = entry.links().iter().find(|link| {
                link.rel() == "enclosure"
                    || link.href().ends_with(".nzb")
                    || link.href().ends_with(".torrent")
                    || link.mime_type() == Some("application/x-nzb")
            });

            let download_url = enclosure
                .or_else(|| entry.links().first())
                .map(|link| link.href().to_string())
                .unwrap_or_default();

            let info_url = entry
                .links()
                .iter()
                .find(|link| link.rel() == "alternate" && link.href() != download_url)
                .map(|link| link.href().to_string());

            let size = enclosure.and_then(|link| link.length().and_then(|l| l.parse::<u64>().ok()));

            Release {
                title: entry.title().as_str().to_string(),
                download_url,
                guid: Some(entry.id().to_string()).filter(|id| !id.is_empty()),
                info_url,
                publish_date,
                size,
                provider: Default::default(),
                provider_name: String::new(),
            }
        })
        .collect();

    Ok(releases)
}

/// Detect a Newznab `<error code=".." description=".."/>` document
///
/// Only the root element counts; an `<error>` nested in a feed is item content.
fn api_error(content: &str) -> Option<FetchError> {
    let mut reader = Reader::from_str(content);
    let root = loop {
        match reader.read_event() {
            Ok(Event::Start(element)) | Ok(Event::Empty(element)) => break element,
            Ok(Event::Eof) | Err(_) => return None,
            Ok(_) => {}
        }
    };
    if root.local_name().as_ref() != b"error" {
        return None;
    }

    let code = attribute(&root, "code").and_then(|c| c.trim().parse::<u32>().ok());
    let description = attribute(&root, "description").unwrap_or_else(|| "unknown error".into());

    Some(match code {
        Some(100..=102) => FetchError::Auth {
            message: description,
        },
        Some(500 | 501) => FetchError::RateLimited { retry_after: None },
        Some(code) => FetchError::Unclassified {
            message: format!("indexer error {}: {}", code, description),
        },
        None => FetchError::parse(format!("malformed indexer error: {}", description), content),
    })
}

fn attribute(element: &BytesStart<'_>, name: &str) -> Option<String> {
    element
        .try_get_attribute(name)
        .ok()
        .flatten()
        .and_then(|attr| attr.unescape_value().ok())
        .map(|value| value.into_owned())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::error::FailureKind;

    const NEWZNAB_PAGE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:atom="http://www.w3.org/2005/Atom" xmlns:newznab="http://www.newznab.com/DTD/2010/feeds/attributes/">
<channel>
  <title>indexer</title>
  <link>https://indexer.example</link>
  <description>feed</description>
  <item>
    <title>Show.S01E01.1080p.WEB-DL</title>
    <guid isPermaLink="true">https://indexer.example/details/abc123</guid>
    <link>https://indexer.example/getnzb/abc123.nzb</link>
    <comments>https://indexer.example/details/abc123#comments</comments>
    <pubDate>Sat, 18 Oct 2025 10:00:00 +0000</pubDate>
    <enclosure url="https://indexer.example/getnzb/abc123.nzb&amp;i=1" length="0" type="application/x-nzb"/>
    <newznab:attr name="category" value="5040"/>
    <newznab:attr name="size" value="1572864000"/>
  </item>
  <item>
    <title>Show.S01E02.720p</title>
    <guid>def456</guid>
    <link>https://indexer.example/getnzb/def456.nzb</link>
    <pubDate>Fri, 17 Oct 2025 09:30:00 +0200</pubDate>
    <enclosure url="https://indexer.example/getnzb/def456.nzb" length="734003200" type="application/x-nzb"/>
  </item>
  <item>
    <title>No date</title>
    <link>https://indexer.example/getnzb/nodate.nzb</link>
  </item>
</channel>
</rss>"#;

    const TORZNAB_PAGE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:torznab="http://torznab.com/schemas/2015/feed">
<channel>
  <title>tracker</title>
  <link>https://tracker.example</link>
  <description>feed</description>
  <item>
    <title>Movie.2024.2160p</title>
    <guid>https://tracker.example/t/99</guid>
    <link>https://tracker.example/dl/99.torrent</link>
    <pubDate>Mon, 13 Oct 2025 12:00:00 GMT</pubDate>
    <torznab:attr name="seeders" value="10"/>
    <torznab:attr name="size" value="42"/>
  </item>
</channel>
</rss>"#;

    const ATOM_PAGE: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>atom indexer</title>
  <id>urn:feed</id>
  <updated>2025-10-18T10:00:00Z</updated>
  <entry>
    <title>Album.FLAC</title>
    <id>urn:release:1</id>
    <updated>2025-10-18T09:00:00Z</updated>
    <published>2025-10-18T08:00:00+02:00</published>
    <link rel="alternate" href="https://atom.example/details/1"/>
    <link rel="enclosure" href="https://atom.example/get/1.nzb" length="2048"/>
  </entry>
</feed>"#;

    fn parse(body: &str) -> Result<Vec<Release>, FetchError> {
        FeedParser::new().parse(&HttpResponse::ok(body))
    }

    #[test]
    fn parses_newznab_items() {
        let releases = parse(NEWZNAB_PAGE).unwrap();
        assert_eq!(releases.len(), 2, "item without pubDate is dropped");

        let first = &releases[0];
        assert_eq!(first.title, "Show.S01E01.1080p.WEB-DL");
        assert_eq!(
            first.download_url,
            "https://indexer.example/getnzb/abc123.nzb&i=1"
        );
        assert_eq!(
            first.guid.as_deref(),
            Some("https://indexer.example/details/abc123")
        );
        assert_eq!(
            first.info_url.as_deref(),
            Some("https://indexer.example/details/abc123#comments")
        );
        assert_eq!(first.size, Some(1_572_864_000));
        assert_eq!(first.publish_date.to_rfc3339(), "2025-10-18T10:00:00+00:00");

        let second = &releases[1];
        assert_eq!(second.size, Some(734_003_200), "enclosure length fallback");
        assert_eq!(second.publish_date.to_rfc3339(), "2025-10-17T07:30:00+00:00");
    }

    #[test]
    fn parses_torznab_size_attribute() {
        let releases = parse(TORZNAB_PAGE).unwrap();
        assert_eq!(releases.len(), 1);
        assert_eq!(releases[0].size, Some(42));
        assert_eq!(releases[0].download_url, "https://tracker.example/dl/99.torrent");
    }

    #[test]
    fn parses_atom_entries() {
        let releases = parse(ATOM_PAGE).unwrap();
        assert_eq!(releases.len(), 1);
        let release = &releases[0];
        assert_eq!(release.download_url, "https://atom.example/get/1.nzb");
        assert_eq!(
            release.info_url.as_deref(),
            Some("https://atom.example/details/1")
        );
        assert_eq!(release.guid.as_deref(), Some("urn:release:1"));
        assert_eq!(release.size, Some(2048));
        assert_eq!(release.publish_date.to_rfc3339(), "2025-10-18T06:00:00+00:00");
    }

    #[test]
    fn empty_channel_is_an_empty_page() {
        let body = r#"<rss version="2.0"><channel><title>t</title><link>l</link><description>d</description></channel></rss>"#;
        assert!(parse(body).unwrap().is_empty());
    }

    #[test]
    fn credential_errors_map_to_auth() {
        let err = parse(r#"<?xml version="1.0"?><error code="100" description="Incorrect user credentials"/>"#)
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::AuthFailure);
    }

    #[test]
    fn error_document_attributes_are_read_as_xml() {
        let body = "<?xml version=\"1.0\"?>\n<!-- api -->\n<error code = '100' description='Bad apikey &amp; user'/>";
        let err = parse(body).unwrap_err();
        assert_eq!(
            err,
            FetchError::Auth {
                message: "Bad apikey & user".into()
            }
        );
    }

    #[test]
    fn error_document_without_code_is_a_parse_error() {
        let err = parse(r#"<error description="oops"></error>"#).unwrap_err();
        assert_eq!(err.kind(), FailureKind::ParseError);
    }

    #[test]
    fn error_element_inside_a_feed_is_not_an_api_error() {
        let body = r#"<rss version="2.0"><channel><title>t</title><link>l</link><description>d</description><error code="100"/></channel></rss>"#;
        assert!(parse(body).unwrap().is_empty());
    }

    #[test]
    fn request_limit_maps_to_rate_limited() {
        let err = parse(r#"<error code="500" description="Request limit reached"/>"#).unwrap_err();
        assert_eq!(err, FetchError::RateLimited { retry_after: None });
    }

    #[test]
    fn other_api_errors_are_unclassified() {
        let err = parse(r#"<error code="201" description="Incorrect parameter"/>"#).unwrap_err();
        assert_eq!(err.kind(), FailureKind::Unclassified);
    }

    #[test]
    fn html_body_is_a_parse_error_with_body() {
        let err = parse("<html><body>maintenance</body></html>").unwrap_err();
        match err {
            FetchError::Parse { body, .. } => assert!(body.contains("maintenance")),
            other => panic!("expected parse error, got {other:?}"),
        }
    }
}
