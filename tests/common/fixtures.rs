//! Newznab feed fixtures

use chrono::{Duration, Utc};

/// One item of a generated feed
pub struct Item {
    pub title: String,
    pub guid: String,
    pub minutes_ago: i64,
}

impl Item {
    pub fn new(n: u32, minutes_ago: i64) -> Self {
        Self {
            title: format!("Show.S01E{n:02}.1080p.WEB-DL"),
            guid: format!("guid-{n}"),
            minutes_ago,
        }
    }

    /// Download URL served for this item by a feed on `base`
    pub fn download_url(&self, base: &str) -> String {
        format!("{base}/getnzb/{}.nzb", self.guid)
    }
}

/// Render a Newznab RSS page whose enclosures point at `base`
pub fn newznab_feed(base: &str, items: &[Item]) -> String {
    let now = Utc::now();
    let body: String = items
        .iter()
        .map(|item| {
            let published = (now - Duration::minutes(item.minutes_ago)).to_rfc2822();
            format!(
                r#"    <item>
      <title>{title}</title>
      <guid isPermaLink="false">{guid}</guid>
      <link>{url}</link>
      <comments>{base}/details/{guid}</comments>
      <pubDate>{published}</pubDate>
      <enclosure url="{url}" length="1000" type="application/x-nzb"/>
      <newznab:attr name="size" value="2147483648"/>
    </item>
"#,
                title = item.title,
                guid = item.guid,
                url = item.download_url(base),
            )
        })
        .collect();

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:newznab="http://www.newznab.com/DTD/2010/feeds/attributes/">
  <channel>
    <title>Example Indexer</title>
    <link>{base}</link>
    <description>Example Indexer Feed</description>
{body}  </channel>
</rss>"#
    )
}

/// Newznab API error document
pub fn newznab_error(code: u32, description: &str) -> String {
    format!(r#"<?xml version="1.0" encoding="UTF-8"?><error code="{code}" description="{description}"/>"#)
}
