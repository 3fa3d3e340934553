use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, USER_AGENT};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::error::RepackError;

/// Descriptive metadata for one series, as returned by a remote catalog.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MangaMetadata {
    pub title: String,
    pub title_zh: Option<String>,
    pub title_ja: Option<String>,
    pub title_en: Option<String>,
    pub author: Option<String>,
    pub artist: Option<String>,
    pub publisher: Option<String>,
    pub summary: Option<String>,
    pub tags: Vec<String>,
    pub total_volumes: Option<u32>,
    pub publish_date: Option<String>,
    pub cover_url: Option<String>,
    pub source: String,
    pub source_id: Option<String>,
}

impl MangaMetadata {
    /// Title used for output naming: the localized title when the catalog
    /// has one, otherwise the primary title.
    pub fn preferred_title(&self) -> &str {
        self.title_zh
            .as_deref()
            .filter(|title| !title.is_empty())
            .unwrap_or(&self.title)
    }
}

/// One remote catalog. Best-effort: a source that cannot answer returns
/// `Ok(None)`, a source that breaks returns an error the resolver logs and
/// steps past.
pub trait MetadataSource: Send + Sync {
    fn name(&self) -> &'static str;
    fn search(&self, title: &str) -> Result<Option<MangaMetadata>, RepackError>;
}

/// Ordered fallback chain over metadata sources. Evaluates each source
/// until one yields a hit; errors from one source never prevent trying the
/// next, and an empty chain simply resolves nothing.
pub struct MetadataResolver {
    sources: Vec<Box<dyn MetadataSource>>,
}

impl MetadataResolver {
    pub fn new(sources: Vec<Box<dyn MetadataSource>>) -> Self {
        Self { sources }
    }

    pub fn resolve(&self, title: &str) -> Option<MangaMetadata> {
        for source in &self.sources {
            match source.search(title) {
                Ok(Some(metadata)) => {
                    debug!(source = source.name(), title, "metadata hit");
                    return Some(metadata);
                }
                Ok(None) => {
                    debug!(source = source.name(), title, "metadata miss");
                }
                Err(err) => {
                    warn!(source = source.name(), title, error = %err, "metadata source failed");
                }
            }
        }
        None
    }
}

/// Caller-side pacing shared by the HTTP sources.
struct RateLimiter {
    delay: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl RateLimiter {
    fn new(delay: Duration) -> Self {
        Self {
            delay,
            last_request: Mutex::new(None),
        }
    }

    fn wait(&self) {
        let mut last = self.last_request.lock().unwrap();
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.delay {
                thread::sleep(self.delay - elapsed);
            }
        }
        *last = Some(Instant::now());
    }
}

fn default_headers() -> Result<HeaderMap, RepackError> {
    let mut headers = HeaderMap::new();
    headers.insert(
        USER_AGENT,
        HeaderValue::from_str(&format!("manga-repack/{}", env!("CARGO_PKG_VERSION")))
            .map_err(|err| RepackError::MetadataHttp(err.to_string()))?,
    );
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    Ok(headers)
}

fn send_with_retries<F>(mut make_req: F) -> Result<reqwest::blocking::Response, RepackError>
where
    F: FnMut() -> reqwest::blocking::RequestBuilder,
{
    const MAX_RETRIES: usize = 3;
    const BASE_DELAY_MS: u64 = 200;
    let mut attempt = 0usize;
    loop {
        match make_req().send() {
            Ok(resp) => {
                let status = resp.status().as_u16();
                if attempt < MAX_RETRIES && is_retryable_status(status) {
                    thread::sleep(Duration::from_millis(BASE_DELAY_MS * (attempt as u64 + 1)));
                    attempt += 1;
                    continue;
                }
                return Ok(resp);
            }
            Err(err) => {
                if attempt < MAX_RETRIES && is_retryable_error(&err) {
                    thread::sleep(Duration::from_millis(BASE_DELAY_MS * (attempt as u64 + 1)));
                    attempt += 1;
                    continue;
                }
                return Err(RepackError::MetadataHttp(err.to_string()));
            }
        }
    }
}

fn handle_status(
    response: reqwest::blocking::Response,
) -> Result<reqwest::blocking::Response, RepackError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let message = response
        .text()
        .unwrap_or_else(|_| "metadata request failed".to_string());
    Err(RepackError::MetadataStatus { status, message })
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

/// Bangumi (api.bgm.tv) catalog client. Subject type 1 is books/manga.
pub struct BangumiClient {
    client: Client,
    limiter: RateLimiter,
}

impl BangumiClient {
    const BASE_URL: &'static str = "https://api.bgm.tv";

    pub fn new(timeout: Duration, rate_limit_delay: Duration) -> Result<Self, RepackError> {
        let client = Client::builder()
            .default_headers(default_headers()?)
            .timeout(timeout)
            .build()
            .map_err(|err| RepackError::MetadataHttp(err.to_string()))?;
        Ok(Self {
            client,
            limiter: RateLimiter::new(rate_limit_delay),
        })
    }

    fn get_json(&self, url: &str) -> Result<Value, RepackError> {
        self.limiter.wait();
        let response = send_with_retries(|| self.client.get(url))?;
        let response = handle_status(response)?;
        response
            .json()
            .map_err(|err| RepackError::MetadataHttp(err.to_string()))
    }

    fn parse_subject(&self, subject: &Value) -> MangaMetadata {
        let infobox = subject
            .get("infobox")
            .and_then(|value| value.as_array())
            .cloned()
            .unwrap_or_default();

        let author = infobox_value(&infobox, &["作者", "漫画作者"]);
        let artist = infobox_value(&infobox, &["作画", "画师"]).or_else(|| author.clone());
        let publisher = infobox_value(&infobox, &["出版社", "连载杂志"]);
        let total_volumes = infobox_value(&infobox, &["话数"])
            .and_then(|value| value.trim().parse::<u32>().ok());

        let tags: Vec<String> = subject
            .get("tags")
            .and_then(|value| value.as_array())
            .map(|tags| {
                tags.iter()
                    .filter_map(|tag| tag.get("name").and_then(|name| name.as_str()))
                    .take(10)
                    .map(|name| name.to_string())
                    .collect()
            })
            .unwrap_or_default();

        let images = subject.get("images");
        let cover_url = ["large", "common", "medium"]
            .iter()
            .find_map(|key| {
                images
                    .and_then(|value| value.get(key))
                    .and_then(|value| value.as_str())
            })
            .map(|url| url.to_string());

        MangaMetadata {
            title: string_field(subject, "name").unwrap_or_default(),
            title_zh: string_field(subject, "name_cn").filter(|name| !name.is_empty()),
            title_ja: string_field(subject, "name"),
            title_en: None,
            author,
            artist,
            publisher,
            summary: string_field(subject, "summary"),
            tags,
            total_volumes,
            publish_date: string_field(subject, "date"),
            cover_url,
            source: "bangumi".to_string(),
            source_id: subject.get("id").map(|id| id.to_string()),
        }
    }
}

impl MetadataSource for BangumiClient {
    fn name(&self) -> &'static str {
        "bangumi"
    }

    fn search(&self, title: &str) -> Result<Option<MangaMetadata>, RepackError> {
        let search_url = format!(
            "{}/search/subject/{title}?type=1&responseGroup=small",
            Self::BASE_URL
        );
        let results = self.get_json(&search_url)?;
        let Some(first_id) = results
            .get("list")
            .and_then(|list| list.as_array())
            .and_then(|list| list.first())
            .and_then(|subject| subject.get("id"))
            .and_then(|id| id.as_u64())
        else {
            return Ok(None);
        };

        let subject = self.get_json(&format!("{}/v0/subjects/{first_id}", Self::BASE_URL))?;
        Ok(Some(self.parse_subject(&subject)))
    }
}

/// AniList GraphQL catalog client, used as a fallback behind Bangumi.
pub struct AniListClient {
    client: Client,
    limiter: RateLimiter,
}

impl AniListClient {
    const API_URL: &'static str = "https://graphql.anilist.co";

    const SEARCH_QUERY: &'static str = r#"
        query ($search: String) {
          Media(search: $search, type: MANGA, format: MANGA) {
            id
            title { romaji english native }
            description
            volumes
            coverImage { large medium }
            staff { edges { node { name { full } } role } }
            tags { name }
            startDate { year month day }
          }
        }
    "#;

    pub fn new(timeout: Duration, rate_limit_delay: Duration) -> Result<Self, RepackError> {
        let client = Client::builder()
            .default_headers(default_headers()?)
            .timeout(timeout)
            .build()
            .map_err(|err| RepackError::MetadataHttp(err.to_string()))?;
        Ok(Self {
            client,
            limiter: RateLimiter::new(rate_limit_delay),
        })
    }

    fn parse_media(&self, media: &Value) -> MangaMetadata {
        let titles = media.get("title");
        let title_en = titles
            .and_then(|value| value.get("english"))
            .and_then(|value| value.as_str())
            .map(|value| value.to_string());
        let title_ja = titles
            .and_then(|value| value.get("native"))
            .and_then(|value| value.as_str())
            .map(|value| value.to_string());
        let title_romaji = titles
            .and_then(|value| value.get("romaji"))
            .and_then(|value| value.as_str())
            .map(|value| value.to_string());

        let mut author = None;
        let mut artist = None;
        if let Some(edges) = media
            .get("staff")
            .and_then(|staff| staff.get("edges"))
            .and_then(|edges| edges.as_array())
        {
            for edge in edges {
                let role = edge
                    .get("role")
                    .and_then(|role| role.as_str())
                    .unwrap_or("")
                    .to_lowercase();
                let name = edge
                    .get("node")
                    .and_then(|node| node.get("name"))
                    .and_then(|name| name.get("full"))
                    .and_then(|full| full.as_str())
                    .map(|full| full.to_string());
                if role.contains("story") || role.contains("author") {
                    author = name;
                } else if role.contains("art") {
                    artist = name;
                }
            }
        }
        let artist = artist.or_else(|| author.clone());

        let tags: Vec<String> = media
            .get("tags")
            .and_then(|tags| tags.as_array())
            .map(|tags| {
                tags.iter()
                    .filter_map(|tag| tag.get("name").and_then(|name| name.as_str()))
                    .take(10)
                    .map(|name| name.to_string())
                    .collect()
            })
            .unwrap_or_default();

        let publish_date = media
            .get("startDate")
            .and_then(|date| date.get("year"))
            .and_then(|year| year.as_u64())
            .map(|year| {
                let month = media
                    .get("startDate")
                    .and_then(|date| date.get("month"))
                    .and_then(|month| month.as_u64())
                    .unwrap_or(1);
                let day = media
                    .get("startDate")
                    .and_then(|date| date.get("day"))
                    .and_then(|day| day.as_u64())
                    .unwrap_or(1);
                format!("{year}-{month:02}-{day:02}")
            });

        let cover_url = ["large", "medium"].iter().find_map(|key| {
            media
                .get("coverImage")
                .and_then(|image| image.get(key))
                .and_then(|url| url.as_str())
                .map(|url| url.to_string())
        });

        MangaMetadata {
            title: title_romaji
                .clone()
                .or_else(|| title_en.clone())
                .or_else(|| title_ja.clone())
                .unwrap_or_default(),
            title_zh: None,
            title_ja,
            title_en,
            author,
            artist,
            publisher: None,
            summary: media
                .get("description")
                .and_then(|value| value.as_str())
                .map(|value| value.to_string()),
            tags,
            total_volumes: media
                .get("volumes")
                .and_then(|value| value.as_u64())
                .map(|value| value as u32),
            publish_date,
            cover_url,
            source: "anilist".to_string(),
            source_id: media.get("id").map(|id| id.to_string()),
        }
    }
}

impl MetadataSource for AniListClient {
    fn name(&self) -> &'static str {
        "anilist"
    }

    fn search(&self, title: &str) -> Result<Option<MangaMetadata>, RepackError> {
        self.limiter.wait();
        let body = json!({
            "query": Self::SEARCH_QUERY,
            "variables": { "search": title },
        });
        let response = send_with_retries(|| self.client.post(Self::API_URL).json(&body))?;

        // AniList answers 404 for "no such media" rather than an empty set.
        if response.status().as_u16() == 404 {
            return Ok(None);
        }
        let response = handle_status(response)?;
        let payload: Value = response
            .json()
            .map_err(|err| RepackError::MetadataHttp(err.to_string()))?;

        if payload.get("errors").is_some_and(|errors| !errors.is_null()) {
            return Ok(None);
        }
        let Some(media) = payload
            .get("data")
            .and_then(|data| data.get("Media"))
            .filter(|media| !media.is_null())
        else {
            return Ok(None);
        };
        Ok(Some(self.parse_media(media)))
    }
}

fn string_field(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(|field| field.as_str())
        .map(|field| field.to_string())
}

/// Looks up the first matching infobox key; values may be plain strings or
/// arrays of `{v: ...}` objects.
fn infobox_value(infobox: &[Value], keys: &[&str]) -> Option<String> {
    for item in infobox {
        let key = item.get("key").and_then(|key| key.as_str()).unwrap_or("");
        if !keys.contains(&key) {
            continue;
        }
        let value = item.get("value")?;
        if let Some(text) = value.as_str() {
            return Some(text.to_string());
        }
        if let Some(parts) = value.as_array() {
            let joined = parts
                .iter()
                .map(|part| {
                    part.get("v")
                        .and_then(|v| v.as_str())
                        .map(|v| v.to_string())
                        .unwrap_or_else(|| part.to_string())
                })
                .collect::<Vec<_>>()
                .join(", ");
            return Some(joined);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Failing;
    struct Hit;

    impl MetadataSource for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }
        fn search(&self, _title: &str) -> Result<Option<MangaMetadata>, RepackError> {
            Err(RepackError::MetadataHttp("down".to_string()))
        }
    }

    impl MetadataSource for Hit {
        fn name(&self) -> &'static str {
            "hit"
        }
        fn search(&self, title: &str) -> Result<Option<MangaMetadata>, RepackError> {
            Ok(Some(MangaMetadata {
                title: title.to_string(),
                source: "hit".to_string(),
                ..MangaMetadata::default()
            }))
        }
    }

    #[test]
    fn resolver_falls_through_failing_source() {
        let resolver = MetadataResolver::new(vec![Box::new(Failing), Box::new(Hit)]);
        let metadata = resolver.resolve("タイトル").unwrap();
        assert_eq!(metadata.source, "hit");
    }

    #[test]
    fn resolver_with_no_sources_resolves_nothing() {
        let resolver = MetadataResolver::new(Vec::new());
        assert!(resolver.resolve("anything").is_none());
    }

    #[test]
    fn preferred_title_uses_localized_when_present() {
        let metadata = MangaMetadata {
            title: "原題".to_string(),
            title_zh: Some("译名".to_string()),
            ..MangaMetadata::default()
        };
        assert_eq!(metadata.preferred_title(), "译名");

        let bare = MangaMetadata {
            title: "原題".to_string(),
            ..MangaMetadata::default()
        };
        assert_eq!(bare.preferred_title(), "原題");
    }

    #[test]
    fn bangumi_infobox_parsing() {
        let subject = serde_json::json!({
            "id": 12,
            "name": "よつばと!",
            "name_cn": "四叶妹妹！",
            "summary": "日常",
            "date": "2003-08-27",
            "infobox": [
                {"key": "作者", "value": "あずまきよひこ"},
                {"key": "出版社", "value": [{"v": "KADOKAWA"}, {"v": "MediaWorks"}]},
                {"key": "话数", "value": "15"}
            ],
            "tags": [{"name": "日常"}, {"name": "搞笑"}],
            "images": {"large": "https://example/cover.jpg"}
        });

        let client = BangumiClient::new(Duration::from_secs(1), Duration::ZERO).unwrap();
        let metadata = client.parse_subject(&subject);
        assert_eq!(metadata.preferred_title(), "四叶妹妹！");
        assert_eq!(metadata.author.as_deref(), Some("あずまきよひこ"));
        assert_eq!(metadata.artist.as_deref(), Some("あずまきよひこ"));
        assert_eq!(
            metadata.publisher.as_deref(),
            Some("KADOKAWA, MediaWorks")
        );
        assert_eq!(metadata.total_volumes, Some(15));
        assert_eq!(metadata.tags.len(), 2);
        assert_eq!(metadata.cover_url.as_deref(), Some("https://example/cover.jpg"));
    }

    #[test]
    fn anilist_media_parsing() {
        let media = serde_json::json!({
            "id": 30002,
            "title": {"romaji": "Berserk", "english": null, "native": "ベルセルク"},
            "description": "Dark fantasy",
            "volumes": 41,
            "coverImage": {"large": "https://example/b.jpg"},
            "staff": {"edges": [
                {"node": {"name": {"full": "Kentarou Miura"}}, "role": "Story & Art"}
            ]},
            "tags": [{"name": "Seinen"}],
            "startDate": {"year": 1989, "month": 8, "day": 25}
        });

        let client = AniListClient::new(Duration::from_secs(1), Duration::ZERO).unwrap();
        let metadata = client.parse_media(&media);
        assert_eq!(metadata.title, "Berserk");
        assert_eq!(metadata.title_ja.as_deref(), Some("ベルセルク"));
        assert_eq!(metadata.total_volumes, Some(41));
        assert_eq!(metadata.publish_date.as_deref(), Some("1989-08-25"));
        assert_eq!(metadata.source, "anilist");
    }
}
