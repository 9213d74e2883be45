//! Turning user input into a canonical, fetchable source.
//!
//! A [`SourceReference`] is resolved exactly once into a [`ResolvedSource`].
//! Network access goes through the [`HttpFetch`] seam so resolution can be
//! exercised without a network.

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Url;
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Length of a video id.
pub const VIDEO_ID_LEN: usize = 11;

const PLAYLIST_PREFIXES: [&str; 6] = ["PL", "OL", "UU", "FL", "RD", "LL"];

static TITLE_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("valid title regex"));

static VIDEO_ID_IN_PAGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#""videoId"\s*:\s*"([A-Za-z0-9_-]{11})""#).expect("valid video id regex")
});

/// Blocking HTTP access used during resolution and thumbnail fetching.
#[cfg_attr(test, mockall::automock)]
pub trait HttpFetch: Send + Sync {
    /// GET `url`, failing on transport errors and non-success statuses.
    fn fetch_text(&self, url: &str) -> Result<String>;
    fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>>;
}

/// [`HttpFetch`] backed by a blocking reqwest client.
pub struct ReqwestFetcher {
    client: reqwest::blocking::Client,
}

impl ReqwestFetcher {
    pub fn new(config: &EngineConfig) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(config.http_timeout())
            .user_agent(concat!("tubetone/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

impl HttpFetch for ReqwestFetcher {
    fn fetch_text(&self, url: &str) -> Result<String> {
        let resp = self.client.get(url).send()?.error_for_status()?;
        Ok(resp.text()?)
    }

    fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>> {
        let resp = self.client.get(url).send()?.error_for_status()?;
        Ok(resp.bytes()?.to_vec())
    }
}

/// What the user asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceReference {
    Url(String),
    VideoId(String),
    PlaylistId(String),
    Query(String),
}

impl SourceReference {
    /// Classifies free-form input.
    pub fn parse(input: &str) -> Self {
        let text = input.trim();
        if text.starts_with("http://") || text.starts_with("https://") {
            Self::Url(text.to_string())
        } else if text.len() == VIDEO_ID_LEN && is_id_charset(text) {
            Self::VideoId(text.to_string())
        } else if text.len() > VIDEO_ID_LEN
            && is_id_charset(text)
            && PLAYLIST_PREFIXES.iter().any(|p| text.starts_with(p))
        {
            Self::PlaylistId(text.to_string())
        } else {
            Self::Query(text.to_string())
        }
    }
}

/// A reference resolved to a canonical URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSource {
    pub url: String,
    pub video_id: Option<String>,
    pub title: Option<String>,
}

impl ResolvedSource {
    /// Base name for output files when none was requested explicitly.
    pub fn default_base_name(&self) -> String {
        self.title
            .as_deref()
            .map(sanitize_file_name)
            .filter(|s| !s.is_empty())
            .or_else(|| self.video_id.clone())
            .unwrap_or_else(|| "download".to_string())
    }
}

/// Resolves a reference into a canonical URL, verifying that it is reachable.
pub fn resolve(
    reference: &SourceReference,
    fetcher: &dyn HttpFetch,
    config: &EngineConfig,
) -> Result<ResolvedSource> {
    let resolved = match reference {
        SourceReference::Url(url) => resolve_url(url, fetcher)?,
        SourceReference::VideoId(id) => {
            if !is_valid_video_id(id) {
                return Err(EngineError::Validation(format!("malformed video id: {:?}", id)));
            }
            let url = format!("{}{}", config.watch_url, id);
            let page = fetch_reachable(fetcher, &url)?;
            ResolvedSource {
                url,
                video_id: Some(id.clone()),
                title: extract_title(&page),
            }
        }
        SourceReference::PlaylistId(id) => {
            if id.is_empty() || !is_id_charset(id) {
                return Err(EngineError::Validation(format!("malformed playlist id: {:?}", id)));
            }
            let url = format!("{}{}", config.playlist_url, id);
            let page = fetch_reachable(fetcher, &url)?;
            ResolvedSource {
                url,
                video_id: None,
                title: extract_title(&page),
            }
        }
        SourceReference::Query(query) => resolve_query(query, fetcher, config)?,
    };
    info!("Resolved {:?} to {}", reference, resolved.url);
    Ok(resolved)
}

fn resolve_url(url: &str, fetcher: &dyn HttpFetch) -> Result<ResolvedSource> {
    let parsed =
        Url::parse(url).map_err(|e| EngineError::Validation(format!("{}: {}", url, e)))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(EngineError::Validation(format!("unsupported scheme in {}", url)));
    }
    let video_id = match extract_video_id(&parsed) {
        Some(id) if !is_valid_video_id(&id) => {
            return Err(EngineError::Validation(format!("malformed video id in {}", url)));
        }
        other => other,
    };
    let page = fetch_reachable(fetcher, parsed.as_str())?;
    Ok(ResolvedSource {
        url: parsed.to_string(),
        video_id,
        title: extract_title(&page),
    })
}

fn resolve_query(
    query: &str,
    fetcher: &dyn HttpFetch,
    config: &EngineConfig,
) -> Result<ResolvedSource> {
    let mut search = Url::parse(&config.search_url)
        .map_err(|e| EngineError::Config(format!("search_url: {}", e)))?;
    search.query_pairs_mut().append_pair("search_query", query);

    let body = fetcher.fetch_text(search.as_str())?;
    let candidates = extract_video_ids(&body, config.max_search_candidates);
    debug!("Query {:?} produced {} candidates", query, candidates.len());
    if candidates.is_empty() {
        return Err(EngineError::NotFound(query.to_string()));
    }

    let wanted = query.to_lowercase();
    let mut best: Option<(usize, String, String)> = None;
    for id in candidates {
        let url = format!("{}{}", config.watch_url, id);
        let title = match fetcher.fetch_text(&url).map(|page| extract_title(&page)) {
            Ok(Some(title)) => title,
            Ok(None) => continue,
            Err(e) => {
                warn!("Skipping candidate {}: {}", id, e);
                continue;
            }
        };
        let distance = edit_distance(&title.to_lowercase(), &wanted);
        if best.as_ref().is_none_or(|(d, _, _)| distance < *d) {
            best = Some((distance, id, title));
        }
    }

    let (_, id, title) = best.ok_or_else(|| EngineError::NotFound(query.to_string()))?;
    Ok(ResolvedSource {
        url: format!("{}{}", config.watch_url, id),
        video_id: Some(id),
        title: Some(title),
    })
}

fn fetch_reachable(fetcher: &dyn HttpFetch, url: &str) -> Result<String> {
    fetcher
        .fetch_text(url)
        .map_err(|e| EngineError::Validation(format!("{} is unreachable: {}", url, e)))
}

fn is_id_charset(text: &str) -> bool {
    text.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

pub fn is_valid_video_id(id: &str) -> bool {
    id.len() == VIDEO_ID_LEN && is_id_charset(id)
}

/// Extracts the video id from a watch link (`v=`) or a short link path.
pub fn extract_video_id(url: &Url) -> Option<String> {
    if let Some((_, v)) = url.query_pairs().find(|(k, _)| k == "v") {
        return Some(v.into_owned());
    }
    if url.host_str() == Some("youtu.be") {
        return url
            .path_segments()
            .and_then(|mut segments| segments.next())
            .filter(|s| !s.is_empty())
            .map(str::to_string);
    }
    None
}

/// Distinct video ids in page order, at most `limit`.
pub fn extract_video_ids(body: &str, limit: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    VIDEO_ID_IN_PAGE
        .captures_iter(body)
        .map(|c| c[1].to_string())
        .filter(|id| seen.insert(id.clone()))
        .take(limit)
        .collect()
}

/// Page title with the site suffix removed and basic entities decoded.
pub fn extract_title(page: &str) -> Option<String> {
    let raw = TITLE_TAG.captures(page)?.get(1)?.as_str();
    let decoded = raw
        .replace("&amp;", "&")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">");
    let title = decoded.trim();
    let title = title.strip_suffix(" - YouTube").unwrap_or(title).trim();
    if title.is_empty() {
        None
    } else {
        Some(title.to_string())
    }
}

/// Levenshtein distance over Unicode scalar values.
pub fn edit_distance(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];
    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != *cb);
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// Removes characters that are not portable in file names.
pub fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| {
            !c.is_control()
                && !matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*')
        })
        .collect();
    cleaned.trim().trim_matches('.').trim().to_string()
}
