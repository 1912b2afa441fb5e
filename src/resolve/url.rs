//! Mapping of legacy absolute source-system URLs onto target references.
//!
//! Three path shapes survive content migration verbatim: the short-link form
//! (`…/x/<key>`, where the key encodes the numeric page id), the page-id query
//! form (`…?pageId=<id>`), and the display-path form
//! (`…/display/<SPACE>/<TITLE>`). The mapper order is fixed; the short-link
//! form is recognized independently of base-URL matching, the other two apply
//! only under a caller-supplied known base URL.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use once_cell::sync::Lazy;
use percent_encoding::percent_decode_str;
use regex::Regex;
use url::Url;

use super::Resolution;
use crate::store::MappingStore;
use crate::AppResult;

pub const DEFAULT_SHORT_LINK_PREFIX: &str = "/x/";

static DISPLAY_PATH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^display/([^/]+)/(.+)$").expect("display path pattern"));

/// What the mapper set concluded about one absolute URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UrlOutcome {
    Resolved(Resolution),
    /// The URL matches a known source-system shape but no mapping exists.
    Unresolved,
    /// Not a source-system URL: no base matched and no short-link shape.
    Foreign,
}

pub struct UrlMapperSet {
    /// Known source-system base URLs, normalized with a trailing slash.
    base_urls: Vec<String>,
    short_link_prefix: String,
}

impl UrlMapperSet {
    pub fn new(base_urls: &[String], short_link_prefix: Option<&str>) -> Self {
        let mut bases = Vec::new();
        for raw in base_urls {
            match Url::parse(raw) {
                Ok(_) => {
                    let mut base = raw.clone();
                    if !base.ends_with('/') {
                        base.push('/');
                    }
                    bases.push(base);
                }
                Err(err) => {
                    tracing::warn!(
                        target: "pagelift",
                        event = "base_url_invalid",
                        url = %raw,
                        error = %err,
                    );
                }
            }
        }
        UrlMapperSet {
            base_urls: bases,
            short_link_prefix: short_link_prefix
                .unwrap_or(DEFAULT_SHORT_LINK_PREFIX)
                .to_string(),
        }
    }

    /// Runs the mappers in their fixed order against `raw`.
    pub async fn resolve(&self, store: &MappingStore, raw: &str) -> AppResult<UrlOutcome> {
        let mut matched = false;

        if let Some(key) = self.short_link_key(raw) {
            matched = true;
            if let Some(id) = decode_short_key(&key) {
                if let Some(target) = store.lookup_by_id(id).await? {
                    return Ok(UrlOutcome::Resolved(Resolution::page(target)));
                }
            }
        }

        if let Some(tail) = self.strip_base(raw) {
            matched = true;

            if let Some(id) = page_id_param(raw) {
                if let Some(target) = store.lookup_by_id(id).await? {
                    return Ok(UrlOutcome::Resolved(Resolution::page(target)));
                }
            }

            if let Some(caps) = DISPLAY_PATH.captures(tail.split(['?', '#']).next().unwrap_or(tail))
            {
                let space = decode_segment(&caps[1]);
                let title = decode_segment(&caps[2]);
                if let Some(target) = store.lookup_by_title(&space, &title).await? {
                    return Ok(UrlOutcome::Resolved(Resolution::page(target)));
                }
            }
        }

        if matched {
            Ok(UrlOutcome::Unresolved)
        } else {
            Ok(UrlOutcome::Foreign)
        }
    }

    /// The short-link key, when the URL path carries the short-link prefix.
    /// Deliberately independent of base-URL matching.
    fn short_link_key(&self, raw: &str) -> Option<String> {
        let url = Url::parse(raw).ok()?;
        let path = url.path();
        let idx = path.find(&self.short_link_prefix)?;
        let key: String = path[idx + self.short_link_prefix.len()..]
            .chars()
            .take_while(|ch| *ch != '/')
            .collect();
        if key.is_empty() {
            None
        } else {
            Some(key)
        }
    }

    /// Path-and-query remainder after a known base URL, or `None`.
    fn strip_base<'a>(&self, raw: &'a str) -> Option<&'a str> {
        self.base_urls
            .iter()
            .find_map(|base| raw.strip_prefix(base.as_str()))
    }
}

fn page_id_param(raw: &str) -> Option<i64> {
    let url = Url::parse(raw).ok()?;
    url.query_pairs()
        .find(|(key, _)| key == "pageId")
        .and_then(|(_, value)| value.parse::<i64>().ok())
}

fn decode_segment(raw: &str) -> String {
    let plus_as_space = raw.replace('+', " ");
    percent_decode_str(&plus_as_space)
        .decode_utf8()
        .map(|s| s.into_owned())
        .unwrap_or(plus_as_space)
}

/// Short-link keys are the page id's little-endian bytes, trailing zeros
/// trimmed, in unpadded url-safe base64.
pub fn decode_short_key(key: &str) -> Option<i64> {
    let bytes = URL_SAFE_NO_PAD.decode(key).ok()?;
    if bytes.is_empty() || bytes.len() > 8 {
        return None;
    }
    let mut buf = [0u8; 8];
    buf[..bytes.len()].copy_from_slice(&bytes);
    let id = u64::from_le_bytes(buf);
    i64::try_from(id).ok()
}

/// Inverse of [`decode_short_key`]; used when seeding test fixtures.
pub fn encode_short_key(id: i64) -> String {
    let bytes = (id as u64).to_le_bytes();
    let len = bytes
        .iter()
        .rposition(|b| *b != 0)
        .map(|pos| pos + 1)
        .unwrap_or(1);
    URL_SAFE_NO_PAD.encode(&bytes[..len])
}
