//! Cache policy derived from HTTP response headers.
use crate::CacheEntry;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

// ten years; keeps absurd max-age values representable
const MAX_LIFETIME_SECS: i64 = 10 * 365 * 24 * 60 * 60;

fn seconds_after(base: DateTime<Utc>, seconds: i64) -> DateTime<Utc> {
    base + Duration::seconds(seconds.clamp(0, MAX_LIFETIME_SECS))
}

/// Case-insensitive header lookup.
pub fn header_value<'a>(
    headers: &'a HashMap<String, String>,
    name: &str,
) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

/// Parses an RFC 1123 date ("Sun, 06 Nov 1994 08:49:37 GMT").
pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value.trim())
        .ok()
        .map(|date| date.with_timezone(&Utc))
}

pub fn format_http_date(date: DateTime<Utc>) -> String {
    date.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Charset parameter of `Content-Type`, or `default`.
pub fn parse_charset(headers: &HashMap<String, String>, default: &str) -> String {
    header_value(headers, "Content-Type")
        .and_then(|content_type| {
            content_type.split(';').skip(1).find_map(|param| {
                let (name, value) = param.trim().split_once('=')?;
                name.trim()
                    .eq_ignore_ascii_case("charset")
                    .then(|| value.trim().trim_matches('"').to_string())
            })
        })
        .unwrap_or_else(|| default.to_string())
}

pub fn parse_cache_headers(
    headers: &HashMap<String, String>,
    data: &[u8],
) -> Option<CacheEntry> {
    parse_cache_headers_at(headers, data, Utc::now())
}

/// Builds a [`CacheEntry`] from response headers, or `None` when the response
/// forbids caching (`no-cache` / `no-store`).
///
/// With `Cache-Control` the soft expiry is `now + max-age` and the hard expiry
/// adds `stale-while-revalidate` unless the server demands revalidation.
/// Without it, `Expires - Date` is used for both. Missing policy yields an
/// entry that is already expired but still carries its validators.
pub fn parse_cache_headers_at(
    headers: &HashMap<String, String>,
    data: &[u8],
    now: DateTime<Utc>,
) -> Option<CacheEntry> {
    let server_date = header_value(headers, "Date").and_then(parse_http_date);
    let server_expires = header_value(headers, "Expires").and_then(parse_http_date);
    let last_modified =
        header_value(headers, "Last-Modified").and_then(parse_http_date);
    let etag = header_value(headers, "ETag").map(str::to_string);

    let mut has_cache_control = false;
    let mut max_age = 0i64;
    let mut stale_while_revalidate = 0i64;
    let mut must_revalidate = false;

    if let Some(cache_control) = header_value(headers, "Cache-Control") {
        has_cache_control = true;
        for token in cache_control.split(',') {
            let token = token.trim().to_ascii_lowercase();
            if token == "no-cache" || token == "no-store" {
                return None;
            } else if let Some(seconds) = token.strip_prefix("max-age=") {
                max_age = seconds.parse().unwrap_or(0);
            } else if let Some(seconds) =
                token.strip_prefix("stale-while-revalidate=")
            {
                stale_while_revalidate = seconds.parse().unwrap_or(0);
            } else if token == "must-revalidate" || token == "proxy-revalidate" {
                must_revalidate = true;
            }
        }
    }

    let expired = DateTime::<Utc>::default();
    let (soft_ttl, ttl) = if has_cache_control {
        let soft = seconds_after(now, max_age);
        let hard = if must_revalidate {
            soft
        } else {
            seconds_after(soft, stale_while_revalidate)
        };
        (soft, hard)
    } else {
        match (server_date, server_expires) {
            (Some(date), Some(expires)) if expires >= date => {
                let soft = seconds_after(now, (expires - date).num_seconds());
                (soft, soft)
            }
            _ => (expired, expired),
        }
    };

    let mut entry = CacheEntry::new(data.to_vec(), headers.clone(), soft_ttl, ttl);
    entry.etag = etag;
    entry.server_date = server_date;
    entry.last_modified = last_modified;
    Some(entry)
}
