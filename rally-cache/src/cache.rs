use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Cached response: body, validators and the two expiry times.
///
/// `soft_ttl` is the point after which the entry may still be served but has
/// to be revalidated in the background, `ttl` the point after which it must not
/// be served at all. `soft_ttl <= ttl` always holds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheEntry {
    /// Response body. Stores that serialize entries keep it out of band.
    #[serde(skip)]
    pub data: Vec<u8>,
    /// HTTP response headers
    pub headers: HashMap<String, String>,
    /// ETag for cache coherency
    pub etag: Option<String>,
    /// Date of the response as reported by the server
    pub server_date: Option<DateTime<Utc>>,
    /// Last-Modified of the requested object
    pub last_modified: Option<DateTime<Utc>>,
    ttl: DateTime<Utc>,
    soft_ttl: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(
        data: Vec<u8>,
        headers: HashMap<String, String>,
        soft_ttl: DateTime<Utc>,
        ttl: DateTime<Utc>,
    ) -> Self {
        Self {
            data,
            headers,
            etag: None,
            server_date: None,
            last_modified: None,
            ttl,
            soft_ttl: soft_ttl.min(ttl),
        }
    }

    pub fn with_etag(mut self, etag: impl Into<String>) -> Self {
        self.etag = Some(etag.into());
        self
    }

    pub fn with_server_date(mut self, date: DateTime<Utc>) -> Self {
        self.server_date = Some(date);
        self
    }

    pub fn with_last_modified(mut self, date: DateTime<Utc>) -> Self {
        self.last_modified = Some(date);
        self
    }

    pub fn ttl(&self) -> DateTime<Utc> {
        self.ttl
    }

    pub fn soft_ttl(&self) -> DateTime<Utc> {
        self.soft_ttl
    }

    /// Moves both expiry times, clamping the soft one to the hard one.
    pub fn set_expiry(&mut self, soft_ttl: DateTime<Utc>, ttl: DateTime<Utc>) {
        self.ttl = ttl;
        self.soft_ttl = soft_ttl.min(ttl);
    }

    /// Forces a refresh on next use; with `full_expire` the entry also stops
    /// being servable.
    pub fn invalidate(&mut self, full_expire: bool) {
        let epoch = DateTime::<Utc>::default();
        self.soft_ttl = epoch;
        if full_expire {
            self.ttl = epoch;
        }
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.ttl < now
    }

    pub fn refresh_needed(&self) -> bool {
        self.refresh_needed_at(Utc::now())
    }

    pub fn refresh_needed_at(&self, now: DateTime<Utc>) -> bool {
        self.soft_ttl < now
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_soft_ttl_clamped_to_ttl() {
        let now = Utc::now();
        let entry = CacheEntry::new(
            b"body".to_vec(),
            HashMap::new(),
            now + Duration::seconds(60),
            now + Duration::seconds(10),
        );
        assert_eq!(entry.soft_ttl(), entry.ttl());

        let mut entry = entry;
        entry.set_expiry(now + Duration::seconds(30), now);
        assert_eq!(entry.soft_ttl(), now);
    }

    #[test]
    fn test_expiry_checks() {
        let now = Utc::now();
        let entry = CacheEntry::new(
            vec![],
            HashMap::new(),
            now + Duration::seconds(10),
            now + Duration::seconds(20),
        );

        assert!(!entry.refresh_needed_at(now));
        assert!(!entry.is_expired_at(now));

        let later = now + Duration::seconds(15);
        assert!(entry.refresh_needed_at(later));
        assert!(!entry.is_expired_at(later));

        let much_later = now + Duration::seconds(25);
        assert!(entry.refresh_needed_at(much_later));
        assert!(entry.is_expired_at(much_later));
    }

    #[test]
    fn test_invalidate() {
        let now = Utc::now();
        let mut entry = CacheEntry::new(
            vec![1, 2, 3],
            HashMap::new(),
            now + Duration::hours(1),
            now + Duration::hours(2),
        );

        entry.invalidate(false);
        assert!(entry.refresh_needed());
        assert!(!entry.is_expired());

        entry.invalidate(true);
        assert!(entry.is_expired());
    }

    #[test]
    fn test_data_is_not_serialized() {
        let now = Utc::now();
        let entry = CacheEntry::new(b"secret".to_vec(), HashMap::new(), now, now)
            .with_etag("\"v1\"");
        let json = serde_json::to_string(&entry).unwrap();
        assert!(!json.contains("data"));

        let back: CacheEntry = serde_json::from_str(&json).unwrap();
        assert!(back.data.is_empty());
        assert_eq!(back.etag.as_deref(), Some("\"v1\""));
        assert_eq!(back.ttl(), entry.ttl());
    }
}
