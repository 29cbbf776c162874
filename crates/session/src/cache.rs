//! Maps a downstream session to the upstream session it has opened with each
//! registered upstream. One entry per `(downstream, upstream)` pair, sharded so
//! that mutating one downstream session's row never blocks another's.

use std::sync::Arc;

use dashmap::DashMap;
use shared::primitives::WrappedUuidV4;
use tracing::debug;

pub type UpstreamId = String;
pub type UpstreamSessionId = String;

#[derive(Debug, Clone, Default)]
pub struct SessionCache {
    by_downstream: Arc<DashMap<WrappedUuidV4, DashMap<UpstreamId, UpstreamSessionId>>>,
}

impl SessionCache {
    pub fn new() -> Self {
        Self {
            by_downstream: Arc::new(DashMap::new()),
        }
    }

    /// Upstream session ids currently held for a downstream session, keyed by
    /// upstream id. Empty if the downstream session has never routed a call.
    pub fn get(&self, downstream: &WrappedUuidV4) -> Vec<(UpstreamId, UpstreamSessionId)> {
        match self.by_downstream.get(downstream) {
            Some(row) => row
                .iter()
                .map(|entry| (entry.key().clone(), entry.value().clone()))
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn get_upstream_session(
        &self,
        downstream: &WrappedUuidV4,
        upstream_id: &str,
    ) -> Option<UpstreamSessionId> {
        self.by_downstream
            .get(downstream)
            .and_then(|row| row.get(upstream_id).map(|v| v.value().clone()))
    }

    /// Records a newly-opened upstream session for a downstream session.
    /// Returns `false` without overwriting if a mapping already existed for
    /// this `(downstream, upstream)` pair — the caller must close the upstream
    /// session it just opened rather than leak it.
    pub fn put(
        &self,
        downstream: WrappedUuidV4,
        upstream_id: UpstreamId,
        upstream_session_id: UpstreamSessionId,
    ) -> bool {
        let row = self.by_downstream.entry(downstream).or_default();
        if row.contains_key(&upstream_id) {
            return false;
        }
        row.insert(upstream_id, upstream_session_id);
        true
    }

    pub fn remove_upstream_session(&self, downstream: &WrappedUuidV4, upstream_id: &str) {
        if let Some(row) = self.by_downstream.get(downstream) {
            row.remove(upstream_id);
        }
    }

    /// Tears down every upstream session held for a downstream session,
    /// returning the closed `(upstream_id, upstream_session_id)` pairs so the
    /// caller can notify each Upstream Manager to release its client-side state.
    pub fn delete_all(
        &self,
        downstream: &WrappedUuidV4,
    ) -> Vec<(UpstreamId, UpstreamSessionId)> {
        match self.by_downstream.remove(downstream) {
            Some((_, row)) => {
                debug!(downstream = %downstream, count = row.len(), "tearing down downstream session");
                row.into_iter().collect()
            }
            None => Vec::new(),
        }
    }

    /// Drops every downstream session's mapping to one upstream, for when
    /// that upstream is unregistered entirely. Returns how many sessions
    /// held one.
    pub fn purge_upstream(&self, upstream_id: &str) -> usize {
        let mut purged = 0;
        for row in self.by_downstream.iter() {
            if row.value().remove(upstream_id).is_some() {
                purged += 1;
            }
        }
        if purged > 0 {
            debug!(upstream = upstream_id, purged, "purged sessions for removed upstream");
        }
        purged
    }

    pub fn downstream_session_count(&self) -> usize {
        self.by_downstream.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_returns_false_on_existing_mapping() {
        let cache = SessionCache::new();
        let downstream = WrappedUuidV4::new();
        assert!(cache.put(downstream, "up-1".into(), "sess-a".into()));
        assert!(!cache.put(downstream, "up-1".into(), "sess-b".into()));
        assert_eq!(
            cache.get_upstream_session(&downstream, "up-1"),
            Some("sess-a".to_string())
        );
    }

    #[test]
    fn distinct_upstreams_do_not_collide() {
        let cache = SessionCache::new();
        let downstream = WrappedUuidV4::new();
        assert!(cache.put(downstream, "up-1".into(), "sess-a".into()));
        assert!(cache.put(downstream, "up-2".into(), "sess-b".into()));
        let mut mappings = cache.get(&downstream);
        mappings.sort();
        assert_eq!(
            mappings,
            vec![
                ("up-1".to_string(), "sess-a".to_string()),
                ("up-2".to_string(), "sess-b".to_string()),
            ]
        );
    }

    #[test]
    fn delete_all_is_idempotent_and_returns_closed_sessions() {
        let cache = SessionCache::new();
        let downstream = WrappedUuidV4::new();
        cache.put(downstream, "up-1".into(), "sess-a".into());

        let closed = cache.delete_all(&downstream);
        assert_eq!(closed, vec![("up-1".to_string(), "sess-a".to_string())]);
        assert!(cache.delete_all(&downstream).is_empty());
        assert!(cache.get(&downstream).is_empty());
    }

    #[test]
    fn purge_upstream_clears_it_from_every_downstream_session() {
        let cache = SessionCache::new();
        let first = WrappedUuidV4::new();
        let second = WrappedUuidV4::new();
        cache.put(first, "up-1".into(), "sess-a".into());
        cache.put(first, "up-2".into(), "sess-b".into());
        cache.put(second, "up-1".into(), "sess-c".into());

        assert_eq!(cache.purge_upstream("up-1"), 2);
        assert_eq!(cache.get_upstream_session(&first, "up-1"), None);
        assert_eq!(cache.get_upstream_session(&second, "up-1"), None);
        assert_eq!(
            cache.get_upstream_session(&first, "up-2"),
            Some("sess-b".to_string())
        );
        assert_eq!(cache.purge_upstream("up-1"), 0);
    }

    #[test]
    fn remove_upstream_session_leaves_others_intact() {
        let cache = SessionCache::new();
        let downstream = WrappedUuidV4::new();
        cache.put(downstream, "up-1".into(), "sess-a".into());
        cache.put(downstream, "up-2".into(), "sess-b".into());

        cache.remove_upstream_session(&downstream, "up-1");
        assert_eq!(cache.get_upstream_session(&downstream, "up-1"), None);
        assert_eq!(
            cache.get_upstream_session(&downstream, "up-2"),
            Some("sess-b".to_string())
        );
    }
}
