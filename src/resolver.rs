//! # Resolver Module
//!
//! Follows superseded-by pointers to the live canonical record.
//! Chains are short in practice (one or two hops), but a hop bound
//! protects against pointer cycles left behind by concurrent merges.

use crate::model::{CanonicalChain, OrgId, OrgRecord};
use crate::store::{RemoteStore, StoreError};
use rustc_hash::FxHashMap;
use tracing::warn;

pub const DEFAULT_MAX_HOPS: usize = 10;

/// Canonical-id resolver with a per-run cache. The cache maps any id
/// ever resolved to its final canonical id, so repeated members of the
/// same chain cost one walk total.
#[derive(Debug)]
pub struct CanonicalResolver {
    cache: FxHashMap<OrgId, OrgId>,
    max_hops: usize,
}

impl Default for CanonicalResolver {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_HOPS)
    }
}

impl CanonicalResolver {
    pub fn new(max_hops: usize) -> Self {
        Self {
            cache: FxHashMap::default(),
            max_hops,
        }
    }

    /// Resolve the canonical id for `id`, fetching records as needed.
    ///
    /// Terminates when the current record is missing, has no pointer,
    /// or points at itself. When the hop bound is hit the last id
    /// reached is returned with `exhausted` set; callers treat that id
    /// like any other candidate.
    pub fn resolve(
        &mut self,
        store: &dyn RemoteStore,
        id: &OrgId,
    ) -> Result<CanonicalChain, StoreError> {
        self.resolve_inner(store, id, None)
    }

    /// Like [`resolve`](Self::resolve), but seeds the walk with an
    /// already fetched record to save the first lookup.
    pub fn resolve_with_seed(
        &mut self,
        store: &dyn RemoteStore,
        seed: &OrgRecord,
    ) -> Result<CanonicalChain, StoreError> {
        self.resolve_inner(store, &seed.id, Some(seed.superseded_by.clone()))
    }

    fn resolve_inner(
        &mut self,
        store: &dyn RemoteStore,
        id: &OrgId,
        mut pointer: Option<Option<OrgId>>,
    ) -> Result<CanonicalChain, StoreError> {
        if let Some(canonical) = self.cache.get(id) {
            return Ok(CanonicalChain {
                start: id.clone(),
                canonical: canonical.clone(),
                hops: 0,
                exhausted: false,
            });
        }

        let mut current = id.clone();
        let mut hops = 0;
        let mut exhausted = true;

        while hops < self.max_hops {
            hops += 1;

            let next = match pointer.take() {
                Some(p) => p,
                None => match store.fetch(&current)? {
                    Some(record) => record.superseded_by,
                    // Missing records resolve to themselves.
                    None => {
                        exhausted = false;
                        break;
                    }
                },
            };

            match next {
                None => {
                    exhausted = false;
                    break;
                }
                Some(next_id) if next_id == current => {
                    exhausted = false;
                    break;
                }
                Some(next_id) => {
                    current = next_id;
                }
            }
        }

        if exhausted {
            warn!(
                start = %id,
                stopped_at = %current,
                max_hops = self.max_hops,
                "canonical chain exceeded hop bound"
            );
        }

        self.cache.insert(id.clone(), current.clone());
        Ok(CanonicalChain {
            start: id.clone(),
            canonical: current,
            hops,
            exhausted,
        })
    }

    /// Drop all cached resolutions, e.g. after merges changed pointers.
    pub fn invalidate(&mut self) {
        self.cache.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn test_resolves_self_when_no_pointer() {
        let store = MemoryStore::new();
        store.add_org(OrgRecord::new("1", "Acme"));

        let mut resolver = CanonicalResolver::default();
        let chain = resolver.resolve(&store, &"1".into()).unwrap();
        assert_eq!(chain.canonical, OrgId::new("1"));
        assert!(!chain.exhausted);
    }

    #[test]
    fn test_follows_chain_to_endpoint() {
        let store = MemoryStore::new();
        store.add_org(OrgRecord::new("1", "Acme old").with_superseded_by("2"));
        store.add_org(OrgRecord::new("2", "Acme older").with_superseded_by("3"));
        store.add_org(OrgRecord::new("3", "Acme"));

        let mut resolver = CanonicalResolver::default();
        let chain = resolver.resolve(&store, &"1".into()).unwrap();
        assert_eq!(chain.canonical, OrgId::new("3"));
        assert!(!chain.exhausted);
    }

    #[test]
    fn test_missing_record_resolves_to_itself() {
        let store = MemoryStore::new();
        let mut resolver = CanonicalResolver::default();
        let chain = resolver.resolve(&store, &"404".into()).unwrap();
        assert_eq!(chain.canonical, OrgId::new("404"));
    }

    #[test]
    fn test_dangling_pointer_stops_at_target() {
        let store = MemoryStore::new();
        store.add_org(OrgRecord::new("1", "Acme old").with_superseded_by("2"));

        let mut resolver = CanonicalResolver::default();
        let chain = resolver.resolve(&store, &"1".into()).unwrap();
        assert_eq!(chain.canonical, OrgId::new("2"));
        assert!(!chain.exhausted);
    }

    #[test]
    fn test_cycle_hits_hop_bound() {
        let store = MemoryStore::new();
        store.add_org(OrgRecord::new("1", "A").with_superseded_by("2"));
        store.add_org(OrgRecord::new("2", "B").with_superseded_by("1"));

        let mut resolver = CanonicalResolver::default();
        let chain = resolver.resolve(&store, &"1".into()).unwrap();
        assert!(chain.exhausted);
        assert_eq!(chain.hops, DEFAULT_MAX_HOPS);
        // Terminates with some member of the cycle.
        assert!(chain.canonical == OrgId::new("1") || chain.canonical == OrgId::new("2"));
    }

    #[test]
    fn test_self_pointer_terminates() {
        let store = MemoryStore::new();
        store.add_org(OrgRecord::new("1", "A").with_superseded_by("1"));

        let mut resolver = CanonicalResolver::default();
        let chain = resolver.resolve(&store, &"1".into()).unwrap();
        assert_eq!(chain.canonical, OrgId::new("1"));
        assert!(!chain.exhausted);
    }

    #[test]
    fn test_cache_short_circuits() {
        let store = MemoryStore::new();
        store.add_org(OrgRecord::new("1", "Acme old").with_superseded_by("2"));
        store.add_org(OrgRecord::new("2", "Acme"));

        let mut resolver = CanonicalResolver::default();
        resolver.resolve(&store, &"1".into()).unwrap();
        let cached = resolver.resolve(&store, &"1".into()).unwrap();
        assert_eq!(cached.canonical, OrgId::new("2"));
        assert_eq!(cached.hops, 0);

        resolver.invalidate();
        let fresh = resolver.resolve(&store, &"1".into()).unwrap();
        assert!(fresh.hops > 0);
    }

    #[test]
    fn test_seeded_resolution_skips_first_fetch() {
        let store = MemoryStore::new();
        store.add_org(OrgRecord::new("2", "Acme"));

        // The seed itself is not in the store; its pointer drives the
        // first hop anyway.
        let seed = OrgRecord::new("1", "Acme old").with_superseded_by("2");
        let mut resolver = CanonicalResolver::default();
        let chain = resolver.resolve_with_seed(&store, &seed).unwrap();
        assert_eq!(chain.canonical, OrgId::new("2"));
    }
}
