/*!
 * Registry Statistics
 *
 * Purely observational counters: operation volume, CAS contention, token
 * waits, free-list traffic. Snapshots are plain serializable structs; the
 * dump functions write human-readable text to a caller-supplied sink.
 */

use serde::Serialize;
use std::io::{self, Write};
use std::sync::atomic::{AtomicU64, Ordering};

/// Operation and contention counters
///
/// All counters are relaxed; they order nothing and nothing orders on them.
#[derive(Default)]
pub struct RegistryStats {
    pub(crate) registrations: AtomicU64,
    pub(crate) future_registrations: AtomicU64,
    pub(crate) reregistrations: AtomicU64,
    pub(crate) lookups: AtomicU64,
    pub(crate) lookup_cache_hits: AtomicU64,
    pub(crate) lookup_misses: AtomicU64,
    pub(crate) inc_refs: AtomicU64,
    pub(crate) dec_refs: AtomicU64,
    pub(crate) removes: AtomicU64,
    pub(crate) substitutes: AtomicU64,
    pub(crate) iterations: AtomicU64,
    pub(crate) clears: AtomicU64,
    pub(crate) destroys: AtomicU64,
    pub(crate) kernel_cas_retries: AtomicU64,
    pub(crate) disturb_waits: AtomicU64,
    pub(crate) disturb_bypasses: AtomicU64,
    pub(crate) futures_realized: AtomicU64,
    pub(crate) future_realize_failures: AtomicU64,
    pub(crate) free_func_calls: AtomicU64,
    pub(crate) free_func_failures: AtomicU64,
}

impl RegistryStats {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Point-in-time copy of every counter the registry exposes
///
/// Includes the activity and free-list figures assembled by
/// `Registry::stats_snapshot`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct StatsSnapshot {
    pub registrations: u64,
    pub future_registrations: u64,
    pub reregistrations: u64,
    pub lookups: u64,
    pub lookup_cache_hits: u64,
    pub lookup_misses: u64,
    pub inc_refs: u64,
    pub dec_refs: u64,
    pub removes: u64,
    pub substitutes: u64,
    pub iterations: u64,
    pub clears: u64,
    pub destroys: u64,
    pub kernel_cas_retries: u64,
    pub disturb_waits: u64,
    pub disturb_bypasses: u64,
    pub futures_realized: u64,
    pub future_realize_failures: u64,
    pub free_func_calls: u64,
    pub free_func_failures: u64,
    pub active_threads: u64,
    pub max_active_threads: u64,
    pub public_entries: u64,
    pub internal_entries: u64,
    pub id_freelist_len: u64,
    pub id_freelist_reallocable: u64,
    pub id_freelist_retired: u64,
    pub id_freelist_reused: u64,
    pub id_freelist_trimmed: u64,
    pub type_freelist_len: u64,
    pub type_freelist_reallocable: u64,
    pub type_freelist_retired: u64,
    pub type_freelist_reused: u64,
    pub type_freelist_trimmed: u64,
}

impl StatsSnapshot {
    pub(crate) fn from_counters(stats: &RegistryStats) -> Self {
        let get = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        Self {
            registrations: get(&stats.registrations),
            future_registrations: get(&stats.future_registrations),
            reregistrations: get(&stats.reregistrations),
            lookups: get(&stats.lookups),
            lookup_cache_hits: get(&stats.lookup_cache_hits),
            lookup_misses: get(&stats.lookup_misses),
            inc_refs: get(&stats.inc_refs),
            dec_refs: get(&stats.dec_refs),
            removes: get(&stats.removes),
            substitutes: get(&stats.substitutes),
            iterations: get(&stats.iterations),
            clears: get(&stats.clears),
            destroys: get(&stats.destroys),
            kernel_cas_retries: get(&stats.kernel_cas_retries),
            disturb_waits: get(&stats.disturb_waits),
            disturb_bypasses: get(&stats.disturb_bypasses),
            futures_realized: get(&stats.futures_realized),
            future_realize_failures: get(&stats.future_realize_failures),
            free_func_calls: get(&stats.free_func_calls),
            free_func_failures: get(&stats.free_func_failures),
            active_threads: 0,
            max_active_threads: 0,
            public_entries: 0,
            internal_entries: 0,
            id_freelist_len: 0,
            id_freelist_reallocable: 0,
            id_freelist_retired: 0,
            id_freelist_reused: 0,
            id_freelist_trimmed: 0,
            type_freelist_len: 0,
            type_freelist_reallocable: 0,
            type_freelist_retired: 0,
            type_freelist_reused: 0,
            type_freelist_trimmed: 0,
        }
    }

    fn fields(&self) -> [(&'static str, u64); 34] {
        [
            ("registrations", self.registrations),
            ("future_registrations", self.future_registrations),
            ("reregistrations", self.reregistrations),
            ("lookups", self.lookups),
            ("lookup_cache_hits", self.lookup_cache_hits),
            ("lookup_misses", self.lookup_misses),
            ("inc_refs", self.inc_refs),
            ("dec_refs", self.dec_refs),
            ("removes", self.removes),
            ("substitutes", self.substitutes),
            ("iterations", self.iterations),
            ("clears", self.clears),
            ("destroys", self.destroys),
            ("kernel_cas_retries", self.kernel_cas_retries),
            ("disturb_waits", self.disturb_waits),
            ("disturb_bypasses", self.disturb_bypasses),
            ("futures_realized", self.futures_realized),
            ("future_realize_failures", self.future_realize_failures),
            ("free_func_calls", self.free_func_calls),
            ("free_func_failures", self.free_func_failures),
            ("active_threads", self.active_threads),
            ("max_active_threads", self.max_active_threads),
            ("public_entries", self.public_entries),
            ("internal_entries", self.internal_entries),
            ("id_freelist_len", self.id_freelist_len),
            ("id_freelist_reallocable", self.id_freelist_reallocable),
            ("id_freelist_retired", self.id_freelist_retired),
            ("id_freelist_reused", self.id_freelist_reused),
            ("id_freelist_trimmed", self.id_freelist_trimmed),
            ("type_freelist_len", self.type_freelist_len),
            ("type_freelist_reallocable", self.type_freelist_reallocable),
            ("type_freelist_retired", self.type_freelist_retired),
            ("type_freelist_reused", self.type_freelist_reused),
            ("type_freelist_trimmed", self.type_freelist_trimmed),
        ]
    }

    /// Write every counter to the sink
    pub fn dump(&self, sink: &mut dyn Write) -> io::Result<()> {
        writeln!(sink, "registry statistics:")?;
        for (name, value) in self.fields() {
            writeln!(sink, "  {:<28} {}", name, value)?;
        }
        Ok(())
    }

    /// Write only the counters that are non-zero, prefixed with `tag`
    pub fn dump_nonzero(&self, sink: &mut dyn Write, tag: &str) -> io::Result<()> {
        writeln!(sink, "{} non-zero registry statistics:", tag)?;
        for (name, value) in self.fields() {
            if value != 0 {
                writeln!(sink, "  {:<28} {}", name, value)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dump_contains_counters() {
        let stats = RegistryStats::new();
        RegistryStats::bump(&stats.lookups);
        RegistryStats::bump(&stats.lookups);

        let snapshot = StatsSnapshot::from_counters(&stats);
        assert_eq!(snapshot.lookups, 2);

        let mut out = Vec::new();
        snapshot.dump(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("lookups"));
        assert!(text.contains("2"));
    }

    #[test]
    fn test_dump_nonzero_filters() {
        let stats = RegistryStats::new();
        RegistryStats::bump(&stats.removes);

        let snapshot = StatsSnapshot::from_counters(&stats);
        let mut out = Vec::new();
        snapshot.dump_nonzero(&mut out, "test").unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("test"));
        assert!(text.contains("removes"));
        assert!(!text.contains("registrations"));
    }
}
