//! The patch registry (§3: Registry).
//!
//! Mutated only from inside applier-thread jobs (§5: "the registry is
//! accessed only from the applier thread"); `funcs()`/`points()` style
//! readers take a lock-free snapshot via `dashmap` from whatever thread
//! calls them, matching the spec's "external readers use a lock-free
//! snapshot (copy-out on call)".

use dashmap::DashMap;

use hijack_patch::Guard;

/// One installed hijack's bookkeeping: the patch [`Guard`] plus the
/// dispatch-layer stub id so the substitute's JIT entry can be released
/// when the patch is lifted.
pub struct InstalledPatch {
    /// The trampoline guard installed over the target's entry.
    pub guard: Guard,
    /// The `hijack-dispatch` stub id backing the substitute closure.
    pub stub_id: u64,
}

/// Map from qualified function name to its installed patch (§3 Registry).
///
/// Invariant: at most one entry per function at a time — enforced by
/// `Hijacker::apply` checking [`Registry::contains`] before installing, not
/// by this type itself (the check-then-install pair must happen atomically
/// on the applier thread, which only `Hijacker` can guarantee).
#[derive(Default)]
pub struct Registry {
    patches: DashMap<String, InstalledPatch>,
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `name` currently has an installed patch.
    pub fn contains(&self, name: &str) -> bool {
        self.patches.contains_key(name)
    }

    /// Record a newly installed patch.
    pub fn insert(&self, name: String, patch: InstalledPatch) {
        self.patches.insert(name, patch);
    }

    /// Remove and return the patch for `name`, matched case-insensitively
    /// (§4.G `release`: "case-insensitive name match"). Returns `None` if no
    /// entry matches — release is a no-op on an absent name (§8 property 3).
    pub fn remove_case_insensitive(&self, name: &str) -> Option<InstalledPatch> {
        let key = self
            .patches
            .iter()
            .find(|entry| entry.key().eq_ignore_ascii_case(name))
            .map(|entry| entry.key().clone())?;
        self.patches.remove(&key).map(|(_, patch)| patch)
    }

    /// Currently-installed function names (§4.G `points`).
    pub fn points(&self) -> Vec<String> {
        self.patches.iter().map(|entry| entry.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_patch() -> InstalledPatch {
        InstalledPatch {
            guard: Guard {
                from: 0,
                to: 0,
                original: vec![0; 13],
                patched: vec![0; 13],
            },
            stub_id: 1,
        }
    }

    #[test]
    fn release_on_absent_name_is_a_noop() {
        let reg = Registry::new();
        assert!(reg.remove_case_insensitive("ghost").is_none());
    }

    #[test]
    fn release_matches_case_insensitively() {
        let reg = Registry::new();
        reg.insert("Foo::Bar".to_string(), dummy_patch());
        assert!(reg.remove_case_insensitive("foo::bar").is_some());
        assert!(!reg.contains("Foo::Bar"));
    }

    #[test]
    fn points_lists_currently_installed_names() {
        let reg = Registry::new();
        reg.insert("a".to_string(), dummy_patch());
        reg.insert("b".to_string(), dummy_patch());
        let mut points = reg.points();
        points.sort();
        assert_eq!(points, vec!["a".to_string(), "b".to_string()]);
    }
}
