//! FRN-to-path resolution (§3, §4.3 "Path resolver"), new relative to
//! the teacher: `moses` only ever needed a file's own name for a format
//! operation, never its full ancestry. Modeled the way the teacher
//! layers a cache in front of a slow underlying lookup (`fat32::reader`'s
//! cluster-chain cache) — here a `Frn -> (parent, name)` map in front of
//! whatever can answer "what is this record's parent and name".

use std::collections::{HashMap, HashSet};

use orc_core::{Frn, Result};

use super::mft::MftWalker;

/// Default cycle/depth guard (§3): a path chain that hasn't reached the
/// root within this many hops is treated as broken, not infinite-looped.
pub const DEFAULT_MAX_DEPTH: usize = 256;

/// Anything that can answer "what is this record's parent FRN and
/// canonical name" — implemented for [`MftWalker`] so the resolver
/// doesn't need to know how records are actually fetched.
pub trait NameLookup {
    fn lookup(&mut self, frn: Frn) -> Result<Option<(Frn, String)>>;
}

impl<'r> NameLookup for MftWalker<'r> {
    fn lookup(&mut self, frn: Frn) -> Result<Option<(Frn, String)>> {
        let record = match self.record_at(frn)? {
            Some(r) => r,
            None => return Ok(None),
        };
        Ok(record.canonical_file_name().map(|fn_info| (fn_info.parent_frn, fn_info.name)))
    }
}

/// So a caller that still needs the walker afterwards (to keep iterating
/// records, say) can lend it to a [`PathResolver`] instead of handing it
/// over permanently.
impl<'a, 'r> NameLookup for &'a mut MftWalker<'r> {
    fn lookup(&mut self, frn: Frn) -> Result<Option<(Frn, String)>> {
        (**self).lookup(frn)
    }
}

/// Caches resolved `(parent, name)` pairs and assembles full paths from
/// root outward.
pub struct PathResolver<L> {
    lookup: L,
    cache: HashMap<Frn, (Frn, String)>,
    max_depth: usize,
}

impl<L: NameLookup> PathResolver<L> {
    pub fn new(lookup: L) -> Self {
        PathResolver { lookup, cache: HashMap::new(), max_depth: DEFAULT_MAX_DEPTH }
    }

    pub fn with_max_depth(lookup: L, max_depth: usize) -> Self {
        PathResolver { lookup, cache: HashMap::new(), max_depth }
    }

    /// Resolves `frn` to a full backslash-separated path from the
    /// volume root. Cycles and unresolvable parents yield a path
    /// prefixed with `<Orphan>\` containing whatever ancestry was
    /// recovered before the break (§3).
    pub fn resolve(&mut self, frn: Frn) -> Result<String> {
        if frn.is_root() {
            return Ok("\\".to_string());
        }

        let mut components = Vec::new();
        let mut current = frn;
        let mut visited = HashSet::new();

        loop {
            if current.is_root() {
                break;
            }
            if !visited.insert(current) || visited.len() > self.max_depth {
                return Ok(orphan_path(&components));
            }

            let (parent, name) = match self.entry(current)? {
                Some(entry) => entry,
                None => return Ok(orphan_path(&components)),
            };
            components.push(name);
            current = parent;
        }

        components.reverse();
        Ok(format!("\\{}", components.join("\\")))
    }

    fn entry(&mut self, frn: Frn) -> Result<Option<(Frn, String)>> {
        if let Some(cached) = self.cache.get(&frn) {
            return Ok(Some(cached.clone()));
        }
        let resolved = self.lookup.lookup(frn)?;
        if let Some(entry) = &resolved {
            self.cache.insert(frn, entry.clone());
        }
        Ok(resolved)
    }
}

fn orphan_path(components: &[String]) -> String {
    let mut reversed: Vec<&str> = components.iter().rev().map(String::as_str).collect();
    reversed.retain(|s| !s.is_empty());
    format!("<Orphan>\\{}", reversed.join("\\"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    struct FakeLookup(Rc<RefCell<HashMap<Frn, (Frn, String)>>>);

    impl NameLookup for FakeLookup {
        fn lookup(&mut self, frn: Frn) -> Result<Option<(Frn, String)>> {
            Ok(self.0.borrow().get(&frn).cloned())
        }
    }

    fn tree() -> Rc<RefCell<HashMap<Frn, (Frn, String)>>> {
        let root = Frn::ROOT;
        let users = Frn::new(100, 1);
        let alice = Frn::new(200, 1);
        let file = Frn::new(300, 1);

        let mut map = HashMap::new();
        map.insert(users, (root, "Users".to_string()));
        map.insert(alice, (users, "Alice".to_string()));
        map.insert(file, (alice, "report.docx".to_string()));
        Rc::new(RefCell::new(map))
    }

    #[test]
    fn resolves_root_directly() {
        let mut resolver = PathResolver::new(FakeLookup(tree()));
        assert_eq!(resolver.resolve(Frn::ROOT).unwrap(), "\\");
    }

    #[test]
    fn resolves_full_ancestry() {
        let mut resolver = PathResolver::new(FakeLookup(tree()));
        let path = resolver.resolve(Frn::new(300, 1)).unwrap();
        assert_eq!(path, "\\Users\\Alice\\report.docx");
    }

    #[test]
    fn caches_resolved_entries() {
        let map = tree();
        let mut resolver = PathResolver::new(FakeLookup(map.clone()));
        resolver.resolve(Frn::new(300, 1)).unwrap();
        map.borrow_mut().remove(&Frn::new(200, 1));
        // Still resolvable: "Alice"'s entry came from cache, not a fresh lookup.
        let path = resolver.resolve(Frn::new(300, 1)).unwrap();
        assert_eq!(path, "\\Users\\Alice\\report.docx");
    }

    #[test]
    fn unknown_parent_yields_orphan_prefix() {
        let mut map = HashMap::new();
        map.insert(Frn::new(50, 1), (Frn::new(999, 1), "Ghost".to_string()));
        let mut resolver = PathResolver::new(FakeLookup(Rc::new(RefCell::new(map))));
        let path = resolver.resolve(Frn::new(50, 1)).unwrap();
        assert_eq!(path, "<Orphan>\\Ghost");
    }

    #[test]
    fn cycle_is_bounded_and_yields_orphan_prefix() {
        let mut map = HashMap::new();
        let a = Frn::new(10, 1);
        let b = Frn::new(20, 1);
        map.insert(a, (b, "A".to_string()));
        map.insert(b, (a, "B".to_string()));
        let mut resolver = PathResolver::with_max_depth(FakeLookup(Rc::new(RefCell::new(map))), 8);
        let path = resolver.resolve(a).unwrap();
        assert!(path.starts_with("<Orphan>\\"));
    }
}
