//! The known and locked lists.
//!
//! Both are doubly linked through the [`Link`] stored in each entry's
//! [`Membership`], so moving an entry between or within lists never touches
//! any other entry but its two neighbours.

use super::entry::{EntryId, Link, ListKind, Membership};
use super::pool::EntryPool;

#[derive(Debug, Default, Clone, Copy)]
pub struct ListEnds {
    /// Most recently admitted.
    pub top: Option<EntryId>,
    /// Least recently admitted.
    pub end: Option<EntryId>,
    pub len: usize,
}

#[derive(Debug, Default)]
pub struct EntryLists {
    pub known: ListEnds,
    pub locked: ListEnds,
}

impl EntryLists {
    pub fn ends(&self, kind: ListKind) -> &ListEnds {
        match kind {
            ListKind::Known => &self.known,
            ListKind::Locked => &self.locked,
        }
    }

    fn ends_mut(&mut self, kind: ListKind) -> &mut ListEnds {
        match kind {
            ListKind::Known => &mut self.known,
            ListKind::Locked => &mut self.locked,
        }
    }

    /// Links a detached entry in at the top of `kind`.
    pub fn push_top(&mut self, pool: &mut EntryPool, kind: ListKind, id: EntryId) {
        let old_top = self.ends(kind).top;
        let link = Link {
            up: None,
            next: old_top,
        };

        let entry = pool
            .get_mut(id)
            .unwrap_or_else(|| panic!("push_top received a bad cache handle"));
        if entry.membership != Membership::Detached {
            panic!("Cache entry {} is already linked into a list", entry.key);
        }
        entry.membership = match kind {
            ListKind::Known => Membership::Known(link),
            ListKind::Locked => Membership::Locked(link),
        };

        if let Some(old_top) = old_top {
            if let Some(link) = pool.get_mut(old_top).and_then(|e| e.membership.link_mut()) {
                link.up = Some(id);
            }
        }

        let ends = self.ends_mut(kind);
        ends.top = Some(id);
        if ends.end.is_none() {
            ends.end = Some(id);
        }
        ends.len += 1;
    }

    /// Unlinks an entry from whichever list holds it.
    pub fn remove(&mut self, pool: &mut EntryPool, id: EntryId) -> ListKind {
        let entry = pool
            .get_mut(id)
            .unwrap_or_else(|| panic!("list remove received a bad cache handle"));
        let (kind, link) = match entry.membership {
            Membership::Known(link) => (ListKind::Known, link),
            Membership::Locked(link) => (ListKind::Locked, link),
            Membership::Detached => {
                panic!("Cache entry {} is not in any list", entry.key)
            }
        };
        entry.membership = Membership::Detached;

        if let Some(up) = link.up {
            if let Some(l) = pool.get_mut(up).and_then(|e| e.membership.link_mut()) {
                l.next = link.next;
            }
        }
        if let Some(next) = link.next {
            if let Some(l) = pool.get_mut(next).and_then(|e| e.membership.link_mut()) {
                l.up = link.up;
            }
        }

        let ends = self.ends_mut(kind);
        if ends.top == Some(id) {
            ends.top = link.next;
        }
        if ends.end == Some(id) {
            ends.end = link.up;
        }
        ends.len -= 1;
        kind
    }

    /// Walks `kind` from the top down.
    pub fn iter<'a>(
        &self,
        pool: &'a EntryPool,
        kind: ListKind,
    ) -> impl Iterator<Item = EntryId> + 'a {
        let mut cursor = self.ends(kind).top;
        std::iter::from_fn(move || {
            let id = cursor?;
            cursor = pool
                .get(id)
                .and_then(|e| e.membership.link())
                .and_then(|l| l.next);
            Some(id)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::entry::CacheEntry;
    use crate::lexicon::Key;
    use crate::payload::{ObjectTree, Payload};

    fn setup(n: u32) -> (EntryPool, Vec<EntryId>) {
        let mut pool = EntryPool::new(8);
        let ids = (0..n)
            .map(|i| pool.insert(CacheEntry::new(Key::new(1, i), Payload::Tree(ObjectTree::new()))))
            .collect();
        (pool, ids)
    }

    #[test]
    fn test_push_and_iterate() {
        let (mut pool, ids) = setup(3);
        let mut lists = EntryLists::default();
        for &id in &ids {
            lists.push_top(&mut pool, ListKind::Known, id);
        }

        let order: Vec<_> = lists.iter(&pool, ListKind::Known).collect();
        assert_eq!(order, vec![ids[2], ids[1], ids[0]]);
        assert_eq!(lists.known.top, Some(ids[2]));
        assert_eq!(lists.known.end, Some(ids[0]));
        assert_eq!(lists.known.len, 3);
        assert_eq!(lists.locked.len, 0);
    }

    #[test]
    fn test_remove_middle_and_ends() {
        let (mut pool, ids) = setup(4);
        let mut lists = EntryLists::default();
        for &id in &ids {
            lists.push_top(&mut pool, ListKind::Known, id);
        }

        assert_eq!(lists.remove(&mut pool, ids[1]), ListKind::Known);
        assert_eq!(
            lists.iter(&pool, ListKind::Known).collect::<Vec<_>>(),
            vec![ids[3], ids[2], ids[0]]
        );

        lists.remove(&mut pool, ids[0]);
        assert_eq!(lists.known.end, Some(ids[2]));

        lists.remove(&mut pool, ids[3]);
        assert_eq!(lists.known.top, Some(ids[2]));
        assert_eq!(lists.known.len, 1);

        lists.remove(&mut pool, ids[2]);
        assert_eq!(lists.known.top, None);
        assert_eq!(lists.known.end, None);
        assert_eq!(lists.known.len, 0);
    }

    #[test]
    fn test_move_between_lists() {
        let (mut pool, ids) = setup(2);
        let mut lists = EntryLists::default();
        lists.push_top(&mut pool, ListKind::Known, ids[0]);
        lists.push_top(&mut pool, ListKind::Known, ids[1]);

        lists.remove(&mut pool, ids[0]);
        lists.push_top(&mut pool, ListKind::Locked, ids[0]);

        assert_eq!(pool.get(ids[0]).unwrap().membership.kind(), Some(ListKind::Locked));
        assert_eq!(lists.known.len, 1);
        assert_eq!(lists.locked.len, 1);
        assert_eq!(lists.iter(&pool, ListKind::Locked).collect::<Vec<_>>(), vec![ids[0]]);
    }

    #[test]
    #[should_panic(expected = "already linked")]
    fn test_double_link_is_fatal() {
        let (mut pool, ids) = setup(1);
        let mut lists = EntryLists::default();
        lists.push_top(&mut pool, ListKind::Known, ids[0]);
        lists.push_top(&mut pool, ListKind::Locked, ids[0]);
    }
}
