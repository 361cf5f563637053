//! Insertion-order enumeration.

use std::vec;

use super::{ComputeTable, TableKey, TableValue};
use crate::error::Result;
use crate::graph::NodeId;

/// Iterator over `(key, value)` pairs of a [`ComputeTable`].
///
/// The set of entries is fixed when the iterator is created and no lock is
/// held between items. Entries removed mid-iteration are skipped, entries
/// added mid-iteration are not seen. Entries whose first computation is
/// still running have no value and are skipped too.
pub struct Iter<'a, K, V> {
    table: &'a ComputeTable<K, V>,
    ids: vec::IntoIter<NodeId>,
}

impl<'a, K: TableKey, V: TableValue> Iter<'a, K, V> {
    pub(super) fn new(table: &'a ComputeTable<K, V>) -> Self {
        let ids: Vec<NodeId> = table.shared.state.read().order.iter().copied().collect();
        Self {
            table,
            ids: ids.into_iter(),
        }
    }
}

impl<K: TableKey, V: TableValue> Iterator for Iter<'_, K, V> {
    type Item = Result<(K, V)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let id = self.ids.next()?;
            match self.table.read_node(id) {
                Ok(Some(value)) => {
                    let key = {
                        let state = self.table.shared.state.read();
                        match state.arena.get_node(id) {
                            Some(node) => node.key().clone(),
                            None => continue,
                        }
                    };
                    return Some(Ok((key, value)));
                }
                Ok(None) => continue,
                Err(err) => return Some(Err(err)),
            }
        }
    }
}
