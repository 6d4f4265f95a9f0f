//! Open-addressed, chained integer-keyed map, ported from the profiler's
//! `imap_context` (`_imap_query`/`_imap_set`/`_imap_rehash`). Used wherever
//! the engine keys data off a VM pointer value: prototype to call-tree
//! child, prototype to symbol, coroutine to call state, allocation address
//! to owning node.
//!
//! Collisions chain off the slot's primary bucket using Brent's variation:
//! on insert, if the bucket that owns the hash is occupied by a guest that
//! hashed somewhere else, the guest is evicted into a free slot and the new
//! key takes the primary bucket; if the occupant legitimately owns the
//! bucket, the new key is the one that goes into a free slot instead. This
//! keeps the average chain length close to what a single primary slot would
//! give you, rather than degrading towards a linked list under either
//! insertion order.

const DEFAULT_CAPACITY: usize = 1024;

#[derive(Clone, Copy, PartialEq, Eq)]
enum SlotStatus {
    Empty,
    Occupied,
    Tombstone,
}

struct Slot<V> {
    key: u64,
    value: Option<V>,
    status: SlotStatus,
    next: Option<usize>,
}

impl<V> Default for Slot<V> {
    fn default() -> Self {
        Slot {
            key: 0,
            value: None,
            status: SlotStatus::Empty,
            next: None,
        }
    }
}

pub struct IntMap<V> {
    slots: Vec<Slot<V>>,
    capacity: usize,
    count: usize,
    lastfree: usize,
}

impl<V> IntMap<V> {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.next_power_of_two().max(1);
        IntMap {
            slots: (0..capacity).map(|_| Slot::default()).collect(),
            capacity,
            count: 0,
            lastfree: capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    fn primary(&self, key: u64) -> usize {
        (key % self.capacity as u64) as usize
    }

    pub fn query(&self, key: u64) -> Option<&V> {
        let mut cursor = Some(self.primary(key));
        while let Some(i) = cursor {
            let slot = &self.slots[i];
            if slot.status == SlotStatus::Occupied && slot.key == key {
                return slot.value.as_ref();
            }
            cursor = slot.next;
        }
        None
    }

    pub fn query_mut(&mut self, key: u64) -> Option<&mut V> {
        let mut cursor = Some(self.primary(key));
        while let Some(i) = cursor {
            if self.slots[i].status == SlotStatus::Occupied && self.slots[i].key == key {
                return self.slots[i].value.as_mut();
            }
            cursor = self.slots[i].next;
        }
        None
    }

    pub fn contains_key(&self, key: u64) -> bool {
        self.query(key).is_some()
    }

    fn get_free(&mut self) -> Option<usize> {
        while self.lastfree > 0 {
            self.lastfree -= 1;
            if self.slots[self.lastfree].status == SlotStatus::Empty {
                return Some(self.lastfree);
            }
        }
        None
    }

    pub fn set(&mut self, key: u64, value: V) {
        let hash = self.primary(key);
        if self.slots[hash].status == SlotStatus::Occupied {
            let mut cursor = Some(hash);
            while let Some(i) = cursor {
                if self.slots[i].status == SlotStatus::Occupied && self.slots[i].key == key {
                    self.slots[i].value = Some(value);
                    return;
                }
                cursor = self.slots[i].next;
            }

            let free = match self.get_free() {
                Some(f) => f,
                None => {
                    self.rehash();
                    return self.set(key, value);
                }
            };

            let occupant_key = self.slots[hash].key;
            let occupant_home = self.primary(occupant_key);

            self.slots[free].next = self.slots[hash].next;
            self.slots[hash].next = Some(free);

            let target = if occupant_home == hash {
                free
            } else {
                let occupant_value = self.slots[hash].value.take();
                self.slots[free].key = occupant_key;
                self.slots[free].value = occupant_value;
                self.slots[free].status = SlotStatus::Occupied;
                hash
            };

            self.count += 1;
            self.slots[target].status = SlotStatus::Occupied;
            self.slots[target].key = key;
            self.slots[target].value = Some(value);
            return;
        }

        self.count += 1;
        self.slots[hash].status = SlotStatus::Occupied;
        self.slots[hash].key = key;
        self.slots[hash].value = Some(value);
    }

    pub fn remove(&mut self, key: u64) -> Option<V> {
        let mut cursor = Some(self.primary(key));
        while let Some(i) = cursor {
            if self.slots[i].status == SlotStatus::Occupied && self.slots[i].key == key {
                self.slots[i].status = SlotStatus::Tombstone;
                self.count -= 1;
                return self.slots[i].value.take();
            }
            cursor = self.slots[i].next;
        }
        None
    }

    pub fn dump(&self, mut visit: impl FnMut(u64, &V)) {
        for slot in &self.slots {
            if slot.status == SlotStatus::Occupied {
                if let Some(value) = slot.value.as_ref() {
                    visit(slot.key, value);
                }
            }
        }
    }

    fn rehash(&mut self) {
        let mut new_capacity = DEFAULT_CAPACITY;
        while new_capacity <= self.count {
            new_capacity *= 2;
        }

        let old_slots = std::mem::replace(
            &mut self.slots,
            (0..new_capacity).map(|_| Slot::default()).collect(),
        );
        self.capacity = new_capacity;
        self.lastfree = new_capacity;
        self.count = 0;

        for mut slot in old_slots {
            if slot.status == SlotStatus::Occupied {
                if let Some(value) = slot.value.take() {
                    self.set(slot.key, value);
                }
            }
        }
    }
}

impl<V> Default for IntMap<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_query_roundtrip() {
        let mut map = IntMap::with_capacity(4);
        map.set(1, "a");
        map.set(5, "b");
        map.set(9, "c");
        assert_eq!(map.query(1), Some(&"a"));
        assert_eq!(map.query(5), Some(&"b"));
        assert_eq!(map.query(9), Some(&"c"));
        assert_eq!(map.query(2), None);
        assert_eq!(map.len(), 3);
    }

    #[test]
    fn update_in_place_does_not_grow_count() {
        let mut map = IntMap::with_capacity(4);
        map.set(1, 10);
        map.set(1, 20);
        assert_eq!(map.len(), 1);
        assert_eq!(map.query(1), Some(&20));
    }

    #[test]
    fn remove_then_requery_chain_survives() {
        let mut map = IntMap::with_capacity(4);
        map.set(1, "a");
        map.set(5, "b");
        map.set(9, "c");
        assert_eq!(map.remove(5), Some("b"));
        assert_eq!(map.query(5), None);
        assert_eq!(map.query(1), Some(&"a"));
        assert_eq!(map.query(9), Some(&"c"));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn grows_past_initial_capacity_via_rehash() {
        let mut map = IntMap::with_capacity(4);
        for i in 0..500u64 {
            map.set(i, i * 2);
        }
        assert_eq!(map.len(), 500);
        for i in 0..500u64 {
            assert_eq!(map.query(i), Some(&(i * 2)));
        }
    }

    #[test]
    fn dump_visits_every_occupied_slot() {
        let mut map = IntMap::with_capacity(4);
        map.set(1, 1);
        map.set(5, 5);
        map.remove(5);
        map.set(9, 9);
        let mut seen = Vec::new();
        map.dump(|k, v| seen.push((k, *v)));
        seen.sort();
        assert_eq!(seen, vec![(1, 1), (9, 9)]);
    }
}
