use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, VecDeque};

use crate::future::Demand;

/// Storage policy of a [`Queue`](super::Queue).
///
/// `pop` hands out an `Entry` that remembers where the item came from, so a
/// consumer that gives the item back through `unpop` restores its original
/// position.
pub trait Buffer {
    type Item;
    /// Ordering information supplied by the producer.
    type Key;
    type Entry;

    fn push(&mut self, key: Self::Key, item: Self::Item);

    fn pop(&mut self) -> Option<Self::Entry>;

    /// Puts a popped entry back where it was.
    fn unpop(&mut self, entry: Self::Entry);

    fn into_item(entry: Self::Entry) -> Self::Item;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// First in, first out.
#[derive(Debug)]
pub struct Fifo<T> {
    items: VecDeque<T>,
}

impl<T> Default for Fifo<T> {
    fn default() -> Self {
        Self {
            items: VecDeque::new(),
        }
    }
}

impl<T> Buffer for Fifo<T> {
    type Item = T;
    type Key = ();
    type Entry = T;

    fn push(&mut self, _key: (), item: T) {
        self.items.push_back(item);
    }

    fn pop(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    /// Entries must be given back newest first.
    fn unpop(&mut self, entry: T) {
        self.items.push_front(entry);
    }

    fn into_item(entry: T) -> T {
        entry
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}

/// Entry of a [`Prioritized`] buffer.
#[derive(Debug)]
pub struct Slot<P, T> {
    priority: P,
    seq: u64,
    item: T,
}

impl<P: Ord, T> PartialEq for Slot<P, T> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<P: Ord, T> Eq for Slot<P, T> {}

impl<P: Ord, T> PartialOrd for Slot<P, T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<P: Ord, T> Ord for Slot<P, T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then(self.seq.cmp(&other.seq))
    }
}

/// Lowest priority value first, insertion order among equal priorities.
#[derive(Debug)]
pub struct Prioritized<P, T> {
    heap: BinaryHeap<Reverse<Slot<P, T>>>,
    next_seq: u64,
}

impl<P: Ord, T> Default for Prioritized<P, T> {
    fn default() -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_seq: 0,
        }
    }
}

impl<P: Ord, T> Buffer for Prioritized<P, T> {
    type Item = T;
    type Key = P;
    type Entry = Slot<P, T>;

    fn push(&mut self, priority: P, item: T) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Reverse(Slot {
            priority,
            seq,
            item,
        }));
    }

    fn pop(&mut self) -> Option<Slot<P, T>> {
        self.heap.pop().map(|Reverse(slot)| slot)
    }

    fn unpop(&mut self, entry: Slot<P, T>) {
        self.heap.push(Reverse(entry));
    }

    fn into_item(entry: Slot<P, T>) -> T {
        entry.item
    }

    fn len(&self) -> usize {
        self.heap.len()
    }
}

/// Most awaited item first, insertion order among equal demand.
///
/// Demand changes while items wait, so the order is recomputed on every pop.
#[derive(Debug)]
pub struct ByDemand<T> {
    items: Vec<(u64, T)>,
    next_seq: u64,
}

impl<T> Default for ByDemand<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            next_seq: 0,
        }
    }
}

impl<T: Demand> Buffer for ByDemand<T> {
    type Item = T;
    type Key = ();
    type Entry = (u64, T);

    fn push(&mut self, _key: (), item: T) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.items.push((seq, item));
    }

    fn pop(&mut self) -> Option<(u64, T)> {
        let (index, _) = self
            .items
            .iter()
            .enumerate()
            .max_by_key(|(_, (seq, item))| (item.demand(), Reverse(*seq)))?;
        Some(self.items.swap_remove(index))
    }

    fn unpop(&mut self, entry: (u64, T)) {
        self.items.push(entry);
    }

    fn into_item(entry: (u64, T)) -> T {
        entry.1
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    fn drain<B: Buffer>(buffer: &mut B) -> Vec<B::Item> {
        std::iter::from_fn(|| buffer.pop().map(B::into_item)).collect()
    }

    #[test]
    fn fifo_order_and_unpop() {
        let mut buffer = Fifo::default();
        for i in 0..4 {
            buffer.push((), i);
        }
        let a = buffer.pop().unwrap();
        let b = buffer.pop().unwrap();
        buffer.unpop(b);
        buffer.unpop(a);
        assert_eq!(drain(&mut buffer), vec![0, 1, 2, 3]);
    }

    #[test]
    fn prioritized_lowest_first_then_fifo() {
        let mut buffer = Prioritized::default();
        buffer.push(2, "c");
        buffer.push(1, "a");
        buffer.push(2, "d");
        buffer.push(1, "b");
        let first = buffer.pop().unwrap();
        buffer.unpop(first);
        assert_eq!(drain(&mut buffer), vec!["a", "b", "c", "d"]);
    }

    #[derive(Clone)]
    struct Fake(&'static str, Rc<Cell<usize>>);

    impl Demand for Fake {
        fn demand(&self) -> usize {
            self.1.get()
        }
    }

    #[test]
    fn by_demand_reorders_on_pop() {
        let a = Rc::new(Cell::new(0));
        let b = Rc::new(Cell::new(0));
        let c = Rc::new(Cell::new(0));
        let mut buffer = ByDemand::default();
        buffer.push((), Fake("a", a.clone()));
        buffer.push((), Fake("b", b.clone()));
        buffer.push((), Fake("c", c.clone()));

        // Equal demand keeps insertion order.
        assert_eq!(buffer.pop().map(|(_, f)| f.0), Some("a"));

        c.set(3);
        b.set(1);
        let names: Vec<_> = drain(&mut buffer).into_iter().map(|f| f.0).collect();
        assert_eq!(names, vec!["c", "b"]);
    }
}
