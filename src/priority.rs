use std::cmp::Ordering;
use std::fmt;
use std::hash::Hash;

/// Priority level for task execution on a [`LocalPool`](crate::LocalPool).
///
/// Higher priority tasks are polled before lower priority tasks.
///
/// # Ordering
///
/// `Critical > High > Low`. Derives `Ord` so priorities can be compared
/// and sorted directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Priority {
    /// Fills gaps when higher-priority work is unavailable.
    Low,
    /// Regular work. Worker loops and mapping computations run here.
    #[default]
    High,
    /// Polled first, ahead of regular work.
    Critical,
}

/// A value usable as a [`PrioritySemaphore`](crate::PrioritySemaphore) priority.
///
/// Numeric priorities follow the "lower value is served first" convention.
/// Non-numeric priorities plug in their own ranking through [`rank`].
///
/// [`rank`]: SemaphorePriority::rank
pub trait SemaphorePriority: Clone + Eq + Hash + fmt::Debug {
    /// The priority used by the no-argument acquire path.
    ///
    /// It should rank at or before every priority callers actually use.
    fn top() -> Self;

    /// Compares two priorities. `Ordering::Less` means `self` is served
    /// before `other`.
    fn rank(&self, other: &Self) -> Ordering;
}

macro_rules! signed_priority {
    ($($ty:ty),*) => {$(
        impl SemaphorePriority for $ty {
            fn top() -> Self {
                -1
            }

            fn rank(&self, other: &Self) -> Ordering {
                self.cmp(other)
            }
        }
    )*};
}

macro_rules! unsigned_priority {
    ($($ty:ty),*) => {$(
        impl SemaphorePriority for $ty {
            fn top() -> Self {
                0
            }

            fn rank(&self, other: &Self) -> Ordering {
                self.cmp(other)
            }
        }
    )*};
}

signed_priority!(i8, i16, i32, i64, isize);
unsigned_priority!(u8, u16, u32, u64, usize);

impl SemaphorePriority for Priority {
    fn top() -> Self {
        Priority::Critical
    }

    /// `Critical` is served first, `Low` last.
    fn rank(&self, other: &Self) -> Ordering {
        other.cmp(self)
    }
}

/// Heap adapter: the max-heap pops the priority ranked first.
#[derive(Debug, Clone)]
pub(crate) struct Ranked<P>(pub(crate) P);

impl<P: SemaphorePriority> PartialEq for Ranked<P> {
    fn eq(&self, other: &Self) -> bool {
        self.0.rank(&other.0) == Ordering::Equal
    }
}

impl<P: SemaphorePriority> Eq for Ranked<P> {}

impl<P: SemaphorePriority> PartialOrd for Ranked<P> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<P: SemaphorePriority> Ord for Ranked<P> {
    fn cmp(&self, other: &Self) -> Ordering {
        other.0.rank(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BinaryHeap;

    #[test]
    fn priority_ordering() {
        assert!(Priority::Critical > Priority::High);
        assert!(Priority::High > Priority::Low);
        assert!(Priority::Critical > Priority::Low);
    }

    #[test]
    fn numeric_top_ranks_first() {
        assert_eq!(i64::top(), -1);
        assert_eq!(u32::top(), 0);
        assert_eq!(i64::top().rank(&0), Ordering::Less);
        assert_eq!(5i32.rank(&1), Ordering::Greater);
    }

    #[test]
    fn enum_priority_ranks_critical_first() {
        assert_eq!(Priority::top(), Priority::Critical);
        assert_eq!(Priority::Critical.rank(&Priority::Low), Ordering::Less);
        assert_eq!(Priority::Low.rank(&Priority::High), Ordering::Greater);
    }

    #[test]
    fn ranked_heap_pops_lowest_value() {
        let mut heap: BinaryHeap<_> = [5i64, 1, 3, -1].into_iter().map(Ranked).collect();
        let order: Vec<i64> = std::iter::from_fn(|| heap.pop().map(|r| r.0)).collect();
        assert_eq!(order, vec![-1, 1, 3, 5]);
    }
}
