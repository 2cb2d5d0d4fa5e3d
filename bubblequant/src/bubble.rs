//! Online partition refinement of equivalence-class sets ("bubbles").
//!
//! A [`PartitionCompactor`] consumes observation sets drawn from a universe of
//! integer elements and maintains the coarsest partition of the elements seen
//! so far such that every observed set is a union of partition groups. Two
//! elements share a bubble if and only if they have been members of exactly
//! the same observed sets.
//!
//! The compactor is a single-writer structure. It is `Sync`, so the
//! read-only operations ([`PartitionCompactor::rewrite`] and friends) may run
//! concurrently, but [`PartitionCompactor::refine`] needs `&mut self` and
//! must not be shared across threads without an external lock.

use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

use derive_more::Deref;
use itertools::Itertools;
use log::{debug, log_enabled, trace, Level};
use rayon::prelude::{
    IndexedParallelIterator, IntoParallelRefIterator, IntoParallelRefMutIterator, ParallelIterator,
};
use serde::{Deserialize, Serialize};

/// Element of the universe being partitioned.
pub type Element = u32;

/// Stable handle of a bubble.
///
/// Handles of bubbles that become empty during a refinement are reclaimed and
/// handed out again, so a handle identifies a bubble only until the next call
/// to [`PartitionCompactor::refine`].
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deref, Serialize, Deserialize)]
#[repr(transparent)]
pub struct BubbleId(u32);

impl BubbleId {
    #[inline]
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    #[inline]
    #[must_use]
    pub const fn get(&self) -> u32 {
        self.0
    }

    #[inline]
    fn index(&self) -> usize {
        self.0 as usize
    }
}

impl Display for BubbleId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Error occurring when translating between elements and bubbles.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum CompactError {
    /// The element has never been presented to
    /// [`PartitionCompactor::refine`].
    UnknownElement(Element),
    /// The bubble handle does not point to a live bubble.
    UnknownBubble(BubbleId),
}

impl Display for CompactError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            CompactError::UnknownElement(element) => {
                write!(f, "Element {} does not belong to any bubble", element)
            }
            CompactError::UnknownBubble(bubble) => write!(f, "Unknown bubble {}", bubble),
        }
    }
}

impl Error for CompactError {}

pub type CompactResult<T> = Result<T, CompactError>;

#[derive(Debug, Clone, Default)]
struct Bubble {
    members: Vec<Element>,
}

impl Bubble {
    #[inline]
    fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Slot {
    Unseen,
    Placed { bubble: BubbleId, position: u32 },
    // Removed from its bubble, waiting to be placed at the end of `refine()`
    Staged,
}

/// Incremental "bubble" compaction of a stream of observation sets.
///
/// # Examples
/// ```
/// use bubblequant::bubble::PartitionCompactor;
///
/// let mut compactor = PartitionCompactor::new();
/// compactor.refine(&[0, 1, 2, 3]);
/// compactor.refine(&[2, 3]);
///
/// assert_eq!(compactor.num_bubbles(), 2);
/// assert_eq!(compactor.bubble_of(2), compactor.bubble_of(3));
/// assert_ne!(compactor.bubble_of(0), compactor.bubble_of(2));
///
/// let compact = compactor.rewrite(&[0, 1, 2, 3]).unwrap();
/// assert_eq!(compact.len(), 2);
/// ```
#[derive(Debug, Clone, Default)]
pub struct PartitionCompactor {
    bubbles: Vec<Bubble>,
    slots: Vec<Slot>,
    free: Vec<BubbleId>,
    num_elements: usize,
    num_sets: usize,
}

impl PartitionCompactor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a compactor with the inverse map preallocated for elements
    /// `0..universe_size`.
    #[must_use]
    pub fn with_universe_size(universe_size: usize) -> Self {
        Self {
            slots: vec![Slot::Unseen; universe_size],
            ..Self::default()
        }
    }

    /// Refines the partition with one observation set.
    ///
    /// Elements of the set are detached from their current bubbles and
    /// regrouped by the bubble they came from; previously unseen elements form
    /// one group together. Each group then becomes a bubble of its own,
    /// reusing the handle of an emptied bubble when one is available.
    /// Duplicate elements are treated as a single occurrence.
    pub fn refine(&mut self, set: &[Element]) {
        self.num_sets += 1;
        if set.is_empty() {
            return;
        }

        // `None` is the group of elements not seen before
        let mut group_index: HashMap<Option<BubbleId>, usize> = HashMap::new();
        let mut groups: Vec<(Option<BubbleId>, Vec<Element>)> = Vec::new();

        for &element in set {
            self.ensure_capacity(element);

            let key = match self.slots[element as usize] {
                Slot::Staged => continue,
                Slot::Unseen => {
                    self.num_elements += 1;
                    None
                }
                Slot::Placed { bubble, position } => {
                    self.detach(bubble, position);
                    if self.bubbles[bubble.index()].is_empty() {
                        self.free.push(bubble);
                    }
                    Some(bubble)
                }
            };
            self.slots[element as usize] = Slot::Staged;

            let index = *group_index.entry(key).or_insert_with(|| {
                groups.push((key, Vec::new()));
                groups.len() - 1
            });
            groups[index].1.push(element);
        }

        for (key, members) in groups {
            let bubble = self.allocate(key);
            self.place(bubble, members);
        }

        self.free
            .retain(|bubble| self.bubbles[bubble.index()].is_empty());
        assert!(
            self.free.is_empty(),
            "Empty bubble left behind after refinement"
        );

        self.trace_bubbles();
    }

    /// Refines the partition with every set of `sets`, in order.
    pub fn refine_all<S: AsRef<[Element]>>(&mut self, sets: &[S]) {
        for set in sets {
            self.refine(set.as_ref());
        }

        debug!(
            "Refined {} sets: {} elements in {} bubbles",
            sets.len(),
            self.num_elements,
            self.num_bubbles()
        );
    }

    /// Rewrites an observation set in terms of bubble handles.
    ///
    /// The returned set is sorted and free of duplicates.
    pub fn rewrite(&self, set: &[Element]) -> CompactResult<Vec<BubbleId>> {
        let mut compact = set
            .iter()
            .map(|&element| {
                self.bubble_of(element)
                    .ok_or(CompactError::UnknownElement(element))
            })
            .collect::<CompactResult<Vec<BubbleId>>>()?;

        compact.sort_unstable();
        compact.dedup();
        Ok(compact)
    }

    /// Rewrites all `sets` in parallel.
    pub fn rewrite_all<S>(&self, sets: &[S]) -> CompactResult<Vec<Vec<BubbleId>>>
    where
        S: AsRef<[Element]> + Sync,
    {
        sets.par_iter()
            .map(|set| self.rewrite(set.as_ref()))
            .collect()
    }

    /// Replaces the contents of every set with its compact form, expressed as
    /// raw bubble handles.
    ///
    /// Either every set is rewritten, or (on error) none of them is modified.
    pub fn compact_in_place(&self, sets: &mut [Vec<Element>]) -> CompactResult<()> {
        let compact = self.rewrite_all(&*sets)?;

        sets.par_iter_mut()
            .zip(compact)
            .for_each(|(set, compact)| {
                *set = compact.into_iter().map(|bubble| bubble.get()).collect();
            });

        Ok(())
    }

    /// Recovers the original elements of a compact set.
    ///
    /// The result is sorted.
    pub fn expand(&self, compact: &[BubbleId]) -> CompactResult<Vec<Element>> {
        let mut elements = Vec::new();
        for &bubble in compact {
            let members = self
                .bubble(bubble)
                .ok_or(CompactError::UnknownBubble(bubble))?;
            elements.extend_from_slice(members);
        }

        elements.sort_unstable();
        elements.dedup();
        Ok(elements)
    }

    /// Returns the bubble the element currently belongs to.
    #[must_use]
    pub fn bubble_of(&self, element: Element) -> Option<BubbleId> {
        match self.slots.get(element as usize) {
            Some(Slot::Placed { bubble, .. }) => Some(*bubble),
            _ => None,
        }
    }

    /// Returns the members of a live bubble, in no particular order.
    #[must_use]
    pub fn bubble(&self, bubble: BubbleId) -> Option<&[Element]> {
        self.bubbles
            .get(bubble.index())
            .filter(|bubble| !bubble.is_empty())
            .map(|bubble| bubble.members.as_slice())
    }

    /// Iterates over all live bubbles.
    pub fn bubbles(&self) -> impl Iterator<Item = (BubbleId, &[Element])> + '_ {
        self.bubbles
            .iter()
            .enumerate()
            .filter(|(_, bubble)| !bubble.is_empty())
            .map(|(index, bubble)| (BubbleId(index as u32), bubble.members.as_slice()))
    }

    #[must_use]
    pub fn num_bubbles(&self) -> usize {
        self.bubbles.iter().filter(|bubble| !bubble.is_empty()).count()
    }

    /// Number of distinct elements seen so far.
    #[must_use]
    pub fn num_elements(&self) -> usize {
        self.num_elements
    }

    /// Number of observation sets processed so far, including empty ones.
    #[must_use]
    pub fn num_sets(&self) -> usize {
        self.num_sets
    }

    fn ensure_capacity(&mut self, element: Element) {
        let index = element as usize;
        if index >= self.slots.len() {
            self.slots.resize(index + 1, Slot::Unseen);
        }
    }

    fn detach(&mut self, bubble: BubbleId, position: u32) {
        let members = &mut self.bubbles[bubble.index()].members;
        members.swap_remove(position as usize);

        if let Some(&moved) = members.get(position as usize) {
            self.slots[moved as usize] = Slot::Placed { bubble, position };
        }
    }

    fn allocate(&mut self, key: Option<BubbleId>) -> BubbleId {
        // A group that used to be a whole bubble keeps its handle
        if let Some(bubble) = key {
            if self.bubbles[bubble.index()].is_empty() {
                return bubble;
            }
        }

        // Entries that have been refilled in the meantime are stale
        while let Some(bubble) = self.free.pop() {
            if self.bubbles[bubble.index()].is_empty() {
                return bubble;
            }
        }

        let bubble = BubbleId(self.bubbles.len() as u32);
        self.bubbles.push(Bubble::default());
        bubble
    }

    fn place(&mut self, bubble: BubbleId, members: Vec<Element>) {
        debug_assert!(self.bubbles[bubble.index()].is_empty());

        for (position, &element) in members.iter().enumerate() {
            self.slots[element as usize] = Slot::Placed {
                bubble,
                position: position as u32,
            };
        }
        self.bubbles[bubble.index()].members = members;
    }

    fn trace_bubbles(&self) {
        if !log_enabled!(Level::Trace) {
            return;
        }

        trace!("Iteration: {}", self.num_sets - 1);
        for (bubble, members) in self.bubbles() {
            trace!(
                "Bubble {}: {}",
                bubble,
                members.iter().sorted().join(" ")
            );
        }
    }
}

/// Total number of elements across all sets.
#[must_use]
pub fn total_cardinality<T, S: AsRef<[T]>>(sets: &[S]) -> usize {
    sets.iter().map(|set| set.as_ref().len()).sum()
}
