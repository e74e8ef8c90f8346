//! Write-barrier support data for the generational collector.
//!
//! Code that stores a reference into the heap calls [`BarrierState::record_store`]
//! after the plain store. If the store creates an old-to-young edge (the
//! value lies in `[ephemeral_low, ephemeral_high)` and the destination object
//! lies below `ephemeral_low`), the card covering the destination slot is
//! dirtied. During an ephemeral collection the collector scans dirty cards
//! instead of the whole old generation.
//!
//! Both structures are owned by the collector and replaced by it:
//! boundaries field by field with single-word stores, the card table as a
//! whole through an epoch-protected pointer swap.

use core_types::Address;
use crossbeam_epoch::{self as epoch, Atomic, Owned, Shared};
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

/// log2 of the card size.
pub const CARD_SHIFT: u32 = 11;

/// Bytes covered by one card.
pub const CARD_SIZE: usize = 1 << CARD_SHIFT;

/// Card byte value for a clean card.
pub const CARD_CLEAN: u8 = 0x00;

/// Card byte value for a dirty card. Every writer stores the same value.
pub const CARD_DIRTY: u8 = 0xFF;

/// A consistent copy of the generation boundaries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Boundaries {
    /// Lowest address of any heap object
    pub lowest_address: Address,
    /// One past the highest heap address
    pub highest_address: Address,
    /// Start of the youngest generation
    pub ephemeral_low: Address,
    /// One past the end of the youngest generation
    pub ephemeral_high: Address,
}

impl Boundaries {
    /// Returns true if `addr` is in the youngest generation (half-open).
    #[inline]
    pub fn is_ephemeral(&self, addr: Address) -> bool {
        addr >= self.ephemeral_low && addr < self.ephemeral_high
    }

    /// Returns true if `addr` is anywhere in the heap.
    #[inline]
    pub fn is_in_heap(&self, addr: Address) -> bool {
        addr >= self.lowest_address && addr < self.highest_address
    }

    /// Returns true if storing `value` into `object` creates an
    /// old-to-young reference.
    #[inline]
    pub fn crosses_generations(&self, object: Address, value: Address) -> bool {
        self.is_ephemeral(value) && object < self.ephemeral_low
    }
}

/// Process-wide generation boundaries.
///
/// Each field is a separate aligned word. A reader racing with an update may
/// see some fields old and some new, never a torn field.
#[derive(Debug, Default)]
pub struct GenerationBoundaries {
    lowest_address: AtomicUsize,
    highest_address: AtomicUsize,
    ephemeral_low: AtomicUsize,
    ephemeral_high: AtomicUsize,
}

impl GenerationBoundaries {
    /// All-zero boundaries: nothing is ephemeral.
    pub const fn new() -> Self {
        GenerationBoundaries {
            lowest_address: AtomicUsize::new(0),
            highest_address: AtomicUsize::new(0),
            ephemeral_low: AtomicUsize::new(0),
            ephemeral_high: AtomicUsize::new(0),
        }
    }

    /// Reads the current boundaries.
    pub fn snapshot(&self) -> Boundaries {
        Boundaries {
            lowest_address: Address::new(self.lowest_address.load(Ordering::Acquire)),
            highest_address: Address::new(self.highest_address.load(Ordering::Acquire)),
            ephemeral_low: Address::new(self.ephemeral_low.load(Ordering::Acquire)),
            ephemeral_high: Address::new(self.ephemeral_high.load(Ordering::Acquire)),
        }
    }

    /// Replaces the boundaries. Collector only.
    pub fn update(&self, new: Boundaries) {
        debug_assert!(new.ephemeral_low <= new.ephemeral_high);
        self.lowest_address.store(new.lowest_address.as_usize(), Ordering::Release);
        self.highest_address.store(new.highest_address.as_usize(), Ordering::Release);
        self.ephemeral_low.store(new.ephemeral_low.as_usize(), Ordering::Release);
        self.ephemeral_high.store(new.ephemeral_high.as_usize(), Ordering::Release);
    }

    /// Moves only the ephemeral range.
    pub fn set_ephemeral_range(&self, low: Address, high: Address) {
        debug_assert!(low <= high);
        self.ephemeral_low.store(low.as_usize(), Ordering::Release);
        self.ephemeral_high.store(high.as_usize(), Ordering::Release);
    }
}

/// Card table for efficient write barrier checking.
///
/// Divides a heap range into fixed-size cards, one byte each. Marking is a
/// plain store of [`CARD_DIRTY`], so concurrent markers never conflict.
#[derive(Debug)]
pub struct CardTable {
    cards: Box<[AtomicU8]>,
    card_size: usize,
    base: Address,
    heap_size: usize,
}

impl CardTable {
    /// Creates a card table covering `[base, base + heap_size)`.
    ///
    /// `card_size` must be a power of two.
    pub fn new(base: Address, heap_size: usize, card_size: usize) -> Self {
        debug_assert!(card_size.is_power_of_two());
        let num_cards = heap_size.div_ceil(card_size);
        CardTable {
            cards: (0..num_cards).map(|_| AtomicU8::new(CARD_CLEAN)).collect(),
            card_size,
            base,
            heap_size,
        }
    }

    /// Creates a card table with [`CARD_SIZE`] cards.
    pub fn with_default_card_size(base: Address, heap_size: usize) -> Self {
        Self::new(base, heap_size, CARD_SIZE)
    }

    /// Returns the card index for a given address.
    pub fn address_to_card(&self, address: Address) -> Option<usize> {
        if address < self.base || address.distance_from(self.base) >= self.heap_size {
            return None;
        }
        Some(address.distance_from(self.base) / self.card_size)
    }

    /// Marks the card containing `address` as dirty.
    ///
    /// Returns false if the address is outside the covered range. Marking an
    /// already dirty card writes nothing.
    #[inline]
    pub fn mark_dirty(&self, address: Address) -> bool {
        let Some(index) = self.address_to_card(address) else {
            return false;
        };
        let card = &self.cards[index];
        if card.load(Ordering::Relaxed) != CARD_DIRTY {
            card.store(CARD_DIRTY, Ordering::Relaxed);
        }
        true
    }

    /// Clears a single card.
    pub fn clear_card(&self, card_index: usize) {
        if let Some(card) = self.cards.get(card_index) {
            card.store(CARD_CLEAN, Ordering::Relaxed);
        }
    }

    /// Clears every card.
    pub fn clear_all(&self) {
        for card in self.cards.iter() {
            card.store(CARD_CLEAN, Ordering::Relaxed);
        }
    }

    /// Returns true if the card at the given index is dirty.
    pub fn is_dirty(&self, card_index: usize) -> bool {
        self.cards
            .get(card_index)
            .is_some_and(|card| card.load(Ordering::Relaxed) == CARD_DIRTY)
    }

    /// Returns the raw byte of a card, for comparing table states.
    pub fn card_byte(&self, card_index: usize) -> Option<u8> {
        self.cards.get(card_index).map(|card| card.load(Ordering::Relaxed))
    }

    /// Returns indices of all dirty cards.
    pub fn dirty_cards(&self) -> Vec<usize> {
        (0..self.cards.len()).filter(|&i| self.is_dirty(i)).collect()
    }

    /// Returns the address range `[start, end)` covered by a card.
    pub fn card_range(&self, card_index: usize) -> Option<(Address, Address)> {
        if card_index >= self.cards.len() {
            return None;
        }
        let start = self.base.add(card_index * self.card_size);
        let end = start
            .add(self.card_size)
            .min(self.base.add(self.heap_size));
        Some((start, end))
    }

    /// Returns the number of cards in the table.
    pub fn num_cards(&self) -> usize {
        self.cards.len()
    }

    /// Returns the number of dirty cards.
    pub fn num_dirty_cards(&self) -> usize {
        self.cards
            .iter()
            .filter(|card| card.load(Ordering::Relaxed) == CARD_DIRTY)
            .count()
    }

    /// Returns the card size.
    pub fn card_size(&self) -> usize {
        self.card_size
    }

    /// Start of the covered range.
    pub fn base(&self) -> Address {
        self.base
    }
}

/// The boundaries and card table consulted by every barriered store.
#[derive(Debug)]
pub struct BarrierState {
    boundaries: GenerationBoundaries,
    card_table: Atomic<CardTable>,
}

impl Default for BarrierState {
    fn default() -> Self {
        Self::new()
    }
}

impl BarrierState {
    /// Empty state: no ephemeral range and no card table, so no store is
    /// ever recorded.
    pub fn new() -> Self {
        BarrierState {
            boundaries: GenerationBoundaries::new(),
            card_table: Atomic::null(),
        }
    }

    /// The generation boundaries.
    pub fn boundaries(&self) -> &GenerationBoundaries {
        &self.boundaries
    }

    /// Replaces the card table. The old table is freed once no reader can
    /// still observe it.
    pub fn install_card_table(&self, table: CardTable) {
        let guard = epoch::pin();
        let old = self
            .card_table
            .swap(Owned::new(table), Ordering::AcqRel, &guard);
        if !old.is_null() {
            // SAFETY: the table is unreachable from `card_table` now, and
            // readers only hold it while pinned.
            unsafe { guard.defer_destroy(old) };
        }
    }

    /// Runs `f` against the current card table, if one is installed.
    pub fn with_card_table<R, F>(&self, f: F) -> Option<R>
    where
        F: FnOnce(&CardTable) -> R,
    {
        let guard = epoch::pin();
        let table = self.card_table.load(Ordering::Acquire, &guard);
        // SAFETY: tables are only freed through defer_destroy, and we are pinned.
        unsafe { table.as_ref() }.map(f)
    }

    /// Returns true if storing `value` into `object` must dirty a card.
    #[inline]
    pub fn needs_card_mark(&self, object: Address, value: Address) -> bool {
        self.boundaries.snapshot().crosses_generations(object, value)
    }

    /// Barrier half of a reference store: call after writing `value` into
    /// `slot`, a field of `object`.
    ///
    /// Returns true if a card was marked.
    #[inline]
    pub fn record_store(&self, object: Address, slot: Address, value: Address) -> bool {
        if !self.needs_card_mark(object, value) {
            return false;
        }
        self.with_card_table(|table| table.mark_dirty(slot))
            .unwrap_or(false)
    }

    /// Stores `value` into `slot` and runs the barrier.
    ///
    /// # Safety
    ///
    /// `slot` must be a valid, aligned reference field of `object`.
    pub unsafe fn store_ref(&self, object: Address, slot: *mut usize, value: Address) {
        slot.write(value.as_usize());
        self.record_store(object, Address::from_ptr(slot), value);
    }
}

impl Drop for BarrierState {
    fn drop(&mut self) {
        // SAFETY: &mut self means no other thread can be reading the table.
        unsafe {
            let guard = epoch::unprotected();
            let old = self.card_table.swap(Shared::null(), Ordering::Relaxed, guard);
            if !old.is_null() {
                drop(old.into_owned());
            }
        }
    }
}

static GLOBAL_BARRIERS: OnceLock<Arc<BarrierState>> = OnceLock::new();

/// The process-wide barrier state.
pub fn global() -> &'static Arc<BarrierState> {
    GLOBAL_BARRIERS.get_or_init(|| Arc::new(BarrierState::new()))
}

/// Write barrier against the process-wide barrier state.
///
/// # Safety
///
/// `slot` must be a valid, aligned reference field of `object`.
pub unsafe fn write_barrier(object: Address, slot: *mut usize, value: Address) {
    global().store_ref(object, slot, value);
}
