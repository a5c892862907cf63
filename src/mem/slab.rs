//! Fixed-slot, page-banked free-list pool with reference-counted teardown.
//!
//! Grows bank-of-`Entry<T>` at a time, threading the free list through
//! unused slots. Each slot is a `{Free(next), Occupied(T)}` tagged variant
//! stored in a plain `Vec`, and "next free slot" is an `Option<usize>`
//! index — bank-at-a-time growth, LIFO-over-free-order reuse, and
//! refcounted/deferred teardown with a per-live-slot callback, with no
//! `unsafe`.

use crate::error::{Error, Result};

/// Slots per bank, used for the event-control-block slab.
const BANK_SLOTS: usize = 32;

enum Entry<T> {
    /// Free slot; `next` threads the free list (LIFO over free order).
    Free { next: Option<usize> },
    Occupied(T),
}

/// A fixed-size-slot allocator over banks of slots.
///
/// `T` is the slot body; per-slot byte accounting is subsumed by Rust's own
/// layout of `Entry<T>`.
pub struct Slab<T> {
    banks: Vec<Vec<Entry<T>>>,
    bank_slots: usize,
    free_head: Option<usize>,
    /// 1 (creator's hold) plus one per currently-occupied slot.
    refcount: usize,
}

impl<T> Slab<T> {
    /// `init`: starts with zero banks (the first `alloc` grows one), a
    /// refcount of 1 (the creator holds it).
    pub fn new() -> Slab<T> {
        Slab::with_bank_slots(BANK_SLOTS)
    }

    /// As [`Slab::new`], but with an explicit bank size — exposed so tests
    /// can cover a range of bank sizes without allocating huge banks.
    pub fn with_bank_slots(bank_slots: usize) -> Slab<T> {
        assert!(bank_slots > 0, "bank_slots must be nonzero");
        Slab {
            banks: Vec::new(),
            bank_slots,
            free_head: None,
            refcount: 1,
        }
    }

    /// Current reference count (1 + occupied-slot count while the creator
    /// still holds its reference).
    pub fn refcount(&self) -> usize {
        self.refcount
    }

    /// Number of currently occupied slots.
    pub fn occupied(&self) -> usize {
        self.refcount.saturating_sub(1)
    }

    fn grow_bank(&mut self) {
        let bank_index = self.banks.len();
        let base = bank_index * self.bank_slots;
        let mut bank = Vec::with_capacity(self.bank_slots);
        for local in 0..self.bank_slots {
            let global = base + local;
            let next = if local + 1 < self.bank_slots {
                Some(global + 1)
            } else {
                self.free_head
            };
            bank.push(Entry::Free { next });
        }
        self.banks.push(bank);
        self.free_head = Some(base);
    }

    fn slot_mut(&mut self, idx: usize) -> &mut Entry<T> {
        let bank = idx / self.bank_slots;
        let local = idx % self.bank_slots;
        &mut self.banks[bank][local]
    }

    fn slot(&self, idx: usize) -> &Entry<T> {
        let bank = idx / self.bank_slots;
        let local = idx % self.bank_slots;
        &self.banks[bank][local]
    }

    /// `alloc`: grows a bank if the free list is empty, pops the head,
    /// tags it occupied, increments refcount, returns its index.
    pub fn alloc(&mut self, value: T) -> usize {
        if self.free_head.is_none() {
            self.grow_bank();
        }
        let idx = self.free_head.expect("just grew a bank");
        let next = match self.slot(idx) {
            Entry::Free { next } => *next,
            Entry::Occupied(_) => unreachable!("free list pointed at an occupied slot"),
        };
        self.free_head = next;
        *self.slot_mut(idx) = Entry::Occupied(value);
        self.refcount += 1;
        idx
    }

    /// `free(idx)`: recovers the slot, asserts it was occupied, pushes it
    /// back onto the free list, decrements refcount. When refcount drops to
    /// zero (this was the final reference — creator already released via
    /// [`Slab::term`]) every bank is dropped.
    ///
    /// Returns the freed value.
    pub fn free(&mut self, idx: usize) -> T {
        let old_head = self.free_head;
        let value = match std::mem::replace(self.slot_mut(idx), Entry::Free { next: old_head }) {
            Entry::Occupied(v) => v,
            Entry::Free { .. } => panic!("double free of slab slot {idx}"),
        };
        self.free_head = Some(idx);
        self.refcount -= 1;
        if self.refcount == 0 {
            self.banks.clear();
            self.free_head = None;
        }
        value
    }

    /// Borrow an occupied slot.
    pub fn get(&self, idx: usize) -> Option<&T> {
        match self.slot(idx) {
            Entry::Occupied(v) => Some(v),
            Entry::Free { .. } => None,
        }
    }

    /// Mutably borrow an occupied slot.
    pub fn get_mut(&mut self, idx: usize) -> Option<&mut T> {
        match self.slot_mut(idx) {
            Entry::Occupied(v) => Some(v),
            Entry::Free { .. } => None,
        }
    }

    /// `term(callback)`: releases the creator's hold.
    ///
    /// If `callback` is provided, every slot still occupied is visited
    /// first — the callback is invoked with each live slot's body and the
    /// slot is force-released — so that a single `term` call always fully
    /// tears the slab down. This is the hook by which [`crate::event_loop`]
    /// cancels every in-flight event during Loop teardown. With no
    /// callback, outstanding occupied slots simply keep the slab alive
    /// until they are freed individually.
    pub fn term<F: FnMut(T)>(&mut self, mut callback: Option<F>) {
        if let Some(cb) = callback.as_mut() {
            let ids: Vec<usize> = self.occupied_indices();
            for idx in ids {
                let value = self.force_take(idx);
                cb(value);
            }
        }
        if self.refcount > 0 {
            self.refcount -= 1;
        }
        if self.refcount == 0 {
            self.banks.clear();
            self.free_head = None;
        }
    }

    fn occupied_indices(&self) -> Vec<usize> {
        let mut out = Vec::new();
        for (bank_idx, bank) in self.banks.iter().enumerate() {
            for (local, entry) in bank.iter().enumerate() {
                if matches!(entry, Entry::Occupied(_)) {
                    out.push(bank_idx * self.bank_slots + local);
                }
            }
        }
        out
    }

    /// Forcibly releases an occupied slot during `term`, without touching
    /// the free list (the whole slab is about to be dropped) and without
    /// decrementing refcount per-slot (the bulk decrement in `term`
    /// accounts for all of them at once via the final `refcount = 0`).
    fn force_take(&mut self, idx: usize) -> T {
        match std::mem::replace(self.slot_mut(idx), Entry::Free { next: None }) {
            Entry::Occupied(v) => {
                self.refcount -= 1;
                v
            }
            Entry::Free { .. } => unreachable!("occupied_indices returned a free slot"),
        }
    }
}

impl<T> Default for Slab<T> {
    fn default() -> Self {
        Slab::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_free_preserve_refcount_monotonicity() {
        for bank_slots in [1usize, 2, 4, 32] {
            for n in [1usize, 3, bank_slots, bank_slots * 2 + 1] {
                let mut slab: Slab<u32> = Slab::with_bank_slots(bank_slots);
                assert_eq!(slab.refcount(), 1);
                let mut ids = Vec::new();
                for i in 0..n {
                    ids.push(slab.alloc(i as u32));
                }
                assert_eq!(slab.refcount(), 1 + n);
                for (i, id) in ids.into_iter().enumerate() {
                    assert_eq!(slab.free(id), i as u32);
                }
                assert_eq!(slab.refcount(), 1);
            }
        }
    }

    #[test]
    fn term_frees_all_banks_when_empty() {
        let mut slab: Slab<u32> = Slab::new();
        let id = slab.alloc(1);
        slab.free(id);
        slab.term::<fn(u32)>(None);
        assert_eq!(slab.refcount(), 0);
        assert_eq!(slab.banks.len(), 0);
    }

    #[test]
    fn term_with_live_slot_invokes_callback_once_then_frees() {
        let mut slab: Slab<&'static str> = Slab::new();
        let id = slab.alloc("alive");
        let mut seen = Vec::new();
        slab.term(Some(|v: &'static str| seen.push(v)));
        assert_eq!(seen, vec!["alive"]);
        assert_eq!(slab.refcount(), 0);
        assert_eq!(slab.banks.len(), 0);
        let _ = id;
    }

    #[test]
    #[should_panic(expected = "double free")]
    fn double_free_panics() {
        let mut slab: Slab<u32> = Slab::new();
        let id = slab.alloc(7);
        slab.free(id);
        slab.free(id);
    }

    #[test]
    fn free_list_is_lifo_over_free_order() {
        let mut slab: Slab<u32> = Slab::with_bank_slots(4);
        let a = slab.alloc(1);
        let b = slab.alloc(2);
        slab.free(a);
        slab.free(b);
        // Most recently freed (`b`) is handed out first.
        let reused = slab.alloc(99);
        assert_eq!(reused, b);
    }
}
