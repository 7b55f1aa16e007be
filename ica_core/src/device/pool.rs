//! Device correlation pool.
//!
//! A fixed table of slots matching asynchronous device completions back to
//! the command that started them. The device protocol does not echo the
//! correlation reference, so completions are matched by attribute
//! (instance id + candidate verb names) with a linear scan in slot order.
//! The first active match wins; replacing the scan with a keyed lookup
//! would change which of two identical in-flight commands a completion
//! resolves.
//!
//! Capacity is a hard bound: when every slot is active, allocation fails
//! with [`PoolError::Exhausted`] instead of growing.

use heapless::String as SlotName;
use ica_common::consts::{DEVICE_POOL_CAPACITY, MAX_SLOT_NAME_LEN};
use ica_common::error::PoolError;
use ica_common::reference::Reference;
use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Free,
    Active,
}

#[derive(Debug, Clone)]
struct Slot {
    state: SlotState,
    reference: Reference,
    instance_id: u32,
    name: SlotName<MAX_SLOT_NAME_LEN>,
}

impl Slot {
    const fn free() -> Self {
        Self {
            state: SlotState::Free,
            reference: Reference::from_raw(0),
            instance_id: 0,
            name: SlotName::new(),
        }
    }
}

#[derive(Debug)]
struct Table<const N: usize> {
    slots: [Slot; N],
    /// Free slot indices, descending; popped from the back.
    free: heapless::Vec<u8, N>,
}

impl<const N: usize> Table<N> {
    fn new(limit: usize) -> Self {
        let mut free = heapless::Vec::new();
        for i in (0..limit).rev() {
            // limit <= N, cannot overflow.
            let _ = free.push(i as u8);
        }
        Self {
            slots: std::array::from_fn(|_| Slot::free()),
            free,
        }
    }

    /// Keeps `free` descending so the lowest free index is popped first.
    fn release(&mut self, index: usize) {
        self.slots[index] = Slot::free();
        let at = self
            .free
            .iter()
            .position(|&f| usize::from(f) < index)
            .unwrap_or(self.free.len());
        let _ = self.free.insert(at, index as u8);
    }
}

/// Bounded correlation table, safe to share between threads.
#[derive(Debug)]
pub struct CorrelationPool<const N: usize = DEVICE_POOL_CAPACITY> {
    table: Mutex<Table<N>>,
    limit: usize,
}

/// Pool sized for the device worker.
pub type DevicePool = CorrelationPool<DEVICE_POOL_CAPACITY>;

impl<const N: usize> CorrelationPool<N> {
    const CAPACITY_FITS_U8: () = assert!(N > 0 && N <= u8::MAX as usize);

    pub fn new() -> Self {
        Self::with_limit(N)
    }

    /// Pool using only the first `limit` slots (clamped to `1..=N`).
    pub fn with_limit(limit: usize) -> Self {
        let () = Self::CAPACITY_FITS_U8;
        let limit = limit.clamp(1, N);
        Self {
            table: Mutex::new(Table::new(limit)),
            limit,
        }
    }

    #[inline]
    pub const fn capacity(&self) -> usize {
        self.limit
    }

    pub fn active_count(&self) -> usize {
        let table = self.table.lock();
        self.limit - table.free.len()
    }

    /// Claim a free slot for an in-flight device command.
    pub fn allocate(&self, reference: Reference, instance_id: u32, command_name: &str) -> Result<usize, PoolError> {
        let name = SlotName::try_from(command_name).map_err(|_| PoolError::NameTooLong {
            name: command_name.to_string(),
            max: MAX_SLOT_NAME_LEN,
        })?;

        let mut table = self.table.lock();
        let index = table.free.pop().ok_or(PoolError::Exhausted { capacity: self.limit })? as usize;
        table.slots[index] = Slot {
            state: SlotState::Active,
            reference,
            instance_id,
            name,
        };
        Ok(index)
    }

    /// Match a completion against the active slots. The first active slot,
    /// in index order, whose instance id matches and whose name is one of
    /// `candidates` is freed and its reference returned.
    pub fn resolve(&self, instance_id: u32, candidates: &[&str]) -> Option<(usize, Reference)> {
        let mut table = self.table.lock();
        let index = table.slots.iter().position(|slot| {
            slot.state == SlotState::Active
                && slot.instance_id == instance_id
                && candidates.iter().any(|c| *c == slot.name.as_str())
        })?;
        let reference = table.slots[index].reference;
        table.release(index);
        Some((index, reference))
    }

    /// Free one slot by index.
    pub fn release(&self, index: usize) -> Result<Reference, PoolError> {
        let mut table = self.table.lock();
        match table.slots.get(index) {
            Some(slot) if slot.state == SlotState::Active => {
                let reference = slot.reference;
                table.release(index);
                Ok(reference)
            }
            _ => Err(PoolError::InvalidSlot { index }),
        }
    }

    /// Free the slot holding `reference`, if any. Returns its index.
    pub fn release_reference(&self, reference: Reference) -> Option<usize> {
        let mut table = self.table.lock();
        let index = table
            .slots
            .iter()
            .position(|s| s.state == SlotState::Active && s.reference == reference)?;
        table.release(index);
        Some(index)
    }

    /// `(instance id, name)` of the slot holding `reference`.
    pub fn lookup(&self, reference: Reference) -> Option<(u32, String)> {
        let table = self.table.lock();
        table
            .slots
            .iter()
            .find(|s| s.state == SlotState::Active && s.reference == reference)
            .map(|s| (s.instance_id, s.name.as_str().to_string()))
    }

    /// Free every slot, returning what was in flight as
    /// `(reference, instance, verb)`.
    pub fn clear(&self) -> Vec<(Reference, u32, String)> {
        let mut table = self.table.lock();
        let mut in_flight = Vec::new();
        for index in 0..self.limit {
            let slot = &table.slots[index];
            if slot.state == SlotState::Active {
                in_flight.push((slot.reference, slot.instance_id, slot.name.as_str().to_string()));
                table.release(index);
            }
        }
        in_flight
    }
}

impl<const N: usize> Default for CorrelationPool<N> {
    fn default() -> Self {
        Self::new()
    }
}
