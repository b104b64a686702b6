/*!
 * Reserve Table
 * Fixed-capacity array of reserve records; owns every reserve
 */

use super::record::Reserve;
use crate::core::errors::SchedulerError;
use crate::core::limits::MAX_RESERVES;
use crate::core::types::{Owner, Rid, SchedResult};
use crate::timers::TimerKind;
use std::ops::{Index, IndexMut};

/// Fixed-capacity reserve table
#[derive(Debug, Clone)]
pub struct ReserveTable {
    slots: Vec<Reserve>,
}

impl ReserveTable {
    pub fn new() -> Self {
        Self::with_capacity(MAX_RESERVES)
    }

    /// Capacity is fixed for the table's lifetime
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(Reserve::vacant).collect(),
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Claim the first free slot (linear scan)
    pub fn allocate(&mut self) -> Option<Rid> {
        let rid = self.slots.iter().position(|r| !r.is_active())?;
        let mut fresh = Reserve::vacant(rid);
        // Timer generations survive reuse so firings from the previous
        // occupant never match the new one
        std::mem::swap(&mut fresh.timers, &mut self.slots[rid].timers);
        for kind in TimerKind::ALL {
            fresh.timers.get_mut(kind).disarm();
        }
        fresh.owner = Owner::Unattached;
        fresh.incarnation = self.slots[rid].incarnation.wrapping_add(1);
        self.slots[rid] = fresh;
        Some(rid)
    }

    /// Return a slot to the free pool, closing its release gate
    pub fn free(&mut self, rid: Rid) {
        if let Some(slot) = self.slots.get_mut(rid) {
            slot.release.close();
            slot.owner = Owner::Free;
            slot.attached = false;
        }
    }

    /// Range check
    #[inline]
    pub fn valid(&self, rid: Rid) -> SchedResult<()> {
        if rid < self.slots.len() {
            Ok(())
        } else {
            Err(SchedulerError::InvalidReserve(rid))
        }
    }

    /// Range check plus "slot in use"
    pub fn active(&self, rid: Rid) -> SchedResult<&Reserve> {
        self.valid(rid)?;
        let reserve = &self.slots[rid];
        if reserve.is_active() {
            Ok(reserve)
        } else {
            Err(SchedulerError::InactiveReserve(rid))
        }
    }

    pub fn get(&self, rid: Rid) -> Option<&Reserve> {
        self.slots.get(rid)
    }

    pub fn get_mut(&mut self, rid: Rid) -> Option<&mut Reserve> {
        self.slots.get_mut(rid)
    }

    /// Reserves in use, in slot order
    pub fn iter_active(&self) -> impl Iterator<Item = &Reserve> {
        self.slots.iter().filter(|r| r.is_active())
    }

    pub fn active_count(&self) -> usize {
        self.iter_active().count()
    }
}

impl Default for ReserveTable {
    fn default() -> Self {
        Self::new()
    }
}

impl Index<Rid> for ReserveTable {
    type Output = Reserve;

    #[inline]
    fn index(&self, rid: Rid) -> &Reserve {
        &self.slots[rid]
    }
}

impl IndexMut<Rid> for ReserveTable {
    #[inline]
    fn index_mut(&mut self, rid: Rid) -> &mut Reserve {
        &mut self.slots[rid]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_allocate_reuses_lowest_free_slot() {
        let mut table = ReserveTable::with_capacity(3);
        assert_eq!(table.allocate(), Some(0));
        assert_eq!(table.allocate(), Some(1));
        table.free(0);
        assert_eq!(table.allocate(), Some(0));
        assert_eq!(table.allocate(), Some(2));
        assert_eq!(table.allocate(), None);
        assert_eq!(table.active_count(), 3);
    }

    #[test]
    fn test_reuse_keeps_timer_generations() {
        let mut table = ReserveTable::with_capacity(1);
        let rid = table.allocate().unwrap();
        let stale = table[rid].timers.period.arm_at(100);
        table.free(rid);

        let rid = table.allocate().unwrap();
        let fresh = table[rid].timers.period.arm_at(100);
        assert_ne!(stale, fresh);
        assert!(!table[rid].timers.period.matches(&stale));
    }

    #[test]
    fn test_reuse_bumps_incarnation() {
        let mut table = ReserveTable::with_capacity(1);
        let rid = table.allocate().unwrap();
        let first = table[rid].incarnation;
        table.free(rid);

        assert_eq!(table.allocate(), Some(rid));
        assert_eq!(table[rid].incarnation, first + 1);
    }

    #[test]
    fn test_validation() {
        let mut table = ReserveTable::with_capacity(2);
        assert_eq!(table.valid(5), Err(SchedulerError::InvalidReserve(5)));
        assert!(matches!(
            table.active(1),
            Err(SchedulerError::InactiveReserve(1))
        ));
        let rid = table.allocate().unwrap();
        assert!(table.active(rid).is_ok());
    }

    #[test]
    fn test_free_closes_gate() {
        let mut table = ReserveTable::with_capacity(1);
        let rid = table.allocate().unwrap();
        let gate = table[rid].release.clone();
        table.free(rid);
        assert!(gate.is_closed());
        assert!(!table[rid].is_active());
    }
}
