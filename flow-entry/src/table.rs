// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Flow table: an arena of flow entries with forward/reverse pairing.
//!
//! Flows are referred to by [`FlowIndex`], a slot number plus the generation of
//! the slot. A freed slot bumps its generation so that handles held by pending
//! work on a deleted flow are detected as stale instead of aliasing a new flow.
//! Pair links are only ever written by [`FlowTable::insert_pair`] and cleared by
//! [`FlowTable::delete_pair`], which keeps them symmetric.

use crate::errors::FlowError;
use crate::flags::FlowFlags;
use crate::flow_entry::FlowEntry;
use crate::flow_key::FlowKey;
use crate::reasons::ShortReason;
use ahash::RandomState;
use std::collections::{BTreeMap, HashMap};
use std::fmt::Display;
use uuid::Uuid;

#[allow(unused)]
use tracing::{debug, error, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FlowIndex {
    slot: u32,
    generation: u32,
}

impl Display for FlowIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}.{}", self.slot, self.generation)
    }
}

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    entry: Option<FlowEntry>,
}

#[derive(Debug)]
pub struct FlowTable {
    slots: Vec<Slot>,
    free: Vec<u32>,
    by_key: BTreeMap<FlowKey, FlowIndex>,
    vm_flows: HashMap<Uuid, usize, RandomState>,
    capacity: usize,
    len: usize,
}

fn two_mut(slots: &mut [Slot], a: usize, b: usize) -> (&mut Slot, &mut Slot) {
    debug_assert_ne!(a, b);
    if a < b {
        let (left, right) = slots.split_at_mut(b);
        (&mut left[a], &mut right[0])
    } else {
        let (left, right) = slots.split_at_mut(a);
        (&mut right[0], &mut left[b])
    }
}

impl FlowTable {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            by_key: BTreeMap::new(),
            vm_flows: HashMap::with_hasher(RandomState::with_seed(0)),
            capacity,
            len: 0,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn slot(&self, idx: FlowIndex) -> Option<&Slot> {
        self.slots
            .get(idx.slot as usize)
            .filter(|slot| slot.generation == idx.generation)
    }

    /// Whether `idx` still refers to a flow in the table
    #[must_use]
    pub fn is_live(&self, idx: FlowIndex) -> bool {
        self.slot(idx).is_some_and(|slot| slot.entry.is_some())
    }

    pub fn get(&self, idx: FlowIndex) -> Result<&FlowEntry, FlowError> {
        self.slot(idx)
            .and_then(|slot| slot.entry.as_ref())
            .ok_or(FlowError::StaleHandle(idx))
    }

    pub fn get_mut(&mut self, idx: FlowIndex) -> Result<&mut FlowEntry, FlowError> {
        self.slots
            .get_mut(idx.slot as usize)
            .filter(|slot| slot.generation == idx.generation)
            .and_then(|slot| slot.entry.as_mut())
            .ok_or(FlowError::StaleHandle(idx))
    }

    #[must_use]
    pub fn find(&self, key: &FlowKey) -> Option<FlowIndex> {
        self.by_key.get(key).copied()
    }

    /// Number of flows whose source is `vm`
    #[must_use]
    pub fn vm_flow_count(&self, vm: &Uuid) -> usize {
        self.vm_flows.get(vm).copied().unwrap_or(0)
    }

    fn alloc(&mut self, mut entry: FlowEntry) -> FlowIndex {
        entry.reverse = None;
        if let Some(slot) = self.free.pop() {
            let s = &mut self.slots[slot as usize];
            s.entry = Some(entry);
            FlowIndex {
                slot,
                generation: s.generation,
            }
        } else {
            #[allow(clippy::cast_possible_truncation)]
            let slot = self.slots.len() as u32;
            self.slots.push(Slot {
                generation: 0,
                entry: Some(entry),
            });
            FlowIndex { slot, generation: 0 }
        }
    }

    fn release(&mut self, idx: FlowIndex) -> Option<FlowEntry> {
        let slot = self.slots.get_mut(idx.slot as usize)?;
        if slot.generation != idx.generation {
            return None;
        }
        let entry = slot.entry.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(idx.slot);
        self.by_key.remove(entry.key());
        if let Some(vm) = entry.data.vm {
            if let Some(count) = self.vm_flows.get_mut(&vm) {
                *count -= 1;
                if *count == 0 {
                    self.vm_flows.remove(&vm);
                }
            }
        }
        self.len -= 1;
        Some(entry)
    }

    fn account(&mut self, entry: &FlowEntry) {
        if let Some(vm) = entry.data.vm {
            *self.vm_flows.entry(vm).or_insert(0) += 1;
        }
    }

    //////////////////////////////////////////////////////////////////
    /// Insert a forward flow and, optionally, its reverse flow as a pair.
    /// The forward flow is made canonical and the reverse flow is tagged
    /// [`FlowFlags::REVERSE`]. Nothing is inserted on error.
    //////////////////////////////////////////////////////////////////
    pub fn insert_pair(
        &mut self,
        mut fwd: FlowEntry,
        rev: Option<FlowEntry>,
    ) -> Result<(FlowIndex, Option<FlowIndex>), FlowError> {
        let needed = 1 + usize::from(rev.is_some());
        if self.len + needed > self.capacity {
            return Err(FlowError::TableFull(self.capacity));
        }
        if self.by_key.contains_key(fwd.key()) {
            return Err(FlowError::KeyExists(*fwd.key()));
        }
        if let Some(rev) = &rev {
            if rev.key() == fwd.key() {
                return Err(FlowError::SameKey(*fwd.key()));
            }
            if self.by_key.contains_key(rev.key()) {
                return Err(FlowError::KeyExists(*rev.key()));
            }
        }

        fwd.reset_flags(FlowFlags::REVERSE);
        let fwd_key = *fwd.key();
        self.account(&fwd);
        let fwd_idx = self.alloc(fwd);
        self.by_key.insert(fwd_key, fwd_idx);
        self.len += 1;

        let Some(mut rev) = rev else {
            debug!("Inserted flow {fwd_key} at {fwd_idx}");
            return Ok((fwd_idx, None));
        };
        rev.set_flags(FlowFlags::REVERSE);
        let rev_key = *rev.key();
        self.account(&rev);
        let rev_idx = self.alloc(rev);
        self.by_key.insert(rev_key, rev_idx);
        self.len += 1;

        let (f, r) = two_mut(
            &mut self.slots,
            fwd_idx.slot as usize,
            rev_idx.slot as usize,
        );
        if let (Some(f), Some(r)) = (f.entry.as_mut(), r.entry.as_mut()) {
            f.reverse = Some(rev_idx);
            r.reverse = Some(fwd_idx);
        }
        debug!("Inserted flow pair {fwd_key} at {fwd_idx} / {rev_key} at {rev_idx}");
        Ok((fwd_idx, Some(rev_idx)))
    }

    //////////////////////////////////////////////////////////////////
    /// Get the index of the flow paired with `idx`, checking that the
    /// pairing is symmetric.
    //////////////////////////////////////////////////////////////////
    pub fn reverse_of(&self, idx: FlowIndex) -> Result<Option<FlowIndex>, FlowError> {
        let flow = self.get(idx)?;
        let Some(rev_idx) = flow.reverse else {
            return Ok(None);
        };
        let rev = self.get(rev_idx).map_err(|_| FlowError::PairInvariant(idx))?;
        if rev.reverse != Some(idx) || rev.is_reverse() == flow.is_reverse() {
            error!("Flow pair at {idx} / {rev_idx} is not symmetric");
            return Err(FlowError::PairInvariant(idx));
        }
        Ok(Some(rev_idx))
    }

    /// The canonical (forward) flow of the pair `idx` belongs to
    pub fn forward_of(&self, idx: FlowIndex) -> Result<FlowIndex, FlowError> {
        if self.get(idx)?.is_reverse() {
            self.reverse_of(idx)?.ok_or(FlowError::PairInvariant(idx))
        } else {
            Ok(idx)
        }
    }

    /// Mutable access to a flow and its paired flow at once
    pub fn pair_mut(
        &mut self,
        idx: FlowIndex,
    ) -> Result<(&mut FlowEntry, Option<&mut FlowEntry>), FlowError> {
        match self.reverse_of(idx)? {
            None => Ok((self.get_mut(idx)?, None)),
            Some(rev_idx) => {
                let (a, b) = two_mut(&mut self.slots, idx.slot as usize, rev_idx.slot as usize);
                match (a.entry.as_mut(), b.entry.as_mut()) {
                    (Some(flow), Some(rflow)) => Ok((flow, Some(rflow))),
                    _ => Err(FlowError::PairInvariant(idx)),
                }
            }
        }
    }

    /// Make both flows of the pair short. The first reason of each flow sticks.
    pub fn make_short_pair(&mut self, idx: FlowIndex, reason: ShortReason) -> Result<(), FlowError> {
        let (flow, rflow) = self.pair_mut(idx)?;
        flow.set_short(reason);
        if let Some(rflow) = rflow {
            rflow.set_short(reason);
        }
        Ok(())
    }

    //////////////////////////////////////////////////////////////////
    /// Remove a flow and its paired flow. Either side of the pair may be
    /// given; the result is always (forward, reverse).
    //////////////////////////////////////////////////////////////////
    pub fn delete_pair(
        &mut self,
        idx: FlowIndex,
    ) -> Result<(FlowEntry, Option<FlowEntry>), FlowError> {
        let fwd_idx = self.forward_of(idx)?;
        let rev_idx = self.reverse_of(fwd_idx)?;
        let fwd = self.release(fwd_idx).ok_or(FlowError::StaleHandle(fwd_idx))?;
        let rev = match rev_idx {
            Some(rev_idx) => Some(
                self.release(rev_idx)
                    .ok_or(FlowError::PairInvariant(fwd_idx))?,
            ),
            None => None,
        };
        debug!("Deleted flow {} at {fwd_idx}", fwd.key());
        Ok((fwd, rev))
    }

    /// Flows in key order
    pub fn iter(&self) -> impl Iterator<Item = (FlowIndex, &FlowEntry)> {
        self.by_key
            .values()
            .filter_map(|idx| self.get(*idx).ok().map(|flow| (*idx, flow)))
    }

    /// Indices of the canonical flows, in key order
    #[must_use]
    pub fn forward_indices(&self) -> Vec<FlowIndex> {
        self.iter()
            .filter(|(_, flow)| !flow.is_reverse())
            .map(|(idx, _)| idx)
            .collect()
    }
}
