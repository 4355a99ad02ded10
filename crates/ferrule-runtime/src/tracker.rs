//! Ownership and lifetime tracking
//!
//! Two address-keyed tables:
//!
//! - **bases**: allocation base -> weak handle on its single base proxy, so
//!   every access to an allocation shares one owner;
//! - **edges**: pointer slot -> strong handle on the base proxy the slot
//!   points into. A pointer stored in tracked memory keeps its target alive.
//!
//! Edges can form cycles (a node pointing to itself, two nodes pointing to
//! each other). [`Tracker::collect_cycles`] finds bases that are only
//! reachable through the edge table and severs their edges.

use crate::bridge::BridgeState;
use crate::heap::{Extent, HeapIndex, Lifetime};
use crate::memory;
use crate::proxy::{Allocation, Anchor, Proxy, ProxyCell, Release};
use crate::types::{Kind, TypeRef};
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::rc::Weak;
use tracing::{debug, trace, warn};

#[derive(Default)]
pub(crate) struct Tracker {
    bases: RefCell<HashMap<usize, Weak<ProxyCell>>>,
    edges: RefCell<BTreeMap<usize, Proxy>>,
    creating_base: Cell<bool>,
    insertions: Cell<usize>,
}

/// Clears the "creating a base" flag when dropped
pub(crate) struct CreationGuard<'a>(&'a Cell<bool>);

impl Drop for CreationGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

impl Tracker {
    pub(crate) fn register_base(&self, base: &Proxy) {
        self.bases
            .borrow_mut()
            .insert(base.address(), base.downgrade());
    }

    /// Drop the base entry for `addr` once its proxy is gone
    pub(crate) fn forget_base(&self, addr: usize) {
        let mut bases = self.bases.borrow_mut();
        if bases.get(&addr).is_some_and(|w| w.strong_count() == 0) {
            bases.remove(&addr);
        }
    }

    pub(crate) fn base_at(&self, addr: usize) -> Option<Proxy> {
        self.bases.borrow().get(&addr)?.upgrade().map(Proxy)
    }

    /// `None` while another base is being created
    pub(crate) fn creating_base(&self) -> Option<CreationGuard<'_>> {
        if self.creating_base.replace(true) {
            return None;
        }
        Some(CreationGuard(&self.creating_base))
    }

    /// Record that `slot` keeps `base` alive; returns the insertion count
    pub(crate) fn add_edge(&self, slot: usize, base: Proxy) -> usize {
        let previous = self.edges.borrow_mut().insert(slot, base);
        if previous.is_some() {
            warn!(slot = %format_args!("{:#x}", slot), "slot already held a lifetime edge");
        }
        drop(previous);
        let count = self.insertions.get() + 1;
        self.insertions.set(count);
        count
    }

    pub(crate) fn remove_edge(&self, slot: usize) -> Option<Proxy> {
        self.edges.borrow_mut().remove(&slot)
    }

    /// Remove every edge whose slot lies in `base..base + size`
    pub(crate) fn take_edges_in(&self, base: usize, size: usize) -> Vec<Proxy> {
        let mut edges = self.edges.borrow_mut();
        let slots: Vec<usize> = edges
            .range(base..base + size.max(1))
            .map(|(slot, _)| *slot)
            .collect();
        slots
            .into_iter()
            .filter_map(|slot| edges.remove(&slot))
            .collect()
    }

    pub(crate) fn edges_at(&self, slots: &[usize]) -> Vec<Proxy> {
        let edges = self.edges.borrow();
        slots
            .iter()
            .filter_map(|slot| edges.get(slot).cloned())
            .collect()
    }

    pub(crate) fn remove_edges(&self, slots: &[usize]) -> Vec<Proxy> {
        let mut edges = self.edges.borrow_mut();
        slots
            .iter()
            .filter_map(|slot| edges.remove(slot))
            .collect()
    }

    /// Whether an edge held by one of `slots` is the only owner of its target
    pub(crate) fn holds_last_reference(&self, slots: &[usize]) -> bool {
        let edges = self.edges.borrow();
        slots
            .iter()
            .filter_map(|slot| edges.get(slot))
            .any(|target| target.strong_count() == 1)
    }

    pub(crate) fn live_bases(&self) -> usize {
        self.bases
            .borrow()
            .values()
            .filter(|w| w.strong_count() > 0)
            .count()
    }

    pub(crate) fn edge_count(&self) -> usize {
        self.edges.borrow().len()
    }

    /// Trial deletion over the edge table
    ///
    /// A base is externally referenced when its strong count exceeds the
    /// number of edges pointing at it. Such bases, and the targets of edges
    /// whose slot is not inside any edge target, are roots; everything
    /// reachable from a root through slots inside reachable bases survives.
    /// The remaining bases lose the edges held by their own slots, which
    /// releases them. Returns the number of severed edges.
    pub(crate) fn collect_cycles(&self, heap: &HeapIndex) -> usize {
        let garbage: Vec<usize> = {
            let edges = self.edges.borrow();
            let mut incoming: HashMap<usize, usize> = HashMap::new();
            for target in edges.values() {
                *incoming.entry(target.address()).or_default() += 1;
            }

            let mut reachable: HashSet<usize> = HashSet::new();
            let mut pending: Vec<usize> = Vec::new();
            for target in edges.values() {
                let addr = target.address();
                if target.strong_count() > incoming[&addr] && reachable.insert(addr) {
                    pending.push(addr);
                }
            }
            for (slot, target) in edges.iter() {
                let owner = heap.allocation_info(*slot).map(|e| e.base);
                let from_candidate = owner.is_some_and(|base| incoming.contains_key(&base));
                if !from_candidate && reachable.insert(target.address()) {
                    pending.push(target.address());
                }
            }
            while let Some(base) = pending.pop() {
                let size = heap.allocation_info(base).map_or(0, |e| e.size);
                for target in edges.range(base..base + size.max(1)).map(|(_, t)| t) {
                    if reachable.insert(target.address()) {
                        pending.push(target.address());
                    }
                }
            }
            incoming
                .into_keys()
                .filter(|addr| !reachable.contains(addr))
                .collect()
        };

        let mut severed = Vec::new();
        for base in &garbage {
            let size = heap.allocation_info(*base).map_or(0, |e| e.size);
            severed.extend(self.take_edges_in(*base, size));
        }
        let count = severed.len();
        if count > 0 {
            debug!(bases = garbage.len(), edges = count, "collected reference cycles");
        }
        drop(severed);
        count
    }
}

impl BridgeState {
    /// Base proxy of the allocation enclosing `addr`
    ///
    /// Returns `None` when the address is untracked, when the allocation's
    /// lifetime cannot be extended, or when its type is unknown; callers then
    /// use an unmanaged reference.
    pub(crate) fn base_for(&self, addr: usize) -> Option<Proxy> {
        let extent = self.heap.allocation_info(addr)?;
        if let Some(base) = self.tracker.base_at(extent.base) {
            return Some(base);
        }
        let Lifetime::Adopted(free) = extent.lifetime else {
            return None;
        };
        let ty = extent.ty?;
        let _guard = self.tracker.creating_base()?;
        let bundle = self.proxy_type(ty).ok()?;
        let length = match (bundle.kind(), bundle.element()) {
            (Kind::Array, Some((_, stride))) if stride > 0 => extent.size / stride,
            _ => 1,
        };
        let base = Proxy::new(
            bundle,
            extent.base,
            length,
            Anchor::Owned(Allocation {
                base: extent.base,
                size: extent.size,
                release: Release::Foreign(free),
                bridge: self.weak_self.clone(),
            }),
        );
        // the base proxy now owns the block
        self.heap.insert(Extent {
            lifetime: Lifetime::Managed,
            ..extent
        });
        self.tracker.register_base(&base);
        trace!(base = %format_args!("{:#x}", extent.base), ty = %base.type_name(), "adopted allocation");
        Some(base)
    }

    /// Update the lifetime edge of `slot` after `target` was stored in it
    pub(crate) fn notify_ptr_write(&self, slot: usize, target: usize) {
        let previous = self.tracker.remove_edge(slot);
        if target != 0 && self.heap.allocation_info(slot).is_some() {
            if let Some(base) = self.base_for(target) {
                let count = self.tracker.add_edge(slot, base);
                let threshold = self.settings.gc_threshold;
                if threshold > 0 && count % threshold == 0 {
                    self.tracker.collect_cycles(&self.heap);
                }
            }
        }
        drop(previous);
    }

    /// Addresses of every pointer slot inside `length` objects of type `ty`
    /// (elements of `ty` for arrays and addresses)
    pub(crate) fn pointer_slots(&self, addr: usize, ty: TypeRef, length: usize) -> Vec<usize> {
        let mut slots = Vec::new();
        match self.types.kind_of(ty) {
            Kind::Address | Kind::Array => {
                if let Some(element) = self.types.element_type_of(ty) {
                    let stride = self.types.size_of(element).unwrap_or(0);
                    self.element_slots(addr, element, stride, length, &mut slots);
                }
            }
            _ => self.collect_slots(addr, ty, &mut slots),
        }
        slots
    }

    fn element_slots(&self, addr: usize, element: TypeRef, stride: usize, count: usize, out: &mut Vec<usize>) {
        let mut first = Vec::new();
        self.collect_slots(addr, element, &mut first);
        if first.is_empty() || stride == 0 {
            return;
        }
        for i in 0..count {
            out.extend(first.iter().map(|slot| slot + i * stride));
        }
    }

    fn collect_slots(&self, addr: usize, ty: TypeRef, out: &mut Vec<usize>) {
        match self.types.kind_of(ty) {
            Kind::Address => out.push(addr),
            Kind::Composite => {
                for member in self.types.members_of(ty).iter() {
                    self.collect_slots(addr + member.offset, member.ty, out);
                }
            }
            Kind::Array => {
                if let (Some(element), Some(length)) =
                    (self.types.element_type_of(ty), self.types.array_length(ty))
                {
                    let stride = self.types.size_of(element).unwrap_or(0);
                    self.element_slots(addr, element, stride, length, out);
                }
            }
            _ => {}
        }
    }

    /// Re-derive the lifetime edges of every pointer slot of an object whose
    /// bytes were overwritten wholesale
    pub(crate) fn refresh_edges(&self, addr: usize, ty: TypeRef, length: usize) {
        for slot in self.pointer_slots(addr, ty, length) {
            // SAFETY: slots lie inside the object that was just written
            let target = unsafe { memory::read_word(slot) };
            self.notify_ptr_write(slot, target);
        }
    }
}
