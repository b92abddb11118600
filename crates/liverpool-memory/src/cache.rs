//! Guest range -> host resource cache.
//!
//! Each entry owns the host resource for one [`GpuObject`] at an exact set of guest ranges.
//! A request at the same ranges whose `equal` holds reuses the entry; anything else overlapping
//! the request is written back (if the GPU wrote it) and deleted before the new object is
//! created and filled from guest memory.

use core::fmt::Write as _;

use hashbrown::HashMap;
use liverpool_shader::guest_memory::read_ranges;
use liverpool_shader::{GuestMemory, GuestRange};
use tracing::{debug, trace, warn};
use xxhash_rust::xxh3::xxh3_64;

use crate::backend::HostBackend;
use crate::context::GraphicContext;
use crate::error::{GpuMemoryError, Result};
use crate::objects::{GpuObject, GpuObjectType, HostResource, ObjectParams};
use crate::stats::{GpuMemoryStats, GpuMemoryStatsSnapshot};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GpuMemoryConfig {
    /// Reject requests that fall outside every range passed to
    /// [`GpuMemory::set_allocated_range`].
    pub check_allocated_ranges: bool,
    /// Re-check that no two live objects overlap after every insertion.
    pub verify_invariants: bool,
}

impl Default for GpuMemoryConfig {
    fn default() -> Self {
        Self {
            check_allocated_ranges: false,
            verify_invariants: cfg!(debug_assertions),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObjectState {
    /// Host content matches guest memory as of the last update.
    Fresh,
    /// Guest memory changed behind the cache; the next use refreshes the host copy.
    Stale,
}

struct Entry {
    object: Box<dyn GpuObject>,
    params: ObjectParams,
    ranges: Vec<GuestRange>,
    resource: HostResource,
    hash: u64,
    state: ObjectState,
    gpu_written: bool,
    last_used_frame: u64,
}

impl Entry {
    fn overlaps(&self, ranges: &[GuestRange]) -> bool {
        self.ranges.iter().any(|a| ranges.iter().any(|b| a.overlaps(b)))
    }
}

fn content_hash(guest: &dyn GuestMemory, ranges: &[GuestRange]) -> Result<u64> {
    Ok(xxh3_64(&read_ranges(guest, ranges)?))
}

fn refresh(ctx: &mut GraphicContext<'_>, stats: &GpuMemoryStats, entry: &mut Entry) -> Result<()> {
    if let Some(update) = entry.object.updater() {
        update(ctx, &entry.params, &entry.ranges, &entry.resource)?;
        stats.inc_updates();
    }
    if entry.object.check_hash() {
        entry.hash = content_hash(ctx.guest, &entry.ranges)?;
    }
    entry.state = ObjectState::Fresh;
    Ok(())
}

fn write_back(ctx: &mut GraphicContext<'_>, stats: &GpuMemoryStats, id: ObjectId, entry: &mut Entry) -> Result<()> {
    if !entry.gpu_written {
        return Ok(());
    }
    if let Some(write_back) = entry.object.write_backer() {
        write_back(ctx, &entry.params, &entry.ranges, &entry.resource)?;
        stats.inc_write_backs();
        trace!(id = id.0, object = ?entry.object.object_type(), "gpu object written back");
    }
    entry.gpu_written = false;
    Ok(())
}

fn delete(backend: &mut dyn HostBackend, stats: &GpuMemoryStats, id: ObjectId, entry: Entry) {
    debug!(id = id.0, object = ?entry.object.object_type(), "gpu object deleted");
    entry.object.delete(backend, entry.resource);
    stats.inc_deletes();
}

/// Cache of host resources for guest GPU objects.
///
/// Driven from the command-processing thread only; host and guest memory arrive per call via
/// [`GraphicContext`].
#[derive(Default)]
pub struct GpuMemory {
    config: GpuMemoryConfig,
    entries: HashMap<ObjectId, Entry>,
    next_id: u64,
    allocated: Vec<GuestRange>,
    frame: u64,
    stats: GpuMemoryStats,
}

impl GpuMemory {
    pub fn new(config: GpuMemoryConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn config(&self) -> GpuMemoryConfig {
        self.config
    }

    /// Records guest memory the title mapped for GPU access.
    pub fn set_allocated_range(&mut self, vaddr: u64, size: u64) {
        self.allocated.push(GuestRange::new(vaddr, size));
    }

    fn check_allocated(&self, ranges: &[GuestRange]) -> Result<()> {
        if !self.config.check_allocated_ranges {
            return Ok(());
        }
        for range in ranges {
            if !self.allocated.iter().any(|a| a.contains(range)) {
                return Err(GpuMemoryError::CacheConsistency(format!(
                    "range 0x{:x}+0x{:x} is outside every allocated GPU range",
                    range.vaddr, range.size
                )));
            }
        }
        Ok(())
    }

    /// Returns the cached object for `ranges`, creating (and filling) it when nothing reusable is
    /// cached there.
    pub fn get_object(
        &mut self,
        ctx: &mut GraphicContext<'_>,
        ranges: &[GuestRange],
        object: &dyn GpuObject,
    ) -> Result<ObjectId> {
        if ranges.is_empty() || ranges.iter().any(|r| r.size == 0) {
            return Err(GpuMemoryError::CacheConsistency(format!(
                "{:?} requested with empty guest ranges {ranges:?}",
                object.object_type()
            )));
        }
        self.check_allocated(ranges)?;

        let existing = self
            .entries
            .iter()
            .find(|(_, e)| e.ranges == ranges && e.object.object_type() == object.object_type())
            .map(|(id, _)| *id);
        if let Some(id) = existing {
            if self.entries.get(&id).is_some_and(|e| object.equal(&e.params)) {
                self.reuse(ctx, id)?;
                return Ok(id);
            }
        }

        let mut overlapping: Vec<ObjectId> = self
            .entries
            .iter()
            .filter(|(_, e)| e.overlaps(ranges))
            .map(|(id, _)| *id)
            .collect();
        overlapping.sort_unstable();
        for id in overlapping {
            self.remove(ctx, id)?;
        }

        self.create(ctx, ranges, object)
    }

    fn reuse(&mut self, ctx: &mut GraphicContext<'_>, id: ObjectId) -> Result<()> {
        let frame = self.frame;
        let stats = &self.stats;
        let entry = self.entries.get_mut(&id).ok_or(GpuMemoryError::UnknownObject(id))?;

        if entry.state == ObjectState::Stale {
            refresh(ctx, stats, entry)?;
        } else if entry.object.check_hash() {
            let hash = content_hash(ctx.guest, &entry.ranges)?;
            if hash != entry.hash {
                trace!(id = id.0, object = ?entry.object.object_type(), "guest content changed");
                refresh(ctx, stats, entry)?;
            }
        }
        if !entry.object.read_only() {
            entry.gpu_written = true;
        }
        entry.last_used_frame = frame;
        stats.inc_reuses();
        trace!(id = id.0, object = ?entry.object.object_type(), "gpu object reused");
        Ok(())
    }

    fn create(&mut self, ctx: &mut GraphicContext<'_>, ranges: &[GuestRange], object: &dyn GpuObject) -> Result<ObjectId> {
        let resource = object.create(ctx, ranges)?;
        self.stats.inc_creates();

        self.next_id += 1;
        let id = ObjectId(self.next_id);
        let mut entry = Entry {
            object: object.clone_box(),
            params: object.params(),
            ranges: ranges.to_vec(),
            resource,
            hash: 0,
            state: ObjectState::Stale,
            gpu_written: false,
            last_used_frame: self.frame,
        };
        if let Err(e) = refresh(ctx, &self.stats, &mut entry) {
            delete(ctx.backend, &self.stats, id, entry);
            return Err(e);
        }
        entry.gpu_written = !object.read_only();

        debug!(
            id = id.0,
            object = ?object.object_type(),
            vaddr = format_args!("0x{:x}", ranges[0].vaddr),
            ranges = ranges.len(),
            "gpu object created"
        );
        self.entries.insert(id, entry);
        if self.config.verify_invariants {
            self.verify_invariants()?;
        }
        Ok(id)
    }

    fn remove(&mut self, ctx: &mut GraphicContext<'_>, id: ObjectId) -> Result<()> {
        let Some(mut entry) = self.entries.remove(&id) else {
            return Err(GpuMemoryError::UnknownObject(id));
        };
        let written = write_back(ctx, &self.stats, id, &mut entry);
        delete(ctx.backend, &self.stats, id, entry);
        written
    }

    pub fn resource(&self, id: ObjectId) -> Result<HostResource> {
        self.entries
            .get(&id)
            .map(|e| e.resource)
            .ok_or(GpuMemoryError::UnknownObject(id))
    }

    pub fn object(&self, id: ObjectId) -> Result<&dyn GpuObject> {
        self.entries
            .get(&id)
            .map(|e| e.object.as_ref())
            .ok_or(GpuMemoryError::UnknownObject(id))
    }

    pub fn state(&self, id: ObjectId) -> Result<ObjectState> {
        self.entries
            .get(&id)
            .map(|e| e.state)
            .ok_or(GpuMemoryError::UnknownObject(id))
    }

    /// Marks objects of `object_type` overlapping the range as stale. Returns how many changed.
    pub fn reset_hash(&mut self, vaddr: u64, size: u64, object_type: GpuObjectType) -> usize {
        let range = [GuestRange::new(vaddr, size)];
        let mut count = 0;
        for entry in self.entries.values_mut() {
            if entry.object.object_type() == object_type && entry.overlaps(&range) {
                entry.state = ObjectState::Stale;
                count += 1;
            }
        }
        trace!(vaddr = format_args!("0x{vaddr:x}"), size, ?object_type, count, "reset hash");
        count
    }

    /// Writes back and deletes every object overlapping the range, and forgets allocated ranges
    /// inside it.
    pub fn free(&mut self, ctx: &mut GraphicContext<'_>, vaddr: u64, size: u64) -> Result<usize> {
        let range = [GuestRange::new(vaddr, size)];
        let mut ids: Vec<ObjectId> = self
            .entries
            .iter()
            .filter(|(_, e)| e.overlaps(&range))
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        let count = ids.len();
        let mut result = Ok(());
        for id in ids {
            if let Err(e) = self.remove(ctx, id) {
                warn!(id = id.0, error = %e, "write-back failed while freeing");
                result = result.and(Err(e));
            }
        }
        self.allocated.retain(|a| !range[0].contains(a));
        debug!(vaddr = format_args!("0x{vaddr:x}"), size, count, "gpu memory freed");
        result.map(|()| count)
    }

    /// Writes back every GPU-written object that supports it. Returns how many were written.
    pub fn flush(&mut self, ctx: &mut GraphicContext<'_>) -> Result<usize> {
        let before = self.stats.snapshot().write_backs;
        let mut ids: Vec<ObjectId> = self.entries.keys().copied().collect();
        ids.sort_unstable();
        for id in ids {
            if let Some(entry) = self.entries.get_mut(&id) {
                write_back(ctx, &self.stats, id, entry)?;
            }
        }
        Ok((self.stats.snapshot().write_backs - before) as usize)
    }

    /// Ends the current frame. Nothing is written back.
    pub fn frame_done(&mut self) {
        self.frame += 1;
        trace!(frame = self.frame, objects = self.entries.len(), "gpu memory frame done");
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Flushes, then deletes every object.
    pub fn destroy_all(&mut self, ctx: &mut GraphicContext<'_>) -> Result<()> {
        let flushed = self.flush(ctx);
        for (id, entry) in self.entries.drain() {
            delete(ctx.backend, &self.stats, id, entry);
        }
        flushed.map(|_| ())
    }

    pub fn verify_invariants(&self) -> Result<()> {
        let entries: Vec<(&ObjectId, &Entry)> = self.entries.iter().collect();
        for (i, (id_a, a)) in entries.iter().enumerate() {
            for (id_b, b) in &entries[i + 1..] {
                if a.overlaps(&b.ranges) {
                    return Err(GpuMemoryError::CacheConsistency(format!(
                        "{:?} {:?} and {:?} {:?} overlap",
                        id_a,
                        a.object.object_type(),
                        id_b,
                        b.object.object_type()
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn dbg_dump(&self) -> String {
        let mut entries: Vec<(&ObjectId, &Entry)> = self.entries.iter().collect();
        entries.sort_by_key(|(id, _)| **id);
        let mut out = format!("gpu memory: {} objects, frame {}\n", entries.len(), self.frame);
        for (id, e) in entries {
            let _ = write!(out, "  #{} {:?}", id.0, e.object.object_type());
            for r in &e.ranges {
                let _ = write!(out, " [0x{:x}, 0x{:x})", r.vaddr, r.end());
            }
            let _ = writeln!(
                out,
                " {:?}{}{} frame {}",
                e.state,
                if e.object.read_only() { " ro" } else { " rw" },
                if e.gpu_written { " written" } else { "" },
                e.last_used_frame
            );
        }
        out
    }

    pub fn stats(&self) -> GpuMemoryStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use liverpool_shader::VecGuestMemory;

    use super::*;
    use crate::backend::SoftwareBackend;
    use crate::objects::{LabelObject, VertexBufferObject};

    #[test]
    fn allocated_range_check() {
        let mut backend = SoftwareBackend::new();
        let guest = VecGuestMemory::new(0, 0x1000);
        let mut ctx = GraphicContext::new(&mut backend, &guest);
        let mut mem = GpuMemory::new(GpuMemoryConfig {
            check_allocated_ranges: true,
            verify_invariants: true,
        });
        mem.set_allocated_range(0x100, 0x100);

        mem.get_object(&mut ctx, &[GuestRange::new(0x100, 0x40)], &VertexBufferObject)
            .unwrap();
        assert!(matches!(
            mem.get_object(&mut ctx, &[GuestRange::new(0x1f0, 0x20)], &LabelObject),
            Err(GpuMemoryError::CacheConsistency(_))
        ));
    }

    #[test]
    fn empty_ranges_are_rejected() {
        let mut backend = SoftwareBackend::new();
        let guest = VecGuestMemory::new(0, 0x100);
        let mut ctx = GraphicContext::new(&mut backend, &guest);
        let mut mem = GpuMemory::default();
        assert!(mem.get_object(&mut ctx, &[], &LabelObject).is_err());
        assert!(mem.is_empty());
    }

    #[test]
    fn dump_lists_objects_in_creation_order() {
        let mut backend = SoftwareBackend::new();
        let guest = VecGuestMemory::new(0, 0x100);
        let mut ctx = GraphicContext::new(&mut backend, &guest);
        let mut mem = GpuMemory::default();
        mem.get_object(&mut ctx, &[GuestRange::new(0x10, 0x8)], &LabelObject).unwrap();
        mem.get_object(&mut ctx, &[GuestRange::new(0x40, 0x20)], &VertexBufferObject)
            .unwrap();
        assert_eq!(
            mem.dbg_dump(),
            "gpu memory: 2 objects, frame 0\n  \
             #1 Label [0x10, 0x18) Fresh rw written frame 0\n  \
             #2 VertexBuffer [0x40, 0x60) Fresh ro frame 0\n"
        );
    }
}
