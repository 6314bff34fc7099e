//! Reachability based garbage collection
//!
//! Marking starts from the roots: every reference slot of every frame, thread objects and
//! exceptions in flight, objects a thread is blocked on or holds the lock of, class objects and
//! static fields, interned strings, and pinned objects. Objects whose monitor still has an
//! owner or queued threads are roots too, since the lock state cannot be reconstructed.
//!
//! Before unreachable objects are reclaimed, release hooks run. The only one is for
//! `java/lang/ref/WeakReference`: its referent slot is not traced, and gets cleared when the
//! referent turns out to be otherwise unreachable.

use super::{Kernel, ObjRef, VmError, VmEvent};
use crate::jvm::class_graph::{ClassDatabase, ClassId};
use crate::jvm::{BinaryName, UnqualifiedName};
use std::collections::HashSet;

impl Kernel {
    /// Collect unreachable objects, returning how many were reclaimed
    ///
    /// Nothing happens while an exception is being thrown, so that its diagnostic data survives.
    pub fn collect_garbage(&mut self, db: &ClassDatabase) -> Result<usize, VmError> {
        if self
            .all_threads()
            .any(|thread| thread.pending_exception.is_some())
        {
            log::debug!("Skipping collection: exception pending");
            return Ok(0);
        }
        self.events.push(VmEvent::GcBegin);

        let weak_reference = db.lookup(&BinaryName::WEAKREFERENCE);
        let referent_offset = weak_reference
            .and_then(|class| db.find_instance_field(class, &UnqualifiedName::REFERENT))
            .map(|field| field.offset);
        let is_weak = |class: ClassId| match weak_reference {
            Some(weak) => db.is_assignable(class, weak),
            None => false,
        };

        // Mark
        let mut marked: HashSet<ObjRef> = HashSet::new();
        let mut to_visit: Vec<ObjRef> = self.roots();
        let mut weak_refs: Vec<ObjRef> = vec![];
        while let Some(obj) = to_visit.pop() {
            if !marked.insert(obj) {
                continue;
            }
            let object = self.heap.get(obj)?;
            let weak_slot = if is_weak(object.class) {
                weak_refs.push(obj);
                referent_offset
            } else {
                None
            };
            for (idx, (word, is_ref)) in object
                .fields
                .words()
                .iter()
                .zip(object.fields.ref_tags())
                .enumerate()
            {
                if !is_ref || Some(idx) == weak_slot {
                    continue;
                }
                if let Some(child) = ObjRef::from_word(*word) {
                    if !marked.contains(&child) {
                        to_visit.push(child);
                    }
                }
            }
        }

        // Release hooks
        if let Some(offset) = referent_offset {
            for weak in weak_refs {
                let referent = self.heap.get(weak)?.fields.get_ref(offset);
                if let Some(referent) = referent {
                    if !marked.contains(&referent) {
                        self.heap.get_mut(weak)?.fields.set_ref(offset, None);
                    }
                }
            }
        }

        // Sweep
        let garbage: Vec<ObjRef> = self
            .heap
            .iter()
            .map(|(obj, _)| obj)
            .filter(|obj| !marked.contains(obj))
            .collect();
        for obj in &garbage {
            self.heap.free(*obj);
            self.events.push(VmEvent::ObjectReleased(*obj));
        }

        log::debug!(
            "Collected {} objects, {} live",
            garbage.len(),
            self.heap.count()
        );
        self.events.push(VmEvent::GcEnd {
            collected: garbage.len(),
        });
        Ok(garbage.len())
    }

    /// Roots of the object graph
    pub fn roots(&self) -> Vec<ObjRef> {
        let mut roots = vec![];
        for thread in self.all_threads() {
            roots.push(thread.thread_object);
            roots.extend(thread.pending_exception);
            roots.extend(thread.blocked_on);
            roots.extend(thread.held_locks.iter().copied());
            for frame in &thread.frames {
                roots.extend(frame.references());
            }
        }
        for area in self.statics.iter() {
            roots.push(area.class_object);
            roots.extend(area.fields.references());
        }
        let meta = self.heap.meta();
        roots.extend(meta.interned.values().copied());
        roots.extend(meta.pinned.keys().copied());
        for (obj, object) in self.heap.iter() {
            if !object.monitor.is_idle() {
                roots.push(obj);
            }
        }
        roots
    }
}
