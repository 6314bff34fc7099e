use super::{CowDiff, CowVec, Monitor, ObjRef, SlotVec, ThreadSet, VmError};
use crate::jvm::class_graph::ClassId;
use std::collections::BTreeMap;
use std::rc::Rc;

/// Object on the simulated heap
///
/// Fields (or array elements) are a flat vector of reference-tagged words. For arrays,
/// `array_length` is set and the elements are laid out back to back, each taking one word (or
/// two, for `long[]` and `double[]`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeapObject {
    pub class: ClassId,
    pub fields: SlotVec,
    pub array_length: Option<u32>,
    pub monitor: Monitor,

    /// Threads that accessed the object
    pub accessed_by: ThreadSet,
}

impl HeapObject {
    pub fn is_array(&self) -> bool {
        self.array_length.is_some()
    }

    /// Words per array element
    pub fn element_width(&self) -> usize {
        match self.array_length {
            Some(len) if len > 0 => self.fields.len() / len as usize,
            _ => 1,
        }
    }
}

/// Small heap bookkeeping that is saved wholesale with every memento
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HeapMeta {
    /// Interned string constants
    pub interned: BTreeMap<String, ObjRef>,

    /// Objects pinned down by natives, with their pin counts
    pub pinned: BTreeMap<ObjRef, u32>,
}

/// Pre-images needed to restore the heap
#[derive(Debug)]
pub struct HeapDiff {
    objects: CowDiff<HeapObject>,
    meta: Rc<HeapMeta>,
}

impl HeapDiff {
    /// Append a later diff, keeping the older metadata
    pub fn append(&mut self, later: HeapDiff) {
        self.objects.append(later.objects);
    }
}

/// Heap of objects, addressed by dense indices
#[derive(Debug, Clone, Default)]
pub struct Heap {
    objects: CowVec<HeapObject>,
    meta: Rc<HeapMeta>,

    /// Metadata as of the last seal
    sealed_meta: Rc<HeapMeta>,
}

impl Heap {
    pub fn new() -> Heap {
        Heap::default()
    }

    /// Allocate an object (or array) with the given fields, in the lowest free index
    ///
    /// Reusing the lowest free index keeps allocation a function of the heap contents, so a
    /// restored state allocates exactly like the original.
    pub fn alloc(&mut self, class: ClassId, fields: SlotVec, array_length: Option<u32>) -> ObjRef {
        let idx = self.objects.insert(HeapObject {
            class,
            fields,
            array_length,
            monitor: Monitor::default(),
            accessed_by: ThreadSet::default(),
        });
        ObjRef(idx as u32)
    }

    pub fn get(&self, obj: ObjRef) -> Result<&HeapObject, VmError> {
        self.objects
            .get(obj.index())
            .ok_or(VmError::InvalidReference(obj))
    }

    pub fn get_mut(&mut self, obj: ObjRef) -> Result<&mut HeapObject, VmError> {
        self.objects
            .get_mut(obj.index())
            .ok_or(VmError::InvalidReference(obj))
    }

    /// Shared cell of an object (to observe copy-on-write sharing)
    pub fn get_shared(&self, obj: ObjRef) -> Option<&Rc<HeapObject>> {
        self.objects.get_shared(obj.index())
    }

    pub fn contains(&self, obj: ObjRef) -> bool {
        self.objects.contains(obj.index())
    }

    /// Reclaim an object
    pub fn free(&mut self, obj: ObjRef) {
        drop(self.objects.remove(obj.index()));
    }

    /// Live objects in index order
    pub fn iter(&self) -> impl Iterator<Item = (ObjRef, &HeapObject)> + '_ {
        self.objects
            .iter()
            .map(|(idx, object)| (ObjRef(idx as u32), object))
    }

    pub fn count(&self) -> usize {
        self.objects.count()
    }

    pub fn meta(&self) -> &HeapMeta {
        &self.meta
    }

    pub fn interned(&self, value: &str) -> Option<ObjRef> {
        self.meta.interned.get(value).copied()
    }

    pub fn intern(&mut self, value: &str, obj: ObjRef) {
        Rc::make_mut(&mut self.meta)
            .interned
            .insert(String::from(value), obj);
    }

    /// Keep an object alive across collections until unpinned
    pub fn pin(&mut self, obj: ObjRef) {
        *Rc::make_mut(&mut self.meta).pinned.entry(obj).or_insert(0) += 1;
    }

    pub fn unpin(&mut self, obj: ObjRef) {
        let meta = Rc::make_mut(&mut self.meta);
        if let Some(count) = meta.pinned.get_mut(&obj) {
            *count -= 1;
            if *count == 0 {
                meta.pinned.remove(&obj);
            }
        }
    }

    /// Take the pre-images of everything written since the last seal
    pub fn seal(&mut self) -> HeapDiff {
        let diff = HeapDiff {
            objects: self.objects.seal(),
            meta: Rc::clone(&self.sealed_meta),
        };
        self.sealed_meta = Rc::clone(&self.meta);
        diff
    }

    pub fn undo(&mut self, diff: HeapDiff) {
        self.objects.undo(diff.objects);
        self.meta = diff.meta;
        self.sealed_meta = Rc::clone(&self.meta);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn allocation_reuses_lowest_index() {
        let mut heap = Heap::new();
        let a = heap.alloc(ClassId(0), SlotVec::zeroed(1), None);
        let b = heap.alloc(ClassId(0), SlotVec::zeroed(1), None);
        let c = heap.alloc(ClassId(0), SlotVec::zeroed(1), None);
        assert_eq!((a, b, c), (ObjRef(0), ObjRef(1), ObjRef(2)));

        heap.free(b);
        assert!(matches!(heap.get(b), Err(VmError::InvalidReference(_))));
        assert_eq!(heap.alloc(ClassId(0), SlotVec::zeroed(1), None), b);
        assert_eq!(heap.count(), 3);
    }

    #[test]
    fn undo_restores_objects_and_metadata() {
        let mut heap = Heap::new();
        let a = heap.alloc(ClassId(0), SlotVec::zeroed(2), None);
        heap.intern("x", a);
        let _ = heap.seal();

        heap.get_mut(a).unwrap().fields.set_int(1, 42);
        let b = heap.alloc(ClassId(1), SlotVec::zeroed(4), Some(4));
        heap.intern("y", b);
        heap.pin(b);
        let diff = heap.seal();

        heap.undo(diff);
        assert_eq!(heap.get(a).unwrap().fields.get_int(1), 0);
        assert!(!heap.contains(b));
        assert_eq!(heap.interned("y"), None);
        assert_eq!(heap.interned("x"), Some(a));
        assert!(heap.meta().pinned.is_empty());
    }

    #[test]
    fn array_element_width() {
        let mut heap = Heap::new();
        let longs = heap.alloc(ClassId(0), SlotVec::zeroed(6), Some(3));
        let empty = heap.alloc(ClassId(0), SlotVec::zeroed(0), Some(0));
        assert_eq!(heap.get(longs).unwrap().element_width(), 2);
        assert_eq!(heap.get(empty).unwrap().element_width(), 1);
        assert!(heap.get(empty).unwrap().is_array());
    }
}
