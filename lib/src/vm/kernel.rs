use super::{
    CowDiff, CowVec, Heap, HeapDiff, InitStatus, ObjRef, SlotVec, StaticArea, Statics, ThreadId,
    ThreadInfo, ThreadState, Value, VmError,
};
use crate::jvm::class_graph::{ArrayComponent, ClassDatabase, ClassId};
use crate::jvm::{BaseType, BinaryName, FieldType, UnqualifiedName};

/// Something that happened during execution, for observers
///
/// Events are buffered in the kernel and handed to listeners after each instruction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VmEvent {
    ThreadStateChanged {
        thread: ThreadId,
        from: ThreadState,
        to: ThreadState,
    },
    Locked {
        thread: ThreadId,
        object: ObjRef,
    },
    Unlocked {
        thread: ThreadId,
        object: ObjRef,
    },
    Waited {
        thread: ThreadId,
        object: ObjRef,
    },
    Notified {
        notifier: Option<ThreadId>,
        object: ObjRef,
        waiter: ThreadId,
    },
    ClassLoaded(ClassId),
    ClassInitialized(ClassId),
    ObjectCreated(ObjRef),
    ObjectReleased(ObjRef),
    ExceptionThrown {
        thread: ThreadId,
        exception: ObjRef,
    },
    GcBegin,
    GcEnd {
        collected: usize,
    },
}

/// Pre-images needed to restore the kernel to an earlier state
#[derive(Debug)]
pub struct KernelDiff {
    heap: HeapDiff,
    threads: CowDiff<ThreadInfo>,
    statics: CowDiff<StaticArea>,
}

impl KernelDiff {
    /// Append a later diff
    pub fn append(&mut self, later: KernelDiff) {
        self.heap.append(later.heap);
        self.threads.append(later.threads);
        self.statics.append(later.statics);
    }
}

/// All the restorable state of the virtual machine: heap, threads, and static areas
#[derive(Debug, Clone, Default)]
pub struct Kernel {
    pub heap: Heap,
    pub threads: CowVec<ThreadInfo>,
    pub statics: Statics,

    /// Events not yet handed to observers (not part of the state)
    pub events: Vec<VmEvent>,
}

impl Kernel {
    pub fn new() -> Kernel {
        Kernel::default()
    }

    pub fn thread(&self, thread: ThreadId) -> Result<&ThreadInfo, VmError> {
        self.threads
            .get(thread.index())
            .ok_or(VmError::NoFrame(thread))
    }

    pub fn thread_mut(&mut self, thread: ThreadId) -> Result<&mut ThreadInfo, VmError> {
        self.threads
            .get_mut(thread.index())
            .ok_or(VmError::NoFrame(thread))
    }

    /// All threads in id order
    pub fn all_threads(&self) -> impl Iterator<Item = &ThreadInfo> + '_ {
        self.threads.iter().map(|(_, thread)| thread)
    }

    /// Register a new (not yet started) thread for a thread object
    pub fn add_thread(&mut self, thread_object: ObjRef) -> ThreadId {
        let id = ThreadId(self.threads.len() as u32);
        self.threads.push(ThreadInfo::new(id, thread_object));
        id
    }

    /// Thread whose `java/lang/Thread` object this is
    pub fn thread_for_object(&self, thread_object: ObjRef) -> Option<ThreadId> {
        self.all_threads()
            .find(|thread| thread.thread_object == thread_object)
            .map(|thread| thread.id)
    }

    pub fn set_thread_state(&mut self, thread: ThreadId, state: ThreadState) -> Result<(), VmError> {
        let info = self.thread_mut(thread)?;
        let from = info.state;
        if from != state {
            info.state = state;
            self.events.push(VmEvent::ThreadStateChanged {
                thread,
                from,
                to: state,
            });
        }
        Ok(())
    }

    pub fn set_blocked_on(&mut self, thread: ThreadId, object: Option<ObjRef>) -> Result<(), VmError> {
        let info = self.thread_mut(thread)?;
        if info.blocked_on != object {
            info.blocked_on = object;
        }
        Ok(())
    }

    /// Take the pre-images of everything written since the last seal
    pub fn seal(&mut self) -> KernelDiff {
        KernelDiff {
            heap: self.heap.seal(),
            threads: self.threads.seal(),
            statics: self.statics.seal(),
        }
    }

    /// Restore an earlier state (everything written since must have been sealed into `diff`)
    pub fn undo(&mut self, diff: KernelDiff) {
        self.heap.undo(diff.heap);
        self.threads.undo(diff.threads);
        self.statics.undo(diff.statics);
        self.events.clear();
    }

    /// Allocate an instance with zeroed fields
    pub fn new_object(&mut self, db: &ClassDatabase, class: ClassId) -> ObjRef {
        let fields = SlotVec::for_types(
            db.class(class)
                .instance_fields
                .iter()
                .map(|field| &field.descriptor),
        );
        let obj = self.heap.alloc(class, fields, None);
        self.events.push(VmEvent::ObjectCreated(obj));
        obj
    }

    /// Allocate an array (of an array class) with zeroed elements
    pub fn new_array(&mut self, db: &ClassDatabase, array_class: ClassId, length: u32) -> ObjRef {
        let (width, is_ref) = match db.class(array_class).component {
            Some(ArrayComponent::Primitive(BaseType::Long | BaseType::Double)) => (2, false),
            Some(ArrayComponent::Primitive(_)) => (1, false),
            Some(ArrayComponent::Reference(_)) | None => (1, true),
        };
        let mut fields = SlotVec::new();
        for _ in 0..length as usize * width {
            fields.push_word(0, is_ref);
        }
        let obj = self.heap.alloc(array_class, fields, Some(length));
        self.events.push(VmEvent::ObjectCreated(obj));
        obj
    }

    /// Allocate a fresh `java/lang/String`
    pub fn new_string(&mut self, db: &ClassDatabase, value: &str) -> Result<ObjRef, VmError> {
        let string_class = db.resolve(&BinaryName::STRING)?;
        let chars_class = db.resolve_array_of(&FieldType::char())?;
        let value_field = db
            .find_instance_field(string_class, &UnqualifiedName::VALUE)
            .map(|field| field.offset)
            .ok_or_else(|| VmError::BadOperand(String::from("java/lang/String has no value")))?;

        let units: Vec<u16> = value.encode_utf16().collect();
        let chars = self.new_array(db, chars_class, units.len() as u32);
        let char_fields = &mut self.heap.get_mut(chars)?.fields;
        for (idx, unit) in units.iter().enumerate() {
            char_fields.set_int(idx, *unit as i32);
        }
        let string = self.new_object(db, string_class);
        self.heap
            .get_mut(string)?
            .fields
            .set_ref(value_field, Some(chars));
        Ok(string)
    }

    /// Interned string for a constant (allocated the first time)
    pub fn intern_string(&mut self, db: &ClassDatabase, value: &str) -> Result<ObjRef, VmError> {
        if let Some(obj) = self.heap.interned(value) {
            return Ok(obj);
        }
        let obj = self.new_string(db, value)?;
        self.heap.intern(value, obj);
        Ok(obj)
    }

    /// Read back the contents of a `java/lang/String`
    pub fn read_string(&self, db: &ClassDatabase, string: ObjRef) -> Result<String, VmError> {
        let object = self.heap.get(string)?;
        let value_field = db
            .find_instance_field(object.class, &UnqualifiedName::VALUE)
            .map(|field| field.offset)
            .ok_or_else(|| VmError::BadOperand(format!("{} is not a string", string)))?;
        let units: Vec<u16> = match object.fields.get_ref(value_field) {
            None => vec![],
            Some(chars) => self
                .heap
                .get(chars)?
                .fields
                .words()
                .iter()
                .map(|unit| *unit as u16)
                .collect(),
        };
        Ok(String::from_utf16_lossy(&units))
    }

    /// Static area of a class, creating it (and the class object) on first use
    ///
    /// Creating the area does not run the initializer.
    pub fn static_area(&mut self, db: &ClassDatabase, class: ClassId) -> Result<&mut StaticArea, VmError> {
        if self.statics.get(class).is_none() {
            let class_class = db.resolve(&BinaryName::CLASS)?;
            let class_object = self.new_object(db, class_class);
            let class_data = db.class(class);
            let status = if class_data.clinit.is_none() && class_data.superclass.is_none() {
                InitStatus::Initialized
            } else {
                InitStatus::Uninitialized
            };
            self.statics.insert(StaticArea {
                class,
                status,
                fields: SlotVec::for_types(class_data.static_fields.iter().map(|f| &f.descriptor)),
                class_object,
                accessed_by: Default::default(),
            });
            self.events.push(VmEvent::ClassLoaded(class));
        }
        self.statics
            .get_mut(class)
            .ok_or_else(|| VmError::BadOperand(format!("no static area for {:?}", class)))
    }

    /// Class object of a class (creating the static area if needed)
    pub fn class_object(&mut self, db: &ClassDatabase, class: ClassId) -> Result<ObjRef, VmError> {
        Ok(self.static_area(db, class)?.class_object)
    }

    /// Read a field of an object by name (for natives and diagnostics)
    pub fn read_field(
        &self,
        db: &ClassDatabase,
        object: ObjRef,
        name: &UnqualifiedName,
    ) -> Result<Option<Value>, VmError> {
        let obj = self.heap.get(object)?;
        Ok(db
            .find_instance_field(obj.class, name)
            .map(|field| obj.fields.get_value(field.offset, &field.descriptor)))
    }
}
