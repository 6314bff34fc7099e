use super::{CowDiff, CowVec, ObjRef, SlotVec, ThreadId, ThreadSet};
use crate::jvm::class_graph::ClassId;
use std::rc::Rc;

/// Initialization status of a class
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum InitStatus {
    /// Class object exists, `<clinit>` has not started
    Uninitialized,

    /// `<clinit>` (of this class or a subclass being initialized) is running on a thread
    Initializing(ThreadId),
    Initialized,

    /// `<clinit>` threw: every later use raises `NoClassDefFoundError`
    Erroneous,
}

impl InitStatus {
    pub fn code(self) -> i32 {
        match self {
            InitStatus::Uninitialized => 0,
            InitStatus::Initializing(thread) => 1 + thread.0 as i32 * 4,
            InitStatus::Initialized => 2,
            InitStatus::Erroneous => 3,
        }
    }
}

/// Static area of a class: its static fields and the class object
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StaticArea {
    pub class: ClassId,
    pub status: InitStatus,
    pub fields: SlotVec,

    /// The `java/lang/Class` instance (whose monitor guards initialization and static
    /// synchronized methods)
    pub class_object: ObjRef,
    pub accessed_by: ThreadSet,
}

/// Static areas of all classes in use, indexed by class id
#[derive(Clone, Debug, Default)]
pub struct Statics {
    areas: CowVec<StaticArea>,
}

impl Statics {
    pub fn new() -> Statics {
        Statics::default()
    }

    pub fn get(&self, class: ClassId) -> Option<&StaticArea> {
        self.areas.get(class.0 as usize)
    }

    pub fn get_mut(&mut self, class: ClassId) -> Option<&mut StaticArea> {
        self.areas.get_mut(class.0 as usize)
    }

    pub fn get_shared(&self, class: ClassId) -> Option<&Rc<StaticArea>> {
        self.areas.get_shared(class.0 as usize)
    }

    pub fn insert(&mut self, area: StaticArea) {
        self.areas.set(area.class.0 as usize, area);
    }

    /// Static areas in class id order
    pub fn iter(&self) -> impl Iterator<Item = &StaticArea> + '_ {
        self.areas.iter().map(|(_, area)| area)
    }

    /// Class whose class object this is, if any
    pub fn class_of_object(&self, object: ObjRef) -> Option<ClassId> {
        self.iter()
            .find(|area| area.class_object == object)
            .map(|area| area.class)
    }

    pub fn seal(&mut self) -> CowDiff<StaticArea> {
        self.areas.seal()
    }

    pub fn undo(&mut self, diff: CowDiff<StaticArea>) {
        self.areas.undo(diff);
    }
}
