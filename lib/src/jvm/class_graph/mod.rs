//! Class database
//!
//! Classes are resolved lazily from a [`ClassSource`], the first time something asks for them by
//! name. Resolving a class resolves its superclass and interfaces first, computes the field
//! layouts, and links every method body. Once resolved, class data is immutable and never
//! unloaded, so references handed out by the database stay valid for its whole lifetime.
//!
//! Classes and methods are identified by dense indices ([`ClassId`], [`MethodId`]) local to one
//! database. Separate databases (eg. in separate search workers) never share ids.

use crate::jvm::code::MethodBody;
use crate::jvm::{
    BaseType, BinaryName, ClassAccessFlags, Error, FieldAccessFlags, FieldType, MethodAccessFlags,
    MethodDescriptor, Name, RefType, RenderDescriptor, UnqualifiedName,
};
use crate::util::Width;
use elsa::{FrozenMap, FrozenVec};
use std::cell::RefCell;
use std::fmt;

mod assignable;
mod definition;
mod java_library;

pub use definition::*;
pub use java_library::*;

/// Index of a class in a [`ClassDatabase`]
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct ClassId(pub u32);

/// Index of a method in a [`ClassDatabase`]
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct MethodId(pub u32);

/// Resolved class
#[derive(Debug)]
pub struct ClassData {
    pub id: ClassId,
    pub name: BinaryName,
    pub access_flags: ClassAccessFlags,
    pub superclass: Option<ClassId>,
    pub interfaces: Vec<ClassId>,

    /// Layout of instances: inherited fields first, then the fields declared here
    pub instance_fields: Vec<FieldData>,

    /// Number of slots in an instance
    pub instance_slots: usize,

    /// Static fields declared by this class, laid out in the class object
    pub static_fields: Vec<FieldData>,

    /// Number of static slots
    pub static_slots: usize,

    /// Methods declared by this class
    pub methods: Vec<MethodId>,

    /// Static initializer, if there is one
    pub clinit: Option<MethodId>,

    /// Element type, for array classes
    pub component: Option<ArrayComponent>,
}

/// Element type of an array class
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ArrayComponent {
    Primitive(BaseType),
    Reference(ClassId),
}

impl ClassData {
    pub fn is_interface(&self) -> bool {
        self.access_flags.contains(ClassAccessFlags::INTERFACE)
    }

    pub fn is_abstract(&self) -> bool {
        self.access_flags.contains(ClassAccessFlags::ABSTRACT)
    }

    pub fn is_array(&self) -> bool {
        self.component.is_some()
    }
}

/// Resolved field, with its slot offset (in the instance or in the class statics)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldData {
    /// Declaring class
    pub class: ClassId,
    pub name: UnqualifiedName,
    pub descriptor: FieldType<BinaryName>,
    pub access_flags: FieldAccessFlags,
    pub offset: usize,
}

impl FieldData {
    pub fn is_static(&self) -> bool {
        self.access_flags.contains(FieldAccessFlags::STATIC)
    }

    pub fn is_reference(&self) -> bool {
        self.descriptor.is_reference()
    }
}

/// Resolved method
#[derive(Debug)]
pub struct MethodData {
    pub id: MethodId,

    /// Declaring class
    pub class: ClassId,
    pub name: UnqualifiedName,
    pub descriptor: MethodDescriptor<BinaryName>,
    pub access_flags: MethodAccessFlags,

    /// Linked body (absent for `native` and `abstract` methods)
    pub body: Option<MethodBody>,

    /// Slots taken by arguments, including the receiver for instance methods
    pub argument_slots: usize,
}

impl MethodData {
    pub fn is_static(&self) -> bool {
        self.access_flags.contains(MethodAccessFlags::STATIC)
    }

    pub fn is_synchronized(&self) -> bool {
        self.access_flags.contains(MethodAccessFlags::SYNCHRONIZED)
    }

    pub fn is_native(&self) -> bool {
        self.access_flags.contains(MethodAccessFlags::NATIVE)
    }

    pub fn is_abstract(&self) -> bool {
        self.access_flags.contains(MethodAccessFlags::ABSTRACT)
    }
}

/// Why a class could not be resolved
///
/// The execution engine turns these into managed `NoClassDefFoundError`s.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    NotFound(BinaryName),
    Circularity(BinaryName),
    BadDefinition(BinaryName, String),
}

impl fmt::Display for ResolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolveError::NotFound(name) => write!(f, "class {} not found", name),
            ResolveError::Circularity(name) => write!(f, "class {} is its own supertype", name),
            ResolveError::BadDefinition(name, msg) => {
                write!(f, "class {} is malformed: {}", name, msg)
            }
        }
    }
}

impl ResolveError {
    /// Name of the class that failed to resolve
    pub fn class_name(&self) -> &BinaryName {
        match self {
            ResolveError::NotFound(name)
            | ResolveError::Circularity(name)
            | ResolveError::BadDefinition(name, _) => name,
        }
    }
}

/// Lazily populated database of resolved classes
pub struct ClassDatabase {
    source: Box<dyn ClassSource>,
    classes: FrozenVec<Box<ClassData>>,
    methods: FrozenVec<Box<MethodData>>,
    by_name: FrozenMap<BinaryName, Box<ClassId>>,

    /// Classes currently being resolved (to detect circular supertypes)
    resolving: RefCell<Vec<BinaryName>>,
}

impl ClassDatabase {
    pub fn new(source: impl ClassSource + 'static) -> ClassDatabase {
        ClassDatabase {
            source: Box::new(source),
            classes: FrozenVec::new(),
            methods: FrozenVec::new(),
            by_name: FrozenMap::new(),
            resolving: RefCell::new(vec![]),
        }
    }

    /// Number of classes resolved so far (class ids are below this)
    pub fn class_count(&self) -> usize {
        self.classes.len()
    }

    pub fn class(&self, id: ClassId) -> &ClassData {
        &self.classes[id.0 as usize]
    }

    pub fn method(&self, id: MethodId) -> &MethodData {
        &self.methods[id.0 as usize]
    }

    /// Look up a class without resolving it
    pub fn lookup(&self, name: &BinaryName) -> Option<ClassId> {
        self.by_name.get(name).copied()
    }

    /// Resolve a class by name, loading it (and its supertypes) if needed
    ///
    /// This is idempotent: the same name always maps to the same id.
    pub fn resolve(&self, name: &BinaryName) -> Result<ClassId, ResolveError> {
        if let Some(id) = self.lookup(name) {
            return Ok(id);
        }
        if self.resolving.borrow().contains(name) {
            return Err(ResolveError::Circularity(name.clone()));
        }

        self.resolving.borrow_mut().push(name.clone());
        let result = if name.is_array() {
            self.resolve_array(name)
        } else {
            self.resolve_class(name)
        };
        self.resolving.borrow_mut().retain(|pending| pending != name);
        result
    }

    /// Resolve the class of values of a reference type
    pub fn resolve_ref_type(&self, ref_type: &RefType<BinaryName>) -> Result<ClassId, ResolveError> {
        self.resolve(&ref_type.class_name())
    }

    /// Resolve the array class whose elements have the given type
    pub fn resolve_array_of(
        &self,
        element: &FieldType<BinaryName>,
    ) -> Result<ClassId, ResolveError> {
        self.resolve(&BinaryName::array_of(&element.render()))
    }

    fn resolve_array(&self, name: &BinaryName) -> Result<ClassId, ResolveError> {
        let array_type = RefType::from_class_name(name)
            .map_err(|err| ResolveError::BadDefinition(name.clone(), err.to_string()))?;
        let component = match array_type.element_type() {
            Some(FieldType::Base(base)) => ArrayComponent::Primitive(base),
            Some(FieldType::Ref(elem)) => ArrayComponent::Reference(self.resolve_ref_type(&elem)?),
            None => return Err(ResolveError::NotFound(name.clone())),
        };
        let object = self.resolve(&BinaryName::OBJECT)?;
        let mut interfaces = vec![];
        for interface in [BinaryName::CLONEABLE, BinaryName::SERIALIZABLE] {
            if let Ok(id) = self.resolve(&interface) {
                interfaces.push(id);
            }
        }

        let id = ClassId(self.classes.len() as u32);
        let object_data = self.class(object);
        self.classes.push(Box::new(ClassData {
            id,
            name: name.clone(),
            access_flags: ClassAccessFlags::PUBLIC | ClassAccessFlags::FINAL,
            superclass: Some(object),
            interfaces,
            instance_fields: object_data.instance_fields.clone(),
            instance_slots: object_data.instance_slots,
            static_fields: vec![],
            static_slots: 0,
            methods: vec![],
            clinit: None,
            component: Some(component),
        }));
        self.by_name.insert(name.clone(), Box::new(id));
        log::debug!("Resolved array class {} as {:?}", name, id);
        Ok(id)
    }

    fn resolve_class(&self, name: &BinaryName) -> Result<ClassId, ResolveError> {
        let definition = self
            .source
            .load(name)
            .ok_or_else(|| ResolveError::NotFound(name.clone()))?;
        let bad = |msg: String| ResolveError::BadDefinition(name.clone(), msg);

        // Supertypes first, so they get lower ids
        let superclass = match &definition.superclass {
            Some(superclass) => {
                let id = self.resolve(superclass)?;
                if self.class(id).is_interface() {
                    return Err(bad(format!("superclass {} is an interface", superclass)));
                }
                Some(id)
            }
            None if definition.name == BinaryName::OBJECT => None,
            None => return Err(bad(String::from("missing superclass"))),
        };
        let mut interfaces = vec![];
        for interface in &definition.interfaces {
            let id = self.resolve(interface)?;
            if !self.class(id).is_interface() {
                return Err(bad(format!("{} is not an interface", interface)));
            }
            interfaces.push(id);
        }

        // Field layouts
        let id = ClassId(self.classes.len() as u32);
        let (mut instance_fields, mut instance_slots) = match superclass {
            Some(superclass) => {
                let super_data = self.class(superclass);
                (super_data.instance_fields.clone(), super_data.instance_slots)
            }
            None => (vec![], 0),
        };
        let mut static_fields = vec![];
        let mut static_slots = 0;
        for field in &definition.fields {
            let is_static = field.access_flags.contains(FieldAccessFlags::STATIC);
            let (layout, slots) = if is_static {
                (&mut static_fields, &mut static_slots)
            } else {
                (&mut instance_fields, &mut instance_slots)
            };
            layout.push(FieldData {
                class: id,
                name: field.name.clone(),
                descriptor: field.descriptor.clone(),
                access_flags: field.access_flags,
                offset: *slots,
            });
            *slots += field.descriptor.width();
        }

        // Link methods
        let mut methods = vec![];
        let mut clinit = None;
        let mut pending_methods = vec![];
        for (idx, method) in definition.methods.iter().enumerate() {
            let bodyless = method
                .access_flags
                .intersects(MethodAccessFlags::NATIVE | MethodAccessFlags::ABSTRACT);
            let body = match (&method.code, bodyless) {
                (Some(code), false) => Some(code.link().map_err(|err: Error| bad(err.to_string()))?),
                (None, true) => None,
                _ => {
                    return Err(bad(format!(
                        "method {}{} has inconsistent code",
                        method.name,
                        method.descriptor.render()
                    )))
                }
            };
            let method_id = MethodId((self.methods.len() + idx) as u32);
            let is_static = method.access_flags.contains(MethodAccessFlags::STATIC);
            if method.name == UnqualifiedName::CLINIT && is_static {
                clinit = Some(method_id);
            }
            methods.push(method_id);
            pending_methods.push(MethodData {
                id: method_id,
                class: id,
                name: method.name.clone(),
                descriptor: method.descriptor.clone(),
                access_flags: method.access_flags,
                body,
                argument_slots: method.descriptor.parameter_length(!is_static),
            });
        }
        for method in pending_methods {
            self.methods.push(Box::new(method));
        }

        self.classes.push(Box::new(ClassData {
            id,
            name: definition.name.clone(),
            access_flags: definition.access_flags,
            superclass,
            interfaces,
            instance_fields,
            instance_slots,
            static_fields,
            static_slots,
            methods,
            clinit,
            component: None,
        }));
        self.by_name.insert(name.clone(), Box::new(id));
        log::debug!("Resolved class {} as {:?}", name, id);
        Ok(id)
    }

    /// Find a method by name and descriptor, starting at a class and walking up the superclass
    /// chain, then the superinterfaces (for default and abstract interface methods)
    pub fn find_method(
        &self,
        class: ClassId,
        name: &UnqualifiedName,
        descriptor: &MethodDescriptor<BinaryName>,
    ) -> Option<MethodId> {
        let mut next_class = Some(class);
        while let Some(current) = next_class {
            let class_data = self.class(current);
            if let Some(method) = self.declared_method(class_data, name, descriptor) {
                return Some(method);
            }
            next_class = class_data.superclass;
        }
        self.find_interface_method(class, name, descriptor)
    }

    /// Find the implementation to dispatch to for a virtual or interface call on a receiver of
    /// the given runtime class
    ///
    /// Abstract declarations are skipped in favour of a concrete one further up, if there is one.
    pub fn dispatch(
        &self,
        receiver_class: ClassId,
        name: &UnqualifiedName,
        descriptor: &MethodDescriptor<BinaryName>,
    ) -> Option<MethodId> {
        let mut next_class = Some(receiver_class);
        while let Some(current) = next_class {
            let class_data = self.class(current);
            if let Some(method) = self.declared_method(class_data, name, descriptor) {
                if !self.method(method).is_static() && !self.method(method).is_abstract() {
                    return Some(method);
                }
            }
            next_class = class_data.superclass;
        }
        self.find_interface_method(receiver_class, name, descriptor)
    }

    fn declared_method(
        &self,
        class_data: &ClassData,
        name: &UnqualifiedName,
        descriptor: &MethodDescriptor<BinaryName>,
    ) -> Option<MethodId> {
        class_data.methods.iter().copied().find(|method| {
            let method = self.method(*method);
            &method.name == name && &method.descriptor == descriptor
        })
    }

    /// Search the superinterfaces (breadth first), preferring non-abstract methods
    fn find_interface_method(
        &self,
        class: ClassId,
        name: &UnqualifiedName,
        descriptor: &MethodDescriptor<BinaryName>,
    ) -> Option<MethodId> {
        let mut abstract_match = None;
        for interface in self.superinterfaces(class) {
            if let Some(method) = self.declared_method(self.class(interface), name, descriptor) {
                if !self.method(method).is_abstract() {
                    return Some(method);
                }
                abstract_match = abstract_match.or(Some(method));
            }
        }
        abstract_match
    }

    /// All interfaces a class implements (directly or not), in breadth first order
    pub fn superinterfaces(&self, class: ClassId) -> Vec<ClassId> {
        let mut found: Vec<ClassId> = vec![];
        let mut to_visit: Vec<ClassId> = vec![];
        let mut next_class = Some(class);
        while let Some(current) = next_class {
            let class_data = self.class(current);
            if class_data.is_interface() {
                to_visit.push(current);
            }
            to_visit.extend(class_data.interfaces.iter().copied());
            next_class = class_data.superclass;
        }
        let mut idx = 0;
        while idx < to_visit.len() {
            let interface = to_visit[idx];
            idx += 1;
            if found.contains(&interface) {
                continue;
            }
            found.push(interface);
            to_visit.extend(self.class(interface).interfaces.iter().copied());
        }
        found.retain(|interface| *interface != class);
        found
    }

    /// Find an instance field by name (fields in subclasses shadow those in superclasses)
    pub fn find_instance_field(
        &self,
        class: ClassId,
        name: &UnqualifiedName,
    ) -> Option<&FieldData> {
        self.class(class)
            .instance_fields
            .iter()
            .rev()
            .find(|field| &field.name == name)
    }

    /// Find a static field by name, looking in the class, then its superinterfaces, then its
    /// superclass (recursively)
    pub fn find_static_field(&self, class: ClassId, name: &UnqualifiedName) -> Option<&FieldData> {
        let mut next_class = Some(class);
        while let Some(current) = next_class {
            let class_data = self.class(current);
            if let Some(field) = class_data.static_fields.iter().find(|f| &f.name == name) {
                return Some(field);
            }
            for interface in self.superinterfaces(current) {
                let interface_data = self.class(interface);
                if let Some(field) = interface_data.static_fields.iter().find(|f| &f.name == name)
                {
                    return Some(field);
                }
            }
            next_class = class_data.superclass;
        }
        None
    }

    /// Is this class a subclass of `java/lang/Throwable`?
    pub fn is_throwable(&self, class: ClassId) -> bool {
        let mut next_class = Some(class);
        while let Some(current) = next_class {
            let class_data = self.class(current);
            if class_data.name == BinaryName::THROWABLE {
                return true;
            }
            next_class = class_data.superclass;
        }
        false
    }

    /// Human readable `Class.method(descriptor)` rendering of a method
    pub fn method_name(&self, method: MethodId) -> String {
        let method = self.method(method);
        format!(
            "{}.{}{}",
            self.class(method.class).name.as_str(),
            method.name.as_str(),
            method.descriptor.render()
        )
    }
}

impl fmt::Debug for ClassDatabase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassDatabase")
            .field("classes", &self.classes.len())
            .field("methods", &self.methods.len())
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::code::Instruction;
    use crate::jvm::code::{BranchInstruction, InvokeType, MethodRef};

    fn database_with(classes: Vec<ClassDefinition>) -> ClassDatabase {
        let mut source = ProgramSource::with_java_library().unwrap();
        for class in classes {
            source.add_class(class).unwrap();
        }
        ClassDatabase::new(source)
    }

    fn point_classes() -> Vec<ClassDefinition> {
        let mut point = ClassDefinition::class("demo/Point").unwrap();
        point
            .define_field("x", "I", FieldAccessFlags::PUBLIC)
            .unwrap();
        point
            .define_field("y", "J", FieldAccessFlags::PUBLIC)
            .unwrap();
        point
            .define_field("count", "I", FieldAccessFlags::STATIC)
            .unwrap();
        point
            .define_method("<init>", "()V", MethodAccessFlags::PUBLIC, |code| {
                code.push_instruction(Instruction::ALoad(0))?;
                code.push_instruction(Instruction::Invoke(
                    InvokeType::Special,
                    MethodRef::parse("java/lang/Object", "<init>", "()V")?,
                ))?;
                code.push_branch_instruction(BranchInstruction::Return)
            })
            .unwrap();
        point
            .define_method("norm", "()I", MethodAccessFlags::PUBLIC, |code| {
                code.push_instruction(Instruction::IConst0)?;
                code.push_branch_instruction(BranchInstruction::IReturn)
            })
            .unwrap();

        let point3 = {
            let mut point3 = ClassDefinition::class("demo/Point3")
                .unwrap()
                .extends(parse_class_name("demo/Point").unwrap())
                .implements(BinaryName::RUNNABLE);
            point3
                .define_field("z", "D", FieldAccessFlags::PUBLIC)
                .unwrap();
            point3
                .define_field("x", "I", FieldAccessFlags::PUBLIC)
                .unwrap();
            point3
                .define_method("run", "()V", MethodAccessFlags::PUBLIC, |code| {
                    code.push_branch_instruction(BranchInstruction::Return)
                })
                .unwrap();
            point3
        };
        vec![point, point3]
    }

    #[test]
    fn resolution_is_idempotent() {
        let db = database_with(point_classes());
        let name = parse_class_name("demo/Point3").unwrap();
        let first = db.resolve(&name).unwrap();
        let count = db.class_count();
        let second = db.resolve(&name).unwrap();
        assert_eq!(first, second);
        assert_eq!(count, db.class_count(), "second resolution loads nothing");

        // A fresh database resolves to the same layout
        let other = database_with(point_classes());
        let third = other.resolve(&name).unwrap();
        let (a, b) = (db.class(first), other.class(third));
        assert_eq!(a.instance_fields, b.instance_fields);
        assert_eq!(a.static_fields, b.static_fields);
        assert_eq!(a.instance_slots, b.instance_slots);
        assert_eq!(
            a.methods.iter().map(|m| db.method_name(*m)).collect::<Vec<_>>(),
            b.methods.iter().map(|m| other.method_name(*m)).collect::<Vec<_>>()
        );
    }

    #[test]
    fn supertypes_resolve_first() {
        let db = database_with(point_classes());
        let point3 = db.resolve(&parse_class_name("demo/Point3").unwrap()).unwrap();
        let point = db.lookup(&parse_class_name("demo/Point").unwrap()).unwrap();
        let object = db.lookup(&BinaryName::OBJECT).unwrap();
        assert!(object < point && point < point3);
        assert_eq!(db.class(point3).superclass, Some(point));
        assert_eq!(db.class(point).superclass, Some(object));
        assert_eq!(db.class(object).superclass, None);
    }

    #[test]
    fn field_layout() {
        let db = database_with(point_classes());
        let point3 = db.resolve(&parse_class_name("demo/Point3").unwrap()).unwrap();
        let data = db.class(point3);
        let names: Vec<(&str, usize)> = data
            .instance_fields
            .iter()
            .map(|f| (f.name.as_str(), f.offset))
            .collect();
        assert_eq!(names, vec![("x", 0), ("y", 1), ("z", 3), ("x", 5)]);
        assert_eq!(data.instance_slots, 6);

        // Shadowing picks the subclass field
        let x = UnqualifiedName::from_string(String::from("x")).unwrap();
        assert_eq!(db.find_instance_field(point3, &x).unwrap().offset, 5);

        // Statics are found through the superclass
        let count = UnqualifiedName::from_string(String::from("count")).unwrap();
        let field = db.find_static_field(point3, &count).unwrap();
        assert_eq!(db.class(field.class).name.as_str(), "demo/Point");
        assert_eq!(field.offset, 0);
    }

    #[test]
    fn method_lookup_and_dispatch() {
        let db = database_with(point_classes());
        let point3 = db.resolve(&parse_class_name("demo/Point3").unwrap()).unwrap();
        let norm = UnqualifiedName::from_string(String::from("norm")).unwrap();
        let norm_desc = parse_method_descriptor("()I").unwrap();
        let found = db.find_method(point3, &norm, &norm_desc).unwrap();
        assert_eq!(db.method_name(found), "demo/Point.norm()I");

        // Interface call on the receiver class lands on the implementation
        let run_desc = parse_method_descriptor("()V").unwrap();
        let run = db.dispatch(point3, &UnqualifiedName::RUN, &run_desc).unwrap();
        assert_eq!(db.method_name(run), "demo/Point3.run()V");

        let missing = UnqualifiedName::from_string(String::from("missing")).unwrap();
        assert_eq!(db.find_method(point3, &missing, &run_desc), None);
    }

    #[test]
    fn missing_and_circular_classes() {
        let looped = ClassDefinition::class("demo/Loop")
            .unwrap()
            .extends(parse_class_name("demo/Loop").unwrap());
        let orphan = ClassDefinition::class("demo/Orphan")
            .unwrap()
            .extends(parse_class_name("demo/Missing").unwrap());
        let db = database_with(vec![looped, orphan]);

        assert_eq!(
            db.resolve(&parse_class_name("demo/Loop").unwrap()),
            Err(ResolveError::Circularity(parse_class_name("demo/Loop").unwrap()))
        );
        assert_eq!(
            db.resolve(&parse_class_name("demo/Orphan").unwrap()),
            Err(ResolveError::NotFound(parse_class_name("demo/Missing").unwrap()))
        );
        // Failures are not cached as successes
        assert_eq!(db.lookup(&parse_class_name("demo/Orphan").unwrap()), None);
    }

    #[test]
    fn array_classes() {
        let db = database_with(vec![]);
        let nested = db.resolve(&parse_class_name("[[Ljava/lang/Thread;").unwrap()).unwrap();
        let inner = db.lookup(&parse_class_name("[Ljava/lang/Thread;").unwrap()).unwrap();
        let thread = db.lookup(&BinaryName::THREAD).unwrap();
        assert_eq!(db.class(nested).component, Some(ArrayComponent::Reference(inner)));
        assert_eq!(db.class(inner).component, Some(ArrayComponent::Reference(thread)));

        let ints = db.resolve_array_of(&FieldType::int()).unwrap();
        assert_eq!(
            db.class(ints).component,
            Some(ArrayComponent::Primitive(BaseType::Int))
        );
        assert_eq!(db.class(ints).name.as_str(), "[I");
    }
}
