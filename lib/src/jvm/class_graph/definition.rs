use crate::jvm::code::{Code, CodeBuilder, FieldRef, MethodRef};
use crate::jvm::{
    BinaryName, ClassAccessFlags, Error, FieldAccessFlags, FieldType, MethodAccessFlags,
    MethodDescriptor, Name, ParseDescriptor, UnqualifiedName,
};
use std::collections::HashMap;

/// Where the class database gets class definitions from
///
/// Loading must be deterministic: asking twice for the same name yields equal definitions.
pub trait ClassSource {
    /// Look up the definition of a (non-array) class
    fn load(&self, name: &BinaryName) -> Option<ClassDefinition>;
}

/// Definition of a class as supplied to the checker, before resolution
#[derive(Debug, Clone)]
pub struct ClassDefinition {
    pub name: BinaryName,
    pub superclass: Option<BinaryName>,
    pub interfaces: Vec<BinaryName>,
    pub access_flags: ClassAccessFlags,
    pub fields: Vec<FieldDefinition>,
    pub methods: Vec<MethodDefinition>,
}

#[derive(Debug, Clone)]
pub struct FieldDefinition {
    pub name: UnqualifiedName,
    pub descriptor: FieldType<BinaryName>,
    pub access_flags: FieldAccessFlags,
}

#[derive(Debug, Clone)]
pub struct MethodDefinition {
    pub name: UnqualifiedName,
    pub descriptor: MethodDescriptor<BinaryName>,
    pub access_flags: MethodAccessFlags,

    /// Present exactly when the method is neither `native` nor `abstract`
    pub code: Option<Code>,
}

impl ClassDefinition {
    /// New class with no members
    pub fn new(
        name: BinaryName,
        superclass: Option<BinaryName>,
        access_flags: ClassAccessFlags,
    ) -> ClassDefinition {
        ClassDefinition {
            name,
            superclass,
            interfaces: vec![],
            access_flags,
            fields: vec![],
            methods: vec![],
        }
    }

    /// New class extending `java/lang/Object`, parsing the class name
    pub fn class(name: &str) -> Result<ClassDefinition, Error> {
        Ok(ClassDefinition::new(
            parse_class_name(name)?,
            Some(BinaryName::OBJECT),
            ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER,
        ))
    }

    /// New interface (whose superclass is always `java/lang/Object`)
    pub fn interface(name: BinaryName) -> ClassDefinition {
        ClassDefinition::new(
            name,
            Some(BinaryName::OBJECT),
            ClassAccessFlags::PUBLIC | ClassAccessFlags::INTERFACE | ClassAccessFlags::ABSTRACT,
        )
    }

    pub fn extends(mut self, superclass: BinaryName) -> ClassDefinition {
        self.superclass = Some(superclass);
        self
    }

    pub fn implements(mut self, interface: BinaryName) -> ClassDefinition {
        self.interfaces.push(interface);
        self
    }

    /// Declare a field, parsing its name and descriptor
    pub fn define_field(
        &mut self,
        name: &str,
        descriptor: &str,
        access_flags: FieldAccessFlags,
    ) -> Result<(), Error> {
        self.fields.push(FieldDefinition {
            name: parse_member_name(name)?,
            descriptor: FieldType::parse(descriptor)
                .map_err(|err| Error::BadDescriptor(format!("{}: {}", descriptor, err)))?,
            access_flags,
        });
        Ok(())
    }

    /// Declare a method with bytecode, generated by `build` on a fresh [`CodeBuilder`]
    pub fn define_method(
        &mut self,
        name: &str,
        descriptor: &str,
        access_flags: MethodAccessFlags,
        build: impl FnOnce(&mut CodeBuilder) -> Result<(), Error>,
    ) -> Result<(), Error> {
        let descriptor = parse_method_descriptor(descriptor)?;
        let mut code = CodeBuilder::new(&descriptor, access_flags.contains(MethodAccessFlags::STATIC));
        build(&mut code)?;
        self.methods.push(MethodDefinition {
            name: parse_member_name(name)?,
            descriptor,
            access_flags,
            code: Some(code.result()?),
        });
        Ok(())
    }

    /// Declare a method without bytecode (`native` or `abstract` must be among the flags)
    pub fn declare_method(
        &mut self,
        name: &str,
        descriptor: &str,
        access_flags: MethodAccessFlags,
    ) -> Result<(), Error> {
        if !access_flags.intersects(MethodAccessFlags::NATIVE | MethodAccessFlags::ABSTRACT) {
            return Err(Error::MissingCode(self.name.clone(), String::from(name)));
        }
        self.methods.push(MethodDefinition {
            name: parse_member_name(name)?,
            descriptor: parse_method_descriptor(descriptor)?,
            access_flags,
            code: None,
        });
        Ok(())
    }
}

impl FieldRef {
    /// Build a field reference from its textual parts
    pub fn parse(class: &str, name: &str, descriptor: &str) -> Result<FieldRef, Error> {
        Ok(FieldRef {
            class: parse_class_name(class)?,
            name: parse_member_name(name)?,
            descriptor: FieldType::parse(descriptor)
                .map_err(|err| Error::BadDescriptor(format!("{}: {}", descriptor, err)))?,
        })
    }
}

impl MethodRef {
    /// Build a method reference from its textual parts
    pub fn parse(class: &str, name: &str, descriptor: &str) -> Result<MethodRef, Error> {
        Ok(MethodRef {
            class: parse_class_name(class)?,
            name: parse_member_name(name)?,
            descriptor: parse_method_descriptor(descriptor)?,
        })
    }
}

/// Parse a class name (array class names are accepted too)
pub fn parse_class_name(name: &str) -> Result<BinaryName, Error> {
    if let Some(element) = name.strip_prefix('[') {
        FieldType::<BinaryName>::parse(element)
            .map_err(|err| Error::BadName(format!("{}: {}", name, err)))?;
        Ok(BinaryName::array_of(element))
    } else {
        BinaryName::from_string(String::from(name)).map_err(Error::BadName)
    }
}

/// Parse a field or method name (`<init>` and `<clinit>` are accepted too)
pub fn parse_member_name(name: &str) -> Result<UnqualifiedName, Error> {
    match name {
        "<init>" => Ok(UnqualifiedName::INIT),
        "<clinit>" => Ok(UnqualifiedName::CLINIT),
        _ => UnqualifiedName::from_string(String::from(name)).map_err(Error::BadName),
    }
}

pub fn parse_method_descriptor(descriptor: &str) -> Result<MethodDescriptor<BinaryName>, Error> {
    MethodDescriptor::parse(descriptor)
        .map_err(|err| Error::BadDescriptor(format!("{}: {}", descriptor, err)))
}

/// In-memory program: a set of class definitions keyed by name
#[derive(Debug, Clone, Default)]
pub struct ProgramSource {
    classes: HashMap<BinaryName, ClassDefinition>,
}

impl ProgramSource {
    /// Empty program, without even the library classes
    pub fn empty() -> ProgramSource {
        ProgramSource::default()
    }

    /// Program containing only the built-in library classes
    pub fn with_java_library() -> Result<ProgramSource, Error> {
        let mut source = ProgramSource::empty();
        for class in super::java_library::java_library_classes()? {
            source.add_class(class)?;
        }
        Ok(source)
    }

    /// Add a class definition, rejecting redefinitions
    pub fn add_class(&mut self, class: ClassDefinition) -> Result<(), Error> {
        if self.classes.contains_key(&class.name) {
            return Err(Error::DuplicateClass(class.name));
        }
        self.classes.insert(class.name.clone(), class);
        Ok(())
    }

    pub fn contains(&self, name: &BinaryName) -> bool {
        self.classes.contains_key(name)
    }
}

impl ClassSource for ProgramSource {
    fn load(&self, name: &BinaryName) -> Option<ClassDefinition> {
        self.classes.get(name).cloned()
    }
}
