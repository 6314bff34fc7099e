use super::{ArrayComponent, ClassDatabase, ClassId};
use crate::jvm::BinaryName;
use std::collections::HashSet;

impl ClassDatabase {
    /// Is a value whose runtime class is `sub_type` assignable to `super_type`?
    ///
    /// This is what `checkcast`, `instanceof`, `aastore`, and exception handler matching use.
    pub fn is_assignable(&self, sub_type: ClassId, super_type: ClassId) -> bool {
        if sub_type == super_type {
            return true;
        }
        let sub_data = self.class(sub_type);
        let super_data = self.class(super_type);

        match (sub_data.component, super_data.component) {
            // Special superclass and interfaces of all arrays
            (Some(_), None) => is_array_super_type(&super_data.name),

            (Some(ArrayComponent::Primitive(elem1)), Some(ArrayComponent::Primitive(elem2))) => {
                elem1 == elem2
            }

            // Cursed (unsound) covariance of arrays
            (Some(ArrayComponent::Reference(elem1)), Some(ArrayComponent::Reference(elem2))) => {
                self.is_assignable(elem1, elem2)
            }

            (None, None) => self.has_super_type(sub_type, super_type),

            _ => false,
        }
    }

    /// Traversal of super type edges
    fn has_super_type(&self, sub_type: ClassId, super_type: ClassId) -> bool {
        let mut supertypes_to_visit: Vec<ClassId> = vec![sub_type];
        let mut dont_revisit: HashSet<ClassId> = HashSet::new();
        dont_revisit.insert(sub_type);

        // Optimization: if the super type is a class, then skip visiting interfaces
        let super_is_class: bool = !self.class(super_type).is_interface();

        while let Some(class_id) = supertypes_to_visit.pop() {
            if class_id == super_type {
                return true;
            }
            let class_data = self.class(class_id);

            if let Some(superclass) = class_data.superclass {
                if dont_revisit.insert(superclass) {
                    supertypes_to_visit.push(superclass);
                }
            }
            if !super_is_class {
                for interface in &class_data.interfaces {
                    if dont_revisit.insert(*interface) {
                        supertypes_to_visit.push(*interface);
                    }
                }
            }
        }

        false
    }
}

/// Arrays have a small, finite set of super types
fn is_array_super_type(super_type: &BinaryName) -> bool {
    super_type == &BinaryName::OBJECT
        || super_type == &BinaryName::CLONEABLE
        || super_type == &BinaryName::SERIALIZABLE
}
