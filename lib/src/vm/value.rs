use crate::jvm::{BaseType, BinaryName, FieldType};
use std::fmt;
use std::rc::Rc;

/// Reference to a heap object
///
/// References are dense indices into the heap. In slots they are stored as `index + 1`, so that
/// a zeroed slot is `null` and `null` never resolves to an object.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct ObjRef(pub u32);

impl ObjRef {
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Encode a nullable reference into a slot word
    pub fn to_word(reference: Option<ObjRef>) -> i32 {
        match reference {
            None => 0,
            Some(ObjRef(idx)) => idx as i32 + 1,
        }
    }

    /// Decode a slot word into a nullable reference
    pub fn from_word(word: i32) -> Option<ObjRef> {
        if word <= 0 {
            None
        } else {
            Some(ObjRef(word as u32 - 1))
        }
    }
}

impl fmt::Display for ObjRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Typed value, as handed to and returned from natives
#[derive(Copy, Clone, PartialEq, Debug)]
pub enum Value {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Ref(Option<ObjRef>),
}

impl Value {
    /// Default (zero) value for a given type
    pub fn zero(field_type: &FieldType<BinaryName>) -> Value {
        match field_type {
            FieldType::Base(BaseType::Long) => Value::Long(0),
            FieldType::Base(BaseType::Float) => Value::Float(0.0),
            FieldType::Base(BaseType::Double) => Value::Double(0.0),
            FieldType::Base(_) => Value::Int(0),
            FieldType::Ref(_) => Value::Ref(None),
        }
    }

    pub fn as_int(self) -> Option<i32> {
        match self {
            Value::Int(i) => Some(i),
            _ => None,
        }
    }

    pub fn as_long(self) -> Option<i64> {
        match self {
            Value::Long(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_ref(self) -> Option<Option<ObjRef>> {
        match self {
            Value::Ref(r) => Some(r),
            _ => None,
        }
    }
}

/// Diagnostic attribute attached to a slot
///
/// Attributes are carried along with values but never take part in state matching.
pub type Attr = Rc<str>;

/// Vector of 32-bit words, each tagged with whether it holds a reference
///
/// This is the storage for object fields, array elements, statics, locals, and operand stacks.
/// `long` and `double` values take two consecutive words (high word first).
#[derive(Clone, Debug, Default)]
pub struct SlotVec {
    words: Vec<i32>,
    refs: Vec<bool>,

    /// Lazily allocated diagnostic attributes (parallel to `words`)
    attrs: Option<Vec<Option<Attr>>>,
}

impl PartialEq for SlotVec {
    fn eq(&self, other: &SlotVec) -> bool {
        self.words == other.words && self.refs == other.refs
    }
}

impl Eq for SlotVec {}

impl SlotVec {
    pub fn new() -> SlotVec {
        SlotVec::default()
    }

    /// Zeroed slots (all `0`/`null`)
    pub fn zeroed(len: usize) -> SlotVec {
        SlotVec {
            words: vec![0; len],
            refs: vec![false; len],
            attrs: None,
        }
    }

    /// Zeroed slots laid out for the given types, with reference slots tagged
    pub fn for_types<'a>(types: impl Iterator<Item = &'a FieldType<BinaryName>>) -> SlotVec {
        let mut slots = SlotVec::new();
        for field_type in types {
            slots.push_value(Value::zero(field_type));
        }
        slots
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn word(&self, idx: usize) -> Option<i32> {
        self.words.get(idx).copied()
    }

    pub fn is_ref(&self, idx: usize) -> bool {
        self.refs.get(idx).copied().unwrap_or(false)
    }

    pub fn words(&self) -> &[i32] {
        &self.words
    }

    pub fn ref_tags(&self) -> &[bool] {
        &self.refs
    }

    pub fn set_word(&mut self, idx: usize, word: i32, is_ref: bool) {
        self.words[idx] = word;
        self.refs[idx] = is_ref;
        if let Some(attrs) = self.attrs.as_mut() {
            attrs[idx] = None;
        }
    }

    pub fn attr(&self, idx: usize) -> Option<&Attr> {
        self.attrs.as_ref().and_then(|attrs| attrs.get(idx)).and_then(Option::as_ref)
    }

    pub fn set_attr(&mut self, idx: usize, attr: Option<Attr>) {
        let len = self.words.len();
        let attrs = self.attrs.get_or_insert_with(|| vec![None; len]);
        attrs[idx] = attr;
    }

    /// References held in reference-tagged slots
    pub fn references(&self) -> impl Iterator<Item = ObjRef> + '_ {
        self.words
            .iter()
            .zip(&self.refs)
            .filter(|(_, is_ref)| **is_ref)
            .filter_map(|(word, _)| ObjRef::from_word(*word))
    }

    pub fn get_int(&self, idx: usize) -> i32 {
        self.words[idx]
    }

    pub fn set_int(&mut self, idx: usize, value: i32) {
        self.set_word(idx, value, false);
    }

    pub fn get_long(&self, idx: usize) -> i64 {
        ((self.words[idx] as i64) << 32) | (self.words[idx + 1] as u32 as i64)
    }

    pub fn set_long(&mut self, idx: usize, value: i64) {
        self.set_word(idx, (value >> 32) as i32, false);
        self.set_word(idx + 1, value as i32, false);
    }

    pub fn get_ref(&self, idx: usize) -> Option<ObjRef> {
        ObjRef::from_word(self.words[idx])
    }

    pub fn set_ref(&mut self, idx: usize, value: Option<ObjRef>) {
        self.set_word(idx, ObjRef::to_word(value), true);
    }

    /// Read a typed value starting at a slot
    pub fn get_value(&self, idx: usize, field_type: &FieldType<BinaryName>) -> Value {
        match field_type {
            FieldType::Base(BaseType::Long) => Value::Long(self.get_long(idx)),
            FieldType::Base(BaseType::Double) => Value::Double(f64::from_bits(self.get_long(idx) as u64)),
            FieldType::Base(BaseType::Float) => Value::Float(f32::from_bits(self.words[idx] as u32)),
            FieldType::Base(_) => Value::Int(self.words[idx]),
            FieldType::Ref(_) => Value::Ref(self.get_ref(idx)),
        }
    }

    /// Write a typed value starting at a slot
    pub fn set_value(&mut self, idx: usize, value: Value) {
        match value {
            Value::Int(i) => self.set_int(idx, i),
            Value::Long(l) => self.set_long(idx, l),
            Value::Float(f) => self.set_int(idx, f.to_bits() as i32),
            Value::Double(d) => self.set_long(idx, d.to_bits() as i64),
            Value::Ref(r) => self.set_ref(idx, r),
        }
    }

    pub fn push_word(&mut self, word: i32, is_ref: bool) {
        self.words.push(word);
        self.refs.push(is_ref);
        if let Some(attrs) = self.attrs.as_mut() {
            attrs.push(None);
        }
    }

    pub fn pop_word(&mut self) -> Option<(i32, bool)> {
        if let Some(attrs) = self.attrs.as_mut() {
            attrs.pop();
        }
        Some((self.words.pop()?, self.refs.pop()?))
    }

    /// Push a typed value (taking one or two slots)
    pub fn push_value(&mut self, value: Value) {
        match value {
            Value::Int(i) => self.push_word(i, false),
            Value::Float(f) => self.push_word(f.to_bits() as i32, false),
            Value::Long(l) => {
                self.push_word((l >> 32) as i32, false);
                self.push_word(l as i32, false);
            }
            Value::Double(d) => {
                let bits = d.to_bits() as i64;
                self.push_word((bits >> 32) as i32, false);
                self.push_word(bits as i32, false);
            }
            Value::Ref(r) => self.push_word(ObjRef::to_word(r), true),
        }
    }

    pub fn truncate(&mut self, len: usize) {
        self.words.truncate(len);
        self.refs.truncate(len);
        if let Some(attrs) = self.attrs.as_mut() {
            attrs.truncate(len);
        }
    }

    pub fn clear(&mut self) {
        self.truncate(0);
    }
}
