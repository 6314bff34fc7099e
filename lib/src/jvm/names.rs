use std::borrow::Cow;
use std::fmt::{Debug, Display, Error as FmtError, Formatter};

/// Names of methods, fields
///
/// See <https://docs.oracle.com/javase/specs/jvms/se16/html/jvms-4.html#jvms-4.2.2>
#[derive(Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct UnqualifiedName(Cow<'static, str>);

/// Names of classes and interfaces
///
/// Array classes are also named by this type, using their descriptor (eg. `[I` or
/// `[Ljava/lang/String;`). Those names can only be built with [`BinaryName::array_of`].
///
/// See <https://docs.oracle.com/javase/specs/jvms/se16/html/jvms-4.html#jvms-4.2.1>
#[derive(Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct BinaryName(Cow<'static, str>);

/// Extracts the raw underlying string name
impl AsRef<str> for UnqualifiedName {
    fn as_ref(&self) -> &str {
        self.0.as_ref()
    }
}

/// Extracts the raw underlying string name
impl AsRef<str> for BinaryName {
    fn as_ref(&self) -> &str {
        self.0.as_ref()
    }
}

pub trait Name: Sized {
    /// Check if a string would be a valid name
    fn check_valid(name: impl AsRef<str>) -> Result<(), String>;

    /// Extact the raw underlying string data:
    fn as_cow(&self) -> &Cow<'static, str>;

    /// Extact the raw underlying string name
    fn as_str(&self) -> &str {
        self.as_cow().as_ref()
    }

    /// Try to construct a name from a string
    fn from_string(name: String) -> Result<Self, String>;

    /// Try to construct a name from a static string
    fn from_static(name: &'static str) -> Result<Self, String>;
}

impl Name for UnqualifiedName {
    fn check_valid(name: impl AsRef<str>) -> Result<(), String> {
        let name = name.as_ref();
        if name.contains(&['.', ';', '[', '/'][..]) {
            Err(format!(
                "Unqualified name '{}' contains an illegal character",
                name
            ))
        } else if name.is_empty() {
            Err(format!("Unqualified name '{}' is empty", name))
        } else {
            Ok(())
        }
    }

    fn as_cow(&self) -> &Cow<'static, str> {
        &self.0
    }

    fn from_string(name: String) -> Result<Self, String> {
        Self::check_valid(&name)?;
        Ok(UnqualifiedName(Cow::Owned(name)))
    }

    fn from_static(name: &'static str) -> Result<Self, String> {
        Self::check_valid(name)?;
        Ok(UnqualifiedName(Cow::Borrowed(name)))
    }
}

impl Name for BinaryName {
    fn check_valid(name: impl AsRef<str>) -> Result<(), String> {
        let name = name.as_ref();
        if name.is_empty() {
            Err(format!("Binary name '{}' is empty", name))
        } else {
            name.split('/').map(UnqualifiedName::check_valid).collect()
        }
    }

    fn as_cow(&self) -> &Cow<'static, str> {
        &self.0
    }

    fn from_string(name: String) -> Result<Self, String> {
        Self::check_valid(&name)?;
        Ok(BinaryName(Cow::Owned(name)))
    }

    fn from_static(name: &'static str) -> Result<Self, String> {
        Self::check_valid(name)?;
        Ok(BinaryName(Cow::Borrowed(name)))
    }
}

impl Debug for UnqualifiedName {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        f.write_str(self.0.as_ref())
    }
}
impl Debug for BinaryName {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        f.write_str(self.0.as_ref())
    }
}
impl Display for UnqualifiedName {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        f.write_str(self.0.as_ref())
    }
}
impl Display for BinaryName {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        f.write_str(self.0.as_ref())
    }
}

impl UnqualifiedName {
    const fn name(value: &'static str) -> UnqualifiedName {
        UnqualifiedName(Cow::Borrowed(value))
    }

    // Special unqualified names - only these are allowed to have angle brackets in them
    pub const INIT: Self = Self::name("<init>");
    pub const CLINIT: Self = Self::name("<clinit>");

    // Library method names
    pub const BEGINATOMIC: Self = Self::name("beginAtomic");
    pub const CURRENTTHREAD: Self = Self::name("currentThread");
    pub const ENDATOMIC: Self = Self::name("endAtomic");
    pub const GC: Self = Self::name("gc");
    pub const GET: Self = Self::name("get");
    pub const GETBOOLEAN: Self = Self::name("getBoolean");
    pub const GETINT: Self = Self::name("getInt");
    pub const GETMESSAGE: Self = Self::name("getMessage");
    pub const HASHCODE: Self = Self::name("hashCode");
    pub const IGNOREIF: Self = Self::name("ignoreIf");
    pub const INTERRUPT: Self = Self::name("interrupt");
    pub const ISALIVE: Self = Self::name("isAlive");
    pub const ISINTERRUPTED: Self = Self::name("isInterrupted");
    pub const JOIN: Self = Self::name("join");
    pub const LENGTH: Self = Self::name("length");
    pub const MAIN: Self = Self::name("main");
    pub const NOTIFY: Self = Self::name("notify");
    pub const NOTIFYALL: Self = Self::name("notifyAll");
    pub const RUN: Self = Self::name("run");
    pub const SLEEP: Self = Self::name("sleep");
    pub const START: Self = Self::name("start");
    pub const WAIT: Self = Self::name("wait");
    pub const YIELD: Self = Self::name("yield");

    // Library field names
    pub const DETAILMESSAGE: Self = Self::name("detailMessage");
    pub const REFERENT: Self = Self::name("referent");
    pub const TARGET: Self = Self::name("target");
    pub const VALUE: Self = Self::name("value");
}

impl BinaryName {
    /// Join segments from the other name onto the end of this binary name
    pub fn join(&self, other: impl Name) -> BinaryName {
        BinaryName(Cow::Owned(format!("{}/{}", self.as_str(), other.as_str())))
    }

    /// Name of the array class whose elements have the given rendered descriptor
    ///
    /// `BinaryName::array_of("I")` is `[I` and `BinaryName::array_of("Ljava/lang/Object;")` is
    /// `[Ljava/lang/Object;`.
    pub fn array_of(element_descriptor: &str) -> BinaryName {
        BinaryName(Cow::Owned(format!("[{}", element_descriptor)))
    }

    /// Is this the name of an array class?
    pub fn is_array(&self) -> bool {
        self.0.starts_with('[')
    }

    const fn name(value: &'static str) -> BinaryName {
        BinaryName(Cow::Borrowed(value))
    }

    // Library classes
    pub const CLASS: Self = Self::name("java/lang/Class");
    pub const CLONEABLE: Self = Self::name("java/lang/Cloneable");
    pub const OBJECT: Self = Self::name("java/lang/Object");
    pub const RUNNABLE: Self = Self::name("java/lang/Runnable");
    pub const SERIALIZABLE: Self = Self::name("java/io/Serializable");
    pub const STRING: Self = Self::name("java/lang/String");
    pub const SYSTEM: Self = Self::name("java/lang/System");
    pub const THREAD: Self = Self::name("java/lang/Thread");
    pub const VERIFY: Self = Self::name("jvmc/Verify");
    pub const WEAKREFERENCE: Self = Self::name("java/lang/ref/WeakReference");

    // Throwables
    pub const ABSTRACTMETHODERROR: Self = Self::name("java/lang/AbstractMethodError");
    pub const ARITHMETICEXCEPTION: Self = Self::name("java/lang/ArithmeticException");
    pub const ARRAYINDEXOUTOFBOUNDSEXCEPTION: Self =
        Self::name("java/lang/ArrayIndexOutOfBoundsException");
    pub const ASSERTIONERROR: Self = Self::name("java/lang/AssertionError");
    pub const CLASSCASTEXCEPTION: Self = Self::name("java/lang/ClassCastException");
    pub const ERROR: Self = Self::name("java/lang/Error");
    pub const EXCEPTION: Self = Self::name("java/lang/Exception");
    pub const EXCEPTIONININITIALIZERERROR: Self =
        Self::name("java/lang/ExceptionInInitializerError");
    pub const ILLEGALMONITORSTATEEXCEPTION: Self =
        Self::name("java/lang/IllegalMonitorStateException");
    pub const ILLEGALTHREADSTATEEXCEPTION: Self =
        Self::name("java/lang/IllegalThreadStateException");
    pub const INCOMPATIBLECLASSCHANGEERROR: Self =
        Self::name("java/lang/IncompatibleClassChangeError");
    pub const INTERRUPTEDEXCEPTION: Self = Self::name("java/lang/InterruptedException");
    pub const LINKAGEERROR: Self = Self::name("java/lang/LinkageError");
    pub const NEGATIVEARRAYSIZEEXCEPTION: Self =
        Self::name("java/lang/NegativeArraySizeException");
    pub const NOCLASSDEFFOUNDERROR: Self = Self::name("java/lang/NoClassDefFoundError");
    pub const NOSUCHFIELDERROR: Self = Self::name("java/lang/NoSuchFieldError");
    pub const NOSUCHMETHODERROR: Self = Self::name("java/lang/NoSuchMethodError");
    pub const NULLPOINTEREXCEPTION: Self = Self::name("java/lang/NullPointerException");
    pub const RUNTIMEEXCEPTION: Self = Self::name("java/lang/RuntimeException");
    pub const THROWABLE: Self = Self::name("java/lang/Throwable");
    pub const UNSATISFIEDLINKERROR: Self = Self::name("java/lang/UnsatisfiedLinkError");
}
