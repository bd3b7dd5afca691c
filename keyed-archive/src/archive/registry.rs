/*!
 Maps archived class names to the delegates that decode and encode them.

 A delegate is either:

 - [`IncrementalClass`]: allocates an empty shell, which is cached before its fields are decoded.
   Fields may point back at the object being decoded, so these classes support reference cycles.
 - [`AtomicClass`]: builds a finished value in one step. A field that points back at the object
   being built is an [`ArchiveError::CircularReference`].
*/

use std::{
    collections::HashMap,
    fmt::{Debug, Formatter, Result as FmtResult},
    marker::PhantomData,
    sync::{Arc, Mutex, PoisonError},
};

use tracing::debug;

use crate::{
    archive::{
        archiver::ArchivingObject,
        foundation,
        models::{ArchiveObject, ClassChain, UnknownClasses, Value},
        opaque::{OpaqueClass, OpaqueDelegate},
        unarchiver::ArchivedObject,
    },
    error::archive::ArchiveError,
};

/// A class whose instances are built in one step
pub trait AtomicClass: Send + Sync {
    /// Build a finished value from the archived fields
    fn decode(
        &self,
        classes: &ClassChain,
        object: &mut ArchivedObject<'_, '_>,
    ) -> Result<Value, ArchiveError>;

    /// Write the fields of `value`
    fn encode(&self, value: &Value, object: &mut ArchivingObject<'_, '_>)
        -> Result<(), ArchiveError>;
}

/// A class whose instances are allocated first and filled afterwards
pub trait IncrementalClass: Send + Sync {
    /// Create an empty instance; it is handed out to any field that references it while it is filled
    fn allocate(&self, classes: &ClassChain) -> Value;

    /// Decode the archived fields into `shell`
    fn fill(&self, shell: &Value, object: &mut ArchivedObject<'_, '_>) -> Result<(), ArchiveError>;

    /// Write the fields of `value`
    fn encode(&self, value: &Value, object: &mut ArchivingObject<'_, '_>)
        -> Result<(), ArchiveError>;
}

/// The decode and encode logic for one archived class
#[derive(Clone)]
pub enum Delegate {
    Atomic(Arc<dyn AtomicClass>),
    Incremental(Arc<dyn IncrementalClass>),
}

impl Delegate {
    pub fn atomic<T: AtomicClass + 'static>(class: T) -> Self {
        Self::Atomic(Arc::new(class))
    }

    pub fn incremental<T: IncrementalClass + 'static>(class: T) -> Self {
        Self::Incremental(Arc::new(class))
    }

    pub(crate) fn encode(
        &self,
        value: &Value,
        object: &mut ArchivingObject<'_, '_>,
    ) -> Result<(), ArchiveError> {
        match self {
            Delegate::Atomic(class) => class.encode(value, object),
            Delegate::Incremental(class) => class.encode(value, object),
        }
    }
}

impl Debug for Delegate {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Delegate::Atomic(_) => write!(fmt, "Delegate::Atomic"),
            Delegate::Incremental(_) => write!(fmt, "Delegate::Incremental"),
        }
    }
}

/// Native types that are decoded by filling a default instance field by field
pub trait Archive: ArchiveObject + Default {
    /// Read this object's fields from the archive
    fn decode_archive(&mut self, object: &mut ArchivedObject<'_, '_>) -> Result<(), ArchiveError>;

    /// Write this object's fields to the archive
    fn encode_archive(&self, object: &mut ArchivingObject<'_, '_>) -> Result<(), ArchiveError>;
}

/// Adapts a type implementing [`Archive`] into an [`IncrementalClass`]
pub struct NativeClass<T> {
    marker: PhantomData<fn() -> T>,
}

impl<T> Default for NativeClass<T> {
    fn default() -> Self {
        Self {
            marker: PhantomData,
        }
    }
}

impl<T: Archive> IncrementalClass for NativeClass<T> {
    fn allocate(&self, _classes: &ClassChain) -> Value {
        Value::object(T::default())
    }

    fn fill(&self, shell: &Value, object: &mut ArchivedObject<'_, '_>) -> Result<(), ArchiveError> {
        let mut native = shell
            .downcast_mut::<T>()
            .ok_or(ArchiveError::ObjectUnavailable("filling a native object"))?;
        native.decode_archive(object)
    }

    fn encode(
        &self,
        value: &Value,
        object: &mut ArchivingObject<'_, '_>,
    ) -> Result<(), ArchiveError> {
        let native = value
            .downcast_ref::<T>()
            .ok_or(ArchiveError::ObjectUnavailable("encoding a native object"))?;
        native.encode_archive(object)
    }
}

/// Caller-owned configuration mapping class chains to delegates
pub struct ClassRegistry {
    classes: HashMap<ClassChain, Delegate>,
    /// Classes synthesized for unknown class names, keyed by most-derived name
    opaque: Mutex<HashMap<String, Arc<OpaqueClass>>>,
}

impl ClassRegistry {
    /// A registry with the Foundation collection, data, string, and date classes registered
    pub fn new() -> Self {
        let mut registry = Self::empty();
        foundation::register(&mut registry);
        registry
    }

    /// A registry with nothing registered
    pub fn empty() -> Self {
        Self {
            classes: HashMap::new(),
            opaque: Mutex::new(HashMap::new()),
        }
    }

    /// Register a delegate for a class chain, returning the delegate it replaces.
    ///
    /// A single-name chain matches any archived chain with that most-derived name.
    pub fn register(
        &mut self,
        classes: impl Into<ClassChain>,
        delegate: Delegate,
    ) -> Option<Delegate> {
        self.classes.insert(classes.into(), delegate)
    }

    /// Register a native type implementing [`Archive`]
    pub fn register_native<T: Archive>(&mut self, classes: impl Into<ClassChain>) -> Option<Delegate> {
        self.register(classes, Delegate::incremental(NativeClass::<T>::default()))
    }

    /// Find the delegate for a class chain: an exact match on the full chain first, then a
    /// single-name registration of the most-derived class
    pub fn resolve(&self, classes: &ClassChain) -> Option<&Delegate> {
        self.classes
            .get(classes)
            .or_else(|| self.classes.get(&classes.head()))
    }

    /// Resolve a class chain, synthesizing an opaque class if allowed
    pub(crate) fn resolve_or_opaque(
        &self,
        classes: &ClassChain,
        unknown: UnknownClasses,
    ) -> Result<Delegate, ArchiveError> {
        if let Some(delegate) = self.resolve(classes) {
            return Ok(delegate.clone());
        }
        match unknown {
            UnknownClasses::Reject => Err(ArchiveError::MissingClassMapping(classes.clone().into())),
            UnknownClasses::Opaque => Ok(Delegate::incremental(OpaqueDelegate::new(
                self.opaque_class(classes.clone()),
            ))),
        }
    }

    /// Get the opaque class synthesized for the most-derived name in `classes`, creating it on first use.
    ///
    /// Later chains with the same most-derived name share the class created first.
    pub fn opaque_class(&self, classes: impl Into<ClassChain>) -> Arc<OpaqueClass> {
        let classes = classes.into();
        let mut cache = self.opaque.lock().unwrap_or_else(PoisonError::into_inner);
        cache
            .entry(classes.name().to_string())
            .or_insert_with(|| {
                debug!(class = %classes, "synthesizing opaque class");
                Arc::new(OpaqueClass::new(classes.clone()))
            })
            .clone()
    }

    /// Number of registered class chains
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

impl Default for ClassRegistry {
    /// The default registry is [`ClassRegistry::new()`], with the Foundation classes registered
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for ClassRegistry {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        let mut names: Vec<String> = self.classes.keys().map(ToString::to_string).collect();
        names.sort();
        fmt.debug_struct("ClassRegistry")
            .field("classes", &names)
            .finish()
    }
}
