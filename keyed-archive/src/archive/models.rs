/*!
 Native data structures produced by the unarchiver and consumed by the archiver.

 Scalars are plain values. Collections and class instances are [`Shared`] nodes: reference-counted
 handles whose identity is preserved through an archive round trip, so a node reachable from two
 places (or from itself) decodes back into a single node.
*/

use std::{
    any::Any,
    cell::{Ref, RefCell, RefMut},
    collections::HashSet,
    fmt::{Debug, Display, Formatter, Result as FmtResult},
    rc::Rc,
};

use indexmap::IndexMap;

use crate::{archive::opaque::OpaqueObject, util::dates::Timestamp};

/// A native dictionary; insertion order is kept but ignored when comparing
pub type Map = IndexMap<Key, Value>;

/// Whether a collection maps to the mutable or immutable variant of its Cocoa class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mutability {
    /// `NSMutableArray`, `NSMutableData`, etc. These can be the target of a reference cycle.
    Mutable,
    /// `NSArray`, `NSData`, etc. These are built in one step, so they cannot be part of a cycle.
    Immutable,
}

struct Node<T> {
    mutability: Mutability,
    cell: RefCell<T>,
}

/// A reference-counted node in an object graph
pub struct Shared<T> {
    inner: Rc<Node<T>>,
}

impl<T> Shared<T> {
    pub fn new(value: T, mutability: Mutability) -> Self {
        Self {
            inner: Rc::new(Node {
                mutability,
                cell: RefCell::new(value),
            }),
        }
    }

    pub fn mutable(value: T) -> Self {
        Self::new(value, Mutability::Mutable)
    }

    pub fn immutable(value: T) -> Self {
        Self::new(value, Mutability::Immutable)
    }

    pub fn mutability(&self) -> Mutability {
        self.inner.mutability
    }

    pub fn is_mutable(&self) -> bool {
        self.inner.mutability == Mutability::Mutable
    }

    /// Borrow the contents of the node
    ///
    /// # Panics
    ///
    /// Panics if the node is currently mutably borrowed, i.e. while it is being filled by the unarchiver.
    pub fn borrow(&self) -> Ref<'_, T> {
        self.inner.cell.borrow()
    }

    pub fn try_borrow(&self) -> Option<Ref<'_, T>> {
        self.inner.cell.try_borrow().ok()
    }

    /// Mutably borrow the contents of the node. The mutability tag only decides the Cocoa class
    /// a node is archived as; it does not restrict Rust-side access.
    pub fn borrow_mut(&self) -> RefMut<'_, T> {
        self.inner.cell.borrow_mut()
    }

    pub fn try_borrow_mut(&self) -> Option<RefMut<'_, T>> {
        self.inner.cell.try_borrow_mut().ok()
    }

    /// Whether both handles point at the same node
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// A key unique to this node for as long as it is alive
    pub fn id(&self) -> usize {
        Rc::as_ptr(&self.inner) as *const () as usize
    }
}

impl<T> Clone for Shared<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

thread_local! {
    /// Nodes currently being formatted, so cyclic graphs print instead of overflowing the stack
    static FORMATTING: RefCell<HashSet<usize>> = RefCell::new(HashSet::new());
}

impl<T: Debug> Debug for Shared<T> {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        let id = self.id();
        if !FORMATTING.with(|seen| seen.borrow_mut().insert(id)) {
            return write!(fmt, "<cycle {id:#x}>");
        }
        let result = match self.try_borrow() {
            Some(value) => fmt
                .debug_tuple(match self.mutability() {
                    Mutability::Mutable => "Mutable",
                    Mutability::Immutable => "Immutable",
                })
                .field(&*value)
                .finish(),
            None => write!(fmt, "<borrowed {id:#x}>"),
        };
        FORMATTING.with(|seen| seen.borrow_mut().remove(&id));
        result
    }
}

/// The chain of class names for an archived object, most-derived first, for example
/// `["NSMutableArray", "NSArray", "NSObject"]`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClassChain(Vec<String>);

impl ClassChain {
    pub fn new(names: Vec<String>) -> Self {
        Self(names)
    }

    /// The most-derived class name
    pub fn name(&self) -> &str {
        self.0.first().map(String::as_str).unwrap_or_default()
    }

    pub fn names(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// A chain containing only the most-derived class name
    pub(crate) fn head(&self) -> Self {
        Self(self.0.iter().take(1).cloned().collect())
    }
}

impl<const N: usize> From<[&str; N]> for ClassChain {
    fn from(names: [&str; N]) -> Self {
        Self(names.iter().map(|name| name.to_string()).collect())
    }
}

impl From<&[&str]> for ClassChain {
    fn from(names: &[&str]) -> Self {
        Self(names.iter().map(|name| name.to_string()).collect())
    }
}

impl From<Vec<String>> for ClassChain {
    fn from(names: Vec<String>) -> Self {
        Self(names)
    }
}

impl From<ClassChain> for Vec<String> {
    fn from(chain: ClassChain) -> Self {
        chain.0
    }
}

impl Display for ClassChain {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        write!(fmt, "{}", self.0.join(" : "))
    }
}

/// Values that can be used as keys in a native [`Map`]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    String(String),
    Integer(i64),
    Bool(bool),
}

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Key::String(value.to_string())
    }
}

impl From<String> for Key {
    fn from(value: String) -> Self {
        Key::String(value)
    }
}

impl From<i64> for Key {
    fn from(value: i64) -> Self {
        Key::Integer(value)
    }
}

impl From<&Key> for Value {
    fn from(key: &Key) -> Self {
        match key {
            Key::String(string) => Value::String(string.clone()),
            Key::Integer(int) => Value::Integer(*int),
            Key::Bool(b) => Value::Bool(*b),
        }
    }
}

/// A native type that can be stored in an object graph as an instance of an archived class
pub trait ArchiveObject: Any + Debug {
    /// The class chain this object is archived as
    fn classes(&self) -> ClassChain;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;

    /// Structural equality with another object of unknown type. Objects that do not
    /// override this are only equal to themselves.
    fn eq_object(&self, _other: &dyn ArchiveObject) -> bool {
        false
    }
}

/// An instance of an archived class
pub type Object = Box<dyn ArchiveObject>;

/// Native representation of anything stored in a keyed archive
#[derive(Debug, Clone, Default)]
pub enum Value {
    /// `nil`, `$null`, or an absent field
    #[default]
    Null,
    Bool(bool),
    Integer(i64),
    Real(f64),
    String(String),
    /// `NSDate` or a date stored directly in the object table
    Date(Timestamp),
    /// `NSData` or `NSMutableData`
    Data(Shared<Vec<u8>>),
    /// `NSArray` or `NSMutableArray`
    Array(Shared<Vec<Value>>),
    /// `NSSet` or `NSMutableSet`; members are not deduplicated
    Set(Shared<Vec<Value>>),
    /// `NSDictionary` or `NSMutableDictionary`
    Dictionary(Shared<Map>),
    /// An instance of a registered class or an [`OpaqueObject`]
    Object(Shared<Object>),
}

impl Value {
    /// Wrap a native object in a new node
    pub fn object<T: ArchiveObject>(object: T) -> Self {
        Value::Object(Shared::mutable(Box::new(object)))
    }

    pub fn array(items: Vec<Value>, mutability: Mutability) -> Self {
        Value::Array(Shared::new(items, mutability))
    }

    pub fn set(items: Vec<Value>, mutability: Mutability) -> Self {
        Value::Set(Shared::new(items, mutability))
    }

    pub fn dictionary(map: Map, mutability: Mutability) -> Self {
        Value::Dictionary(Shared::new(map, mutability))
    }

    pub fn data(bytes: Vec<u8>, mutability: Mutability) -> Self {
        Value::Data(Shared::new(bytes, mutability))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The mutability tag of a collection or object node; scalars have none
    pub fn mutability(&self) -> Option<Mutability> {
        match self {
            Value::Data(node) => Some(node.mutability()),
            Value::Array(node) | Value::Set(node) => Some(node.mutability()),
            Value::Dictionary(node) => Some(node.mutability()),
            Value::Object(node) => Some(node.mutability()),
            _ => None,
        }
    }

    /// Identity of the node behind this value; scalars have none
    pub fn id(&self) -> Option<usize> {
        match self {
            Value::Data(node) => Some(node.id()),
            Value::Array(node) | Value::Set(node) => Some(node.id()),
            Value::Dictionary(node) => Some(node.id()),
            Value::Object(node) => Some(node.id()),
            _ => None,
        }
    }

    /// Whether both values are the same node
    pub fn same_node(&self, other: &Value) -> bool {
        match (self.id(), other.id()) {
            (Some(lhs), Some(rhs)) => lhs == rhs,
            _ => false,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(string) => Some(string),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(int) => Some(*int),
            _ => None,
        }
    }

    pub fn as_real(&self) -> Option<f64> {
        match self {
            Value::Real(real) => Some(*real),
            Value::Integer(int) => Some(*int as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<Timestamp> {
        match self {
            Value::Date(stamp) => Some(*stamp),
            _ => None,
        }
    }

    /// Borrow the object behind this value as a concrete native type
    pub fn downcast_ref<T: ArchiveObject>(&self) -> Option<Ref<'_, T>> {
        match self {
            Value::Object(node) => {
                Ref::filter_map(node.try_borrow()?, |obj| obj.as_any().downcast_ref::<T>()).ok()
            }
            _ => None,
        }
    }

    /// Mutably borrow the object behind this value as a concrete native type
    pub fn downcast_mut<T: ArchiveObject>(&self) -> Option<RefMut<'_, T>> {
        match self {
            Value::Object(node) => RefMut::filter_map(node.try_borrow_mut()?, |obj| {
                obj.as_any_mut().downcast_mut::<T>()
            })
            .ok(),
            _ => None,
        }
    }

    /// Structural comparison that terminates on cyclic graphs: a pair of nodes that is
    /// already being compared further up the stack is assumed to be equal.
    fn eq_graph(&self, other: &Value, seen: &mut HashSet<(usize, usize)>) -> bool {
        if let (Some(lhs), Some(rhs)) = (self.id(), other.id()) {
            if lhs == rhs || !seen.insert((lhs, rhs)) {
                return true;
            }
        }

        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(lhs), Value::Bool(rhs)) => lhs == rhs,
            (Value::Integer(lhs), Value::Integer(rhs)) => lhs == rhs,
            (Value::Real(lhs), Value::Real(rhs)) => lhs == rhs,
            (Value::String(lhs), Value::String(rhs)) => lhs == rhs,
            (Value::Date(lhs), Value::Date(rhs)) => lhs == rhs,
            (Value::Data(lhs), Value::Data(rhs)) => match (lhs.try_borrow(), rhs.try_borrow()) {
                (Some(lhs), Some(rhs)) => *lhs == *rhs,
                _ => false,
            },
            (Value::Array(lhs), Value::Array(rhs)) => match (lhs.try_borrow(), rhs.try_borrow()) {
                (Some(lhs), Some(rhs)) => {
                    lhs.len() == rhs.len()
                        && lhs.iter().zip(rhs.iter()).all(|(l, r)| l.eq_graph(r, seen))
                }
                _ => false,
            },
            (Value::Set(lhs), Value::Set(rhs)) => match (lhs.try_borrow(), rhs.try_borrow()) {
                (Some(lhs), Some(rhs)) => set_eq(&lhs, &rhs, seen),
                _ => false,
            },
            (Value::Dictionary(lhs), Value::Dictionary(rhs)) => {
                match (lhs.try_borrow(), rhs.try_borrow()) {
                    (Some(lhs), Some(rhs)) => {
                        lhs.len() == rhs.len()
                            && lhs.iter().all(|(key, l)| {
                                rhs.get(key).is_some_and(|r| l.eq_graph(r, seen))
                            })
                    }
                    _ => false,
                }
            }
            (Value::Object(lhs), Value::Object(rhs)) => match (lhs.try_borrow(), rhs.try_borrow()) {
                (Some(lhs), Some(rhs)) => {
                    match (
                        lhs.as_any().downcast_ref::<OpaqueObject>(),
                        rhs.as_any().downcast_ref::<OpaqueObject>(),
                    ) {
                        (Some(lhs), Some(rhs)) => {
                            lhs.classes() == rhs.classes()
                                && lhs.len() == rhs.len()
                                && lhs.iter().all(|(key, l)| {
                                    rhs.get(key).is_some_and(|r| l.eq_graph(r, seen))
                                })
                        }
                        _ => lhs.eq_object(&**rhs),
                    }
                }
                _ => false,
            },
            _ => false,
        }
    }
}

/// Order-insensitive comparison; each trial match works on its own copy of `seen` so a failed
/// pairing cannot leave behind assumptions
fn set_eq(lhs: &[Value], rhs: &[Value], seen: &mut HashSet<(usize, usize)>) -> bool {
    if lhs.len() != rhs.len() {
        return false;
    }
    let mut unmatched: Vec<&Value> = rhs.iter().collect();
    for item in lhs {
        let found = unmatched.iter().position(|candidate| {
            let mut trial = seen.clone();
            item.eq_graph(candidate, &mut trial)
        });
        match found {
            Some(position) => {
                unmatched.swap_remove(position);
            }
            None => return false,
        }
    }
    true
}

/// Structural equality; the [`Mutability`] of nodes is not compared
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.eq_graph(other, &mut HashSet::new())
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Real(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<Timestamp> for Value {
    fn from(value: Timestamp) -> Self {
        Value::Date(value)
    }
}

/// What to do with a class that has no entry in the [`ClassRegistry`](crate::archive::registry::ClassRegistry)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnknownClasses {
    /// Fail with [`ArchiveError::MissingClassMapping`](crate::error::archive::ArchiveError::MissingClassMapping)
    #[default]
    Reject,
    /// Decode into, and encode from, an [`OpaqueObject`]
    Opaque,
}
