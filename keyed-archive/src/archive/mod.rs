/*!
 Contains logic and data structures used to read and write `NSKeyedArchiver` object graphs.

 ## Overview

 A keyed archive is a binary property list with a fixed header:

 - `$archiver`: always `NSKeyedArchiver`
 - `$version`: always `100000`
 - `$top`: a dictionary whose `root` entry is the UID of the root object
 - `$objects`: a flat table of objects, with the `$null` sentinel at index `0`

 Objects refer to each other by UID, so shared references and cycles survive a round trip.
 Each class instance names its class through a `$class` UID that points at a metadata entry
 holding `$classname` and the `$classes` chain.

 ## Classes

 A [`ClassRegistry`] maps class chains to the delegates that decode and encode them. The
 Foundation collection, data, string, and date classes are registered by [`ClassRegistry::new()`].
 Classes with no registration either fail, or with [`UnknownClasses::Opaque`], are decoded into
 [`OpaqueObject`]s that can be archived again unchanged.
*/

pub mod archiver;
mod foundation;
pub mod models;
pub mod opaque;
pub mod registry;
pub mod unarchiver;
mod tests;

pub use archiver::{archive, Archiver, ArchivingObject};
pub use models::{ArchiveObject, ClassChain, Key, Map, Mutability, Shared, UnknownClasses, Value};
pub use opaque::{OpaqueClass, OpaqueObject};
pub use registry::{Archive, AtomicClass, ClassRegistry, Delegate, IncrementalClass};
pub use unarchiver::{unarchive, ArchivedObject, Unarchiver};
