//! Identity types for modules, services, and namespaces.
//!
//! Modules and services are identified by their Rust type. The `TypeId` is the
//! key; the type name is carried along for logs and error messages only.

use std::any::{type_name, TypeId};
use std::borrow::Cow;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Identity of a service type bound into a [`Container`](crate::Container).
#[derive(Debug, Clone, Copy)]
pub struct ServiceId {
    type_id: TypeId,
    name: &'static str,
}

impl ServiceId {
    /// Returns the identity of `T`.
    #[must_use]
    pub fn of<T: 'static>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            name: type_name::<T>(),
        }
    }

    /// Fully qualified type name of the service.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for ServiceId {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl Eq for ServiceId {}

impl Hash for ServiceId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Identity of a module descriptor type.
#[derive(Debug, Clone, Copy)]
pub struct ModuleId {
    type_id: TypeId,
    name: &'static str,
}

impl ModuleId {
    /// Returns the identity of `M`.
    #[must_use]
    pub fn of<M: 'static>() -> Self {
        Self {
            type_id: TypeId::of::<M>(),
            name: type_name::<M>(),
        }
    }

    /// Fully qualified type name of the module.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for ModuleId {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl Eq for ModuleId {}

impl Hash for ModuleId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Scopes module metadata and one bootstrapped server instance.
///
/// Two applications in the same process stay apart by declaring their
/// modules, and initializing their servers, under different keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NamespaceKey(Cow<'static, str>);

impl NamespaceKey {
    /// The namespace used when the caller does not pick one.
    pub const DEFAULT: NamespaceKey = NamespaceKey(Cow::Borrowed("bootwire:module"));

    /// Creates a namespace key from any string.
    #[must_use]
    pub fn new(key: impl Into<Cow<'static, str>>) -> Self {
        Self(key.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for NamespaceKey {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for NamespaceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for NamespaceKey {
    fn from(key: &'static str) -> Self {
        Self(Cow::Borrowed(key))
    }
}

impl From<String> for NamespaceKey {
    fn from(key: String) -> Self {
        Self(Cow::Owned(key))
    }
}
