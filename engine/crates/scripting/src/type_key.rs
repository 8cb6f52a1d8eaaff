//! Stable identifiers for native types.
//!
//! A [`TypeKey`] is the XXH64 hash of a type's name as reported by
//! [`std::any::type_name`]. It is deterministic for the whole process (and
//! across runs of the same build). Two distinct types colliding is possible in
//! principle; that risk is accepted and not detected.

use std::fmt;

use mlua::{MetaMethod, UserData, UserDataMethods};
use xxhash_rust::xxh64::xxh64;

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct TypeKey(u64);

impl TypeKey {
    /// Key of the native type `T`.
    #[inline]
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self::from_name(std::any::type_name::<T>())
    }

    /// Key of an arbitrary type identity string.
    #[inline]
    pub fn from_name(name: &str) -> Self {
        TypeKey(xxh64(name.as_bytes(), 0))
    }

    #[inline]
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeKey({:#018x})", self.0)
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

// Stored in the runtime as the private component tag of class tables.
impl UserData for TypeKey {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_meta_method(MetaMethod::ToString, |_, this, ()| Ok(this.to_string()));
        methods.add_meta_method(MetaMethod::Eq, |_, this, other: mlua::UserDataRef<TypeKey>| {
            Ok(*this == *other)
        });
    }
}
