use std::any::Any;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;

use crate::allocator::HandleAllocator;
use crate::error::StoreError;
use crate::types::NativeHandle;

struct Entry {
    type_name: &'static str,
    value: Box<dyn Any + Send>,
}

/// Handles whose owners went away and which should be removed from the store
/// at the next [`NativeStore::reclaim`].
///
/// Pushing never touches the store itself, so owners may release from
/// finalizers that run while the store is borrowed.
#[derive(Debug, Clone, Default)]
pub struct ReleaseQueue {
    pending: Arc<Mutex<Vec<NativeHandle>>>,
}

impl ReleaseQueue {
    pub fn push(&self, handle: NativeHandle) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);
    }

    pub fn len(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn drain(&self) -> Vec<NativeHandle> {
        std::mem::take(&mut *self.pending.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

/// Generational arena of type-erased native objects.
#[derive(Default)]
pub struct NativeStore {
    allocator: HandleAllocator,
    entries: Vec<Option<Entry>>,
    release_queue: ReleaseQueue,
}

impl NativeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<T: Any + Send>(&mut self, value: T) -> NativeHandle {
        let handle = self.allocator.acquire();
        let idx = handle.index as usize;
        if idx >= self.entries.len() {
            self.entries.resize_with(idx + 1, || None);
        }
        self.entries[idx] = Some(Entry {
            type_name: std::any::type_name::<T>(),
            value: Box::new(value),
        });
        handle
    }

    pub fn contains(&self, handle: NativeHandle) -> bool {
        self.allocator.is_live(handle)
    }

    /// Name of the native type stored behind `handle`.
    pub fn type_name(&self, handle: NativeHandle) -> Result<&'static str, StoreError> {
        self.entry(handle).map(|e| e.type_name)
    }

    pub fn get<T: Any>(&self, handle: NativeHandle) -> Result<&T, StoreError> {
        let entry = self.entry(handle)?;
        let actual = entry.type_name;
        entry
            .value
            .downcast_ref::<T>()
            .ok_or(StoreError::TypeMismatch {
                handle,
                expected: std::any::type_name::<T>(),
                actual,
            })
    }

    pub fn get_mut<T: Any>(&mut self, handle: NativeHandle) -> Result<&mut T, StoreError> {
        if !self.allocator.is_live(handle) {
            return Err(StoreError::Stale(handle));
        }
        let entry = self.entries[handle.index as usize]
            .as_mut()
            .ok_or(StoreError::Stale(handle))?;
        let actual = entry.type_name;
        entry
            .value
            .downcast_mut::<T>()
            .ok_or(StoreError::TypeMismatch {
                handle,
                expected: std::any::type_name::<T>(),
                actual,
            })
    }

    /// Remove and return the value behind `handle`.
    pub fn remove<T: Any>(&mut self, handle: NativeHandle) -> Result<T, StoreError> {
        let actual = self.type_name(handle)?;
        if !self.entries[handle.index as usize]
            .as_ref()
            .is_some_and(|e| e.value.is::<T>())
        {
            return Err(StoreError::TypeMismatch {
                handle,
                expected: std::any::type_name::<T>(),
                actual,
            });
        }
        let entry = self.take(handle).ok_or(StoreError::Stale(handle))?;
        entry
            .value
            .downcast::<T>()
            .map(|boxed| *boxed)
            .map_err(|_| StoreError::Stale(handle))
    }

    /// Drop the value behind `handle` whatever its type. Returns false for
    /// stale handles.
    pub fn release(&mut self, handle: NativeHandle) -> bool {
        self.take(handle).is_some()
    }

    /// Queue shared with script objects that own their native value.
    pub fn release_queue(&self) -> ReleaseQueue {
        self.release_queue.clone()
    }

    /// Drop every value whose handle was pushed onto the release queue.
    pub fn reclaim(&mut self) -> usize {
        let mut released = 0;
        for handle in self.release_queue.drain() {
            if self.release(handle) {
                released += 1;
            }
        }
        if released > 0 {
            debug!(released, live = self.len(), "reclaimed native objects");
        }
        released
    }

    /// Drop everything. Handles issued before the call stay dead.
    pub fn clear(&mut self) {
        self.release_queue.drain();
        self.entries.clear();
        self.allocator.reset();
    }

    pub fn len(&self) -> usize {
        self.allocator.live_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entry(&self, handle: NativeHandle) -> Result<&Entry, StoreError> {
        if !self.allocator.is_live(handle) {
            return Err(StoreError::Stale(handle));
        }
        self.entries[handle.index as usize]
            .as_ref()
            .ok_or(StoreError::Stale(handle))
    }

    fn take(&mut self, handle: NativeHandle) -> Option<Entry> {
        if !self.allocator.release(handle) {
            return None;
        }
        self.entries[handle.index as usize].take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Position {
        x: f32,
        y: f32,
    }

    #[test]
    fn insert_and_get() {
        let mut store = NativeStore::new();
        let h = store.insert(Position { x: 1.0, y: 2.0 });
        assert_eq!(store.get::<Position>(h).unwrap(), &Position { x: 1.0, y: 2.0 });
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn get_mut_updates_value() {
        let mut store = NativeStore::new();
        let h = store.insert(Position { x: 1.0, y: 2.0 });
        store.get_mut::<Position>(h).unwrap().x = 5.0;
        assert_eq!(store.get::<Position>(h).unwrap().x, 5.0);
    }

    #[test]
    fn wrong_type_is_reported() {
        let mut store = NativeStore::new();
        let h = store.insert(42u32);
        let err = store.get::<Position>(h).unwrap_err();
        assert!(matches!(err, StoreError::TypeMismatch { .. }), "{err}");
        assert!(store.remove::<Position>(h).is_err());
        assert!(store.contains(h));
    }

    #[test]
    fn removed_handle_is_stale_after_reuse() {
        let mut store = NativeStore::new();
        let a = store.insert(1u8);
        assert_eq!(store.remove::<u8>(a).unwrap(), 1);

        let b = store.insert(2u8);
        assert_eq!(a.index, b.index);
        assert!(matches!(store.get::<u8>(a), Err(StoreError::Stale(_))));
        assert_eq!(*store.get::<u8>(b).unwrap(), 2);
    }

    #[test]
    fn reclaim_drains_release_queue() {
        let mut store = NativeStore::new();
        let a = store.insert(1u8);
        let b = store.insert(2u8);
        let queue = store.release_queue();
        queue.push(a);
        queue.push(a);
        assert_eq!(queue.len(), 2);

        assert_eq!(store.reclaim(), 1);
        assert!(queue.is_empty());
        assert!(!store.contains(a));
        assert!(store.contains(b));
    }

    #[test]
    fn clear_invalidates_everything() {
        let mut store = NativeStore::new();
        let a = store.insert(1u8);
        store.release_queue().push(a);
        store.clear();
        assert!(store.is_empty());
        assert!(store.get::<u8>(a).is_err());
        assert_eq!(store.reclaim(), 0);
    }
}
