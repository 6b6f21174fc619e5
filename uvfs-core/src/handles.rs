//! Public descriptor to native handle mapping.

use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::{trace, warn};
use uvfs_traits::{BridgeError, Fd, NativeHandle, Result};

/// Tracks open native handles behind small integer descriptors.
///
/// The descriptor is derived from the native handle itself, so a given
/// native handle maps to the same [`Fd`] for as long as it is open.
#[derive(Debug, Default)]
pub struct HandleTable {
    entries: Mutex<HashMap<Fd, NativeHandle>>,
}

impl HandleTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&self, handle: NativeHandle) -> Fd {
        let fd = Fd::from(handle);
        let previous = self.entries.lock().insert(fd, handle);
        if previous.is_some() {
            // The backend reused a raw handle we never saw closed.
            warn!(fd = %fd, "Replacing stale handle table entry");
        }
        trace!(fd = %fd, "Allocated handle");
        fd
    }

    pub fn lookup(&self, fd: Fd) -> Result<NativeHandle> {
        self.entries
            .lock()
            .get(&fd)
            .copied()
            .ok_or(BridgeError::UnknownHandle(fd))
    }

    /// Remove the entry. Must run before the native close is dispatched.
    pub fn release(&self, fd: Fd) -> Result<NativeHandle> {
        let handle = self
            .entries
            .lock()
            .remove(&fd)
            .ok_or(BridgeError::UnknownHandle(fd))?;
        trace!(fd = %fd, "Released handle");
        Ok(handle)
    }

    pub fn contains(&self, fd: Fd) -> bool {
        self.entries.lock().contains_key(&fd)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_is_deterministic() {
        let table = HandleTable::new();
        let fd = table.allocate(NativeHandle::new(11));
        assert_eq!(fd, Fd(11));
        assert_eq!(table.lookup(fd).unwrap(), NativeHandle::new(11));
    }

    #[test]
    fn release_then_lookup_is_unknown() {
        let table = HandleTable::new();
        let fd = table.allocate(NativeHandle::new(4));
        assert_eq!(table.release(fd).unwrap(), NativeHandle::new(4));
        assert!(matches!(
            table.lookup(fd),
            Err(BridgeError::UnknownHandle(Fd(4)))
        ));
        assert!(table.is_empty());
    }

    #[test]
    fn double_release_fails() {
        let table = HandleTable::new();
        let fd = table.allocate(NativeHandle::new(9));
        table.release(fd).unwrap();
        assert!(matches!(
            table.release(fd),
            Err(BridgeError::UnknownHandle(_))
        ));
    }

    #[test]
    fn collision_replaces_entry() {
        let table = HandleTable::new();
        table.allocate(NativeHandle::new(7));
        table.allocate(NativeHandle::new(7));
        assert_eq!(table.len(), 1);
        assert!(table.contains(Fd(7)));
    }
}
