//! Lock helpers shared by the entity types and the registry.
//!
//! Writers only ever replace whole fields under the lock, so a guard left
//! behind by a panicking thread still protects consistent data. Poisoning is
//! recovered instead of propagated.

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub(crate) fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
