// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Safe abstractions for synchronization primitives.
//!
//! We name them `KMutex` and `KRwLock` on purpose: they are not the
//! std types and their API differs slightly. Lock poisoning is never
//! surfaced to callers; a poisoned guard is recovered as-is. Everything
//! the datapath protects with these locks is valid in every
//! intermediate state.
use core::ops::Deref;
use core::ops::DerefMut;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::sync::RwLock;
use std::sync::RwLockReadGuard;
use std::sync::RwLockWriteGuard;

pub struct KMutex<T> {
    inner: Mutex<T>,
}

pub struct KMutexGuard<'a, T: 'a> {
    guard: MutexGuard<'a, T>,
}

impl<T> Deref for KMutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.guard.deref()
    }
}

impl<T> DerefMut for KMutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.guard.deref_mut()
    }
}

impl<T> KMutex<T> {
    pub fn into_inner(self) -> T
    where
        T: Sized,
    {
        self.inner.into_inner().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn new(val: T) -> Self {
        KMutex { inner: Mutex::new(val) }
    }

    pub fn lock(&self) -> KMutexGuard<'_, T> {
        let guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        KMutexGuard { guard }
    }
}

impl<T: Default> Default for KMutex<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

pub struct KRwLock<T> {
    inner: RwLock<T>,
}

pub struct KRwLockReadGuard<'a, T: 'a> {
    guard: RwLockReadGuard<'a, T>,
}

pub struct KRwLockWriteGuard<'a, T: 'a> {
    guard: RwLockWriteGuard<'a, T>,
}

impl<T> Deref for KRwLockReadGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.guard.deref()
    }
}

impl<T> Deref for KRwLockWriteGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.guard.deref()
    }
}

impl<T> DerefMut for KRwLockWriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.guard.deref_mut()
    }
}

impl<T> KRwLock<T> {
    pub fn into_inner(self) -> T
    where
        T: Sized,
    {
        self.inner.into_inner().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn new(val: T) -> Self {
        KRwLock { inner: RwLock::new(val) }
    }

    pub fn read(&self) -> KRwLockReadGuard<'_, T> {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        KRwLockReadGuard { guard }
    }

    pub fn write(&self) -> KRwLockWriteGuard<'_, T> {
        let guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        KRwLockWriteGuard { guard }
    }
}

impl<T: Default> Default for KRwLock<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn rwlock_readers_share() {
        let lock = KRwLock::new(5u32);
        let r1 = lock.read();
        let r2 = lock.read();
        assert_eq!(*r1 + *r2, 10);
    }

    #[test]
    fn poisoned_lock_is_recovered() {
        let lock = Arc::new(KMutex::new(1u32));
        let l2 = lock.clone();
        let res = thread::spawn(move || {
            let _g = l2.lock();
            panic!("poison the lock");
        })
        .join();
        assert!(res.is_err());

        *lock.lock() += 1;
        assert_eq!(*lock.lock(), 2);
    }
}
