// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::fmt;
use std::fmt::Debug;
use std::fmt::Display;
use std::sync::Mutex as StdMutex;
use std::sync::MutexGuard;
use std::sync::TryLockError;

/// The error type returned by [`Mutex::try_lock`] when the mutex is already held.
#[derive(Debug)]
pub struct WouldBlock;

impl Display for WouldBlock {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "operation would block")
    }
}

impl std::error::Error for WouldBlock {}

/// A Mutex wrapper whose `lock()` does not return a `Result`.
///
/// Poisoning is treated as a fatal programming error: a thread that panicked while holding the
/// lock has already violated whatever invariant the lock protects, so every subsequent locker
/// panics too rather than limping along with half-updated state.
#[derive(Default)]
#[repr(transparent)]
pub struct Mutex<T: ?Sized> {
    lock: StdMutex<T>,
}

impl<T> Mutex<T> {
    pub fn new(value: T) -> Mutex<T> {
        Mutex {
            lock: StdMutex::new(value),
        }
    }

    pub fn into_inner(self) -> T {
        match self.lock.into_inner() {
            Ok(value) => value,
            Err(_) => panic!("mutex is poisoned"),
        }
    }
}

impl<T: ?Sized> Mutex<T> {
    pub fn lock(&self) -> MutexGuard<T> {
        match self.lock.lock() {
            Ok(guard) => guard,
            Err(_) => panic!("mutex is poisoned"),
        }
    }

    pub fn try_lock(&self) -> Result<MutexGuard<T>, WouldBlock> {
        match self.lock.try_lock() {
            Ok(guard) => Ok(guard),
            Err(TryLockError::Poisoned(_)) => panic!("mutex is poisoned"),
            Err(TryLockError::WouldBlock) => Err(WouldBlock),
        }
    }

    pub fn get_mut(&mut self) -> &mut T {
        match self.lock.get_mut() {
            Ok(value) => value,
            Err(_) => panic!("mutex is poisoned"),
        }
    }
}

impl<T: ?Sized + Debug> Debug for Mutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.lock.fmt(f)
    }
}

impl<T> From<T> for Mutex<T> {
    fn from(value: T) -> Self {
        Mutex::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_and_mutate() {
        let m = Mutex::new(0u32);
        *m.lock() += 1;
        assert_eq!(*m.lock(), 1);
    }

    #[test]
    fn try_lock_would_block() {
        let m = Mutex::new(());
        let _guard = m.lock();
        assert!(m.try_lock().is_err());
    }
}
