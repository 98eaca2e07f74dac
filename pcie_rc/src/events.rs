// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Link event notification for endpoint drivers. One registration slot per
//! event kind; recovery normally belongs to the endpoint driver, the
//! controller only self-heals when nobody is listening.

use sync::Mutex;

use crate::Error;
use crate::Result;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EventKind {
    /// The link dropped without a requested power-off.
    LinkDown,
    /// A non-posted request timed out waiting for its completion.
    CplTimeout,
}

const NUM_EVENT_KINDS: usize = 2;

impl EventKind {
    fn slot(self) -> usize {
        match self {
            EventKind::LinkDown => 0,
            EventKind::CplTimeout => 1,
        }
    }
}

/// Token passed to a registered callback.
#[derive(Copy, Clone, Debug)]
pub struct Event {
    pub kind: EventKind,
    pub ch_num: u32,
}

pub type EventCallback = Box<dyn Fn(&Event) + Send + Sync>;

#[derive(Default)]
pub(crate) struct EventRegistry {
    slots: Mutex<[Option<EventCallback>; NUM_EVENT_KINDS]>,
}

impl EventRegistry {
    pub fn register(&self, kind: EventKind, callback: EventCallback) -> Result<()> {
        let mut slots = self.slots.lock();
        let slot = &mut slots[kind.slot()];
        if slot.is_some() {
            return Err(Error::EventBusy(kind));
        }
        *slot = Some(callback);
        Ok(())
    }

    pub fn deregister(&self, kind: EventKind) {
        self.slots.lock()[kind.slot()] = None;
    }

    /// Invokes the callback for `kind`, if any. Returns whether a consumer
    /// was registered.
    pub fn dispatch(&self, kind: EventKind, ch_num: u32) -> bool {
        let slots = self.slots.lock();
        match &slots[kind.slot()] {
            Some(callback) => {
                callback(&Event { kind, ch_num });
                true
            }
            None => false,
        }
    }
}

impl crate::ExynosPcieRc {
    /// Registers the recovery callback for `kind`. At most one consumer per
    /// kind; a second registration fails until the first deregisters.
    pub fn register_event(&self, kind: EventKind, callback: EventCallback) -> Result<()> {
        self.events.register(kind, callback)
    }

    pub fn deregister_event(&self, kind: EventKind) {
        self.events.deregister(kind);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    use super::*;

    #[test]
    fn one_slot_per_kind() {
        let registry = EventRegistry::default();
        registry
            .register(EventKind::LinkDown, Box::new(|_| {}))
            .unwrap();
        assert!(registry
            .register(EventKind::LinkDown, Box::new(|_| {}))
            .is_err());
        // The other kind is independent.
        registry
            .register(EventKind::CplTimeout, Box::new(|_| {}))
            .unwrap();
    }

    #[test]
    fn dispatch_reports_consumer() {
        let registry = EventRegistry::default();
        let hits = Arc::new(AtomicU32::new(0));
        let hits2 = hits.clone();
        registry
            .register(
                EventKind::LinkDown,
                Box::new(move |ev| {
                    assert_eq!(ev.kind, EventKind::LinkDown);
                    hits2.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();
        assert!(registry.dispatch(EventKind::LinkDown, 0));
        assert!(!registry.dispatch(EventKind::CplTimeout, 0));
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        registry.deregister(EventKind::LinkDown);
        assert!(!registry.dispatch(EventKind::LinkDown, 0));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
