//! Callback wrapping.
//!
//! Shadows can only be torn down when the primary instance reports
//! DESTROYED, so every callback the host registers is wrapped: the wrapper
//! subscribes to DESTROYED on top of the caller's mask, notifies the
//! observers, and hands everything the caller asked for to the caller.

use std::sync::Arc;

use crate::studio::{CallbackKind, CallbackMask, CallbackParameters, EventCallback, InstanceHandle};

use super::observer::ObserverList;

/// Callback that does nothing, installed on every description of a loaded
/// bank so each instance carries a wrapper from creation on.
pub fn empty_callback() -> EventCallback {
    Arc::new(|_: CallbackKind, _: InstanceHandle, _: &CallbackParameters| Ok(()))
}

/// Wrap `callback` so observers hear about DESTROYED.
///
/// Returns the wrapper and the mask to register it with. The caller's
/// callback runs for exactly the kinds in `mask`; an added DESTROYED is
/// swallowed.
pub fn wrap_callback(
    observers: ObserverList,
    callback: Option<EventCallback>,
    mask: CallbackMask,
) -> (EventCallback, CallbackMask) {
    let wrapped: EventCallback = Arc::new(
        move |kind: CallbackKind, instance: InstanceHandle, parameters: &CallbackParameters| {
            if kind == CallbackKind::Destroyed {
                for observer in observers.snapshot() {
                    observer.on_instance_destroyed(instance);
                }
            }
            match &callback {
                Some(callback) if mask.contains(kind.mask()) => {
                    callback(kind, instance, parameters)
                }
                _ => Ok(()),
            }
        },
    );
    (wrapped, mask | CallbackMask::DESTROYED)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use crate::mirror::observer::AudioEngineObserver;
    use crate::mirror::ops::InstanceOp;
    use crate::studio::{EventId, StudioSystem};
    use std::sync::Mutex;

    #[derive(Default)]
    struct DestroyLog {
        destroyed: Mutex<Vec<InstanceHandle>>,
    }

    impl AudioEngineObserver for DestroyLog {
        fn on_instance_created(&self, _: &dyn StudioSystem, _: EventId, _: InstanceHandle) {}
        fn on_instance_mutated(&self, _: InstanceHandle, _: &InstanceOp) {}
        fn on_instance_destroyed(&self, instance: InstanceHandle) {
            self.destroyed.lock().unwrap().push(instance);
        }
    }

    fn observed() -> (ObserverList, Arc<DestroyLog>) {
        let log = Arc::new(DestroyLog::default());
        let list = ObserverList::new();
        list.add(log.clone());
        (list, log)
    }

    fn counting() -> (EventCallback, Arc<Mutex<Vec<CallbackKind>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback: EventCallback = Arc::new(
            move |kind: CallbackKind, _: InstanceHandle, _: &CallbackParameters| {
                sink.lock().unwrap().push(kind);
                Ok(())
            },
        );
        (callback, seen)
    }

    #[test]
    fn test_mask_gains_destroyed() {
        let (list, _) = observed();
        let (_, mask) = wrap_callback(list, None, CallbackMask::STARTED);
        assert_eq!(mask, CallbackMask::STARTED | CallbackMask::DESTROYED);
    }

    #[test]
    fn test_unsubscribed_destroyed_is_swallowed() {
        let (list, log) = observed();
        let (callback, seen) = counting();
        let (wrapped, _) = wrap_callback(list, Some(callback), CallbackMask::STARTED);

        wrapped(CallbackKind::Started, InstanceHandle(1), &CallbackParameters::None).unwrap();
        wrapped(CallbackKind::Destroyed, InstanceHandle(1), &CallbackParameters::None).unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![CallbackKind::Started]);
        assert_eq!(*log.destroyed.lock().unwrap(), vec![InstanceHandle(1)]);
    }

    #[test]
    fn test_subscribed_destroyed_reaches_caller() {
        let (list, log) = observed();
        let (callback, seen) = counting();
        let (wrapped, _) = wrap_callback(
            list,
            Some(callback),
            CallbackMask::STOPPED | CallbackMask::DESTROYED,
        );

        wrapped(CallbackKind::Stopped, InstanceHandle(7), &CallbackParameters::None).unwrap();
        wrapped(CallbackKind::Destroyed, InstanceHandle(7), &CallbackParameters::None).unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![CallbackKind::Stopped, CallbackKind::Destroyed]
        );
        assert_eq!(log.destroyed.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_caller_result_is_returned() {
        let (list, _) = observed();
        let failing: EventCallback = Arc::new(
            |_: CallbackKind, _: InstanceHandle, _: &CallbackParameters| {
                Err(EngineError::InvalidParam {
                    reason: "nope".to_string(),
                })
            },
        );
        let (wrapped, _) = wrap_callback(list, Some(failing), CallbackMask::STARTED);
        assert!(wrapped(CallbackKind::Started, InstanceHandle(2), &CallbackParameters::None).is_err());
        assert!(wrapped(CallbackKind::Stopped, InstanceHandle(2), &CallbackParameters::None).is_ok());
    }

    #[test]
    fn test_observers_added_later_are_notified() {
        let list = ObserverList::new();
        let (wrapped, _) = wrap_callback(list.clone(), Some(empty_callback()), CallbackMask::empty());
        let log = Arc::new(DestroyLog::default());
        list.add(log.clone());

        wrapped(CallbackKind::Destroyed, InstanceHandle(3), &CallbackParameters::None).unwrap();
        assert_eq!(*log.destroyed.lock().unwrap(), vec![InstanceHandle(3)]);
    }
}
