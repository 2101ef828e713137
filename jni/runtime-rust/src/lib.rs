//! JNI bridge for [tether_runtime].
//!
//! Java code holds a `tether.NativeHandle` whose only field is the [Slot] of a
//! [NativeHandle](tether_runtime::NativeHandle) stored on this side. The embedding application
//! calls [install] once its interpreter is up, and again after every restart.

pub mod object;

use once_cell::sync::Lazy;
use std::sync::atomic::AtomicI32;
use std::sync::Arc;
use std::sync::RwLock;
use tether_runtime::Binder;
use tether_runtime::Generation;
use tether_runtime::ObjectId;
use tether_runtime::Registry;
use tether_runtime::Runtime;
use tether_runtime::Slot;
use thiserror::Error;

/// The runtime every Java handle is attached to, with the handles themselves.
struct Bridge {
    binder: Binder<dyn Runtime>,
    registry: Registry<dyn Runtime>,
}

static BRIDGE: Lazy<RwLock<Option<Bridge>>> = Lazy::new(Default::default);

/// Slot counter outliving every [Bridge], so that a slot held by Java never names a handle of a
/// later installation.
static SLOTS: Lazy<Arc<AtomicI32>> = Lazy::new(Default::default);

/// Errors surfacing to Java as exceptions.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("No runtime is installed")]
    NotInstalled,

    #[error(transparent)]
    Runtime(#[from] tether_runtime::Error),
}

impl BridgeError {
    /// Java exception class to throw.
    pub fn java_class(&self) -> &'static str {
        match self {
            BridgeError::NotInstalled => "java/lang/IllegalStateException",
            BridgeError::Runtime(err) if err.is_lifecycle() => "java/lang/IllegalStateException",
            BridgeError::Runtime(tether_runtime::Error::SlotsExhausted) => {
                "java/lang/IllegalStateException"
            }
            BridgeError::Runtime(_) => "java/lang/IllegalArgumentException",
        }
    }
}

/// Sets the runtime Java handles attach to.
///
/// Handles attached to a previously installed runtime are released.
pub fn install(binder: Binder<dyn Runtime>) {
    let old = BRIDGE
        .write()
        .expect("Failed to write-lock the bridge")
        .replace(Bridge {
            binder,
            registry: Registry::with_counter(SLOTS.clone()),
        });
    if let Some(old) = old {
        log::info!("Replacing installed runtime, releasing {} handles", old.registry.len());
        old.registry.clear();
    }
}

/// Removes the installed runtime and releases every handle attached to it.
pub fn uninstall() {
    let old = BRIDGE.write().expect("Failed to write-lock the bridge").take();
    if let Some(old) = old {
        old.registry.clear();
    }
}

fn with_bridge<T>(action: impl FnOnce(&Bridge) -> Result<T, BridgeError>) -> Result<T, BridgeError> {
    let guard = BRIDGE.read().expect("Failed to read-lock the bridge");
    let bridge = guard.as_ref().ok_or(BridgeError::NotInstalled)?;
    action(bridge)
}

/// Attaches a handle and stores it.
pub fn attach(generation: Generation, object: ObjectId) -> Result<Slot, BridgeError> {
    with_bridge(|bridge| {
        let handle = bridge.binder.attach(generation, object)?;
        Ok(bridge.registry.store(handle)?)
    })
}

/// Renders the handle stored at `slot`.
pub fn repr(slot: Slot) -> Result<String, BridgeError> {
    with_bridge(|bridge| Ok(bridge.registry.peek(slot, |handle| handle.repr())??))
}

/// Releases the handle stored at `slot`.
///
/// Releasing a slot that is already gone does nothing, as does releasing without an installed
/// runtime.
pub fn release(slot: Slot) {
    let result = with_bridge(|bridge| Ok(bridge.registry.remove(slot)));
    if let Ok(false) = result {
        log::trace!("Slot {} already released", slot);
    }
}

/// Checks if a handle is stored at `slot`.
pub fn alive(slot: Slot) -> bool {
    with_bridge(|bridge| Ok(bridge.registry.alive(slot))).unwrap_or(false)
}
