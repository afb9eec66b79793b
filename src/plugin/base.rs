//! State shared by every built-in plugin.
//!
//! [`PluginCore`] owns the lifecycle state, the parameter map and the two
//! callbacks. Concrete plugins embed one and add their transport-specific
//! resources around it.

use crate::buffer::AvTransBuffer;
use crate::error::{PluginError, PluginResult};
use crate::format::MediaType;
use crate::observability::trace_state_change;
use crate::plugin::params::{ParamMap, ParamValue, Tag};
use crate::plugin::traits::{DataCallback, PluginCallback, PluginEvent, PluginKind, PluginState};
use std::sync::{Arc, Mutex, Weak};

/// A shareable slot holding the current data callback.
///
/// Drain workers hold a clone of the slot rather than the callback itself, so
/// replacing or clearing the callback takes effect on the next buffer.
#[derive(Clone, Default)]
pub struct DataSlot(Arc<Mutex<Option<DataCallback>>>);

impl DataSlot {
    /// Install a callback.
    pub fn set(&self, callback: DataCallback) {
        *self.0.lock().unwrap() = Some(callback);
    }

    /// Remove the callback.
    pub fn clear(&self) {
        *self.0.lock().unwrap() = None;
    }

    /// Deliver a buffer; returns `false` if no callback is installed.
    pub fn deliver(&self, buffer: AvTransBuffer) -> bool {
        let callback = self.0.lock().unwrap().clone();
        match callback {
            Some(callback) => {
                callback(buffer);
                true
            }
            None => false,
        }
    }
}

struct CoreState {
    state: PluginState,
    paused_from: Option<PluginState>,
    params: ParamMap,
    callback: Option<Weak<dyn PluginCallback>>,
}

/// Lifecycle, parameters and callbacks of one plugin instance.
pub struct PluginCore {
    name: String,
    kind: PluginKind,
    media_type: MediaType,
    inner: Mutex<CoreState>,
    data: DataSlot,
}

impl PluginCore {
    /// Create a core in the `Created` state.
    pub fn new(name: impl Into<String>, kind: PluginKind, media_type: MediaType) -> Self {
        Self {
            name: name.into(),
            kind,
            media_type,
            inner: Mutex::new(CoreState {
                state: PluginState::Created,
                paused_from: None,
                params: ParamMap::new(),
                callback: None,
            }),
            data: DataSlot::default(),
        }
    }

    /// Plugin name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Plugin role.
    pub fn kind(&self) -> PluginKind {
        self.kind
    }

    /// Media type of the buffers handled.
    pub fn media_type(&self) -> MediaType {
        self.media_type
    }

    /// Current state.
    pub fn state(&self) -> PluginState {
        self.inner.lock().unwrap().state
    }

    /// Fail with `WrongState` unless the current state is one of `allowed`.
    pub fn expect(&self, allowed: &[PluginState]) -> PluginResult {
        let state = self.state();
        if allowed.contains(&state) {
            Ok(())
        } else {
            tracing::debug!(plugin = %self.name, state = ?state, expected = ?allowed, "wrong state");
            Err(PluginError::WrongState)
        }
    }

    /// Move to `next` if the transition table allows it.
    pub fn transition(&self, next: PluginState) -> PluginResult {
        let mut inner = self.inner.lock().unwrap();
        let current = inner.state;
        if !current.can_transition_to(next) {
            tracing::debug!(plugin = %self.name, from = ?current, to = ?next, "rejected transition");
            return Err(PluginError::WrongState);
        }
        inner.state = next;
        drop(inner);
        trace_state_change(&self.name, &current, &next);
        Ok(())
    }

    /// Force the state; used by `reset` and `deinit`.
    pub fn force_state(&self, next: PluginState) {
        let mut inner = self.inner.lock().unwrap();
        let current = inner.state;
        inner.state = next;
        inner.paused_from = None;
        drop(inner);
        if current != next {
            trace_state_change(&self.name, &current, &next);
        }
    }

    /// `Running`/`Prepared` → `Paused`, remembering where it came from.
    pub fn pause(&self) -> PluginResult {
        let mut inner = self.inner.lock().unwrap();
        if !matches!(inner.state, PluginState::Running | PluginState::Prepared) {
            return Err(PluginError::WrongState);
        }
        inner.paused_from = Some(inner.state);
        inner.state = PluginState::Paused;
        Ok(())
    }

    /// `Paused` → the state it was paused from.
    pub fn resume(&self) -> PluginResult {
        let mut inner = self.inner.lock().unwrap();
        if inner.state != PluginState::Paused {
            return Err(PluginError::WrongState);
        }
        inner.state = inner.paused_from.take().unwrap_or(PluginState::Running);
        Ok(())
    }

    /// Read a parameter; `NotExisted` when absent.
    pub fn get_parameter(&self, tag: Tag) -> PluginResult<ParamValue> {
        self.inner.lock().unwrap().params.require(tag)
    }

    /// Write a parameter; rejected once running.
    pub fn set_parameter(&self, tag: Tag, value: ParamValue) -> PluginResult {
        let mut inner = self.inner.lock().unwrap();
        if inner.state == PluginState::Running {
            return Err(PluginError::WrongState);
        }
        inner.params.set(tag, value)
    }

    /// Snapshot of the parameter map.
    pub fn params(&self) -> ParamMap {
        self.inner.lock().unwrap().params.clone()
    }

    /// Text parameter.
    pub fn param_str(&self, tag: Tag) -> Option<String> {
        self.inner.lock().unwrap().params.str(tag).map(str::to_string)
    }

    /// Integer parameter.
    pub fn param_int(&self, tag: Tag) -> Option<i64> {
        self.inner.lock().unwrap().params.int(tag)
    }

    /// Register the event sink; `None` is rejected.
    pub fn set_callback(&self, callback: Option<Arc<dyn PluginCallback>>) -> PluginResult {
        let callback = callback.ok_or(PluginError::NullPointer)?;
        self.inner.lock().unwrap().callback = Some(Arc::downgrade(&callback));
        Ok(())
    }

    /// Register the data sink.
    pub fn set_data_callback(&self, callback: DataCallback) -> PluginResult {
        self.data.set(callback);
        Ok(())
    }

    /// Slot through which buffers are delivered.
    pub fn data_slot(&self) -> DataSlot {
        self.data.clone()
    }

    /// Deliver an event to the registered sink, if it is still alive.
    pub fn emit(&self, event: PluginEvent) {
        let callback = self
            .inner
            .lock()
            .unwrap()
            .callback
            .as_ref()
            .and_then(Weak::upgrade);
        match callback {
            Some(callback) => callback.on_event(event),
            None => tracing::debug!(plugin = %self.name, event = ?event.event_type, "no event callback"),
        }
    }

    /// Drop callbacks and parameters.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.callback = None;
        inner.params.clear();
        drop(inner);
        self.data.clear();
    }
}

impl std::fmt::Debug for PluginCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginCore")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("media_type", &self.media_type)
            .field("state", &self.state())
            .finish()
    }
}
