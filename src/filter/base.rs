//! State and plugin handling shared by every filter.

use super::{FilterEventReceiver, FilterState, OutPort};
use crate::buffer::AvTransBuffer;
use crate::error::{FilterError, FilterResult};
use crate::format::Capability;
use crate::observability::trace_state_change;
use crate::plugin::{
    AvTransPlugin, DataCallback, DataSlot, ParamMap, ParamValue, PluginCallback, PluginContext,
    PluginDescriptor, PluginEvent, PluginKind, PluginRegistry, PluginState, Tag,
};
use std::sync::{Arc, Mutex, Weak};

/// Forwards plugin events to the filter's receiver, tagged with the filter
/// name. Plugins hold it weakly; the filter owns it.
struct EventRelay {
    filter: String,
    receiver: Weak<dyn FilterEventReceiver>,
}

impl PluginCallback for EventRelay {
    fn on_event(&self, event: PluginEvent) {
        match self.receiver.upgrade() {
            Some(receiver) => receiver.on_filter_event(&self.filter, event),
            None => tracing::debug!(filter = %self.filter, event = ?event.event_type, "receiver gone, event dropped"),
        }
    }
}

#[derive(Default)]
struct Inner {
    state: FilterState,
    paused_from: Option<FilterState>,
    params: ParamMap,
    plugin: Option<Arc<dyn AvTransPlugin>>,
    descriptor: Option<Arc<PluginDescriptor>>,
    negotiated: Option<Capability>,
    relay: Option<Arc<EventRelay>>,
    downstream: Option<OutPort>,
}

/// Common filter machinery. Plugin calls are made without the filter lock
/// held, since plugins may call back into neighbouring filters.
pub(super) struct FilterCore {
    name: String,
    kind: PluginKind,
    preferred: Option<String>,
    registry: Arc<PluginRegistry>,
    ctx: PluginContext,
    inner: Mutex<Inner>,
    sink: DataSlot,
}

impl FilterCore {
    pub(super) fn new(
        name: impl Into<String>,
        kind: PluginKind,
        preferred: Option<String>,
        registry: Arc<PluginRegistry>,
        ctx: PluginContext,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            preferred,
            registry,
            ctx,
            inner: Mutex::new(Inner::default()),
            sink: DataSlot::default(),
        }
    }

    pub(super) fn name(&self) -> &str {
        &self.name
    }

    pub(super) fn kind(&self) -> PluginKind {
        self.kind
    }

    pub(super) fn state(&self) -> FilterState {
        self.inner.lock().unwrap().state
    }

    pub(super) fn expect(&self, allowed: &[FilterState]) -> FilterResult {
        let state = self.state();
        if allowed.contains(&state) {
            Ok(())
        } else {
            tracing::debug!(filter = %self.name, state = ?state, "operation not allowed in this state");
            Err(FilterError::InvalidState)
        }
    }

    pub(super) fn set_state(&self, next: FilterState) {
        let mut inner = self.inner.lock().unwrap();
        let current = inner.state;
        inner.state = next;
        drop(inner);
        if current != next {
            trace_state_change(&self.name, &current, &next);
        }
    }

    pub(super) fn init(&self, receiver: Weak<dyn FilterEventReceiver>) -> FilterResult {
        let mut inner = self.inner.lock().unwrap();
        if inner.state != FilterState::Created {
            return Err(FilterError::InvalidState);
        }
        inner.relay = Some(Arc::new(EventRelay {
            filter: self.name.clone(),
            receiver,
        }));
        inner.state = FilterState::Initialized;
        drop(inner);
        trace_state_change(&self.name, &FilterState::Created, &FilterState::Initialized);
        Ok(())
    }

    pub(super) fn set_parameter(&self, tag: Tag, value: ParamValue) -> FilterResult {
        let plugin = {
            let mut inner = self.inner.lock().unwrap();
            inner.params.set(tag, value.clone())?;
            inner.plugin.clone()
        };
        match plugin {
            Some(plugin) if plugin.state() == PluginState::Running => {
                tracing::debug!(filter = %self.name, tag = ?tag, "plugin running, parameter kept for next prepare");
                Ok(())
            }
            Some(plugin) => plugin.set_parameter(tag, value).map_err(Into::into),
            None => Ok(()),
        }
    }

    pub(super) fn get_parameter(&self, tag: Tag) -> FilterResult<ParamValue> {
        self.inner
            .lock()
            .unwrap()
            .params
            .get(tag)
            .cloned()
            .ok_or(FilterError::NotExisted)
    }

    pub(super) fn params(&self) -> ParamMap {
        self.inner.lock().unwrap().params.clone()
    }

    pub(super) fn link_downstream(&self, port: OutPort) -> FilterResult {
        let mut inner = self.inner.lock().unwrap();
        if inner.downstream.is_some() {
            return Err(FilterError::InvalidLink);
        }
        inner.downstream = Some(port);
        Ok(())
    }

    pub(super) fn downstream(&self) -> Option<OutPort> {
        self.inner.lock().unwrap().downstream.clone()
    }

    pub(super) fn plugin(&self) -> Option<Arc<dyn AvTransPlugin>> {
        self.inner.lock().unwrap().plugin.clone()
    }

    /// Registry candidates of this filter's kind for `mime`, restricted to
    /// the preferred plugin when one is set.
    pub(super) fn candidates(&self, mime: &str) -> Vec<Arc<PluginDescriptor>> {
        self.registry
            .candidates(self.kind, mime)
            .into_iter()
            .filter(|desc| self.preferred.as_ref().is_none_or(|name| *name == desc.name))
            .collect()
    }

    pub(super) fn set_negotiated(&self, descriptor: Arc<PluginDescriptor>, caps: Capability) {
        let mut inner = self.inner.lock().unwrap();
        inner.descriptor = Some(descriptor);
        inner.negotiated = Some(caps);
    }

    pub(super) fn negotiated(&self) -> Option<(Arc<PluginDescriptor>, Capability)> {
        let inner = self.inner.lock().unwrap();
        Some((inner.descriptor.clone()?, inner.negotiated.clone()?))
    }

    /// Plugin for `descriptor`: the current one when the name matches,
    /// a fresh instance otherwise.
    pub(super) fn instantiate(&self, descriptor: &PluginDescriptor) -> Arc<dyn AvTransPlugin> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(plugin) = inner.plugin.as_ref().filter(|p| p.name() == descriptor.name) {
            return Arc::clone(plugin);
        }
        let stale = inner.plugin.take();
        let plugin = descriptor.create(&self.ctx);
        inner.plugin = Some(Arc::clone(&plugin));
        drop(inner);
        if let Some(stale) = stale {
            let _ = stale.deinit();
        }
        tracing::debug!(filter = %self.name, plugin = %descriptor.name, "plugin instantiated");
        plugin
    }

    /// Init `plugin`, push `meta` into it and wire its callbacks.
    pub(super) fn install(
        &self,
        plugin: &Arc<dyn AvTransPlugin>,
        meta: &ParamMap,
        data: DataCallback,
    ) -> FilterResult {
        if plugin.state() == PluginState::Created {
            plugin.init()?;
        }
        for (tag, value) in meta.entries() {
            plugin.set_parameter(tag, value)?;
        }
        let relay = self.inner.lock().unwrap().relay.clone();
        let relay: Option<Arc<dyn PluginCallback>> = relay.map(|r| r as Arc<dyn PluginCallback>);
        plugin.set_callback(relay)?;
        plugin.set_data_callback(data)?;
        Ok(())
    }

    /// Data callback forwarding plugin output to the downstream port, or to
    /// the filter's sink when there is none.
    pub(super) fn forwarder(&self) -> DataCallback {
        match self.downstream() {
            Some(port) => {
                let name = self.name.clone();
                Arc::new(move |buffer| {
                    if let Err(err) = port.push(buffer) {
                        tracing::debug!(filter = %name, error = %err, "downstream rejected buffer");
                    }
                })
            }
            None => {
                let sink = self.sink.clone();
                Arc::new(move |buffer| {
                    sink.deliver(buffer);
                })
            }
        }
    }

    pub(super) fn set_sink(&self, callback: DataCallback) {
        self.sink.set(callback);
    }

    pub(super) fn prepare_plugin(&self) -> FilterResult {
        let plugin = self.plugin().ok_or(FilterError::NullPointer)?;
        plugin.prepare()?;
        Ok(())
    }

    pub(super) fn start(&self) -> FilterResult {
        match self.state() {
            FilterState::Running => return Ok(()),
            FilterState::Ready => {}
            _ => return Err(FilterError::InvalidState),
        }
        let plugin = self.plugin().ok_or(FilterError::NullPointer)?;
        plugin.start()?;
        self.set_state(FilterState::Running);
        Ok(())
    }

    pub(super) fn pause(&self) -> FilterResult {
        let state = self.state();
        if !matches!(state, FilterState::Ready | FilterState::Running) {
            return Err(FilterError::InvalidState);
        }
        let plugin = self.plugin().ok_or(FilterError::NullPointer)?;
        plugin.pause()?;
        self.inner.lock().unwrap().paused_from = Some(state);
        self.set_state(FilterState::Paused);
        Ok(())
    }

    pub(super) fn resume(&self) -> FilterResult {
        self.expect(&[FilterState::Paused])?;
        let plugin = self.plugin().ok_or(FilterError::NullPointer)?;
        plugin.resume()?;
        let previous = self
            .inner
            .lock()
            .unwrap()
            .paused_from
            .take()
            .unwrap_or(FilterState::Running);
        self.set_state(previous);
        Ok(())
    }

    /// Stop and drop the plugin, returning to `Initialized`.
    pub(super) fn release(&self) -> FilterResult {
        let (state, plugin) = {
            let mut inner = self.inner.lock().unwrap();
            inner.descriptor = None;
            inner.negotiated = None;
            inner.paused_from = None;
            (inner.state, inner.plugin.take())
        };
        if matches!(state, FilterState::Created | FilterState::Initialized) && plugin.is_none() {
            return Ok(());
        }
        let mut result = Ok(());
        if let Some(plugin) = plugin {
            if plugin.state() == PluginState::Running {
                result = plugin.stop().map_err(FilterError::from);
            }
            if let Err(err) = plugin.deinit() {
                tracing::warn!(filter = %self.name, error = %err, "plugin deinit failed");
            }
        }
        if state != FilterState::Created {
            self.set_state(FilterState::Initialized);
        }
        result
    }

    pub(super) fn push_data(&self, in_port: &str, buffer: AvTransBuffer) -> FilterResult {
        if in_port != self.name {
            tracing::debug!(filter = %self.name, port = %in_port, "push on unknown port");
            return Err(FilterError::InvalidParameterValue);
        }
        let plugin = self.plugin().ok_or(FilterError::NullPointer)?;
        plugin.push_data(in_port, Some(buffer), 0)?;
        Ok(())
    }
}

impl std::fmt::Debug for FilterCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock().unwrap();
        f.debug_struct("FilterCore")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("preferred", &self.preferred)
            .field("state", &inner.state)
            .field("plugin", &inner.plugin.as_ref().map(|p| p.name().to_string()))
            .finish()
    }
}
