//! Pipeline tail.

use super::base::FilterCore;
use super::{Filter, FilterEventReceiver, FilterState, OutPort};
use crate::buffer::AvTransBuffer;
use crate::error::{FilterError, FilterResult};
use crate::format::Capability;
use crate::plugin::{
    AvTransPlugin, DataCallback, ParamMap, ParamValue, PluginContext, PluginKind, PluginRegistry,
    Tag,
};
use std::sync::{Arc, Weak};

/// Filter hosting an output plugin.
///
/// Buffers the plugin hands back (local service outputs do, mesh outputs
/// don't) go to the sink installed with [`AvOutputFilter::set_data_sink`].
#[derive(Debug)]
pub struct AvOutputFilter {
    core: FilterCore,
}

impl AvOutputFilter {
    /// Create a filter. With `preferred` set, only that plugin is considered.
    pub fn new(
        name: &str,
        preferred: Option<&str>,
        registry: Arc<PluginRegistry>,
        ctx: PluginContext,
    ) -> Arc<Self> {
        Arc::new(Self {
            core: FilterCore::new(
                name,
                PluginKind::Output,
                preferred.map(str::to_string),
                registry,
                ctx,
            ),
        })
    }

    /// Receive every buffer the plugin emits.
    pub fn set_data_sink(&self, sink: DataCallback) {
        self.core.set_sink(sink);
    }
}

impl Filter for AvOutputFilter {
    fn name(&self) -> &str {
        self.core.name()
    }

    fn kind(&self) -> PluginKind {
        self.core.kind()
    }

    fn state(&self) -> FilterState {
        self.core.state()
    }

    fn init(&self, receiver: Weak<dyn FilterEventReceiver>) -> FilterResult {
        self.core.init(receiver)
    }

    fn set_parameter(&self, tag: Tag, value: ParamValue) -> FilterResult {
        self.core.set_parameter(tag, value)
    }

    fn get_parameter(&self, tag: Tag) -> FilterResult<ParamValue> {
        self.core.get_parameter(tag)
    }

    fn negotiate(&self, offered: &Capability) -> FilterResult<Capability> {
        self.core.expect(&[FilterState::Initialized])?;
        for desc in self.core.candidates(&offered.mime) {
            if let Some(accepted) = desc.in_caps.iter().find_map(|caps| caps.intersect(offered)) {
                tracing::debug!(filter = %self.core.name(), plugin = %desc.name, "output negotiated");
                self.core.set_negotiated(Arc::clone(&desc), accepted.clone());
                return Ok(accepted);
            }
        }
        Err(FilterError::UnsupportedFormat)
    }

    fn configure(&self, meta: &ParamMap) -> FilterResult {
        self.core.expect(&[FilterState::Initialized])?;
        let (desc, _) = self
            .core
            .negotiated()
            .ok_or(FilterError::InvalidOperation)?;
        let mut plugin_meta = meta.clone();
        plugin_meta.merge(&self.core.params());

        let plugin = self.core.instantiate(&desc);
        match self.core.install(&plugin, &plugin_meta, self.core.forwarder()) {
            Ok(()) => {
                self.core.set_state(FilterState::Preparing);
                Ok(())
            }
            Err(err) => {
                let _ = self.core.release();
                Err(err)
            }
        }
    }

    fn prepare(&self) -> FilterResult {
        self.core.expect(&[FilterState::Preparing])?;
        match self.core.prepare_plugin() {
            Ok(()) => {
                self.core.set_state(FilterState::Ready);
                Ok(())
            }
            Err(err) => {
                let _ = self.core.release();
                Err(err)
            }
        }
    }

    fn start(&self) -> FilterResult {
        self.core.start()
    }

    fn stop(&self) -> FilterResult {
        self.core.release()
    }

    fn pause(&self) -> FilterResult {
        self.core.pause()
    }

    fn resume(&self) -> FilterResult {
        self.core.resume()
    }

    fn reset(&self) -> FilterResult {
        self.core.release()
    }

    fn push_data(&self, in_port: &str, buffer: AvTransBuffer) -> FilterResult {
        self.core.push_data(in_port, buffer)
    }

    fn link_downstream(&self, _port: OutPort) -> FilterResult {
        Err(FilterError::InvalidLink)
    }

    fn plugin(&self) -> Option<Arc<dyn AvTransPlugin>> {
        self.core.plugin()
    }
}
