//! Pipeline head.

use super::base::FilterCore;
use super::{Filter, FilterEventReceiver, FilterState, OutPort, caps_to_params};
use crate::buffer::AvTransBuffer;
use crate::error::{FilterError, FilterResult};
use crate::format::Capability;
use crate::plugin::{
    AvTransPlugin, ParamMap, ParamValue, PluginContext, PluginDescriptor, PluginKind,
    PluginRegistry, Tag,
};
use std::sync::{Arc, Weak};

/// Filter hosting an input plugin.
///
/// `prepare` drives the whole pipeline setup:
///
/// 1. find a plugin whose output the downstream filters accept,
/// 2. configure downstream with the merged meta, then init and configure
///    the plugin,
/// 3. prepare the plugin.
///
/// Any failure releases the plugin and leaves the filter `Initialized`.
#[derive(Debug)]
pub struct AvInputFilter {
    core: FilterCore,
}

impl AvInputFilter {
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
                PluginKind::Input,
                preferred.map(str::to_string),
                registry,
                ctx,
            ),
        })
    }

    fn find_plugin(&self) -> FilterResult<(Arc<PluginDescriptor>, Capability)> {
        let mime = self
            .core
            .params()
            .str(Tag::Mime)
            .map(str::to_string)
            .ok_or(FilterError::InvalidParameterValue)?;
        let downstream = self.core.downstream();

        for desc in self.core.candidates(&mime) {
            for caps in desc.out_caps.iter().filter(|caps| caps.mime == mime) {
                let accepted = match &downstream {
                    Some(port) => match port.negotiate(caps) {
                        Ok(accepted) => accepted,
                        Err(err) => {
                            tracing::debug!(
                                filter = %self.core.name(),
                                plugin = %desc.name,
                                error = %err,
                                "capability refused downstream"
                            );
                            continue;
                        }
                    },
                    None => caps.clone(),
                };
                tracing::debug!(filter = %self.core.name(), plugin = %desc.name, mime = %mime, "plugin found");
                self.core.set_negotiated(Arc::clone(&desc), accepted.clone());
                return Ok((desc, accepted));
            }
        }
        tracing::warn!(filter = %self.core.name(), mime = %mime, "no plugin negotiates");
        Err(FilterError::UnsupportedFormat)
    }

    fn do_configure(&self, desc: &PluginDescriptor, caps: &Capability) -> FilterResult {
        let mut meta = caps_to_params(caps);
        meta.merge(&self.core.params());
        if let Some(port) = self.core.downstream() {
            port.configure(&meta)?;
        }
        let plugin = self.core.instantiate(desc);
        self.core.install(&plugin, &meta, self.core.forwarder())
    }
}

impl Filter for AvInputFilter {
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

    fn negotiate(&self, _offered: &Capability) -> FilterResult<Capability> {
        Err(FilterError::InvalidOperation)
    }

    fn configure(&self, _meta: &ParamMap) -> FilterResult {
        Err(FilterError::InvalidOperation)
    }

    fn prepare(&self) -> FilterResult {
        self.core.expect(&[FilterState::Initialized])?;
        self.core.set_state(FilterState::Preparing);
        let result = self
            .find_plugin()
            .and_then(|(desc, caps)| self.do_configure(&desc, &caps))
            .and_then(|()| self.core.prepare_plugin());
        match result {
            Ok(()) => {
                self.core.set_state(FilterState::Ready);
                Ok(())
            }
            Err(err) => {
                tracing::warn!(filter = %self.core.name(), error = %err, "prepare failed");
                let _ = self.core.release();
                self.core.set_state(FilterState::Initialized);
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

    fn link_downstream(&self, port: OutPort) -> FilterResult {
        self.core.link_downstream(port)
    }

    fn plugin(&self) -> Option<Arc<dyn AvTransPlugin>> {
        self.core.plugin()
    }
}
