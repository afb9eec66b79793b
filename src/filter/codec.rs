//! Middle stage between input and output.

use super::base::FilterCore;
use super::{Filter, FilterEventReceiver, FilterState, OutPort, caps_to_params};
use crate::buffer::AvTransBuffer;
use crate::error::{FilterError, FilterResult};
use crate::format::Capability;
use crate::plugin::{
    AvTransPlugin, ParamMap, ParamValue, PluginContext, PluginKind, PluginRegistry, Tag,
};
use std::sync::{Arc, Weak};

/// Filter hosting a codec plugin.
///
/// Negotiation matches the offered capability against the candidates'
/// inputs and then offers the corresponding output downstream.
#[derive(Debug)]
pub struct CodecFilter {
    core: FilterCore,
}

impl CodecFilter {
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
                PluginKind::Codec,
                preferred.map(str::to_string),
                registry,
                ctx,
            ),
        })
    }

    /// Offer `caps` downstream, or take it as is when nothing is linked.
    fn offer_downstream(&self, caps: Capability) -> FilterResult<Capability> {
        match self.core.downstream() {
            Some(port) => port.negotiate(&caps),
            None => Ok(caps),
        }
    }
}

impl Filter for CodecFilter {
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
            for in_caps in &desc.in_caps {
                let Some(accepted) = in_caps.intersect(offered) else {
                    continue;
                };
                for out_caps in &desc.out_caps {
                    let produced = if out_caps.mime == accepted.mime {
                        match out_caps.intersect(&accepted) {
                            Some(caps) => caps,
                            None => continue,
                        }
                    } else {
                        out_caps.clone()
                    };
                    match self.offer_downstream(produced) {
                        Ok(downstream) => {
                            self.core.set_negotiated(Arc::clone(&desc), downstream);
                            return Ok(accepted);
                        }
                        Err(err) => {
                            tracing::debug!(filter = %self.core.name(), plugin = %desc.name, error = %err, "output refused downstream");
                        }
                    }
                }
            }
        }
        Err(FilterError::UnsupportedFormat)
    }

    fn configure(&self, meta: &ParamMap) -> FilterResult {
        self.core.expect(&[FilterState::Initialized])?;
        let (desc, out_caps) = self
            .core
            .negotiated()
            .ok_or(FilterError::InvalidOperation)?;

        let mut plugin_meta = meta.clone();
        plugin_meta.merge(&self.core.params());
        let mut downstream_meta = plugin_meta.clone();
        downstream_meta.merge(&caps_to_params(&out_caps));

        let result = (|| {
            if let Some(port) = self.core.downstream() {
                port.configure(&downstream_meta)?;
            }
            let plugin = self.core.instantiate(&desc);
            self.core.install(&plugin, &plugin_meta, self.core.forwarder())
        })();
        match result {
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

    fn link_downstream(&self, port: OutPort) -> FilterResult {
        self.core.link_downstream(port)
    }

    fn plugin(&self) -> Option<Arc<dyn AvTransPlugin>> {
        self.core.plugin()
    }
}
