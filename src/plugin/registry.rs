//! Registry of plugin factories keyed by kind and MIME.

use crate::channel::ChannelAdapter;
use crate::config::TransportConfig;
use crate::format::{Capability, MediaType};
use crate::plugin::traits::{AvTransPlugin, PluginKind};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Collaborators handed to plugin factories.
#[derive(Clone)]
pub struct PluginContext {
    /// Channel adapter used by mesh-channel plugins.
    pub channel: Arc<ChannelAdapter>,
    /// Shared configuration.
    pub config: Arc<TransportConfig>,
}

/// Constructor of a plugin instance.
pub type PluginFactory = fn(&PluginDescriptor, &PluginContext) -> Arc<dyn AvTransPlugin>;

/// Declaration of a plugin: identity, capabilities and factory.
#[derive(Clone)]
pub struct PluginDescriptor {
    /// Plugin name.
    pub name: String,
    /// Role in the pipeline.
    pub kind: PluginKind,
    /// Accepted inputs, in preference order.
    pub in_caps: Vec<Capability>,
    /// Produced outputs, in preference order.
    pub out_caps: Vec<Capability>,
    /// Constructor.
    pub factory: PluginFactory,
}

impl PluginDescriptor {
    /// MIME the descriptor is indexed under: the first output capability for
    /// inputs, the first input capability otherwise.
    pub fn primary_mime(&self) -> Option<&str> {
        let caps = match self.kind {
            PluginKind::Input => &self.out_caps,
            PluginKind::Codec | PluginKind::Output => &self.in_caps,
        };
        caps.first().map(|cap| cap.mime.as_str())
    }

    /// Media type implied by the primary MIME.
    pub fn media_type(&self) -> Option<MediaType> {
        self.primary_mime().and_then(MediaType::from_mime)
    }

    /// Instantiate the plugin.
    pub fn create(&self, ctx: &PluginContext) -> Arc<dyn AvTransPlugin> {
        (self.factory)(self, ctx)
    }
}

impl std::fmt::Debug for PluginDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginDescriptor")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("in_caps", &self.in_caps)
            .field("out_caps", &self.out_caps)
            .finish_non_exhaustive()
    }
}

type RegistryKey = (PluginKind, String);

/// Registry of plugin descriptors.
///
/// Built once at the composition root and shared by every engine. Lookups
/// return candidates in registration order, which is the order negotiation
/// tries them in.
#[derive(Default)]
pub struct PluginRegistry {
    entries: RwLock<HashMap<RegistryKey, Vec<Arc<PluginDescriptor>>>>,
}

impl PluginRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a descriptor under its kind and primary MIME.
    ///
    /// Returns `false` if the descriptor declares no capability on its primary
    /// side or if a descriptor with the same name is already registered for
    /// that key.
    pub fn register(&self, descriptor: PluginDescriptor) -> bool {
        let Some(mime) = descriptor.primary_mime().map(str::to_string) else {
            tracing::warn!(plugin = %descriptor.name, "descriptor has no capability, ignored");
            return false;
        };
        let mut entries = self.entries.write().unwrap();
        let list = entries.entry((descriptor.kind, mime.clone())).or_default();
        if list.iter().any(|d| d.name == descriptor.name) {
            tracing::warn!(plugin = %descriptor.name, mime = %mime, "duplicate registration ignored");
            return false;
        }
        tracing::debug!(plugin = %descriptor.name, kind = ?descriptor.kind, mime = %mime, "plugin registered");
        list.push(Arc::new(descriptor));
        true
    }

    /// Candidates for `kind` whose primary MIME is `mime`, in registration order.
    pub fn candidates(&self, kind: PluginKind, mime: &str) -> Vec<Arc<PluginDescriptor>> {
        self.entries
            .read()
            .unwrap()
            .get(&(kind, mime.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    /// First descriptor of `kind` named `name`.
    pub fn find(&self, kind: PluginKind, name: &str) -> Option<Arc<PluginDescriptor>> {
        let entries = self.entries.read().unwrap();
        let mut keys: Vec<&RegistryKey> = entries.keys().filter(|(k, _)| *k == kind).collect();
        keys.sort();
        keys.into_iter()
            .filter_map(|key| entries.get(key))
            .flatten()
            .find(|d| d.name == name)
            .cloned()
    }

    /// Number of registered descriptors.
    pub fn len(&self) -> usize {
        self.entries.read().unwrap().values().map(Vec::len).sum()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let entries = self.entries.read().unwrap();
        let mut keys: Vec<_> = entries.keys().collect();
        keys.sort();
        f.debug_struct("PluginRegistry")
            .field("keys", &keys)
            .finish()
    }
}
