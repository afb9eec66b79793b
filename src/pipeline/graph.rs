//! Filter pipeline backed by a daggy arena.

use crate::error::{FilterError, FilterResult};
use crate::filter::{Filter, FilterEventReceiver, FilterGraph, FilterId, Link, OutPort};
use crate::observability::trace_state_change;
use daggy::petgraph::Direction;
use daggy::petgraph::algo::toposort;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock, Weak};

/// State of a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PipelineState {
    /// Built, filters hold no plugin.
    #[default]
    Created,
    /// Every filter prepared.
    Ready,
    /// Every filter running.
    Running,
    /// Every filter paused.
    Paused,
}

/// A linear chain of filters.
///
/// Filters live in a DAG arena shared with their output ports. Links are
/// 1:1, so every filter has at most one upstream and one downstream
/// neighbour. Lifecycle calls walk the arena in topological order:
/// `prepare` and `stop` from the source, `start` from the sink so that
/// consumers are running before producers feed them.
pub struct PipelineCore {
    graph: Arc<RwLock<FilterGraph>>,
    names: Mutex<HashMap<String, FilterId>>,
    state: Mutex<PipelineState>,
}

impl PipelineCore {
    /// Create an empty pipeline.
    pub fn new() -> Self {
        Self {
            graph: Arc::new(RwLock::new(FilterGraph::new())),
            names: Mutex::new(HashMap::new()),
            state: Mutex::new(PipelineState::Created),
        }
    }

    /// Current state.
    pub fn state(&self) -> PipelineState {
        *self.state.lock().unwrap()
    }

    fn set_state(&self, next: PipelineState) {
        let mut state = self.state.lock().unwrap();
        let current = *state;
        *state = next;
        drop(state);
        if current != next {
            trace_state_change("pipeline", &current, &next);
        }
    }

    /// Add a filter. Names must be unique within the pipeline.
    pub fn add_filter(&self, filter: Arc<dyn Filter>) -> FilterResult<FilterId> {
        let mut names = self.names.lock().unwrap();
        if names.contains_key(filter.name()) {
            return Err(FilterError::InvalidParameterValue);
        }
        let name = filter.name().to_string();
        let id = FilterId(self.graph.write().unwrap().add_node(filter));
        names.insert(name, id);
        Ok(id)
    }

    /// Link `upstream`'s output to `downstream`'s input.
    ///
    /// # Errors
    ///
    /// [`FilterError::InvalidLink`] if either side is already linked in
    /// that direction, if the link would close a cycle, or if `upstream`
    /// has no output port.
    pub fn link(&self, upstream: FilterId, downstream: FilterId) -> FilterResult {
        let (source, edge) = {
            let mut graph = self.graph.write().unwrap();
            let source = graph
                .node_weight(upstream.0)
                .cloned()
                .ok_or(FilterError::NotExisted)?;
            if graph.node_weight(downstream.0).is_none() {
                return Err(FilterError::NotExisted);
            }
            let links = graph.graph();
            if links
                .neighbors_directed(upstream.0, Direction::Outgoing)
                .next()
                .is_some()
                || links
                    .neighbors_directed(downstream.0, Direction::Incoming)
                    .next()
                    .is_some()
            {
                return Err(FilterError::InvalidLink);
            }
            let edge = graph
                .add_edge(upstream.0, downstream.0, Link)
                .map_err(|_| FilterError::InvalidLink)?;
            (source, edge)
        };

        let port = OutPort::new(Arc::downgrade(&self.graph), downstream);
        if let Err(err) = source.link_downstream(port) {
            self.graph.write().unwrap().remove_edge(edge);
            return Err(err);
        }
        tracing::debug!(
            upstream = %source.name(),
            downstream = downstream.index(),
            "filters linked"
        );
        Ok(())
    }

    /// Filter by id.
    pub fn filter(&self, id: FilterId) -> Option<Arc<dyn Filter>> {
        self.graph.read().unwrap().node_weight(id.0).cloned()
    }

    /// Filter by name.
    pub fn filter_by_name(&self, name: &str) -> Option<Arc<dyn Filter>> {
        let id = *self.names.lock().unwrap().get(name)?;
        self.filter(id)
    }

    /// All filters, sources first.
    pub fn filters(&self) -> Vec<Arc<dyn Filter>> {
        let graph = self.graph.read().unwrap();
        match toposort(graph.graph(), None) {
            Ok(order) => order
                .into_iter()
                .filter_map(|idx| graph.node_weight(idx).cloned())
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Number of filters.
    pub fn len(&self) -> usize {
        self.graph.read().unwrap().node_count()
    }

    /// Whether the pipeline holds no filter.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bind every filter to `receiver`.
    pub fn init(&self, receiver: Weak<dyn FilterEventReceiver>) -> FilterResult {
        for filter in self.filters() {
            filter.init(receiver.clone())?;
        }
        Ok(())
    }

    /// Prepare every filter, sources first. A failure resets the pipeline.
    pub fn prepare(&self) -> FilterResult {
        match self.state() {
            PipelineState::Created => {}
            PipelineState::Ready => return Ok(()),
            PipelineState::Running | PipelineState::Paused => return Err(FilterError::InvalidState),
        }
        for filter in self.filters() {
            if let Err(err) = filter.prepare() {
                tracing::warn!(filter = %filter.name(), error = %err, "pipeline prepare failed");
                self.reset_filters();
                return Err(err);
            }
        }
        self.set_state(PipelineState::Ready);
        Ok(())
    }

    /// Start every filter, sinks first. A failure stops the pipeline.
    pub fn start(&self) -> FilterResult {
        match self.state() {
            PipelineState::Ready => {}
            PipelineState::Running => return Ok(()),
            PipelineState::Created | PipelineState::Paused => return Err(FilterError::InvalidState),
        }
        for filter in self.filters().into_iter().rev() {
            if let Err(err) = filter.start() {
                tracing::warn!(filter = %filter.name(), error = %err, "pipeline start failed");
                self.reset_filters();
                self.set_state(PipelineState::Created);
                return Err(err);
            }
        }
        self.set_state(PipelineState::Running);
        Ok(())
    }

    /// Stop every filter, sources first, releasing their plugins.
    ///
    /// Every filter is stopped even if one fails; the first error is
    /// returned.
    pub fn stop(&self) -> FilterResult {
        if self.state() == PipelineState::Created {
            return Ok(());
        }
        let mut result = Ok(());
        for filter in self.filters() {
            if let Err(err) = filter.stop() {
                tracing::warn!(filter = %filter.name(), error = %err, "filter stop failed");
                result = result.and(Err(err));
            }
        }
        self.set_state(PipelineState::Created);
        result
    }

    /// Pause every filter.
    pub fn pause(&self) -> FilterResult {
        match self.state() {
            PipelineState::Running => {}
            PipelineState::Paused => return Ok(()),
            _ => return Err(FilterError::InvalidState),
        }
        for filter in self.filters() {
            filter.pause()?;
        }
        self.set_state(PipelineState::Paused);
        Ok(())
    }

    /// Resume every filter.
    pub fn resume(&self) -> FilterResult {
        match self.state() {
            PipelineState::Paused => {}
            PipelineState::Running => return Ok(()),
            _ => return Err(FilterError::InvalidState),
        }
        for filter in self.filters() {
            filter.resume()?;
        }
        self.set_state(PipelineState::Running);
        Ok(())
    }

    /// Release every filter's plugin from any state.
    pub fn reset(&self) -> FilterResult {
        self.reset_filters();
        self.set_state(PipelineState::Created);
        Ok(())
    }

    fn reset_filters(&self) {
        for filter in self.filters() {
            if let Err(err) = filter.reset() {
                tracing::debug!(filter = %filter.name(), error = %err, "filter reset failed");
            }
        }
    }
}

impl Default for PipelineCore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PipelineCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<String> = self.filters().iter().map(|f| f.name().to_string()).collect();
        f.debug_struct("PipelineCore")
            .field("filters", &names)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::AvTransBuffer;
    use crate::channel::{ChannelAdapter, LoopbackBus};
    use crate::config::TransportConfig;
    use crate::filter::{AvInputFilter, AvOutputFilter, CodecFilter, FilterState};
    use crate::format::{Capability, MediaType, VideoPixelFormat, mime};
    use crate::plugin::{
        ParamValue, PluginContext, PluginDescriptor, PluginEvent, PluginKind, PluginRegistry, Tag,
    };
    use crate::plugins::{
        LOCAL_AUDIO_SERVICE_INPUT, LOCAL_AUDIO_SERVICE_OUTPUT, LocalScreenInput, LocalScreenOutput,
        register_builtin,
    };
    use std::sync::mpsc;
    use std::time::Duration;

    #[derive(Default)]
    struct Events(Mutex<Vec<(String, PluginEvent)>>);

    impl FilterEventReceiver for Events {
        fn on_filter_event(&self, filter: &str, event: PluginEvent) {
            self.0.lock().unwrap().push((filter.to_string(), event));
        }
    }

    fn receiver(events: &Arc<Events>) -> Weak<dyn FilterEventReceiver> {
        let weak: Weak<Events> = Arc::downgrade(events);
        weak
    }

    fn context() -> PluginContext {
        let bus = LoopbackBus::new();
        let config = TransportConfig::default();
        PluginContext {
            channel: ChannelAdapter::new(bus.endpoint("dev-local"), &config),
            config: Arc::new(config),
        }
    }

    fn audio_pipeline(
        registry: Arc<PluginRegistry>,
    ) -> (PipelineCore, Arc<AvInputFilter>, Arc<AvOutputFilter>) {
        let ctx = context();
        let input = AvInputFilter::new(
            "aInput",
            Some(LOCAL_AUDIO_SERVICE_INPUT),
            Arc::clone(&registry),
            ctx.clone(),
        );
        let output = AvOutputFilter::new("aOutput", Some(LOCAL_AUDIO_SERVICE_OUTPUT), registry, ctx);
        let pipeline = PipelineCore::new();
        let a = pipeline.add_filter(input.clone()).unwrap();
        let b = pipeline.add_filter(output.clone()).unwrap();
        pipeline.link(a, b).unwrap();
        (pipeline, input, output)
    }

    #[test]
    fn test_links_are_one_to_one() {
        let registry = Arc::new(PluginRegistry::new());
        let ctx = context();
        let pipeline = PipelineCore::new();
        let a = pipeline
            .add_filter(AvInputFilter::new("a", None, Arc::clone(&registry), ctx.clone()))
            .unwrap();
        let b = pipeline
            .add_filter(CodecFilter::new("b", None, Arc::clone(&registry), ctx.clone()))
            .unwrap();
        let c = pipeline
            .add_filter(AvOutputFilter::new("c", None, Arc::clone(&registry), ctx.clone()))
            .unwrap();

        pipeline.link(a, b).unwrap();
        assert_eq!(pipeline.link(a, c), Err(FilterError::InvalidLink));
        pipeline.link(b, c).unwrap();
        assert_eq!(pipeline.link(c, a), Err(FilterError::InvalidLink));
        assert_eq!(
            pipeline.add_filter(AvOutputFilter::new("c", None, registry, ctx)),
            Err(FilterError::InvalidParameterValue)
        );

        let order: Vec<String> = pipeline.filters().iter().map(|f| f.name().to_string()).collect();
        assert_eq!(order, ["a", "b", "c"]);
    }

    #[test]
    fn test_audio_pipeline_delivers_to_sink() {
        let registry = Arc::new(PluginRegistry::new());
        register_builtin(&registry);
        let (pipeline, input, output) = audio_pipeline(registry);
        let events = Arc::new(Events::default());
        pipeline.init(receiver(&events)).unwrap();
        input
            .set_parameter(Tag::Mime, mime::AUDIO_RAW.into())
            .unwrap();
        input.set_parameter(Tag::AudioChannels, 2.into()).unwrap();

        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        output.set_data_sink(Arc::new(move |buffer: AvTransBuffer| {
            let _ = tx.lock().unwrap().send(buffer);
        }));

        pipeline.prepare().unwrap();
        assert_eq!(pipeline.state(), PipelineState::Ready);
        assert_eq!(input.state(), FilterState::Ready);
        assert_eq!(output.state(), FilterState::Ready);
        let plugin = output.plugin().unwrap();
        assert_eq!(plugin.name(), LOCAL_AUDIO_SERVICE_OUTPUT);
        assert_eq!(plugin.get_parameter(Tag::AudioChannels), Ok(ParamValue::Int(2)));
        assert_eq!(plugin.get_parameter(Tag::AudioSampleRate), Ok(ParamValue::Int(8000)));

        pipeline.start().unwrap();
        let frame = AvTransBuffer::with_data(MediaType::Audio, vec![1u8; 64]);
        input.push_data("aInput", frame).unwrap();
        let delivered = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(delivered.len(), 64);
        assert_eq!(delivered.meta().frame_num(), 1);

        let frame = AvTransBuffer::with_data(MediaType::Audio, vec![1u8; 8]);
        assert_eq!(
            input.push_data("elsewhere", frame),
            Err(FilterError::InvalidParameterValue)
        );

        pipeline.stop().unwrap();
        assert_eq!(pipeline.state(), PipelineState::Created);
        assert_eq!(input.state(), FilterState::Initialized);
        assert!(output.plugin().is_none());

        pipeline.prepare().unwrap();
        pipeline.start().unwrap();
        pipeline.stop().unwrap();
    }

    #[test]
    fn test_prepare_without_mime_resets() {
        let registry = Arc::new(PluginRegistry::new());
        register_builtin(&registry);
        let (pipeline, input, output) = audio_pipeline(registry);
        let events = Arc::new(Events::default());
        pipeline.init(receiver(&events)).unwrap();

        assert_eq!(pipeline.prepare(), Err(FilterError::InvalidParameterValue));
        assert_eq!(pipeline.state(), PipelineState::Created);
        assert_eq!(input.state(), FilterState::Initialized);
        assert_eq!(output.state(), FilterState::Initialized);
        assert_eq!(pipeline.start(), Err(FilterError::InvalidState));
    }

    #[test]
    fn test_negotiation_takes_first_accepted_capability() {
        let registry = Arc::new(PluginRegistry::new());
        registry.register(PluginDescriptor {
            name: "screen_in".into(),
            kind: PluginKind::Input,
            in_caps: Vec::new(),
            out_caps: vec![
                Capability::new(mime::VIDEO_RAW).with_pixel_formats([VideoPixelFormat::Nv12]),
                Capability::new(mime::VIDEO_RAW).with_pixel_formats([VideoPixelFormat::Rgba]),
                Capability::new(mime::VIDEO_RAW).with_pixel_formats([VideoPixelFormat::Nv21]),
            ],
            factory: LocalScreenInput::factory,
        });
        registry.register(PluginDescriptor {
            name: "screen_out".into(),
            kind: PluginKind::Output,
            in_caps: vec![
                Capability::new(mime::VIDEO_RAW)
                    .with_pixel_formats([VideoPixelFormat::Nv21, VideoPixelFormat::Rgba]),
            ],
            out_caps: Vec::new(),
            factory: LocalScreenOutput::factory,
        });

        let ctx = context();
        let input = AvInputFilter::new("vInput", None, Arc::clone(&registry), ctx.clone());
        let output = AvOutputFilter::new("vOutput", None, registry, ctx);
        let pipeline = PipelineCore::new();
        let a = pipeline.add_filter(input.clone()).unwrap();
        let b = pipeline.add_filter(output.clone()).unwrap();
        pipeline.link(a, b).unwrap();
        let events = Arc::new(Events::default());
        pipeline.init(receiver(&events)).unwrap();
        input.set_parameter(Tag::Mime, mime::VIDEO_RAW.into()).unwrap();

        pipeline.prepare().unwrap();
        let format = output
            .plugin()
            .unwrap()
            .get_parameter(Tag::VideoPixelFormat)
            .unwrap();
        assert_eq!(format, ParamValue::PixelFormat(VideoPixelFormat::Rgba));
        pipeline.reset().unwrap();
        assert!(input.plugin().is_none());
    }

    #[test]
    fn test_empty_pipeline_runs() {
        let pipeline = PipelineCore::new();
        assert!(pipeline.is_empty());
        pipeline.prepare().unwrap();
        pipeline.start().unwrap();
        pipeline.pause().unwrap();
        assert_eq!(pipeline.state(), PipelineState::Paused);
        pipeline.resume().unwrap();
        pipeline.stop().unwrap();
        assert_eq!(pipeline.state(), PipelineState::Created);
    }
}
