//! Hot-reloadable sitemap processors.
//!
//! A [`TreeProcessor`] owns the definition source of one sitemap and the
//! currently published [`ConcreteProcessor`] compiled from it. Requests load
//! the published tree without locking; a stale tree is rebuilt by a single
//! writer and swapped in atomically while other requests keep using the old
//! one.

mod builder;
mod concrete;
mod source;

use std::{
    io::Write,
    sync::{
        Arc, Mutex, Weak,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant, SystemTime},
};

use arc_swap::ArcSwapOption;
use metrics::{counter, histogram};
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use crate::cache::lock::{mutex_lock, mutex_try_lock};
use crate::config::Settings;
use crate::environment::Environment;
use crate::error::{ConfigurationError, ProcessingError};
use crate::pipeline::{PipelineFactory, ProcessingPipeline};
use crate::registry::ComponentRegistry;
use crate::tree::InvokeContext;

pub use builder::{BuildContext, TreeBuilder};
pub use concrete::ConcreteProcessor;
pub use source::{DelayedRefreshSource, FileSource, FileSourceResolver, Source, SourceResolver};

const SOURCE: &str = "processor";

pub const METRIC_TREE_REBUILD_TOTAL: &str = "sitemap_tree_rebuild_total";
pub const METRIC_TREE_REBUILD_FAILED_TOTAL: &str = "sitemap_tree_rebuild_failed_total";
pub const METRIC_TREE_BUILD_MS: &str = "sitemap_tree_build_ms";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ReloadSettings {
    /// Rebuild the tree when its definition changes.
    pub check_reload: bool,
    /// Minimum interval between two looks at the definition's stamp.
    pub reload_delay_ms: u64,
}

impl Default for ReloadSettings {
    fn default() -> Self {
        Self {
            check_reload: true,
            reload_delay_ms: 1000,
        }
    }
}

impl ReloadSettings {
    pub fn reload_delay(&self) -> Duration {
        Duration::from_millis(self.reload_delay_ms)
    }
}

/// Collaborators shared by a root processor and every processor mounted
/// beneath it.
#[derive(Clone)]
pub struct ProcessorServices {
    pub builder: Arc<dyn TreeBuilder>,
    pub factory: PipelineFactory,
    pub resolver: Arc<dyn SourceResolver>,
    pub reload: ReloadSettings,
}

impl ProcessorServices {
    pub fn new(builder: Arc<dyn TreeBuilder>, factory: PipelineFactory) -> Self {
        Self {
            builder,
            factory,
            resolver: Arc::new(FileSourceResolver),
            reload: ReloadSettings::default(),
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn SourceResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_reload(mut self, reload: ReloadSettings) -> Self {
        self.reload = reload;
        self
    }
}

struct FailedBuild {
    stamp: Option<SystemTime>,
    reason: String,
}

#[derive(Default)]
struct RebuildState {
    generation: u64,
    failed: Option<FailedBuild>,
}

pub struct TreeProcessor {
    me: Weak<TreeProcessor>,
    parent: Option<Weak<TreeProcessor>>,
    source: DelayedRefreshSource,
    registry: Arc<ComponentRegistry>,
    services: Arc<ProcessorServices>,
    current: ArcSwapOption<ConcreteProcessor>,
    rebuild: Mutex<RebuildState>,
    disposed: AtomicBool,
}

impl TreeProcessor {
    /// A root processor. `registry` holds the components shared by every
    /// sitemap; each compiled tree layers its own registry over it.
    pub fn new(
        source: Arc<dyn Source>,
        registry: Arc<ComponentRegistry>,
        services: ProcessorServices,
    ) -> Arc<Self> {
        Self::create(source, registry, Arc::new(services), None)
    }

    /// A root processor configured from loaded settings, with an in-memory
    /// cache store.
    pub fn from_settings(
        source: Arc<dyn Source>,
        builder: Arc<dyn TreeBuilder>,
        registry: Arc<ComponentRegistry>,
        settings: &Settings,
    ) -> Arc<Self> {
        let factory = PipelineFactory::with_lru(settings.cache.clone(), settings.pipeline.clone());
        let services = ProcessorServices::new(builder, factory).with_reload(settings.reload.clone());
        Self::new(source, registry, services)
    }

    fn create(
        source: Arc<dyn Source>,
        registry: Arc<ComponentRegistry>,
        services: Arc<ProcessorServices>,
        parent: Option<Weak<TreeProcessor>>,
    ) -> Arc<Self> {
        let source = DelayedRefreshSource::new(source, services.reload.reload_delay());
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            parent,
            source,
            registry,
            services,
            current: ArcSwapOption::empty(),
            rebuild: Mutex::new(RebuildState::default()),
            disposed: AtomicBool::new(false),
        })
    }

    /// A processor for a sitemap mounted below this one. It shares this
    /// processor's services and component registry.
    pub fn create_child(&self, source: Arc<dyn Source>) -> Arc<TreeProcessor> {
        self.create_child_with(source, Arc::clone(&self.registry))
    }

    pub(crate) fn create_child_with(
        &self,
        source: Arc<dyn Source>,
        registry: Arc<ComponentRegistry>,
    ) -> Arc<TreeProcessor> {
        debug!(parent = self.source_uri(), child = source.uri(), "Creating child processor");
        Self::create(
            source,
            registry,
            Arc::clone(&self.services),
            Some(self.me.clone()),
        )
    }

    pub(crate) fn resolve_source(&self, location: &str) -> Result<Arc<dyn Source>, ProcessingError> {
        self.services
            .resolver
            .resolve(self.source.inner().as_ref(), location)
    }

    pub fn source_uri(&self) -> &str {
        self.source.uri()
    }

    pub fn parent(&self) -> Option<Arc<TreeProcessor>> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// The outermost processor still alive above this one.
    pub fn root(self: &Arc<Self>) -> Arc<TreeProcessor> {
        let mut processor = Arc::clone(self);
        while let Some(parent) = processor.parent() {
            processor = parent;
        }
        processor
    }

    pub fn registry(&self) -> &Arc<ComponentRegistry> {
        &self.registry
    }

    pub fn pipeline_factory(&self) -> &PipelineFactory {
        &self.services.factory
    }

    /// The published tree, if one has been built. Does not trigger a build.
    pub fn current(&self) -> Option<Arc<ConcreteProcessor>> {
        self.current.load_full()
    }

    /// Route `env` and write the response into `out`.
    ///
    /// `Ok(false)` means no pipeline matched; the caller decides how to answer.
    #[instrument(skip_all, fields(uri = %env.uri(), source = self.source_uri()))]
    pub fn process(&self, env: &mut Environment, out: &mut dyn Write) -> Result<bool, ProcessingError> {
        let processor = self.current_processor()?;
        processor.process(env, &self.services.factory, out)
    }

    /// Route `env` and return the assembled pipeline unexecuted. Pipelines
    /// reserved for internal requests are reachable here.
    #[instrument(skip_all, fields(uri = %env.uri(), source = self.source_uri()))]
    pub fn build_pipeline(
        &self,
        env: &mut Environment,
    ) -> Result<Box<dyn ProcessingPipeline>, ProcessingError> {
        let processor = self.current_processor()?;
        processor
            .build_pipeline(env, &self.services.factory)?
            .ok_or_else(|| ProcessingError::not_found(env.request_uri()))
    }

    /// Continue a traversal started by an enclosing sitemap.
    pub fn invoke_in(
        &self,
        env: &mut Environment,
        ctx: &mut InvokeContext<'_>,
    ) -> Result<bool, ProcessingError> {
        let processor = self.current_processor()?;
        processor.invoke(env, ctx)
    }

    /// Drop the published tree. On the root processor this also disposes the
    /// shared component registry; requests still running finish on the tree
    /// they hold.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.current.store(None);
        if self.is_root() {
            self.registry.dispose();
        }
        info!(source = self.source_uri(), root = self.is_root(), "Tree processor disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    fn current_processor(&self) -> Result<Arc<ConcreteProcessor>, ProcessingError> {
        if self.is_disposed() {
            return Err(ConfigurationError::ProcessorDisposed {
                uri: self.source_uri().to_string(),
            }
            .into());
        }

        if let Some(current) = self.current.load_full() {
            if !self.needs_rebuild(&current, self.source.last_modified()) {
                return Ok(current);
            }
            return match mutex_try_lock(&self.rebuild, SOURCE, "rebuild") {
                Some(mut state) => self.rebuild(&mut state),
                None => {
                    debug!(source = self.source_uri(), "Rebuild in progress, serving previous tree");
                    Ok(current)
                }
            };
        }

        let mut state = mutex_lock(&self.rebuild, SOURCE, "rebuild");
        self.rebuild(&mut state)
    }

    fn needs_rebuild(&self, current: &ConcreteProcessor, stamp: Option<SystemTime>) -> bool {
        self.services.reload.check_reload && is_newer(stamp, current.source_stamp())
    }

    /// Runs with the rebuild lock held. Checks again whether a build is still
    /// needed, since another thread may have published one meanwhile.
    fn rebuild(&self, state: &mut RebuildState) -> Result<Arc<ConcreteProcessor>, ProcessingError> {
        let stamp = self.source.last_modified();
        let current = self.current.load_full();
        if let Some(current) = &current {
            if !self.needs_rebuild(current, stamp) {
                return Ok(Arc::clone(current));
            }
        }

        if let Some(failed) = &state.failed {
            if failed.stamp == stamp {
                return match current {
                    Some(current) => Ok(current),
                    None => Err(ConfigurationError::build(self.source_uri(), failed.reason.clone()).into()),
                };
            }
        }

        let generation = state.generation + 1;
        match self.build(stamp, generation) {
            Ok(processor) => {
                let processor = Arc::new(processor);
                self.current.store(Some(Arc::clone(&processor)));
                state.generation = generation;
                state.failed = None;
                counter!(METRIC_TREE_REBUILD_TOTAL).increment(1);
                info!(source = self.source_uri(), generation, "Sitemap tree published");
                Ok(processor)
            }
            Err(error) => {
                counter!(METRIC_TREE_REBUILD_FAILED_TOTAL).increment(1);
                warn!(
                    source = self.source_uri(),
                    error = %error,
                    keeps_previous = current.is_some(),
                    "Sitemap tree build failed"
                );
                state.failed = Some(FailedBuild {
                    stamp,
                    reason: error.to_string(),
                });
                match current {
                    Some(current) => Ok(current),
                    None => Err(error),
                }
            }
        }
    }

    fn build(&self, stamp: Option<SystemTime>, generation: u64) -> Result<ConcreteProcessor, ProcessingError> {
        let started = Instant::now();
        let registry = Arc::new(ComponentRegistry::child_of(Arc::clone(&self.registry)));
        let ctx = BuildContext::new(self, &registry);
        let root = self.services.builder.build(&self.source, &ctx)?;
        histogram!(METRIC_TREE_BUILD_MS).record(started.elapsed().as_secs_f64() * 1000.0);

        Ok(ConcreteProcessor::new(
            root,
            registry,
            self.source_uri(),
            stamp,
            generation,
        ))
    }
}

impl Drop for TreeProcessor {
    fn drop(&mut self) {
        debug!(source = self.source.uri(), "Tree processor dropped");
    }
}

/// A definition whose stamp disappeared is left alone: the tree already built
/// keeps serving.
fn is_newer(stamp: Option<SystemTime>, built: Option<SystemTime>) -> bool {
    match (stamp, built) {
        (Some(now), Some(built)) => now > built,
        (Some(_), None) => true,
        (None, _) => false,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn newer_stamps_trigger_rebuilds() {
        let then = SystemTime::UNIX_EPOCH + Duration::from_secs(10);
        let later = then + Duration::from_secs(1);

        assert!(is_newer(Some(later), Some(then)));
        assert!(!is_newer(Some(then), Some(then)));
        assert!(!is_newer(Some(then), Some(later)));
        assert!(is_newer(Some(then), None));
        assert!(!is_newer(None, Some(then)));
    }

    #[test]
    fn reload_settings_default_to_one_second() {
        let settings = ReloadSettings::default();
        assert!(settings.check_reload);
        assert_eq!(settings.reload_delay(), Duration::from_secs(1));
    }
}
