//! Named component types resolved while a sitemap is built.
//!
//! Stage types are stored as factories so the tree holds an already resolved
//! handle and each request only instantiates fresh stage values. Registries can
//! be layered: a sitemap-local registry falls back to its parent for anything it
//! does not declare itself.

use std::{
    collections::HashMap,
    fmt,
    sync::{
        Arc, RwLock,
        atomic::{AtomicBool, Ordering},
    },
};

use tracing::debug;

use crate::cache::lock::{rw_read, rw_write};
use crate::error::ConfigurationError;
use crate::pipeline::{Generator, Reader, Serializer, Transformer};
use crate::tree::{Action, HeaderSelector, Matcher, ParameterSelector, Selector, WildcardMatcher};

const SOURCE: &str = "registry";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentKind {
    Generator,
    Transformer,
    Serializer,
    Reader,
    Matcher,
    Selector,
    Action,
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ComponentKind::Generator => "generator",
            ComponentKind::Transformer => "transformer",
            ComponentKind::Serializer => "serializer",
            ComponentKind::Reader => "reader",
            ComponentKind::Matcher => "matcher",
            ComponentKind::Selector => "selector",
            ComponentKind::Action => "action",
        };
        f.write_str(label)
    }
}

/// A resolved stage type: its configured name plus a factory for fresh instances.
pub struct StageType<T: ?Sized> {
    name: Arc<str>,
    factory: Arc<dyn Fn() -> Box<T> + Send + Sync>,
}

pub type GeneratorType = StageType<dyn Generator>;
pub type TransformerType = StageType<dyn Transformer>;
pub type SerializerType = StageType<dyn Serializer>;
pub type ReaderType = StageType<dyn Reader>;

impl<T: ?Sized> StageType<T> {
    pub fn new<F>(name: impl Into<Arc<str>>, factory: F) -> Self
    where
        F: Fn() -> Box<T> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            factory: Arc::new(factory),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn instantiate(&self) -> Box<T> {
        (self.factory)()
    }
}

impl<T: ?Sized> Clone for StageType<T> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            factory: Arc::clone(&self.factory),
        }
    }
}

impl<T: ?Sized> fmt::Debug for StageType<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageType").field("name", &self.name).finish()
    }
}

/// Compiles a pattern into a matcher bound to it.
pub type MatcherFactory =
    Arc<dyn Fn(&str) -> Result<Arc<dyn Matcher>, ConfigurationError> + Send + Sync>;

struct Slot<T> {
    entries: HashMap<String, T>,
    default: Option<String>,
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            default: None,
        }
    }
}

#[derive(Default)]
struct Components {
    generators: Slot<GeneratorType>,
    transformers: Slot<TransformerType>,
    serializers: Slot<SerializerType>,
    readers: Slot<ReaderType>,
    matchers: Slot<MatcherFactory>,
    selectors: Slot<Arc<dyn Selector>>,
    actions: Slot<Arc<dyn Action>>,
}

impl Components {
    fn clear(&mut self) {
        *self = Components::default();
    }
}

pub struct ComponentRegistry {
    parent: Option<Arc<ComponentRegistry>>,
    components: RwLock<Components>,
    disposed: AtomicBool,
}

impl ComponentRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            parent: None,
            components: RwLock::new(Components::default()),
            disposed: AtomicBool::new(false),
        }
    }

    /// A registry preloaded with the `wildcard` matcher and the `parameter`
    /// and `header` selectors, each declared as default for its kind.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.register_matcher("wildcard", |pattern| {
            WildcardMatcher::compile(pattern).map(|matcher| Arc::new(matcher) as Arc<dyn Matcher>)
        });
        registry.register_selector("parameter", Arc::new(ParameterSelector));
        registry.register_selector("header", Arc::new(HeaderSelector));
        registry.set_default(ComponentKind::Matcher, "wildcard");
        registry.set_default(ComponentKind::Selector, "parameter");
        registry
    }

    /// A registry layered over `parent`.
    pub fn child_of(parent: Arc<ComponentRegistry>) -> Self {
        Self {
            parent: Some(parent),
            ..Self::new()
        }
    }

    pub fn register_generator<F>(&self, name: &str, factory: F)
    where
        F: Fn() -> Box<dyn Generator> + Send + Sync + 'static,
    {
        let ty = StageType::new(name, factory);
        self.insert(|c| &mut c.generators, name, ty);
    }

    pub fn register_transformer<F>(&self, name: &str, factory: F)
    where
        F: Fn() -> Box<dyn Transformer> + Send + Sync + 'static,
    {
        let ty = StageType::new(name, factory);
        self.insert(|c| &mut c.transformers, name, ty);
    }

    pub fn register_serializer<F>(&self, name: &str, factory: F)
    where
        F: Fn() -> Box<dyn Serializer> + Send + Sync + 'static,
    {
        let ty = StageType::new(name, factory);
        self.insert(|c| &mut c.serializers, name, ty);
    }

    pub fn register_reader<F>(&self, name: &str, factory: F)
    where
        F: Fn() -> Box<dyn Reader> + Send + Sync + 'static,
    {
        let ty = StageType::new(name, factory);
        self.insert(|c| &mut c.readers, name, ty);
    }

    pub fn register_matcher<F>(&self, name: &str, factory: F)
    where
        F: Fn(&str) -> Result<Arc<dyn Matcher>, ConfigurationError> + Send + Sync + 'static,
    {
        let factory: MatcherFactory = Arc::new(factory);
        self.insert(|c| &mut c.matchers, name, factory);
    }

    pub fn register_selector(&self, name: &str, selector: Arc<dyn Selector>) {
        self.insert(|c| &mut c.selectors, name, selector);
    }

    pub fn register_action(&self, name: &str, action: Arc<dyn Action>) {
        self.insert(|c| &mut c.actions, name, action);
    }

    /// Declare `name` as the type used when a node omits an explicit type.
    pub fn set_default(&self, kind: ComponentKind, name: &str) {
        let mut components = rw_write(&self.components, SOURCE, "set_default");
        let name = Some(name.to_string());
        match kind {
            ComponentKind::Generator => components.generators.default = name,
            ComponentKind::Transformer => components.transformers.default = name,
            ComponentKind::Serializer => components.serializers.default = name,
            ComponentKind::Reader => components.readers.default = name,
            ComponentKind::Matcher => components.matchers.default = name,
            ComponentKind::Selector => components.selectors.default = name,
            ComponentKind::Action => components.actions.default = name,
        }
    }

    pub fn generator(&self, name: Option<&str>) -> Result<GeneratorType, ConfigurationError> {
        self.lookup(ComponentKind::Generator, name, |c| &c.generators)
    }

    pub fn transformer(&self, name: Option<&str>) -> Result<TransformerType, ConfigurationError> {
        self.lookup(ComponentKind::Transformer, name, |c| &c.transformers)
    }

    pub fn serializer(&self, name: Option<&str>) -> Result<SerializerType, ConfigurationError> {
        self.lookup(ComponentKind::Serializer, name, |c| &c.serializers)
    }

    pub fn reader(&self, name: Option<&str>) -> Result<ReaderType, ConfigurationError> {
        self.lookup(ComponentKind::Reader, name, |c| &c.readers)
    }

    /// Resolve a matcher type and compile `pattern` with it.
    pub fn matcher(
        &self,
        name: Option<&str>,
        pattern: &str,
    ) -> Result<Arc<dyn Matcher>, ConfigurationError> {
        let factory = self.lookup(ComponentKind::Matcher, name, |c| &c.matchers)?;
        factory(pattern)
    }

    pub fn selector(&self, name: Option<&str>) -> Result<Arc<dyn Selector>, ConfigurationError> {
        self.lookup(ComponentKind::Selector, name, |c| &c.selectors)
    }

    pub fn action(&self, name: Option<&str>) -> Result<Arc<dyn Action>, ConfigurationError> {
        self.lookup(ComponentKind::Action, name, |c| &c.actions)
    }

    /// Release every registered type. Later lookups fail.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        rw_write(&self.components, SOURCE, "dispose").clear();
        debug!("component registry disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    fn insert<T>(&self, slot: fn(&mut Components) -> &mut Slot<T>, name: &str, value: T) {
        let mut components = rw_write(&self.components, SOURCE, "register");
        slot(&mut components).entries.insert(name.to_string(), value);
    }

    fn lookup<T: Clone>(
        &self,
        kind: ComponentKind,
        name: Option<&str>,
        slot: fn(&Components) -> &Slot<T>,
    ) -> Result<T, ConfigurationError> {
        if self.is_disposed() {
            return Err(ConfigurationError::RegistryDisposed);
        }

        let name = match name {
            Some(name) => name.to_string(),
            None => self
                .default_name(slot)
                .ok_or(ConfigurationError::NoDefault { kind })?,
        };

        self.find(&name, slot)
            .ok_or(ConfigurationError::UnknownComponent { kind, name })
    }

    fn default_name<T>(&self, slot: fn(&Components) -> &Slot<T>) -> Option<String> {
        let local = {
            let components = rw_read(&self.components, SOURCE, "default_name");
            slot(&components).default.clone()
        };
        local.or_else(|| {
            self.parent
                .as_ref()
                .and_then(|parent| parent.default_name(slot))
        })
    }

    fn find<T: Clone>(&self, name: &str, slot: fn(&Components) -> &Slot<T>) -> Option<T> {
        let local = {
            let components = rw_read(&self.components, SOURCE, "find");
            slot(&components).entries.get(name).cloned()
        };
        local.or_else(|| {
            self.parent
                .as_ref()
                .and_then(|parent| parent.find(name, slot))
        })
    }
}

impl Default for ComponentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::error::ProcessingError;
    use crate::pipeline::{Event, EventSink, Stage};

    struct Empty;

    impl Stage for Empty {}

    impl Generator for Empty {
        fn generate(&mut self, _sink: &mut dyn EventSink) -> Result<(), ProcessingError> {
            Ok(())
        }
    }

    impl Serializer for Empty {
        fn serialize(&mut self, _event: Event, _out: &mut dyn Write) -> Result<(), ProcessingError> {
            Ok(())
        }
    }

    #[test]
    fn lookup_by_name_and_default() {
        let registry = ComponentRegistry::new();
        registry.register_generator("empty", || Box::new(Empty));
        registry.set_default(ComponentKind::Generator, "empty");

        assert_eq!(registry.generator(Some("empty")).expect("named").name(), "empty");
        assert_eq!(registry.generator(None).expect("default").name(), "empty");
    }

    #[test]
    fn unknown_names_and_missing_defaults_are_configuration_errors() {
        let registry = ComponentRegistry::new();
        assert_eq!(
            registry.serializer(Some("html")).expect_err("unknown"),
            ConfigurationError::UnknownComponent {
                kind: ComponentKind::Serializer,
                name: "html".to_string(),
            }
        );
        assert_eq!(
            registry.serializer(None).expect_err("no default"),
            ConfigurationError::NoDefault {
                kind: ComponentKind::Serializer
            }
        );
    }

    #[test]
    fn child_registry_falls_back_to_parent() {
        let parent = Arc::new(ComponentRegistry::with_builtins());
        parent.register_serializer("xml", || Box::new(Empty));

        let child = ComponentRegistry::child_of(Arc::clone(&parent));
        child.register_generator("local", || Box::new(Empty));

        assert!(child.serializer(Some("xml")).is_ok());
        assert!(child.matcher(None, "**").is_ok());
        assert!(child.generator(Some("local")).is_ok());
        assert!(parent.generator(Some("local")).is_err());
    }

    #[test]
    fn disposed_registry_refuses_lookups() {
        let registry = ComponentRegistry::with_builtins();
        registry.dispose();
        assert!(registry.is_disposed());
        assert_eq!(
            registry.selector(None).err(),
            Some(ConfigurationError::RegistryDisposed)
        );
    }

    #[test]
    fn builtin_matcher_compiles_patterns() {
        let registry = ComponentRegistry::with_builtins();
        assert!(registry.matcher(None, "docs/**").is_ok());
    }
}
