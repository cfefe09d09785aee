//! Plugin descriptors, parameter maps and the instance traits.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::ser::{Serialize, SerializeMap, SerializeStruct, Serializer};

use crate::dom::{ElementPath, Variant};

/// Extension point categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PluginKind {
    Fixup,
    Transformer,
    Analyzer,
    Publisher,
    Logger,
    Strategy,
    Monitor,
}

impl PluginKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fixup => "fixup",
            Self::Transformer => "transformer",
            Self::Analyzer => "analyzer",
            Self::Publisher => "publisher",
            Self::Logger => "logger",
            Self::Strategy => "strategy",
            Self::Monitor => "monitor",
        }
    }
}

impl fmt::Display for PluginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declared type of a plugin parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    String,
    Int,
    UInt,
    Bool,
    Double,
    /// Name of a data element, bound by the relation binder.
    ElementRef,
}

/// One declared parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamDescriptor {
    pub name: &'static str,
    pub kind: ParamKind,
    pub required: bool,
    pub default: Option<&'static str>,
    pub description: &'static str,
}

impl ParamDescriptor {
    #[must_use]
    pub const fn required(name: &'static str, kind: ParamKind, description: &'static str) -> Self {
        Self {
            name,
            kind,
            required: true,
            default: None,
            description,
        }
    }

    #[must_use]
    pub const fn optional(
        name: &'static str,
        kind: ParamKind,
        default: Option<&'static str>,
        description: &'static str,
    ) -> Self {
        Self {
            name,
            kind,
            required: false,
            default,
            description,
        }
    }
}

/// A parameter name that is still accepted but no longer meaningful.
///
/// With a `replacement` the value is moved to the new name; otherwise it is
/// dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObsoleteParam {
    pub name: &'static str,
    pub replacement: Option<&'static str>,
}

/// Outcome of a plugin constructor.
pub type ConstructResult<T> = std::result::Result<Arc<T>, String>;

/// Constructor function, tagged by category.
#[derive(Clone, Copy)]
pub enum Constructor {
    Fixup(fn(&ParamMap) -> ConstructResult<dyn Fixup>),
    Transformer(fn(&ParamMap) -> ConstructResult<dyn Transformer>),
    Analyzer(fn(&ParamMap) -> ConstructResult<dyn Analyzer>),
    Publisher(fn(&ParamMap) -> ConstructResult<dyn Publisher>),
    Logger(fn(&ParamMap) -> ConstructResult<dyn Logger>),
    Strategy(fn(&ParamMap) -> ConstructResult<dyn MutationStrategy>),
}

impl fmt::Debug for Constructor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Self::Fixup(_) => "Fixup",
            Self::Transformer(_) => "Transformer",
            Self::Analyzer(_) => "Analyzer",
            Self::Publisher(_) => "Publisher",
            Self::Logger(_) => "Logger",
            Self::Strategy(_) => "Strategy",
        };
        write!(f, "Constructor::{kind}")
    }
}

/// Declared metadata of one plugin type.
#[derive(Debug, Clone)]
pub struct PluginDescriptor {
    pub kind: PluginKind,
    pub name: &'static str,
    pub aliases: Vec<&'static str>,
    pub params: Vec<ParamDescriptor>,
    pub obsolete: Vec<ObsoleteParam>,
    pub constructor: Constructor,
}

impl PluginDescriptor {
    #[must_use]
    pub fn new(kind: PluginKind, name: &'static str, constructor: Constructor) -> Self {
        Self {
            kind,
            name,
            aliases: Vec::new(),
            params: Vec::new(),
            obsolete: Vec::new(),
            constructor,
        }
    }

    #[must_use]
    pub fn alias(mut self, alias: &'static str) -> Self {
        self.aliases.push(alias);
        self
    }

    #[must_use]
    pub fn param(mut self, param: ParamDescriptor) -> Self {
        self.params.push(param);
        self
    }

    /// Accept `name` without error, moving it to `replacement` if given.
    #[must_use]
    pub fn obsolete(mut self, name: &'static str, replacement: Option<&'static str>) -> Self {
        self.obsolete.push(ObsoleteParam { name, replacement });
        self
    }

    /// Whether `class` names this plugin.
    #[must_use]
    pub fn matches(&self, class: &str) -> bool {
        self.name == class || self.aliases.iter().any(|a| *a == class)
    }

    #[must_use]
    pub fn find_param(&self, name: &str) -> Option<&ParamDescriptor> {
        self.params.iter().find(|p| p.name == name)
    }

    #[must_use]
    pub fn find_obsolete(&self, name: &str) -> Option<&ObsoleteParam> {
        self.obsolete.iter().find(|p| p.name == name)
    }

    /// Usage text listing every declared parameter in declaration order.
    ///
    /// # Examples
    /// ```
    /// use pit_compiler::plugin::{Constructor, ParamDescriptor, ParamKind, PluginDescriptor, PluginKind};
    /// use pit_compiler::plugin::builtin::null_publisher;
    ///
    /// let desc = PluginDescriptor::new(PluginKind::Publisher, "Demo", Constructor::Publisher(null_publisher))
    ///     .param(ParamDescriptor::required("Foo", ParamKind::String, "Foo value"))
    ///     .param(ParamDescriptor::optional("Bar", ParamKind::UInt, Some("1"), "Bar value"));
    /// assert_eq!(
    ///     desc.usage(),
    ///     "Supported Parameters:\n\n  Foo: [REQUIRED] Foo value\n  Bar: [OPTIONAL] Bar value (default: 1)"
    /// );
    /// ```
    #[must_use]
    pub fn usage(&self) -> String {
        let mut lines = vec!["Supported Parameters:".to_string(), String::new()];
        for param in &self.params {
            let marker = if param.required {
                "[REQUIRED]"
            } else {
                "[OPTIONAL]"
            };
            let mut line = format!("  {}: {} {}", param.name, marker, param.description);
            if let Some(default) = param.default {
                line.push_str(&format!(" (default: {default})"));
            }
            lines.push(line);
        }
        lines.join("\n")
    }
}

/// A `<Param>` value with its optional declared value type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub value: String,
    pub value_type: Option<String>,
}

/// Ordered parameter name to value mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParamMap {
    entries: IndexMap<String, Param>,
}

impl ParamMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a parameter; a later value for the same name wins.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.insert_typed(name, value, None);
    }

    pub fn insert_typed(
        &mut self,
        name: impl Into<String>,
        value: impl Into<String>,
        value_type: Option<String>,
    ) {
        self.entries.insert(
            name.into(),
            Param {
                value: value.into(),
                value_type,
            },
        );
    }

    pub fn remove(&mut self, name: &str) -> Option<Param> {
        self.entries.shift_remove(name)
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(|p| p.value.as_str())
    }

    #[must_use]
    pub fn param(&self, name: &str) -> Option<&Param> {
        self.entries.get(name)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(k, v)| (k.as_str(), v.value.as_str()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Value of a parameter the descriptor marks as required.
    pub fn required(&self, name: &str) -> std::result::Result<&str, String> {
        self.get(name)
            .ok_or_else(|| format!("parameter '{name}' has no value"))
    }

    pub fn parse_u64(&self, name: &str, fallback: u64) -> std::result::Result<u64, String> {
        match self.get(name) {
            Some(v) => v
                .trim()
                .parse()
                .map_err(|_| format!("parameter '{name}' value '{v}' is not an unsigned integer")),
            None => Ok(fallback),
        }
    }

    pub fn parse_bool(&self, name: &str, fallback: bool) -> std::result::Result<bool, String> {
        match self.get(name) {
            Some(v) => crate::xml::parse_bool(v)
                .ok_or_else(|| format!("parameter '{name}' value '{v}' is not a boolean")),
            None => Ok(fallback),
        }
    }
}

impl Serialize for ParamMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, param) in &self.entries {
            map.serialize_entry(name, &param.value)?;
        }
        map.end()
    }
}

/// Computes a value from the bytes of the element it references.
pub trait Fixup: fmt::Debug + Send + Sync {
    fn compute(&self, data: &[u8]) -> Variant;
}

/// Reversible encoding of an element's serialized bytes.
pub trait Transformer: fmt::Debug + Send + Sync {
    fn encode(&self, data: &[u8]) -> std::result::Result<Vec<u8>, String>;
    fn decode(&self, data: &[u8]) -> std::result::Result<Vec<u8>, String>;
}

/// Splits a cracked string value into sub-values.
pub trait Analyzer: fmt::Debug + Send + Sync {
    fn analyze(&self, text: &str) -> Vec<String>;
}

/// I/O adapter the engine sends test cases through.
pub trait Publisher: fmt::Debug + Send + Sync {
    /// Where this publisher sends data, e.g. `tcp://host:port`.
    fn describe(&self) -> String;
}

/// Records fuzzing results.
pub trait Logger: fmt::Debug + Send + Sync {
    fn describe(&self) -> String;
}

/// Chooses which mutations the engine runs.
pub trait MutationStrategy: fmt::Debug + Send + Sync {
    fn describe(&self) -> String;
}

/// A resolved plugin: its class, the parameters as written and the instance.
pub struct PluginRef<T: ?Sized> {
    pub class: String,
    pub params: ParamMap,
    /// Parameters whose values name data elements.
    pub element_refs: Vec<String>,
    /// Element paths those parameters resolved to.
    pub bindings: BTreeMap<String, ElementPath>,
    pub instance: Arc<T>,
}

impl<T: ?Sized> PluginRef<T> {
    /// Bound path for an element-reference parameter.
    #[must_use]
    pub fn binding(&self, param: &str) -> Option<&ElementPath> {
        self.bindings.get(param)
    }
}

impl<T: ?Sized> Clone for PluginRef<T> {
    fn clone(&self) -> Self {
        Self {
            class: self.class.clone(),
            params: self.params.clone(),
            element_refs: self.element_refs.clone(),
            bindings: self.bindings.clone(),
            instance: Arc::clone(&self.instance),
        }
    }
}

impl<T: ?Sized> fmt::Debug for PluginRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginRef")
            .field("class", &self.class)
            .field("params", &self.params)
            .field("bindings", &self.bindings)
            .finish_non_exhaustive()
    }
}

impl<T: ?Sized> Serialize for PluginRef<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("PluginRef", 3)?;
        state.serialize_field("class", &self.class)?;
        state.serialize_field("params", &self.params)?;
        state.serialize_field("bindings", &self.bindings)?;
        state.end()
    }
}

/// Typed access to one constructor category.
pub trait PluginCategory {
    const KIND: PluginKind;
    type Object: ?Sized + Send + Sync;

    /// Run the constructor if it belongs to this category.
    fn construct(
        constructor: &Constructor,
        params: &ParamMap,
    ) -> Option<ConstructResult<Self::Object>>;
}

macro_rules! plugin_category {
    ($category:ident, $kind:ident, $object:ty) => {
        #[doc = concat!("Category marker for `", stringify!($kind), "` plugins.")]
        pub enum $category {}

        impl PluginCategory for $category {
            const KIND: PluginKind = PluginKind::$kind;
            type Object = $object;

            fn construct(
                constructor: &Constructor,
                params: &ParamMap,
            ) -> Option<ConstructResult<Self::Object>> {
                match constructor {
                    Constructor::$kind(build) => Some(build(params)),
                    _ => None,
                }
            }
        }
    };
}

plugin_category!(Fixups, Fixup, dyn Fixup);
plugin_category!(Transformers, Transformer, dyn Transformer);
plugin_category!(Analyzers, Analyzer, dyn Analyzer);
plugin_category!(Publishers, Publisher, dyn Publisher);
plugin_category!(Loggers, Logger, dyn Logger);
plugin_category!(Strategies, Strategy, dyn MutationStrategy);
