//! Resource and entry sources.
//!
//! [`ArrayLoader`] builds resources from plain definitions, [`CollectionLoader`] serves
//! resources built by hand, [`ChainLoader`] asks several loaders in turn and [`CacheLoader`]
//! keeps the serialized form of loaded resources in a [`Cache`].

use log::{debug, trace, warn};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use crate::config::{AclConfig, DEFAULT_CACHE_PREFIX};
use crate::entry::{entry_not_found, Entry, EntryLoader, EntryResolver};
use crate::error::{Error, Result};
use crate::resource::{processor_key, Behaviour, Resource};


// ResourceLoader /////////////////////////////////////////////////////////////////////////////////


/// Source of resources by name.
pub trait ResourceLoader {

    /// Fails with [`Error::ResourceNotFound`] if the name is unknown.
    fn load_resource(&self, name: &str) -> Result<Resource>;

} // trait ResourceLoader

/// A loader serving both resources and their entries.
pub trait Loader: ResourceLoader + EntryLoader {}

impl<T: ResourceLoader + EntryLoader> Loader for T {}

impl<T: ResourceLoader + ?Sized> ResourceLoader for Rc<T> {

    fn load_resource(&self, name: &str) -> Result<Resource> {
        (**self).load_resource(name)
    } // load_resource

} // impl ResourceLoader for Rc<T>

impl<T: EntryLoader + ?Sized> EntryLoader for Rc<T> {

    fn load_entry(&self, resource: &Resource, entry: &str, processor: Option<&str>) -> Result<Entry> {
        (**self).load_entry(resource, entry, processor)
    } // load_entry

} // impl EntryLoader for Rc<T>


// ResourceDefinition /////////////////////////////////////////////////////////////////////////////


/// Declarative form of a resource, as read by [`ArrayLoader`]. Entries are grouped by processor,
/// the empty key holding entries owned by none.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceDefinition {
    pub name:        String,
    #[serde(default)]
    pub behaviour:   Behaviour,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent:      Option<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default)]
    pub entries:     BTreeMap<String, BTreeMap<String, Vec<String>>>,
} // struct ResourceDefinition

impl ResourceDefinition {

    pub fn new<S: Into<String>>(name: S, behaviour: Behaviour) -> Self {
        ResourceDefinition{name: name.into(), behaviour, ..Default::default()}
    } // new

    pub fn extends<S: Into<String>>(mut self, parent: S) -> Self {
        self.parent = Some(parent.into());
        self
    } // extends

    pub fn permissions<S: AsRef<str>>(mut self, names: &[S]) -> Self {
        self.permissions.extend(names.iter().map(|n| String::from(n.as_ref())));
        self
    } // permissions

    /// Declares an entry. Items are permission names or `[Entry]` references.
    pub fn entry<S: AsRef<str>>(mut self, processor: Option<&str>, name: &str, items: &[S]) -> Self {
        self.entries
            .entry(String::from(processor_key(processor)))
            .or_insert_with(BTreeMap::new)
            .insert(String::from(name), items.iter().map(|i| String::from(i.as_ref())).collect());
        self
    } // entry

} // impl ResourceDefinition


// ArrayLoader ////////////////////////////////////////////////////////////////////////////////////


/// Builds resources from in memory definitions. Loading a resource builds its ancestors first,
/// then compiles every entry it declares into a bit value.
#[derive(Clone, Debug, Default)]
pub struct ArrayLoader {
    definitions: BTreeMap<String, ResourceDefinition>,
} // struct ArrayLoader

impl ArrayLoader {

    pub fn new(definitions: Vec<ResourceDefinition>) -> Self {
        let mut loader = ArrayLoader::default();

        for definition in definitions {
            loader.add(definition);
        } // for
        loader
    } // new

    /// Reads a JSON array of definitions.
    pub fn from_json(json: &str) -> Result<Self> {
        let definitions: Vec<ResourceDefinition> = serde_json::from_str(json)?;
        Ok(ArrayLoader::new(definitions))
    } // from_json

    /// Adds a definition, replacing any with the same name.
    pub fn add(&mut self, definition: ResourceDefinition) -> Option<ResourceDefinition> {
        trace!("adding definition of {}", definition.name);
        self.definitions.insert(definition.name.clone(), definition)
    } // add

    pub fn definition(&self, name: &str) -> Option<&ResourceDefinition> {
        self.definitions.get(name)
    } // definition

    fn build(&self, name: &str, chain: &mut Vec<String>) -> Result<Resource> {
        let definition = self.definitions.get(name).ok_or_else(|| {
            debug!("no definition of {}", name);
            Error::ResourceNotFound(String::from(name))
        })?;

        if chain.iter().any(|n| n == name) {
            warn!("circular inheritance: {} -> {}", chain.join(" -> "), name);
            return Err(Error::Logic(format!("circular inheritance: {} -> {}", chain.join(" -> "), name)));
        } // if
        chain.push(String::from(name));

        let mut resource = Resource::new(name, definition.behaviour);

        resource.add_permissions(&definition.permissions)?;
        if let Some(parent) = &definition.parent {
            let parent = self.build(parent, chain)?;
            resource.extends_from(&parent)?;
        } // if
        chain.pop();

        let resolver = EntryResolver::new(self, self);

        for (key, entries) in &definition.entries {
            let processor = if key.is_empty() { None } else { Some(key.as_str()) };

            for entry in entries.keys() {
                let value = resolver.resolve_mask(&resource, entry, processor)?;
                resource.add_entry(processor, entry, value)?;
            } // for
        } // for
        debug!("built {} with {} permissions", name, resource.count());
        Ok(resource)
    } // build

} // impl ArrayLoader

impl ResourceLoader for ArrayLoader {

    fn load_resource(&self, name: &str) -> Result<Resource> {
        trace!("loading {} from definitions", name);
        self.build(name, &mut vec![])
    } // load_resource

} // impl ResourceLoader for ArrayLoader

impl EntryLoader for ArrayLoader {

    fn load_entry(&self, resource: &Resource, entry: &str, processor: Option<&str>) -> Result<Entry> {
        self.definitions
            .get(resource.name())
            .and_then(|d| d.entries.get(processor_key(processor)))
            .and_then(|e| e.get(entry))
            .map(|items| Entry::new(entry, items.clone(), processor))
            .ok_or_else(|| entry_not_found(entry, vec![String::from(resource.name())]))
    } // load_entry

} // impl EntryLoader for ArrayLoader


// CollectionLoader ///////////////////////////////////////////////////////////////////////////////


/// Serves ready built resources. Entries are read back from the compiled values, listing the
/// permissions whose bits they carry.
#[derive(Clone, Debug, Default)]
pub struct CollectionLoader {
    resources: BTreeMap<String, Resource>,
} // struct CollectionLoader

impl CollectionLoader {

    pub fn new(resources: Vec<Resource>) -> Self {
        let mut loader = CollectionLoader::default();

        for resource in resources {
            loader.insert(resource);
        } // for
        loader
    } // new

    pub fn insert(&mut self, resource: Resource) -> Option<Resource> {
        self.resources.insert(String::from(resource.name()), resource)
    } // insert

} // impl CollectionLoader

impl ResourceLoader for CollectionLoader {

    fn load_resource(&self, name: &str) -> Result<Resource> {
        self.resources.get(name).cloned().ok_or_else(|| Error::ResourceNotFound(String::from(name)))
    } // load_resource

} // impl ResourceLoader for CollectionLoader

impl EntryLoader for CollectionLoader {

    fn load_entry(&self, resource: &Resource, entry: &str, processor: Option<&str>) -> Result<Entry> {
        let value = resource
            .entry(processor, entry)
            .ok_or_else(|| entry_not_found(entry, vec![String::from(resource.name())]))?;
        let permissions = resource
            .permission_names()
            .into_iter()
            .filter(|name| resource.permissions()[*name] & value != 0)
            .map(String::from)
            .collect();

        Ok(Entry::new(entry, permissions, processor))
    } // load_entry

} // impl EntryLoader for CollectionLoader


// ChainLoader ////////////////////////////////////////////////////////////////////////////////////


/// Asks its loaders in order. A loader not knowing a resource or entry passes to the next one,
/// any other failure stops the chain.
#[derive(Default)]
pub struct ChainLoader {
    loaders: Vec<Box<dyn Loader>>,
} // struct ChainLoader

impl ChainLoader {

    pub fn new() -> Self {
        ChainLoader::default()
    } // new

    pub fn with<L: Loader + 'static>(mut self, loader: L) -> Self {
        self.push(loader);
        self
    } // with

    pub fn push<L: Loader + 'static>(&mut self, loader: L) {
        self.loaders.push(Box::new(loader));
    } // push

    #[inline]
    pub fn len(&self) -> usize {
        self.loaders.len()
    } // len

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.loaders.is_empty()
    } // is_empty

} // impl ChainLoader

impl ResourceLoader for ChainLoader {

    fn load_resource(&self, name: &str) -> Result<Resource> {
        for (i, loader) in self.loaders.iter().enumerate() {
            match loader.load_resource(name) {
                Err(Error::ResourceNotFound(_)) => trace!("loader {} does not know {}", i, name),
                result                          => return result,
            } // match
        } // for
        Err(Error::ResourceNotFound(String::from(name)))
    } // load_resource

} // impl ResourceLoader for ChainLoader

impl EntryLoader for ChainLoader {

    fn load_entry(&self, resource: &Resource, entry: &str, processor: Option<&str>) -> Result<Entry> {
        for (i, loader) in self.loaders.iter().enumerate() {
            match loader.load_entry(resource, entry, processor) {
                Err(Error::EntryNotFound{..}) => trace!("loader {} does not know entry {}", i, entry),
                result                        => return result,
            } // match
        } // for
        Err(entry_not_found(entry, vec![String::from(resource.name())]))
    } // load_entry

} // impl EntryLoader for ChainLoader


// Cache //////////////////////////////////////////////////////////////////////////////////////////


/// Key/value store for serialized resources.
pub trait Cache {

    fn get(&self, key: &str) -> Result<Option<String>>;

    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Returns true if a value was removed.
    fn delete(&self, key: &str) -> Result<bool>;

} // trait Cache

/// Process local [`Cache`].
#[derive(Debug, Default)]
pub struct MemoryCache {
    values: RefCell<HashMap<String, String>>,
} // struct MemoryCache

impl MemoryCache {

    pub fn new() -> Self {
        MemoryCache::default()
    } // new

    pub fn len(&self) -> usize {
        self.values.borrow().len()
    } // len

    pub fn is_empty(&self) -> bool {
        self.values.borrow().is_empty()
    } // is_empty

} // impl MemoryCache

impl Cache for MemoryCache {

    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.borrow().get(key).cloned())
    } // get

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.values.borrow_mut().insert(String::from(key), String::from(value));
        Ok(())
    } // set

    fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.values.borrow_mut().remove(key).is_some())
    } // delete

} // impl Cache for MemoryCache

impl<C: Cache + ?Sized> Cache for Rc<C> {

    fn get(&self, key: &str) -> Result<Option<String>> {
        (**self).get(key)
    } // get

    fn set(&self, key: &str, value: &str) -> Result<()> {
        (**self).set(key, value)
    } // set

    fn delete(&self, key: &str) -> Result<bool> {
        (**self).delete(key)
    } // delete

} // impl Cache for Rc<C>


// CacheLoader ////////////////////////////////////////////////////////////////////////////////////


/// Wraps a loader, storing every resource it loads as JSON under `prefix + name`. An unreadable
/// cached value is dropped and the resource loaded again. Entries are always read from the
/// wrapped loader.
pub struct CacheLoader<L, C> {
    inner:  L,
    cache:  C,
    prefix: String,
} // struct CacheLoader

impl<L, C> CacheLoader<L, C>
where
    L: ResourceLoader,
    C: Cache,
{

    pub fn new(inner: L, cache: C) -> Self {
        CacheLoader{inner, cache, prefix: String::from(DEFAULT_CACHE_PREFIX)}
    } // new

    /// Keys values with the prefix configured for the engine.
    pub fn with_config(inner: L, cache: C, config: &AclConfig) -> Self {
        CacheLoader::new(inner, cache).with_prefix(config.cache_prefix.as_str())
    } // with_config

    pub fn with_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.prefix = prefix.into();
        self
    } // with_prefix

    #[inline]
    pub fn key(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    } // key

    #[inline]
    pub fn cache(&self) -> &C {
        &self.cache
    } // cache

    /// Drops the cached value of a resource.
    pub fn invalidate(&self, name: &str) -> Result<bool> {
        debug!("invalidating cached {}", name);
        self.cache.delete(&self.key(name))
    } // invalidate

} // impl CacheLoader

impl<L, C> ResourceLoader for CacheLoader<L, C>
where
    L: ResourceLoader,
    C: Cache,
{

    fn load_resource(&self, name: &str) -> Result<Resource> {
        let key = self.key(name);

        if let Some(blob) = self.cache.get(&key)? {
            match serde_json::from_str::<Resource>(&blob) {
                Ok(resource) => {
                    trace!("cache hit for {}", key);
                    return Ok(resource);
                }, // Ok
                Err(err) => {
                    warn!("dropping unreadable cache value {}: {}", key, err);
                    self.cache.delete(&key)?;
                }, // Err
            } // match
        } // if

        trace!("cache miss for {}", key);
        let resource = self.inner.load_resource(name)?;

        self.cache.set(&key, &serde_json::to_string(&resource)?)?;
        Ok(resource)
    } // load_resource

} // impl ResourceLoader for CacheLoader

impl<L, C> EntryLoader for CacheLoader<L, C>
where
    L: EntryLoader,
{

    fn load_entry(&self, resource: &Resource, entry: &str, processor: Option<&str>) -> Result<Entry> {
        self.inner.load_entry(resource, entry, processor)
    } // load_entry

} // impl EntryLoader for CacheLoader


// Tests //////////////////////////////////////////////////////////////////////////////////////////


#[cfg(test)]
mod tests {

    use super::*;
    use std::cell::Cell;
    use test_env_log::test;

    const DEFINITIONS: &str = r#"[
        {
            "name": "Invoice",
            "behaviour": 0,
            "permissions": ["view", "edit", "delete"],
            "entries": {
                "": {"Manager": ["view", "edit"]},
                "role": {"intern": ["view", "delete"], "manager": ["view", "edit"], "accountant": ["[manager]"]}
            }
        },
        {
            "name": "RecurringInvoice",
            "parent": "Invoice",
            "permissions": ["schedule"],
            "entries": {"role": {"planner": ["[accountant]", "schedule"]}}
        }
    ]"#;

    struct Counting<L> {
        inner: L,
        loads: Cell<usize>,
    } // struct Counting

    impl<L: ResourceLoader> ResourceLoader for Counting<L> {

        fn load_resource(&self, name: &str) -> Result<Resource> {
            self.loads.set(self.loads.get() + 1);
            self.inner.load_resource(name)
        } // load_resource

    } // impl ResourceLoader for Counting

    #[test]
    fn array_loader() {
        let loader  = ArrayLoader::from_json(DEFINITIONS).unwrap();
        let invoice = loader.load_resource("Invoice").unwrap();

        assert_eq!(Behaviour::Whitelist, invoice.behaviour());
        assert_eq!(vec!["view", "edit", "delete"], invoice.permission_names());
        assert_eq!(Some(3), invoice.entry(None, "Manager"));
        assert_eq!(Some(5), invoice.entry(Some("role"), "intern"));
        assert_eq!(Some(3), invoice.entry(Some("role"), "accountant"));

        let recurring = loader.load_resource("RecurringInvoice").unwrap();

        assert_eq!(Some("Invoice"), recurring.parent());
        assert_eq!(8, recurring.get_permission("schedule").unwrap());
        assert_eq!(Some(11), recurring.entry(Some("role"), "planner"));
        assert_eq!(Some(5), recurring.entry(Some("role"), "intern"));

        assert!(matches!(loader.load_resource("Nope"), Err(Error::ResourceNotFound(_))));
    } // array_loader

    #[test]
    fn array_loader_errors() {
        let loader = ArrayLoader::new(vec![
            ResourceDefinition::new("A", Behaviour::Whitelist).extends("B"),
            ResourceDefinition::new("B", Behaviour::Whitelist).extends("A"),
            ResourceDefinition::new("Orphan", Behaviour::Whitelist).extends("Gone"),
            ResourceDefinition::new("Typo", Behaviour::Whitelist)
                .permissions(&["view"])
                .entry(None, "Manager", &["view", "edit"]),
        ]);

        assert!(matches!(loader.load_resource("A"), Err(Error::Logic(_))));
        assert!(matches!(loader.load_resource("Orphan"), Err(Error::ResourceNotFound(_))));
        assert!(matches!(loader.load_resource("Typo"), Err(Error::PermissionNotFound{..})));
        assert!(ArrayLoader::from_json("{").is_err());
    } // array_loader_errors

    #[test]
    fn entry_loaders() {
        let array     = ArrayLoader::from_json(DEFINITIONS).unwrap();
        let invoice   = array.load_resource("Invoice").unwrap();
        let raw       = array.load_entry(&invoice, "accountant", Some("role")).unwrap();

        assert_eq!(vec!["[manager]"], raw.permissions());
        assert_eq!(Some("role"), raw.processor());

        let collection = CollectionLoader::new(vec![invoice.clone()]);
        let compiled   = collection.load_entry(&invoice, "intern", Some("role")).unwrap();

        assert_eq!(vec!["view", "delete"], compiled.permissions());
        assert!(matches!(collection.load_entry(&invoice, "intern", None), Err(Error::EntryNotFound{..})));
    } // entry_loaders

    #[test]
    fn chain_loader() {
        let mut extra = Resource::new("Report", Behaviour::Blacklist);

        assert!(extra.add_permission("print").is_ok());

        let chain = ChainLoader::new()
            .with(ArrayLoader::from_json(DEFINITIONS).unwrap())
            .with(CollectionLoader::new(vec![extra]));

        assert_eq!(2, chain.len());
        assert_eq!("Invoice", chain.load_resource("Invoice").unwrap().name());
        assert_eq!(Behaviour::Blacklist, chain.load_resource("Report").unwrap().behaviour());
        assert!(matches!(chain.load_resource("Nope"), Err(Error::ResourceNotFound(_))));

        let report = chain.load_resource("Report").unwrap();

        assert!(matches!(chain.load_entry(&report, "Manager", None), Err(Error::EntryNotFound{..})));

        let invoice = chain.load_resource("Invoice").unwrap();

        assert_eq!(vec!["view", "edit"], chain.load_entry(&invoice, "Manager", None).unwrap().permissions());
    } // chain_loader

    #[test]
    fn cache_loader() {
        let cache  = Rc::new(MemoryCache::new());
        let loader = CacheLoader::new(
            Counting{inner: ArrayLoader::from_json(DEFINITIONS).unwrap(), loads: Cell::new(0)},
            cache.clone(),
        ).with_prefix("test_");

        let first  = loader.load_resource("Invoice").unwrap();
        let second = loader.load_resource("Invoice").unwrap();

        assert_eq!(first, second);
        assert_eq!(1, loader.inner.loads.get());
        assert_eq!(1, cache.len());
        assert!(cache.get("test_Invoice").unwrap().is_some());

        // corrupt values are replaced
        assert!(cache.set("test_Invoice", "{not json").is_ok());
        assert_eq!(first, loader.load_resource("Invoice").unwrap());
        assert_eq!(2, loader.inner.loads.get());
        assert_eq!(first, serde_json::from_str::<Resource>(&cache.get("test_Invoice").unwrap().unwrap()).unwrap());

        assert!(loader.invalidate("Invoice").unwrap());
        assert!(!loader.invalidate("Invoice").unwrap());
        assert!(cache.is_empty());

        assert!(loader.load_resource("Nope").is_err());
        assert!(cache.is_empty());
    } // cache_loader

    #[test]
    fn configured_cache_prefix() {
        let config = AclConfig::from_json(r#"{"cache_prefix": "custom_"}"#).unwrap();
        let cache  = Rc::new(MemoryCache::new());
        let loader = CacheLoader::with_config(ArrayLoader::from_json(DEFINITIONS).unwrap(), cache.clone(), &config);

        assert_eq!("custom_Invoice", loader.key("Invoice"));
        assert!(loader.load_resource("Invoice").is_ok());
        assert!(cache.get("custom_Invoice").unwrap().is_some());
        assert!(cache.get("acl_resource_Invoice").unwrap().is_none());
    } // configured_cache_prefix

    struct Unavailable;

    impl Cache for Unavailable {

        fn get(&self, _: &str) -> Result<Option<String>> {
            Err(Error::Cache(String::from("connection refused")))
        } // get

        fn set(&self, _: &str, _: &str) -> Result<()> {
            Err(Error::Cache(String::from("connection refused")))
        } // set

        fn delete(&self, _: &str) -> Result<bool> {
            Err(Error::Cache(String::from("connection refused")))
        } // delete

    } // impl Cache for Unavailable

    #[test]
    fn cache_failures() {
        let loader = CacheLoader::new(ArrayLoader::from_json(DEFINITIONS).unwrap(), Unavailable);

        assert!(matches!(loader.load_resource("Invoice"), Err(Error::Cache(_))));
        assert!(matches!(loader.invalidate("Invoice"), Err(Error::Cache(_))));
    } // cache_failures

} // mod tests
