//! Entries: named, reusable permission subsets.
//!
//! An entry lists permission names and references to other entries of the same processor. A
//! reference is written with brackets, `[Manager]`. [`EntryLoader`]s only know the entries
//! declared directly on a resource; [`EntryResolver`] expands references and falls back to the
//! resource's ancestors when an entry is not declared locally.

use log::{debug, trace, warn};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

use crate::error::{Error, Result};
use crate::loader::ResourceLoader;
use crate::resource::{parents, Resource};


// Entry //////////////////////////////////////////////////////////////////////////////////////////


#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    name:        String,
    permissions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    processor:   Option<String>,
} // struct Entry

impl Entry {

    pub fn new<S: Into<String>>(name: S, permissions: Vec<String>, processor: Option<&str>) -> Self {
        Entry{
            name: name.into(),
            permissions,
            processor: processor.map(String::from),
        } // Entry
    } // new

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    } // name

    /// Permission names and references, in declaration order.
    #[inline]
    pub fn permissions(&self) -> &[String] {
        &self.permissions
    } // permissions

    #[inline]
    pub fn processor(&self) -> Option<&str> {
        self.processor.as_deref()
    } // processor

} // impl Entry

/// Returns the referenced entry name if `item` is written as `[Name]`.
pub fn reference(item: &str) -> Option<&str> {
    if item.len() > 2 && item.starts_with('[') && item.ends_with(']') {
        Some(&item[1..item.len() - 1])
    } else {
        None
    } // else
} // reference


// EntryLoader ////////////////////////////////////////////////////////////////////////////////////


/// Source of the entries declared directly on a resource.
pub trait EntryLoader {

    /// Fails with [`Error::EntryNotFound`] if the resource does not declare the entry for the
    /// processor. References are returned unexpanded.
    fn load_entry(&self, resource: &Resource, entry: &str, processor: Option<&str>) -> Result<Entry>;

} // trait EntryLoader

pub(crate) fn entry_not_found(entry: &str, visited: Vec<String>) -> Error {
    Error::EntryNotFound{entry: String::from(entry), visited}
} // entry_not_found


// EntryResolver //////////////////////////////////////////////////////////////////////////////////


/// Resolves entries to flat permission lists across references and resource inheritance.
pub struct EntryResolver<'a> {
    entries:   &'a dyn EntryLoader,
    resources: &'a dyn ResourceLoader,
} // struct EntryResolver

impl<'a> EntryResolver<'a> {

    /// `resources` is used to load ancestors of the resources entries are looked up on.
    pub fn new(entries: &'a dyn EntryLoader, resources: &'a dyn ResourceLoader) -> Self {
        EntryResolver{entries, resources}
    } // new

    /// The entry with every reference replaced by the permissions it stands for. Duplicates are
    /// dropped, first occurrences keep their position.
    pub fn resolve(&self, resource: &Resource, name: &str, processor: Option<&str>) -> Result<Entry> {
        trace!("resolving entry {} for {:?} on {}", name, processor, resource.name());
        let mut path        = vec![];
        let mut permissions = vec![];

        self.expand(resource, name, processor, &mut path, &mut permissions)?;
        Ok(Entry::new(name, permissions, processor))
    } // resolve

    /// Bit value of a resolved entry on `resource`.
    pub fn resolve_mask(&self, resource: &Resource, name: &str, processor: Option<&str>) -> Result<u32> {
        let entry = self.resolve(resource, name, processor)?;
        resource.get_permissions(entry.permissions())
    } // resolve_mask

    /// Finds the nearest declaration of the entry, skipping resources on which the entry is
    /// already being expanded.
    fn find<'r>(&self, resource: &'r Resource, name: &str, processor: Option<&str>, path: &[(String, String)]) -> Result<(Cow<'r, Resource>, Entry)> {
        let expanding = |res: &Resource| path.iter().any(|(r, e)| r == res.name() && e == name);
        let mut visited = vec![String::from(resource.name())];

        if !expanding(resource) {
            match self.entries.load_entry(resource, name, processor) {
                Ok(entry)                      => return Ok((Cow::Borrowed(resource), entry)),
                Err(Error::EntryNotFound{..})  => (),
                Err(err)                       => return Err(err),
            } // match
        } // if

        for parent in parents(resource, self.resources) {
            let parent = parent?;

            visited.push(String::from(parent.name()));
            if expanding(&parent) {
                continue;
            } // if
            match self.entries.load_entry(&parent, name, processor) {
                Ok(entry)                      => {
                    debug!("entry {} of {} inherited from {}", name, resource.name(), parent.name());
                    return Ok((Cow::Owned(parent), entry));
                }, // Ok
                Err(Error::EntryNotFound{..})  => (),
                Err(err)                       => return Err(err),
            } // match
        } // for

        warn!("missing entry {} for {:?}, searched {:?}", name, processor, visited);
        Err(entry_not_found(name, visited))
    } // find

    fn expand(&self, resource: &Resource, name: &str, processor: Option<&str>, path: &mut Vec<(String, String)>, out: &mut Vec<String>) -> Result<()> {
        let (owner, entry) = self.find(resource, name, processor, path)?;

        path.push((String::from(owner.name()), String::from(name)));
        for item in entry.permissions() {
            match reference(item) {
                Some(other) => self.expand(&owner, other, processor, path, out)?,
                None        => if !out.contains(item) {
                    out.push(item.clone());
                }, // None
            } // match
        } // for
        path.pop();
        Ok(())
    } // expand

} // impl EntryResolver


// Tests //////////////////////////////////////////////////////////////////////////////////////////


#[cfg(test)]
mod tests {

    use super::*;
    use crate::loader::{ArrayLoader, ResourceDefinition};
    use crate::resource::Behaviour;
    use test_env_log::test;

    fn loader() -> ArrayLoader {
        ArrayLoader::new(vec![
            ResourceDefinition::new("Invoice", Behaviour::Whitelist)
                .permissions(&["view", "edit", "delete", "approve"])
                .entry(None, "Manager", &["view", "edit"])
                .entry(None, "Director", &["[Manager]", "approve", "view"])
                .entry(Some("role"), "intern", &["view"]),
            ResourceDefinition::new("RecurringInvoice", Behaviour::Whitelist)
                .extends("Invoice")
                .permissions(&["schedule"])
                .entry(None, "Manager", &["[Manager]", "schedule"])
                .entry(None, "Planner", &["[Director]", "schedule"]),
            ResourceDefinition::new("Tangled", Behaviour::Whitelist)
                .permissions(&["view"])
                .entry(None, "Loop", &["[Knot]"])
                .entry(None, "Knot", &["[Loop]"]),
        ])
    } // loader

    fn resolve(loader: &ArrayLoader, resource: &str, entry: &str, processor: Option<&str>) -> Result<Vec<String>> {
        let resource = loader.load_resource(resource)?;
        let resolver = EntryResolver::new(loader, loader);

        resolver.resolve(&resource, entry, processor).map(|e| e.permissions().to_vec())
    } // resolve

    #[test]
    fn references() {
        assert_eq!(Some("Manager"), reference("[Manager]"));
        assert_eq!(None, reference("[]"));
        assert_eq!(None, reference("view"));
        assert_eq!(None, reference("[view"));
    } // references

    #[test]
    fn declared_order() {
        let loader = loader();

        assert_eq!(vec!["view", "edit"], resolve(&loader, "Invoice", "Manager", None).unwrap());
        assert_eq!(vec!["view", "edit", "approve"], resolve(&loader, "Invoice", "Director", None).unwrap());
    } // declared_order

    #[test]
    fn processor_scope() {
        let loader = loader();

        assert_eq!(vec!["view"], resolve(&loader, "Invoice", "intern", Some("role")).unwrap());
        assert!(matches!(resolve(&loader, "Invoice", "intern", None), Err(Error::EntryNotFound{..})));
        assert!(matches!(resolve(&loader, "Invoice", "Manager", Some("role")), Err(Error::EntryNotFound{..})));
    } // processor_scope

    #[test]
    fn inherited_entries() {
        let loader = loader();

        // not declared on the child at all
        assert_eq!(vec!["view", "edit", "approve"], resolve(&loader, "RecurringInvoice", "Director", None).unwrap());
        assert_eq!(vec!["view"], resolve(&loader, "RecurringInvoice", "intern", Some("role")).unwrap());

        // self reference reaches for the parent declaration
        assert_eq!(vec!["view", "edit", "schedule"], resolve(&loader, "RecurringInvoice", "Manager", None).unwrap());

        // references inside an inherited entry resolve where it was declared
        assert_eq!(vec!["view", "edit", "approve", "schedule"], resolve(&loader, "RecurringInvoice", "Planner", None).unwrap());
    } // inherited_entries

    #[test]
    fn missing_entry_lists_visited() {
        let loader = loader();

        match resolve(&loader, "RecurringInvoice", "Auditor", None) {
            Err(Error::EntryNotFound{entry, visited}) => {
                assert_eq!("Auditor", entry);
                assert_eq!(vec!["RecurringInvoice", "Invoice"], visited);
            }, // Err
            other => panic!("unexpected {:?}", other),
        } // match
    } // missing_entry_lists_visited

    #[test]
    fn cycles_terminate() {
        let loader   = loader();
        let resource = Resource::new("Tangled", Behaviour::Whitelist);
        let resolver = EntryResolver::new(&loader, &loader);

        assert!(matches!(resolver.resolve(&resource, "Loop", None), Err(Error::EntryNotFound{..})));
        assert!(loader.load_resource("Tangled").is_err());
    } // cycles_terminate

    #[test]
    fn masks() {
        let loader   = loader();
        let resource = loader.load_resource("RecurringInvoice").unwrap();
        let resolver = EntryResolver::new(&loader, &loader);

        assert_eq!(3 | 16, resolver.resolve_mask(&resource, "Manager", None).unwrap());
        assert_eq!(1, resolver.resolve_mask(&resource, "intern", Some("role")).unwrap());
    } // masks

} // mod tests
