//! The decision engine.

use log::{debug, trace, warn};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::rc::Rc;

use crate::config::AclConfig;
use crate::entry::{EntryLoader, EntryResolver};
use crate::error::{Error, Result};
use crate::loader::ResourceLoader;
use crate::processor::{Processor, Processors};
use crate::resource::Resource;
use crate::user::{AclUser, Decision, DecisionCache, Identity};


// FollowUp ///////////////////////////////////////////////////////////////////////////////////////


/// Deferred action run on the bound user after a decision, before the result is returned.
pub type FollowUp = Box<dyn for<'u> FnOnce(&mut AclUser<'u>, &Resource) -> Result<()>>;

/// Boxes a closure as a [`FollowUp`].
pub fn follow_up<F>(action: F) -> FollowUp
where
    F: for<'u> FnOnce(&mut AclUser<'u>, &Resource) -> Result<()> + 'static,
{
    Box::new(action)
} // follow_up

/// Observer of decisions on one resource. Every bound component is told about each decision on
/// its resource and may hand back follow ups.
pub trait AclBindable {

    fn resource_name(&self) -> &str;

    fn on_bind(&self, user: &dyn Identity, granted: bool) -> Option<Vec<FollowUp>>;

} // trait AclBindable

/// Hook passed to [`Acl::is_allowed_with`].
pub type DecisionHook<'h> = &'h mut dyn FnMut(&dyn Identity, bool) -> Option<Vec<FollowUp>>;


// Acl ////////////////////////////////////////////////////////////////////////////////////////////


#[derive(Default)]
struct Memo {
    resources: RefCell<HashMap<String, Rc<Resource>>>,
    required:  RefCell<HashMap<(String, Vec<String>), u32>>,
} // struct Memo

/// Answers whether an identity holds permissions on a resource.
///
/// The first question about a resource runs the processor pipeline for the identity and stores
/// the resulting mask in the identity's decision cache. Later questions are answered from that
/// cache until it is reset. Loaded resources and required masks are memoized per engine.
pub struct Acl {
    resources:  Rc<dyn ResourceLoader>,
    entries:    Rc<dyn EntryLoader>,
    processors: Processors,
    bindings:   BTreeMap<String, Vec<Box<dyn AclBindable>>>,
    decisions:  DecisionCache,
    config:     AclConfig,
    memo:       Memo,
} // struct Acl

impl Acl {

    /// An engine reading resources and entries from the same loader.
    pub fn new<L>(loader: L) -> Self
    where
        L: ResourceLoader + EntryLoader + 'static,
    {
        let loader = Rc::new(loader);
        Acl::with_loaders(loader.clone(), loader)
    } // new

    pub fn with_loaders(resources: Rc<dyn ResourceLoader>, entries: Rc<dyn EntryLoader>) -> Self {
        let config = AclConfig::default();

        Acl{
            resources,
            entries,
            processors: Processors::new(),
            bindings:   BTreeMap::new(),
            decisions:  DecisionCache::new(config.attribute.clone()),
            config,
            memo:       Memo::default(),
        } // Acl
    } // with_loaders

    pub fn with_config(mut self, config: AclConfig) -> Self {
        debug!("configuring {:?}", config);
        self.decisions = DecisionCache::new(config.attribute.clone());
        self.config    = config;
        self.clear_memo();
        self
    } // with_config

    #[inline]
    pub fn config(&self) -> &AclConfig {
        &self.config
    } // config

    #[inline]
    pub fn decisions(&self) -> &DecisionCache {
        &self.decisions
    } // decisions

    #[inline]
    pub fn processors(&self) -> &Processors {
        &self.processors
    } // processors

    /// Appends a processor to the pipeline, replacing one with the same identifier in place.
    pub fn register<P: Processor + 'static>(&mut self, processor: P) -> &mut Self {
        self.processors.register(processor);
        self
    } // register

    /// Subscribes a component to decisions on its resource.
    pub fn bind<B: AclBindable + 'static>(&mut self, component: B) -> &mut Self {
        debug!("binding component to {}", component.resource_name());
        self.bindings
            .entry(String::from(component.resource_name()))
            .or_insert_with(Vec::new)
            .push(Box::new(component));
        self
    } // bind

    /// Loads a resource, memoized unless disabled in the configuration.
    pub fn resource(&self, name: &str) -> Result<Rc<Resource>> {
        if let Some(resource) = self.memo.resources.borrow().get(name) {
            trace!("memoized resource {}", name);
            return Ok(resource.clone());
        } // if

        let resource = Rc::new(self.resources.load_resource(name)?);

        if self.config.memoize {
            self.memo.resources.borrow_mut().insert(String::from(name), resource.clone());
        } // if
        Ok(resource)
    } // resource

    /// Union of the bits of the named permissions on the resource.
    pub fn required_mask<S: AsRef<str>>(&self, resource: &Resource, permissions: &[S]) -> Result<u32> {
        let mut names: Vec<&str> = permissions.iter().map(AsRef::as_ref).collect();

        names.sort_unstable();
        names.dedup();

        let key = (String::from(resource.name()), names.iter().map(|n| String::from(*n)).collect::<Vec<_>>());

        if let Some(required) = self.memo.required.borrow().get(&key) {
            return Ok(*required);
        } // if

        let required = resource.get_permissions(&names)?;

        if self.config.memoize {
            self.memo.required.borrow_mut().insert(key, required);
        } // if
        Ok(required)
    } // required_mask

    /// Drops memoized resources and masks.
    pub fn clear_memo(&self) {
        debug!("clearing memoized resources");
        self.memo.resources.borrow_mut().clear();
        self.memo.required.borrow_mut().clear();
    } // clear_memo

    /// True if the user holds every named permission on the resource. An empty request is
    /// always granted.
    pub fn is_allowed<S: AsRef<str>>(&self, user: &mut dyn Identity, resource: &str, permissions: &[S]) -> Result<bool> {
        self.is_allowed_with(user, resource, permissions, None)
    } // is_allowed

    #[inline]
    pub fn is_denied<S: AsRef<str>>(&self, user: &mut dyn Identity, resource: &str, permissions: &[S]) -> Result<bool> {
        Ok(!self.is_allowed(user, resource, permissions)?)
    } // is_denied

    /// Like [`is_allowed`](Self::is_allowed). The hook and every component bound to the resource
    /// are told about the decision and may return follow ups. Follow ups run on the bound user;
    /// the answer reflects their changes, which are kept in the decision cache unless the
    /// decision is locked.
    pub fn is_allowed_with<S: AsRef<str>>(&self, user: &mut dyn Identity, resource: &str, permissions: &[S], hook: Option<DecisionHook<'_>>) -> Result<bool> {
        check_user(&*user)?;
        if permissions.is_empty() {
            trace!("empty request on {} for {} granted", resource, user.name());
            return Ok(true);
        } // if

        let resource = self.resource(resource)?;
        let required = self.required_mask(&resource, permissions)?;
        let mut acl_user = self.evaluate(user, &resource)?;
        let decided = acl_user.permission().value();
        let mut granted = acl_user.is_allowed(required);

        if let Some(hook) = hook {
            if let Some(follow_ups) = hook(acl_user.identity(), granted) {
                run_follow_ups(&mut acl_user, &resource, follow_ups)?;
                granted = acl_user.is_allowed(required);
            } // if
        } // if

        for component in self.bindings.get(resource.name()).into_iter().flatten() {
            if let Some(follow_ups) = component.on_bind(acl_user.identity(), granted) {
                run_follow_ups(&mut acl_user, &resource, follow_ups)?;
                granted = acl_user.is_allowed(required);
            } // if
        } // for

        let mask = acl_user.permission().value();

        if mask != decided && !acl_user.is_locked() {
            debug!("follow ups changed {} on {} to {:#b}", acl_user.name(), resource.name(), mask);
            self.decisions.store(acl_user.identity_mut(), resource.name(), Decision{mask, locked: false});
        } // if

        debug!("{} {} {:?} on {}", acl_user.name(), if granted { "holds" } else { "lacks" }, names(permissions), resource.name());
        Ok(granted)
    } // is_allowed_with

    /// Effective mask of the user on the resource.
    pub fn mask(&self, user: &mut dyn Identity, resource: &str) -> Result<u32> {
        check_user(&*user)?;

        let resource = self.resource(resource)?;
        let acl_user = self.evaluate(user, &resource)?;

        Ok(acl_user.permission().value())
    } // mask

    /// Drops the user's cached decision on one resource.
    pub fn forget(&self, user: &mut dyn Identity, resource: &str) -> bool {
        self.decisions.forget(user, resource)
    } // forget

    /// Drops every cached decision of the user.
    pub fn reset(&self, user: &mut dyn Identity) -> bool {
        debug!("resetting decisions of {}", user.name());
        self.decisions.reset(user)
    } // reset

    fn evaluate<'u>(&self, user: &'u mut dyn Identity, resource: &Resource) -> Result<AclUser<'u>> {
        if let Some(decision) = self.decisions.get(&*user, resource.name()) {
            trace!("reusing decision of {} on {}", user.name(), resource.name());
            return Ok(AclUser::new(user, resource.name(), decision.mask, decision.locked));
        } // if

        let mut acl_user = AclUser::new(user, resource.name(), resource.initial_mask(), false);
        let resolver     = EntryResolver::new(&*self.entries, self);

        resource.process(&self.processors, &mut acl_user, &resolver, &self.decisions)?;
        Ok(acl_user)
    } // evaluate

} // impl Acl

impl fmt::Debug for Acl {

    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Acl")
            .field("processors", &self.processors)
            .field("bindings", &self.bindings.keys().collect::<Vec<_>>())
            .field("config", &self.config)
            .field("memoized", &self.memo.resources.borrow().len())
            .finish()
    } // fmt

} // impl fmt::Debug for Acl

/// Ancestors are looked up through the engine so that they share its memo.
impl ResourceLoader for Acl {

    fn load_resource(&self, name: &str) -> Result<Resource> {
        self.resource(name).map(|r| (*r).clone())
    } // load_resource

} // impl ResourceLoader for Acl

fn check_user(user: &dyn Identity) -> Result<()> {
    if user.is_acl_user() {
        warn!("refusing already bound identity {}", user.name());
        return Err(Error::InvalidArgument(format!("identity {} is already bound to a resource", user.name())));
    } // if
    Ok(())
} // check_user

fn run_follow_ups(user: &mut AclUser<'_>, resource: &Resource, follow_ups: Vec<FollowUp>) -> Result<()> {
    trace!("running {} follow ups on {}", follow_ups.len(), resource.name());
    for action in follow_ups {
        action(&mut *user, resource)?;
    } // for
    Ok(())
} // run_follow_ups

fn names<S: AsRef<str>>(permissions: &[S]) -> Vec<&str> {
    permissions.iter().map(AsRef::as_ref).collect()
} // names


// Tests //////////////////////////////////////////////////////////////////////////////////////////


#[cfg(test)]
mod tests {

    use super::*;
    use crate::loader::{ArrayLoader, ResourceDefinition};
    use crate::processor::{IdentifierProcessor, ProcessorContext, RoleProcessor, RootProcessor};
    use crate::resource::Behaviour;
    use crate::user::User;
    use serde_json::json;
    use std::cell::Cell;
    use test_env_log::test;

    fn loader() -> ArrayLoader {
        ArrayLoader::new(vec![
            ResourceDefinition::new("Invoice", Behaviour::Whitelist)
                .permissions(&["view", "edit", "delete"])
                .entry(None, "Manager", &["view", "edit"])
                .entry(Some("role"), "intern", &["view", "delete"])
                .entry(Some("role"), "accountant", &["[Manager]"])
                .entry(Some("role"), "Manager", &["view", "edit"]),
            ResourceDefinition::new("RecurringInvoice", Behaviour::Whitelist)
                .extends("Invoice")
                .permissions(&["schedule"])
                .entry(Some("user"), "alice", &["schedule"]),
            ResourceDefinition::new("Report", Behaviour::Blacklist)
                .permissions(&["print", "export"])
                .entry(Some("role"), "intern", &["export"]),
        ])
    } // loader

    fn acl() -> Acl {
        let mut acl = Acl::new(loader());

        acl.register(RootProcessor::default())
            .register(RoleProcessor::default())
            .register(IdentifierProcessor::username());
        acl
    } // acl

    struct Spy {
        runs: Rc<Cell<usize>>,
    } // struct Spy

    impl Processor for Spy {

        fn identifier(&self) -> &str {
            "spy"
        } // identifier

        fn process(&self, _: &mut ProcessorContext<'_>, _: &dyn Identity) -> Result<()> {
            self.runs.set(self.runs.get() + 1);
            Ok(())
        } // process

        fn requires_entries(&self) -> bool {
            false
        } // requires_entries

    } // impl Processor for Spy

    struct Banner {
        seen: Rc<Cell<Option<bool>>>,
    } // struct Banner

    impl AclBindable for Banner {

        fn resource_name(&self) -> &str {
            "Report"
        } // resource_name

        fn on_bind(&self, _: &dyn Identity, granted: bool) -> Option<Vec<FollowUp>> {
            self.seen.set(Some(granted));
            None
        } // on_bind

    } // impl AclBindable for Banner

    #[test]
    fn role_decisions() {
        let acl = acl();
        let mut user = User::new("bob").with_roles(vec!["intern"]);

        assert!(acl.is_allowed(&mut user, "Invoice", &["view", "delete"]).unwrap());
        assert!(!acl.is_allowed(&mut user, "Invoice", &["edit"]).unwrap());
        assert!(acl.is_denied(&mut user, "Invoice", &["view", "edit"]).unwrap());
        assert_eq!(Some(&json!({"Invoice": 5})), user.attribute("acl_decisions"));
    } // role_decisions

    #[test]
    fn blacklist_role_decisions() {
        let loader = ArrayLoader::new(vec![
            ResourceDefinition::new("Invoice", Behaviour::Blacklist)
                .permissions(&["view", "edit", "delete"])
                .entry(Some("role"), "intern", &["edit"]),
        ]);
        let mut acl = Acl::new(loader);

        acl.register(RoleProcessor::default());

        let mut user = User::new("bob").with_roles(vec!["intern"]);

        assert!(acl.is_allowed(&mut user, "Invoice", &["view", "delete"]).unwrap());
        assert!(!acl.is_allowed(&mut user, "Invoice", &["edit"]).unwrap());
        assert_eq!(5, acl.mask(&mut user, "Invoice").unwrap());
    } // blacklist_role_decisions

    #[test]
    fn entry_names_with_separators() {
        let loader = ArrayLoader::new(vec![
            ResourceDefinition::new("Invoice", Behaviour::Whitelist)
                .permissions(&["view", "edit", "delete"])
                .entry(None, "edit,view", &["delete"])
                .entry(Some("user"), "bob", &["view", "edit"]),
        ]);
        let mut acl = Acl::new(loader);

        acl.register(IdentifierProcessor::username());

        let mut bob = User::new("bob");

        assert!(acl.is_allowed(&mut bob, "Invoice", &["edit", "view"]).unwrap());
        assert!(!acl.is_allowed(&mut bob, "Invoice", &["edit,view"]).unwrap());

        let invoice = acl.resource("Invoice").unwrap();

        assert_eq!(3, acl.required_mask(&invoice, &["view", "edit"]).unwrap());
        assert_eq!(4, acl.required_mask(&invoice, &["edit,view"]).unwrap());
    } // entry_names_with_separators

    #[test]
    fn entry_references() {
        let acl = acl();
        let mut user = User::new("carol").with_roles(vec!["accountant"]);

        assert!(acl.is_allowed(&mut user, "Invoice", &["Manager"]).unwrap());
        assert!(!acl.is_allowed(&mut user, "Invoice", &["delete"]).unwrap());
        assert_eq!(3, acl.mask(&mut user, "Invoice").unwrap());
    } // entry_references

    #[test]
    fn inherited_decisions() {
        let acl = acl();
        let mut alice = User::new("alice").with_roles(vec!["intern"]);

        // role entries come from the parent, user entries from the child
        assert!(acl.is_allowed(&mut alice, "RecurringInvoice", &["view", "delete", "schedule"]).unwrap());
        assert!(!acl.is_allowed(&mut alice, "RecurringInvoice", &["edit"]).unwrap());

        let mut bob = User::new("bob").with_roles(vec!["intern"]);

        assert!(!acl.is_allowed(&mut bob, "RecurringInvoice", &["schedule"]).unwrap());
    } // inherited_decisions

    #[test]
    fn default_behaviours() {
        let acl = acl();
        let mut nobody = User::new("nobody");

        assert!(!acl.is_allowed(&mut nobody, "Invoice", &["view"]).unwrap());
        assert!(acl.is_allowed(&mut nobody, "Report", &["print", "export"]).unwrap());

        let mut intern = User::new("bob").with_roles(vec!["intern"]);

        assert!(acl.is_allowed(&mut intern, "Report", &["print"]).unwrap());
        assert!(!acl.is_allowed(&mut intern, "Report", &["export"]).unwrap());
    } // default_behaviours

    #[test]
    fn root_gets_everything() {
        let acl = acl();
        let mut root = User::new("admin").with_root(true);

        assert!(acl.is_allowed(&mut root, "Invoice", &["view", "edit", "delete"]).unwrap());
        assert_eq!(
            Some(&json!({"Invoice": 7, "!Invoice": true})),
            root.attribute("acl_decisions")
        );
    } // root_gets_everything

    #[test]
    fn pipeline_runs_once() {
        let runs = Rc::new(Cell::new(0));
        let mut acl = acl();

        acl.register(Spy{runs: runs.clone()});

        let mut user = User::new("bob").with_roles(vec!["intern"]);

        assert!(acl.is_allowed(&mut user, "Invoice", &["view"]).unwrap());
        assert!(!acl.is_allowed(&mut user, "Invoice", &["edit"]).unwrap());
        assert_eq!(1, runs.get());

        assert!(acl.forget(&mut user, "Invoice"));
        assert!(acl.is_allowed(&mut user, "Invoice", &["view"]).unwrap());
        assert_eq!(2, runs.get());

        assert!(acl.is_allowed(&mut user, "Report", &["print"]).unwrap());
        assert_eq!(3, runs.get());

        assert!(acl.reset(&mut user));
        assert!(acl.is_allowed(&mut user, "Report", &["print"]).unwrap());
        assert_eq!(4, runs.get());
    } // pipeline_runs_once

    #[test]
    fn lock_skips_later_processors() {
        let runs = Rc::new(Cell::new(0));
        let mut acl = acl();

        acl.register(Spy{runs: runs.clone()});

        let mut root = User::new("admin").with_root(true);

        assert!(acl.is_allowed(&mut root, "Report", &["export"]).unwrap());
        assert_eq!(0, runs.get());
    } // lock_skips_later_processors

    #[test]
    fn argument_checks() {
        let acl = acl();
        let mut user = User::new("bob");

        assert!(acl.is_allowed::<&str>(&mut user, "Nowhere", &[]).unwrap());
        assert!(matches!(acl.is_allowed(&mut user, "Nowhere", &["view"]), Err(Error::ResourceNotFound(_))));
        assert!(matches!(acl.is_allowed(&mut user, "Invoice", &["fly"]), Err(Error::PermissionNotFound{..})));

        let resource = acl.resource("Invoice").unwrap();
        let mut bound = AclUser::new(&mut user, resource.name(), 0, false);

        assert!(matches!(acl.is_allowed(&mut bound, "Invoice", &["view"]), Err(Error::InvalidArgument(_))));
        assert!(matches!(acl.mask(&mut bound, "Invoice"), Err(Error::InvalidArgument(_))));
    } // argument_checks

    #[test]
    fn hooks_and_follow_ups() {
        let acl = acl();
        let mut user = User::new("bob").with_roles(vec!["intern"]);
        let mut hook = |_: &dyn Identity, granted: bool| -> Option<Vec<FollowUp>> {
            if granted {
                return None;
            } // if
            Some(vec![follow_up(|user, resource| {
                user.grant(resource.get_permission("edit")?);
                Ok(())
            })])
        };

        assert!(acl.is_allowed_with(&mut user, "Invoice", &["edit"], Some(&mut hook)).unwrap());
        // the follow up outcome is cached
        assert!(acl.is_allowed(&mut user, "Invoice", &["edit"]).unwrap());
        assert_eq!(7, acl.mask(&mut user, "Invoice").unwrap());

        let mut failing = |_: &dyn Identity, _: bool| -> Option<Vec<FollowUp>> {
            Some(vec![follow_up(|_, _| Err(Error::Logic(String::from("nope"))))])
        };

        assert!(matches!(
            acl.is_allowed_with(&mut user, "Invoice", &["view"], Some(&mut failing)),
            Err(Error::Logic(_))
        ));
    } // hooks_and_follow_ups

    #[test]
    fn locked_follow_ups() {
        let acl = acl();
        let mut root = User::new("admin").with_root(true);
        let mut hook = |_: &dyn Identity, _: bool| -> Option<Vec<FollowUp>> {
            Some(vec![follow_up(|user, _| {
                assert!(!user.deny(1));
                Ok(())
            })])
        };

        assert!(acl.is_allowed_with(&mut root, "Invoice", &["view"], Some(&mut hook)).unwrap());
        assert_eq!(7, acl.mask(&mut root, "Invoice").unwrap());
    } // locked_follow_ups

    #[test]
    fn bound_components() {
        let seen = Rc::new(Cell::new(None));
        let mut acl = acl();

        acl.bind(Banner{seen: seen.clone()});

        let mut user = User::new("bob").with_roles(vec!["intern"]);

        assert!(acl.is_allowed(&mut user, "Invoice", &["view"]).unwrap());
        assert_eq!(None, seen.get());

        assert!(!acl.is_allowed(&mut user, "Report", &["export"]).unwrap());
        assert_eq!(Some(false), seen.get());
    } // bound_components

    #[test]
    fn memoization() {
        let acl = acl();

        let first  = acl.resource("Invoice").unwrap();
        let second = acl.resource("Invoice").unwrap();

        assert!(Rc::ptr_eq(&first, &second));
        assert_eq!(3, acl.required_mask(&first, &["edit", "view", "edit"]).unwrap());

        acl.clear_memo();
        assert!(!Rc::ptr_eq(&first, &acl.resource("Invoice").unwrap()));

        let acl = Acl::new(loader()).with_config(AclConfig{memoize: false, ..AclConfig::default()});

        assert!(format!("{:?}", acl).contains("memoize: false"));

        assert!(!Rc::ptr_eq(&acl.resource("Invoice").unwrap(), &acl.resource("Invoice").unwrap()));
    } // memoization

    #[test]
    fn custom_attribute() {
        let config = AclConfig::from_json(r#"{"attribute": "grants"}"#).unwrap();
        let mut acl = Acl::new(loader()).with_config(config);

        acl.register(RoleProcessor::default());

        let mut user = User::new("bob").with_roles(vec!["intern"]);

        assert!(acl.is_allowed(&mut user, "Invoice", &["view"]).unwrap());
        assert!(user.has_attribute("grants"));
        assert!(!user.has_attribute("acl_decisions"));
        assert_eq!("grants", acl.decisions().attribute());
    } // custom_attribute

} // mod tests
