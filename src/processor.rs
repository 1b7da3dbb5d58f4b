//! The processor pipeline.
//!
//! A [`Processor`] inspects an identity and adjusts the mask being decided for one resource
//! through a [`ProcessorContext`]. Processors run in registration order; a processor owning no
//! entry on the resource is skipped unless it declares it does not need any. Locking the
//! decision stops the pipeline and freezes the mask.

use log::{debug, trace, warn};
use std::fmt;

use crate::entry::{Entry, EntryResolver};
use crate::error::Result;
use crate::resource::{Behaviour, PendingDecision, Resource};
use crate::user::{AclUser, Identity};


// Processor //////////////////////////////////////////////////////////////////////////////////////


pub trait Processor {

    /// Registration key, also the key this processor's entries are stored under.
    fn identifier(&self) -> &str;

    fn process(&self, ctx: &mut ProcessorContext<'_>, user: &dyn Identity) -> Result<()>;

    /// False if the processor must run on resources without any of its entries.
    fn requires_entries(&self) -> bool {
        true
    } // requires_entries

} // trait Processor


// ProcessorContext ///////////////////////////////////////////////////////////////////////////////


/// What a processor may see and do while a decision is pending.
pub struct ProcessorContext<'a> {
    decision:  PendingDecision<'a>,
    resolver:  &'a EntryResolver<'a>,
    processor: String,
    locked:    bool,
} // struct ProcessorContext

impl<'a> ProcessorContext<'a> {

    pub fn new(decision: PendingDecision<'a>, resolver: &'a EntryResolver<'a>) -> Self {
        ProcessorContext{decision, resolver, processor: String::new(), locked: false}
    } // new

    #[inline]
    pub fn resource(&self) -> &'a Resource {
        self.decision.resource()
    } // resource

    #[inline]
    pub fn behaviour(&self) -> Behaviour {
        self.resource().behaviour()
    } // behaviour

    /// Identifier of the running processor.
    #[inline]
    pub fn processor(&self) -> &str {
        &self.processor
    } // processor

    /// The mask as decided so far.
    #[inline]
    pub fn mask(&self) -> u32 {
        self.decision.mask()
    } // mask

    #[inline]
    pub fn is_locked(&self) -> bool {
        self.locked
    } // is_locked

    /// Freezes the decision. Later grants and denials are ignored and no other processor runs.
    pub fn lock(&mut self) {
        debug!("{} locks {} at {:#b}", self.processor, self.resource().name(), self.mask());
        self.locked = true;
    } // lock

    pub fn grant<S: AsRef<str>>(&mut self, names: &[S]) -> Result<()> {
        let bits = self.permissions(names)?;
        self.grant_mask(bits);
        Ok(())
    } // grant

    pub fn deny<S: AsRef<str>>(&mut self, names: &[S]) -> Result<()> {
        let bits = self.permissions(names)?;
        self.deny_mask(bits);
        Ok(())
    } // deny

    pub fn grant_mask(&mut self, bits: u32) {
        if self.locked {
            warn!("{} cannot grant {:#b} on locked {}", self.processor, bits, self.resource().name());
            return;
        } // if
        self.decision.allow_mask(bits);
    } // grant_mask

    pub fn deny_mask(&mut self, bits: u32) {
        if self.locked {
            warn!("{} cannot deny {:#b} on locked {}", self.processor, bits, self.resource().name());
            return;
        } // if
        self.decision.deny_mask(bits);
    } // deny_mask

    #[inline]
    pub fn permission(&self, name: &str) -> Result<u32> {
        self.resource().get_permission(name)
    } // permission

    #[inline]
    pub fn permissions<S: AsRef<str>>(&self, names: &[S]) -> Result<u32> {
        self.resource().get_permissions(names)
    } // permissions

    /// An entry of the running processor, references expanded and ancestors consulted.
    pub fn entry(&self, name: &str) -> Result<Entry> {
        self.resolver.resolve(self.resource(), name, Some(self.processor.as_str()))
    } // entry

    pub fn entry_mask(&self, name: &str) -> Result<u32> {
        self.resolver.resolve_mask(self.resource(), name, Some(self.processor.as_str()))
    } // entry_mask

    /// Like [`entry_mask`](Self::entry_mask), but unknown entries and permissions yield `None`
    /// unless `strict` is set.
    pub fn find_entry_mask(&self, name: &str, strict: bool) -> Result<Option<u32>> {
        match self.entry_mask(name) {
            Ok(bits)                                => Ok(Some(bits)),
            Err(err) if !strict && err.is_not_found() => {
                debug!("{} skips {} on {}: {}", self.processor, name, self.resource().name(), err);
                Ok(None)
            }, // Err
            Err(err)                                => Err(err),
        } // match
    } // find_entry_mask

} // impl ProcessorContext


// Processors /////////////////////////////////////////////////////////////////////////////////////


/// Ordered processor registry.
#[derive(Default)]
pub struct Processors {
    processors: Vec<Box<dyn Processor>>,
} // struct Processors

impl Processors {

    pub fn new() -> Self {
        Processors::default()
    } // new

    /// Appends a processor. One already registered under the same identifier is replaced in
    /// place and returned.
    pub fn register<P: Processor + 'static>(&mut self, processor: P) -> Option<Box<dyn Processor>> {
        let processor: Box<dyn Processor> = Box::new(processor);

        match self.processors.iter_mut().find(|p| p.identifier() == processor.identifier()) {
            Some(existing) => {
                debug!("replacing processor {}", processor.identifier());
                Some(std::mem::replace(existing, processor))
            }, // Some
            None => {
                debug!("registering processor {}", processor.identifier());
                self.processors.push(processor);
                None
            }, // None
        } // match
    } // register

    pub fn get(&self, identifier: &str) -> Option<&dyn Processor> {
        self.processors.iter().find(|p| p.identifier() == identifier).map(|p| &**p)
    } // get

    #[inline]
    pub fn contains(&self, identifier: &str) -> bool {
        self.get(identifier).is_some()
    } // contains

    pub fn identifiers(&self) -> impl Iterator<Item = &str> {
        self.processors.iter().map(|p| p.identifier())
    } // identifiers

    #[inline]
    pub fn len(&self) -> usize {
        self.processors.len()
    } // len

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    } // is_empty

    /// Runs the pipeline on `resource` and commits the outcome onto `user`.
    pub fn run(&self, resource: &Resource, user: &mut AclUser<'_>, resolver: &EntryResolver<'_>) -> Result<()> {
        for identifier in resource.processors() {
            if !self.contains(identifier) {
                warn!("{} has entries for unregistered processor {}", resource.name(), identifier);
            } // if
        } // for

        let mut ctx = ProcessorContext::new(resource.begin_decision(user), resolver);

        for processor in &self.processors {
            let identifier = processor.identifier();

            if processor.requires_entries() && !resource.has_entries_for(identifier) {
                trace!("skipping {} on {}: no entries", identifier, resource.name());
                continue;
            } // if

            trace!("running {} on {} for {}", identifier, resource.name(), user.name());
            ctx.processor = String::from(identifier);
            processor.process(&mut ctx, user.identity())?;

            if ctx.locked {
                debug!("pipeline on {} for {} stopped by {}", resource.name(), user.name(), identifier);
                break;
            } // if
        } // for

        let locked = ctx.locked;

        ctx.decision.commit(user);
        if locked {
            user.lock();
        } // if
        debug!("{} on {}: {:#b} (locked: {})", user.name(), resource.name(), user.permission().value(), locked);
        Ok(())
    } // run

} // impl Processors

impl fmt::Debug for Processors {

    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_list().entries(self.identifiers()).finish()
    } // fmt

} // impl fmt::Debug for Processors


// RootProcessor //////////////////////////////////////////////////////////////////////////////////


/// Grants everything to root identities and locks the decision. Runs without entries.
#[derive(Clone, Debug)]
pub struct RootProcessor {
    identifier: String,
} // struct RootProcessor

impl RootProcessor {

    pub fn new<S: Into<String>>(identifier: S) -> Self {
        RootProcessor{identifier: identifier.into()}
    } // new

} // impl RootProcessor

impl Default for RootProcessor {

    fn default() -> Self {
        RootProcessor::new("root")
    } // default

} // impl Default for RootProcessor

impl Processor for RootProcessor {

    fn identifier(&self) -> &str {
        &self.identifier
    } // identifier

    fn process(&self, ctx: &mut ProcessorContext<'_>, user: &dyn Identity) -> Result<()> {
        if user.is_root() {
            let all = ctx.resource().all();

            ctx.grant_mask(all);
            ctx.lock();
        } // if
        Ok(())
    } // process

    fn requires_entries(&self) -> bool {
        false
    } // requires_entries

} // impl Processor for RootProcessor


// IdentifierProcessor ////////////////////////////////////////////////////////////////////////////


/// Looks up the entry keyed by one identity value, the user name by default. Whitelisted
/// resources grant it, blacklisted ones deny it.
pub struct IdentifierProcessor {
    identifier: String,
    key:        Box<dyn Fn(&dyn Identity) -> Option<String>>,
    strict:     bool,
} // struct IdentifierProcessor

impl IdentifierProcessor {

    /// `key` extracts the entry name from an identity. Identities without one are left alone.
    pub fn new<S, F>(identifier: S, key: F) -> Self
    where
        S: Into<String>,
        F: Fn(&dyn Identity) -> Option<String> + 'static,
    {
        IdentifierProcessor{identifier: identifier.into(), key: Box::new(key), strict: false}
    } // new

    /// Entries keyed by user name, registered as `user`.
    pub fn username() -> Self {
        IdentifierProcessor::new("user", |user| Some(String::from(user.name())))
    } // username

    /// A strict processor fails on entries it cannot resolve instead of skipping them.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    } // strict

} // impl IdentifierProcessor

impl Processor for IdentifierProcessor {

    fn identifier(&self) -> &str {
        &self.identifier
    } // identifier

    fn process(&self, ctx: &mut ProcessorContext<'_>, user: &dyn Identity) -> Result<()> {
        let key = match (self.key)(user) {
            Some(key) => key,
            None      => return Ok(()),
        }; // match

        if let Some(bits) = ctx.find_entry_mask(&key, self.strict)? {
            match ctx.behaviour() {
                Behaviour::Whitelist => ctx.grant_mask(bits),
                Behaviour::Blacklist => ctx.deny_mask(bits),
            } // match
        } // if
        Ok(())
    } // process

} // impl Processor for IdentifierProcessor


// RoleProcessor //////////////////////////////////////////////////////////////////////////////////


/// Applies the entries named after the identity's roles.
///
/// On a whitelist every role entry is granted. On a blacklist only the role entry with the
/// lowest value is denied, so the least restricted role wins.
#[derive(Clone, Debug)]
pub struct RoleProcessor {
    identifier: String,
    blacklist:  bool,
    strict:     bool,
} // struct RoleProcessor

impl RoleProcessor {

    /// With `blacklist` unset, blacklisted resources are left untouched.
    pub fn new(blacklist: bool) -> Self {
        RoleProcessor{identifier: String::from("role"), blacklist, strict: false}
    } // new

    pub fn with_identifier<S: Into<String>>(mut self, identifier: S) -> Self {
        self.identifier = identifier.into();
        self
    } // with_identifier

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    } // strict

} // impl RoleProcessor

impl Default for RoleProcessor {

    fn default() -> Self {
        RoleProcessor::new(true)
    } // default

} // impl Default for RoleProcessor

impl Processor for RoleProcessor {

    fn identifier(&self) -> &str {
        &self.identifier
    } // identifier

    fn process(&self, ctx: &mut ProcessorContext<'_>, user: &dyn Identity) -> Result<()> {
        let roles = match user.roles() {
            Some(roles) => roles,
            None        => return Ok(()),
        }; // match

        match ctx.behaviour() {
            Behaviour::Whitelist => {
                let mut granted = 0;

                for role in roles {
                    if let Some(bits) = ctx.find_entry_mask(role, self.strict)? {
                        granted |= bits;
                    } // if
                } // for
                ctx.grant_mask(granted);
            }, // Whitelist
            Behaviour::Blacklist if self.blacklist => {
                let mut lowest: Option<u32> = None;

                for role in roles {
                    if let Some(bits) = ctx.find_entry_mask(role, self.strict)? {
                        lowest = Some(lowest.map_or(bits, |l| l.min(bits)));
                    } // if
                } // for
                if let Some(bits) = lowest {
                    ctx.deny_mask(bits);
                } // if
            }, // Blacklist
            Behaviour::Blacklist => trace!("{} ignores blacklisted {}", self.identifier, ctx.resource().name()),
        } // match
        Ok(())
    } // process

} // impl Processor for RoleProcessor


// Tests //////////////////////////////////////////////////////////////////////////////////////////


// mod tests
