//! Resources: permission namespaces with power of two bits.
//!
//! Every permission registered on a [`Resource`] receives the next free bit, strictly in
//! registration order, so the n-th permission is `1 << (n - 1)`. The reserved key `all` tracks
//! the union of every assigned bit. A resource may extend exactly one parent; it then owns the
//! parent's bits verbatim and continues numbering where the parent left off.
//!
//! Entries are named permission subsets, optionally owned by a processor. Their values live in
//! the resource so that an entry name may be used wherever a permission name is expected.

use log::{debug, trace, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::convert::TryFrom;
use std::fmt;

use crate::entry::EntryResolver;
use crate::error::{Error, Result};
use crate::loader::ResourceLoader;
use crate::mask::{Mask, MaskCollection};
use crate::processor::Processors;
use crate::user::{AclUser, Decision, DecisionCache, Identity};

/// Maximum number of bits a resource may assign, reserved keys excluded.
pub const MAX_PERMISSIONS: usize = 30;

/// Reserved key holding the union of all assigned bits.
pub const ALL: &str = "all";

const RESERVED: &[&str] = &[ALL];

// key of entries not owned by any processor
const NO_PROCESSOR: &str = "";

#[inline]
pub(crate) fn processor_key(processor: Option<&str>) -> &str {
    processor.unwrap_or(NO_PROCESSOR)
} // processor_key

fn valid_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_lowercase() || c == '_')
} // valid_name


// Behaviour //////////////////////////////////////////////////////////////////////////////////////


/// Starting point of every evaluation. Serialized as `0` (whitelist) or `1` (blacklist).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Behaviour {
    /// Everything is denied until granted.
    Whitelist,
    /// Everything is allowed until denied.
    Blacklist,
} // enum Behaviour

impl Behaviour {

    /// The mask an evaluation starts from, given the union of all bits.
    #[inline]
    pub fn initial(self, all: u32) -> u32 {
        match self {
            Behaviour::Whitelist => 0,
            Behaviour::Blacklist => all,
        } // match
    } // initial

} // impl Behaviour

impl Default for Behaviour {

    fn default() -> Self {
        Behaviour::Whitelist
    } // default

} // impl Default for Behaviour

impl From<Behaviour> for u8 {

    fn from(behaviour: Behaviour) -> u8 {
        match behaviour {
            Behaviour::Whitelist => 0,
            Behaviour::Blacklist => 1,
        } // match
    } // from

} // impl From<Behaviour> for u8

impl TryFrom<u8> for Behaviour {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(Behaviour::Whitelist),
            1 => Ok(Behaviour::Blacklist),
            _ => Err(format!("unknown behaviour {}", value)),
        } // match
    } // try_from

} // impl TryFrom<u8> for Behaviour

impl fmt::Display for Behaviour {

    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Behaviour::Whitelist => write!(f, "whitelist"),
            Behaviour::Blacklist => write!(f, "blacklist"),
        } // match
    } // fmt

} // impl fmt::Display for Behaviour


// Resource ///////////////////////////////////////////////////////////////////////////////////////


/// A permission namespace. The serialized form is the cache format:
/// `{"name": .., "behaviour": 0|1, "permissions": {..}, "entries": {..}, "parent": ..}` where
/// entries not owned by a processor are listed under the empty key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    name:        String,
    behaviour:   Behaviour,
    permissions: BTreeMap<String, u32>,
    #[serde(default)]
    entries:     BTreeMap<String, BTreeMap<String, u32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    parent:      Option<String>,
} // struct Resource

impl Resource {

    pub fn new<S: Into<String>>(name: S, behaviour: Behaviour) -> Self {
        let mut permissions = BTreeMap::new();

        permissions.insert(String::from(ALL), 0);
        Resource{
            name: name.into(),
            behaviour,
            permissions,
            entries: BTreeMap::new(),
            parent: None,
        } // Resource
    } // new

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    } // name

    #[inline]
    pub fn behaviour(&self) -> Behaviour {
        self.behaviour
    } // behaviour

    /// Name of the extended resource, if any.
    #[inline]
    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    } // parent

    /// Union of every assigned bit.
    #[inline]
    pub fn all(&self) -> u32 {
        self.permissions.get(ALL).copied().unwrap_or(0)
    } // all

    /// The mask an evaluation of this resource starts from.
    #[inline]
    pub fn initial_mask(&self) -> u32 {
        self.behaviour.initial(self.all())
    } // initial_mask

    /// Raw permission table, reserved keys included.
    #[inline]
    pub fn permissions(&self) -> &BTreeMap<String, u32> {
        &self.permissions
    } // permissions

    /// Registered permission names in registration order.
    pub fn permission_names(&self) -> Vec<&str> {
        let mut names: Vec<(&str, u32)> = self.permissions
            .iter()
            .filter(|(name, _)| !RESERVED.contains(&name.as_str()))
            .map(|(name, bit)| (name.as_str(), *bit))
            .collect();

        names.sort_by_key(|(_, bit)| *bit);
        names.into_iter().map(|(name, _)| name).collect()
    } // permission_names

    /// Number of assigned bits.
    pub fn count(&self) -> usize {
        self.permissions.keys().filter(|name| !RESERVED.contains(&name.as_str())).count()
    } // count

    #[inline]
    pub fn has_permission(&self, name: &str) -> bool {
        self.permissions.contains_key(name)
    } // has_permission

    /// Registers a permission and returns its bit. Fails if the name does not match `[a-z_]+`,
    /// is reserved or already registered, or if every bit is taken.
    pub fn add_permission(&mut self, name: &str) -> Result<u32> {
        trace!("adding permission {} to {}", name, self.name);
        let reason = if !valid_name(name) {
            Some("name must match [a-z_]+")
        } else if RESERVED.contains(&name) {
            Some("reserved name")
        } else if self.permissions.contains_key(name) {
            Some("already defined")
        } else if self.count() >= MAX_PERMISSIONS {
            Some("no bits left")
        } else {
            None
        }; // if

        if let Some(reason) = reason {
            warn!("rejecting permission {} on {}: {}", name, self.name, reason);
            return Err(Error::invalid_permission(&self.name, name, reason));
        } // if

        let bit = 1u32 << self.count();

        self.permissions.insert(String::from(name), bit);
        *self.permissions.entry(String::from(ALL)).or_insert(0) |= bit;
        Ok(bit)
    } // add_permission

    /// Registers several permissions in order, stopping at the first failure.
    pub fn add_permissions<S: AsRef<str>>(&mut self, names: &[S]) -> Result<()> {
        for name in names {
            self.add_permission(name.as_ref())?;
        } // for
        Ok(())
    } // add_permissions

    /// Bit value of a permission. Entry values are searched as a secondary namespace, one
    /// processor table after another in key order, so entries without a processor come first.
    /// The first table holding the name wins.
    pub fn get_permission(&self, name: &str) -> Result<u32> {
        trace!("getting permission {} on {}", name, self.name);
        if let Some(bit) = self.permissions.get(name) {
            return Ok(*bit);
        } // if
        for entries in self.entries.values() {
            if let Some(value) = entries.get(name) {
                return Ok(*value);
            } // if
        } // for
        warn!("missing permission {} on {}", name, self.name);
        Err(Error::permission_not_found(&self.name, name))
    } // get_permission

    /// Union of the bit values of several permissions.
    pub fn get_permissions<S: AsRef<str>>(&self, names: &[S]) -> Result<u32> {
        if names.len() == 1 {
            return self.get_permission(names[0].as_ref());
        } // if
        names.iter().try_fold(0, |acc, name| Ok(acc | self.get_permission(name.as_ref())?))
    } // get_permissions

    /// One mask per requested permission, collected under the resource name.
    pub fn masks<S: AsRef<str>>(&self, names: &[S]) -> Result<MaskCollection> {
        let mut masks = MaskCollection::new(self.name.clone());

        for name in names {
            let name = name.as_ref();
            masks.insert(Mask::new(name, self.get_permission(name)?));
        } // for
        Ok(masks)
    } // masks

    /// Stores the value of an entry. The value may only use bits of this resource.
    pub fn add_entry(&mut self, processor: Option<&str>, name: &str, value: u32) -> Result<()> {
        trace!("adding entry {} for {:?} to {} with {:#b}", name, processor, self.name, value);
        if value & !self.all() != 0 {
            warn!("entry {} on {} uses unknown bits {:#b}", name, self.name, value & !self.all());
            return Err(Error::invalid_permission(&self.name, name, "entry uses unknown bits"));
        } // if
        self.entries
            .entry(String::from(processor_key(processor)))
            .or_insert_with(BTreeMap::new)
            .insert(String::from(name), value);
        Ok(())
    } // add_entry

    /// Value of an entry stored on this resource, parents are not consulted.
    pub fn entry(&self, processor: Option<&str>, name: &str) -> Option<u32> {
        self.entries.get(processor_key(processor))?.get(name).copied()
    } // entry

    /// Entry table of one processor.
    pub fn entries(&self, processor: Option<&str>) -> Option<&BTreeMap<String, u32>> {
        self.entries.get(processor_key(processor))
    } // entries

    /// True if any entry of this resource is owned by the processor.
    pub fn has_entries_for(&self, processor: &str) -> bool {
        self.entries.get(processor).map(|e| !e.is_empty()).unwrap_or(false)
    } // has_entries_for

    /// Identifiers of the processors owning entries on this resource.
    pub fn processors(&self) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .filter(|(key, entries)| key.as_str() != NO_PROCESSOR && !entries.is_empty())
            .map(|(key, _)| key.as_str())
    } // processors

    /// Makes this resource extend `parent`. Behaviour, bits and entry values are taken over from
    /// the parent, locally registered permissions (and entry values using them) move to the bits
    /// following the parent's. Local entries win over inherited ones of the same name.
    ///
    /// Fails if the resource already has a parent, if both share a name, or if a permission
    /// exists on both sides with different bits.
    pub fn extends_from(&mut self, parent: &Resource) -> Result<()> {
        trace!("extending {} from {}", self.name, parent.name);
        if let Some(current) = &self.parent {
            warn!("{} already extends {}", self.name, current);
            return Err(Error::Logic(format!("resource {} already extends {}", self.name, current)));
        } // if
        if parent.name == self.name {
            warn!("{} cannot extend itself", self.name);
            return Err(Error::Logic(format!("resource {} cannot extend itself", self.name)));
        } // if

        let mut permissions = parent.permissions.clone();
        let mut remap       = Vec::new();
        let mut count       = parent.count();

        for name in self.permission_names() {
            let old = self.permissions[name];

            match parent.permissions.get(name) {
                Some(&bit) if bit == old => remap.push((old, bit)),
                Some(_)                  => {
                    warn!("permission {} of {} differs from parent {}", name, self.name, parent.name);
                    return Err(Error::invalid_permission(&self.name, name, "defined with a different value on parent"));
                }, // Some
                None if count >= MAX_PERMISSIONS => {
                    warn!("no bits left extending {} from {}", self.name, parent.name);
                    return Err(Error::invalid_permission(&self.name, name, "no bits left"));
                }, // None
                None => {
                    let bit = 1u32 << count;

                    count += 1;
                    permissions.insert(String::from(name), bit);
                    remap.push((old, bit));
                }, // None
            } // match
        } // for

        let all = permissions
            .iter()
            .filter(|(name, _)| !RESERVED.contains(&name.as_str()))
            .fold(0, |acc, (_, bit)| acc | bit);

        permissions.insert(String::from(ALL), all);

        for entries in self.entries.values_mut() {
            for value in entries.values_mut() {
                let bits = *value;

                *value = remap
                    .iter()
                    .filter(|(old, _)| bits & old != 0)
                    .fold(0, |acc, (_, new)| acc | new);
            } // for
        } // for

        for (processor, entries) in &parent.entries {
            let own = self.entries.entry(processor.clone()).or_insert_with(BTreeMap::new);

            for (name, value) in entries {
                own.entry(name.clone()).or_insert(*value);
            } // for
        } // for

        debug!("{} extends {} with {} own permissions", self.name, parent.name, count - parent.count());
        self.behaviour   = parent.behaviour;
        self.permissions = permissions;
        self.parent      = Some(parent.name.clone());
        Ok(())
    } // extends_from

    /// Opens a decision for a user bound to this resource, seeded with the user's mask.
    pub fn begin_decision(&self, user: &AclUser<'_>) -> PendingDecision<'_> {
        trace!("beginning decision on {} for {}", self.name, user.name());
        PendingDecision{
            resource: self,
            current:  Mask::new(self.name.clone(), user.permission().value()),
        } // PendingDecision
    } // begin_decision

    /// False if the decision cache already holds a decision for this resource.
    pub fn should_be_processed(&self, user: &dyn Identity, decisions: &DecisionCache) -> bool {
        !decisions.contains(user, &self.name)
    } // should_be_processed

    /// Runs the pipeline for the user and records the result in the decision cache.
    pub fn process(&self, processors: &Processors, user: &mut AclUser<'_>, resolver: &EntryResolver<'_>, decisions: &DecisionCache) -> Result<()> {
        trace!("processing {} for {}", self.name, user.name());
        processors.run(self, user, resolver)?;

        let decision = Decision{mask: user.permission().value(), locked: user.is_locked()};

        decisions.store(user.identity_mut(), &self.name, decision);
        Ok(())
    } // process

} // impl Resource


// PendingDecision ////////////////////////////////////////////////////////////////////////////////


/// A running mask for one user on one resource. Consumed by [`PendingDecision::commit`].
#[derive(Debug)]
pub struct PendingDecision<'r> {
    resource: &'r Resource,
    current:  Mask,
} // struct PendingDecision

impl<'r> PendingDecision<'r> {

    #[inline]
    pub fn resource(&self) -> &'r Resource {
        self.resource
    } // resource

    #[inline]
    pub fn mask(&self) -> u32 {
        self.current.value()
    } // mask

    /// Grants the named permissions or entries.
    pub fn allow<S: AsRef<str>>(&mut self, names: &[S]) -> Result<&mut Self> {
        let bits = self.resource.get_permissions(names)?;
        Ok(self.allow_mask(bits))
    } // allow

    /// Revokes the named permissions or entries.
    pub fn deny<S: AsRef<str>>(&mut self, names: &[S]) -> Result<&mut Self> {
        let bits = self.resource.get_permissions(names)?;
        Ok(self.deny_mask(bits))
    } // deny

    pub fn allow_mask(&mut self, bits: u32) -> &mut Self {
        trace!("allowing {:#b} on {}", bits, self.resource.name);
        self.current.add(bits);
        self
    } // allow_mask

    pub fn deny_mask(&mut self, bits: u32) -> &mut Self {
        trace!("denying {:#b} on {}", bits, self.resource.name);
        self.current.sub(bits);
        self
    } // deny_mask

    /// Writes the running mask back onto the user. A locked user keeps its mask.
    pub fn commit(self, user: &mut AclUser<'_>) {
        if user.is_locked() {
            warn!("not committing {:#b} onto locked {} of {}", self.current.value(), self.resource.name, user.name());
            return;
        } // if
        trace!("committing {:#b} on {} for {}", self.current.value(), self.resource.name, user.name());
        user.assign(self.current.value(), false);
    } // commit

} // impl PendingDecision


// Parents ////////////////////////////////////////////////////////////////////////////////////////


/// Lazily loads the ancestors of a resource, nearest first. A fresh iterator is returned by
/// every call to [`parents`], so walks may be restarted at will.
#[derive(Clone)]
pub struct Parents<'l> {
    loader:  &'l dyn ResourceLoader,
    next:    Option<String>,
    visited: Vec<String>,
} // struct Parents

/// Ancestors of `resource`, loaded through `loader`. Empty if the resource has no parent.
pub fn parents<'l>(resource: &Resource, loader: &'l dyn ResourceLoader) -> Parents<'l> {
    Parents{
        loader,
        next:    resource.parent.clone(),
        visited: vec![resource.name.clone()],
    } // Parents
} // parents

impl Iterator for Parents<'_> {
    type Item = Result<Resource>;

    fn next(&mut self) -> Option<Self::Item> {
        let name = self.next.take()?;

        if self.visited.contains(&name) {
            warn!("circular inheritance: {} -> {}", self.visited.join(" -> "), name);
            return Some(Err(Error::Logic(format!("circular inheritance: {} -> {}", self.visited.join(" -> "), name))));
        } // if
        trace!("loading ancestor {} of {}", name, self.visited[0]);
        self.visited.push(name.clone());

        match self.loader.load_resource(&name) {
            Ok(resource) => {
                self.next = resource.parent.clone();
                Some(Ok(resource))
            }, // Ok
            Err(err) => Some(Err(err)),
        } // match
    } // next

} // impl Iterator for Parents


// Tests //////////////////////////////////////////////////////////////////////////////////////////


// mod tests
