//! Identities as seen by the engine.
//!
//! The engine never owns a user. It reads the name, roles and root capability through the
//! [`Identity`] trait and keeps its per-resource decisions in one attribute on it, so a host may
//! back the trait with whatever user model it already has. [`User`] is a small ready-made
//! implementation.

use log::{debug, trace, warn};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::convert::TryFrom;

use crate::mask::Mask;


// Identity ///////////////////////////////////////////////////////////////////////////////////////


/// The opaque user abstraction consumed by the engine.
pub trait Identity {

    fn name(&self) -> &str;

    /// Roles the identity carries, `None` if the concept does not apply to it.
    fn roles(&self) -> Option<&[String]>;

    fn attribute(&self, key: &str) -> Option<&Value>;

    fn add_attribute(&mut self, key: &str, value: Value);

    fn has_attribute(&self, key: &str) -> bool {
        self.attribute(key).is_some()
    } // has_attribute

    fn delete_attribute(&mut self, key: &str) -> Option<Value>;

    /// Elevated principals get every permission of every resource from the root processor.
    fn is_root(&self) -> bool {
        false
    } // is_root

    /// Only [`AclUser`] answers true. The engine refuses such identities at its entry points.
    #[doc(hidden)]
    fn is_acl_user(&self) -> bool {
        false
    } // is_acl_user

} // trait Identity


// User ///////////////////////////////////////////////////////////////////////////////////////////


/// Plain in-memory identity.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct User {
    name:       String,
    roles:      Option<Vec<String>>,
    attributes: HashMap<String, Value>,
    root:       bool,
} // struct User

impl User {

    pub fn new<S: Into<String>>(name: S) -> Self {
        User{name: name.into(), ..Default::default()}
    } // new

    pub fn with_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles = Some(roles.into_iter().map(Into::into).collect());
        self
    } // with_roles

    pub fn with_root(mut self, root: bool) -> Self {
        self.root = root;
        self
    } // with_root

    pub fn with_attribute<S: Into<String>>(mut self, key: S, value: Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    } // with_attribute

} // impl User

impl Identity for User {

    fn name(&self) -> &str {
        &self.name
    } // name

    fn roles(&self) -> Option<&[String]> {
        self.roles.as_deref()
    } // roles

    fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    } // attribute

    fn add_attribute(&mut self, key: &str, value: Value) {
        self.attributes.insert(String::from(key), value);
    } // add_attribute

    fn delete_attribute(&mut self, key: &str) -> Option<Value> {
        self.attributes.remove(key)
    } // delete_attribute

    fn is_root(&self) -> bool {
        self.root
    } // is_root

} // impl Identity for User


// AclUser ////////////////////////////////////////////////////////////////////////////////////////


/// An identity bound to one resource while the engine decides about it. Carries the effective
/// mask for that resource. Once locked the mask can no longer change.
pub struct AclUser<'u> {
    identity:   &'u mut dyn Identity,
    permission: Mask,
    locked:     bool,
} // struct AclUser

impl<'u> AclUser<'u> {

    pub(crate) fn new(identity: &'u mut dyn Identity, resource: &str, value: u32, locked: bool) -> Self {
        trace!("wrapping {} for {} with {:#b}", identity.name(), resource, value);
        AclUser{identity, permission: Mask::new(resource, value), locked}
    } // new

    /// The wrapped identity.
    #[inline]
    pub fn identity(&self) -> &dyn Identity {
        &*self.identity
    } // identity

    #[inline]
    pub(crate) fn identity_mut(&mut self) -> &mut (dyn Identity + 'u) {
        &mut *self.identity
    } // identity_mut

    /// Name of the resource the mask belongs to.
    #[inline]
    pub fn resource(&self) -> &str {
        self.permission.identifier()
    } // resource

    #[inline]
    pub fn permission(&self) -> &Mask {
        &self.permission
    } // permission

    #[inline]
    pub fn is_locked(&self) -> bool {
        self.locked
    } // is_locked

    /// True if every bit in `required` is granted.
    #[inline]
    pub fn is_allowed(&self, required: u32) -> bool {
        self.permission.contains(required)
    } // is_allowed

    /// ORs bits into the mask. Returns false if the mask is locked and nothing changed.
    pub fn grant(&mut self, bits: u32) -> bool {
        if self.locked {
            warn!("ignoring grant of {:#b} on locked {}", bits, self.resource());
            return false;
        } // if
        self.permission.add(bits);
        true
    } // grant

    /// Clears bits from the mask. Returns false if the mask is locked and nothing changed.
    pub fn deny(&mut self, bits: u32) -> bool {
        if self.locked {
            warn!("ignoring deny of {:#b} on locked {}", bits, self.resource());
            return false;
        } // if
        self.permission.sub(bits);
        true
    } // deny

    pub(crate) fn lock(&mut self) {
        self.locked = true;
    } // lock

    pub(crate) fn assign(&mut self, value: u32, locked: bool) {
        self.permission.set(value);
        self.locked = locked;
    } // assign

} // impl AclUser

impl Identity for AclUser<'_> {

    fn name(&self) -> &str {
        self.identity.name()
    } // name

    fn roles(&self) -> Option<&[String]> {
        self.identity.roles()
    } // roles

    fn attribute(&self, key: &str) -> Option<&Value> {
        self.identity.attribute(key)
    } // attribute

    fn add_attribute(&mut self, key: &str, value: Value) {
        self.identity.add_attribute(key, value)
    } // add_attribute

    fn delete_attribute(&mut self, key: &str) -> Option<Value> {
        self.identity.delete_attribute(key)
    } // delete_attribute

    fn is_root(&self) -> bool {
        self.identity.is_root()
    } // is_root

    fn is_acl_user(&self) -> bool {
        true
    } // is_acl_user

} // impl Identity for AclUser


// DecisionCache //////////////////////////////////////////////////////////////////////////////////


/// Prefix of the key marking a locked decision next to its mask.
pub const LOCK_PREFIX: &str = "!";

/// A decision read back from an identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Decision {
    pub mask:   u32,
    pub locked: bool,
} // struct Decision

/// Reads and writes computed masks in one attribute of an identity. The attribute holds a JSON
/// object mapping resource names to mask values. Locked decisions add `"!<resource>": true`.
#[derive(Clone, Debug)]
pub struct DecisionCache {
    attribute: String,
} // struct DecisionCache

impl DecisionCache {

    pub fn new<S: Into<String>>(attribute: S) -> Self {
        DecisionCache{attribute: attribute.into()}
    } // new

    #[inline]
    pub fn attribute(&self) -> &str {
        &self.attribute
    } // attribute

    fn table<'a>(&self, user: &'a dyn Identity) -> Option<&'a Map<String, Value>> {
        match user.attribute(&self.attribute) {
            None                       => None,
            Some(Value::Object(table)) => Some(table),
            Some(other)                => {
                warn!("ignoring non-object decision attribute {} on {}: {}", self.attribute, user.name(), other);
                None
            }, // Some
        } // match
    } // table

    /// Returns the stored decision for the resource, if any.
    pub fn get(&self, user: &dyn Identity, resource: &str) -> Option<Decision> {
        let table = self.table(user)?;
        let value = table.get(resource)?;
        let mask  = match value.as_u64().and_then(|v| u32::try_from(v).ok()) {
            Some(mask) => mask,
            None       => {
                warn!("ignoring malformed decision for {} on {}: {}", resource, user.name(), value);
                return None;
            }, // None
        }; // match
        let locked = table
            .get(&format!("{}{}", LOCK_PREFIX, resource))
            .and_then(Value::as_bool)
            .unwrap_or(false);

        debug!("decision cache hit for {} on {}: {:#b} (locked: {})", user.name(), resource, mask, locked);
        Some(Decision{mask, locked})
    } // get

    #[inline]
    pub fn contains(&self, user: &dyn Identity, resource: &str) -> bool {
        self.get(user, resource).is_some()
    } // contains

    /// Records the decision, replacing a previous one for the same resource.
    pub fn store(&self, user: &mut dyn Identity, resource: &str, decision: Decision) {
        trace!("storing decision for {} on {}: {:?}", user.name(), resource, decision);
        let mut table = self.table(user).cloned().unwrap_or_default();
        let lock_key  = format!("{}{}", LOCK_PREFIX, resource);

        table.insert(String::from(resource), Value::from(decision.mask));
        if decision.locked {
            table.insert(lock_key, Value::Bool(true));
        } else {
            table.remove(&lock_key);
        } // else
        user.add_attribute(&self.attribute, Value::Object(table));
    } // store

    /// Drops the decision for one resource. Returns true if there was one.
    pub fn forget(&self, user: &mut dyn Identity, resource: &str) -> bool {
        let mut table = match self.table(user) {
            Some(table) => table.clone(),
            None        => return false,
        }; // match

        table.remove(&format!("{}{}", LOCK_PREFIX, resource));
        let removed = table.remove(resource).is_some();

        user.add_attribute(&self.attribute, Value::Object(table));
        removed
    } // forget

    /// Drops every decision. Returns true if the attribute existed.
    pub fn reset(&self, user: &mut dyn Identity) -> bool {
        user.delete_attribute(&self.attribute).is_some()
    } // reset

} // impl DecisionCache


// Tests //////////////////////////////////////////////////////////////////////////////////////////


// mod tests
