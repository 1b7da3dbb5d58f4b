//! Bitmask based access control for resources with inherited permissions.
//!
//! Permissions are grouped by *resource*. Every permission registered on a resource receives one
//! bit, so any set of permissions is a single `u32` and checking a request is one AND. Who gets
//! which bits is decided by a pipeline of *processors* looking at the requesting identity, and
//! the outcome is kept on the identity itself so the pipeline runs once per identity and
//! resource.
//!
//! In the sense of this implementation:
//! * a *resource* is a named namespace of up to 30 permissions.
//! * a *permission* is an action which may be granted on a resource, e.g. "view".
//! * an *entry* is a named subset of the permissions of a resource, e.g. "Manager".
//! * a *processor* grants or denies entries to identities, e.g. by role or by user name.
//! * an *identity* is whatever requests access, see [`Identity`].
//!
//! # Resources
//!
//! Permissions receive their bits in registration order, the n-th permission holding bit
//! `1 << (n - 1)`. The reserved key `all` holds the union of every assigned bit.
//!
//! ```rust
//! # extern crate mask_acl;
//! use mask_acl::{Behaviour, Resource};
//!
//! let mut invoice = Resource::new("Invoice", Behaviour::Whitelist);
//!
//! assert_eq!(1, invoice.add_permission("view").unwrap());
//! assert_eq!(2, invoice.add_permission("edit").unwrap());
//! assert_eq!(4, invoice.add_permission("delete").unwrap());
//! assert_eq!(7, invoice.get_permission("all").unwrap());
//! assert_eq!(5, invoice.get_permissions(&["view", "delete"]).unwrap());
//! ```
//!
//! Names must match `[a-z_]+`; reserved, duplicate and surplus permissions are refused.
//!
//! ## Behaviour
//!
//! A *whitelist* resource starts every decision with no permission at all and processors grant
//! what an identity may do. A *blacklist* resource starts with every permission and processors
//! take away what an identity may not do.
//!
//! ## Inheritance
//!
//! A resource may extend exactly one parent. It takes over the parent's behaviour, bits and
//! entries, and its own permissions continue the numbering where the parent stopped:
//!
//! ```rust
//! # extern crate mask_acl;
//! # use mask_acl::{Behaviour, Resource};
//! # let mut invoice = Resource::new("Invoice", Behaviour::Whitelist);
//! # invoice.add_permissions(&["view", "edit", "delete"]).unwrap();
//! let mut recurring = Resource::new("RecurringInvoice", Behaviour::Blacklist);
//!
//! recurring.add_permission("schedule").unwrap();
//! recurring.extends_from(&invoice).unwrap();
//!
//! assert_eq!(Behaviour::Whitelist, recurring.behaviour());
//! assert_eq!(2, recurring.get_permission("edit").unwrap());
//! assert_eq!(8, recurring.get_permission("schedule").unwrap());
//! ```
//!
//! A permission defined on both sides with different bits makes the extension fail.
//!
//! # Entries
//!
//! Entries name a subset of permissions. They may reference other entries of the same processor
//! by writing their name in brackets, and an entry missing on a resource is looked up on its
//! ancestors, nearest first. Once compiled, an entry name can be used wherever a permission name
//! is expected.
//!
//! Resources are usually described declaratively and built by a loader:
//!
//! ```rust
//! # extern crate mask_acl;
//! use mask_acl::{ArrayLoader, ResourceLoader};
//!
//! let loader = ArrayLoader::from_json(r#"[
//!     {
//!         "name": "Invoice",
//!         "behaviour": 0,
//!         "permissions": ["view", "edit", "delete"],
//!         "entries": {
//!             "role": {
//!                 "Manager": ["view", "edit"],
//!                 "Director": ["[Manager]", "delete"]
//!             }
//!         }
//!     }
//! ]"#).unwrap();
//!
//! let invoice = loader.load_resource("Invoice").unwrap();
//!
//! assert_eq!(Some(3), invoice.entry(Some("role"), "Manager"));
//! assert_eq!(7, invoice.get_permission("Director").unwrap());
//! ```
//!
//! Loaders can be chained with [`ChainLoader`] and their output kept in a [`Cache`] through
//! [`CacheLoader`].
//!
//! # Deciding
//!
//! An [`Acl`] ties a loader to a processor pipeline. Processors run in registration order; one
//! owning no entry on the resource is skipped, and a processor locking the decision ends the
//! pipeline.
//!
//! ```rust
//! # extern crate mask_acl;
//! use mask_acl::*;
//!
//! # fn main() -> Result<()> {
//! let loader = ArrayLoader::new(vec![
//!     ResourceDefinition::new("Invoice", Behaviour::Whitelist)
//!         .permissions(&["view", "edit", "delete"])
//!         .entry(Some("role"), "intern", &["view", "delete"]),
//! ]);
//! let mut acl = Acl::new(loader);
//!
//! acl.register(RootProcessor::default())
//!     .register(RoleProcessor::default())
//!     .register(IdentifierProcessor::username());
//!
//! let mut intern = User::new("bob").with_roles(vec!["intern"]);
//!
//! assert!(acl.is_allowed(&mut intern, "Invoice", &["view", "delete"])?);
//! assert!(!acl.is_allowed(&mut intern, "Invoice", &["edit"])?);
//!
//! let mut admin = User::new("admin").with_root(true);
//!
//! assert!(acl.is_allowed(&mut admin, "Invoice", &["view", "edit", "delete"])?);
//! # Ok(())
//! # }
//! ```
//!
//! ## Decision cache
//!
//! The mask decided for a resource is stored in an attribute of the identity, `acl_decisions`
//! unless configured otherwise through [`AclConfig`]. Further questions about the same resource
//! are answered from it without running the pipeline. Use [`Acl::forget`] or [`Acl::reset`]
//! after changing an identity's roles.
//!
//! ## Hooks
//!
//! [`Acl::is_allowed_with`] and components registered through [`Acl::bind`] see every decision
//! and may hand back [`FollowUp`]s adjusting the bound user before the answer is returned.
//!
//! # Errors
//!
//! Every failure is reported as an [`Error`]. A request for an unknown resource, permission or
//! entry is never silently answered; callers should treat an error as a denial.

mod acl;
mod config;
mod entry;
mod error;
mod loader;
mod mask;
mod processor;
mod resource;
mod user;

pub use crate::acl::{follow_up, Acl, AclBindable, DecisionHook, FollowUp};
pub use crate::config::{AclConfig, DEFAULT_ATTRIBUTE, DEFAULT_CACHE_PREFIX};
pub use crate::entry::{reference, Entry, EntryLoader, EntryResolver};
pub use crate::error::{Error, Result};
pub use crate::loader::{
    ArrayLoader, Cache, CacheLoader, ChainLoader, CollectionLoader, Loader, MemoryCache, ResourceDefinition,
    ResourceLoader,
};
pub use crate::mask::{Mask, MaskCollection};
pub use crate::processor::{
    IdentifierProcessor, Processor, ProcessorContext, Processors, RoleProcessor, RootProcessor,
};
pub use crate::resource::{parents, Behaviour, Parents, PendingDecision, Resource, ALL, MAX_PERMISSIONS};
pub use crate::user::{AclUser, Decision, DecisionCache, Identity, User, LOCK_PREFIX};
