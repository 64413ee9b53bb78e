//! The service registry.
//!
//! Effects run against an [`Env`]: a read-only, keyed map from service tags
//! to service values. The registry is not a global singleton — it is carried
//! explicitly by the [`Runtime`](crate::runtime::Runtime), and
//! `provide_service` produces an *extended copy* rather than mutating in
//! place, so handing a runtime to a subsystem never leaks services back.
//!
//! A [`Tag<S>`] associates a string identifier with a service type. The key
//! incorporates both the identifier and the `TypeId` of `S`, so two tags
//! with the same name but different service types never collide.

use core::fmt;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::rc::Rc;

/// The key under which a service is stored: tag identifier plus service
/// type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TagKey {
    name: String,
    type_id: TypeId,
}

impl TagKey {
    /// Returns the tag's string identifier.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for TagKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// A typed service key.
///
/// ```
/// use fiberio::env::{Env, Tag};
///
/// struct Greeter {
///     greeting: String,
/// }
///
/// let tag = Tag::<Greeter>::new("greeter");
/// let env = Env::empty().with_service(&tag, Greeter { greeting: "hi".into() });
/// assert_eq!(env.get(&tag).unwrap().greeting, "hi");
/// ```
pub struct Tag<S> {
    name: String,
    _marker: PhantomData<fn() -> S>,
}

impl<S: 'static> Tag<S> {
    /// Creates a tag with the given string identifier.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            _marker: PhantomData,
        }
    }

    /// Returns the registry key for this tag.
    #[must_use]
    pub fn key(&self) -> TagKey {
        TagKey {
            name: self.name.clone(),
            type_id: TypeId::of::<S>(),
        }
    }

    /// Returns the tag's string identifier.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<S> Clone for Tag<S> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            _marker: PhantomData,
        }
    }
}

impl<S> fmt::Debug for Tag<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tag({})", self.name)
    }
}

/// A read-only collection of services keyed by tag.
///
/// Services are held by shared reference (`Rc`); cloning an environment is
/// cheap and never copies service values.
#[derive(Clone, Default)]
pub struct Env {
    services: HashMap<TagKey, Rc<dyn Any>>,
}

impl Env {
    /// The empty environment.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Returns an extended copy with the service bound under the tag.
    ///
    /// The receiver is unaffected; an existing binding for the same tag is
    /// replaced in the copy.
    #[must_use]
    pub fn with_service<S: 'static>(&self, tag: &Tag<S>, service: S) -> Self {
        let mut services = self.services.clone();
        services.insert(tag.key(), Rc::new(service));
        Self { services }
    }

    /// Looks up the service bound under the tag.
    #[must_use]
    pub fn get<S: 'static>(&self, tag: &Tag<S>) -> Option<Rc<S>> {
        self.services
            .get(&tag.key())
            .cloned()
            .and_then(|service| service.downcast::<S>().ok())
    }

    /// Returns true if a service is bound under the tag.
    #[must_use]
    pub fn contains<S: 'static>(&self, tag: &Tag<S>) -> bool {
        self.services.contains_key(&tag.key())
    }

    /// Returns the number of bound services.
    #[must_use]
    pub fn len(&self) -> usize {
        self.services.len()
    }

    /// Returns true if no services are bound.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Raw lookup by key, for the interpreter.
    pub(crate) fn get_raw(&self, key: &TagKey) -> Option<Rc<dyn Any>> {
        self.services.get(key).cloned()
    }
}

impl fmt::Debug for Env {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.services.keys().map(TagKey::name).collect();
        names.sort_unstable();
        f.debug_struct("Env").field("services", &names).finish()
    }
}
