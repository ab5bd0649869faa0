//! Shared vocabulary for the elock workspace.
//!
//! - [`EntityKey`] / [`EntityId`]: the discriminated `(type, identifier)` pair
//!   every keyed lock is addressed by.
//! - [`cx::Cx`]: the cancellation context threaded through blocking waits.

pub mod cx;

pub use cx::{CancelReason, CancelState, Cx};

use std::any;
use std::borrow::Cow;
use std::fmt;

/// Delimiter used when an [`EntityKey`] is rendered for humans.
///
/// Rendering only; keys compare structurally, so an identifier containing the
/// delimiter can never alias a key of another type.
pub const KEY_DELIMITER: &str = "###";

// ---------------------------------------------------------------------------
// EntityKey
// ---------------------------------------------------------------------------

/// Identity of a lockable entity: a type discriminator plus an identifier.
///
/// Two entities of different kinds with the same identifier are distinct keys.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityKey {
    kind: Box<str>,
    id: Box<str>,
}

impl EntityKey {
    /// Build a key from an explicit discriminator and identifier.
    #[must_use]
    pub fn new(kind: impl Into<Box<str>>, id: impl Into<Box<str>>) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
        }
    }

    /// Build the key for any [`EntityId`] implementor.
    #[must_use]
    pub fn of<E: EntityId + ?Sized>(entity: &E) -> Self {
        Self::new(entity.entity_type(), entity.entity_id())
    }

    /// The type discriminator.
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// The identifier within [`Self::kind`].
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{KEY_DELIMITER}{}", self.kind, self.id)
    }
}

// ---------------------------------------------------------------------------
// EntityId
// ---------------------------------------------------------------------------

/// Anything that can be locked by identity.
///
/// The discriminator defaults to the implementing type's name, so two domain
/// types never collide even when their identifiers do. Override
/// [`entity_type`](EntityId::entity_type) when the name must stay stable
/// across refactors or when several Rust types model one logical entity.
pub trait EntityId {
    /// Type discriminator.
    fn entity_type(&self) -> Cow<'_, str> {
        Cow::Borrowed(any::type_name::<Self>())
    }

    /// Identifier, compared only within the same [`entity_type`](EntityId::entity_type).
    fn entity_id(&self) -> Cow<'_, str>;

    /// The lock-table key for this entity.
    fn entity_key(&self) -> EntityKey {
        EntityKey::of(self)
    }
}

impl EntityId for EntityKey {
    fn entity_type(&self) -> Cow<'_, str> {
        Cow::Borrowed(self.kind())
    }

    fn entity_id(&self) -> Cow<'_, str> {
        Cow::Borrowed(self.id())
    }

    fn entity_key(&self) -> EntityKey {
        self.clone()
    }
}

impl<E: EntityId + ?Sized> EntityId for &E {
    fn entity_type(&self) -> Cow<'_, str> {
        (**self).entity_type()
    }

    fn entity_id(&self) -> Cow<'_, str> {
        (**self).entity_id()
    }

    fn entity_key(&self) -> EntityKey {
        (**self).entity_key()
    }
}
