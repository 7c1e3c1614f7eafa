//! Entity trait: identity + continuity across state changes.

use crate::error::{DomainError, DomainResult, EntityKind};

/// Entity marker + minimal interface.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Copy + Eq + core::hash::Hash + core::fmt::Debug + core::fmt::Display;

    /// Which kind of record this is (used in not-found errors and logs).
    const KIND: EntityKind;

    /// Returns the entity identifier.
    fn id(&self) -> Self::Id;
}

/// Turn a lookup result into the entity or a `NotFound` of its kind.
pub fn require<E: Entity>(found: Option<E>) -> DomainResult<E> {
    found.ok_or(DomainError::NotFound(E::KIND))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Thing(u32);

    impl Entity for Thing {
        type Id = u32;
        const KIND: EntityKind = EntityKind::Member;

        fn id(&self) -> Self::Id {
            self.0
        }
    }

    #[test]
    fn require_reports_the_entity_kind() {
        assert_eq!(require(Some(Thing(7))).map(|t| t.id()), Ok(7));
        assert_eq!(
            require::<Thing>(None).map(|t| t.id()),
            Err(DomainError::NotFound(EntityKind::Member))
        );
    }
}
