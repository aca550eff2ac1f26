//! Cross-thread handover of live collections.
//!
//! A live collection never leaves its session. What crosses threads is a
//! [`HandoverToken`]: plain data naming the container by owner and property,
//! plus the generation it was exported at. The receiving session resolves it
//! into its own live collection.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Generation, Session};
use crate::collection::ManagedCollection;
use crate::model::{ContainerKey, ContainerKind, ObjectKey};
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HandoverToken {
    generation: Generation,
    owner: ObjectKey,
    property: String,
    container: ContainerKind,
}

impl HandoverToken {
    pub(crate) fn new(generation: Generation, container: &ContainerKey, kind: ContainerKind) -> Self {
        Self { generation, owner: container.owner, property: container.property.clone(), container: kind }
    }

    /// Generation the exporting session had committed when the token was made.
    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn owner(&self) -> ObjectKey {
        self.owner
    }

    pub fn property(&self) -> &str {
        &self.property
    }

    pub fn container(&self) -> ContainerKind {
        self.container
    }
}

impl Session {
    /// Resolve a token into a live collection bound to this session.
    ///
    /// A session behind the token's generation refreshes first. If the owner
    /// no longer exists the result is `Ok(None)`, not an error.
    pub fn resolve(&self, token: &HandoverToken) -> Result<Option<ManagedCollection>> {
        if self.generation()? < token.generation {
            self.refresh()?;
        }
        let class = self.shared.read(|view, _| Ok(view.entity(token.owner).map(|e| e.class.clone())))?;
        let Some(class) = class else {
            debug!(owner = %token.owner, property = %token.property, "handover owner is gone");
            return Ok(None);
        };
        let kind = self.shared.schema().descriptor(&class, &token.property)?.kind.clone();
        if kind.container != Some(token.container) {
            return Err(Error::TypeMismatch {
                expected: format!("{} property", token.container),
                got: format!("{}: {kind}", token.property),
            });
        }
        debug!(owner = %token.owner, property = %token.property, generation = %token.generation, "resolved handover token");
        let container = ContainerKey::new(token.owner, token.property.clone());
        Ok(Some(ManagedCollection::live(self.shared.clone(), container, kind)))
    }
}
