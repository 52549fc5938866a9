//! Cross-record invariants of an import batch.

use std::collections::{HashMap, HashSet};

use crate::citizen::{Citizen, CitizenId};

/// A violated kinship invariant.
///
/// Each variant maps to a stable client-facing kind (see [`RelationError::kind`]).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RelationError {
    #[error("citizen id {citizen_id} is not unique")]
    DuplicateCitizenId { citizen_id: CitizenId },

    #[error("citizen {citizen_id} can not be a relative to itself")]
    SelfRelation { citizen_id: CitizenId },

    #[error("citizen {citizen_id} lists relative {relative_id} more than once")]
    DuplicateRelative {
        citizen_id: CitizenId,
        relative_id: CitizenId,
    },

    #[error("citizen {citizen_id} lists relative {relative_id} which does not exist")]
    UnknownRelative {
        citizen_id: CitizenId,
        relative_id: CitizenId,
    },

    #[error(
        "citizen {citizen_id} lists {relative_id} as a relative, \
         but {relative_id} does not list {citizen_id}"
    )]
    AsymmetricRelation {
        citizen_id: CitizenId,
        relative_id: CitizenId,
    },
}

impl RelationError {
    pub fn kind(&self) -> &'static str {
        match self {
            RelationError::DuplicateCitizenId { .. } => "DuplicateCitizenIdError",
            RelationError::SelfRelation { .. } => "SelfRelationError",
            RelationError::DuplicateRelative { .. } => "DuplicateRelativeError",
            RelationError::UnknownRelative { .. } => "UnknownRelativeError",
            RelationError::AsymmetricRelation { .. } => "AsymmetricRelationError",
        }
    }
}

/// Check the five batch invariants, in priority order.
///
/// Each check runs over the whole batch before the next one starts, so the
/// reported kind depends only on which invariants are broken, not on where.
pub fn validate_relations(citizens: &[Citizen]) -> Result<(), RelationError> {
    let mut by_id: HashMap<CitizenId, &Citizen> = HashMap::with_capacity(citizens.len());
    for citizen in citizens {
        if by_id.insert(citizen.citizen_id, citizen).is_some() {
            return Err(RelationError::DuplicateCitizenId {
                citizen_id: citizen.citizen_id,
            });
        }
    }

    for citizen in citizens {
        if citizen.relatives.contains(&citizen.citizen_id) {
            return Err(RelationError::SelfRelation {
                citizen_id: citizen.citizen_id,
            });
        }
    }

    let mut relative_sets: HashMap<CitizenId, HashSet<CitizenId>> =
        HashMap::with_capacity(citizens.len());
    for citizen in citizens {
        let mut seen = HashSet::with_capacity(citizen.relatives.len());
        for &relative_id in &citizen.relatives {
            if !seen.insert(relative_id) {
                return Err(RelationError::DuplicateRelative {
                    citizen_id: citizen.citizen_id,
                    relative_id,
                });
            }
        }
        relative_sets.insert(citizen.citizen_id, seen);
    }

    for citizen in citizens {
        if let Some(&relative_id) = citizen.relatives.iter().find(|r| !by_id.contains_key(*r)) {
            return Err(RelationError::UnknownRelative {
                citizen_id: citizen.citizen_id,
                relative_id,
            });
        }
    }

    for citizen in citizens {
        for &relative_id in &citizen.relatives {
            let back = relative_sets
                .get(&relative_id)
                .is_some_and(|set| set.contains(&citizen.citizen_id));
            if !back {
                return Err(RelationError::AsymmetricRelation {
                    citizen_id: citizen.citizen_id,
                    relative_id,
                });
            }
        }
    }

    Ok(())
}

/// Checks a patch's new relative list can make sense before any store access:
/// no self-reference and no duplicates.
pub fn validate_patch_relatives(
    citizen_id: CitizenId,
    relatives: &[CitizenId],
) -> Result<(), RelationError> {
    if relatives.contains(&citizen_id) {
        return Err(RelationError::SelfRelation { citizen_id });
    }
    let mut seen = HashSet::with_capacity(relatives.len());
    for &relative_id in relatives {
        if !seen.insert(relative_id) {
            return Err(RelationError::DuplicateRelative {
                citizen_id,
                relative_id,
            });
        }
    }
    Ok(())
}
