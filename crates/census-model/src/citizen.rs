//! Citizen records and typed patches.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub type ImportId = u64;
pub type CitizenId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
}

impl Gender {
    pub fn as_str(self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "male" => Some(Gender::Male),
            "female" => Some(Gender::Female),
            _ => None,
        }
    }
}

/// One person inside an import.
///
/// Serializes to the wire shape (`birth_date` as `DD.MM.YYYY`); the same
/// shape is used for store snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citizen {
    pub citizen_id: CitizenId,
    pub town: String,
    pub street: String,
    pub building: String,
    pub apartment: u64,
    pub name: String,
    #[serde(with = "crate::date::wire")]
    pub birth_date: NaiveDate,
    pub gender: Gender,
    pub relatives: Vec<CitizenId>,
}

/// A partial update of one citizen: one optional slot per mutable attribute.
///
/// `citizen_id` is not patchable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CitizenPatch {
    pub town: Option<String>,
    pub street: Option<String>,
    pub building: Option<String>,
    pub apartment: Option<u64>,
    pub name: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub gender: Option<Gender>,
    pub relatives: Option<Vec<CitizenId>>,
}

impl CitizenPatch {
    pub fn is_empty(&self) -> bool {
        *self == CitizenPatch::default()
    }

    pub fn touches_relatives(&self) -> bool {
        self.relatives.is_some()
    }

    pub fn touches_birth_date(&self) -> bool {
        self.birth_date.is_some()
    }

    pub fn touches_town(&self) -> bool {
        self.town.is_some()
    }

    /// Overwrite every attribute present in the patch.
    pub fn apply_to(&self, citizen: &mut Citizen) {
        if let Some(town) = &self.town {
            citizen.town = town.clone();
        }
        if let Some(street) = &self.street {
            citizen.street = street.clone();
        }
        if let Some(building) = &self.building {
            citizen.building = building.clone();
        }
        if let Some(apartment) = self.apartment {
            citizen.apartment = apartment;
        }
        if let Some(name) = &self.name {
            citizen.name = name.clone();
        }
        if let Some(birth_date) = self.birth_date {
            citizen.birth_date = birth_date;
        }
        if let Some(gender) = self.gender {
            citizen.gender = gender;
        }
        if let Some(relatives) = &self.relatives {
            citizen.relatives = relatives.clone();
        }
    }
}
