use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::quote::Money;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PriceGuideId(pub String);

impl PriceGuideId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PriceGuideId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuideProvenance {
    Catalog,
    Custom,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceGuideItem {
    pub id: PriceGuideId,
    pub name: String,
    pub unit_price: Money,
    pub catalog_number: String,
    pub provenance: GuideProvenance,
}

impl PriceGuideItem {
    pub fn catalog(
        id: impl Into<String>,
        name: impl Into<String>,
        unit_price: Money,
        catalog_number: impl Into<String>,
    ) -> Self {
        Self {
            id: PriceGuideId(id.into()),
            name: name.into(),
            unit_price,
            catalog_number: catalog_number.into(),
            provenance: GuideProvenance::Catalog,
        }
    }

    /// Ad-hoc item entered by the user. Priced at zero until someone prices it manually.
    pub fn custom(name: impl Into<String>) -> Self {
        Self {
            id: PriceGuideId(format!("custom-{}", Uuid::new_v4().simple())),
            name: name.into(),
            unit_price: Decimal::ZERO,
            catalog_number: String::new(),
            provenance: GuideProvenance::Custom,
        }
    }
}

/// Multiset of selected guide ids.
///
/// The wire and storage form is a flat id list where repeating an id means a higher quantity.
/// Internally each id is held once with its count, ordered by first selection.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<PriceGuideId>", into = "Vec<PriceGuideId>")]
pub struct GuideSelection {
    entries: Vec<(PriceGuideId, u32)>,
}

impl GuideSelection {
    pub fn from_ids<I>(ids: I) -> Self
    where
        I: IntoIterator<Item = PriceGuideId>,
    {
        let mut selection = Self::default();
        for id in ids {
            selection.add(id);
        }
        selection
    }

    pub fn add(&mut self, id: PriceGuideId) {
        match self.entries.iter_mut().find(|(existing, _)| *existing == id) {
            Some((_, quantity)) => *quantity += 1,
            None => self.entries.push((id, 1)),
        }
    }

    /// Removes one occurrence; returns false when the id was not selected.
    pub fn remove_one(&mut self, id: &PriceGuideId) -> bool {
        let Some(position) = self.entries.iter().position(|(existing, _)| existing == id) else {
            return false;
        };
        if self.entries[position].1 > 1 {
            self.entries[position].1 -= 1;
        } else {
            self.entries.remove(position);
        }
        true
    }

    pub fn quantity(&self, id: &PriceGuideId) -> u32 {
        self.entries
            .iter()
            .find(|(existing, _)| existing == id)
            .map(|(_, quantity)| *quantity)
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total number of selected units, counting repeats.
    pub fn len(&self) -> usize {
        self.entries.iter().map(|(_, quantity)| *quantity as usize).sum()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PriceGuideId, u32)> {
        self.entries.iter().map(|(id, quantity)| (id, *quantity))
    }

    pub fn to_ids(&self) -> Vec<PriceGuideId> {
        self.entries
            .iter()
            .flat_map(|(id, quantity)| std::iter::repeat(id.clone()).take(*quantity as usize))
            .collect()
    }
}

impl From<Vec<PriceGuideId>> for GuideSelection {
    fn from(ids: Vec<PriceGuideId>) -> Self {
        Self::from_ids(ids)
    }
}

impl From<GuideSelection> for Vec<PriceGuideId> {
    fn from(selection: GuideSelection) -> Self {
        selection.to_ids()
    }
}
