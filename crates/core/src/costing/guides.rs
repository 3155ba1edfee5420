use rust_decimal::Decimal;
use tracing::warn;

use crate::domain::price_guide::{GuideSelection, PriceGuideId, PriceGuideItem};
use crate::domain::quote::{Money, QuoteLineItem};

/// Server-provided list of fixed-price guides.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PriceCatalog {
    items: Vec<PriceGuideItem>,
}

impl PriceCatalog {
    pub fn new(items: Vec<PriceGuideItem>) -> Self {
        Self { items }
    }

    pub fn find(&self, id: &PriceGuideId) -> Option<&PriceGuideItem> {
        self.items.iter().find(|item| &item.id == id)
    }

    pub fn items(&self) -> &[PriceGuideItem] {
        &self.items
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedLine {
    pub item: PriceGuideItem,
    pub quantity: u32,
}

impl ResolvedLine {
    pub fn line_total(&self) -> Money {
        self.item.unit_price * Decimal::from(self.quantity)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Aggregation {
    pub lines: Vec<ResolvedLine>,
    /// Selected ids that matched neither the catalog nor the custom items, with their counts.
    pub dropped: Vec<(PriceGuideId, u32)>,
}

impl Aggregation {
    pub fn subtotal(&self) -> Money {
        self.lines.iter().map(ResolvedLine::line_total).sum()
    }

    pub fn dropped_count(&self) -> u32 {
        self.dropped.iter().map(|(_, quantity)| *quantity).sum()
    }

    pub fn line_items(&self) -> Vec<QuoteLineItem> {
        self.lines
            .iter()
            .map(|line| QuoteLineItem {
                id: line.item.id.clone(),
                name: line.item.name.clone(),
                unit_price: line.item.unit_price,
                quantity: line.quantity,
                line_total: line.line_total(),
            })
            .collect()
    }

    pub fn resolved(&self) -> impl Iterator<Item = (&PriceGuideItem, u32)> {
        self.lines.iter().map(|line| (&line.item, line.quantity))
    }
}

/// Resolves every selected id against the catalog, then the custom items.
///
/// Unknown ids are dropped rather than failing the aggregation; each drop is logged and counted
/// in [`Aggregation::dropped`].
pub fn to_line_items(
    selection: &GuideSelection,
    catalog: &PriceCatalog,
    custom_items: &[PriceGuideItem],
) -> Aggregation {
    let mut aggregation = Aggregation::default();

    for (id, quantity) in selection.iter() {
        let resolved =
            catalog.find(id).or_else(|| custom_items.iter().find(|item| &item.id == id));
        match resolved {
            Some(item) => aggregation.lines.push(ResolvedLine { item: item.clone(), quantity }),
            None => {
                warn!(
                    event_name = "costing.price_guide.unknown_id_dropped",
                    price_guide_id = id.as_str(),
                    quantity,
                    "selected price guide is not in the catalog or custom items; dropping it"
                );
                aggregation.dropped.push((id.clone(), quantity));
            }
        }
    }

    aggregation
}

/// Boundary entry point for the flat id-list representation.
pub fn to_line_items_from_ids(
    selection_ids: &[PriceGuideId],
    catalog: &PriceCatalog,
    custom_items: &[PriceGuideItem],
) -> Aggregation {
    to_line_items(&GuideSelection::from_ids(selection_ids.iter().cloned()), catalog, custom_items)
}
