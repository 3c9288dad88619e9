use serde::Serialize;

use crate::entries::model::FoodEntry;

/// Entries closer than this many kcal (and with the same name) collapse.
pub const CALORIE_TOLERANCE_KCAL: f64 = 5.0;

/// Several near-identical entries shown as one line with a count.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsolidatedItem {
    pub representative: FoodEntry,
    pub count: usize,
    pub total_calories_kcal: f64,
    pub member_ids: Vec<String>,
}

/// Greedy first-match merge over one meal group, keeping group order.
///
/// Each entry is compared against the representative (first member) of the
/// items formed so far and joins the first one it matches. Items are never
/// re-merged, so the result is not a transitive clustering: A≈B and B≈C with
/// A≉C leaves C on its own unless it also matches A directly.
pub fn consolidate(entries: &[FoodEntry]) -> Vec<ConsolidatedItem> {
    let mut items: Vec<ConsolidatedItem> = Vec::new();
    for entry in entries {
        match items.iter_mut().find(|item| is_duplicate(&item.representative, entry)) {
            Some(item) => {
                item.count += 1;
                item.total_calories_kcal += entry.calories_kcal;
                item.member_ids.push(entry.id.clone());
            }
            None => items.push(ConsolidatedItem {
                representative: entry.clone(),
                count: 1,
                total_calories_kcal: entry.calories_kcal,
                member_ids: vec![entry.id.clone()],
            }),
        }
    }
    items
}

fn is_duplicate(representative: &FoodEntry, candidate: &FoodEntry) -> bool {
    representative.product_name == candidate.product_name
        && (representative.calories_kcal - candidate.calories_kcal).abs() < CALORIE_TOLERANCE_KCAL
}
