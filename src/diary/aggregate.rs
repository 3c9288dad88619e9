use serde::Serialize;
use time::{Date, UtcOffset};

use crate::entries::model::{FoodEntry, WaterEntry};

const MS_PER_HOUR: i64 = 3_600_000;
const MS_PER_DAY: i64 = 24 * MS_PER_HOUR;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum MealGroup {
    Breakfast,
    Lunch,
    Dinner,
    Snacks,
}

impl MealGroup {
    pub const ALL: [MealGroup; 4] = [
        MealGroup::Breakfast,
        MealGroup::Lunch,
        MealGroup::Dinner,
        MealGroup::Snacks,
    ];

    /// Breakfast 05–11, lunch 11–16, dinner 16–22; everything else is a snack.
    pub fn for_hour(hour: u8) -> Self {
        match hour {
            5..=10 => MealGroup::Breakfast,
            11..=15 => MealGroup::Lunch,
            16..=21 => MealGroup::Dinner,
            _ => MealGroup::Snacks,
        }
    }

    fn index(self) -> usize {
        match self {
            MealGroup::Breakfast => 0,
            MealGroup::Lunch => 1,
            MealGroup::Dinner => 2,
            MealGroup::Snacks => 3,
        }
    }
}

/// A local calendar day as an inclusive epoch-millisecond range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayWindow {
    pub start_ms: i64,
    pub end_ms: i64,
}

impl DayWindow {
    /// 00:00:00.000 through 23:59:59.999 of `date` at `offset`.
    pub fn new(date: Date, offset: UtcOffset) -> Self {
        let start = date.midnight().assume_offset(offset);
        let start_ms = (start.unix_timestamp_nanos() / 1_000_000) as i64;
        Self {
            start_ms,
            end_ms: start_ms + MS_PER_DAY - 1,
        }
    }

    pub fn contains(&self, ts_ms: i64) -> bool {
        self.start_ms <= ts_ms && ts_ms <= self.end_ms
    }

    /// Local hour of a timestamp inside the window.
    pub fn hour_of(&self, ts_ms: i64) -> u8 {
        ((ts_ms - self.start_ms).clamp(0, MS_PER_DAY - 1) / MS_PER_HOUR) as u8
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailySummary {
    pub total_calories_kcal: f64,
    pub total_protein_grams: f64,
    pub total_carb_grams: f64,
    pub total_fat_grams: f64,
    pub total_water_liters: f64,
    /// Food entries inside the window.
    pub entry_count: usize,
}

/// One day's food entries split by meal period, plus the day's totals.
#[derive(Debug, Clone, PartialEq)]
pub struct DayAggregate {
    pub window: DayWindow,
    groups: [Vec<FoodEntry>; 4],
    pub summary: DailySummary,
}

impl DayAggregate {
    pub fn group(&self, group: MealGroup) -> &[FoodEntry] {
        &self.groups[group.index()]
    }

    /// Non-empty groups in meal order.
    pub fn groups(&self) -> impl Iterator<Item = (MealGroup, &[FoodEntry])> + '_ {
        MealGroup::ALL
            .into_iter()
            .map(|g| (g, self.group(g)))
            .filter(|(_, entries)| !entries.is_empty())
    }

    /// Entries of the day, newest first.
    pub fn entries_newest_first(&self) -> Vec<&FoodEntry> {
        let mut all: Vec<&FoodEntry> = self.groups.iter().flatten().collect();
        all.sort_by(|a, b| b.timestamp_ms.cmp(&a.timestamp_ms));
        all
    }
}

/// Selects the entries that fall on `date`, buckets food by meal period in
/// source order, and totals the day.
pub fn aggregate_day(
    entries: &[FoodEntry],
    water: &[WaterEntry],
    date: Date,
    offset: UtcOffset,
) -> DayAggregate {
    let window = DayWindow::new(date, offset);
    let mut groups: [Vec<FoodEntry>; 4] = Default::default();
    let (mut cal, mut protein, mut carbs, mut fat) = (0.0, 0.0, 0.0, 0.0);
    let mut entry_count = 0;

    for entry in entries.iter().filter(|e| window.contains(e.timestamp_ms)) {
        cal += entry.calories_kcal;
        protein += entry.protein_grams;
        carbs += entry.carb_grams;
        fat += entry.fat_grams;
        entry_count += 1;
        let group = MealGroup::for_hour(window.hour_of(entry.timestamp_ms));
        groups[group.index()].push(entry.clone());
    }

    let water_liters: f64 = water
        .iter()
        .filter(|w| window.contains(w.timestamp_ms))
        .map(|w| w.amount_liters)
        .sum();

    DayAggregate {
        window,
        groups,
        summary: DailySummary {
            total_calories_kcal: cal.round(),
            total_protein_grams: protein.round(),
            total_carb_grams: carbs.round(),
            total_fat_grams: fat.round(),
            total_water_liters: round_tenth(water_liters),
            entry_count,
        },
    }
}

/// Calorie subtotal of a meal group, rounded like the day total.
pub fn group_calories(entries: &[FoodEntry]) -> f64 {
    entries.iter().map(|e| e.calories_kcal).sum::<f64>().round()
}

pub fn round_tenth(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}
