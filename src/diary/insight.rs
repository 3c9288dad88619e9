use serde::Serialize;

use crate::profile::targets::NutrientTargets;

use super::aggregate::DailySummary;

/// Day limits the diary measures against: the user's calorie/protein targets
/// plus fixed defaults for the remaining nutrients.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyLimits {
    pub calories_kcal: f64,
    pub protein_grams: f64,
    pub carb_grams: f64,
    pub fat_grams: f64,
    pub water_liters: f64,
    pub fiber_grams: f64,
}

impl From<NutrientTargets> for DailyLimits {
    fn from(t: NutrientTargets) -> Self {
        Self {
            calories_kcal: t.calories_kcal as f64,
            protein_grams: t.protein_grams as f64,
            carb_grams: 250.0,
            fat_grams: 80.0,
            water_liters: 3.0,
            fiber_grams: 30.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum InsightKind {
    OverGoal,
    ProteinLagging,
    Hydration,
    OnTrack,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    High,
    Medium,
    Info,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Insight {
    pub kind: InsightKind,
    pub severity: Severity,
    pub message: &'static str,
    pub color: &'static str,
    pub icon: &'static str,
}

impl Insight {
    pub fn of(kind: InsightKind) -> Self {
        let (severity, message, color, icon) = match kind {
            InsightKind::OverGoal => (
                Severity::High,
                "You've exceeded your goal. Try a lighter meal next.",
                "#ef4444",
                "warning",
            ),
            InsightKind::ProteinLagging => (
                Severity::Medium,
                "Protein is lagging. Prioritize protein in your next meal.",
                "#f59e0b",
                "fitness-center",
            ),
            InsightKind::Hydration => (
                Severity::Medium,
                "Hydration check! Grab a glass of water.",
                "#3b82f6",
                "local-drink",
            ),
            InsightKind::OnTrack => (
                Severity::Info,
                "You're doing great! Keep tracking.",
                "#10b981",
                "thumb-up",
            ),
        };
        Self {
            kind,
            severity,
            message,
            color,
            icon,
        }
    }
}

/// Hydration nudges only start after this local hour.
const HYDRATION_CHECK_AFTER_HOUR: u8 = 14;

/// One insight for the day; the first matching rule wins.
pub fn derive_insight(
    summary: &DailySummary,
    limits: &DailyLimits,
    now_local_hour: u8,
) -> Option<Insight> {
    if summary.entry_count == 0 {
        return None;
    }
    let cal = summary.total_calories_kcal;

    let kind = if cal > limits.calories_kcal * 1.1 {
        InsightKind::OverGoal
    } else if summary.total_protein_grams < limits.protein_grams * 0.5
        && cal > limits.calories_kcal * 0.5
    {
        InsightKind::ProteinLagging
    } else if summary.total_water_liters < limits.water_liters / 2.0
        && now_local_hour > HYDRATION_CHECK_AFTER_HOUR
    {
        InsightKind::Hydration
    } else if cal > 0.0 {
        InsightKind::OnTrack
    } else {
        return None;
    };
    Some(Insight::of(kind))
}
