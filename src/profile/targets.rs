use std::collections::BTreeSet;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Lowest calorie target the calculator will ever hand out.
pub const CALORIE_FLOOR: i64 = 1200;

/// Sedentary activity factor applied to BMR.
const ACTIVITY_FACTOR: f64 = 1.2;

pub const FALLBACK_TARGETS: NutrientTargets = NutrientTargets {
    calories_kcal: 2000,
    protein_grams: 50,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sex {
    #[serde(alias = "male", alias = "MALE")]
    Male,
    #[serde(alias = "female", alias = "FEMALE")]
    Female,
}

impl Sex {
    /// Anything that is not "male" is treated as female, as the profile
    /// screens always did.
    pub fn from_label(label: &str) -> Self {
        if label.trim().eq_ignore_ascii_case("male") {
            Sex::Male
        } else {
            Sex::Female
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Sex::Male => "Male",
            Sex::Female => "Female",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Goal {
    #[default]
    #[serde(alias = "General Health")]
    GeneralHealth,
    #[serde(alias = "Weight Loss")]
    WeightLoss,
    #[serde(alias = "Muscle Gain")]
    MuscleGain,
    #[serde(alias = "Heart Health")]
    HeartHealth,
    #[serde(alias = "Diabetes Control")]
    DiabetesControl,
}

impl Goal {
    /// Human label as stored in the settings record.
    pub fn label(&self) -> &'static str {
        match self {
            Goal::GeneralHealth => "General Health",
            Goal::WeightLoss => "Weight Loss",
            Goal::MuscleGain => "Muscle Gain",
            Goal::HeartHealth => "Heart Health",
            Goal::DiabetesControl => "Diabetes Control",
        }
    }
}

impl FromStr for Goal {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key: String = s
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_lowercase())
            .collect();
        match key.as_str() {
            "generalhealth" => Ok(Goal::GeneralHealth),
            "weightloss" => Ok(Goal::WeightLoss),
            "musclegain" => Ok(Goal::MuscleGain),
            "hearthealth" => Ok(Goal::HeartHealth),
            "diabetescontrol" => Ok(Goal::DiabetesControl),
            _ => Err(format!("unknown goal: {s}")),
        }
    }
}

/// Snapshot of what the calculator needs from a user's settings.
#[derive(Debug, Clone, PartialEq)]
pub struct UserProfile {
    pub age: Option<f64>,
    pub weight_kg: Option<f64>,
    pub height_cm: Option<f64>,
    pub sex: Sex,
    pub diet_tags: BTreeSet<String>,
    pub goal: Goal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NutrientTargets {
    #[serde(rename = "calories")]
    pub calories_kcal: i64,
    #[serde(rename = "protein")]
    pub protein_grams: i64,
}

/// Mifflin-St Jeor BMR at a sedentary activity factor, shifted by goal and
/// floored at [`CALORIE_FLOOR`].
///
/// A profile missing age, weight or height (or carrying a non-positive
/// value) gets [`FALLBACK_TARGETS`] instead of an error.
pub fn compute_targets(profile: &UserProfile) -> NutrientTargets {
    let (age, weight, height) = match (
        positive(profile.age),
        positive(profile.weight_kg),
        positive(profile.height_cm),
    ) {
        (Some(a), Some(w), Some(h)) => (a, w, h),
        _ => {
            debug!(goal = ?profile.goal, "incomplete profile; using fallback targets");
            return FALLBACK_TARGETS;
        }
    };

    let sex_offset = match profile.sex {
        Sex::Male => 5.0,
        Sex::Female => -161.0,
    };
    let bmr = 10.0 * weight + 6.25 * height - 5.0 * age + sex_offset;
    let tdee = bmr * ACTIVITY_FACTOR;

    let mut calories = tdee.round() as i64;
    let mut protein = (weight * 0.8).round() as i64;

    match profile.goal {
        Goal::WeightLoss => {
            calories -= 500;
            protein = (weight * 1.5).round() as i64;
        }
        Goal::MuscleGain => {
            calories += 300;
            protein = (weight * 1.8).round() as i64;
        }
        Goal::HeartHealth | Goal::DiabetesControl => {
            protein = (weight * 1.0).round() as i64;
        }
        Goal::GeneralHealth => {}
    }

    NutrientTargets {
        calories_kcal: calories.max(CALORIE_FLOOR),
        protein_grams: protein,
    }
}

/// Rough targets by goal alone, for users who picked a goal but never
/// entered their measurements.
pub fn goal_targets(goal: Option<Goal>) -> NutrientTargets {
    let (calories_kcal, protein_grams) = match goal {
        Some(Goal::MuscleGain) => (2800, 120),
        Some(Goal::WeightLoss) => (1800, 90),
        Some(Goal::HeartHealth) => (2000, 60),
        Some(Goal::DiabetesControl) => (1900, 70),
        Some(Goal::GeneralHealth) | None => (2200, 50),
    };
    NutrientTargets {
        calories_kcal,
        protein_grams,
    }
}

fn positive(v: Option<f64>) -> Option<f64> {
    v.filter(|x| x.is_finite() && *x > 0.0)
}
