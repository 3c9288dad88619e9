use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::entries::model::{lenient_number, Collection};
use crate::entries::repo::{EntryRepository, RepoError};

use super::targets::{
    compute_targets, goal_targets, Goal, NutrientTargets, Sex, UserProfile, FALLBACK_TARGETS,
};

/// Settings live in a single record per user under this key.
pub const SETTINGS_KEY: &str = "profile";

/// The user's settings record as stored, read leniently.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsRecord {
    pub diet: Vec<String>,
    pub goal: Option<String>,
    pub age: Option<f64>,
    pub weight: Option<f64>,
    pub height: Option<f64>,
    pub gender: Option<String>,
    pub calculated_limits: Option<NutrientTargets>,
}

impl SettingsRecord {
    pub fn from_value(v: &Value) -> Self {
        let diet = match v.get("diet") {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|d| d.as_str().map(str::to_string))
                .collect(),
            Some(Value::String(single)) => vec![single.clone()],
            _ => Vec::new(),
        };
        Self {
            diet,
            goal: v.get("goal").and_then(Value::as_str).map(str::to_string),
            age: present_number(v, "age"),
            weight: present_number(v, "weight"),
            height: present_number(v, "height"),
            gender: v.get("gender").and_then(Value::as_str).map(str::to_string),
            calculated_limits: v.get("calculatedLimits").and_then(limits_from_value),
        }
    }

    pub fn goal(&self) -> Option<Goal> {
        self.goal.as_deref().and_then(|g| g.parse().ok())
    }

    pub fn profile(&self) -> UserProfile {
        UserProfile {
            age: self.age,
            weight_kg: self.weight,
            height_cm: self.height,
            sex: Sex::from_label(self.gender.as_deref().unwrap_or("Male")),
            diet_tags: self.diet.iter().cloned().collect::<BTreeSet<_>>(),
            goal: self.goal().unwrap_or_default(),
        }
    }

    pub fn has_measurements(&self) -> bool {
        [self.age, self.weight, self.height]
            .iter()
            .all(|v| matches!(v, Some(x) if x.is_finite() && *x > 0.0))
    }

    /// Stored limits win; then the calculator when measurements are known;
    /// then the goal table; then the plain default.
    pub fn targets(&self) -> NutrientTargets {
        if let Some(limits) = self.calculated_limits {
            return limits;
        }
        if self.has_measurements() {
            return compute_targets(&self.profile());
        }
        if self.goal.is_some() {
            return goal_targets(self.goal());
        }
        FALLBACK_TARGETS
    }
}

pub fn resolve_targets(settings: Option<&SettingsRecord>) -> NutrientTargets {
    settings.map(SettingsRecord::targets).unwrap_or(FALLBACK_TARGETS)
}

fn present_number(v: &Value, key: &str) -> Option<f64> {
    match v.get(key) {
        None | Some(Value::Null) => None,
        Some(other) => Some(lenient_number(Some(other))),
    }
}

fn limits_from_value(v: &Value) -> Option<NutrientTargets> {
    let obj = v.as_object()?;
    Some(NutrientTargets {
        calories_kcal: lenient_number(obj.get("calories")).round() as i64,
        protein_grams: lenient_number(obj.get("protein")).round() as i64,
    })
}

pub async fn load_settings(
    repo: &dyn EntryRepository,
    user_id: Uuid,
) -> Result<Option<SettingsRecord>, RepoError> {
    let records = repo.fetch_all(user_id, Collection::Settings).await?;
    Ok(records
        .iter()
        .find(|r| r.id == SETTINGS_KEY)
        .map(|r| SettingsRecord::from_value(&r.record)))
}

/// Partial profile edit. Absent fields keep their stored value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProfileUpdate {
    pub diet: Option<Vec<String>>,
    pub goal: Option<Goal>,
    pub age: Option<f64>,
    pub weight: Option<f64>,
    pub height: Option<f64>,
    pub gender: Option<Sex>,
}

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("at least one diet preference is required")]
    EmptyDiet,
    #[error("{0} must be a positive number")]
    InvalidMeasurement(&'static str),
    #[error(transparent)]
    Repo(#[from] RepoError),
}

impl ProfileUpdate {
    fn validate(&self) -> Result<(), ProfileError> {
        if matches!(&self.diet, Some(d) if d.is_empty()) {
            return Err(ProfileError::EmptyDiet);
        }
        for (name, value) in [("age", self.age), ("weight", self.weight), ("height", self.height)] {
            if matches!(value, Some(v) if !(v.is_finite() && v > 0.0)) {
                return Err(ProfileError::InvalidMeasurement(name));
            }
        }
        Ok(())
    }
}

/// Applies a profile edit and stores freshly computed limits alongside it.
///
/// Measurements are stored as numeric strings, the settings record's
/// established shape. When measurements are incomplete the stored limits are
/// cleared so readers fall back to the goal table.
pub async fn update_profile(
    repo: &dyn EntryRepository,
    user_id: Uuid,
    update: ProfileUpdate,
) -> Result<SettingsRecord, ProfileError> {
    update.validate()?;

    let mut merged = load_settings(repo, user_id).await?.unwrap_or_default();
    let mut partial = Map::new();

    if let Some(diet) = update.diet {
        partial.insert("diet".into(), json!(diet));
        merged.diet = diet;
    }
    if let Some(goal) = update.goal {
        partial.insert("goal".into(), json!(goal.label()));
        merged.goal = Some(goal.label().to_string());
    }
    for (key, value, slot) in [
        ("age", update.age, &mut merged.age),
        ("weight", update.weight, &mut merged.weight),
        ("height", update.height, &mut merged.height),
    ] {
        if let Some(v) = value {
            partial.insert(key.into(), json!(v.to_string()));
            *slot = Some(v);
        }
    }
    if let Some(sex) = update.gender {
        partial.insert("gender".into(), json!(sex.label()));
        merged.gender = Some(sex.label().to_string());
    }

    merged.calculated_limits = if merged.has_measurements() {
        Some(compute_targets(&merged.profile()))
    } else {
        debug!(%user_id, "measurements incomplete; clearing calculated limits");
        None
    };
    partial.insert("calculatedLimits".into(), json!(merged.calculated_limits));

    repo.update(user_id, Collection::Settings, SETTINGS_KEY, Value::Object(partial))
        .await?;
    info!(%user_id, limits = ?merged.calculated_limits, "profile updated");
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entries::memory::MemoryRepository;

    #[test]
    fn reads_numeric_strings_and_single_diet() {
        let s = SettingsRecord::from_value(&json!({
            "diet": "Vegan",
            "goal": "Muscle Gain",
            "age": "30",
            "weight": "80",
            "height": 180,
            "gender": "Male",
        }));
        assert_eq!(s.diet, vec!["Vegan".to_string()]);
        assert_eq!(s.goal(), Some(Goal::MuscleGain));
        assert!(s.has_measurements());
        assert_eq!(s.targets(), NutrientTargets { calories_kcal: 2436, protein_grams: 144 });
    }

    #[test]
    fn stored_limits_take_precedence() {
        let s = SettingsRecord::from_value(&json!({
            "goal": "Weight Loss",
            "calculatedLimits": { "calories": 1750, "protein": 99 },
        }));
        assert_eq!(s.targets(), NutrientTargets { calories_kcal: 1750, protein_grams: 99 });
    }

    #[test]
    fn goal_only_and_empty_fallbacks() {
        let goal_only = SettingsRecord::from_value(&json!({ "goal": "Diabetes Control" }));
        assert_eq!(goal_only.targets(), NutrientTargets { calories_kcal: 1900, protein_grams: 70 });

        let unknown_goal = SettingsRecord::from_value(&json!({ "goal": "Keto" }));
        assert_eq!(
            unknown_goal.targets(),
            NutrientTargets {
                calories_kcal: 2200,
                protein_grams: 50
            }
        );

        assert_eq!(resolve_targets(None), FALLBACK_TARGETS);
        assert_eq!(SettingsRecord::default().targets(), FALLBACK_TARGETS);
    }

    #[test]
    fn garbage_measurement_is_not_a_measurement() {
        let s =
            SettingsRecord::from_value(&json!({ "age": "abc", "weight": "70", "height": "170" }));
        assert_eq!(s.age, Some(0.0));
        assert!(!s.has_measurements());
    }

    #[tokio::test]
    async fn update_profile_persists_limits() {
        let repo = MemoryRepository::new();
        let user = Uuid::new_v4();

        let saved = update_profile(
            &repo,
            user,
            ProfileUpdate {
                diet: Some(vec!["Vegetarian".into()]),
                goal: Some(Goal::WeightLoss),
                age: Some(25.0),
                weight: Some(70.0),
                height: Some(175.0),
                gender: Some(Sex::Male),
            },
        )
        .await
        .unwrap();
        assert_eq!(
            saved.calculated_limits,
            Some(NutrientTargets { calories_kcal: 1509, protein_grams: 105 })
        );

        let stored = repo.fetch_all(user, Collection::Settings).await.unwrap();
        assert_eq!(stored[0].record["age"], "25");
        assert_eq!(stored[0].record["goal"], "Weight Loss");
        assert_eq!(stored[0].record["calculatedLimits"]["calories"], 1509);

        // Goal change alone still recomputes against stored measurements.
        let saved = update_profile(
            &repo,
            user,
            ProfileUpdate {
                goal: Some(Goal::MuscleGain),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(saved.calculated_limits.unwrap().protein_grams, 126);
        let reloaded = load_settings(&repo, user).await.unwrap().unwrap();
        assert_eq!(reloaded.targets(), saved.calculated_limits.unwrap());
    }

    #[tokio::test]
    async fn update_profile_rejects_bad_input() {
        let repo = MemoryRepository::new();
        let user = Uuid::new_v4();
        let err = update_profile(
            &repo,
            user,
            ProfileUpdate {
                weight: Some(-1.0),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ProfileError::InvalidMeasurement("weight")));

        let err = update_profile(
            &repo,
            user,
            ProfileUpdate {
                diet: Some(vec![]),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ProfileError::EmptyDiet));
        assert!(repo.fetch_all(user, Collection::Settings).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn goal_without_measurements_clears_limits() {
        let repo = MemoryRepository::new();
        let user = Uuid::new_v4();
        let saved = update_profile(
            &repo,
            user,
            ProfileUpdate {
                goal: Some(Goal::HeartHealth),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(saved.calculated_limits, None);
        assert_eq!(saved.targets(), NutrientTargets { calories_kcal: 2000, protein_grams: 60 });
    }
}
