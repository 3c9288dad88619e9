use std::sync::Arc;

use futures_util::Stream;
use serde::Serialize;
use time::{Date, OffsetDateTime, UtcOffset};
use uuid::Uuid;

use crate::entries::model::{Collection, FoodEntry, StoredRecord, WaterEntry};
use crate::entries::repo::{EntryRepository, RepoError};
use crate::entries::subscription::Subscription;
use crate::profile::settings::{load_settings, resolve_targets, SettingsRecord, SETTINGS_KEY};
use crate::profile::targets::NutrientTargets;

use super::aggregate::{aggregate_day, group_calories, round_tenth, DailySummary, MealGroup};
use super::consolidate::{consolidate, ConsolidatedItem};
use super::insight::{derive_insight, DailyLimits, Insight};

time::serde::format_description!(iso_date, Date, "[year]-[month]-[day]");

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MealGroupView {
    pub group: MealGroup,
    pub entry_count: usize,
    pub calories_kcal: f64,
    pub items: Vec<ConsolidatedItem>,
}

/// Everything the diary shows for one day.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DayView {
    #[serde(with = "iso_date")]
    pub date: Date,
    pub targets: NutrientTargets,
    pub limits: DailyLimits,
    pub summary: DailySummary,
    pub groups: Vec<MealGroupView>,
    pub insight: Option<Insight>,
}

/// The "today" dashboard: the day view plus newest-first entries and the
/// average sugar per entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TodayView {
    #[serde(flatten)]
    pub day: DayView,
    pub entries: Vec<FoodEntry>,
    pub avg_sugar_grams: f64,
}

/// Pure pipeline over one consistent snapshot: aggregate, consolidate each
/// meal group, derive the insight.
pub fn build_day_view(
    food: &[StoredRecord],
    water: &[StoredRecord],
    settings: Option<&SettingsRecord>,
    date: Date,
    offset: UtcOffset,
    now_local_hour: u8,
) -> (DayView, Vec<FoodEntry>) {
    let food: Vec<FoodEntry> = food.iter().map(FoodEntry::from_record).collect();
    let water: Vec<WaterEntry> = water.iter().map(WaterEntry::from_record).collect();

    let day = aggregate_day(&food, &water, date, offset);
    let targets = resolve_targets(settings);
    let limits = DailyLimits::from(targets);

    let groups = day
        .groups()
        .map(|(group, entries)| MealGroupView {
            group,
            entry_count: entries.len(),
            calories_kcal: group_calories(entries),
            items: consolidate(entries),
        })
        .collect();

    let newest_first = day.entries_newest_first().into_iter().cloned().collect();
    let view = DayView {
        date,
        targets,
        limits,
        summary: day.summary,
        groups,
        insight: derive_insight(&day.summary, &limits, now_local_hour),
    };
    (view, newest_first)
}

pub fn average_sugar(entries: &[FoodEntry]) -> f64 {
    if entries.is_empty() {
        return 0.0;
    }
    let total: f64 = entries.iter().map(|e| e.sugar_grams).sum();
    round_tenth(total / entries.len() as f64)
}

/// Fetches one snapshot of the user's logs and settings and builds the day.
pub async fn load_day(
    repo: &dyn EntryRepository,
    user_id: Uuid,
    date: Date,
    offset: UtcOffset,
    now: OffsetDateTime,
) -> Result<(DayView, Vec<FoodEntry>), RepoError> {
    let settings = load_settings(repo, user_id).await?;
    let food = repo.fetch_all(user_id, Collection::FoodLogs).await?;
    let water = repo.fetch_all(user_id, Collection::WaterLogs).await?;
    Ok(build_day_view(
        &food,
        &water,
        settings.as_ref(),
        date,
        offset,
        now.to_offset(offset).hour(),
    ))
}

pub async fn load_today(
    repo: &dyn EntryRepository,
    user_id: Uuid,
    offset: UtcOffset,
    now: OffsetDateTime,
) -> Result<TodayView, RepoError> {
    let date = now.to_offset(offset).date();
    let (day, entries) = load_day(repo, user_id, date, offset, now).await?;
    Ok(TodayView {
        avg_sugar_grams: average_sugar(&entries),
        day,
        entries,
    })
}

/// Re-runs the day pipeline on every change to the user's food, water or
/// settings. The first item arrives once all three have been read.
pub fn watch_day(
    repo: Arc<dyn EntryRepository>,
    user_id: Uuid,
    date: Date,
    offset: UtcOffset,
) -> impl Stream<Item = Result<DayView, RepoError>> {
    let mut food_sub = Subscription::new(repo.clone(), user_id, Collection::FoodLogs);
    let mut water_sub = Subscription::new(repo.clone(), user_id, Collection::WaterLogs);
    let mut settings_sub = Subscription::new(repo, user_id, Collection::Settings);

    async_stream::stream! {
        let mut food: Option<Vec<StoredRecord>> = None;
        let mut water: Option<Vec<StoredRecord>> = None;
        let mut settings: Option<Vec<StoredRecord>> = None;

        loop {
            let (slot, next) = tokio::select! {
                n = food_sub.next() => (&mut food, n),
                n = water_sub.next() => (&mut water, n),
                n = settings_sub.next() => (&mut settings, n),
            };
            match next {
                None => break,
                Some(Err(e)) => {
                    yield Err(e);
                    continue;
                }
                Some(Ok(records)) => *slot = Some(records),
            }

            let (Some(f), Some(w), Some(s)) = (&food, &water, &settings) else {
                continue;
            };
            let record = s
                .iter()
                .find(|r| r.id == SETTINGS_KEY)
                .map(|r| SettingsRecord::from_value(&r.record));
            let hour = OffsetDateTime::now_utc().to_offset(offset).hour();
            let (view, _) = build_day_view(f, w, record.as_ref(), date, offset, hour);
            yield Ok(view);
        }
    }
}

/// Every food entry the user has logged, newest first.
pub async fn load_history(
    repo: &dyn EntryRepository,
    user_id: Uuid,
) -> Result<Vec<FoodEntry>, RepoError> {
    let mut entries: Vec<FoodEntry> = repo
        .fetch_all(user_id, Collection::FoodLogs)
        .await?
        .iter()
        .map(FoodEntry::from_record)
        .collect();
    entries.sort_by(|a, b| b.timestamp_ms.cmp(&a.timestamp_ms));
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diary::insight::InsightKind;
    use crate::entries::memory::MemoryRepository;
    use serde_json::json;
    use time::macros::{date, datetime};

    // 2024-03-10T00:00:00Z
    const DAY: i64 = 1_710_028_800_000;
    const HOUR: i64 = 3_600_000;

    fn food(id: &str, ts: i64, name: &str, cal: serde_json::Value) -> StoredRecord {
        StoredRecord::new(
            id,
            json!({
                "productName": name,
                "calories": cal,
                "protein": 4,
                "sugar": 3,
                "timestamp": ts,
            }),
        )
    }

    #[test]
    fn day_view_groups_consolidates_and_totals() {
        let food = vec![
            food("1", DAY + 8 * HOUR, "Bar", json!(100)),
            food("2", DAY + 9 * HOUR, "Bar", json!("103")),
            food("3", DAY + 10 * HOUR, "Bar", json!(200)),
            food("4", DAY + 13 * HOUR, "Thali", json!(650)),
            food("5", DAY + 13 * HOUR, "Broken", json!("n/a")),
        ];
        let water = vec![StoredRecord::new(
            "w",
            json!({ "amount": "0.5", "timestamp": DAY + 9 * HOUR }),
        )];

        let (view, newest) =
            build_day_view(&food, &water, None, date!(2024 - 03 - 10), UtcOffset::UTC, 12);

        assert_eq!(view.summary.entry_count, 5);
        assert_eq!(view.summary.total_calories_kcal, 1053.0);
        assert_eq!(view.summary.total_water_liters, 0.5);
        assert_eq!(view.targets.calories_kcal, 2000);

        assert_eq!(view.groups.len(), 2);
        let breakfast = &view.groups[0];
        assert_eq!(breakfast.group, MealGroup::Breakfast);
        assert_eq!(breakfast.entry_count, 3);
        assert_eq!(breakfast.calories_kcal, 403.0);
        assert_eq!(breakfast.items.len(), 2);
        assert_eq!(breakfast.items[0].count, 2);
        assert_eq!(breakfast.items[0].total_calories_kcal, 203.0);

        let lunch = &view.groups[1];
        assert_eq!(lunch.group, MealGroup::Lunch);
        assert_eq!(lunch.items.len(), 2);

        // 20 g protein against a 50 g target with 1053 > 1000 kcal eaten.
        assert_eq!(view.insight.unwrap().kind, InsightKind::ProteinLagging);

        assert_eq!(newest[0].timestamp_ms, DAY + 13 * HOUR);
        assert_eq!(newest.last().unwrap().id, "1");
        assert_eq!(average_sugar(&newest), 3.0);
    }

    #[test]
    fn settings_limits_drive_insight() {
        let food = vec![food("1", DAY + 12 * HOUR, "Biryani", json!(2300))];
        let settings = SettingsRecord::from_value(&json!({
            "calculatedLimits": { "calories": 2000, "protein": 20 }
        }));
        let (view, _) = build_day_view(
            &food,
            &[],
            Some(&settings),
            date!(2024 - 03 - 10),
            UtcOffset::UTC,
            12,
        );
        assert_eq!(view.insight.unwrap().kind, InsightKind::OverGoal);
    }

    #[test]
    fn empty_day_has_no_insight() {
        let (view, newest) =
            build_day_view(&[], &[], None, date!(2024 - 03 - 10), UtcOffset::UTC, 20);
        assert!(view.insight.is_none());
        assert!(view.groups.is_empty());
        assert!(newest.is_empty());
        assert_eq!(average_sugar(&newest), 0.0);
    }

    #[tokio::test]
    async fn load_day_reads_one_snapshot_per_collection() {
        let repo = MemoryRepository::new();
        let user = Uuid::new_v4();
        let idli = json!({
            "productName": "Idli",
            "calories": 120,
            "protein": 4,
            "timestamp": DAY + 7 * HOUR,
        });
        repo.append(user, Collection::FoodLogs, idli).await.unwrap();
        let water = json!({ "amount": 2.0, "timestamp": DAY + 7 * HOUR });
        repo.append(user, Collection::WaterLogs, water).await.unwrap();
        repo.update(user, Collection::Settings, "profile", json!({ "goal": "Weight Loss" }))
            .await
            .unwrap();

        let now = datetime!(2024-03-10 18:00 UTC);
        let today = load_today(&repo, user, UtcOffset::UTC, now).await.unwrap();
        assert_eq!(today.day.date, date!(2024 - 03 - 10));
        assert_eq!(today.day.targets.calories_kcal, 1800);
        assert_eq!(today.entries.len(), 1);
        assert_eq!(today.day.insight.unwrap().kind, InsightKind::OnTrack);

        let history = load_history(&repo, user).await.unwrap();
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn watch_day_emits_on_every_change() {
        use futures_util::StreamExt;

        let repo = Arc::new(MemoryRepository::new());
        let user = Uuid::new_v4();
        let stream = watch_day(repo.clone(), user, date!(2024 - 03 - 10), UtcOffset::UTC);
        futures_util::pin_mut!(stream);

        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.summary.entry_count, 0);

        let dosa = json!({ "productName": "Dosa", "calories": 170, "timestamp": DAY + 8 * HOUR });
        repo.append(user, Collection::FoodLogs, dosa).await.unwrap();
        let second = stream.next().await.unwrap().unwrap();
        assert_eq!(second.summary.total_calories_kcal, 170.0);
        assert_eq!(second.groups[0].group, MealGroup::Breakfast);

        let limits = json!({ "calculatedLimits": { "calories": 1500, "protein": 80 } });
        repo.update(user, Collection::Settings, "profile", limits)
            .await
            .unwrap();
        let third = stream.next().await.unwrap().unwrap();
        assert_eq!(third.targets.calories_kcal, 1500);
    }

    #[tokio::test]
    async fn watch_day_recovers_after_outage() {
        use futures_util::StreamExt;
        use std::time::Duration;

        let repo = Arc::new(MemoryRepository::new());
        let user = Uuid::new_v4();
        repo.set_offline(true);
        let stream = watch_day(repo.clone(), user, date!(2024 - 03 - 10), UtcOffset::UTC);
        futures_util::pin_mut!(stream);

        let err = stream.next().await.unwrap().unwrap_err();
        assert!(matches!(err, RepoError::Unavailable(_)));

        // Only water changes after recovery; food and settings are read again too.
        repo.set_offline(false);
        let water = json!({ "amount": 0.5, "timestamp": DAY + 9 * HOUR });
        repo.append(user, Collection::WaterLogs, water).await.unwrap();

        let view = tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                match stream.next().await {
                    Some(Ok(view)) => return view,
                    Some(Err(_)) => continue,
                    None => panic!("day stream ended"),
                }
            }
        })
        .await
        .expect("day view after recovery");
        assert_eq!(view.summary.total_water_liters, 0.5);
        assert_eq!(view.summary.entry_count, 0);
    }

    #[tokio::test]
    async fn repository_failure_propagates() {
        let repo = MemoryRepository::new();
        repo.set_offline(true);
        let err = load_day(
            &repo,
            Uuid::new_v4(),
            date!(2024 - 03 - 10),
            UtcOffset::UTC,
            datetime!(2024-03-10 12:00 UTC),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, RepoError::Unavailable(_)));
    }
}
