use bytes::Bytes;
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::entries::repo::{EntryRepository, RepoError};
use crate::profile::settings::load_settings;
use crate::storage::{ImageKind, ImageStore, ScanImageKey};

use super::pipeline::{AnalysisError, AnalysisPipeline, ProfileHint};

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("image is empty")]
    EmptyImage,
    #[error("unsupported image type {0:?}")]
    UnsupportedImage(String),
    #[error(transparent)]
    Analysis(#[from] AnalysisError),
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error("image storage failed: {0}")]
    Storage(anyhow::Error),
}

pub struct ScanUpload {
    pub body: Bytes,
    pub content_type: String,
}

/// Stores the label photo (when a bucket is configured), runs it through the
/// analyzer with the user's diet and goal, and returns the analysis record
/// with `imageUri` pointing at the stored object. Nothing is logged to the
/// diary; the client saves the record once the user confirms it.
pub async fn scan_label(
    repo: &dyn EntryRepository,
    storage: Option<&dyn ImageStore>,
    analyzer: &dyn AnalysisPipeline,
    user_id: Uuid,
    upload: ScanUpload,
) -> Result<Value, ScanError> {
    if upload.body.is_empty() {
        return Err(ScanError::EmptyImage);
    }
    let kind = ImageKind::from_content_type(&upload.content_type)
        .ok_or_else(|| ScanError::UnsupportedImage(upload.content_type.clone()))?;

    let hint = match load_settings(repo, user_id).await? {
        Some(s) => ProfileHint {
            veg_type: if s.diet.is_empty() {
                ProfileHint::default().veg_type
            } else {
                s.diet.join(", ")
            },
            goal: s.goal.unwrap_or_else(|| ProfileHint::default().goal),
        },
        None => ProfileHint::default(),
    };

    let key = match storage {
        Some(st) => {
            let key = ScanImageKey::new(user_id, kind);
            st.put_image(&key, upload.body.clone())
                .await
                .map_err(ScanError::Storage)?;
            Some(key)
        }
        None => None,
    };

    let mut record = match analyzer.analyze(upload.body, kind.mime(), &hint).await {
        Ok(r) => r,
        Err(e) => {
            if let (Some(st), Some(k)) = (storage, key.as_ref()) {
                if let Err(del) = st.remove_image(k).await {
                    warn!(error = %del, key = %k, "failed to remove image of failed scan");
                }
            }
            return Err(e.into());
        }
    };

    if let Value::Object(map) = &mut record {
        let uri = key.as_ref().map(ToString::to_string).unwrap_or_default();
        map.insert("imageUri".into(), Value::String(uri));
    }
    info!(%user_id, stored = key.is_some(), "label scanned");
    Ok(record)
}


#[cfg(test)]
mod tests {
    use super::fakes::{RecordingStorage, StubAnalyzer};
    use super::*;
    use crate::entries::memory::MemoryRepository;
    use crate::entries::model::Collection;
    use serde_json::json;

    fn upload() -> ScanUpload {
        ScanUpload {
            body: Bytes::from_static(b"\xff\xd8\xff"),
            content_type: "image/jpeg".into(),
        }
    }

    #[tokio::test]
    async fn stores_image_and_tags_record() {
        let repo = MemoryRepository::new();
        let storage = RecordingStorage::default();
        let analyzer = StubAnalyzer::ok();
        let user = Uuid::new_v4();
        repo.update(
            user,
            Collection::Settings,
            "profile",
            json!({ "diet": ["Vegan", "Eggetarian"], "goal": "Heart Health" }),
        )
        .await
        .unwrap();

        let record = scan_label(&repo, Some(&storage), &analyzer, user, upload())
            .await
            .unwrap();

        let key = record["imageUri"].as_str().unwrap().to_string();
        assert!(key.starts_with(&format!("scans/{user}/")));
        assert!(key.ends_with(".jpg"));
        assert_eq!(*storage.puts.lock().unwrap(), vec![key]);
        assert_eq!(record["productName"], "Masala Oats");

        let hint = analyzer.seen.lock().unwrap().clone().unwrap();
        assert_eq!(hint.veg_type, "Vegan, Eggetarian");
        assert_eq!(hint.goal, "Heart Health");

        // Scanning does not log anything by itself.
        assert!(repo.fetch_all(user, Collection::FoodLogs).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn defaults_hint_and_skips_storage_when_unconfigured() {
        let repo = MemoryRepository::new();
        let analyzer = StubAnalyzer::ok();
        let record = scan_label(&repo, None, &analyzer, Uuid::new_v4(), upload())
            .await
            .unwrap();
        assert_eq!(record["imageUri"], "");
        assert_eq!(analyzer.seen.lock().unwrap().clone().unwrap(), ProfileHint::default());
    }

    #[tokio::test]
    async fn failed_analysis_removes_stored_image() {
        let repo = MemoryRepository::new();
        let storage = RecordingStorage::default();
        let err = scan_label(
            &repo,
            Some(&storage),
            &StubAnalyzer::rate_limited(),
            Uuid::new_v4(),
            upload(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ScanError::Analysis(AnalysisError::RateLimited)));
        assert_eq!(*storage.puts.lock().unwrap(), *storage.deletes.lock().unwrap());
    }

    #[tokio::test]
    async fn empty_upload_is_rejected() {
        let repo = MemoryRepository::new();
        let err = scan_label(
            &repo,
            None,
            &StubAnalyzer::ok(),
            Uuid::new_v4(),
            ScanUpload {
                body: Bytes::new(),
                content_type: "image/png".into(),
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ScanError::EmptyImage));
    }

    #[tokio::test]
    async fn non_photo_upload_is_rejected_before_storage() {
        let repo = MemoryRepository::new();
        let storage = RecordingStorage::default();
        let analyzer = StubAnalyzer::ok();
        let err = scan_label(
            &repo,
            Some(&storage),
            &analyzer,
            Uuid::new_v4(),
            ScanUpload {
                body: Bytes::from_static(b"%PDF-1.7"),
                content_type: "application/pdf".into(),
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ScanError::UnsupportedImage(ct) if ct == "application/pdf"));
        assert!(storage.puts.lock().unwrap().is_empty());
        assert!(analyzer.content_types.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn analyzer_sees_normalized_content_type() {
        let repo = MemoryRepository::new();
        let storage = RecordingStorage::default();
        let analyzer = StubAnalyzer::ok();
        let upload = ScanUpload {
            body: Bytes::from_static(b"\xff\xd8\xff"),
            content_type: "Image/JPG; name=label".into(),
        };
        let record = scan_label(&repo, Some(&storage), &analyzer, Uuid::new_v4(), upload)
            .await
            .unwrap();
        assert!(record["imageUri"].as_str().unwrap().ends_with(".jpg"));
        assert_eq!(*analyzer.content_types.lock().unwrap(), vec!["image/jpeg"]);
    }
}
