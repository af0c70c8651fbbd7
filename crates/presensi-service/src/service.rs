//! Enrollment, recognition and attendance orchestration.
//!
//! Composes the vision engine with the store. All pipeline failures are
//! recovered here into structured [`ServiceError`] values before anything
//! reaches a persistence commit path; a batch that partially fails rolls
//! back inside the store's transactions.

use crate::engine::Vision;
use crate::error::{Result, ServiceError};
use chrono::{NaiveDate, NaiveTime};
use image::RgbImage;
use presensi_core::{CosineMatcher, Matcher};
use presensi_store::{AttendanceEvent, AttendanceStatus, Member, SqliteStore, StoreError};
use serde::Serialize;
use std::path::PathBuf;

/// Decode raw image bytes into the color raster the pipeline expects.
pub fn decode_image(bytes: &[u8]) -> Result<RgbImage> {
    let img = image::load_from_memory(bytes).map_err(|_| ServiceError::DecodeFailure)?;
    Ok(img.to_rgb8())
}

/// Orchestrator tuning, derived from [`crate::Config`] in production.
pub struct ServiceOptions {
    pub similarity_threshold: f32,
    /// Photo storage root; `None` disables photo persistence.
    pub photo_dir: Option<PathBuf>,
    pub max_update_images: usize,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            similarity_threshold: crate::config::DEFAULT_SIMILARITY_THRESHOLD,
            photo_dir: None,
            max_update_images: crate::config::DEFAULT_MAX_UPDATE_IMAGES,
        }
    }
}

/// Enrollment input: one required image plus optional extra samples.
pub struct EnrollRequest {
    pub key: String,
    pub name: String,
    pub division: Option<String>,
    pub image: RgbImage,
    pub additional_images: Vec<RgbImage>,
}

#[derive(Debug, Serialize)]
pub struct EnrollReport {
    pub member: Member,
    pub stored_vectors: usize,
    pub failed_images: usize,
}

#[derive(Debug, Serialize)]
pub struct Recognition {
    pub member: Member,
    pub similarity: f32,
}

#[derive(Debug, Serialize)]
pub struct CheckInReceipt {
    pub member: Member,
    pub event: AttendanceEvent,
    pub similarity: f32,
}

#[derive(Debug, Serialize)]
pub struct CheckOutReceipt {
    pub member: Member,
    pub event: AttendanceEvent,
    pub similarity: f32,
    /// e.g. "8 jam 0 menit"
    pub duration: String,
}

/// The attendance service.
pub struct Service<V> {
    vision: V,
    store: SqliteStore,
    options: ServiceOptions,
}

impl<V: Vision> Service<V> {
    pub fn new(vision: V, store: SqliteStore, options: ServiceOptions) -> Self {
        Self {
            vision,
            store,
            options,
        }
    }

    /// Full pipeline pass: localize, then embed.
    async fn extract(&self, image: &RgbImage) -> Result<presensi_core::Embedding> {
        let crop = self.vision.locate(image.clone()).await?;
        let embedding = self.vision.embed(crop).await?;
        Ok(embedding)
    }

    /// Enroll a new identity from one required and any number of additional
    /// images. The primary image must embed; additional images are processed
    /// independently and failures only counted. Member and vectors are
    /// persisted in one transaction.
    pub async fn enroll(&self, req: EnrollRequest) -> Result<EnrollReport> {
        let key = req.key.trim().to_string();
        let name = req.name.trim().to_string();
        if key.is_empty() {
            return Err(ServiceError::MissingField("identity key"));
        }
        if name.is_empty() {
            return Err(ServiceError::MissingField("name"));
        }

        // Early duplicate check to avoid wasted inference; the enrollment
        // transaction re-checks under the lock.
        if self.store.get_member(&key).await.is_ok() {
            return Err(ServiceError::DuplicateIdentity(key));
        }

        let primary = self.extract(&req.image).await?;
        let mut vectors = vec![primary.values];
        let mut failed = 0usize;

        for (idx, img) in req.additional_images.iter().enumerate() {
            match self.extract(img).await {
                Ok(embedding) => vectors.push(embedding.values),
                Err(err) => {
                    failed += 1;
                    tracing::warn!(identity_key = %key, idx, %err, "additional image skipped");
                }
            }
        }

        let mut member = Member::new(key.clone(), name, req.division);
        member.photo_path = self.save_photo(
            &req.image,
            &format!("{key}/{}.jpg", chrono::Local::now().format("%Y%m%d%H%M%S")),
        )?;

        let stored = self.store.insert_enrollment(member.clone(), vectors).await?;
        tracing::info!(identity_key = %key, stored, failed, "identity enrolled");

        Ok(EnrollReport {
            member,
            stored_vectors: stored,
            failed_images: failed,
        })
    }

    /// Replace an identity's stored vectors from a new image batch.
    ///
    /// Images failing to embed are counted; when none succeed, nothing is
    /// deleted and the identity keeps its previous vectors.
    pub async fn update_faces(&self, key: &str, images: Vec<RgbImage>) -> Result<EnrollReport> {
        let member = self.store.get_member(key).await?;

        if images.is_empty() {
            return Err(ServiceError::MissingField("images"));
        }
        if images.len() > self.options.max_update_images {
            return Err(ServiceError::TooManyImages {
                got: images.len(),
                limit: self.options.max_update_images,
            });
        }

        let mut vectors = Vec::new();
        let mut failed = 0usize;
        for (idx, img) in images.iter().enumerate() {
            match self.extract(img).await {
                Ok(embedding) => vectors.push(embedding.values),
                Err(err) => {
                    failed += 1;
                    tracing::warn!(identity_key = %key, idx, %err, "update image skipped");
                }
            }
        }

        if vectors.is_empty() {
            // Prior vectors stay intact; the delete never ran.
            return Err(ServiceError::NoFaceDetected);
        }

        let photo_path = self.save_photo(
            &images[0],
            &format!("{key}/updated_{}.jpg", chrono::Local::now().format("%Y%m%d%H%M%S")),
        )?;

        let stored = self
            .store
            .replace_vectors(&member.key, vectors, photo_path)
            .await?;
        tracing::info!(identity_key = %key, stored, failed, "face vectors replaced");

        let member = self.store.get_member(key).await?;
        Ok(EnrollReport {
            member,
            stored_vectors: stored,
            failed_images: failed,
        })
    }

    /// Identify the person in an image against the enrolled roster.
    ///
    /// On rejection the error carries the best similarity observed, so the
    /// caller can distinguish "wrong person" from "no face visible".
    pub async fn recognize(&self, image: &RgbImage, threshold: Option<f32>) -> Result<Recognition> {
        let embedding = self.extract(image).await?;
        let roster = self.store.load_roster().await?;

        let threshold = threshold.unwrap_or(self.options.similarity_threshold);
        let outcome = CosineMatcher.resolve(&embedding, &roster, threshold);

        match outcome.identity_key {
            Some(key) => {
                let member = self.store.get_member(&key).await?;
                tracing::info!(
                    identity_key = %member.key,
                    similarity = outcome.similarity,
                    "face recognized"
                );
                Ok(Recognition {
                    member,
                    similarity: outcome.similarity,
                })
            }
            None => Err(ServiceError::FaceNotRecognized {
                best_similarity: outcome.similarity,
            }),
        }
    }

    /// Recognize and record today's check-in.
    pub async fn check_in(&self, image: &RgbImage) -> Result<CheckInReceipt> {
        let now = chrono::Local::now().naive_local();
        self.check_in_at(image, now.date(), now.time()).await
    }

    pub(crate) async fn check_in_at(
        &self,
        image: &RgbImage,
        date: NaiveDate,
        time: NaiveTime,
    ) -> Result<CheckInReceipt> {
        let recognition = self.recognize(image, None).await?;
        let member = recognition.member;

        let photo_path =
            self.save_photo(image, &format!("attendance/{}_{date}.jpg", member.key))?;

        match self.store.check_in(&member.key, date, time, photo_path).await {
            Ok(event) => Ok(CheckInReceipt {
                member,
                event,
                similarity: recognition.similarity,
            }),
            Err(StoreError::AlreadyCheckedIn(event)) => Err(ServiceError::AlreadyCheckedIn {
                name: member.name,
                event,
            }),
            Err(err) => Err(err.into()),
        }
    }

    /// Recognize and record today's check-out with an activity note.
    pub async fn check_out(&self, image: &RgbImage, activity: &str) -> Result<CheckOutReceipt> {
        let now = chrono::Local::now().naive_local();
        self.check_out_at(image, activity, now.date(), now.time()).await
    }

    pub(crate) async fn check_out_at(
        &self,
        image: &RgbImage,
        activity: &str,
        date: NaiveDate,
        time: NaiveTime,
    ) -> Result<CheckOutReceipt> {
        let activity = activity.trim();
        if activity.is_empty() {
            return Err(ServiceError::MissingField("activity"));
        }

        let recognition = self.recognize(image, None).await?;
        let member = recognition.member;

        match self.store.check_out(&member.key, date, time, activity).await {
            Ok(event) => {
                let duration = event.duration_text().unwrap_or_default();
                Ok(CheckOutReceipt {
                    member,
                    event,
                    similarity: recognition.similarity,
                    duration,
                })
            }
            Err(StoreError::NotYetCheckedIn { .. }) => Err(ServiceError::NotYetCheckedIn {
                name: member.name,
            }),
            Err(StoreError::AlreadyCheckedOut(event)) => Err(ServiceError::AlreadyCheckedOut {
                name: member.name,
                event,
            }),
            Err(err) => Err(err.into()),
        }
    }

    /// List enrolled members, optionally filtered by division.
    pub async fn members(&self, division: Option<String>) -> Result<Vec<Member>> {
        Ok(self.store.list_members(division).await?)
    }

    /// List attendance events for a date.
    pub async fn attendance(
        &self,
        date: NaiveDate,
        member_key: Option<String>,
        status: Option<AttendanceStatus>,
    ) -> Result<Vec<AttendanceEvent>> {
        Ok(self.store.list_attendance(date, member_key, status).await?)
    }

    /// Delete a member; vectors and attendance cascade.
    pub async fn remove_member(&self, key: &str) -> Result<()> {
        self.store.delete_member(key).await?;
        tracing::info!(identity_key = %key, "identity removed");
        Ok(())
    }

    fn save_photo(&self, image: &RgbImage, relative: &str) -> Result<Option<String>> {
        let Some(dir) = &self.options.photo_dir else {
            return Ok(None);
        };
        let full = dir.join(relative);
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ServiceError::PhotoStore(e.to_string()))?;
        }
        image
            .save(&full)
            .map_err(|e| ServiceError::PhotoStore(e.to_string()))?;
        Ok(Some(relative.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::VisionError;
    use image::GrayImage;
    use presensi_core::{Embedding, EMBEDDING_DIM};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Canned pipeline: `locate` always succeeds, `embed` pops scripted
    /// outputs in order.
    struct StubVision {
        outputs: Mutex<VecDeque<std::result::Result<Embedding, VisionError>>>,
    }

    impl StubVision {
        fn new(outputs: Vec<std::result::Result<Embedding, VisionError>>) -> Self {
            Self {
                outputs: Mutex::new(outputs.into()),
            }
        }
    }

    impl Vision for StubVision {
        async fn locate(&self, _image: RgbImage) -> std::result::Result<GrayImage, VisionError> {
            Ok(GrayImage::new(4, 4))
        }

        async fn embed(&self, _crop: GrayImage) -> std::result::Result<Embedding, VisionError> {
            self.outputs
                .lock()
                .unwrap()
                .pop_front()
                .expect("stub vision exhausted")
        }
    }

    fn unit(axis: usize) -> Embedding {
        let mut values = vec![0.0f32; EMBEDDING_DIM];
        values[axis] = 1.0;
        Embedding::new(values)
    }

    fn img() -> RgbImage {
        RgbImage::new(8, 8)
    }

    async fn service_with(
        outputs: Vec<std::result::Result<Embedding, VisionError>>,
    ) -> Service<StubVision> {
        let store = SqliteStore::open_in_memory().await.unwrap();
        Service::new(StubVision::new(outputs), store, ServiceOptions::default())
    }

    fn enroll_req(key: &str, extra: usize) -> EnrollRequest {
        EnrollRequest {
            key: key.into(),
            name: format!("Member {key}"),
            division: Some("Lab".into()),
            image: img(),
            additional_images: (0..extra).map(|_| img()).collect(),
        }
    }

    #[tokio::test]
    async fn test_enroll_counts_partial_failures() {
        let service = service_with(vec![
            Ok(unit(0)),
            Ok(unit(1)),
            Err(VisionError::NoFace),
            Ok(unit(2)),
        ])
        .await;

        let report = service.enroll(enroll_req("A01", 3)).await.unwrap();
        assert_eq!(report.stored_vectors, 3);
        assert_eq!(report.failed_images, 1);
        assert_eq!(report.member.key, "A01");
    }

    #[tokio::test]
    async fn test_enroll_rejects_duplicate_key() {
        let service = service_with(vec![Ok(unit(0)), Ok(unit(1))]).await;
        service.enroll(enroll_req("A01", 0)).await.unwrap();

        let err = service.enroll(enroll_req("A01", 0)).await.unwrap_err();
        assert!(matches!(err, ServiceError::DuplicateIdentity(key) if key == "A01"));
    }

    #[tokio::test]
    async fn test_enroll_requires_primary_face() {
        let service = service_with(vec![Err(VisionError::NoFace)]).await;
        let err = service.enroll(enroll_req("A01", 0)).await.unwrap_err();
        assert!(matches!(err, ServiceError::NoFaceDetected));
        // Nothing persisted.
        assert!(service.members(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_recognize_known_face() {
        let service = service_with(vec![Ok(unit(0)), Ok(unit(0))]).await;
        service.enroll(enroll_req("A01", 0)).await.unwrap();

        let rec = service.recognize(&img(), None).await.unwrap();
        assert_eq!(rec.member.key, "A01");
        assert!((rec.similarity - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_recognize_rejection_carries_best_score() {
        let service = service_with(vec![Ok(unit(0)), Ok(unit(1))]).await;
        service.enroll(enroll_req("A01", 0)).await.unwrap();

        // Probe is orthogonal to the enrolled vector.
        let err = service.recognize(&img(), None).await.unwrap_err();
        match err {
            ServiceError::FaceNotRecognized { best_similarity } => {
                assert!(best_similarity.abs() < 1e-6)
            }
            other => panic!("expected FaceNotRecognized, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_recognize_threshold_is_inclusive() {
        let service = service_with(vec![Ok(unit(0)), Ok(unit(0))]).await;
        service.enroll(enroll_req("A01", 0)).await.unwrap();

        // Self-similarity is exactly 1.0; threshold 1.0 must still accept.
        let rec = service.recognize(&img(), Some(1.0)).await.unwrap();
        assert_eq!(rec.member.key, "A01");
    }

    #[tokio::test]
    async fn test_attendance_full_scenario() {
        let service = service_with(vec![
            Ok(unit(0)), // enroll
            Ok(unit(0)), // check-in
            Ok(unit(0)), // duplicate check-in
            Ok(unit(0)), // check-out
            Ok(unit(0)), // duplicate check-out
        ])
        .await;
        service.enroll(enroll_req("A01", 0)).await.unwrap();

        let date: NaiveDate = "2025-01-10".parse().unwrap();
        let t = |h, m| NaiveTime::from_hms_opt(h, m, 0).unwrap();

        let receipt = service.check_in_at(&img(), date, t(8, 0)).await.unwrap();
        assert!(receipt.event.is_open());
        assert_eq!(receipt.event.started_at, t(8, 0));

        let err = service.check_in_at(&img(), date, t(9, 0)).await.unwrap_err();
        match err {
            ServiceError::AlreadyCheckedIn { name, event } => {
                assert_eq!(name, "Member A01");
                assert_eq!(event.started_at, t(8, 0));
            }
            other => panic!("expected AlreadyCheckedIn, got {other:?}"),
        }

        let receipt = service
            .check_out_at(&img(), "cleaned lab", date, t(16, 0))
            .await
            .unwrap();
        assert_eq!(receipt.duration, "8 jam 0 menit");
        assert_eq!(receipt.event.activity.as_deref(), Some("cleaned lab"));

        let err = service
            .check_out_at(&img(), "again", date, t(17, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::AlreadyCheckedOut { .. }));
    }

    #[tokio::test]
    async fn test_check_out_before_check_in() {
        let service = service_with(vec![Ok(unit(0)), Ok(unit(0))]).await;
        service.enroll(enroll_req("A01", 0)).await.unwrap();

        let date: NaiveDate = "2025-01-10".parse().unwrap();
        let time = NaiveTime::from_hms_opt(16, 0, 0).unwrap();
        let err = service
            .check_out_at(&img(), "work", date, time)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotYetCheckedIn { .. }));
    }

    #[tokio::test]
    async fn test_check_out_requires_activity_note() {
        let service = service_with(vec![]).await;
        let date: NaiveDate = "2025-01-10".parse().unwrap();
        let time = NaiveTime::from_hms_opt(16, 0, 0).unwrap();
        let err = service
            .check_out_at(&img(), "   ", date, time)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::MissingField("activity")));
    }

    #[tokio::test]
    async fn test_update_faces_all_failures_keeps_previous_vectors() {
        let service = service_with(vec![
            Ok(unit(0)),
            Err(VisionError::NoFace),
            Err(VisionError::NoFace),
        ])
        .await;
        service.enroll(enroll_req("A01", 0)).await.unwrap();

        let err = service
            .update_faces("A01", vec![img(), img()])
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NoFaceDetected));

        // Prior vector intact: recognition still works.
        let service = Service {
            vision: StubVision::new(vec![Ok(unit(0))]),
            store: service.store,
            options: ServiceOptions::default(),
        };
        let rec = service.recognize(&img(), None).await.unwrap();
        assert_eq!(rec.member.key, "A01");
    }

    #[tokio::test]
    async fn test_update_faces_replaces_batch() {
        let service = service_with(vec![Ok(unit(0)), Ok(unit(1)), Ok(unit(2)), Ok(unit(1))]).await;
        service.enroll(enroll_req("A01", 0)).await.unwrap();

        let report = service.update_faces("A01", vec![img(), img()]).await.unwrap();
        assert_eq!(report.stored_vectors, 2);
        assert_eq!(report.failed_images, 0);

        // The old unit(0) sample is gone; unit(1) now matches.
        let rec = service.recognize(&img(), None).await.unwrap();
        assert_eq!(rec.member.key, "A01");
        assert!((rec.similarity - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_update_faces_unknown_member() {
        let service = service_with(vec![]).await;
        let err = service.update_faces("GHOST", vec![img()]).await.unwrap_err();
        assert!(matches!(err, ServiceError::IdentityNotFound(_)));
    }

    #[tokio::test]
    async fn test_update_faces_image_cap() {
        let service = service_with(vec![Ok(unit(0))]).await;
        service.enroll(enroll_req("A01", 0)).await.unwrap();

        let images = (0..21).map(|_| img()).collect();
        let err = service.update_faces("A01", images).await.unwrap_err();
        assert!(matches!(err, ServiceError::TooManyImages { got: 21, limit: 20 }));
    }

    #[tokio::test]
    async fn test_remove_member_then_recognize_fails() {
        let service = service_with(vec![Ok(unit(0)), Ok(unit(0))]).await;
        service.enroll(enroll_req("A01", 0)).await.unwrap();
        service.remove_member("A01").await.unwrap();

        // Roster is empty now; best similarity reported as 0.
        let err = service.recognize(&img(), None).await.unwrap_err();
        assert!(matches!(
            err,
            ServiceError::FaceNotRecognized { best_similarity } if best_similarity == 0.0
        ));
    }
}
