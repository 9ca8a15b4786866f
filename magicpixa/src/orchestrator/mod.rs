//! Job orchestration.
//!
//! One job runs a single feature against a single photo:
//!
//! ```text
//! Idle -> BalanceChecked -> ModelInvoked -> ArtifactPersisted -> CreditsCommitted -> Done
//! ```
//!
//! Signed-in callers pay with credits: a hold is taken before the model is called and is
//! released if anything fails up to and including the upload of the output. Once the output
//! exists the reservation is marked `delivered` and committed. Failures in those last two
//! writes are logged and swallowed; the caller still gets the output, with no
//! `credits_charged`, and the [reconciler](crate::reconciler) finishes the charge.
//!
//! Anonymous callers spend one unit of their device quota instead, refunded on failure.

pub mod input;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use bon::Builder;
use metrics::{counter, histogram};
use sha2::{Digest, Sha256};
use std::{sync::Arc, time::Instant};
use tracing::{debug, info, instrument, warn};

use crate::{
    api::models::{
        jobs::{JobCreate, JobResponse},
        users::CurrentUser,
    },
    auth::current_user::{Caller, Device},
    config::{CreditsConfig, FeatureSettings, FeaturesConfig, LimitsConfig},
    db::models::{
        quotas::QuotaOutcome,
        reservations::{Delivery, ReservationDBResponse, ReservationStatus, ReserveDBRequest, ReserveOutcome},
    },
    errors::{Error, Result},
    gateway::{GeneratedMedia, GenerationOutput, GenerationRequest, InlineMedia, Modality, ModelGateway},
    object_store::{ObjectOwner, ObjectStore, PutObject, StorageError, is_raster_image, object_key},
    prompts::{Feature, OutputKind, PromptRenderer},
    store::Store,
    types::abbrev_uuid,
};

/// Step a paid job failed in after its hold was taken. Stored as the release reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStage {
    ModelCall,
    Upload,
}

impl JobStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStage::ModelCall => "model_call",
            JobStage::Upload => "upload",
        }
    }
}

/// What the model produced, after any inline media has been written to object storage.
#[derive(Debug, Clone, Default)]
struct JobOutput {
    output_url: Option<String>,
    output_text: Option<String>,
}

#[derive(Builder)]
pub struct Orchestrator {
    store: Arc<dyn Store>,
    gateway: Arc<dyn ModelGateway>,
    object_store: Arc<dyn ObjectStore>,
    prompts: PromptRenderer,
    features: FeaturesConfig,
    credits: CreditsConfig,
    limits: LimitsConfig,
}

/// Stable fingerprint of a job body, used to detect idempotency keys reused with different input.
pub fn request_fingerprint(job: &JobCreate) -> Result<String> {
    let body = serde_json::to_vec(job).map_err(|e| Error::Internal {
        operation: format!("fingerprint job request: {e}"),
    })?;
    Ok(STANDARD.encode(Sha256::digest(&body)))
}

fn record_outcome(feature: Feature, outcome: &'static str, started: Instant) {
    counter!("magicpixa_jobs_total", "feature" => feature.as_str(), "outcome" => outcome).increment(1);
    histogram!("magicpixa_job_duration_seconds", "feature" => feature.as_str()).record(started.elapsed().as_secs_f64());
}

fn expected_modality(feature: Feature) -> Modality {
    match feature.output() {
        OutputKind::Image => Modality::Image,
        OutputKind::Text => Modality::Text,
    }
}

impl Orchestrator {
    /// Effective settings for a feature, failing if it is switched off.
    pub fn settings(&self, feature: Feature) -> Result<FeatureSettings> {
        let settings = self.features.settings(feature);
        if !settings.enabled {
            return Err(Error::BadRequest {
                message: format!("{} is currently unavailable", feature.label()),
            });
        }
        Ok(settings)
    }

    /// Run a job for a signed-in user or an anonymous device.
    ///
    /// `idempotency_key` is honoured for signed-in users only; anonymous jobs have no ledger entry
    /// to replay.
    #[instrument(skip_all, fields(feature = %job.params.feature()))]
    pub async fn run(&self, caller: &Caller, job: JobCreate, idempotency_key: Option<String>) -> Result<JobResponse> {
        let feature = job.params.feature();
        let started = Instant::now();

        let result = match caller {
            Caller::User(user) => self.run_for_user(user, &job, idempotency_key).await,
            Caller::Anonymous(device) => self.run_for_device(*device, &job).await,
        };

        match &result {
            Ok(response) if response.replayed => record_outcome(feature, "replayed", started),
            Ok(_) => record_outcome(feature, "succeeded", started),
            Err(Error::InsufficientCredits { .. } | Error::QuotaExhausted) => record_outcome(feature, "rejected", started),
            Err(Error::BadRequest { .. } | Error::Conflict { .. }) => record_outcome(feature, "invalid", started),
            Err(_) => record_outcome(feature, "failed", started),
        }
        result
    }

    /// Validate the request and render its prompt. Nothing has been charged yet.
    fn prepare(&self, job: &JobCreate) -> Result<(FeatureSettings, String, InlineMedia)> {
        let settings = self.settings(job.params.feature())?;
        let prompt = self.prompts.render(&job.params)?;
        let media = input::parse_data_uri(&job.image, self.limits.max_image_bytes)?;
        Ok((settings, prompt, media))
    }

    async fn run_for_user(&self, user: &CurrentUser, job: &JobCreate, idempotency_key: Option<String>) -> Result<JobResponse> {
        let feature = job.params.feature();
        let (settings, prompt, media) = self.prepare(job)?;

        let request_fingerprint = match &idempotency_key {
            Some(_) => Some(request_fingerprint(job)?),
            None => None,
        };
        let outcome = self
            .store
            .reserve_credits(&ReserveDBRequest {
                user_id: user.id,
                feature: feature.as_str().to_string(),
                amount: settings.cost,
                idempotency_key,
                request_fingerprint,
            })
            .await?;

        let reservation = match outcome {
            ReserveOutcome::Reserved(reservation) => reservation,
            ReserveOutcome::Insufficient { available } => {
                info!(user_id = %user.id, required = settings.cost, available, "Rejected job for insufficient credits");
                return Err(Error::InsufficientCredits {
                    required: settings.cost,
                    available,
                });
            }
            ReserveOutcome::Replay(previous) => return Ok(self.replay(user, feature, previous).await),
            ReserveOutcome::InFlight => {
                return Err(Error::Conflict {
                    message: "A job with this Idempotency-Key is still running".to_string(),
                });
            }
            ReserveOutcome::KeyReused => {
                return Err(Error::Conflict {
                    message: "This Idempotency-Key was already used for a different request".to_string(),
                });
            }
        };
        debug!(reservation_id = %reservation.id, amount = reservation.amount, "Credits held");

        let output = match self
            .generate(ObjectOwner::User(user.id), feature, settings, prompt, media)
            .await
        {
            Ok(output) => output,
            Err((stage, error)) => {
                warn!(reservation_id = %reservation.id, stage = stage.as_str(), error = %error, "Job failed, releasing hold");
                if let Err(e) = self.store.release_reservation(reservation.id, stage.as_str()).await {
                    warn!(reservation_id = %reservation.id, error = %e, "Failed to release hold; the reconciler will expire it");
                }
                return Err(error);
            }
        };

        // From here on the caller gets the output whatever happens to the ledger writes
        let delivery = Delivery {
            output_url: output.output_url.clone(),
            output_text: output.output_text.clone(),
        };
        let mut artifact_id = None;
        let mut credits_charged = None;
        match self.store.mark_delivered(reservation.id, &delivery).await {
            Ok(_) => match self.store.commit_reservation(reservation.id).await {
                Ok(artifact) => {
                    artifact_id = Some(artifact.id);
                    credits_charged = Some(artifact.credits_used);
                }
                Err(e) => {
                    warn!(reservation_id = %reservation.id, error = %e, "Commit failed; the reconciler will retry it");
                }
            },
            Err(e) => {
                warn!(reservation_id = %reservation.id, error = %e, "Failed to record delivery; returning output uncommitted");
            }
        }

        Ok(JobResponse {
            feature,
            output_url: output.output_url,
            output_text: output.output_text,
            credits_charged,
            available_credits: self.available_credits(user).await,
            remaining_quota: None,
            artifact_id,
            replayed: false,
        })
    }

    /// Return the stored output of an earlier job with the same idempotency key.
    async fn replay(&self, user: &CurrentUser, feature: Feature, previous: ReservationDBResponse) -> JobResponse {
        let mut artifact_id = previous.artifact_id;
        if previous.status == ReservationStatus::Delivered {
            match self.store.commit_reservation(previous.id).await {
                Ok(artifact) => artifact_id = Some(artifact.id),
                Err(e) => warn!(reservation_id = %previous.id, error = %e, "Commit during replay failed"),
            }
        }
        info!(reservation_id = %previous.id, "Replayed job for idempotency key");

        JobResponse {
            feature,
            output_url: previous.output_url,
            output_text: previous.output_text,
            credits_charged: Some(0),
            available_credits: self.available_credits(user).await,
            remaining_quota: None,
            artifact_id,
            replayed: true,
        }
    }

    async fn run_for_device(&self, device: Device, job: &JobCreate) -> Result<JobResponse> {
        let Device(device_id) = device;
        let feature = job.params.feature();
        let (settings, prompt, media) = self.prepare(job)?;
        let allowance = self.credits.anonymous_quota;

        let remaining = match self.store.consume_anonymous_quota(device_id, allowance).await? {
            QuotaOutcome::Consumed { remaining } => remaining,
            QuotaOutcome::Exhausted => {
                info!(device = %abbrev_uuid(&device_id), "Anonymous quota exhausted");
                return Err(Error::QuotaExhausted);
            }
        };

        match self
            .generate(ObjectOwner::Anonymous(device_id), feature, settings, prompt, media)
            .await
        {
            Ok(output) => Ok(JobResponse {
                feature,
                output_url: output.output_url,
                output_text: output.output_text,
                credits_charged: Some(0),
                available_credits: None,
                remaining_quota: Some(remaining),
                artifact_id: None,
                replayed: false,
            }),
            Err((stage, error)) => {
                warn!(device = %abbrev_uuid(&device_id), stage = stage.as_str(), error = %error, "Anonymous job failed, refunding quota");
                if let Err(e) = self.store.refund_anonymous_quota(device_id, allowance).await {
                    warn!(device = %abbrev_uuid(&device_id), error = %e, "Failed to refund anonymous quota");
                }
                Err(error)
            }
        }
    }

    /// Call the model and persist what it returned.
    async fn generate(
        &self,
        owner: ObjectOwner,
        feature: Feature,
        settings: FeatureSettings,
        prompt: String,
        media: InlineMedia,
    ) -> std::result::Result<JobOutput, (JobStage, Error)> {
        let expected = expected_modality(feature);
        let modalities = match expected {
            Modality::Image => vec![Modality::Text, Modality::Image],
            Modality::Text => vec![Modality::Text],
        };

        let generated = self
            .gateway
            .generate(GenerationRequest {
                prompt,
                media: Some(media),
                modalities,
                retries: settings.retries,
            })
            .await
            .and_then(|output| output.require(expected))
            .map_err(|e| (JobStage::ModelCall, Error::from(e)))?;

        self.persist(owner, feature, generated)
            .await
            .map_err(|e| (JobStage::Upload, e))
    }

    async fn persist(&self, owner: ObjectOwner, feature: Feature, generated: GenerationOutput) -> Result<JobOutput> {
        if feature.output() == OutputKind::Text {
            return Ok(JobOutput {
                output_url: None,
                output_text: generated.text.map(|t| t.trim().to_string()),
            });
        }

        let output_url = match generated.media {
            Some(GeneratedMedia::Inline(media)) => {
                if !is_raster_image(&media.mime_type) {
                    return Err(Error::Upstream {
                        service: "image model".to_string(),
                        message: format!("unsupported output type {}", media.mime_type),
                    });
                }
                let upload_timeout = self.limits.upload_timeout;
                let put = self.object_store.put(PutObject {
                    key: object_key(owner, feature.as_str(), &media.mime_type),
                    content_type: media.mime_type,
                    data: media.data,
                });
                let stored = tokio::time::timeout(upload_timeout, put)
                    .await
                    .map_err(|_| StorageError::Timeout(upload_timeout))??;
                debug!(key = %stored.key, size = stored.size, "Stored generated image");
                stored.url
            }
            Some(GeneratedMedia::Url(url)) => url,
            None => {
                return Err(Error::Upstream {
                    service: "image model".to_string(),
                    message: "no image output".to_string(),
                });
            }
        };

        Ok(JobOutput {
            output_url: Some(output_url),
            output_text: None,
        })
    }

    async fn available_credits(&self, user: &CurrentUser) -> Option<i64> {
        match self.store.get_user(user.id).await {
            Ok(Some(account)) => Some((account.credits - account.reserved_credits).max(0)),
            Ok(None) => None,
            Err(e) => {
                warn!(user_id = %user.id, error = %e, "Failed to read balance after job");
                None
            }
        }
    }
}
