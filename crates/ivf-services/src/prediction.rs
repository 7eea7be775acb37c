//! 预测流程
//!
//! 每个请求按以下阶段推进：
//!
//! ```text
//! Received → Validated → Scaled → Scored → Persisted → Responded
//! ```
//!
//! 校验失败在 Validated 之前退出（ValidationError），标准化或打分失败在
//! Scaled/Scored 退出（InferenceError）；两种情况都不写入任何记录。
//! 记录只在拿到结果之后一次性插入。

use chrono::{DateTime, Utc};
use ivf_core::{
    Capabilities, ClinicalFeatures, IvfError, OwnerKind, Page, PageRequest, PredictionRecord,
    Result,
};
use ivf_database::{CreatedRange, NewPrediction, PredictionFilter, Store};
use ivf_model::ModelProvider;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

const PATIENT_FIELD: &str = "patient";
const PATIENT_NOT_MANAGED: &str = "Patient does not exist for this user.";

/// 流程阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Received,
    Validated,
    Scaled,
    Scored,
    Persisted,
    Responded,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineStage::Received => "received",
            PipelineStage::Validated => "validated",
            PipelineStage::Scaled => "scaled",
            PipelineStage::Scored => "scored",
            PipelineStage::Persisted => "persisted",
            PipelineStage::Responded => "responded",
        };
        f.write_str(name)
    }
}

/// 预测的简要响应
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionSummary {
    pub result: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub probability: Option<f64>,
    pub id: Uuid,
}

impl From<&PredictionRecord> for PredictionSummary {
    fn from(record: &PredictionRecord) -> Self {
        Self {
            result: record.result,
            probability: record.probability,
            id: record.id,
        }
    }
}

/// 预测响应：默认为简要结果，显式要求时返回完整记录
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum PredictionReply {
    Summary(PredictionSummary),
    Record(PredictionRecord),
}

/// 预测列表过滤条件
#[derive(Debug, Clone, Default)]
pub struct PredictionQuery {
    pub result: Option<i32>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_to: Option<DateTime<Utc>>,
}

/// 预测归属
struct Binding {
    owner_id: Uuid,
    kind: OwnerKind,
    patient_id: Option<Uuid>,
}

pub struct PredictionPipeline {
    store: Arc<dyn Store>,
    model: Arc<ModelProvider>,
}

impl PredictionPipeline {
    pub fn new(store: Arc<dyn Store>, model: Arc<ModelProvider>) -> Self {
        Self { store, model }
    }

    /// 执行一次预测
    pub async fn submit(&self, caps: &Capabilities, body: &Value, expand: bool) -> Result<PredictionReply> {
        let mut stage = PipelineStage::Received;
        let request_id = Uuid::new_v4();
        debug!("Prediction {} {}", request_id, stage);

        // 1. 校验十二个临床字段
        let features = ClinicalFeatures::from_json(body)?;
        stage = PipelineStage::Validated;
        debug!("Prediction {} {}", request_id, stage);

        // 2. 确定归属
        let binding = self.bind_owner(caps, body).await?;

        // 3. 标准化
        let artifact = self.model.get().await?;
        let scaled = artifact.scaler().transform(&features.to_vector())?;
        stage = PipelineStage::Scaled;
        debug!("Prediction {} {}", request_id, stage);

        // 4. 打分
        let classifier = artifact.classifier();
        let result = classifier.predict(&scaled)?;
        let probability = classifier
            .predict_proba(&scaled)
            .transpose()?
            .map(|[_, positive]| positive);
        if let Some(p) = probability {
            if !(0.0..=1.0).contains(&p) {
                warn!("Prediction {} probability {} out of range", request_id, p);
                return Err(IvfError::Inference(format!(
                    "Classifier returned probability {} outside [0, 1]",
                    p
                )));
            }
        }
        stage = PipelineStage::Scored;
        debug!("Prediction {} {} (result = {})", request_id, stage, result);

        // 5. 持久化
        let record = self
            .store
            .insert_prediction(&NewPrediction {
                owner_id: binding.owner_id,
                owner_kind: binding.kind,
                patient_id: binding.patient_id,
                features,
                result,
                probability,
                model_version: artifact.version().to_string(),
            })
            .await?;
        stage = PipelineStage::Persisted;
        debug!("Prediction {} {} as {}", request_id, stage, record.id);

        // 6. 响应
        info!(
            "Prediction {} stored for profile {} ({})",
            record.id,
            record.owner_id,
            record.owner_kind.as_str()
        );
        let reply = if expand {
            PredictionReply::Record(record)
        } else {
            PredictionReply::Summary(PredictionSummary::from(&record))
        };
        stage = PipelineStage::Responded;
        debug!("Prediction {} {}", request_id, stage);
        Ok(reply)
    }

    /// 根据调用方能力确定预测归属；医生必须指定自己管理的患者
    async fn bind_owner(&self, caps: &Capabilities, body: &Value) -> Result<Binding> {
        let owner_id = caps.require_profile()?;
        let kind = caps.prediction_authoring.ok_or_else(|| {
            IvfError::PermissionDenied("You cannot create predictions.".to_string())
        })?;

        let patient = body.get(PATIENT_FIELD).filter(|v| !v.is_null());

        match kind {
            OwnerKind::SelfReported => {
                if patient.is_some() {
                    return Err(IvfError::validation(
                        PATIENT_FIELD,
                        "Only doctors can submit predictions for a patient.",
                    ));
                }
                Ok(Binding {
                    owner_id,
                    kind,
                    patient_id: None,
                })
            }
            OwnerKind::DoctorAuthored => {
                let patient = patient
                    .ok_or_else(|| IvfError::validation(PATIENT_FIELD, "This field is required."))?;
                let patient_id = patient
                    .as_str()
                    .and_then(|s| Uuid::parse_str(s.trim()).ok())
                    .ok_or_else(|| IvfError::validation(PATIENT_FIELD, "Must be a valid UUID."))?;

                match self.store.get_patient(patient_id).await? {
                    Some(p) if caps.patients.permits(p.manager_id) => Ok(Binding {
                        owner_id,
                        kind,
                        patient_id: Some(p.id),
                    }),
                    _ => Err(IvfError::validation(PATIENT_FIELD, PATIENT_NOT_MANAGED)),
                }
            }
        }
    }

    pub async fn list(
        &self,
        caps: &Capabilities,
        query: &PredictionQuery,
        page: PageRequest,
    ) -> Result<Page<PredictionRecord>> {
        let scope = caps.prediction_scope()?;
        let filter = PredictionFilter {
            owner_id: scope.owner_filter(),
            result: query.result,
            created: CreatedRange {
                from: query.created_from,
                to: query.created_to,
            },
        };

        self.store
            .list_predictions(&filter, page)
            .await?
            .ensure_in_range()
    }

    pub async fn get(&self, caps: &Capabilities, id: Uuid) -> Result<PredictionRecord> {
        let scope = caps.prediction_scope()?;
        let record = self
            .store
            .get_prediction(id)
            .await?
            .ok_or_else(|| IvfError::NotFound("Prediction not found.".to_string()))?;
        scope.ensure_visible(record.owner_id, "Prediction")?;
        Ok(record)
    }

    pub async fn delete(&self, caps: &Capabilities, id: Uuid) -> Result<()> {
        let record = self.get(caps, id).await?;
        self.store.delete_prediction(record.id).await?;
        info!("Prediction {} deleted", record.id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ivf_core::{Caller, Role, ScopeResolver, FEATURE_COUNT};
    use ivf_database::{MemoryStore, NewAccount, NewPatient};
    use ivf_model::{Classifier, ClassifierSpec, ModelArtifact, ScalerSpec};
    use serde_json::json;

    fn sample() -> Value {
        json!({
            "female_age": 37, "AMH": 2.0, "FSH": 1.0, "no_embryos": 5,
            "endometrial_thickness": 8.0, "sperm_count": 36.0, "sperm_morphology": 3,
            "follicle_size": 18, "retrieved_oocytes": 16, "embryo_quality": 7,
            "oocytes_MI": 0, "oocytes_MII": 12
        })
    }

    fn artifact() -> ModelArtifact {
        ModelArtifact::new(
            "test-1",
            ScalerSpec::Standard {
                mean: vec![0.0; FEATURE_COUNT],
                scale: vec![10.0; FEATURE_COUNT],
            }
            .build()
            .unwrap(),
            ClassifierSpec::Logistic {
                coefficients: vec![0.1; FEATURE_COUNT],
                intercept: -0.2,
                threshold: None,
            }
            .build()
            .unwrap(),
        )
    }

    /// 返回越界概率的分类器
    struct Broken;

    impl Classifier for Broken {
        fn predict(&self, _x: &[f64; FEATURE_COUNT]) -> Result<i32> {
            Ok(1)
        }

        fn predict_proba(&self, _x: &[f64; FEATURE_COUNT]) -> Option<Result<[f64; 2]>> {
            Some(Ok([-0.5, 1.5]))
        }
    }

    async fn caps(store: &Arc<dyn Store>, email: &str, role: Role) -> Capabilities {
        let created = store
            .create_account(
                &NewAccount {
                    email: email.to_string(),
                    password_hash: "x".to_string(),
                    role,
                    is_active: true,
                    is_staff: false,
                    is_superuser: role == Role::Superuser,
                    first_name: String::new(),
                    last_name: String::new(),
                },
                None,
            )
            .await
            .unwrap();
        ScopeResolver::new().resolve(&Caller::authenticated(created.account, Some(created.profile)))
    }

    fn setup() -> (Arc<dyn Store>, PredictionPipeline) {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let pipeline = PredictionPipeline::new(
            store.clone(),
            Arc::new(ModelProvider::preloaded(artifact())),
        );
        (store, pipeline)
    }

    async fn count(store: &Arc<dyn Store>) -> u64 {
        store
            .list_predictions(&PredictionFilter::default(), PageRequest::default())
            .await
            .unwrap()
            .total_objects
    }

    #[tokio::test]
    async fn test_sample_round_trip() {
        let (store, pipeline) = setup();
        let patient = caps(&store, "p@b.org", Role::Patient).await;

        let reply = pipeline.submit(&patient, &sample(), true).await.unwrap();
        let PredictionReply::Record(record) = reply else {
            panic!("expected full record");
        };
        assert_eq!(record.owner_kind, OwnerKind::SelfReported);
        assert_eq!(record.model_version, "test-1");
        assert!(record.probability.is_some());

        let stored = serde_json::to_value(&record).unwrap();
        for (key, value) in sample().as_object().unwrap() {
            assert_eq!(
                stored[key].as_f64(),
                value.as_f64(),
                "field {} did not round trip",
                key
            );
        }
        assert!(!stored["result"].is_null());
    }

    #[tokio::test]
    async fn test_identical_input_identical_result() {
        let (store, pipeline) = setup();
        let patient = caps(&store, "p@b.org", Role::Patient).await;

        let first = pipeline.submit(&patient, &sample(), false).await.unwrap();
        let second = pipeline.submit(&patient, &sample(), false).await.unwrap();
        let (PredictionReply::Summary(a), PredictionReply::Summary(b)) = (first, second) else {
            panic!("expected summaries");
        };
        assert_eq!(a.result, b.result);
        assert_eq!(a.probability, b.probability);
        assert_ne!(a.id, b.id);
    }

    #[tokio::test]
    async fn test_invalid_input_persists_nothing() {
        let (store, pipeline) = setup();
        let patient = caps(&store, "p@b.org", Role::Patient).await;

        let mut body = sample();
        body["female_age"] = json!(5);
        body["AMH"] = json!("abc");
        let err = pipeline.submit(&patient, &body, false).await.unwrap_err();
        assert_eq!(err.details().len(), 2);
        assert_eq!(count(&store).await, 0);
    }

    #[tokio::test]
    async fn test_doctor_needs_managed_patient() {
        let (store, pipeline) = setup();
        let doctor = caps(&store, "d@b.org", Role::Doctor).await;
        let other = caps(&store, "o@b.org", Role::Doctor).await;
        let foreign = store
            .insert_patient(&NewPatient {
                manager_id: other.profile_id.unwrap(),
                first_name: "A".to_string(),
                last_name: "B".to_string(),
            })
            .await
            .unwrap();

        let err = pipeline.submit(&doctor, &sample(), false).await.unwrap_err();
        assert_eq!(err.details()[0].field, "patient");

        let mut body = sample();
        body["patient"] = json!(foreign.id.to_string());
        let err = pipeline.submit(&doctor, &body, false).await.unwrap_err();
        assert_eq!(err.details()[0].message, PATIENT_NOT_MANAGED);
        assert_eq!(count(&store).await, 0);

        let record = pipeline.submit(&other, &body, true).await.unwrap();
        let PredictionReply::Record(record) = record else {
            panic!("expected full record");
        };
        assert_eq!(record.patient_id, Some(foreign.id));
        assert_eq!(record.owner_kind, OwnerKind::DoctorAuthored);
    }

    #[tokio::test]
    async fn test_patient_cannot_name_a_patient() {
        let (store, pipeline) = setup();
        let patient = caps(&store, "p@b.org", Role::Patient).await;
        let mut body = sample();
        body["patient"] = json!(Uuid::new_v4().to_string());

        assert!(matches!(
            pipeline.submit(&patient, &body, false).await,
            Err(IvfError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_out_of_range_probability_is_inference_error() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let scaler = ScalerSpec::MinMax {
            min: vec![0.0; FEATURE_COUNT],
            scale: vec![1.0; FEATURE_COUNT],
        }
        .build()
        .unwrap();
        let provider = ModelProvider::preloaded(ModelArtifact::new("broken", scaler, Box::new(Broken)));
        let pipeline = PredictionPipeline::new(store.clone(), Arc::new(provider));
        let patient = caps(&store, "p@b.org", Role::Patient).await;

        let err = pipeline.submit(&patient, &sample(), false).await.unwrap_err();
        assert!(matches!(err, IvfError::Inference(_)));
        assert_eq!(count(&store).await, 0);
    }

    #[tokio::test]
    async fn test_missing_artifact_is_inference_error() {
        let dir = std::env::temp_dir().join(format!("ivf-missing-{}", Uuid::new_v4()));
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let provider = ModelProvider::new(ivf_model::ModelPaths {
            artifact_dir: dir,
            ..Default::default()
        });
        let pipeline = PredictionPipeline::new(store.clone(), Arc::new(provider));
        let patient = caps(&store, "p@b.org", Role::Patient).await;

        let err = pipeline.submit(&patient, &sample(), false).await.unwrap_err();
        assert!(matches!(err, IvfError::Inference(_)));
        assert_eq!(count(&store).await, 0);
    }

    #[tokio::test]
    async fn test_scoping_and_delete() {
        let (store, pipeline) = setup();
        let alice = caps(&store, "alice@b.org", Role::Patient).await;
        let bob = caps(&store, "bob@b.org", Role::Patient).await;

        let PredictionReply::Summary(summary) =
            pipeline.submit(&alice, &sample(), false).await.unwrap()
        else {
            panic!("expected summary");
        };
        pipeline.submit(&bob, &sample(), false).await.unwrap();

        let page = pipeline
            .list(&alice, &PredictionQuery::default(), PageRequest::default())
            .await
            .unwrap();
        assert_eq!(page.total_objects, 1);
        assert!(page.items.iter().all(|r| Some(r.owner_id) == alice.profile_id));

        assert!(matches!(
            pipeline.get(&bob, summary.id).await,
            Err(IvfError::NotFound(_))
        ));

        pipeline.delete(&alice, summary.id).await.unwrap();
        assert!(matches!(
            pipeline.get(&alice, summary.id).await,
            Err(IvfError::NotFound(_))
        ));
    }

    /// 只看年龄的分类器：缩放后的年龄不低于 3.5 判为 1
    struct AgeCutoff;

    impl Classifier for AgeCutoff {
        fn predict(&self, x: &[f64; FEATURE_COUNT]) -> Result<i32> {
            Ok(i32::from(x[0] >= 3.5))
        }

        fn predict_proba(&self, _x: &[f64; FEATURE_COUNT]) -> Option<Result<[f64; 2]>> {
            None
        }
    }

    #[tokio::test]
    async fn test_list_filters_by_result_and_date() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let scaler = ScalerSpec::Standard {
            mean: vec![0.0; FEATURE_COUNT],
            scale: vec![10.0; FEATURE_COUNT],
        }
        .build()
        .unwrap();
        let pipeline = PredictionPipeline::new(
            store.clone(),
            Arc::new(ModelProvider::preloaded(ModelArtifact::new(
                "age-1",
                scaler,
                Box::new(AgeCutoff),
            ))),
        );
        let patient = caps(&store, "p@b.org", Role::Patient).await;

        let mut young = sample();
        young["female_age"] = json!(30);
        for body in [sample(), young.clone(), young] {
            pipeline.submit(&patient, &body, false).await.unwrap();
        }

        let query = |result: Option<i32>| PredictionQuery {
            result,
            ..Default::default()
        };
        let positive = pipeline
            .list(&patient, &query(Some(1)), PageRequest::default())
            .await
            .unwrap();
        assert_eq!(positive.total_objects, 1);
        assert_eq!(positive.items[0].features.female_age, 37);

        let negative = pipeline
            .list(&patient, &query(Some(0)), PageRequest::default())
            .await
            .unwrap();
        assert_eq!(negative.total_objects, 2);
        assert!(negative.items.iter().all(|r| r.result == 0));

        let now = Utc::now();
        let window = PredictionQuery {
            result: None,
            created_from: Some(now - chrono::Duration::hours(1)),
            created_to: Some(now + chrono::Duration::hours(1)),
        };
        let page = pipeline
            .list(&patient, &window, PageRequest::default())
            .await
            .unwrap();
        assert_eq!(page.total_objects, 3);

        let before = PredictionQuery {
            result: Some(0),
            created_from: None,
            created_to: Some(now - chrono::Duration::hours(1)),
        };
        let page = pipeline
            .list(&patient, &before, PageRequest::default())
            .await
            .unwrap();
        assert_eq!(page.total_objects, 0);
    }
}
