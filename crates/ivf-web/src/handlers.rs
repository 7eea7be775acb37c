//! HTTP处理器

use axum::{
    extract::{OriginalUri, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    Extension,
};
use ivf_core::{IvfError, Patient, PredictionRecord};
use ivf_services::{
    NameHints, PasswordChange, PatientInput, PredictionQuery, ProfileUpdate, ReferralQuery,
    Registration,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, info};

use crate::auth::SessionToken;
use crate::error::ApiResult;
use crate::extract::{finish, parse_date, parse_id, parse_int, CallerCaps, JsonBody};
use crate::pagination::{page_request, Linked, Paginated};
use crate::state::AppState;

/// API 路径前缀
pub const API_PREFIX: &str = "/api/v1";

/// 列表查询参数，全部按字符串接收后再逐项校验
#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub page: Option<String>,
    pub token: Option<String>,
    pub result: Option<String>,
    pub created_from: Option<String>,
    pub created_to: Option<String>,
}

impl ListParams {
    fn referral_query(&self) -> ApiResult<ReferralQuery> {
        let mut errors = Vec::new();
        let query = ReferralQuery {
            token: self.token.clone(),
            created_from: parse_date("created_from", self.created_from.as_deref(), false, &mut errors),
            created_to: parse_date("created_to", self.created_to.as_deref(), true, &mut errors),
        };
        finish(errors)?;
        Ok(query)
    }

    fn prediction_query(&self) -> ApiResult<PredictionQuery> {
        let mut errors = Vec::new();
        let query = PredictionQuery {
            result: parse_int("result", self.result.as_deref(), &mut errors),
            created_from: parse_date("created_from", self.created_from.as_deref(), false, &mut errors),
            created_to: parse_date("created_to", self.created_to.as_deref(), true, &mut errors),
        };
        finish(errors)?;
        Ok(query)
    }
}

/// 登录请求
#[derive(Debug, Default, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

/// 预测提交参数
#[derive(Debug, Default, Deserialize)]
pub struct SubmitParams {
    pub expand: Option<String>,
}

fn prediction_url(id: impl std::fmt::Display) -> String {
    format!("{}/predictions/{}", API_PREFIX, id)
}

fn patient_url(id: impl std::fmt::Display) -> String {
    format!("{}/patients/{}", API_PREFIX, id)
}

/// API根路径处理器
pub async fn api_root() -> impl IntoResponse {
    Json(json!({
        "service": "IVF Prediction API",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
        "endpoints": {
            "health": "/health",
            "api": API_PREFIX,
        }
    }))
}

/// 健康检查处理器
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let database = state.store.ping().await;
    if let Err(e) = &database {
        error!("Health check failed: {}", e);
    }

    let status = if database.is_ok() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "status": if database.is_ok() { "healthy" } else { "unhealthy" },
            "database": database.is_ok(),
            "model_loaded": state.model.is_loaded(),
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "version": env!("CARGO_PKG_VERSION"),
        })),
    )
}

// ---------------------------------------------------------------------------
// 账户
// ---------------------------------------------------------------------------

pub async fn register(
    State(state): State<AppState>,
    JsonBody(registration): JsonBody<Registration>,
) -> ApiResult<impl IntoResponse> {
    let created = state.services.identity.register(registration).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "account": created.account,
            "profile": created.profile,
        })),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    JsonBody(request): JsonBody<LoginRequest>,
) -> ApiResult<impl IntoResponse> {
    let result = state
        .services
        .identity
        .login(&request.email, &request.password)
        .await?;
    Ok(Json(result))
}

pub async fn logout(
    State(state): State<AppState>,
    CallerCaps(caps): CallerCaps,
    session: Option<Extension<SessionToken>>,
) -> ApiResult<StatusCode> {
    let account_id = caps.require_authenticated()?;
    if let Some(Extension(SessionToken(token))) = session {
        state.services.identity.logout(&token).await?;
        info!("Account {} logged out", account_id);
    }
    Ok(StatusCode::NO_CONTENT)
}

/// 修改口令，保留当前会话
pub async fn set_password(
    State(state): State<AppState>,
    CallerCaps(caps): CallerCaps,
    session: Option<Extension<SessionToken>>,
    JsonBody(change): JsonBody<PasswordChange>,
) -> ApiResult<StatusCode> {
    let current = session.map(|Extension(SessionToken(token))| token);
    state
        .services
        .identity
        .set_password(&caps, current.as_deref(), change)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_me(
    State(state): State<AppState>,
    CallerCaps(caps): CallerCaps,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.services.identity.me(&caps).await?))
}

pub async fn delete_me(
    State(state): State<AppState>,
    CallerCaps(caps): CallerCaps,
) -> ApiResult<StatusCode> {
    state.services.identity.delete_me(&caps).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn activate_account(
    State(state): State<AppState>,
    CallerCaps(caps): CallerCaps,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let id = parse_id(&id)?;
    Ok(Json(state.services.identity.activate(&caps, id).await?))
}

pub async fn get_profile(
    State(state): State<AppState>,
    CallerCaps(caps): CallerCaps,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.services.identity.get_profile(&caps).await?))
}

pub async fn update_profile(
    State(state): State<AppState>,
    CallerCaps(caps): CallerCaps,
    JsonBody(update): JsonBody<ProfileUpdate>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.services.identity.update_profile(&caps, update).await?))
}

// ---------------------------------------------------------------------------
// 推荐
// ---------------------------------------------------------------------------

pub async fn create_referral(
    State(state): State<AppState>,
    CallerCaps(caps): CallerCaps,
    JsonBody(hints): JsonBody<NameHints>,
) -> ApiResult<impl IntoResponse> {
    let token = state.services.referrals.generate_token(&caps, hints).await?;
    Ok((StatusCode::CREATED, Json(token)))
}

pub async fn list_referrals(
    State(state): State<AppState>,
    CallerCaps(caps): CallerCaps,
    OriginalUri(uri): OriginalUri,
    Query(params): Query<ListParams>,
) -> ApiResult<impl IntoResponse> {
    let query = params.referral_query()?;
    let page = page_request(&state, params.page.as_deref())?;
    let tokens = state.services.referrals.list_tokens(&caps, &query, page).await?;
    Ok(Json(Paginated::new(tokens, &state, &uri)))
}

/// 令牌详情；匿名调用方也可查询，用于注册前展示推荐医生
pub async fn get_referral(
    State(state): State<AppState>,
    CallerCaps(caps): CallerCaps,
    Path(token): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.services.referrals.token_detail(&caps, &token).await?))
}

pub async fn delete_referral(
    State(state): State<AppState>,
    CallerCaps(caps): CallerCaps,
    Path(token): Path<String>,
) -> ApiResult<StatusCode> {
    state.services.referrals.delete_token(&caps, &token).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_relationships(
    State(state): State<AppState>,
    CallerCaps(caps): CallerCaps,
    OriginalUri(uri): OriginalUri,
    Query(params): Query<ListParams>,
) -> ApiResult<impl IntoResponse> {
    let query = params.referral_query()?;
    let page = page_request(&state, params.page.as_deref())?;
    let relationships = state
        .services
        .referrals
        .list_relationships(&caps, &query, page)
        .await?;
    Ok(Json(Paginated::new(relationships, &state, &uri)))
}

pub async fn get_relationship(
    State(state): State<AppState>,
    CallerCaps(caps): CallerCaps,
    Path(token): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.services.referrals.get_relationship(&caps, &token).await?))
}

// ---------------------------------------------------------------------------
// 患者
// ---------------------------------------------------------------------------

pub async fn create_patient(
    State(state): State<AppState>,
    CallerCaps(caps): CallerCaps,
    JsonBody(input): JsonBody<PatientInput>,
) -> ApiResult<impl IntoResponse> {
    let patient = state.services.patients.create(&caps, input).await?;
    Ok((StatusCode::CREATED, Json(patient)))
}

pub async fn list_patients(
    State(state): State<AppState>,
    CallerCaps(caps): CallerCaps,
    OriginalUri(uri): OriginalUri,
    Query(params): Query<ListParams>,
) -> ApiResult<impl IntoResponse> {
    let page = page_request(&state, params.page.as_deref())?;
    let patients = state
        .services
        .patients
        .list(&caps, page)
        .await?
        .map(|patient: Patient| {
            let url = patient_url(patient.id);
            Linked::new(patient, url, &state)
        });
    Ok(Json(Paginated::new(patients, &state, &uri)))
}

pub async fn get_patient(
    State(state): State<AppState>,
    CallerCaps(caps): CallerCaps,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let id = parse_id(&id)?;
    Ok(Json(state.services.patients.get(&caps, id).await?))
}

pub async fn update_patient(
    State(state): State<AppState>,
    CallerCaps(caps): CallerCaps,
    Path(id): Path<String>,
    JsonBody(input): JsonBody<PatientInput>,
) -> ApiResult<impl IntoResponse> {
    let id = parse_id(&id)?;
    Ok(Json(state.services.patients.update(&caps, id, input).await?))
}

pub async fn delete_patient(
    State(state): State<AppState>,
    CallerCaps(caps): CallerCaps,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let id = parse_id(&id)?;
    state.services.patients.delete(&caps, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// 预测
// ---------------------------------------------------------------------------

/// 提交预测；`?expand=record` 时返回完整记录
pub async fn create_prediction(
    State(state): State<AppState>,
    CallerCaps(caps): CallerCaps,
    Query(params): Query<SubmitParams>,
    JsonBody(body): JsonBody<Value>,
) -> ApiResult<impl IntoResponse> {
    let expand = match params.expand.as_deref() {
        None | Some("") => false,
        Some("record") => true,
        Some(_) => {
            return Err(IvfError::validation("expand", "Supported value is \"record\".").into())
        }
    };

    let reply = state.services.predictions.submit(&caps, &body, expand).await?;
    Ok((StatusCode::CREATED, Json(reply)))
}

pub async fn list_predictions(
    State(state): State<AppState>,
    CallerCaps(caps): CallerCaps,
    OriginalUri(uri): OriginalUri,
    Query(params): Query<ListParams>,
) -> ApiResult<impl IntoResponse> {
    let query = params.prediction_query()?;
    let page = page_request(&state, params.page.as_deref())?;
    let predictions = state
        .services
        .predictions
        .list(&caps, &query, page)
        .await?
        .map(|record: PredictionRecord| {
            let url = prediction_url(record.id);
            Linked::new(record, url, &state)
        });
    Ok(Json(Paginated::new(predictions, &state, &uri)))
}

pub async fn get_prediction(
    State(state): State<AppState>,
    CallerCaps(caps): CallerCaps,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let id = parse_id(&id)?;
    Ok(Json(state.services.predictions.get(&caps, id).await?))
}

pub async fn delete_prediction(
    State(state): State<AppState>,
    CallerCaps(caps): CallerCaps,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let id = parse_id(&id)?;
    state.services.predictions.delete(&caps, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
