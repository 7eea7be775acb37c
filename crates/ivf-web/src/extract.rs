//! 自定义提取器与参数解析

use axum::{
    async_trait,
    extract::{rejection::JsonRejection, FromRequest, FromRequestParts, Request},
    http::request::Parts,
    Json,
};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use ivf_core::{Caller, Capabilities, FieldError, IvfError};
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

/// JSON 请求体；解析失败时返回统一格式的校验错误
pub struct JsonBody<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for JsonBody<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(JsonBody(value)),
            Err(rejection) => Err(ApiError(IvfError::invalid(rejection.body_text()))),
        }
    }
}

/// 当前调用方的能力集
pub struct CallerCaps(pub Capabilities);

#[async_trait]
impl FromRequestParts<AppState> for CallerCaps {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let caller = parts
            .extensions
            .get::<Caller>()
            .cloned()
            .unwrap_or(Caller::Anonymous);
        Ok(CallerCaps(state.services.capabilities(&caller)))
    }
}

/// 路径中的记录ID；格式错误等同于记录不存在
pub fn parse_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError(IvfError::NotFound("Not found.".to_string())))
}

/// 解析日期过滤参数，接受 RFC 3339 时间或 `YYYY-MM-DD`
///
/// 仅有日期时，起始值取当天零点，截止值取当天最后一刻。
pub fn parse_date(
    field: &str,
    raw: Option<&str>,
    end_of_day: bool,
    errors: &mut Vec<FieldError>,
) -> Option<DateTime<Utc>> {
    let raw = raw.map(str::trim).filter(|s| !s.is_empty())?;

    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Some(at.with_timezone(&Utc));
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        let time = if end_of_day {
            NaiveTime::from_hms_micro_opt(23, 59, 59, 999_999)
        } else {
            NaiveTime::from_hms_opt(0, 0, 0)
        };
        if let Some(time) = time {
            return Some(date.and_time(time).and_utc());
        }
    }

    errors.push(FieldError::new(field, "Enter a valid date."));
    None
}

/// 解析整数过滤参数
pub fn parse_int(field: &str, raw: Option<&str>, errors: &mut Vec<FieldError>) -> Option<i32> {
    let raw = raw.map(str::trim).filter(|s| !s.is_empty())?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            errors.push(FieldError::new(field, "Enter a whole number."));
            None
        }
    }
}

/// 有错误时转换为校验错误
pub fn finish(errors: Vec<FieldError>) -> Result<(), ApiError> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(ApiError(IvfError::Validation(errors)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_date_forms() {
        let mut errors = Vec::new();
        let from = parse_date("created_from", Some("2024-03-01"), false, &mut errors).unwrap();
        let to = parse_date("created_to", Some("2024-03-01"), true, &mut errors).unwrap();
        assert!(from < to);
        assert_eq!(from.to_rfc3339(), "2024-03-01T00:00:00+00:00");

        let exact = parse_date("created_from", Some("2024-03-01T10:00:00+02:00"), false, &mut errors);
        assert_eq!(exact.unwrap().to_rfc3339(), "2024-03-01T08:00:00+00:00");
        assert!(errors.is_empty());

        assert!(parse_date("created_from", Some("yesterday"), false, &mut errors).is_none());
        assert_eq!(errors.len(), 1);
        assert!(parse_date("created_from", None, false, &mut errors).is_none());
    }

    #[test]
    fn test_parse_int() {
        let mut errors = Vec::new();
        assert_eq!(parse_int("result", Some("1"), &mut errors), Some(1));
        assert_eq!(parse_int("result", Some("x"), &mut errors), None);
        assert_eq!(errors.len(), 1);
    }
}
