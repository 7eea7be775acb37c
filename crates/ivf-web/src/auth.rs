//! 会话认证中间件

use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use ivf_core::{Caller, IvfError};
use tracing::debug;

use crate::error::ApiError;
use crate::state::AppState;

/// 当前请求携带的会话令牌，注销时使用
#[derive(Debug, Clone)]
pub struct SessionToken(pub String);

/// 从 `Authorization` 头解析会话令牌
///
/// 接受 `Bearer <token>` 与 `Token <token>` 两种形式；
/// 没有该头时返回 `Ok(None)`，按匿名调用方处理。
fn bearer_token(request: &Request) -> Result<Option<String>, ApiError> {
    let Some(value) = request.headers().get(header::AUTHORIZATION) else {
        return Ok(None);
    };

    let value = value
        .to_str()
        .map_err(|_| IvfError::Unauthenticated("Invalid token header.".to_string()))?;

    let token = value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("Token "))
        .map(str::trim)
        .filter(|t| !t.is_empty() && !t.contains(' '))
        .ok_or_else(|| IvfError::Unauthenticated("Invalid token header.".to_string()))?;

    Ok(Some(token.to_string()))
}

/// 认证中间件
///
/// 成功时把 [`Caller`] 和 [`SessionToken`] 放入请求扩展；
/// 令牌无效时直接返回 401，不进入处理器。
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let caller = match bearer_token(&request)? {
        Some(token) => {
            let caller = state.services.identity.authenticate(&token).await?;
            request.extensions_mut().insert(SessionToken(token));
            caller
        }
        None => Caller::Anonymous,
    };

    if let Some(account) = caller.account() {
        debug!("Authenticated account {}", account.id);
    }
    request.extensions_mut().insert(caller);

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn request(authorization: Option<&str>) -> Request {
        let mut builder = axum::http::Request::builder().uri("/");
        if let Some(value) = authorization {
            builder = builder.header(header::AUTHORIZATION, value);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn test_bearer_token_forms() {
        assert_eq!(bearer_token(&request(None)).unwrap(), None);
        assert_eq!(
            bearer_token(&request(Some("Bearer abc"))).unwrap().as_deref(),
            Some("abc")
        );
        assert_eq!(
            bearer_token(&request(Some("Token abc"))).unwrap().as_deref(),
            Some("abc")
        );
        assert!(bearer_token(&request(Some("Basic abc"))).is_err());
        assert!(bearer_token(&request(Some("Bearer "))).is_err());
    }
}
