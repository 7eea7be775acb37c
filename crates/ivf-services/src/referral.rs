//! 推荐令牌引擎
//!
//! 医生生成一次性邀请令牌，患者注册时兑换令牌，建立 医生 → 患者 的推荐关系。
//! 令牌唯一性与"至多兑换一次"都以数据库唯一约束为准。

use chrono::{DateTime, Utc};
use ivf_core::{
    utils::{generate_referral_token, is_referral_token_format},
    Capabilities, IvfError, Page, PageRequest,
    PublicReferralToken, ReferralRelationshipView, ReferralTokenView, Result,
};
use ivf_database::{
    CreatedAccount, CreatedRange, NewAccount, NewReferralToken, RelationshipFilter, Store,
    TokenFilter, RELATIONSHIP_TOKEN_CONSTRAINT, TOKEN_VALUE_CONSTRAINT,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::validation::clean_name;

/// 令牌生成器
pub type TokenGenerator = Arc<dyn Fn() -> String + Send + Sync>;

/// 令牌冲突时的最大生成次数
pub const MAX_TOKEN_ATTEMPTS: usize = 8;

const NAME_HINT_MAX_LEN: usize = 255;
const TOKEN_NOT_VALID: &str = "Your token is not valid.";
const TOKEN_ALREADY_USED: &str = "This referral token has already been used.";

/// 令牌上的姓名提示，兑换时预填到新档案
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NameHints {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

/// 令牌与关系列表的过滤条件
#[derive(Debug, Clone, Default)]
pub struct ReferralQuery {
    pub token: Option<String>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_to: Option<DateTime<Utc>>,
}

impl ReferralQuery {
    fn created(&self) -> CreatedRange {
        CreatedRange {
            from: self.created_from,
            to: self.created_to,
        }
    }

    fn token_contains(&self) -> Option<String> {
        self.token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
    }
}

/// 令牌详情：创建者看到完整记录，其他人只看到公开视图
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum TokenDetail {
    Full(ReferralTokenView),
    Public(PublicReferralToken),
}

pub struct ReferralEngine {
    store: Arc<dyn Store>,
    generator: TokenGenerator,
}

impl ReferralEngine {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self::with_generator(store, Arc::new(generate_referral_token))
    }

    pub fn with_generator(store: Arc<dyn Store>, generator: TokenGenerator) -> Self {
        Self { store, generator }
    }

    /// 生成推荐令牌
    pub async fn generate_token(
        &self,
        caps: &Capabilities,
        hints: NameHints,
    ) -> Result<ReferralTokenView> {
        let creator_id = caps.require_referral_creation()?;

        let mut errors = Vec::new();
        let first_name = clean_name("first_name", hints.first_name.as_deref(), NAME_HINT_MAX_LEN, false)
            .unwrap_or_else(|e| {
                errors.push(e);
                None
            });
        let last_name = clean_name("last_name", hints.last_name.as_deref(), NAME_HINT_MAX_LEN, false)
            .unwrap_or_else(|e| {
                errors.push(e);
                None
            });
        if !errors.is_empty() {
            return Err(IvfError::Validation(errors));
        }

        for attempt in 1..=MAX_TOKEN_ATTEMPTS {
            let candidate = NewReferralToken {
                creator_id,
                token: (self.generator)(),
                first_name: first_name.clone(),
                last_name: last_name.clone(),
            };

            match self.store.insert_referral_token(&candidate).await {
                Ok(view) => {
                    info!("Referral token {} created by profile {}", view.id, creator_id);
                    return Ok(view);
                }
                Err(IvfError::Conflict(constraint)) if constraint == TOKEN_VALUE_CONSTRAINT => {
                    warn!(
                        "Referral token collision (attempt {}/{})",
                        attempt, MAX_TOKEN_ATTEMPTS
                    );
                }
                Err(e) => return Err(e),
            }
        }

        Err(IvfError::Internal(format!(
            "Could not generate a unique referral token after {} attempts",
            MAX_TOKEN_ATTEMPTS
        )))
    }

    /// 按令牌值查找；格式不符的值不查询存储
    async fn find_token(&self, token: &str) -> Result<Option<ReferralTokenView>> {
        if !is_referral_token_format(token) {
            return Ok(None);
        }
        self.store.get_referral_token(token).await
    }

    /// 按令牌值查询公开视图，任何调用方可用
    pub async fn resolve_token(&self, token: &str) -> Result<PublicReferralToken> {
        self.find_token(token)
            .await?
            .map(PublicReferralToken::from)
            .ok_or_else(|| IvfError::NotFound("Referral token not found.".to_string()))
    }

    /// 按令牌值查询详情
    pub async fn token_detail(&self, caps: &Capabilities, token: &str) -> Result<TokenDetail> {
        let view = self
            .find_token(token)
            .await?
            .ok_or_else(|| IvfError::NotFound("Referral token not found.".to_string()))?;

        if caps.profile_id.is_some() && caps.referral_tokens.permits(view.creator.id) {
            Ok(TokenDetail::Full(view))
        } else {
            Ok(TokenDetail::Public(view.into()))
        }
    }

    pub async fn list_tokens(
        &self,
        caps: &Capabilities,
        query: &ReferralQuery,
        page: PageRequest,
    ) -> Result<Page<ReferralTokenView>> {
        let scope = caps.referral_token_scope()?;
        let filter = TokenFilter {
            creator_id: scope.owner_filter(),
            token_contains: query.token_contains(),
            created: query.created(),
        };

        self.store
            .list_referral_tokens(&filter, page)
            .await?
            .ensure_in_range()
    }

    /// 删除令牌，其推荐关系随之删除
    pub async fn delete_token(&self, caps: &Capabilities, token: &str) -> Result<()> {
        let scope = caps.referral_token_scope()?;
        let view = self
            .find_token(token)
            .await?
            .ok_or_else(|| IvfError::NotFound("Referral token not found.".to_string()))?;
        scope.ensure_visible(view.creator.id, "Referral token")?;

        self.store.delete_referral_token(view.id).await?;
        info!("Referral token {} deleted", view.id);
        Ok(())
    }

    pub async fn list_relationships(
        &self,
        caps: &Capabilities,
        query: &ReferralQuery,
        page: PageRequest,
    ) -> Result<Page<ReferralRelationshipView>> {
        let scope = caps.referral_relationship_scope()?;
        let filter = RelationshipFilter {
            referrer_id: scope.owner_filter(),
            token_contains: query.token_contains(),
            created: query.created(),
        };

        self.store
            .list_relationships(&filter, page)
            .await?
            .ensure_in_range()
    }

    /// 按令牌值查询推荐关系；调用方不是推荐人时返回 NotFound
    pub async fn get_relationship(
        &self,
        caps: &Capabilities,
        token: &str,
    ) -> Result<ReferralRelationshipView> {
        let scope = caps.referral_relationship_scope()?;
        let not_found = || IvfError::NotFound("Referral relationship not found.".to_string());
        if !is_referral_token_format(token) {
            return Err(not_found());
        }
        let view = self
            .store
            .get_relationship_by_token(token)
            .await?
            .ok_or_else(not_found)?;
        scope.ensure_visible(view.referrer.id, "Referral relationship")?;
        Ok(view)
    }

    /// 兑换令牌并创建账户
    ///
    /// 账户、档案与推荐关系在同一事务中创建；任何一步失败都不留下记录。
    pub async fn redeem(&self, token: &str, mut account: NewAccount) -> Result<CreatedAccount> {
        let view = self
            .find_token(token.trim())
            .await?
            .ok_or_else(|| IvfError::validation("referral_token", TOKEN_NOT_VALID))?;

        if self.store.relationship_exists_for_token(view.id).await? {
            return Err(IvfError::validation("referral_token", TOKEN_ALREADY_USED));
        }

        if account.first_name.is_empty() {
            account.first_name = view.first_name.clone().unwrap_or_default();
        }
        if account.last_name.is_empty() {
            account.last_name = view.last_name.clone().unwrap_or_default();
        }

        let created = self
            .store
            .create_account(&account, Some(view.id))
            .await
            .map_err(|e| match e {
                IvfError::NotFound(_) => IvfError::validation("referral_token", TOKEN_NOT_VALID),
                IvfError::Conflict(c) if c == RELATIONSHIP_TOKEN_CONSTRAINT => {
                    IvfError::validation("referral_token", TOKEN_ALREADY_USED)
                }
                other => other,
            })?;

        info!(
            "Referral token {} redeemed by profile {}",
            view.id, created.profile.id
        );
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ivf_core::{Caller, Role, ScopeResolver};
    use ivf_database::MemoryStore;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn account(store: &Arc<dyn Store>, email: &str, role: Role) -> Capabilities {
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

    fn new_patient(email: &str) -> NewAccount {
        NewAccount {
            email: email.to_string(),
            password_hash: "x".to_string(),
            role: Role::Patient,
            is_active: false,
            is_staff: false,
            is_superuser: false,
            first_name: String::new(),
            last_name: String::new(),
        }
    }

    fn store() -> Arc<dyn Store> {
        Arc::new(MemoryStore::new())
    }

    #[tokio::test]
    async fn test_patient_cannot_generate() {
        let store = store();
        let patient = account(&store, "p@b.org", Role::Patient).await;
        let engine = ReferralEngine::new(store);

        let err = engine
            .generate_token(&patient, NameHints::default())
            .await
            .unwrap_err();
        assert!(matches!(err, IvfError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn test_concurrent_generation_is_unique() {
        let store = store();
        let doctor = account(&store, "d@b.org", Role::Doctor).await;
        let engine = Arc::new(ReferralEngine::new(store));

        let handles: Vec<_> = (0..32)
            .map(|_| {
                let engine = engine.clone();
                let doctor = doctor.clone();
                tokio::spawn(async move {
                    engine
                        .generate_token(&doctor, NameHints::default())
                        .await
                        .unwrap()
                        .token
                })
            })
            .collect();

        let mut tokens = HashSet::new();
        for handle in handles {
            let token = handle.await.unwrap();
            assert_eq!(token.len(), ivf_core::utils::REFERRAL_TOKEN_LENGTH);
            tokens.insert(token);
        }
        assert_eq!(tokens.len(), 32);
    }

    #[tokio::test]
    async fn test_collision_is_retried() {
        let store = store();
        let doctor = account(&store, "d@b.org", Role::Doctor).await;

        // 前两次生成相同的值，第三次才不同
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let engine = ReferralEngine::with_generator(
            store,
            Arc::new(move || {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                if n < 2 { "a".repeat(32) } else { "b".repeat(32) }
            }),
        );

        let first = engine.generate_token(&doctor, NameHints::default()).await.unwrap();
        let second = engine.generate_token(&doctor, NameHints::default()).await.unwrap();
        assert_eq!(first.token, "a".repeat(32));
        assert_eq!(second.token, "b".repeat(32));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_is_bounded() {
        let store = store();
        let doctor = account(&store, "d@b.org", Role::Doctor).await;
        let engine = ReferralEngine::with_generator(store, Arc::new(|| "c".repeat(32)));

        engine.generate_token(&doctor, NameHints::default()).await.unwrap();
        let err = engine
            .generate_token(&doctor, NameHints::default())
            .await
            .unwrap_err();
        assert!(matches!(err, IvfError::Internal(_)));
    }

    #[tokio::test]
    async fn test_redeem_once() {
        let store = store();
        let doctor = account(&store, "d@b.org", Role::Doctor).await;
        let engine = ReferralEngine::new(store.clone());
        let token = engine
            .generate_token(
                &doctor,
                NameHints {
                    first_name: Some(" Jane ".to_string()),
                    last_name: Some("Roe".to_string()),
                },
            )
            .await
            .unwrap();

        let created = engine.redeem(&token.token, new_patient("p1@b.org")).await.unwrap();
        assert_eq!(created.profile.first_name, "Jane");
        assert_eq!(created.profile.last_name, "Roe");
        let relationship = created.relationship.unwrap();
        assert_eq!(Some(relationship.referrer_id), doctor.profile_id);

        let err = engine
            .redeem(&token.token, new_patient("p2@b.org"))
            .await
            .unwrap_err();
        assert_eq!(err.details()[0].message, TOKEN_ALREADY_USED);
        assert!(store.get_account_by_email("p2@b.org").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_redemption_creates_one_relationship() {
        let store = store();
        let doctor = account(&store, "d@b.org", Role::Doctor).await;
        let engine = Arc::new(ReferralEngine::new(store.clone()));
        let token = engine
            .generate_token(&doctor, NameHints::default())
            .await
            .unwrap()
            .token;

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let engine = engine.clone();
                let token = token.clone();
                tokio::spawn(async move {
                    engine
                        .redeem(&token, new_patient(&format!("p{}@b.org", i)))
                        .await
                        .is_ok()
                })
            })
            .collect();

        let mut successes = 0;
        for handle in handles {
            if handle.await.unwrap() {
                successes += 1;
            }
        }
        assert_eq!(successes, 1);

        let page = engine
            .list_relationships(&doctor, &ReferralQuery::default(), PageRequest::default())
            .await
            .unwrap();
        assert_eq!(page.total_objects, 1);
    }

    #[tokio::test]
    async fn test_unknown_token_is_not_valid() {
        let engine = ReferralEngine::new(store());
        let err = engine.redeem("missing", new_patient("p@b.org")).await.unwrap_err();
        assert!(matches!(&err, IvfError::Validation(e) if e[0].field == "referral_token"));
        assert_eq!(err.details()[0].message, TOKEN_NOT_VALID);

        let err = engine.resolve_token("missing").await.unwrap_err();
        assert!(matches!(err, IvfError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_malformed_token_skips_the_store() {
        let store = store();
        let doctor = account(&store, "d@b.org", Role::Doctor).await;
        // 直接写入存储的非法值：引擎不应按该值查到它
        store
            .insert_referral_token(&NewReferralToken {
                creator_id: doctor.profile_id.unwrap(),
                token: "short-token".to_string(),
                first_name: None,
                last_name: None,
            })
            .await
            .unwrap();
        let engine = ReferralEngine::new(store.clone());

        assert!(matches!(
            engine.resolve_token("short-token").await,
            Err(IvfError::NotFound(_))
        ));
        assert!(matches!(
            engine.token_detail(&doctor, "short-token").await,
            Err(IvfError::NotFound(_))
        ));
        assert!(matches!(
            engine.delete_token(&doctor, "short-token").await,
            Err(IvfError::NotFound(_))
        ));
        assert!(matches!(
            engine.get_relationship(&doctor, &"%".repeat(32)).await,
            Err(IvfError::NotFound(_))
        ));

        let err = engine
            .redeem("short-token", new_patient("p@b.org"))
            .await
            .unwrap_err();
        assert_eq!(err.details()[0].message, TOKEN_NOT_VALID);
        assert!(store.get_account_by_email("p@b.org").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_relationship_visible_to_referrer_only() {
        let store = store();
        let doctor = account(&store, "d@b.org", Role::Doctor).await;
        let other = account(&store, "o@b.org", Role::Doctor).await;
        let admin = account(&store, "root@b.org", Role::Superuser).await;
        let engine = ReferralEngine::new(store.clone());

        let token = engine
            .generate_token(&doctor, NameHints::default())
            .await
            .unwrap()
            .token;
        engine.redeem(&token, new_patient("p@b.org")).await.unwrap();

        assert!(engine.get_relationship(&doctor, &token).await.is_ok());
        assert!(engine.get_relationship(&admin, &token).await.is_ok());
        assert!(matches!(
            engine.get_relationship(&other, &token).await,
            Err(IvfError::NotFound(_))
        ));

        let listed = engine
            .list_relationships(&other, &ReferralQuery::default(), PageRequest::default())
            .await
            .unwrap();
        assert_eq!(listed.total_objects, 0);
    }

    #[tokio::test]
    async fn test_token_detail_and_delete() {
        let store = store();
        let doctor = account(&store, "d@b.org", Role::Doctor).await;
        let other = account(&store, "o@b.org", Role::Doctor).await;
        let engine = ReferralEngine::new(store.clone());
        let token = engine
            .generate_token(&doctor, NameHints::default())
            .await
            .unwrap()
            .token;

        assert!(matches!(
            engine.token_detail(&doctor, &token).await.unwrap(),
            TokenDetail::Full(_)
        ));
        let anonymous = ScopeResolver::new().resolve(&Caller::Anonymous);
        assert!(matches!(
            engine.token_detail(&anonymous, &token).await.unwrap(),
            TokenDetail::Public(_)
        ));

        assert!(matches!(
            engine.delete_token(&other, &token).await,
            Err(IvfError::NotFound(_))
        ));
        engine.delete_token(&doctor, &token).await.unwrap();
        assert!(engine.resolve_token(&token).await.is_err());
    }

    #[tokio::test]
    async fn test_list_filters_by_token_substring() {
        let store = store();
        let doctor = account(&store, "d@b.org", Role::Doctor).await;
        let engine = ReferralEngine::new(store);
        let token = engine
            .generate_token(&doctor, NameHints::default())
            .await
            .unwrap()
            .token;
        engine.generate_token(&doctor, NameHints::default()).await.unwrap();

        let query = ReferralQuery {
            token: Some(token[4..12].to_string()),
            ..Default::default()
        };
        let page = engine
            .list_tokens(&doctor, &query, PageRequest::default())
            .await
            .unwrap();
        assert_eq!(page.total_objects, 1);
        assert_eq!(page.items[0].token, token);
    }
}
