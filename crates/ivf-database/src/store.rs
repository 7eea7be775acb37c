//! 存储接口

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ivf_core::{
    Account, Page, PageRequest, Patient, PredictionRecord, Profile, ReferralRelationshipView,
    ReferralTokenView, Result, Session,
};
use uuid::Uuid;

use crate::models::{
    CreatedAccount, NewAccount, NewPatient, NewPrediction, NewReferralToken, PatientUpdate,
};

/// 邮箱唯一约束
pub const EMAIL_CONSTRAINT: &str = "accounts_email_key";
/// 令牌值唯一约束
pub const TOKEN_VALUE_CONSTRAINT: &str = "referral_tokens_token_key";
/// 每个令牌至多一条推荐关系
pub const RELATIONSHIP_TOKEN_CONSTRAINT: &str = "referral_relationships_token_id_key";

/// 创建时间范围过滤
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CreatedRange {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl CreatedRange {
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.from.map_or(true, |from| at >= from) && self.to.map_or(true, |to| at <= to)
    }
}

/// 推荐令牌列表过滤条件
#[derive(Debug, Clone, Default)]
pub struct TokenFilter {
    pub creator_id: Option<Uuid>,
    pub token_contains: Option<String>,
    pub created: CreatedRange,
}

/// 推荐关系列表过滤条件
#[derive(Debug, Clone, Default)]
pub struct RelationshipFilter {
    pub referrer_id: Option<Uuid>,
    pub token_contains: Option<String>,
    pub created: CreatedRange,
}

/// 预测记录列表过滤条件
#[derive(Debug, Clone, Default)]
pub struct PredictionFilter {
    pub owner_id: Option<Uuid>,
    pub result: Option<i32>,
    pub created: CreatedRange,
}

/// 持久化接口
///
/// 唯一约束冲突统一返回 `IvfError::Conflict(约束名)`，约束名见本模块常量；
/// 删除或更新不存在的记录返回 `IvfError::NotFound`。
#[async_trait]
pub trait Store: Send + Sync {
    async fn ping(&self) -> Result<()>;

    // ========== 账户与档案 ==========

    /// 在同一事务中创建账户、档案，以及（可选的）推荐关系
    ///
    /// 令牌已被删除时返回 `NotFound`；令牌已被使用时返回
    /// `Conflict(RELATIONSHIP_TOKEN_CONSTRAINT)`，且不会留下账户。
    async fn create_account(
        &self,
        account: &NewAccount,
        referral_token_id: Option<Uuid>,
    ) -> Result<CreatedAccount>;

    async fn get_account(&self, id: Uuid) -> Result<Option<Account>>;

    async fn get_account_by_email(&self, email: &str) -> Result<Option<Account>>;

    async fn set_account_active(&self, id: Uuid, active: bool) -> Result<Account>;

    async fn set_password_hash(&self, id: Uuid, password_hash: &str) -> Result<()>;

    /// 删除账户并级联删除档案及其拥有的全部记录
    async fn delete_account(&self, id: Uuid) -> Result<()>;

    async fn get_profile(&self, id: Uuid) -> Result<Option<Profile>>;

    async fn get_profile_by_account(&self, account_id: Uuid) -> Result<Option<Profile>>;

    async fn update_profile_names(
        &self,
        profile_id: Uuid,
        first_name: Option<String>,
        last_name: Option<String>,
    ) -> Result<Profile>;

    // ========== 会话 ==========

    async fn create_session(&self, session: &Session) -> Result<()>;

    async fn get_session(&self, token_hash: &str) -> Result<Option<Session>>;

    async fn delete_session(&self, token_hash: &str) -> Result<()>;

    /// 删除账户的全部会话，`keep` 指定的会话除外；返回删除数量
    async fn delete_account_sessions(&self, account_id: Uuid, keep: Option<&str>) -> Result<u64>;

    /// 删除在 `now` 之前已过期的会话
    async fn delete_expired_sessions(&self, now: DateTime<Utc>) -> Result<u64>;

    // ========== 推荐令牌与关系 ==========

    /// 插入令牌；令牌值重复时返回 `Conflict(TOKEN_VALUE_CONSTRAINT)`
    async fn insert_referral_token(&self, token: &NewReferralToken) -> Result<ReferralTokenView>;

    async fn get_referral_token(&self, token: &str) -> Result<Option<ReferralTokenView>>;

    async fn list_referral_tokens(
        &self,
        filter: &TokenFilter,
        page: PageRequest,
    ) -> Result<Page<ReferralTokenView>>;

    async fn delete_referral_token(&self, id: Uuid) -> Result<()>;

    async fn relationship_exists_for_token(&self, token_id: Uuid) -> Result<bool>;

    async fn get_relationship_by_token(&self, token: &str)
        -> Result<Option<ReferralRelationshipView>>;

    async fn list_relationships(
        &self,
        filter: &RelationshipFilter,
        page: PageRequest,
    ) -> Result<Page<ReferralRelationshipView>>;

    // ========== 患者 ==========

    async fn insert_patient(&self, patient: &NewPatient) -> Result<Patient>;

    async fn get_patient(&self, id: Uuid) -> Result<Option<Patient>>;

    async fn list_patients(&self, manager_id: Option<Uuid>, page: PageRequest)
        -> Result<Page<Patient>>;

    async fn update_patient(&self, id: Uuid, update: &PatientUpdate) -> Result<Patient>;

    async fn delete_patient(&self, id: Uuid) -> Result<()>;

    // ========== 预测记录 ==========

    async fn insert_prediction(&self, prediction: &NewPrediction) -> Result<PredictionRecord>;

    async fn get_prediction(&self, id: Uuid) -> Result<Option<PredictionRecord>>;

    async fn list_predictions(
        &self,
        filter: &PredictionFilter,
        page: PageRequest,
    ) -> Result<Page<PredictionRecord>>;

    async fn delete_prediction(&self, id: Uuid) -> Result<()>;
}

/// 不区分大小写的子串匹配
pub(crate) fn contains_ignore_case(haystack: &str, needle: Option<&str>) -> bool {
    match needle {
        Some(needle) => haystack.to_lowercase().contains(&needle.to_lowercase()),
        None => true,
    }
}
