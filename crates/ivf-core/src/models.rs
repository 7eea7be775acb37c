//! 核心数据模型定义

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::IvfError;
use crate::features::ClinicalFeatures;

/// 账户角色
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// 患者（自助用户）
    #[serde(alias = "client")]
    Patient,
    /// 医生
    Doctor,
    /// 超级用户
    Superuser,
    /// 管理员
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Patient => "patient",
            Role::Doctor => "doctor",
            Role::Superuser => "superuser",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = IvfError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "patient" | "client" => Ok(Role::Patient),
            "doctor" => Ok(Role::Doctor),
            "superuser" => Ok(Role::Superuser),
            "admin" => Ok(Role::Admin),
            other => Err(IvfError::validation(
                "role",
                format!("\"{}\" is not a valid role.", other),
            )),
        }
    }
}

/// 登录账户
#[derive(Debug, Clone, Serialize)]
pub struct Account {
    pub id: Uuid,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub is_active: bool,
    pub is_staff: bool,
    pub is_superuser: bool,
    pub role: Role,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 用户档案，与账户一对一；角色始终取自账户
#[derive(Debug, Clone, Serialize)]
pub struct Profile {
    pub id: Uuid,
    pub account_id: Uuid,
    pub email: String,
    pub role: Role,
    pub first_name: String,
    pub last_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Profile {
    pub fn summary(&self) -> ProfileSummary {
        ProfileSummary {
            id: self.id,
            email: self.email.clone(),
            role: self.role,
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
        }
    }
}

/// 嵌入在其他记录中的档案摘要
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProfileSummary {
    pub id: Uuid,
    pub email: String,
    pub role: Role,
    pub first_name: String,
    pub last_name: String,
}

/// 推荐令牌
#[derive(Debug, Clone, Serialize)]
pub struct ReferralToken {
    pub id: Uuid,
    pub creator_id: Uuid,
    pub token: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// 推荐令牌详情（创建者视图）
#[derive(Debug, Clone, Serialize)]
pub struct ReferralTokenView {
    pub id: Uuid,
    pub creator: ProfileSummary,
    pub token: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// 匿名可见的推荐令牌，只包含创建者和姓名提示
#[derive(Debug, Clone, Serialize)]
pub struct PublicReferralToken {
    pub creator: ProfileSummary,
    pub token: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<ReferralTokenView> for PublicReferralToken {
    fn from(view: ReferralTokenView) -> Self {
        Self {
            creator: view.creator,
            token: view.token,
            first_name: view.first_name,
            last_name: view.last_name,
            created_at: view.created_at,
        }
    }
}

/// 推荐关系：推荐人 → 被推荐人
#[derive(Debug, Clone, Serialize)]
pub struct ReferralRelationship {
    pub id: Uuid,
    pub referrer_id: Uuid,
    pub referred_id: Option<Uuid>,
    pub token_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// 关系中引用的令牌摘要
#[derive(Debug, Clone, Serialize)]
pub struct TokenSummary {
    pub id: Uuid,
    pub token: String,
    pub created_at: DateTime<Utc>,
}

/// 推荐关系详情
#[derive(Debug, Clone, Serialize)]
pub struct ReferralRelationshipView {
    pub id: Uuid,
    pub referrer: ProfileSummary,
    pub referred: Option<ProfileSummary>,
    pub token: TokenSummary,
    pub created_at: DateTime<Utc>,
}

/// 医生管理的患者记录
#[derive(Debug, Clone, Serialize)]
pub struct Patient {
    pub id: Uuid,
    pub manager_id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 预测记录的归属类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OwnerKind {
    /// 患者本人提交
    SelfReported,
    /// 医生为其管理的患者提交
    DoctorAuthored,
}

impl OwnerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OwnerKind::SelfReported => "SELF",
            OwnerKind::DoctorAuthored => "DOCTOR",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "SELF" => Some(OwnerKind::SelfReported),
            "DOCTOR" => Some(OwnerKind::DoctorAuthored),
            _ => None,
        }
    }
}

/// 预测记录，创建后不可修改
#[derive(Debug, Clone, Serialize)]
pub struct PredictionRecord {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub owner_kind: OwnerKind,
    pub patient_id: Option<Uuid>,
    #[serde(flatten)]
    pub features: ClinicalFeatures,
    pub result: i32,
    pub probability: Option<f64>,
    pub model_version: String,
    pub created_at: DateTime<Utc>,
}

/// 登录会话（只保存令牌摘要）
#[derive(Debug, Clone)]
pub struct Session {
    pub token_hash: String,
    pub account_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parsing() {
        assert_eq!("doctor".parse::<Role>().unwrap(), Role::Doctor);
        assert_eq!("Client".parse::<Role>().unwrap(), Role::Patient);
        assert!("nurse".parse::<Role>().is_err());
    }

    #[test]
    fn test_role_serde_accepts_client_alias() {
        let role: Role = serde_json::from_str("\"client\"").unwrap();
        assert_eq!(role, Role::Patient);
        assert_eq!(serde_json::to_string(&Role::Superuser).unwrap(), "\"superuser\"");
    }

    #[test]
    fn test_owner_kind_codes() {
        for kind in [OwnerKind::SelfReported, OwnerKind::DoctorAuthored] {
            assert_eq!(OwnerKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(OwnerKind::parse("CLIENT"), None);
    }
}
