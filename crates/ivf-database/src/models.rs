//! 数据库模型

use chrono::{DateTime, Utc};
use ivf_core::models::*;
use ivf_core::{ClinicalFeatures, IvfError, Result};
use sqlx::FromRow;
use uuid::Uuid;

// 数据库表模型 - 使用FromRow trait用于SQL查询

/// 角色存储为字符串；无法识别的值视为数据损坏
fn parse_role(value: &str) -> Result<Role> {
    value
        .parse()
        .map_err(|_| IvfError::Database(format!("Unknown role '{}' in stored row", value)))
}

fn parse_owner_kind(value: &str) -> Result<OwnerKind> {
    OwnerKind::parse(value)
        .ok_or_else(|| IvfError::Database(format!("Unknown owner kind '{}' in stored row", value)))
}

/// 数据库账户表
#[derive(Debug, FromRow)]
pub struct DbAccount {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub is_active: bool,
    pub is_staff: bool,
    pub is_superuser: bool,
    pub role: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<DbAccount> for Account {
    type Error = IvfError;

    fn try_from(db_account: DbAccount) -> Result<Self> {
        Ok(Account {
            id: db_account.id,
            email: db_account.email,
            password_hash: db_account.password_hash,
            is_active: db_account.is_active,
            is_staff: db_account.is_staff,
            is_superuser: db_account.is_superuser,
            role: parse_role(&db_account.role)?,
            created_at: db_account.created_at,
            updated_at: db_account.updated_at,
        })
    }
}

/// 档案查询结果（关联账户表取邮箱与角色）
#[derive(Debug, FromRow)]
pub struct DbProfile {
    pub id: Uuid,
    pub account_id: Uuid,
    pub email: String,
    pub role: String,
    pub first_name: String,
    pub last_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<DbProfile> for Profile {
    type Error = IvfError;

    fn try_from(db_profile: DbProfile) -> Result<Self> {
        Ok(Profile {
            id: db_profile.id,
            account_id: db_profile.account_id,
            email: db_profile.email,
            role: parse_role(&db_profile.role)?,
            first_name: db_profile.first_name,
            last_name: db_profile.last_name,
            created_at: db_profile.created_at,
            updated_at: db_profile.updated_at,
        })
    }
}

/// 数据库会话表
#[derive(Debug, FromRow)]
pub struct DbSession {
    pub token_hash: String,
    pub account_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl From<DbSession> for Session {
    fn from(db_session: DbSession) -> Self {
        Session {
            token_hash: db_session.token_hash,
            account_id: db_session.account_id,
            created_at: db_session.created_at,
            expires_at: db_session.expires_at,
        }
    }
}

/// 推荐令牌查询结果（关联创建者档案）
#[derive(Debug, FromRow)]
pub struct DbReferralToken {
    pub id: Uuid,
    pub token: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub creator_id: Uuid,
    pub creator_email: String,
    pub creator_role: String,
    pub creator_first_name: String,
    pub creator_last_name: String,
}

impl TryFrom<DbReferralToken> for ReferralTokenView {
    type Error = IvfError;

    fn try_from(db_token: DbReferralToken) -> Result<Self> {
        Ok(ReferralTokenView {
            id: db_token.id,
            creator: ProfileSummary {
                id: db_token.creator_id,
                email: db_token.creator_email,
                role: parse_role(&db_token.creator_role)?,
                first_name: db_token.creator_first_name,
                last_name: db_token.creator_last_name,
            },
            token: db_token.token,
            first_name: db_token.first_name,
            last_name: db_token.last_name,
            created_at: db_token.created_at,
        })
    }
}

/// 推荐关系查询结果；被推荐人相关列来自 LEFT JOIN，可能为空
#[derive(Debug, FromRow)]
pub struct DbReferralRelationship {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub referrer_id: Uuid,
    pub referrer_email: String,
    pub referrer_role: String,
    pub referrer_first_name: String,
    pub referrer_last_name: String,
    pub referred_id: Option<Uuid>,
    pub referred_email: Option<String>,
    pub referred_role: Option<String>,
    pub referred_first_name: Option<String>,
    pub referred_last_name: Option<String>,
    pub token_id: Uuid,
    pub token: String,
    pub token_created_at: DateTime<Utc>,
}

impl TryFrom<DbReferralRelationship> for ReferralRelationshipView {
    type Error = IvfError;

    fn try_from(row: DbReferralRelationship) -> Result<Self> {
        let referred = match (row.referred_id, row.referred_email) {
            (Some(id), Some(email)) => Some(ProfileSummary {
                id,
                email,
                role: parse_role(row.referred_role.as_deref().unwrap_or_default())?,
                first_name: row.referred_first_name.unwrap_or_default(),
                last_name: row.referred_last_name.unwrap_or_default(),
            }),
            _ => None,
        };

        Ok(ReferralRelationshipView {
            id: row.id,
            referrer: ProfileSummary {
                id: row.referrer_id,
                email: row.referrer_email,
                role: parse_role(&row.referrer_role)?,
                first_name: row.referrer_first_name,
                last_name: row.referrer_last_name,
            },
            referred,
            token: TokenSummary {
                id: row.token_id,
                token: row.token,
                created_at: row.token_created_at,
            },
            created_at: row.created_at,
        })
    }
}

/// 数据库患者表
#[derive(Debug, FromRow)]
pub struct DbPatient {
    pub id: Uuid,
    pub manager_id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<DbPatient> for Patient {
    fn from(db_patient: DbPatient) -> Self {
        Patient {
            id: db_patient.id,
            manager_id: db_patient.manager_id,
            first_name: db_patient.first_name,
            last_name: db_patient.last_name,
            created_at: db_patient.created_at,
            updated_at: db_patient.updated_at,
        }
    }
}

/// 数据库预测记录表
#[derive(Debug, FromRow)]
pub struct DbPrediction {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub owner_kind: String,
    pub patient_id: Option<Uuid>,
    pub female_age: i32,
    pub amh: f64,
    pub fsh: f64,
    pub no_embryos: i32,
    pub endometrial_thickness: f64,
    pub sperm_count: f64,
    pub sperm_morphology: i32,
    pub follicle_size: i32,
    pub retrieved_oocytes: i32,
    pub embryo_quality: i32,
    pub oocytes_mi: i32,
    pub oocytes_mii: i32,
    pub result: i32,
    pub probability: Option<f64>,
    pub model_version: String,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<DbPrediction> for PredictionRecord {
    type Error = IvfError;

    fn try_from(row: DbPrediction) -> Result<Self> {
        Ok(PredictionRecord {
            id: row.id,
            owner_id: row.owner_id,
            owner_kind: parse_owner_kind(&row.owner_kind)?,
            patient_id: row.patient_id,
            features: ClinicalFeatures {
                female_age: row.female_age,
                amh: row.amh,
                fsh: row.fsh,
                no_embryos: row.no_embryos,
                endometrial_thickness: row.endometrial_thickness,
                sperm_count: row.sperm_count,
                sperm_morphology: row.sperm_morphology,
                follicle_size: row.follicle_size,
                retrieved_oocytes: row.retrieved_oocytes,
                embryo_quality: row.embryo_quality,
                oocytes_mi: row.oocytes_mi,
                oocytes_mii: row.oocytes_mii,
            },
            result: row.result,
            probability: row.probability,
            model_version: row.model_version,
            created_at: row.created_at,
        })
    }
}

// 插入模型 - 用于创建新记录

/// 新账户插入模型，档案随账户一起创建
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub is_active: bool,
    pub is_staff: bool,
    pub is_superuser: bool,
    pub first_name: String,
    pub last_name: String,
}

/// 账户创建结果
#[derive(Debug, Clone)]
pub struct CreatedAccount {
    pub account: Account,
    pub profile: Profile,
    pub relationship: Option<ReferralRelationship>,
}

/// 新推荐令牌插入模型
#[derive(Debug, Clone)]
pub struct NewReferralToken {
    pub creator_id: Uuid,
    pub token: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

/// 新患者插入模型
#[derive(Debug, Clone)]
pub struct NewPatient {
    pub manager_id: Uuid,
    pub first_name: String,
    pub last_name: String,
}

/// 患者更新模型，`None` 表示不修改
#[derive(Debug, Clone, Default)]
pub struct PatientUpdate {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

/// 新预测记录插入模型，结果由服务端计算
#[derive(Debug, Clone)]
pub struct NewPrediction {
    pub owner_id: Uuid,
    pub owner_kind: OwnerKind,
    pub patient_id: Option<Uuid>,
    pub features: ClinicalFeatures,
    pub result: i32,
    pub probability: Option<f64>,
    pub model_version: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account_row(role: &str) -> DbAccount {
        let now = Utc::now();
        DbAccount {
            id: Uuid::new_v4(),
            email: "d@clinic.org".to_string(),
            password_hash: "x".to_string(),
            is_active: true,
            is_staff: false,
            is_superuser: false,
            role: role.to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    fn prediction_row(owner_kind: &str) -> DbPrediction {
        DbPrediction {
            id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            owner_kind: owner_kind.to_string(),
            patient_id: None,
            female_age: 30,
            amh: 2.0,
            fsh: 6.5,
            no_embryos: 2,
            endometrial_thickness: 9.0,
            sperm_count: 40.0,
            sperm_morphology: 5,
            follicle_size: 18,
            retrieved_oocytes: 10,
            embryo_quality: 3,
            oocytes_mi: 2,
            oocytes_mii: 8,
            result: 1,
            probability: Some(0.7),
            model_version: "test".to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_account_row_with_known_role() {
        let account = Account::try_from(account_row("doctor")).unwrap();
        assert_eq!(account.role, Role::Doctor);
    }

    #[test]
    fn test_unknown_role_is_a_database_error() {
        let err = Account::try_from(account_row("janitor")).unwrap_err();
        assert!(matches!(err, IvfError::Database(ref m) if m.contains("janitor")));
    }

    #[test]
    fn test_unknown_owner_kind_is_a_database_error() {
        assert_eq!(
            PredictionRecord::try_from(prediction_row("DOCTOR"))
                .unwrap()
                .owner_kind,
            OwnerKind::DoctorAuthored
        );

        let err = PredictionRecord::try_from(prediction_row("NURSE")).unwrap_err();
        assert!(matches!(err, IvfError::Database(_)));
    }
}
