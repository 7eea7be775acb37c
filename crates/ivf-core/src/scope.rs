//! 访问范围解析
//!
//! 每个请求只解析一次调用方的角色，得到一份 [`Capabilities`]。
//! 各业务操作只查询这份能力集，不再各自判断角色。
//!
//! 规则：
//! - 实体类型整体不可访问时返回 `PermissionDenied`
//! - 实体类型可访问、但具体记录不在范围内时返回 `NotFound`，不泄露记录是否存在

use uuid::Uuid;

use crate::error::{IvfError, Result};
use crate::models::{Account, OwnerKind, Profile, Role};

const REFERRAL_ROLE_DENIED: &str =
    "Access denied. Invalid user type, you must be a doctor or superuser.";
const PATIENT_ROLE_DENIED: &str = "Access denied: you must be a doctor to manage patients.";

/// 请求的调用方
#[derive(Debug, Clone)]
pub enum Caller {
    Anonymous,
    Authenticated {
        account: Account,
        profile: Option<Profile>,
    },
}

impl Caller {
    pub fn authenticated(account: Account, profile: Option<Profile>) -> Self {
        Caller::Authenticated { account, profile }
    }

    pub fn account(&self) -> Option<&Account> {
        match self {
            Caller::Anonymous => None,
            Caller::Authenticated { account, .. } => Some(account),
        }
    }

    pub fn profile(&self) -> Option<&Profile> {
        match self {
            Caller::Anonymous => None,
            Caller::Authenticated { profile, .. } => profile.as_ref(),
        }
    }
}

/// 某类记录的可见范围
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordScope {
    /// 全部记录
    All,
    /// 仅指定档案拥有的记录
    OwnedBy(Uuid),
    /// 无权访问该类记录
    Nothing,
}

impl RecordScope {
    /// 用于存储层查询的归属过滤条件，`None` 表示不过滤
    pub fn owner_filter(&self) -> Option<Uuid> {
        match self {
            RecordScope::OwnedBy(owner) => Some(*owner),
            RecordScope::All | RecordScope::Nothing => None,
        }
    }

    /// 该类记录是否可访问
    pub fn is_accessible(&self) -> bool {
        !matches!(self, RecordScope::Nothing)
    }

    pub fn permits(&self, owner: Uuid) -> bool {
        match self {
            RecordScope::All => true,
            RecordScope::OwnedBy(id) => *id == owner,
            RecordScope::Nothing => false,
        }
    }

    /// 范围为空时以 `PermissionDenied` 拒绝
    pub fn require_accessible(&self, message: &str) -> Result<&Self> {
        if self.is_accessible() {
            Ok(self)
        } else {
            Err(IvfError::PermissionDenied(message.to_string()))
        }
    }

    /// 单条记录不在范围内时以 `NotFound` 拒绝
    pub fn ensure_visible(&self, owner: Uuid, what: &str) -> Result<()> {
        if self.permits(owner) {
            Ok(())
        } else {
            Err(IvfError::NotFound(format!("{} not found.", what)))
        }
    }
}

/// 调用方的能力集
#[derive(Debug, Clone)]
pub struct Capabilities {
    pub role: Option<Role>,
    pub account_id: Option<Uuid>,
    pub profile_id: Option<Uuid>,
    pub referral_tokens: RecordScope,
    pub referral_relationships: RecordScope,
    pub patients: RecordScope,
    pub predictions: RecordScope,
    /// 可创建的预测类型，`None` 表示不能创建
    pub prediction_authoring: Option<OwnerKind>,
    pub can_create_referrals: bool,
    pub can_manage_patients: bool,
    pub can_edit_profile_names: bool,
    pub can_activate_accounts: bool,
}

impl Capabilities {
    fn nothing() -> Self {
        Self {
            role: None,
            account_id: None,
            profile_id: None,
            referral_tokens: RecordScope::Nothing,
            referral_relationships: RecordScope::Nothing,
            patients: RecordScope::Nothing,
            predictions: RecordScope::Nothing,
            prediction_authoring: None,
            can_create_referrals: false,
            can_manage_patients: false,
            can_edit_profile_names: false,
            can_activate_accounts: false,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.account_id.is_some()
    }

    pub fn require_authenticated(&self) -> Result<Uuid> {
        self.account_id.ok_or_else(|| {
            IvfError::Unauthenticated("Authentication credentials were not provided.".to_string())
        })
    }

    /// 调用方的档案ID；已认证但没有档案时返回 NotFound
    pub fn require_profile(&self) -> Result<Uuid> {
        self.require_authenticated()?;
        self.profile_id
            .ok_or_else(|| IvfError::NotFound("Profile does not exist for this user.".to_string()))
    }

    pub fn require_referral_creation(&self) -> Result<Uuid> {
        let profile_id = self.require_profile()?;
        if !self.can_create_referrals {
            return Err(IvfError::PermissionDenied(REFERRAL_ROLE_DENIED.to_string()));
        }
        Ok(profile_id)
    }

    pub fn require_patient_management(&self) -> Result<Uuid> {
        let profile_id = self.require_profile()?;
        if !self.can_manage_patients {
            return Err(IvfError::PermissionDenied(PATIENT_ROLE_DENIED.to_string()));
        }
        Ok(profile_id)
    }

    pub fn referral_token_scope(&self) -> Result<RecordScope> {
        self.require_profile()?;
        self.referral_tokens
            .require_accessible(REFERRAL_ROLE_DENIED)
            .copied()
    }

    pub fn referral_relationship_scope(&self) -> Result<RecordScope> {
        self.require_profile()?;
        self.referral_relationships
            .require_accessible(REFERRAL_ROLE_DENIED)
            .copied()
    }

    pub fn patient_scope(&self) -> Result<RecordScope> {
        self.require_profile()?;
        self.patients.require_accessible(PATIENT_ROLE_DENIED).copied()
    }

    pub fn prediction_scope(&self) -> Result<RecordScope> {
        self.require_profile()?;
        self.predictions
            .require_accessible("Access denied: predictions are not available for this user.")
            .copied()
    }
}

/// 访问范围解析器，无状态、无副作用
#[derive(Debug, Clone, Copy, Default)]
pub struct ScopeResolver;

impl ScopeResolver {
    pub fn new() -> Self {
        Self
    }

    /// 计算调用方的能力集；未激活账户视同匿名
    pub fn resolve(&self, caller: &Caller) -> Capabilities {
        let (account, profile) = match caller {
            Caller::Authenticated { account, profile } if account.is_active => {
                (account, profile.as_ref())
            }
            _ => return Capabilities::nothing(),
        };

        let role = account.role;
        let mut caps = Capabilities {
            role: Some(role),
            account_id: Some(account.id),
            profile_id: profile.map(|p| p.id),
            ..Capabilities::nothing()
        };

        let Some(profile_id) = caps.profile_id else {
            return caps;
        };
        let own = RecordScope::OwnedBy(profile_id);

        match role {
            Role::Superuser => {
                caps.referral_tokens = RecordScope::All;
                caps.referral_relationships = RecordScope::All;
                caps.patients = RecordScope::All;
                caps.predictions = RecordScope::All;
                caps.prediction_authoring = Some(OwnerKind::DoctorAuthored);
                caps.can_create_referrals = true;
                caps.can_manage_patients = true;
                caps.can_edit_profile_names = true;
                caps.can_activate_accounts = true;
            }
            Role::Doctor => {
                caps.referral_tokens = own;
                caps.referral_relationships = own;
                caps.patients = own;
                caps.predictions = own;
                caps.prediction_authoring = Some(OwnerKind::DoctorAuthored);
                caps.can_create_referrals = true;
                caps.can_manage_patients = true;
                caps.can_edit_profile_names = true;
            }
            Role::Admin => {
                caps.predictions = own;
                caps.prediction_authoring = Some(OwnerKind::SelfReported);
                caps.can_edit_profile_names = true;
                caps.can_activate_accounts = true;
            }
            Role::Patient => {
                caps.predictions = own;
                caps.prediction_authoring = Some(OwnerKind::SelfReported);
            }
        }

        caps
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn caller(role: Role, active: bool) -> (Caller, Uuid) {
        let now = Utc::now();
        let account = Account {
            id: Uuid::new_v4(),
            email: format!("{}@example.com", role),
            password_hash: String::new(),
            is_active: active,
            is_staff: false,
            is_superuser: role == Role::Superuser,
            role,
            created_at: now,
            updated_at: now,
        };
        let profile = Profile {
            id: Uuid::new_v4(),
            account_id: account.id,
            email: account.email.clone(),
            role,
            first_name: String::new(),
            last_name: String::new(),
            created_at: now,
            updated_at: now,
        };
        let profile_id = profile.id;
        (Caller::authenticated(account, Some(profile)), profile_id)
    }

    #[test]
    fn test_doctor_scopes_are_owned() {
        let (caller, profile_id) = caller(Role::Doctor, true);
        let caps = ScopeResolver::new().resolve(&caller);

        assert_eq!(caps.referral_token_scope().unwrap(), RecordScope::OwnedBy(profile_id));
        assert_eq!(caps.patient_scope().unwrap(), RecordScope::OwnedBy(profile_id));
        assert_eq!(caps.prediction_authoring, Some(OwnerKind::DoctorAuthored));
        assert_eq!(caps.require_referral_creation().unwrap(), profile_id);
        assert!(!caps.can_activate_accounts);
    }

    #[test]
    fn test_superuser_sees_everything() {
        let (caller, _) = caller(Role::Superuser, true);
        let caps = ScopeResolver::new().resolve(&caller);

        assert_eq!(caps.referral_relationships, RecordScope::All);
        assert_eq!(caps.predictions, RecordScope::All);
        assert!(caps.predictions.permits(Uuid::new_v4()));
    }

    #[test]
    fn test_patient_is_denied_referrals_and_patients() {
        let (caller, profile_id) = caller(Role::Patient, true);
        let caps = ScopeResolver::new().resolve(&caller);

        assert!(matches!(
            caps.referral_token_scope(),
            Err(IvfError::PermissionDenied(_))
        ));
        assert!(matches!(
            caps.require_patient_management(),
            Err(IvfError::PermissionDenied(_))
        ));
        assert_eq!(caps.prediction_scope().unwrap(), RecordScope::OwnedBy(profile_id));
        assert!(!caps.can_edit_profile_names);
    }

    #[test]
    fn test_anonymous_and_inactive_have_no_scope() {
        let resolver = ScopeResolver::new();
        let anonymous = resolver.resolve(&Caller::Anonymous);
        assert!(matches!(
            anonymous.prediction_scope(),
            Err(IvfError::Unauthenticated(_))
        ));

        let (inactive, _) = caller(Role::Doctor, false);
        let caps = resolver.resolve(&inactive);
        assert!(!caps.is_authenticated());
        assert!(!caps.can_create_referrals);
    }

    #[test]
    fn test_missing_profile_is_not_found() {
        let (caller, _) = caller(Role::Doctor, true);
        let Caller::Authenticated { account, .. } = caller else {
            unreachable!()
        };
        let caps = ScopeResolver::new().resolve(&Caller::authenticated(account, None));
        assert!(matches!(caps.require_profile(), Err(IvfError::NotFound(_))));
    }

    #[test]
    fn test_record_visibility() {
        let owner = Uuid::new_v4();
        let scope = RecordScope::OwnedBy(owner);
        assert!(scope.ensure_visible(owner, "Prediction").is_ok());
        assert!(matches!(
            scope.ensure_visible(Uuid::new_v4(), "Prediction"),
            Err(IvfError::NotFound(_))
        ));
        assert_eq!(scope.owner_filter(), Some(owner));
        assert_eq!(RecordScope::All.owner_filter(), None);
    }
}
