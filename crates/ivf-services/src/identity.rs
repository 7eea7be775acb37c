//! 账户、会话与档案

use chrono::{DateTime, Duration, Utc};
use ivf_core::{
    utils::{self, PasswordHasher, DEFAULT_PASSWORD_ITERATIONS},
    Account, Caller, Capabilities, FieldError, IvfError, Profile, Result, Role, Session,
};
use ivf_database::{CreatedAccount, NewAccount, Store, EMAIL_CONSTRAINT};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::referral::ReferralEngine;
use crate::validation::{clean_name, password_problems, REQUIRED};

const PROFILE_NAME_MAX_LEN: usize = 250;
const BAD_CREDENTIALS: &str = "Unable to log in with provided credentials.";
const INVALID_SESSION: &str = "Invalid token.";
const INVALID_PASSWORD: &str = "Invalid password.";

/// 认证参数
#[derive(Debug, Clone, Copy)]
pub struct AuthSettings {
    pub token_expiry_hours: i64,
    pub password_iterations: u32,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            token_expiry_hours: 24,
            password_iterations: DEFAULT_PASSWORD_ITERATIONS,
        }
    }
}

/// 注册请求
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Registration {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default, alias = "password1")]
    pub password_confirm: String,
    #[serde(default)]
    pub referral_token: Option<String>,
}

/// 运维创建账户（命令行）
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub password: String,
    pub role: Role,
    pub is_active: bool,
}

/// 登录结果
#[derive(Debug, Clone, Serialize)]
pub struct LoginResult {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub account: Account,
}

/// 当前用户
#[derive(Debug, Clone, Serialize)]
pub struct Me {
    pub account: Account,
    pub profile: Profile,
}

/// 修改口令请求
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PasswordChange {
    #[serde(default)]
    pub current_password: String,
    #[serde(default)]
    pub new_password: String,
}

/// 档案修改请求
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProfileUpdate {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

pub struct IdentityService {
    store: Arc<dyn Store>,
    referrals: Arc<ReferralEngine>,
    hasher: PasswordHasher,
    /// 未知邮箱登录时校验的占位哈希
    dummy_hash: String,
    token_expiry: Duration,
}

impl IdentityService {
    pub fn new(store: Arc<dyn Store>, referrals: Arc<ReferralEngine>, settings: AuthSettings) -> Self {
        let hasher = PasswordHasher::new(settings.password_iterations);
        Self {
            store,
            referrals,
            dummy_hash: hasher.hash(&utils::generate_session_token()),
            hasher,
            token_expiry: Duration::hours(settings.token_expiry_hours),
        }
    }

    /// PBKDF2 在阻塞线程池上计算，不占用异步工作线程
    async fn hash_password(&self, password: &str) -> Result<String> {
        let hasher = self.hasher;
        let password = password.to_string();
        tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .map_err(|e| IvfError::Internal(format!("Password hashing task failed: {}", e)))
    }

    async fn verify_password(&self, password: &str, encoded: &str) -> Result<bool> {
        let hasher = self.hasher;
        let password = password.to_string();
        let encoded = encoded.to_string();
        tokio::task::spawn_blocking(move || hasher.verify(&password, &encoded))
            .await
            .map_err(|e| IvfError::Internal(format!("Password verification task failed: {}", e)))
    }

    /// 自助注册；新账户为未激活的患者
    pub async fn register(&self, registration: Registration) -> Result<CreatedAccount> {
        let mut errors = Vec::new();

        let email = if registration.email.trim().is_empty() {
            errors.push(FieldError::new("email", REQUIRED));
            None
        } else {
            let email = utils::normalize_email(&registration.email);
            if email.is_none() {
                errors.push(FieldError::new("email", "Enter a valid email address."));
            }
            email
        };

        if registration.password.is_empty() {
            errors.push(FieldError::new("password", REQUIRED));
        } else if registration.password != registration.password_confirm {
            errors.push(FieldError::new("details", "Passwords must match."));
        } else {
            errors.extend(password_problems(
                &registration.password,
                email.as_deref().unwrap_or_default(),
            ));
        }

        let Some(email) = email.filter(|_| errors.is_empty()) else {
            return Err(IvfError::Validation(errors));
        };

        if self.store.get_account_by_email(&email).await?.is_some() {
            return Err(duplicate_email());
        }

        let account = NewAccount {
            email,
            password_hash: self.hash_password(&registration.password).await?,
            role: Role::Patient,
            is_active: false,
            is_staff: false,
            is_superuser: false,
            first_name: String::new(),
            last_name: String::new(),
        };

        let referral_token = registration
            .referral_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty());

        let created = match referral_token {
            Some(token) => self.referrals.redeem(token, account).await,
            None => self.store.create_account(&account, None).await,
        }
        .map_err(map_email_conflict)?;

        info!("Registered account {}", created.account.id);
        Ok(created)
    }

    /// 以指定角色创建账户；超级用户同时获得 staff 与激活标记
    pub async fn create_account(&self, user: NewUser) -> Result<CreatedAccount> {
        let email = utils::normalize_email(&user.email)
            .ok_or_else(|| IvfError::validation("email", "Enter a valid email address."))?;

        let problems = password_problems(&user.password, &email);
        if !problems.is_empty() {
            return Err(IvfError::Validation(problems));
        }

        let superuser = user.role == Role::Superuser;
        let account = NewAccount {
            email,
            password_hash: self.hash_password(&user.password).await?,
            role: user.role,
            is_active: user.is_active || superuser,
            is_staff: superuser || user.role == Role::Admin,
            is_superuser: superuser,
            first_name: String::new(),
            last_name: String::new(),
        };

        let created = self
            .store
            .create_account(&account, None)
            .await
            .map_err(map_email_conflict)?;
        info!(
            "Created {} account {}",
            created.account.role, created.account.id
        );
        Ok(created)
    }

    /// 登录并签发会话令牌
    pub async fn login(&self, email: &str, password: &str) -> Result<LoginResult> {
        let email = utils::normalize_email(email)
            .ok_or_else(|| IvfError::Unauthenticated(BAD_CREDENTIALS.to_string()))?;

        let (account, verified) = match self.store.get_account_by_email(&email).await? {
            Some(account) => {
                let verified = self.verify_password(password, &account.password_hash).await?;
                (Some(account), verified)
            }
            None => {
                self.verify_password(password, &self.dummy_hash).await?;
                (None, false)
            }
        };
        let Some(account) = account.filter(|_| verified) else {
            warn!("Failed login attempt");
            return Err(IvfError::Unauthenticated(BAD_CREDENTIALS.to_string()));
        };

        if !account.is_active {
            warn!("Login rejected for inactive account {}", account.id);
            return Err(IvfError::Unauthenticated(BAD_CREDENTIALS.to_string()));
        }

        let now = Utc::now();
        let purged = self.store.delete_expired_sessions(now).await?;
        if purged > 0 {
            debug!("Purged {} expired sessions", purged);
        }

        let token = utils::generate_session_token();
        let session = Session {
            token_hash: utils::hash_token(&token),
            account_id: account.id,
            created_at: now,
            expires_at: now + self.token_expiry,
        };
        self.store.create_session(&session).await?;

        info!("Account {} logged in", account.id);
        Ok(LoginResult {
            token,
            expires_at: session.expires_at,
            account,
        })
    }

    /// 修改口令；成功后撤销当前会话以外的全部会话
    pub async fn set_password(
        &self,
        caps: &Capabilities,
        current_token: Option<&str>,
        change: PasswordChange,
    ) -> Result<()> {
        let account_id = caps.require_authenticated()?;
        let account = self
            .store
            .get_account(account_id)
            .await?
            .ok_or_else(|| IvfError::NotFound("Account not found.".to_string()))?;

        let mut errors = Vec::new();
        if change.current_password.is_empty() {
            errors.push(FieldError::new("current_password", REQUIRED));
        } else if !self
            .verify_password(&change.current_password, &account.password_hash)
            .await?
        {
            errors.push(FieldError::new("current_password", INVALID_PASSWORD));
        }
        if change.new_password.is_empty() {
            errors.push(FieldError::new("new_password", REQUIRED));
        } else {
            errors.extend(
                password_problems(&change.new_password, &account.email)
                    .into_iter()
                    .map(|e| FieldError::new("new_password", e.message)),
            );
        }
        if !errors.is_empty() {
            return Err(IvfError::Validation(errors));
        }

        let password_hash = self.hash_password(&change.new_password).await?;
        self.store.set_password_hash(account_id, &password_hash).await?;

        let keep = current_token.map(utils::hash_token);
        let revoked = self
            .store
            .delete_account_sessions(account_id, keep.as_deref())
            .await?;
        info!(
            "Password changed for account {}; {} other sessions revoked",
            account_id, revoked
        );
        Ok(())
    }

    /// 撤销会话
    pub async fn logout(&self, token: &str) -> Result<()> {
        self.store.delete_session(&utils::hash_token(token)).await
    }

    /// 根据会话令牌确定调用方
    pub async fn authenticate(&self, token: &str) -> Result<Caller> {
        let token_hash = utils::hash_token(token);
        let session = self
            .store
            .get_session(&token_hash)
            .await?
            .ok_or_else(|| IvfError::Unauthenticated(INVALID_SESSION.to_string()))?;

        if session.is_expired(Utc::now()) {
            self.store.delete_session(&token_hash).await?;
            return Err(IvfError::Unauthenticated(INVALID_SESSION.to_string()));
        }

        let account = match self.store.get_account(session.account_id).await? {
            Some(account) if account.is_active => account,
            _ => {
                return Err(IvfError::Unauthenticated(
                    "User inactive or deleted.".to_string(),
                ))
            }
        };

        let profile = self.store.get_profile_by_account(account.id).await?;
        Ok(Caller::authenticated(account, profile))
    }

    pub async fn me(&self, caps: &Capabilities) -> Result<Me> {
        let account_id = caps.require_authenticated()?;
        let account = self
            .store
            .get_account(account_id)
            .await?
            .ok_or_else(|| IvfError::NotFound("Account not found.".to_string()))?;
        let profile = self.get_profile(caps).await?;
        Ok(Me { account, profile })
    }

    /// 删除当前账户及其拥有的全部记录
    pub async fn delete_me(&self, caps: &Capabilities) -> Result<()> {
        let account_id = caps.require_authenticated()?;
        self.store.delete_account(account_id).await?;
        info!("Account {} deleted", account_id);
        Ok(())
    }

    pub async fn get_profile(&self, caps: &Capabilities) -> Result<Profile> {
        let profile_id = caps.require_profile()?;
        self.store
            .get_profile(profile_id)
            .await?
            .ok_or_else(|| IvfError::NotFound("Profile does not exist for this user.".to_string()))
    }

    /// 修改姓名；患者的姓名由医生维护
    pub async fn update_profile(&self, caps: &Capabilities, update: ProfileUpdate) -> Result<Profile> {
        let profile_id = caps.require_profile()?;

        let writes_names = update.first_name.is_some() || update.last_name.is_some();
        if writes_names && !caps.can_edit_profile_names {
            return Err(IvfError::PermissionDenied(
                "Patients cannot change their names; they are managed by the referring doctor."
                    .to_string(),
            ));
        }

        let mut errors = Vec::new();
        let mut clean = |field: &str, value: Option<&str>| match value {
            None => None,
            Some(value) => match clean_name(field, Some(value), PROFILE_NAME_MAX_LEN, false) {
                Ok(cleaned) => Some(cleaned.unwrap_or_default()),
                Err(e) => {
                    errors.push(e);
                    None
                }
            },
        };
        let first_name = clean("first_name", update.first_name.as_deref());
        let last_name = clean("last_name", update.last_name.as_deref());
        if !errors.is_empty() {
            return Err(IvfError::Validation(errors));
        }

        self.store
            .update_profile_names(profile_id, first_name, last_name)
            .await
    }

    /// 激活账户（管理员或超级用户）
    pub async fn activate(&self, caps: &Capabilities, account_id: Uuid) -> Result<Account> {
        caps.require_authenticated()?;
        if !caps.can_activate_accounts {
            return Err(IvfError::PermissionDenied(
                "You do not have permission to activate accounts.".to_string(),
            ));
        }

        let account = self.store.set_account_active(account_id, true).await?;
        info!("Account {} activated", account.id);
        Ok(account)
    }
}

fn duplicate_email() -> IvfError {
    IvfError::validation("email", "user with this email already exists.")
}

fn map_email_conflict(error: IvfError) -> IvfError {
    match error {
        IvfError::Conflict(constraint) if constraint == EMAIL_CONSTRAINT => duplicate_email(),
        other => other,
    }
}
