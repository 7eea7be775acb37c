//! 数据库查询操作

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ivf_core::{
    Account, IvfError, Page, PageRequest, Patient, PredictionRecord, Profile,
    ReferralRelationship, ReferralRelationshipView, ReferralTokenView, Result, Session,
};
use uuid::Uuid;

use crate::connection::DatabasePool;
use crate::models::*;
use crate::store::{PredictionFilter, RelationshipFilter, Store, TokenFilter};

const ACCOUNT_COLUMNS: &str =
    "id, email, password_hash, is_active, is_staff, is_superuser, role, created_at, updated_at";

const PROFILE_SELECT: &str = r#"
    SELECT p.id, p.account_id, a.email, a.role, p.first_name, p.last_name, p.created_at, p.updated_at
    FROM profiles p
    JOIN accounts a ON a.id = p.account_id
"#;

const TOKEN_SELECT: &str = r#"
    SELECT t.id, t.token, t.first_name, t.last_name, t.created_at,
           p.id AS creator_id, a.email AS creator_email, a.role AS creator_role,
           p.first_name AS creator_first_name, p.last_name AS creator_last_name
    FROM referral_tokens t
    JOIN profiles p ON p.id = t.creator_id
    JOIN accounts a ON a.id = p.account_id
"#;

const TOKEN_FILTER: &str = r#"
    WHERE ($1::uuid IS NULL OR t.creator_id = $1)
      AND ($2::text IS NULL OR t.token ILIKE $2)
      AND ($3::timestamptz IS NULL OR t.created_at >= $3)
      AND ($4::timestamptz IS NULL OR t.created_at <= $4)
"#;

const RELATIONSHIP_SELECT: &str = r#"
    SELECT r.id, r.created_at,
           fp.id AS referrer_id, fa.email AS referrer_email, fa.role AS referrer_role,
           fp.first_name AS referrer_first_name, fp.last_name AS referrer_last_name,
           tp.id AS referred_id, ta.email AS referred_email, ta.role AS referred_role,
           tp.first_name AS referred_first_name, tp.last_name AS referred_last_name,
           t.id AS token_id, t.token AS token, t.created_at AS token_created_at
    FROM referral_relationships r
    JOIN profiles fp ON fp.id = r.referrer_id
    JOIN accounts fa ON fa.id = fp.account_id
    LEFT JOIN profiles tp ON tp.id = r.referred_id
    LEFT JOIN accounts ta ON ta.id = tp.account_id
    JOIN referral_tokens t ON t.id = r.token_id
"#;

const RELATIONSHIP_FILTER: &str = r#"
    WHERE ($1::uuid IS NULL OR r.referrer_id = $1)
      AND ($2::text IS NULL OR t.token ILIKE $2)
      AND ($3::timestamptz IS NULL OR r.created_at >= $3)
      AND ($4::timestamptz IS NULL OR r.created_at <= $4)
"#;

const PREDICTION_COLUMNS: &str = r#"
    id, owner_id, owner_kind, patient_id, female_age, amh, fsh, no_embryos,
    endometrial_thickness, sperm_count, sperm_morphology, follicle_size,
    retrieved_oocytes, embryo_quality, oocytes_mi, oocytes_mii,
    result, probability, model_version, created_at
"#;

const PREDICTION_FILTER: &str = r#"
    WHERE ($1::uuid IS NULL OR owner_id = $1)
      AND ($2::integer IS NULL OR result = $2)
      AND ($3::timestamptz IS NULL OR created_at >= $3)
      AND ($4::timestamptz IS NULL OR created_at <= $4)
"#;

/// 将 sqlx 错误转换为系统错误；唯一约束冲突（23505）映射为 `Conflict`
fn db_error(e: sqlx::Error) -> IvfError {
    if let sqlx::Error::Database(db) = &e {
        if db.code().as_deref() == Some("23505") {
            return IvfError::Conflict(db.constraint().unwrap_or("unique").to_string());
        }
    }
    IvfError::Database(e.to_string())
}

/// ILIKE 子串匹配模式，转义通配符
fn like_pattern(value: Option<&str>) -> Option<String> {
    value.map(|v| {
        let escaped = v
            .replace('\\', "\\\\")
            .replace('%', "\\%")
            .replace('_', "\\_");
        format!("%{}%", escaped)
    })
}

fn page_of<T>(items: Vec<T>, total: i64, request: PageRequest) -> Page<T> {
    Page {
        items,
        page: request.page,
        page_size: request.page_size,
        total_objects: total.max(0) as u64,
    }
}

/// PostgreSQL 存储实现
#[derive(Debug, Clone)]
pub struct DatabaseQueries {
    pool: DatabasePool,
}

impl DatabaseQueries {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    /// 创建数据库表
    pub async fn create_tables(&self) -> Result<()> {
        let pool = self.pool.pool();

        let tables = [
            // 账户表
            r#"
            CREATE TABLE IF NOT EXISTS accounts (
                id UUID PRIMARY KEY,
                email VARCHAR(255) NOT NULL,
                password_hash TEXT NOT NULL,
                is_active BOOLEAN NOT NULL DEFAULT FALSE,
                is_staff BOOLEAN NOT NULL DEFAULT FALSE,
                is_superuser BOOLEAN NOT NULL DEFAULT FALSE,
                role VARCHAR(16) NOT NULL DEFAULT 'patient',
                created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
                CONSTRAINT accounts_email_key UNIQUE (email)
            )
            "#,
            // 档案表，角色不在此冗余
            r#"
            CREATE TABLE IF NOT EXISTS profiles (
                id UUID PRIMARY KEY,
                account_id UUID NOT NULL UNIQUE REFERENCES accounts(id) ON DELETE CASCADE,
                first_name VARCHAR(250) NOT NULL DEFAULT '',
                last_name VARCHAR(250) NOT NULL DEFAULT '',
                created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
            )
            "#,
            // 会话表
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                token_hash CHAR(64) PRIMARY KEY,
                account_id UUID NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
                created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
                expires_at TIMESTAMP WITH TIME ZONE NOT NULL
            )
            "#,
            // 推荐令牌表
            r#"
            CREATE TABLE IF NOT EXISTS referral_tokens (
                id UUID PRIMARY KEY,
                creator_id UUID NOT NULL REFERENCES profiles(id) ON DELETE CASCADE,
                token VARCHAR(32) NOT NULL,
                first_name VARCHAR(255),
                last_name VARCHAR(255),
                created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
                CONSTRAINT referral_tokens_token_key UNIQUE (token)
            )
            "#,
            // 推荐关系表；被推荐人删除后关系保留，令牌仍视为已使用
            r#"
            CREATE TABLE IF NOT EXISTS referral_relationships (
                id UUID PRIMARY KEY,
                referrer_id UUID NOT NULL REFERENCES profiles(id) ON DELETE CASCADE,
                referred_id UUID REFERENCES profiles(id) ON DELETE SET NULL,
                token_id UUID NOT NULL REFERENCES referral_tokens(id) ON DELETE CASCADE,
                created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
                CONSTRAINT referral_relationships_token_id_key UNIQUE (token_id)
            )
            "#,
            // 患者表
            r#"
            CREATE TABLE IF NOT EXISTS patients (
                id UUID PRIMARY KEY,
                manager_id UUID NOT NULL REFERENCES profiles(id) ON DELETE CASCADE,
                first_name VARCHAR(255) NOT NULL,
                last_name VARCHAR(255) NOT NULL,
                created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
            )
            "#,
            // 预测记录表
            r#"
            CREATE TABLE IF NOT EXISTS predictions (
                id UUID PRIMARY KEY,
                owner_id UUID NOT NULL REFERENCES profiles(id) ON DELETE CASCADE,
                owner_kind VARCHAR(8) NOT NULL,
                patient_id UUID REFERENCES patients(id) ON DELETE SET NULL,
                female_age INTEGER NOT NULL CHECK (female_age BETWEEN 10 AND 99),
                amh DOUBLE PRECISION NOT NULL,
                fsh DOUBLE PRECISION NOT NULL,
                no_embryos INTEGER NOT NULL,
                endometrial_thickness DOUBLE PRECISION NOT NULL,
                sperm_count DOUBLE PRECISION NOT NULL,
                sperm_morphology INTEGER NOT NULL,
                follicle_size INTEGER NOT NULL,
                retrieved_oocytes INTEGER NOT NULL,
                embryo_quality INTEGER NOT NULL,
                oocytes_mi INTEGER NOT NULL,
                oocytes_mii INTEGER NOT NULL,
                result INTEGER NOT NULL,
                probability DOUBLE PRECISION CHECK (probability IS NULL OR (probability >= 0 AND probability <= 1)),
                model_version VARCHAR(64) NOT NULL,
                created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
            )
            "#,
        ];

        for table_sql in tables {
            sqlx::query(table_sql)
                .execute(pool)
                .await
                .map_err(db_error)?;
        }

        // 创建索引以优化查询性能
        self.create_indexes().await?;

        tracing::info!("Database tables created successfully");
        Ok(())
    }

    /// 创建数据库索引
    async fn create_indexes(&self) -> Result<()> {
        let pool = self.pool.pool();

        let indexes = vec![
            "CREATE INDEX IF NOT EXISTS idx_sessions_account_id ON sessions(account_id)",
            "CREATE INDEX IF NOT EXISTS idx_referral_tokens_creator_id ON referral_tokens(creator_id, created_at)",
            "CREATE INDEX IF NOT EXISTS idx_referral_relationships_referrer_id ON referral_relationships(referrer_id, created_at)",
            "CREATE INDEX IF NOT EXISTS idx_referral_relationships_referred_id ON referral_relationships(referred_id)",
            "CREATE INDEX IF NOT EXISTS idx_patients_manager_id ON patients(manager_id, created_at)",
            "CREATE INDEX IF NOT EXISTS idx_predictions_owner_id ON predictions(owner_id, created_at)",
            "CREATE INDEX IF NOT EXISTS idx_predictions_patient_id ON predictions(patient_id)",
            "CREATE INDEX IF NOT EXISTS idx_predictions_result ON predictions(result)",
        ];

        for index_sql in indexes {
            sqlx::query(index_sql)
                .execute(pool)
                .await
                .map_err(db_error)?;
        }

        tracing::info!("Database indexes created successfully");
        Ok(())
    }

    async fn fetch_token_view(&self, id: Uuid) -> Result<ReferralTokenView> {
        sqlx::query_as::<_, DbReferralToken>(&format!("{} WHERE t.id = $1", TOKEN_SELECT))
            .bind(id)
            .fetch_one(self.pool.pool())
            .await
            .map_err(db_error)
            .and_then(ReferralTokenView::try_from)
    }
}

#[async_trait]
impl Store for DatabaseQueries {
    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(self.pool.pool())
            .await
            .map_err(db_error)?;
        Ok(())
    }

    // ========== 账户与档案 ==========

    async fn create_account(
        &self,
        account: &NewAccount,
        referral_token_id: Option<Uuid>,
    ) -> Result<CreatedAccount> {
        let mut tx = self.pool.pool().begin().await.map_err(db_error)?;

        if let Some(token_id) = referral_token_id {
            // 锁定令牌行，串行化同一令牌的并发兑换
            let locked: Option<Uuid> =
                sqlx::query_scalar("SELECT id FROM referral_tokens WHERE id = $1 FOR UPDATE")
                    .bind(token_id)
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(db_error)?;
            if locked.is_none() {
                return Err(IvfError::NotFound("Referral token not found.".to_string()));
            }
        }

        let db_account = sqlx::query_as::<_, DbAccount>(&format!(
            r#"
            INSERT INTO accounts (id, email, password_hash, role, is_active, is_staff, is_superuser)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {}
            "#,
            ACCOUNT_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(&account.email)
        .bind(&account.password_hash)
        .bind(account.role.as_str())
        .bind(account.is_active)
        .bind(account.is_staff)
        .bind(account.is_superuser)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_error)?;

        let profile_id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO profiles (id, account_id, first_name, last_name) VALUES ($1, $2, $3, $4)",
        )
        .bind(profile_id)
        .bind(db_account.id)
        .bind(&account.first_name)
        .bind(&account.last_name)
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;

        let db_profile =
            sqlx::query_as::<_, DbProfile>(&format!("{} WHERE p.id = $1", PROFILE_SELECT))
                .bind(profile_id)
                .fetch_one(&mut *tx)
                .await
                .map_err(db_error)?;

        let relationship = match referral_token_id {
            Some(token_id) => {
                let (id, referrer_id, referred_id, token_id, created_at) =
                    sqlx::query_as::<_, (Uuid, Uuid, Option<Uuid>, Uuid, DateTime<Utc>)>(
                        r#"
                        INSERT INTO referral_relationships (id, referrer_id, referred_id, token_id)
                        SELECT $1, t.creator_id, $2, t.id FROM referral_tokens t WHERE t.id = $3
                        RETURNING id, referrer_id, referred_id, token_id, created_at
                        "#,
                    )
                    .bind(Uuid::new_v4())
                    .bind(profile_id)
                    .bind(token_id)
                    .fetch_one(&mut *tx)
                    .await
                    .map_err(db_error)?;

                Some(ReferralRelationship {
                    id,
                    referrer_id,
                    referred_id,
                    token_id,
                    created_at,
                })
            }
            None => None,
        };

        tx.commit().await.map_err(db_error)?;

        Ok(CreatedAccount {
            account: Account::try_from(db_account)?,
            profile: Profile::try_from(db_profile)?,
            relationship,
        })
    }

    async fn get_account(&self, id: Uuid) -> Result<Option<Account>> {
        let result = sqlx::query_as::<_, DbAccount>(&format!(
            "SELECT {} FROM accounts WHERE id = $1",
            ACCOUNT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(db_error)?;

        result.map(Account::try_from).transpose()
    }

    async fn get_account_by_email(&self, email: &str) -> Result<Option<Account>> {
        let result = sqlx::query_as::<_, DbAccount>(&format!(
            "SELECT {} FROM accounts WHERE email = $1",
            ACCOUNT_COLUMNS
        ))
        .bind(email)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(db_error)?;

        result.map(Account::try_from).transpose()
    }

    async fn set_account_active(&self, id: Uuid, active: bool) -> Result<Account> {
        sqlx::query_as::<_, DbAccount>(&format!(
            "UPDATE accounts SET is_active = $2, updated_at = NOW() WHERE id = $1 RETURNING {}",
            ACCOUNT_COLUMNS
        ))
        .bind(id)
        .bind(active)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(db_error)?
        .map(Account::try_from)
        .transpose()?
        .ok_or_else(|| IvfError::NotFound("Account not found.".to_string()))
    }

    async fn set_password_hash(&self, id: Uuid, password_hash: &str) -> Result<()> {
        let result =
            sqlx::query("UPDATE accounts SET password_hash = $2, updated_at = NOW() WHERE id = $1")
                .bind(id)
                .bind(password_hash)
                .execute(self.pool.pool())
                .await
                .map_err(db_error)?;

        if result.rows_affected() == 0 {
            return Err(IvfError::NotFound("Account not found.".to_string()));
        }
        Ok(())
    }

    async fn delete_account(&self, id: Uuid) -> Result<()> {
        let result = sqlx::query("DELETE FROM accounts WHERE id = $1")
            .bind(id)
            .execute(self.pool.pool())
            .await
            .map_err(db_error)?;

        if result.rows_affected() == 0 {
            return Err(IvfError::NotFound("Account not found.".to_string()));
        }
        Ok(())
    }

    async fn get_profile(&self, id: Uuid) -> Result<Option<Profile>> {
        let result = sqlx::query_as::<_, DbProfile>(&format!("{} WHERE p.id = $1", PROFILE_SELECT))
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(db_error)?;

        result.map(Profile::try_from).transpose()
    }

    async fn get_profile_by_account(&self, account_id: Uuid) -> Result<Option<Profile>> {
        let result =
            sqlx::query_as::<_, DbProfile>(&format!("{} WHERE p.account_id = $1", PROFILE_SELECT))
                .bind(account_id)
                .fetch_optional(self.pool.pool())
                .await
                .map_err(db_error)?;

        result.map(Profile::try_from).transpose()
    }

    async fn update_profile_names(
        &self,
        profile_id: Uuid,
        first_name: Option<String>,
        last_name: Option<String>,
    ) -> Result<Profile> {
        let result = sqlx::query(
            r#"
            UPDATE profiles
            SET first_name = COALESCE($2, first_name),
                last_name = COALESCE($3, last_name),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(profile_id)
        .bind(first_name)
        .bind(last_name)
        .execute(self.pool.pool())
        .await
        .map_err(db_error)?;

        if result.rows_affected() == 0 {
            return Err(IvfError::NotFound("Profile not found.".to_string()));
        }

        self.get_profile(profile_id)
            .await?
            .ok_or_else(|| IvfError::NotFound("Profile not found.".to_string()))
    }

    // ========== 会话 ==========

    async fn create_session(&self, session: &Session) -> Result<()> {
        sqlx::query(
            "INSERT INTO sessions (token_hash, account_id, created_at, expires_at) VALUES ($1, $2, $3, $4)",
        )
        .bind(&session.token_hash)
        .bind(session.account_id)
        .bind(session.created_at)
        .bind(session.expires_at)
        .execute(self.pool.pool())
        .await
        .map_err(db_error)?;

        Ok(())
    }

    async fn get_session(&self, token_hash: &str) -> Result<Option<Session>> {
        let result = sqlx::query_as::<_, DbSession>(
            "SELECT token_hash, account_id, created_at, expires_at FROM sessions WHERE token_hash = $1",
        )
        .bind(token_hash)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(db_error)?;

        Ok(result.map(Session::from))
    }

    async fn delete_session(&self, token_hash: &str) -> Result<()> {
        sqlx::query("DELETE FROM sessions WHERE token_hash = $1")
            .bind(token_hash)
            .execute(self.pool.pool())
            .await
            .map_err(db_error)?;

        Ok(())
    }

    async fn delete_account_sessions(&self, account_id: Uuid, keep: Option<&str>) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM sessions WHERE account_id = $1 AND ($2::TEXT IS NULL OR token_hash <> $2)",
        )
        .bind(account_id)
        .bind(keep)
        .execute(self.pool.pool())
        .await
        .map_err(db_error)?;

        Ok(result.rows_affected())
    }

    async fn delete_expired_sessions(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= $1")
            .bind(now)
            .execute(self.pool.pool())
            .await
            .map_err(db_error)?;

        Ok(result.rows_affected())
    }

    // ========== 推荐令牌与关系 ==========

    async fn insert_referral_token(&self, token: &NewReferralToken) -> Result<ReferralTokenView> {
        let id = Uuid::new_v4();

        sqlx::query(
            r#"
            INSERT INTO referral_tokens (id, creator_id, token, first_name, last_name)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(id)
        .bind(token.creator_id)
        .bind(&token.token)
        .bind(&token.first_name)
        .bind(&token.last_name)
        .execute(self.pool.pool())
        .await
        .map_err(db_error)?;

        self.fetch_token_view(id).await
    }

    async fn get_referral_token(&self, token: &str) -> Result<Option<ReferralTokenView>> {
        let result =
            sqlx::query_as::<_, DbReferralToken>(&format!("{} WHERE t.token = $1", TOKEN_SELECT))
                .bind(token)
                .fetch_optional(self.pool.pool())
                .await
                .map_err(db_error)?;

        result.map(ReferralTokenView::try_from).transpose()
    }

    async fn list_referral_tokens(
        &self,
        filter: &TokenFilter,
        page: PageRequest,
    ) -> Result<Page<ReferralTokenView>> {
        let pool = self.pool.pool();
        let pattern = like_pattern(filter.token_contains.as_deref());

        let total: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM referral_tokens t {}",
            TOKEN_FILTER
        ))
        .bind(filter.creator_id)
        .bind(&pattern)
        .bind(filter.created.from)
        .bind(filter.created.to)
        .fetch_one(pool)
        .await
        .map_err(db_error)?;

        let items = sqlx::query_as::<_, DbReferralToken>(&format!(
            "{} {} ORDER BY t.created_at, t.id LIMIT $5 OFFSET $6",
            TOKEN_SELECT, TOKEN_FILTER
        ))
        .bind(filter.creator_id)
        .bind(&pattern)
        .bind(filter.created.from)
        .bind(filter.created.to)
        .bind(page.limit() as i64)
        .bind(page.offset() as i64)
        .fetch_all(pool)
        .await
        .map_err(db_error)?;

        Ok(page_of(
            items
                .into_iter()
                .map(ReferralTokenView::try_from)
                .collect::<Result<Vec<_>>>()?,
            total,
            page,
        ))
    }

    async fn delete_referral_token(&self, id: Uuid) -> Result<()> {
        let result = sqlx::query("DELETE FROM referral_tokens WHERE id = $1")
            .bind(id)
            .execute(self.pool.pool())
            .await
            .map_err(db_error)?;

        if result.rows_affected() == 0 {
            return Err(IvfError::NotFound("Referral token not found.".to_string()));
        }
        Ok(())
    }

    async fn relationship_exists_for_token(&self, token_id: Uuid) -> Result<bool> {
        sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM referral_relationships WHERE token_id = $1)",
        )
        .bind(token_id)
        .fetch_one(self.pool.pool())
        .await
        .map_err(db_error)
    }

    async fn get_relationship_by_token(
        &self,
        token: &str,
    ) -> Result<Option<ReferralRelationshipView>> {
        let result = sqlx::query_as::<_, DbReferralRelationship>(&format!(
            "{} WHERE t.token = $1",
            RELATIONSHIP_SELECT
        ))
        .bind(token)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(db_error)?;

        result.map(ReferralRelationshipView::try_from).transpose()
    }

    async fn list_relationships(
        &self,
        filter: &RelationshipFilter,
        page: PageRequest,
    ) -> Result<Page<ReferralRelationshipView>> {
        let pool = self.pool.pool();
        let pattern = like_pattern(filter.token_contains.as_deref());

        let total: i64 = sqlx::query_scalar(&format!(
            r#"
            SELECT COUNT(*) FROM referral_relationships r
            JOIN referral_tokens t ON t.id = r.token_id
            {}
            "#,
            RELATIONSHIP_FILTER
        ))
        .bind(filter.referrer_id)
        .bind(&pattern)
        .bind(filter.created.from)
        .bind(filter.created.to)
        .fetch_one(pool)
        .await
        .map_err(db_error)?;

        let items = sqlx::query_as::<_, DbReferralRelationship>(&format!(
            "{} {} ORDER BY r.created_at, r.id LIMIT $5 OFFSET $6",
            RELATIONSHIP_SELECT, RELATIONSHIP_FILTER
        ))
        .bind(filter.referrer_id)
        .bind(&pattern)
        .bind(filter.created.from)
        .bind(filter.created.to)
        .bind(page.limit() as i64)
        .bind(page.offset() as i64)
        .fetch_all(pool)
        .await
        .map_err(db_error)?;

        Ok(page_of(
            items
                .into_iter()
                .map(ReferralRelationshipView::try_from)
                .collect::<Result<Vec<_>>>()?,
            total,
            page,
        ))
    }

    // ========== 患者 ==========

    async fn insert_patient(&self, patient: &NewPatient) -> Result<Patient> {
        sqlx::query_as::<_, DbPatient>(
            r#"
            INSERT INTO patients (id, manager_id, first_name, last_name)
            VALUES ($1, $2, $3, $4)
            RETURNING id, manager_id, first_name, last_name, created_at, updated_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(patient.manager_id)
        .bind(&patient.first_name)
        .bind(&patient.last_name)
        .fetch_one(self.pool.pool())
        .await
        .map(Patient::from)
        .map_err(db_error)
    }

    async fn get_patient(&self, id: Uuid) -> Result<Option<Patient>> {
        let result = sqlx::query_as::<_, DbPatient>(
            "SELECT id, manager_id, first_name, last_name, created_at, updated_at FROM patients WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(db_error)?;

        Ok(result.map(Patient::from))
    }

    async fn list_patients(
        &self,
        manager_id: Option<Uuid>,
        page: PageRequest,
    ) -> Result<Page<Patient>> {
        let pool = self.pool.pool();

        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM patients WHERE ($1::uuid IS NULL OR manager_id = $1)",
        )
        .bind(manager_id)
        .fetch_one(pool)
        .await
        .map_err(db_error)?;

        let items = sqlx::query_as::<_, DbPatient>(
            r#"
            SELECT id, manager_id, first_name, last_name, created_at, updated_at
            FROM patients
            WHERE ($1::uuid IS NULL OR manager_id = $1)
            ORDER BY created_at, id
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(manager_id)
        .bind(page.limit() as i64)
        .bind(page.offset() as i64)
        .fetch_all(pool)
        .await
        .map_err(db_error)?;

        Ok(page_of(
            items.into_iter().map(Patient::from).collect(),
            total,
            page,
        ))
    }

    async fn update_patient(&self, id: Uuid, update: &PatientUpdate) -> Result<Patient> {
        sqlx::query_as::<_, DbPatient>(
            r#"
            UPDATE patients
            SET first_name = COALESCE($2, first_name),
                last_name = COALESCE($3, last_name),
                updated_at = NOW()
            WHERE id = $1
            RETURNING id, manager_id, first_name, last_name, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(&update.first_name)
        .bind(&update.last_name)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(db_error)?
        .map(Patient::from)
        .ok_or_else(|| IvfError::NotFound("Patient not found.".to_string()))
    }

    async fn delete_patient(&self, id: Uuid) -> Result<()> {
        let result = sqlx::query("DELETE FROM patients WHERE id = $1")
            .bind(id)
            .execute(self.pool.pool())
            .await
            .map_err(db_error)?;

        if result.rows_affected() == 0 {
            return Err(IvfError::NotFound("Patient not found.".to_string()));
        }
        Ok(())
    }

    // ========== 预测记录 ==========

    async fn insert_prediction(&self, prediction: &NewPrediction) -> Result<PredictionRecord> {
        let features = &prediction.features;

        sqlx::query_as::<_, DbPrediction>(&format!(
            r#"
            INSERT INTO predictions (
                id, owner_id, owner_kind, patient_id, female_age, amh, fsh, no_embryos,
                endometrial_thickness, sperm_count, sperm_morphology, follicle_size,
                retrieved_oocytes, embryo_quality, oocytes_mi, oocytes_mii,
                result, probability, model_version
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
            RETURNING {}
            "#,
            PREDICTION_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(prediction.owner_id)
        .bind(prediction.owner_kind.as_str())
        .bind(prediction.patient_id)
        .bind(features.female_age)
        .bind(features.amh)
        .bind(features.fsh)
        .bind(features.no_embryos)
        .bind(features.endometrial_thickness)
        .bind(features.sperm_count)
        .bind(features.sperm_morphology)
        .bind(features.follicle_size)
        .bind(features.retrieved_oocytes)
        .bind(features.embryo_quality)
        .bind(features.oocytes_mi)
        .bind(features.oocytes_mii)
        .bind(prediction.result)
        .bind(prediction.probability)
        .bind(&prediction.model_version)
        .fetch_one(self.pool.pool())
        .await
        .map_err(db_error)
        .and_then(PredictionRecord::try_from)
    }

    async fn get_prediction(&self, id: Uuid) -> Result<Option<PredictionRecord>> {
        let result = sqlx::query_as::<_, DbPrediction>(&format!(
            "SELECT {} FROM predictions WHERE id = $1",
            PREDICTION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(db_error)?;

        result.map(PredictionRecord::try_from).transpose()
    }

    async fn list_predictions(
        &self,
        filter: &PredictionFilter,
        page: PageRequest,
    ) -> Result<Page<PredictionRecord>> {
        let pool = self.pool.pool();

        let total: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM predictions {}",
            PREDICTION_FILTER
        ))
        .bind(filter.owner_id)
        .bind(filter.result)
        .bind(filter.created.from)
        .bind(filter.created.to)
        .fetch_one(pool)
        .await
        .map_err(db_error)?;

        let items = sqlx::query_as::<_, DbPrediction>(&format!(
            "SELECT {} FROM predictions {} ORDER BY created_at, id LIMIT $5 OFFSET $6",
            PREDICTION_COLUMNS, PREDICTION_FILTER
        ))
        .bind(filter.owner_id)
        .bind(filter.result)
        .bind(filter.created.from)
        .bind(filter.created.to)
        .bind(page.limit() as i64)
        .bind(page.offset() as i64)
        .fetch_all(pool)
        .await
        .map_err(db_error)?;

        Ok(page_of(
            items
                .into_iter()
                .map(PredictionRecord::try_from)
                .collect::<Result<Vec<_>>>()?,
            total,
            page,
        ))
    }

    async fn delete_prediction(&self, id: Uuid) -> Result<()> {
        let result = sqlx::query("DELETE FROM predictions WHERE id = $1")
            .bind(id)
            .execute(self.pool.pool())
            .await
            .map_err(db_error)?;

        if result.rows_affected() == 0 {
            return Err(IvfError::NotFound("Prediction not found.".to_string()));
        }
        Ok(())
    }
}
