//! 内存存储，用于测试与本地开发

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ivf_core::{
    Account, IvfError, Page, PageRequest, Patient, PredictionRecord, Profile, ProfileSummary,
    ReferralRelationship, ReferralRelationshipView, ReferralToken, ReferralTokenView, Result,
    Session, TokenSummary,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::*;
use crate::store::{
    contains_ignore_case, PredictionFilter, RelationshipFilter, Store, TokenFilter,
    EMAIL_CONSTRAINT, RELATIONSHIP_TOKEN_CONSTRAINT, TOKEN_VALUE_CONSTRAINT,
};

/// 带插入序号的行，序号用于同一时间戳下的稳定排序
#[derive(Debug, Clone)]
struct Row<T> {
    seq: u64,
    value: T,
}

#[derive(Debug, Clone)]
struct ProfileRow {
    id: Uuid,
    account_id: Uuid,
    first_name: String,
    last_name: String,
    created_at: chrono::DateTime<Utc>,
    updated_at: chrono::DateTime<Utc>,
}

#[derive(Debug, Default)]
struct MemoryState {
    seq: u64,
    accounts: HashMap<Uuid, Account>,
    profiles: HashMap<Uuid, ProfileRow>,
    sessions: HashMap<String, Session>,
    tokens: HashMap<Uuid, Row<ReferralToken>>,
    relationships: HashMap<Uuid, Row<ReferralRelationship>>,
    patients: HashMap<Uuid, Row<Patient>>,
    predictions: HashMap<Uuid, Row<PredictionRecord>>,
}

impl MemoryState {
    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    fn profile(&self, id: Uuid) -> Option<Profile> {
        let row = self.profiles.get(&id)?;
        let account = self.accounts.get(&row.account_id)?;
        Some(Profile {
            id: row.id,
            account_id: row.account_id,
            email: account.email.clone(),
            role: account.role,
            first_name: row.first_name.clone(),
            last_name: row.last_name.clone(),
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }

    fn summary(&self, profile_id: Uuid) -> Option<ProfileSummary> {
        self.profile(profile_id).map(|p| p.summary())
    }

    fn token_view(&self, token: &ReferralToken) -> Option<ReferralTokenView> {
        Some(ReferralTokenView {
            id: token.id,
            creator: self.summary(token.creator_id)?,
            token: token.token.clone(),
            first_name: token.first_name.clone(),
            last_name: token.last_name.clone(),
            created_at: token.created_at,
        })
    }

    fn relationship_view(&self, rel: &ReferralRelationship) -> Option<ReferralRelationshipView> {
        let token = &self.tokens.get(&rel.token_id)?.value;
        Some(ReferralRelationshipView {
            id: rel.id,
            referrer: self.summary(rel.referrer_id)?,
            referred: rel.referred_id.and_then(|id| self.summary(id)),
            token: TokenSummary {
                id: token.id,
                token: token.token.clone(),
                created_at: token.created_at,
            },
            created_at: rel.created_at,
        })
    }

    fn remove_token(&mut self, token_id: Uuid) {
        self.tokens.remove(&token_id);
        self.relationships.retain(|_, r| r.value.token_id != token_id);
    }

    fn remove_patient(&mut self, patient_id: Uuid) {
        self.patients.remove(&patient_id);
        for row in self.predictions.values_mut() {
            if row.value.patient_id == Some(patient_id) {
                row.value.patient_id = None;
            }
        }
    }

    fn remove_profile(&mut self, profile_id: Uuid) {
        self.profiles.remove(&profile_id);

        let tokens: Vec<Uuid> = self
            .tokens
            .values()
            .filter(|t| t.value.creator_id == profile_id)
            .map(|t| t.value.id)
            .collect();
        for token_id in tokens {
            self.remove_token(token_id);
        }

        self.relationships
            .retain(|_, r| r.value.referrer_id != profile_id);
        for row in self.relationships.values_mut() {
            if row.value.referred_id == Some(profile_id) {
                row.value.referred_id = None;
            }
        }

        let patients: Vec<Uuid> = self
            .patients
            .values()
            .filter(|p| p.value.manager_id == profile_id)
            .map(|p| p.value.id)
            .collect();
        for patient_id in patients {
            self.remove_patient(patient_id);
        }

        self.predictions
            .retain(|_, p| p.value.owner_id != profile_id);
    }
}

/// 按 (created_at, 插入序号) 升序排列
fn sorted<T: Clone>(
    rows: impl Iterator<Item = (u64, chrono::DateTime<Utc>, T)>,
) -> Vec<T> {
    let mut rows: Vec<_> = rows.collect();
    rows.sort_by(|a, b| a.1.cmp(&b.1).then(a.0.cmp(&b.0)));
    rows.into_iter().map(|(_, _, value)| value).collect()
}

/// 内存存储
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    // ========== 账户与档案 ==========

    async fn create_account(
        &self,
        account: &NewAccount,
        referral_token_id: Option<Uuid>,
    ) -> Result<CreatedAccount> {
        // 整个创建过程持有写锁，等价于一个事务
        let mut state = self.state.write().await;

        let token = match referral_token_id {
            Some(token_id) => Some(
                state
                    .tokens
                    .get(&token_id)
                    .map(|row| row.value.clone())
                    .ok_or_else(|| IvfError::NotFound("Referral token not found.".to_string()))?,
            ),
            None => None,
        };

        if state.accounts.values().any(|a| a.email == account.email) {
            return Err(IvfError::Conflict(EMAIL_CONSTRAINT.to_string()));
        }

        if let Some(token) = &token {
            if state
                .relationships
                .values()
                .any(|r| r.value.token_id == token.id)
            {
                return Err(IvfError::Conflict(
                    RELATIONSHIP_TOKEN_CONSTRAINT.to_string(),
                ));
            }
        }

        let now = Utc::now();
        let new_account = Account {
            id: Uuid::new_v4(),
            email: account.email.clone(),
            password_hash: account.password_hash.clone(),
            is_active: account.is_active,
            is_staff: account.is_staff,
            is_superuser: account.is_superuser,
            role: account.role,
            created_at: now,
            updated_at: now,
        };
        let profile_row = ProfileRow {
            id: Uuid::new_v4(),
            account_id: new_account.id,
            first_name: account.first_name.clone(),
            last_name: account.last_name.clone(),
            created_at: now,
            updated_at: now,
        };
        let profile_id = profile_row.id;

        state.accounts.insert(new_account.id, new_account.clone());
        state.profiles.insert(profile_id, profile_row);

        let relationship = match token {
            Some(token) => {
                let relationship = ReferralRelationship {
                    id: Uuid::new_v4(),
                    referrer_id: token.creator_id,
                    referred_id: Some(profile_id),
                    token_id: token.id,
                    created_at: now,
                };
                let seq = state.next_seq();
                state.relationships.insert(
                    relationship.id,
                    Row {
                        seq,
                        value: relationship.clone(),
                    },
                );
                Some(relationship)
            }
            None => None,
        };

        let profile = state
            .profile(profile_id)
            .ok_or_else(|| IvfError::Internal("Profile vanished during creation".to_string()))?;

        Ok(CreatedAccount {
            account: new_account,
            profile,
            relationship,
        })
    }

    async fn get_account(&self, id: Uuid) -> Result<Option<Account>> {
        Ok(self.state.read().await.accounts.get(&id).cloned())
    }

    async fn get_account_by_email(&self, email: &str) -> Result<Option<Account>> {
        let state = self.state.read().await;
        Ok(state.accounts.values().find(|a| a.email == email).cloned())
    }

    async fn set_account_active(&self, id: Uuid, active: bool) -> Result<Account> {
        let mut state = self.state.write().await;
        let account = state
            .accounts
            .get_mut(&id)
            .ok_or_else(|| IvfError::NotFound("Account not found.".to_string()))?;
        account.is_active = active;
        account.updated_at = Utc::now();
        Ok(account.clone())
    }

    async fn set_password_hash(&self, id: Uuid, password_hash: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let account = state
            .accounts
            .get_mut(&id)
            .ok_or_else(|| IvfError::NotFound("Account not found.".to_string()))?;
        account.password_hash = password_hash.to_string();
        account.updated_at = Utc::now();
        Ok(())
    }

    async fn delete_account(&self, id: Uuid) -> Result<()> {
        let mut state = self.state.write().await;
        if state.accounts.remove(&id).is_none() {
            return Err(IvfError::NotFound("Account not found.".to_string()));
        }

        state.sessions.retain(|_, s| s.account_id != id);
        let profiles: Vec<Uuid> = state
            .profiles
            .values()
            .filter(|p| p.account_id == id)
            .map(|p| p.id)
            .collect();
        for profile_id in profiles {
            state.remove_profile(profile_id);
        }
        Ok(())
    }

    async fn get_profile(&self, id: Uuid) -> Result<Option<Profile>> {
        Ok(self.state.read().await.profile(id))
    }

    async fn get_profile_by_account(&self, account_id: Uuid) -> Result<Option<Profile>> {
        let state = self.state.read().await;
        let id = state
            .profiles
            .values()
            .find(|p| p.account_id == account_id)
            .map(|p| p.id);
        Ok(id.and_then(|id| state.profile(id)))
    }

    async fn update_profile_names(
        &self,
        profile_id: Uuid,
        first_name: Option<String>,
        last_name: Option<String>,
    ) -> Result<Profile> {
        let mut state = self.state.write().await;
        let row = state
            .profiles
            .get_mut(&profile_id)
            .ok_or_else(|| IvfError::NotFound("Profile not found.".to_string()))?;
        if let Some(first_name) = first_name {
            row.first_name = first_name;
        }
        if let Some(last_name) = last_name {
            row.last_name = last_name;
        }
        row.updated_at = Utc::now();

        state
            .profile(profile_id)
            .ok_or_else(|| IvfError::NotFound("Profile not found.".to_string()))
    }

    // ========== 会话 ==========

    async fn create_session(&self, session: &Session) -> Result<()> {
        let mut state = self.state.write().await;
        state
            .sessions
            .insert(session.token_hash.clone(), session.clone());
        Ok(())
    }

    async fn get_session(&self, token_hash: &str) -> Result<Option<Session>> {
        Ok(self.state.read().await.sessions.get(token_hash).cloned())
    }

    async fn delete_session(&self, token_hash: &str) -> Result<()> {
        self.state.write().await.sessions.remove(token_hash);
        Ok(())
    }

    async fn delete_account_sessions(&self, account_id: Uuid, keep: Option<&str>) -> Result<u64> {
        let mut state = self.state.write().await;
        let before = state.sessions.len();
        state
            .sessions
            .retain(|hash, s| s.account_id != account_id || Some(hash.as_str()) == keep);
        Ok((before - state.sessions.len()) as u64)
    }

    async fn delete_expired_sessions(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut state = self.state.write().await;
        let before = state.sessions.len();
        state.sessions.retain(|_, s| !s.is_expired(now));
        Ok((before - state.sessions.len()) as u64)
    }

    // ========== 推荐令牌与关系 ==========

    async fn insert_referral_token(&self, token: &NewReferralToken) -> Result<ReferralTokenView> {
        let mut state = self.state.write().await;

        if state.tokens.values().any(|t| t.value.token == token.token) {
            return Err(IvfError::Conflict(TOKEN_VALUE_CONSTRAINT.to_string()));
        }
        if !state.profiles.contains_key(&token.creator_id) {
            return Err(IvfError::NotFound("Profile not found.".to_string()));
        }

        let record = ReferralToken {
            id: Uuid::new_v4(),
            creator_id: token.creator_id,
            token: token.token.clone(),
            first_name: token.first_name.clone(),
            last_name: token.last_name.clone(),
            created_at: Utc::now(),
        };
        let seq = state.next_seq();
        state.tokens.insert(
            record.id,
            Row {
                seq,
                value: record.clone(),
            },
        );

        state
            .token_view(&record)
            .ok_or_else(|| IvfError::Internal("Token creator vanished".to_string()))
    }

    async fn get_referral_token(&self, token: &str) -> Result<Option<ReferralTokenView>> {
        let state = self.state.read().await;
        Ok(state
            .tokens
            .values()
            .find(|t| t.value.token == token)
            .and_then(|t| state.token_view(&t.value)))
    }

    async fn list_referral_tokens(
        &self,
        filter: &TokenFilter,
        page: PageRequest,
    ) -> Result<Page<ReferralTokenView>> {
        let state = self.state.read().await;
        let rows = state
            .tokens
            .values()
            .filter(|t| filter.creator_id.map_or(true, |id| t.value.creator_id == id))
            .filter(|t| contains_ignore_case(&t.value.token, filter.token_contains.as_deref()))
            .filter(|t| filter.created.contains(t.value.created_at))
            .filter_map(|t| {
                state
                    .token_view(&t.value)
                    .map(|view| (t.seq, t.value.created_at, view))
            });

        Ok(Page::from_sorted(sorted(rows), page))
    }

    async fn delete_referral_token(&self, id: Uuid) -> Result<()> {
        let mut state = self.state.write().await;
        if !state.tokens.contains_key(&id) {
            return Err(IvfError::NotFound("Referral token not found.".to_string()));
        }
        state.remove_token(id);
        Ok(())
    }

    async fn relationship_exists_for_token(&self, token_id: Uuid) -> Result<bool> {
        let state = self.state.read().await;
        Ok(state
            .relationships
            .values()
            .any(|r| r.value.token_id == token_id))
    }

    async fn get_relationship_by_token(
        &self,
        token: &str,
    ) -> Result<Option<ReferralRelationshipView>> {
        let state = self.state.read().await;
        let Some(token_id) = state
            .tokens
            .values()
            .find(|t| t.value.token == token)
            .map(|t| t.value.id)
        else {
            return Ok(None);
        };

        Ok(state
            .relationships
            .values()
            .find(|r| r.value.token_id == token_id)
            .and_then(|r| state.relationship_view(&r.value)))
    }

    async fn list_relationships(
        &self,
        filter: &RelationshipFilter,
        page: PageRequest,
    ) -> Result<Page<ReferralRelationshipView>> {
        let state = self.state.read().await;
        let rows = state
            .relationships
            .values()
            .filter(|r| filter.referrer_id.map_or(true, |id| r.value.referrer_id == id))
            .filter(|r| filter.created.contains(r.value.created_at))
            .filter_map(|r| {
                state
                    .relationship_view(&r.value)
                    .map(|view| (r.seq, r.value.created_at, view))
            })
            .filter(|(_, _, view)| {
                contains_ignore_case(&view.token.token, filter.token_contains.as_deref())
            });

        Ok(Page::from_sorted(sorted(rows), page))
    }

    // ========== 患者 ==========

    async fn insert_patient(&self, patient: &NewPatient) -> Result<Patient> {
        let mut state = self.state.write().await;
        if !state.profiles.contains_key(&patient.manager_id) {
            return Err(IvfError::NotFound("Profile not found.".to_string()));
        }

        let now = Utc::now();
        let record = Patient {
            id: Uuid::new_v4(),
            manager_id: patient.manager_id,
            first_name: patient.first_name.clone(),
            last_name: patient.last_name.clone(),
            created_at: now,
            updated_at: now,
        };
        let seq = state.next_seq();
        state.patients.insert(
            record.id,
            Row {
                seq,
                value: record.clone(),
            },
        );
        Ok(record)
    }

    async fn get_patient(&self, id: Uuid) -> Result<Option<Patient>> {
        let state = self.state.read().await;
        Ok(state.patients.get(&id).map(|row| row.value.clone()))
    }

    async fn list_patients(
        &self,
        manager_id: Option<Uuid>,
        page: PageRequest,
    ) -> Result<Page<Patient>> {
        let state = self.state.read().await;
        let rows = state
            .patients
            .values()
            .filter(|p| manager_id.map_or(true, |id| p.value.manager_id == id))
            .map(|p| (p.seq, p.value.created_at, p.value.clone()));

        Ok(Page::from_sorted(sorted(rows), page))
    }

    async fn update_patient(&self, id: Uuid, update: &PatientUpdate) -> Result<Patient> {
        let mut state = self.state.write().await;
        let row = state
            .patients
            .get_mut(&id)
            .ok_or_else(|| IvfError::NotFound("Patient not found.".to_string()))?;

        if let Some(first_name) = &update.first_name {
            row.value.first_name = first_name.clone();
        }
        if let Some(last_name) = &update.last_name {
            row.value.last_name = last_name.clone();
        }
        row.value.updated_at = Utc::now();
        Ok(row.value.clone())
    }

    async fn delete_patient(&self, id: Uuid) -> Result<()> {
        let mut state = self.state.write().await;
        if !state.patients.contains_key(&id) {
            return Err(IvfError::NotFound("Patient not found.".to_string()));
        }
        state.remove_patient(id);
        Ok(())
    }

    // ========== 预测记录 ==========

    async fn insert_prediction(&self, prediction: &NewPrediction) -> Result<PredictionRecord> {
        let mut state = self.state.write().await;
        if !state.profiles.contains_key(&prediction.owner_id) {
            return Err(IvfError::NotFound("Profile not found.".to_string()));
        }
        if let Some(patient_id) = prediction.patient_id {
            if !state.patients.contains_key(&patient_id) {
                return Err(IvfError::NotFound("Patient not found.".to_string()));
            }
        }

        let record = PredictionRecord {
            id: Uuid::new_v4(),
            owner_id: prediction.owner_id,
            owner_kind: prediction.owner_kind,
            patient_id: prediction.patient_id,
            features: prediction.features,
            result: prediction.result,
            probability: prediction.probability,
            model_version: prediction.model_version.clone(),
            created_at: Utc::now(),
        };
        let seq = state.next_seq();
        state.predictions.insert(
            record.id,
            Row {
                seq,
                value: record.clone(),
            },
        );
        Ok(record)
    }

    async fn get_prediction(&self, id: Uuid) -> Result<Option<PredictionRecord>> {
        let state = self.state.read().await;
        Ok(state.predictions.get(&id).map(|row| row.value.clone()))
    }

    async fn list_predictions(
        &self,
        filter: &PredictionFilter,
        page: PageRequest,
    ) -> Result<Page<PredictionRecord>> {
        let state = self.state.read().await;
        let rows = state
            .predictions
            .values()
            .filter(|p| filter.owner_id.map_or(true, |id| p.value.owner_id == id))
            .filter(|p| filter.result.map_or(true, |r| p.value.result == r))
            .filter(|p| filter.created.contains(p.value.created_at))
            .map(|p| (p.seq, p.value.created_at, p.value.clone()));

        Ok(Page::from_sorted(sorted(rows), page))
    }

    async fn delete_prediction(&self, id: Uuid) -> Result<()> {
        let mut state = self.state.write().await;
        if state.predictions.remove(&id).is_none() {
            return Err(IvfError::NotFound("Prediction not found.".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ivf_core::{ClinicalFeatures, OwnerKind, Role};

    fn new_account(email: &str, role: Role) -> NewAccount {
        NewAccount {
            email: email.to_string(),
            password_hash: "x".to_string(),
            role,
            is_active: true,
            is_staff: false,
            is_superuser: false,
            first_name: String::new(),
            last_name: String::new(),
        }
    }

    fn features() -> ClinicalFeatures {
        ClinicalFeatures {
            female_age: 30,
            amh: 1.5,
            fsh: 6.2,
            no_embryos: 3,
            endometrial_thickness: 9.1,
            sperm_count: 40.0,
            sperm_morphology: 4,
            follicle_size: 18,
            retrieved_oocytes: 10,
            embryo_quality: 2,
            oocytes_mi: 1,
            oocytes_mii: 8,
        }
    }

    async fn doctor_with_token(store: &MemoryStore) -> (CreatedAccount, ReferralTokenView) {
        let doctor = store
            .create_account(&new_account("doc@clinic.org", Role::Doctor), None)
            .await
            .unwrap();
        let token = store
            .insert_referral_token(&NewReferralToken {
                creator_id: doctor.profile.id,
                token: "t".repeat(32),
                first_name: Some("Ann".to_string()),
                last_name: None,
            })
            .await
            .unwrap();
        (doctor, token)
    }

    #[tokio::test]
    async fn test_duplicate_email_conflicts() {
        let store = MemoryStore::new();
        store
            .create_account(&new_account("a@b.org", Role::Patient), None)
            .await
            .unwrap();
        let err = store
            .create_account(&new_account("a@b.org", Role::Patient), None)
            .await
            .unwrap_err();
        assert!(matches!(err, IvfError::Conflict(c) if c == EMAIL_CONSTRAINT));
    }

    #[tokio::test]
    async fn test_token_redeemed_once() {
        let store = MemoryStore::new();
        let (doctor, token) = doctor_with_token(&store).await;

        let first = store
            .create_account(&new_account("p1@b.org", Role::Patient), Some(token.id))
            .await
            .unwrap();
        let relationship = first.relationship.unwrap();
        assert_eq!(relationship.referrer_id, doctor.profile.id);
        assert_eq!(relationship.referred_id, Some(first.profile.id));

        let err = store
            .create_account(&new_account("p2@b.org", Role::Patient), Some(token.id))
            .await
            .unwrap_err();
        assert!(matches!(err, IvfError::Conflict(c) if c == RELATIONSHIP_TOKEN_CONSTRAINT));
        // 失败的兑换不留下账户
        assert!(store.get_account_by_email("p2@b.org").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_token_value_conflicts() {
        let store = MemoryStore::new();
        let (doctor, token) = doctor_with_token(&store).await;
        let err = store
            .insert_referral_token(&NewReferralToken {
                creator_id: doctor.profile.id,
                token: token.token.clone(),
                first_name: None,
                last_name: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, IvfError::Conflict(c) if c == TOKEN_VALUE_CONSTRAINT));
    }

    #[tokio::test]
    async fn test_deleting_referred_account_keeps_token_consumed() {
        let store = MemoryStore::new();
        let (_, token) = doctor_with_token(&store).await;
        let patient = store
            .create_account(&new_account("p@b.org", Role::Patient), Some(token.id))
            .await
            .unwrap();

        store.delete_account(patient.account.id).await.unwrap();

        assert!(store.relationship_exists_for_token(token.id).await.unwrap());
        let view = store
            .get_relationship_by_token(&token.token)
            .await
            .unwrap()
            .unwrap();
        assert!(view.referred.is_none());
    }

    #[tokio::test]
    async fn test_deleting_doctor_cascades() {
        let store = MemoryStore::new();
        let (doctor, token) = doctor_with_token(&store).await;
        let patient = store
            .insert_patient(&NewPatient {
                manager_id: doctor.profile.id,
                first_name: "A".to_string(),
                last_name: "B".to_string(),
            })
            .await
            .unwrap();
        let prediction = store
            .insert_prediction(&NewPrediction {
                owner_id: doctor.profile.id,
                owner_kind: OwnerKind::DoctorAuthored,
                patient_id: Some(patient.id),
                features: features(),
                result: 1,
                probability: Some(0.7),
                model_version: "test".to_string(),
            })
            .await
            .unwrap();

        store.delete_account(doctor.account.id).await.unwrap();

        assert!(store.get_referral_token(&token.token).await.unwrap().is_none());
        assert!(store.get_patient(patient.id).await.unwrap().is_none());
        assert!(store.get_prediction(prediction.id).await.unwrap().is_none());
        assert!(store.get_profile(doctor.profile.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_deleting_patient_detaches_predictions() {
        let store = MemoryStore::new();
        let (doctor, _) = doctor_with_token(&store).await;
        let patient = store
            .insert_patient(&NewPatient {
                manager_id: doctor.profile.id,
                first_name: "A".to_string(),
                last_name: "B".to_string(),
            })
            .await
            .unwrap();
        let prediction = store
            .insert_prediction(&NewPrediction {
                owner_id: doctor.profile.id,
                owner_kind: OwnerKind::DoctorAuthored,
                patient_id: Some(patient.id),
                features: features(),
                result: 0,
                probability: None,
                model_version: "test".to_string(),
            })
            .await
            .unwrap();

        store.delete_patient(patient.id).await.unwrap();

        let kept = store.get_prediction(prediction.id).await.unwrap().unwrap();
        assert_eq!(kept.patient_id, None);
    }

    #[tokio::test]
    async fn test_list_orders_by_insertion_and_filters() {
        let store = MemoryStore::new();
        let (doctor, _) = doctor_with_token(&store).await;
        for name in ["one", "two", "three"] {
            store
                .insert_patient(&NewPatient {
                    manager_id: doctor.profile.id,
                    first_name: name.to_string(),
                    last_name: "X".to_string(),
                })
                .await
                .unwrap();
        }

        let page = store
            .list_patients(Some(doctor.profile.id), PageRequest::new(Some(1), 2))
            .await
            .unwrap();
        assert_eq!(page.total_objects, 3);
        let names: Vec<_> = page.items.iter().map(|p| p.first_name.as_str()).collect();
        assert_eq!(names, vec!["one", "two"]);

        let other = store
            .list_patients(Some(Uuid::new_v4()), PageRequest::default())
            .await
            .unwrap();
        assert_eq!(other.total_objects, 0);

        let tokens = store
            .list_referral_tokens(
                &TokenFilter {
                    token_contains: Some("TTT".to_string()),
                    ..Default::default()
                },
                PageRequest::default(),
            )
            .await
            .unwrap();
        assert_eq!(tokens.total_objects, 1);
    }

    #[tokio::test]
    async fn test_session_cleanup() {
        let store = MemoryStore::new();
        let doctor = store
            .create_account(&new_account("doc@clinic.org", Role::Doctor), None)
            .await
            .unwrap();
        let other = store
            .create_account(&new_account("other@clinic.org", Role::Doctor), None)
            .await
            .unwrap();

        let now = Utc::now();
        let session = |hash: &str, account_id: Uuid, hours: i64| Session {
            token_hash: hash.to_string(),
            account_id,
            created_at: now - chrono::Duration::hours(2),
            expires_at: now + chrono::Duration::hours(hours),
        };
        for s in [
            session("current", doctor.account.id, 1),
            session("phone", doctor.account.id, 1),
            session("stale", doctor.account.id, -1),
            session("other", other.account.id, 1),
        ] {
            store.create_session(&s).await.unwrap();
        }

        assert_eq!(store.delete_expired_sessions(now).await.unwrap(), 1);
        assert!(store.get_session("stale").await.unwrap().is_none());

        let removed = store
            .delete_account_sessions(doctor.account.id, Some("current"))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert!(store.get_session("current").await.unwrap().is_some());
        assert!(store.get_session("phone").await.unwrap().is_none());
        assert!(store.get_session("other").await.unwrap().is_some());
    }
}
