//! 患者管理

use ivf_core::{Capabilities, IvfError, Page, PageRequest, Patient, Result};
use ivf_database::{NewPatient, PatientUpdate, Store};
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::validation::clean_name;

const PATIENT_NAME_MAX_LEN: usize = 255;

/// 患者创建/修改请求；管理医生始终取自调用方
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PatientInput {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

pub struct PatientService {
    store: Arc<dyn Store>,
}

impl PatientService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn create(&self, caps: &Capabilities, input: PatientInput) -> Result<Patient> {
        let manager_id = caps.require_patient_management()?;
        let (first_name, last_name) = clean_names(&input, true)?;

        let patient = self
            .store
            .insert_patient(&NewPatient {
                manager_id,
                first_name: first_name.unwrap_or_default(),
                last_name: last_name.unwrap_or_default(),
            })
            .await?;

        info!("Patient {} created by profile {}", patient.id, manager_id);
        Ok(patient)
    }

    pub async fn list(&self, caps: &Capabilities, page: PageRequest) -> Result<Page<Patient>> {
        let scope = caps.patient_scope()?;
        self.store
            .list_patients(scope.owner_filter(), page)
            .await?
            .ensure_in_range()
    }

    pub async fn get(&self, caps: &Capabilities, id: Uuid) -> Result<Patient> {
        let scope = caps.patient_scope()?;
        let patient = self
            .store
            .get_patient(id)
            .await?
            .ok_or_else(|| IvfError::NotFound("Patient not found.".to_string()))?;
        scope.ensure_visible(patient.manager_id, "Patient")?;
        Ok(patient)
    }

    /// 部分修改，只写入提供的字段
    pub async fn update(&self, caps: &Capabilities, id: Uuid, input: PatientInput) -> Result<Patient> {
        caps.require_patient_management()?;
        let patient = self.get(caps, id).await?;
        let (first_name, last_name) = clean_names(&input, false)?;

        self.store
            .update_patient(
                patient.id,
                &PatientUpdate {
                    first_name,
                    last_name,
                },
            )
            .await
    }

    pub async fn delete(&self, caps: &Capabilities, id: Uuid) -> Result<()> {
        caps.require_patient_management()?;
        let patient = self.get(caps, id).await?;
        self.store.delete_patient(patient.id).await?;
        info!("Patient {} deleted", patient.id);
        Ok(())
    }
}

/// 创建时两个姓名都必填；修改时只校验出现的字段，出现即不可为空
fn clean_names(input: &PatientInput, creating: bool) -> Result<(Option<String>, Option<String>)> {
    let mut errors = Vec::new();
    let mut clean = |field: &str, value: &Option<String>| {
        let required = creating || value.is_some();
        clean_name(field, value.as_deref(), PATIENT_NAME_MAX_LEN, required).unwrap_or_else(|e| {
            errors.push(e);
            None
        })
    };

    let first_name = clean("first_name", &input.first_name);
    let last_name = clean("last_name", &input.last_name);
    if !errors.is_empty() {
        return Err(IvfError::Validation(errors));
    }
    Ok((first_name, last_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ivf_core::{Caller, Role, ScopeResolver};
    use ivf_database::{MemoryStore, NewAccount};

    async fn caps(store: &Arc<dyn Store>, email: &str, role: Role) -> Capabilities {
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

    fn input(first: &str, last: &str) -> PatientInput {
        PatientInput {
            first_name: Some(first.to_string()),
            last_name: Some(last.to_string()),
        }
    }

    #[tokio::test]
    async fn test_doctor_manages_own_patients() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let doctor = caps(&store, "d@b.org", Role::Doctor).await;
        let other = caps(&store, "o@b.org", Role::Doctor).await;
        let root = caps(&store, "r@b.org", Role::Superuser).await;
        let service = PatientService::new(store);

        let patient = service.create(&doctor, input(" Eve ", "Doe")).await.unwrap();
        assert_eq!(patient.first_name, "Eve");
        assert_eq!(Some(patient.manager_id), doctor.profile_id);

        assert!(matches!(
            service.get(&other, patient.id).await,
            Err(IvfError::NotFound(_))
        ));
        assert_eq!(service.list(&other, PageRequest::default()).await.unwrap().total_objects, 0);
        assert_eq!(service.list(&root, PageRequest::default()).await.unwrap().total_objects, 1);

        let updated = service
            .update(
                &doctor,
                patient.id,
                PatientInput {
                    first_name: None,
                    last_name: Some("Smith".to_string()),
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.first_name, "Eve");
        assert_eq!(updated.last_name, "Smith");

        service.delete(&doctor, patient.id).await.unwrap();
        assert!(matches!(
            service.get(&doctor, patient.id).await,
            Err(IvfError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_patient_role_is_denied() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let patient = caps(&store, "p@b.org", Role::Patient).await;
        let service = PatientService::new(store);

        assert!(matches!(
            service.create(&patient, input("A", "B")).await,
            Err(IvfError::PermissionDenied(_))
        ));
        assert!(matches!(
            service.list(&patient, PageRequest::default()).await,
            Err(IvfError::PermissionDenied(_))
        ));
    }

    #[tokio::test]
    async fn test_names_are_validated() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let doctor = caps(&store, "d@b.org", Role::Doctor).await;
        let service = PatientService::new(store);

        let err = service
            .create(&doctor, PatientInput::default())
            .await
            .unwrap_err();
        assert_eq!(err.details().len(), 2);

        let err = service
            .create(&doctor, input("A", &"x".repeat(256)))
            .await
            .unwrap_err();
        assert_eq!(err.details()[0].field, "last_name");
    }
}
