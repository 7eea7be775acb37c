//! # IVF业务服务模块
//!
//! 账户与档案、推荐令牌、患者管理与预测流程。
//! 每个操作先经 [`ivf_core::ScopeResolver`] 得到调用方能力集，再访问存储。

pub mod identity;
pub mod patients;
pub mod prediction;
pub mod referral;
pub mod validation;

pub use identity::{
    AuthSettings, IdentityService, LoginResult, Me, NewUser, PasswordChange, ProfileUpdate,
    Registration,
};
pub use patients::{PatientInput, PatientService};
pub use prediction::{PipelineStage, PredictionPipeline, PredictionQuery, PredictionReply, PredictionSummary};
pub use referral::{NameHints, ReferralEngine, ReferralQuery, TokenDetail, TokenGenerator, MAX_TOKEN_ATTEMPTS};

use ivf_core::{Caller, Capabilities, ScopeResolver};
use ivf_database::Store;
use ivf_model::ModelProvider;
use std::sync::Arc;

/// 服务集合，供 Web 层共享
#[derive(Clone)]
pub struct Services {
    pub identity: Arc<IdentityService>,
    pub referrals: Arc<ReferralEngine>,
    pub patients: Arc<PatientService>,
    pub predictions: Arc<PredictionPipeline>,
    resolver: ScopeResolver,
}

impl Services {
    pub fn new(store: Arc<dyn Store>, model: Arc<ModelProvider>, auth: AuthSettings) -> Self {
        let referrals = Arc::new(ReferralEngine::new(store.clone()));
        Self {
            identity: Arc::new(IdentityService::new(store.clone(), referrals.clone(), auth)),
            referrals,
            patients: Arc::new(PatientService::new(store.clone())),
            predictions: Arc::new(PredictionPipeline::new(store, model)),
            resolver: ScopeResolver::new(),
        }
    }

    pub fn capabilities(&self, caller: &Caller) -> Capabilities {
        self.resolver.resolve(caller)
    }
}
