//! Collaborator seams used by the workflows.
//!
//! The production implementations are [`HubSpotClient`] and [`TpsClient`];
//! tests substitute in-memory fakes.

use std::collections::BTreeMap;
use std::future::Future;

use tracing::warn;

use tpsync_compliance::TpsClient;
use tpsync_crm::HubSpotClient;
use tpsync_shared::{ComplianceResult, Record, Result};

/// Read access to the CRM collection.
pub trait RecordSource: Send + Sync {
    /// Every record in the collection with the given properties.
    fn fetch_all(&self, properties: &[String]) -> impl Future<Output = Result<Vec<Record>>> + Send;

    /// One record by id with the given properties.
    fn fetch_one(
        &self,
        id: &str,
        properties: &[String],
    ) -> impl Future<Output = Result<Record>> + Send;
}

/// Write access to CRM record properties.
pub trait CrmWriter: Send + Sync {
    fn update_properties(
        &self,
        id: &str,
        properties: &BTreeMap<String, String>,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// The compliance check API.
pub trait ComplianceCheck: Send + Sync {
    /// Largest batch one call accepts.
    fn max_batch(&self) -> usize;

    /// Results positionally aligned with `numbers`.
    fn check_batch(
        &self,
        numbers: &[String],
    ) -> impl Future<Output = Result<Vec<ComplianceResult>>> + Send;

    /// Single-number check; failures and empty answers become `None`.
    fn check_one(&self, number: &str) -> impl Future<Output = Option<ComplianceResult>> + Send {
        async move {
            match self.check_batch(&[number.to_string()]).await {
                Ok(mut results) => results.pop(),
                Err(e) => {
                    warn!(error = %e, "single-number compliance check failed");
                    None
                }
            }
        }
    }
}

impl RecordSource for HubSpotClient {
    fn fetch_all(&self, properties: &[String]) -> impl Future<Output = Result<Vec<Record>>> + Send {
        HubSpotClient::fetch_all(self, properties)
    }

    fn fetch_one(
        &self,
        id: &str,
        properties: &[String],
    ) -> impl Future<Output = Result<Record>> + Send {
        self.get_record(id, properties)
    }
}

impl CrmWriter for HubSpotClient {
    fn update_properties(
        &self,
        id: &str,
        properties: &BTreeMap<String, String>,
    ) -> impl Future<Output = Result<()>> + Send {
        HubSpotClient::update_properties(self, id, properties)
    }
}

impl ComplianceCheck for TpsClient {
    fn max_batch(&self) -> usize {
        TpsClient::max_batch(self)
    }

    fn check_batch(
        &self,
        numbers: &[String],
    ) -> impl Future<Output = Result<Vec<ComplianceResult>>> + Send {
        TpsClient::check_batch(self, numbers)
    }

    fn check_one(&self, number: &str) -> impl Future<Output = Option<ComplianceResult>> + Send {
        TpsClient::check_one(self, number)
    }
}
