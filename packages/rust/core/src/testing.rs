//! In-memory collaborators for workflow tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use tpsync_shared::{ComplianceResult, Record, Result, TpsyncError};

use crate::ports::{ComplianceCheck, CrmWriter, RecordSource};

/// Fake CRM: a fixed record set for reads and a property map for writes.
#[derive(Default)]
pub struct FakeCrm {
    records: Vec<Record>,
    written: Mutex<BTreeMap<String, BTreeMap<String, String>>>,
    /// Remaining failing PATCH attempts per entity id.
    failures: Mutex<HashMap<String, usize>>,
    pub fetch_all_calls: AtomicUsize,
    pub fetch_one_calls: AtomicUsize,
    pub patch_calls: AtomicUsize,
}

impl FakeCrm {
    pub fn new(records: Vec<Record>) -> Self {
        Self {
            records,
            ..Self::default()
        }
    }

    /// Make the next `times` PATCH attempts for `id` fail with a 503.
    pub fn fail_patches(&self, id: &str, times: usize) {
        self.failures
            .lock()
            .unwrap()
            .insert(id.to_string(), times);
    }

    /// Properties written so far, keyed by entity id.
    pub fn written(&self) -> BTreeMap<String, BTreeMap<String, String>> {
        self.written.lock().unwrap().clone()
    }
}

impl RecordSource for FakeCrm {
    fn fetch_all(&self, properties: &[String]) -> impl Future<Output = Result<Vec<Record>>> + Send {
        self.fetch_all_calls.fetch_add(1, Ordering::SeqCst);
        let records: Vec<Record> = self
            .records
            .iter()
            .map(|r| project(r, properties))
            .collect();
        async move { Ok(records) }
    }

    fn fetch_one(
        &self,
        id: &str,
        properties: &[String],
    ) -> impl Future<Output = Result<Record>> + Send {
        self.fetch_one_calls.fetch_add(1, Ordering::SeqCst);
        let found = self
            .records
            .iter()
            .find(|r| r.id == id)
            .map(|r| project(r, properties))
            .ok_or_else(|| TpsyncError::upstream("CRM", 404, "not found"));
        async move { found }
    }
}

impl CrmWriter for FakeCrm {
    fn update_properties(
        &self,
        id: &str,
        properties: &BTreeMap<String, String>,
    ) -> impl Future<Output = Result<()>> + Send {
        self.patch_calls.fetch_add(1, Ordering::SeqCst);
        let outcome = {
            let mut failures = self.failures.lock().unwrap();
            match failures.get_mut(id) {
                Some(left) if *left > 0 => {
                    *left -= 1;
                    Err(TpsyncError::upstream("CRM", 503, "unavailable"))
                }
                _ => {
                    self.written
                        .lock()
                        .unwrap()
                        .entry(id.to_string())
                        .or_default()
                        .extend(properties.clone());
                    Ok(())
                }
            }
        };
        async move { outcome }
    }
}

fn project(record: &Record, properties: &[String]) -> Record {
    Record {
        id: record.id.clone(),
        properties: record
            .properties
            .iter()
            .filter(|(name, _)| properties.contains(name))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
    }
}

/// Fake compliance API answering positionally from a listed-number set.
pub struct FakeChecker {
    max_batch: usize,
    listed: HashSet<String>,
    /// When set, result `i` of every batch is listed iff `positions[i]`.
    positions: Option<Vec<bool>>,
    /// 1-based call number that fails with a 500.
    fail_on_call: Option<usize>,
    /// Return one result fewer than requested.
    short_answer: bool,
    calls: Mutex<Vec<Vec<String>>>,
}

impl FakeChecker {
    pub fn new(max_batch: usize) -> Self {
        Self {
            max_batch,
            listed: HashSet::new(),
            positions: None,
            fail_on_call: None,
            short_answer: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn listing(mut self, numbers: &[&str]) -> Self {
        self.listed.extend(numbers.iter().map(|n| n.to_string()));
        self
    }

    pub fn listing_positions(mut self, positions: &[bool]) -> Self {
        self.positions = Some(positions.to_vec());
        self
    }

    pub fn failing_on_call(mut self, call: usize) -> Self {
        self.fail_on_call = Some(call);
        self
    }

    pub fn short_answers(mut self) -> Self {
        self.short_answer = true;
        self
    }

    /// Every batch submitted so far, in order.
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }
}

impl ComplianceCheck for FakeChecker {
    fn max_batch(&self) -> usize {
        self.max_batch
    }

    fn check_batch(
        &self,
        numbers: &[String],
    ) -> impl Future<Output = Result<Vec<ComplianceResult>>> + Send {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(numbers.to_vec());
            calls.len()
        };
        let outcome = if self.fail_on_call == Some(call) {
            Err(TpsyncError::upstream("compliance API", 500, "internal error"))
        } else {
            let mut results: Vec<ComplianceResult> = numbers
                .iter()
                .enumerate()
                .map(|(i, n)| ComplianceResult {
                    phone_number: n.clone(),
                    on_tps: match &self.positions {
                        Some(positions) => positions.get(i).copied().unwrap_or(false),
                        None => self.listed.contains(n),
                    },
                    on_ctps: false,
                })
                .collect();
            if self.short_answer {
                results.pop();
            }
            Ok(results)
        };
        async move { outcome }
    }
}
