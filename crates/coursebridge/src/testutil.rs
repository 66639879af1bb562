//! In-crate mock adapters for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

use serde_json::json;

use crate::config::RegistryConfig;
use crate::error::Result;
use crate::lms::{Enrollment, LmsApi, NewLmsUser};
use crate::registry::{Record, RegistryApi};

const TEST_PANEL_QUERY: &str = "PanelSource";

fn record(value: serde_json::Value) -> Record {
    match value {
        serde_json::Value::Object(map) => map,
        _ => unreachable!("test records are objects"),
    }
}

/// Canned registry serving the entity types the sync algorithms read.
#[derive(Default)]
pub struct MockRegistry {
    admin_groups: Vec<Record>,
    product_groups: Vec<Record>,
    query_rows: Vec<Record>,
    user_memberships: HashMap<i64, Vec<Record>>,
    group_members: HashMap<String, Vec<Record>>,
    pub calls: AtomicUsize,
}

impl MockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A config whose query name and product class match this mock's data.
    pub fn config(&self) -> RegistryConfig {
        RegistryConfig {
            panel_source_query: TEST_PANEL_QUERY.to_string(),
            ..RegistryConfig::default()
        }
    }

    pub fn with_admin_group(mut self, group_id: &str) -> Self {
        self.admin_groups.push(record(json!({ "GroupId": group_id })));
        self
    }

    pub fn with_product_group(mut self, name: &str, group_id: &str) -> Self {
        self.product_groups
            .push(record(json!({ "Name": name, "GroupId": group_id })));
        self
    }

    pub fn with_mapping(mut self, code: &str, courses: &str) -> Self {
        self.query_rows.push(record(json!({
            "REGISTRY_SIDE": code,
            "LMS_SIDE": courses,
        })));
        self
    }

    pub fn with_user_membership(
        mut self,
        external_id: i64,
        group_id: &str,
        email: Option<&str>,
    ) -> Self {
        self.user_memberships
            .entry(external_id)
            .or_default()
            .push(record(json!({
                "Group": { "GroupId": group_id },
                "Party": { "Id": external_id.to_string(), "Email": email },
            })));
        self
    }

    pub fn with_group_member(
        mut self,
        group_id: &str,
        external_id: i64,
        email: Option<&str>,
    ) -> Self {
        self.group_members
            .entry(group_id.to_string())
            .or_default()
            .push(record(json!({
                "Party": { "Id": external_id.to_string(), "Email": email },
            })));
        self
    }
}

impl RegistryApi for MockRegistry {
    fn iterate(&self, entity_type: &str, filters: &[(&str, &str)]) -> Result<Vec<Record>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let filter = |name: &str| {
            filters
                .iter()
                .find(|(field, _)| *field == name)
                .map(|(_, value)| *value)
        };
        let records = match entity_type {
            "Group" => match filter("GroupClassId") {
                Some("EVENT") => self.admin_groups.clone(),
                Some(_) => self.product_groups.clone(),
                None => Vec::new(),
            },
            "query" => match filter("QueryName") {
                Some(name) if name == TEST_PANEL_QUERY => self.query_rows.clone(),
                _ => Vec::new(),
            },
            "GroupMember" => filter("PartyID")
                .and_then(|id| id.parse::<i64>().ok())
                .and_then(|id| self.user_memberships.get(&id).cloned())
                .unwrap_or_default(),
            "GroupMemberSummary" => filter("GroupID")
                .and_then(|id| self.group_members.get(id).cloned())
                .unwrap_or_default(),
            _ => Vec::new(),
        };
        Ok(records)
    }
}

/// In-memory LMS that records every write it receives.
#[derive(Default)]
pub struct MockLms {
    accounts: Mutex<HashMap<i64, u64>>,
    next_account_id: AtomicU64,
    pub created: Mutex<Vec<NewLmsUser>>,
    pub enrollments: Mutex<Vec<Enrollment>>,
    pub lookups: AtomicUsize,
    /// Usernames whose creation silently fails.
    pub refuse_creation: Mutex<Vec<String>>,
}

impl MockLms {
    pub fn new() -> Self {
        Self {
            next_account_id: AtomicU64::new(100),
            ..Self::default()
        }
    }

    pub fn with_account(self, external_id: i64, account_id: u64) -> Self {
        self.accounts
            .lock()
            .unwrap()
            .insert(external_id, account_id);
        self
    }

    pub fn account_for(&self, external_id: i64) -> Option<u64> {
        self.accounts.lock().unwrap().get(&external_id).copied()
    }
}

impl LmsApi for MockLms {
    fn lookup_users_by_field(&self, _field: &str, values: &[i64]) -> Result<HashMap<i64, u64>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let accounts = self.accounts.lock().unwrap();
        Ok(values
            .iter()
            .filter_map(|id| accounts.get(id).map(|account| (*id, *account)))
            .collect())
    }

    fn create_users(&self, users: &[NewLmsUser]) -> Result<()> {
        let refused = self.refuse_creation.lock().unwrap().clone();
        for user in users {
            self.created.lock().unwrap().push(user.clone());
            if refused.contains(&user.username) {
                continue;
            }
            if let Ok(external_id) = user.username.parse::<i64>() {
                let account_id = self.next_account_id.fetch_add(1, Ordering::SeqCst);
                self.accounts
                    .lock()
                    .unwrap()
                    .insert(external_id, account_id);
            }
        }
        Ok(())
    }

    fn enroll_users(&self, enrollments: &[Enrollment], _role_id: u32) -> Result<()> {
        self.enrollments
            .lock()
            .unwrap()
            .extend_from_slice(enrollments);
        Ok(())
    }
}
