//! LMS (course platform) adapter
//!
//! The LMS exposes a form-encoded RPC endpoint: every call POSTs `wstoken`,
//! `wsfunction` and indexed form keys to a single URL. List-valued arguments
//! are flattened as `name[i]` / `name[i][field]` keys. The user-lookup
//! response is a structured text document we only need two fields from, so it
//! is scraped with a fixed pattern rather than parsed in full.

use std::collections::HashMap;

use regex::Regex;
use tracing::{debug, warn};

use crate::config::LmsConfig;
use crate::error::{BridgeError, Result};

/// Extracts (account id, username) pairs from a user-lookup response.
const ACCOUNT_ID_PATTERN: &str = concat!(
    r#"<KEY name="id">\s+<VALUE>([^<]+)</VALUE>\s+</KEY>\s+"#,
    r#"<KEY name="username">\s+<VALUE>([^<]+)</VALUE>"#
);

/// An account-to-course assignment, sent to the LMS and never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enrollment {
    pub account_id: u64,
    pub course_id: String,
}

/// Payload for creating one LMS account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLmsUser {
    /// LMS username, the decimal external id.
    pub username: String,
    pub email: Option<String>,
}

/// Write access to the LMS, as consumed by the sync algorithms.
pub trait LmsApi: Send {
    /// Resolve external ids to LMS account ids by the given account field.
    /// Ids absent from the result simply have no LMS account yet.
    fn lookup_users_by_field(&self, field: &str, values: &[i64]) -> Result<HashMap<i64, u64>>;

    /// Create accounts one RPC at a time. A failure for one user is logged
    /// and does not block the others; there is no batch atomicity.
    fn create_users(&self, users: &[NewLmsUser]) -> Result<()>;

    /// Enroll every (account, course) pair with the given role. Re-enrolling
    /// an already-enrolled user is a no-op at the LMS.
    fn enroll_users(&self, enrollments: &[Enrollment], role_id: u32) -> Result<()>;
}

/// Blocking HTTP client for the LMS web-service endpoint.
pub struct LmsClient {
    client: reqwest::blocking::Client,
    config: LmsConfig,
    account_id_pattern: Regex,
}

impl LmsClient {
    pub fn new(config: LmsConfig) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(config.request_timeout))
            .build()?;
        let account_id_pattern = Regex::new(ACCOUNT_ID_PATTERN)
            .map_err(|e| BridgeError::Lms(format!("account id pattern: {}", e)))?;
        Ok(Self {
            client,
            config,
            account_id_pattern,
        })
    }

    fn rpc(&self, wsfunction: &str, params: &[(String, String)]) -> Result<String> {
        let mut form = vec![
            ("wstoken".to_string(), self.config.sync_token.clone()),
            ("wsfunction".to_string(), wsfunction.to_string()),
        ];
        form.extend_from_slice(params);
        let url = format!(
            "{}/webservice/rest/server.php",
            self.config.url.trim_end_matches('/')
        );
        let response = self.client.post(&url).form(&form).send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(BridgeError::Lms(format!(
                "{} returned HTTP {}",
                wsfunction, status
            )));
        }
        Ok(response.text()?)
    }

    fn parse_lookup_response(&self, body: &str) -> HashMap<i64, u64> {
        let mut accounts = HashMap::new();
        for captures in self.account_id_pattern.captures_iter(body) {
            let account_id = captures[1].trim().parse::<u64>();
            let external_id = captures[2].trim().parse::<i64>();
            if let (Ok(account_id), Ok(external_id)) = (account_id, external_id) {
                accounts.insert(external_id, account_id);
            }
        }
        accounts
    }
}

fn lookup_form(field: &str, values: &[i64]) -> Vec<(String, String)> {
    let mut params = vec![("field".to_string(), field.to_string())];
    for (i, value) in values.iter().enumerate() {
        params.push((format!("values[{}]", i), value.to_string()));
    }
    params
}

fn create_user_form(user: &NewLmsUser) -> Vec<(String, String)> {
    let mut params = vec![
        ("users[0][username]".to_string(), user.username.clone()),
        ("users[0][createpassword]".to_string(), "1".to_string()),
    ];
    if let Some(email) = &user.email {
        params.push(("users[0][email]".to_string(), email.clone()));
    }
    params
}

fn enrollment_form(enrollments: &[Enrollment], role_id: u32) -> Vec<(String, String)> {
    let mut params = Vec::with_capacity(enrollments.len() * 3);
    for (i, e) in enrollments.iter().enumerate() {
        params.push((format!("enrolments[{}][roleid]", i), role_id.to_string()));
        params.push((format!("enrolments[{}][userid]", i), e.account_id.to_string()));
        params.push((format!("enrolments[{}][courseid]", i), e.course_id.clone()));
    }
    params
}

impl LmsApi for LmsClient {
    fn lookup_users_by_field(&self, field: &str, values: &[i64]) -> Result<HashMap<i64, u64>> {
        if values.is_empty() {
            return Ok(HashMap::new());
        }
        debug!(count = values.len(), field, "looking up LMS accounts");
        let body = self.rpc("core_user_get_users_by_field", &lookup_form(field, values))?;
        let accounts = self.parse_lookup_response(&body);
        debug!(resolved = accounts.len(), "LMS account lookup done");
        Ok(accounts)
    }

    fn create_users(&self, users: &[NewLmsUser]) -> Result<()> {
        for user in users {
            match self.rpc("core_user_create_users", &create_user_form(user)) {
                Ok(_) => debug!(username = %user.username, "created LMS account"),
                Err(e) => warn!(username = %user.username, error = %e, "LMS account creation failed"),
            }
        }
        Ok(())
    }

    fn enroll_users(&self, enrollments: &[Enrollment], role_id: u32) -> Result<()> {
        if enrollments.is_empty() {
            return Ok(());
        }
        debug!(count = enrollments.len(), "submitting enrollments");
        self.rpc(
            "enrol_manual_enrol_users",
            &enrollment_form(enrollments, role_id),
        )?;
        Ok(())
    }
}
