//! Sync algorithms
//!
//! The per-task business logic executed by workers: user sync (one person's
//! enrollments from their registry memberships), course sync (one course's
//! enrollments from its registry groups), and the full-sync fan-out that
//! expands the group-to-course map into per-course tasks.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info, warn};

use crate::config::BridgeConfig;
use crate::error::Result;
use crate::lms::{Enrollment, LmsApi, NewLmsUser};
use crate::queue::TaskQueue;
use crate::registry::{field_i64, field_str, RegistryApi};
use crate::storage::SyncCache;
use crate::task::SyncTask;

/// LMS account field holding the external id.
const LMS_USERNAME_FIELD: &str = "username";

/// Reconcile one person's enrollments from their current registry group
/// memberships. Debounced through the staleness store; a re-trigger within
/// the user TTL is a no-op.
pub fn sync_user(
    cache: &mut SyncCache,
    registry: &dyn RegistryApi,
    lms: &dyn LmsApi,
    config: &BridgeConfig,
    external_id: i64,
) -> Result<()> {
    if !cache.is_user_stale(external_id)? {
        debug!(external_id, "user recently synced, skipping");
        return Ok(());
    }
    debug!(external_id, "syncing user");
    let map = cache.panel_source_map(registry)?;

    let memberships = registry.iterate("GroupMember", &[("PartyID", &external_id.to_string())])?;
    let mut course_ids: BTreeSet<String> = BTreeSet::new();
    let mut email: Option<String> = None;
    for membership in &memberships {
        let group_id = match field_str(membership, &["Group", "GroupId"]) {
            Some(group_id) => group_id,
            None => continue,
        };
        if let Some(courses) = map.courses_for(group_id) {
            course_ids.extend(courses.iter().cloned());
            if email.is_none() {
                email = field_str(membership, &["Party", "Email"]).map(String::from);
            }
        }
    }

    if course_ids.is_empty() {
        debug!(external_id, "no mapped courses, nothing to enroll");
        cache.mark_user_synced(external_id)?;
        return Ok(());
    }

    let mut accounts = lms.lookup_users_by_field(LMS_USERNAME_FIELD, &[external_id])?;
    if !accounts.contains_key(&external_id) {
        debug!(external_id, "no LMS account, creating");
        lms.create_users(&[NewLmsUser {
            username: external_id.to_string(),
            email,
        }])?;
        accounts = lms.lookup_users_by_field(LMS_USERNAME_FIELD, &[external_id])?;
    }
    let account_id = match accounts.get(&external_id) {
        Some(account_id) => *account_id,
        None => {
            // next trigger retries; deliberately not marked synced
            warn!(external_id, "LMS account could not be resolved");
            return Ok(());
        }
    };

    let enrollments: Vec<Enrollment> = course_ids
        .into_iter()
        .map(|course_id| Enrollment {
            account_id,
            course_id,
        })
        .collect();
    lms.enroll_users(&enrollments, config.lms.student_role_id)?;
    cache.mark_user_synced(external_id)?;
    info!(external_id, enrollments = enrollments.len(), "user synced");
    Ok(())
}

/// Reconcile one course from the member lists of the given registry groups.
pub fn sync_course(
    registry: &dyn RegistryApi,
    lms: &dyn LmsApi,
    config: &BridgeConfig,
    course_id: &str,
    group_ids: &BTreeSet<String>,
) -> Result<()> {
    debug!(course_id, groups = group_ids.len(), "syncing course");
    let mut member_ids: BTreeSet<i64> = BTreeSet::new();
    let mut emails: BTreeMap<i64, Option<String>> = BTreeMap::new();
    for group_id in group_ids {
        for member in registry.iterate("GroupMemberSummary", &[("GroupID", group_id)])? {
            let external_id = match field_i64(&member, &["Party", "Id"]) {
                Some(external_id) => external_id,
                None => continue,
            };
            if member_ids.insert(external_id) {
                emails.insert(
                    external_id,
                    field_str(&member, &["Party", "Email"]).map(String::from),
                );
            }
        }
    }

    let ids: Vec<i64> = member_ids.iter().copied().collect();
    let mut accounts = lms.lookup_users_by_field(LMS_USERNAME_FIELD, &ids)?;
    let unresolved: Vec<i64> = ids
        .iter()
        .copied()
        .filter(|id| !accounts.contains_key(id))
        .collect();
    if !unresolved.is_empty() {
        debug!(count = unresolved.len(), course_id, "creating missing LMS accounts");
        let new_users: Vec<NewLmsUser> = unresolved
            .iter()
            .map(|id| NewLmsUser {
                username: id.to_string(),
                email: emails.get(id).cloned().flatten(),
            })
            .collect();
        lms.create_users(&new_users)?;
        accounts.extend(lms.lookup_users_by_field(LMS_USERNAME_FIELD, &unresolved)?);
    }

    let enrollments: Vec<Enrollment> = ids
        .iter()
        .filter_map(|id| accounts.get(id))
        .map(|account_id| Enrollment {
            account_id: *account_id,
            course_id: course_id.to_string(),
        })
        .collect();
    lms.enroll_users(&enrollments, config.lms.student_role_id)?;
    info!(course_id, enrollments = enrollments.len(), "course synced");
    Ok(())
}

/// Expand the group-to-course map into one `CourseSync` per distinct course,
/// followed by `FullSyncDone` and one poison pill per full-sync worker so the
/// dedicated worker set drains and exits deterministically.
pub fn full_sync_fan_out(
    cache: &mut SyncCache,
    registry: &dyn RegistryApi,
    queue: &TaskQueue,
    full_sync_workers: usize,
) -> Result<()> {
    let map = cache.panel_source_map(registry)?;
    let courses = map.invert();
    info!(courses = courses.len(), "fanning out full sync");
    for (course_id, group_ids) in courses {
        queue.enqueue(SyncTask::CourseSync {
            course_id,
            group_ids,
        });
    }
    queue.enqueue(SyncTask::FullSyncDone);
    for _ in 0..full_sync_workers {
        queue.enqueue(SyncTask::Terminate);
    }
    Ok(())
}
