//! Roles and the rule table that derives them from a subject's facts.

use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::{
  request::{Request, RequestState},
  subject::{Assignment, AssignmentKind, Service, Subject},
};

/// A role tag. Declaration order is priority order, so a `BTreeSet<Role>`
/// iterates from the most to the least privileged tag.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Role {
  #[serde(rename = "ROLE_ADMIN")]
  Admin,
  #[serde(rename = "ROLE_MANAGER")]
  Manager,
  #[serde(rename = "ROLE_RENFORT")]
  Renfort,
  #[serde(rename = "ROLE_COMMITTEE_MEMBER")]
  CommitteeMember,
  #[serde(rename = "ROLE_BENEFICIARY")]
  Beneficiary,
  #[serde(rename = "ROLE_INTERVENANT")]
  Intervenant,
  #[serde(rename = "ROLE_APPLICANT")]
  Applicant,
  #[serde(rename = "ROLE_USER")]
  User,
}

/// The persisted role set of a subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleSet {
  pub uid:         String,
  pub roles:       BTreeSet<Role>,
  pub computed_at: DateTime<Utc>,
  /// CAS token; 0 until first persisted.
  pub version:     i64,
}

impl RoleSet {
  /// The set every subject starts with.
  pub fn initial(uid: impl Into<String>) -> Self {
    Self {
      uid:         uid.into(),
      roles:       default_roles(),
      computed_at: Utc::now(),
      version:     0,
    }
  }

  /// Highest-priority tag held.
  pub fn primary(&self) -> Role {
    self.roles.iter().next().copied().unwrap_or(Role::User)
  }
}

pub fn default_roles() -> BTreeSet<Role> { BTreeSet::from([Role::User]) }

/// Everything the role rule reads. Services are the ones that resolved;
/// dangling references have already been dropped by the caller.
#[derive(Debug, Clone, Copy)]
pub struct RoleFacts<'a> {
  pub subject:     &'a Subject,
  pub services:    &'a [Service],
  pub assignments: &'a [Assignment],
  pub requests:    &'a [Request],
}

/// Apply the rule table. A subject may hold any number of tags at once;
/// `User` is always present.
pub fn compute_roles(facts: &RoleFacts<'_>, today: NaiveDate) -> BTreeSet<Role> {
  let mut roles = default_roles();
  let subject = facts.subject;

  if subject.admin {
    roles.insert(Role::Admin);
  }

  let in_active_service = facts
    .services
    .iter()
    .any(|s| s.active && subject.services.contains(&s.service_id));
  if subject.manager || in_active_service {
    roles.insert(Role::Manager);
  }

  if subject.renfort {
    roles.insert(Role::Renfort);
  }

  for assignment in facts
    .assignments
    .iter()
    .filter(|a| a.uid == subject.uid && a.period.covers(today))
  {
    roles.insert(match assignment.kind {
      AssignmentKind::Committee => Role::CommitteeMember,
      AssignmentKind::Beneficiary => Role::Beneficiary,
      AssignmentKind::Intervention => Role::Intervenant,
    });
  }

  if facts
    .requests
    .iter()
    .any(|r| r.uid == subject.uid && r.state == RequestState::Received)
  {
    roles.insert(Role::Applicant);
  }

  roles
}

#[cfg(test)]
mod tests {
  use uuid::Uuid;

  use super::*;
  use crate::calendar::Period;

  fn today() -> NaiveDate { NaiveDate::from_ymd_opt(2025, 1, 10).unwrap() }

  fn assignment(uid: &str, kind: AssignmentKind, period: Period) -> Assignment {
    Assignment {
      assignment_id: Uuid::new_v4(),
      uid: uid.into(),
      kind,
      label: "test".into(),
      period,
    }
  }

  fn roles_of(subject: &Subject, services: &[Service], assignments: &[Assignment]) -> BTreeSet<Role> {
    compute_roles(
      &RoleFacts { subject, services, assignments, requests: &[] },
      today(),
    )
  }

  #[test]
  fn subject_without_facts_gets_default_set() {
    let subject = Subject::new("alice", "Alice");
    assert_eq!(roles_of(&subject, &[], &[]), default_roles());
  }

  #[test]
  fn manager_and_beneficiary_are_both_held() {
    let mut subject = Subject::new("alice", "Alice");
    subject.manager = true;
    let active = Period::open(NaiveDate::from_ymd_opt(2024, 9, 1).unwrap());
    let assignments = vec![assignment("alice", AssignmentKind::Beneficiary, active)];

    let roles = roles_of(&subject, &[], &assignments);
    assert!(roles.contains(&Role::Manager));
    assert!(roles.contains(&Role::Beneficiary));
    assert!(roles.contains(&Role::User));
  }

  #[test]
  fn removing_the_granting_fact_removes_the_role() {
    let subject = Subject::new("alice", "Alice");
    let active = Period::open(NaiveDate::from_ymd_opt(2024, 9, 1).unwrap());
    let with = vec![assignment("alice", AssignmentKind::Committee, active)];

    assert!(roles_of(&subject, &[], &with).contains(&Role::CommitteeMember));
    assert!(!roles_of(&subject, &[], &[]).contains(&Role::CommitteeMember));
  }

  #[test]
  fn expired_assignment_grants_nothing() {
    let subject = Subject::new("alice", "Alice");
    let expired = Period::new(
      NaiveDate::from_ymd_opt(2023, 9, 1).unwrap(),
      Some(NaiveDate::from_ymd_opt(2024, 9, 1).unwrap()),
    )
    .unwrap();
    let assignments = vec![assignment("alice", AssignmentKind::Intervention, expired)];
    assert_eq!(roles_of(&subject, &[], &assignments), default_roles());
  }

  #[test]
  fn only_active_services_grant_manager() {
    let service_id = Uuid::new_v4();
    let mut subject = Subject::new("bob", "Bob");
    subject.services = vec![service_id];
    let inactive = Service { service_id, name: "Old".into(), active: false };
    assert!(!roles_of(&subject, &[inactive.clone()], &[]).contains(&Role::Manager));

    let active = Service { active: true, ..inactive };
    assert!(roles_of(&subject, &[active], &[]).contains(&Role::Manager));
  }

  #[test]
  fn primary_follows_priority() {
    let mut set = RoleSet::initial("alice");
    set.roles.insert(Role::Beneficiary);
    set.roles.insert(Role::Renfort);
    assert_eq!(set.primary(), Role::Renfort);
  }
}
