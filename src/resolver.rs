//! Access resolution over direct door grants and legacy group grants.
//!
//! Both grant kinds are honored; either one suffices. Direct grants are
//! checked first so the reported reason names the more specific grant.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::{Door, Group, User};
use crate::types::{DoorId, GroupId, UserId};

/// Read access to the entities a decision depends on.
pub trait Directory {
    /// Looks up a user.
    fn user(&self, id: &UserId) -> Option<&User>;

    /// Looks up a door.
    fn door(&self, id: &DoorId) -> Option<&Door>;

    /// Looks up a group.
    fn group(&self, id: &GroupId) -> Option<&Group>;
}

/// Why an access check ended the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccessReason {
    /// The door is listed in the user's direct grants.
    DirectGrant,
    /// The door's group is listed in the user's legacy grants.
    LegacyGroupGrant,
    UserNotFound,
    DoorNotFound,
    AccountInactive,
    FaceNotRegistered,
    NotAuthorizedForDoor,
}

impl AccessReason {
    /// Returns true for the two grant outcomes.
    pub fn is_granted(&self) -> bool {
        matches!(self, Self::DirectGrant | Self::LegacyGroupGrant)
    }

    /// Returns a human-readable description.
    pub fn message(&self) -> &'static str {
        match self {
            Self::DirectGrant => "direct door grant",
            Self::LegacyGroupGrant => "legacy group grant",
            Self::UserNotFound => "User not found",
            Self::DoorNotFound => "Door not found",
            Self::AccountInactive => "User account is inactive",
            Self::FaceNotRegistered => "Face not registered",
            Self::NotAuthorizedForDoor => "User not authorized for this door",
        }
    }
}

impl fmt::Display for AccessReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// Outcome of a single user/door check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessDecision {
    pub authorized: bool,
    pub reason: AccessReason,
}

impl From<AccessReason> for AccessDecision {
    fn from(reason: AccessReason) -> Self {
        Self {
            authorized: reason.is_granted(),
            reason,
        }
    }
}

/// A door reachable by a user and the grant that reaches it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoorGrant {
    pub door_id: DoorId,
    pub reason: AccessReason,
}

/// Decides whether a user may open a door.
///
/// Checks run in order and stop at the first failure: user exists, door
/// exists, account active, face registered, then the grants.
pub fn check_access<D>(directory: &D, user_id: &UserId, door_id: &DoorId) -> AccessDecision
where
    D: Directory + ?Sized,
{
    let Some(user) = directory.user(user_id) else {
        return AccessReason::UserNotFound.into();
    };
    let Some(door) = directory.door(door_id) else {
        return AccessReason::DoorNotFound.into();
    };
    if let Err(reason) = eligible(user) {
        return reason.into();
    }
    grant_for(user, door)
        .unwrap_or(AccessReason::NotAuthorizedForDoor)
        .into()
}

/// Returns every online door a user can open without naming one.
///
/// The result is the union of direct grants and all doors of legacy-granted
/// groups, in that order and without duplicates. Fails with the first failed
/// precondition when the user is unknown, inactive or not face-registered.
pub fn accessible_doors<D>(
    directory: &D,
    user_id: &UserId,
) -> std::result::Result<Vec<DoorGrant>, AccessReason>
where
    D: Directory + ?Sized,
{
    let user = directory.user(user_id).ok_or(AccessReason::UserNotFound)?;
    eligible(user)?;

    let mut seen = HashSet::new();
    let mut grants = Vec::new();
    let direct = user
        .authorized_doors
        .iter()
        .map(|door_id| (door_id, AccessReason::DirectGrant));
    let legacy = user
        .authorized_groups
        .iter()
        .filter_map(|group_id| directory.group(group_id))
        .flat_map(|group| group.doors.iter())
        .map(|door_id| (door_id, AccessReason::LegacyGroupGrant));

    for (door_id, reason) in direct.chain(legacy) {
        let Some(door) = directory.door(door_id) else {
            continue;
        };
        if door.is_online() && seen.insert(door_id.clone()) {
            grants.push(DoorGrant {
                door_id: door_id.clone(),
                reason,
            });
        }
    }
    Ok(grants)
}

fn eligible(user: &User) -> std::result::Result<(), AccessReason> {
    if !user.is_active {
        return Err(AccessReason::AccountInactive);
    }
    if !user.face_registered {
        return Err(AccessReason::FaceNotRegistered);
    }
    Ok(())
}

fn grant_for(user: &User, door: &Door) -> Option<AccessReason> {
    if user.authorized_doors.contains(&door.id) {
        return Some(AccessReason::DirectGrant);
    }
    if user.authorized_groups.contains(&door.group_id) {
        return Some(AccessReason::LegacyGroupGrant);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DoorStatus;
    use chrono::Utc;
    use std::collections::HashMap;

    #[derive(Default)]
    struct TestDirectory {
        users: HashMap<UserId, User>,
        doors: HashMap<DoorId, Door>,
        groups: HashMap<GroupId, Group>,
    }

    impl Directory for TestDirectory {
        fn user(&self, id: &UserId) -> Option<&User> {
            self.users.get(id)
        }

        fn door(&self, id: &DoorId) -> Option<&Door> {
            self.doors.get(id)
        }

        fn group(&self, id: &GroupId) -> Option<&Group> {
            self.groups.get(id)
        }
    }

    fn gid(value: &str) -> GroupId {
        GroupId::try_from(value).unwrap()
    }

    fn did(value: &str) -> DoorId {
        DoorId::try_from(value).unwrap()
    }

    fn uid(value: &str) -> UserId {
        UserId::try_from(value).unwrap()
    }

    impl TestDirectory {
        fn with_group(mut self, group: &str, doors: &[(&str, DoorStatus)]) -> Self {
            let now = Utc::now();
            self.groups.insert(
                gid(group),
                Group {
                    id: gid(group),
                    name: group.to_string(),
                    description: String::new(),
                    color: String::new(),
                    icon: String::new(),
                    doors: doors.iter().map(|(door, _)| did(door)).collect(),
                    authorized_users: Vec::new(),
                    created_at: now,
                    updated_at: now,
                },
            );
            for (door, status) in doors {
                self.doors.insert(
                    did(door),
                    Door {
                        id: did(door),
                        name: door.to_string(),
                        location: String::new(),
                        ip_address: String::new(),
                        port: 80,
                        status: *status,
                        is_locked: true,
                        group_id: gid(group),
                        created_at: now,
                        updated_at: now,
                    },
                );
            }
            self
        }

        fn with_user(mut self, user: &str, doors: &[&str], groups: &[&str]) -> Self {
            let now = Utc::now();
            self.users.insert(
                uid(user),
                User {
                    id: uid(user),
                    name: user.to_string(),
                    email: String::new(),
                    department: String::new(),
                    role: "employee".to_string(),
                    face_registered: true,
                    is_active: true,
                    authorized_groups: groups.iter().map(|g| gid(g)).collect(),
                    authorized_doors: doors.iter().map(|d| did(d)).collect(),
                    created_at: now,
                    updated_at: now,
                },
            );
            self
        }

        fn user_mut(&mut self, user: &str) -> &mut User {
            self.users.get_mut(&uid(user)).unwrap()
        }
    }

    fn campus() -> TestDirectory {
        TestDirectory::default()
            .with_group(
                "grp_hq",
                &[("d1", DoorStatus::Online), ("d2", DoorStatus::Offline)],
            )
            .with_group("grp_lab", &[("d3", DoorStatus::Online)])
    }

    #[test]
    fn check_access_should_allow_direct_grant() {
        let dir = campus().with_user("u1", &["d3"], &[]);
        let decision = check_access(&dir, &uid("u1"), &did("d3"));
        assert_eq!(
            decision,
            AccessDecision {
                authorized: true,
                reason: AccessReason::DirectGrant
            }
        );
    }

    #[test]
    fn check_access_should_allow_legacy_group_when_door_not_directly_granted() {
        let dir = campus().with_user("u1", &["d3"], &["grp_hq"]);
        let decision = check_access(&dir, &uid("u1"), &did("d2"));
        assert!(decision.authorized);
        assert_eq!(decision.reason, AccessReason::LegacyGroupGrant);
    }

    #[test]
    fn check_access_should_deny_without_grants() {
        let dir = campus().with_user("u1", &[], &[]);
        let decision = check_access(&dir, &uid("u1"), &did("d1"));
        assert!(!decision.authorized);
        assert_eq!(decision.reason, AccessReason::NotAuthorizedForDoor);
    }

    #[test]
    fn check_access_should_short_circuit_in_order() {
        let mut dir = campus().with_user("u1", &["d1"], &[]);
        assert_eq!(
            check_access(&dir, &uid("ghost"), &did("nope")).reason,
            AccessReason::UserNotFound
        );
        assert_eq!(
            check_access(&dir, &uid("u1"), &did("nope")).reason,
            AccessReason::DoorNotFound
        );

        dir.user_mut("u1").face_registered = false;
        dir.user_mut("u1").is_active = false;
        assert_eq!(
            check_access(&dir, &uid("u1"), &did("d1")).reason,
            AccessReason::AccountInactive
        );

        dir.user_mut("u1").is_active = true;
        assert_eq!(
            check_access(&dir, &uid("u1"), &did("d1")).reason,
            AccessReason::FaceNotRegistered
        );
    }

    #[test]
    fn accessible_doors_should_only_return_online_group_doors() {
        let dir = campus().with_user("u1", &[], &["grp_hq"]);
        let grants = accessible_doors(&dir, &uid("u1")).unwrap();
        assert_eq!(
            grants,
            vec![DoorGrant {
                door_id: did("d1"),
                reason: AccessReason::LegacyGroupGrant
            }]
        );
    }

    #[test]
    fn accessible_doors_should_union_without_duplicates() {
        let dir = campus().with_user("u1", &["d1", "d3"], &["grp_hq", "grp_lab"]);
        let doors: Vec<(String, AccessReason)> = accessible_doors(&dir, &uid("u1"))
            .unwrap()
            .into_iter()
            .map(|grant| (grant.door_id.to_string(), grant.reason))
            .collect();
        assert_eq!(
            doors,
            vec![
                ("d1".to_string(), AccessReason::DirectGrant),
                ("d3".to_string(), AccessReason::DirectGrant),
            ]
        );
    }

    #[test]
    fn accessible_doors_should_reject_inactive_user() {
        let mut dir = campus().with_user("u1", &["d1"], &[]);
        dir.user_mut("u1").is_active = false;
        assert_eq!(
            accessible_doors(&dir, &uid("u1")),
            Err(AccessReason::AccountInactive)
        );
        assert_eq!(
            accessible_doors(&dir, &uid("ghost")),
            Err(AccessReason::UserNotFound)
        );
    }
}
