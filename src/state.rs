//! In-memory entity collections and their mutation rules.
//!
//! Every mutation keeps these invariants:
//! - a door's `group_id` names an existing group whose `doors` lists the door
//! - a user's grant sets only name existing doors and groups
//! - `group.authorized_users` mirrors the users holding a legacy grant on it
//!
//! Mutations report which collections they touched so the caller can persist
//! exactly those. A rejected mutation touches nothing.

use std::collections::{BTreeMap, HashSet};
use std::hash::Hash;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{EntityKind, Error, Result};
use crate::model::{
    AccessLogEntry, Door, DoorPatch, Group, GroupPatch, NewDoor, NewGroup, NewUser, User,
    UserPatch,
};
use crate::recorder::AccessLog;
use crate::resolver::Directory;
use crate::store::Collection;
use crate::types::{DoorId, GroupId, UserId};

/// Set of collections modified by a mutation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Dirty {
    groups: bool,
    doors: bool,
    users: bool,
    access_logs: bool,
}

impl Dirty {
    pub(crate) fn of(collections: &[Collection]) -> Self {
        let mut dirty = Self::default();
        for collection in collections {
            dirty.mark(*collection);
        }
        dirty
    }

    pub(crate) fn mark(&mut self, collection: Collection) {
        match collection {
            Collection::Groups => self.groups = true,
            Collection::Doors => self.doors = true,
            Collection::Users => self.users = true,
            Collection::AccessLogs => self.access_logs = true,
        }
    }

    pub(crate) fn contains(&self, collection: Collection) -> bool {
        match collection {
            Collection::Groups => self.groups,
            Collection::Doors => self.doors,
            Collection::Users => self.users,
            Collection::AccessLogs => self.access_logs,
        }
    }

    pub(crate) fn collections(self) -> impl Iterator<Item = Collection> {
        Collection::ALL
            .into_iter()
            .filter(move |collection| self.contains(*collection))
    }
}

/// Authoritative in-memory state of all four collections.
#[derive(Debug, Clone, Default)]
pub(crate) struct State {
    pub(crate) groups: BTreeMap<GroupId, Group>,
    pub(crate) doors: BTreeMap<DoorId, Door>,
    pub(crate) users: BTreeMap<UserId, User>,
    pub(crate) logs: AccessLog,
}

impl Directory for State {
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

impl State {
    pub(crate) fn with_log_capacity(capacity: usize) -> Self {
        Self {
            logs: AccessLog::new(capacity),
            ..Self::default()
        }
    }

    /// Serializes one collection as a pretty-printed JSON array.
    pub(crate) fn encode(&self, collection: Collection) -> Result<Vec<u8>> {
        let encoded = match collection {
            Collection::Groups => encode_values(self.groups.values())?,
            Collection::Doors => encode_values(self.doors.values())?,
            Collection::Users => encode_values(self.users.values())?,
            Collection::AccessLogs => encode_values(self.logs.iter())?,
        };
        Ok(encoded)
    }

    /// Replaces one collection from a stored JSON array.
    pub(crate) fn decode(&mut self, collection: Collection, document: &[u8]) -> Result<()> {
        match collection {
            Collection::Groups => {
                self.groups = decode_keyed(document, |group: &Group| group.id.clone())?;
            }
            Collection::Doors => {
                self.doors = decode_keyed(document, |door: &Door| door.id.clone())?;
            }
            Collection::Users => {
                self.users = decode_keyed(document, |user: &User| user.id.clone())?;
            }
            Collection::AccessLogs => {
                let entries: Vec<AccessLogEntry> = serde_json::from_slice(document)?;
                self.logs = AccessLog::from_entries(entries, self.logs.capacity());
            }
        }
        Ok(())
    }

    pub(crate) fn record(&mut self, entry: AccessLogEntry) -> Dirty {
        self.logs.push(entry);
        Dirty::of(&[Collection::AccessLogs])
    }

    fn group_mut(&mut self, id: &GroupId) -> Result<&mut Group> {
        self.groups
            .get_mut(id)
            .ok_or_else(|| Error::not_found(EntityKind::Group, id))
    }

    fn door_mut(&mut self, id: &DoorId) -> Result<&mut Door> {
        self.doors
            .get_mut(id)
            .ok_or_else(|| Error::not_found(EntityKind::Door, id))
    }

    fn user_mut(&mut self, id: &UserId) -> Result<&mut User> {
        self.users
            .get_mut(id)
            .ok_or_else(|| Error::not_found(EntityKind::User, id))
    }

    pub(crate) fn create_group(&mut self, input: NewGroup, now: DateTime<Utc>) -> (Group, Dirty) {
        let mut id = GroupId::generate();
        while self.groups.contains_key(&id) {
            id = GroupId::generate();
        }
        let group = Group {
            id: id.clone(),
            name: input.name,
            description: input.description,
            color: input.color,
            icon: input.icon,
            doors: Vec::new(),
            authorized_users: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        self.groups.insert(id, group.clone());
        (group, Dirty::of(&[Collection::Groups]))
    }

    pub(crate) fn update_group(
        &mut self,
        id: &GroupId,
        patch: GroupPatch,
        now: DateTime<Utc>,
    ) -> Result<(Group, Dirty)> {
        let group = self.group_mut(id)?;
        patch.apply(group);
        group.updated_at = now;
        Ok((group.clone(), Dirty::of(&[Collection::Groups])))
    }

    /// Deletes a group, its doors, and every grant referring to either.
    pub(crate) fn delete_group(&mut self, id: &GroupId, now: DateTime<Utc>) -> Result<Dirty> {
        let group = self
            .groups
            .remove(id)
            .ok_or_else(|| Error::not_found(EntityKind::Group, id))?;

        let mut removed_doors: HashSet<DoorId> = group.doors.into_iter().collect();
        // Doors pointing at the group but missing from its list go too.
        removed_doors.extend(
            self.doors
                .values()
                .filter(|door| &door.group_id == id)
                .map(|door| door.id.clone()),
        );
        self.doors.retain(|door_id, _| !removed_doors.contains(door_id));

        for user in self.users.values_mut() {
            let before = (user.authorized_groups.len(), user.authorized_doors.len());
            user.authorized_groups.retain(|group_id| group_id != id);
            user.authorized_doors.retain(|door_id| !removed_doors.contains(door_id));
            if before != (user.authorized_groups.len(), user.authorized_doors.len()) {
                user.updated_at = now;
            }
        }
        Ok(Dirty::of(&[
            Collection::Groups,
            Collection::Doors,
            Collection::Users,
        ]))
    }

    pub(crate) fn create_door(
        &mut self,
        input: NewDoor,
        now: DateTime<Utc>,
    ) -> Result<(Door, Dirty)> {
        if !self.groups.contains_key(&input.group_id) {
            return Err(Error::invalid_reference(EntityKind::Group, &input.group_id));
        }
        let mut id = DoorId::generate();
        while self.doors.contains_key(&id) {
            id = DoorId::generate();
        }
        let door = Door {
            id: id.clone(),
            name: input.name,
            location: input.location,
            ip_address: input.ip_address,
            port: input.port,
            status: Default::default(),
            is_locked: true,
            group_id: input.group_id.clone(),
            created_at: now,
            updated_at: now,
        };
        self.doors.insert(id.clone(), door.clone());
        let group = self.group_mut(&input.group_id)?;
        group.doors.push(id);
        group.updated_at = now;
        Ok((door, Dirty::of(&[Collection::Doors, Collection::Groups])))
    }

    /// Updates a door; a changed `group_id` moves it between group door lists.
    pub(crate) fn update_door(
        &mut self,
        id: &DoorId,
        mut patch: DoorPatch,
        now: DateTime<Utc>,
    ) -> Result<(Door, Dirty)> {
        let old_group = self
            .doors
            .get(id)
            .map(|door| door.group_id.clone())
            .ok_or_else(|| Error::not_found(EntityKind::Door, id))?;
        let new_group = patch.group_id.take().filter(|group| group != &old_group);
        if let Some(group) = &new_group
            && !self.groups.contains_key(group)
        {
            return Err(Error::invalid_reference(EntityKind::Group, group));
        }

        let mut dirty = Dirty::of(&[Collection::Doors]);
        if let Some(group_id) = new_group {
            if let Some(group) = self.groups.get_mut(&old_group) {
                group.doors.retain(|door_id| door_id != id);
                group.updated_at = now;
            }
            let group = self.group_mut(&group_id)?;
            if !group.doors.contains(id) {
                group.doors.push(id.clone());
            }
            group.updated_at = now;
            self.door_mut(id)?.group_id = group_id;
            dirty.mark(Collection::Groups);
        }

        let door = self.door_mut(id)?;
        patch.apply_local(door);
        door.updated_at = now;
        Ok((door.clone(), dirty))
    }

    pub(crate) fn delete_door(&mut self, id: &DoorId, now: DateTime<Utc>) -> Result<Dirty> {
        let door = self
            .doors
            .remove(id)
            .ok_or_else(|| Error::not_found(EntityKind::Door, id))?;
        if let Some(group) = self.groups.get_mut(&door.group_id) {
            group.doors.retain(|door_id| door_id != id);
            group.updated_at = now;
        }
        for user in self.users.values_mut() {
            if user.authorized_doors.contains(id) {
                user.authorized_doors.retain(|door_id| door_id != id);
                user.updated_at = now;
            }
        }
        Ok(Dirty::of(&[
            Collection::Doors,
            Collection::Groups,
            Collection::Users,
        ]))
    }

    /// Creates a user under its external id. New users start active and
    /// face-registered, as creation follows identity verification.
    pub(crate) fn create_user(
        &mut self,
        input: NewUser,
        now: DateTime<Utc>,
    ) -> Result<(User, Dirty)> {
        if self.users.contains_key(&input.id) {
            return Err(Error::AlreadyExists {
                kind: EntityKind::User,
                id: input.id.to_string(),
            });
        }
        let user = User {
            id: input.id.clone(),
            name: input.name,
            email: input.email,
            department: input.department,
            role: input.role,
            face_registered: true,
            is_active: true,
            authorized_groups: Vec::new(),
            authorized_doors: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        self.users.insert(input.id, user.clone());
        Ok((user, Dirty::of(&[Collection::Users])))
    }

    pub(crate) fn update_user(
        &mut self,
        id: &UserId,
        patch: UserPatch,
        now: DateTime<Utc>,
    ) -> Result<(User, Dirty)> {
        let user = self.user_mut(id)?;
        patch.apply(user);
        user.updated_at = now;
        Ok((user.clone(), Dirty::of(&[Collection::Users])))
    }

    pub(crate) fn delete_user(&mut self, id: &UserId, now: DateTime<Utc>) -> Result<Dirty> {
        if self.users.remove(id).is_none() {
            return Err(Error::not_found(EntityKind::User, id));
        }
        for group in self.groups.values_mut() {
            if group.authorized_users.contains(id) {
                group.authorized_users.retain(|user_id| user_id != id);
                group.updated_at = now;
            }
        }
        Ok(Dirty::of(&[Collection::Users, Collection::Groups]))
    }

    /// Replaces a user's direct grants with the subset naming existing doors.
    pub(crate) fn authorize_doors(
        &mut self,
        id: &UserId,
        door_ids: Vec<DoorId>,
        now: DateTime<Utc>,
    ) -> Result<(User, Dirty)> {
        let valid = dedup_existing(door_ids, |door_id| self.doors.contains_key(door_id));
        let user = self.user_mut(id)?;
        user.authorized_doors = valid;
        user.updated_at = now;
        Ok((user.clone(), Dirty::of(&[Collection::Users])))
    }

    /// Replaces a user's legacy grants and syncs the group reverse index.
    pub(crate) fn authorize_groups(
        &mut self,
        id: &UserId,
        group_ids: Vec<GroupId>,
        now: DateTime<Utc>,
    ) -> Result<(User, Dirty)> {
        let valid = dedup_existing(group_ids, |group_id| self.groups.contains_key(group_id));
        let user = self.user_mut(id)?;
        let previous = std::mem::replace(&mut user.authorized_groups, valid.clone());
        user.updated_at = now;
        let user = user.clone();

        for group_id in previous.iter().filter(|group_id| !valid.contains(group_id)) {
            if let Some(group) = self.groups.get_mut(group_id) {
                group.authorized_users.retain(|user_id| user_id != id);
                group.updated_at = now;
            }
        }
        for group_id in &valid {
            if let Some(group) = self.groups.get_mut(group_id)
                && !group.authorized_users.contains(id)
            {
                group.authorized_users.push(id.clone());
                group.updated_at = now;
            }
        }
        Ok((user, Dirty::of(&[Collection::Users, Collection::Groups])))
    }

    pub(crate) fn set_face_registered(
        &mut self,
        id: &UserId,
        registered: bool,
        now: DateTime<Utc>,
    ) -> Result<(User, Dirty)> {
        let user = self.user_mut(id)?;
        user.face_registered = registered;
        user.updated_at = now;
        Ok((user.clone(), Dirty::of(&[Collection::Users])))
    }

    /// Repairs references that violate the invariants, returning the number of
    /// fixes. Used after loading files that were edited or written by older
    /// versions.
    pub(crate) fn reconcile(&mut self) -> usize {
        let mut repairs = 0;

        let group_ids: HashSet<GroupId> = self.groups.keys().cloned().collect();
        let before = self.doors.len();
        self.doors.retain(|_, door| group_ids.contains(&door.group_id));
        repairs += before - self.doors.len();

        for group in self.groups.values_mut() {
            let before = group.doors.clone();
            let doors = &self.doors;
            group.doors = dedup_existing(std::mem::take(&mut group.doors), |door_id| {
                doors
                    .get(door_id)
                    .is_some_and(|door| door.group_id == group.id)
            });
            if group.doors != before {
                repairs += 1;
            }
        }
        for door in self.doors.values() {
            if let Some(group) = self.groups.get_mut(&door.group_id)
                && !group.doors.contains(&door.id)
            {
                group.doors.push(door.id.clone());
                repairs += 1;
            }
        }

        for user in self.users.values_mut() {
            let doors = dedup_existing(user.authorized_doors.clone(), |door_id| {
                self.doors.contains_key(door_id)
            });
            let groups = dedup_existing(user.authorized_groups.clone(), |group_id| {
                self.groups.contains_key(group_id)
            });
            if doors != user.authorized_doors || groups != user.authorized_groups {
                user.authorized_doors = doors;
                user.authorized_groups = groups;
                repairs += 1;
            }
        }

        for group in self.groups.values_mut() {
            let expected: Vec<UserId> = self
                .users
                .values()
                .filter(|user| user.authorized_groups.contains(&group.id))
                .map(|user| user.id.clone())
                .collect();
            let mut rebuilt = dedup_existing(group.authorized_users.clone(), |user_id| {
                expected.contains(user_id)
            });
            for user_id in expected {
                if !rebuilt.contains(&user_id) {
                    rebuilt.push(user_id);
                }
            }
            if rebuilt != group.authorized_users {
                group.authorized_users = rebuilt;
                repairs += 1;
            }
        }

        repairs
    }
}

fn encode_values<'a, T, I>(values: I) -> Result<Vec<u8>>
where
    T: Serialize + 'a,
    I: Iterator<Item = &'a T>,
{
    let values: Vec<&T> = values.collect();
    Ok(serde_json::to_vec_pretty(&values)?)
}

fn decode_keyed<K, T, F>(document: &[u8], key: F) -> Result<BTreeMap<K, T>>
where
    K: Ord,
    T: DeserializeOwned,
    F: Fn(&T) -> K,
{
    let values: Vec<T> = serde_json::from_slice(document)?;
    Ok(values
        .into_iter()
        .map(|value| (key(&value), value))
        .collect())
}

/// Keeps the first occurrence of every id accepted by `exists`, in input order.
fn dedup_existing<T, F>(ids: Vec<T>, exists: F) -> Vec<T>
where
    T: Eq + Hash + Clone,
    F: Fn(&T) -> bool,
{
    let mut seen = HashSet::new();
    ids.into_iter()
        .filter(|id| exists(id) && seen.insert(id.clone()))
        .collect()
}
