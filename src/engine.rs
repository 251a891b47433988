use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::controller::{DoorController, DoorNotification, NoController, NotificationStatus};
use crate::error::{EntityKind, Error, Result};
use crate::identity::{IdentityVerifier, Verification};
use crate::model::{
    AccessLogEntry, Door, DoorPatch, Group, GroupPatch, NewDoor, NewGroup, NewUser, User,
    UserPatch,
};
use crate::recorder::{DEFAULT_LOG_CAPACITY, LogQuery};
use crate::resolver::{self, AccessDecision, AccessReason, Directory};
use crate::state::{Dirty, State};
use crate::store::{Collection, Store};
use crate::types::{AccessEventKind, DoorId, GroupId, LogId, UserId};

/// Result of an explicit door-open request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DoorOpenOutcome {
    pub door_id: DoorId,
    /// Event kind written to the access log.
    pub event: AccessEventKind,
    /// Hardware side channel; never affects the logged outcome.
    pub notification: DoorNotification,
}

/// Face recognition event reported by a camera pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognitionEvent {
    pub user_id: UserId,
    pub similarity_score: f64,
    /// Door in front of the camera; absent to open every reachable door.
    #[serde(default)]
    pub door_id: Option<DoorId>,
}

/// Result of processing a recognition event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognitionOutcome {
    pub authorized: bool,
    /// Grant or denial reason; absent when several doors were granted.
    pub reason: Option<AccessReason>,
    pub message: String,
    /// Doors granted and the open notification sent to each.
    pub doors: Vec<DoorOpenOutcome>,
}

/// Counters shown on the operator dashboard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DashboardStats {
    pub total_groups: usize,
    pub total_doors: usize,
    pub total_users: usize,
    pub registered_faces: usize,
    pub online_doors: usize,
    pub today_access_events: usize,
    pub today_granted: usize,
    pub today_denied: usize,
}

/// Door access engine owning the authoritative entity state.
///
/// One engine is built per process and shared (typically behind an `Arc`) by
/// every request handler. Mutations and access checks take a single write
/// lock; queries take the read lock and return owned copies. Every change is
/// written to the store before the call returns.
pub struct Engine<S, C = NoController> {
    store: S,
    controller: C,
    identity: Option<Arc<dyn IdentityVerifier>>,
    state: RwLock<State>,
}

impl<S, C> std::fmt::Debug for Engine<S, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("Engine")
            .field("groups", &state.groups.len())
            .field("doors", &state.doors.len())
            .field("users", &state.users.len())
            .field("access_logs", &state.logs.len())
            .field("identity", &self.identity.is_some())
            .finish()
    }
}

/// Builder for [`Engine`].
pub struct EngineBuilder<S, C = NoController> {
    store: S,
    controller: C,
    identity: Option<Arc<dyn IdentityVerifier>>,
    log_capacity: usize,
}

impl<S> EngineBuilder<S, NoController> {
    /// Creates a new builder with default configuration.
    pub fn new(store: S) -> Self {
        Self {
            store,
            controller: NoController,
            identity: None,
            log_capacity: DEFAULT_LOG_CAPACITY,
        }
    }
}

impl<S, C> EngineBuilder<S, C> {
    /// Sets how many access log entries are retained.
    pub fn log_capacity(mut self, capacity: usize) -> Self {
        self.log_capacity = capacity;
        self
    }

    /// Sets the identity directory consulted by [`Engine::verify_user`].
    pub fn identity_verifier<V>(mut self, verifier: V) -> Self
    where
        V: IdentityVerifier + 'static,
    {
        self.identity = Some(Arc::new(verifier));
        self
    }

    /// Sets the door controller implementation.
    pub fn controller<C2: DoorController>(self, controller: C2) -> EngineBuilder<S, C2> {
        EngineBuilder {
            store: self.store,
            controller,
            identity: self.identity,
            log_capacity: self.log_capacity,
        }
    }

    /// Loads every collection from the store and builds the engine.
    ///
    /// A collection that cannot be read or decoded is logged and starts
    /// empty; the others load normally.
    pub fn build(self) -> Engine<S, C>
    where
        S: Store,
    {
        let state = load_state(&self.store, self.log_capacity);
        Engine {
            store: self.store,
            controller: self.controller,
            identity: self.identity,
            state: RwLock::new(state),
        }
    }
}

fn load_state<S: Store>(store: &S, log_capacity: usize) -> State {
    let mut state = State::with_log_capacity(log_capacity);
    for collection in Collection::ALL {
        match store.load(collection) {
            Ok(Some(document)) => {
                if let Err(err) = state.decode(collection, &document) {
                    error!(%collection, error = %err, "corrupt collection, starting empty");
                }
            }
            Ok(None) => debug!(%collection, "no stored collection"),
            Err(err) => {
                error!(%collection, error = %err, "failed to read collection, starting empty")
            }
        }
    }
    let repairs = state.reconcile();
    if repairs > 0 {
        warn!(repairs, "repaired dangling references in loaded data");
    }
    info!(
        groups = state.groups.len(),
        doors = state.doors.len(),
        users = state.users.len(),
        access_logs = state.logs.len(),
        "door access state loaded"
    );
    state
}

impl<S, C> Engine<S, C>
where
    S: Store,
    C: DoorController,
{
    /// Returns the backing store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Writes each dirty collection. Failures are logged and the in-memory
    /// state stays authoritative until the next successful save.
    fn persist(&self, state: &State, dirty: Dirty) {
        for collection in dirty.collections() {
            let result = state
                .encode(collection)
                .and_then(|document| self.store.save(collection, &document).map_err(Error::from));
            if let Err(err) = result {
                error!(%collection, error = %err, "failed to persist collection");
            }
        }
    }

    fn mutate<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&mut State) -> Result<(T, Dirty)>,
    {
        let mut state = self.state.write();
        let (value, dirty) = op(&mut *state)?;
        self.persist(&state, dirty);
        Ok(value)
    }

    // ---- groups ----

    /// Returns all groups, oldest first.
    pub fn groups(&self) -> Vec<Group> {
        let state = self.state.read();
        let mut groups: Vec<Group> = state.groups.values().cloned().collect();
        groups.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        groups
    }

    /// Returns one group.
    pub fn group(&self, id: &GroupId) -> Result<Group> {
        self.state
            .read()
            .groups
            .get(id)
            .cloned()
            .ok_or_else(|| Error::not_found(EntityKind::Group, id))
    }

    /// Creates a group with a generated id and empty door and user sets.
    pub fn create_group(&self, input: NewGroup) -> Group {
        let mut state = self.state.write();
        let (group, dirty) = state.create_group(input, Utc::now());
        self.persist(&state, dirty);
        info!(group = %group.id, name = %group.name, "created group");
        group
    }

    /// Applies a patch to a group.
    pub fn update_group(&self, id: &GroupId, patch: GroupPatch) -> Result<Group> {
        self.mutate(|state| state.update_group(id, patch, Utc::now()))
    }

    /// Deletes a group together with its doors and every grant naming them.
    pub fn delete_group(&self, id: &GroupId) -> Result<()> {
        self.mutate(|state| state.delete_group(id, Utc::now()).map(|dirty| ((), dirty)))?;
        info!(group = %id, "deleted group");
        Ok(())
    }

    // ---- doors ----

    /// Returns all doors, oldest first.
    pub fn doors(&self) -> Vec<Door> {
        let state = self.state.read();
        let mut doors: Vec<Door> = state.doors.values().cloned().collect();
        doors.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        doors
    }

    /// Returns one door.
    pub fn door(&self, id: &DoorId) -> Result<Door> {
        self.state
            .read()
            .doors
            .get(id)
            .cloned()
            .ok_or_else(|| Error::not_found(EntityKind::Door, id))
    }

    /// Returns the doors of a group in the group's order; empty for unknown groups.
    pub fn doors_in_group(&self, id: &GroupId) -> Vec<Door> {
        let state = self.state.read();
        state
            .groups
            .get(id)
            .map(|group| {
                group
                    .doors
                    .iter()
                    .filter_map(|door_id| state.doors.get(door_id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Creates a door inside an existing group.
    ///
    /// Fails with `InvalidReference` and writes nothing when the group is unknown.
    pub fn create_door(&self, input: NewDoor) -> Result<Door> {
        let door = self.mutate(|state| state.create_door(input, Utc::now()))?;
        info!(door = %door.id, group = %door.group_id, name = %door.name, "created door");
        Ok(door)
    }

    /// Applies a patch to a door, moving it between groups when `group_id` changes.
    pub fn update_door(&self, id: &DoorId, patch: DoorPatch) -> Result<Door> {
        self.mutate(|state| state.update_door(id, patch, Utc::now()))
    }

    /// Deletes a door and removes it from its group and from direct grants.
    pub fn delete_door(&self, id: &DoorId) -> Result<()> {
        self.mutate(|state| state.delete_door(id, Utc::now()).map(|dirty| ((), dirty)))?;
        info!(door = %id, "deleted door");
        Ok(())
    }

    // ---- users ----

    /// Returns all users, oldest first.
    pub fn users(&self) -> Vec<User> {
        let state = self.state.read();
        let mut users: Vec<User> = state.users.values().cloned().collect();
        users.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        users
    }

    /// Returns one user.
    pub fn user(&self, id: &UserId) -> Result<User> {
        self.state
            .read()
            .users
            .get(id)
            .cloned()
            .ok_or_else(|| Error::not_found(EntityKind::User, id))
    }

    /// Returns users holding a legacy grant on the group or a direct grant on
    /// any of its doors.
    pub fn users_for_group(&self, id: &GroupId) -> Vec<User> {
        let state = self.state.read();
        let group_doors: Vec<&DoorId> = state
            .doors
            .values()
            .filter(|door| &door.group_id == id)
            .map(|door| &door.id)
            .collect();
        state
            .users
            .values()
            .filter(|user| {
                user.authorized_groups.contains(id)
                    || user
                        .authorized_doors
                        .iter()
                        .any(|door_id| group_doors.contains(&door_id))
            })
            .cloned()
            .collect()
    }

    /// Creates a user under its caller-supplied external id.
    pub fn create_user(&self, input: NewUser) -> Result<User> {
        let user = self.mutate(|state| state.create_user(input, Utc::now()))?;
        info!(user = %user.id, name = %user.name, "created user");
        Ok(user)
    }

    /// Applies a patch to a user.
    pub fn update_user(&self, id: &UserId, patch: UserPatch) -> Result<User> {
        self.mutate(|state| state.update_user(id, patch, Utc::now()))
    }

    /// Deletes a user and removes it from every group's reverse index.
    pub fn delete_user(&self, id: &UserId) -> Result<()> {
        self.mutate(|state| state.delete_user(id, Utc::now()).map(|dirty| ((), dirty)))?;
        info!(user = %id, "deleted user");
        Ok(())
    }

    /// Replaces a user's direct door grants. Unknown door ids are dropped.
    pub fn authorize_user_for_doors(&self, id: &UserId, door_ids: Vec<DoorId>) -> Result<User> {
        let user = self.mutate(|state| state.authorize_doors(id, door_ids, Utc::now()))?;
        info!(user = %id, doors = user.authorized_doors.len(), "updated door access");
        Ok(user)
    }

    /// Replaces a user's legacy group grants. Unknown group ids are dropped.
    pub fn authorize_user_for_groups(&self, id: &UserId, group_ids: Vec<GroupId>) -> Result<User> {
        let user = self.mutate(|state| state.authorize_groups(id, group_ids, Utc::now()))?;
        info!(user = %id, groups = user.authorized_groups.len(), "updated group access");
        Ok(user)
    }

    /// Sets whether a user's face is enrolled.
    pub fn set_face_registered(&self, id: &UserId, registered: bool) -> Result<User> {
        self.mutate(|state| state.set_face_registered(id, registered, Utc::now()))
    }

    /// Checks a local record first, then asks the identity directory.
    ///
    /// Without a configured directory every unknown id is accepted in offline mode.
    pub async fn verify_user(&self, id: &UserId) -> Verification {
        let local_name = self.state.read().users.get(id).map(|user| user.name.clone());
        if let Some(name) = local_name {
            return Verification::local(name);
        }
        match &self.identity {
            Some(verifier) => verifier.verify(id).await,
            None => Verification::offline(),
        }
    }

    // ---- access ----

    /// Decides whether a user may open a door and records the decision.
    pub fn check_access(&self, user_id: &UserId, door_id: &DoorId) -> AccessDecision {
        let mut state = self.state.write();
        self.decide_and_record(&mut state, user_id, door_id, None)
    }

    /// Returns every online door the user can reach, recording one entry per
    /// door, or a single denial when none is reachable.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown user, after recording the denial.
    pub fn resolve_accessible_doors(&self, user_id: &UserId) -> Result<Vec<DoorId>> {
        let mut state = self.state.write();
        match self.resolve_and_record(&mut state, user_id, None) {
            Ok(grants) => Ok(grants.into_iter().map(|(door, _)| door.id).collect()),
            Err(AccessReason::UserNotFound) => Err(Error::not_found(EntityKind::User, user_id)),
            Err(_) => Ok(Vec::new()),
        }
    }

    /// Processes a face match: checks (and records) access, then sends a
    /// best-effort open command to every granted door.
    pub async fn process_recognition(&self, event: RecognitionEvent) -> RecognitionOutcome {
        let score = Some(event.similarity_score);
        let (user_name, granted, reason) = {
            let mut state = self.state.write();
            let user_name = state.users.get(&event.user_id).map(|user| user.name.clone());
            if user_name.is_none() {
                warn!(user = %event.user_id, "unknown user in recognition event");
            }
            match &event.door_id {
                Some(door_id) => {
                    let decision =
                        self.decide_and_record(&mut state, &event.user_id, door_id, score);
                    let granted = match state.doors.get(door_id) {
                        Some(door) if decision.authorized => vec![door.clone()],
                        _ => Vec::new(),
                    };
                    (user_name, granted, Some(decision.reason))
                }
                None => match self.resolve_and_record(&mut state, &event.user_id, score) {
                    Ok(grants) => {
                        let reason = match grants.as_slice() {
                            [] => None,
                            [(_, reason)] => Some(*reason),
                            _ => None,
                        };
                        let doors = grants.into_iter().map(|(door, _)| door).collect();
                        (user_name, doors, reason)
                    }
                    Err(reason) => (user_name, Vec::new(), Some(reason)),
                },
            }
        };

        if granted.is_empty() {
            let message = match reason {
                Some(reason) => reason.message().to_string(),
                None => "No accessible doors found".to_string(),
            };
            return RecognitionOutcome {
                authorized: false,
                reason,
                message,
                doors: Vec::new(),
            };
        }

        let mut doors = Vec::with_capacity(granted.len());
        for door in &granted {
            doors.push(DoorOpenOutcome {
                door_id: door.id.clone(),
                event: AccessEventKind::Granted,
                notification: self.notify(door).await,
            });
        }
        RecognitionOutcome {
            authorized: true,
            reason,
            message: format!(
                "Access granted for {}",
                user_name.as_deref().unwrap_or("unknown user")
            ),
            doors,
        }
    }

    /// Records a door-open event and sends a best-effort open command.
    ///
    /// The entry is `granted` when a user is named and `manual_unlock`
    /// otherwise. It is persisted before the controller is contacted, and
    /// controller failures only show up in the returned notification.
    pub async fn open_door(
        &self,
        door_id: &DoorId,
        user_id: Option<&UserId>,
        reason: &str,
    ) -> Result<DoorOpenOutcome> {
        let (door, event) = {
            let mut state = self.state.write();
            let door = state
                .doors
                .get(door_id)
                .cloned()
                .ok_or_else(|| Error::not_found(EntityKind::Door, door_id))?;
            let event = if user_id.is_some() {
                AccessEventKind::Granted
            } else {
                AccessEventKind::ManualUnlock
            };
            let entry = new_entry(
                &state,
                Some(door_id),
                user_id,
                event,
                None,
                format!("Door opened: {reason}"),
            );
            let dirty = state.record(entry);
            self.persist(&state, dirty);
            (door, event)
        };
        info!(door = %door.id, %event, "door open requested");

        let notification = self.notify(&door).await;
        Ok(DoorOpenOutcome {
            door_id: door.id,
            event,
            notification,
        })
    }

    /// Returns matching log entries, newest first.
    pub fn access_logs(&self, query: &LogQuery) -> Vec<AccessLogEntry> {
        self.state.read().logs.query(query)
    }

    /// Returns dashboard counters; "today" is the current UTC date.
    pub fn stats(&self) -> DashboardStats {
        let state = self.state.read();
        let today = Utc::now().date_naive();
        let mut stats = DashboardStats {
            total_groups: state.groups.len(),
            total_doors: state.doors.len(),
            total_users: state.users.len(),
            registered_faces: state.users.values().filter(|u| u.face_registered).count(),
            online_doors: state.doors.values().filter(|d| d.is_online()).count(),
            ..DashboardStats::default()
        };
        for entry in state.logs.iter().filter(|e| e.timestamp.date_naive() == today) {
            stats.today_access_events += 1;
            match entry.event {
                AccessEventKind::Granted => stats.today_granted += 1,
                AccessEventKind::Denied => stats.today_denied += 1,
                _ => {}
            }
        }
        stats
    }

    fn decide_and_record(
        &self,
        state: &mut State,
        user_id: &UserId,
        door_id: &DoorId,
        score: Option<f64>,
    ) -> AccessDecision {
        let decision = resolver::check_access(&*state, user_id, door_id);
        let (event, details) = if decision.authorized {
            (AccessEventKind::Granted, granted_details(decision.reason, score))
        } else {
            (
                AccessEventKind::Denied,
                format!("Access denied: {}", decision.reason),
            )
        };
        debug!(user = %user_id, door = %door_id, reason = ?decision.reason, "access decision");
        let entry = new_entry(state, Some(door_id), Some(user_id), event, score, details);
        let dirty = state.record(entry);
        self.persist(state, dirty);
        decision
    }

    fn resolve_and_record(
        &self,
        state: &mut State,
        user_id: &UserId,
        score: Option<f64>,
    ) -> std::result::Result<Vec<(Door, AccessReason)>, AccessReason> {
        let resolution = resolver::accessible_doors(&*state, user_id);
        let mut dirty = Dirty::default();
        // every branch records at least one entry
        let doors = match resolution {
            Ok(grants) if !grants.is_empty() => {
                let mut doors = Vec::with_capacity(grants.len());
                for grant in grants {
                    let entry = new_entry(
                        state,
                        Some(&grant.door_id),
                        Some(user_id),
                        AccessEventKind::Granted,
                        score,
                        granted_details(grant.reason, score),
                    );
                    dirty = state.record(entry);
                    if let Some(door) = state.door(&grant.door_id) {
                        doors.push((door.clone(), grant.reason));
                    }
                }
                Ok(doors)
            }
            Ok(_) => {
                let entry = new_entry(
                    state,
                    None,
                    Some(user_id),
                    AccessEventKind::Denied,
                    score,
                    "Access denied: No accessible doors found".to_string(),
                );
                dirty = state.record(entry);
                Ok(Vec::new())
            }
            Err(reason) => {
                let entry = new_entry(
                    state,
                    None,
                    Some(user_id),
                    AccessEventKind::Denied,
                    score,
                    format!("Access denied: {reason}"),
                );
                dirty = state.record(entry);
                Err(reason)
            }
        };
        debug!(
            user = %user_id,
            outcome = ?doors.as_ref().map(Vec::len),
            "resolved accessible doors"
        );
        self.persist(state, dirty);
        doors
    }

    async fn notify(&self, door: &Door) -> DoorNotification {
        if door.endpoint().is_none() {
            return DoorNotification::new(
                NotificationStatus::NoEndpoint,
                format!("Door {} open command logged", door.name),
            );
        }
        self.controller.open(door).await
    }
}

fn granted_details(reason: AccessReason, score: Option<f64>) -> String {
    match score {
        Some(score) => format!("Face recognition access granted (score: {score:.2})"),
        None => format!("Access granted: {reason}"),
    }
}

/// Builds a log entry, caching the user's current display name and the door's group.
fn new_entry(
    state: &State,
    door_id: Option<&DoorId>,
    user_id: Option<&UserId>,
    event: AccessEventKind,
    similarity_score: Option<f64>,
    details: String,
) -> AccessLogEntry {
    AccessLogEntry {
        id: LogId::generate(),
        timestamp: Utc::now(),
        door_id: door_id.cloned(),
        user_id: user_id.cloned(),
        user_name: user_id
            .and_then(|id| state.users.get(id))
            .map(|user| user.name.clone()),
        event,
        similarity_score,
        group_id: door_id
            .and_then(|id| state.doors.get(id))
            .map(|door| door.group_id.clone()),
        details,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::memory_store::MemoryStore;
    use crate::types::DoorStatus;
    use async_trait::async_trait;
    use futures::executor::block_on;

    #[derive(Default)]
    struct RecordingController {
        opened: parking_lot::Mutex<Vec<DoorId>>,
    }

    #[async_trait]
    impl DoorController for RecordingController {
        async fn open(&self, door: &Door) -> DoorNotification {
            self.opened.lock().push(door.id.clone());
            DoorNotification::new(NotificationStatus::Confirmed, "ok")
        }
    }

    struct CountingVerifier {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl IdentityVerifier for CountingVerifier {
        async fn verify(&self, _user_id: &UserId) -> Verification {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Verification::missing("nope")
        }
    }

    fn uid(value: &str) -> UserId {
        UserId::try_from(value).unwrap()
    }

    fn engine() -> Engine<MemoryStore> {
        EngineBuilder::new(MemoryStore::new()).build()
    }

    fn door_with_endpoint<S: Store, C: DoorController>(
        engine: &Engine<S, C>,
        group: &GroupId,
        name: &str,
    ) -> Door {
        let mut input = NewDoor::new(name, group.clone());
        input.ip_address = "10.0.0.9".into();
        engine.create_door(input).unwrap()
    }

    /// One group with two doors and a user directly granted the first door.
    fn campus() -> (Engine<MemoryStore>, Group, Door, Door, User) {
        let engine = engine();
        let group = engine.create_group(NewGroup::named("HQ"));
        let lobby = engine.create_door(NewDoor::new("Lobby", group.id.clone())).unwrap();
        let lab = engine.create_door(NewDoor::new("Lab", group.id.clone())).unwrap();
        let user = engine.create_user(NewUser::new(uid("emp-1"), "Ana")).unwrap();
        let user = engine
            .authorize_user_for_doors(&user.id, vec![lobby.id.clone()])
            .unwrap();
        (engine, group, lobby, lab, user)
    }

    #[test]
    fn create_door_should_reject_unknown_group_without_writing() {
        let store = MemoryStore::new();
        let engine = EngineBuilder::new(store.clone()).build();
        let err = engine
            .create_door(NewDoor::new("Ghost", GroupId::try_from("grp_missing").unwrap()))
            .expect_err("must reject");
        assert!(matches!(err, Error::InvalidReference { kind: EntityKind::Group, .. }));
        assert_eq!(store.total_writes(), 0);
        assert!(engine.doors().is_empty());
    }

    #[test]
    fn mutations_should_persist_only_touched_collections() {
        let store = MemoryStore::new();
        let engine = EngineBuilder::new(store.clone()).build();
        let group = engine.create_group(NewGroup::named("HQ"));
        assert_eq!(store.write_count(Collection::Groups), 1);
        assert_eq!(store.write_count(Collection::Doors), 0);

        engine.create_door(NewDoor::new("Lobby", group.id.clone())).unwrap();
        assert_eq!(store.write_count(Collection::Groups), 2);
        assert_eq!(store.write_count(Collection::Doors), 1);
        assert_eq!(store.write_count(Collection::AccessLogs), 0);
    }

    #[test]
    fn check_access_should_grant_direct_and_deny_other_doors() {
        let (engine, group, lobby, lab, user) = campus();

        let granted = engine.check_access(&user.id, &lobby.id);
        assert!(granted.authorized);
        assert_eq!(granted.reason, AccessReason::DirectGrant);

        let denied = engine.check_access(&user.id, &lab.id);
        assert!(!denied.authorized);
        assert_eq!(denied.reason, AccessReason::NotAuthorizedForDoor);

        let logs = engine.access_logs(&LogQuery::new());
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].event, AccessEventKind::Denied);
        assert_eq!(logs[0].details, "Access denied: User not authorized for this door");
        assert_eq!(logs[1].event, AccessEventKind::Granted);
        assert_eq!(logs[1].user_name.as_deref(), Some("Ana"));
        assert_eq!(logs[1].group_id.as_ref(), Some(&group.id));
    }

    #[test]
    fn check_access_should_log_unknown_user_and_door() {
        let (engine, _, lobby, _, user) = campus();
        let ghost = uid("ghost");
        assert_eq!(
            engine.check_access(&ghost, &lobby.id).reason,
            AccessReason::UserNotFound
        );
        let missing = DoorId::try_from("door_missing").unwrap();
        assert_eq!(
            engine.check_access(&user.id, &missing).reason,
            AccessReason::DoorNotFound
        );

        let logs = engine.access_logs(&LogQuery::new());
        assert_eq!(logs.len(), 2);
        assert!(logs.iter().all(|entry| entry.event == AccessEventKind::Denied));
        assert!(logs.iter().any(|entry| entry.user_name.is_none()));
        assert!(logs.iter().any(|entry| entry.group_id.is_none()));
    }

    #[test]
    fn legacy_group_grant_should_cover_every_door_in_group() {
        let (engine, group, _, lab, user) = campus();
        engine
            .authorize_user_for_groups(&user.id, vec![group.id.clone()])
            .unwrap();
        let decision = engine.check_access(&user.id, &lab.id);
        assert!(decision.authorized);
        assert_eq!(decision.reason, AccessReason::LegacyGroupGrant);
        assert_eq!(engine.group(&group.id).unwrap().authorized_users, vec![user.id]);
    }

    #[test]
    fn inactive_or_unenrolled_users_should_be_denied_everywhere() {
        let (engine, _, lobby, _, user) = campus();
        engine.set_face_registered(&user.id, false).unwrap();
        assert_eq!(
            engine.check_access(&user.id, &lobby.id).reason,
            AccessReason::FaceNotRegistered
        );

        engine.set_face_registered(&user.id, true).unwrap();
        engine
            .update_user(
                &user.id,
                UserPatch {
                    is_active: Some(false),
                    ..UserPatch::default()
                },
            )
            .unwrap();
        assert_eq!(
            engine.check_access(&user.id, &lobby.id).reason,
            AccessReason::AccountInactive
        );
        assert!(engine.resolve_accessible_doors(&user.id).unwrap().is_empty());
    }

    #[test]
    fn resolve_accessible_doors_should_skip_offline_and_log_each_grant() {
        let (engine, group, lobby, lab, user) = campus();
        engine
            .authorize_user_for_groups(&user.id, vec![group.id.clone()])
            .unwrap();
        engine
            .update_door(
                &lab.id,
                DoorPatch {
                    status: Some(DoorStatus::Offline),
                    ..DoorPatch::default()
                },
            )
            .unwrap();

        let doors = engine.resolve_accessible_doors(&user.id).unwrap();
        assert_eq!(doors, vec![lobby.id.clone()]);

        let logs = engine.access_logs(&LogQuery::new().user(user.id.clone()));
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].door_id.as_ref(), Some(&lobby.id));
        assert_eq!(logs[0].details, "Access granted: direct door grant");
    }

    #[test]
    fn resolve_accessible_doors_should_log_single_denial_when_nothing_reachable() {
        let engine = engine();
        let user = engine.create_user(NewUser::new(uid("emp-2"), "Bo")).unwrap();
        assert!(engine.resolve_accessible_doors(&user.id).unwrap().is_empty());

        let logs = engine.access_logs(&LogQuery::new());
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].event, AccessEventKind::Denied);
        assert!(logs[0].door_id.is_none());

        let err = engine
            .resolve_accessible_doors(&uid("ghost"))
            .expect_err("unknown user");
        assert!(err.is_not_found());
        assert_eq!(engine.access_logs(&LogQuery::new()).len(), 2);
    }

    #[test]
    fn delete_group_should_cascade_to_doors_and_grants() {
        let (engine, group, lobby, _, user) = campus();
        engine
            .authorize_user_for_groups(&user.id, vec![group.id.clone()])
            .unwrap();
        engine.delete_group(&group.id).unwrap();

        assert!(engine.doors().is_empty());
        let user = engine.user(&user.id).unwrap();
        assert!(user.authorized_doors.is_empty());
        assert!(user.authorized_groups.is_empty());
        assert_eq!(
            engine.check_access(&user.id, &lobby.id).reason,
            AccessReason::DoorNotFound
        );
    }

    #[test]
    fn update_door_should_move_between_groups() {
        let (engine, hq, lobby, _, _) = campus();
        let annex = engine.create_group(NewGroup::named("Annex"));
        let moved = engine
            .update_door(
                &lobby.id,
                DoorPatch {
                    group_id: Some(annex.id.clone()),
                    ..DoorPatch::default()
                },
            )
            .unwrap();
        assert_eq!(moved.group_id, annex.id);
        assert!(!engine.group(&hq.id).unwrap().doors.contains(&lobby.id));
        assert_eq!(engine.doors_in_group(&annex.id), vec![moved]);
    }

    #[test]
    fn users_for_group_should_include_direct_and_legacy_holders() {
        let (engine, group, _, _, direct) = campus();
        let legacy = engine.create_user(NewUser::new(uid("emp-3"), "Cy")).unwrap();
        engine
            .authorize_user_for_groups(&legacy.id, vec![group.id.clone()])
            .unwrap();
        engine.create_user(NewUser::new(uid("emp-4"), "Di")).unwrap();

        let mut ids: Vec<UserId> = engine
            .users_for_group(&group.id)
            .into_iter()
            .map(|user| user.id)
            .collect();
        ids.sort();
        assert_eq!(ids, vec![direct.id, legacy.id]);
    }

    #[test]
    fn persistence_failure_should_keep_memory_state() {
        let store = MemoryStore::new();
        let engine = EngineBuilder::new(store.clone()).build();
        store.set_fail_saves(true);
        let group = engine.create_group(NewGroup::named("HQ"));
        assert_eq!(engine.group(&group.id).unwrap().name, "HQ");
        assert_eq!(store.total_writes(), 0);

        store.set_fail_saves(false);
        engine.create_door(NewDoor::new("Lobby", group.id)).unwrap();
        assert!(store.document(Collection::Groups).is_some());
    }

    #[test]
    fn build_should_reload_persisted_state() {
        let store = MemoryStore::new();
        let (group_id, user_id) = {
            let engine = EngineBuilder::new(store.clone()).build();
            let group = engine.create_group(NewGroup::named("HQ"));
            let door = engine.create_door(NewDoor::new("Lobby", group.id.clone())).unwrap();
            let user = engine.create_user(NewUser::new(uid("emp-1"), "Ana")).unwrap();
            engine
                .authorize_user_for_doors(&user.id, vec![door.id.clone()])
                .unwrap();
            engine.check_access(&user.id, &door.id);
            (group.id, user.id)
        };

        let engine = EngineBuilder::new(store).build();
        assert_eq!(engine.doors_in_group(&group_id).len(), 1);
        assert_eq!(engine.user(&user_id).unwrap().authorized_doors.len(), 1);
        assert_eq!(engine.access_logs(&LogQuery::new()).len(), 1);
    }

    #[test]
    fn build_should_isolate_corrupt_collections() {
        let store = MemoryStore::new();
        store.insert_document(Collection::Groups, "not json");
        store.insert_document(
            Collection::Users,
            r#"[{"id":"emp-1","name":"Ana","authorized_groups":["grp_gone"]}]"#,
        );
        let engine = EngineBuilder::new(store).build();
        assert!(engine.groups().is_empty());
        let user = engine.user(&uid("emp-1")).unwrap();
        assert!(user.authorized_groups.is_empty());
    }

    #[test]
    fn log_capacity_should_bound_retained_entries() {
        let store = MemoryStore::new();
        let engine = EngineBuilder::new(store).log_capacity(3).build();
        let user = engine.create_user(NewUser::new(uid("emp-1"), "Ana")).unwrap();
        let door = DoorId::try_from("door_x").unwrap();
        for _ in 0..5 {
            engine.check_access(&user.id, &door);
        }
        assert_eq!(engine.access_logs(&LogQuery::new().limit(50)).len(), 3);
    }

    #[test]
    fn open_door_should_log_before_notifying() {
        let controller = std::sync::Arc::new(RecordingController::default());
        let engine = EngineBuilder::new(MemoryStore::new())
            .controller(controller.clone())
            .build();
        let group = engine.create_group(NewGroup::named("HQ"));
        let wired = door_with_endpoint(&engine, &group.id, "Wired");
        let bare = engine.create_door(NewDoor::new("Bare", group.id.clone())).unwrap();

        let outcome = block_on(engine.open_door(&wired.id, None, "visitor")).unwrap();
        assert_eq!(outcome.event, AccessEventKind::ManualUnlock);
        assert!(outcome.notification.is_confirmed());

        let outcome = block_on(engine.open_door(&bare.id, Some(&uid("emp-9")), "badge")).unwrap();
        assert_eq!(outcome.event, AccessEventKind::Granted);
        assert_eq!(outcome.notification.status, NotificationStatus::NoEndpoint);

        assert_eq!(controller.opened.lock().as_slice(), &[wired.id.clone()]);
        let logs = engine.access_logs(&LogQuery::new());
        assert_eq!(logs.len(), 2);
        assert!(logs.iter().any(|entry| entry.details == "Door opened: visitor"));

        let missing = DoorId::try_from("door_missing").unwrap();
        assert!(block_on(engine.open_door(&missing, None, "x")).unwrap_err().is_not_found());
    }

    #[test]
    fn process_recognition_should_open_every_reachable_door() {
        let controller = std::sync::Arc::new(RecordingController::default());
        let engine = EngineBuilder::new(MemoryStore::new())
            .controller(controller.clone())
            .build();
        let group = engine.create_group(NewGroup::named("HQ"));
        let front = door_with_endpoint(&engine, &group.id, "Front");
        let back = door_with_endpoint(&engine, &group.id, "Back");
        let user = engine.create_user(NewUser::new(uid("emp-1"), "Ana")).unwrap();
        engine
            .authorize_user_for_groups(&user.id, vec![group.id.clone()])
            .unwrap();

        let outcome = block_on(engine.process_recognition(RecognitionEvent {
            user_id: user.id.clone(),
            similarity_score: 0.931,
            door_id: None,
        }));
        assert!(outcome.authorized);
        assert_eq!(outcome.message, "Access granted for Ana");
        assert_eq!(outcome.doors.len(), 2);
        assert_eq!(controller.opened.lock().len(), 2);

        let logs = engine.access_logs(&LogQuery::new().door(front.id.clone()));
        assert_eq!(logs[0].details, "Face recognition access granted (score: 0.93)");
        assert_eq!(logs[0].similarity_score, Some(0.931));
        assert_eq!(engine.access_logs(&LogQuery::new().door(back.id)).len(), 1);
    }

    #[test]
    fn process_recognition_should_deny_at_named_door_without_grant() {
        let (engine, _, _, lab, user) = campus();
        let outcome = block_on(engine.process_recognition(RecognitionEvent {
            user_id: user.id.clone(),
            similarity_score: 0.8,
            door_id: Some(lab.id.clone()),
        }));
        assert!(!outcome.authorized);
        assert_eq!(outcome.reason, Some(AccessReason::NotAuthorizedForDoor));
        assert!(outcome.doors.is_empty());
        let logs = engine.access_logs(&LogQuery::new());
        assert_eq!(logs[0].event, AccessEventKind::Denied);
        assert_eq!(logs[0].similarity_score, Some(0.8));
    }

    #[test]
    fn verify_user_should_prefer_local_records() {
        let verifier = CountingVerifier {
            calls: AtomicUsize::new(0),
        };
        let engine = EngineBuilder::new(MemoryStore::new())
            .identity_verifier(verifier)
            .build();
        engine.create_user(NewUser::new(uid("emp-1"), "Ana")).unwrap();

        let local = block_on(engine.verify_user(&uid("emp-1")));
        assert!(local.exists && local.local);
        let remote = block_on(engine.verify_user(&uid("emp-2")));
        assert!(!remote.exists);

        let offline = block_on(self::engine().verify_user(&uid("emp-2")));
        assert!(offline.exists && offline.offline);
    }

    #[test]
    fn stats_should_count_todays_events() {
        let (engine, _, lobby, lab, user) = campus();
        engine.check_access(&user.id, &lobby.id);
        engine.check_access(&user.id, &lab.id);
        engine.check_access(&user.id, &lab.id);

        let stats = engine.stats();
        assert_eq!(stats.total_groups, 1);
        assert_eq!(stats.total_doors, 2);
        assert_eq!(stats.total_users, 1);
        assert_eq!(stats.registered_faces, 1);
        assert_eq!(stats.online_doors, 2);
        assert_eq!(stats.today_access_events, 3);
        assert_eq!(stats.today_granted, 1);
        assert_eq!(stats.today_denied, 2);
    }
}
