//! Principals.

use std::fmt::Display;
use std::sync::{Arc, RwLock};

use gatekeeper_types::{ProfileId, ResourceKind, Timestamp, UserId, derive_id};

use crate::profile::Profile;
use crate::record::{UserRecord, to_datetime};
use crate::sync;

#[derive(Debug)]
struct UserState {
    name: String,
    description: String,
    email: String,
    profiles: Vec<Arc<Profile>>,
    updated_at: Timestamp,
    deleted_at: Option<Timestamp>,
}

impl UserState {
    fn touch(&mut self) {
        self.updated_at = Timestamp::now_monotonic(Some(self.updated_at));
    }
}

/// A principal owning an ordered list of profiles.
///
/// Profiles are shared references; they live in the registry independently
/// of any one user. The list order is the order the evaluator walks.
#[derive(Debug)]
pub struct User {
    id: UserId,
    created_at: Timestamp,
    state: RwLock<UserState>,
}

impl User {
    /// Creates a user with no profiles. The ID is derived from
    /// `name + description + email`.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        email: impl Into<String>,
    ) -> Self {
        let name = name.into();
        let description = description.into();
        let email = email.into();
        let id = UserId::new(derive_id(
            ResourceKind::User,
            &[&name, &description, &email],
        ));
        let created_at = Timestamp::now();
        Self {
            id,
            created_at,
            state: RwLock::new(UserState {
                name,
                description,
                email,
                profiles: Vec::new(),
                updated_at: created_at,
                deleted_at: None,
            }),
        }
    }

    pub fn id(&self) -> UserId {
        self.id
    }

    pub fn name(&self) -> String {
        sync::read(&self.state).name.clone()
    }

    pub fn description(&self) -> String {
        sync::read(&self.state).description.clone()
    }

    pub fn email(&self) -> String {
        sync::read(&self.state).email.clone()
    }

    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }

    pub fn updated_at(&self) -> Timestamp {
        sync::read(&self.state).updated_at
    }

    pub fn deleted_at(&self) -> Option<Timestamp> {
        sync::read(&self.state).deleted_at
    }

    pub fn is_active(&self) -> bool {
        sync::read(&self.state).deleted_at.is_none()
    }

    /// Replaces name, description, and email. The ID does not change.
    pub fn update(
        &self,
        name: impl Into<String>,
        description: impl Into<String>,
        email: impl Into<String>,
    ) {
        let mut state = sync::write(&self.state);
        state.name = name.into();
        state.description = description.into();
        state.email = email.into();
        state.touch();
    }

    pub fn soft_delete(&self) {
        let mut state = sync::write(&self.state);
        state.deleted_at = Some(Timestamp::now_monotonic(Some(state.updated_at)));
    }

    pub fn restore(&self) {
        sync::write(&self.state).deleted_at = None;
    }

    /// Snapshot of the user as a serializable record.
    pub fn to_record(&self) -> UserRecord {
        let state = sync::read(&self.state);
        UserRecord {
            id: self.id.into(),
            name: state.name.clone(),
            description: state.description.clone(),
            email: state.email.clone(),
            profile_ids: state.profiles.iter().map(|p| u64::from(p.id())).collect(),
            created_at: to_datetime(self.created_at),
            updated_at: to_datetime(state.updated_at),
            deleted_at: state.deleted_at.map(to_datetime),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.to_record())
    }

    // ------------------------------------------------------------------
    // Profile membership
    // ------------------------------------------------------------------

    /// Appends a profile. Returns `false` if it is already attached.
    pub fn add_profile(&self, profile: Arc<Profile>) -> bool {
        let mut state = sync::write(&self.state);
        if state.profiles.iter().any(|p| p.id() == profile.id()) {
            return false;
        }
        state.profiles.push(profile);
        state.touch();
        true
    }

    /// Detaches a profile. Returns whether it was attached.
    pub fn remove_profile(&self, profile_id: ProfileId) -> bool {
        let mut state = sync::write(&self.state);
        let Some(pos) = state.profiles.iter().position(|p| p.id() == profile_id) else {
            return false;
        };
        state.profiles.remove(pos);
        state.touch();
        true
    }

    /// Snapshot of the attached profiles, in attach order.
    pub fn profiles(&self) -> Vec<Arc<Profile>> {
        sync::read(&self.state).profiles.clone()
    }

    pub fn profile_ids(&self) -> Vec<ProfileId> {
        sync::read(&self.state)
            .profiles
            .iter()
            .map(|p| p.id())
            .collect()
    }

    /// Looks up one attached profile by ID.
    pub fn profile(&self, profile_id: ProfileId) -> Option<Arc<Profile>> {
        sync::read(&self.state)
            .profiles
            .iter()
            .find(|p| p.id() == profile_id)
            .cloned()
    }

    pub fn has_profile(&self, profile_id: ProfileId) -> bool {
        sync::read(&self.state)
            .profiles
            .iter()
            .any(|p| p.id() == profile_id)
    }
}

impl Display for User {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = sync::read(&self.state);
        write!(f, "user {} ({}) id={}", state.name, state.email, self.id)
    }
}
