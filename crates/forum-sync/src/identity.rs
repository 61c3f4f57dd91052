use std::future::Future;

use forum_types::models::{Access, EventId, Role, UserId};

use crate::error::SyncError;

/// The signed-in user, resolved once per session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Viewer {
    pub id: UserId,
    pub name: String,
    pub role: Role,
}

/// What the viewer may do inside one event's forum.
///
/// An account-level admin moderates everywhere; an event organizer moderates
/// their own events regardless of account role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewerRole {
    Participant,
    Organizer,
    Admin,
}

impl ViewerRole {
    pub fn for_event(role: Role, access: Access) -> Self {
        match (role, access) {
            (_, Access::Organizer) => Self::Organizer,
            (Role::Admin, _) => Self::Admin,
            _ => Self::Participant,
        }
    }

    /// Pin and delete are only attempted for moderators.
    pub fn can_moderate(self) -> bool {
        matches!(self, Self::Organizer | Self::Admin)
    }

    /// Announcements are an organizer privilege.
    pub fn can_announce(self) -> bool {
        matches!(self, Self::Organizer)
    }
}

pub trait IdentityProvider: Send + Sync {
    fn current_viewer(&self) -> impl Future<Output = Result<Viewer, SyncError>> + Send;
}

pub trait AccessProvider: Send + Sync {
    fn access(&self, event_id: &EventId) -> impl Future<Output = Result<Access, SyncError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_organizer_moderates_regardless_of_account_role() {
        let role = ViewerRole::for_event(Role::Participant, Access::Organizer);
        assert_eq!(role, ViewerRole::Organizer);
        assert!(role.can_moderate());
        assert!(role.can_announce());
    }

    #[test]
    fn admins_moderate_but_do_not_announce() {
        let role = ViewerRole::for_event(Role::Admin, Access::Registered);
        assert_eq!(role, ViewerRole::Admin);
        assert!(role.can_moderate());
        assert!(!role.can_announce());
    }

    #[test]
    fn registered_participants_cannot_moderate() {
        let role = ViewerRole::for_event(Role::Organizer, Access::Registered);
        assert_eq!(role, ViewerRole::Participant);
        assert!(!role.can_moderate());
    }
}
