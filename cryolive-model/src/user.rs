use crate::ids::{ProjectId, UserId};

/// A minimal account record, enough to authenticate a WebSocket/HTTP client
/// and check project membership. Project CRUD and account management proper
/// live outside this system's scope.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct User {
    pub id: UserId,
    pub username: String,
    #[cfg_attr(feature = "serde", serde(skip_serializing))]
    pub password_hash: String,
}

/// A project groups sessions and jobs and gates WebSocket subscription.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Project {
    pub id: ProjectId,
    pub owner_id: UserId,
    pub name: String,
}

/// Non-owner membership in a project.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ProjectMember {
    pub project_id: ProjectId,
    pub user_id: UserId,
}
