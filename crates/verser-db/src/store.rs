//! Storage contracts shared by every backend.
//!
//! All methods are synchronous; async callers go through
//! [`crate::with_storage`]. Lookups on rows that do not exist return `None`
//! or `false` rather than an error.

use anyhow::Result;

use verser_types::models::{ChatMessage, Community, Membership, Role, UserStatus};

use crate::models::{NewCommunity, NewMessage, NewUser, UserRecord};

/// Returned by [`UserStore::create_user`] when the username is registered
/// already. Callers find it with `anyhow::Error::downcast_ref`.
#[derive(Debug, thiserror::Error)]
#[error("username already taken: {0}")]
pub struct UsernameTaken(pub String);

pub trait UserStore {
    fn create_user(&self, user: NewUser) -> Result<UserRecord>;

    fn get_user(&self, id: i64) -> Result<Option<UserRecord>>;

    fn get_user_by_username(&self, username: &str) -> Result<Option<UserRecord>>;

    /// Returns the updated user, or `None` if no such user.
    fn update_user_status(&self, id: i64, status: UserStatus) -> Result<Option<UserRecord>>;
}

pub trait MessageStore {
    fn create_message(&self, message: NewMessage) -> Result<ChatMessage>;

    /// Up to `limit` messages of a conversation, oldest first. `before` is an
    /// exclusive message id cursor for paging backwards.
    fn list_messages(
        &self,
        conversation_id: i64,
        limit: u32,
        before: Option<i64>,
    ) -> Result<Vec<ChatMessage>>;
}

pub trait CommunityStore {
    fn create_community(&self, community: NewCommunity) -> Result<Community>;

    fn get_community(&self, id: i64) -> Result<Option<Community>>;

    fn list_communities(&self) -> Result<Vec<Community>>;

    /// Deletes the community and all of its memberships.
    fn delete_community(&self, id: i64) -> Result<bool>;
}

/// The (user, community, role) relation. Performs no permission checks and
/// does not enforce one row per pair.
pub trait MembershipStore {
    fn join(&self, user_id: i64, community_id: i64, role: Role) -> Result<Membership>;

    /// Returns whether a row was deleted.
    fn leave(&self, user_id: i64, community_id: i64) -> Result<bool>;

    fn is_member(&self, user_id: i64, community_id: i64) -> Result<bool>;

    fn get_role(&self, user_id: i64, community_id: i64) -> Result<Option<Role>>;

    fn list_members(&self, community_id: i64) -> Result<Vec<UserRecord>>;

    fn list_memberships(&self, community_id: i64) -> Result<Vec<Membership>>;

    fn list_communities_for_user(&self, user_id: i64) -> Result<Vec<Community>>;

    /// Overwrites the role. Returns `None` if the user is not a member.
    fn update_role(&self, user_id: i64, community_id: i64, role: Role)
    -> Result<Option<Membership>>;
}

pub trait Storage: UserStore + MessageStore + CommunityStore + MembershipStore + Send + Sync {}

impl<T> Storage for T where T: UserStore + MessageStore + CommunityStore + MembershipStore + Send + Sync {}
