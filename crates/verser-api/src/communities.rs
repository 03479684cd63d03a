use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use axum_extra::extract::WithRejection;
use tracing::info;

use verser_db::models::NewCommunity;
use verser_db::with_storage;
use verser_types::api::{Claims, CreateCommunityRequest, MemberResponse, UpdateRoleRequest};
use verser_types::models::{Community, Role};

use crate::AppState;
use crate::authz;
use crate::error::ApiError;

pub async fn list_communities(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    let communities = with_storage(&state.storage, |s| s.list_communities()).await?;
    Ok(Json(communities))
}

/// Create a community. The creator is joined as its first admin.
pub async fn create_community(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    WithRejection(Json(req), _): WithRejection<Json<CreateCommunityRequest>, ApiError>,
) -> Result<impl IntoResponse, ApiError> {
    let name = req.name.trim().to_string();
    if name.is_empty() || name.len() > 100 {
        return Err(ApiError::BadRequest(
            "community name must be 1 to 100 characters".into(),
        ));
    }

    let creator_id = claims.sub;
    let community = with_storage(&state.storage, move |s| {
        let community = s.create_community(NewCommunity {
            name,
            description: req.description,
            creator_id,
        })?;
        s.join(creator_id, community.id, Role::Admin)?;
        Ok(community)
    })
    .await?;

    info!(
        "{} ({}) created community {} ({})",
        claims.username, claims.sub, community.name, community.id
    );
    Ok((StatusCode::CREATED, Json(community)))
}

pub async fn get_community(
    State(state): State<AppState>,
    Path(community_id): Path<i64>,
) -> Result<Json<Community>, ApiError> {
    Ok(Json(find_community(&state, community_id).await?))
}

pub async fn delete_community(
    State(state): State<AppState>,
    Path(community_id): Path<i64>,
    Extension(claims): Extension<Claims>,
) -> Result<StatusCode, ApiError> {
    find_community(&state, community_id).await?;

    let actor = actor_role(&state, claims.sub, community_id).await?;
    if !authz::can_delete_community(actor) {
        return Err(ApiError::Forbidden("Only admins can delete a community"));
    }

    with_storage(&state.storage, move |s| s.delete_community(community_id)).await?;

    info!(
        "{} ({}) deleted community {}",
        claims.username, claims.sub, community_id
    );
    Ok(StatusCode::NO_CONTENT)
}

pub async fn join_community(
    State(state): State<AppState>,
    Path(community_id): Path<i64>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    find_community(&state, community_id).await?;

    let user_id = claims.sub;
    let membership = with_storage(&state.storage, move |s| {
        if s.is_member(user_id, community_id)? {
            return Ok(None);
        }
        s.join(user_id, community_id, Role::default()).map(Some)
    })
    .await?
    .ok_or(ApiError::Conflict("Already a member of this community"))?;

    Ok((StatusCode::CREATED, Json(membership)))
}

pub async fn leave_community(
    State(state): State<AppState>,
    Path(community_id): Path<i64>,
    Extension(claims): Extension<Claims>,
) -> Result<StatusCode, ApiError> {
    let user_id = claims.sub;
    let left = with_storage(&state.storage, move |s| s.leave(user_id, community_id)).await?;
    if !left {
        return Err(ApiError::NotFound("Membership"));
    }
    Ok(StatusCode::NO_CONTENT)
}

/// Members with their role. Password hashes never leave this function.
pub async fn list_members(
    State(state): State<AppState>,
    Path(community_id): Path<i64>,
) -> Result<Json<Vec<MemberResponse>>, ApiError> {
    find_community(&state, community_id).await?;

    let (users, memberships) = with_storage(&state.storage, move |s| {
        Ok((s.list_members(community_id)?, s.list_memberships(community_id)?))
    })
    .await?;

    let members = users
        .into_iter()
        .map(|record| {
            let role = memberships
                .iter()
                .find(|m| m.user_id == record.id)
                .map(|m| m.role)
                .unwrap_or_default();
            MemberResponse {
                user: record.into_public(),
                role,
            }
        })
        .collect();

    Ok(Json(members))
}

pub async fn update_member_role(
    State(state): State<AppState>,
    Path((community_id, user_id)): Path<(i64, i64)>,
    Extension(claims): Extension<Claims>,
    WithRejection(Json(req), _): WithRejection<Json<UpdateRoleRequest>, ApiError>,
) -> Result<impl IntoResponse, ApiError> {
    let actor = actor_role(&state, claims.sub, community_id).await?;
    let target = member_role(&state, user_id, community_id).await?;

    if !authz::can_change_role(actor, target, req.role) {
        return Err(ApiError::Forbidden(
            "Insufficient permissions to change this role",
        ));
    }

    let new_role = req.role;
    let membership = with_storage(&state.storage, move |s| {
        s.update_role(user_id, community_id, new_role)
    })
    .await?
    .ok_or(ApiError::NotFound("Membership"))?;

    info!(
        "{} ({}) set user {} to {} in community {}",
        claims.username, claims.sub, user_id, new_role, community_id
    );
    Ok(Json(membership))
}

pub async fn remove_member(
    State(state): State<AppState>,
    Path((community_id, user_id)): Path<(i64, i64)>,
    Extension(claims): Extension<Claims>,
) -> Result<StatusCode, ApiError> {
    let target = member_role(&state, user_id, community_id).await?;

    // Removing yourself is just leaving
    if user_id != claims.sub {
        let actor = actor_role(&state, claims.sub, community_id).await?;
        if !authz::can_remove_member(actor, target) {
            return Err(ApiError::Forbidden(
                "Insufficient permissions to remove this member",
            ));
        }
    }

    with_storage(&state.storage, move |s| s.leave(user_id, community_id)).await?;

    info!(
        "{} ({}) removed user {} from community {}",
        claims.username, claims.sub, user_id, community_id
    );
    Ok(StatusCode::NO_CONTENT)
}

async fn find_community(state: &AppState, community_id: i64) -> Result<Community, ApiError> {
    with_storage(&state.storage, move |s| s.get_community(community_id))
        .await?
        .ok_or(ApiError::NotFound("Community"))
}

/// Role of the caller; non-members are forbidden rather than not found.
async fn actor_role(state: &AppState, user_id: i64, community_id: i64) -> Result<Role, ApiError> {
    with_storage(&state.storage, move |s| s.get_role(user_id, community_id))
        .await?
        .ok_or(ApiError::Forbidden("Not a member of this community"))
}

async fn member_role(state: &AppState, user_id: i64, community_id: i64) -> Result<Role, ApiError> {
    with_storage(&state.storage, move |s| s.get_role(user_id, community_id))
        .await?
        .ok_or(ApiError::NotFound("Membership"))
}
