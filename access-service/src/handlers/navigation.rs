//! Navigation endpoints.
//!
//! All three endpoints share one composition pipeline: resolve the plan,
//! aggregate the caller's effective permissions, then build the tree. Plan
//! resolution failures are surfaced; grant lookups degrade to the empty set
//! inside the aggregator, which fails closed.

use axum::{extract::State, Json};
use serde::Serialize;
use service_core::error::AppError;
use std::collections::HashSet;
use utoipa::ToSchema;

use crate::middleware::RequestContext;
use crate::models::{Institution, RoleSummary, INSTITUTION_TYPE_ALL};
use crate::services::navigation::{build_navigation, is_generic_grouping_title, NavNode};
use crate::services::permissions::PermissionAggregator;
use crate::AppState;

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NavigationResponse {
    pub permissions: Vec<String>,
    pub navigation: Vec<NavNode>,
    pub roles: Vec<RoleSummary>,
    pub is_admin: bool,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PermissionsResponse {
    pub permissions: Vec<String>,
    pub roles: Vec<RoleSummary>,
    pub is_admin: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct NavItemsResponse {
    pub navigation: Vec<NavNode>,
}

pub(crate) struct NavigationPayload {
    pub permissions: Vec<String>,
    pub navigation: Vec<NavNode>,
    pub roles: Vec<RoleSummary>,
    pub is_admin: bool,
}

/// Resolve everything the navigation endpoints need for one caller.
pub(crate) async fn navigation_payload(
    state: &AppState,
    context: &RequestContext,
) -> Result<NavigationPayload, AppError> {
    let plan = state.plan_resolver.resolve(context.institution_id).await?;

    let institution_type = match context.institution_id {
        Some(institution_id) => state
            .db
            .find_institution_by_id(institution_id)
            .await?
            .as_ref()
            .map(Institution::type_code)
            .unwrap_or(INSTITUTION_TYPE_ALL)
            .to_string(),
        None => INSTITUTION_TYPE_ALL.to_string(),
    };

    let roles = state.aggregator.roles(context.user_id).await;
    let is_admin = PermissionAggregator::is_admin(&roles);

    let effective: HashSet<String> = state
        .aggregator
        .effective_permissions(context.user_id, &plan.permission_keys)
        .await;

    let module_ids: Vec<uuid::Uuid> = plan.module_ids.iter().copied().collect();
    let modules = state.db.find_modules_by_ids(&module_ids).await?;
    let feature_rows = state
        .db
        .find_features_for_modules(&modules.iter().map(|m| m.module_id).collect::<Vec<_>>())
        .await?;
    let permission_rows = state
        .db
        .find_permissions_for_features(
            &feature_rows.iter().map(|f| f.feature_id).collect::<Vec<_>>(),
        )
        .await?;

    let navigation = build_navigation(
        &modules,
        &feature_rows,
        &permission_rows,
        &effective,
        is_admin,
        &plan.permission_keys,
        &institution_type,
        &is_generic_grouping_title,
    );

    let mut permissions: Vec<String> = effective.into_iter().collect();
    permissions.sort();

    Ok(NavigationPayload {
        permissions,
        navigation,
        roles: roles.into_iter().map(RoleSummary::from).collect(),
        is_admin,
    })
}

/// Full navigation payload: effective permissions, tree, roles and admin
/// status in one round trip.
#[utoipa::path(
    get,
    path = "/navigation",
    tag = "navigation",
    responses(
        (status = 200, description = "Navigation payload", body = NavigationResponse),
        (status = 401, description = "Missing user identity"),
    )
)]
pub async fn get_navigation(
    State(state): State<AppState>,
    context: RequestContext,
) -> Result<Json<NavigationResponse>, AppError> {
    let payload = navigation_payload(&state, &context).await?;
    Ok(Json(NavigationResponse {
        permissions: payload.permissions,
        navigation: payload.navigation,
        roles: payload.roles,
        is_admin: payload.is_admin,
    }))
}

/// Effective permissions and roles without the tree.
#[utoipa::path(
    get,
    path = "/navigation/permissions",
    tag = "navigation",
    responses(
        (status = 200, description = "Effective permissions", body = PermissionsResponse),
        (status = 401, description = "Missing user identity"),
    )
)]
pub async fn get_permissions(
    State(state): State<AppState>,
    context: RequestContext,
) -> Result<Json<PermissionsResponse>, AppError> {
    let payload = navigation_payload(&state, &context).await?;
    Ok(Json(PermissionsResponse {
        permissions: payload.permissions,
        roles: payload.roles,
        is_admin: payload.is_admin,
    }))
}

/// The navigation tree alone.
#[utoipa::path(
    get,
    path = "/navigation/nav-items",
    tag = "navigation",
    responses(
        (status = 200, description = "Navigation tree", body = NavItemsResponse),
        (status = 401, description = "Missing user identity"),
    )
)]
pub async fn get_nav_items(
    State(state): State<AppState>,
    context: RequestContext,
) -> Result<Json<NavItemsResponse>, AppError> {
    let payload = navigation_payload(&state, &context).await?;
    Ok(Json(NavItemsResponse {
        navigation: payload.navigation,
    }))
}
