use axum::{
    Extension, Json,
    extract::{State, rejection::JsonRejection},
};
use chrono::Utc;
use uuid::Uuid;

use nathia_types::api::{Claims, ProfileResponse, UpdateProfileRequest};
use nathia_types::models::UserProfile;

use crate::error::ApiError;
use crate::state::AppState;

const MAX_NAME_CHARS: usize = 80;
const MAX_PREGNANCY_WEEK: u8 = 42;

fn to_response(profile: UserProfile) -> ProfileResponse {
    ProfileResponse {
        user_id: profile.user_id,
        display_name: profile.display_name,
        mother_type: profile.mother_type,
        pregnancy_week: profile.pregnancy_week,
        baby_name: profile.baby_name,
        subscription_tier: profile.subscription_tier,
        risk_level: profile.risk_level,
        updated_at: profile.updated_at,
    }
}

/// Trim and drop empty names; reject overlong ones.
fn clean_name(field: &str, value: Option<String>) -> Result<Option<String>, ApiError> {
    let Some(value) = value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) else {
        return Ok(None);
    };
    if value.chars().count() > MAX_NAME_CHARS {
        return Err(ApiError::Validation(format!("{} must be at most {} characters", field, MAX_NAME_CHARS)));
    }
    Ok(Some(value))
}

fn apply_update(user_id: Uuid, req: UpdateProfileRequest) -> Result<UserProfile, ApiError> {
    if let Some(week) = req.pregnancy_week {
        if week == 0 || week > MAX_PREGNANCY_WEEK {
            return Err(ApiError::Validation(format!(
                "pregnancyWeek must be between 1 and {}",
                MAX_PREGNANCY_WEEK
            )));
        }
    }

    let mut profile = UserProfile::new(user_id);
    profile.display_name = clean_name("displayName", req.display_name)?;
    profile.baby_name = clean_name("babyName", req.baby_name)?;
    profile.mother_type = req.mother_type;
    profile.pregnancy_week = req.pregnancy_week;
    profile.updated_at = Utc::now();
    Ok(profile)
}

/// `GET /profile`. A user without a stored profile gets the defaults.
pub async fn get_profile(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<ProfileResponse>, ApiError> {
    let scope = state.db.scoped(claims.sub);
    let stored = tokio::task::spawn_blocking(move || scope.profile()).await??;
    let profile = stored.unwrap_or_else(|| UserProfile::new(claims.sub));
    Ok(Json(to_response(profile)))
}

/// `PUT /profile`. Only the user-editable fields change; the subscription tier
/// and rolling risk level are kept.
pub async fn update_profile(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    payload: Result<Json<UpdateProfileRequest>, JsonRejection>,
) -> Result<Json<ProfileResponse>, ApiError> {
    let Json(req) = payload?;
    let profile = apply_update(claims.sub, req)?;

    let scope = state.db.scoped(claims.sub);
    let saved = tokio::task::spawn_blocking(move || scope.upsert_profile_details(&profile)).await??;
    Ok(Json(to_response(saved)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use nathia_types::models::MotherType;

    fn request(week: Option<u8>, name: Option<&str>) -> UpdateProfileRequest {
        UpdateProfileRequest {
            display_name: name.map(str::to_string),
            mother_type: Some(MotherType::Gestante),
            pregnancy_week: week,
            baby_name: None,
        }
    }

    #[test]
    fn pregnancy_week_bounds() {
        assert!(apply_update(Uuid::new_v4(), request(Some(0), None)).is_err());
        assert!(apply_update(Uuid::new_v4(), request(Some(43), None)).is_err());
        assert!(apply_update(Uuid::new_v4(), request(Some(40), None)).is_ok());
    }

    #[test]
    fn names_are_trimmed_and_blank_becomes_none() {
        let profile = apply_update(Uuid::new_v4(), request(None, Some("  Ana  "))).unwrap();
        assert_eq!(profile.display_name.as_deref(), Some("Ana"));

        let profile = apply_update(Uuid::new_v4(), request(None, Some("   "))).unwrap();
        assert_eq!(profile.display_name, None);

        let long = "a".repeat(MAX_NAME_CHARS + 1);
        assert!(apply_update(Uuid::new_v4(), request(None, Some(&long))).is_err());
    }
}
