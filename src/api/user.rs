use argon2::Argon2;
use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use tap::TapFallible;
use time::OffsetDateTime;
use validator::Validate;

use crate::{error::Error, geo::GeoPoint, util::PathObjectId};

use super::{
    auth::{User, UserAccess, UserCollection, UserModel, UserRole},
    rider::{Rider, RiderCollection},
};

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct IndexResponse {
    pub users: Vec<User>,
}

pub async fn index(
    State(users): State<UserCollection>,
    user: UserAccess,
) -> Result<Json<IndexResponse>, Error> {
    match user.role {
        UserRole::User | UserRole::Rider => {
            return Err(Error::Forbidden)
                .tap_err(|_| tracing::debug!("tried listing users as non-admin"))
        }
        UserRole::Admin => {}
    }

    let mut cursor = users.find(None, None).await?;

    let mut result = vec![];

    while cursor.advance().await? {
        result.push(cursor.deserialize_current()?.into());
    }

    Ok(Json(IndexResponse { users: result }))
}

#[derive(Serialize, Debug)]
pub struct ProfileResponse {
    pub user: User,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub rider: Option<Rider>,
}

/// Serves both `GET /users/me` and `GET /auth/profile`.
pub async fn profile(
    State(riders): State<RiderCollection>,
    user: UserModel,
) -> Result<Json<ProfileResponse>, Error> {
    let rider = match user.role {
        UserRole::Rider => Some(
            riders
                .find_by_user_id(user.id)
                .await?
                .ok_or(Error::NoResource)
                .tap_err(|_| tracing::debug!("rider record missing for user {}", user.id))?,
        ),
        UserRole::User | UserRole::Admin => None,
    };

    Ok(Json(ProfileResponse {
        user: user.into(),
        rider: rider.map(Into::into),
    }))
}

#[derive(Serialize, Debug)]
pub struct ShowResponse {
    pub user: User,
}

pub async fn show(
    State(users): State<UserCollection>,
    user: UserAccess,
    PathObjectId(user_id): PathObjectId,
) -> Result<Json<ShowResponse>, Error> {
    match user.role {
        UserRole::User => return Err(Error::Forbidden),
        UserRole::Rider | UserRole::Admin => {}
    }

    let user = users
        .get_one_by_id(user_id)
        .await?
        .ok_or(Error::NoResource)?;

    Ok(Json(ShowResponse { user: user.into() }))
}

#[derive(Validate, Serialize, Deserialize, Debug, Clone)]
pub struct UpdateRequest {
    #[validate(email)]
    pub email: Option<String>,

    #[validate(length(min = 8, max = 64))]
    pub password: Option<String>,

    pub location: Option<GeoPoint>,
}

#[derive(Validate, Serialize, Deserialize, Debug, Clone)]
pub struct AdminUpdateRequest {
    #[validate(email)]
    pub email: Option<String>,

    #[validate(length(min = 8, max = 64))]
    pub password: Option<String>,

    pub location: Option<GeoPoint>,

    pub role: Option<UserRole>,
}

#[derive(Serialize, Debug)]
pub struct UpdateResponse {
    pub user: User,
}

async fn apply_update(
    users: &UserCollection,
    argon: &Argon2<'_>,
    target: UserModel,
    mut request: UpdateRequest,
    role: Option<UserRole>,
) -> Result<UserModel, Error> {
    request.email = request.email.map(|it| it.trim().to_lowercase());
    request.validate()?;

    if let Some(email) = &request.email {
        if email != &target.email {
            let count = users
                .count_documents(
                    bson::doc! {
                        "email": email
                    },
                    None,
                )
                .await?;

            if count > 0 {
                return Err(Error::MustUniqueError("email".to_string()));
            }
        }
    }

    let user = UserModel {
        id: target.id,
        email: request.email.unwrap_or(target.email),
        password: request
            .password
            .map(|it| crate::util::hash_password(argon, &it))
            .unwrap_or(Ok(target.password))?,
        role: role.unwrap_or(target.role),
        location: request.location.or(target.location),
        created_at: target.created_at,
        updated_at: OffsetDateTime::now_utc().into(),
    };

    users
        .update_one_by_id(
            user.id,
            bson::doc! {
                "$set": bson::to_document(&user)?
            },
        )
        .await?;

    Ok(user)
}

pub async fn update_me(
    State(users): State<UserCollection>,
    State(argon): State<Argon2<'static>>,
    user: UserModel,
    Json(request): Json<UpdateRequest>,
) -> Result<Json<UpdateResponse>, Error> {
    let user = apply_update(&users, &argon, user, request, None).await?;

    Ok(Json(UpdateResponse { user: user.into() }))
}

#[tracing::instrument(
    skip_all,
    fields(
        id = %user_id,
        user = ?user,
    )
)]
pub async fn update(
    user: UserAccess,
    State(users): State<UserCollection>,
    State(argon): State<Argon2<'static>>,
    PathObjectId(user_id): PathObjectId,
    Json(request): Json<AdminUpdateRequest>,
) -> Result<Json<UpdateResponse>, Error> {
    match user.role {
        UserRole::User | UserRole::Rider => {
            return Err(Error::Forbidden)
                .tap_err(|_| tracing::debug!("tried updating user as non-admin"))
        }
        UserRole::Admin => {}
    }

    let target = users
        .get_one_by_id(user_id)
        .await?
        .ok_or(Error::NoResource)?;

    let updated = apply_update(
        &users,
        &argon,
        target,
        UpdateRequest {
            email: request.email,
            password: request.password,
            location: request.location,
        },
        request.role,
    )
    .await?;

    Ok(Json(UpdateResponse { user: updated.into() }))
}

async fn delete_user(
    users: &UserCollection,
    riders: &RiderCollection,
    user: UserModel,
) -> Result<(), Error> {
    users.delete_one_by_id(user.id).await?;

    // rider profiles do not outlive their user
    if user.role == UserRole::Rider {
        riders
            .delete_one(
                bson::doc! {
                    "user_id": user.id
                },
                None,
            )
            .await?;
    }

    Ok(())
}

pub async fn delete_me(
    State(users): State<UserCollection>,
    State(riders): State<RiderCollection>,
    user: UserModel,
) -> Result<StatusCode, Error> {
    delete_user(&users, &riders, user).await?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete(
    State(users): State<UserCollection>,
    State(riders): State<RiderCollection>,
    user: UserAccess,
    PathObjectId(user_id): PathObjectId,
) -> Result<StatusCode, Error> {
    match user.role {
        UserRole::User | UserRole::Rider => {
            return Err(Error::Forbidden)
                .tap_err(|_| tracing::debug!("tried deleting user as non-admin"))
        }
        UserRole::Admin => {}
    }

    let target = users
        .get_one_by_id(user_id)
        .await?
        .ok_or(Error::NoResource)?;

    delete_user(&users, &riders, target).await?;

    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use axum::Json;
    use bson::oid::ObjectId;

    use crate::{
        api::tests::bootstrap,
        error::Error,
        geo::GeoPoint,
        util::{verify_password, PathObjectId},
    };

    use super::{AdminUpdateRequest, UpdateRequest, UserRole};

    #[tokio::test]
    async fn test_index_requires_admin() {
        let bootstrap = bootstrap().await;

        let Json(response) = super::index(bootstrap.user_collection(), bootstrap.user_access())
            .await
            .unwrap();
        assert_eq!(response.users.len(), 1);

        let user_bootstrap = bootstrap
            .derive("user@test.com", "password", UserRole::User)
            .await;

        let err = super::index(bootstrap.user_collection(), user_bootstrap.user_access())
            .await
            .unwrap_err();
        assert_matches!(err, Error::Forbidden);
    }

    #[tokio::test]
    async fn test_profile() {
        let bootstrap = bootstrap().await;

        let Json(response) = super::profile(
            bootstrap.rider_collection(),
            bootstrap.user_model.clone(),
        )
        .await
        .unwrap();

        assert_eq!(response.user.id, bootstrap.user_id());
        assert!(response.rider.is_none());
    }

    #[tokio::test]
    async fn test_profile_attaches_rider() {
        let bootstrap = bootstrap().await;

        let (rider_bootstrap, rider) = bootstrap.derive_rider("rider@test.com", 1.0, 1.0).await;

        let Json(response) = super::profile(
            bootstrap.rider_collection(),
            rider_bootstrap.user_model.clone(),
        )
        .await
        .unwrap();

        assert_eq!(response.user.id, rider_bootstrap.user_id());
        let attached = response.rider.expect("rider profile should attach the rider");
        assert_eq!(attached.id, rider.id);
    }

    #[tokio::test]
    async fn test_show() {
        let bootstrap = bootstrap().await;

        let user_bootstrap = bootstrap
            .derive("user@test.com", "password", UserRole::User)
            .await;

        let Json(response) = super::show(
            bootstrap.user_collection(),
            bootstrap.user_access(),
            PathObjectId(user_bootstrap.user_id()),
        )
        .await
        .unwrap();
        assert_eq!(response.user.id, user_bootstrap.user_id());

        let err = super::show(
            bootstrap.user_collection(),
            user_bootstrap.user_access(),
            PathObjectId(bootstrap.user_id()),
        )
        .await
        .unwrap_err();
        assert_matches!(err, Error::Forbidden);

        let err = super::show(
            bootstrap.user_collection(),
            bootstrap.user_access(),
            PathObjectId(ObjectId::new()),
        )
        .await
        .unwrap_err();
        assert_matches!(err, Error::NoResource);
    }

    #[tokio::test]
    async fn test_update_me() {
        let bootstrap = bootstrap().await;

        let user_bootstrap = bootstrap
            .derive("user@test.com", "password", UserRole::User)
            .await;

        let Json(response) = super::update_me(
            bootstrap.user_collection(),
            bootstrap.argon(),
            user_bootstrap.user_model.clone(),
            Json(UpdateRequest {
                email: Some("Renamed@Test.com".to_string()),
                password: Some("newpassword".to_string()),
                location: Some(GeoPoint::new(1.0, 2.0)),
            }),
        )
        .await
        .unwrap();

        assert_eq!(response.user.email, "renamed@test.com");
        assert_eq!(response.user.location, Some(GeoPoint::new(1.0, 2.0)));

        let stored = bootstrap
            .app_state
            .user_collection
            .get_one_by_id(user_bootstrap.user_id())
            .await
            .unwrap()
            .unwrap();
        assert!(verify_password(
            &bootstrap.app_state.argon,
            "newpassword",
            &stored.password
        ));
    }

    #[tokio::test]
    async fn test_update_me_unique_email() {
        let bootstrap = bootstrap().await;

        let user_bootstrap = bootstrap
            .derive("user@test.com", "password", UserRole::User)
            .await;

        let err = super::update_me(
            bootstrap.user_collection(),
            bootstrap.argon(),
            user_bootstrap.user_model.clone(),
            Json(UpdateRequest {
                email: Some(bootstrap.user_email()),
                password: None,
                location: None,
            }),
        )
        .await
        .unwrap_err();

        assert_matches!(err, Error::MustUniqueError(field) if field == "email");
    }

    #[tokio::test]
    async fn test_update_by_id_requires_admin() {
        let bootstrap = bootstrap().await;

        let user_bootstrap = bootstrap
            .derive("user@test.com", "password", UserRole::User)
            .await;

        let err = super::update(
            user_bootstrap.user_access(),
            bootstrap.user_collection(),
            bootstrap.argon(),
            PathObjectId(bootstrap.user_id()),
            Json(AdminUpdateRequest {
                email: None,
                password: None,
                location: None,
                role: Some(UserRole::Admin),
            }),
        )
        .await
        .unwrap_err();
        assert_matches!(err, Error::Forbidden);

        let Json(response) = super::update(
            bootstrap.user_access(),
            bootstrap.user_collection(),
            bootstrap.argon(),
            PathObjectId(user_bootstrap.user_id()),
            Json(AdminUpdateRequest {
                email: None,
                password: None,
                location: None,
                role: Some(UserRole::Admin),
            }),
        )
        .await
        .unwrap();
        assert_eq!(response.user.role, UserRole::Admin);
    }

    #[tokio::test]
    async fn test_delete_me_cascades_rider() {
        let bootstrap = bootstrap().await;

        let (rider_bootstrap, rider) = bootstrap.derive_rider("rider@test.com", 1.0, 1.0).await;

        super::delete_me(
            bootstrap.user_collection(),
            bootstrap.rider_collection(),
            rider_bootstrap.user_model.clone(),
        )
        .await
        .unwrap();

        let user_gone = bootstrap
            .app_state
            .user_collection
            .get_one_by_id(rider_bootstrap.user_id())
            .await
            .unwrap();
        assert!(user_gone.is_none());

        let rider_gone = bootstrap
            .app_state
            .rider_collection
            .get_one_by_id(rider.id)
            .await
            .unwrap();
        assert!(rider_gone.is_none(), "deleting the user should delete the rider");
    }

    #[tokio::test]
    async fn test_delete_by_id() {
        let bootstrap = bootstrap().await;

        let (rider_bootstrap, rider) = bootstrap.derive_rider("rider@test.com", 1.0, 1.0).await;

        let err = super::delete(
            bootstrap.user_collection(),
            bootstrap.rider_collection(),
            rider_bootstrap.user_access(),
            PathObjectId(rider_bootstrap.user_id()),
        )
        .await
        .unwrap_err();
        assert_matches!(err, Error::Forbidden);

        super::delete(
            bootstrap.user_collection(),
            bootstrap.rider_collection(),
            bootstrap.user_access(),
            PathObjectId(rider_bootstrap.user_id()),
        )
        .await
        .unwrap();

        let rider_gone = bootstrap
            .app_state
            .rider_collection
            .get_one_by_id(rider.id)
            .await
            .unwrap();
        assert!(rider_gone.is_none());

        let err = super::delete(
            bootstrap.user_collection(),
            bootstrap.rider_collection(),
            bootstrap.user_access(),
            PathObjectId(ObjectId::new()),
        )
        .await
        .unwrap_err();
        assert_matches!(err, Error::NoResource);
    }
}
