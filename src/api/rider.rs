use axum::{extract::State, http::StatusCode, Json};
use bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use tap::TapFallible;
use time::OffsetDateTime;

use crate::{
    error::Error,
    geo::GeoPoint,
    mongo_ext::Collection,
    util::{FormattedDateTime, ObjectIdString, PathObjectId},
};

use super::auth::{User, UserAccess, UserCollection, UserModel, UserRole};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RiderModel {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub user_id: ObjectId,

    pub location: GeoPoint,
    pub is_available: bool,

    pub created_at: bson::DateTime,
    pub updated_at: bson::DateTime,
}

#[derive(Clone)]
pub struct RiderCollection(pub Collection<RiderModel>);

impl std::ops::Deref for RiderCollection {
    type Target = Collection<RiderModel>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl RiderCollection {
    pub async fn find_by_user_id(&self, user_id: ObjectId) -> Result<Option<RiderModel>, Error> {
        self.find_one(
            bson::doc! {
                "user_id": user_id
            },
            None,
        )
        .await
        .map_err(Into::into)
    }

    /// Nearest available rider to `point`, ordered by the 2dsphere index.
    pub async fn find_nearest_available(
        &self,
        point: &GeoPoint,
    ) -> Result<Option<RiderModel>, Error> {
        self.find_one(
            bson::doc! {
                "is_available": true,
                "location": {
                    "$near": {
                        "$geometry": bson::to_bson(point)?,
                    }
                }
            },
            None,
        )
        .await
        .map_err(Into::into)
    }
}

pub async fn create_rider(
    RiderCollection(riders): &RiderCollection,
    user_id: ObjectId,
    location: GeoPoint,
) -> Result<RiderModel, Error> {
    let model = RiderModel {
        id: ObjectId::new(),
        user_id,
        location,
        is_available: true,
        created_at: OffsetDateTime::now_utc().into(),
        updated_at: OffsetDateTime::now_utc().into(),
    };
    riders.insert_one(&model, None).await?;

    Ok(model)
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Rider {
    pub id: ObjectIdString,
    pub user_id: ObjectIdString,

    pub location: GeoPoint,
    pub is_available: bool,

    pub created_at: FormattedDateTime,
    pub updated_at: FormattedDateTime,
}

impl From<RiderModel> for Rider {
    fn from(value: RiderModel) -> Self {
        Self {
            id: value.id.into(),
            user_id: value.user_id.into(),
            location: value.location,
            is_available: value.is_available,

            created_at: value.created_at.into(),
            updated_at: value.updated_at.into(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct IndexResponse {
    pub riders: Vec<Rider>,
}

pub async fn index(
    State(riders): State<RiderCollection>,
    user: UserAccess,
) -> Result<Json<IndexResponse>, Error> {
    match user.role {
        UserRole::Rider => {
            return Err(Error::Forbidden)
                .tap_err(|_| tracing::debug!("tried listing riders as rider"))
        }
        UserRole::User | UserRole::Admin => {}
    }

    let mut cursor = riders.find(None, None).await?;

    let mut result = vec![];

    while cursor.advance().await? {
        result.push(cursor.deserialize_current()?.into());
    }

    Ok(Json(IndexResponse { riders: result }))
}

#[derive(Serialize, Debug)]
pub struct MeResponse {
    pub user: User,
    pub rider: Rider,
}

pub async fn me(
    State(riders): State<RiderCollection>,
    user: UserModel,
) -> Result<Json<MeResponse>, Error> {
    match user.role {
        UserRole::User | UserRole::Admin => return Err(Error::Forbidden),
        UserRole::Rider => {}
    }

    let rider = riders
        .find_by_user_id(user.id)
        .await?
        .ok_or(Error::NoResource)
        .tap_err(|_| tracing::debug!("rider record missing for user {}", user.id))?;

    Ok(Json(MeResponse {
        user: user.into(),
        rider: rider.into(),
    }))
}

#[derive(Serialize, Debug)]
pub struct ShowResponse {
    pub rider: Rider,
    pub user: User,
}

pub async fn show(
    State(riders): State<RiderCollection>,
    State(users): State<UserCollection>,
    user: UserAccess,
    PathObjectId(rider_id): PathObjectId,
) -> Result<Json<ShowResponse>, Error> {
    match user.role {
        UserRole::Rider => return Err(Error::Forbidden),
        UserRole::User | UserRole::Admin => {}
    }

    let rider = riders
        .get_one_by_id(rider_id)
        .await?
        .ok_or(Error::NoResource)?;

    let owner = users
        .get_one_by_id(rider.user_id)
        .await?
        .ok_or(Error::NoResource)?;

    Ok(Json(ShowResponse {
        rider: rider.into(),
        user: owner.into(),
    }))
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRequest {
    pub location: Option<GeoPoint>,
    pub is_available: Option<bool>,
}

#[derive(Serialize, Debug)]
pub struct UpdateResponse {
    pub rider: Rider,
}

async fn apply_update(
    riders: &RiderCollection,
    rider: RiderModel,
    request: UpdateRequest,
) -> Result<RiderModel, Error> {
    let rider = RiderModel {
        location: request.location.unwrap_or(rider.location),
        is_available: request.is_available.unwrap_or(rider.is_available),
        updated_at: OffsetDateTime::now_utc().into(),
        ..rider
    };

    riders
        .update_one_by_id(
            rider.id,
            bson::doc! {
                "$set": bson::to_document(&rider)?
            },
        )
        .await?;

    Ok(rider)
}

pub async fn update_me(
    State(riders): State<RiderCollection>,
    user: UserAccess,
    Json(request): Json<UpdateRequest>,
) -> Result<Json<UpdateResponse>, Error> {
    match user.role {
        UserRole::User | UserRole::Admin => return Err(Error::Forbidden),
        UserRole::Rider => {}
    }

    let rider = riders
        .find_by_user_id(user.id)
        .await?
        .ok_or(Error::NoResource)?;

    let rider = apply_update(&riders, rider, request).await?;

    Ok(Json(UpdateResponse {
        rider: rider.into(),
    }))
}

#[tracing::instrument(
    skip_all,
    fields(
        id = %rider_id,
        user = ?user,
    )
)]
pub async fn update(
    user: UserAccess,
    State(riders): State<RiderCollection>,
    PathObjectId(rider_id): PathObjectId,
    Json(request): Json<UpdateRequest>,
) -> Result<Json<UpdateResponse>, Error> {
    match user.role {
        UserRole::User => {
            return Err(Error::Forbidden)
                .tap_err(|_| tracing::debug!("tried updating rider as user"))
        }
        UserRole::Rider | UserRole::Admin => {}
    }

    let rider = riders
        .get_one_by_id(rider_id)
        .await?
        .ok_or(Error::NoResource)
        .tap_err(|_| tracing::debug!("tried updating non existing rider"))?;

    let rider = apply_update(&riders, rider, request).await?;

    Ok(Json(UpdateResponse {
        rider: rider.into(),
    }))
}

pub async fn delete(
    State(riders): State<RiderCollection>,
    user: UserAccess,
    PathObjectId(rider_id): PathObjectId,
) -> Result<StatusCode, Error> {
    match user.role {
        UserRole::User | UserRole::Rider => return Err(Error::Forbidden),
        UserRole::Admin => {}
    }

    riders
        .get_one_by_id(rider_id)
        .await?
        .ok_or(Error::NoResource)?;

    riders.delete_one_by_id(rider_id).await?;

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
        util::PathObjectId,
    };

    use super::UpdateRequest;

    #[tokio::test]
    async fn test_find_nearest_available_prefers_closest() {
        let bootstrap = bootstrap().await;

        let (_, far) = bootstrap.derive_rider("far@test.com", 10.0, 10.0).await;
        let (_, near) = bootstrap.derive_rider("near@test.com", 1.0, 1.0).await;

        let found = bootstrap
            .app_state
            .rider_collection
            .find_nearest_available(&GeoPoint::new(0.0, 0.0))
            .await
            .unwrap()
            .expect("an available rider should be found");

        assert_eq!(found.id, near.id);
        assert_ne!(found.id, far.id);
    }

    #[tokio::test]
    async fn test_find_nearest_available_skips_unavailable() {
        let bootstrap = bootstrap().await;

        let (_, far) = bootstrap.derive_rider("far@test.com", 10.0, 10.0).await;
        let (_, near) = bootstrap.derive_rider("near@test.com", 1.0, 1.0).await;

        bootstrap
            .app_state
            .rider_collection
            .update_one_by_id(
                near.id,
                bson::doc! {
                    "$set": { "is_available": false }
                },
            )
            .await
            .unwrap();

        let found = bootstrap
            .app_state
            .rider_collection
            .find_nearest_available(&GeoPoint::new(0.0, 0.0))
            .await
            .unwrap()
            .expect("an available rider should be found");

        assert_eq!(found.id, far.id);
    }

    #[tokio::test]
    async fn test_find_nearest_available_none() {
        let bootstrap = bootstrap().await;

        let found = bootstrap
            .app_state
            .rider_collection
            .find_nearest_available(&GeoPoint::new(0.0, 0.0))
            .await
            .unwrap();

        assert!(found.is_none());
    }

    #[tokio::test]
    async fn test_me() {
        let bootstrap = bootstrap().await;

        let (rider_bootstrap, rider) = bootstrap.derive_rider("rider@test.com", 1.0, 1.0).await;

        let Json(response) = super::me(
            bootstrap.rider_collection(),
            rider_bootstrap.user_model.clone(),
        )
        .await
        .unwrap();

        assert_eq!(response.rider.id, rider.id);
        assert_eq!(response.user.id, rider_bootstrap.user_id());
    }

    #[tokio::test]
    async fn test_me_forbidden_for_non_rider() {
        let bootstrap = bootstrap().await;

        let err = super::me(bootstrap.rider_collection(), bootstrap.user_model.clone())
            .await
            .unwrap_err();

        assert_matches!(err, Error::Forbidden);
    }

    #[tokio::test]
    async fn test_index() {
        let bootstrap = bootstrap().await;

        let (rider_bootstrap, _) = bootstrap.derive_rider("rider@test.com", 1.0, 1.0).await;

        let Json(response) = super::index(bootstrap.rider_collection(), bootstrap.user_access())
            .await
            .unwrap();
        assert_eq!(response.riders.len(), 1);

        let err = super::index(
            bootstrap.rider_collection(),
            rider_bootstrap.user_access(),
        )
        .await
        .unwrap_err();
        assert_matches!(err, Error::Forbidden);
    }

    #[tokio::test]
    async fn test_show() {
        let bootstrap = bootstrap().await;

        let (rider_bootstrap, rider) = bootstrap.derive_rider("rider@test.com", 1.0, 1.0).await;

        let Json(response) = super::show(
            bootstrap.rider_collection(),
            bootstrap.user_collection(),
            bootstrap.user_access(),
            PathObjectId(rider.id),
        )
        .await
        .unwrap();

        assert_eq!(response.rider.id, rider.id);
        assert_eq!(response.user.id, rider_bootstrap.user_id());

        let err = super::show(
            bootstrap.rider_collection(),
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

        let (rider_bootstrap, _) = bootstrap.derive_rider("rider@test.com", 1.0, 1.0).await;

        let Json(response) = super::update_me(
            bootstrap.rider_collection(),
            rider_bootstrap.user_access(),
            Json(UpdateRequest {
                location: Some(GeoPoint::new(2.0, 3.0)),
                is_available: Some(false),
            }),
        )
        .await
        .unwrap();

        assert_eq!(response.rider.location, GeoPoint::new(2.0, 3.0));
        assert!(!response.rider.is_available);

        let stored = bootstrap
            .app_state
            .rider_collection
            .find_by_user_id(rider_bootstrap.user_id())
            .await
            .unwrap()
            .unwrap();
        assert!(!stored.is_available);
        assert_eq!(stored.location, GeoPoint::new(2.0, 3.0));
    }

    #[tokio::test]
    async fn test_update_forbidden_for_user() {
        let bootstrap = bootstrap().await;

        let user_bootstrap = bootstrap
            .derive("user@test.com", "password", super::UserRole::User)
            .await;

        let err = super::update(
            user_bootstrap.user_access(),
            bootstrap.rider_collection(),
            PathObjectId(ObjectId::new()),
            Json(UpdateRequest {
                location: None,
                is_available: None,
            }),
        )
        .await
        .unwrap_err();

        assert_matches!(err, Error::Forbidden);
    }

    #[tokio::test]
    async fn test_delete() {
        let bootstrap = bootstrap().await;

        let (rider_bootstrap, rider) = bootstrap.derive_rider("rider@test.com", 1.0, 1.0).await;

        let err = super::delete(
            bootstrap.rider_collection(),
            rider_bootstrap.user_access(),
            PathObjectId(rider.id),
        )
        .await
        .unwrap_err();
        assert_matches!(err, Error::Forbidden);

        super::delete(
            bootstrap.rider_collection(),
            bootstrap.user_access(),
            PathObjectId(rider.id),
        )
        .await
        .unwrap();

        let gone = bootstrap
            .app_state
            .rider_collection
            .get_one_by_id(rider.id)
            .await
            .unwrap();
        assert!(gone.is_none());
    }
}
