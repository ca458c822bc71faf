use std::net::SocketAddr;

use argon2::Argon2;
use axum::{
    extract::{ConnectInfo, FromRef, FromRequestParts, State},
    headers::{authorization::Bearer, Authorization},
    http::{request::Parts, StatusCode},
    Json, RequestPartsExt, TypedHeader,
};
use bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use tap::TapFallible;
use time::OffsetDateTime;
use validator::Validate;

use crate::{
    error::{Error, UnauthorizedType},
    geo::{GeoLocator, GeoPoint},
    mongo_ext::Collection,
    util::{hash_password, verify_password, FormattedDateTime, ObjectIdString},
};

use super::{
    rider::{create_rider, Rider, RiderCollection},
    token::{decode_access_token, generate_access_token, JwtState},
};

#[derive(Clone)]
pub struct UserCollection(pub Collection<UserModel>);

impl std::ops::Deref for UserCollection {
    type Target = Collection<UserModel>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct UserModel {
    #[serde(rename = "_id")]
    pub id: ObjectId,

    pub email: String,
    pub password: String,
    pub role: UserRole,

    #[serde(default)]
    pub location: Option<GeoPoint>,

    pub created_at: bson::DateTime,
    pub updated_at: bson::DateTime,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    #[default]
    User,
    Rider,
    Admin,
}

/// Registration secrets, provided at construction.
#[derive(Clone)]
pub struct RoleSecrets {
    pub admin_secret: String,
    pub rider_secret: String,
}

impl RoleSecrets {
    /// Admin wins when both secrets are supplied and match.
    pub fn resolve(&self, admin_secret: Option<&str>, rider_secret: Option<&str>) -> UserRole {
        if admin_secret == Some(self.admin_secret.as_str()) {
            UserRole::Admin
        } else if rider_secret == Some(self.rider_secret.as_str()) {
            UserRole::Rider
        } else {
            UserRole::User
        }
    }
}

#[derive(Debug)]
pub struct UserAccess {
    pub id: ObjectId,
    pub role: UserRole,
}

impl UserAccess {
    pub fn from_token(jwt_state: &JwtState, token: &str) -> Result<Self, Error> {
        let token = decode_access_token(jwt_state, token)
            .map_err(|_| Error::Unauthorized(UnauthorizedType::InvalidAccessToken))?;

        if token.claims.is_expired() {
            return Err(Error::Unauthorized(UnauthorizedType::InvalidAccessToken));
        }

        Ok(Self {
            id: token.claims.sub.0,
            role: token.claims.user_role,
        })
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for UserAccess
where
    JwtState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(token)) = parts
            .extract::<TypedHeader<Authorization<Bearer>>>()
            .await
            .map_err(|_| Error::Unauthorized(UnauthorizedType::MissingAccessToken))
            .tap_err(|_| tracing::debug!("bearer token not found"))?;

        let jwt = JwtState::from_ref(state);

        Self::from_token(&jwt, token.token())
    }
}

impl UserModel {
    pub async fn from_id(
        id: ObjectId,
        UserCollection(users): &UserCollection,
    ) -> Result<Self, Error> {
        users
            .find_one(
                bson::doc! {
                    "_id": id
                },
                None,
            )
            .await?
            .ok_or_else(|| Error::Unauthorized(UnauthorizedType::InvalidAccessToken))
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for UserModel
where
    JwtState: FromRef<S>,
    UserCollection: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let access = parts.extract_with_state::<UserAccess, _>(state).await?;
        let users = UserCollection::from_ref(state);
        Self::from_id(access.id, &users).await
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: ObjectIdString,

    pub email: String,
    pub role: UserRole,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<GeoPoint>,

    pub created_at: FormattedDateTime,
    pub updated_at: FormattedDateTime,
}

impl From<UserModel> for User {
    fn from(value: UserModel) -> Self {
        Self {
            id: value.id.into(),
            email: value.email,
            role: value.role,
            location: value.location,

            created_at: value.created_at.into(),
            updated_at: value.updated_at.into(),
        }
    }
}

#[derive(Validate, Serialize, Deserialize, Debug, Clone)]
pub struct CreateUserRequest {
    #[validate(email)]
    pub email: String,

    #[validate(length(min = 8, max = 64))]
    pub password: String,

    pub role: UserRole,

    pub location: Option<GeoPoint>,
}

pub async fn create_user(
    users: UserCollection,
    argon: Argon2<'_>,
    mut request: CreateUserRequest,
) -> Result<UserModel, Error> {
    request.email = request.email.trim().to_lowercase();
    request.validate()?;

    let count = users
        .count_documents(
            bson::doc! {
                "email": &request.email
            },
            None,
        )
        .await?;

    if count > 0 {
        return Err(Error::MustUniqueError("email".to_string()));
    }

    let model = UserModel {
        id: ObjectId::new(),
        email: request.email,
        password: hash_password(&argon, &request.password)?,
        role: request.role,
        location: request.location,
        created_at: OffsetDateTime::now_utc().into(),
        updated_at: OffsetDateTime::now_utc().into(),
    };
    users.insert_one(&model, None).await?;

    Ok(model)
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,

    pub rider_secret: Option<String>,
    pub admin_secret: Option<String>,
}

#[derive(Serialize, Debug)]
#[serde(untagged)]
pub enum RegisterResponse {
    RegisteredRider {
        user: User,
        rider: Rider,

        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Registered {
        user: User,

        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

pub async fn register(
    State(users): State<UserCollection>,
    State(riders): State<RiderCollection>,
    State(argon): State<Argon2<'static>>,
    State(secrets): State<RoleSecrets>,
    State(geo): State<GeoLocator>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(request): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<RegisterResponse>), Error> {
    let role = secrets.resolve(request.admin_secret.as_deref(), request.rider_secret.as_deref());

    let (location, message) = match geo.locate(addr.ip()).await {
        Ok(point) => (point, None),
        Err(err) => {
            tracing::warn!("geo lookup failed for {}: {}", addr.ip(), err);
            (
                GeoPoint::default(),
                Some(format!(
                    "Could not resolve a location for {}, defaulting to [0, 0]",
                    addr.ip()
                )),
            )
        }
    };

    let user = create_user(
        users,
        argon,
        CreateUserRequest {
            email: request.email,
            password: request.password,
            role,
            location: Some(location),
        },
    )
    .await?;

    let response = match role {
        UserRole::Rider => {
            let rider = create_rider(&riders, user.id, location).await?;

            RegisterResponse::RegisteredRider {
                user: user.into(),
                rider: rider.into(),
                message,
            }
        }
        UserRole::User | UserRole::Admin => RegisterResponse::Registered {
            user: user.into(),
            message,
        },
    };

    Ok((StatusCode::CREATED, Json(response)))
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub user: User,
    pub access_token: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub rider: Option<Rider>,
}

pub async fn login(
    State(users): State<UserCollection>,
    State(riders): State<RiderCollection>,
    State(jwt_state): State<JwtState>,
    State(argon): State<Argon2<'static>>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, Error> {
    let user = users
        .find_one(
            bson::doc! {
                "email": request.email.trim().to_lowercase()
            },
            None,
        )
        .await?;

    let user = match user {
        Some(user) if verify_password(&argon, &request.password, &user.password) => user,
        _ => return Err(Error::InvalidCredentials),
    };

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

    let access_token = generate_access_token(&jwt_state, &user)?;

    Ok(Json(LoginResponse {
        user: user.into(),
        access_token: access_token.token,
        rider: rider.map(Into::into),
    }))
}
