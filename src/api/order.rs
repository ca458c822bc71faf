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

use super::{
    auth::{UserAccess, UserRole},
    rider::RiderCollection,
};

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    #[default]
    Pending,
    Assigned,
    Ongoing,
    Completed,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct OrderModel {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub user_id: ObjectId,
    pub rider_id: Option<ObjectId>,

    pub pickup_location: GeoPoint,
    pub dropoff_location: GeoPoint,
    pub status: OrderStatus,

    pub created_at: bson::DateTime,
    pub updated_at: bson::DateTime,
}

#[derive(Clone)]
pub struct OrderCollection(pub Collection<OrderModel>);

impl std::ops::Deref for OrderCollection {
    type Target = Collection<OrderModel>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: ObjectIdString,
    pub user_id: ObjectIdString,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rider_id: Option<ObjectIdString>,

    pub pickup_location: GeoPoint,
    pub dropoff_location: GeoPoint,
    pub status: OrderStatus,

    pub created_at: FormattedDateTime,
    pub updated_at: FormattedDateTime,
}

impl From<OrderModel> for Order {
    fn from(value: OrderModel) -> Self {
        Self {
            id: value.id.into(),
            user_id: value.user_id.into(),
            rider_id: value.rider_id.map(Into::into),

            pickup_location: value.pickup_location,
            dropoff_location: value.dropoff_location,
            status: value.status,

            created_at: value.created_at.into(),
            updated_at: value.updated_at.into(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CreateRequest {
    pub pickup_location: GeoPoint,
    pub dropoff_location: GeoPoint,
}

#[derive(Serialize, Debug)]
pub struct CreateResponse {
    pub order: Order,
}

#[tracing::instrument(
    skip_all,
    fields(
        user = ?user,
    )
)]
pub async fn create(
    State(orders): State<OrderCollection>,
    State(riders): State<RiderCollection>,
    user: UserAccess,
    Json(request): Json<CreateRequest>,
) -> Result<(StatusCode, Json<CreateResponse>), Error> {
    match user.role {
        UserRole::Rider | UserRole::Admin => {
            return Err(Error::Forbidden)
                .tap_err(|_| tracing::debug!("tried creating order as non-user"))
        }
        UserRole::User => {}
    }

    let rider = riders
        .find_nearest_available(&request.pickup_location)
        .await?
        .ok_or(Error::RiderUnavailable)
        .tap_err(|_| tracing::debug!("no available rider near pickup"))?;

    let model = OrderModel {
        id: ObjectId::new(),
        user_id: user.id,
        rider_id: Some(rider.id),
        pickup_location: request.pickup_location,
        dropoff_location: request.dropoff_location,
        status: OrderStatus::Assigned,
        created_at: OffsetDateTime::now_utc().into(),
        updated_at: OffsetDateTime::now_utc().into(),
    };

    tracing::debug!("assigning rider {} to order {}", rider.id, model.id);
    orders.insert_one(&model, None).await?;

    // not wrapped in a transaction, a crash here leaves the rider available
    riders
        .update_one_by_id(
            rider.id,
            bson::doc! {
                "$set": {
                    "is_available": false,
                    "updated_at": bson::DateTime::from(OffsetDateTime::now_utc()),
                }
            },
        )
        .await?;

    Ok((StatusCode::CREATED, Json(CreateResponse { order: model.into() })))
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct IndexResponse {
    pub orders: Vec<Order>,
}

pub async fn index(
    State(orders): State<OrderCollection>,
    State(riders): State<RiderCollection>,
    user: UserAccess,
) -> Result<Json<IndexResponse>, Error> {
    let filter = match user.role {
        UserRole::User => Some(bson::doc! { "user_id": user.id }),
        UserRole::Rider => {
            let rider = riders
                .find_by_user_id(user.id)
                .await?
                .ok_or(Error::NoResource)?;

            Some(bson::doc! { "rider_id": rider.id })
        }
        UserRole::Admin => None,
    };

    let mut cursor = orders.find(filter, None).await?;

    let mut result = vec![];

    while cursor.advance().await? {
        result.push(cursor.deserialize_current()?.into());
    }

    Ok(Json(IndexResponse { orders: result }))
}

#[derive(Serialize, Debug)]
pub struct ShowResponse {
    pub order: Order,
}

pub async fn show(
    State(orders): State<OrderCollection>,
    _user: UserAccess,
    PathObjectId(order_id): PathObjectId,
) -> Result<Json<ShowResponse>, Error> {
    let order = orders
        .get_one_by_id(order_id)
        .await?
        .ok_or(Error::NoResource)?;

    Ok(Json(ShowResponse { order: order.into() }))
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct UpdateRequest {
    pub status: Option<OrderStatus>,
}

#[derive(Serialize, Debug)]
pub struct UpdateResponse {
    pub order: Order,
}

#[tracing::instrument(
    skip_all,
    fields(
        id = %order_id,
        user = ?user,
    )
)]
pub async fn update(
    user: UserAccess,
    State(orders): State<OrderCollection>,
    State(riders): State<RiderCollection>,
    PathObjectId(order_id): PathObjectId,
    Json(request): Json<UpdateRequest>,
) -> Result<Json<UpdateResponse>, Error> {
    match user.role {
        UserRole::User => {
            return Err(Error::Forbidden)
                .tap_err(|_| tracing::debug!("tried updating order as user"))
        }
        UserRole::Rider | UserRole::Admin => {}
    }

    let order = orders
        .get_one_by_id(order_id)
        .await?
        .ok_or(Error::NoResource)
        .tap_err(|_| tracing::debug!("tried updating non existing order"))?;

    let status = request.status.unwrap_or(order.status);

    // rider_id is set iff the order left pending
    if status == OrderStatus::Pending && order.rider_id.is_some() {
        return Err(Error::CustomStr(
            StatusCode::BAD_REQUEST,
            "an assigned order cannot return to pending",
        ));
    }

    let completed = status == OrderStatus::Completed && order.status != OrderStatus::Completed;

    let order = OrderModel {
        status,
        updated_at: OffsetDateTime::now_utc().into(),
        ..order
    };

    orders
        .update_one_by_id(
            order.id,
            bson::doc! {
                "$set": bson::to_document(&order)?
            },
        )
        .await?;

    if completed {
        if let Some(rider_id) = order.rider_id {
            riders
                .update_one_by_id(
                    rider_id,
                    bson::doc! {
                        "$set": {
                            "is_available": true,
                            "updated_at": bson::DateTime::from(OffsetDateTime::now_utc()),
                        }
                    },
                )
                .await?;
        }
    }

    Ok(Json(UpdateResponse { order: order.into() }))
}

pub async fn delete(
    State(orders): State<OrderCollection>,
    user: UserAccess,
    PathObjectId(order_id): PathObjectId,
) -> Result<StatusCode, Error> {
    match user.role {
        UserRole::User | UserRole::Rider => {
            return Err(Error::Forbidden)
                .tap_err(|_| tracing::debug!("tried deleting order as non-admin"))
        }
        UserRole::Admin => {}
    }

    orders
        .get_one_by_id(order_id)
        .await?
        .ok_or(Error::NoResource)?;

    orders.delete_one_by_id(order_id).await?;

    Ok(StatusCode::NO_CONTENT)
}
