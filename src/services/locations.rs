use crate::{
    db::DbPool,
    entities::location::{self, Entity as Location},
    errors::ServiceError,
    events::{Event, EventSender},
};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Deserialize, Serialize, Validate, ToSchema)]
pub struct NewLocation {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[validate(length(max = 500))]
    pub address: Option<String>,
    #[validate(length(max = 100))]
    pub city: Option<String>,
    #[validate(length(max = 100))]
    pub state: Option<String>,
    #[validate(length(max = 20))]
    pub zip_code: Option<String>,
}

/// Loads a location that is currently accepting stock.
pub async fn find_active_location<C>(conn: &C, id: Uuid) -> Result<location::Model, ServiceError>
where
    C: ConnectionTrait,
{
    Location::find_by_id(id)
        .filter(location::Column::Active.eq(true))
        .one(conn)
        .await?
        .ok_or_else(|| {
            ServiceError::NotFound(format!("Location not found or inactive with id: {}", id))
        })
}

/// Site directory: the set of locations stock can be held at.
#[derive(Clone)]
pub struct LocationService {
    db: Arc<DbPool>,
    event_sender: Arc<EventSender>,
}

impl LocationService {
    pub fn new(db: Arc<DbPool>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Names are unique among active locations only.
    #[instrument(skip(self, input), fields(name = %input.name))]
    pub async fn create_location(
        &self,
        input: NewLocation,
    ) -> Result<location::Model, ServiceError> {
        input.validate()?;
        let db = self.db.as_ref();

        let duplicate = Location::find()
            .filter(location::Column::Name.eq(input.name.as_str()))
            .filter(location::Column::Active.eq(true))
            .one(db)
            .await?
            .is_some();
        if duplicate {
            return Err(ServiceError::Conflict(format!(
                "Location with name '{}' already exists",
                input.name
            )));
        }

        let model = location::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(input.name),
            address: Set(input.address),
            city: Set(input.city),
            state: Set(input.state),
            zip_code: Set(input.zip_code),
            active: Set(true),
            ..Default::default()
        }
        .insert(db)
        .await?;

        info!(location_id = %model.id, "location created");
        self.event_sender.send_or_log(Event::LocationCreated(model.id));
        Ok(model)
    }

    pub async fn get_active_location(&self, id: Uuid) -> Result<location::Model, ServiceError> {
        find_active_location(self.db.as_ref(), id).await
    }

    pub async fn list_active_locations(&self) -> Result<Vec<location::Model>, ServiceError> {
        Ok(Location::find()
            .filter(location::Column::Active.eq(true))
            .order_by_asc(location::Column::Name)
            .all(self.db.as_ref())
            .await?)
    }

    /// Stops a location from taking part in new movements. Existing balances
    /// and history are kept.
    #[instrument(skip(self))]
    pub async fn deactivate_location(&self, id: Uuid) -> Result<location::Model, ServiceError> {
        let db = self.db.as_ref();
        let existing = find_active_location(db, id).await?;

        let mut active: location::ActiveModel = existing.into();
        active.active = Set(false);
        let updated = active.update(db).await?;

        info!(location_id = %id, "location deactivated");
        self.event_sender.send_or_log(Event::LocationDeactivated(id));
        Ok(updated)
    }
}
