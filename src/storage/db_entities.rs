//! SeaORM entity models used by the catalog side of the database backend.
//!
//! These structs map to SQLite tables created by `database_storage`:
//! - `scenarios`: study conditions and their enabled flag
//! - `images`: the shared image pool with its usage counters
//!
//! Sessions and their image assignments are handled with plain `sqlx` because
//! their writes need explicit transactions.

use chrono::{DateTime, Utc};

use crate::storage::types::{Image, Scenario};

/// Scenarios table entity models.
pub mod scenarios {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "scenarios")]
    pub struct Model {
        /// Stable scenario id (e.g. "smart_camera")
        #[sea_orm(primary_key, auto_increment = false)]
        pub id: String,
        pub title: String,
        pub description: String,
        pub short_label: Option<String>,
        /// Toggled by admins; read by the selector
        pub enabled: bool,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

/// Images table entity models.
pub mod images {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "images")]
    pub struct Model {
        /// File name, unique across the pool
        #[sea_orm(primary_key, auto_increment = false)]
        pub image_id: String,
        pub category: String,
        pub assigned_count: i64,
        pub completed_count: i64,
        /// Optional RFC3339 timestamp of the latest assignment
        pub last_assigned_at: Option<String>,
        pub enabled: bool,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

impl From<scenarios::Model> for Scenario {
    fn from(model: scenarios::Model) -> Self {
        Scenario {
            id: model.id,
            title: model.title,
            description: model.description,
            short_label: model.short_label,
            enabled: model.enabled,
        }
    }
}

impl TryFrom<images::Model> for Image {
    type Error = String;

    fn try_from(model: images::Model) -> Result<Self, Self::Error> {
        let last_assigned_at = match model.last_assigned_at {
            Some(s) => Some(
                DateTime::parse_from_rfc3339(&s)
                    .map_err(|e| format!("bad last_assigned_at {}: {}", s, e))?
                    .with_timezone(&Utc),
            ),
            None => None,
        };
        Ok(Image {
            image_id: model.image_id,
            category: model.category.parse()?,
            assigned_count: model.assigned_count.max(0) as u64,
            completed_count: model.completed_count.max(0) as u64,
            last_assigned_at,
            enabled: model.enabled,
        })
    }
}
