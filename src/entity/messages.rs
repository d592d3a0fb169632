use sea_orm::entity::prelude::*;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "messages")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub session_id: String,
    pub event_index: i64,
    pub role: Option<String>,
    pub text: Option<String>,
    pub timestamp: String,
    pub metadata: Option<String>,
}

impl ActiveModelBehavior for ActiveModel {}
