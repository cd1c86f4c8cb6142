use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    pub id: String,
    pub name: String,
    pub price: f64,
    pub category: String,
    #[serde(rename = "duration")]
    pub duration_minutes: Option<i64>,
    pub is_active: bool,
}
