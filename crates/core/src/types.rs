use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type UserId = i64;
pub type ItemId = i64;
pub type VendorId = i64;
pub type WarehouseId = i64;

/// Mean Earth radius used for great-circle distances.
const EARTH_RADIUS_KM: f64 = 6371.0;

/// A latitude/longitude pair in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Great-circle distance in kilometres.
    pub fn haversine_km(&self, other: &GeoPoint) -> f64 {
        let (lat1, lat2) = (self.lat.to_radians(), other.lat.to_radians());
        let dlat = lat2 - lat1;
        let dlon = (other.lon - self.lon).to_radians();
        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_KM * a.sqrt().atan2((1.0 - a).sqrt())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionType {
    View,
    Click,
    AddToCart,
    Purchase,
    Review,
    #[serde(other)]
    Other,
}

/// One user engagement with a product. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    pub user_id: UserId,
    pub item_id: ItemId,
    pub interaction_type: InteractionType,
    /// Non-negative engagement weight.
    pub value: f64,
    pub timestamp: DateTime<Utc>,
    /// Buyer location at the time of the interaction, when known.
    #[serde(default)]
    pub location: Option<GeoPoint>,
}

/// A catalog product. The description doubles as the category tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub name: String,
    pub description: String,
    pub price: f64,
    pub vendor_id: VendorId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vendor {
    pub id: VendorId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub rating: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Warehouse {
    pub id: WarehouseId,
    pub location: String,
    #[serde(default)]
    pub coordinates: Option<GeoPoint>,
    pub capacity: u32,
    pub available_space: u32,
}

/// A buyer region derived from clustering, handed to the warehouse service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub label: String,
    pub centroid: GeoPoint,
}

/// The closed set of product recommendation strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Items the user interacted with directly.
    Direct,
    UserBased,
    ItemBased,
    ContentBased,
    Hybrid,
    Embedding,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Direct => "direct",
            Strategy::UserBased => "user_based",
            Strategy::ItemBased => "item_based",
            Strategy::ContentBased => "content_based",
            Strategy::Hybrid => "hybrid",
            Strategy::Embedding => "embedding",
        }
    }
}
