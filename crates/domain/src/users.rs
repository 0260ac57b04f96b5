use serde::{Deserialize, Serialize};

/// Decimal places kept on stored coordinates (~1.1 km at the equator).
const COORDINATE_PRECISION: i32 = 2;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserStatus {
    PendingVerification,
    Active,
    Banned,
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionTier {
    #[default]
    Free,
    Premium,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn coarsened(lat: f64, lng: f64) -> Self {
        let factor = 10f64.powi(COORDINATE_PRECISION);
        Self {
            lat: (lat * factor).round() / factor,
            lng: (lng * factor).round() / factor,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct UserProfile {
    pub user_id: String,
    pub first_name: String,
    #[serde(default)]
    pub interest_ids: Vec<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub country: Option<String>,
    pub location: Option<GeoPoint>,
    pub last_active_at_ms: Option<i64>,
    pub status: UserStatus,
    #[serde(default)]
    pub tier: SubscriptionTier,
}

impl UserProfile {
    pub fn is_active(&self) -> bool {
        self.status == UserStatus::Active
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContactDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

impl ContactDetails {
    /// Keeps only the fields the owner agreed to share.
    pub fn filtered(&self, share_email: bool, share_phone: bool) -> Self {
        Self {
            email: self.email.clone().filter(|_| share_email),
            phone: self.phone.clone().filter(|_| share_phone),
        }
    }
}
