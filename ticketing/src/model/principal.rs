//! Resolved caller identity.
//!
//! Token verification happens upstream; the core only checks ownership of the
//! ticket or assignment it is about to mutate.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// City administration, read access to everything
    CityAdmin,
    /// Organization that issues, cancels and closes tickets
    Issuer,
    Contractor,
    Driver,
    /// Disposal site operator
    Landfill,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CityAdmin => write!(f, "city_admin"),
            Self::Issuer => write!(f, "issuer"),
            Self::Contractor => write!(f, "contractor"),
            Self::Driver => write!(f, "driver"),
            Self::Landfill => write!(f, "landfill"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "city_admin" | "cityadmin" => Ok(Self::CityAdmin),
            "issuer" => Ok(Self::Issuer),
            "contractor" => Ok(Self::Contractor),
            "driver" => Ok(Self::Driver),
            "landfill" => Ok(Self::Landfill),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: Uuid,
    pub role: Role,
    pub org_id: Uuid,
    /// Present for driver accounts
    pub driver_id: Option<Uuid>,
}

impl Principal {
    pub fn issuer(org_id: Uuid) -> Self {
        Self {
            user_id: Uuid::new_v4(),
            role: Role::Issuer,
            org_id,
            driver_id: None,
        }
    }

    pub fn contractor(org_id: Uuid) -> Self {
        Self {
            user_id: Uuid::new_v4(),
            role: Role::Contractor,
            org_id,
            driver_id: None,
        }
    }

    pub fn driver(org_id: Uuid, driver_id: Uuid) -> Self {
        Self {
            user_id: Uuid::new_v4(),
            role: Role::Driver,
            org_id,
            driver_id: Some(driver_id),
        }
    }

    /// Driver id, if this principal acts as a driver.
    pub fn acting_driver(&self) -> Option<Uuid> {
        match self.role {
            Role::Driver => self.driver_id,
            _ => None,
        }
    }
}
