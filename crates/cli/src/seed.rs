//! `--seed` loading: drivers and orders into the storage backend.

use std::path::Path;

use lastmile_storage::{DriverRecord, DriverStore, GeoPoint, OrderRecord, OrderStore};
use serde::Deserialize;
use tracing::info;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SeedFile {
    #[serde(default)]
    pub drivers: Vec<DriverRecord>,
    #[serde(default)]
    pub orders: Vec<SeedOrder>,
}

/// An order to create. Orders naming a driver start out assigned to it.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SeedOrder {
    pub id: String,
    pub dropoff: GeoPoint,
    #[serde(default)]
    pub driver_id: Option<String>,
}

pub fn read_seed(path: &Path) -> Result<SeedFile, Box<dyn std::error::Error>> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read seed file {}: {}", path.display(), e))?;
    let seed = serde_json::from_str(&text)
        .map_err(|e| format!("invalid seed file {}: {}", path.display(), e))?;
    Ok(seed)
}

pub async fn apply_seed<S>(storage: &S, seed: SeedFile) -> Result<(), Box<dyn std::error::Error>>
where
    S: DriverStore + OrderStore,
{
    let (drivers, orders) = (seed.drivers.len(), seed.orders.len());
    for driver in seed.drivers {
        storage.insert_driver(driver).await?;
    }
    for order in seed.orders {
        storage
            .insert_order(OrderRecord::pending(order.id.clone(), order.dropoff))
            .await?;
        if let Some(driver_id) = order.driver_id {
            storage.assign_driver(&order.id, &driver_id).await?;
        }
    }
    info!(drivers, orders, "seed data loaded");
    Ok(())
}
