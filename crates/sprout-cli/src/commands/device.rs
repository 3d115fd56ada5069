use std::path::Path;

use sprout_core::device::DeviceIdentity;

use crate::commands::common::open_store;
use crate::error::CliError;

pub async fn run_device(db_path: &Path) -> Result<(), CliError> {
    let store = open_store(db_path).await?;
    let device_id = DeviceIdentity::new(store).device_id().await?;
    println!("{device_id}");
    Ok(())
}
