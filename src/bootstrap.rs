use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, instrument};

use crate::bus::{BusRuntime, BusState};
use crate::errors::Result;
use crate::routing::{write_route_table, RouteTable};

/// Bring the bus transport up
///
/// Writes the static alarm routing table and initialises the runtime.
/// Runs once, without retries; on failure, or without a runtime, the bus
/// stays not ready and sends fall back to HTTP.
#[instrument(name = "bootstrap", skip_all, fields(endpoint = %state.endpoint()))]
pub(crate) async fn run(
    route_table_path: &Path,
    runtime: Option<Arc<dyn BusRuntime>>,
    state: Arc<BusState>,
) -> Result<()> {
    let result = bring_up(route_table_path, runtime.as_deref(), &state).await;
    if let Err(e) = &result {
        error!(error = %e, "Bus bootstrap failed");
    }
    result
}

async fn bring_up(
    route_table_path: &Path,
    runtime: Option<&dyn BusRuntime>,
    state: &BusState,
) -> Result<()> {
    let table = RouteTable::alarm(state.endpoint());
    write_route_table(route_table_path, &table).await?;

    let Some(runtime) = runtime else {
        info!("No bus runtime, alarms go over HTTP");
        return Ok(());
    };

    let context = runtime.init().await?;
    state.install(context);

    info!("Bus ready");
    Ok(())
}
