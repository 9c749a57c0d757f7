//! Short-lived PostgreSQL connections.

use log::error;
use tokio::task::JoinHandle;
use tokio_postgres::{Client, NoTls};

/// Connect to `url` and spawn a task driving the connection.
///
/// The caller owns the returned client; dropping it closes the connection and
/// ends the driver task.
pub(crate) async fn connect(url: &str) -> Result<(Client, JoinHandle<()>), tokio_postgres::Error> {
    let (client, connection) = tokio_postgres::connect(url, NoTls).await?;
    let driver = tokio::spawn(async move {
        if let Err(err) = connection.await {
            error!("PostgreSQL connection error: {err}");
        }
    });
    Ok((client, driver))
}
