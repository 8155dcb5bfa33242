use anyhow::Result;
use futures::StreamExt;
use pdfchat_core::jobs::JobNotification;
use tokio::sync::mpsc;
use tokio_postgres::AsyncMessage;
use tracing::{debug, error, info, warn};

use crate::config::DatabaseConfig;

/// Listens for queue notifications so idle consumers wake up immediately
/// instead of waiting out the poll interval. The queue itself is the durable
/// source of truth; losing a notification only delays pickup.
pub struct NotificationListener {
    config: DatabaseConfig,
    channel: String,
}

impl NotificationListener {
    pub fn new(config: DatabaseConfig, channel: String) -> Self {
        Self { config, channel }
    }

    /// Start listening on the configured channel; returns the receiving end.
    pub async fn start(&self) -> Result<mpsc::UnboundedReceiver<JobNotification>> {
        let (tx, rx) = mpsc::unbounded_channel();

        let config_url = self.config.url.clone();
        let channel_name = self.channel.clone();

        tokio::spawn(async move {
            info!("Connecting listener to database...");

            let connect_result =
                tokio_postgres::connect(&config_url, tokio_postgres::NoTls).await;

            match connect_result {
                Ok((client, mut connection)) => {
                    info!("Listener connected");

                    // Notifications arrive on the connection object, so it
                    // has to be polled alongside the LISTEN statement.
                    let mut stream =
                        futures::stream::poll_fn(move |cx| connection.poll_message(cx));

                    if let Err(e) = client
                        .execute(&format!("LISTEN {}", channel_name), &[])
                        .await
                    {
                        error!("Failed to execute LISTEN: {}", e);
                        return;
                    }

                    info!("Listening on channel: {}", channel_name);

                    loop {
                        match stream.next().await {
                            Some(Ok(AsyncMessage::Notification(notification))) => {
                                debug!("Received notification: {:?}", notification.payload());
                                match serde_json::from_str::<JobNotification>(
                                    notification.payload(),
                                ) {
                                    Ok(job_notification) => {
                                        if tx.send(job_notification).is_err() {
                                            warn!("Notification receiver dropped");
                                            break;
                                        }
                                    }
                                    Err(e) => {
                                        error!("Failed to parse notification payload: {}", e);
                                    }
                                }
                            }
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                error!("Listener connection error: {}", e);
                                break;
                            }
                            None => {
                                warn!("Listener connection stream ended");
                                break;
                            }
                        }
                    }
                }
                Err(e) => {
                    error!("Listener failed to connect: {}", e);
                }
            }

            error!("Listener connection closed");
        });

        Ok(rx)
    }
}
