use anyhow::{anyhow, Result};
use aws_config::meta::region::RegionProviderChain;
use aws_config::BehaviorVersion;
use aws_config::Region;
use aws_sdk_sqs::error::SdkError;
use aws_sdk_sqs::Client;
use serde_json;

use crate::app::notifications::RelationshipEvent;
use crate::config::AppConfig;

#[derive(Clone)]
pub struct QueueClient {
    client: Client,
    queue_url: String,
}

impl QueueClient {
    pub async fn new(config: &AppConfig) -> Result<Self> {
        let region_provider = RegionProviderChain::first_try(Region::new(config.queue_region.clone()));
        let shared_config = aws_config::defaults(BehaviorVersion::latest())
            .region(region_provider)
            .load()
            .await;

        let mut sqs_builder = aws_sdk_sqs::config::Builder::from(&shared_config)
            .region(shared_config.region().cloned())
            .endpoint_url(config.queue_endpoint.clone());
        if let Some(provider) = shared_config.credentials_provider() {
            sqs_builder = sqs_builder.credentials_provider(provider);
        }
        let sqs_config = sqs_builder.build();

        let client = Client::from_conf(sqs_config);
        let queue_url = match client
            .get_queue_url()
            .queue_name(&config.queue_name)
            .send()
            .await
        {
            Ok(response) => response
                .queue_url()
                .ok_or_else(|| anyhow!("missing queue url"))?
                .to_string(),
            Err(SdkError::ServiceError(service_err))
                if service_err.err().is_queue_does_not_exist() =>
            {
                let created = client
                    .create_queue()
                    .queue_name(&config.queue_name)
                    .send()
                    .await?;
                created
                    .queue_url()
                    .ok_or_else(|| anyhow!("missing queue url"))?
                    .to_string()
            }
            Err(err) => return Err(anyhow!(err)),
        };

        Ok(Self { client, queue_url })
    }

    pub async fn enqueue_event(&self, event: &RelationshipEvent) -> Result<()> {
        let body = serde_json::to_string(event)?;
        self.client
            .send_message()
            .queue_url(&self.queue_url)
            .message_body(body)
            .send()
            .await?;

        Ok(())
    }
}
