//! Poll loop: on a fixed interval, fan one poll task out per configured
//! provider, run them concurrently, apply the results to the store, then
//! rebuild the realtime snapshots.
//!
//! A failure in one provider's poll is logged and contributes zero rows;
//! it never stops the other polls or the loop itself.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use tracing::{error, info, warn};

use crate::config::{CollectorConfig, ProviderConfig};
use crate::providers;
use crate::snapshot::{self, SnapshotStore};
use crate::store::PositionStore;

pub struct Collector {
    store: PositionStore,
    snapshots: SnapshotStore,
    client: reqwest::Client,
    providers: Vec<ProviderConfig>,
    config: CollectorConfig,
}

impl Collector {
    pub fn new(
        store: PositionStore,
        snapshots: SnapshotStore,
        providers: Vec<ProviderConfig>,
        config: CollectorConfig,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .connect_timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            store,
            snapshots,
            client,
            providers,
            config,
        })
    }

    /// Run the poll loop forever. The caller owns the task handle and
    /// aborts it on shutdown; committed batches stay, the in-flight cycle
    /// is dropped at the next await point.
    pub async fn run(self: Arc<Self>) {
        info!(
            interval_secs = self.config.poll_interval_secs,
            providers = self.providers.len(),
            "Collector starting"
        );

        if let Ok(stats) = self.store.get_stats().await {
            info!(
                positions = stats.total_positions,
                vehicles = stats.total_vehicles,
                "Store stats at startup"
            );
        }

        let mut interval =
            tokio::time::interval(Duration::from_secs(self.config.poll_interval_secs));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;

            let polls = self
                .providers
                .iter()
                .map(|provider| self.poll_provider(provider));
            join_all(polls).await;

            self.refresh_snapshots().await;
        }
    }

    /// Poll one provider and apply its batch. Returns the number of new
    /// positions; every failure path is caught here.
    async fn poll_provider(&self, provider: &ProviderConfig) -> u64 {
        let now = Utc::now();
        let (vehicles, positions) = match providers::poll(&self.client, provider, now).await {
            Ok(batch) => batch,
            Err(e) => {
                warn!(city = %provider.city, error = %e, "Poll failed");
                return 0;
            }
        };
        let seen = vehicles.len();

        if let Err(e) = self
            .store
            .upsert_vehicles(&vehicles, now, &provider.city)
            .await
        {
            error!(city = %provider.city, error = %e, "Failed to upsert vehicles");
            return 0;
        }
        let inserted = match self
            .store
            .insert_positions(&positions, now, &provider.city)
            .await
        {
            Ok(n) => n,
            Err(e) => {
                error!(city = %provider.city, error = %e, "Failed to insert positions");
                return 0;
            }
        };

        info!(
            city = %provider.city,
            seen,
            inserted,
            "Poll completed"
        );
        inserted
    }

    async fn refresh_snapshots(&self) {
        for provider in &self.providers {
            match snapshot::build_realtime_snapshot(&self.store, &provider.city, &self.config)
                .await
            {
                Ok(fc) => {
                    let mut snapshots = self.snapshots.write().await;
                    snapshots.insert(provider.city.clone(), fc);
                }
                Err(e) => {
                    error!(city = %provider.city, error = %e, "Failed to rebuild snapshot");
                }
            }
        }
    }
}
