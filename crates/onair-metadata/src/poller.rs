//! Periodic provider polling for the station being played.

use std::sync::Arc;
use std::time::Duration;

use onair_proto::catalog::StationRepository;
use onair_proto::protocol::{MetadataRecord, ProviderRef};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::providers::{MetadataProvider, ProviderRegistry};

/// A provider result tagged with the station it was fetched for.
#[derive(Debug, Clone, PartialEq)]
pub struct PolledMetadata {
    pub station_id: String,
    pub record: MetadataRecord,
}

struct ActivePoll {
    station_id: String,
    provider: ProviderRef,
    token: CancellationToken,
}

/// Runs at most one provider loop at a time, for the station being played.
pub struct MetadataPoller {
    registry: Arc<ProviderRegistry>,
    stations: Arc<dyn StationRepository>,
    interval: Duration,
    tx: mpsc::Sender<PolledMetadata>,
    active: Option<ActivePoll>,
}

impl MetadataPoller {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        stations: Arc<dyn StationRepository>,
        interval: Duration,
        tx: mpsc::Sender<PolledMetadata>,
    ) -> Self {
        Self {
            registry,
            stations,
            interval,
            tx,
            active: None,
        }
    }

    /// Poll the provider of `station_id`.
    ///
    /// Stations without a provider stop polling; the same station and provider
    /// while a loop is running is a no-op.
    pub fn start_polling(&mut self, station_id: Option<&str>) {
        let Some(station) = station_id.and_then(|id| self.stations.station(id)) else {
            self.stop_polling();
            return;
        };
        let Some(provider_ref) = station.metadata.clone() else {
            self.stop_polling();
            return;
        };

        if let Some(active) = &self.active {
            if active.station_id == station.id
                && active.provider == provider_ref
                && !active.token.is_cancelled()
            {
                debug!("[poller] already polling {} for {}", provider_ref.provider, station.id);
                return;
            }
        }
        self.stop_polling();

        let Some(provider) = self.registry.get(&provider_ref.provider) else {
            warn!("[poller] no provider registered for '{}' ({})", provider_ref.provider, station.id);
            return;
        };

        info!(
            "[poller] polling {}:{} every {:?} for {}",
            provider_ref.provider, provider_ref.param, self.interval, station.id
        );
        let token = CancellationToken::new();
        tokio::spawn(poll_loop(
            provider,
            provider_ref.param.clone(),
            station.id.clone(),
            self.interval,
            self.tx.clone(),
            token.clone(),
        ));
        self.active = Some(ActivePoll {
            station_id: station.id,
            provider: provider_ref,
            token,
        });
    }

    pub fn stop_polling(&mut self) {
        if let Some(active) = self.active.take() {
            debug!("[poller] stopping {} for {}", active.provider.provider, active.station_id);
            active.token.cancel();
        }
    }

    pub fn is_polling(&self) -> bool {
        self.active.as_ref().is_some_and(|a| !a.token.is_cancelled())
    }
}

impl Drop for MetadataPoller {
    fn drop(&mut self) {
        self.stop_polling();
    }
}

async fn poll_loop(
    provider: Arc<dyn MetadataProvider>,
    param: String,
    station_id: String,
    interval: Duration,
    tx: mpsc::Sender<PolledMetadata>,
    token: CancellationToken,
) {
    loop {
        let fetched = tokio::select! {
            _ = token.cancelled() => break,
            fetched = provider.fetch_metadata(&param) => fetched,
        };

        match fetched {
            Ok(Some(record)) => {
                let polled = PolledMetadata {
                    station_id: station_id.clone(),
                    record,
                };
                if tx.send(polled).await.is_err() {
                    break;
                }
            }
            Ok(None) => debug!("[poller] {} has nothing on air", param),
            Err(e) => warn!("[poller] fetch for {} failed: {}", param, e),
        }

        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }
    debug!("[poller] loop for {} ended", station_id);
}
