use time::Date;
use tracing::{debug, info};

use crate::{
    config::ChannelConfig,
    fetcher::{retry_with_backoff, RetryPolicy},
    result::{Error, Result},
    types::MeetingManifest,
    utils::CancelToken,
    vendors::VendorAdapter,
};

/// Finds the meetings of a channel, retrying unreachable vendors
#[derive(Debug)]
pub struct Resolver<'a> {
    adapter: &'a dyn VendorAdapter,
    policy: RetryPolicy,
    cancel: CancelToken,
    /// Only keep meetings whose title contains this, case insensitive
    title_filter: Option<String>,
}

impl<'a> Resolver<'a> {
    pub fn new(adapter: &'a dyn VendorAdapter, policy: RetryPolicy, cancel: CancelToken) -> Self {
        Self {
            adapter,
            policy,
            cancel,
            title_filter: None,
        }
    }

    pub fn with_title_filter(mut self, filter: Option<String>) -> Self {
        self.title_filter = filter.map(|f| f.to_lowercase());
        self
    }

    /// Manifests of every meeting of the channel on the date.
    ///
    /// No meeting is an empty list, not an error.
    pub fn resolve(&self, channel: &ChannelConfig, date: Date) -> Result<Vec<MeetingManifest>> {
        self.check_vendor(channel)?;
        let manifests = retry_with_backoff(&self.policy, &self.cancel, |_| {
            self.adapter.discover_manifests(channel, date)
        })?;

        let total = manifests.len();
        let manifests: Vec<MeetingManifest> = manifests
            .into_iter()
            .filter(|manifest| self.keeps(manifest))
            .collect();
        if manifests.len() < total {
            debug!("{} meetings filtered out by title", total - manifests.len());
        }

        info!(
            "{}: {} meetings found on {date}",
            channel.id,
            manifests.len()
        );
        Ok(manifests)
    }

    pub fn available_dates(
        &self,
        channel: &ChannelConfig,
        from: Date,
        to: Date,
    ) -> Result<Vec<Date>> {
        self.check_vendor(channel)?;
        retry_with_backoff(&self.policy, &self.cancel, |_| {
            self.adapter.available_dates(channel, from, to)
        })
    }

    /// A channel is only ever read by the adapter of its vendor
    fn check_vendor(&self, channel: &ChannelConfig) -> Result<()> {
        let kind = self.adapter.kind();
        if channel.vendor != kind {
            return Err(Error::discovery(
                &channel.id,
                format!("channel is served by {} but the adapter reads {kind}", channel.vendor),
            ));
        }
        Ok(())
    }

    /// Whether the title filter lets the meeting through
    pub fn keeps(&self, manifest: &MeetingManifest) -> bool {
        self.title_filter
            .as_deref()
            .map_or(true, |filter| manifest.title.to_lowercase().contains(filter))
    }
}
