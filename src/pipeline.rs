//! The commands, over the dates of one channel.
//!
//! Discovery errors abort their date, meeting errors are collected into the
//! run report, unit errors never leave the fetcher.

use std::{collections::HashMap, path::PathBuf, thread};

use crossbeam_channel::unbounded;
use time::Date;
use tracing::{debug, error, info, warn};

use crate::{
    actors::{spawn_actor, Actor, MeetingJob, MeetingResult, ReconstructActor},
    config::{ChannelConfig, Settings},
    database::{meeting_key, CacheDb, MeetingState},
    fetcher::{Fetcher, UnitFetcher},
    io::{is_complete_file, ScratchLayout},
    outside::{MediaTool, Transport},
    planner::{DatePlan, MeetingPlan, Planner},
    reconstruct::{ReconstructOptions, Reconstructor, SharedStreams},
    resolver::Resolver,
    result::{Error, FetchError, Result},
    types::{
        FailureKind, FailureRecord, FetchOutcome, FetchUnit, MeetingManifest, MeetingSource,
        RunReport, UnitStatus,
    },
    utils::CancelToken,
    vendors::VendorAdapter,
};

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Only handle meetings whose title contains this
    pub title_filter: Option<String>,
    /// Reconstruct meetings that are already completed
    pub force: bool,
}

pub struct Pipeline<'a, D: CacheDb> {
    settings: &'a Settings,
    channel: &'a ChannelConfig,
    adapter: &'a dyn VendorAdapter,
    transport: &'a dyn Transport,
    media: &'a dyn MediaTool,
    db: &'a D,
    layout: ScratchLayout,
    options: RunOptions,
    cancel: CancelToken,
}

impl<'a, D: CacheDb> Pipeline<'a, D> {
    pub fn new(
        settings: &'a Settings,
        channel: &'a ChannelConfig,
        adapter: &'a dyn VendorAdapter,
        transport: &'a dyn Transport,
        media: &'a dyn MediaTool,
        db: &'a D,
    ) -> Self {
        Self {
            settings,
            channel,
            adapter,
            transport,
            media,
            db,
            layout: ScratchLayout::new(&settings.scratch_root),
            options: RunOptions::default(),
            cancel: CancelToken::new(),
        }
    }

    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    /// Discover the meetings of each date and save their manifests
    pub fn metadata(&self, dates: &[Date]) -> Result<RunReport> {
        let mut report = RunReport::default();
        for &date in dates {
            let Some(manifests) = self.discover(date, &mut report)? else {
                continue;
            };
            for manifest in &manifests {
                info!(
                    "{manifest}: {:.0}s of video, {} chapters",
                    manifest.nominal_duration(),
                    manifest.chapters.len()
                );
            }
        }
        Ok(report)
    }

    /// Discover the meetings of each date and download their units
    pub fn download(&self, dates: &[Date]) -> Result<RunReport> {
        let mut report = RunReport::default();
        for &date in dates {
            let Some(manifests) = self.discover(date, &mut report)? else {
                continue;
            };
            let manifests = self.pending(manifests, &mut report)?;
            let date_plan = self.planner().plan_all(manifests);
            let outcome = self.fetch(&date_plan)?;
            let statuses = statuses(&outcome);

            for (manifest, err) in &date_plan.invalid {
                self.record_failure(manifest, err, &mut report)?;
            }
            for MeetingPlan { manifest, plan } in &date_plan.meetings {
                if plan.is_empty() {
                    report.skipped_empty += 1;
                    continue;
                }
                let failed: Vec<(&FetchUnit, &FetchError)> = plan
                    .units
                    .iter()
                    .filter_map(|unit| match statuses.get(&unit.path) {
                        Some(UnitStatus::Failed(err)) => Some((unit, err)),
                        _ => None,
                    })
                    .collect();
                // Some missing clips can still be bridged at reconstruction
                if failed.len() == plan.len() {
                    let (unit, err) = failed[0];
                    let err = Error::Fetch {
                        unit: unit.id.to_string(),
                        source: err.clone(),
                    };
                    self.record_failure(manifest, &err, &mut report)?;
                }
            }
        }
        Ok(report)
    }

    /// Reconstruct the meetings of each date from what is in scratch storage
    pub fn process(&self, dates: &[Date]) -> Result<RunReport> {
        let resolver = self.resolver();
        let mut report = RunReport::default();
        for &date in dates {
            let manifests: Vec<MeetingManifest> = self
                .layout
                .load_manifests(self.channel.vendor, &self.channel.id, date)?
                .into_iter()
                .filter(|manifest| resolver.keeps(manifest))
                .collect();
            if manifests.is_empty() {
                warn!(
                    "{}: no meeting saved for {date}, run the metadata command first",
                    self.channel.id
                );
                continue;
            }
            report.discovered += manifests.len();

            let date_plan = self.planner().plan_all(manifests);
            self.reconstruct(date_plan, &HashMap::new(), &mut report)?;
        }
        Ok(report)
    }

    /// Discover, download and reconstruct the meetings of each date
    pub fn run(&self, dates: &[Date]) -> Result<RunReport> {
        let mut report = RunReport::default();
        for &date in dates {
            let Some(manifests) = self.discover(date, &mut report)? else {
                continue;
            };
            let manifests = self.pending(manifests, &mut report)?;
            let date_plan = self.planner().plan_all(manifests);
            let outcome = self.fetch(&date_plan)?;
            self.reconstruct(date_plan, &statuses(&outcome), &mut report)?;
        }
        Ok(report)
    }

    fn resolver(&self) -> Resolver<'_> {
        Resolver::new(
            self.adapter,
            self.settings.fetch.retry_policy(),
            self.cancel.clone(),
        )
        .with_title_filter(self.options.title_filter.clone())
    }

    fn planner(&self) -> Planner<'_> {
        Planner::new(self.adapter, &self.layout)
    }

    /// Manifests of the date, saved to scratch storage.
    ///
    /// `None` when the date could not be discovered.
    fn discover(&self, date: Date, report: &mut RunReport) -> Result<Option<Vec<MeetingManifest>>> {
        let manifests = match self.resolver().resolve(self.channel, date) {
            Ok(manifests) => manifests,
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(err) => {
                error!("{}: skipping {date}: {err}", self.channel.id);
                report.failed_dates.push(date);
                return Ok(None);
            }
        };

        for manifest in &manifests {
            let path = self.layout.save_manifest(manifest)?;
            debug!("Manifest of {manifest} saved to {}", path.display());
        }
        report.discovered += manifests.len();
        Ok(Some(manifests))
    }

    fn fetch(&self, date_plan: &DatePlan) -> Result<FetchOutcome> {
        let plan = date_plan.merged();
        if plan.is_empty() {
            return Ok(FetchOutcome::default());
        }

        let fetch = &self.settings.fetch;
        let unit_fetcher = UnitFetcher::new(
            self.transport,
            self.media,
            fetch.retry_policy(),
            fetch.stream_timeout(),
            self.cancel.clone(),
        );
        Fetcher::new(unit_fetcher, fetch.workers).fetch(plan)
    }

    fn reconstruct(
        &self,
        date_plan: DatePlan,
        statuses: &HashMap<PathBuf, UnitStatus>,
        report: &mut RunReport,
    ) -> Result<()> {
        let DatePlan { meetings, invalid } = date_plan;
        for (manifest, err) in &invalid {
            self.record_failure(manifest, err, report)?;
        }

        let mut streams = SharedStreams::new(self.settings.reconstruct.keep_shared_streams);
        let mut jobs = vec![];
        for MeetingPlan { manifest, plan } in meetings {
            if manifest.is_empty() {
                report.skipped_empty += 1;
                continue;
            }
            if !self.options.force && self.is_done(&manifest)? {
                report.already_done += 1;
                continue;
            }

            let units: Vec<FetchUnit> = plan
                .units
                .into_iter()
                .map(|mut unit| {
                    unit.status = match statuses.get(&unit.path) {
                        Some(status) => status.clone(),
                        None if is_complete_file(&unit.path, unit.expected_size) => {
                            UnitStatus::Done
                        }
                        None => UnitStatus::Failed(FetchError::Missing),
                    };
                    unit
                })
                .collect();
            let stream = match (&manifest.source, units.first()) {
                (MeetingSource::Stream { splice }, Some(unit)) => {
                    Some(streams.handle(&splice.stream_id, unit))
                }
                _ => None,
            };
            jobs.push(MeetingJob {
                manifest,
                units,
                stream,
            });
        }
        if !streams.is_empty() {
            debug!("{} shared streams handed to the meetings", streams.len());
        }
        // The jobs hold the last handles on the shared streams
        drop(streams);

        if jobs.is_empty() {
            return Ok(());
        }

        let reconstruct = &self.settings.reconstruct;
        let reconstructor = Reconstructor::new(
            self.media,
            ReconstructOptions::new(self.settings.output_dir.clone(), reconstruct),
            reconstruct.encode_slots,
        );
        for MeetingResult { manifest, result } in self.run_pool(&reconstructor, jobs)? {
            match result {
                Ok(video) => {
                    let gaps = video.bridged_gaps().count();
                    if gaps > 0 {
                        warn!("{manifest} was reconstructed over {gaps} missing parts");
                    }
                    self.db
                        .set_completed(&meeting_key(&manifest), &manifest.title, &video.path)?;
                    report.reconstructed += 1;
                }
                Err(err) => self.record_failure(&manifest, &err, report)?,
            }
        }
        Ok(())
    }

    /// Meetings left to reconstruct, the others counted as already done
    fn pending(
        &self,
        manifests: Vec<MeetingManifest>,
        report: &mut RunReport,
    ) -> Result<Vec<MeetingManifest>> {
        if self.options.force {
            return Ok(manifests);
        }
        let mut pending = Vec::with_capacity(manifests.len());
        for manifest in manifests {
            if self.is_done(&manifest)? {
                report.already_done += 1;
            } else {
                pending.push(manifest);
            }
        }
        Ok(pending)
    }

    /// Completed in an earlier run, and the video is still there
    fn is_done(&self, manifest: &MeetingManifest) -> Result<bool> {
        let MeetingState::Completed { output } = self.db.check_meeting(&meeting_key(manifest))?
        else {
            return Ok(false);
        };
        if output.is_file() {
            debug!("{manifest} already reconstructed into {}", output.display());
            Ok(true)
        } else {
            warn!("Video of {manifest} is gone, reconstructing it again");
            Ok(false)
        }
    }

    fn run_pool(
        &self,
        reconstructor: &Reconstructor<'_>,
        jobs: Vec<MeetingJob>,
    ) -> Result<Vec<MeetingResult>> {
        let count = jobs.len();
        let workers = self.settings.reconstruct.workers.max(1).min(count);
        info!("Reconstructing {count} meetings with {workers} workers");

        thread::scope(|scope| -> Result<Vec<MeetingResult>> {
            let (input, receive) = unbounded();
            let (send, output) = unbounded();

            let mut handles = Vec::with_capacity(workers);
            for id in 0..workers {
                let mut actor = ReconstructActor::new(id, reconstructor);
                actor.set_receive_channel(receive.clone());
                actor.set_send_channel(send.clone());
                handles.push(spawn_actor(scope, format!("reconstruct-{id}"), actor)?);
            }
            drop(receive);
            drop(send);

            for job in jobs {
                if input.send(job).is_err() {
                    break;
                }
            }
            drop(input);

            let results: Vec<MeetingResult> = output.iter().collect();

            for handle in handles {
                match handle.join() {
                    Ok(res) => res?,
                    Err(_) => warn!("A reconstruct actor panicked"),
                }
            }
            Ok(results)
        })
    }

    fn record_failure(
        &self,
        manifest: &MeetingManifest,
        err: &Error,
        report: &mut RunReport,
    ) -> Result<()> {
        let record = FailureRecord {
            manifest_id: meeting_key(manifest),
            title: manifest.title.clone(),
            kind: err.failure_kind().unwrap_or(FailureKind::Reconstruction),
            reason: err.to_string(),
        };
        self.db.set_failed(&record.manifest_id, &record)?;
        report.failed.push(record);
        Ok(())
    }
}

/// Final status of every fetched unit, by scratch path
fn statuses(outcome: &FetchOutcome) -> HashMap<PathBuf, UnitStatus> {
    outcome
        .done
        .iter()
        .chain(&outcome.failed)
        .map(|unit| (unit.path.clone(), unit.status.clone()))
        .collect()
}
