mod retry;

use std::{collections::HashMap, fmt::Debug, fs, thread};

use crossbeam_channel::unbounded;
use tracing::{debug, info, warn};

pub use retry::{retry_with_backoff, RetryPolicy, Retryable};

use crate::{
    actors::{spawn_actor, Actor, FetchActor},
    io::{discard, is_complete_file},
    outside::{MediaTool, Transport},
    result::{FetchError, Result},
    types::{FetchOutcome, FetchPlan, FetchUnit, ResourceLocator, UnitId, UnitStatus},
    utils::CancelToken,
};

/// Downloads one unit, attempt after attempt
pub struct UnitFetcher<'a> {
    transport: &'a dyn Transport,
    media: &'a dyn MediaTool,
    policy: RetryPolicy,
    stream_timeout: std::time::Duration,
    cancel: CancelToken,
}

impl Debug for UnitFetcher<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitFetcher")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl<'a> UnitFetcher<'a> {
    pub fn new(
        transport: &'a dyn Transport,
        media: &'a dyn MediaTool,
        policy: RetryPolicy,
        stream_timeout: std::time::Duration,
        cancel: CancelToken,
    ) -> Self {
        Self {
            transport,
            media,
            policy,
            stream_timeout,
            cancel,
        }
    }

    /// Drive the unit from Pending to Done or Failed
    pub fn fetch(&self, unit: &mut FetchUnit) {
        if !unit.start() {
            return;
        }

        let mut attempts = 0;
        let result = retry_with_backoff(&self.policy, &self.cancel, |attempt| {
            attempts = attempt + 1;
            self.attempt(unit)
        });
        unit.attempts += attempts;
        unit.finish(result);
    }

    /// One download attempt.
    ///
    /// Data goes to the partial path which is renamed only once verified,
    /// so the final path always holds a complete unit.
    fn attempt(&self, unit: &FetchUnit) -> std::result::Result<(), FetchError> {
        let part = unit.partial_path();
        if let Some(parent) = part.parent() {
            fs::create_dir_all(parent)?;
        }

        let res = match &unit.locator {
            ResourceLocator::Http(request) => self.transport.download(request, &part, &self.cancel),
            ResourceLocator::MediaStream { url } => self
                .media
                .capture_stream(url, &part, self.stream_timeout)
                .map_err(|err| FetchError::Tool(err.to_string()))
                .and_then(|_| Ok(fs::metadata(&part)?.len())),
        };

        let verified = res.and_then(|size| match unit.expected_size {
            _ if size == 0 => Err(FetchError::Empty),
            Some(expected) if expected != size => Err(FetchError::SizeMismatch {
                expected,
                actual: size,
            }),
            _ => Ok(()),
        });

        match verified {
            Ok(()) => {
                fs::rename(&part, &unit.path)?;
                Ok(())
            }
            Err(err) => {
                discard(&part);
                Err(err)
            }
        }
    }
}

/// Downloads a whole plan with a bounded pool of fetch actors
#[derive(Debug)]
pub struct Fetcher<'a> {
    unit_fetcher: UnitFetcher<'a>,
    workers: usize,
}

impl<'a> Fetcher<'a> {
    pub fn new(unit_fetcher: UnitFetcher<'a>, workers: usize) -> Self {
        Self {
            unit_fetcher,
            workers: workers.max(1),
        }
    }

    /// Download every unit of the plan.
    ///
    /// Units already present in scratch storage are cache hits and cost no
    /// request. A failed unit never prevents the others from completing.
    pub fn fetch(&self, plan: FetchPlan) -> Result<FetchOutcome> {
        let order: HashMap<UnitId, usize> = plan
            .units
            .iter()
            .enumerate()
            .map(|(pos, u)| (u.id.clone(), pos))
            .collect();
        let total = plan.len();

        let mut settled = Vec::with_capacity(total);
        let mut queue = Vec::new();
        for mut unit in plan.units {
            // A leftover partial file comes from an interrupted run
            discard(&unit.partial_path());

            if unit.status == UnitStatus::Done || is_complete_file(&unit.path, unit.expected_size)
            {
                unit.status = UnitStatus::Done;
                settled.push(unit);
            } else {
                if unit.is_terminal() {
                    unit.reset();
                }
                queue.push(unit);
            }
        }

        if !settled.is_empty() {
            info!("{} of {total} units were previously downloaded", settled.len());
        }

        if !queue.is_empty() {
            info!("Downloading {} units with {} workers", queue.len(), self.workers);
            settled.extend(self.run_pool(queue)?);
        }

        settled.sort_by_key(|u| order.get(&u.id).copied().unwrap_or(usize::MAX));

        let mut outcome = FetchOutcome::default();
        for unit in settled {
            match unit.status {
                UnitStatus::Done => outcome.done.push(unit),
                _ => outcome.failed.push(unit),
            }
        }

        if outcome.is_complete() {
            info!("All {total} units downloaded");
        } else {
            warn!(
                "{} of {total} units could not be downloaded",
                outcome.failed.len()
            );
        }
        Ok(outcome)
    }

    fn run_pool(&self, queue: Vec<FetchUnit>) -> Result<Vec<FetchUnit>> {
        let count = queue.len();
        let workers = self.workers.min(count);
        let progress_step = (count / 10).max(1);

        thread::scope(|scope| -> Result<Vec<FetchUnit>> {
            let (input, receive) = unbounded();
            let (send, output) = unbounded();

            let mut handles = Vec::with_capacity(workers);
            for id in 0..workers {
                let mut actor = FetchActor::new(id, &self.unit_fetcher);
                actor.set_receive_channel(receive.clone());
                actor.set_send_channel(send.clone());
                handles.push(spawn_actor(scope, format!("fetch-{id}"), actor)?);
            }
            // Only the actors hold the channel ends now
            drop(receive);
            drop(send);

            for unit in queue {
                if input.send(unit).is_err() {
                    break;
                }
            }
            drop(input);

            let mut finished = Vec::with_capacity(count);
            for unit in output {
                finished.push(unit);
                if finished.len() % progress_step == 0 {
                    info!("Fetched {}/{count} units", finished.len());
                }
            }

            for handle in handles {
                match handle.join() {
                    Ok(res) => res?,
                    Err(_) => warn!("A fetch actor panicked"),
                }
            }

            debug!("Download pool stopped");
            Ok(finished)
        })
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::{
        outside::Request,
        testing::{FakeMedia, FakeTransport},
    };

    fn unit(dir: &Path, index: usize, expected_size: Option<u64>) -> FetchUnit {
        FetchUnit::new(
            UnitId::new("meeting", index),
            index,
            ResourceLocator::Http(Request::get(format!("http://vendor/{index}.mp4"))),
            dir.join(format!("unit_{index}.mp4")),
            expected_size,
        )
    }

    fn fetch(transport: &FakeTransport, plan: FetchPlan, workers: usize) -> FetchOutcome {
        let media = FakeMedia::default();
        let unit_fetcher = UnitFetcher::new(
            transport,
            &media,
            RetryPolicy::immediate(3),
            std::time::Duration::from_secs(1),
            CancelToken::new(),
        );
        Fetcher::new(unit_fetcher, workers).fetch(plan).unwrap()
    }

    #[test]
    fn downloads_every_unit_in_plan_order() {
        let dir = tempfile::tempdir().unwrap();
        let transport = FakeTransport::default();
        let mut units = vec![];
        for i in 0..12 {
            transport.serve(&format!("http://vendor/{i}.mp4"), vec![Ok(vec![b'x'; i + 1])]);
            units.push(unit(dir.path(), i, None));
        }

        let outcome = fetch(&transport, FetchPlan { units }, 4);
        assert!(outcome.is_complete());
        let indexes: Vec<_> = outcome.done.iter().map(|u| u.index).collect();
        assert_eq!(indexes, (0..12).collect::<Vec<_>>());
        assert_eq!(fs::read(dir.path().join("unit_5.mp4")).unwrap().len(), 6);
        assert!(!dir.path().join("unit_5.mp4.part").exists());
    }

    #[test]
    fn rerun_with_complete_units_makes_no_request() {
        let dir = tempfile::tempdir().unwrap();
        let transport = FakeTransport::default();
        let plan = || FetchPlan {
            units: (0..3).map(|i| unit(dir.path(), i, None)).collect(),
        };
        for i in 0..3 {
            transport.serve(&format!("http://vendor/{i}.mp4"), vec![Ok(b"data".to_vec())]);
        }

        assert!(fetch(&transport, plan(), 2).is_complete());
        assert_eq!(transport.requests(), 3);

        let outcome = fetch(&transport, plan(), 2);
        assert_eq!(outcome.done.len(), 3);
        assert_eq!(transport.requests(), 3);
    }

    #[test]
    fn size_mismatch_is_retried_then_failed_without_blocking_siblings() {
        let dir = tempfile::tempdir().unwrap();
        let transport = FakeTransport::default();
        transport.serve("http://vendor/0.mp4", vec![Ok(b"short".to_vec())]);
        transport.serve("http://vendor/1.mp4", vec![Ok(b"0123456789".to_vec())]);

        let plan = FetchPlan {
            units: vec![unit(dir.path(), 0, Some(10)), unit(dir.path(), 1, Some(10))],
        };
        let outcome = fetch(&transport, plan, 2);

        assert_eq!(outcome.done.len(), 1);
        assert_eq!(outcome.done[0].index, 1);
        assert_eq!(outcome.failed.len(), 1);
        let failed = &outcome.failed[0];
        assert_eq!(failed.attempts, 3);
        assert_eq!(
            failed.status,
            UnitStatus::Failed(FetchError::SizeMismatch {
                expected: 10,
                actual: 5
            })
        );
        assert!(!failed.path.exists());
        assert!(!failed.partial_path().exists());
        // 3 attempts for the bad unit, 1 for the good one
        assert_eq!(transport.requests(), 4);
    }

    #[test]
    fn transient_failure_recovers() {
        let dir = tempfile::tempdir().unwrap();
        let transport = FakeTransport::default();
        transport.serve(
            "http://vendor/0.mp4",
            vec![Err(FetchError::Timeout), Err(FetchError::Status(502)), Ok(b"ok".to_vec())],
        );
        let outcome = fetch(
            &transport,
            FetchPlan {
                units: vec![unit(dir.path(), 0, None)],
            },
            1,
        );
        assert!(outcome.is_complete());
        assert_eq!(outcome.done[0].attempts, 3);
    }

    #[test]
    fn empty_body_is_a_missing_unit() {
        let dir = tempfile::tempdir().unwrap();
        let transport = FakeTransport::default();
        transport.serve("http://vendor/0.mp4", vec![Ok(vec![])]);
        let outcome = fetch(
            &transport,
            FetchPlan {
                units: vec![unit(dir.path(), 0, None)],
            },
            1,
        );
        assert_eq!(outcome.failed[0].status, UnitStatus::Failed(FetchError::Empty));
        assert_eq!(transport.requests(), 1);
    }

    #[test]
    fn leftover_partial_file_is_never_complete() {
        let dir = tempfile::tempdir().unwrap();
        let transport = FakeTransport::default();
        transport.serve("http://vendor/0.mp4", vec![Ok(b"fresh".to_vec())]);
        let u = unit(dir.path(), 0, None);
        fs::write(u.partial_path(), b"half").unwrap();

        let outcome = fetch(&transport, FetchPlan { units: vec![u] }, 1);
        assert!(outcome.is_complete());
        assert_eq!(transport.requests(), 1);
        assert_eq!(fs::read(dir.path().join("unit_0.mp4")).unwrap(), b"fresh");
    }

    #[test]
    fn cancelled_plan_fails_pending_units() {
        let dir = tempfile::tempdir().unwrap();
        let transport = FakeTransport::default();
        let media = FakeMedia::default();
        let cancel = CancelToken::new();
        cancel.cancel();
        let unit_fetcher = UnitFetcher::new(
            &transport,
            &media,
            RetryPolicy::immediate(3),
            std::time::Duration::from_secs(1),
            cancel,
        );
        let outcome = Fetcher::new(unit_fetcher, 2)
            .fetch(FetchPlan {
                units: vec![unit(dir.path(), 0, None), unit(dir.path(), 1, None)],
            })
            .unwrap();
        assert_eq!(outcome.failed.len(), 2);
        assert!(outcome
            .failed
            .iter()
            .all(|u| u.status == UnitStatus::Failed(FetchError::Cancelled)));
        assert_eq!(transport.requests(), 0);
        assert!(!dir.path().join("unit_0.mp4").exists());
    }

    #[test]
    fn media_streams_are_captured_by_the_tool() {
        let dir = tempfile::tempdir().unwrap();
        let transport = FakeTransport::default();
        let media = FakeMedia::default();
        media.add_stream("mmsh://vendor/day.wmv", 1500.0);
        let unit_fetcher = UnitFetcher::new(
            &transport,
            &media,
            RetryPolicy::immediate(2),
            std::time::Duration::from_secs(1),
            CancelToken::new(),
        );
        let stream_unit = FetchUnit::new(
            UnitId::new("day", 0),
            0,
            ResourceLocator::MediaStream {
                url: "mmsh://vendor/day.wmv".to_owned(),
            },
            dir.path().join("unit_0.wmv"),
            None,
        );
        let outcome = Fetcher::new(unit_fetcher, 2)
            .fetch(FetchPlan {
                units: vec![stream_unit],
            })
            .unwrap();
        assert!(outcome.is_complete());
        assert_eq!(transport.requests(), 0);
        assert!(dir.path().join("unit_0.wmv").exists());
    }
}
