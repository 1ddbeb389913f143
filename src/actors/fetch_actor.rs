use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, info, warn};

use crate::{
    fetcher::UnitFetcher,
    result::{bail, Result},
    types::{FetchUnit, UnitStatus},
};

use super::Actor;

/// Worker of the download pool.
///
/// Every fetch actor reads from the same channel, so the pool size bounds
/// the number of concurrent downloads.
#[derive(Debug)]
pub struct FetchActor<'a> {
    id: usize,
    fetcher: &'a UnitFetcher<'a>,

    receive_channel: Option<Receiver<FetchUnit>>,
    send_channel: Option<Sender<FetchUnit>>,
}

impl Actor<FetchUnit, FetchUnit> for FetchActor<'_> {
    fn set_receive_channel(&mut self, channel: Receiver<FetchUnit>) {
        self.receive_channel = Some(channel);
    }

    fn set_send_channel(&mut self, channel: Sender<FetchUnit>) {
        self.send_channel = Some(channel);
    }

    fn run(mut self) -> Result<()> {
        let Some(receive_channel) = self.receive_channel.take() else {
            return bail("Receive channel not set");
        };
        let Some(send_channel) = self.send_channel.take() else {
            return bail("Send channel not set");
        };

        debug!("{}: Actor started, waiting for a unit", self.id);

        for mut unit in receive_channel {
            debug!("{}: Unit '{}' received", self.id, unit.id);
            self.fetcher.fetch(&mut unit);

            match &unit.status {
                UnitStatus::Done => debug!("{}: Unit '{}' done", self.id, unit.id),
                UnitStatus::Failed(err) => warn!(
                    "{}: Unit '{}' failed after {} attempts: {err}",
                    self.id, unit.id, unit.attempts
                ),
                status => warn!("{}: Unit '{}' left in state {status:?}", self.id, unit.id),
            }

            if send_channel.send(unit).is_err() {
                info!("{}: Nobody is waiting for results anymore", self.id);
                break;
            }
        }

        debug!("{}: All iterations completed. Stopping the actor.", self.id);
        Ok(())
    }
}

impl<'a> FetchActor<'a> {
    pub fn new(id: usize, fetcher: &'a UnitFetcher<'a>) -> Self {
        Self {
            id,
            fetcher,
            receive_channel: None,
            send_channel: None,
        }
    }
}
