use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, info, warn};

use crate::{
    reconstruct::Reconstructor,
    result::{bail, Result},
};

use super::{Actor, MeetingJob, MeetingResult};

/// Worker of the reconstruction pool, one meeting at a time
#[derive(Debug)]
pub struct ReconstructActor<'a> {
    id: usize,
    reconstructor: &'a Reconstructor<'a>,

    receive_channel: Option<Receiver<MeetingJob>>,
    send_channel: Option<Sender<MeetingResult>>,
}

impl Actor<MeetingJob, MeetingResult> for ReconstructActor<'_> {
    fn set_receive_channel(&mut self, channel: Receiver<MeetingJob>) {
        self.receive_channel = Some(channel);
    }

    fn set_send_channel(&mut self, channel: Sender<MeetingResult>) {
        self.send_channel = Some(channel);
    }

    fn run(mut self) -> Result<()> {
        let Some(receive_channel) = self.receive_channel.take() else {
            return bail("Receive channel not set");
        };
        let Some(send_channel) = self.send_channel.take() else {
            return bail("Send channel not set");
        };

        debug!("{}: Actor started, waiting for a meeting", self.id);

        for job in receive_channel {
            let result = self.reconstructor.reconstruct(&job);
            if let Err(err) = &result {
                warn!("{}: {err}", self.id);
            }

            // Release the shared stream before reporting
            let MeetingJob {
                manifest, stream, ..
            } = job;
            drop(stream);
            if send_channel.send(MeetingResult { manifest, result }).is_err() {
                info!("{}: Nobody is waiting for results anymore", self.id);
                break;
            }
        }

        debug!("{}: All meetings handled. Stopping the actor.", self.id);
        Ok(())
    }
}

impl<'a> ReconstructActor<'a> {
    pub fn new(id: usize, reconstructor: &'a Reconstructor<'a>) -> Self {
        Self {
            id,
            reconstructor,
            receive_channel: None,
            send_channel: None,
        }
    }
}
