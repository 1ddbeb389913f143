mod fetch_actor;
mod message;
mod reconstruct_actor;

use crossbeam_channel::{Receiver, Sender};
pub use fetch_actor::FetchActor;
pub use message::*;
pub use reconstruct_actor::ReconstructActor;

use crate::result::Result;

pub trait Actor<From, To> {
    fn set_receive_channel(&mut self, channel: Receiver<From>);

    fn set_send_channel(&mut self, channel: Sender<To>);

    fn run(self) -> Result<()>;
}

/// Spawn a named thread in the scope running the actor
pub fn spawn_actor<'scope, 'env, A, From, To>(
    scope: &'scope std::thread::Scope<'scope, 'env>,
    name: String,
    actor: A,
) -> Result<std::thread::ScopedJoinHandle<'scope, Result<()>>>
where
    A: Actor<From, To> + Send + 'scope,
{
    Ok(std::thread::Builder::new()
        .name(name)
        .spawn_scoped(scope, move || actor.run())?)
}
