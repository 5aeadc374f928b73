use std::{io, sync::Arc, time::Duration};

use anyhow::Result;
use mio::{Events, Poll, Registry, Token};

use crate::event::Readiness;

/// Token reserved for the loop's waker. Handle ids start at 1.
pub const WAKER_TOKEN: Token = Token(0);

pub struct PollHandle {
    poller: Poll,
    events: Events,
    waker: Arc<mio::Waker>,
}

impl PollHandle {
    pub fn new(events_capacity: usize) -> Result<Self> {
        let poller = Poll::new()?;
        let waker = mio::Waker::new(poller.registry(), WAKER_TOKEN)?;
        Ok(PollHandle {
            poller,
            events: Events::with_capacity(events_capacity.max(1)),
            waker: Arc::new(waker),
        })
    }

    pub fn registry(&self) -> &Registry {
        self.poller.registry()
    }

    pub fn waker(&self) -> Arc<mio::Waker> {
        Arc::clone(&self.waker)
    }

    /// Waits for readiness. Wakeups and interrupted waits yield no events.
    pub fn poll(&mut self, timeout: Option<Duration>) -> Result<Vec<Readiness>> {
        match self.poller.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        }
        Ok(self
            .events
            .iter()
            .filter(|event| event.token() != WAKER_TOKEN)
            .map(Readiness::from)
            .collect())
    }

    pub fn wake(&self) -> Result<()> {
        Ok(self.waker.wake()?)
    }
}
