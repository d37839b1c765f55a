use std::io::{self, Read, Write};

use mio::unix::pipe::{self, Receiver, Sender};

/// A pipe whose read end becomes readable whenever a virtual socket buffers
/// a reply. Event loops register [`ReadinessPipe::receiver`] with their
/// poller instead of the (nonexistent) network descriptor.
#[derive(Debug)]
pub struct ReadinessPipe {
    sender: Sender,
    receiver: Receiver,
}

impl ReadinessPipe {
    pub fn new() -> io::Result<Self> {
        let (sender, receiver) = pipe::new()?;
        Ok(Self { sender, receiver })
    }

    /// Marks the pipe readable. A full pipe is already readable.
    pub fn notify(&mut self) -> io::Result<()> {
        match self.sender.write(&[1]) {
            Ok(_) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Drains pending notifications; returns how many bytes were pending.
    pub fn clear(&mut self) -> io::Result<usize> {
        let mut drained = 0;
        let mut buf = [0_u8; 64];
        loop {
            match self.receiver.read(&mut buf) {
                Ok(0) => return Ok(drained),
                Ok(n) => drained += n,
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(drained),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => return Err(err),
            }
        }
    }

    #[must_use]
    pub fn receiver(&self) -> &Receiver {
        &self.receiver
    }

    pub fn receiver_mut(&mut self) -> &mut Receiver {
        &mut self.receiver
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use mio::{Events, Interest, Poll, Token};

    use super::ReadinessPipe;

    #[test]
    fn notify_wakes_a_poller_and_clear_drains() {
        let mut pipe = ReadinessPipe::new().expect("pipe");
        let mut poll = Poll::new().expect("poll");
        poll.registry()
            .register(pipe.receiver_mut(), Token(7), Interest::READABLE)
            .expect("register");

        pipe.notify().expect("notify");
        pipe.notify().expect("notify");
        let mut events = Events::with_capacity(4);
        poll.poll(&mut events, Some(Duration::from_secs(1))).expect("poll");
        assert!(events.iter().any(|event| event.token() == Token(7) && event.is_readable()));
        assert_eq!(pipe.clear().expect("clear"), 2);
        assert_eq!(pipe.clear().expect("clear"), 0);
    }
}
