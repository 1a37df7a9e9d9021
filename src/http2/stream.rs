use crate::errors::Http2Error;

const WINDOW_CEILING: i64 = 0x7FFF_FFFF;

/// Stream lifecycle, RFC 7540 §5.1 (server side, no push: the
/// reserved states never occur).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StreamState {
    /// HEADERS received but the request is still arriving.
    Open,
    /// The client finished its side; the response may still be pending.
    HalfClosedRemote,
    /// Fully finished or reset. Kept briefly so late frames are
    /// classified as stream errors instead of connection errors.
    Closed,
}

/// One client-initiated stream (odd identifier).
#[derive(Debug)]
pub(crate) struct Stream {
    pub(crate) id: u32,
    pub(crate) state: StreamState,

    /// What the peer lets us send; driven by its WINDOW_UPDATEs.
    pub(crate) send_window: i64,
    /// What we let the peer send; replenished as the request body is
    /// consumed.
    pub(crate) recv_window: i64,

    /// Decoded request headers, pseudo-headers first.
    pub(crate) headers: Vec<(String, String)>,
    /// Accumulated request body.
    pub(crate) data: Vec<u8>,
    /// The body exceeded the configured cap; the handler is skipped and
    /// the stream answered with 413.
    pub(crate) over_limit: bool,
}

impl Stream {
    pub(crate) fn new(id: u32, send_window: u32, recv_window: u32) -> Self {
        Self {
            id,
            state: StreamState::Open,
            send_window: send_window as i64,
            recv_window: recv_window as i64,
            headers: Vec::new(),
            data: Vec::new(),
            over_limit: false,
        }
    }

    /// END_STREAM on the request side.
    pub(crate) fn remote_done(&mut self) {
        if self.state == StreamState::Open {
            self.state = StreamState::HalfClosedRemote;
        }
    }

    pub(crate) fn close(&mut self) {
        self.state = StreamState::Closed;
    }

    /// Accounts an incoming DATA payload against the stream window.
    pub(crate) fn recv_data(&mut self, len: usize) -> Result<(), Http2Error> {
        self.recv_window -= len as i64;
        if self.recv_window < 0 {
            return Err(Http2Error::FlowControlError);
        }
        Ok(())
    }

    /// Applies a WINDOW_UPDATE from the peer.
    pub(crate) fn add_send_window(&mut self, increment: u32) -> Result<(), Http2Error> {
        if increment == 0 {
            return Err(Http2Error::ProtocolError);
        }
        self.send_window += increment as i64;
        if self.send_window > WINDOW_CEILING {
            return Err(Http2Error::FlowControlError);
        }
        Ok(())
    }

    /// How much DATA may go out right now given both windows.
    pub(crate) fn sendable(&self, connection_window: i64) -> usize {
        self.send_window.min(connection_window).max(0) as usize
    }

    /// Accounts `len` bytes of outgoing DATA.
    pub(crate) fn sent(&mut self, len: usize) {
        self.send_window -= len as i64;
    }
}

/// The connection-level flow-control window pair.
#[derive(Debug)]
pub(crate) struct ConnectionWindows {
    pub(crate) send: i64,
    pub(crate) recv: i64,
    initial_recv: i64,
    consumed: i64,
}

impl ConnectionWindows {
    pub(crate) fn new(initial: u32) -> Self {
        Self {
            send: 65_535,
            recv: initial as i64,
            initial_recv: initial as i64,
            consumed: 0,
        }
    }

    pub(crate) fn recv_data(&mut self, len: usize) -> Result<(), Http2Error> {
        self.recv -= len as i64;
        if self.recv < 0 {
            return Err(Http2Error::FlowControlError);
        }
        Ok(())
    }

    /// Marks request bytes as consumed by the application. Returns the
    /// increment to send in a WINDOW_UPDATE once half the initial window
    /// has been released, zero otherwise.
    pub(crate) fn release(&mut self, len: usize) -> u32 {
        self.consumed += len as i64;
        if self.consumed >= self.initial_recv / 2 {
            let increment = self.consumed;
            self.recv += increment;
            self.consumed = 0;
            return increment as u32;
        }
        0
    }

    pub(crate) fn add_send(&mut self, increment: u32) -> Result<(), Http2Error> {
        if increment == 0 {
            return Err(Http2Error::ProtocolError);
        }
        self.send += increment as i64;
        if self.send > WINDOW_CEILING {
            return Err(Http2Error::FlowControlError);
        }
        Ok(())
    }

    pub(crate) fn sent(&mut self, len: usize) {
        self.send -= len as i64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_transitions() {
        let mut stream = Stream::new(1, 65_535, 65_535);
        assert_eq!(stream.state, StreamState::Open);

        stream.remote_done();
        assert_eq!(stream.state, StreamState::HalfClosedRemote);

        stream.close();
        assert_eq!(stream.state, StreamState::Closed);

        // remote_done on a closed stream does not resurrect it.
        stream.remote_done();
        assert_eq!(stream.state, StreamState::Closed);
    }

    #[test]
    fn recv_window_enforced() {
        let mut stream = Stream::new(1, 65_535, 10);
        assert!(stream.recv_data(10).is_ok());
        assert_eq!(stream.recv_data(1), Err(Http2Error::FlowControlError));
    }

    #[test]
    fn send_window_updates() {
        let mut stream = Stream::new(1, 100, 65_535);
        assert_eq!(stream.sendable(1000), 100);

        stream.sent(60);
        assert_eq!(stream.sendable(1000), 40);

        // The connection window can be the binding constraint.
        assert_eq!(stream.sendable(5), 5);

        stream.add_send_window(200).unwrap();
        assert_eq!(stream.sendable(1000), 240);
    }

    #[test]
    fn zero_increment_is_protocol_error() {
        let mut stream = Stream::new(1, 100, 100);
        assert_eq!(stream.add_send_window(0), Err(Http2Error::ProtocolError));
    }

    #[test]
    fn window_overflow_is_flow_control_error() {
        let mut stream = Stream::new(1, 0x7FFF_FFFF, 100);
        assert_eq!(
            stream.add_send_window(1),
            Err(Http2Error::FlowControlError)
        );
    }

    #[test]
    fn exhausted_window_blocks_sending() {
        let mut stream = Stream::new(1, 10, 65_535);
        stream.sent(10);
        assert_eq!(stream.sendable(1000), 0);
    }

    #[test]
    fn connection_release_threshold() {
        let mut windows = ConnectionWindows::new(65_535);

        // Below half the initial window: no update yet.
        assert_eq!(windows.release(10_000), 0);
        assert_eq!(windows.release(10_000), 0);
        // Crossing the threshold flushes the full consumed amount.
        assert_eq!(windows.release(15_000), 35_000);
        // Counter restarts after the update.
        assert_eq!(windows.release(10_000), 0);
    }
}
