//! The TCP relay between a driving process and the simulation host.
//!
//! The host accepts one driver, then any number of observers. Each tick it
//! reads one frame from the driver and answers by broadcasting one render
//! signal line to every peer, the driver included.

use crate::frame_decoder::{Frame, Hook};
use crate::render_signal::{decode_signal, encode_signal, RenderSignal};

use log::{debug, info, warn};
use ron::de::SpannedError;
use std::{
    borrow::Cow,
    fmt,
    io::{self, BufRead, BufReader, ErrorKind, Read, Write},
    net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream, ToSocketAddrs},
    time::Duration,
};

/// Where the host is in its connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    /// Bound, no driver yet.
    Listening,
    /// A driver is connected.
    Connected,
    /// Waiting for a driver frame.
    Polling,
    /// Sending a render signal.
    Broadcasting,
    /// The driver is gone or the relay was closed.
    Closed,
}

/// Errors on either end of the relay.
#[derive(Debug)]
pub enum RelayError {
    /// Socket setup failed.
    Io(io::Error),

    /// The named peer hung up or its socket failed.
    PeerOffline(String),

    /// There is no driver to read from.
    NotConnected,

    /// No frame arrived within the receive timeout.
    Timeout,

    /// A line from the host is not a render signal.
    Signal(SpannedError),

    /// A render signal could not be encoded.
    Encode(ron::Error),
}

impl fmt::Display for RelayError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use RelayError as RE;
        let msg = match self {
            RE::Io(e) => Cow::from(format!("relay socket error: {}", e)),
            RE::PeerOffline(name) => Cow::from(format!("client {} is offline", name)),
            RE::NotConnected => Cow::from("no driver connected"),
            RE::Timeout => Cow::from("no frame within the receive timeout"),
            RE::Signal(e) => Cow::from(format!("bad render signal: {}", e)),
            RE::Encode(e) => Cow::from(format!("cannot encode render signal: {}", e)),
        };

        write!(f, "{}", msg)
    }
}

impl std::error::Error for RelayError {}

impl From<io::Error> for RelayError {
    fn from(value: io::Error) -> Self {
        RelayError::Io(value)
    }
}

struct Peer<S> {
    id: usize,
    name: String,
    stream: BufReader<S>,
}

/// The host end: one driver and zero or more observers.
pub struct Relay<S = TcpStream> {
    listener: Option<TcpListener>,
    peers: Vec<Peer<S>>,
    driver: Option<usize>,
    next_id: usize,
    buffer_size: usize,
    state: RelayState,
    pending: Option<String>,
}

impl Relay<TcpStream> {
    /// Bind `0.0.0.0:port`. Port 0 picks a free port.
    pub fn listen(port: u16, buffer_size: usize) -> Result<Self, RelayError> {
        let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))?;
        info!("relay listening on {}", listener.local_addr()?);
        Ok(Relay {
            listener: Some(listener),
            peers: Vec::new(),
            driver: None,
            next_id: 0,
            buffer_size,
            state: RelayState::Listening,
            pending: None,
        })
    }

    /// The bound address.
    pub fn local_addr(&self) -> Result<SocketAddr, RelayError> {
        match &self.listener {
            Some(listener) => Ok(listener.local_addr()?),
            None => Err(RelayError::NotConnected),
        }
    }

    /// Block until the driver connects. Every connection must open with a
    /// frame: `#observe` marks an observer, anything else is the driver's
    /// first frame and is answered by the first [Relay::poll_frame].
    /// Frames from the driver wait at most `timeout`, or forever when
    /// `None`.
    pub fn accept_driver(&mut self, timeout: Option<Duration>) -> Result<SocketAddr, RelayError> {
        loop {
            let listener = self.listener.as_ref().ok_or(RelayError::NotConnected)?;
            let (stream, addr) = listener.accept()?;
            stream.set_read_timeout(timeout)?;
            stream.set_nodelay(true)?;

            let mut reader = BufReader::new(stream);
            let mut line = String::new();
            match read_frame_line(&mut reader, self.buffer_size, &mut line) {
                Ok(LineRead::End) => {
                    info!("client {} left before its first frame", addr);
                    continue;
                }
                Ok(LineRead::Line) if is_observe(&line) => {
                    info!("observer {} connected", addr);
                    self.push_peer(addr.to_string(), reader);
                    continue;
                }
                Ok(LineRead::Line) => self.pending = Some(line),
                Ok(LineRead::Oversized) => {
                    // Still owed an answer; an empty line polls as `None`.
                    warn!("skipping frame longer than {} bytes", self.buffer_size);
                    self.pending = Some(String::new());
                }
                Err(e) => {
                    warn!("dropping client {}: {}", addr, e);
                    continue;
                }
            }

            listener.set_nonblocking(true)?;
            info!("client {} connected", addr);
            let id = self.push_peer(addr.to_string(), reader);
            self.driver = Some(id);
            self.state = RelayState::Connected;
            return Ok(addr);
        }
    }

    /// Take in every observer waiting to connect, without blocking.
    /// Returns how many were accepted.
    pub fn accept_observers(&mut self) -> usize {
        let mut accepted = Vec::new();
        if let Some(listener) = &self.listener {
            loop {
                match listener.accept() {
                    Ok((stream, addr)) => {
                        if let Err(e) = stream.set_nonblocking(false) {
                            warn!("dropping observer {}: {}", addr, e);
                            continue;
                        }
                        info!("observer {} connected", addr);
                        accepted.push((addr.to_string(), stream));
                    }
                    Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                    Err(e) => {
                        warn!("accepting observers failed: {}", e);
                        break;
                    }
                }
            }
        }

        let count = accepted.len();
        for (name, stream) in accepted {
            self.add_peer(name, stream);
        }
        count
    }
}

impl<S: Read + Write> Relay<S> {
    /// A relay over already connected streams; the first is the driver.
    pub fn from_streams(driver: S, observers: Vec<S>, buffer_size: usize) -> Self {
        let mut relay = Relay {
            listener: None,
            peers: Vec::new(),
            driver: None,
            next_id: 0,
            buffer_size,
            state: RelayState::Connected,
            pending: None,
        };
        let id = relay.add_peer("driver".into(), driver);
        relay.driver = Some(id);
        for (i, stream) in observers.into_iter().enumerate() {
            relay.add_peer(format!("observer {}", i), stream);
        }
        relay
    }

    /// Current lifecycle state.
    pub fn state(&self) -> RelayState {
        self.state
    }

    /// Connected peers, the driver included.
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Read and decode one frame from the driver.
    ///
    /// `Ok(None)` means a line arrived but was not a frame; it is logged and
    /// skipped. End of stream or a socket error drops the driver and closes
    /// the relay.
    pub fn poll_frame(&mut self) -> Result<Option<Frame>, RelayError> {
        let index = self
            .driver
            .and_then(|id| self.peers.iter().position(|p| p.id == id))
            .ok_or(RelayError::NotConnected)?;
        self.state = RelayState::Polling;

        let line = match self.pending.take() {
            Some(line) => line,
            None => {
                let mut line = String::new();
                match read_frame_line(&mut self.peers[index].stream, self.buffer_size, &mut line) {
                    Ok(LineRead::End) => return Err(self.drop_driver(index)),
                    Ok(LineRead::Line) => line,
                    Ok(LineRead::Oversized) => {
                        warn!("skipping frame longer than {} bytes", self.buffer_size);
                        return Ok(None);
                    }
                    Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                        return Err(RelayError::Timeout);
                    }
                    Err(e) if e.kind() == ErrorKind::InvalidData => {
                        warn!("skipping frame that is not text");
                        return Ok(None);
                    }
                    Err(e) => {
                        debug!("driver read failed: {}", e);
                        return Err(self.drop_driver(index));
                    }
                }
            }
        };

        match line.parse::<Frame>() {
            Ok(frame) => {
                debug!("frame {}", frame);
                Ok(Some(frame))
            }
            Err(e) => {
                warn!("skipping malformed frame {:?} ({:?})", line.trim_end(), e.code);
                Ok(None)
            }
        }
    }

    /// Send `signal` to every peer. A peer whose write fails is dropped;
    /// the others are still served.
    pub fn broadcast(&mut self, signal: &RenderSignal) {
        let mut line = match encode_signal(signal) {
            Ok(line) => line,
            Err(e) => {
                warn!("{}", RelayError::Encode(e));
                return;
            }
        };
        line.push('\n');

        if self.state != RelayState::Closed {
            self.state = RelayState::Broadcasting;
        }

        let driver = self.driver;
        self.peers.retain_mut(|peer| {
            let stream = peer.stream.get_mut();
            match stream.write_all(line.as_bytes()).and_then(|_| stream.flush()) {
                Ok(()) => true,
                Err(e) => {
                    warn!("dropping client {}: {}", peer.name, e);
                    false
                }
            }
        });
        if let Some(id) = driver {
            if !self.peers.iter().any(|p| p.id == id) {
                self.driver = None;
            }
        }
    }

    /// Hang up on everyone and stop listening.
    pub fn close(&mut self) {
        if !self.peers.is_empty() {
            info!("closing {} relay connections", self.peers.len());
        }
        self.peers.clear();
        self.driver = None;
        self.listener = None;
        self.state = RelayState::Closed;
    }

    fn add_peer(&mut self, name: String, stream: S) -> usize {
        self.push_peer(name, BufReader::new(stream))
    }

    fn push_peer(&mut self, name: String, stream: BufReader<S>) -> usize {
        let id = self.next_id;
        self.next_id += 1;
        self.peers.push(Peer { id, name, stream });
        id
    }

    fn drop_driver(&mut self, index: usize) -> RelayError {
        let peer = self.peers.remove(index);
        info!("client {} is offline", peer.name);
        self.driver = None;
        self.state = RelayState::Closed;
        RelayError::PeerOffline(peer.name)
    }
}

/// How a bounded line read ended.
#[derive(Debug, PartialEq, Eq)]
enum LineRead {
    /// The peer hung up.
    End,
    /// A whole line, or the last bytes before the peer hung up.
    Line,
    /// The line was longer than the limit and has been thrown away.
    Oversized,
}

/// Read one line of at most `limit` bytes into `line`. A longer line is
/// consumed through its `\n` and discarded, so the next read starts on
/// the next line.
fn read_frame_line<R: BufRead>(
    reader: &mut R,
    limit: usize,
    line: &mut String,
) -> io::Result<LineRead> {
    let mut bytes = Vec::new();
    let read = (&mut *reader)
        .take(limit as u64)
        .read_until(b'\n', &mut bytes)?;
    if read == 0 {
        return Ok(LineRead::End);
    }

    if read == limit && !bytes.ends_with(b"\n") {
        loop {
            let available = reader.fill_buf()?;
            if available.is_empty() {
                break;
            }
            match available.iter().position(|&b| b == b'\n') {
                Some(end) => {
                    reader.consume(end + 1);
                    break;
                }
                None => {
                    let len = available.len();
                    reader.consume(len);
                }
            }
        }
        return Ok(LineRead::Oversized);
    }

    match String::from_utf8(bytes) {
        Ok(text) => {
            line.push_str(&text);
            Ok(LineRead::Line)
        }
        Err(_) => Err(io::Error::new(ErrorKind::InvalidData, "frame is not text")),
    }
}

fn is_observe(line: &str) -> bool {
    matches!(line.parse::<Frame>(), Ok(Frame::Hook(Hook::Observe)))
}

/// The driver (or observer) end of the relay.
pub struct RelayClient<S = TcpStream> {
    stream: BufReader<S>,
}

impl RelayClient<TcpStream> {
    /// Connect to a host.
    pub fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self, RelayError> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        info!("connected to {}", stream.peer_addr()?);
        Ok(RelayClient::from_stream(stream))
    }
}

impl<S: Read + Write> RelayClient<S> {
    /// Wrap a connected stream.
    pub fn from_stream(stream: S) -> Self {
        RelayClient {
            stream: BufReader::new(stream),
        }
    }

    /// Send one frame.
    pub fn send_frame(&mut self, frame: &Frame) -> Result<(), RelayError> {
        let stream = self.stream.get_mut();
        writeln!(stream, "{}", frame)
            .and_then(|_| stream.flush())
            .map_err(|e| RelayError::PeerOffline(format!("host ({})", e)))
    }

    /// Block for the next render signal.
    pub fn recv_signal(&mut self) -> Result<RenderSignal, RelayError> {
        let mut line = String::new();
        match self.stream.read_line(&mut line) {
            Ok(0) => Err(RelayError::PeerOffline("host".into())),
            Ok(_) => decode_signal(&line).map_err(RelayError::Signal),
            Err(e) => Err(RelayError::PeerOffline(format!("host ({})", e))),
        }
    }

    /// Send a frame and wait for the signal that answers it.
    pub fn request(&mut self, frame: &Frame) -> Result<RenderSignal, RelayError> {
        self.send_frame(frame)?;
        self.recv_signal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render_signal::BodyState;
    use std::io::Cursor;
    use std::thread;

    struct MockStream {
        input: Cursor<Vec<u8>>,
        output: Vec<u8>,
        fail_writes: bool,
    }

    impl MockStream {
        fn new(input: &str) -> Self {
            MockStream {
                input: Cursor::new(input.as_bytes().to_vec()),
                output: Vec::new(),
                fail_writes: false,
            }
        }

        fn broken() -> Self {
            MockStream {
                fail_writes: true,
                ..MockStream::new("")
            }
        }
    }

    impl Read for MockStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for MockStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.fail_writes {
                Err(io::Error::new(ErrorKind::BrokenPipe, "peer went away"))
            } else {
                self.output.write(buf)
            }
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn signal() -> RenderSignal {
        RenderSignal::from([(
            3,
            BodyState {
                position: [0.5, 0.0, 0.7],
                orientation: [0.0, 0.0, 0.0, 1.0],
                joints: None,
            },
        )])
    }

    #[test]
    fn frames_then_hangup() {
        let driver = MockStream::new("b pressed\n#idle -\nnot-a-frame\n");
        let mut relay = Relay::from_streams(driver, vec![], 64);

        assert!(matches!(relay.poll_frame(), Ok(Some(Frame::Key { .. }))));
        assert_eq!(relay.state(), RelayState::Polling);
        assert!(matches!(
            relay.poll_frame(),
            Ok(Some(Frame::Hook(Hook::Idle)))
        ));
        assert!(matches!(relay.poll_frame(), Ok(None)));
        assert!(matches!(
            relay.poll_frame(),
            Err(RelayError::PeerOffline(_))
        ));
        assert_eq!(relay.state(), RelayState::Closed);
        assert_eq!(relay.peer_count(), 0);
        assert!(matches!(relay.poll_frame(), Err(RelayError::NotConnected)));
    }

    #[test]
    fn oversized_frame_is_skipped() {
        let driver = MockStream::new("@0 0000000000000'c' pressed\nb pressed\n");
        let mut relay = Relay::from_streams(driver, vec![], 16);

        // The whole long line goes, not just its first 16 bytes.
        assert!(matches!(relay.poll_frame(), Ok(None)));
        let next = relay.poll_frame().unwrap().unwrap();
        assert_eq!(next, "b pressed".parse().unwrap());
        assert!(matches!(
            relay.poll_frame(),
            Err(RelayError::PeerOffline(_))
        ));
    }

    #[test]
    fn binary_frame_is_skipped_whole() {
        let mut input = b"\xff\xfe pressed\n".to_vec();
        input.extend_from_slice(b"#idle -\n");
        let driver = MockStream {
            input: Cursor::new(input),
            output: Vec::new(),
            fail_writes: false,
        };
        let mut relay = Relay::from_streams(driver, vec![], 64);
        assert!(matches!(relay.poll_frame(), Ok(None)));
        assert_eq!(relay.poll_frame().unwrap(), Some(Frame::Hook(Hook::Idle)));
    }

    #[test]
    fn broadcast_drops_failing_peers() {
        let mut relay = Relay::from_streams(
            MockStream::new(""),
            vec![MockStream::broken(), MockStream::new("")],
            64,
        );
        relay.broadcast(&signal());

        assert_eq!(relay.peer_count(), 2);
        assert_eq!(relay.state(), RelayState::Broadcasting);
        for peer in &relay.peers {
            let output = String::from_utf8(peer.stream.get_ref().output.clone()).unwrap();
            assert_eq!(decode_signal(&output).unwrap(), signal());
            assert!(output.ends_with('\n'));
        }
    }

    #[test]
    fn losing_the_driver_on_broadcast() {
        let mut relay = Relay::from_streams(MockStream::broken(), vec![MockStream::new("")], 64);
        relay.broadcast(&signal());
        assert_eq!(relay.peer_count(), 1);
        assert!(matches!(relay.poll_frame(), Err(RelayError::NotConnected)));
    }

    #[test]
    fn loopback_round_trip() {
        let mut relay = Relay::listen(0, 4096).unwrap();
        let port = relay.local_addr().unwrap().port();

        let driver = thread::spawn(move || {
            let mut client = RelayClient::connect(("127.0.0.1", port)).unwrap();
            client
                .request(&Frame::Hook(Hook::Controllers(vec![1, 2])))
                .unwrap()
        });

        relay.accept_driver(Some(Duration::from_secs(5))).unwrap();
        assert_eq!(relay.state(), RelayState::Connected);
        assert_eq!(relay.accept_observers(), 0);
        assert_eq!(
            relay.poll_frame().unwrap(),
            Some(Frame::Hook(Hook::Controllers(vec![1, 2])))
        );
        relay.broadcast(&signal());

        assert_eq!(driver.join().unwrap(), signal());
        relay.close();
        assert_eq!(relay.state(), RelayState::Closed);
    }

    #[test]
    fn observer_connecting_first_is_not_the_driver() {
        let mut relay = Relay::listen(0, 4096).unwrap();
        let port = relay.local_addr().unwrap().port();

        let mut observer = RelayClient::connect(("127.0.0.1", port)).unwrap();
        observer.send_frame(&Frame::Hook(Hook::Observe)).unwrap();
        let driver = thread::spawn(move || {
            let mut client = RelayClient::connect(("127.0.0.1", port)).unwrap();
            client.request(&Frame::Hook(Hook::Reset)).unwrap()
        });

        relay.accept_driver(Some(Duration::from_secs(5))).unwrap();
        assert_eq!(relay.peer_count(), 2);
        assert_eq!(relay.poll_frame().unwrap(), Some(Frame::Hook(Hook::Reset)));
        relay.broadcast(&signal());

        assert_eq!(driver.join().unwrap(), signal());
        assert_eq!(observer.recv_signal().unwrap(), signal());
    }
}
