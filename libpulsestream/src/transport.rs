//! Pull-based request/response transports.
//!
//! The client asks for the next train with a fixed request and the server answers with
//! exactly one framed train, or with the end-of-data marker. Responses are atomic; there
//! are no partial trains.
use std::io::{BufReader, ErrorKind, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::mpsc::{channel, Receiver, Sender};

use super::constants::REQUEST_NEXT;
use super::error::{TransportError, WireError};
use super::train::{read_frame, Train};

/// The client side of a request/response channel delivering trains
pub trait Transport {
    /// Ask the server for the next train. Must not block on the response.
    fn send_request(&mut self) -> Result<(), TransportError>;

    /// Block until the response to the outstanding request arrives.
    ///
    /// `Ok(None)` means the server has no more data.
    fn receive_unit(&mut self) -> Result<Option<Train>, TransportError>;
}

/// Transport over a TCP connection using the framed train encoding
#[derive(Debug)]
pub struct TcpTransport {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
    peer: String,
}

impl TcpTransport {
    pub fn connect<A: ToSocketAddrs + std::fmt::Display>(
        address: A,
    ) -> Result<Self, TransportError> {
        let peer = address.to_string();
        let stream = TcpStream::connect(address)?;
        stream.set_nodelay(true)?;
        let writer = stream.try_clone()?;
        spdlog::info!("Connected to train source at {peer}");
        Ok(Self {
            reader: BufReader::new(stream),
            writer,
            peer,
        })
    }
}

impl Transport for TcpTransport {
    fn send_request(&mut self) -> Result<(), TransportError> {
        match self.writer.write_all(REQUEST_NEXT) {
            Ok(()) => Ok(()),
            Err(e) if is_disconnect(&e) => Err(TransportError::Disconnected),
            Err(e) => Err(TransportError::IOError(e)),
        }
    }

    fn receive_unit(&mut self) -> Result<Option<Train>, TransportError> {
        match read_frame(&mut self.reader) {
            Ok(train) => Ok(train),
            Err(WireError::IOError(e)) if is_disconnect(&e) => Err(TransportError::Disconnected),
            Err(WireError::IOError(e)) => Err(TransportError::IOError(e)),
            Err(e) => Err(TransportError::Malformed(e)),
        }
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        // Errors here only mean the peer went first
        let _ = self.writer.shutdown(std::net::Shutdown::Both);
        spdlog::debug!("Closed connection to {}", self.peer);
    }
}

fn is_disconnect(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        ErrorKind::UnexpectedEof
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
    )
}

/// In-process transport built on mpsc channels.
///
/// Requests and responses travel over two channels; the serving half is a
/// [`ChannelEndpoint`]. Dropping the endpoint looks like a disconnect to the transport.
#[derive(Debug)]
pub struct ChannelTransport {
    requests: Sender<()>,
    responses: Receiver<Option<Train>>,
}

/// Serving half of a [`ChannelTransport`]
#[derive(Debug)]
pub struct ChannelEndpoint {
    requests: Receiver<()>,
    responses: Sender<Option<Train>>,
}

/// Create a connected transport/endpoint pair
pub fn channel_pair() -> (ChannelTransport, ChannelEndpoint) {
    let (request_tx, request_rx) = channel();
    let (response_tx, response_rx) = channel();
    (
        ChannelTransport {
            requests: request_tx,
            responses: response_rx,
        },
        ChannelEndpoint {
            requests: request_rx,
            responses: response_tx,
        },
    )
}

impl Transport for ChannelTransport {
    fn send_request(&mut self) -> Result<(), TransportError> {
        self.requests
            .send(())
            .map_err(|_| TransportError::Disconnected)
    }

    fn receive_unit(&mut self) -> Result<Option<Train>, TransportError> {
        self.responses
            .recv()
            .map_err(|_| TransportError::Disconnected)
    }
}

impl ChannelEndpoint {
    /// Block until the client asks for a train. False once the client is gone.
    pub fn wait_for_request(&self) -> bool {
        self.requests.recv().is_ok()
    }

    /// Number of requests that have arrived but not been answered, without blocking
    pub fn drain_requests(&self) -> usize {
        self.requests.try_iter().count()
    }

    /// Answer a request. False once the client is gone.
    pub fn reply(&self, unit: Option<Train>) -> bool {
        self.responses.send(unit).is_ok()
    }

    /// Answer every request with the next train, then with the end-of-data marker.
    ///
    /// Returns the number of trains delivered. Intended to be run on its own thread.
    pub fn serve(self, trains: impl IntoIterator<Item = Train>) -> usize {
        let mut delivered = 0;
        for train in trains {
            if !self.wait_for_request() || !self.reply(Some(train)) {
                return delivered;
            }
            delivered += 1;
        }
        while self.wait_for_request() {
            if !self.reply(None) {
                break;
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_pair_serves_in_order() {
        let (mut transport, endpoint) = channel_pair();
        let handle = std::thread::spawn(move || {
            endpoint.serve(vec![Train::new(1, 10, vec![]), Train::new(2, 20, vec![])])
        });

        for expected in [1, 2] {
            transport.send_request().unwrap();
            let train = transport.receive_unit().unwrap().unwrap();
            assert_eq!(train.train_id, expected);
        }
        transport.send_request().unwrap();
        assert!(transport.receive_unit().unwrap().is_none());

        drop(transport);
        assert_eq!(handle.join().unwrap(), 2);
    }

    #[test]
    fn test_dropped_endpoint_is_disconnect() {
        let (mut transport, endpoint) = channel_pair();
        drop(endpoint);
        assert!(matches!(
            transport.send_request(),
            Err(TransportError::Disconnected)
        ));
        assert!(matches!(
            transport.receive_unit(),
            Err(TransportError::Disconnected)
        ));
    }
}
