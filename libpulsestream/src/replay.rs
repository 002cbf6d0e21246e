use std::io::{BufWriter, ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};

use super::constants::REQUEST_NEXT;
use super::error::{ReplayError, WireError};
use super::train::{write_end_frame, write_frame};
use super::train_stack::TrainStack;

/// Serves recorded trains over TCP using the same request/response protocol as a live
/// source. One client is served; each `next` request is answered with the next train of
/// the stack, or with the end-of-data frame once the stack is empty.
#[derive(Debug)]
pub struct ReplayServer {
    listener: TcpListener,
    stack: TrainStack,
}

impl ReplayServer {
    pub fn bind<A: ToSocketAddrs>(address: A, stack: TrainStack) -> Result<Self, ReplayError> {
        let listener = TcpListener::bind(address)?;
        spdlog::info!(
            "Replaying {} from {}",
            human_bytes::human_bytes(stack.total_size_bytes() as f64),
            stack.parent_path().display()
        );
        Ok(Self { listener, stack })
    }

    /// The bound address; useful when binding to port 0
    pub fn local_addr(&self) -> Result<SocketAddr, ReplayError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept a single client and serve it until it hangs up.
    ///
    /// Returns the number of trains sent.
    pub fn serve(mut self) -> Result<u64, ReplayError> {
        let (stream, peer) = self.listener.accept()?;
        spdlog::info!("Client connected from {peer}");
        let sent = self.serve_client(stream)?;
        spdlog::info!("Client {peer} disconnected after {sent} trains");
        Ok(sent)
    }

    fn serve_client(&mut self, stream: TcpStream) -> Result<u64, ReplayError> {
        stream.set_nodelay(true)?;
        let mut reader = stream.try_clone()?;
        let mut writer = BufWriter::new(stream);
        let mut request = [0u8; 4];
        let mut sent: u64 = 0;
        let mut ended = false;

        loop {
            match reader.read_exact(&mut request) {
                Ok(()) => (),
                Err(e) if is_hangup(&e) => return Ok(sent),
                Err(e) => return Err(ReplayError::IOError(e)),
            }
            if request != *REQUEST_NEXT {
                return Err(ReplayError::BadRequest(request));
            }

            let train = if ended {
                None
            } else {
                self.stack.get_next_train()?
            };
            let is_train = train.is_some();
            let result = match train {
                Some(train) => write_frame(&mut writer, &train),
                None => {
                    if !ended {
                        spdlog::info!("Recorded trains exhausted; sending end of data");
                        ended = true;
                    }
                    write_end_frame(&mut writer)
                }
            };
            match result.map_err(ReplayError::from).and_then(|_| Ok(writer.flush()?)) {
                Ok(()) if is_train => sent += 1,
                Ok(()) => (),
                Err(e) if is_client_hangup(&e) => return Ok(sent),
                Err(e) => return Err(e),
            }
        }
    }
}

fn is_hangup(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        ErrorKind::UnexpectedEof | ErrorKind::ConnectionReset | ErrorKind::BrokenPipe
    )
}

/// A client that went away mid-reply, whichever layer noticed it
fn is_client_hangup(e: &ReplayError) -> bool {
    match e {
        ReplayError::IOError(e) | ReplayError::WireError(WireError::IOError(e)) => is_hangup(e),
        _ => false,
    }
}
