use std::sync::OnceLock;
use std::time::{Duration, Instant};

use reqwest::blocking::{Client, Response};
use reqwest::header::CONTENT_TYPE;
use tracing::debug;

use super::{CodecSettings, CompressionBackend};
use crate::discovery::ServerDescription;
use crate::error::BackendError;
use crate::frame::{CompressedFrame, FrameUnit};
use crate::protocol::{
    ENCODE_MS_HEADER, ENCODE_PATH, EncodeRequest, ErrorReply, FRAME_HEADER, PING_PATH, PingReply,
    ReplyStatus,
};

/// Sends frames to an encode server over HTTP.
///
/// Every request carries `timeout` as its total budget, from connect until
/// the last byte of the reply, so a server that trickles bytes cannot hold
/// a worker past it. Connections are not pooled: a server that went away
/// is noticed on the next frame rather than on a stale keep-alive socket.
#[derive(Debug, Clone)]
pub struct RemoteEncoder {
    server: ServerDescription,
    codec: CodecSettings,
    timeout: Duration,
    name: String,
    client: OnceLock<Client>,
}

impl RemoteEncoder {
    pub fn new(server: ServerDescription, codec: CodecSettings, timeout: Duration) -> Self {
        let name = format!("remote-{}", server.address());
        Self {
            server,
            codec,
            timeout,
            name,
            client: OnceLock::new(),
        }
    }

    fn client(&self) -> Result<Client, BackendError> {
        if let Some(client) = self.client.get() {
            return Ok(client.clone());
        }
        let client = Client::builder()
            .connect_timeout(self.timeout)
            .timeout(self.timeout)
            .pool_max_idle_per_host(0)
            .build()
            .map_err(|err| BackendError::Transient(format!("failed to build HTTP client: {err}")))?;
        Ok(self.client.get_or_init(|| client).clone())
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.server.address())
    }

    fn transport_error(&self, err: reqwest::Error) -> BackendError {
        if err.is_timeout() {
            BackendError::Transient(format!(
                "no reply from {} within {} ms",
                self.server.address(),
                self.timeout.as_millis()
            ))
        } else {
            BackendError::Transient(format!("request to {} failed: {err}", self.server.address()))
        }
    }

    /// Asks the server for its capabilities.
    pub fn ping(&self) -> Result<PingReply, BackendError> {
        let response = self
            .client()?
            .get(self.url(PING_PATH))
            .send()
            .map_err(|err| self.transport_error(err))?;
        match ReplyStatus::from_http(response.status().as_u16()) {
            ReplyStatus::Ok => response.json().map_err(|err| self.transport_error(err)),
            _ => Err(BackendError::Transient(server_message(response))),
        }
    }
}

fn server_message(response: Response) -> String {
    let status = response.status();
    response
        .json::<ErrorReply>()
        .map(|reply| reply.message)
        .unwrap_or_else(|_| format!("server replied {status}"))
}

impl CompressionBackend for RemoteEncoder {
    fn name(&self) -> &str {
        &self.name
    }

    fn compress(&mut self, frame: &FrameUnit) -> Result<CompressedFrame, BackendError> {
        let started = Instant::now();
        let header = EncodeRequest::for_frame(frame, self.codec)
            .to_header()
            .map_err(|err| BackendError::Transient(format!("failed to describe frame: {err}")))?;

        let response = self
            .client()?
            .post(self.url(ENCODE_PATH))
            .header(FRAME_HEADER, header)
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(frame.image.data.clone())
            .send()
            .map_err(|err| self.transport_error(err))?;

        match ReplyStatus::from_http(response.status().as_u16()) {
            ReplyStatus::Ok => {
                let server_ms = response
                    .headers()
                    .get(ENCODE_MS_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .and_then(|value| value.parse::<f64>().ok());
                let data = response.bytes().map_err(|err| self.transport_error(err))?;
                debug!(
                    server = %self.server.address(),
                    frame = %frame.key(),
                    server_ms,
                    bytes = data.len(),
                    "Remote encode complete"
                );
                Ok(CompressedFrame::for_unit(frame, data.to_vec(), started.elapsed()))
            }
            ReplyStatus::CodecError => Err(BackendError::Codec(server_message(response))),
            ReplyStatus::Error => Err(BackendError::Transient(server_message(response))),
        }
    }

    fn is_reachable(&self) -> bool {
        self.ping().is_ok()
    }
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;
    use std::thread;

    use super::*;
    use crate::frame::{DecodedImage, Eyes};
    use crate::time::DcpTime;

    fn description(port: u16) -> ServerDescription {
        ServerDescription::new("127.0.0.1", port, 1)
    }

    #[test]
    fn refused_connections_are_transient() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let mut encoder = RemoteEncoder::new(
            description(port),
            CodecSettings::default(),
            Duration::from_secs(2),
        );
        let frame = FrameUnit::new(0, Eyes::Both, DcpTime::zero(), DecodedImage::black(2, 2));
        assert!(encoder.compress(&frame).unwrap_err().is_retryable());
        assert!(!encoder.is_reachable());
    }

    #[test]
    fn silent_servers_time_out() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let holder = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            thread::sleep(Duration::from_millis(600));
            drop(stream);
        });

        let mut encoder = RemoteEncoder::new(
            description(port),
            CodecSettings::default(),
            Duration::from_millis(200),
        );
        let frame = FrameUnit::new(0, Eyes::Both, DcpTime::zero(), DecodedImage::black(2, 2));
        let started = Instant::now();
        let err = encoder.compress(&frame).unwrap_err();
        assert!(err.is_retryable());
        assert!(started.elapsed() < Duration::from_millis(550));
        holder.join().unwrap();
    }
}
