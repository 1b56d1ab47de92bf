//! Network side of the remote compression backend.
//!
//! A small blocking HTTP service on rouille. Each request is handled on
//! one of `threads` pool threads; encoding happens inline in the handler.

use std::io::Read;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::mpsc::Sender;
use std::thread::JoinHandle;
use std::time::Instant;

use anyhow::{Result, anyhow};
use rouille::{Request, Response};
use tracing::{debug, info, warn};

use crate::backend::encode_picture;
use crate::error::BackendError;
use crate::frame::DecodedImage;
use crate::protocol::{
    ENCODE_MS_HEADER, ENCODE_PATH, EncodeRequest, ErrorReply, FRAME_HEADER, MAX_PICTURE_BYTES,
    PING_PATH, PingReply, STATUS_CODEC_ERROR,
};

type Handler = Box<dyn Fn(&Request) -> Response + Send + Sync + 'static>;

/// A bound listener that has not started serving yet.
pub struct EncodeServer {
    server: rouille::Server<Handler>,
    threads: usize,
}

/// A running server. Stops on drop.
pub struct ServerHandle {
    address: SocketAddr,
    runner: Option<JoinHandle<()>>,
    stop: Option<Sender<()>>,
}

impl EncodeServer {
    pub fn bind(listen: impl ToSocketAddrs, threads: usize) -> Result<Self> {
        let threads = threads.max(1);
        let capability = threads as u32;
        let handler: Handler = Box::new(move |request| handle_request(request, capability));
        let server = rouille::Server::new(listen, handler)
            .map_err(|err| anyhow!("failed to bind encode server: {err}"))?
            .pool_size(threads);
        Ok(Self { server, threads })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.server.server_addr()
    }

    pub fn spawn(self) -> Result<ServerHandle> {
        let address = self.local_addr();
        let (runner, stop) = self.server.stoppable();
        info!(address = %address, threads = self.threads, "Encode server listening");
        Ok(ServerHandle {
            address,
            runner: Some(runner),
            stop: Some(stop),
        })
    }
}

impl ServerHandle {
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// Stops accepting requests and joins the server thread. Idempotent.
    pub fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(runner) = self.runner.take() {
            let _ = runner.join();
            info!(address = %self.address, "Encode server stopped");
        }
    }

    /// Serves until the process is terminated.
    pub fn wait(mut self) {
        if let Some(runner) = self.runner.take() {
            let _ = runner.join();
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

fn handle_request(request: &Request, threads: u32) -> Response {
    match (request.method(), request.url().as_str()) {
        ("GET", PING_PATH) => Response::json(&PingReply {
            threads,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }),
        ("POST", ENCODE_PATH) => handle_encode(request),
        (method, url) => {
            debug!(method, url, "Unknown route");
            error_response(404, format!("no route for {method} {url}"))
        }
    }
}

fn handle_encode(request: &Request) -> Response {
    let header = match request.header(FRAME_HEADER) {
        Some(value) => match EncodeRequest::from_header(value) {
            Ok(header) => header,
            Err(message) => return error_response(400, message),
        },
        None => return error_response(400, format!("missing {FRAME_HEADER} header")),
    };
    let Some(expected) = header.picture_len() else {
        return error_response(
            413,
            format!(
                "{}x{} picture exceeds the {MAX_PICTURE_BYTES} byte limit",
                header.width, header.height
            ),
        );
    };
    let Some(body) = request.data() else {
        return error_response(500, "request body was already consumed");
    };

    // One byte past the promised size is enough to tell the body is too long.
    let mut payload = Vec::new();
    if let Err(err) = body.take(expected as u64 + 1).read_to_end(&mut payload) {
        return error_response(400, format!("failed to read picture: {err}"));
    }
    if payload.len() > expected {
        return error_response(
            413,
            format!("body is larger than a {}x{} picture", header.width, header.height),
        );
    }

    let started = Instant::now();
    let image = DecodedImage::new(header.width, header.height, payload);
    match encode_picture(&image, &header.codec) {
        Ok(data) => {
            let encode_ms = started.elapsed().as_secs_f64() * 1_000.0;
            debug!(frame = header.index, eyes = %header.eyes, bytes = data.len(), "Encoded frame");
            Response::from_data("application/octet-stream", data)
                .with_additional_header(ENCODE_MS_HEADER, format!("{encode_ms:.3}"))
        }
        Err(BackendError::Codec(message)) => {
            warn!(frame = header.index, error = %message, "Frame is unencodable");
            error_response(STATUS_CODEC_ERROR, message)
        }
        Err(BackendError::Transient(message)) => error_response(500, message),
    }
}

fn error_response(status: u16, message: impl Into<String>) -> Response {
    Response::json(&ErrorReply {
        message: message.into(),
    })
    .with_status_code(status)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::backend::{CodecSettings, CompressionBackend, RemoteEncoder};
    use crate::discovery::ServerDescription;
    use crate::frame::{Eyes, FrameUnit};
    use crate::time::DcpTime;

    fn encoder_for(handle: &ServerHandle) -> RemoteEncoder {
        RemoteEncoder::new(
            ServerDescription::new("127.0.0.1", handle.address().port(), 0),
            CodecSettings::default(),
            Duration::from_secs(5),
        )
    }

    fn encode_url(handle: &ServerHandle) -> String {
        format!("http://{}{ENCODE_PATH}", handle.address())
    }

    #[test]
    fn serves_pings_and_encodes() {
        let handle = EncodeServer::bind("127.0.0.1:0", 2).unwrap().spawn().unwrap();
        let mut encoder = encoder_for(&handle);
        assert_eq!(encoder.ping().unwrap().threads, 2);

        let frame = FrameUnit::new(
            7,
            Eyes::Left,
            DcpTime::zero(),
            DecodedImage::filled(16, 8, [0, 90, 200]),
        );
        let compressed = encoder.compress(&frame).unwrap();
        assert_eq!((compressed.index, compressed.eyes), (7, Eyes::Left));
        assert_eq!(&compressed.data[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn codec_failures_are_not_retryable() {
        let handle = EncodeServer::bind("127.0.0.1:0", 1).unwrap().spawn().unwrap();
        let mut encoder = encoder_for(&handle);
        let frame = FrameUnit::new(
            0,
            Eyes::Both,
            DcpTime::zero(),
            DecodedImage::new(4, 4, vec![1, 2, 3]),
        );
        let err = encoder.compress(&frame).unwrap_err();
        assert!(matches!(err, BackendError::Codec(_)));
    }

    #[test]
    fn bodies_larger_than_the_picture_are_refused() {
        let handle = EncodeServer::bind("127.0.0.1:0", 1).unwrap().spawn().unwrap();
        let frame = FrameUnit::new(0, Eyes::Both, DcpTime::zero(), DecodedImage::black(2, 2));
        let header = EncodeRequest::for_frame(&frame, CodecSettings::default())
            .to_header()
            .unwrap();

        let response = reqwest::blocking::Client::new()
            .post(encode_url(&handle))
            .header(FRAME_HEADER, header)
            .body(vec![0u8; 64])
            .send()
            .unwrap();
        assert_eq!(response.status().as_u16(), 413);
    }

    #[test]
    fn huge_pictures_are_refused_before_reading() {
        let handle = EncodeServer::bind("127.0.0.1:0", 1).unwrap().spawn().unwrap();
        let mut frame = FrameUnit::new(0, Eyes::Both, DcpTime::zero(), DecodedImage::black(2, 2));
        frame.image.width = 100_000;
        frame.image.height = 100_000;
        let header = EncodeRequest::for_frame(&frame, CodecSettings::default())
            .to_header()
            .unwrap();

        let response = reqwest::blocking::Client::new()
            .post(encode_url(&handle))
            .header(FRAME_HEADER, header)
            .body(vec![0u8; 12])
            .send()
            .unwrap();
        assert_eq!(response.status().as_u16(), 413);
        let reply: ErrorReply = response.json().unwrap();
        assert!(reply.message.contains("byte limit"), "{}", reply.message);
    }

    #[test]
    fn requests_without_a_frame_header_are_rejected() {
        let handle = EncodeServer::bind("127.0.0.1:0", 1).unwrap().spawn().unwrap();
        let response = reqwest::blocking::Client::new()
            .post(encode_url(&handle))
            .body(vec![0u8; 12])
            .send()
            .unwrap();
        assert_eq!(response.status().as_u16(), 400);
    }

    #[test]
    fn stopped_servers_refuse_work() {
        let mut handle = EncodeServer::bind("127.0.0.1:0", 1).unwrap().spawn().unwrap();
        let encoder = encoder_for(&handle);
        assert!(encoder.is_reachable());
        handle.stop();
        assert!(!encoder.is_reachable());
    }
}
