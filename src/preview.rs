//! Live preview server.
//!
//! Serves the latest annotated frame as `/frame.jpg` and a continuous MJPEG
//! stream at `/stream.mjpg` over plain HTTP. Runs on a dedicated thread with
//! a nonblocking accept loop so pipeline shutdown is never gated on a client.

use anyhow::{anyhow, Result};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::config::PreviewSettings;

const MAX_REQUEST_BYTES: usize = 4096;
const BOUNDARY: &str = "platewatchframe";
const STREAM_FRAME_INTERVAL: Duration = Duration::from_millis(33);

/// Latest annotated frame, JPEG-encoded. Written by the coordinator,
/// read by the preview connections.
pub type SharedPreviewFrame = Arc<Mutex<Option<Vec<u8>>>>;

pub fn shared_preview_frame() -> SharedPreviewFrame {
    Arc::new(Mutex::new(None))
}

#[derive(Debug)]
pub struct PreviewHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl PreviewHandle {
    pub fn stop(mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

/// Bind the preview listener and spawn the accept loop.
pub fn spawn(settings: &PreviewSettings, latest: SharedPreviewFrame) -> Result<PreviewHandle> {
    let configured_addr: SocketAddr = settings
        .addr
        .parse()
        .map_err(|_| anyhow!("invalid preview address '{}'", settings.addr))?;
    let listener = TcpListener::bind(configured_addr)?;
    let addr = listener.local_addr()?;
    listener.set_nonblocking(true)?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_thread = shutdown.clone();
    let join = std::thread::Builder::new()
        .name("preview-server".into())
        .spawn(move || run_server(listener, latest, shutdown_thread))
        .map_err(|e| anyhow!("failed to spawn preview server thread: {e}"))?;

    Ok(PreviewHandle {
        addr,
        shutdown,
        join: Some(join),
    })
}

fn run_server(listener: TcpListener, latest: SharedPreviewFrame, shutdown: Arc<AtomicBool>) {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, _)) => {
                let latest = latest.clone();
                let shutdown = shutdown.clone();
                let spawned = std::thread::Builder::new()
                    .name("preview-conn".into())
                    .spawn(move || {
                        if let Err(err) = handle_connection(stream, latest, shutdown) {
                            log::debug!("preview connection closed: {}", err);
                        }
                    });
                if let Err(err) = spawned {
                    log::warn!("failed to spawn preview connection thread: {}", err);
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
            }
            Err(err) => {
                log::error!("preview listener failed: {}", err);
                break;
            }
        }
    }
}

fn handle_connection(
    mut stream: TcpStream,
    latest: SharedPreviewFrame,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    stream.set_read_timeout(Some(Duration::from_millis(500)))?;
    let (method, path) = read_request(&mut stream)?;
    if method != "GET" {
        return write_simple(&mut stream, 405, "method not allowed");
    }

    match path.as_str() {
        "/health" => write_simple(&mut stream, 200, "ok"),
        "/frame.jpg" => {
            let frame = latest.lock().map_err(|_| anyhow!("preview frame lock poisoned"))?.clone();
            match frame {
                Some(jpeg) => write_jpeg_response(&mut stream, &jpeg),
                None => write_simple(&mut stream, 404, "no frame yet"),
            }
        }
        "/" | "/stream.mjpg" => stream_mjpeg(&mut stream, latest, shutdown),
        _ => write_simple(&mut stream, 404, "not found"),
    }
}

fn stream_mjpeg(
    stream: &mut TcpStream,
    latest: SharedPreviewFrame,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    write!(
        stream,
        "HTTP/1.1 200 OK\r\nContent-Type: multipart/x-mixed-replace; boundary={BOUNDARY}\r\nCache-Control: no-cache\r\nConnection: close\r\n\r\n"
    )?;

    while !shutdown.load(Ordering::SeqCst) {
        let frame = latest.lock().map_err(|_| anyhow!("preview frame lock poisoned"))?.clone();
        if let Some(jpeg) = frame {
            write!(
                stream,
                "--{BOUNDARY}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
                jpeg.len()
            )?;
            stream.write_all(&jpeg)?;
            stream.write_all(b"\r\n")?;
            stream.flush()?;
        }
        std::thread::sleep(STREAM_FRAME_INTERVAL);
    }
    Ok(())
}

fn read_request(stream: &mut TcpStream) -> Result<(String, String)> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 512];
    loop {
        let n = stream.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.len() > MAX_REQUEST_BYTES {
            return Err(anyhow!("request too large"));
        }
        if buf.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    let text = String::from_utf8_lossy(&buf);
    let mut parts = text.lines().next().unwrap_or_default().split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("empty request"))?;
    let path = parts.next().ok_or_else(|| anyhow!("missing request path"))?;
    Ok((method.to_string(), path.to_string()))
}

fn write_simple(stream: &mut TcpStream, status: u16, body: &str) -> Result<()> {
    let reason = match status {
        200 => "OK",
        404 => "Not Found",
        405 => "Method Not Allowed",
        _ => "Error",
    };
    write!(
        stream,
        "HTTP/1.1 {status} {reason}\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    )?;
    Ok(())
}

fn write_jpeg_response(stream: &mut TcpStream, jpeg: &[u8]) -> Result<()> {
    write!(
        stream,
        "HTTP/1.1 200 OK\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        jpeg.len()
    )?;
    stream.write_all(jpeg)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PreviewSettings;
    use std::io::Read;

    fn settings() -> PreviewSettings {
        PreviewSettings {
            enabled: true,
            // Port 0 lets the OS pick a free port.
            addr: "127.0.0.1:0".to_string(),
        }
    }

    #[test]
    fn serves_latest_frame() {
        let latest = shared_preview_frame();
        *latest.lock().unwrap() = Some(vec![0xFF, 0xD8, 0xFF, 0xD9]);
        let handle = spawn(&settings(), latest).expect("spawn preview");

        let mut stream = TcpStream::connect(handle.addr).expect("connect");
        stream
            .write_all(b"GET /frame.jpg HTTP/1.1\r\nHost: test\r\n\r\n")
            .unwrap();
        let mut response = Vec::new();
        stream.read_to_end(&mut response).unwrap();
        let text = String::from_utf8_lossy(&response);
        assert!(text.starts_with("HTTP/1.1 200 OK"));
        assert!(response.ends_with(&[0xFF, 0xD8, 0xFF, 0xD9]));

        handle.stop();
    }

    #[test]
    fn missing_frame_is_not_found() {
        let handle = spawn(&settings(), shared_preview_frame()).expect("spawn preview");

        let mut stream = TcpStream::connect(handle.addr).expect("connect");
        stream
            .write_all(b"GET /frame.jpg HTTP/1.1\r\nHost: test\r\n\r\n")
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).unwrap();
        assert!(response.starts_with("HTTP/1.1 404"));

        handle.stop();
    }
}
