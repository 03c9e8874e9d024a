//! Network seams of the orchestrator.
//!
//! Both traits are blocking, like the rest of the I/O in this crate; the
//! workflow runs them on tokio's blocking pool so the single-threaded core
//! keeps turning while a request is out.

use std::fmt;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use url::Url;

use super::wire::{parse_predict_response, PredictResponse, SaveRecord};
use crate::frame::EncodedFrame;

/// Multipart field the classifier reads the image from.
pub const IMAGE_FIELD: &str = "file";
const IMAGE_FILENAME: &str = "capture.jpg";

/// Any way a `/predict` round trip can fail. All of them surface to the user
/// as the communication-failure result.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClassifierError {
    Transport(String),
    Status(u16),
    Malformed(String),
}

impl fmt::Display for ClassifierError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClassifierError::Transport(detail) => write!(f, "transport error: {}", detail),
            ClassifierError::Status(code) => write!(f, "classifier returned HTTP {}", code),
            ClassifierError::Malformed(detail) => write!(f, "malformed response: {}", detail),
        }
    }
}

impl std::error::Error for ClassifierError {}

/// Remote classifier.
pub trait Classifier: Send + Sync {
    fn name(&self) -> &str;

    fn predict(&self, frame: &EncodedFrame) -> Result<PredictResponse, ClassifierError>;
}

/// Fire-and-forget log of classification events.
pub trait ResultSink: Send + Sync {
    fn save(&self, record: &SaveRecord) -> Result<()>;
}

/// Resolve `path` under `base`, keeping any path prefix `base` already has.
pub fn endpoint_url(base: &Url, path: &str) -> Result<Url> {
    let mut base = base.clone();
    if !base.path().ends_with('/') {
        let with_slash = format!("{}/", base.path());
        base.set_path(&with_slash);
    }
    base.join(path)
        .with_context(|| format!("join {} onto {}", path, base))
}

fn build_agent(timeout: Option<Duration>) -> ureq::Agent {
    let mut builder = ureq::AgentBuilder::new();
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    builder.build()
}

pub struct HttpClassifier {
    agent: ureq::Agent,
    endpoint: Url,
}

impl HttpClassifier {
    pub fn new(base: &Url, timeout: Option<Duration>) -> Result<Self> {
        Ok(Self {
            agent: build_agent(timeout),
            endpoint: endpoint_url(base, "predict")?,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

impl Classifier for HttpClassifier {
    fn name(&self) -> &str {
        self.endpoint.as_str()
    }

    fn predict(&self, frame: &EncodedFrame) -> Result<PredictResponse, ClassifierError> {
        let boundary = format!("waste-sorter-{:032x}", rand::random::<u128>());
        let body = multipart_body(&boundary, frame);
        let response = self
            .agent
            .post(self.endpoint.as_str())
            .set(
                "Content-Type",
                &format!("multipart/form-data; boundary={}", boundary),
            )
            .send_bytes(&body);

        let response = match response {
            Ok(response) => response,
            Err(ureq::Error::Status(code, _)) => return Err(ClassifierError::Status(code)),
            Err(ureq::Error::Transport(err)) => {
                return Err(ClassifierError::Transport(err.to_string()))
            }
        };
        if !(200..300).contains(&response.status()) {
            return Err(ClassifierError::Status(response.status()));
        }
        let text = response
            .into_string()
            .map_err(|e| ClassifierError::Transport(format!("read /predict body: {}", e)))?;
        parse_predict_response(&text)
    }
}

fn multipart_body(boundary: &str, frame: &EncodedFrame) -> Vec<u8> {
    let mut body = Vec::with_capacity(frame.len() + 256);
    body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
            IMAGE_FIELD, IMAGE_FILENAME
        )
        .as_bytes(),
    );
    body.extend_from_slice(format!("Content-Type: {}\r\n\r\n", frame.mime()).as_bytes());
    body.extend_from_slice(frame.bytes());
    body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());
    body
}

pub struct HttpResultSink {
    agent: ureq::Agent,
    endpoint: Url,
}

impl HttpResultSink {
    pub fn new(base: &Url, timeout: Option<Duration>) -> Result<Self> {
        Ok(Self {
            agent: build_agent(timeout),
            endpoint: endpoint_url(base, "save")?,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

impl ResultSink for HttpResultSink {
    fn save(&self, record: &SaveRecord) -> Result<()> {
        self.agent
            .post(self.endpoint.as_str())
            .send_json(record)
            .map_err(|e| anyhow!("POST {} failed: {}", self.endpoint, e))?;
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disposal::ClassSource;
    use crate::frame::VideoFrame;
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::TcpListener;
    use std::thread::JoinHandle;

    /// Serve exactly one request, then hand back what was received.
    fn one_shot_server(status: u16, body: &'static str) -> (Url, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        let handle = std::thread::spawn(move || {
            let (stream, _) = listener.accept().expect("accept");
            let mut reader = BufReader::new(stream);
            let mut head = String::new();
            let mut content_length = 0usize;
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).expect("read line");
                if let Some(value) = line.to_ascii_lowercase().strip_prefix("content-length:") {
                    content_length = value.trim().parse().expect("content length");
                }
                head.push_str(&line);
                if line == "\r\n" || line.is_empty() {
                    break;
                }
            }
            let mut payload = vec![0u8; content_length];
            reader.read_exact(&mut payload).expect("read body");
            let reply = format!(
                "HTTP/1.1 {} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            reader.get_mut().write_all(reply.as_bytes()).expect("write");
            head.push_str(&String::from_utf8_lossy(&payload));
            head
        });
        let url = Url::parse(&format!("http://{}", addr)).expect("url");
        (url, handle)
    }

    fn frame() -> EncodedFrame {
        VideoFrame::new(vec![90u8; 8 * 8 * 3], 8, 8)
            .expect("frame")
            .encode()
            .expect("encode")
    }

    #[test]
    fn endpoint_keeps_base_path() -> Result<()> {
        let plain = Url::parse("http://localhost:8000")?;
        let nested = Url::parse("http://example.test/api/v1")?;
        assert_eq!(endpoint_url(&plain, "predict")?.as_str(), "http://localhost:8000/predict");
        assert_eq!(endpoint_url(&nested, "save")?.as_str(), "http://example.test/api/v1/save");
        Ok(())
    }

    #[test]
    fn predict_posts_multipart_image() -> Result<()> {
        let (base, server) = one_shot_server(
            200,
            r#"{"detections":[{"class_id":1,"confidence":0.88,"bbox":[1,2,3,4]}]}"#,
        );
        let classifier = HttpClassifier::new(&base, Some(Duration::from_secs(5)))?;
        let response = classifier.predict(&frame()).map_err(|e| anyhow!("{}", e))?;
        assert_eq!(response.top().map(|d| d.class_id), Some(1));

        let request = server.join().map_err(|_| anyhow!("server panicked"))?;
        assert!(request.starts_with("POST /predict "));
        assert!(request.contains("multipart/form-data; boundary=waste-sorter-"));
        assert!(request.contains("name=\"file\"; filename=\"capture.jpg\""));
        assert!(request.contains("Content-Type: image/jpeg"));
        Ok(())
    }

    #[test]
    fn server_error_is_status_failure() -> Result<()> {
        let (base, server) = one_shot_server(500, r#"{"detail":"boom"}"#);
        let classifier = HttpClassifier::new(&base, Some(Duration::from_secs(5)))?;
        assert_eq!(
            classifier.predict(&frame()).err(),
            Some(ClassifierError::Status(500))
        );
        let _ = server.join();
        Ok(())
    }

    #[test]
    fn connection_refused_is_transport_failure() -> Result<()> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let addr = listener.local_addr()?;
        drop(listener);

        let base = Url::parse(&format!("http://{}", addr))?;
        let classifier = HttpClassifier::new(&base, Some(Duration::from_secs(2)))?;
        assert!(matches!(
            classifier.predict(&frame()),
            Err(ClassifierError::Transport(_))
        ));
        Ok(())
    }

    #[test]
    fn silent_server_times_out_as_transport_failure() -> Result<()> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let addr = listener.local_addr()?;
        let (done_tx, done_rx) = std::sync::mpsc::channel::<()>();
        let server = std::thread::spawn(move || {
            // Hold the connection open without answering until the client gives up.
            let accepted = listener.accept();
            let _ = done_rx.recv_timeout(Duration::from_secs(10));
            drop(accepted);
        });

        let base = Url::parse(&format!("http://{}", addr))?;
        let classifier = HttpClassifier::new(&base, Some(Duration::from_millis(300)))?;
        let outcome = classifier.predict(&frame());
        let _ = done_tx.send(());
        let _ = server.join();

        assert!(matches!(outcome, Err(ClassifierError::Transport(_))));
        Ok(())
    }

    #[test]
    fn sink_posts_json_record() -> Result<()> {
        let (base, server) = one_shot_server(200, r#"{"message":"ok"}"#);
        let sink = HttpResultSink::new(&base, Some(Duration::from_secs(5)))?;
        let record = SaveRecord {
            class_id: ClassSource::Class(2),
            item_name: "PET bottle".to_string(),
            category: "PET bottles".to_string(),
            method: "Sort as PET bottles".to_string(),
        };
        sink.save(&record)?;

        let request = server.join().map_err(|_| anyhow!("server panicked"))?;
        assert!(request.starts_with("POST /save "));
        assert!(request.contains(r#""itemName":"PET bottle""#));
        assert!(request.contains(r#""class_id":2"#));
        Ok(())
    }
}
