use std::sync::{Arc, Mutex};

use presence_core::{DetectorError, FaceDetector, FaceObservation};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::task::JoinHandle;

#[derive(Debug, Default)]
struct FeedState {
    latest: Option<FaceObservation>,
    closed: bool,
    malformed: u64,
}

impl FeedState {
    /// Apply one input line. Blank lines are ignored; `null` clears the face.
    fn apply_line(&mut self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        match serde_json::from_str::<Option<FaceObservation>>(line) {
            Ok(observation) => self.latest = observation,
            Err(e) => {
                self.malformed += 1;
                tracing::warn!(error = %e, "skipping malformed detector line");
            }
        }
    }
}

/// Face detector fed by newline-delimited JSON `FaceObservation`s.
///
/// A background task reads the stream and keeps only the most recent
/// observation; each `detect` call returns that snapshot.
pub struct JsonLinesDetector {
    state: Arc<Mutex<FeedState>>,
    reader: JoinHandle<()>,
}

impl JsonLinesDetector {
    /// Start reading `input` on a tokio task.
    pub fn spawn<R>(input: R) -> Self
    where
        R: AsyncBufRead + Unpin + Send + 'static,
    {
        let state = Arc::new(Mutex::new(FeedState::default()));
        let reader = tokio::spawn(read_lines(input, Arc::clone(&state)));
        Self { state, reader }
    }

    /// True once the input stream has ended.
    pub fn is_closed(&self) -> bool {
        self.state.lock().map(|s| s.closed).unwrap_or(true)
    }

    /// Number of lines that failed to parse.
    pub fn malformed_lines(&self) -> u64 {
        self.state.lock().map(|s| s.malformed).unwrap_or(0)
    }
}

impl Drop for JsonLinesDetector {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

impl FaceDetector for JsonLinesDetector {
    async fn detect(&mut self) -> Result<Option<FaceObservation>, DetectorError> {
        let state = self
            .state
            .lock()
            .map_err(|_| DetectorError::Unavailable("feed state poisoned".into()))?;
        if state.closed && state.latest.is_none() {
            return Err(DetectorError::Unavailable("detector feed closed".into()));
        }
        Ok(state.latest.clone())
    }
}

async fn read_lines<R>(input: R, state: Arc<Mutex<FeedState>>)
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if let Ok(mut s) = state.lock() {
                    s.apply_line(&line);
                }
            }
            Ok(None) => {
                tracing::info!("detector feed reached end of input");
                break;
            }
            Err(e) => {
                tracing::error!(error = %e, "detector feed read failed");
                break;
            }
        }
    }
    if let Ok(mut s) = state.lock() {
        s.closed = true;
        s.latest = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncWriteExt, BufReader};

    const FACE: &str = r#"{"face":{"x":100.0,"y":80.0,"width":200.0,"height":200.0},"frame":{"width":640,"height":480},"descriptor":[0.1,0.2,0.3],"captured_at":"2026-03-02T09:00:00Z"}"#;

    #[test]
    fn test_line_sets_latest_observation() {
        let mut state = FeedState::default();
        state.apply_line(FACE);
        let obs = state.latest.as_ref().unwrap();
        assert_eq!(obs.face.width, 200.0);
        assert_eq!(obs.frame.width, 640);
        assert_eq!(obs.descriptor.values, vec![0.1, 0.2, 0.3]);
        assert!(obs.eyes.is_none());
    }

    #[test]
    fn test_null_clears_observation() {
        let mut state = FeedState::default();
        state.apply_line(FACE);
        state.apply_line("null");
        assert!(state.latest.is_none());
    }

    #[test]
    fn test_malformed_line_keeps_previous() {
        let mut state = FeedState::default();
        state.apply_line(FACE);
        state.apply_line("{not json");
        state.apply_line("   ");
        assert!(state.latest.is_some());
        assert_eq!(state.malformed, 1);
    }

    async fn wait_for(mut check: impl FnMut() -> bool) {
        for _ in 0..100 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_detect_returns_latest_from_stream() {
        let (mut writer, reader) = tokio::io::duplex(4096);
        let mut detector = JsonLinesDetector::spawn(BufReader::new(reader));

        assert!(detector.detect().await.unwrap().is_none());

        writer.write_all(FACE.as_bytes()).await.unwrap();
        writer.write_all(b"\n").await.unwrap();
        wait_for(|| detector.state.lock().unwrap().latest.is_some()).await;
        assert!(detector.detect().await.unwrap().is_some());

        writer.write_all(b"null\n").await.unwrap();
        wait_for(|| detector.state.lock().unwrap().latest.is_none()).await;
        assert!(detector.detect().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_closed_feed_reports_unavailable() {
        let input = format!("{FACE}\n");
        let mut detector = JsonLinesDetector::spawn(BufReader::new(std::io::Cursor::new(
            input.into_bytes(),
        )));

        wait_for(|| detector.is_closed()).await;
        assert!(matches!(
            detector.detect().await,
            Err(DetectorError::Unavailable(_))
        ));
        assert_eq!(detector.malformed_lines(), 0);
    }
}
