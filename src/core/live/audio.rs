//! Audio collaborators.
//!
//! Device capture and playback live outside this crate. These traits are the
//! contracts the session needs from them: a sink that accepts PCM buffers in
//! arrival order and can be flushed on interruption, and a source that yields
//! base64 PCM chunks and volume samples.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use super::base::LiveResult;
use super::client::LiveClient;
use super::events::{EventRegistry, ListenerId};
use super::messages::{MIC_AUDIO_MIME_TYPE, MediaChunk};

/// Playback side: receives model audio.
pub trait AudioSink: Send + Sync {
    /// Queue one PCM buffer after everything pushed before it.
    fn push_pcm(&self, pcm: &Bytes);

    /// Drop buffered audio and stop playing.
    fn stop(&self);
}

/// Wire a sink to a session: `audio` feeds the sink, `interrupted` stops it.
///
/// Returns the listener ids so the sink can be detached with `off`.
pub fn attach_audio_sink(events: &EventRegistry, sink: Arc<dyn AudioSink>) -> [ListenerId; 2] {
    let audio_sink = Arc::clone(&sink);
    let audio = events.on_audio(move |pcm| audio_sink.push_pcm(pcm));
    let interrupted = events.on_interrupted(move || sink.stop());
    [audio, interrupted]
}

/// Output of an [`AudioSource`].
#[derive(Debug, Clone, PartialEq)]
pub enum AudioSourceEvent {
    /// Base64 encoded 16 kHz PCM
    Chunk(String),
    /// Input level in `0.0..=1.0`
    Volume(f32),
}

/// Capture side: produces microphone chunks.
#[async_trait]
pub trait AudioSource: Send {
    /// Next event, or `None` once capture has stopped.
    async fn next_event(&mut self) -> Option<AudioSourceEvent>;
}

#[async_trait]
impl AudioSource for mpsc::Receiver<AudioSourceEvent> {
    async fn next_event(&mut self) -> Option<AudioSourceEvent> {
        self.recv().await
    }
}

#[async_trait]
impl AudioSource for mpsc::UnboundedReceiver<AudioSourceEvent> {
    async fn next_event(&mut self) -> Option<AudioSourceEvent> {
        self.recv().await
    }
}

/// Forward microphone chunks as `realtimeInput` frames until the source ends.
///
/// Volume samples go to `on_volume`. Stops at the first failed send, which
/// is returned.
pub async fn stream_audio_source<S, F>(
    client: &LiveClient,
    source: &mut S,
    mut on_volume: F,
) -> LiveResult<()>
where
    S: AudioSource + ?Sized,
    F: FnMut(f32),
{
    while let Some(event) = source.next_event().await {
        match event {
            AudioSourceEvent::Chunk(data) => {
                client.send_realtime_input(vec![MediaChunk::new(MIC_AUDIO_MIME_TYPE, data)])?;
            }
            AudioSourceEvent::Volume(level) => on_volume(level),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::live::base::{LiveError, SessionIdentity};
    use crate::core::live::events::LiveEvent;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        calls: Mutex<Vec<String>>,
    }

    impl AudioSink for RecordingSink {
        fn push_pcm(&self, pcm: &Bytes) {
            self.calls.lock().push(format!("pcm:{}", pcm.len()));
        }

        fn stop(&self) {
            self.calls.lock().push("stop".to_string());
        }
    }

    #[test]
    fn test_attach_audio_sink() {
        let events = EventRegistry::new();
        let sink = Arc::new(RecordingSink::default());
        let ids = attach_audio_sink(&events, sink.clone());

        events.emit_all(&[
            LiveEvent::Audio(Bytes::from_static(&[0; 4])),
            LiveEvent::Audio(Bytes::from_static(&[0; 2])),
            LiveEvent::Interrupted,
        ]);
        assert_eq!(*sink.calls.lock(), vec!["pcm:4", "pcm:2", "stop"]);

        for id in ids {
            assert!(events.off(id));
        }
        events.emit(&LiveEvent::Interrupted);
        assert_eq!(sink.calls.lock().len(), 3);
    }

    #[tokio::test]
    async fn test_stream_audio_source_reports_volume_and_stops_on_send_error() {
        let client = LiveClient::new(SessionIdentity::new("ws://127.0.0.1:9/ws").unwrap());
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.send(AudioSourceEvent::Volume(0.25)).unwrap();
        tx.send(AudioSourceEvent::Chunk("AAAA".to_string())).unwrap();
        tx.send(AudioSourceEvent::Volume(0.5)).unwrap();
        drop(tx);

        let mut levels = Vec::new();
        let result = stream_audio_source(&client, &mut rx, |v| levels.push(v)).await;

        assert!(matches!(result, Err(LiveError::NotConnected)));
        assert_eq!(levels, vec![0.25]);
    }

    #[tokio::test]
    async fn test_stream_audio_source_ends_with_source() {
        let client = LiveClient::new(SessionIdentity::new("ws://127.0.0.1:9/ws").unwrap());
        let (tx, mut rx) = mpsc::channel(4);
        tx.send(AudioSourceEvent::Volume(0.1)).await.unwrap();
        drop(tx);

        let mut count = 0;
        stream_audio_source(&client, &mut rx, |_| count += 1)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }
}
