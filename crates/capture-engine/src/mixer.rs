//! Audio mixing graph.
//!
//! Each input track feeds a source node (a bounded sample queue). One
//! destination node pulls a fixed quantum from every queue on a timer, sums
//! and clamps the samples, and emits the result on a single output track.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use classcast_platform_core::{AudioChunk, MediaStream, MediaTrack, CHANNELS, SAMPLE_RATE};
use parking_lot::Mutex;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

/// Length of one mixing quantum.
pub const QUANTUM: Duration = Duration::from_millis(10);

/// Sample frames per quantum at the pipeline rate.
pub const QUANTUM_FRAMES: usize = (SAMPLE_RATE as usize) / 100;

/// Samples a source node keeps before dropping the oldest (one second).
const NODE_CAPACITY: usize = SAMPLE_RATE as usize * CHANNELS as usize;

type NodeQueue = Arc<Mutex<VecDeque<f32>>>;

/// A running mixing graph.
///
/// With zero inputs no graph is built and [`AudioMixer::output`] is `None`;
/// consumers must accept a stream without an audio track. Once built, the
/// output track lives until [`AudioMixer::close`], however often the inputs
/// are swapped with [`AudioMixer::set_inputs`].
pub struct AudioMixer {
    output: Option<MediaTrack>,
    queues: Arc<Mutex<Vec<NodeQueue>>>,
    nodes: Mutex<Vec<JoinHandle<()>>>,
    destination: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
    inputs: AtomicUsize,
}

impl AudioMixer {
    /// Build and start the graph. Must be called inside a tokio runtime.
    pub fn mix(inputs: &[MediaTrack]) -> Self {
        let inputs = audio_only(inputs);
        let mut mixer = Self {
            output: None,
            queues: Arc::new(Mutex::new(Vec::new())),
            nodes: Mutex::new(Vec::new()),
            destination: Mutex::new(None),
            closed: AtomicBool::new(false),
            inputs: AtomicUsize::new(0),
        };
        if inputs.is_empty() {
            tracing::info!("No audio inputs; mixer produces no track");
            return mixer;
        }

        let output = MediaTrack::new_audio("mixed audio");
        mixer.attach(&inputs);
        *mixer.destination.get_mut() = Some(tokio::spawn(run_destination(
            output.clone(),
            mixer.queues.clone(),
        )));
        tracing::info!(inputs = inputs.len(), track = %output.id(), "Audio mixer started");
        mixer.output = Some(output);
        mixer
    }

    /// Replace every source node with nodes for `inputs`. The output track
    /// is kept; with no inputs left it carries silence.
    ///
    /// Returns `false` when there is no graph to rewire (closed, or built
    /// without inputs).
    pub fn set_inputs(&self, inputs: &[MediaTrack]) -> bool {
        if self.is_closed() || self.output.is_none() {
            return false;
        }
        let inputs = audio_only(inputs);
        self.attach(&inputs);
        tracing::info!(inputs = inputs.len(), "Audio mixer inputs replaced");
        true
    }

    fn attach(&self, inputs: &[MediaTrack]) {
        let mut nodes = self.nodes.lock();
        for node in nodes.drain(..) {
            node.abort();
        }
        let mut queues = Vec::with_capacity(inputs.len());
        for input in inputs {
            let queue: NodeQueue = Arc::new(Mutex::new(VecDeque::with_capacity(NODE_CAPACITY)));
            queues.push(queue.clone());
            nodes.push(tokio::spawn(run_source_node(input.clone(), queue)));
        }
        *self.queues.lock() = queues;
        self.inputs.store(inputs.len(), Ordering::SeqCst);
    }

    /// The mixed track, if any input existed.
    pub fn output(&self) -> Option<&MediaTrack> {
        self.output.as_ref()
    }

    /// The mixed track as a stream (zero or one audio track).
    pub fn output_stream(&self) -> MediaStream {
        MediaStream::from_tracks(self.output.iter().cloned())
    }

    pub fn input_count(&self) -> usize {
        self.inputs.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Tear the graph down. Safe to call repeatedly; only the first call
    /// does anything and returns `true`. Input tracks are not stopped.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        for node in self.nodes.lock().drain(..) {
            node.abort();
        }
        if let Some(destination) = self.destination.lock().take() {
            destination.abort();
        }
        if let Some(output) = &self.output {
            output.stop();
        }
        tracing::info!("Audio mixer closed");
        true
    }
}

impl Drop for AudioMixer {
    fn drop(&mut self) {
        self.close();
    }
}

fn audio_only(tracks: &[MediaTrack]) -> Vec<MediaTrack> {
    tracks
        .iter()
        .filter(|t| t.subscribe_audio().is_some())
        .cloned()
        .collect()
}

async fn run_source_node(input: MediaTrack, queue: NodeQueue) {
    let Some(mut rx) = input.subscribe_audio() else {
        return;
    };
    loop {
        tokio::select! {
            received = rx.recv() => match received {
                Ok(chunk) => {
                    let samples = chunk.to_stereo();
                    let mut q = queue.lock();
                    q.extend(samples);
                    let excess = q.len().saturating_sub(NODE_CAPACITY);
                    if excess > 0 {
                        q.drain(..excess);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(track = %input.id(), skipped, "Mixer input lagged");
                }
                Err(RecvError::Closed) => break,
            },
            _ = input.ended() => break,
        }
    }
    tracing::debug!(track = %input.id(), "Mixer input detached");
}

async fn run_destination(output: MediaTrack, queues: Arc<Mutex<Vec<NodeQueue>>>) {
    let mut interval = tokio::time::interval(QUANTUM);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut emitted: u64 = 0;

    loop {
        interval.tick().await;
        let samples = mix_quantum(&queues.lock(), QUANTUM_FRAMES);
        let timestamp_ns = emitted * QUANTUM.as_nanos() as u64;
        if !output.push_audio(AudioChunk::new(samples, SAMPLE_RATE, CHANNELS, timestamp_ns)) {
            break;
        }
        emitted += 1;
    }
}

/// Pull up to `frames` stereo frames from every queue, sum, and clamp.
/// Queues that run short contribute silence for the remainder.
pub fn mix_quantum(queues: &[NodeQueue], frames: usize) -> Vec<f32> {
    let len = frames * CHANNELS as usize;
    let mut out = vec![0.0f32; len];
    for queue in queues {
        let mut q = queue.lock();
        let take = q.len().min(len);
        for (slot, sample) in out.iter_mut().zip(q.drain(..take)) {
            *slot += sample;
        }
    }
    for sample in &mut out {
        *sample = sample.clamp(-1.0, 1.0);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue(samples: &[f32]) -> NodeQueue {
        Arc::new(Mutex::new(samples.iter().copied().collect()))
    }

    #[test]
    fn test_quantum_sums_and_clamps() {
        let a = queue(&[0.5, 0.5, 0.9, -0.9]);
        let b = queue(&[0.25, -0.25, 0.5, -0.5]);
        let out = mix_quantum(&[a.clone(), b], 2);
        assert_eq!(out, vec![0.75, 0.25, 1.0, -1.0]);
        assert!(a.lock().is_empty());
    }

    #[test]
    fn test_short_queue_pads_with_silence() {
        let a = queue(&[0.5, 0.5]);
        let out = mix_quantum(&[a], 2);
        assert_eq!(out, vec![0.5, 0.5, 0.0, 0.0]);
    }

    #[tokio::test]
    async fn test_zero_inputs_yield_no_track() {
        let mixer = AudioMixer::mix(&[]);
        assert!(mixer.output().is_none());
        assert_eq!(mixer.output_stream().audio_tracks().count(), 0);
        assert!(mixer.close());
        assert!(!mixer.close());
    }

    #[tokio::test]
    async fn test_video_tracks_are_ignored() {
        let mixer = AudioMixer::mix(&[MediaTrack::new_video("cam")]);
        assert_eq!(mixer.input_count(), 0);
        assert!(mixer.output().is_none());
    }

    #[tokio::test]
    async fn test_inputs_are_mixed_into_one_track() {
        let mic = MediaTrack::new_audio("mic");
        let system = MediaTrack::new_audio("system");
        let mixer = AudioMixer::mix(&[mic.clone(), system.clone()]);
        let output = mixer.output().unwrap().clone();
        let mut rx = output.subscribe_audio().unwrap();

        // Let the source nodes subscribe before feeding them.
        tokio::time::sleep(Duration::from_millis(5)).await;
        for _ in 0..5 {
            mic.push_audio(AudioChunk::new(vec![0.25; 960], SAMPLE_RATE, 2, 0));
            system.push_audio(AudioChunk::new(vec![0.5; 480], SAMPLE_RATE, 1, 0));
        }

        let heard = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let chunk = rx.recv().await.unwrap();
                if chunk.peak() > 0.7 {
                    return chunk;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(heard.channels, 2);
        assert_eq!(heard.frames(), QUANTUM_FRAMES);

        assert!(mixer.close());
        assert!(!output.is_live());
        assert!(mic.is_live(), "closing the mixer must not stop its inputs");
        assert!(!mixer.close());
    }

    #[tokio::test]
    async fn test_set_inputs_keeps_the_output_track() {
        let old = MediaTrack::new_audio("old mic");
        let mixer = AudioMixer::mix(&[old.clone()]);
        let output = mixer.output().unwrap().clone();

        old.end();
        let fresh = MediaTrack::new_audio("new mic");
        assert!(mixer.set_inputs(&[fresh.clone()]));
        assert_eq!(mixer.input_count(), 1);
        assert!(mixer.output().unwrap().same_track(&output));
        assert!(output.is_live());

        let mut rx = output.subscribe_audio().unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        for _ in 0..5 {
            fresh.push_audio(AudioChunk::new(vec![0.5; 960], SAMPLE_RATE, 2, 0));
        }
        let heard = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let chunk = rx.recv().await.unwrap();
                if chunk.peak() > 0.4 {
                    return chunk;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(heard.frames(), QUANTUM_FRAMES);

        // No inputs left: the track stays up and carries silence.
        assert!(mixer.set_inputs(&[]));
        assert_eq!(mixer.input_count(), 0);
        assert!(output.is_live());

        mixer.close();
        assert!(!mixer.set_inputs(&[fresh]));
    }

    #[tokio::test]
    async fn test_set_inputs_needs_a_graph() {
        let mixer = AudioMixer::mix(&[]);
        assert!(!mixer.set_inputs(&[MediaTrack::new_audio("mic")]));
        assert!(mixer.output().is_none());
    }
}
