//! Render backends
//!
//! A backend owns the device side of playback: it receives a built
//! [`RenderGraph`] and pulls audio from it on its own thread.
//!
//! - [`RodioBackend`] feeds a rodio sink on a dedicated output thread
//!   (rodio's `OutputStream` is not `Send`, so it never leaves that thread)
//! - [`OfflineBackend`] renders on demand, for tests and headless use

use std::sync::Arc;
use std::sync::mpsc::{SyncSender, sync_channel};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use rodio::cpal::traits::{DeviceTrait, HostTrait};
use rodio::{OutputStream, OutputStreamBuilder, Sink, Source};
use tokio::sync::mpsc;

use super::graph::RenderGraph;
use crate::error::AudioError;

/// Frames rendered per pull from the graph
const BLOCK_FRAMES: usize = 512;

/// Device side of the audio graph
pub trait RenderBackend: Send {
    /// Replace the graph being rendered. Rendering stays paused.
    fn connect(&mut self, graph: RenderGraph) -> Result<(), AudioError>;

    /// Begin pulling audio from the connected graph
    fn start(&mut self) -> Result<(), AudioError>;

    fn pause(&mut self);

    fn is_running(&self) -> bool;
}

/// Adapts a render graph into an endless rodio source
struct RenderSource {
    graph: RenderGraph,
    block: Vec<f32>,
    pos: usize,
}

impl RenderSource {
    fn new(graph: RenderGraph) -> Self {
        let channels = graph.format().channels as usize;
        Self {
            graph,
            block: vec![0.0; BLOCK_FRAMES * channels],
            pos: BLOCK_FRAMES * channels,
        }
    }
}

impl Iterator for RenderSource {
    type Item = f32;

    fn next(&mut self) -> Option<f32> {
        if self.pos >= self.block.len() {
            self.graph.render(&mut self.block);
            self.pos = 0;
        }
        let sample = self.block[self.pos];
        self.pos += 1;
        Some(sample)
    }
}

impl Source for RenderSource {
    fn current_span_len(&self) -> Option<usize> {
        None
    }

    fn channels(&self) -> u16 {
        self.graph.format().channels
    }

    fn sample_rate(&self) -> u32 {
        self.graph.format().sample_rate
    }

    fn total_duration(&self) -> Option<Duration> {
        None
    }
}

enum OutputCommand {
    Connect(RenderGraph),
    Play,
    Pause,
}

struct OutputThread {
    command_tx: mpsc::UnboundedSender<OutputCommand>,
    #[allow(dead_code)]
    thread_handle: JoinHandle<()>,
}

/// Plays the graph through the system output with rodio
pub struct RodioBackend {
    device_name: Option<String>,
    output: Option<OutputThread>,
    /// Graph connected before the output thread exists
    pending: Option<RenderGraph>,
    running: bool,
}

impl RodioBackend {
    /// Backend for the named output device, or the default one
    pub fn new(device_name: Option<String>) -> Self {
        Self {
            device_name,
            output: None,
            pending: None,
            running: false,
        }
    }

    /// Spawn the output thread on first use and wait until the device is open
    fn ensure_output(&mut self) -> Result<&OutputThread, AudioError> {
        if self.output.is_none() {
            let (command_tx, command_rx) = mpsc::unbounded_channel();
            let device_name = self.device_name.clone();

            let thread_handle = spawn_ready_thread("audio-output", move |ready_tx| {
                output_thread_main(device_name, ready_tx, command_rx)
            })?;

            self.output = Some(OutputThread {
                command_tx,
                thread_handle,
            });
        }

        self.output
            .as_ref()
            .ok_or_else(|| AudioError::engine_start("Output thread unavailable"))
    }

    fn send(&mut self, command: OutputCommand) -> Result<(), AudioError> {
        let output = self.ensure_output()?;
        if output.command_tx.send(command).is_err() {
            self.output = None;
            return Err(AudioError::engine_start("Output thread exited"));
        }
        Ok(())
    }
}

impl RenderBackend for RodioBackend {
    fn connect(&mut self, graph: RenderGraph) -> Result<(), AudioError> {
        self.running = false;
        match &self.output {
            Some(output) => {
                if let Err(mpsc::error::SendError(OutputCommand::Connect(graph))) =
                    output.command_tx.send(OutputCommand::Connect(graph))
                {
                    // The thread died; keep the graph for the next start
                    self.output = None;
                    self.pending = Some(graph);
                }
            }
            None => self.pending = Some(graph),
        }
        Ok(())
    }

    fn start(&mut self) -> Result<(), AudioError> {
        if let Some(graph) = self.pending.take() {
            self.send(OutputCommand::Connect(graph))?;
        }
        self.send(OutputCommand::Play)?;
        self.running = true;
        Ok(())
    }

    fn pause(&mut self) {
        if let Some(output) = &self.output {
            let _ = output.command_tx.send(OutputCommand::Pause);
        }
        self.running = false;
    }

    fn is_running(&self) -> bool {
        self.running
    }
}

/// Reports whether a worker thread came up
pub(crate) type ReadySender = SyncSender<Result<(), String>>;

/// Spawn a named worker thread and block until it reports readiness
///
/// The handshake is a std channel, so this may be called from a thread that
/// is driving a tokio runtime.
pub(crate) fn spawn_ready_thread<F>(name: &str, body: F) -> Result<JoinHandle<()>, AudioError>
where
    F: FnOnce(ReadySender) + Send + 'static,
{
    let (ready_tx, ready_rx) = sync_channel(1);
    let thread_handle = thread::Builder::new()
        .name(name.to_string())
        .spawn(move || body(ready_tx))
        .map_err(|e| {
            AudioError::engine_start(format!("Failed to spawn {} thread: {}", name, e))
        })?;

    match ready_rx.recv() {
        Ok(Ok(())) => Ok(thread_handle),
        Ok(Err(e)) => Err(AudioError::engine_start(e)),
        Err(_) => Err(AudioError::engine_start(format!("{} thread exited", name))),
    }
}

fn output_thread_main(
    device_name: Option<String>,
    ready_tx: ReadySender,
    mut command_rx: mpsc::UnboundedReceiver<OutputCommand>,
) {
    let stream = match open_stream(device_name.as_deref()) {
        Ok(stream) => {
            let _ = ready_tx.send(Ok(()));
            stream
        }
        Err(e) => {
            tracing::error!("Failed to open audio output: {}", e);
            let _ = ready_tx.send(Err(e));
            return;
        }
    };
    tracing::info!("Audio output thread started");

    let mut sink: Option<Sink> = None;
    while let Some(command) = command_rx.blocking_recv() {
        match command {
            OutputCommand::Connect(graph) => {
                if let Some(old) = sink.take() {
                    old.stop();
                }
                let new_sink = Sink::connect_new(stream.mixer());
                new_sink.pause();
                new_sink.append(RenderSource::new(graph));
                sink = Some(new_sink);
            }
            OutputCommand::Play => {
                if let Some(sink) = &sink {
                    sink.play();
                }
            }
            OutputCommand::Pause => {
                if let Some(sink) = &sink {
                    sink.pause();
                }
            }
        }
    }

    tracing::info!("Audio output thread exiting");
}

fn open_stream(device_name: Option<&str>) -> Result<OutputStream, String> {
    match device_name {
        Some(name) => create_stream_for_device(name),
        None => OutputStreamBuilder::open_default_stream()
            .map_err(|e| format!("Failed to create audio output: {}", e)),
    }
}

/// Create output stream for a specific device by name
fn create_stream_for_device(device_name: &str) -> Result<OutputStream, String> {
    let host = rodio::cpal::default_host();

    let device = host
        .output_devices()
        .map_err(|e| format!("Failed to enumerate devices: {}", e))?
        .find(|d| d.name().map(|n| n == device_name).unwrap_or(false))
        .ok_or_else(|| format!("Device not found: {}", device_name))?;

    let config = device
        .default_output_config()
        .map_err(|e| format!("Failed to get device config: {}", e))?;

    OutputStreamBuilder::from_device(device)
        .map_err(|e| format!("Failed to create stream builder: {}", e))?
        .with_sample_rate(config.sample_rate().0)
        .open_stream()
        .map_err(|e| format!("Failed to open stream: {}", e))
}

/// Renders the graph only when asked to
///
/// Clones share one backend, so a test can keep a handle after giving the
/// backend to the graph.
#[derive(Clone, Default)]
pub struct OfflineBackend {
    inner: Arc<Mutex<OfflineInner>>,
}

#[derive(Default)]
struct OfflineInner {
    graph: Option<RenderGraph>,
    running: bool,
    fail_next_start: bool,
    starts: usize,
}

impl OfflineBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `start` fail with an engine error
    pub fn fail_next_start(&self) {
        self.inner.lock().fail_next_start = true;
    }

    /// Number of successful starts so far
    pub fn starts(&self) -> usize {
        self.inner.lock().starts
    }

    /// Pull `frames` frames from the graph. A paused backend yields silence
    /// without advancing the graph.
    pub fn render(&self, frames: usize) -> Vec<f32> {
        let mut inner = self.inner.lock();
        let running = inner.running;
        let Some(graph) = inner.graph.as_mut() else {
            return Vec::new();
        };

        let mut out = vec![0.0; frames * graph.format().channels as usize];
        if running {
            graph.render(&mut out);
        }
        out
    }
}

impl RenderBackend for OfflineBackend {
    fn connect(&mut self, graph: RenderGraph) -> Result<(), AudioError> {
        let mut inner = self.inner.lock();
        inner.running = false;
        let old = inner.graph.replace(graph);
        drop(inner);
        // The old graph fires pending completions as it drops
        drop(old);
        Ok(())
    }

    fn start(&mut self) -> Result<(), AudioError> {
        let mut inner = self.inner.lock();
        if std::mem::take(&mut inner.fail_next_start) {
            return Err(AudioError::engine_start("Offline backend refused to start"));
        }
        if inner.graph.is_none() {
            return Err(AudioError::engine_start("No graph connected"));
        }
        inner.running = true;
        inner.starts += 1;
        Ok(())
    }

    fn pause(&mut self) {
        self.inner.lock().running = false;
    }

    fn is_running(&self) -> bool {
        self.inner.lock().running
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offline_render_without_graph_is_empty() {
        let backend = OfflineBackend::new();
        assert!(backend.render(16).is_empty());
    }

    #[test]
    fn test_offline_start_needs_graph() {
        let mut backend = OfflineBackend::new();
        assert!(backend.start().is_err());
        assert!(!backend.is_running());
    }

    #[test]
    fn test_ready_thread_reports_failure() {
        let result = spawn_ready_thread("test-worker", |ready_tx| {
            let _ = ready_tx.send(Err("no device".to_string()));
        });
        assert!(matches!(result, Err(AudioError::EngineStart(msg)) if msg == "no device"));
    }

    #[test]
    fn test_ready_thread_exit_without_report_is_an_error() {
        let result = spawn_ready_thread("test-worker", |_ready_tx| {});
        assert!(result.is_err());
    }

    #[test]
    fn test_ready_thread_handshake_inside_runtime() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        let joined = runtime.block_on(async {
            spawn_ready_thread("test-worker", |ready_tx| {
                let _ = ready_tx.send(Ok(()));
            })
        });
        joined.unwrap().join().unwrap();
    }

    #[test]
    fn test_rodio_backend_starts_paused() {
        let backend = RodioBackend::new(None);
        assert!(!backend.is_running());
    }
}
