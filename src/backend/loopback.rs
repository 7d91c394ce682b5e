//! Software backend that "decodes" raw interleaved PCM.
//!
//! The loopback backend honors the full asynchronous contract: input is
//! queued in a bounded ring buffer, a worker thread owned by the module
//! drains it and delivers events from that thread, a full queue answers
//! [`ProcessStatus::NotReady`] and is followed by a
//! [`ModuleEvent::SendInputBuffer`] once space is free again.
//!
//! It serves the `pcm` input of the binary and drives the integration tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

use crate::backend::{
    BackendLibrary, BackendLoader, BackendModule, BackendSession, DecodedBuffer, InputBuffer,
    ModuleCallback, ModuleConfig, ModuleEvent, ProcessStatus, SessionCallback, SessionEvent,
};
use crate::config::{
    CompressionFormat, OutputConfig, SessionKind, LOOPBACK_LIBRARY, MAX_OUTPUT_CHANNELS,
};
use crate::error::{BackendFault, BackendStage, ConfigError};
use crate::format::{ChannelPosition, InputFormat, OutputFormat, MAX_BIT_WIDTH};
use crate::source::PcmParameters;

/// Loopback library version, 1.0.0.
const LOOPBACK_VERSION: u32 = 0x0001_0000;

/// Behavior of the loopback backend.
#[derive(Debug, Clone)]
pub struct LoopbackOptions {
    /// Input queue size in bytes.
    ///
    /// Default: 64 KiB
    pub input_capacity: usize,

    /// Most bytes taken by a single `process` call.
    ///
    /// Default: `None` (as much as the queue has room for)
    pub max_consume: Option<usize>,

    /// Sample rate of the PCM input.
    pub sample_rate: u32,

    /// Bits per sample of the PCM input.
    pub bit_width: u16,

    /// Channel positions of the PCM input, in sample order.
    pub channel_map: Vec<ChannelPosition>,

    /// Announce the sample rate in output configs. When `false` outputs
    /// report `0` and inherit the input rate.
    ///
    /// Default: `true`
    pub report_output_rate: bool,

    /// Deliver outputs as planar blocks instead of interleaved frames.
    ///
    /// Default: `false`
    pub planar: bool,

    /// Frames per delivered data block.
    ///
    /// Default: 256
    pub block_frames: usize,

    /// Deliver the EOS event twice.
    ///
    /// Default: `false`
    pub repeat_eos: bool,

    /// Fail the given lifecycle step.
    ///
    /// Default: `None`
    pub fail_at: Option<BackendStage>,
}

impl Default for LoopbackOptions {
    fn default() -> Self {
        Self {
            input_capacity: 64 * 1024,
            max_consume: None,
            sample_rate: 48000,
            bit_width: 16,
            channel_map: vec![ChannelPosition::L, ChannelPosition::R],
            report_output_rate: true,
            planar: false,
            block_frames: 256,
            repeat_eos: false,
            fail_at: None,
        }
    }
}

impl LoopbackOptions {
    /// Options for a PCM input with the canonical layout of its channel
    /// count: mono is centre, more channels follow L R C LFE Ls Rs Lb Rb.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnsupportedPcmLayout`] for zero or more than
    /// eight channels, or a bit width the container cannot carry.
    pub fn for_pcm(pcm: PcmParameters) -> Result<Self, ConfigError> {
        use ChannelPosition::{Lb, Lfe, Ls, Rb, Rs, C, L, R};

        let channels_ok = (1..=u16::from(MAX_OUTPUT_CHANNELS)).contains(&pcm.channels);
        let bits_ok = pcm.bit_width % 8 == 0 && (8..=MAX_BIT_WIDTH).contains(&pcm.bit_width);
        if !channels_ok || !bits_ok {
            return Err(ConfigError::UnsupportedPcmLayout {
                channels: pcm.channels,
                bits: pcm.bit_width,
            });
        }

        let channel_map = if pcm.channels == 1 {
            vec![C]
        } else {
            [L, R, C, Lfe, Ls, Rs, Lb, Rb]
                .into_iter()
                .take(usize::from(pcm.channels))
                .collect()
        };
        Ok(Self {
            sample_rate: pcm.sample_rate,
            bit_width: pcm.bit_width,
            channel_map,
            ..Self::default()
        })
    }

    fn check(&self, stage: BackendStage) -> Result<(), BackendFault> {
        if self.fail_at == Some(stage) {
            return Err(BackendFault::new(format!("injected {stage} failure")));
        }
        Ok(())
    }

    fn sample_size(&self) -> usize {
        usize::from(self.bit_width / 8)
    }

    fn frame_size(&self) -> usize {
        self.channel_map.len() * self.sample_size()
    }
}

/// Loader for the loopback library ([`LOOPBACK_LIBRARY`]).
///
/// # Example
///
/// ```
/// use stream_decode::backend::{BackendLoader, LoopbackLoader, LoopbackOptions};
/// use stream_decode::config::LOOPBACK_LIBRARY;
///
/// let loader = LoopbackLoader::new(LoopbackOptions::default());
/// assert!(loader.load(LOOPBACK_LIBRARY).is_ok());
/// assert!(loader.load("libdts_m8_wrapper.so").is_err());
/// ```
#[derive(Debug, Clone)]
pub struct LoopbackLoader {
    options: LoopbackOptions,
    live: Arc<AtomicUsize>,
}

impl LoopbackLoader {
    /// Creates a loader with the given options.
    pub fn new(options: LoopbackOptions) -> Self {
        Self {
            options,
            live: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Library, session and module handles not yet released.
    pub fn live_handles(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

impl BackendLoader for LoopbackLoader {
    fn load(&self, name: &str) -> Result<Box<dyn BackendLibrary>, BackendFault> {
        if name != LOOPBACK_LIBRARY {
            return Err(BackendFault::new(format!("cannot open {name}")));
        }
        self.options.check(BackendStage::LoadLibrary)?;

        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(LoopbackLibrary {
            options: self.options.clone(),
            live: Arc::clone(&self.live),
        }))
    }
}

struct LoopbackLibrary {
    options: LoopbackOptions,
    live: Arc<AtomicUsize>,
}

impl BackendLibrary for LoopbackLibrary {
    fn name(&self) -> &str {
        LOOPBACK_LIBRARY
    }

    fn version(&self) -> u32 {
        LOOPBACK_VERSION
    }

    fn open_session(
        &mut self,
        kind: SessionKind,
        callback: SessionCallback,
    ) -> Result<Box<dyn BackendSession>, BackendFault> {
        self.options.check(BackendStage::OpenSession)?;

        tracing::debug!(?kind, "loopback session opened");
        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(LoopbackSession {
            options: self.options.clone(),
            callback,
            outputs: Vec::new(),
            live: Arc::clone(&self.live),
        }))
    }

    fn unload(self: Box<Self>) -> Result<(), BackendFault> {
        self.live.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

struct LoopbackSession {
    options: LoopbackOptions,
    callback: SessionCallback,
    outputs: Vec<OutputConfig>,
    live: Arc<AtomicUsize>,
}

impl BackendSession for LoopbackSession {
    fn configure_outputs(&mut self, outputs: &[OutputConfig]) -> Result<(), BackendFault> {
        self.options.check(BackendStage::ConfigureOutputs)?;
        self.outputs = outputs.to_vec();
        Ok(())
    }

    fn set_kv_pairs(&mut self, kv_pairs: &str) -> Result<(), BackendFault> {
        self.options.check(BackendStage::SetKvPairs)?;
        tracing::debug!(kv_pairs, "loopback ignores kvpairs");
        Ok(())
    }

    fn init_module(
        &mut self,
        config: &ModuleConfig,
        callback: ModuleCallback,
    ) -> Result<Box<dyn BackendModule>, BackendFault> {
        self.options.check(BackendStage::InitModule)?;
        if config.format != CompressionFormat::Pcm {
            return Err(BackendFault::new(format!(
                "loopback cannot decode {}",
                config.format
            )));
        }
        if self.options.frame_size() == 0 {
            return Err(BackendFault::new("loopback input has no channels"));
        }

        let (producer, consumer) = HeapRb::<u8>::new(self.options.input_capacity.max(1)).split();
        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(LoopbackModule {
            options: self.options.clone(),
            outputs: self.outputs.clone(),
            session_callback: Arc::clone(&self.callback),
            module_callback: callback,
            producer,
            consumer: Some(consumer),
            signal: Arc::new(Signal::default()),
            worker: None,
            live: Arc::clone(&self.live),
        }))
    }

    fn close(self: Box<Self>) -> Result<(), BackendFault> {
        self.live.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
struct Flags {
    pending: bool,
    starved: bool,
    eos: bool,
    stopping: bool,
}

#[derive(Default)]
struct Signal {
    flags: Mutex<Flags>,
    wake: Condvar,
}

impl Signal {
    fn update(&self, f: impl FnOnce(&mut Flags)) {
        f(&mut self.flags.lock());
        self.wake.notify_one();
    }
}

struct LoopbackModule {
    options: LoopbackOptions,
    outputs: Vec<OutputConfig>,
    session_callback: SessionCallback,
    module_callback: ModuleCallback,
    producer: HeapProd<u8>,
    consumer: Option<HeapCons<u8>>,
    signal: Arc<Signal>,
    worker: Option<JoinHandle<()>>,
    live: Arc<AtomicUsize>,
}

impl LoopbackModule {
    fn halt(&mut self) -> Result<(), BackendFault> {
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };
        self.signal.update(|flags| flags.stopping = true);
        worker
            .join()
            .map_err(|_| BackendFault::new("loopback worker panicked"))
    }
}

impl BackendModule for LoopbackModule {
    fn start(&mut self) -> Result<(), BackendFault> {
        self.options.check(BackendStage::StartModule)?;
        let consumer = self
            .consumer
            .take()
            .ok_or_else(|| BackendFault::new("module already started"))?;

        let worker = Worker {
            options: self.options.clone(),
            outputs: self.outputs.clone(),
            session_callback: Arc::clone(&self.session_callback),
            module_callback: Arc::clone(&self.module_callback),
            consumer,
            signal: Arc::clone(&self.signal),
            pending: Vec::new(),
            frames_emitted: 0,
        };
        let handle = std::thread::Builder::new()
            .name("loopback-decoder".to_string())
            .spawn(move || worker.run())
            .map_err(|e| BackendFault::new(format!("failed to spawn worker: {e}")))?;
        self.worker = Some(handle);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), BackendFault> {
        self.options.check(BackendStage::StopModule)?;
        self.halt()
    }

    fn process(&mut self, buffer: &InputBuffer<'_>) -> ProcessStatus {
        if buffer.eos {
            self.signal.update(|flags| flags.eos = true);
            return ProcessStatus::Consumed(0);
        }
        if self.worker.is_none() {
            return ProcessStatus::Consumed(0);
        }

        let limit = self
            .options
            .max_consume
            .map_or(buffer.data.len(), |max| max.min(buffer.data.len()));
        let pushed = self.producer.push_slice(&buffer.data[..limit]);
        if pushed == 0 {
            self.signal.update(|flags| flags.starved = true);
            ProcessStatus::NotReady
        } else {
            self.signal.update(|flags| flags.pending = true);
            ProcessStatus::Consumed(pushed)
        }
    }

    fn release(mut self: Box<Self>) -> Result<(), BackendFault> {
        self.halt()
    }
}

impl Drop for LoopbackModule {
    fn drop(&mut self) {
        if let Err(e) = self.halt() {
            tracing::warn!("loopback shutdown: {e}");
        }
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

struct Worker {
    options: LoopbackOptions,
    outputs: Vec<OutputConfig>,
    session_callback: SessionCallback,
    module_callback: ModuleCallback,
    consumer: HeapCons<u8>,
    signal: Arc<Signal>,
    /// Bytes popped from the queue but not yet delivered.
    pending: Vec<u8>,
    frames_emitted: u64,
}

impl Worker {
    fn run(mut self) {
        self.announce();

        loop {
            let (starved, eos) = {
                let mut flags = self.signal.flags.lock();
                while !(flags.pending || flags.starved || flags.eos || flags.stopping) {
                    self.signal.wake.wait(&mut flags);
                }
                if flags.stopping && !flags.eos {
                    tracing::debug!("loopback worker stopping");
                    return;
                }
                flags.pending = false;
                (std::mem::take(&mut flags.starved), flags.eos)
            };

            self.drain();

            if starved {
                let bytes_available = self.consumer.vacant_len();
                (self.module_callback)(ModuleEvent::SendInputBuffer {
                    bytes_available: Some(bytes_available),
                });
            }

            if eos {
                let leftover = self.pending.len();
                if leftover > 0 {
                    tracing::warn!(bytes = leftover, "discarding partial frame at end of stream");
                }
                (self.session_callback)(SessionEvent::Eos);
                if self.options.repeat_eos {
                    (self.session_callback)(SessionEvent::Eos);
                }
                return;
            }
        }
    }

    fn announce(&self) {
        (self.module_callback)(ModuleEvent::InputConfigChange(InputFormat {
            sample_rate: self.options.sample_rate,
            bit_width: self.options.bit_width,
            channels: self.options.channel_map.len() as u16,
        }));

        for output in &self.outputs {
            (self.session_callback)(SessionEvent::OutputConfigChange {
                output: output.id,
                format: self.output_format(output),
            });
        }
    }

    fn output_format(&self, output: &OutputConfig) -> OutputFormat {
        let channels = self.output_channels(output);
        OutputFormat {
            sample_rate: if self.options.report_output_rate {
                self.options.sample_rate
            } else {
                0
            },
            bit_width: self.options.bit_width,
            interleaved: !self.options.planar,
            channel_map: self.options.channel_map[..channels].to_vec(),
        }
    }

    fn output_channels(&self, output: &OutputConfig) -> usize {
        self.options
            .channel_map
            .len()
            .min(usize::from(output.max_channels))
    }

    /// Pops everything queued and delivers whole blocks.
    fn drain(&mut self) {
        let mut chunk = [0u8; 4096];
        loop {
            let popped = self.consumer.pop_slice(&mut chunk);
            if popped == 0 {
                break;
            }
            self.pending.extend_from_slice(&chunk[..popped]);
            self.deliver(false);
        }
        self.deliver(true);
    }

    /// Delivers full blocks, and with `flush` also the trailing whole frames.
    fn deliver(&mut self, flush: bool) {
        let frame_size = self.options.frame_size();
        let block_size = frame_size * self.options.block_frames.max(1);

        loop {
            let available = if self.pending.len() >= block_size {
                block_size
            } else if flush {
                self.pending.len() - self.pending.len() % frame_size
            } else {
                0
            };
            if available == 0 {
                return;
            }

            let block: Vec<u8> = self.pending.drain(..available).collect();
            let frames = (block.len() / frame_size) as u64;
            let timestamp =
                (self.frames_emitted * 1_000_000 / u64::from(self.options.sample_rate.max(1))) as i64;
            self.frames_emitted += frames;

            for output in &self.outputs {
                let data = self.shape(&block, self.output_channels(output));
                (self.session_callback)(SessionEvent::Data {
                    output: output.id,
                    buffer: DecodedBuffer {
                        data,
                        timestamp: Some(timestamp),
                    },
                });
            }
        }
    }

    /// Keeps the first `channels` channels of each frame, as interleaved
    /// frames or planes.
    fn shape(&self, block: &[u8], channels: usize) -> Vec<u8> {
        let sample_size = self.options.sample_size();
        let frame_size = self.options.frame_size();
        let mut out = Vec::with_capacity(block.len() / frame_size * channels * sample_size);

        if self.options.planar {
            for channel in 0..channels {
                for frame in block.chunks_exact(frame_size) {
                    let start = channel * sample_size;
                    out.extend_from_slice(&frame[start..start + sample_size]);
                }
            }
        } else {
            for frame in block.chunks_exact(frame_size) {
                out.extend_from_slice(&frame[..channels * sample_size]);
            }
        }
        out
    }
}
