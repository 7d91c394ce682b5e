//! stream-decode - decode one audio stream and write it as WAV.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::Level;
use tracing_subscriber::EnvFilter;

use stream_decode::backend::{BackendLoader, LoopbackLoader, LoopbackOptions};
use stream_decode::config::MAX_OUTPUT_CHANNELS;
use stream_decode::source::{Demuxer, PcmParameters};
use stream_decode::{
    CompressionFormat, DecodeError, FileSink, OutputId, Sink, StreamDecode, WriterSink,
};

#[derive(Parser)]
#[command(name = "stream-decode")]
#[command(about = "Decode an audio stream through a decoding backend into WAV")]
struct Cli {
    /// Input file or URL.
    input: PathBuf,

    /// Audio stream number to decode.
    #[arg(short = 's', long = "stream")]
    stream: Option<usize>,

    /// Write WAV data to a file instead of stdout.
    #[arg(short = 'o', long = "output")]
    output: Option<PathBuf>,

    /// Increase log verbosity (repeatable).
    #[arg(short = 'v', action = clap::ArgAction::Count)]
    verbose: u8,

    /// Maximum number of channels of one output (repeatable, one per output).
    #[arg(
        short = 'c',
        long = "channels",
        value_parser = clap::value_parser!(u8).range(1..=i64::from(MAX_OUTPUT_CHANNELS))
    )]
    channels: Vec<u8>,

    /// Key/value string passed to the decoder backend.
    #[arg(short = 'k', long = "kvpairs")]
    kv_pairs: Option<String>,

    /// Format of a raw elementary stream input.
    #[arg(long, value_parser = parse_codec, default_value = "pcm")]
    codec: CompressionFormat,

    /// Backend library to load instead of the codec's default.
    #[arg(long)]
    library: Option<String>,

    /// Read size for raw input.
    #[arg(long, default_value_t = stream_decode::source::DEFAULT_PACKET_SIZE)]
    packet_size: usize,

    /// Sample rate of raw PCM input.
    #[arg(long, default_value_t = 48000)]
    pcm_rate: u32,

    /// Channel count of raw PCM input (16-bit little endian).
    #[arg(
        long,
        default_value_t = 2,
        value_parser = clap::value_parser!(u16).range(1..=i64::from(MAX_OUTPUT_CHANNELS))
    )]
    pcm_channels: u16,
}

fn parse_codec(value: &str) -> Result<CompressionFormat, String> {
    match value.to_ascii_lowercase().as_str() {
        "ac3" => Ok(CompressionFormat::Ac3),
        "eac3" => Ok(CompressionFormat::Eac3),
        "aac" => Ok(CompressionFormat::AacAdts),
        "dts" => Ok(CompressionFormat::Dts),
        "pcm" => Ok(CompressionFormat::Pcm),
        other => Err(format!("unknown codec `{other}` (ac3, eac3, aac, dts, pcm)")),
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => Level::ERROR,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    // stdout may carry the decoded stream
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[cfg(feature = "ffmpeg")]
fn open_demuxer(cli: &Cli) -> Result<Box<dyn Demuxer + Send>, DecodeError> {
    let demuxer = stream_decode::source::FfmpegDemuxer::open(&cli.input, cli.stream)?;
    Ok(Box::new(demuxer))
}

#[cfg(not(feature = "ffmpeg"))]
fn open_demuxer(cli: &Cli) -> Result<Box<dyn Demuxer + Send>, DecodeError> {
    if cli.stream.is_some() {
        tracing::warn!("stream selection needs the ffmpeg feature, ignoring -s");
    }
    let file = std::fs::File::open(&cli.input)
        .map_err(|e| DecodeError::demux(format!("cannot open {}: {e}", cli.input.display())))?;
    let demuxer = stream_decode::source::RawDemuxer::new(
        std::io::BufReader::new(file),
        cli.codec,
        cli.packet_size,
    )?;
    Ok(Box::new(demuxer))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("cannot listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::warn!("cannot listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

async fn run(cli: Cli) -> Result<(), DecodeError> {
    let demuxer = open_demuxer(&cli)?;

    let sink: Box<dyn Sink> = match &cli.output {
        Some(path) => Box::new(FileSink::new(path)),
        None => Box::new(WriterSink::stdout()),
    };

    let mut builder = StreamDecode::builder()
        .format(demuxer.format())
        .channel_limits(&cli.channels)
        .mux_to(OutputId::PRIMARY, sink)
        .on_event(|event| tracing::debug!(?event, "decode event"));
    if let Some(kv_pairs) = &cli.kv_pairs {
        builder = builder.kv_pairs(kv_pairs.clone());
    }
    if let Some(library) = &cli.library {
        builder = builder.library(library.clone());
    }
    let session = builder.build()?;

    // Containers describe their PCM streams; raw input relies on the flags
    let pcm = demuxer.pcm_parameters().unwrap_or(PcmParameters {
        sample_rate: cli.pcm_rate,
        channels: cli.pcm_channels,
        bit_width: 16,
    });
    let loader: Arc<dyn BackendLoader> =
        Arc::new(LoopbackLoader::new(LoopbackOptions::for_pcm(pcm)?));

    let cancel = session.cancel_handle();
    let decode = session.run_async(loader, demuxer);
    tokio::pin!(decode);

    let stats = tokio::select! {
        result = &mut decode => result?,
        () = shutdown_signal() => {
            tracing::info!("quit requested");
            cancel.cancel();
            decode.await?
        }
    };

    tracing::info!(
        packets = stats.packets_fed,
        bytes = stats.bytes_muxed,
        completion = ?stats.completion,
        "done"
    );
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        }
    }
}
