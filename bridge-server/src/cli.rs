use std::ffi::OsString;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Arg, ArgAction, ArgMatches, Command, value_parser};
use stream_bridge::{ReceiverConfig, StreamEndpoint, StreamEndpointBuilder};

use crate::config::BridgeConfig;

pub enum Mode {
    /// Publish a generated test pattern.
    Publish(StreamEndpoint),
    /// Receive and count frames, keeping the latest for snapshots.
    Receive(ReceiverConfig),
    /// Receive from `source` and publish every frame to `target`. The
    /// target geometry follows the source.
    Relay {
        source: ReceiverConfig,
        target: StreamEndpointBuilder,
    },
    Probe {
        address: String,
        timeout: Duration,
    },
}

impl Mode {
    pub fn name(&self) -> &'static str {
        match self {
            Mode::Publish(_) => "publish",
            Mode::Receive(_) => "receive",
            Mode::Relay { .. } => "relay",
            Mode::Probe { .. } => "probe",
        }
    }
}

pub struct Cli {
    pub mode: Mode,
    pub api: Option<SocketAddr>,
    /// Stop on our own after this long.
    pub duration: Option<Duration>,
    /// Keep the latest frame as a JPEG at this path.
    pub snapshot: Option<PathBuf>,
}

fn encoder_args(cmd: Command) -> Command {
    cmd.arg(
        Arg::new("fps")
            .long("fps")
            .value_parser(value_parser!(u32))
            .help("Frame rate of the published stream"),
    )
    .arg(
        Arg::new("bitrate")
            .long("bitrate")
            .value_parser(value_parser!(u64))
            .help("Target bitrate in bits per second"),
    )
    .arg(
        Arg::new("gop")
            .long("gop")
            .value_parser(value_parser!(u32))
            .help("Keyframe interval in frames"),
    )
    .arg(
        Arg::new("quality")
            .long("quality")
            .value_parser(value_parser!(u32))
            .help("Constant rate factor, lower is better (0-51)"),
    )
    .arg(
        Arg::new("format")
            .long("format")
            .help("Container format, flv for RTMP"),
    )
    .arg(Arg::new("codec").long("codec").help("Encoder name, e.g. libx264"))
    .arg(
        Arg::new("hw")
            .long("hw")
            .action(ArgAction::SetTrue)
            .help("Prefer hardware codecs, falling back to software"),
    )
}

fn size_args(cmd: Command) -> Command {
    cmd.arg(
        Arg::new("width")
            .long("width")
            .value_parser(value_parser!(u32)),
    )
    .arg(
        Arg::new("height")
            .long("height")
            .value_parser(value_parser!(u32)),
    )
}

fn receive_args(cmd: Command) -> Command {
    cmd.arg(
        Arg::new("max-read-errors")
            .long("max-read-errors")
            .value_parser(value_parser!(u32))
            .help("Give up after this many consecutive read errors (default: never)"),
    )
}

fn run_args(cmd: Command) -> Command {
    cmd.arg(
        Arg::new("duration")
            .long("duration")
            .value_name("SECS")
            .value_parser(value_parser!(u64))
            .help("Stop after this many seconds"),
    )
    .arg(
        Arg::new("snapshot")
            .long("snapshot")
            .value_name("FILE")
            .value_parser(value_parser!(PathBuf))
            .help("Write the latest frame as JPEG to this file every second"),
    )
}

pub fn command() -> Command {
    Command::new("bridge-server")
        .version(env!("CARGO_PKG_VERSION"))
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .value_parser(value_parser!(PathBuf))
                .global(true)
                .help("JSON file with publish/receive/api sections"),
        )
        .arg(
            Arg::new("api")
                .long("api")
                .value_name("ADDR")
                .value_parser(value_parser!(SocketAddr))
                .global(true)
                .help("Serve /status and /snapshot.jpg on this address"),
        )
        .subcommand(run_args(size_args(encoder_args(
            Command::new("publish")
                .about("Publish a moving test pattern")
                .arg(Arg::new("target").help("e.g. rtmp://localhost/live/test")),
        ))))
        .subcommand(run_args(receive_args(size_args(
            Command::new("receive")
                .about("Receive a live stream")
                .arg(Arg::new("source").help("e.g. rtsp://camera/stream"))
                .arg(
                    Arg::new("hw")
                        .long("hw")
                        .action(ArgAction::SetTrue)
                        .help("Prefer hardware decoders"),
                ),
        ))))
        .subcommand(run_args(receive_args(size_args(encoder_args(
            Command::new("relay")
                .about("Receive a live stream and publish it elsewhere")
                .arg(Arg::new("source").required(true))
                .arg(Arg::new("target").required(true)),
        )))))
        .subcommand(
            Command::new("probe")
                .about("Print the streams of a source")
                .arg(Arg::new("source").required(true))
                .arg(
                    Arg::new("timeout")
                        .long("timeout")
                        .value_parser(value_parser!(u64))
                        .default_value("2000")
                        .help("Connect timeout in milliseconds"),
                ),
        )
}

pub fn parse() -> anyhow::Result<Cli> {
    Cli::from_matches(&command().get_matches())
}

pub fn try_parse_from<I, T>(args: I) -> anyhow::Result<Cli>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    Cli::from_matches(&command().try_get_matches_from(args)?)
}

fn builder_from(base: &StreamEndpoint, address: String) -> StreamEndpointBuilder {
    StreamEndpoint::builder(address)
        .geometry(base.width, base.height)
        .channels(base.channels)
        .fps(base.fps)
        .bitrate(base.bitrate)
        .gop(base.gop)
        .quality(base.quality)
        .format(base.format.clone())
        .codec(base.codec.clone())
        .prefer_hardware(base.prefer_hardware)
}

fn apply_encoder_args(mut builder: StreamEndpointBuilder, m: &ArgMatches) -> StreamEndpointBuilder {
    if let Some(fps) = m.get_one::<u32>("fps") {
        builder = builder.fps(*fps);
    }
    if let Some(bitrate) = m.get_one::<u64>("bitrate") {
        builder = builder.bitrate(*bitrate);
    }
    if let Some(gop) = m.get_one::<u32>("gop") {
        builder = builder.gop(*gop);
    }
    if let Some(quality) = m.get_one::<u32>("quality") {
        builder = builder.quality(*quality);
    }
    if let Some(format) = m.get_one::<String>("format") {
        builder = builder.format(format.clone());
    }
    if let Some(codec) = m.get_one::<String>("codec") {
        builder = builder.codec(codec.clone());
    }
    if m.get_flag("hw") {
        builder = builder.prefer_hardware(true);
    }
    builder
}

fn size(m: &ArgMatches) -> (Option<u32>, Option<u32>) {
    (
        m.get_one::<u32>("width").copied(),
        m.get_one::<u32>("height").copied(),
    )
}

fn receiver_config(
    base: Option<&ReceiverConfig>,
    address: Option<&String>,
    m: &ArgMatches,
) -> anyhow::Result<ReceiverConfig> {
    let mut config = match (base, address) {
        (Some(base), Some(address)) => ReceiverConfig {
            address: address.clone(),
            ..base.clone()
        },
        (Some(base), None) => base.clone(),
        (None, Some(address)) => ReceiverConfig::new(address.clone()),
        (None, None) => anyhow::bail!("no source address given"),
    };
    if let (Some(width), Some(height)) = size(m) {
        config = config.with_output_size(width, height);
    }
    if let Some(limit) = m.get_one::<u32>("max-read-errors") {
        config = config.with_max_consecutive_read_errors(*limit);
    }
    if m.get_flag("hw") {
        config = config.prefer_hardware(true);
    }
    config.validate()?;
    Ok(config)
}

impl Cli {
    fn from_matches(matches: &ArgMatches) -> anyhow::Result<Self> {
        let file = match matches.get_one::<PathBuf>("config") {
            Some(path) => BridgeConfig::load(path)?,
            None => BridgeConfig::default(),
        };
        let api = match matches.get_one::<SocketAddr>("api") {
            Some(addr) => Some(*addr),
            None => file
                .api
                .as_deref()
                .map(|a| a.parse().with_context(|| format!("invalid api address {}", a)))
                .transpose()?,
        };

        let mode = match matches.subcommand() {
            Some(("publish", m)) => {
                let address = m.get_one::<String>("target").cloned();
                let mut builder = match (&file.publish, address) {
                    (Some(base), Some(address)) => builder_from(base, address),
                    (Some(base), None) => builder_from(base, base.address.clone()),
                    (None, Some(address)) => StreamEndpoint::builder(address).geometry(640, 480),
                    (None, None) => anyhow::bail!("no target address given"),
                };
                if let (Some(width), Some(height)) = size(m) {
                    builder = builder.geometry(width, height);
                }
                Mode::Publish(apply_encoder_args(builder, m).build()?)
            }
            Some(("receive", m)) => Mode::Receive(receiver_config(
                file.receive.as_ref(),
                m.get_one::<String>("source"),
                m,
            )?),
            Some(("relay", m)) => {
                let source =
                    receiver_config(file.receive.as_ref(), m.get_one::<String>("source"), m)?;
                let target = m
                    .get_one::<String>("target")
                    .cloned()
                    .context("no target address given")?;
                let builder = match &file.publish {
                    Some(base) => builder_from(base, target),
                    None => StreamEndpoint::builder(target),
                };
                Mode::Relay {
                    source,
                    target: apply_encoder_args(builder, m),
                }
            }
            Some(("probe", m)) => Mode::Probe {
                address: m
                    .get_one::<String>("source")
                    .cloned()
                    .context("no source address given")?,
                timeout: Duration::from_millis(m.get_one::<u64>("timeout").copied().unwrap_or(2000)),
            },
            _ => anyhow::bail!("unknown subcommand"),
        };

        let (duration, snapshot) = match matches.subcommand() {
            Some(("probe", _)) | None => (None, None),
            Some((_, m)) => (
                m.get_one::<u64>("duration").map(|s| Duration::from_secs(*s)),
                m.get_one::<PathBuf>("snapshot").cloned(),
            ),
        };
        Ok(Self {
            mode,
            api,
            duration,
            snapshot,
        })
    }
}

#[cfg(test)]
#[path = "cli_test.rs"]
mod cli_test;
