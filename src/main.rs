use byteorder::{LittleEndian, ReadBytesExt};
use clap::Parser;
use crossbeam_channel::bounded;
use log::{debug, error, info, warn};
use sent_decoder::Channel;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::PathBuf;
use std::thread;

/// Replays a captured pulse log through a `Channel` and reports decoded
/// frames and slow-channel mailbox contents. Diagnostic tooling only: it
/// owns no protocol logic of its own.
#[derive(Parser)]
#[command(name = "sent-replay")]
#[command(about = "Replay a SENT pulse log through the decoder")]
struct Cli {
    /// Pulse log to read (newline-delimited `ticks,flags` records). Omit to
    /// read from stdin.
    #[arg(long)]
    input: Option<PathBuf>,

    /// Diagnostic label only, for logs covering more than one channel.
    #[arg(long, default_value_t = 0)]
    channel_id: u32,

    /// Emit each decoded frame as a JSON line instead of the human-readable
    /// form.
    #[arg(long)]
    json: bool,

    /// After the input is exhausted, print every valid slow-channel mailbox
    /// entry.
    #[arg(long)]
    dump_slow_channel: bool,

    /// Read the pulse log as fixed-width binary records (`u32` ticks, `u8`
    /// flags, 3 bytes padding) instead of CSV text.
    #[arg(long)]
    binary: bool,
}

struct PulseRecord {
    ticks: u32,
    flags: u8,
}

fn read_csv(input: Box<dyn Read + Send>, tx: crossbeam_channel::Sender<PulseRecord>) {
    let reader = BufReader::new(input);
    let mut error_count: u64 = 0;
    for line in reader.lines() {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                warn!("failed to read input line: {}", e);
                break;
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match parse_csv_record(line) {
            Ok(record) => {
                if tx.send(record).is_err() {
                    break;
                }
            }
            Err(e) => {
                error_count += 1;
                debug!("skipping malformed pulse record {:?}: {}", line, e);
            }
        }
    }
    if error_count > 0 {
        info!("skipped {} malformed pulse records", error_count);
    }
}

fn parse_csv_record(line: &str) -> Result<PulseRecord, String> {
    let mut parts = line.splitn(2, ',');
    let ticks_s = parts.next().ok_or("missing ticks field")?;
    let flags_s = parts.next().ok_or("missing flags field")?;
    let ticks = ticks_s
        .trim()
        .parse::<u32>()
        .map_err(|e| format!("bad ticks {:?}: {}", ticks_s, e))?;
    let flags = flags_s
        .trim()
        .parse::<u8>()
        .map_err(|e| format!("bad flags {:?}: {}", flags_s, e))?;
    Ok(PulseRecord { ticks, flags })
}

fn read_binary(mut input: Box<dyn Read + Send>, tx: crossbeam_channel::Sender<PulseRecord>) {
    let mut error_count: u64 = 0;
    loop {
        let ticks = match input.read_u32::<LittleEndian>() {
            Ok(v) => v,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => {
                warn!("failed to read binary pulse record: {}", e);
                break;
            }
        };
        let flags = match input.read_u8() {
            Ok(v) => v,
            Err(_) => {
                error_count += 1;
                break;
            }
        };
        let mut padding = [0u8; 3];
        if input.read_exact(&mut padding).is_err() {
            error_count += 1;
            break;
        }
        if tx.send(PulseRecord { ticks, flags }).is_err() {
            break;
        }
    }
    if error_count > 0 {
        info!("skipped {} malformed binary pulse records", error_count);
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();

    let input: Box<dyn Read + Send> = match &cli.input {
        Some(path) => match File::open(path) {
            Ok(f) => Box::new(f),
            Err(e) => {
                error!("failed to open {:?}: {}", path, e);
                std::process::exit(1);
            }
        },
        None => Box::new(io::stdin()),
    };

    info!(
        "replaying channel {} ({} input)",
        cli.channel_id,
        if cli.binary { "binary" } else { "csv" }
    );

    let (tx, rx) = bounded::<PulseRecord>(4096);
    let binary = cli.binary;
    let reader_handle = thread::Builder::new()
        .name("pulse-reader".into())
        .spawn(move || {
            if binary {
                read_binary(input, tx);
            } else {
                read_csv(input, tx);
            }
        })
        .expect("failed to spawn reader thread");

    let mut channel = Channel::new();
    let mut pulse_count: u64 = 0;

    for record in rx.iter() {
        pulse_count += 1;
        match channel.decode(record.ticks, record.flags) {
            1 => {
                let frame = channel
                    .get_decoded_frame()
                    .expect("decode just returned +1");
                if cli.json {
                    println!("{}", serde_json::to_string(&frame).unwrap());
                } else {
                    println!(
                        "channel {} frame #{}: status=0x{:X} sig0=0x{:03X} sig1=0x{:03X}",
                        cli.channel_id, pulse_count, frame.status, frame.sig0, frame.sig1
                    );
                }
                debug!("channel {} decoded {:?}", cli.channel_id, frame);
            }
            -1 => {
                warn!(
                    "channel {} rejected pulse #{} ({:?})",
                    cli.channel_id,
                    pulse_count,
                    channel.stats()
                );
            }
            _ => {}
        }
    }

    reader_handle.join().expect("reader thread panicked");

    if cli.dump_slow_channel {
        for entry in channel.slow_channel_entries() {
            println!(
                "channel {} slow[{}] = 0x{:04X}",
                cli.channel_id, entry.id, entry.data
            );
        }
    }

    info!("done: {} pulses, {:?}", pulse_count, channel.stats());
}
