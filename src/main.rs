//! `pcap-stats`: per-peer traffic tables from a capture file.
//!
//! Reads `test.pcap` from the working directory, fans the packets across
//! worker threads, and prints byte/packet totals per MAC pair, IPv4 pair,
//! and TCP port pair.

use std::fs::File;
use std::io::BufReader;
use std::process;

use tracing_subscriber::EnvFilter;

use crossflow::capture::{CaptureReader, LINKTYPE_ETHERNET};
use crossflow::pipeline::{render_table, run_capture};

const CAPTURE_FILE: &str = "test.pcap";

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let file = match File::open(CAPTURE_FILE) {
        Ok(file) => file,
        Err(err) => {
            eprintln!("{CAPTURE_FILE}: {err}");
            process::exit(1);
        }
    };

    let reader = match CaptureReader::new(BufReader::new(file)) {
        Ok(reader) => reader,
        Err(err) => {
            eprintln!("{CAPTURE_FILE}: {err}");
            process::exit(1);
        }
    };

    if reader.link_type() != LINKTYPE_ETHERNET {
        eprintln!(
            "{CAPTURE_FILE}: unsupported link type {}",
            reader.link_type()
        );
        process::exit(1);
    }

    // A read error mid-file ends ingestion; everything read so far is still
    // reported.
    let records = reader.map_while(|record| match record {
        Ok(record) => Some(record),
        Err(err) => {
            eprintln!("{CAPTURE_FILE}: {err}");
            None
        }
    });

    let (tables, summary) = run_capture(records);

    print!("{}", render_table("Per MAC pair:", &tables.mac));
    println!();
    print!("{}", render_table("Per IP pair:", &tables.ip));
    println!();
    print!("{}", render_table("Per port pair:", &tables.port));

    eprintln!(
        "frames={} malformed={}",
        summary.frames, summary.malformed
    );
}
