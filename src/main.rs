use std::io::Write;
use std::process::exit;
use std::time::Instant;

use clap::{App, Arg};
use svfplay::{LoggingHardware, Player};

fn main() {
    let matches = App::new("svfplay")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Parse and play back an SVF file against a JTAG target")
        .arg(Arg::with_name("INPUT").help("SVF file to play").required(true).index(1))
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .long("verbose")
                .help("Enable verbose diagnostic logging"),
        )
        .arg(
            Arg::with_name("max-errors")
                .long("max-errors")
                .takes_value(true)
                .default_value("1")
                .help("Abort after this many TDO mismatches/errors (0 = unlimited)"),
        )
        .arg(
            Arg::with_name("frequency")
                .long("frequency")
                .takes_value(true)
                .help("Override the initial TCK frequency, in Hz, before playback starts"),
        )
        .get_matches();

    let verbose = matches.is_present("verbose");
    env_logger::Builder::new()
        .filter_level(if verbose { log::LevelFilter::Trace } else { log::LevelFilter::Info })
        .init();

    let path = matches.value_of("INPUT").expect("INPUT is required");
    let max_errors: u64 = matches
        .value_of("max-errors")
        .and_then(|s| s.parse().ok())
        .unwrap_or(1);

    let file_size = match std::fs::metadata(path) {
        Ok(meta) => meta.len(),
        Err(e) => {
            eprintln!("Error: file '{}' not found: {}", path, e);
            exit(2);
        }
    };
    println!("SVF file size: {} bytes ({:.2} KB)", file_size, file_size as f64 / 1024.0);

    let mut hw = LoggingHardware::new();
    let mut player = Player::new(&mut hw, verbose);
    if let Some(hz) = matches.value_of("frequency").and_then(|s| s.parse::<f64>().ok()) {
        player.set_frequency(hz);
    }
    player.set_max_errors(max_errors);
    player.set_progress_callback(|current, total, errors, aborting| {
        let percent = if total > 0 { current as f64 / total as f64 * 100.0 } else { 100.0 };
        print!("\rProcessing: {}/{} commands ({:.1}%), Errors: {}", current, total, percent, errors);
        if aborting {
            print!(" [ABORTING]");
        }
        if current == total || aborting {
            println!();
        }
        std::io::stdout().flush().ok();
    });

    println!("Playing SVF file: {}", path);
    let start = Instant::now();

    let report = match player.play_file(path) {
        Ok(report) => report,
        Err(e) => {
            eprintln!("Failed to parse SVF file: {}", e);
            exit(2);
        }
    };

    let elapsed = start.elapsed();
    if report.success {
        println!("SVF playback completed successfully.");
    } else {
        println!("SVF playback completed with {} errors.", report.error_count);
    }

    let speed = file_size as f64 / elapsed.as_secs_f64().max(1e-9);
    println!("Total time: {:.2} seconds, download speed: {}", elapsed.as_secs_f64(), format_speed(speed));

    exit(if report.error_count > 0 { 1 } else { 0 });
}

/// Formats a transfer rate, auto-selecting B/s, KB/s or MB/s.
fn format_speed(bytes_per_sec: f64) -> String {
    if bytes_per_sec >= 1024.0 * 1024.0 {
        format!("{:.2} MB/s", bytes_per_sec / (1024.0 * 1024.0))
    } else if bytes_per_sec >= 1024.0 {
        format!("{:.2} KB/s", bytes_per_sec / 1024.0)
    } else {
        format!("{:.2} B/s", bytes_per_sec)
    }
}
