// keysweep - parallel private-key range sweeper
// Enumerates a key range across all cores, pre-filters derived hashes through
// a bloom filter and confirms hits against the exact target set.

use std::process::ExitCode;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use clap::Parser;

use keysweep::cli::{format_number, Args};
use keysweep::error::Error;
use keysweep::search::Search;

// Exit codes: 0 clean stop, 1 bad config, 2 state-file I/O, 3 target parse,
// 130 interrupted.
const EXIT_CONFIG: u8 = 1;
const EXIT_IO: u8 = 2;
const EXIT_PARSE: u8 = 3;
const EXIT_INTERRUPTED: u8 = 130;

/// Verify the derive -> hash160 -> address pipeline against known vectors
/// before scanning. A broken crypto stack here would silently miss every
/// match for hours.
fn run_self_test() -> bool {
    use keysweep::address::{encode_p2pkh, to_wif};
    use keysweep::crypto::{derive_pubkeys, hash160};
    use keysweep::types::PrivateKey;

    // (key value, compressed hash160, P2PKH address, compressed WIF)
    let vectors = [
        (
            1u8,
            "751e76e8199196d454941c45d1b3a323f1433bd6",
            "1BgGZ9tcN4rm9KBzDn7KprQz87SZ26SAMH",
            "KwDiBf89QgGbjEhKnhXJuH7LrciVrZi3qYjgd9M7rFU73sVHnoWn",
        ),
        (
            2u8,
            "06afd46bcdfd22ef94ac122aa11f241244a37ecc",
            "1cMh228HTCiwS8ZsaakH8A8wze1JR5ZsP",
            "KwDiBf89QgGbjEhKnhXJuH7LrciVrZi3qYjgd9M7rFU74NMTptX4",
        ),
    ];

    for (value, expect_hash, expect_addr, expect_wif) in vectors {
        let mut bytes = [0u8; 32];
        bytes[31] = value;
        let key = PrivateKey::from_bytes(bytes);

        let Ok((_, compressed)) = derive_pubkeys(&key) else {
            eprintln!("  [x] self-test: derive failed for key {value}");
            return false;
        };
        let hash = hash160(compressed.as_bytes());
        if hash.to_hex() != expect_hash {
            eprintln!("  [x] self-test: hash160 mismatch for key {value}");
            return false;
        }
        if encode_p2pkh(&hash, 0x00) != expect_addr {
            eprintln!("  [x] self-test: address mismatch for key {value}");
            return false;
        }
        if to_wif(&key, true) != expect_wif {
            eprintln!("  [x] self-test: WIF mismatch for key {value}");
            return false;
        }
    }
    true
}

fn main() -> ExitCode {
    // Arguments that fail to parse are invalid configuration (exit 1), not
    // clap's default exit 2 (reserved here for state-file I/O).
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() { ExitCode::from(EXIT_CONFIG) } else { ExitCode::SUCCESS };
        }
    };

    if !run_self_test() {
        eprintln!("[!] Crypto self-test failed, refusing to scan");
        return ExitCode::from(EXIT_CONFIG);
    }
    println!("[*] Self-test passed");

    let params = match args.to_params() {
        Ok(params) => params,
        Err(e) => {
            eprintln!("[!] {e}");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    let mut search = match Search::new(params.clone()) {
        Ok(search) => search,
        Err(e) => {
            eprintln!("[!] {e}");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    match search.load_targets(&args.targets) {
        Ok(count) => println!("[*] {} target(s) loaded from {}", count, args.targets.display()),
        Err(e) => {
            eprintln!("[!] {e}");
            return ExitCode::from(match e {
                Error::Parse(_) => EXIT_PARSE,
                Error::Io(_) => EXIT_IO,
                _ => EXIT_CONFIG,
            });
        }
    }

    println!(
        "[*] Range {} ({} keys), mode {:?}, {} thread(s)",
        params.range,
        format_number(params.range.size().to_u128_lossy().min(u64::MAX as u128) as u64),
        params.mode,
        if params.num_threads == 0 { "auto".to_string() } else { params.num_threads.to_string() }
    );

    // SIGINT/SIGTERM flip the stop flag; the run loop winds down and writes
    // the final checkpoint before we exit.
    let stop = search.stop_handle();
    let handler_stop = Arc::clone(&stop);
    if let Err(e) = ctrlc::set_handler(move || {
        eprintln!("\n[!] Interrupt received, stopping after the current batch");
        handler_stop.store(true, Ordering::Release);
    }) {
        eprintln!("[!] Cannot install signal handler: {e}");
    }

    if !args.quiet {
        let status_every = args.status_interval.max(1);
        let last_tick = std::sync::Mutex::new(std::time::Instant::now());
        search.on_progress(Arc::new(move |p| {
            let mut last = last_tick.lock().unwrap();
            if last.elapsed().as_secs() >= status_every {
                println!(
                    "[Sweep] {} keys | {} | {:.4}% | pos {} | up {}",
                    format_number(p.keys_checked),
                    p.format_speed(),
                    p.progress_percent,
                    p.current_position,
                    p.format_elapsed()
                );
                *last = std::time::Instant::now();
            }
        }));
    }

    let results = match search.run() {
        Ok(results) => results,
        Err(e) => {
            eprintln!("[!] Run aborted: {e}");
            return ExitCode::from(match e {
                Error::Io(_) => EXIT_IO,
                Error::Parse(_) => EXIT_PARSE,
                _ => EXIT_CONFIG,
            });
        }
    };

    let interrupted = stop.load(Ordering::Acquire);
    let progress = search.progress();
    println!(
        "\n[*] Done: {} keys checked, {} hit(s), {}",
        format_number(progress.keys_checked),
        results.len(),
        progress.format_elapsed()
    );
    for result in &results {
        println!("    {} -> {}", result.private_key.to_hex(), result.address);
    }

    if interrupted {
        ExitCode::from(EXIT_INTERRUPTED)
    } else {
        ExitCode::SUCCESS
    }
}
