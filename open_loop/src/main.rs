// Helper for exercising the openat probe by hand or from tests.
//
// usage: open_loop [comm] [path] [count] [interval_ms]
//
// Renames its own task to `comm`, then opens `path` `count` times
// (0 = forever), sleeping `interval_ms` between opens.

use std::env;
use std::ffi::CString;
use std::fs::File;
use std::io::{self, Write};
use std::process;
use std::thread;
use std::time::Duration;

fn arg_or<T: std::str::FromStr>(args: &[String], idx: usize, default: T) -> T {
    match args.get(idx) {
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            eprintln!("open_loop: cannot parse argument {idx}: {raw:?}");
            process::exit(2);
        }),
        None => default,
    }
}

fn main() {
    let args: Vec<String> = env::args().collect();
    let comm = args.get(1).cloned().unwrap_or_else(|| "open_loop".into());
    let path = args.get(2).cloned().unwrap_or_else(|| "/etc/hostname".into());
    let count: u64 = arg_or(&args, 3, 10);
    let interval_ms: u64 = arg_or(&args, 4, 200);

    // The kernel keeps at most 15 bytes plus the terminator.
    let name = match CString::new(comm.as_bytes()) {
        Ok(name) => name,
        Err(e) => {
            eprintln!("open_loop: invalid name {comm:?}: {e}");
            process::exit(2);
        }
    };
    if let Err(e) = nix::sys::prctl::set_name(&name) {
        eprintln!("open_loop: prctl(PR_SET_NAME) failed: {e}");
    }

    let pid = process::id();
    println!("open_loop started, PID: {pid}, comm: {comm}, path: {path}");
    io::stdout().flush().ok();

    let mut opened = 0u64;
    while count == 0 || opened < count {
        match File::open(&path) {
            Ok(_) => opened += 1,
            Err(e) => {
                eprintln!("open_loop: open {path} failed: {e}");
                process::exit(1);
            }
        }
        thread::sleep(Duration::from_millis(interval_ms));
    }
    println!("open_loop done, opened {opened} times");
}
