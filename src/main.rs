//! trackerctl - block tracker progress CLI
//!
//! Inspects and repairs the persistent progress store of the tracker
//! service: bounds, gaps and presence markers.

use eth_tracker::cli;

fn main() {
    if let Err(e) = cli::run() {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
