mod packet;
mod ping;
mod stats;
mod timing;
mod util;

use clap::{App, AppSettings, Arg};
use colored::*;
use tracing::Level;

use ping::{PingError, Pinger, RawTransport};
use stats::SessionStats;

fn main() {
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_max_level(Level::WARN)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    let matches = App::new("rping")
        .setting(AppSettings::ColoredHelp)
        .version("0.1.0")
        .about("Send five ICMP echo requests to a host and report round-trip statistics.")
        .arg(
            Arg::with_name("DESTINATION")
                .help("Hostname or IPv4 address")
                .required(true)
                .index(1),
        )
        .get_matches();

    let destination = matches.value_of("DESTINATION").unwrap();

    if let Err(err) = run(destination) {
        eprintln!("{} {}", "error:".red().bold(), err);
        std::process::exit(1);
    }
}

fn run(destination: &str) -> Result<(), PingError> {
    // Raw sockets are gated on privilege; fail before touching the network.
    if !util::running_as_root() {
        return Err(PingError::MissingPrivilege);
    }

    let addr = util::resolve_dest(destination).map_err(|source| PingError::Resolve {
        host: destination.to_string(),
        source,
    })?;

    let transport = RawTransport::open()?;
    let mut pinger = Pinger::new(transport, addr);

    println!("{} {} ({})", "PING".cyan(), destination.bold(), addr);

    let mut stats = SessionStats::new();
    pinger.run(&mut stats)?;

    stats.report(destination);
    Ok(())
}
