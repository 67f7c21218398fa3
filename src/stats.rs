use colored::*;

use crate::ping::PACKET_COUNT;

/// Counters and accumulators for one echo session, updated once per send
/// and once per matched reply.
pub struct SessionStats {
    transmitted: u32,
    received: u32,
    rtt_sum_ms: f64,
}

impl SessionStats {
    pub fn new() -> SessionStats {
        SessionStats {
            transmitted: 0,
            received: 0,
            rtt_sum_ms: 0.0,
        }
    }

    pub fn record_sent(&mut self) {
        self.transmitted += 1;
    }

    pub fn record_reply(&mut self, rtt_ms: f64) {
        self.received += 1;
        self.rtt_sum_ms += rtt_ms;
    }

    pub fn transmitted(&self) -> u32 {
        self.transmitted
    }

    pub fn received(&self) -> u32 {
        self.received
    }

    pub fn lost(&self) -> u32 {
        self.transmitted - self.received
    }

    /// Truncating integer percentage of lost packets.
    pub fn loss_percent(&self) -> u32 {
        if self.transmitted == 0 {
            return 0;
        }
        (self.transmitted - self.received) * 100 / self.transmitted
    }

    /// The average divides by the fixed packet budget rather than the reply
    /// count, so lost packets drag the average down.
    pub fn average_rtt_ms(&self) -> f64 {
        self.rtt_sum_ms / f64::from(PACKET_COUNT)
    }

    pub fn report(&self, name: &str) {
        println!();
        println!(
            "{} {} {} {}",
            "===".yellow(),
            name.bold(),
            "ping statistics".cyan(),
            "===".yellow()
        );

        if self.transmitted == 0 {
            println!("no packets transmitted");
            return;
        }

        let loss = self.loss_percent();
        let loss = if loss > 0 {
            loss.to_string().red()
        } else {
            loss.to_string().green()
        };

        println!(
            "{} packets transmitted, {} received, {} lost ({}% loss)",
            self.transmitted.to_string().bold(),
            self.received.to_string().bold(),
            self.lost(),
            loss
        );
        println!(
            "rtt average {} ms",
            format!("{:.2}", self.average_rtt_ms()).bold()
        );
    }
}
